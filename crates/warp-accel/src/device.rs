//! Accelerator device port
//!
//! The offload layer talks to hardware only through [`AccelDevice`]: open
//! and close instance pools, hand over DMA buffers, submit jobs and collect
//! completions. A vendor driver binding is one implementation; the stub
//! backend is another.

use std::fmt;

use crate::completion::JobTicket;
use crate::error::Result;
use crate::memory::{ContigAllocator, ContigBuffer};
use crate::types::{CompressDir, CryptKey, CryptMode, EncryptDir, OpClass, DIGEST_LEN, IV_LEN};

/// Device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceKind {
    /// QuickAssist-class PCIe accelerator
    Qat = 0,
    /// Software stand-in
    Stub = 255,
}

impl DeviceKind {
    /// Check if this is real hardware
    #[must_use]
    pub fn is_hardware(&self) -> bool {
        !matches!(self, DeviceKind::Stub)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Qat => write!(f, "QAT"),
            DeviceKind::Stub => write!(f, "Stub"),
        }
    }
}

/// Device capabilities and information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Compression instances the device can open
    pub dc_instances: usize,
    /// Crypto instances the device can open
    pub cy_instances: usize,
    /// Compression acceleration available
    pub has_compress_accel: bool,
    /// Crypto acceleration available
    pub has_crypto_accel: bool,
}

impl DeviceInfo {
    /// Info for a software stand-in with both engines
    #[must_use]
    pub fn stub(instances: usize) -> Self {
        Self {
            name: "Software Stub".to_string(),
            kind: DeviceKind::Stub,
            dc_instances: instances,
            cy_instances: instances,
            has_compress_accel: true,
            has_crypto_accel: true,
        }
    }

    /// Check the device has an engine for `class`
    #[must_use]
    pub fn supports(&self, class: OpClass) -> bool {
        match class {
            OpClass::Compression => self.has_compress_accel && self.dc_instances > 0,
            OpClass::Crypto => self.has_crypto_accel && self.cy_instances > 0,
        }
    }
}

/// Compression job handed to the device
#[derive(Debug)]
pub struct DcJob {
    /// Instance the job is queued on
    pub instance: usize,
    /// Direction
    pub dir: CompressDir,
    /// Input, `src.len()` bytes are consumed
    pub src: ContigBuffer,
    /// Output; its length is the capacity the device may fill
    pub dst: ContigBuffer,
}

/// Completed compression job
#[derive(Debug)]
pub struct DcOutput {
    /// Output buffer returned by the device
    pub dst: ContigBuffer,
    /// Bytes produced into `dst`
    pub produced: usize,
}

/// Authenticated cipher job handed to the device
#[derive(Debug)]
pub struct CyJob {
    /// Instance the job is queued on
    pub instance: usize,
    /// Direction
    pub dir: EncryptDir,
    /// Cipher suite
    pub mode: CryptMode,
    /// Session key
    pub key: CryptKey,
    /// Nonce
    pub iv: [u8; IV_LEN],
    /// Additional authenticated data, if any
    pub aad: Option<ContigBuffer>,
    /// Payload in
    pub src: ContigBuffer,
    /// Payload out, same length as `src`
    pub dst: ContigBuffer,
    /// Expected tag when decrypting; ignored when encrypting
    pub digest: [u8; DIGEST_LEN],
}

/// Completed cipher job
#[derive(Debug)]
pub struct CyOutput {
    /// Output buffer returned by the device
    pub dst: ContigBuffer,
    /// Tag produced by encryption, or the verified tag on decryption
    pub digest: [u8; DIGEST_LEN],
}

/// Abstract accelerator device
///
/// Submission must not block for the duration of the job; the result is
/// delivered through the returned ticket.
pub trait AccelDevice: Send + Sync {
    /// Get detailed device information
    fn info(&self) -> &DeviceInfo;

    /// Get device name
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Allocator whose buffers the device can DMA into
    fn allocator(&self) -> &ContigAllocator;

    /// Allocate a DMA buffer for a job
    fn allocate(&self, bytes: usize) -> Result<ContigBuffer> {
        self.allocator().allocate(bytes)
    }

    /// Allocate and initialize a buffer with data
    fn allocate_with_data(&self, data: &[u8]) -> Result<ContigBuffer> {
        let mut buffer = self.allocate(data.len())?;
        buffer.copy_from_slice(data);
        Ok(buffer)
    }

    /// Open the instance pool for `class`, returning the instance count
    fn start_instances(&self, class: OpClass) -> Result<usize>;

    /// Close the instance pool for `class`
    fn stop_instances(&self, class: OpClass);

    /// Queue a compression job
    fn submit_compress(&self, job: DcJob) -> Result<JobTicket<DcOutput>>;

    /// Queue a cipher job
    fn submit_crypt(&self, job: CyJob) -> Result<JobTicket<CyOutput>>;
}
