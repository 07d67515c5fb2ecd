//! Stub accelerator for testing
//!
//! Runs jobs on the software codecs but goes through the same motions as a
//! real device: instance pools must be started, buffers must be physically
//! contiguous, and completions arrive through a ticket. Faults can be queued
//! to make the next submissions fail, stall, or complete late.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::completion::{job_channel, Completer, JobTicket};
use crate::config::AccelConfig;
use crate::device::{AccelDevice, CyJob, CyOutput, DcJob, DcOutput, DeviceInfo};
use crate::error::{Error, Result};
use crate::memory::{ContigAllocator, ContigBuffer};
use crate::software;
use crate::types::{EncryptDir, OpClass};

/// Default instances per class
pub const DEFAULT_INSTANCES: usize = 4;

/// Default DMA budget for a stub device
pub const DEFAULT_DMA_CAPACITY: usize = 64 * 1024 * 1024;

/// Requests above this use the virtually-mapped path
pub const DEFAULT_DIRECT_LIMIT: usize = 32 * 1024;

/// Failure injected into the next submission
#[derive(Debug, Clone)]
pub enum Fault {
    /// Complete with a device error
    Error(String),
    /// Refuse the submission
    Busy,
    /// Accept the job and never complete it
    Hang,
    /// Complete normally after a delay
    Delay(Duration),
}

// What happens to a job the stub accepted
enum Disposition {
    Run,
    Fail(String),
    Stall,
    RunAfter(Duration),
}

/// Stub accelerator backed by the software codecs
pub struct StubDevice {
    info: DeviceInfo,
    allocator: ContigAllocator,
    level: u32,
    faults: Mutex<VecDeque<Fault>>,
    fail_dc_start: AtomicBool,
    fail_cy_start: AtomicBool,
    dc_open: AtomicUsize,
    cy_open: AtomicUsize,
    submitted: AtomicU64,
    stalled_dc: Mutex<Vec<Completer<DcOutput>>>,
    stalled_cy: Mutex<Vec<Completer<CyOutput>>>,
}

impl StubDevice {
    /// Create a stub with default instances and DMA budget
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(ContigAllocator::new(
            DEFAULT_DMA_CAPACITY,
            DEFAULT_DIRECT_LIMIT,
        ))
    }

    /// Create a stub that allocates job buffers from `allocator`
    #[must_use]
    pub fn with_allocator(allocator: ContigAllocator) -> Self {
        Self {
            info: DeviceInfo::stub(DEFAULT_INSTANCES),
            allocator,
            level: software::DEFAULT_LEVEL,
            faults: Mutex::new(VecDeque::new()),
            fail_dc_start: AtomicBool::new(false),
            fail_cy_start: AtomicBool::new(false),
            dc_open: AtomicUsize::new(0),
            cy_open: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            stalled_dc: Mutex::new(Vec::new()),
            stalled_cy: Mutex::new(Vec::new()),
        }
    }

    /// Create a stub sized and tuned from `config`
    #[must_use]
    pub fn from_config(config: &AccelConfig) -> Self {
        Self::with_allocator(ContigAllocator::new(
            config.dma_capacity,
            config.direct_alloc_limit,
        ))
        .with_level(config.compression_level)
    }

    /// Set the number of instances per class
    #[must_use]
    pub fn with_instances(mut self, instances: usize) -> Self {
        self.info.dc_instances = instances;
        self.info.cy_instances = instances;
        self
    }

    /// Set the deflate level
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Create a stub with no engines at all
    #[must_use]
    pub fn cpu_only() -> Self {
        let mut stub = Self::new();
        stub.info.has_compress_accel = false;
        stub.info.has_crypto_accel = false;
        stub
    }

    /// Queue a fault for the next submission
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push_back(fault);
    }

    /// Make `start_instances(class)` fail
    pub fn fail_start(&self, class: OpClass, fail: bool) {
        match class {
            OpClass::Compression => self.fail_dc_start.store(fail, Ordering::Relaxed),
            OpClass::Crypto => self.fail_cy_start.store(fail, Ordering::Relaxed),
        }
    }

    /// Jobs accepted so far
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Jobs accepted but never completed
    pub fn stalled(&self) -> usize {
        self.stalled_dc.lock().len() + self.stalled_cy.lock().len()
    }

    /// Faults not yet consumed
    pub fn pending_faults(&self) -> usize {
        self.faults.lock().len()
    }

    fn open_instances(&self, class: OpClass) -> usize {
        match class {
            OpClass::Compression => self.dc_open.load(Ordering::Acquire),
            OpClass::Crypto => self.cy_open.load(Ordering::Acquire),
        }
    }

    fn admit(
        &self,
        class: OpClass,
        instance: usize,
        buffers: &[&ContigBuffer],
    ) -> Result<Disposition> {
        let open = self.open_instances(class);
        if open == 0 {
            return Err(Error::unavailable(format!("{class} instances not started")));
        }
        if instance >= open {
            return Err(Error::job(format!(
                "instance {instance} out of range (0..{open})"
            )));
        }
        if let Some(buf) = buffers.iter().find(|b| !b.is_phys_contiguous()) {
            return Err(Error::job(format!("{buf:?} is not physically contiguous")));
        }
        let disposition = match self.faults.lock().pop_front() {
            None => Disposition::Run,
            Some(Fault::Busy) => {
                debug!(%class, instance, "stub refusing submission: busy");
                return Err(Error::Busy);
            }
            Some(Fault::Error(message)) => Disposition::Fail(message),
            Some(Fault::Hang) => Disposition::Stall,
            Some(Fault::Delay(delay)) => Disposition::RunAfter(delay),
        };
        self.submitted.fetch_add(1, Ordering::Relaxed);
        trace!(%class, instance, "stub accepted job");
        Ok(disposition)
    }
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn run_dc(mut job: DcJob, level: u32) -> Result<DcOutput> {
    let produced = software::transform(job.dir, &job.src, &mut job.dst, level)?;
    Ok(DcOutput {
        dst: job.dst,
        produced,
    })
}

fn run_cy(mut job: CyJob) -> Result<CyOutput> {
    if job.src.len() != job.dst.len() {
        return Err(Error::job(format!(
            "source is {} bytes but destination is {}",
            job.src.len(),
            job.dst.len()
        )));
    }
    job.dst.copy_from_slice(&job.src);
    let aad = job.aad.as_deref().unwrap_or(&[]);
    let digest = match job.dir {
        EncryptDir::Encrypt => software::seal(job.mode, &job.key, &job.iv, aad, &mut job.dst)?,
        EncryptDir::Decrypt => {
            software::open(job.mode, &job.key, &job.iv, aad, &mut job.dst, &job.digest)?;
            job.digest
        }
    };
    Ok(CyOutput {
        dst: job.dst,
        digest,
    })
}

impl AccelDevice for StubDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn allocator(&self) -> &ContigAllocator {
        &self.allocator
    }

    fn start_instances(&self, class: OpClass) -> Result<usize> {
        let (fail, open, count) = match class {
            OpClass::Compression => (&self.fail_dc_start, &self.dc_open, self.info.dc_instances),
            OpClass::Crypto => (&self.fail_cy_start, &self.cy_open, self.info.cy_instances),
        };
        if fail.load(Ordering::Relaxed) {
            return Err(Error::unavailable(format!("{class} instance start failed")));
        }
        if !self.info.supports(class) {
            return Err(Error::unavailable(format!("no {class} engine on {}", self.info.name)));
        }
        open.store(count, Ordering::Release);
        info!(%class, instances = count, "stub instances started");
        Ok(count)
    }

    fn stop_instances(&self, class: OpClass) {
        match class {
            OpClass::Compression => {
                self.dc_open.store(0, Ordering::Release);
                self.stalled_dc.lock().clear();
            }
            OpClass::Crypto => {
                self.cy_open.store(0, Ordering::Release);
                self.stalled_cy.lock().clear();
            }
        }
        info!(%class, "stub instances stopped");
    }

    fn submit_compress(&self, job: DcJob) -> Result<JobTicket<DcOutput>> {
        let disposition = self.admit(OpClass::Compression, job.instance, &[&job.src, &job.dst])?;
        let (completer, ticket) = job_channel();
        let level = self.level;
        match disposition {
            Disposition::Run => completer.complete(run_dc(job, level)),
            Disposition::Fail(message) => completer.complete(Err(Error::JobError(message))),
            Disposition::Stall => self.stalled_dc.lock().push(completer),
            Disposition::RunAfter(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    completer.complete(run_dc(job, level));
                });
            }
        }
        Ok(ticket)
    }

    fn submit_crypt(&self, job: CyJob) -> Result<JobTicket<CyOutput>> {
        let mut buffers = vec![&job.src, &job.dst];
        buffers.extend(job.aad.as_ref());
        let disposition = self.admit(OpClass::Crypto, job.instance, &buffers)?;
        let (completer, ticket) = job_channel();
        match disposition {
            Disposition::Run => completer.complete(run_cy(job)),
            Disposition::Fail(message) => completer.complete(Err(Error::JobError(message))),
            Disposition::Stall => self.stalled_cy.lock().push(completer),
            Disposition::RunAfter(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    completer.complete(run_cy(job));
                });
            }
        }
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompressDir, CryptKey, CryptMode, DIGEST_LEN, IV_LEN};

    fn started() -> StubDevice {
        let stub = StubDevice::new().with_instances(2);
        stub.start_instances(OpClass::Compression).unwrap();
        stub.start_instances(OpClass::Crypto).unwrap();
        stub
    }

    fn dc_job(stub: &StubDevice, dir: CompressDir, src: &[u8], cap: usize) -> DcJob {
        DcJob {
            instance: 0,
            dir,
            src: stub.allocate_with_data(src).unwrap(),
            dst: stub.allocate(cap).unwrap(),
        }
    }

    #[test]
    fn test_stub_creation() {
        let stub = StubDevice::new();
        assert!(stub.info().supports(OpClass::Compression));
        assert!(stub.info().supports(OpClass::Crypto));
        assert_eq!(stub.name(), "Software Stub");
    }

    #[test]
    fn test_cpu_only_stub() {
        let stub = StubDevice::cpu_only();
        assert!(stub.start_instances(OpClass::Compression).is_err());
        assert!(stub.start_instances(OpClass::Crypto).is_err());
    }

    #[test]
    fn test_submit_requires_started_pool() {
        let stub = StubDevice::new();
        let job = dc_job(&stub, CompressDir::Compress, &[0u8; 4096], 4096);
        assert!(matches!(
            stub.submit_compress(job),
            Err(Error::EngineUnavailable(_))
        ));
        assert_eq!(stub.submitted(), 0);
    }

    #[test]
    fn test_compress_job() {
        let stub = started();
        let job = dc_job(&stub, CompressDir::Compress, &[0u8; 8192], 8192);
        let out = stub
            .submit_compress(job)
            .unwrap()
            .wait(Duration::from_millis(500))
            .unwrap();
        assert!(out.produced < 8192);
        assert_eq!(stub.submitted(), 1);
    }

    #[test]
    fn test_crypt_job() {
        let stub = started();
        let key = CryptKey::generate(CryptMode::Aes256Gcm);
        let job = CyJob {
            instance: 1,
            dir: EncryptDir::Encrypt,
            mode: CryptMode::Aes256Gcm,
            key,
            iv: [3u8; IV_LEN],
            aad: None,
            src: stub.allocate_with_data(&[9u8; 4096]).unwrap(),
            dst: stub.allocate(4096).unwrap(),
            digest: [0u8; DIGEST_LEN],
        };
        let out = stub
            .submit_crypt(job)
            .unwrap()
            .wait(Duration::from_millis(500))
            .unwrap();
        assert_ne!(&out.dst[..], &[9u8; 4096][..]);
        assert_ne!(out.digest, [0u8; DIGEST_LEN]);
    }

    #[test]
    fn test_injected_faults() {
        let stub = started();
        stub.inject(Fault::Busy);
        stub.inject(Fault::Error("parameter check failed".into()));
        stub.inject(Fault::Hang);

        let job = dc_job(&stub, CompressDir::Compress, &[0u8; 4096], 4096);
        assert!(matches!(stub.submit_compress(job), Err(Error::Busy)));

        let job = dc_job(&stub, CompressDir::Compress, &[0u8; 4096], 4096);
        let result = stub.submit_compress(job).unwrap().wait(Duration::from_millis(500));
        assert!(matches!(result, Err(Error::JobError(_))));

        let job = dc_job(&stub, CompressDir::Compress, &[0u8; 4096], 4096);
        let result = stub.submit_compress(job).unwrap().wait(Duration::from_millis(20));
        assert!(matches!(result, Err(Error::JobTimeout { .. })));
        assert_eq!(stub.stalled(), 1);
        assert_eq!(stub.pending_faults(), 0);

        stub.stop_instances(OpClass::Compression);
        assert_eq!(stub.stalled(), 0);
    }

    #[test]
    fn test_busy_is_refused_not_run() {
        let stub = started();
        stub.inject(Fault::Busy);
        let job = dc_job(&stub, CompressDir::Compress, &[0u8; 4096], 4096);
        assert!(matches!(stub.submit_compress(job), Err(Error::Busy)));
        assert_eq!(stub.submitted(), 0);
        assert_eq!(stub.pending_faults(), 0);

        let job = dc_job(&stub, CompressDir::Compress, &[0u8; 4096], 4096);
        let out = stub
            .submit_compress(job)
            .unwrap()
            .wait(Duration::from_millis(500))
            .unwrap();
        assert!(out.produced > 0);
        assert_eq!(stub.submitted(), 1);
    }

    #[test]
    fn test_from_config() {
        let config = AccelConfig::new().with_dma_capacity(256 * 1024);
        let stub = StubDevice::from_config(&config);
        assert_eq!(stub.allocator().capacity(), 256 * 1024);
        assert_eq!(stub.level, config.compression_level);
        assert!(stub.allocate(512 * 1024).is_err());
    }

    #[test]
    fn test_fail_start() {
        let stub = StubDevice::new();
        stub.fail_start(OpClass::Crypto, true);
        assert!(stub.start_instances(OpClass::Crypto).is_err());
        assert_eq!(stub.start_instances(OpClass::Compression).unwrap(), DEFAULT_INSTANCES);
    }
}
