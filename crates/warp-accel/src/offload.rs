//! Offload entry points
//!
//! The storage pipeline asks [`Offload::use_hw_for_compression`] (or the
//! crypto variant) before each block. If it says yes, the block goes through
//! [`Offload::compress`] / [`Offload::crypt`]; any `Err` means the caller
//! redoes the work in software. [`compress_or_else`] and [`crypt_or_else`]
//! wrap that sequence.
//!
//! Staging: caller memory never reaches the device. Input is copied into a
//! contiguous DMA buffer, output comes back in one and is copied out only
//! after the job reports success.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::completion::JobTicket;
use crate::config::AccelConfig;
use crate::device::{AccelDevice, CyJob, DcJob};
use crate::engine::{AccelEngine, InitReport};
use crate::error::{Error, Result};
use crate::policy::{AccelSwitch, Eligibility};
use crate::software;
use crate::stats::{AccelStats, DirectionStats, SharedStats, StatsSnapshot};
use crate::types::{CompressDir, CryptKey, CryptMode, EncryptDir, OpClass, DIGEST_LEN, IV_LEN};

/// One authenticated cipher request
///
/// `len` bytes of `src` are transformed into `dst`. On encrypt the tag is
/// written to `digest`; on decrypt `digest` holds the tag to verify.
#[derive(Debug)]
pub struct CryptRequest<'a> {
    /// Input, at least `len` bytes
    pub src: &'a [u8],
    /// Output, at least `len` bytes
    pub dst: &'a mut [u8],
    /// Authenticated but unencrypted data
    pub aad: Option<&'a [u8]>,
    /// Nonce, exactly `IV_LEN` bytes
    pub iv: &'a [u8],
    /// Tag out on encrypt, tag in on decrypt; `DIGEST_LEN` bytes
    pub digest: &'a mut [u8],
    /// Key material, sized for `mode`
    pub key: &'a CryptKey,
    /// Cipher suite
    pub mode: CryptMode,
    /// Bytes to transform
    pub len: usize,
}

impl<'a> CryptRequest<'a> {
    /// Request over the whole of `src`
    pub fn new(
        key: &'a CryptKey,
        iv: &'a [u8],
        src: &'a [u8],
        dst: &'a mut [u8],
        digest: &'a mut [u8],
    ) -> Self {
        Self {
            len: src.len(),
            src,
            dst,
            aad: None,
            iv,
            digest,
            key,
            mode: CryptMode::default(),
        }
    }

    /// Set the cipher suite
    pub fn with_mode(mut self, mode: CryptMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set additional authenticated data
    pub fn with_aad(mut self, aad: &'a [u8]) -> Self {
        self.aad = Some(aad);
        self
    }

    /// Check preconditions and return the nonce
    pub fn validate(&self) -> Result<[u8; IV_LEN]> {
        if self.len == 0 {
            return Err(Error::InvalidInput("empty cipher request".into()));
        }
        if self.src.len() < self.len || self.dst.len() < self.len {
            return Err(Error::InvalidInput(format!(
                "len {} exceeds src ({}) or dst ({})",
                self.len,
                self.src.len(),
                self.dst.len()
            )));
        }
        if self.digest.len() != DIGEST_LEN {
            return Err(Error::InvalidInput(format!(
                "digest must be {DIGEST_LEN} bytes, got {}",
                self.digest.len()
            )));
        }
        self.key.check(self.mode)?;
        self.iv.try_into().map_err(|_| {
            Error::InvalidInput(format!("iv must be {IV_LEN} bytes, got {}", self.iv.len()))
        })
    }

    /// Run the request on the CPU
    ///
    /// On `AuthenticationFailure` `dst` is left untouched.
    pub fn run_in_software(&mut self, dir: EncryptDir) -> Result<()> {
        let iv = self.validate()?;
        let len = self.len;
        let aad = self.aad.unwrap_or(&[]);
        let mut buf = self.src[..len].to_vec();
        match dir {
            EncryptDir::Encrypt => {
                let tag = software::seal(self.mode, self.key, &iv, aad, &mut buf)?;
                self.digest.copy_from_slice(&tag);
            }
            EncryptDir::Decrypt => {
                let mut expected = [0u8; DIGEST_LEN];
                expected.copy_from_slice(&self.digest[..]);
                software::open(self.mode, self.key, &iv, aad, &mut buf, &expected)?;
            }
        }
        self.dst[..len].copy_from_slice(&buf);
        Ok(())
    }
}

/// Path a request actually took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Completed by the device
    Hardware,
    /// Completed by the caller's fallback
    Software,
}

/// Offload surface used by the storage pipeline
pub trait Offload: Send + Sync {
    /// Whether a compression request of `len` bytes should go to hardware
    fn use_hw_for_compression(&self, len: usize) -> bool;

    /// Whether a cipher request of `len` bytes should go to hardware
    fn use_hw_for_crypto(&self, len: usize) -> bool;

    /// Compress or decompress `src` into `dst`, returning bytes produced
    fn compress(&self, dir: CompressDir, src: &[u8], dst: &mut [u8]) -> Result<usize>;

    /// Encrypt or decrypt per `req`
    fn crypt(&self, dir: EncryptDir, req: &mut CryptRequest<'_>) -> Result<()>;

    /// Operator switch
    fn switch(&self) -> &AccelSwitch;

    /// Counter snapshot
    fn stats(&self) -> StatsSnapshot;

    /// Shut down both instance pools
    fn fini(&self);
}

/// Offload backed by an accelerator device
pub struct HwOffload {
    engine: AccelEngine,
    policy: Eligibility,
    stats: SharedStats,
    timeout: Duration,
}

impl HwOffload {
    /// Wrap `device`; pools are not started until [`HwOffload::init`]
    pub fn new(device: Arc<dyn AccelDevice>, config: &AccelConfig) -> Self {
        Self::with_parts(device, config, config.switch(), Arc::new(AccelStats::new()))
    }

    /// Wrap `device` with an externally owned switch and counters
    pub fn with_parts(
        device: Arc<dyn AccelDevice>,
        config: &AccelConfig,
        switch: AccelSwitch,
        stats: SharedStats,
    ) -> Self {
        let window = config.window();
        Self {
            engine: AccelEngine::new(device),
            policy: Eligibility::new(switch, window, window),
            stats,
            timeout: config.timeout(),
        }
    }

    /// Start both pools, tolerating failure of either
    pub fn init(&self) -> InitReport {
        self.engine.init()
    }

    /// The lifecycle manager
    pub fn engine(&self) -> &AccelEngine {
        &self.engine
    }

    /// Live counters
    pub fn shared_stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Completion timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn await_job<T>(&self, ticket: JobTicket<T>, started: Instant) -> Result<T> {
        let remaining = self.timeout.saturating_sub(started.elapsed());
        ticket.wait(remaining).map_err(|e| match e {
            Error::JobTimeout { .. } => Error::JobTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            },
            other => other,
        })
    }

    fn record_failure(&self, counters: &DirectionStats, error: &Error) {
        counters.record_fail();
        match error {
            Error::JobTimeout { .. } => self.stats.record_timeout(),
            Error::AuthenticationFailure => self.stats.record_auth_fail(),
            _ => {}
        }
    }

    fn offload_compress(
        &self,
        dir: CompressDir,
        src: &[u8],
        dst: &mut [u8],
        counters: &DirectionStats,
        started: Instant,
    ) -> Result<usize> {
        let instance = self.engine.next_instance(OpClass::Compression)?;
        let device = self.engine.device();
        let job = DcJob {
            instance,
            dir,
            src: device.allocate_with_data(src)?,
            dst: device.allocate(dst.len())?,
        };
        trace!(?dir, instance, len = src.len(), "submitting compression job");
        let ticket = device.submit_compress(job)?;
        counters.record_in(src.len());

        let out = self.await_job(ticket, started)?;
        if out.produced > out.dst.len().min(dst.len()) {
            return Err(Error::job(format!(
                "device reported {} bytes produced; returned buffer holds {}, caller buffer {}",
                out.produced,
                out.dst.len(),
                dst.len()
            )));
        }
        dst[..out.produced].copy_from_slice(&out.dst[..out.produced]);
        counters.record_out(out.produced);
        Ok(out.produced)
    }

    fn offload_crypt(
        &self,
        dir: EncryptDir,
        req: &mut CryptRequest<'_>,
        iv: [u8; IV_LEN],
        counters: &DirectionStats,
        started: Instant,
    ) -> Result<()> {
        let instance = self.engine.next_instance(OpClass::Crypto)?;
        let device = self.engine.device();
        let len = req.len;

        let mut digest = [0u8; DIGEST_LEN];
        if dir == EncryptDir::Decrypt {
            digest.copy_from_slice(&req.digest[..]);
        }
        let aad = match req.aad {
            Some(aad) if !aad.is_empty() => Some(device.allocate_with_data(aad)?),
            _ => None,
        };
        let job = CyJob {
            instance,
            dir,
            mode: req.mode,
            key: req.key.clone(),
            iv,
            aad,
            src: device.allocate_with_data(&req.src[..len])?,
            dst: device.allocate(len)?,
            digest,
        };
        trace!(?dir, instance, len, mode = req.mode.name(), "submitting cipher job");
        let ticket = device.submit_crypt(job)?;
        counters.record_in(len);

        let out = self.await_job(ticket, started)?;
        if out.dst.len() < len {
            return Err(Error::job(format!(
                "device returned {} bytes for a {len}-byte cipher job",
                out.dst.len()
            )));
        }
        req.dst[..len].copy_from_slice(&out.dst[..len]);
        if dir == EncryptDir::Encrypt {
            req.digest.copy_from_slice(&out.digest);
        }
        counters.record_out(len);
        Ok(())
    }
}

impl Offload for HwOffload {
    fn use_hw_for_compression(&self, len: usize) -> bool {
        self.engine.is_ready(OpClass::Compression) && self.policy.use_hw_for_compression(len)
    }

    fn use_hw_for_crypto(&self, len: usize) -> bool {
        self.engine.is_ready(OpClass::Crypto) && self.policy.use_hw_for_crypto(len)
    }

    fn compress(&self, dir: CompressDir, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        if src.is_empty() || dst.is_empty() {
            return Err(Error::InvalidInput(format!(
                "compression buffers must be non-empty (src {}, dst {})",
                src.len(),
                dst.len()
            )));
        }
        let started = Instant::now();
        let counters = self.stats.compression(dir);
        counters.record_request();

        let result = self.offload_compress(dir, src, dst, counters, started);
        if let Err(e) = &result {
            self.record_failure(counters, e);
            debug!(?dir, len = src.len(), error = %e, "compression offload failed");
        }
        result
    }

    fn crypt(&self, dir: EncryptDir, req: &mut CryptRequest<'_>) -> Result<()> {
        let iv = req.validate()?;
        let started = Instant::now();
        let counters = self.stats.crypto(dir);
        counters.record_request();

        let result = self.offload_crypt(dir, req, iv, counters, started);
        if let Err(e) = &result {
            self.record_failure(counters, e);
            debug!(?dir, len = req.len, error = %e, "cipher offload failed");
        }
        result
    }

    fn switch(&self) -> &AccelSwitch {
        self.policy.switch()
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn fini(&self) {
        self.engine.fini();
    }
}

/// Offload used when no accelerator is present
///
/// Never eligible. Direct calls fail with `EngineUnavailable` and are
/// counted as failures.
#[derive(Debug, Default)]
pub struct NoopOffload {
    switch: AccelSwitch,
    stats: SharedStats,
}

impl NoopOffload {
    /// Offload that refuses everything while still reporting through `stats`
    pub fn new(switch: AccelSwitch, stats: SharedStats) -> Self {
        Self { switch, stats }
    }

    fn refuse(counters: &DirectionStats) -> Error {
        counters.record_request();
        counters.record_fail();
        Error::unavailable("no accelerator present")
    }
}

impl Offload for NoopOffload {
    fn use_hw_for_compression(&self, _len: usize) -> bool {
        false
    }

    fn use_hw_for_crypto(&self, _len: usize) -> bool {
        false
    }

    fn compress(&self, dir: CompressDir, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        if src.is_empty() || dst.is_empty() {
            return Err(Error::InvalidInput("compression buffers must be non-empty".into()));
        }
        Err(Self::refuse(self.stats.compression(dir)))
    }

    fn crypt(&self, dir: EncryptDir, req: &mut CryptRequest<'_>) -> Result<()> {
        req.validate()?;
        Err(Self::refuse(self.stats.crypto(dir)))
    }

    fn switch(&self) -> &AccelSwitch {
        &self.switch
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn fini(&self) {}
}

/// Pick the offload strategy at startup
///
/// With a device, both pools are started and a class that fails to come up
/// stays in software. Without one, every request runs in software.
pub fn select_offload(
    config: &AccelConfig,
    device: Option<Arc<dyn AccelDevice>>,
) -> Result<Arc<dyn Offload>> {
    config.validate()?;
    match device {
        Some(device) => {
            let name = device.name().to_string();
            let offload = HwOffload::new(device, config);
            let report = offload.init();
            info!(
                device = %name,
                compression = report.compression,
                crypto = report.crypto,
                "accelerator offload selected"
            );
            Ok(Arc::new(offload))
        }
        None => {
            info!("no accelerator present, offload disabled");
            Ok(Arc::new(NoopOffload::new(
                config.switch(),
                Arc::new(AccelStats::new()),
            )))
        }
    }
}

/// Compress in hardware when eligible, otherwise (or on failure) with `fallback`
pub fn compress_or_else<E>(
    offload: &dyn Offload,
    dir: CompressDir,
    src: &[u8],
    dst: &mut [u8],
    fallback: impl FnOnce(&[u8], &mut [u8]) -> std::result::Result<usize, E>,
) -> std::result::Result<(usize, Route), E> {
    if offload.use_hw_for_compression(src.len()) {
        match offload.compress(dir, src, dst) {
            Ok(produced) => return Ok((produced, Route::Hardware)),
            Err(e) => debug!(?dir, error = %e, "falling back to software compression"),
        }
    }
    fallback(src, dst).map(|produced| (produced, Route::Software))
}

/// Run a cipher request in hardware when eligible, otherwise (or on failure)
/// with `fallback`
///
/// A hardware `AuthenticationFailure` is retried in software like any other
/// failure; a genuinely bad digest fails there too.
pub fn crypt_or_else<E>(
    offload: &dyn Offload,
    dir: EncryptDir,
    req: &mut CryptRequest<'_>,
    fallback: impl FnOnce(&mut CryptRequest<'_>) -> std::result::Result<(), E>,
) -> std::result::Result<Route, E> {
    if offload.use_hw_for_crypto(req.len) {
        match offload.crypt(dir, req) {
            Ok(()) => return Ok(Route::Hardware),
            Err(e) => debug!(?dir, error = %e, "falling back to software cipher"),
        }
    }
    fallback(req).map(|()| Route::Software)
}
