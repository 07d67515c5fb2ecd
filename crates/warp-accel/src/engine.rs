//! Instance pool lifecycle
//!
//! Compression and crypto pools come up and go down independently. A class
//! whose pool fails to start simply runs in software; nothing about that is
//! fatal to the caller.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::device::AccelDevice;
use crate::error::{Error, Result};
use crate::types::OpClass;

#[derive(Debug, Default)]
struct PoolState {
    ready: AtomicBool,
    instances: AtomicUsize,
    next: AtomicUsize,
    // Serializes start/stop for this class
    transition: Mutex<()>,
}

/// Which classes came up in hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitReport {
    /// Compression pool started
    pub compression: bool,
    /// Crypto pool started
    pub crypto: bool,
}

impl InitReport {
    /// Check if any class runs in hardware
    pub fn any(&self) -> bool {
        self.compression || self.crypto
    }
}

/// Lifecycle manager for the device's instance pools
pub struct AccelEngine {
    device: Arc<dyn AccelDevice>,
    dc: PoolState,
    cy: PoolState,
}

impl AccelEngine {
    /// Create an engine over `device`; no pool is started yet
    pub fn new(device: Arc<dyn AccelDevice>) -> Self {
        Self {
            device,
            dc: PoolState::default(),
            cy: PoolState::default(),
        }
    }

    /// The device behind the pools
    pub fn device(&self) -> &Arc<dyn AccelDevice> {
        &self.device
    }

    fn pool(&self, class: OpClass) -> &PoolState {
        match class {
            OpClass::Compression => &self.dc,
            OpClass::Crypto => &self.cy,
        }
    }

    fn start(&self, class: OpClass) -> Result<usize> {
        let pool = self.pool(class);
        let _guard = pool.transition.lock();
        if pool.ready.load(Ordering::Acquire) {
            return Ok(pool.instances.load(Ordering::Acquire));
        }
        let count = self.device.start_instances(class)?;
        if count == 0 {
            self.device.stop_instances(class);
            return Err(Error::unavailable(format!(
                "{} opened no {class} instances",
                self.device.name()
            )));
        }
        pool.instances.store(count, Ordering::Release);
        pool.next.store(0, Ordering::Relaxed);
        pool.ready.store(true, Ordering::Release);
        info!(%class, instances = count, device = self.device.name(), "accelerator pool started");
        Ok(count)
    }

    fn stop(&self, class: OpClass) {
        let pool = self.pool(class);
        let _guard = pool.transition.lock();
        if !pool.ready.swap(false, Ordering::AcqRel) {
            return;
        }
        pool.instances.store(0, Ordering::Release);
        self.device.stop_instances(class);
        info!(%class, device = self.device.name(), "accelerator pool stopped");
    }

    /// Start the compression pool
    pub fn init_compression(&self) -> Result<usize> {
        self.start(OpClass::Compression)
    }

    /// Stop the compression pool
    pub fn fini_compression(&self) {
        self.stop(OpClass::Compression);
    }

    /// Start the crypto pool
    pub fn init_crypto(&self) -> Result<usize> {
        self.start(OpClass::Crypto)
    }

    /// Stop the crypto pool
    pub fn fini_crypto(&self) {
        self.stop(OpClass::Crypto);
    }

    /// Start both pools, tolerating failure of either
    pub fn init(&self) -> InitReport {
        let compression = match self.init_compression() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "compression acceleration unavailable, using software");
                false
            }
        };
        let crypto = match self.init_crypto() {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "crypto acceleration unavailable, using software");
                false
            }
        };
        InitReport {
            compression,
            crypto,
        }
    }

    /// Stop both pools
    pub fn fini(&self) {
        self.fini_compression();
        self.fini_crypto();
    }

    /// Check whether `class` has a running pool
    pub fn is_ready(&self, class: OpClass) -> bool {
        self.pool(class).ready.load(Ordering::Acquire)
    }

    /// Number of instances open for `class`
    pub fn instance_count(&self, class: OpClass) -> usize {
        self.pool(class).instances.load(Ordering::Acquire)
    }

    /// Pick the next instance for `class`, round-robin
    ///
    /// # Errors
    /// `EngineUnavailable` if the pool is not running
    pub fn next_instance(&self, class: OpClass) -> Result<usize> {
        let pool = self.pool(class);
        let count = pool.instances.load(Ordering::Acquire);
        if !pool.ready.load(Ordering::Acquire) || count == 0 {
            return Err(Error::unavailable(format!("{class} pool not initialized")));
        }
        Ok(pool.next.fetch_add(1, Ordering::Relaxed) % count)
    }
}

impl Drop for AccelEngine {
    fn drop(&mut self) {
        self.fini();
    }
}
