//! Hardware-vs-software routing policy
//!
//! A request goes to the accelerator only when acceleration is switched on
//! for its class and its size falls inside the class's working window.
//! Small buffers cost more in job setup than they save; large ones can
//! exceed what the instance pools were sized for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{MAX_BUF_SIZE, MIN_BUF_SIZE};

#[derive(Debug, Default)]
struct SwitchState {
    all: AtomicBool,
    compress: AtomicBool,
    encrypt: AtomicBool,
}

/// Operator switch that forces traffic to software
///
/// Clones share state. Reads and writes are relaxed: a request racing a
/// flip may take either path, which is harmless.
#[derive(Debug, Clone, Default)]
pub struct AccelSwitch {
    state: Arc<SwitchState>,
}

impl AccelSwitch {
    /// Create a switch with acceleration enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable or re-enable all acceleration
    pub fn set_disabled(&self, disabled: bool) {
        self.state.all.store(disabled, Ordering::Relaxed);
    }

    /// Disable or re-enable compression acceleration only
    pub fn set_compress_disabled(&self, disabled: bool) {
        self.state.compress.store(disabled, Ordering::Relaxed);
    }

    /// Disable or re-enable encryption acceleration only
    pub fn set_encrypt_disabled(&self, disabled: bool) {
        self.state.encrypt.store(disabled, Ordering::Relaxed);
    }

    /// Check the global flag
    pub fn is_disabled(&self) -> bool {
        self.state.all.load(Ordering::Relaxed)
    }

    /// Check compression is switched off, globally or on its own
    pub fn compress_disabled(&self) -> bool {
        self.is_disabled() || self.state.compress.load(Ordering::Relaxed)
    }

    /// Check encryption is switched off, globally or on its own
    pub fn encrypt_disabled(&self) -> bool {
        self.is_disabled() || self.state.encrypt.load(Ordering::Relaxed)
    }
}

/// Inclusive range of request sizes worth offloading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeWindow {
    /// Smallest eligible size
    pub min: usize,
    /// Largest eligible size
    pub max: usize,
}

impl SizeWindow {
    /// Create a window
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Check `size` falls inside the window, both ends included
    #[inline]
    pub fn contains(&self, size: usize) -> bool {
        size >= self.min && size <= self.max
    }
}

impl Default for SizeWindow {
    fn default() -> Self {
        Self::new(MIN_BUF_SIZE, MAX_BUF_SIZE)
    }
}

/// Eligibility decider for both operation classes
#[derive(Debug, Clone, Default)]
pub struct Eligibility {
    switch: AccelSwitch,
    compression: SizeWindow,
    crypto: SizeWindow,
}

impl Eligibility {
    /// Create a decider reading `switch`
    pub fn new(switch: AccelSwitch, compression: SizeWindow, crypto: SizeWindow) -> Self {
        Self {
            switch,
            compression,
            crypto,
        }
    }

    /// Should a compression request of `size` bytes go to hardware
    pub fn use_hw_for_compression(&self, size: usize) -> bool {
        !self.switch.compress_disabled() && self.compression.contains(size)
    }

    /// Should a cipher request of `size` bytes go to hardware
    pub fn use_hw_for_crypto(&self, size: usize) -> bool {
        !self.switch.encrypt_disabled() && self.crypto.contains(size)
    }

    /// The switch this decider reads
    pub fn switch(&self) -> &AccelSwitch {
        &self.switch
    }

    /// Compression window
    pub fn compression_window(&self) -> SizeWindow {
        self.compression
    }

    /// Crypto window
    pub fn crypto_window(&self) -> SizeWindow {
        self.crypto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_inclusive() {
        let policy = Eligibility::default();
        assert!(!policy.use_hw_for_compression(MIN_BUF_SIZE - 1));
        assert!(policy.use_hw_for_compression(MIN_BUF_SIZE));
        assert!(policy.use_hw_for_compression(MAX_BUF_SIZE));
        assert!(!policy.use_hw_for_compression(MAX_BUF_SIZE + 1));

        assert!(!policy.use_hw_for_crypto(4095));
        assert!(policy.use_hw_for_crypto(4096));
        assert!(policy.use_hw_for_crypto(131_072));
        assert!(!policy.use_hw_for_crypto(131_073));
        assert!(!policy.use_hw_for_crypto(0));
    }

    #[test]
    fn test_global_disable() {
        let switch = AccelSwitch::new();
        let policy = Eligibility::new(switch.clone(), SizeWindow::default(), SizeWindow::default());
        assert!(policy.use_hw_for_compression(65536));

        switch.set_disabled(true);
        assert!(!policy.use_hw_for_compression(65536));
        assert!(!policy.use_hw_for_crypto(65536));

        switch.set_disabled(false);
        assert!(policy.use_hw_for_crypto(65536));
    }

    #[test]
    fn test_class_disable() {
        let switch = AccelSwitch::new();
        let policy = Eligibility::new(switch.clone(), SizeWindow::default(), SizeWindow::default());

        switch.set_compress_disabled(true);
        assert!(!policy.use_hw_for_compression(8192));
        assert!(policy.use_hw_for_crypto(8192));

        switch.set_compress_disabled(false);
        switch.set_encrypt_disabled(true);
        assert!(policy.use_hw_for_compression(8192));
        assert!(!policy.use_hw_for_crypto(8192));
    }

    #[test]
    fn test_custom_window() {
        let policy = Eligibility::new(
            AccelSwitch::new(),
            SizeWindow::new(512, 1 << 20),
            SizeWindow::default(),
        );
        assert!(policy.use_hw_for_compression(512));
        assert!(policy.use_hw_for_compression(1 << 20));
        assert!(!policy.use_hw_for_crypto(512));
    }
}
