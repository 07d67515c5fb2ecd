//! Offload statistics
//!
//! Counters are updated from every calling thread with relaxed atomic adds
//! and read concurrently by whatever exports them. There is no ordering
//! between fields; a reader may see a request before its byte counts.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::types::{CompressDir, EncryptDir};

/// Counters for one direction of one engine
#[derive(Debug, Default)]
pub struct DirectionStats {
    requests: AtomicU64,
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
    fails: AtomicU64,
}

impl DirectionStats {
    /// Count an accepted offload call
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count bytes handed to the device
    pub fn record_in(&self, bytes: usize) {
        self.in_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count bytes returned by the device
    pub fn record_out(&self, bytes: usize) {
        self.out_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count a call that did not complete
    pub fn record_fail(&self) {
        self.fails.fetch_add(1, Ordering::Relaxed);
    }

    /// Get number of requests
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Get bytes sent to the device
    pub fn in_bytes(&self) -> u64 {
        self.in_bytes.load(Ordering::Relaxed)
    }

    /// Get bytes produced by the device
    pub fn out_bytes(&self) -> u64 {
        self.out_bytes.load(Ordering::Relaxed)
    }

    /// Get number of failures
    pub fn fails(&self) -> u64 {
        self.fails.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> DirectionSnapshot {
        DirectionSnapshot {
            requests: self.requests(),
            in_bytes: self.in_bytes(),
            out_bytes: self.out_bytes(),
            fails: self.fails(),
        }
    }
}

/// Process-wide offload statistics
#[derive(Debug, Default)]
pub struct AccelStats {
    /// Compression engine, compress direction
    pub compress: DirectionStats,
    /// Compression engine, decompress direction
    pub decompress: DirectionStats,
    /// Cipher engine, encrypt direction
    pub encrypt: DirectionStats,
    /// Cipher engine, decrypt direction
    pub decrypt: DirectionStats,
    timeouts: AtomicU64,
    auth_fails: AtomicU64,
}

impl AccelStats {
    /// Create zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for a compression direction
    pub fn compression(&self, dir: CompressDir) -> &DirectionStats {
        match dir {
            CompressDir::Compress => &self.compress,
            CompressDir::Decompress => &self.decompress,
        }
    }

    /// Counters for a cipher direction
    pub fn crypto(&self, dir: EncryptDir) -> &DirectionStats {
        match dir {
            EncryptDir::Encrypt => &self.encrypt,
            EncryptDir::Decrypt => &self.decrypt,
        }
    }

    /// Record a job that hit the timeout
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decryption whose digest did not verify
    pub fn record_auth_fail(&self) {
        self.auth_fails.fetch_add(1, Ordering::Relaxed);
    }

    /// Failures on the compression engine, both directions
    pub fn dc_fails(&self) -> u64 {
        self.compress.fails() + self.decompress.fails()
    }

    /// Failures on the cipher engine, both directions
    pub fn crypt_fails(&self) -> u64 {
        self.encrypt.fails() + self.decrypt.fails()
    }

    /// Get number of timeouts
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Get number of authentication failures
    pub fn auth_fails(&self) -> u64 {
        self.auth_fails.load(Ordering::Relaxed)
    }

    /// Copy the counters out
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            compress: self.compress.snapshot(),
            decompress: self.decompress.snapshot(),
            encrypt: self.encrypt.snapshot(),
            decrypt: self.decrypt.snapshot(),
            timeouts: self.timeouts(),
            auth_fails: self.auth_fails(),
        }
    }
}

/// Point-in-time counters for one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionSnapshot {
    /// Jobs submitted
    pub requests: u64,
    /// Bytes in
    pub in_bytes: u64,
    /// Bytes out
    pub out_bytes: u64,
    /// Failures
    pub fails: u64,
}

/// Point-in-time copy of [`AccelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Compress direction
    pub compress: DirectionSnapshot,
    /// Decompress direction
    pub decompress: DirectionSnapshot,
    /// Encrypt direction
    pub encrypt: DirectionSnapshot,
    /// Decrypt direction
    pub decrypt: DirectionSnapshot,
    /// Jobs that timed out
    pub timeouts: u64,
    /// Digest mismatches
    pub auth_fails: u64,
}

impl StatsSnapshot {
    /// Failures on the compression engine
    pub fn dc_fails(&self) -> u64 {
        self.compress.fails + self.decompress.fails
    }

    /// Failures on the cipher engine
    pub fn crypt_fails(&self) -> u64 {
        self.encrypt.fails + self.decrypt.fails
    }

    /// Requests across all engines
    pub fn total_requests(&self) -> u64 {
        self.compress.requests
            + self.decompress.requests
            + self.encrypt.requests
            + self.decrypt.requests
    }

    /// Named counters in the layout a kernel statistics consumer expects
    pub fn named(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("comp_requests", self.compress.requests),
            ("comp_total_in_bytes", self.compress.in_bytes),
            ("comp_total_out_bytes", self.compress.out_bytes),
            ("comp_fails", self.compress.fails),
            ("decomp_requests", self.decompress.requests),
            ("decomp_total_in_bytes", self.decompress.in_bytes),
            ("decomp_total_out_bytes", self.decompress.out_bytes),
            ("decomp_fails", self.decompress.fails),
            ("dc_fails", self.dc_fails()),
            ("encrypt_requests", self.encrypt.requests),
            ("encrypt_total_in_bytes", self.encrypt.in_bytes),
            ("encrypt_total_out_bytes", self.encrypt.out_bytes),
            ("encrypt_fails", self.encrypt.fails),
            ("decrypt_requests", self.decrypt.requests),
            ("decrypt_total_in_bytes", self.decrypt.in_bytes),
            ("decrypt_total_out_bytes", self.decrypt.out_bytes),
            ("decrypt_fails", self.decrypt.fails),
            ("crypt_fails", self.crypt_fails()),
            ("timeouts", self.timeouts),
            ("auth_fails", self.auth_fails),
        ]
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Offload Statistics:")?;
        for (name, value) in self.named() {
            writeln!(f, "  {name:<24} {value}")?;
        }
        Ok(())
    }
}

/// Shared statistics handle
pub type SharedStats = Arc<AccelStats>;
