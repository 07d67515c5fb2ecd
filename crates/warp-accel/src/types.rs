//! Request tags shared by the policy, the device port and the offload calls

use std::fmt;
use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Smallest buffer for which the accelerator beats software
pub const MIN_BUF_SIZE: usize = 4 * 1024;

/// Largest buffer the instance pools are sized for
pub const MAX_BUF_SIZE: usize = 128 * 1024;

/// No response from hardware after this long means the job failed
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// AEAD nonce length
pub const IV_LEN: usize = 12;

/// AEAD tag length
pub const DIGEST_LEN: usize = 16;

/// Compression engine direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressDir {
    /// Inflate
    Decompress = 0,
    /// Deflate
    Compress = 1,
}

/// Cipher engine direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncryptDir {
    /// Verify and decrypt
    Decrypt = 0,
    /// Encrypt and produce a digest
    Encrypt = 1,
}

/// Operation class; each has its own instance pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Compression and decompression
    Compression,
    /// Encryption and decryption
    Crypto,
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpClass::Compression => write!(f, "compression"),
            OpClass::Crypto => write!(f, "crypto"),
        }
    }
}

/// Authenticated cipher suite selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CryptMode {
    /// AES-128 in GCM mode
    Aes128Gcm,
    /// AES-256 in GCM mode
    #[default]
    Aes256Gcm,
    /// ChaCha20 with Poly1305
    ChaCha20Poly1305,
}

impl CryptMode {
    /// Key length in bytes
    #[must_use]
    pub fn key_len(&self) -> usize {
        match self {
            CryptMode::Aes128Gcm => 16,
            CryptMode::Aes256Gcm | CryptMode::ChaCha20Poly1305 => 32,
        }
    }

    /// Get the algorithm name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CryptMode::Aes128Gcm => "aes-128-gcm",
            CryptMode::Aes256Gcm => "aes-256-gcm",
            CryptMode::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

/// Raw key material, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptKey(Vec<u8>);

impl CryptKey {
    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Generate a random key sized for `mode`
    pub fn generate(mode: CryptMode) -> Self {
        let mut bytes = vec![0u8; mode.key_len()];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check the key fits `mode`
    pub fn check(&self, mode: CryptMode) -> Result<()> {
        if self.0.len() != mode.key_len() {
            return Err(Error::InvalidInput(format!(
                "{} needs a {}-byte key, got {}",
                mode.name(),
                mode.key_len(),
                self.0.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CryptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptKey({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_discriminants() {
        assert_eq!(CompressDir::Decompress as u8, 0);
        assert_eq!(CompressDir::Compress as u8, 1);
        assert_eq!(EncryptDir::Decrypt as u8, 0);
        assert_eq!(EncryptDir::Encrypt as u8, 1);
    }

    #[test]
    fn test_key_lengths() {
        assert!(CryptKey::generate(CryptMode::Aes128Gcm)
            .check(CryptMode::Aes128Gcm)
            .is_ok());
        assert!(CryptKey::generate(CryptMode::Aes128Gcm)
            .check(CryptMode::Aes256Gcm)
            .is_err());
        assert_eq!(CryptKey::generate(CryptMode::ChaCha20Poly1305).as_bytes().len(), 32);
    }

    #[test]
    fn test_key_debug_hides_material() {
        let key = CryptKey::from_bytes(&[0xAB; 32]);
        assert_eq!(format!("{key:?}"), "CryptKey(32 bytes)");
    }
}
