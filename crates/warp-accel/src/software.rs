//! Software codecs
//!
//! These produce exactly what the accelerator produces: zlib-framed deflate
//! for compression and detached-tag AEAD for encryption. Blocks written by
//! one path can always be read back by the other, which is what makes
//! falling back safe.

use aes_gcm::aead::{self, AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::types::{CompressDir, CryptKey, CryptMode, DIGEST_LEN, IV_LEN};

/// Default deflate level
pub const DEFAULT_LEVEL: u32 = 6;

/// Run `dir` over `src` into `dst`, returning the bytes written
pub fn transform(dir: CompressDir, src: &[u8], dst: &mut [u8], level: u32) -> Result<usize> {
    match dir {
        CompressDir::Compress => compress(src, dst, level),
        CompressDir::Decompress => decompress(src, dst),
    }
}

/// Deflate `src` into `dst`, returning the bytes written
///
/// # Errors
/// Returns `JobError` if the output does not fit in `dst`
pub fn compress(src: &[u8], dst: &mut [u8], level: u32) -> Result<usize> {
    let mut deflater = Compress::new(Compression::new(level.min(9)), true);
    match deflater.compress(src, dst, FlushCompress::Finish) {
        Ok(Status::StreamEnd) => Ok(deflater.total_out() as usize),
        Ok(_) => Err(Error::job(format!(
            "compressed output exceeds {} bytes",
            dst.len()
        ))),
        Err(e) => Err(Error::job(format!("deflate: {e}"))),
    }
}

/// Inflate `src` into `dst`, returning the bytes written
///
/// # Errors
/// Returns `JobError` for corrupt or truncated input, or output that does
/// not fit in `dst`
pub fn decompress(src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let mut inflater = Decompress::new(true);
    match inflater.decompress(src, dst, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => Ok(inflater.total_out() as usize),
        Ok(_) if inflater.total_out() as usize == dst.len() => Err(Error::job(format!(
            "decompressed output exceeds {} bytes",
            dst.len()
        ))),
        Ok(_) => Err(Error::job("truncated deflate stream")),
        Err(e) => Err(Error::job(format!("inflate: {e}"))),
    }
}

/// Encrypt `buf` in place and return the tag
///
/// # Errors
/// `InvalidInput` if the key does not fit `mode`
pub fn seal(
    mode: CryptMode,
    key: &CryptKey,
    iv: &[u8; IV_LEN],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; DIGEST_LEN]> {
    key.check(mode)?;
    match mode {
        CryptMode::Aes128Gcm => seal_with::<Aes128Gcm>(key, iv, aad, buf),
        CryptMode::Aes256Gcm => seal_with::<Aes256Gcm>(key, iv, aad, buf),
        CryptMode::ChaCha20Poly1305 => seal_with::<ChaCha20Poly1305>(key, iv, aad, buf),
    }
}

/// Verify `digest` and decrypt `buf` in place
///
/// On `AuthenticationFailure` the contents of `buf` are unspecified.
///
/// # Errors
/// `AuthenticationFailure` on tag mismatch, `InvalidInput` for a bad key
pub fn open(
    mode: CryptMode,
    key: &CryptKey,
    iv: &[u8; IV_LEN],
    aad: &[u8],
    buf: &mut [u8],
    digest: &[u8; DIGEST_LEN],
) -> Result<()> {
    key.check(mode)?;
    match mode {
        CryptMode::Aes128Gcm => open_with::<Aes128Gcm>(key, iv, aad, buf, digest),
        CryptMode::Aes256Gcm => open_with::<Aes256Gcm>(key, iv, aad, buf, digest),
        CryptMode::ChaCha20Poly1305 => open_with::<ChaCha20Poly1305>(key, iv, aad, buf, digest),
    }
}

fn cipher<C: KeyInit>(key: &CryptKey) -> Result<C> {
    C::new_from_slice(key.as_bytes()).map_err(|e| Error::InvalidInput(format!("key: {e}")))
}

fn seal_with<C: AeadInPlace + KeyInit>(
    key: &CryptKey,
    iv: &[u8; IV_LEN],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; DIGEST_LEN]> {
    let tag = cipher::<C>(key)?
        .encrypt_in_place_detached(aead::Nonce::<C>::from_slice(iv), aad, buf)
        .map_err(|e| Error::job(format!("encrypt: {e}")))?;
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(tag.as_slice());
    Ok(digest)
}

fn open_with<C: AeadInPlace + KeyInit>(
    key: &CryptKey,
    iv: &[u8; IV_LEN],
    aad: &[u8],
    buf: &mut [u8],
    digest: &[u8; DIGEST_LEN],
) -> Result<()> {
    cipher::<C>(key)?
        .decrypt_in_place_detached(
            aead::Nonce::<C>::from_slice(iv),
            aad,
            buf,
            aead::Tag::<C>::from_slice(digest),
        )
        .map_err(|_| Error::AuthenticationFailure)
}
