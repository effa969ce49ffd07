//! Blob envelope: gzip (best level) then AES-256-GCM
//!
//! Layout: `nonce(12) || AES-GCM-seal(gzip(plain))`. With an empty password
//! the envelope is plain gzip. Compression must come first; ciphertext does
//! not compress.

use crate::error::EnvelopeError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use std::io::{Read, Write};

/// AES-256 key size in bytes
pub const AES256_KEY_SIZE: usize = 32;
/// AES-GCM nonce size in bytes (96 bits)
pub const AES_GCM_NONCE_SIZE: usize = 12;
/// AES-GCM authentication tag size in bytes
pub const AES_GCM_TAG_SIZE: usize = 16;
/// Smallest gzip member: 10-byte header + empty deflate block + 8-byte trailer
const GZIP_MIN_SIZE: usize = 20;

/// Derive the cipher key: first 32 bytes of the password, zero padded
pub fn derive_key(aes_pwd: &str) -> [u8; AES256_KEY_SIZE] {
    let mut key = [0u8; AES256_KEY_SIZE];
    let pwd = aes_pwd.as_bytes();
    let n = pwd.len().min(AES256_KEY_SIZE);
    key[..n].copy_from_slice(&pwd[..n]);
    key
}

/// Compress then seal
pub fn encrypt(data: &[u8], aes_pwd: &str) -> Result<Vec<u8>, EnvelopeError> {
    let compressed = gzip(data)?;
    if aes_pwd.is_empty() {
        return Ok(compressed);
    }

    let key = derive_key(aes_pwd);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?;

    let mut nonce_bytes = [0u8; AES_GCM_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, compressed.as_slice())
        .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?;

    let mut out = Vec::with_capacity(AES_GCM_NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open then decompress
pub fn decrypt(data: &[u8], aes_pwd: &str) -> Result<Vec<u8>, EnvelopeError> {
    if aes_pwd.is_empty() {
        return gunzip(data);
    }
    if data.len() < AES_GCM_NONCE_SIZE + AES_GCM_TAG_SIZE {
        return Err(EnvelopeError::UnexpectedEof);
    }

    let key = derive_key(aes_pwd);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?;
    let (nonce_bytes, sealed) = data.split_at(AES_GCM_NONCE_SIZE);
    let compressed = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed)
        .map_err(|_| EnvelopeError::AuthFailure)?;

    gunzip(&compressed)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| EnvelopeError::Encrypt(e.to_string()))
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    if data.len() < GZIP_MIN_SIZE {
        return Err(EnvelopeError::UnexpectedEof);
    }
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            EnvelopeError::UnexpectedEof
        } else {
            EnvelopeError::CorruptEnvelope(e.to_string())
        }
    })?;
    Ok(out)
}
