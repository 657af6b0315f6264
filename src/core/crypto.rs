//! Password-based AES-256-CBC compatible with the CryptoJS "Salted__" wire
//! format used by vault clients. Key material comes from iterated MD5 over
//! `passphrase || salt` (OpenSSL EVP_BytesToKey), not a modern KDF — the
//! remote side fixes the scheme, so we reproduce it byte for byte.

use aes::Aes256;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use md5::{Digest, Md5};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SALT_PREFIX: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const BLOCK: usize = 16;
const KEY_IV_LEN: usize = 32 + 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed payload")]
    MalformedPayload,
    #[error("invalid padding")]
    InvalidPadding,
    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// EVP_BytesToKey with MD5: digest `passphrase || salt`, then keep digesting
/// `prev || passphrase || salt` until `output` bytes are produced.
fn bytes_to_key(passphrase: &[u8], salt: &[u8; SALT_LEN], output: usize) -> Vec<u8> {
    let mut seed = passphrase.to_vec();
    seed.extend_from_slice(salt);

    let mut block = Md5::digest(&seed).to_vec();
    let mut key = block.clone();
    while key.len() < output {
        let mut input = block;
        input.extend_from_slice(&seed);
        block = Md5::digest(&input).to_vec();
        key.extend_from_slice(&block);
    }
    key.truncate(output);
    key
}

fn split_key_iv(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> ([u8; 32], [u8; 16]) {
    let key_iv = bytes_to_key(passphrase, salt, KEY_IV_LEN);
    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&key_iv[..32]);
    iv.copy_from_slice(&key_iv[32..]);
    (key, iv)
}

/// Encrypt with a random 8-byte salt, returning base64(`Salted__` || salt || ciphertext).
pub fn encrypt(message: &[u8], passphrase: &[u8]) -> Result<String, CryptoError> {
    let salt: [u8; SALT_LEN] = rand::random();
    let (key, iv) = split_key_iv(passphrase, &salt);

    // PKCS#7: always pad, even on block boundaries.
    let pad = BLOCK - (message.len() % BLOCK);
    let mut data = message.to_vec();
    data.extend(std::iter::repeat_n(pad as u8, pad));

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<NoPadding>(&data);

    let mut raw = Vec::with_capacity(SALT_PREFIX.len() + SALT_LEN + ciphertext.len());
    raw.extend_from_slice(SALT_PREFIX);
    raw.extend_from_slice(&salt);
    raw.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(raw))
}

/// Decrypt a base64 `Salted__` payload produced by [`encrypt`] or any
/// CryptoJS-compatible client.
pub fn decrypt(payload: &str, passphrase: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let raw = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    if raw.len() < SALT_PREFIX.len() + SALT_LEN || !raw.starts_with(SALT_PREFIX) {
        return Err(CryptoError::MalformedPayload);
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&raw[SALT_PREFIX.len()..SALT_PREFIX.len() + SALT_LEN]);
    let data = &raw[SALT_PREFIX.len() + SALT_LEN..];
    if data.is_empty() || data.len() % BLOCK != 0 {
        return Err(CryptoError::MalformedPayload);
    }

    let (key, iv) = split_key_iv(passphrase, &salt);
    let mut plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|_| CryptoError::MalformedPayload)?;

    let pad = *plaintext.last().ok_or(CryptoError::InvalidPadding)? as usize;
    if pad < 1 || pad > BLOCK {
        return Err(CryptoError::InvalidPadding);
    }
    plaintext.truncate(plaintext.len() - pad);
    Ok(plaintext)
}
