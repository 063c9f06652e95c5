//! Symmetric and RSA ciphers.
//!
//! Block ciphers use PKCS#7 padding and exchange ciphertext as standard
//! base64. Keys are normalized before use:
//!
//! - AES: zero-padded to the next of 16, 24 or 32 bytes; longer keys are
//!   truncated to 32
//! - DES: padded or truncated to 8 bytes
//! - 3DES: padded or truncated to 24 bytes
//!
//! Empty keys are rejected. CBC needs an IV of exactly one block; ECB ignores
//! the IV.

use crate::codec::{base64_decode, base64_encode};
use crate::error::{ExtensionError, ExtensionResult};
use cbc::cipher::block_padding::{Pkcs7, UnpadError};
use cbc::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

const AES_BLOCK: usize = 16;
const DES_BLOCK: usize = 8;

/// Block chaining mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    #[default]
    Cbc,
    Ecb,
}

impl CipherMode {
    /// Parse a mode name. `None` selects CBC.
    pub fn parse(mode: Option<&str>) -> ExtensionResult<Self> {
        match mode.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("cbc") => Ok(CipherMode::Cbc),
            Some("ecb") => Ok(CipherMode::Ecb),
            Some(other) => Err(ExtensionError::Validation(format!(
                "unsupported cipher mode: {}",
                other
            ))),
        }
    }
}

/// Normalize an AES key to 16, 24 or 32 bytes.
pub fn normalize_aes_key(key: &[u8]) -> ExtensionResult<Vec<u8>> {
    let target = match key.len() {
        0 => return Err(empty_key()),
        1..=16 => 16,
        17..=24 => 24,
        _ => 32,
    };
    Ok(fit(key, target))
}

/// Normalize a DES key to 8 bytes.
pub fn normalize_des_key(key: &[u8]) -> ExtensionResult<Vec<u8>> {
    if key.is_empty() {
        return Err(empty_key());
    }
    Ok(fit(key, 8))
}

/// Normalize a 3DES key to 24 bytes.
pub fn normalize_triple_des_key(key: &[u8]) -> ExtensionResult<Vec<u8>> {
    if key.is_empty() {
        return Err(empty_key());
    }
    Ok(fit(key, 24))
}

fn fit(key: &[u8], len: usize) -> Vec<u8> {
    let mut out = key[..key.len().min(len)].to_vec();
    out.resize(len, 0);
    out
}

fn empty_key() -> ExtensionError {
    ExtensionError::Validation("key must not be empty".to_string())
}

// ============================================================================
// AES / DES / 3DES
// ============================================================================

pub fn aes_encrypt(
    plaintext: &[u8],
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
) -> ExtensionResult<String> {
    let key = normalize_aes_key(key)?;
    let sealed = match key.len() {
        16 => encrypt_with::<aes::Aes128>(&key, iv, mode, AES_BLOCK, plaintext)?,
        24 => encrypt_with::<aes::Aes192>(&key, iv, mode, AES_BLOCK, plaintext)?,
        _ => encrypt_with::<aes::Aes256>(&key, iv, mode, AES_BLOCK, plaintext)?,
    };
    Ok(base64_encode(&sealed))
}

pub fn aes_decrypt(
    ciphertext: &str,
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
) -> ExtensionResult<Vec<u8>> {
    let key = normalize_aes_key(key)?;
    let data = base64_decode(ciphertext)?;
    match key.len() {
        16 => decrypt_with::<aes::Aes128>(&key, iv, mode, AES_BLOCK, &data),
        24 => decrypt_with::<aes::Aes192>(&key, iv, mode, AES_BLOCK, &data),
        _ => decrypt_with::<aes::Aes256>(&key, iv, mode, AES_BLOCK, &data),
    }
}

pub fn des_encrypt(
    plaintext: &[u8],
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
) -> ExtensionResult<String> {
    let key = normalize_des_key(key)?;
    let sealed = encrypt_with::<des::Des>(&key, iv, mode, DES_BLOCK, plaintext)?;
    Ok(base64_encode(&sealed))
}

pub fn des_decrypt(
    ciphertext: &str,
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
) -> ExtensionResult<Vec<u8>> {
    let key = normalize_des_key(key)?;
    let data = base64_decode(ciphertext)?;
    decrypt_with::<des::Des>(&key, iv, mode, DES_BLOCK, &data)
}

pub fn triple_des_encrypt(
    plaintext: &[u8],
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
) -> ExtensionResult<String> {
    let key = normalize_triple_des_key(key)?;
    let sealed = encrypt_with::<des::TdesEde3>(&key, iv, mode, DES_BLOCK, plaintext)?;
    Ok(base64_encode(&sealed))
}

pub fn triple_des_decrypt(
    ciphertext: &str,
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
) -> ExtensionResult<Vec<u8>> {
    let key = normalize_triple_des_key(key)?;
    let data = base64_decode(ciphertext)?;
    decrypt_with::<des::TdesEde3>(&key, iv, mode, DES_BLOCK, &data)
}

fn require_iv(iv: Option<&[u8]>, block: usize) -> ExtensionResult<&[u8]> {
    match iv {
        Some(iv) if iv.len() == block => Ok(iv),
        Some(iv) => Err(ExtensionError::Validation(format!(
            "iv must be {} bytes, got {}",
            block,
            iv.len()
        ))),
        None => Err(ExtensionError::Validation(format!(
            "cbc mode requires a {}-byte iv",
            block
        ))),
    }
}

fn encrypt_with<C>(
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
    block: usize,
    data: &[u8],
) -> ExtensionResult<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    match mode {
        CipherMode::Cbc => {
            let iv = require_iv(iv, block)?;
            let cipher = cbc::Encryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| ExtensionError::Validation(e.to_string()))?;
            Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
        }
        CipherMode::Ecb => {
            let cipher = ecb::Encryptor::<C>::new_from_slice(key)
                .map_err(|e| ExtensionError::Validation(e.to_string()))?;
            Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
        }
    }
}

fn decrypt_with<C>(
    key: &[u8],
    iv: Option<&[u8]>,
    mode: CipherMode,
    block: usize,
    data: &[u8],
) -> ExtensionResult<Vec<u8>>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    if data.is_empty() || data.len() % block != 0 {
        return Err(ExtensionError::Validation(format!(
            "ciphertext length {} is not a multiple of {}",
            data.len(),
            block
        )));
    }
    let bad_padding =
        |_: UnpadError| ExtensionError::Validation("bad padding or wrong key".to_string());
    match mode {
        CipherMode::Cbc => {
            let iv = require_iv(iv, block)?;
            let cipher = cbc::Decryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| ExtensionError::Validation(e.to_string()))?;
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(data)
                .map_err(bad_padding)
        }
        CipherMode::Ecb => {
            let cipher = ecb::Decryptor::<C>::new_from_slice(key)
                .map_err(|e| ExtensionError::Validation(e.to_string()))?;
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(data)
                .map_err(bad_padding)
        }
    }
}

// ============================================================================
// RSA
// ============================================================================

/// Encrypt with a base64 DER public key (SPKI, or bare PKCS#1 as a fallback).
pub fn rsa_encrypt(plaintext: &[u8], public_key: &str) -> ExtensionResult<String> {
    let der = base64_decode(&strip_pem(public_key))?;
    let key = RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| ExtensionError::Validation(format!("invalid public key: {}", e)))?;
    let mut rng = rand::thread_rng();
    let sealed = key
        .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| ExtensionError::Validation(e.to_string()))?;
    Ok(base64_encode(&sealed))
}

/// Decrypt with a base64 PKCS#8 DER private key.
pub fn rsa_decrypt(ciphertext: &str, private_key: &str) -> ExtensionResult<Vec<u8>> {
    let der = base64_decode(&strip_pem(private_key))?;
    let key = RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| ExtensionError::Validation(format!("invalid private key: {}", e)))?;
    let data = base64_decode(ciphertext)?;
    key.decrypt(Pkcs1v15Encrypt, &data)
        .map_err(|e| ExtensionError::Validation(e.to_string()))
}

/// Drop PEM armor lines and whitespace so pasted keys decode as plain base64.
fn strip_pem(key: &str) -> String {
    key.lines()
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IV16: &[u8] = b"0123456789abcdef";

    #[test]
    fn test_aes_round_trip() {
        let sealed =
            aes_encrypt(b"chapter one", b"secret-key", Some(IV16), CipherMode::Cbc).unwrap();
        let opened = aes_decrypt(&sealed, b"secret-key", Some(IV16), CipherMode::Cbc).unwrap();
        assert_eq!(opened, b"chapter one");
    }

    #[test]
    fn test_aes_ecb_ignores_iv() {
        let sealed =
            aes_encrypt(b"payload", b"k", Some(&b"short"[..]), CipherMode::Ecb).unwrap();
        let opened = aes_decrypt(&sealed, b"k", None, CipherMode::Ecb).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn test_aes_key_normalization() {
        let padded = normalize_aes_key(b"0123456789").unwrap();
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[..10], b"0123456789");
        assert!(padded[10..].iter().all(|b| *b == 0));

        let long = vec![7u8; 40];
        let truncated = normalize_aes_key(&long).unwrap();
        assert_eq!(truncated, vec![7u8; 32]);

        assert_eq!(normalize_aes_key(&[1u8; 20]).unwrap().len(), 24);
        assert!(normalize_aes_key(b"").is_err());
    }

    #[test]
    fn test_padded_key_is_equivalent_to_explicit_key() {
        let mut explicit = b"0123456789".to_vec();
        explicit.resize(16, 0);
        let sealed = aes_encrypt(b"x", b"0123456789", Some(IV16), CipherMode::Cbc).unwrap();
        let opened = aes_decrypt(&sealed, &explicit, Some(IV16), CipherMode::Cbc).unwrap();
        assert_eq!(opened, b"x");
    }

    #[test]
    fn test_cbc_requires_exact_iv() {
        let err = aes_encrypt(b"x", b"key", Some(&b"short"[..]), CipherMode::Cbc).unwrap_err();
        assert!(matches!(err, ExtensionError::Validation(_)));
        assert!(aes_encrypt(b"x", b"key", None, CipherMode::Cbc).is_err());
    }

    #[test]
    fn test_des_and_triple_des_round_trip() {
        let iv: &[u8] = b"12345678";
        let sealed = des_encrypt(b"hello", b"k", Some(iv), CipherMode::Cbc).unwrap();
        assert_eq!(
            des_decrypt(&sealed, b"k", Some(iv), CipherMode::Cbc).unwrap(),
            b"hello"
        );

        let sealed =
            triple_des_encrypt(b"hello", b"a-longer-key", None, CipherMode::Ecb).unwrap();
        assert_eq!(
            triple_des_decrypt(&sealed, b"a-longer-key", None, CipherMode::Ecb).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        assert!(aes_decrypt("AAAA", b"key", Some(IV16), CipherMode::Cbc).is_err());
        assert!(aes_decrypt("not base64!", b"key", Some(IV16), CipherMode::Cbc).is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(CipherMode::parse(None).unwrap(), CipherMode::Cbc);
        assert_eq!(CipherMode::parse(Some("ECB")).unwrap(), CipherMode::Ecb);
        assert!(CipherMode::parse(Some("gcm")).is_err());
    }

    #[test]
    fn test_rsa_round_trip() {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};

        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        let public_b64 = base64_encode(public.to_public_key_der().unwrap().as_bytes());
        let private_b64 = base64_encode(private.to_pkcs8_der().unwrap().as_bytes());

        let sealed = rsa_encrypt(b"token", &public_b64).unwrap();
        assert_eq!(rsa_decrypt(&sealed, &private_b64).unwrap(), b"token");
        assert!(rsa_encrypt(b"token", "AAAA").is_err());
    }
}
