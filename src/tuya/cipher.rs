use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes_gcm::Aes128Gcm;
use aes_gcm::aead::{Aead, Payload};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const BLOCK_LEN: usize = 16;
pub const GCM_IV_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;
pub const HMAC_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CipherError {
    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidLength(usize),
    #[error("invalid padding")]
    BadPadding,
    #[error("authentication tag mismatch")]
    AuthenticationFailed,
    #[error("invalid key length")]
    InvalidKey,
}

/// AES-128-ECB, PKCS#7 padded when `pad` is set. Without padding the input must be block aligned.
pub fn ecb_encrypt(key: &[u8; 16], plaintext: &[u8], pad: bool) -> Result<Vec<u8>, CipherError> {
    let mut data = plaintext.to_vec();
    if pad {
        let padding = BLOCK_LEN - plaintext.len() % BLOCK_LEN;
        data.extend(std::iter::repeat_n(padding as u8, padding));
    } else if data.len() % BLOCK_LEN != 0 {
        return Err(CipherError::InvalidLength(data.len()));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(data)
}

pub fn ecb_decrypt(key: &[u8; 16], ciphertext: &[u8], unpad: bool) -> Result<Vec<u8>, CipherError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CipherError::InvalidLength(ciphertext.len()));
    }

    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut data = ciphertext.to_vec();
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }

    if unpad {
        let padding = data.last().copied().unwrap_or_default() as usize;
        if padding == 0 || padding > BLOCK_LEN || !data[data.len() - padding..].iter().all(|byte| *byte as usize == padding) {
            return Err(CipherError::BadPadding);
        }
        data.truncate(data.len() - padding);
    }
    Ok(data)
}

/// AES-128-GCM, returns the ciphertext with the 16 byte tag appended.
pub fn gcm_encrypt(key: &[u8; 16], iv: &[u8; GCM_IV_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    cipher
        .encrypt(GenericArray::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| CipherError::AuthenticationFailed)
}

pub fn gcm_decrypt(key: &[u8; 16], iv: &[u8; GCM_IV_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt(GenericArray::from_slice(iv), Payload { msg: ciphertext, aad })
        .map_err(|_| CipherError::AuthenticationFailed)
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; HMAC_LEN], CipherError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant time comparison of `expected` against the HMAC of `data`.
pub fn hmac_verify(key: &[u8], data: &[u8], expected: &[u8]) -> Result<(), CipherError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CipherError::InvalidKey)?;
    mac.update(data);
    mac.verify_slice(expected).map_err(|_| CipherError::AuthenticationFailed)
}
