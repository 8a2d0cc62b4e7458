use crate::tuya::cipher::{self, CipherError, GCM_IV_LEN, HMAC_LEN};
use crate::tuya::protocol::{LocalKey, ProtocolVersion};
use rand::RngCore;
use thiserror::Error;

pub const NONCE_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandshakeError {
    #[error("negotiation response of {0} bytes is too short")]
    ShortResponse(usize),
    #[error("device could not prove knowledge of the local key")]
    ProofMismatch,
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Client side of the 3.4/3.5 session key negotiation.
///
/// The client sends a random nonce, the device answers with its own nonce plus an HMAC of ours, and the client
/// finishes with an HMAC of the device nonce. Both ends then derive the session key from the two nonces.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    version: ProtocolVersion,
    local_key: LocalKey,
    local_nonce: [u8; NONCE_LEN],
}

#[derive(Debug)]
pub struct Negotiated {
    pub finish_payload: [u8; HMAC_LEN],
    pub session_key: [u8; 16],
}

impl ClientHandshake {
    pub fn new(version: ProtocolVersion, local_key: LocalKey) -> Self {
        let mut local_nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut local_nonce);
        ClientHandshake::with_nonce(version, local_key, local_nonce)
    }

    pub fn with_nonce(version: ProtocolVersion, local_key: LocalKey, local_nonce: [u8; NONCE_LEN]) -> Self {
        ClientHandshake {
            version,
            local_key,
            local_nonce,
        }
    }

    pub fn start_payload(&self) -> &[u8; NONCE_LEN] {
        &self.local_nonce
    }

    /// Checks the device proof in the `SESS_KEY_NEG_RESP` payload and derives the session key.
    pub fn finish(&self, response: &[u8]) -> Result<Negotiated, HandshakeError> {
        if response.len() < NONCE_LEN + HMAC_LEN {
            return Err(HandshakeError::ShortResponse(response.len()));
        }

        let mut remote_nonce = [0u8; NONCE_LEN];
        remote_nonce.copy_from_slice(&response[..NONCE_LEN]);
        let proof = &response[NONCE_LEN..NONCE_LEN + HMAC_LEN];
        cipher::hmac_verify(self.local_key.as_bytes(), &self.local_nonce, proof).map_err(|_| HandshakeError::ProofMismatch)?;

        Ok(Negotiated {
            finish_payload: cipher::hmac_sha256(self.local_key.as_bytes(), &remote_nonce)?,
            session_key: derive_session_key(self.version, &self.local_key, &self.local_nonce, &remote_nonce)?,
        })
    }
}

/// Payload of the device's `SESS_KEY_NEG_RESP`.
#[cfg(test)]
pub fn device_response(
    local_key: &LocalKey,
    client_nonce: &[u8],
    device_nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, CipherError> {
    let proof = cipher::hmac_sha256(local_key.as_bytes(), client_nonce)?;
    Ok([device_nonce.as_slice(), &proof].concat())
}

pub fn derive_session_key(
    version: ProtocolVersion,
    local_key: &LocalKey,
    local_nonce: &[u8; NONCE_LEN],
    remote_nonce: &[u8; NONCE_LEN],
) -> Result<[u8; 16], CipherError> {
    let mut mixed = [0u8; 16];
    for (index, byte) in mixed.iter_mut().enumerate() {
        *byte = local_nonce[index] ^ remote_nonce[index];
    }

    let derived = match version {
        ProtocolVersion::V35 => {
            let mut iv = [0u8; GCM_IV_LEN];
            iv.copy_from_slice(&local_nonce[..GCM_IV_LEN]);
            cipher::gcm_encrypt(local_key.as_bytes(), &iv, &[], &mixed)?
        }
        _ => cipher::ecb_encrypt(local_key.as_bytes(), &mixed, false)?,
    };

    let mut session_key = [0u8; 16];
    session_key.copy_from_slice(&derived[..16]);
    Ok(session_key)
}
