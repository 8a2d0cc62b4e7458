use crate::tuya::cipher;
use crate::tuya::frame::{self, FrameError, FrameScheme, Message};
use crate::tuya::protocol::{LocalKey, ProtocolVersion, SESS_KEY_NEG_FINISH, SESS_KEY_NEG_RESP, SESS_KEY_NEG_START, VERSION_HEADER_LEN};

/// Which end of the connection the codec speaks for. Only devices put return codes in their frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Device,
}

/// Turns plain payloads into frames and back for one connection.
///
/// Before a session key is installed, 3.4 and 3.5 frames are protected with the local key, which is only
/// valid for the negotiation itself.
#[derive(Debug, Clone)]
pub struct Codec {
    version: ProtocolVersion,
    role: Role,
    local_key: LocalKey,
    session_key: Option<[u8; 16]>,
}

impl Codec {
    pub fn new(version: ProtocolVersion, local_key: LocalKey, role: Role) -> Self {
        Codec {
            version,
            role,
            local_key,
            session_key: None,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn local_key(&self) -> &LocalKey {
        &self.local_key
    }

    pub fn set_session_key(&mut self, key: [u8; 16]) {
        self.session_key = Some(key);
    }

    fn key_for(&self, cmd: u32) -> &[u8; 16] {
        match self.session_key.as_ref() {
            Some(session_key) if !is_negotiation(cmd) => session_key,
            _ => self.local_key.as_bytes(),
        }
    }

    fn scheme_for(&self, cmd: u32) -> FrameScheme {
        match self.version {
            ProtocolVersion::V33 => FrameScheme::Crc,
            ProtocolVersion::V34 => FrameScheme::Hmac(*self.key_for(cmd)),
            ProtocolVersion::V35 => FrameScheme::Gcm(*self.key_for(cmd)),
        }
    }

    /// Encrypts `payload` and frames it. Device replies carry a return code of 0.
    pub fn encode(&self, seq: u32, cmd: u32, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let key = self.key_for(cmd);
        let header = self.version.needs_header(cmd).then(|| self.version.header());

        let body = match self.version {
            ProtocolVersion::V33 => {
                let encrypted = cipher::ecb_encrypt(key, payload, true)?;
                match header {
                    Some(header) => [header.as_slice(), &encrypted].concat(),
                    None => encrypted,
                }
            }
            ProtocolVersion::V34 => {
                let plaintext = match header {
                    Some(header) => [header.as_slice(), payload].concat(),
                    None => payload.to_vec(),
                };
                cipher::ecb_encrypt(key, &plaintext, true)?
            }
            ProtocolVersion::V35 => match header {
                Some(header) => [header.as_slice(), payload].concat(),
                None => payload.to_vec(),
            },
        };

        let mut message = Message::new(seq, cmd, body);
        if self.role == Role::Device {
            message = message.with_retcode(0);
        }
        frame::pack(&message, &self.scheme_for(cmd))
    }

    /// Verifies and decrypts one frame. The returned payload has its version header removed.
    pub fn decode(&self, data: &[u8]) -> Result<Message, FrameError> {
        // The command decides the key, so peek at it before unpacking
        let cmd = peek_cmd(data)?;
        let key = self.key_for(cmd);
        let mut message = frame::unpack(data, &self.scheme_for(cmd), self.role == Role::Client)?;

        let payload = std::mem::take(&mut message.payload);
        message.payload = match self.version {
            ProtocolVersion::V33 => {
                let encrypted = self.strip_header(&payload);
                if encrypted.is_empty() || encrypted.starts_with(b"{") {
                    encrypted.to_vec()
                } else {
                    cipher::ecb_decrypt(key, encrypted, true)?
                }
            }
            ProtocolVersion::V34 => {
                if payload.is_empty() {
                    payload
                } else {
                    let plaintext = cipher::ecb_decrypt(key, &payload, true)?;
                    self.strip_header(&plaintext).to_vec()
                }
            }
            ProtocolVersion::V35 => self.strip_header(&payload).to_vec(),
        };
        Ok(message)
    }

    fn strip_header<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        if payload.len() >= VERSION_HEADER_LEN && payload.starts_with(self.version.as_str().as_bytes()) {
            &payload[VERSION_HEADER_LEN..]
        } else {
            payload
        }
    }
}

fn is_negotiation(cmd: u32) -> bool {
    matches!(cmd, SESS_KEY_NEG_START | SESS_KEY_NEG_RESP | SESS_KEY_NEG_FINISH)
}

fn peek_cmd(data: &[u8]) -> Result<u32, FrameError> {
    let offset = match frame::frame_len(data)? {
        Some(_) if data.starts_with(&frame::PREFIX_6699.to_be_bytes()) => 10,
        Some(_) => 8,
        None => {
            return Err(FrameError::Truncated {
                needed: 18,
                got: data.len(),
            });
        }
    };
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[offset..offset + 4]);
    Ok(u32::from_be_bytes(word))
}
