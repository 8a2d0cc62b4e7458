use crate::tuya::cipher::{self, CipherError, GCM_IV_LEN, GCM_TAG_LEN, HMAC_LEN};
use rand::RngCore;
use thiserror::Error;

pub const PREFIX_55AA: u32 = 0x0000_55AA;
pub const SUFFIX_55AA: u32 = 0x0000_AA55;
pub const PREFIX_6699: u32 = 0x0000_6699;
pub const SUFFIX_6699: u32 = 0x0000_9966;

const HEADER_55AA_LEN: usize = 16;
const HEADER_6699_LEN: usize = 18;
const SUFFIX_LEN: usize = 4;
const CRC_LEN: usize = 4;
const RETCODE_LEN: usize = 4;

/// Frames larger than this are treated as garbage rather than buffered.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// How a frame is protected on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameScheme {
    /// `55AA` with a CRC32 trailer (3.3).
    Crc,
    /// `55AA` with an HMAC-SHA256 trailer keyed with the given key (3.4).
    Hmac([u8; 16]),
    /// `6699` with AES-GCM over the payload (3.5).
    Gcm([u8; 16]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub seq: u32,
    pub cmd: u32,
    pub retcode: Option<u32>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(seq: u32, cmd: u32, payload: Vec<u8>) -> Self {
        Message {
            seq,
            cmd,
            retcode: None,
            payload,
        }
    }

    pub fn with_retcode(mut self, retcode: u32) -> Self {
        self.retcode = Some(retcode);
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame truncated, need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unknown frame prefix {0:#010x}")]
    BadPrefix(u32),
    #[error("unexpected frame suffix {0:#010x}")]
    BadSuffix(u32),
    #[error("frame of {0} bytes exceeds the maximum size")]
    TooLarge(usize),
    #[error("CRC mismatch")]
    CrcMismatch,
    #[error("HMAC mismatch")]
    HmacMismatch,
    #[error("{0} frame received, expected {1}")]
    WrongScheme(&'static str, &'static str),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("malformed payload: {0}")]
    Payload(String),
}

impl FrameError {
    /// Errors that mean the peer uses another key.
    pub fn is_key_mismatch(&self) -> bool {
        matches!(self, FrameError::HmacMismatch | FrameError::Cipher(_))
    }
}

pub fn pack(message: &Message, scheme: &FrameScheme) -> Result<Vec<u8>, FrameError> {
    match scheme {
        FrameScheme::Crc | FrameScheme::Hmac(_) => pack_55aa(message, scheme),
        FrameScheme::Gcm(key) => {
            let mut iv = [0u8; GCM_IV_LEN];
            rand::thread_rng().fill_bytes(&mut iv);
            pack_6699(message, key, &iv)
        }
    }
}

fn pack_55aa(message: &Message, scheme: &FrameScheme) -> Result<Vec<u8>, FrameError> {
    let trailer_len = match scheme {
        FrameScheme::Hmac(_) => HMAC_LEN,
        _ => CRC_LEN,
    };
    let retcode_len = message.retcode.map_or(0, |_| RETCODE_LEN);
    let len = retcode_len + message.payload.len() + trailer_len + SUFFIX_LEN;

    let mut frame = Vec::with_capacity(HEADER_55AA_LEN + len);
    frame.extend_from_slice(&PREFIX_55AA.to_be_bytes());
    frame.extend_from_slice(&message.seq.to_be_bytes());
    frame.extend_from_slice(&message.cmd.to_be_bytes());
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    if let Some(retcode) = message.retcode {
        frame.extend_from_slice(&retcode.to_be_bytes());
    }
    frame.extend_from_slice(&message.payload);

    match scheme {
        FrameScheme::Hmac(key) => {
            let mac = cipher::hmac_sha256(key, &frame)?;
            frame.extend_from_slice(&mac);
        }
        _ => frame.extend_from_slice(&crc32fast::hash(&frame).to_be_bytes()),
    }
    frame.extend_from_slice(&SUFFIX_55AA.to_be_bytes());
    Ok(frame)
}

fn pack_6699(message: &Message, key: &[u8; 16], iv: &[u8; GCM_IV_LEN]) -> Result<Vec<u8>, FrameError> {
    let mut plaintext = Vec::with_capacity(RETCODE_LEN + message.payload.len());
    if let Some(retcode) = message.retcode {
        plaintext.extend_from_slice(&retcode.to_be_bytes());
    }
    plaintext.extend_from_slice(&message.payload);
    let len = GCM_IV_LEN + plaintext.len() + GCM_TAG_LEN;

    let mut frame = Vec::with_capacity(HEADER_6699_LEN + len + SUFFIX_LEN);
    frame.extend_from_slice(&PREFIX_6699.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&message.seq.to_be_bytes());
    frame.extend_from_slice(&message.cmd.to_be_bytes());
    frame.extend_from_slice(&(len as u32).to_be_bytes());

    let sealed = cipher::gcm_encrypt(key, iv, &frame[4..HEADER_6699_LEN], &plaintext)?;
    frame.extend_from_slice(iv);
    frame.extend_from_slice(&sealed);
    frame.extend_from_slice(&SUFFIX_6699.to_be_bytes());
    Ok(frame)
}

/// Total length of the frame starting at `buffer`, or `None` while its header is incomplete.
pub fn frame_len(buffer: &[u8]) -> Result<Option<usize>, FrameError> {
    if buffer.len() < 4 {
        return Ok(None);
    }

    let (header_len, extra) = match read_u32(buffer, 0) {
        PREFIX_55AA => (HEADER_55AA_LEN, 0),
        PREFIX_6699 => (HEADER_6699_LEN, SUFFIX_LEN),
        prefix => return Err(FrameError::BadPrefix(prefix)),
    };
    if buffer.len() < header_len {
        return Ok(None);
    }

    let total = header_len + read_u32(buffer, header_len - 4) as usize + extra;
    if total > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(total));
    }
    Ok(Some(total))
}

/// Decodes one complete frame. With `detect_retcode` a leading return code is split off the payload
/// when it looks like one, which is how device replies are told apart from requests.
pub fn unpack(frame: &[u8], scheme: &FrameScheme, detect_retcode: bool) -> Result<Message, FrameError> {
    let total = frame_len(frame)?.ok_or(FrameError::Truncated {
        needed: HEADER_55AA_LEN,
        got: frame.len(),
    })?;
    if frame.len() < total {
        return Err(FrameError::Truncated {
            needed: total,
            got: frame.len(),
        });
    }
    let frame = &frame[..total];

    match (read_u32(frame, 0), scheme) {
        (PREFIX_55AA, FrameScheme::Gcm(_)) => Err(FrameError::WrongScheme("55AA", "6699")),
        (PREFIX_6699, FrameScheme::Crc | FrameScheme::Hmac(_)) => Err(FrameError::WrongScheme("6699", "55AA")),
        (PREFIX_6699, FrameScheme::Gcm(key)) => unpack_6699(frame, key, detect_retcode),
        _ => unpack_55aa(frame, scheme, detect_retcode),
    }
}

fn unpack_55aa(frame: &[u8], scheme: &FrameScheme, detect_retcode: bool) -> Result<Message, FrameError> {
    let trailer_len = match scheme {
        FrameScheme::Hmac(_) => HMAC_LEN,
        _ => CRC_LEN,
    };
    let body_end = frame.len() - SUFFIX_LEN;
    if body_end < HEADER_55AA_LEN + trailer_len {
        return Err(FrameError::Truncated {
            needed: HEADER_55AA_LEN + trailer_len + SUFFIX_LEN,
            got: frame.len(),
        });
    }

    let suffix = read_u32(frame, body_end);
    if suffix != SUFFIX_55AA {
        return Err(FrameError::BadSuffix(suffix));
    }

    let trailer_start = body_end - trailer_len;
    let signed = &frame[..trailer_start];
    let trailer = &frame[trailer_start..body_end];
    match scheme {
        FrameScheme::Hmac(key) => {
            cipher::hmac_verify(key, signed, trailer).map_err(|_| FrameError::HmacMismatch)?;
        }
        _ => {
            if crc32fast::hash(signed).to_be_bytes() != trailer {
                return Err(FrameError::CrcMismatch);
            }
        }
    }

    let (retcode, payload) = split_retcode(&signed[HEADER_55AA_LEN..], detect_retcode);
    Ok(Message {
        seq: read_u32(frame, 4),
        cmd: read_u32(frame, 8),
        retcode,
        payload: payload.to_vec(),
    })
}

fn unpack_6699(frame: &[u8], key: &[u8; 16], detect_retcode: bool) -> Result<Message, FrameError> {
    let body_end = frame.len() - SUFFIX_LEN;
    if body_end < HEADER_6699_LEN + GCM_IV_LEN + GCM_TAG_LEN {
        return Err(FrameError::Truncated {
            needed: HEADER_6699_LEN + GCM_IV_LEN + GCM_TAG_LEN + SUFFIX_LEN,
            got: frame.len(),
        });
    }

    let suffix = read_u32(frame, body_end);
    if suffix != SUFFIX_6699 {
        return Err(FrameError::BadSuffix(suffix));
    }

    let mut iv = [0u8; GCM_IV_LEN];
    iv.copy_from_slice(&frame[HEADER_6699_LEN..HEADER_6699_LEN + GCM_IV_LEN]);
    let plaintext = cipher::gcm_decrypt(
        key,
        &iv,
        &frame[4..HEADER_6699_LEN],
        &frame[HEADER_6699_LEN + GCM_IV_LEN..body_end],
    )?;

    let (retcode, payload) = split_retcode(&plaintext, detect_retcode);
    Ok(Message {
        seq: read_u32(frame, 6),
        cmd: read_u32(frame, 10),
        retcode,
        payload: payload.to_vec(),
    })
}

fn split_retcode(body: &[u8], detect_retcode: bool) -> (Option<u32>, &[u8]) {
    if detect_retcode && body.len() >= RETCODE_LEN {
        let candidate = read_u32(body, 0);
        if candidate & 0xFFFF_FF00 == 0 {
            return (Some(candidate), &body[RETCODE_LEN..]);
        }
    }
    (None, body)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(word)
}
