use crate::tuya::codec::{Codec, Role};
use crate::tuya::frame::{self, Message};
use crate::tuya::handshake::{self, NONCE_LEN};
use crate::tuya::payload::{self, Dps};
use crate::tuya::protocol::{
    CONTROL, CONTROL_NEW, DP_QUERY, DP_QUERY_NEW, HEART_BEAT, LocalKey, ProtocolVersion, SESS_KEY_NEG_FINISH,
    SESS_KEY_NEG_RESP, SESS_KEY_NEG_START, STATUS,
};
use crate::tuya::cipher;
use rand::RngCore;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
struct DeviceState {
    key: LocalKey,
    dps: Dps,
    controls: Vec<Dps>,
    connections: usize,
    heartbeats: usize,
    responsive: bool,
}

/// A lamp on the loopback interface that speaks the real wire protocol.
///
/// Frames it cannot read are answered under its own key, which is what a lamp with another key looks like to
/// a client.
#[derive(Debug)]
pub struct FakeDevice {
    port: u16,
    state: Arc<Mutex<DeviceState>>,
    handle: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start(version: ProtocolVersion, key: &str) -> FakeDevice {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(DeviceState {
            key: key.parse().unwrap(),
            dps: Dps::new(),
            controls: Vec::new(),
            connections: 0,
            heartbeats: 0,
            responsive: true,
        }));

        let shared = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.lock().unwrap().connections += 1;
                tokio::spawn(serve(stream, version, shared.clone()));
            }
        });

        FakeDevice {
            port,
            state,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Rotates the key, as re-pairing the lamp would. Open connections switch immediately.
    pub fn set_key(&self, key: &str) {
        self.state.lock().unwrap().key = key.parse().unwrap();
    }

    /// An unresponsive lamp still accepts connections but never answers.
    pub fn set_responsive(&self, responsive: bool) {
        self.state.lock().unwrap().responsive = responsive;
    }

    pub fn dps(&self) -> Value {
        Value::Object(self.state.lock().unwrap().dps.clone())
    }

    pub fn controls(&self) -> Vec<Value> {
        self.state.lock().unwrap().controls.iter().cloned().map(Value::Object).collect()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn heartbeats(&self) -> usize {
        self.state.lock().unwrap().heartbeats
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Negotiation {
    client_nonce: [u8; NONCE_LEN],
    device_nonce: [u8; NONCE_LEN],
}

async fn serve(mut stream: TcpStream, version: ProtocolVersion, state: Arc<Mutex<DeviceState>>) {
    let mut codec = Codec::new(version, state.lock().unwrap().key.clone(), Role::Device);
    let mut negotiation: Option<Negotiation> = None;
    let mut buffer = Vec::new();

    loop {
        let data = loop {
            match frame::frame_len(&buffer) {
                Ok(Some(len)) if buffer.len() >= len => break buffer.drain(..len).collect::<Vec<u8>>(),
                Ok(_) => {}
                Err(_) => return,
            }
            match stream.read_buf(&mut buffer).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        let (key, responsive) = {
            let state = state.lock().unwrap();
            (state.key.clone(), state.responsive)
        };
        if !responsive {
            continue;
        }
        if &key != codec.local_key() {
            codec = Codec::new(version, key.clone(), Role::Device);
        }

        let replies = match codec.decode(&data) {
            Ok(message) => handle(message, &mut codec, &mut negotiation, &state),
            Err(e) => {
                debug!("Fake device could not read a frame: {}", e);
                garbage_reply(&data, &codec)
            }
        };

        for reply in replies {
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

fn handle(
    message: Message,
    codec: &mut Codec,
    negotiation: &mut Option<Negotiation>,
    state: &Arc<Mutex<DeviceState>>,
) -> Vec<Vec<u8>> {
    match message.cmd {
        SESS_KEY_NEG_START => {
            let mut client_nonce = [0u8; NONCE_LEN];
            client_nonce.copy_from_slice(&message.payload[..NONCE_LEN]);
            let mut device_nonce = [0u8; NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut device_nonce);

            let body = handshake::device_response(codec.local_key(), &client_nonce, &device_nonce).unwrap();
            let frames = vec![reply(codec, message.seq, SESS_KEY_NEG_RESP, &body)];
            *negotiation = Some(Negotiation {
                client_nonce,
                device_nonce,
            });
            frames
        }
        SESS_KEY_NEG_FINISH => {
            if let Some(pending) = negotiation.take() {
                let expected = cipher::hmac_sha256(codec.local_key().as_bytes(), &pending.device_nonce).unwrap();
                if message.payload == expected {
                    let session_key = handshake::derive_session_key(
                        codec.version(),
                        codec.local_key(),
                        &pending.client_nonce,
                        &pending.device_nonce,
                    )
                    .unwrap();
                    codec.set_session_key(session_key);
                }
            }
            Vec::new()
        }
        CONTROL | CONTROL_NEW => {
            let request: Value = serde_json::from_slice(&message.payload).unwrap_or_default();
            let changed = payload::reply_dps(&request).cloned().unwrap_or_default();
            {
                let mut state = state.lock().unwrap();
                state.dps.extend(changed.clone());
                state.controls.push(changed.clone());
            }

            let push = json!({ "dps": changed }).to_string();
            vec![
                reply(codec, message.seq, STATUS, push.as_bytes()),
                reply(codec, message.seq, message.cmd, b""),
            ]
        }
        DP_QUERY | DP_QUERY_NEW => {
            let dps = state.lock().unwrap().dps.clone();
            let body = json!({ "devId": "fake", "dps": dps }).to_string();
            vec![reply(codec, message.seq, message.cmd, body.as_bytes())]
        }
        HEART_BEAT => {
            state.lock().unwrap().heartbeats += 1;
            vec![reply(codec, message.seq, HEART_BEAT, b"")]
        }
        _ => Vec::new(),
    }
}

fn reply(codec: &Codec, seq: u32, cmd: u32, body: &[u8]) -> Vec<u8> {
    codec.encode(seq, cmd, body).unwrap()
}

/// What a lamp with another key sends back: a well-formed frame the client cannot decrypt.
fn garbage_reply(request: &[u8], codec: &Codec) -> Vec<Vec<u8>> {
    let cmd = peek_cmd(request);
    let reply_cmd = if cmd == SESS_KEY_NEG_START { SESS_KEY_NEG_RESP } else { cmd };
    let mut body = vec![0u8; 48];
    rand::thread_rng().fill_bytes(&mut body);
    codec.encode(0, reply_cmd, &body).map(|frame| vec![frame]).unwrap_or_default()
}

fn peek_cmd(data: &[u8]) -> u32 {
    let offset = if data.starts_with(&frame::PREFIX_6699.to_be_bytes()) { 10 } else { 8 };
    data.get(offset..offset + 4)
        .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
        .unwrap_or_default()
}
