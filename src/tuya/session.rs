use crate::domain::{Command, ConnectError, ConnectionState, DataPoints, Device, LampStatus, RefreshError, SendError};
use crate::tuya::codec::{Codec, Role};
use crate::tuya::connection::{self, ConnectSettings, Connection};
use crate::tuya::frame::Message;
use crate::tuya::handshake::ClientHandshake;
use crate::tuya::key_refresher::KeyRefresher;
use crate::tuya::payload::{self, Dps};
use crate::tuya::protocol::{
    HEART_BEAT, LocalKey, ProtocolVersion, SESS_KEY_NEG_FINISH, SESS_KEY_NEG_RESP, SESS_KEY_NEG_START,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device_id: String,
    pub version: ProtocolVersion,
    pub connect: ConnectSettings,
    /// Applied to every read and write on an open connection.
    pub io_timeout: Duration,
}

/// A persistent connection to one Tuya lamp on the local network.
#[derive(Debug)]
pub struct TuyaSession {
    config: SessionConfig,
    data_points: DataPoints,
    key: LocalKey,
    refresher: Arc<dyn KeyRefresher>,
    connection: Option<Connection>,
    state: ConnectionState,
}

impl TuyaSession {
    pub fn new(
        config: SessionConfig,
        data_points: DataPoints,
        key: LocalKey,
        refresher: Arc<dyn KeyRefresher>,
    ) -> Self {
        TuyaSession {
            config,
            data_points,
            key,
            refresher,
            connection: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn key(&self) -> &LocalKey {
        &self.key
    }

    /// Current data points of the lamp.
    async fn query_dps(&mut self) -> Result<Dps, SendError> {
        self.ensure_connected().await?;
        let request = payload::query(self.config.version, &self.config.device_id);
        let reply = self.exchange(self.config.version.query_command(), &request).await?;
        Ok(reply.as_ref().and_then(payload::reply_dps).cloned().unwrap_or_default())
    }

    async fn ensure_connected(&mut self) -> Result<(), SendError> {
        if self.connection.is_none() {
            self.establish(self.key.clone()).await?;
        }
        Ok(())
    }

    /// Opens a connection authenticated with `key` and makes it the current one.
    async fn establish(&mut self, key: LocalKey) -> Result<(), ConnectError> {
        self.state = ConnectionState::Connecting;
        let host = format!("{}:{}", self.config.connect.host, self.config.connect.port);
        debug!("🔌 Connecting to {} with protocol {}...", host, self.config.version);

        match self.open_session(key).await {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = ConnectionState::Connected;
                debug!("🔌 Connecting to {} with protocol {}... OK", host, self.config.version);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                debug!("🔌 Connecting to {}... failed: {}", host, e);
                Err(e)
            }
        }
    }

    /// A connection only counts once the lamp has answered a status query, which is where 3.3 lamps first
    /// show that they reject the key.
    async fn open_session(&self, key: LocalKey) -> Result<Connection, ConnectError> {
        let stream = connection::open(&self.config.connect).await?;
        let version = self.config.version;
        let mut connection = Connection::new(stream, Codec::new(version, key.clone(), Role::Client), self.config.io_timeout);

        if version.negotiates_session_key() {
            negotiate(&mut connection, version, key).await?;
        }

        let probe = payload::query(version, &self.config.device_id);
        match exchange(&mut connection, version.query_command(), &probe).await {
            Ok(_) => Ok(connection),
            Err(SendError::ProtocolError(e)) => {
                warn!("⚠️ Status probe answered with an error, keeping the connection: {}", e);
                Ok(connection)
            }
            Err(SendError::KeyRejected) => Err(ConnectError::AuthRejected),
            Err(SendError::Timeout) => Err(ConnectError::Timeout),
            Err(SendError::NotConnected(reason)) => Err(ConnectError::Unreachable(reason)),
        }
    }

    /// Runs one request on the open connection. Anything but a protocol error leaves the link unusable.
    async fn exchange(&mut self, cmd: u32, request: &[u8]) -> Result<Option<Value>, SendError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(SendError::NotConnected("no open connection".to_string()));
        };

        let result = exchange(connection, cmd, request).await;
        if let Err(e) = &result {
            if !matches!(e, SendError::ProtocolError(_)) {
                warn!("⚠️ Dropping connection: {}", e);
                self.close().await;
                self.state = ConnectionState::Error;
            }
        }
        result
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.shutdown().await;
        }
    }
}

async fn negotiate(connection: &mut Connection, version: ProtocolVersion, key: LocalKey) -> Result<(), ConnectError> {
    debug!("🤝 Negotiating session key...");
    let handshake = ClientHandshake::new(version, key);
    let response = connection
        .request(SESS_KEY_NEG_START, handshake.start_payload(), SESS_KEY_NEG_RESP)
        .await?;
    let negotiated = handshake.finish(&response.payload).map_err(|e| {
        debug!("🤝 Negotiating session key... failed: {}", e);
        ConnectError::AuthRejected
    })?;

    connection.send(SESS_KEY_NEG_FINISH, &negotiated.finish_payload).await?;
    connection.codec_mut().set_session_key(negotiated.session_key);
    debug!("🤝 Negotiating session key... OK");
    Ok(())
}

async fn exchange(connection: &mut Connection, cmd: u32, request: &[u8]) -> Result<Option<Value>, SendError> {
    let reply = connection.request(cmd, request, cmd).await?;
    parse_reply(&reply)
}

/// Empty replies are plain acknowledgements. A reply that decrypts to something other than JSON means the
/// lamp used another key.
fn parse_reply(reply: &Message) -> Result<Option<Value>, SendError> {
    if let Some(code) = reply.retcode.filter(|code| *code != 0) {
        return Err(SendError::ProtocolError(format!("device returned code {}", code)));
    }
    if reply.payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&reply.payload).map(Some).map_err(|e| {
        debug!("Unreadable reply: {}", e);
        SendError::KeyRejected
    })
}

#[async_trait]
impl Device for TuyaSession {
    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    #[instrument(skip_all, fields(device_id = %self.config.device_id))]
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.close().await;
        info!("🔌 Connecting to {}:{}...", self.config.connect.host, self.config.connect.port);

        match self.establish(self.key.clone()).await {
            Ok(()) => {
                info!("🔌 Connecting to {}:{}... OK", self.config.connect.host, self.config.connect.port);
                Ok(())
            }
            Err(ConnectError::AuthRejected) => {
                warn!("🔑 Local key rejected, trying a refreshed key...");
                self.refresh_key().await.map_err(|e| {
                    warn!("🔑 No usable key: {}", e);
                    ConnectError::AuthRejected
                })
            }
            Err(e) => {
                warn!("🔌 Connecting to {}:{}... failed: {}", self.config.connect.host, self.config.connect.port, e);
                Err(e)
            }
        }
    }

    #[instrument(skip_all, fields(device_id = %self.config.device_id, kind = ?command.kind()))]
    async fn send(&mut self, command: &Command) -> Result<(), SendError> {
        self.ensure_connected().await?;

        let version = self.config.version;
        let dps = payload::command_dps(command, &self.data_points);
        let written = Value::Object(dps.clone());
        debug!(dps = %written, "📤 Writing data points");
        let request = payload::control(version, &self.config.device_id, dps);
        self.exchange(version.control_command(), &request).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(device_id = %self.config.device_id))]
    async fn refresh_key(&mut self) -> Result<(), RefreshError> {
        let candidates = self.refresher.candidates(&self.key).await;
        if candidates.is_empty() {
            warn!("🔑 No replacement key available");
            return Err(RefreshError::NoCandidate);
        }

        self.close().await;
        let tried = candidates.len();
        for candidate in candidates {
            info!("🔑 Trying key {:?}...", candidate);
            match self.establish(candidate.clone()).await {
                Ok(()) => {
                    info!("🔑 Trying key {:?}... OK", candidate);
                    if let Err(e) = self.refresher.accepted(&candidate).await {
                        warn!("⚠️ Could not persist the refreshed key: {}", e);
                    }
                    self.key = candidate;
                    return Ok(());
                }
                Err(e) => info!("🔑 Trying key {:?}... failed: {}", candidate, e),
            }
        }

        Err(RefreshError::Rejected(tried))
    }

    async fn heartbeat(&mut self) -> Result<(), SendError> {
        let request = payload::heartbeat(self.config.version, &self.config.device_id);
        self.exchange(HEART_BEAT, &request).await?;
        debug!("💓 Heartbeat OK");
        Ok(())
    }

    #[instrument(skip_all, fields(device_id = %self.config.device_id))]
    async fn status(&mut self) -> Result<LampStatus, SendError> {
        let dps = self.query_dps().await?;
        let status = LampStatus::from_dps(&payload::typed_dps(&dps), &self.data_points);
        debug!("📥 Lamp reports {}", status);
        Ok(status)
    }

    async fn disconnect(&mut self) {
        if self.connection.is_some() {
            info!("🔌 Disconnecting from '{}'", self.config.device_id);
        }
        self.close().await;
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Lamp, WorkerSettings};
    use crate::tuya::fake_device::FakeDevice;
    use crate::tuya::key_refresher::StoredKeyRefresher;
    use crate::tuya::key_store::{FileKeyStore, KeyStore};
    use crate::domain::{DpValue, Priority, Rgb};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;
    use test_log::test;
    use tokio::net::TcpListener;

    const DEVICE_KEY: &str = "0123456789abcdef";
    const OTHER_KEY: &str = "fedcba9876543210";

    struct Fixture {
        _dir: TempDir,
        store: Arc<FileKeyStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(FileKeyStore::new(dir.path().join("device_key.json")));
            Fixture { _dir: dir, store }
        }

        fn session(&self, port: u16, version: ProtocolVersion, key: &str) -> TuyaSession {
            let config = SessionConfig {
                device_id: "lamp".to_string(),
                version,
                connect: ConnectSettings {
                    host: "127.0.0.1".to_string(),
                    port,
                    connect_timeout: Duration::from_millis(500),
                    retry_initial_delay: Duration::from_millis(10),
                    retry_max_delay: Duration::from_millis(20),
                    retry_attempts: 2,
                },
                io_timeout: Duration::from_millis(300),
            };
            let refresher = Arc::new(StoredKeyRefresher::new(self.store.clone(), key.parse().unwrap()));
            TuyaSession::new(config, DataPoints::default(), key.parse().unwrap(), refresher)
        }
    }

    async fn controls_the_lamp(version: ProtocolVersion) {
        let device = FakeDevice::start(version, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), version, DEVICE_KEY);

        session.connect().await.unwrap();
        session.send(&Command::set_power(true, Priority::Urgent)).await.unwrap();
        session.send(&Command::set_colour(Rgb::new(255, 0, 0))).await.unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(device.dps(), json!({"20": true, "21": "colour", "24": "000003e803e8"}));
        assert_eq!(device.connections(), 1);
    }

    #[test(tokio::test)]
    async fn controls_a_v33_lamp() {
        controls_the_lamp(ProtocolVersion::V33).await;
    }

    #[test(tokio::test)]
    async fn controls_a_v34_lamp() {
        controls_the_lamp(ProtocolVersion::V34).await;
    }

    #[test(tokio::test)]
    async fn controls_a_v35_lamp() {
        controls_the_lamp(ProtocolVersion::V35).await;
    }

    #[test(tokio::test)]
    async fn connects_on_the_first_send() {
        let device = FakeDevice::start(ProtocolVersion::V35, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V35, DEVICE_KEY);

        session.send(&Command::turn_off()).await.unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(device.controls(), vec![json!({"20": false})]);
    }

    #[test(tokio::test)]
    async fn reads_the_raw_data_points() {
        let device = FakeDevice::start(ProtocolVersion::V34, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V34, DEVICE_KEY);
        session.send(&Command::set_value(22, DpValue::Integer(500)).unwrap()).await.unwrap();

        let dps = session.query_dps().await.unwrap();

        assert_eq!(Value::Object(dps), json!({"22": 500}));
    }

    #[test(tokio::test)]
    async fn reports_the_lamp_status() {
        let device = FakeDevice::start(ProtocolVersion::V33, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V33, DEVICE_KEY);
        session.send(&Command::set_power(true, Priority::Urgent)).await.unwrap();
        session.send(&Command::set_value(21, DpValue::Text("white".to_string())).unwrap()).await.unwrap();
        session.send(&Command::set_value(23, DpValue::Integer(300)).unwrap()).await.unwrap();

        let status = session.status().await.unwrap();

        assert_eq!(
            status,
            LampStatus {
                power: Some(true),
                mode: Some("white".to_string()),
                brightness: None,
                temperature: Some(300),
            }
        );
    }

    #[test(tokio::test)]
    async fn sends_heartbeats_on_an_open_connection() {
        let device = FakeDevice::start(ProtocolVersion::V33, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V33, DEVICE_KEY);
        session.connect().await.unwrap();

        session.heartbeat().await.unwrap();
        session.heartbeat().await.unwrap();

        assert_eq!(device.heartbeats(), 2);
    }

    #[test(tokio::test)]
    async fn heartbeat_requires_a_connection() {
        let device = FakeDevice::start(ProtocolVersion::V33, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V33, DEVICE_KEY);

        assert!(matches!(session.heartbeat().await, Err(SendError::NotConnected(_))));
        assert_eq!(device.heartbeats(), 0);
    }

    #[test(tokio::test)]
    async fn refreshes_a_rejected_key_from_the_store_on_connect() {
        let device = FakeDevice::start(ProtocolVersion::V34, DEVICE_KEY).await;
        let fixture = Fixture::new();
        fixture.store.store(&DEVICE_KEY.parse().unwrap()).unwrap();
        let mut session = fixture.session(device.port(), ProtocolVersion::V34, OTHER_KEY);

        session.connect().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.key(), &DEVICE_KEY.parse::<LocalKey>().unwrap());
    }

    #[test(tokio::test)]
    async fn reports_auth_rejected_without_a_replacement_key() {
        let device = FakeDevice::start(ProtocolVersion::V35, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V35, OTHER_KEY);

        assert_eq!(session.connect().await, Err(ConnectError::AuthRejected));
        assert_eq!(session.state(), ConnectionState::Error);
    }

    #[test(tokio::test)]
    async fn detects_a_wrong_key_on_v33_at_connect_time() {
        let device = FakeDevice::start(ProtocolVersion::V33, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V33, OTHER_KEY);

        assert_eq!(session.connect().await, Err(ConnectError::AuthRejected));
    }

    #[test(tokio::test)]
    async fn rejects_sends_after_the_lamp_is_re_paired_and_recovers_with_the_new_key() {
        let device = FakeDevice::start(ProtocolVersion::V33, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V33, DEVICE_KEY);
        session.connect().await.unwrap();

        device.set_key(OTHER_KEY);
        fixture.store.store(&OTHER_KEY.parse().unwrap()).unwrap();

        let command = Command::set_power(true, Priority::Normal);
        assert_eq!(session.send(&command).await, Err(SendError::KeyRejected));
        assert_eq!(session.state(), ConnectionState::Error);

        session.refresh_key().await.unwrap();
        session.send(&command).await.unwrap();

        assert_eq!(session.key(), &OTHER_KEY.parse::<LocalKey>().unwrap());
        assert_eq!(device.dps()["20"], json!(true));
    }

    #[test(tokio::test)]
    async fn counts_rejected_candidates() {
        let device = FakeDevice::start(ProtocolVersion::V34, DEVICE_KEY).await;
        let fixture = Fixture::new();
        fixture.store.store(&"aaaaaaaaaaaaaaaa".parse().unwrap()).unwrap();
        let mut session = fixture.session(device.port(), ProtocolVersion::V34, OTHER_KEY);

        assert_eq!(session.refresh_key().await, Err(RefreshError::Rejected(1)));
        assert_eq!(session.key(), &OTHER_KEY.parse::<LocalKey>().unwrap());
    }

    #[test(tokio::test)]
    async fn times_out_on_an_unresponsive_lamp() {
        let device = FakeDevice::start(ProtocolVersion::V33, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V33, DEVICE_KEY);
        session.connect().await.unwrap();

        device.set_responsive(false);

        assert_eq!(session.send(&Command::turn_off()).await, Err(SendError::Timeout));
        assert_eq!(session.state(), ConnectionState::Error);
    }

    #[test(tokio::test)]
    async fn reports_an_unreachable_lamp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let fixture = Fixture::new();
        let mut session = fixture.session(port, ProtocolVersion::V33, DEVICE_KEY);

        assert!(matches!(session.connect().await, Err(ConnectError::Unreachable(_))));
        assert!(matches!(session.send(&Command::turn_off()).await, Err(SendError::NotConnected(_))));
    }

    #[test(tokio::test)]
    async fn disconnect_is_idempotent() {
        let device = FakeDevice::start(ProtocolVersion::V35, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let mut session = fixture.session(device.port(), ProtocolVersion::V35, DEVICE_KEY);
        session.connect().await.unwrap();

        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test(tokio::test)]
    async fn drives_a_lamp_through_the_dispatcher() {
        let device = FakeDevice::start(ProtocolVersion::V35, DEVICE_KEY).await;
        let fixture = Fixture::new();
        let session = fixture.session(device.port(), ProtocolVersion::V35, DEVICE_KEY);
        let lamp = Lamp::new(DataPoints::default());
        lamp.start(session, WorkerSettings::default());

        lamp.turn_on().unwrap();
        lamp.set_colour(Rgb::new(0, 255, 0)).unwrap();
        lamp.set_brightness(500).unwrap();

        for _ in 0..100 {
            if device.dps().get("22").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        lamp.shutdown().await;

        assert_eq!(
            device.dps(),
            json!({"20": true, "21": "colour", "24": "007803e803e8", "22": 500})
        );
        assert_eq!(lamp.connection_state(), ConnectionState::Disconnected);
    }
}
