pub mod cipher;
pub mod codec;
pub mod connection;
#[cfg(test)]
pub mod fake_device;
pub mod frame;
pub mod handshake;
pub mod key_refresher;
pub mod key_store;
pub mod payload;
pub mod protocol;
pub mod session;

pub use connection::ConnectSettings;
pub use key_refresher::StoredKeyRefresher;
pub use key_store::{FileKeyStore, KeyStore};
pub use protocol::{LocalKey, ProtocolVersion};
pub use session::{SessionConfig, TuyaSession};
