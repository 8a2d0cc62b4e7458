use crate::api::AppContext;
use crate::app_config::AppConfig;
use crate::dispatcher::Lamp;
use crate::effects::EffectRunner;
use crate::tuya::{FileKeyStore, KeyStore, LocalKey, StoredKeyRefresher, TuyaSession};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Level, debug, error, info, warn};

mod api;
mod app_config;
mod dispatcher;
mod domain;
mod effects;
mod tuya;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let level = Level::from_str(config.core().log_level()).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("🪵 Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("✅  Loaded configuration");

    let context = start(&config);
    info!(
        "✅  Started dispatcher for '{}' at {} (protocol {})",
        config.device().name(),
        config.device().address(),
        config.device().version()
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let api = if config.api().enabled() {
        let server = api::serve(config.api().bind(), context.clone(), async move {
            shutdown_rx.await.ok();
        });
        Some(tokio::spawn(server))
    } else {
        info!("🌐 API disabled");
        None
    };

    info!("🔥 {} is up and running", env!("CARGO_PKG_NAME"));
    tokio::signal::ctrl_c().await?;
    info!("🛑 Received Ctrl-C, shutting down...");

    shutdown_tx.send(()).ok();
    if let Some(api) = api {
        match api.await {
            Ok(Err(e)) => error!("❌ API server failed: {}", e),
            Err(e) => error!("❌ API server ended abnormally: {}", e),
            Ok(Ok(())) => {}
        }
    }
    context.effects.stop_all().await;
    context.lamp.shutdown().await;

    info!("🛑 Received Ctrl-C, shutting down... OK");
    Ok(())
}

/// Wires the key store, the device session and the dispatcher together and starts the worker.
fn start(config: &AppConfig) -> AppContext {
    let configured = config.device().local_key().clone();
    let store: Arc<dyn KeyStore> = Arc::new(FileKeyStore::new(config.key_store().path()));
    let key = startup_key(store.as_ref(), &configured);
    let refresher = Arc::new(StoredKeyRefresher::new(store, configured));
    let session = TuyaSession::new(config.device().session_config(), config.data_points(), key, refresher);

    let lamp = Arc::new(Lamp::new(config.data_points()));
    lamp.add_status_callback(|status| debug!("💡 {}", status));
    lamp.add_connection_callback(|state| info!("💡 Lamp is {}", state));
    lamp.start(session, config.device().worker_settings());

    let effects = Arc::new(EffectRunner::new(lamp.clone(), config.effects()));
    AppContext { lamp, effects }
}

/// A key refreshed in an earlier run wins over the configured one.
fn startup_key(store: &dyn KeyStore, configured: &LocalKey) -> LocalKey {
    match store.load() {
        Ok(Some(key)) => {
            info!("🔑 Using the stored local key");
            key
        }
        Ok(None) => configured.clone(),
        Err(e) => {
            warn!("⚠️ Ignoring the stored local key: {}", e);
            configured.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfigBuilder;
    use crate::domain::ConnectionState;
    use crate::tuya::ProtocolVersion;
    use crate::tuya::fake_device::FakeDevice;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use test_log::test;

    const STORED_KEY: &str = "fedcba9876543210";

    async fn wait_for(context: &AppContext, state: ConnectionState) {
        let mut watch = context.lamp.watch_connection();
        tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|current| *current == state))
            .await
            .unwrap()
            .unwrap();
    }

    #[test(tokio::test)]
    async fn connects_with_the_stored_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_key.json");
        FileKeyStore::new(&path).store(&STORED_KEY.parse().unwrap()).unwrap();
        let device = FakeDevice::start(ProtocolVersion::V34, STORED_KEY).await;
        let config = AppConfigBuilder::new()
            .device_port(device.port())
            .version(ProtocolVersion::V34)
            .key_store_path(path)
            .build();

        let context = start(&config);
        wait_for(&context, ConnectionState::Connected).await;
        context.lamp.turn_on().unwrap();
        for _ in 0..100 {
            if device.dps().get("20").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        context.lamp.shutdown().await;

        assert_eq!(device.dps(), json!({"20": true}));
        assert_eq!(device.connections(), 1);
    }

    #[test(tokio::test)]
    async fn repairs_a_stale_stored_key_with_the_configured_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_key.json");
        let store = FileKeyStore::new(&path);
        store.store(&STORED_KEY.parse().unwrap()).unwrap();
        let device = FakeDevice::start(ProtocolVersion::V35, "0123456789abcdef").await;
        let config = AppConfigBuilder::new()
            .device_port(device.port())
            .version(ProtocolVersion::V35)
            .key_store_path(path)
            .build();

        let context = start(&config);
        wait_for(&context, ConnectionState::Connected).await;
        context.lamp.shutdown().await;

        assert_eq!(store.load().unwrap(), Some("0123456789abcdef".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_the_configured_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("device_key.json"));
        let configured: LocalKey = "0123456789abcdef".parse().unwrap();

        assert_eq!(startup_key(&store, &configured), configured);

        std::fs::write(store.path(), "not json").unwrap();
        assert_eq!(startup_key(&store, &configured), configured);
    }
}
