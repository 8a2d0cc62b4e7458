use crate::dispatcher::Lamp;
use crate::domain::Command;
use crate::effects::effect::{Effect, EffectError, effect_from_value};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Parameters applied when a start request leaves them out.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EffectDefaults {
    pub default_speed: f64,
    pub default_brightness: u16,
}

impl Default for EffectDefaults {
    fn default() -> Self {
        EffectDefaults {
            default_speed: 50.0,
            default_brightness: 1000,
        }
    }
}

#[derive(Debug)]
struct Running {
    kind: &'static str,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs at most one effect at a time, feeding its commands to the lamp.
#[derive(Debug)]
pub struct EffectRunner {
    lamp: Arc<Lamp>,
    defaults: EffectDefaults,
    active: Mutex<Option<Running>>,
}

impl EffectRunner {
    pub fn new(lamp: Arc<Lamp>, defaults: EffectDefaults) -> Self {
        EffectRunner {
            lamp,
            defaults,
            active: Mutex::new(None),
        }
    }

    /// Builds an effect of `kind` from request parameters, filling in the configured defaults.
    pub fn build(&self, kind: &str, params: &Value) -> Result<Box<dyn Effect>, EffectError> {
        let mut value = match params {
            Value::Object(params) => params.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(EffectError::InvalidParameters {
                    kind: kind.to_string(),
                    reason: format!("expected an object, got {}", other),
                });
            }
        };

        value.insert("type".to_string(), json!(kind));
        value.entry("speed").or_insert(json!(self.defaults.default_speed));
        value.entry("brightness").or_insert(json!(self.defaults.default_brightness));
        effect_from_value(&Value::Object(value))
    }

    /// Stops the running effect, if any, and starts `effect`.
    pub async fn start(&self, effect: Box<dyn Effect>) {
        let mut active = self.active.lock().await;
        if let Some(running) = active.take() {
            stop_running(running).await;
        }

        let kind = effect.kind();
        info!("✨ Starting effect '{}'...", kind);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(animate(effect, self.lamp.clone(), stop_rx));
        *active = Some(Running { kind, stop_tx, handle });
        info!("✨ Starting effect '{}'... OK", kind);
    }

    /// Stops the effect if it is the one running. Returns whether it was.
    pub async fn stop(&self, kind: &str) -> bool {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(running) if running.kind == kind => {
                stop_running(running).await;
                true
            }
            other => {
                *active = other;
                false
            }
        }
    }

    pub async fn stop_all(&self) -> bool {
        match self.active.lock().await.take() {
            Some(running) => {
                stop_running(running).await;
                true
            }
            None => false,
        }
    }

    /// Kind of the running effect. An effect whose lamp has shut down no longer counts.
    pub async fn active(&self) -> Option<&'static str> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|running| !running.handle.is_finished())
            .map(|running| running.kind)
    }
}

async fn stop_running(running: Running) {
    info!("✨ Stopping effect '{}'...", running.kind);
    // The task may have ended by itself, then nobody listens
    let _ = running.stop_tx.send(());
    if let Err(e) = running.handle.await {
        error!("❌ Effect '{}' ended abnormally: {}", running.kind, e);
    }
    info!("✨ Stopping effect '{}'... OK", running.kind);
}

#[instrument(skip_all, fields(effect = effect.kind()))]
async fn animate(mut effect: Box<dyn Effect>, lamp: Arc<Lamp>, mut stop_rx: oneshot::Receiver<()>) {
    if !submit_all(&lamp, effect.start()) {
        return;
    }

    loop {
        let tick = effect.tick();
        if !submit_all(&lamp, tick.commands) {
            return;
        }

        tokio::select! {
            _ = &mut stop_rx => break,
            _ = sleep(tick.delay) => {}
        }
    }

    submit_all(&lamp, effect.stop());
}

fn submit_all(lamp: &Lamp, commands: Vec<Command>) -> bool {
    for command in commands {
        if let Err(e) = lamp.submit(command) {
            warn!("⚠️ Effect ended: {}", e);
            return false;
        }
    }
    true
}
