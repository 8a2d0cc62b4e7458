use crate::dispatcher::broadcaster::Broadcaster;
use crate::dispatcher::queue::CommandQueue;
use crate::domain::{Command, ConnectionState, Device, LampStatus, SendError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Idle time after which a heartbeat keeps the persistent connection open.
    pub heartbeat_interval: Duration,
    /// Pause after each delivered conflatable command, so bursts do not flood the lamp.
    pub command_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            heartbeat_interval: Duration::from_secs(10),
            command_interval: Duration::from_millis(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Connect,
    Disconnect,
    /// Reads the status back to verify the link.
    Check,
    /// Drops every pending command, then reconnects from scratch.
    Reconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LampStatus>,
}

/// Connection management for the worker, answered once the in-flight command is done.
#[derive(Debug)]
pub struct ControlRequest {
    pub action: ConnectionAction,
    pub reply: oneshot::Sender<ConnectionReport>,
}

/// The single consumer of the command queue and the only owner of the device.
///
/// Failures never end the loop: they are logged and turned into status text and connection state changes.
#[derive(Debug)]
pub struct Worker<D: Device> {
    device: D,
    queue: Arc<CommandQueue>,
    broadcaster: Arc<Broadcaster>,
    state_tx: watch::Sender<ConnectionState>,
    controls: mpsc::Receiver<ControlRequest>,
    settings: WorkerSettings,
}

impl<D: Device> Worker<D> {
    pub fn new(
        device: D,
        queue: Arc<CommandQueue>,
        broadcaster: Arc<Broadcaster>,
        state_tx: watch::Sender<ConnectionState>,
        controls: mpsc::Receiver<ControlRequest>,
        settings: WorkerSettings,
    ) -> Self {
        Worker {
            device,
            queue,
            broadcaster,
            state_tx,
            controls,
            settings,
        }
    }

    #[instrument(skip_all, fields(device_id = self.device.device_id()))]
    pub async fn run(mut self) -> D {
        info!("🚦 Dispatcher worker started");
        self.connect().await;

        let mut controls_open = true;
        loop {
            tokio::select! {
                biased;

                request = self.controls.recv(), if controls_open => match request {
                    Some(request) => self.control(request).await,
                    None => controls_open = false,
                },
                taken = timeout(self.settings.heartbeat_interval, self.queue.take()) => match taken {
                    Ok(Some(command)) => self.dispatch(command).await,
                    Ok(None) => break,
                    Err(_) => self.keep_alive().await,
                },
            }
        }

        self.device.disconnect().await;
        self.publish_state();
        info!("🚦 Dispatcher worker stopped");
        self.device
    }

    async fn connect(&mut self) {
        self.broadcaster.notify_status(&format!("Connecting to {}...", self.device.device_id()));
        match self.device.connect().await {
            Ok(()) => self.broadcaster.notify_status("Connected ✅"),
            Err(e) => {
                warn!("⚠️ Connection failed, retrying on the next command: {}", e);
                self.broadcaster.notify_status(&format!("Connection failed: {}", e));
            }
        }
        self.publish_state();
    }

    async fn control(&mut self, request: ControlRequest) {
        debug!(action = ?request.action, "🔌 Handling connection request...");
        let report = match request.action {
            ConnectionAction::Connect => {
                if !self.device.state().is_connected() {
                    self.connect().await;
                }
                self.report(None)
            }
            ConnectionAction::Disconnect => {
                self.device.disconnect().await;
                self.broadcaster.notify_status("Disconnected");
                self.report(None)
            }
            ConnectionAction::Check => self.check().await,
            ConnectionAction::Reconnect => {
                // Stale commands would otherwise be replayed onto the fresh connection
                let dropped = self.queue.clear_matching(|_| true);
                if dropped > 0 {
                    warn!("⚠️ Reconnecting, dropped {} pending command(s)", dropped);
                }
                self.device.disconnect().await;
                self.connect().await;
                self.report(None)
            }
        };
        self.publish_state();

        debug!(action = ?request.action, connected = report.connected, "🔌 Handling connection request... OK");
        if request.reply.send(report).is_err() {
            debug!("Connection request was abandoned by its caller");
        }
    }

    async fn check(&mut self) -> ConnectionReport {
        if !self.device.state().is_connected() {
            self.broadcaster.notify_status("Not connected");
            return self.report(None);
        }

        match self.device.status().await {
            Ok(status) => {
                self.broadcaster.notify_status(&format!("Status: {}", status));
                self.broadcaster.notify_status("Connected ✅");
                self.report(Some(status))
            }
            Err(e) => {
                warn!("⚠️ Connection check failed: {}", e);
                self.broadcaster.notify_status("Connection lost ❌");
                ConnectionReport {
                    connected: false,
                    status: None,
                }
            }
        }
    }

    fn report(&self, status: Option<LampStatus>) -> ConnectionReport {
        ConnectionReport {
            connected: self.device.state().is_connected(),
            status,
        }
    }

    async fn dispatch(&mut self, command: Command) {
        debug!(age = ?command.submitted_at().elapsed(), "📤 Sending {}...", command);

        match self.device.send(&command).await {
            Ok(()) => self.delivered(&command).await,
            Err(SendError::KeyRejected) => {
                warn!("🔑 Key rejected while sending {}, refreshing key...", command);
                self.broadcaster.notify_status("Key rejected, refreshing...");

                match self.device.refresh_key().await {
                    Ok(()) => {
                        info!("🔑 Key refreshed, retrying {}", command);
                        match self.device.send(&command).await {
                            Ok(()) => self.delivered(&command).await,
                            Err(e) => self.failed(&command, e),
                        }
                    }
                    Err(e) => {
                        error!("❌ Key refresh failed: {}", e);
                        self.broadcaster.notify_status(&format!("Authentication failed: {}", e));
                    }
                }
            }
            Err(e) => self.failed(&command, e),
        }

        self.publish_state();
    }

    async fn delivered(&mut self, command: &Command) {
        debug!("📤 Sending {}... OK", command);
        self.broadcaster.notify_status(&format!("Sent {}", command));
        self.publish_state();

        if command.conflation_key().is_some() && !self.settings.command_interval.is_zero() {
            tokio::time::sleep(self.settings.command_interval).await;
        }
    }

    fn failed(&self, command: &Command, error: SendError) {
        match &error {
            SendError::NotConnected(_) | SendError::Timeout => {
                warn!("⚠️ Dropped {}: {}", command, error);
                self.broadcaster.notify_status(&format!("Connection degraded: {}", error));
            }
            SendError::KeyRejected => {
                error!("❌ Dropped {}, key still rejected after refresh", command);
                self.broadcaster.notify_status("Authentication failed: key rejected");
            }
            SendError::ProtocolError(_) => {
                error!("❌ Dropped {}: {}", command, error);
                self.broadcaster.notify_status(&format!("Command failed: {}", error));
            }
        }
    }

    async fn keep_alive(&mut self) {
        if !self.device.state().is_connected() {
            return;
        }

        if let Err(e) = self.device.heartbeat().await {
            warn!("⚠️ Heartbeat failed: {}", e);
        }
        self.publish_state();
    }

    fn publish_state(&self) {
        let state = self.device.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            info!(state = %state, "🔌 Connection state changed");
            self.broadcaster.notify_connection(state);
        }
    }
}
