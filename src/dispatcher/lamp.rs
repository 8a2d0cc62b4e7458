use crate::dispatcher::broadcaster::Broadcaster;
use crate::dispatcher::queue::CommandQueue;
use crate::dispatcher::worker::{ConnectionAction, ConnectionReport, ControlRequest, Worker, WorkerSettings};
use crate::domain::{Command, CommandError, CommandKind, ConnectionState, DataPoints, Device, DpValue, Payload, Priority, Rgb};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch::{Receiver as WatchReceiver, Sender as WatchSender};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to one lamp: the command queue, its observers and the worker draining it.
///
/// Every method is safe to call from any task or thread. Only validation errors are reported to the caller,
/// delivery failures surface through the status and connection callbacks.
#[derive(Debug)]
pub struct Lamp {
    data_points: DataPoints,
    queue: Arc<CommandQueue>,
    broadcaster: Arc<Broadcaster>,
    unstarted: Mutex<Option<WorkerChannels>>,
    state_rx: WatchReceiver<ConnectionState>,
    controls: mpsc::Sender<ControlRequest>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// The worker's ends of the channels, handed over when it starts.
#[derive(Debug)]
struct WorkerChannels {
    state_tx: WatchSender<ConnectionState>,
    controls: mpsc::Receiver<ControlRequest>,
}

impl Lamp {
    pub fn new(data_points: DataPoints) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (controls_tx, controls_rx) = mpsc::channel(8);

        Lamp {
            data_points,
            queue: Arc::new(CommandQueue::new()),
            broadcaster: Arc::new(Broadcaster::new()),
            unstarted: Mutex::new(Some(WorkerChannels {
                state_tx,
                controls: controls_rx,
            })),
            state_rx,
            controls: controls_tx,
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker that owns `device` from now on. Commands submitted earlier are delivered first.
    pub fn start<D>(&self, device: D, settings: WorkerSettings)
    where
        D: Device + 'static,
    {
        let Some(channels) = self.unstarted.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            warn!("⚠️ Lamp worker already started, ignoring device '{}'", device.device_id());
            return;
        };

        debug!("🚦 Starting worker for '{}'...", device.device_id());
        let worker = Worker::new(
            device,
            self.queue.clone(),
            self.broadcaster.clone(),
            channels.state_tx,
            channels.controls,
            settings,
        );
        let handle = tokio::spawn(async move {
            worker.run().await;
        });

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("🚦 Starting worker... OK");
    }

    pub fn submit(&self, command: Command) -> Result<(), CommandError> {
        debug!(urgent = command.is_urgent(), "📥 Queueing {}", command);
        self.queue.submit(command)
    }

    pub fn send_command(&self, kind: CommandKind, payload: Payload, urgent: bool) -> Result<(), CommandError> {
        let priority = if urgent { Priority::Urgent } else { Priority::Normal };
        self.submit(Command::new(kind, payload, priority)?)
    }

    /// Urgent, drops every pending colour and value update.
    pub fn turn_off(&self) -> Result<(), CommandError> {
        self.submit(Command::turn_off())
    }

    pub fn turn_on(&self) -> Result<(), CommandError> {
        self.submit(Command::set_power(true, Priority::Urgent))
    }

    pub fn set_colour(&self, colour: Rgb) -> Result<(), CommandError> {
        self.submit(Command::set_colour(colour))
    }

    pub fn set_brightness(&self, value: i64) -> Result<(), CommandError> {
        self.submit(Command::set_value(self.data_points.brightness, DpValue::Integer(value))?)
    }

    pub fn set_temperature(&self, value: i64) -> Result<(), CommandError> {
        self.submit(Command::set_value(self.data_points.temperature, DpValue::Integer(value))?)
    }

    /// Work mode of the bulb, e.g. `white`, `colour`, `scene` or `music`.
    pub fn set_mode(&self, mode: &str) -> Result<(), CommandError> {
        self.submit(Command::set_value(self.data_points.mode, DpValue::Text(mode.to_string()))?)
    }

    /// White mode at the given brightness and colour temperature. Nothing is queued unless both are valid.
    pub fn set_white(&self, brightness: i64, temperature: i64) -> Result<(), CommandError> {
        let mode = Command::set_value(self.data_points.mode, DpValue::Text("white".to_string()))?;
        let brightness = Command::set_value(self.data_points.brightness, DpValue::Integer(brightness))?;
        let temperature = Command::set_value(self.data_points.temperature, DpValue::Integer(temperature))?;
        self.submit(mode)?;
        self.submit(brightness)?;
        self.submit(temperature)
    }

    /// Switches to scene mode, then uploads the scene. Both are plain value updates, so a later turn-off drops
    /// them and a newer scene replaces a pending one.
    pub fn set_scene(&self, data: &str) -> Result<(), CommandError> {
        let mode = Command::set_value(self.data_points.mode, DpValue::Text("scene".to_string()))?;
        let scene = Command::set_value(self.data_points.scene, DpValue::Text(data.to_string()))?;
        self.submit(mode)?;
        self.submit(scene)
    }

    /// Connects unless already connected.
    pub async fn connect(&self) -> Result<ConnectionReport, CommandError> {
        self.control(ConnectionAction::Connect).await
    }

    pub async fn disconnect(&self) -> Result<ConnectionReport, CommandError> {
        self.control(ConnectionAction::Disconnect).await
    }

    /// Reads the lamp's status to verify the connection. The status also goes to the status callbacks.
    pub async fn check_connection(&self) -> Result<ConnectionReport, CommandError> {
        self.control(ConnectionAction::Check).await
    }

    /// Drops every pending command and connects again.
    pub async fn reconnect(&self) -> Result<ConnectionReport, CommandError> {
        self.control(ConnectionAction::Reconnect).await
    }

    /// Hands `action` to the worker and waits until it is done.
    async fn control(&self, action: ConnectionAction) -> Result<ConnectionReport, CommandError> {
        if self.queue.is_closed() {
            return Err(CommandError::ShutDown);
        }

        let (reply, report) = oneshot::channel();
        self.controls
            .send(ControlRequest { action, reply })
            .await
            .map_err(|_| CommandError::ShutDown)?;
        report.await.map_err(|_| CommandError::ShutDown)
    }

    pub fn add_status_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.broadcaster.add_status_callback(callback);
    }

    pub fn add_connection_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.broadcaster.add_connection_callback(callback);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    #[cfg(test)]
    pub fn watch_connection(&self) -> WatchReceiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Rejects further commands, lets the in-flight send finish and waits for the worker to disconnect.
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down lamp dispatcher...");
        let pending = self.queue.len();
        self.queue.close();
        if pending > 0 {
            warn!("⚠️ Discarding {} undelivered command(s)", pending);
        }

        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("❌ Lamp worker ended abnormally: {}", e);
            }
        }
        info!("🛑 Shutting down lamp dispatcher... OK");
    }
}
