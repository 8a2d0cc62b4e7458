use crate::domain::{Command, ConnectError, ConnectionState, Device, LampStatus, RefreshError, SendError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub command: String,
    pub ok: bool,
}

impl Delivery {
    pub fn ok(command: &str) -> Self {
        Delivery {
            command: command.to_string(),
            ok: true,
        }
    }

    pub fn failed(command: &str) -> Self {
        Delivery {
            command: command.to_string(),
            ok: false,
        }
    }
}

#[derive(Debug, Default)]
struct DeviceLog {
    attempts: Vec<Delivery>,
    connects: usize,
    refresh_calls: usize,
    heartbeats: usize,
}

/// In-memory device recording every call. Send results are scripted, anything unscripted succeeds.
#[derive(Debug, Clone)]
pub struct TestDevice {
    state: ConnectionState,
    send_results: Arc<Mutex<VecDeque<Result<(), SendError>>>>,
    refresh_fails: bool,
    send_delay: Duration,
    status: Result<LampStatus, SendError>,
    log: Arc<Mutex<DeviceLog>>,
}

impl TestDevice {
    pub fn new() -> Self {
        TestDevice {
            state: ConnectionState::Disconnected,
            send_results: Arc::default(),
            refresh_fails: false,
            send_delay: Duration::ZERO,
            status: Ok(LampStatus::default()),
            log: Arc::default(),
        }
    }

    pub fn with_send_results<I>(self, results: I) -> Self
    where
        I: IntoIterator<Item = Result<(), SendError>>,
    {
        self.send_results.lock().unwrap().extend(results);
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// What a status read returns. A failed read drops the connection, as a real session does.
    pub fn with_status(mut self, status: Result<LampStatus, SendError>) -> Self {
        self.status = status;
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.refresh_fails = true;
        self
    }

    pub fn attempts(&self) -> Vec<Delivery> {
        self.log.lock().unwrap().attempts.clone()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|delivery| delivery.ok)
            .map(|delivery| delivery.command)
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.log.lock().unwrap().connects
    }

    pub fn refresh_calls(&self) -> usize {
        self.log.lock().unwrap().refresh_calls
    }

    pub fn heartbeats(&self) -> usize {
        self.log.lock().unwrap().heartbeats
    }
}

#[async_trait]
impl Device for TestDevice {
    fn device_id(&self) -> &str {
        "test-lamp"
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.log.lock().unwrap().connects += 1;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn send(&mut self, command: &Command) -> Result<(), SendError> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }

        let result = self.send_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.log.lock().unwrap().attempts.push(Delivery {
            command: command.to_string(),
            ok: result.is_ok(),
        });
        result
    }

    async fn refresh_key(&mut self) -> Result<(), RefreshError> {
        self.log.lock().unwrap().refresh_calls += 1;
        if self.refresh_fails {
            Err(RefreshError::NoCandidate)
        } else {
            Ok(())
        }
    }

    async fn heartbeat(&mut self) -> Result<(), SendError> {
        self.log.lock().unwrap().heartbeats += 1;
        Ok(())
    }

    async fn status(&mut self) -> Result<LampStatus, SendError> {
        if self.status.is_err() {
            self.state = ConnectionState::Error;
        }
        self.status.clone()
    }

    async fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}
