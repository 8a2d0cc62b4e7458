use crate::domain::ConnectionState;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ConnectionCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Fans status text and connection state changes out to registered observers.
///
/// Observers run synchronously on the notifying thread, in registration order, and must not block. A panic in
/// one observer is logged and does not keep the others from running.
#[derive(Default)]
pub struct Broadcaster {
    status_callbacks: RwLock<Vec<StatusCallback>>,
    connection_callbacks: RwLock<Vec<ConnectionCallback>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster::default()
    }

    pub fn add_status_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.status_callbacks.write().unwrap_or_else(PoisonError::into_inner).push(Arc::new(callback));
    }

    pub fn add_connection_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.connection_callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn notify_status(&self, status: &str) {
        // Snapshot so an observer may register further observers without deadlocking
        let callbacks = self.status_callbacks.read().unwrap_or_else(PoisonError::into_inner).clone();
        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(status))) {
                error!(observer = index, "❌ Status callback failed: {}", panic_message(&panic));
            }
        }
    }

    pub fn notify_connection(&self, state: ConnectionState) {
        let callbacks = self.connection_callbacks.read().unwrap_or_else(PoisonError::into_inner).clone();
        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(state))) {
                error!(observer = index, "❌ Connection callback failed: {}", panic_message(&panic));
            }
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("status_callbacks", &self.status_callbacks.read().map(|callbacks| callbacks.len()).unwrap_or_default())
            .field(
                "connection_callbacks",
                &self.connection_callbacks.read().map(|callbacks| callbacks.len()).unwrap_or_default(),
            )
            .finish()
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[test]
    fn invokes_status_callbacks_in_registration_order() {
        let broadcaster = Broadcaster::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let calls = calls.clone();
            broadcaster.add_status_callback(move |status| calls.lock().unwrap().push(format!("{}: {}", name, status)));
        }

        broadcaster.notify_status("Connected");

        assert_eq!(*calls.lock().unwrap(), vec!["first: Connected", "second: Connected"]);
    }

    #[test]
    fn a_panicking_observer_does_not_stop_the_next_one() {
        let broadcaster = Broadcaster::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        broadcaster.add_connection_callback(|_| panic!("observer failure"));
        let sink = received.clone();
        broadcaster.add_connection_callback(move |state| sink.lock().unwrap().push(state));

        broadcaster.notify_connection(ConnectionState::Connected);
        broadcaster.notify_connection(ConnectionState::Disconnected);

        assert_eq!(*received.lock().unwrap(), vec![ConnectionState::Connected, ConnectionState::Disconnected]);
    }

    #[test]
    fn observers_may_register_observers() {
        let broadcaster = Arc::new(Broadcaster::new());
        let inner = broadcaster.clone();
        broadcaster.add_status_callback(move |_| inner.add_status_callback(|_| {}));

        broadcaster.notify_status("one");
        broadcaster.notify_status("two");

        assert_eq!(broadcaster.status_callbacks.read().unwrap().len(), 3);
    }

    #[test]
    fn extracts_panic_messages() {
        let panic = catch_unwind(|| panic!("boom {}", 42)).unwrap_err();
        assert_eq!(panic_message(&panic), "boom 42");
    }
}
