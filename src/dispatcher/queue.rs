use crate::domain::{Command, CommandError, CommandKind};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{trace, warn};

/// Length above which the queue is trimmed.
pub const MAX_QUEUE_LEN: usize = 100;
/// Number of most recent entries kept by a trim, urgent entries come on top.
pub const TRIM_TO_LEN: usize = 50;

/// Bounded, priority-aware, conflating command queue with a blocking `take` for a single consumer.
#[derive(Debug, Default)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<Command>,
    closed: bool,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue::default()
    }

    /// Enqueues a command without blocking.
    ///
    /// Urgent commands go in front of all normal ones (in submission order among themselves) and are never
    /// merged; an urgent turn-off first purges every pending colour and value update. Normal commands replace
    /// a queued command with the same conflation key in place, or are appended.
    pub fn submit(&self, command: Command) -> Result<(), CommandError> {
        let mut state = self.lock();
        if state.closed {
            return Err(CommandError::ShutDown);
        }

        if command.is_urgent() {
            if command.kind() == CommandKind::TurnOff {
                let purged = purge(&mut state.entries, |queued| {
                    matches!(queued.kind(), CommandKind::SetColour | CommandKind::SetValue)
                });
                if purged > 0 {
                    trace!(purged, "Turn off purged pending colour/value commands");
                }
            }

            let position = state.entries.iter().take_while(|queued| queued.is_urgent()).count();
            state.entries.insert(position, command);
        } else {
            let key = command.conflation_key();
            let existing = key.and_then(|key| {
                state
                    .entries
                    .iter()
                    .position(|queued| !queued.is_urgent() && queued.conflation_key() == Some(key))
            });

            match existing {
                Some(position) => state.entries[position] = command,
                None => state.entries.push_back(command),
            }
        }

        if state.entries.len() > MAX_QUEUE_LEN {
            let before = state.entries.len();
            trim(&mut state.entries);
            warn!("⚠️ Queue overflow, dropped {} command(s), new size {}", before - state.entries.len(), state.entries.len());
        }

        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Waits until a command is available and pops the front one. Returns `None` once the queue is closed,
    /// leaving whatever is still queued undelivered.
    pub async fn take(&self) -> Option<Command> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(command) = state.entries.pop_front() {
                    return Some(command);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Removes every queued command matching the predicate, returns how many were removed.
    pub fn clear_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Command) -> bool,
    {
        purge(&mut self.lock().entries, predicate)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects further submissions and wakes the consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<Command> {
        self.lock().entries.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // The state stays consistent on every early return, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn purge<F>(entries: &mut VecDeque<Command>, predicate: F) -> usize
where
    F: Fn(&Command) -> bool,
{
    let before = entries.len();
    entries.retain(|command| !predicate(command));
    before - entries.len()
}

fn trim(entries: &mut VecDeque<Command>) {
    let keep_from = entries.len().saturating_sub(TRIM_TO_LEN);
    let mut index = 0;
    entries.retain(|command| {
        let keep = index >= keep_from || command.is_urgent();
        index += 1;
        keep
    });
}
