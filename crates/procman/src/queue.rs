use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::types::{ChangeRequest, DisplayId, WallpaperId};

/// Messages consumed by the lifecycle worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Change(ChangeRequest),
    /// Ends the consumer loop.
    Shutdown,
}

/// Producer half of the command queue. Cloneable; never blocks.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: Sender<Command>,
}

impl QueueSender {
    /// Returns `false` once the consumer is gone.
    pub fn push(&self, request: ChangeRequest) -> bool {
        self.tx.send(Command::Change(request)).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(Command::Shutdown).is_ok()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Command(Command),
    /// Nothing arrived within the poll interval.
    Idle,
    /// Every producer was dropped.
    Closed,
}

/// Consumer half: a FIFO with a bounded wait so the worker can re-check
/// its running flag when no work arrives.
#[derive(Debug)]
pub struct CommandQueue {
    rx: Receiver<Command>,
}

impl CommandQueue {
    pub fn channel() -> (QueueSender, CommandQueue) {
        let (tx, rx) = unbounded();
        (QueueSender { tx }, CommandQueue { rx })
    }

    pub fn recv(&self, poll_interval: Duration) -> Received {
        match self.rx.recv_timeout(poll_interval) {
            Ok(command) => Received::Command(command),
            Err(RecvTimeoutError::Timeout) => Received::Idle,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }
}

/// Drops repeats of the same (display, wallpaper) pair inside a cooldown
/// window, so a burst of identical clicks queues a single change.
#[derive(Debug)]
pub struct Debouncer {
    cooldown: Duration,
    last_seen: HashMap<(DisplayId, WallpaperId), Instant>,
}

impl Debouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_seen: HashMap::new(),
        }
    }

    /// Returns `true` when the request should be queued.
    pub fn admit(&mut self, request: &ChangeRequest, now: Instant) -> bool {
        if self.cooldown.is_zero() {
            return true;
        }
        let cooldown = self.cooldown;
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < cooldown);
        let key = (request.display.clone(), request.wallpaper.clone());
        if self.last_seen.contains_key(&key) {
            return false;
        }
        self.last_seen.insert(key, now);
        true
    }
}
