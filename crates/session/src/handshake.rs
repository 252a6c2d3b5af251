//! Single-slot rendezvous between exactly one producer and one consumer.
//!
//! A handshake is a capacity-1 channel split into a [`HandshakeSetter`] and a
//! [`HandshakeWaiter`]. Neither half is `Clone`, so the setter and waiter roles
//! are fixed for the lifetime of the pair. A second `set` while the slot is
//! still occupied blocks the producer (or fails with `SlotFull` through
//! `try_set`) instead of silently overwriting the pending signal.

use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Selector, Sender, TrySendError};
use tracing::debug;

use crate::error::HandshakeError;
use crate::status::StopSignal;

/// Creates a connected handshake pair. `name` shows up in logs and errors.
pub fn handshake<T>(name: &'static str) -> (HandshakeSetter<T>, HandshakeWaiter<T>) {
    let (tx, rx) = flume::bounded(1);
    (HandshakeSetter { name, tx }, HandshakeWaiter { name, rx })
}

/// Producer half of a handshake.
#[derive(Debug)]
pub struct HandshakeSetter<T> {
    name: &'static str,
    tx: Sender<T>,
}

impl<T> HandshakeSetter<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the waiter, blocking while a previous signal is still unconsumed.
    pub fn set(&self, value: T) -> Result<(), HandshakeError> {
        debug!(handshake = self.name, "setting");
        self.tx
            .send(value)
            .map_err(|_| HandshakeError::Disconnected { name: self.name })
    }

    /// Signals the waiter without blocking.
    pub fn try_set(&self, value: T) -> Result<(), HandshakeError> {
        debug!(handshake = self.name, "setting");
        self.tx.try_send(value).map_err(|e| match e {
            TrySendError::Full(_) => HandshakeError::SlotFull { name: self.name },
            TrySendError::Disconnected(_) => HandshakeError::Disconnected { name: self.name },
        })
    }

    /// Like [`set`](Self::set), but gives up once `stop` is requested.
    pub fn set_until(&self, value: T, stop: &StopSignal) -> Result<(), HandshakeError> {
        if stop.is_requested() {
            return Err(HandshakeError::Stopped { name: self.name });
        }
        debug!(handshake = self.name, "setting");
        Selector::new()
            .send(&self.tx, value, |res| {
                res.map_err(|_| HandshakeError::Disconnected { name: self.name })
            })
            .recv(stop.receiver(), |_| Err(HandshakeError::Stopped { name: self.name }))
            .wait()
    }

    /// True while a signal sits in the slot unconsumed.
    pub fn is_set(&self) -> bool {
        self.tx.is_full()
    }
}

/// Consumer half of a handshake.
#[derive(Debug)]
pub struct HandshakeWaiter<T> {
    name: &'static str,
    rx: Receiver<T>,
}

impl<T> HandshakeWaiter<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Blocks until the handshake fires or `timeout` elapses. Receiving consumes the signal.
    pub fn wait(&self, timeout: Duration) -> Result<Option<T>, HandshakeError> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => {
                debug!(handshake = self.name, "received");
                Ok(Some(value))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(HandshakeError::Disconnected { name: self.name })
            }
        }
    }

    /// Blocks until the handshake fires, or returns `None` once `stop` is requested.
    pub fn wait_or_stop(&self, stop: &StopSignal) -> Result<Option<T>, HandshakeError> {
        if stop.is_requested() {
            return Ok(None);
        }
        let value = Selector::new()
            .recv(&self.rx, |res| {
                res.map(Some)
                    .map_err(|_| HandshakeError::Disconnected { name: self.name })
            })
            .recv(stop.receiver(), |_| Ok(None))
            .wait()?;
        if value.is_some() {
            debug!(handshake = self.name, "received");
        }
        Ok(value)
    }

    /// Discards a pending signal. Returns whether one was pending.
    pub fn clear(&self) -> bool {
        self.rx.drain().count() > 0
    }

    pub fn is_set(&self) -> bool {
        !self.rx.is_empty()
    }

    pub(crate) fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }
}
