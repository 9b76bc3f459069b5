use std::sync::{Arc, atomic::Ordering::Relaxed};

use crate::{RecvError, RecvTimeoutError, SharedStats, SmartMessage, TryRecvError};

pub struct Receiver<T: Send> {
    rx: crossbeam::channel::Receiver<SmartMessage<T>>,
    stats: Arc<SharedStats>,
}

impl<T: Send> Receiver<T> {
    pub(crate) fn new(
        rx: crossbeam::channel::Receiver<SmartMessage<T>>,
        stats: Arc<SharedStats>,
    ) -> Self {
        Self { rx, stats }
    }

    /// Blocks until a message arrives or all senders are gone.
    pub fn recv(&self) -> Result<SmartMessage<T>, RecvError> {
        let msg = self.rx.recv()?;
        self.update_latency(&msg);
        Ok(msg)
    }

    pub fn try_recv(&self) -> Result<SmartMessage<T>, TryRecvError> {
        let msg = self.rx.try_recv()?;
        self.update_latency(&msg);
        Ok(msg)
    }

    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SmartMessage<T>, RecvTimeoutError> {
        let msg = self.rx.recv_timeout(timeout)?;
        self.update_latency(&msg);
        Ok(msg)
    }

    fn update_latency(&self, msg: &SmartMessage<T>) {
        let latency_nanos = msg.time.elapsed().as_nanos() as u64;
        self.stats.latency_nanos.store(latency_nanos, Relaxed);
    }

    /// Is the channel currently empty of messages?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Number of messages in the channel right now.
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Latest known latency from sending a message to receiving it, it nanoseconds.
    pub fn latency_nanos(&self) -> u64 {
        self.stats.latency_nanos.load(Relaxed)
    }

    /// Number of messages the senders gave up on because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Relaxed)
    }
}
