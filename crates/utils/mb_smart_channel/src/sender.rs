use std::sync::{Arc, atomic::Ordering::Relaxed};

use web_time::Instant;

use crate::{
    FlushError, SendError, SharedStats, SmartMessage, SmartMessagePayload, SmartMessageSource,
    TrySendError,
};

pub struct Sender<T: Send> {
    tx: crossbeam::channel::Sender<SmartMessage<T>>,
    source: SmartMessageSource,
    stats: Arc<SharedStats>,
}

// Not derived: that would require `T: Clone`.
impl<T: Send> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.clone_as(self.source)
    }
}

impl<T: Send> Sender<T> {
    pub(crate) fn new(
        tx: crossbeam::channel::Sender<SmartMessage<T>>,
        source: SmartMessageSource,
        stats: Arc<SharedStats>,
    ) -> Self {
        Self { tx, source, stats }
    }

    /// Clones the sender with an updated source.
    pub fn clone_as(&self, source: SmartMessageSource) -> Self {
        Self {
            tx: self.tx.clone(),
            source,
            stats: Arc::clone(&self.stats),
        }
    }

    /// The source stamped on every message sent through this sender.
    #[inline]
    pub fn source(&self) -> SmartMessageSource {
        self.source
    }

    /// Sends a message, blocking while a bounded channel is full.
    pub fn send(&self, msg: T) -> Result<(), SendError<T>> {
        self.send_at(Instant::now(), self.source, SmartMessagePayload::Msg(msg))
            .map_err(|SendError(payload)| match payload {
                SmartMessagePayload::Msg(msg) => SendError(msg),
                SmartMessagePayload::Flush { .. } | SmartMessagePayload::Quit(_) => unreachable!(),
            })
    }

    /// Sends a message without blocking.
    ///
    /// If the channel is full the message is handed back and counted as dropped.
    pub fn try_send(&self, msg: T) -> Result<(), TrySendError<T>> {
        let smart_msg = SmartMessage {
            time: Instant::now(),
            source: self.source,
            payload: SmartMessagePayload::Msg(msg),
        };

        match self.tx.try_send(smart_msg) {
            Ok(()) => Ok(()),
            Err(crossbeam::channel::TrySendError::Full(smart_msg)) => {
                self.stats.dropped.fetch_add(1, Relaxed);
                Err(TrySendError::Full(unwrap_msg(smart_msg.payload)))
            }
            Err(crossbeam::channel::TrySendError::Disconnected(smart_msg)) => Err(
                TrySendError::Disconnected(unwrap_msg(smart_msg.payload)),
            ),
        }
    }

    /// Forwards a message as-is.
    pub fn send_at(
        &self,
        time: Instant,
        source: SmartMessageSource,
        payload: SmartMessagePayload<T>,
    ) -> Result<(), SendError<SmartMessagePayload<T>>> {
        // NOTE: We should never be sending a message with an unknown source.
        debug_assert!(!matches!(source, SmartMessageSource::Unknown));

        self.tx
            .send(SmartMessage {
                time,
                source,
                payload,
            })
            .map_err(|crossbeam::channel::SendError(msg)| SendError(msg.payload))
    }

    /// Blocks until all previously sent messages have been received.
    ///
    /// Note: This is only implemented for non-wasm targets since we cannot make
    /// blocking calls on web.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn flush_blocking(&self, timeout: std::time::Duration) -> Result<(), FlushError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(0); // oneshot
        self.tx
            .send(SmartMessage {
                time: Instant::now(),
                source: self.source,
                payload: SmartMessagePayload::Flush {
                    on_flush_done: Box::new(move || {
                        tx.send(()).ok();
                    }),
                },
            })
            .map_err(|_ignored| FlushError::Closed)?;

        rx.recv_timeout(timeout).map_err(|err| match err {
            std::sync::mpsc::RecvTimeoutError::Timeout => FlushError::Timeout,
            std::sync::mpsc::RecvTimeoutError::Disconnected => FlushError::Closed,
        })
    }

    /// Used to indicate that a sender has left.
    ///
    /// This sends a message down the channel allowing the receiving end to know whether one of the
    /// sender has left, and if so why (if applicable).
    ///
    /// Using a [`Sender`] after calling `quit` is undefined behavior: the receiving end is free
    /// to silently drop those messages (or worse).
    pub fn quit(
        &self,
        err: Option<Box<dyn std::error::Error + Send>>,
    ) -> Result<(), SendError<SmartMessage<T>>> {
        self.tx
            .send(SmartMessage {
                time: Instant::now(),
                source: self.source,
                payload: SmartMessagePayload::Quit(err),
            })
            .map_err(|crossbeam::channel::SendError(msg)| SendError(msg))
    }

    /// Is the channel currently empty of messages?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Number of messages in the channel right now.
    #[inline]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Latest known latency from sending a message to receiving it, it nanoseconds.
    pub fn latency_nanos(&self) -> u64 {
        self.stats.latency_nanos.load(Relaxed)
    }

    /// Latest known latency from sending a message to receiving it,
    /// in seconds
    pub fn latency_sec(&self) -> f32 {
        self.latency_nanos() as f32 / 1e9
    }

    /// Number of messages dropped by [`Self::try_send`] because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Relaxed)
    }
}

fn unwrap_msg<T: Send>(payload: SmartMessagePayload<T>) -> T {
    match payload {
        SmartMessagePayload::Msg(msg) => msg,
        SmartMessagePayload::Flush { .. } | SmartMessagePayload::Quit(_) => unreachable!(),
    }
}
