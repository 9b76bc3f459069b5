//! A channel that keeps track of latency, queue length and dropped messages.
//!
//! Every message is stamped with the time it was sent and with the
//! [`SmartMessageSource`] that produced it, so the receiving end can tell which
//! producer is flooding it. Besides regular messages the channel carries two
//! control payloads: [`SmartMessagePayload::Flush`], used as a barrier by
//! [`Sender::flush_blocking`], and [`SmartMessagePayload::Quit`].

use std::sync::atomic::AtomicU64;

use web_time::Instant;

mod receiver;
mod sender;

pub use receiver::Receiver;
pub use sender::Sender;

pub use crossbeam::channel::{RecvError, RecvTimeoutError, TryRecvError};

/// Identifies who sent a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SmartMessageSource {
    /// Only used in tests, and as a placeholder.
    Unknown,

    /// Code calling into the public API, e.g. to mark an operation boundary.
    Caller,

    /// The per-frame sampling loop.
    FrameLoop,

    /// The fixed-interval memory sampler.
    MemorySampler,

    /// The fixed-interval FPS aggregator.
    FpsAggregator,

    /// Bookkeeping done by the owner of the channel itself (baseline snapshots etc).
    Engine,
}

impl std::fmt::Display for SmartMessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Caller => "caller",
            Self::FrameLoop => "frame_loop",
            Self::MemorySampler => "memory_sampler",
            Self::FpsAggregator => "fps_aggregator",
            Self::Engine => "engine",
        })
    }
}

pub struct SmartMessage<T: Send> {
    pub time: Instant,
    pub source: SmartMessageSource,
    pub payload: SmartMessagePayload<T>,
}

impl<T: Send> SmartMessage<T> {
    /// The contained message, if this is a regular message.
    pub fn into_data(self) -> Option<T> {
        match self.payload {
            SmartMessagePayload::Msg(msg) => Some(msg),
            SmartMessagePayload::Flush { .. } | SmartMessagePayload::Quit(_) => None,
        }
    }
}

pub enum SmartMessagePayload<T: Send> {
    /// A message sent down the channel.
    Msg(T),

    /// When received, flush anything already received and then call the given callback.
    Flush {
        on_flush_done: Box<dyn FnOnce() + Send>,
    },

    /// The [`Sender`] has quit.
    ///
    /// `None` indicates the sender left gracefully, an error indicates otherwise.
    Quit(Option<Box<dyn std::error::Error + Send>>),
}

impl<T: Send> std::fmt::Debug for SmartMessagePayload<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Msg(_) => f.write_str("Msg(_)"),
            Self::Flush { .. } => f.write_str("Flush"),
            Self::Quit(_) => f.write_str("Quit"),
        }
    }
}

/// Stats shared between all senders and the receiver of one channel.
#[derive(Default)]
pub(crate) struct SharedStats {
    /// Latest known latency from sending a message to receiving it, in nanoseconds.
    pub latency_nanos: AtomicU64,

    /// Messages given up on because the channel was full.
    pub dropped: AtomicU64,
}

/// The receiving end has hung up.
pub struct SendError<T>(pub T);

impl<T> std::fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SendError { .. }")
    }
}

impl<T> std::fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("sending on a disconnected channel")
    }
}

impl<T> std::error::Error for SendError<T> {}

/// A non-blocking send failed.
pub enum TrySendError<T> {
    /// The channel is at capacity. The message was dropped and counted.
    Full(T),

    /// The receiving end has hung up.
    Disconnected(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(msg) | Self::Disconnected(msg) => msg,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

impl<T> std::fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Disconnected(_) => f.write_str("Disconnected(..)"),
        }
    }
}

impl<T> std::fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(_) => f.write_str("sending on a full channel"),
            Self::Disconnected(_) => f.write_str("sending on a disconnected channel"),
        }
    }
}

impl<T> std::error::Error for TrySendError<T> {}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushError {
    #[error("Cannot flush: the receiving end is gone")]
    Closed,

    #[error("Flush timed out: the receiver did not process the queue in time")]
    Timeout,
}

/// Creates a new channel.
///
/// With `capacity == None` the channel is unbounded, otherwise [`Sender::send`]
/// blocks and [`Sender::try_send`] drops once `capacity` messages are queued.
pub fn smart_channel<T: Send>(
    source: SmartMessageSource,
    capacity: Option<usize>,
) -> (Sender<T>, Receiver<T>) {
    let stats = std::sync::Arc::new(SharedStats::default());
    let (tx, rx) = match capacity {
        Some(capacity) => crossbeam::channel::bounded(capacity),
        None => crossbeam::channel::unbounded(),
    };
    let sender = Sender::new(tx, source, std::sync::Arc::clone(&stats));
    let receiver = Receiver::new(rx, stats);
    (sender, receiver)
}
