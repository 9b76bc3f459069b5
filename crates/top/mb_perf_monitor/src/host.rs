//! What the monitor needs from the host application: a clock, a per-frame
//! callback and repeating timers.
//!
//! Each comes with a real implementation and, where it matters for
//! deterministic tests, a manual one.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use web_time::{Instant, SystemTime, UNIX_EPOCH};

// ----------------------------------------------------------------------------
// Clock

pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since some fixed origin.
    fn now_ms(&self) -> f64;

    /// Wall-clock milliseconds since the unix epoch. Only used for session ids.
    fn unix_time_ms(&self) -> u64;
}

/// Wall time, with the origin at construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn unix_time_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since_epoch| since_epoch.as_millis() as u64)
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now_ms: Mutex<f64>,
    unix_origin_ms: u64,
}

impl ManualClock {
    pub fn new(unix_origin_ms: u64) -> Self {
        Self {
            now_ms: Mutex::new(0.0),
            unix_origin_ms,
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now_ms.lock() += by.as_secs_f64() * 1000.0;
    }

    pub fn advance_ms(&self, ms: f64) {
        *self.now_ms.lock() += ms;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now_ms.lock()
    }

    fn unix_time_ms(&self) -> u64 {
        self.unix_origin_ms + self.now_ms() as u64
    }
}

// ----------------------------------------------------------------------------
// Frames

pub type FrameCallback = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameRequestId(pub u64);

/// Calls back once, on the next rendered frame.
pub trait FrameSource: Send + Sync {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId;

    /// Does nothing if the request already fired or was cancelled.
    fn cancel_frame(&self, id: FrameRequestId);
}

/// A [`FrameSource`] driven by the host's render loop calling [`Self::present`].
#[derive(Default)]
pub struct FrameQueue {
    state: Mutex<FrameQueueState>,
}

#[derive(Default)]
struct FrameQueueState {
    next_id: u64,
    pending: Vec<(FrameRequestId, FrameCallback)>,
}

impl FrameQueue {
    /// Call once per rendered frame. Returns how many callbacks ran.
    ///
    /// Callbacks requested while presenting run on the next call.
    pub fn present(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock().pending);
        let count = pending.len();
        for (_, callback) in pending {
            callback();
        }
        count
    }

    /// Number of callbacks waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl FrameSource for FrameQueue {
    fn request_frame(&self, callback: FrameCallback) -> FrameRequestId {
        let mut state = self.state.lock();
        let id = FrameRequestId(state.next_id);
        state.next_id += 1;
        state.pending.push((id, callback));
        id
    }

    fn cancel_frame(&self, id: FrameRequestId) {
        self.state
            .lock()
            .pending
            .retain(|(pending_id, _)| *pending_id != id);
    }
}

// ----------------------------------------------------------------------------
// Timers

pub type TimerCallback = Box<dyn FnMut() + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Calls back every `interval` until cancelled.
pub trait IntervalTimer: Send + Sync {
    fn schedule_repeating(&self, interval: Duration, callback: TimerCallback) -> TimerHandle;

    /// Once this returns the callback is not running and will not run again.
    fn cancel(&self, handle: TimerHandle);
}

/// One background thread per timer, ticking on a [`crossbeam::channel::tick`].
#[derive(Default)]
pub struct ThreadTimer {
    next_id: AtomicU64,
    timers: Mutex<HashMap<u64, TimerThread>>,
}

struct TimerThread {
    /// Dropping this stops the thread.
    cancel_tx: crossbeam::channel::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

impl IntervalTimer for ThreadTimer {
    fn schedule_repeating(&self, interval: Duration, mut callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (cancel_tx, cancel_rx) = crossbeam::channel::bounded::<()>(0);

        let spawned = std::thread::Builder::new()
            .name(format!("perf_timer_{}", handle.0))
            .spawn(move || {
                let ticker = crossbeam::channel::tick(interval);
                loop {
                    crossbeam::channel::select! {
                        recv(ticker) -> _ => callback(),
                        recv(cancel_rx) -> _ => break,
                    }
                }
            });

        match spawned {
            Ok(thread) => {
                self.timers
                    .lock()
                    .insert(handle.0, TimerThread { cancel_tx, thread });
            }
            Err(err) => {
                mb_log::warn!("Failed to spawn timer thread, the timer will never fire: {err}");
            }
        }

        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        let Some(TimerThread { cancel_tx, thread }) = self.timers.lock().remove(&handle.0) else {
            return;
        };
        drop(cancel_tx);

        // Cancelling from inside the callback must not wait for itself.
        if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
            mb_log::warn!("Timer thread panicked");
        }
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        let handles: Vec<u64> = self.timers.lock().keys().copied().collect();
        for handle in handles {
            self.cancel(TimerHandle(handle));
        }
    }
}

/// Fires only when [`Self::advance`] is called.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualTimerState>,
}

#[derive(Default)]
struct ManualTimerState {
    next_id: u64,
    timers: BTreeMap<u64, ManualTimerEntry>,
}

struct ManualTimerEntry {
    interval: Duration,
    elapsed: Duration,
    callback: TimerCallback,
}

impl ManualTimer {
    /// Lets `by` pass, firing every timer that comes due, possibly several times.
    ///
    /// Timers fire in the order they were scheduled. Callbacks must not
    /// schedule or cancel timers on this same [`ManualTimer`].
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        for entry in state.timers.values_mut() {
            if entry.interval.is_zero() {
                continue;
            }
            entry.elapsed += by;
            while entry.elapsed >= entry.interval {
                entry.elapsed -= entry.interval;
                (entry.callback)();
            }
        }
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IntervalTimer for ManualTimer {
    fn schedule_repeating(&self, interval: Duration, callback: TimerCallback) -> TimerHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timers.insert(
            id,
            ManualTimerEntry {
                interval,
                elapsed: Duration::ZERO,
                callback,
            },
        );
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.state.lock().timers.remove(&handle.0);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let reader = {
            let count = Arc::clone(&count);
            move || count.load(Ordering::SeqCst)
        };
        (count, reader)
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_ms(), 0.0);
        clock.advance(Duration::from_millis(120));
        clock.advance_ms(0.5);
        assert_eq!(clock.now_ms(), 120.5);
        assert_eq!(clock.unix_time_ms(), 1120);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::default();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(clock.unix_time_ms() > 0);
    }

    #[test]
    fn test_frame_queue_fires_once() {
        let queue = FrameQueue::default();
        let (count, fired) = counter();

        let c = Arc::clone(&count);
        queue.request_frame(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(queue.present(), 1);
        assert_eq!(queue.present(), 0);
        assert_eq!(fired(), 1);
    }

    #[test]
    fn test_frame_queue_cancel() {
        let queue = FrameQueue::default();
        let (count, fired) = counter();

        let c = Arc::clone(&count);
        let id = queue.request_frame(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        queue.cancel_frame(id);

        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.present(), 0);
        assert_eq!(fired(), 0);
    }

    #[test]
    fn test_frame_queue_rerequest_runs_next_frame() {
        let queue = Arc::new(FrameQueue::default());
        let (count, fired) = counter();

        let q = Arc::clone(&queue);
        let c = Arc::clone(&count);
        queue.request_frame(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c = Arc::clone(&c);
            q.request_frame(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        queue.present();
        assert_eq!(fired(), 1);
        assert_eq!(queue.pending(), 1);
        queue.present();
        assert_eq!(fired(), 2);
    }

    #[test]
    fn test_manual_timer_fires_every_interval() {
        let timer = ManualTimer::default();
        let (count, fired) = counter();

        let c = Arc::clone(&count);
        let handle = timer.schedule_repeating(
            Duration::from_millis(100),
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        timer.advance(Duration::from_millis(50));
        assert_eq!(fired(), 0);
        timer.advance(Duration::from_millis(50));
        assert_eq!(fired(), 1);
        timer.advance(Duration::from_millis(350));
        assert_eq!(fired(), 4);

        timer.cancel(handle);
        assert!(timer.is_empty());
        timer.advance(Duration::from_secs(1));
        assert_eq!(fired(), 4);
    }

    #[test]
    fn test_thread_timer_stops_after_cancel() {
        let timer = ThreadTimer::default();
        let (count, fired) = counter();

        let c = Arc::clone(&count);
        let handle = timer.schedule_repeating(
            Duration::from_millis(5),
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while fired() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(fired() >= 2);

        timer.cancel(handle);
        let after_cancel = fired();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(fired(), after_cancel);
    }
}
