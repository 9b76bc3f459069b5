//! The thread that owns all mutation of one session.
//!
//! Every producer (the caller marking operations, the three samplers, the
//! monitor itself) sends [`SessionWrite`]s down one bounded
//! [`mb_smart_channel`]. A single thread applies them in arrival order, so each
//! log of the session is appended to by exactly one writer.

use std::sync::Arc;
use std::time::Duration;

use mb_perf_session::{
    BlockProcessingEvent, ChunkProcessingEvent, FpsSample, FrameRecord, MemorySnapshot, Metadata,
    OperationId, RendererStatSample, Session, SessionId, TimingEvent,
};
use mb_smart_channel::{Receiver, Sender, SmartMessagePayload, SmartMessageSource};
use parking_lot::RwLock;

/// One mutation of a [`Session`].
#[derive(Debug)]
pub(crate) enum SessionWrite {
    MemorySnapshot(MemorySnapshot),
    OperationStarted(TimingEvent),
    OperationEnded { id: OperationId, end_time: f64 },
    OperationDetails { name: String, details: Metadata },
    Block(BlockProcessingEvent),
    Chunk(ChunkProcessingEvent),
    Frame(FrameRecord),
    RendererStats(RendererStatSample),
    Fps(FpsSample),
}

fn apply(session: &mut Session, write: SessionWrite) {
    match write {
        SessionWrite::MemorySnapshot(snapshot) => session.push_memory_snapshot(snapshot),
        SessionWrite::OperationStarted(event) => session.begin_operation(event),
        SessionWrite::OperationEnded { id, end_time } => {
            if session.complete_operation(id, end_time).is_none() {
                mb_log::debug!(
                    "Operation {id:?} is not open in session {}; it was probably started before the session",
                    session.id
                );
            }
        }
        SessionWrite::OperationDetails { name, details } => {
            if !session.annotate_operation(&name, details) {
                mb_log::warn!("Cannot record details for unknown operation {name:?}");
            }
        }
        SessionWrite::Block(event) => session.push_block_event(event),
        SessionWrite::Chunk(event) => session.push_chunk_event(event),
        SessionWrite::Frame(frame) => session.push_frame(frame),
        SessionWrite::RendererStats(sample) => session.push_renderer_stats(sample),
        SessionWrite::Fps(sample) => session.push_fps_sample(sample),
    }
}

// ----------------------------------------------------------------------------

pub(crate) struct SessionWriter {
    tx: Sender<SessionWrite>,
    flush_timeout: Duration,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SessionWriter {
    /// Spawns the writer thread of `session`.
    ///
    /// With `capacity` writes pending, [`Self::send`] blocks and
    /// [`Sender::try_send`] drops.
    pub fn spawn(
        id: &SessionId,
        session: Arc<RwLock<Session>>,
        capacity: usize,
        flush_timeout: Duration,
    ) -> Self {
        let (tx, rx) =
            mb_smart_channel::smart_channel(SmartMessageSource::Engine, Some(capacity.max(1)));

        let thread = std::thread::Builder::new()
            .name("perf_session_writer".to_owned())
            .spawn({
                let id = id.clone();
                move || Self::writer_loop(&id, &rx, &session)
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(err) => {
                mb_log::error!("Failed to spawn the writer of session {id}, nothing will be recorded: {err}");
                None
            }
        };

        Self {
            tx,
            flush_timeout,
            thread,
        }
    }

    /// A sender that stamps its writes with `source`.
    pub fn sender(&self, source: SmartMessageSource) -> Sender<SessionWrite> {
        self.tx.clone_as(source)
    }

    /// Queues a write on behalf of the caller, blocking while the queue is full.
    pub fn send(&self, source: SmartMessageSource, write: SessionWrite) {
        let result = self.tx.send_at(
            web_time::Instant::now(),
            source,
            SmartMessagePayload::Msg(write),
        );
        if result.is_err() {
            mb_log::warn_once!("Session writer is gone; dropping writes");
        }
    }

    /// Blocks until everything sent so far has been applied.
    pub fn flush(&self) {
        if self.thread.is_none() {
            return;
        }
        if let Err(err) = self.tx.flush_blocking(self.flush_timeout) {
            mb_log::warn!("Session writer did not catch up: {err}");
        }
    }

    /// Writes that samplers gave up on because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.tx.dropped()
    }

    /// Applies everything still queued, then stops the thread.
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.tx.quit(None).is_err() {
            mb_log::debug!("Session writer already exited");
        }
        if thread.join().is_err() {
            mb_log::error!("Session writer panicked");
        }
    }

    fn writer_loop(id: &SessionId, rx: &Receiver<SessionWrite>, session: &RwLock<Session>) {
        mb_log::debug!("Writer of session {id} started");

        while let Ok(msg) = rx.recv() {
            match msg.payload {
                SmartMessagePayload::Msg(write) => apply(&mut session.write(), write),
                SmartMessagePayload::Flush { on_flush_done } => on_flush_done(),
                SmartMessagePayload::Quit(err) => {
                    if let Some(err) = err {
                        mb_log::warn!("Writer of session {id} told to quit: {err}");
                    }
                    break;
                }
            }
        }

        let dropped = rx.dropped();
        if dropped > 0 {
            mb_log::warn!("Session {id} dropped {dropped} background samples: the writer fell behind");
        }
        mb_log::debug!("Writer of session {id} exiting");
    }
}

impl Drop for SessionWriter {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

#[cfg(test)]
mod tests {
    use mb_perf_session::{MemoryReading, RenderMode, SessionLimits};

    use super::*;

    fn session() -> (SessionId, Arc<RwLock<Session>>) {
        let id = SessionId::from("writer_1_abc");
        let session = Session::new(
            id.clone(),
            "writer",
            RenderMode::Incremental,
            1,
            0.0,
            SessionLimits::default(),
        );
        (id, Arc::new(RwLock::new(session)))
    }

    #[test]
    fn test_flush_makes_writes_visible() {
        let (id, session) = session();
        let writer = SessionWriter::spawn(&id, Arc::clone(&session), 16, Duration::from_secs(5));

        writer.send(
            SmartMessageSource::Caller,
            SessionWrite::OperationStarted(TimingEvent::open(
                OperationId(0),
                "build",
                1.0,
                None,
                Metadata::new(),
            )),
        );
        writer.send(
            SmartMessageSource::Caller,
            SessionWrite::OperationEnded {
                id: OperationId(0),
                end_time: 121.0,
            },
        );
        writer.flush();

        let session = session.read();
        assert_eq!(session.timing_events.len(), 1);
        assert_eq!(session.timing_events[0].duration, Some(120.0));
    }

    #[test]
    fn test_shutdown_drains_the_queue() {
        let (id, session) = session();
        let writer = SessionWriter::spawn(&id, Arc::clone(&session), 64, Duration::from_secs(5));

        let frames = writer.sender(SmartMessageSource::FrameLoop);
        for i in 0..20 {
            frames
                .send(SessionWrite::Frame(FrameRecord::new(f64::from(i) * 16.0, 16.0)))
                .unwrap();
        }
        writer.send(
            SmartMessageSource::Engine,
            SessionWrite::MemorySnapshot(MemorySnapshot::new(
                400.0,
                MemoryReading::default(),
                0,
                "session_end",
            )),
        );
        writer.shutdown();

        let session = session.read();
        assert_eq!(session.frame_records.len(), 20);
        assert_eq!(session.memory_snapshots[0].label, "session_end");
    }

    #[test]
    fn test_details_for_unknown_operation_are_ignored() {
        let (id, session) = session();
        let writer = SessionWriter::spawn(&id, Arc::clone(&session), 4, Duration::from_secs(5));

        writer.send(
            SmartMessageSource::Caller,
            SessionWrite::OperationDetails {
                name: "missing".to_owned(),
                details: Metadata::new(),
            },
        );
        writer.shutdown();

        assert!(session.read().timing_events.is_empty());
    }
}
