//! Per-connection session state machine.
//!
//! A session owns exactly one stream and drives the fixed-frame cycle on it
//! until an I/O error, end-of-stream, or an explicit stop. Two variants exist:
//!
//! - **Echo** (server): reads a frame and queues its echo, then starts the
//!   next read without waiting for the echo write to finish.
//! - **Heartbeat** (client): writes the heartbeat payload, waits for the
//!   reply, and only then writes again.
//!
//! Every I/O step is raced against the session's stop signal, so once a
//! session is `Stopped` nothing further is issued on its stream.

use crate::frame::{self, FrameBuf, FRAME_LEN, HEARTBEAT};
use crate::metrics::ServerMetrics;
use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a connect attempt to succeed.
    Connecting,
    /// Connected and pumping frames.
    Active,
    /// Terminal. No further I/O is issued.
    Stopped,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::Connecting => 0,
            SessionState::Active => 1,
            SessionState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Active,
            _ => SessionState::Stopped,
        }
    }
}

/// Shared handle to a session's state and stop signal.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct SessionControl {
    inner: Arc<ControlInner>,
}

#[derive(Debug)]
struct ControlInner {
    state: AtomicU8,
    stop_tx: watch::Sender<bool>,
}

impl SessionControl {
    /// Create a control in the `Connecting` state.
    pub fn new() -> Self {
        Self::with_state(SessionState::Connecting)
    }

    /// Create a control for an already accepted connection.
    pub fn accepted() -> Self {
        Self::with_state(SessionState::Active)
    }

    fn with_state(state: SessionState) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                state: AtomicU8::new(state.as_u8()),
                stop_tx,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SessionState::Stopped
    }

    /// Transition `Connecting -> Active`.
    ///
    /// Returns `false` if the session was not connecting (already active or
    /// stopped).
    pub fn activate(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                SessionState::Connecting.as_u8(),
                SessionState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Stop the session.
    ///
    /// Wakes every operation suspended in [`until_stopped`](Self::until_stopped).
    /// Returns `true` only for the call that performed the transition;
    /// later calls have no effect.
    pub fn stop(&self) -> bool {
        let previous = self
            .inner
            .state
            .swap(SessionState::Stopped.as_u8(), Ordering::AcqRel);
        if previous == SessionState::Stopped.as_u8() {
            return false;
        }
        self.inner.stop_tx.send_replace(true);
        true
    }

    /// Resolve once the session has been stopped.
    pub async fn stopped(&self) {
        let mut rx = self.inner.stop_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Run `fut` unless the session stops first.
    ///
    /// Returns `None` without polling `fut` if the session is already
    /// stopped, and drops `fut` mid-flight if a stop arrives.
    pub async fn until_stopped<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_stopped() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.stopped() => None,
            out = fut => Some(out),
        }
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a server echo session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EchoSummary {
    /// Reads that returned data (complete or short)
    pub frames_read: u64,
    /// Reads shorter than a full frame
    pub short_frames: u64,
    /// Echo writes that completed
    pub frames_written: u64,
}

#[derive(Debug, Default)]
struct ReadStats {
    frames_read: u64,
    short_frames: u64,
}

/// Run the server side of a connection.
///
/// Reads and echo writes are pipelined: each frame read is handed to the
/// writer through a queue of up to `pipeline_depth` frames and the next read
/// starts immediately. On end-of-stream the queued echoes are written before
/// the session stops; on any I/O error it stops at once.
pub async fn run_echo<S>(
    stream: S,
    control: SessionControl,
    metrics: Arc<ServerMetrics>,
    pipeline_depth: usize,
) -> EchoSummary
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(pipeline_depth.max(1));

    let (read_stats, frames_written) = tokio::join!(
        echo_reader(&mut reader, tx, &control, &metrics),
        echo_writer(&mut writer, rx, &control),
    );
    control.stop();

    let summary = EchoSummary {
        frames_read: read_stats.frames_read,
        short_frames: read_stats.short_frames,
        frames_written,
    };
    debug!(?summary, "Echo session finished");
    summary
}

async fn echo_reader<R>(
    reader: &mut R,
    tx: mpsc::Sender<Bytes>,
    control: &SessionControl,
    metrics: &ServerMetrics,
) -> ReadStats
where
    R: AsyncRead + Unpin,
{
    let mut buf: FrameBuf = [0u8; FRAME_LEN];
    let mut stats = ReadStats::default();

    loop {
        let len = match control.until_stopped(frame::read_frame(reader, &mut buf)).await {
            None => break,
            Some(Ok(0)) => {
                trace!("Peer closed connection");
                break;
            }
            Some(Ok(len)) => len,
            Some(Err(e)) => {
                debug!(error = %e, "Read failed");
                control.stop();
                break;
            }
        };

        stats.frames_read += 1;
        if frame::is_complete(len) {
            metrics.record_request();
        } else {
            stats.short_frames += 1;
            warn!(len, expected = FRAME_LEN, "Short frame");
        }

        match control
            .until_stopped(tx.send(frame::echo_payload(&buf, len)))
            .await
        {
            Some(Ok(())) => {}
            // Stopped, or the writer is gone after a failed write
            _ => break,
        }
    }

    stats
}

async fn echo_writer<W>(
    writer: &mut W,
    mut rx: mpsc::Receiver<Bytes>,
    control: &SessionControl,
) -> u64
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;

    loop {
        let payload = match control.until_stopped(rx.recv()).await {
            Some(Some(payload)) => payload,
            _ => break,
        };

        match control.until_stopped(writer.write_all(&payload)).await {
            Some(Ok(())) => written += 1,
            Some(Err(e)) => {
                debug!(error = %e, "Echo write failed");
                control.stop();
                break;
            }
            None => break,
        }
    }

    written
}

/// Outcome of a client heartbeat session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSummary {
    /// Rounds that got a full-frame reply
    pub exchanges: u64,
    /// Replies shorter than a full frame
    pub short_frames: u64,
    /// Full replies that differed from the heartbeat payload
    pub mismatches: u64,
}

/// Run the client side of a connection.
///
/// Writes [`HEARTBEAT`], waits for the reply, and repeats. The write always
/// completes before the next read is issued. With `limit` set the session
/// stops itself after that many exchanges.
pub async fn run_heartbeat<S>(
    mut stream: S,
    control: &SessionControl,
    limit: Option<u64>,
) -> HeartbeatSummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut summary = HeartbeatSummary::default();
    let mut buf: FrameBuf = [0u8; FRAME_LEN];

    loop {
        if limit.is_some_and(|max| summary.exchanges >= max) {
            debug!(exchanges = summary.exchanges, "Heartbeat limit reached");
            control.stop();
            break;
        }

        match control.until_stopped(stream.write_all(&HEARTBEAT)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(error = %e, "Error on heartbeat");
                control.stop();
                break;
            }
            None => break,
        }

        match control
            .until_stopped(frame::read_frame(&mut stream, &mut buf))
            .await
        {
            Some(Ok(0)) => {
                debug!("Server closed connection");
                control.stop();
                break;
            }
            Some(Ok(len)) => {
                if !frame::is_complete(len) {
                    summary.short_frames += 1;
                    warn!(len, expected = FRAME_LEN, "Short frame");
                    continue;
                }
                summary.exchanges += 1;
                if buf != HEARTBEAT {
                    summary.mismatches += 1;
                    warn!(reply = ?&buf[..], "Echo does not match heartbeat");
                }
            }
            Some(Err(e)) => {
                debug!(error = %e, "Error on receive");
                control.stop();
                break;
            }
            None => break,
        }
    }

    debug!(?summary, "Heartbeat session finished");
    summary
}
