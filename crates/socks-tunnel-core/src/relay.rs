//! Bidirectional relay with joint cancellation.
//!
//! Two copy loops run as separate tasks, one per direction. The first
//! direction to see end-of-stream or an I/O error cancels the relay's
//! token; the other direction stops after its current chunk. A chunk that
//! has already been read is always written out whole, so a peer that
//! half-closes but keeps reading never sees a torn chunk. Both task
//! handles are joined before [`relay`] returns, and the reassembled
//! streams are handed back to the caller, which is the only closer.
//!
//! ```text
//!   a.read ---> b.write     (a_to_b task)
//!   b.read ---> a.write     (b_to_a task)
//!        \         /
//!      CancellationToken  <-- first direction to end, or idle watchdog
//! ```

use crate::{Result, TunnelError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

const BUFFER_SIZE: usize = 16 * 1024;

/// How one direction of a relay ended.
#[derive(Debug)]
pub enum DirectionOutcome {
    /// The source reached end-of-stream.
    Completed { bytes: u64 },
    /// Stopped because the other direction ended first, or the relay went idle.
    Cancelled { bytes: u64 },
    /// Reading the source or writing the destination failed.
    Errored { bytes: u64, cause: std::io::Error },
}

impl DirectionOutcome {
    /// Bytes forwarded in this direction before it stopped.
    pub fn bytes(&self) -> u64 {
        match self {
            DirectionOutcome::Completed { bytes }
            | DirectionOutcome::Cancelled { bytes }
            | DirectionOutcome::Errored { bytes, .. } => *bytes,
        }
    }

    pub fn error(&self) -> Option<&std::io::Error> {
        match self {
            DirectionOutcome::Errored { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Terminal outcome of both directions.
#[derive(Debug)]
pub struct RelayOutcome {
    pub a_to_b: DirectionOutcome,
    pub b_to_a: DirectionOutcome,
}

/// Streams returned by [`relay`] once both directions have stopped.
pub struct Relayed<A, B> {
    pub a: A,
    pub b: B,
    pub outcome: RelayOutcome,
}

/// Copy bytes between `a` and `b` until either direction ends.
///
/// Returns only after both directions have stopped. The streams are not
/// shut down here; closing them is the caller's job.
///
/// # Arguments
/// * `a` - Client-facing stream
/// * `b` - Upstream-facing stream
/// * `idle_timeout` - Cancel the relay after this long without traffic.
///   Also bounds the write of each chunk, so a destination that stops
///   reading cannot hold the relay open past it.
///
/// # Errors
/// * `TunnelError::Internal` - A direction task panicked or was aborted;
///   the streams it owned are already dropped.
pub async fn relay<A, B>(a: A, b: B, idle_timeout: Option<Duration>) -> Result<Relayed<A, B>>
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let cancel = CancellationToken::new();
    let activity = Arc::new(Activity::new());

    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let a_to_b = tokio::spawn(copy_direction(
        a_read,
        b_write,
        cancel.clone(),
        Arc::clone(&activity),
        idle_timeout,
    ));
    let b_to_a = tokio::spawn(copy_direction(
        b_read,
        a_write,
        cancel.clone(),
        Arc::clone(&activity),
        idle_timeout,
    ));

    let watchdog = async {
        if let Some(limit) = idle_timeout {
            watch_idle(limit, &activity, &cancel).await;
        }
    };

    let (a_to_b, b_to_a, ()) = tokio::join!(a_to_b, b_to_a, watchdog);

    let (a_read, b_write, a_to_b) = a_to_b.map_err(join_error)?;
    let (b_read, a_write, b_to_a) = b_to_a.map_err(join_error)?;

    Ok(Relayed {
        a: a_read.unsplit(a_write),
        b: b_read.unsplit(b_write),
        outcome: RelayOutcome { a_to_b, b_to_a },
    })
}

fn join_error(e: tokio::task::JoinError) -> TunnelError {
    TunnelError::Internal(format!("relay task failed: {e}"))
}

/// One direction: read from `reader`, write to `writer`, until end-of-stream,
/// an error, or cancellation. Cancellation is only observed between chunks.
///
/// Cancels the relay on the way out, including when the task unwinds.
async fn copy_direction<R, W>(
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    cancel: CancellationToken,
    activity: Arc<Activity>,
    write_limit: Option<Duration>,
) -> (ReadHalf<R>, WriteHalf<W>, DirectionOutcome)
where
    R: AsyncRead + AsyncWrite,
    W: AsyncRead + AsyncWrite,
{
    let _cancel_on_exit = cancel.clone().drop_guard();
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut bytes = 0u64;

    let outcome = loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => break DirectionOutcome::Cancelled { bytes },
            read = reader.read(&mut buf) => match read {
                Ok(0) => break DirectionOutcome::Completed { bytes },
                Ok(n) => n,
                Err(cause) => break DirectionOutcome::Errored { bytes, cause },
            },
        };
        activity.touch();

        let chunk = &buf[..n];
        let write = async {
            writer.write_all(chunk).await?;
            writer.flush().await
        };
        let written = match write_limit {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(written) => written,
                Err(_) => break DirectionOutcome::Cancelled { bytes },
            },
            None => write.await,
        };
        if let Err(cause) = written {
            break DirectionOutcome::Errored { bytes, cause };
        }
        bytes += n as u64;
        activity.touch();
    };

    (reader, writer, outcome)
}

/// Cancel the relay once nothing has moved for `limit`.
async fn watch_idle(limit: Duration, activity: &Activity, cancel: &CancellationToken) {
    loop {
        let idle = activity.idle_for();
        if idle >= limit {
            cancel.cancel();
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(limit - idle) => {}
        }
    }
}

/// Last time any byte moved through the relay.
struct Activity {
    started: Instant,
    last_millis: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}
