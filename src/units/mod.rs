//! The three worker pools that make up kuang: [`generator`], [`xfr`], and
//! [`scanner`].
//!
//! Each pool shares the same shape: a bounded command queue shared by every
//! worker in the pool, an active flag, and a worker count that can grow or
//! shrink while running (`start_one`/`stop_one`). A `tokio::task` is the
//! unit of concurrency, and a `tokio::sync::mpsc` channel (guarded by a
//! `tokio::sync` mutex so every worker task can poll it) is the command
//! queue each worker checks between units of work.

pub mod generator;
pub mod scanner;
pub mod xfr;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::warn;

use crate::comms::{Cmd, Message, Payload};

/// How long a worker sleeps on a bare `Pause` with no duration attached.
const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// The duration a `Cmd::Pause` message asks its worker to sleep for, taken
/// from an attached `Payload::Int` (seconds) if present.
pub fn pause_duration(msg: &Message) -> Duration {
    match msg.payload {
        Some(Payload::Int(secs)) if secs > 0 => Duration::from_secs(secs as u64),
        _ => DEFAULT_PAUSE,
    }
}

/// How many times [`retry_on_lock`] re-enqueues a call that failed with
/// [`kuang_store::DbError::Lock`] before giving up and returning the error.
const LOCK_RETRY_LIMIT: u32 = 5;

/// How long [`retry_on_lock`] waits between re-enqueuing attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Run a blocking store call on the blocking thread pool, re-enqueuing it
/// when it fails with [`kuang_store::DbError::Lock`] instead of letting the
/// caller drop the work on the floor.
///
/// `call` is cloned for each attempt since [`tokio::task::spawn_blocking`]
/// needs a fresh `FnOnce` per task; it should be cheap to clone (an `Arc`
/// clone plus a few owned scalars/strings, in practice).
pub async fn retry_on_lock<T, F>(call: F) -> Result<T, kuang_store::DbError>
where
    F: Fn() -> Result<T, kuang_store::DbError> + Clone + Send + 'static,
    T: Send + 'static,
{
    let mut attempt = 0;
    loop {
        let attempt_call = call.clone();
        let result = tokio::task::spawn_blocking(move || attempt_call())
            .await
            .expect("blocking store task panicked");
        match result {
            Err(kuang_store::DbError::Lock(msg)) if attempt < LOCK_RETRY_LIMIT => {
                attempt += 1;
                warn!("store locked ({msg}), retrying ({attempt}/{LOCK_RETRY_LIMIT})");
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

/// A command queue shared by every worker task in a pool.
///
/// Workers poll it non-blockingly between units of work: a worker never
/// blocks waiting for a command, it only checks whether one has arrived.
pub struct CmdQueue {
    rx: AsyncMutex<mpsc::Receiver<Message>>,
}

impl CmdQueue {
    /// Create a queue and its sending half, with capacity sized for
    /// `worker_capacity` in-flight per-worker commands.
    pub fn channel(worker_capacity: usize) -> (mpsc::Sender<Message>, Arc<CmdQueue>) {
        let (tx, rx) = mpsc::channel(worker_capacity.max(1));
        (
            tx,
            Arc::new(CmdQueue {
                rx: AsyncMutex::new(rx),
            }),
        )
    }

    /// Poll for a command without blocking.
    pub async fn try_recv(&self) -> Option<Message> {
        self.rx.lock().await.try_recv().ok()
    }
}

/// Tracks how many workers are currently running in a pool, and whether the
/// pool as a whole should be considered active.
#[derive(Default)]
pub struct PoolState {
    active: std::sync::atomic::AtomicBool,
    wcnt: AtomicU32,
}

impl PoolState {
    pub fn new(wcnt: u32) -> Self {
        Self {
            active: std::sync::atomic::AtomicBool::new(false),
            wcnt: AtomicU32::new(wcnt),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, value: bool) {
        self.active.store(value, Ordering::SeqCst);
    }

    pub fn worker_count(&self) -> u32 {
        self.wcnt.load(Ordering::SeqCst)
    }

    pub fn incr(&self) -> u32 {
        self.wcnt.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn decr(&self) -> u32 {
        self.wcnt.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// A point-in-time snapshot of this pool's active flag and worker count.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            active: self.is_active(),
            worker_count: self.worker_count(),
        }
    }
}

/// A point-in-time snapshot of a worker pool, for [`crate::nexus::Nexus::status`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    pub active: bool,
    pub worker_count: u32,
}

/// Send a single [`Cmd::Stop`] message, used by `stop_one`.
pub async fn send_stop_one(cmd_tx: &mpsc::Sender<Message>) {
    let _ = cmd_tx.send(Message::new(Cmd::StopOne)).await;
}
