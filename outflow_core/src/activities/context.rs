use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a running activity can see of its host engine.
pub trait ActivityContext: Send + Sync {
    /// Report liveness; engines fail attempts whose heartbeats stop.
    fn heartbeat(&self, details: Value);

    /// Cooperative cancellation flag, polled once per batch/chunk.
    fn is_cancelled(&self) -> bool;

    /// 1-based attempt number.
    fn attempt(&self) -> u32 {
        1
    }
}

/// Context for direct (engine-less) invocation: never cancelled, heartbeats dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivityContext;

impl ActivityContext for NoopActivityContext {
    fn heartbeat(&self, _details: Value) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Context handed out by [`crate::activities::LocalActivityExecutor`].
#[derive(Debug)]
pub struct LocalActivityContext {
    activity: &'static str,
    attempt: u32,
    cancel: CancellationToken,
    last_heartbeat: Mutex<Instant>,
    heartbeats: AtomicU64,
    last_details: Mutex<Value>,
}

impl LocalActivityContext {
    pub fn new(activity: &'static str, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            activity,
            attempt,
            cancel,
            last_heartbeat: Mutex::new(Instant::now()),
            heartbeats: AtomicU64::new(0),
            last_details: Mutex::new(Value::Null),
        }
    }

    pub fn since_last_heartbeat(&self) -> std::time::Duration {
        match self.last_heartbeat.lock() {
            Ok(t) => t.elapsed(),
            Err(poisoned) => poisoned.into_inner().elapsed(),
        }
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn last_details(&self) -> Value {
        match self.last_details.lock() {
            Ok(v) => v.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl ActivityContext for LocalActivityContext {
    fn heartbeat(&self, details: Value) {
        tracing::trace!(activity = self.activity, attempt = self.attempt, %details, "heartbeat");
        if let Ok(mut t) = self.last_heartbeat.lock() {
            *t = Instant::now();
        }
        if let Ok(mut d) = self.last_details.lock() {
            *d = details;
        }
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }
}
