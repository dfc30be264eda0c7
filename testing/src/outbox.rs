//! In-memory outbox store and a configurable flaky effect executor.

use chrono::Utc;
use flashdrop_core::outbox::{
    ExecuteError, MAX_OUTBOX_RETRIES, OutboxError, OutboxEvent, OutboxExecutor, OutboxStatus,
    OutboxStore,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// In-memory [`OutboxStore`] mirroring the relational table's selection and
/// retry-cap rules.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxEvent>>,
    next_id: AtomicI64,
}

impl InMemoryOutboxStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a PENDING row, as the business transaction would. Returns the
    /// row id.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn enqueue(&self, event_type: impl Into<String>, payload: Vec<u8>) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.rows.lock().unwrap().push(OutboxEvent {
            id,
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
        });
        id
    }

    /// Snapshot a row by id.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn row(&self, id: i64) -> Option<OutboxEvent> {
        self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> OutboxError {
    OutboxError::Store("outbox mutex poisoned".to_string())
}

impl OutboxStore for InMemoryOutboxStore {
    fn fetch_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let rows = self.rows.lock().map_err(poisoned)?;
            Ok(rows
                .iter()
                .filter(|r| r.status == OutboxStatus::Pending)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn fetch_retryable_failed(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let rows = self.rows.lock().map_err(poisoned)?;
            Ok(rows
                .iter()
                .filter(|r| r.status == OutboxStatus::Failed && r.retry_count < MAX_OUTBOX_RETRIES)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn mark_processed(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().map_err(poisoned)?;
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.status = OutboxStatus::Processed;
            }
            Ok(())
        })
    }

    fn record_failure(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().map_err(poisoned)?;
            let Some(row) = rows.iter_mut().find(|r| r.id == id) else {
                return Err(OutboxError::Store(format!("no outbox row {id}")));
            };
            row.status = OutboxStatus::Failed;
            row.retry_count = (row.retry_count + 1).min(MAX_OUTBOX_RETRIES);
            Ok(row.retry_count)
        })
    }
}

/// An [`OutboxExecutor`] that fails its first `failures` executions and
/// succeeds afterwards.
pub struct FlakyExecutor {
    failures_remaining: AtomicU32,
    executions: AtomicU32,
}

impl FlakyExecutor {
    /// Create an executor failing the first `failures` calls.
    #[must_use]
    pub const fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            executions: AtomicU32::new(0),
        }
    }

    /// How many times `execute` was called.
    #[must_use]
    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

impl OutboxExecutor for FlakyExecutor {
    fn execute(
        &self,
        event: &OutboxEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExecuteError>> + Send + '_>> {
        let event_type = event.event_type.clone();
        Box::pin(async move {
            self.executions.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(ExecuteError(format!("simulated failure for {event_type}")));
            }
            Ok(())
        })
    }
}
