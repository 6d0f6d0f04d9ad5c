// SPDX-License-Identifier: Apache-2.0
//! The LSS controller: orchestrates storage, the coherence engine, and
//! drift listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use lri_envelope::Lce;
use thiserror::Error;
use tracing::warn;

use crate::coherence;
use crate::storage::{MemoryStorage, SessionStorage, StorageError};
use crate::types::{CoherenceResult, DriftEvent, HistoryEntry, Session, SessionMetrics};

/// Storage key namespace for session records.
const KEY_PREFIX: &str = "lss:session:";

/// Oldest drift events are dropped once a session's log exceeds this.
const MAX_DRIFT_EVENTS: usize = 50;

/// Tunables for the coherence engine and session expiry.
#[derive(Debug, Clone)]
pub struct LssConfig {
    /// Window size W: coherence is computed over the last W messages.
    pub coherence_window: usize,
    /// Floor below which a sharp drop emits a `coherence_drop` event.
    pub drift_min_coherence: f64,
    /// Minimum overall-score delta for a `coherence_drop` event.
    pub drift_drop_threshold: f64,
    /// Session expiry measured from the most recent write. `None` disables
    /// expiry.
    pub session_ttl: Option<Duration>,
}

impl Default for LssConfig {
    fn default() -> Self {
        Self {
            coherence_window: 5,
            drift_min_coherence: 0.6,
            drift_drop_threshold: 0.15,
            session_ttl: None,
        }
    }
}

/// Failure surfaced by LSS operations.
#[derive(Debug, Error)]
pub enum LssError {
    /// The storage backend failed; in-memory state for the call is
    /// untouched.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A persisted session record could not be deserialized.
    #[error("corrupt session record for thread {thread_id}: {source}")]
    Corrupt {
        /// The thread whose record is unreadable.
        thread_id: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Aggregate view over all live sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LssStats {
    /// Number of live sessions.
    pub session_count: usize,
    /// Sum of message counts across live sessions.
    pub total_messages: u64,
    /// Mean of per-session overall coherence, `0` when empty.
    pub average_coherence: f64,
}

type DriftListener = Arc<dyn Fn(&DriftEvent) + Send + Sync>;

/// Linguistic Session Store.
///
/// Every mutation persists the full session record through the storage
/// port; reads load it back, so the controller holds no session state of
/// its own. Stores on the same store instance are serialized by an internal
/// lock so metrics are never recomputed against a stale window.
pub struct Lss {
    config: LssConfig,
    storage: Arc<dyn SessionStorage>,
    listeners: Mutex<Vec<DriftListener>>,
    mutate: Mutex<()>,
}

impl Default for Lss {
    fn default() -> Self {
        Self::new()
    }
}

impl Lss {
    /// Store with default config and in-memory storage.
    pub fn new() -> Self {
        Self::with_config(LssConfig::default())
    }

    /// Store with the given config and in-memory storage.
    pub fn with_config(config: LssConfig) -> Self {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    /// Store with the given config and storage backend.
    pub fn with_storage(config: LssConfig, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            config,
            storage,
            listeners: Mutex::new(Vec::new()),
            mutate: Mutex::new(()),
        }
    }

    /// Register a drift listener. Listeners run synchronously inside
    /// [`store`](Lss::store), in registration order, after persistence; a
    /// panicking listener is logged and skipped without affecting the store
    /// or later listeners.
    pub fn on_drift(&self, listener: impl Fn(&DriftEvent) + Send + Sync + 'static) {
        lock(&self.listeners).push(Arc::new(listener));
    }

    /// Append an envelope to a thread, recompute its metrics, persist, and
    /// fan out any drift events. Creates the session on first store.
    ///
    /// # Errors
    ///
    /// [`LssError::Storage`] if the backend fails, [`LssError::Corrupt`] if
    /// an existing record cannot be read back.
    pub fn store(&self, thread_id: &str, lce: Lce) -> Result<Session, LssError> {
        let events;
        let session;
        {
            let _guard = lock(&self.mutate);
            let now = Utc::now();
            let mut record = self
                .load(thread_id)?
                .unwrap_or_else(|| Session::new(thread_id, now));

            record.history.push(HistoryEntry { t: now, lce });
            record.metadata.message_count = record.history.len() as u64;
            record.metadata.updated_at = now;

            let start = record
                .history
                .len()
                .saturating_sub(self.config.coherence_window.max(1));
            let window: Vec<&Lce> = record.history[start..].iter().map(|e| &e.lce).collect();

            let previous_overall = if record.history.len() > 1 {
                Some(record.metrics.coherence.overall)
            } else {
                None
            };
            let current = coherence::compute_coherence(&window);
            events = coherence::detect_drift(
                thread_id,
                &window,
                previous_overall,
                &current,
                self.config.drift_min_coherence,
                self.config.drift_drop_threshold,
                now,
            );

            record.metrics.previous_coherence = previous_overall;
            record.metrics.coherence = current;
            record.metrics.updated_at = now;
            record.metrics.drift_events.extend(events.iter().cloned());
            cap_drift_events(&mut record.metrics.drift_events);

            self.persist(&record)?;
            session = record;
        }

        for event in &events {
            self.emit(event);
        }
        Ok(session)
    }

    /// Load a session. `None` when absent or TTL-expired.
    ///
    /// # Errors
    ///
    /// [`LssError::Storage`] / [`LssError::Corrupt`] as for
    /// [`store`](Lss::store).
    pub fn get_session(&self, thread_id: &str) -> Result<Option<Session>, LssError> {
        self.load(thread_id)
    }

    /// Load only a session's metrics. `None` when the session is absent.
    ///
    /// # Errors
    ///
    /// As for [`get_session`](Lss::get_session).
    pub fn get_metrics(&self, thread_id: &str) -> Result<Option<SessionMetrics>, LssError> {
        Ok(self.load(thread_id)?.map(|session| session.metrics))
    }

    /// Caller-supplied metrics override.
    ///
    /// Writes `coherence` (when given) as the current result, moves the
    /// previously-current overall into `previous_coherence`, stamps
    /// `updated_at`, and appends the supplied drift events. Returns the
    /// updated metrics, or `None` when the session does not exist.
    ///
    /// # Errors
    ///
    /// As for [`store`](Lss::store).
    pub fn update_metrics(
        &self,
        thread_id: &str,
        coherence: Option<CoherenceResult>,
        drift_events: Vec<DriftEvent>,
    ) -> Result<Option<SessionMetrics>, LssError> {
        let _guard = lock(&self.mutate);
        let Some(mut record) = self.load(thread_id)? else {
            return Ok(None);
        };
        let prior = record.metrics.coherence.overall;
        if let Some(result) = coherence {
            record.metrics.coherence = result;
        }
        record.metrics.previous_coherence = Some(prior);
        record.metrics.updated_at = Utc::now();
        record.metrics.drift_events.extend(drift_events);
        cap_drift_events(&mut record.metrics.drift_events);
        record.metadata.updated_at = record.metrics.updated_at;
        self.persist(&record)?;
        Ok(Some(record.metrics))
    }

    /// Aggregate counts and mean coherence over all live sessions.
    ///
    /// # Errors
    ///
    /// As for [`get_session`](Lss::get_session).
    pub fn get_stats(&self) -> Result<LssStats, LssError> {
        let keys = self.storage.scan(KEY_PREFIX)?;
        let mut session_count = 0usize;
        let mut total_messages = 0u64;
        let mut coherence_sum = 0.0f64;
        for key in keys {
            let Some(bytes) = self.storage.get(&key)? else {
                // Expired between scan and get.
                continue;
            };
            let session: Session =
                serde_json::from_slice(&bytes).map_err(|source| LssError::Corrupt {
                    thread_id: key.trim_start_matches(KEY_PREFIX).to_owned(),
                    source,
                })?;
            session_count += 1;
            total_messages += session.metadata.message_count;
            coherence_sum += session.metrics.coherence.overall;
        }
        let average_coherence = if session_count == 0 {
            0.0
        } else {
            coherence_sum / session_count as f64
        };
        Ok(LssStats {
            session_count,
            total_messages,
            average_coherence,
        })
    }

    fn load(&self, thread_id: &str) -> Result<Option<Session>, LssError> {
        let Some(bytes) = self.storage.get(&session_key(thread_id))? else {
            return Ok(None);
        };
        let session = serde_json::from_slice(&bytes).map_err(|source| LssError::Corrupt {
            thread_id: thread_id.to_owned(),
            source,
        })?;
        Ok(Some(session))
    }

    fn persist(&self, session: &Session) -> Result<(), LssError> {
        let bytes = serde_json::to_vec(session).map_err(|source| LssError::Corrupt {
            thread_id: session.thread_id.clone(),
            source,
        })?;
        self.storage
            .set(&session_key(&session.thread_id), bytes, self.config.session_ttl)?;
        Ok(())
    }

    fn emit(&self, event: &DriftEvent) {
        let listeners: Vec<DriftListener> = lock(&self.listeners).clone();
        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(event)));
            if outcome.is_err() {
                warn!(
                    thread_id = %event.thread_id,
                    kind = %event.kind,
                    "drift listener panicked; continuing"
                );
            }
        }
    }
}

fn session_key(thread_id: &str) -> String {
    format!("{KEY_PREFIX}{thread_id}")
}

fn cap_drift_events(events: &mut Vec<DriftEvent>) {
    if events.len() > MAX_DRIFT_EVENTS {
        let excess = events.len() - MAX_DRIFT_EVENTS;
        events.drain(..excess);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
