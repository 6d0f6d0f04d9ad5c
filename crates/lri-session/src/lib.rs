// SPDX-License-Identifier: Apache-2.0
//! Linguistic Session Store (LSS) for the LRI runtime.
//!
//! The store tracks per-thread conversational state: every stored envelope
//! is appended to the thread's history, a rolling coherence score is
//! recomputed over the last few messages, and *drift events* fan out to
//! registered listeners when continuity degrades.
//!
//! Persistence goes through the four-operation [`SessionStorage`] port;
//! [`MemoryStorage`] is the default backend and [`KvSessionStorage`] adapts
//! any external key-value service with equivalent semantics. The controller
//! itself is stateless between calls beyond its listener table.

mod coherence;
mod lss;
mod storage;
mod types;

pub use coherence::{compute_coherence, AFFECT_SWING_DISTANCE};
pub use lss::{Lss, LssConfig, LssError, LssStats};
pub use storage::{KeyValue, KvSessionStorage, MemoryStorage, SessionStorage, StorageError};
pub use types::{
    CoherenceResult, DriftEvent, DriftKind, HistoryEntry, Session, SessionMetadata,
    SessionMetrics, Severity,
};
