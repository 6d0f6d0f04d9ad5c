// SPDX-License-Identifier: Apache-2.0
//! Persisted session records: history, metadata, metrics, drift events.

use chrono::{DateTime, Utc};
use lri_envelope::Lce;
use serde::{Deserialize, Serialize};

/// One stored envelope and the wall-clock instant it arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Arrival timestamp.
    pub t: DateTime<Utc>,
    /// The envelope as received.
    pub lce: Lce,
}

/// Bookkeeping fields maintained on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Creation time of the session record.
    pub created_at: DateTime<Utc>,
    /// Time of the most recent mutation.
    pub updated_at: DateTime<Utc>,
    /// Invariant: equals the history length.
    pub message_count: u64,
}

/// The three coherence sub-scores and their overall, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoherenceResult {
    /// Equal-weight mean of the sub-scores.
    pub overall: f64,
    /// Adjacent-pair intent affinity.
    pub intent_similarity: f64,
    /// Inverse of mean PAD movement.
    pub affect_stability: f64,
    /// Adjacent-pair topic agreement.
    pub semantic_alignment: f64,
}

impl Default for CoherenceResult {
    /// A thread with no evidence of drift is fully coherent.
    fn default() -> Self {
        Self {
            overall: 1.0,
            intent_similarity: 1.0,
            affect_stability: 1.0,
            semantic_alignment: 1.0,
        }
    }
}

/// What kind of continuity degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Overall coherence fell sharply below the configured floor.
    CoherenceDrop,
    /// The topic changed after a settled run.
    TopicShift,
    /// A large jump in PAD space between consecutive messages.
    AffectSwing,
}

impl DriftKind {
    /// The snake_case wire token for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CoherenceDrop => "coherence_drop",
            Self::TopicShift => "topic_shift",
            Self::AffectSwing => "affect_swing",
        }
    }
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far into its theoretical range the driving quantity moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// First third of the range.
    Low,
    /// Middle third.
    Medium,
    /// Upper third.
    High,
}

/// An emitted signal that a thread's continuity degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    /// The thread the event was observed on.
    pub thread_id: String,
    /// Degradation category.
    #[serde(rename = "type")]
    pub kind: DriftKind,
    /// Bucketed magnitude.
    pub severity: Severity,
    /// When the event was detected.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific measurements (previous/current scores, topics, PAD
    /// distance).
    pub details: serde_json::Value,
}

/// Latest metrics for a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Most recent coherence computation.
    pub coherence: CoherenceResult,
    /// The overall score that `coherence` replaced. `None` until a second
    /// computation has happened.
    pub previous_coherence: Option<f64>,
    /// When the metrics were last written.
    pub updated_at: DateTime<Utc>,
    /// Recent drift events, oldest first, capped.
    pub drift_events: Vec<DriftEvent>,
}

impl SessionMetrics {
    /// Fresh metrics for a session created at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            coherence: CoherenceResult::default(),
            previous_coherence: None,
            updated_at: now,
            drift_events: Vec::new(),
        }
    }
}

/// A thread's full persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Immutable session key.
    pub thread_id: String,
    /// Stored envelopes, append-only, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Mutation bookkeeping.
    pub metadata: SessionMetadata,
    /// Rolling coherence state.
    pub metrics: SessionMetrics,
}

impl Session {
    /// Empty session created at `now`.
    pub fn new(thread_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            history: Vec::new(),
            metadata: SessionMetadata {
                created_at: now,
                updated_at: now,
                message_count: 0,
            },
            metrics: SessionMetrics::new(now),
        }
    }
}
