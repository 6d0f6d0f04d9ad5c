// SPDX-License-Identifier: Apache-2.0
//! Rolling coherence scoring over a window of envelopes.
//!
//! Three sub-scores are computed over the last W messages of a thread:
//! intent similarity (adjacent-pair affinity of intent kinds), affect
//! stability (inverse of mean PAD movement), and semantic alignment
//! (adjacent-pair topic agreement). The overall score is their equal-weight
//! mean. All outputs are clamped to `[0, 1]`.

use chrono::{DateTime, Utc};
use lri_envelope::{IntentKind, Lce, Pad};
use serde_json::json;

use crate::types::{CoherenceResult, DriftEvent, DriftKind, Severity};

/// PAD distance between consecutive messages above which an `affect_swing`
/// drift event is emitted. The theoretical distance range is `[0, 2√3]`.
pub const AFFECT_SWING_DISTANCE: f64 = 1.5;

/// Alignment credited to an adjacent pair whose topics differ.
const TOPIC_MISMATCH_ALIGNMENT: f64 = 0.3;

/// Affinity credited to distinct intent kinds in the same cluster.
const SAME_CLUSTER_SIMILARITY: f64 = 0.7;

/// Affinity credited to unrelated (but not opposed) intent kinds.
const UNRELATED_SIMILARITY: f64 = 0.4;

fn pad_range_max() -> f64 {
    12.0_f64.sqrt()
}

/// Compute the coherence of a message window (oldest first).
pub fn compute_coherence(window: &[&Lce]) -> CoherenceResult {
    let intent_similarity = intent_similarity(window);
    let affect_stability = affect_stability(window);
    let semantic_alignment = semantic_alignment(window);
    let overall = (intent_similarity + affect_stability + semantic_alignment) / 3.0;
    CoherenceResult {
        overall: overall.clamp(0.0, 1.0),
        intent_similarity: intent_similarity.clamp(0.0, 1.0),
        affect_stability: affect_stability.clamp(0.0, 1.0),
        semantic_alignment: semantic_alignment.clamp(0.0, 1.0),
    }
}

/// Affinity clusters over intent kinds. Kinds in the same cluster score
/// [`SAME_CLUSTER_SIMILARITY`]; `disagree` opposes the accord cluster and
/// scores zero against it.
fn cluster(kind: IntentKind) -> Option<u8> {
    match kind {
        IntentKind::Ask | IntentKind::Tell | IntentKind::Sync => Some(0),
        IntentKind::Propose | IntentKind::Plan => Some(1),
        IntentKind::Confirm | IntentKind::Agree => Some(2),
        IntentKind::Notify | IntentKind::Reflect => Some(3),
        IntentKind::Disagree => None,
    }
}

fn pair_similarity(a: IntentKind, b: IntentKind) -> f64 {
    if a == b {
        return 1.0;
    }
    let opposed = matches!(
        (a, b),
        (IntentKind::Disagree, IntentKind::Agree | IntentKind::Confirm)
            | (IntentKind::Agree | IntentKind::Confirm, IntentKind::Disagree)
    );
    if opposed {
        return 0.0;
    }
    match (cluster(a), cluster(b)) {
        (Some(ca), Some(cb)) if ca == cb => SAME_CLUSTER_SIMILARITY,
        _ => UNRELATED_SIMILARITY,
    }
}

fn intent_similarity(window: &[&Lce]) -> f64 {
    if window.len() < 2 {
        return 1.0;
    }
    let total: f64 = window
        .windows(2)
        .map(|pair| pair_similarity(pair[0].intent.kind, pair[1].intent.kind))
        .sum();
    total / (window.len() - 1) as f64
}

fn pad_of(lce: &Lce) -> Option<Pad> {
    lce.affect.as_ref().and_then(|a| a.pad)
}

fn pad_or_zero(lce: &Lce) -> Pad {
    pad_of(lce).unwrap_or([0.0; 3])
}

fn pad_distance(a: Pad, b: Pad) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Mean PAD movement mapped to stability `max(0, 1 − d̄/2)`. A message
/// without a PAD is treated as the zero vector on the trailing side; a
/// window with no PAD data at all is fully stable.
fn affect_stability(window: &[&Lce]) -> f64 {
    let distances: Vec<f64> = window
        .windows(2)
        .filter(|pair| pad_of(pair[1]).is_some())
        .map(|pair| pad_distance(pad_or_zero(pair[1]), pad_or_zero(pair[0])))
        .collect();
    if distances.is_empty() {
        return 1.0;
    }
    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    (1.0 - mean / 2.0).max(0.0)
}

fn topic_of(lce: &Lce) -> Option<String> {
    lce.meaning
        .as_ref()
        .and_then(|m| m.topic.as_ref())
        .map(|t| t.to_lowercase())
}

/// Adjacent-pair topic agreement: equal topics (case-insensitive) score
/// 1.0, distinct topics score [`TOPIC_MISMATCH_ALIGNMENT`]. Pairs where
/// either side has no topic are skipped; a window without topics is fully
/// aligned.
fn semantic_alignment(window: &[&Lce]) -> f64 {
    let scores: Vec<f64> = window
        .windows(2)
        .filter_map(|pair| match (topic_of(pair[0]), topic_of(pair[1])) {
            (Some(a), Some(b)) => Some(if a == b { 1.0 } else { TOPIC_MISMATCH_ALIGNMENT }),
            _ => None,
        })
        .collect();
    if scores.is_empty() {
        return 1.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn severity_from_ratio(ratio: f64) -> Severity {
    if ratio < 1.0 / 3.0 {
        Severity::Low
    } else if ratio < 2.0 / 3.0 {
        Severity::Medium
    } else {
        Severity::High
    }
}

/// Decide which drift events the just-stored message triggered.
///
/// Events come back in a fixed order: coherence drop, topic shift, affect
/// swing.
pub(crate) fn detect_drift(
    thread_id: &str,
    window: &[&Lce],
    previous_overall: Option<f64>,
    current: &CoherenceResult,
    min_coherence: f64,
    drop_threshold: f64,
    timestamp: DateTime<Utc>,
) -> Vec<DriftEvent> {
    let mut events = Vec::new();

    if let Some(previous) = previous_overall {
        let drop = previous - current.overall;
        if drop >= drop_threshold && current.overall < min_coherence {
            events.push(DriftEvent {
                thread_id: thread_id.to_owned(),
                kind: DriftKind::CoherenceDrop,
                severity: severity_from_ratio(drop),
                timestamp,
                details: json!({
                    "previous": previous,
                    "current": current.overall,
                    "drop": drop,
                }),
            });
        }
    }

    if let Some(event) = detect_topic_shift(thread_id, window, timestamp) {
        events.push(event);
    }

    if window.len() >= 2 {
        let last = window[window.len() - 1];
        let before = window[window.len() - 2];
        let distance = pad_distance(pad_or_zero(last), pad_or_zero(before));
        if distance > AFFECT_SWING_DISTANCE {
            events.push(DriftEvent {
                thread_id: thread_id.to_owned(),
                kind: DriftKind::AffectSwing,
                severity: severity_from_ratio(distance / pad_range_max()),
                timestamp,
                details: json!({ "distance": distance }),
            });
        }
    }

    events
}

/// Topic shift: the last two messages carry distinct topics and the
/// penultimate topic closed a run of at least two identical topics.
fn detect_topic_shift(
    thread_id: &str,
    window: &[&Lce],
    timestamp: DateTime<Utc>,
) -> Option<DriftEvent> {
    if window.len() < 3 {
        return None;
    }
    let topics: Vec<Option<String>> = window.iter().map(|lce| topic_of(lce)).collect();
    let last = topics[topics.len() - 1].as_ref()?;
    let settled = topics[topics.len() - 2].as_ref()?;
    if last == settled {
        return None;
    }
    let run_len = topics[..topics.len() - 1]
        .iter()
        .rev()
        .take_while(|topic| topic.as_ref() == Some(settled))
        .count();
    if run_len < 2 {
        return None;
    }
    Some(DriftEvent {
        thread_id: thread_id.to_owned(),
        kind: DriftKind::TopicShift,
        severity: severity_from_ratio(run_len as f64 / window.len() as f64),
        timestamp,
        details: json!({
            "from": settled,
            "to": last,
            "run_length": run_len,
        }),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lri_envelope::{Affect, Consent, Intent, Meaning, Policy};

    fn lce(kind: IntentKind, pad: Pad, topic: &str) -> Lce {
        Lce::new(Intent::new(kind), Policy::new(Consent::Team))
            .with_affect(Affect::from_pad(pad))
            .with_meaning(Meaning::from_topic(topic))
    }

    fn bare(kind: IntentKind) -> Lce {
        Lce::new(Intent::new(kind), Policy::new(Consent::Private))
    }

    // ── 1. degenerate windows are fully coherent ────────────────────────

    #[test]
    fn single_message_window_scores_one() {
        let a = lce(IntentKind::Ask, [0.5, 0.5, 0.5], "alpha");
        let result = compute_coherence(&[&a]);
        assert_eq!(result.overall, 1.0);
        assert_eq!(result.intent_similarity, 1.0);
        assert_eq!(result.affect_stability, 1.0);
        assert_eq!(result.semantic_alignment, 1.0);
    }

    #[test]
    fn window_without_pad_or_topic_scores_one_on_those_axes() {
        let a = bare(IntentKind::Ask);
        let b = bare(IntentKind::Ask);
        let result = compute_coherence(&[&a, &b]);
        assert_eq!(result.affect_stability, 1.0);
        assert_eq!(result.semantic_alignment, 1.0);
        assert_eq!(result.intent_similarity, 1.0);
    }

    // ── 2. intent affinity ordering ─────────────────────────────────────

    #[test]
    fn intent_affinity_is_monotonic() {
        let same = pair_similarity(IntentKind::Ask, IntentKind::Ask);
        let close = pair_similarity(IntentKind::Ask, IntentKind::Tell);
        let far = pair_similarity(IntentKind::Ask, IntentKind::Disagree);
        let opposed = pair_similarity(IntentKind::Agree, IntentKind::Disagree);
        assert_eq!(same, 1.0);
        assert!(close > far, "ask/tell must beat ask/disagree");
        assert!(far > opposed);
        assert_eq!(opposed, 0.0);
    }

    // ── 3. affect stability falls with PAD movement ─────────────────────

    #[test]
    fn affect_stability_decreases_with_distance() {
        let calm_a = lce(IntentKind::Tell, [0.1, 0.1, 0.1], "t");
        let calm_b = lce(IntentKind::Tell, [0.15, 0.1, 0.1], "t");
        let jolt = lce(IntentKind::Tell, [-0.9, -0.9, -0.9], "t");
        let steady = compute_coherence(&[&calm_a, &calm_b]);
        let swung = compute_coherence(&[&calm_a, &jolt]);
        assert!(steady.affect_stability > swung.affect_stability);
        assert!(swung.affect_stability >= 0.0);
    }

    // ── 4. semantic alignment tracks topic agreement ────────────────────

    #[test]
    fn topic_match_is_case_insensitive() {
        let a = lce(IntentKind::Tell, [0.0; 3], "Weather");
        let b = lce(IntentKind::Tell, [0.0; 3], "weather");
        let result = compute_coherence(&[&a, &b]);
        assert_eq!(result.semantic_alignment, 1.0);
    }

    #[test]
    fn topic_mismatch_lowers_alignment() {
        let a = lce(IntentKind::Tell, [0.0; 3], "weather");
        let b = lce(IntentKind::Tell, [0.0; 3], "sports");
        let result = compute_coherence(&[&a, &b]);
        assert!(result.semantic_alignment <= 0.5);
    }

    // ── 5. outputs stay in range under adversarial input ────────────────

    #[test]
    fn scores_stay_clamped() {
        let a = lce(IntentKind::Agree, [1.0, 1.0, 1.0], "x");
        let b = lce(IntentKind::Disagree, [-1.0, -1.0, -1.0], "y");
        let result = compute_coherence(&[&a, &b]);
        for score in [
            result.overall,
            result.intent_similarity,
            result.affect_stability,
            result.semantic_alignment,
        ] {
            assert!((0.0..=1.0).contains(&score));
        }
    }

    // ── 6. topic shift detection ────────────────────────────────────────

    #[test]
    fn topic_shift_requires_a_settled_run() {
        let now = Utc::now();
        let a = lce(IntentKind::Tell, [0.0; 3], "status");
        let b = lce(IntentKind::Tell, [0.0; 3], "status");
        let c = lce(IntentKind::Tell, [0.0; 3], "unrelated");
        let shifted = detect_topic_shift("t", &[&a, &b, &c], now);
        assert!(shifted.is_some());
        assert_eq!(shifted.unwrap().kind, DriftKind::TopicShift);

        // No run of two identical topics before the change.
        let d = lce(IntentKind::Tell, [0.0; 3], "other");
        assert!(detect_topic_shift("t", &[&d, &b, &c], now).is_none());
        // Too short a window.
        assert!(detect_topic_shift("t", &[&b, &c], now).is_none());
    }

    // ── 7. affect swing threshold ───────────────────────────────────────

    #[test]
    fn affect_swing_fires_above_threshold() {
        let now = Utc::now();
        let a = lce(IntentKind::Tell, [0.9, 0.9, 0.9], "t");
        let b = lce(IntentKind::Tell, [-0.9, -0.9, -0.9], "t");
        let current = compute_coherence(&[&a, &b]);
        let events = detect_drift("t", &[&a, &b], None, &current, 0.6, 0.15, now);
        assert!(events.iter().any(|e| e.kind == DriftKind::AffectSwing));

        let c = lce(IntentKind::Tell, [0.8, 0.9, 0.9], "t");
        let current = compute_coherence(&[&a, &c]);
        let events = detect_drift("t", &[&a, &c], None, &current, 0.6, 0.15, now);
        assert!(events.iter().all(|e| e.kind != DriftKind::AffectSwing));
    }

    // ── 8. coherence drop needs both the delta and the floor ────────────

    #[test]
    fn coherence_drop_requires_delta_and_floor() {
        let now = Utc::now();
        let low = CoherenceResult {
            overall: 0.4,
            intent_similarity: 0.4,
            affect_stability: 0.4,
            semantic_alignment: 0.4,
        };
        let a = bare(IntentKind::Tell);
        let window = [&a];

        let events = detect_drift("t", &window, Some(0.9), &low, 0.6, 0.15, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DriftKind::CoherenceDrop);

        // Delta too small.
        let events = detect_drift("t", &window, Some(0.5), &low, 0.6, 0.15, now);
        assert!(events.is_empty());

        // Still above the floor.
        let high = CoherenceResult {
            overall: 0.7,
            ..low
        };
        let events = detect_drift("t", &window, Some(0.9), &high, 0.6, 0.15, now);
        assert!(events.is_empty());

        // No prior score to compare against.
        let events = detect_drift("t", &window, None, &low, 0.6, 0.15, now);
        assert!(events.is_empty());
    }

    // ── 9. severity bucketing in thirds ─────────────────────────────────

    #[test]
    fn severity_buckets_by_thirds() {
        assert_eq!(severity_from_ratio(0.1), Severity::Low);
        assert_eq!(severity_from_ratio(0.5), Severity::Medium);
        assert_eq!(severity_from_ratio(0.9), Severity::High);
    }
}
