// SPDX-License-Identifier: Apache-2.0
//! Soft (diagnostic-accumulating) validation of LCE JSON values.
//!
//! [`validate_value`] walks the raw JSON and records every violation of the
//! envelope grammar as an [`Issue`] without ever failing. The strict wire
//! parse ([`crate::Lce::from_value`]) deserializes only values this function
//! finds clean, so soft and strict acceptance always agree.

use serde_json::{Map, Value};
use thiserror::Error;

/// A single validation diagnostic: where, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Dotted path to the offending field (`"affect.pad"`), or `""` for the
    /// envelope as a whole.
    pub path: String,
    /// Human-readable description. Consumers key on stable message prefixes
    /// (`"LCE version must be 1"`, `"Invalid intent type"`, ...).
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Strict-parse rejection carrying the full diagnostic list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid LCE: {}", format_issues(.issues))]
pub struct InvalidLce {
    /// Every violation found, in document order.
    pub issues: Vec<Issue>,
}

fn format_issues(issues: &[Issue]) -> String {
    let parts: Vec<String> = issues.iter().map(ToString::to_string).collect();
    parts.join("; ")
}

const INTENT_KINDS: [&str; 10] = [
    "ask",
    "tell",
    "propose",
    "confirm",
    "notify",
    "sync",
    "plan",
    "agree",
    "disagree",
    "reflect",
];

const CONSENT_LEVELS: [&str; 3] = ["private", "team", "public"];

const TOP_LEVEL_KEYS: [&str; 10] = [
    "v", "intent", "affect", "meaning", "trust", "memory", "policy", "qos", "trace", "sig",
];

/// Validate a raw JSON value against the LCE grammar.
///
/// Returns an empty vector for a valid envelope. Never fails; every
/// violation becomes an [`Issue`].
pub fn validate_value(value: &Value) -> Vec<Issue> {
    let mut issues = Vec::new();
    let Some(obj) = value.as_object() else {
        push(&mut issues, "", "LCE must be an object");
        return issues;
    };

    for key in obj.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            push(&mut issues, key, format!("Unknown field: {key}"));
        }
    }

    match obj.get("v") {
        None => push(&mut issues, "v", "LCE version is required"),
        Some(v) if v.as_u64() == Some(1) => {}
        Some(_) => push(&mut issues, "v", "LCE version must be 1"),
    }

    match obj.get("intent") {
        None => push(&mut issues, "intent", "Intent is required"),
        Some(Value::Object(intent)) => validate_intent(intent, &mut issues),
        Some(_) => push(&mut issues, "intent", "Intent must be an object"),
    }

    match obj.get("policy") {
        None => push(&mut issues, "policy", "Policy is required"),
        Some(Value::Object(policy)) => validate_policy(policy, &mut issues),
        Some(_) => push(&mut issues, "policy", "Policy must be an object"),
    }

    match obj.get("affect") {
        None => {}
        Some(Value::Object(affect)) => validate_affect(affect, &mut issues),
        Some(_) => push(&mut issues, "affect", "Affect must be an object"),
    }

    match obj.get("meaning") {
        None => {}
        Some(Value::Object(meaning)) => {
            expect_string(meaning, "topic", "meaning.topic", "Topic", &mut issues);
            expect_string(meaning, "ontology", "meaning.ontology", "Ontology", &mut issues);
        }
        Some(_) => push(&mut issues, "meaning", "Meaning must be an object"),
    }

    match obj.get("trust") {
        None => {}
        Some(Value::Object(trust)) => {
            expect_string(trust, "proof", "trust.proof", "Proof", &mut issues);
            expect_string_array(trust, "attest", "trust.attest", "Attest", &mut issues);
        }
        Some(_) => push(&mut issues, "trust", "Trust must be an object"),
    }

    match obj.get("memory") {
        None => {}
        Some(Value::Object(memory)) => {
            expect_string(memory, "thread", "memory.thread", "Thread", &mut issues);
            expect_string(memory, "t", "memory.t", "Timestamp", &mut issues);
            expect_string(memory, "ttl", "memory.ttl", "TTL", &mut issues);
        }
        Some(_) => push(&mut issues, "memory", "Memory must be an object"),
    }

    match obj.get("qos") {
        None => {}
        Some(Value::Object(qos)) => validate_qos(qos, &mut issues),
        Some(_) => push(&mut issues, "qos", "QoS must be an object"),
    }

    match obj.get("trace") {
        None => {}
        Some(Value::Object(trace)) => {
            if let Some(hop) = trace.get("hop") {
                if hop.as_u64().is_none() {
                    push(
                        &mut issues,
                        "trace.hop",
                        "Hop must be a non-negative integer",
                    );
                }
            }
            expect_string_array(trace, "provenance", "trace.provenance", "Provenance", &mut issues);
        }
        Some(_) => push(&mut issues, "trace", "Trace must be an object"),
    }

    if let Some(sig) = obj.get("sig") {
        if !sig.is_string() {
            push(&mut issues, "sig", "Signature must be a string");
        }
    }

    issues
}

fn validate_intent(intent: &Map<String, Value>, issues: &mut Vec<Issue>) {
    match intent.get("type") {
        None => push(issues, "intent.type", "Intent type is required"),
        Some(Value::String(t)) if INTENT_KINDS.contains(&t.as_str()) => {}
        Some(Value::String(t)) => {
            push(issues, "intent.type", format!("Invalid intent type: {t}"));
        }
        Some(_) => push(issues, "intent.type", "Invalid intent type: not a string"),
    }
    expect_string(intent, "goal", "intent.goal", "Goal", issues);
}

fn validate_policy(policy: &Map<String, Value>, issues: &mut Vec<Issue>) {
    match policy.get("consent") {
        None => push(issues, "policy.consent", "Consent level is required"),
        Some(Value::String(c)) if CONSENT_LEVELS.contains(&c.as_str()) => {}
        Some(Value::String(c)) => {
            push(issues, "policy.consent", format!("Invalid consent level: {c}"));
        }
        Some(_) => push(issues, "policy.consent", "Invalid consent level: not a string"),
    }
    expect_string_array(policy, "share", "policy.share", "Share", issues);
    expect_string(policy, "dp", "policy.dp", "DP", issues);
}

fn validate_affect(affect: &Map<String, Value>, issues: &mut Vec<Issue>) {
    if let Some(pad) = affect.get("pad") {
        match pad.as_array() {
            Some(items) if items.len() == 3 && items.iter().all(|c| c.as_f64().is_some()) => {
                let out_of_range = items
                    .iter()
                    .filter_map(Value::as_f64)
                    .any(|c| !(-1.0..=1.0).contains(&c));
                if out_of_range {
                    push(
                        issues,
                        "affect.pad",
                        "PAD values must be numbers in range [-1, 1]",
                    );
                }
            }
            _ => push(issues, "affect.pad", "PAD must be array of 3 numbers"),
        }
    }
    expect_string_array(affect, "tags", "affect.tags", "Tags", issues);
}

fn validate_qos(qos: &Map<String, Value>, issues: &mut Vec<Issue>) {
    if let Some(coherence) = qos.get("coherence") {
        let in_range = coherence
            .as_f64()
            .is_some_and(|c| (0.0..=1.0).contains(&c));
        if !in_range {
            push(
                issues,
                "qos.coherence",
                "Coherence must be number in range [0, 1]",
            );
        }
    }
    expect_string(qos, "stability", "qos.stability", "Stability", issues);
}

fn expect_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    label: &str,
    issues: &mut Vec<Issue>,
) {
    if let Some(v) = obj.get(key) {
        if !v.is_string() {
            push(issues, path, format!("{label} must be a string"));
        }
    }
}

fn expect_string_array(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    label: &str,
    issues: &mut Vec<Issue>,
) {
    if let Some(v) = obj.get(key) {
        let ok = v
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string));
        if !ok {
            push(issues, path, format!("{label} must be an array of strings"));
        }
    }
}

fn push(issues: &mut Vec<Issue>, path: &str, message: impl Into<String>) {
    issues.push(Issue {
        path: path.into(),
        message: message.into(),
    });
}
