// SPDX-License-Identifier: Apache-2.0
//! Linguistic Context Envelope (LCE) schema for the LRI runtime.
//!
//! An LCE is the per-message structured payload exchanged between LRI
//! services, carried either Base64-JSON in an HTTP header or as a framed
//! WebSocket payload. Only wire version `1` exists.
//!
//! Two validators coexist (see [`validate`]):
//!
//! * the *soft* validator accumulates `(path, message)` diagnostics and
//!   never fails — it is the primary grammar;
//! * the *strict* parse ([`Lce::from_value`]) is derived from the soft form:
//!   it deserializes only a value the soft validator found clean, so the two
//!   agree on acceptance by construction.

use serde::{Deserialize, Serialize};

pub mod validate;
pub mod wire;

pub use validate::{validate_value, InvalidLce, Issue};

/// The only wire version this crate speaks.
pub const LCE_VERSION: u64 = 1;

/// A Pleasure/Arousal/Dominance affect descriptor. Each component is in
/// `[-1, 1]`.
pub type Pad = [f64; 3];

/// Communicative intent of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// Request information.
    Ask,
    /// Convey information.
    Tell,
    /// Put forward a course of action.
    Propose,
    /// Affirm a prior proposal or statement.
    Confirm,
    /// One-way announcement.
    Notify,
    /// Align state with the peer.
    Sync,
    /// Lay out future steps.
    Plan,
    /// Express agreement.
    Agree,
    /// Express disagreement.
    Disagree,
    /// Meta-level commentary on the conversation itself.
    Reflect,
}

impl IntentKind {
    /// The lowercase wire token for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Tell => "tell",
            Self::Propose => "propose",
            Self::Confirm => "confirm",
            Self::Notify => "notify",
            Self::Sync => "sync",
            Self::Plan => "plan",
            Self::Agree => "agree",
            Self::Disagree => "disagree",
            Self::Reflect => "reflect",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consent level governing how an envelope may be shared onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consent {
    /// Visible to the receiving service only.
    Private,
    /// Shareable within the receiving team boundary.
    Team,
    /// Freely shareable.
    Public,
}

impl Consent {
    /// The lowercase wire token for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Team => "team",
            Self::Public => "public",
        }
    }
}

/// `intent` block: what the sender wants from this exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Intent category token.
    #[serde(rename = "type")]
    pub kind: IntentKind,
    /// Free-form goal statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl Intent {
    /// Intent with no goal text.
    pub fn new(kind: IntentKind) -> Self {
        Self { kind, goal: None }
    }

    /// Intent with a goal statement.
    pub fn with_goal(kind: IntentKind, goal: impl Into<String>) -> Self {
        Self {
            kind,
            goal: Some(goal.into()),
        }
    }
}

/// `affect` block: emotional tone of the message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Affect {
    /// PAD tuple, each component in `[-1, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pad: Option<Pad>,
    /// Ordered free-form affect tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl Affect {
    /// Affect carrying only a PAD tuple.
    pub fn from_pad(pad: Pad) -> Self {
        Self {
            pad: Some(pad),
            tags: None,
        }
    }
}

/// `meaning` block: what the message is about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Meaning {
    /// Conversation topic label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Ontology reference (URI or similar).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ontology: Option<String>,
}

impl Meaning {
    /// Meaning carrying only a topic label.
    pub fn from_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ontology: None,
        }
    }
}

/// `trust` block: provenance attestations. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trust {
    /// Opaque proof token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    /// Attestation chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attest: Option<Vec<String>>,
}

/// `memory` block: where this message sits in a conversation thread.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Memory {
    /// Caller-defined thread identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// ISO-8601 timestamp of the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    /// ISO-8601 duration after which the message may be forgotten.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// `policy` block: consent and sharing constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Consent level.
    pub consent: Consent,
    /// Service identifiers the envelope may be shared with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<Vec<String>>,
    /// Differential-privacy parameters, free-form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
}

impl Policy {
    /// Policy with only a consent level.
    pub fn new(consent: Consent) -> Self {
        Self {
            consent,
            share: None,
            dp: None,
        }
    }
}

/// `qos` block: sender-observed conversation quality.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Qos {
    /// Coherence scalar in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coherence: Option<f64>,
    /// Free-form stability label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<String>,
}

/// `trace` block: routing breadcrumbs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trace {
    /// Hop count, non-negative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop: Option<u64>,
    /// Services the envelope has passed through, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Vec<String>>,
}

/// A Linguistic Context Envelope.
///
/// `intent` and `policy` are the only required blocks; every other block is
/// optional and omitted from the wire form when absent. Unknown top-level
/// keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lce {
    /// Wire version; must be `1`.
    pub v: u64,
    /// Communicative intent.
    pub intent: Intent,
    /// Emotional tone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affect: Option<Affect>,
    /// Semantic grounding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meaning: Option<Meaning>,
    /// Provenance attestations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust: Option<Trust>,
    /// Thread linkage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
    /// Consent and sharing policy.
    pub policy: Policy,
    /// Conversation quality hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
    /// Routing breadcrumbs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    /// Opaque signature string. Not interpreted by the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Lce {
    /// Minimal envelope: version 1, the given intent and policy, nothing
    /// else.
    pub fn new(intent: Intent, policy: Policy) -> Self {
        Self {
            v: LCE_VERSION,
            intent,
            affect: None,
            meaning: None,
            trust: None,
            memory: None,
            policy,
            qos: None,
            trace: None,
            sig: None,
        }
    }

    /// Attach an affect block.
    pub fn with_affect(mut self, affect: Affect) -> Self {
        self.affect = Some(affect);
        self
    }

    /// Attach a meaning block.
    pub fn with_meaning(mut self, meaning: Meaning) -> Self {
        self.meaning = Some(meaning);
        self
    }

    /// Attach a memory block.
    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach a qos block.
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = Some(qos);
        self
    }

    /// Strict parse: accept a JSON value only if the soft validator finds it
    /// clean, then deserialize into the typed envelope.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLce`] carrying every diagnostic the soft validator
    /// produced (or, for the rare value serde rejects beyond the grammar,
    /// a single deserialization diagnostic).
    pub fn from_value(value: serde_json::Value) -> Result<Self, InvalidLce> {
        let issues = validate::validate_value(&value);
        if !issues.is_empty() {
            return Err(InvalidLce { issues });
        }
        serde_json::from_value(value).map_err(|err| InvalidLce {
            issues: vec![Issue {
                path: String::new(),
                message: format!("LCE deserialization failed: {err}"),
            }],
        })
    }

    /// Range and version checks on an already-typed envelope.
    ///
    /// The typed deserializer enforces structure but cannot express the
    /// numeric invariants (version exactly 1, PAD components in `[-1, 1]`,
    /// coherence in `[0, 1]`). Decoders that bypass the JSON grammar (the
    /// CBOR path) call this after deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLce`] listing each violated invariant.
    pub fn check(&self) -> Result<(), InvalidLce> {
        let mut issues = Vec::new();
        if self.v != LCE_VERSION {
            issues.push(Issue {
                path: "v".into(),
                message: "LCE version must be 1".into(),
            });
        }
        if let Some(pad) = self.affect.as_ref().and_then(|a| a.pad) {
            if pad.iter().any(|c| !(-1.0..=1.0).contains(c)) {
                issues.push(Issue {
                    path: "affect.pad".into(),
                    message: "PAD values must be numbers in range [-1, 1]".into(),
                });
            }
        }
        if let Some(coherence) = self.qos.as_ref().and_then(|q| q.coherence) {
            if !(0.0..=1.0).contains(&coherence) {
                issues.push(Issue {
                    path: "qos.coherence".into(),
                    message: "Coherence must be number in range [0, 1]".into(),
                });
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(InvalidLce { issues })
        }
    }
}
