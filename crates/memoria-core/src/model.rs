//! Core data model: memory layers, categories, and the Memory Item.
//!
//! The five layers are a closed set; every input boundary (tool args, HTTP
//! bodies, cloud-sync records) normalizes through [`Layer::normalize`] before
//! anything downstream ever sees a layer tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// One of the five canonical memory tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// L0 — authoritative self-description. Write-protected; see the approval workflow.
    IdentitySchema,
    /// L1 — in-process working memory, never persisted to the vector index.
    ActiveContext,
    /// L2 — episodic memory carrying when/where/who, scoped by agent_id.
    EventLog,
    /// L3 — semantic long-term truths.
    VerifiedFact,
    /// L4 — procedural know-how.
    OperationalKnowledge,
}

impl Layer {
    /// Canonical wire tag for this layer (used in payloads and JSON bodies).
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::IdentitySchema => "identity_schema",
            Layer::ActiveContext => "active_context",
            Layer::EventLog => "event_log",
            Layer::VerifiedFact => "verified_fact",
            Layer::OperationalKnowledge => "operational_knowledge",
        }
    }

    /// Normalize a raw layer string: trims whitespace, lowercases, then
    /// resolves legacy synonyms (`constitution`, `fact`, `session`) before
    /// matching a canonical tag. Idempotent: `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(raw: &str) -> Option<Layer> {
        let canonical = raw.trim().to_lowercase();
        let canonical = match canonical.as_str() {
            "constitution" => "identity_schema",
            "fact" => "verified_fact",
            "session" => "event_log",
            other => other,
        };
        match canonical {
            "identity_schema" => Some(Layer::IdentitySchema),
            "active_context" => Some(Layer::ActiveContext),
            "event_log" => Some(Layer::EventLog),
            "verified_fact" => Some(Layer::VerifiedFact),
            "operational_knowledge" => Some(Layer::OperationalKnowledge),
            _ => None,
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Free-form classification tag. Known values get their own variant so
/// callers get typo protection; anything else is carried verbatim.
///
/// Wire shape is a plain string, not a serde-tagged enum: `Other` exists
/// precisely because the variant set isn't closed, so (de)serialization goes
/// through [`Category::as_str`]/[`Category::parse`] by hand instead of
/// `#[serde(untagged)]`, which only applies at the container level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Person,
    Place,
    Event,
    Item,
    Routine,
    Other(String),
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Category::parse(&raw))
    }
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Person => "person",
            Category::Place => "place",
            Category::Event => "event",
            Category::Item => "item",
            Category::Routine => "routine",
            Category::Other(s) => s.as_str(),
        }
    }

    pub fn parse(raw: &str) -> Category {
        match raw.trim().to_lowercase().as_str() {
            "person" => Category::Person,
            "place" => Category::Place,
            "event" => Category::Event,
            "item" => Category::Item,
            "routine" => Category::Routine,
            other => Category::Other(other.to_string()),
        }
    }
}

/// Origin tag for a Memory Item. `caregiver`/`user` sources bypass the
/// confidence gate in the kernel; `ai_extraction`/`external_ai` do not.
///
/// Same open-variant-set reasoning as [`Category`]: hand-rolled
/// (de)serialization through [`Source::as_str`]/[`Source::parse`] rather than
/// a misapplied `#[serde(untagged)]` on one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Caregiver,
    User,
    AiExtraction,
    ExternalAi,
    PromotedFromEvent,
    Other(String),
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Source::parse(&raw))
    }
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Caregiver => "caregiver",
            Source::User => "user",
            Source::AiExtraction => "ai_extraction",
            Source::ExternalAi => "external_ai",
            Source::PromotedFromEvent => "promoted_from_event",
            Source::Other(s) => s.as_str(),
        }
    }

    pub fn parse(raw: &str) -> Source {
        match raw.trim().to_lowercase().as_str() {
            "caregiver" => Source::Caregiver,
            "user" => Source::User,
            "ai_extraction" => Source::AiExtraction,
            "external_ai" => Source::ExternalAi,
            "promoted_from_event" => Source::PromotedFromEvent,
            other => Source::Other(other.to_string()),
        }
    }

    /// Sources subject to the kernel's confidence gate (§4.I rule 4).
    pub fn is_gated(&self) -> bool {
        matches!(self, Source::AiExtraction | Source::ExternalAi)
    }
}

/// The central entity persisted in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryItem {
    pub id: Uuid,
    pub content: String,
    pub layer: Layer,
    pub category: Option<Category>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub source: Option<String>,
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub created_by: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    pub event_when: Option<DateTime<Utc>>,
    pub event_where: Option<String>,
    #[serde(default)]
    pub event_who: Vec<String>,
    #[serde(default)]
    pub promoted_to_fact: bool,
    pub promoted_at: Option<DateTime<Utc>>,
    pub promoted_fact_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}
fn default_confidence() -> f64 {
    1.0
}
fn default_priority() -> u32 {
    100
}

impl MemoryItem {
    /// A memory item is expired when `expires_at` is set and in the past.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    pub fn new(content: impl Into<String>, layer: Layer) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            layer,
            category: None,
            is_active: true,
            confidence: 1.0,
            source: None,
            agent_id: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            priority: 100,
            created_by: None,
            session_id: None,
            related_files: Vec::new(),
            event_when: None,
            event_where: None,
            event_who: Vec::new(),
            promoted_to_fact: false,
            promoted_at: None,
            promoted_fact_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent_and_case_insensitive() {
        for raw in ["Constitution", " fact ", "SESSION", "event_log"] {
            let once = Layer::normalize(raw).unwrap();
            let twice = Layer::normalize(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
        assert_eq!(Layer::normalize("constitution"), Some(Layer::IdentitySchema));
        assert_eq!(Layer::normalize("fact"), Some(Layer::VerifiedFact));
        assert_eq!(Layer::normalize("session"), Some(Layer::EventLog));
        assert_eq!(Layer::normalize("bogus"), None);
    }

    #[test]
    fn category_other_round_trips_through_json() {
        let custom = Category::parse("holiday");
        assert_eq!(custom, Category::Other("holiday".to_string()));
        let json = serde_json::to_string(&custom).unwrap();
        assert_eq!(json, "\"holiday\"");
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, custom);
    }

    #[test]
    fn source_other_round_trips_through_json() {
        let custom = Source::parse("family_member");
        let json = serde_json::to_string(&custom).unwrap();
        let back: Source = serde_json::from_str(&json).unwrap();
        assert_eq!(back, custom);
    }

    #[test]
    fn gated_sources() {
        assert!(Source::AiExtraction.is_gated());
        assert!(Source::ExternalAi.is_gated());
        assert!(!Source::Caregiver.is_gated());
        assert!(!Source::User.is_gated());
    }

    #[test]
    fn expiry() {
        let mut item = MemoryItem::new("x", Layer::VerifiedFact);
        let now = Utc::now();
        assert!(!item.is_expired(now));
        item.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(item.is_expired(now));
    }
}
