//! Event payload model: the tagged union clients send to the write endpoint.
//!
//! Payloads are stored verbatim in the document's raw log; the typed view in
//! this module is what the aggregator and exporter read. Extraction is lenient:
//! a missing field, or a field carrying an unexpected JSON type, falls back to
//! its default instead of failing, so partially-conformant clients are still
//! counted.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dataset / rating label used when a client omits one.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Discriminant carried in the payload's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Download,
    Feedback,
    FeedbackLogFollowup,
}

impl EventKind {
    pub const ALL: [Self; 3] = [Self::Download, Self::Feedback, Self::FeedbackLogFollowup];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Feedback => "feedback",
            Self::FeedbackLogFollowup => "feedback_log_followup",
        }
    }

    /// Parse the wire spelling; anything else is not an admissible event.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feedback detail level. `Short` / `Comprehensive` are the legacy spellings
/// of `Quick` / `Detailed` and are counted in their own namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedbackLevel {
    #[default]
    Quick,
    Detailed,
    Short,
    Comprehensive,
    Unrecognized(String),
}

impl FeedbackLevel {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "quick" => Self::Quick,
            "detailed" => Self::Detailed,
            "short" => Self::Short,
            "comprehensive" => Self::Comprehensive,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Quick => "quick",
            Self::Detailed => "detailed",
            Self::Short => "short",
            Self::Comprehensive => "comprehensive",
            Self::Unrecognized(raw) => raw,
        }
    }
}

/// Anonymized client environment shared by every event shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEnvironment {
    pub os: Option<String>,
    /// Runtime version reported by the client (`python` on the wire).
    pub runtime_version: Option<String>,
    pub cli_version: Option<String>,
    /// Ephemeral per-invocation id; never persisted client-side.
    pub session_id: Option<String>,
    /// Client-side timestamp string, kept as sent.
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub dataset: String,
    pub succeeded: bool,
    pub metadata_received: bool,
    pub resume_attempts: u64,
    pub note: Option<String>,
    pub env: ClientEnvironment,
}

/// Optional research-context fields attached to detailed feedback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackContext {
    pub career_stage: Option<String>,
    pub experience_years: Option<String>,
    pub research_area: Option<String>,
    pub use_case: Option<String>,
    pub institution: Option<String>,
    pub github_link: Option<String>,
    pub log_analysis: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    pub level: FeedbackLevel,
    pub rating: String,
    /// Legacy free-text sentiment from older clients.
    pub text: Option<String>,
    pub context: FeedbackContext,
    pub env: ClientEnvironment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogFollowupEvent {
    pub original_rating: Option<String>,
    pub log_analysis: Option<Value>,
    pub env: ClientEnvironment,
}

/// A validated event, one variant per admissible `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Download(DownloadEvent),
    Feedback(FeedbackEvent),
    FeedbackLogFollowup(LogFollowupEvent),
}

impl Event {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Download(_) => EventKind::Download,
            Self::Feedback(_) => EventKind::Feedback,
            Self::FeedbackLogFollowup(_) => EventKind::FeedbackLogFollowup,
        }
    }

    #[must_use]
    pub const fn env(&self) -> &ClientEnvironment {
        match self {
            Self::Download(e) => &e.env,
            Self::Feedback(e) => &e.env,
            Self::FeedbackLogFollowup(e) => &e.env,
        }
    }

    /// Dataset named by a download event.
    #[must_use]
    pub fn dataset(&self) -> Option<&str> {
        match self {
            Self::Download(e) => Some(&e.dataset),
            _ => None,
        }
    }

    /// Build the typed view of a payload whose `type` is already known.
    #[must_use]
    pub fn from_fields(kind: EventKind, fields: &Map<String, Value>) -> Self {
        let env = ClientEnvironment {
            os: text_field(fields, "os"),
            runtime_version: text_field(fields, "python"),
            cli_version: text_field(fields, "cli_version"),
            session_id: text_field(fields, "session_id"),
            timestamp: text_field(fields, "timestamp"),
        };

        match kind {
            EventKind::Download => Self::Download(DownloadEvent {
                dataset: text_field(fields, "dataset").unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
                succeeded: bool_field(fields, "succeeded").unwrap_or(false),
                metadata_received: bool_field(fields, "metadata_received").unwrap_or(false),
                resume_attempts: count_field(fields, "resume_attempts").unwrap_or(0),
                note: text_field(fields, "placeholder_description"),
                env,
            }),
            EventKind::Feedback => Self::Feedback(FeedbackEvent {
                level: text_field(fields, "feedback_level")
                    .map_or_else(FeedbackLevel::default, |raw| FeedbackLevel::parse(&raw)),
                rating: text_field(fields, "feedback_rating")
                    .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
                text: text_field(fields, "feedback_text"),
                context: FeedbackContext {
                    career_stage: text_field(fields, "career_stage"),
                    experience_years: text_field(fields, "experience_years"),
                    research_area: text_field(fields, "research_area"),
                    use_case: text_field(fields, "use_case"),
                    institution: text_field(fields, "institution"),
                    github_link: text_field(fields, "github_link"),
                    log_analysis: structured_field(fields, "log_analysis"),
                },
                env,
            }),
            EventKind::FeedbackLogFollowup => Self::FeedbackLogFollowup(LogFollowupEvent {
                original_rating: text_field(fields, "original_rating"),
                log_analysis: structured_field(fields, "log_analysis"),
                env,
            }),
        }
    }

    /// Typed view of a stored raw payload; `None` when the payload has no
    /// admissible `type` (e.g. hand-edited documents).
    #[must_use]
    pub fn from_stored(raw: &Value) -> Option<Self> {
        let fields = raw.as_object()?;
        let kind = fields.get("type").and_then(Value::as_str).and_then(EventKind::parse)?;
        Some(Self::from_fields(kind, fields))
    }
}

// ──────────────────── lenient field extraction ────────────────────

/// Non-empty text value. Numbers and booleans are rendered as text so a
/// numeric rating still lands under a label.
fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match fields.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn bool_field(fields: &Map<String, Value>, key: &str) -> Option<bool> {
    match fields.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn count_field(fields: &Map<String, Value>, key: &str) -> Option<u64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn structured_field(fields: &Map<String, Value>, key: &str) -> Option<Value> {
    match fields.get(key)? {
        Value::Null => None,
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object payload")
    }

    #[test]
    fn kind_parses_only_wire_spellings() {
        assert_eq!(EventKind::parse("download"), Some(EventKind::Download));
        assert_eq!(
            EventKind::parse("feedback_log_followup"),
            Some(EventKind::FeedbackLogFollowup)
        );
        assert_eq!(EventKind::parse("Download"), None);
        assert_eq!(EventKind::parse("heartbeat"), None);
    }

    #[test]
    fn download_fields_extracted() {
        let payload = fields(json!({
            "type": "download",
            "dataset": "HBN",
            "succeeded": true,
            "metadata_received": true,
            "resume_attempts": 2,
            "placeholder_description": "slow mirror",
            "os": "Linux",
            "python": "3.11.4",
            "cli_version": "1.2.0",
            "session_id": "a1b2c3d4"
        }));
        let Event::Download(event) = Event::from_fields(EventKind::Download, &payload) else {
            panic!("expected download");
        };
        assert_eq!(event.dataset, "HBN");
        assert!(event.succeeded);
        assert!(event.metadata_received);
        assert_eq!(event.resume_attempts, 2);
        assert_eq!(event.note.as_deref(), Some("slow mirror"));
        assert_eq!(event.env.runtime_version.as_deref(), Some("3.11.4"));
        assert_eq!(event.env.session_id.as_deref(), Some("a1b2c3d4"));
    }

    #[test]
    fn missing_download_fields_default() {
        let payload = fields(json!({"type": "download"}));
        let Event::Download(event) = Event::from_fields(EventKind::Download, &payload) else {
            panic!("expected download");
        };
        assert_eq!(event.dataset, UNKNOWN_LABEL);
        assert!(!event.succeeded);
        assert_eq!(event.resume_attempts, 0);
        assert!(event.note.is_none());
    }

    #[test]
    fn wrong_typed_fields_are_treated_as_missing() {
        let payload = fields(json!({
            "type": "download",
            "dataset": {"nested": true},
            "succeeded": "TRUE",
            "resume_attempts": -3
        }));
        let Event::Download(event) = Event::from_fields(EventKind::Download, &payload) else {
            panic!("expected download");
        };
        assert_eq!(event.dataset, UNKNOWN_LABEL);
        assert!(event.succeeded);
        assert_eq!(event.resume_attempts, 0);
    }

    #[test]
    fn feedback_defaults_to_quick_and_unknown_rating() {
        let payload = fields(json!({"type": "feedback", "feedback_rating": ""}));
        let Event::Feedback(event) = Event::from_fields(EventKind::Feedback, &payload) else {
            panic!("expected feedback");
        };
        assert_eq!(event.level, FeedbackLevel::Quick);
        assert_eq!(event.rating, UNKNOWN_LABEL);
    }

    #[test]
    fn feedback_levels_keep_legacy_and_unrecognized_spellings() {
        assert_eq!(FeedbackLevel::parse("short"), FeedbackLevel::Short);
        assert_eq!(FeedbackLevel::parse("comprehensive"), FeedbackLevel::Comprehensive);
        let odd = FeedbackLevel::parse("verbose");
        assert_eq!(odd, FeedbackLevel::Unrecognized("verbose".to_string()));
        assert_eq!(odd.as_str(), "verbose");
    }

    #[test]
    fn numeric_rating_becomes_label() {
        let payload = fields(json!({"type": "feedback", "feedback_rating": 4}));
        let Event::Feedback(event) = Event::from_fields(EventKind::Feedback, &payload) else {
            panic!("expected feedback");
        };
        assert_eq!(event.rating, "4");
    }

    #[test]
    fn from_stored_rejects_untyped_payloads() {
        assert!(Event::from_stored(&json!({"dataset": "HBN"})).is_none());
        assert!(Event::from_stored(&json!(["download"])).is_none());
        let followup = Event::from_stored(&json!({
            "type": "feedback_log_followup",
            "original_rating": "Good",
            "log_analysis": {"summary": "2 timeouts"}
        }))
        .expect("followup should parse");
        assert_eq!(followup.kind(), EventKind::FeedbackLogFollowup);
        assert!(followup.dataset().is_none());
    }
}
