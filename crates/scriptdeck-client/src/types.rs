use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Opaque server-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Progress as the server reports it: a numerator/denominator pair.
///
/// `[0, 0]` means the script has not reported anything yet. A denominator
/// of `1` is how the server encodes a bare count with no known total, so
/// neither `0` nor `1` denominators yield a displayable fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress(pub f64, pub f64);

impl Progress {
    pub const NONE: Self = Self(0.0, 0.0);

    #[must_use]
    pub fn new(numerator: f64, denominator: f64) -> Self {
        Self(numerator, denominator)
    }

    #[must_use]
    pub fn numerator(&self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn denominator(&self) -> f64 {
        self.1
    }

    /// Completion fraction in `[0, 1]`, when the pair carries a real ratio.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        if self.1 == 0.0 || self.1 == 1.0 {
            return None;
        }
        Some((self.0 / self.1).clamp(0.0, 1.0))
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::NONE
    }
}

/// Parsed argument type tag from a script's `## arg:` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Int,
    Float,
    Number,
    Str,
    MultiLineStr,
    Password,
    /// File upload. The server stores the upload and passes the stored
    /// path to the script.
    File { extensions: Vec<String> },
    Choice { options: Vec<String> },
    /// A tag this client does not recognize, kept verbatim so callers can
    /// surface it instead of silently dropping the argument.
    Unknown(String),
}

impl ArgKind {
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        let mut parts = tag.split(':');
        let head = parts.next().unwrap_or_default();
        match head {
            "bool" => Self::Bool,
            "int" => Self::Int,
            "float" => Self::Float,
            "number" => Self::Number,
            "str" => Self::Str,
            "multi_line_str" => Self::MultiLineStr,
            "password" => Self::Password,
            "file" => Self::File {
                extensions: parts.map(str::to_string).collect(),
            },
            "choice" => Self::Choice {
                options: parts.map(str::to_string).collect(),
            },
            _ => Self::Unknown(tag.to_string()),
        }
    }

    /// The wire tag this kind round-trips to.
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::Bool => "bool".to_string(),
            Self::Int => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::Number => "number".to_string(),
            Self::Str => "str".to_string(),
            Self::MultiLineStr => "multi_line_str".to_string(),
            Self::Password => "password".to_string(),
            Self::File { extensions } => join_tag("file", extensions),
            Self::Choice { options } => join_tag("choice", options),
            Self::Unknown(tag) => tag.clone(),
        }
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    /// Initial form value for an argument of this kind.
    #[must_use]
    pub fn default_value(&self) -> String {
        match self {
            Self::Bool => "false".to_string(),
            Self::Choice { options } => options.first().cloned().unwrap_or_default(),
            _ => String::new(),
        }
    }
}

fn join_tag(head: &str, rest: &[String]) -> String {
    let mut tag = head.to_string();
    for part in rest {
        tag.push(':');
        tag.push_str(part);
    }
    tag
}

/// One declared script argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ArgSpecWire", into = "ArgSpecWire")]
pub struct ArgSpec {
    pub kind: ArgKind,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ArgSpecWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    description: Option<String>,
}

impl From<ArgSpecWire> for ArgSpec {
    fn from(wire: ArgSpecWire) -> Self {
        Self {
            kind: ArgKind::parse(&wire.kind),
            description: wire.description,
        }
    }
}

impl From<ArgSpec> for ArgSpecWire {
    fn from(spec: ArgSpec) -> Self {
        Self {
            kind: spec.kind.tag(),
            description: spec.description,
        }
    }
}

/// One entry of the `/scripts/` catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptInfo {
    /// Executable name; doubles as the stable script id in URLs.
    pub script: String,
    /// Human-readable display name.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

/// One job as the server reports it under `/running/`.
///
/// Timestamps are naive local times; the server never attaches an offset,
/// but parsing tolerates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Executable name of the launching script.
    pub script: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(with = "isotime")]
    pub start_time: NaiveDateTime,
    #[serde(default, with = "isotime_opt")]
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub return_code: Option<i32>,
}

impl JobRecord {
    /// A job is finished exactly when the server has reported a return
    /// code. Negative codes mean the job was killed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.return_code.is_some()
    }
}

/// Serde helpers for the server's naive ISO-8601 timestamps.
pub mod isotime {
    use chrono::{DateTime, FixedOffset, NaiveDateTime};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[must_use]
    pub fn parse(value: &str) -> Option<NaiveDateTime> {
        if let Ok(naive) = value.parse::<NaiveDateTime>() {
            return Some(naive);
        }
        value
            .parse::<DateTime<FixedOffset>>()
            .ok()
            .map(|stamped| stamped.naive_local())
    }

    #[must_use]
    pub fn format(value: &NaiveDateTime) -> String {
        value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// Serde helpers for nullable naive timestamps.
pub mod isotime_opt {
    use chrono::NaiveDateTime;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::isotime;

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(inner) => serializer.serialize_some(&isotime::format(inner)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => isotime::parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}
