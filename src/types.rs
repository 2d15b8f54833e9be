use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome class of a single browser action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failed,
    Error,
    Timeout,
    LoginRequired,
    Ready,
    NotReady,
    Loaded,
    NoLogin,
    LoginFailed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Error => "error",
            Status::Timeout => "timeout",
            Status::LoginRequired => "login_required",
            Status::Ready => "ready",
            Status::NotReady => "not_ready",
            Status::Loaded => "loaded",
            Status::NoLogin => "no_login",
            Status::LoginFailed => "login_failed",
        }
    }

    /// Statuses after which the requested effect is known to hold.
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            Status::Success | Status::Ready | Status::Loaded | Status::NoLogin
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one executor call produced. Failures live in `status`, never in a panic or `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: Status,
    pub message: String,
    /// Action-specific fields (clicked text, elapsed seconds, element list, ...).
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ActionResult {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Status::Success, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Status::Failed, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, message)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    /// Compact JSON rendering for history lines, cut to `max_chars`.
    pub fn summary(&self, max_chars: usize) -> String {
        let rendered = serde_json::to_string(self).unwrap_or_else(|_| self.message.clone());
        truncate_chars(&rendered, max_chars)
    }
}

/// One clickable candidate found on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickableElement {
    pub text: String,
    /// Selector family the element was harvested from.
    pub kind: String,
}

/// Raw element as harvested from the page, before filtering and ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawClickable {
    pub text: String,
    pub kind: String,
    #[serde(default)]
    pub parent_text: String,
}

/// Scroll geometry of the current document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetrics {
    pub scroll_height: i64,
    pub viewport_height: i64,
    pub scroll_top: i64,
}

/// Arguments of a tool call as sent by the decision-maker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(pub Map<String, Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts only JSON objects; `null` becomes empty args.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            Value::Null => Some(Self::default()),
            _ => None,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Non-blank string argument.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => default,
            },
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(default),
            _ => default,
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// A required argument is missing when absent, `null`, or a blank string.
    pub fn is_missing(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ToolArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// Cut `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
