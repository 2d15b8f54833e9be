//! Infers "finished rendering" from repeated visual sameness.
//!
//! Each poll contributes a screenshot hash plus the page text. Two consecutive
//! identical hashes move the detector from `Polling` to `CandidateStable`; it
//! becomes `Stable` once the stability counter reaches the configured number of
//! polls and the content heuristics agree. A visible password field at any poll
//! interrupts with `LoginRequired`. Timeouts are decided by the caller's clock.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use sha2::{Digest, Sha256};

const PAGE_LOADING: &[&str] = &["loading", "please wait", "spinner", "initializing", "fetching"];
const DASHBOARD_LOADING: &[&str] = &["loading", "please wait", "fetching", "initializing"];
const PAGE_PANELS: &[&str] = &["health", "devices", "network", "wireless", "critical", "issues"];
const DASHBOARD_PANELS: &[&str] = &[
    "health",
    "devices",
    "network",
    "wireless",
    "controller",
    "access point",
];
const MIN_CONTENT_CHARS: usize = 200;

static DASHBOARD_NUMBERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+\s*/\s*\d+|\d+%|\d+\s*(devices?|total|healthy|critical|issues?)")
        .expect("dashboard number pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityConfig {
    pub poll_interval: Duration,
    /// Consecutive identical screenshots required before content is judged.
    pub required_stable_polls: u32,
    /// Dashboard only: this many stable polls count as ready without a numeric match.
    pub dashboard_fallback_polls: u32,
    /// Upper bound on any caller-supplied `max_wait`.
    pub max_wait_cap: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            required_stable_polls: 2,
            dashboard_fallback_polls: 3,
            max_wait_cap: Duration::from_secs(120),
        }
    }
}

impl StabilityConfig {
    pub fn clamp_wait(&self, requested_secs: u64) -> Duration {
        Duration::from_secs(requested_secs).min(self.max_wait_cap)
    }
}

/// Which readiness predicate applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Page,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Polling,
    CandidateStable,
    Stable,
    LoginRequired,
}

/// Content heuristics for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentSignals {
    pub text_length: usize,
    pub is_loading: bool,
    pub has_panels: bool,
    pub has_numbers: bool,
}

impl ContentSignals {
    pub fn read(text: &str, readiness: Readiness) -> Self {
        let lower = text.to_lowercase();
        let (loading, panels) = match readiness {
            Readiness::Page => (PAGE_LOADING, PAGE_PANELS),
            Readiness::Dashboard => (DASHBOARD_LOADING, DASHBOARD_PANELS),
        };
        Self {
            text_length: text.trim().chars().count(),
            is_loading: loading.iter().any(|w| lower.contains(w)),
            has_panels: panels.iter().any(|w| lower.contains(w)),
            has_numbers: DASHBOARD_NUMBERS.is_match(&lower),
        }
    }
}

/// One observation of the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSample {
    /// Empty when the screenshot could not be taken; never equal to anything.
    pub hash: String,
    pub text: String,
    pub login_visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVerdict {
    Pending,
    Stable { reason: &'static str },
    LoginRequired,
}

#[derive(Debug, Clone)]
pub struct StabilityDetector {
    readiness: Readiness,
    required: u32,
    fallback: u32,
    last_hash: Option<String>,
    stable_count: u32,
    state: DetectorState,
    signals: ContentSignals,
}

impl StabilityDetector {
    pub fn new(readiness: Readiness, config: &StabilityConfig) -> Self {
        Self {
            readiness,
            required: config.required_stable_polls.max(1),
            fallback: config.dashboard_fallback_polls.max(1),
            last_hash: None,
            stable_count: 0,
            state: DetectorState::Polling,
            signals: ContentSignals::default(),
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    /// Signals of the most recent poll.
    pub fn signals(&self) -> ContentSignals {
        self.signals
    }

    pub fn observe(&mut self, sample: &PollSample) -> PollVerdict {
        self.signals = ContentSignals::read(&sample.text, self.readiness);

        if sample.login_visible {
            self.state = DetectorState::LoginRequired;
            return PollVerdict::LoginRequired;
        }

        let same = !sample.hash.is_empty() && self.last_hash.as_deref() == Some(sample.hash.as_str());
        self.last_hash = Some(sample.hash.clone());
        if !same {
            self.stable_count = 0;
            self.state = DetectorState::Polling;
            return PollVerdict::Pending;
        }

        self.stable_count += 1;
        self.state = DetectorState::CandidateStable;
        match self.ready_reason() {
            Some(reason) => {
                self.state = DetectorState::Stable;
                PollVerdict::Stable { reason }
            }
            None => PollVerdict::Pending,
        }
    }

    fn ready_reason(&self) -> Option<&'static str> {
        let s = self.signals;
        if s.is_loading {
            return None;
        }
        match self.readiness {
            Readiness::Page => (self.stable_count >= self.required
                && (s.text_length > MIN_CONTENT_CHARS || s.has_panels))
                .then_some("screenshots stable and content present"),
            Readiness::Dashboard => {
                if self.stable_count >= self.required && s.has_numbers && s.has_panels {
                    Some("panels detected and stable")
                } else if self.stable_count >= self.fallback {
                    Some("page very stable (fallback)")
                } else {
                    None
                }
            }
        }
    }
}

/// Hex SHA-256 of screenshot bytes; empty input hashes to the empty string.
pub fn content_hash(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
