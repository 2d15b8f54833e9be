//! Runtime configuration, read from the environment (and `.env` via `dotenvy`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::executor::ExecutorConfig;
use crate::orchestrator::AgentConfig;
use crate::retry::RetryPolicy;
use crate::stability::StabilityConfig;

/// Where and how to reach the browser automation surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConfig {
    /// Remote debugging endpoint of an already running Chrome.
    pub debug_url: String,
    /// Launch a local Chrome when nothing answers on `debug_url`.
    pub launch_if_unreachable: bool,
    pub headless: bool,
    /// Profile directory for a launched browser.
    pub profile_dir: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            debug_url: "http://127.0.0.1:9222".into(),
            launch_if_unreachable: false,
            headless: true,
            profile_dir: None,
        }
    }
}

/// Fallback credentials for the `login` action.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "admin".into(),
            password: String::new(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Decision-maker and vision endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub vision_model: String,
    /// Whole-request cap for decision-maker and vision calls.
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            vision_model: "gpt-4o".into(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "********"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub credentials: Credentials,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub stability: StabilityConfig,
    pub retry: RetryPolicy,
    pub executor: ExecutorConfig,
}

impl Config {
    /// Build from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Config::default();

        let browser = BrowserConfig {
            debug_url: get("BROWSER_DEBUG_URL").unwrap_or(defaults.browser.debug_url),
            launch_if_unreachable: parse_bool(&get, "BROWSER_LAUNCH", false)?,
            headless: parse_bool(&get, "BROWSER_HEADLESS", true)?,
            profile_dir: get("BROWSER_PROFILE_DIR").map(PathBuf::from),
        };

        let credentials = Credentials {
            username: get("AGENT_USERNAME").unwrap_or(defaults.credentials.username),
            password: get("AGENT_PASSWORD").unwrap_or_default(),
        };

        let llm = LlmConfig {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.llm.base_url),
            model: get("AGENT_MODEL").unwrap_or(defaults.llm.model),
            vision_model: get("VISION_MODEL").unwrap_or(defaults.llm.vision_model),
            request_timeout: Duration::from_secs(parse(
                &get,
                "LLM_TIMEOUT_SECS",
                defaults.llm.request_timeout.as_secs(),
            )?),
        };

        let agent = AgentConfig {
            max_steps: parse(&get, "AGENT_MAX_STEPS", defaults.agent.max_steps)?,
            history_window: parse(&get, "AGENT_HISTORY_WINDOW", defaults.agent.history_window)?,
            stuck_threshold: parse(&get, "AGENT_STUCK_THRESHOLD", defaults.agent.stuck_threshold)?,
        };

        let stability = StabilityConfig {
            poll_interval: Duration::from_secs(parse(
                &get,
                "STABILITY_POLL_SECS",
                defaults.stability.poll_interval.as_secs(),
            )?),
            required_stable_polls: parse(
                &get,
                "STABLE_POLLS_REQUIRED",
                defaults.stability.required_stable_polls,
            )?,
            dashboard_fallback_polls: parse(
                &get,
                "DASHBOARD_FALLBACK_POLLS",
                defaults.stability.dashboard_fallback_polls,
            )?,
            max_wait_cap: Duration::from_secs(parse(
                &get,
                "MAX_WAIT_CAP_SECS",
                defaults.stability.max_wait_cap.as_secs(),
            )?),
        };

        let retry = RetryPolicy {
            max_attempts: parse(&get, "LLM_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: Duration::from_secs(parse(
                &get,
                "LLM_RETRY_BASE_SECS",
                defaults.retry.base_delay.as_secs(),
            )?),
        };

        let mut executor = defaults.executor;
        if let Some(dir) = get("SCREENSHOT_DIR") {
            executor.screenshot_dir = PathBuf::from(dir);
        }
        if let Some(keywords) = get("CLICK_PRIORITY_KEYWORDS") {
            executor.priority_keywords = keywords
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
        }

        Ok(Config {
            browser,
            credentials,
            llm,
            agent,
            stability,
            retry,
            executor,
        })
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => anyhow::bail!("invalid value for {key}: '{v}' (expected true/false)"),
    }
}
