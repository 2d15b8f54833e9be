//! `headless_chrome` implementation of the browser capability interface.
//!
//! `headless_chrome` is blocking, so every call runs under `spawn_blocking`.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::dom;
use crate::hands::{BrowserConnector, PageDriver, Target};
use crate::types::{PageMetrics, RawClickable};

/// Attaches to a running Chrome, optionally launching one.
pub struct ChromeConnector {
    config: BrowserConfig,
}

impl ChromeConnector {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserConnector for ChromeConnector {
    async fn connect(&self) -> Result<Arc<dyn PageDriver>> {
        info!("Attempting to attach to Chrome at {}", self.config.debug_url);
        let ws_url = match resolve_ws_url(&self.config.debug_url).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("No debug endpoint at {}: {:#}", self.config.debug_url, e);
                None
            }
        };

        let config = self.config.clone();
        let page = tokio::task::spawn_blocking(move || -> Result<ChromePage> {
            if let Some(ws_url) = ws_url {
                match Browser::connect(ws_url) {
                    Ok(browser) => {
                        info!("Attached to existing Chrome");
                        return ChromePage::attach(browser);
                    }
                    Err(e) => warn!("Attach failed: {:#}", e),
                }
            }

            if !config.launch_if_unreachable {
                bail!(
                    "No reachable browser at {}. Start Chrome with --remote-debugging-port=9222 \
                     or set BROWSER_LAUNCH=true.",
                    config.debug_url
                );
            }
            ChromePage::launch(&config)
        })
        .await
        .map_err(|e| anyhow!("browser connect task panicked: {}", e))??;

        Ok(Arc::new(page))
    }
}

/// Ask the debug endpoint for its browser websocket URL.
async fn resolve_ws_url(debug_url: &str) -> Result<String> {
    if debug_url.starts_with("ws://") || debug_url.starts_with("wss://") {
        return Ok(debug_url.to_string());
    }

    let version: Value = reqwest::Client::new()
        .get(format!("{}/json/version", debug_url.trim_end_matches('/')))
        .timeout(Duration::from_secs(5))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    version["webSocketDebuggerUrl"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| anyhow!("no webSocketDebuggerUrl in {}/json/version", debug_url))
}

fn default_profile_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow!("no cache or working directory for the browser profile"))?;
    Ok(base.join("browser-sleuth").join("profile"))
}

/// One Chrome tab driven through the DevTools protocol.
pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    fn attach(browser: Browser) -> Result<Self> {
        let tab = {
            let tabs = browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow!("tab list lock poisoned"))?;
            tabs.first().cloned()
        };
        let tab = match tab {
            Some(t) => {
                debug!("Using existing tab");
                t
            }
            None => {
                debug!("No tabs found, creating new one");
                browser.new_tab()?
            }
        };
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    fn launch(config: &BrowserConfig) -> Result<Self> {
        let profile = match &config.profile_dir {
            Some(dir) => dir.clone(),
            None => default_profile_dir()?,
        };
        std::fs::create_dir_all(&profile)
            .with_context(|| format!("creating browser profile at {}", profile.display()))?;

        let options = LaunchOptions {
            headless: config.headless,
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!("Launching Chrome (headless={})", config.headless);
        let browser = Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    async fn with_tab<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Tab) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|e| anyhow!("browser task panicked: {}", e))?
    }
}

fn eval_value(tab: &Tab, script: &str) -> Result<Option<Value>> {
    Ok(tab.evaluate(script, false)?.value)
}

fn eval_string(tab: &Tab, script: &str) -> Result<String> {
    Ok(eval_value(tab, script)?
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct LocateHit {
    found: bool,
    #[serde(default)]
    tag: String,
}

/// Resolve `target` in the page and tag the match.
fn locate(tab: &Tab, target: &Target) -> Result<String> {
    let (mode, query, role) = match target {
        Target::Role { role, name } => ("role", name.as_str(), role.as_str()),
        Target::ExactText(t) => ("exact", t.as_str(), ""),
        Target::PartialText(t) => ("partial", t.as_str(), ""),
        Target::TextLocator(t) => ("text", t.as_str(), ""),
        Target::ClickableAncestor(t) => ("ancestor", t.as_str(), ""),
        Target::Css(sel) => ("css", sel.as_str(), ""),
    };
    let script = dom::call_js(dom::LOCATE_JS, &[json!(mode), json!(query), json!(role)]);
    let raw = eval_string(tab, &script)?;
    let hit: LocateHit =
        serde_json::from_str(&raw).with_context(|| format!("locate returned {:?}", raw))?;
    if !hit.found {
        bail!("no element matches {}", target);
    }
    Ok(hit.tag)
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn current_url(&self) -> Result<String> {
        self.with_tab(|tab| eval_string(tab, dom::URL_JS)).await
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let url = url.to_string();
        self.with_tab(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            tab.wait_for_element("body")?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.with_tab(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await
    }

    async fn body_text(&self) -> Result<String> {
        self.with_tab(|tab| eval_string(tab, dom::BODY_TEXT_JS)).await
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        let script = dom::call_js(dom::VISIBLE_JS, &[json!(selector)]);
        self.with_tab(move |tab| {
            Ok(eval_value(tab, &script)?
                .and_then(|v| v.as_bool())
                .unwrap_or(false))
        })
        .await
    }

    async fn click(&self, target: &Target, timeout: Duration) -> Result<String> {
        let target = target.clone();
        self.with_tab(move |tab| {
            let tag = locate(tab, &target)?;
            tab.wait_for_element_with_custom_timeout(dom::TARGET_SELECTOR, timeout)?
                .click()?;
            Ok(tag)
        })
        .await
    }

    async fn hover(&self, target: &Target, timeout: Duration) -> Result<String> {
        let target = target.clone();
        self.with_tab(move |tab| {
            locate(tab, &target)?;
            tab.wait_for_element_with_custom_timeout(dom::TARGET_SELECTOR, timeout)?
                .move_mouse_over()?;
            std::thread::sleep(Duration::from_millis(500));
            eval_string(tab, dom::CURSOR_JS)
        })
        .await
    }

    async fn fill(&self, target: &Target, value: &str) -> Result<()> {
        let target = target.clone();
        let value = value.to_string();
        self.with_tab(move |tab| {
            locate(tab, &target)?;
            tab.find_element(dom::TARGET_SELECTOR)?.click()?;
            eval_value(tab, dom::CLEAR_TARGET_JS)?;
            tab.type_str(&value)?;
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_tab(move |tab| {
            tab.press_key(&key)?;
            Ok(())
        })
        .await
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<()> {
        let script = dom::call_js(dom::SCROLL_JS, &[json!(delta_y)]);
        self.with_tab(move |tab| {
            eval_value(tab, &script)?;
            Ok(())
        })
        .await
    }

    async fn metrics(&self) -> Result<PageMetrics> {
        self.with_tab(|tab| {
            let raw = eval_string(tab, dom::METRICS_JS)?;
            serde_json::from_str(&raw).with_context(|| format!("metrics returned {:?}", raw))
        })
        .await
    }

    async fn clickables(&self, selectors: &[&str], per_selector: usize) -> Result<Vec<RawClickable>> {
        let script = dom::call_js(dom::CLICKABLES_JS, &[json!(selectors), json!(per_selector)]);
        self.with_tab(move |tab| {
            let raw = eval_string(tab, &script)?;
            serde_json::from_str(&raw).with_context(|| "clickable harvest returned invalid JSON")
        })
        .await
    }
}
