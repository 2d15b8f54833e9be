#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use browser_sleuth::config::Credentials;
use browser_sleuth::dom;
use browser_sleuth::types::{PageMetrics, RawClickable};
use browser_sleuth::{
    BrowserConnector, Decision, DecisionMaker, Executor, ExecutorConfig, PageDriver,
    ServiceError, Session, StabilityConfig, Target, ToolArgs, VisionAnalyzer,
};
use serde_json::Value;

pub const PASSWORD: &str = "secret";

struct PageState {
    url: String,
    frames: VecDeque<Vec<u8>>,
    changing_frames: bool,
    frame_counter: u64,
    body: String,
    visible: HashSet<String>,
    clickable: Vec<Target>,
    cursor: String,
    click_attempts: Vec<Target>,
    gotos: Vec<String>,
    fail_goto: bool,
    entered_password: Option<String>,
    keys: Vec<String>,
    metrics: PageMetrics,
    keys_scroll: bool,
    raw: Vec<RawClickable>,
    dead: bool,
}

/// In-memory page. Frames are served in order and the last one repeats.
pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PageState {
                url: "about:blank".into(),
                frames: VecDeque::from([b"frame".to_vec()]),
                changing_frames: false,
                frame_counter: 0,
                body: String::new(),
                visible: HashSet::new(),
                clickable: Vec::new(),
                cursor: "auto".into(),
                click_attempts: Vec::new(),
                gotos: Vec::new(),
                fail_goto: false,
                entered_password: None,
                keys: Vec::new(),
                metrics: PageMetrics {
                    scroll_height: 3000,
                    viewport_height: 800,
                    scroll_top: 0,
                },
                keys_scroll: false,
                raw: Vec::new(),
                dead: false,
            }),
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut PageState)) -> Self {
        f(self.state.get_mut().unwrap());
        self
    }

    pub fn with_body(self, body: &str) -> Self {
        self.edit(|s| s.body = body.to_string())
    }

    pub fn with_frames(self, frames: &[&[u8]]) -> Self {
        self.edit(|s| s.frames = frames.iter().map(|f| f.to_vec()).collect())
    }

    /// Every screenshot differs from the previous one.
    pub fn with_changing_frames(self) -> Self {
        self.edit(|s| s.changing_frames = true)
    }

    pub fn with_visible(self, selector: &str) -> Self {
        self.edit(|s| {
            s.visible.insert(selector.to_string());
        })
    }

    pub fn with_clickable(self, target: Target) -> Self {
        self.edit(|s| s.clickable.push(target))
    }

    pub fn with_cursor(self, cursor: &str) -> Self {
        self.edit(|s| s.cursor = cursor.to_string())
    }

    /// The page stops answering, as after a closed tab.
    pub fn crash(&self) {
        self.state.lock().unwrap().dead = true;
    }

    pub fn with_failing_goto(self) -> Self {
        self.edit(|s| s.fail_goto = true)
    }

    pub fn with_key_scrolling(self) -> Self {
        self.edit(|s| s.keys_scroll = true)
    }

    pub fn with_scroll_top(self, top: i64) -> Self {
        self.edit(|s| s.metrics.scroll_top = top)
    }

    pub fn with_raw_clickables(self, raw: Vec<RawClickable>) -> Self {
        self.edit(|s| s.raw = raw)
    }

    /// Password field, username field and submit button, accepting [`PASSWORD`].
    pub fn with_login_form(self) -> Self {
        self.with_visible("input[type=\"password\"]")
            .with_visible("input[name=\"username\"]")
            .with_visible("button[type=\"submit\"]")
    }

    pub fn click_attempts(&self) -> Vec<Target> {
        self.state.lock().unwrap().click_attempts.clone()
    }

    pub fn gotos(&self) -> Vec<String> {
        self.state.lock().unwrap().gotos.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().keys.clone()
    }

    pub fn set_body(&self, body: &str) {
        self.state.lock().unwrap().body = body.to_string();
    }

    fn submit(state: &mut PageState) {
        if state.entered_password.as_deref() == Some(PASSWORD) {
            for sel in dom::PASSWORD_SELECTORS.iter().chain(dom::USERNAME_SELECTORS) {
                state.visible.remove(*sel);
            }
        }
    }

    fn move_to(state: &mut PageState, delta: i64) {
        let max = (state.metrics.scroll_height - state.metrics.viewport_height).max(0);
        state.metrics.scroll_top = (state.metrics.scroll_top + delta).clamp(0, max);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn current_url(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        if state.dead {
            bail!("target closed");
        }
        Ok(state.url.clone())
    }

    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.gotos.push(url.to_string());
        if state.fail_goto {
            bail!("net::ERR_NAME_NOT_RESOLVED");
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if state.changing_frames {
            state.frame_counter += 1;
            return Ok(state.frame_counter.to_le_bytes().to_vec());
        }
        if state.frames.len() > 1 {
            return state.frames.pop_front().ok_or_else(|| anyhow!("no frame"));
        }
        state.frames.front().cloned().ok_or_else(|| anyhow!("no frame"))
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().body.clone())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().visible.contains(selector))
    }

    async fn click(&self, target: &Target, _timeout: Duration) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.click_attempts.push(target.clone());
        if let Target::Css(sel) = target {
            if state.visible.contains(sel) {
                if dom::SUBMIT_SELECTORS.contains(&sel.as_str()) {
                    Self::submit(&mut state);
                }
                return Ok("button".into());
            }
        }
        if state.clickable.contains(target) {
            return Ok(match target {
                Target::ClickableAncestor(_) => "div".into(),
                Target::Role { role, .. } if role == "link" => "a".into(),
                _ => "span".into(),
            });
        }
        bail!("no element for {}", target)
    }

    async fn hover(&self, target: &Target, _timeout: Duration) -> Result<String> {
        let state = self.state.lock().unwrap();
        if state.clickable.contains(target) {
            Ok(state.cursor.clone())
        } else {
            bail!("no element for {}", target)
        }
    }

    async fn fill(&self, target: &Target, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Target::Css(sel) = target {
            if dom::PASSWORD_SELECTORS.contains(&sel.as_str()) {
                state.entered_password = Some(value.to_string());
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.keys.push(key.to_string());
        let page = state.metrics.viewport_height;
        match key {
            "Enter" => Self::submit(&mut state),
            "PageDown" if state.keys_scroll => Self::move_to(&mut state, page),
            "PageUp" if state.keys_scroll => Self::move_to(&mut state, -page),
            _ => {}
        }
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<()> {
        Self::move_to(&mut self.state.lock().unwrap(), delta_y);
        Ok(())
    }

    async fn metrics(&self) -> Result<PageMetrics> {
        Ok(self.state.lock().unwrap().metrics)
    }

    async fn clickables(&self, _selectors: &[&str], _per_selector: usize) -> Result<Vec<RawClickable>> {
        Ok(self.state.lock().unwrap().raw.clone())
    }
}

/// Hands out the current page on every connect.
pub struct FakeConnector {
    page: Mutex<Arc<FakePage>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(page: Arc<FakePage>) -> Self {
        Self {
            page: Mutex::new(page),
            connects: AtomicUsize::new(0),
        }
    }

    /// Later connects open `page` instead.
    pub fn serve(&self, page: Arc<FakePage>) {
        *self.page.lock().unwrap() = page;
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn PageDriver>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let page: Arc<dyn PageDriver> = self.page.lock().unwrap().clone();
        Ok(page)
    }
}

pub struct FakeVision {
    answer: Result<String, ServiceError>,
    calls: AtomicUsize,
}

impl FakeVision {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: ServiceError) -> Self {
        Self {
            answer: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionAnalyzer for FakeVision {
    async fn analyze_image(&self, _image: &[u8], _question: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

/// Replays decisions in order, then repeats the last one forever.
pub struct ScriptedBrain {
    script: Mutex<VecDeque<Result<Decision, ServiceError>>>,
    last: Mutex<Option<Result<Decision, ServiceError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBrain {
    pub fn new(script: Vec<Result<Decision, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl DecisionMaker for ScriptedBrain {
    async fn decide(&self, prompt: &str) -> Result<Decision, ServiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(decision) => {
                *last = Some(decision.clone());
                decision
            }
            None => last.clone().unwrap_or_else(|| {
                Ok(Decision::Done {
                    summary: "script exhausted".into(),
                })
            }),
        }
    }
}

pub fn tool(name: &str, args: Value) -> Result<Decision, ServiceError> {
    Ok(Decision::ToolCall {
        name: name.to_string(),
        args: ToolArgs::from_value(args).unwrap(),
        reason: None,
    })
}

pub fn done(summary: &str) -> Result<Decision, ServiceError> {
    Ok(Decision::Done {
        summary: summary.to_string(),
    })
}

/// Long enough to pass the content-length check of `wait_for_page`.
pub fn rich_body() -> String {
    "Site overview with recent activity. ".repeat(10)
}

pub fn executor_with(
    page: &Arc<FakePage>,
    vision: Option<Arc<dyn VisionAnalyzer>>,
) -> (Executor, Arc<FakeConnector>) {
    executor_in(page, vision, std::env::temp_dir().join("browser-sleuth-tests"))
}

pub fn executor_in(
    page: &Arc<FakePage>,
    vision: Option<Arc<dyn VisionAnalyzer>>,
    screenshot_dir: PathBuf,
) -> (Executor, Arc<FakeConnector>) {
    let connector = Arc::new(FakeConnector::new(page.clone()));
    let session = Session::new(connector.clone());
    let credentials = Credentials {
        username: "admin".into(),
        password: PASSWORD.into(),
    };
    let config = ExecutorConfig {
        screenshot_dir,
        ..ExecutorConfig::default()
    };
    let executor = Executor::new(
        session,
        vision,
        credentials,
        StabilityConfig::default(),
        config,
    );
    (executor, connector)
}
