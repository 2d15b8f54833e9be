mod common;

use std::sync::Arc;

use browser_sleuth::executor::click_strategies;
use browser_sleuth::types::RawClickable;
use browser_sleuth::{ServiceError, Status, Target, VisionAnalyzer};
use common::{FakePage, FakeVision, executor_in, executor_with, rich_body};
use serde_json::Value;

fn raw(text: &str, kind: &str) -> RawClickable {
    RawClickable {
        text: text.into(),
        kind: kind.into(),
        ..RawClickable::default()
    }
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let page = Arc::new(FakePage::new());
    let (mut executor, connector) = executor_with(&page, None);

    let first = executor.connect().await;
    let second = executor.connect().await;

    assert_eq!(first.status, Status::Success);
    assert_eq!(first.message, "Successfully connected to Chrome browser");
    assert_eq!(second.status, Status::Success);
    assert_eq!(second.message, "Already connected to browser");
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_connect_replaces_dead_page() {
    let old_page = Arc::new(FakePage::new().with_body("old tab"));
    let (mut executor, connector) = executor_with(&old_page, None);
    assert_eq!(executor.connect().await.status, Status::Success);

    old_page.crash();
    let new_page = Arc::new(FakePage::new().with_body("fresh tab"));
    connector.serve(new_page.clone());

    let reconnect = executor.connect().await;
    assert_eq!(reconnect.status, Status::Success);
    assert_eq!(reconnect.message, "Successfully connected to Chrome browser");
    assert_eq!(connector.connects(), 2);

    let text = executor.extract_text().await;
    assert_eq!(text.get_str("text"), Some("fresh tab"));
    assert_eq!(executor.connect().await.message, "Already connected to browser");
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_actions_before_connect_are_not_ready() {
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, None);

    let click = executor.click_text("Save", true).await;
    assert_eq!(click.status, Status::NotReady);
    assert!(click.message.contains("connect_browser"));
    assert_eq!(executor.extract_text().await.status, Status::NotReady);
    assert!(page.click_attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_navigate_auto_connects_and_flags_login() {
    let page = Arc::new(FakePage::new().with_login_form());
    let (mut executor, connector) = executor_with(&page, None);

    let result = executor.navigate("https://dash.example.test").await;

    assert_eq!(result.status, Status::Success);
    assert_eq!(connector.connects(), 1);
    assert_eq!(result.get_str("url"), Some("https://dash.example.test"));
    assert_eq!(result.get_bool("login_page_detected"), Some(true));
    assert!(result.get_str("hint").unwrap().contains("login"));
    assert_eq!(page.gotos(), vec!["https://dash.example.test"]);
}

#[tokio::test(start_paused = true)]
async fn test_navigate_failure_still_reports_login_state() {
    let page = Arc::new(FakePage::new().with_failing_goto());
    let (mut executor, _) = executor_with(&page, None);

    let result = executor.navigate("https://nowhere.test").await;

    assert_eq!(result.status, Status::Error);
    assert!(result.message.starts_with("Navigation failed"));
    assert_eq!(result.get_bool("login_page_detected"), Some(false));
    assert_eq!(result.get_str("url"), Some("https://nowhere.test"));
}

#[tokio::test]
async fn test_navigate_rejects_blank_url() {
    let page = Arc::new(FakePage::new());
    let (mut executor, connector) = executor_with(&page, None);
    assert_eq!(executor.navigate("   ").await.status, Status::Error);
    assert_eq!(connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_click_falls_through_to_clickable_ancestor() {
    let page = Arc::new(
        FakePage::new().with_clickable(Target::ClickableAncestor("0 / 1".into())),
    );
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.click_text("0 / 1", true).await;

    assert_eq!(result.status, Status::Success);
    assert_eq!(result.get_str("clicked"), Some("0 / 1"));
    assert_eq!(result.get_str("strategy"), Some("container (div)"));
    assert_eq!(page.click_attempts(), click_strategies("0 / 1", true));
}

#[tokio::test(start_paused = true)]
async fn test_click_stops_at_first_working_strategy() {
    let page = Arc::new(FakePage::new().with_clickable(Target::link("Devices")));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.click_text("Devices", false).await;

    assert_eq!(result.get_str("strategy"), Some("link"));
    assert_eq!(page.click_attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_click_reports_failure_after_every_strategy() {
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.click_text("Ghost", false).await;

    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.message, "Could not click text: Ghost");
    assert_eq!(page.click_attempts().len(), 6);
}

#[tokio::test]
async fn test_hover_reports_cursor_style() {
    let page = Arc::new(
        FakePage::new()
            .with_clickable(Target::ExactText("Alerts".into()))
            .with_cursor("pointer"),
    );
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.hover_text("Alerts", true).await;
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.get_str("strategy"), Some("exact text"));
    assert_eq!(result.get_str("cursor_style"), Some("pointer"));
    assert_eq!(result.get_bool("likely_clickable"), Some(true));

    let missing = executor.hover_text("Nothing", true).await;
    assert_eq!(missing.status, Status::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_page_converges_after_two_identical_polls() {
    let page = Arc::new(
        FakePage::new()
            .with_body(&rich_body())
            .with_frames(&[b"A", b"B", b"B", b"B"]),
    );
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.wait_for_page(30).await;

    assert_eq!(result.status, Status::Loaded);
    assert_eq!(result.get_u64("stable_count"), Some(2));
    assert_eq!(result.get_u64("elapsed_seconds"), Some(9));
    assert_eq!(result.get_bool("screenshot_stable"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_page_ignores_loading_text() {
    let page = Arc::new(FakePage::new().with_body(&format!("{} Loading...", rich_body())));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.wait_for_page(10).await;

    assert_eq!(result.status, Status::Timeout);
    assert!(result.get_str("hint").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_page_times_out_while_frames_change() {
    let page = Arc::new(FakePage::new().with_body(&rich_body()).with_changing_frames());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.wait_for_page(10).await;

    assert_eq!(result.status, Status::Timeout);
    assert_eq!(result.get_u64("stable_count"), Some(0));
    assert!(result.get_u64("elapsed_seconds").unwrap() >= 10);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_page_interrupts_on_login_form() {
    let page = Arc::new(FakePage::new().with_body(&rich_body()).with_login_form());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.wait_for_page(30).await;

    assert_eq!(result.status, Status::LoginRequired);
    assert_eq!(result.get_u64("elapsed_seconds"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_dashboard_needs_numbers_and_panels() {
    let page = Arc::new(FakePage::new().with_body("Network health: 0/1 devices healthy"));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.wait_for_dashboard(60).await;

    assert_eq!(result.status, Status::Ready);
    assert!(result.message.contains("panels detected and stable"));
    assert_eq!(result.get_bool("has_numbers"), Some(true));
    assert_eq!(result.get_u64("elapsed_seconds"), Some(6));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_dashboard_falls_back_to_long_stability() {
    let page = Arc::new(FakePage::new().with_body("Welcome"));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.wait_for_dashboard(60).await;

    assert_eq!(result.status, Status::Ready);
    assert!(result.message.contains("fallback"));
    assert_eq!(result.get_u64("stable_count"), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_login_with_configured_credentials() {
    let page = Arc::new(FakePage::new().with_login_form());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.login(None, None).await;

    assert_eq!(result.status, Status::Success);
    assert!(page.click_attempts().contains(&Target::Css("button[type=\"submit\"]".into())));
}

#[tokio::test(start_paused = true)]
async fn test_login_with_wrong_password_stays_on_form() {
    let page = Arc::new(FakePage::new().with_login_form());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.login(Some("admin"), Some("wrong")).await;

    assert_eq!(result.status, Status::LoginFailed);
}

#[tokio::test(start_paused = true)]
async fn test_login_presses_enter_without_submit_button() {
    let page = Arc::new(
        FakePage::new()
            .with_visible("input[type=\"password\"]")
            .with_visible("input[name=\"username\"]"),
    );
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.login(None, None).await;

    assert_eq!(result.status, Status::Success);
    assert_eq!(page.keys(), vec!["Enter"]);
}

#[tokio::test(start_paused = true)]
async fn test_login_without_form() {
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;
    assert_eq!(executor.login(None, None).await.status, Status::NoLogin);

    let page = Arc::new(FakePage::new().with_visible("input[type=\"password\"]"));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;
    let result = executor.login(None, None).await;
    assert_eq!(result.status, Status::Error);
    assert!(result.message.contains("no username field"));
}

#[tokio::test]
async fn test_scroll_falls_back_to_script_when_keys_do_nothing() {
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.scroll_page("down").await;

    assert_eq!(result.status, Status::Success);
    assert_eq!(result.get_bool("did_scroll"), Some(true));
    assert_eq!(result.get_u64("scrolled_pixels"), Some(600));
    assert_eq!(result.get_u64("new_scroll_top"), Some(600));
    assert_eq!(page.keys(), vec!["PageDown"]);
}

#[tokio::test]
async fn test_scroll_by_key_press() {
    let page = Arc::new(FakePage::new().with_key_scrolling());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.scroll_page("sideways").await;

    assert_eq!(result.get_str("direction"), Some("down"));
    assert_eq!(result.get_u64("scrolled_pixels"), Some(800));
    assert_eq!(result.get_u64("scroll_height"), Some(3000));
}

#[tokio::test]
async fn test_scroll_at_edge_is_not_a_failure() {
    let page = Arc::new(FakePage::new().with_scroll_top(2200));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let down = executor.scroll_page("down").await;
    assert_eq!(down.status, Status::Success);
    assert_eq!(down.get_bool("did_scroll"), Some(false));

    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;
    let up = executor.scroll_page("UP").await;
    assert_eq!(up.get_str("direction"), Some("up"));
    assert_eq!(up.get_bool("did_scroll"), Some(false));
}

#[tokio::test]
async fn test_extract_text_is_capped() {
    let page = Arc::new(FakePage::new().with_body(&"x".repeat(5000)));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.extract_text().await;

    assert_eq!(result.get_u64("length"), Some(3000));
    assert_eq!(result.get_str("text").unwrap().len(), 3000);
}

#[tokio::test]
async fn test_list_clickables_ranks_and_filters() {
    let page = Arc::new(FakePage::new().with_raw_clickables(vec![
        raw("Home", "a"),
        raw("0/1 Critical", "button"),
        raw("Home", "a"),
        raw("   ", "button"),
        raw("Wireless Controller", "div"),
    ]));
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let all = executor.list_clickable_elements(None).await;
    assert_eq!(all.status, Status::Success);
    assert_eq!(all.get_u64("count"), Some(3));
    let elements = all.data["elements"].as_array().unwrap();
    let texts: Vec<&str> = elements.iter().filter_map(|e| e["text"].as_str()).collect();
    assert_eq!(texts, vec!["0/1 Critical", "Wireless Controller", "Home"]);
    assert!(all.data.get("section_keyword").is_none());

    let section = executor.list_clickable_elements(Some("wireless")).await;
    assert_eq!(section.get_u64("count"), Some(1));
    assert_eq!(section.get_str("section_keyword"), Some("wireless"));
}

#[tokio::test]
async fn test_vision_tools_without_vision() {
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, None);
    executor.connect().await;

    let result = executor.analyze_page("what is here?").await;

    assert_eq!(result.status, Status::Error);
    assert!(result.message.contains("OPENAI_API_KEY"));
}

#[tokio::test]
async fn test_analyze_page_returns_analysis() {
    let vision = Arc::new(FakeVision::answering("Three panels, one critical."));
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, Some(vision.clone() as Arc<dyn VisionAnalyzer>));
    executor.connect().await;

    let result = executor.analyze_page("what is here?").await;

    assert_eq!(result.status, Status::Success);
    assert_eq!(result.get_str("analysis"), Some("Three panels, one critical."));
    assert_eq!(vision.calls(), 1);

    let explored = executor.explore_section("Network Health").await;
    assert_eq!(explored.get_str("section"), Some("Network Health"));
    assert!(explored.get_str("hint").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_click_element_clicks_identified_text() {
    let vision: Arc<dyn VisionAnalyzer> = Arc::new(FakeVision::answering(" 'Critical' \n"));
    let page = Arc::new(FakePage::new().with_clickable(Target::ExactText("Critical".into())));
    let (mut executor, _) = executor_with(&page, Some(vision));
    executor.connect().await;

    let result = executor.click_element("the red critical badge").await;

    assert_eq!(result.status, Status::Success);
    assert_eq!(result.get_str("identified_as"), Some("Critical"));
    assert_eq!(result.get_str("strategy"), Some("exact text"));
}

#[tokio::test]
async fn test_vision_failure_is_an_error_result() {
    let vision: Arc<dyn VisionAnalyzer> = Arc::new(FakeVision::failing(ServiceError::Api {
        service: "vision",
        status: "400 Bad Request".into(),
        message: "bad image".into(),
    }));
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, Some(vision));
    executor.connect().await;

    let result = executor.click_element("anything").await;

    assert_eq!(result.status, Status::Error);
    assert!(result.message.starts_with("Analysis failed"));
    assert!(page.click_attempts().is_empty());
}

#[tokio::test]
async fn test_take_screenshot_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let shots = dir.path().join("shots");
    let page = Arc::new(FakePage::new().with_frames(&[b"png-bytes"]));
    let (mut executor, _) = executor_in(&page, None, shots.clone());
    executor.connect().await;

    let result = executor.take_screenshot("after login").await;

    assert_eq!(result.status, Status::Success);
    assert_eq!(result.get_str("description"), Some("after login"));
    let file = std::path::PathBuf::from(result.get_str("file").unwrap());
    assert!(file.starts_with(&shots));
    assert_eq!(file.extension().and_then(|e| e.to_str()), Some("png"));
    assert_eq!(std::fs::read(&file).unwrap(), b"png-bytes");
}

#[tokio::test(start_paused = true)]
async fn test_wait_seconds_is_capped() {
    let page = Arc::new(FakePage::new());
    let (mut executor, _) = executor_with(&page, None);

    let result = executor.wait_seconds(500).await;

    assert_eq!(result.get_u64("waited_seconds"), Some(60));
    assert!(matches!(result.data.get("waited_seconds"), Some(Value::Number(_))));
}
