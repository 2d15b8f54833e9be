//! Page-side scripts and the pure helpers that interpret their output.
//!
//! Scripts never restyle the page. Element lookups tag their match with a
//! `data-sleuth-target` attribute so the driver can act on it through the
//! protocol (real mouse events) instead of a synthetic `el.click()`.

use std::collections::HashSet;

use crate::types::{ClickableElement, RawClickable, truncate_chars};

/// Attribute placed on the element a lookup resolved to.
pub const TARGET_ATTR: &str = "data-sleuth-target";
pub const TARGET_SELECTOR: &str = "[data-sleuth-target]";

/// Selector families harvested by `list_clickable_elements`, in harvest order.
pub const CLICKABLE_SELECTORS: &[&str] = &[
    "a[href]",
    "button",
    "[role='button']",
    "[onclick]",
    "[class*='clickable']",
    "[class*='card']",
    "[class*='panel']",
    "[class*='link']",
    "[class*='btn']",
    "[tabindex]",
];

pub const PER_SELECTOR_LIMIT: usize = 50;
pub const MAX_CLICKABLE_TEXT: usize = 100;
pub const PASSWORD_PROBE: &str = "input[type=\"password\"]";

pub const PASSWORD_SELECTORS: &[&str] = &[
    "input[type=\"password\"]",
    "input[name=\"password\"]",
    "#password",
];

pub const USERNAME_SELECTORS: &[&str] = &[
    "input[name=\"username\"]",
    "input[name=\"user\"]",
    "input[id*=\"username\"]",
    "input[id*=\"user\"]",
    "input[type=\"text\"]",
    "#username",
];

pub const SUBMIT_SELECTORS: &[&str] = &["button[type=\"submit\"]", "input[type=\"submit\"]"];
pub const SUBMIT_LABELS: &[&str] = &["Log in", "Login", "Sign in", "Submit"];

/// Resolve `(mode, query)` to one visible element and tag it with [`TARGET_ATTR`].
///
/// Returns a JSON string `{found, tag, classes}`.
pub const LOCATE_JS: &str = r#"
((mode, query, role) => {
  document.querySelectorAll('[data-sleuth-target]').forEach(e => e.removeAttribute('data-sleuth-target'));
  const norm = s => (s || '').replace(/\s+/g, ' ').trim();
  const visible = el => {
    if (!el || !el.getBoundingClientRect) return false;
    const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden';
  };
  const deepest = list => list.filter(el => !list.some(o => o !== el && el.contains(o)));
  const textOf = el => norm(el.innerText || el.textContent);
  const all = () => Array.from(document.body.querySelectorAll('*')).filter(visible);
  let hit = null;

  if (mode === 'role') {
    const sel = role === 'link'
      ? 'a[href], [role="link"]'
      : 'button, [role="button"], input[type="button"], input[type="submit"]';
    hit = Array.from(document.querySelectorAll(sel)).filter(visible).find(el =>
      norm(el.getAttribute('aria-label')) === query || textOf(el) === query || norm(el.value) === query);
  } else if (mode === 'exact') {
    hit = deepest(all().filter(el => textOf(el) === query))[0];
  } else if (mode === 'partial') {
    const q = query.toLowerCase();
    hit = deepest(all().filter(el => textOf(el).toLowerCase().includes(q)))[0];
  } else if (mode === 'text') {
    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, null);
    let node;
    while ((node = walker.nextNode())) {
      if (node.textContent.includes(query) && visible(node.parentElement)) { hit = node.parentElement; break; }
    }
  } else if (mode === 'ancestor') {
    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, null);
    let node;
    outer: while ((node = walker.nextNode())) {
      if (!node.textContent.includes(query)) continue;
      let el = node.parentElement;
      for (let i = 0; i < 8 && el; i++) {
        const tag = el.tagName.toLowerCase();
        const r = el.getAttribute('role');
        const clickable = tag === 'a' || tag === 'button' ||
          r === 'button' || r === 'link' || r === 'row' ||
          el.hasAttribute('onclick') || el.hasAttribute('ng-click') || el.hasAttribute('data-click') ||
          getComputedStyle(el).cursor === 'pointer' ||
          /click|card|panel|row|item|link|btn/.test(String(el.className));
        if (clickable) { hit = el; break outer; }
        el = el.parentElement;
      }
    }
  } else if (mode === 'css') {
    hit = Array.from(document.querySelectorAll(query)).find(visible);
  }

  if (!hit) return JSON.stringify({found: false});
  hit.setAttribute('data-sleuth-target', '1');
  hit.scrollIntoView({block: 'center', inline: 'nearest'});
  return JSON.stringify({found: true, tag: hit.tagName.toLowerCase(), classes: String(hit.className).slice(0, 80)});
})
"#;

/// Computed cursor of the tagged element.
pub const CURSOR_JS: &str = r#"
(() => {
  const el = document.querySelector('[data-sleuth-target]');
  return el ? getComputedStyle(el).cursor : '';
})()
"#;

/// Clear the tagged input so typed text replaces its value.
pub const CLEAR_TARGET_JS: &str = r#"
(() => {
  const el = document.querySelector('[data-sleuth-target]');
  if (el && 'value' in el) { el.value = ''; }
  return true;
})()
"#;

pub const BODY_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

pub const URL_JS: &str = "window.location.href";

/// `(selector) => bool`
pub const VISIBLE_JS: &str = r#"
((selector) => {
  const el = document.querySelector(selector);
  if (!el) return false;
  const r = el.getBoundingClientRect();
  const s = getComputedStyle(el);
  return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden';
})
"#;

pub const METRICS_JS: &str = r#"
JSON.stringify({
  scroll_height: document.documentElement.scrollHeight,
  viewport_height: document.documentElement.clientHeight,
  scroll_top: Math.round(document.documentElement.scrollTop || window.scrollY || 0)
})
"#;

/// `(dy) => true`. Window first, then the main scrollable container.
pub const SCROLL_JS: &str = r#"
((dy) => {
  const before = window.scrollY;
  window.scrollBy(0, dy);
  if (window.scrollY === before) {
    const el = document.querySelector('main') || document.querySelector('[class*="content"]') ||
      document.scrollingElement || document.body;
    el.scrollBy(0, dy);
  }
  return true;
})
"#;

/// `(selectors, perSelector) => JSON [{text, kind, parent_text}]`
pub const CLICKABLES_JS: &str = r#"
((selectors, perSelector) => {
  const visible = el => {
    const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden';
  };
  const out = [];
  for (const sel of selectors) {
    let nodes;
    try { nodes = Array.from(document.querySelectorAll(sel)).slice(0, perSelector); } catch (e) { continue; }
    for (const el of nodes) {
      if (!visible(el)) continue;
      const parent = el.parentElement;
      out.push({
        text: (el.innerText || '').trim(),
        kind: sel,
        parent_text: parent ? (parent.innerText || '').slice(0, 500) : ''
      });
    }
  }
  return JSON.stringify(out);
})
"#;

/// Call a page function literal with JSON-encoded arguments.
pub fn call_js(function: &str, args: &[serde_json::Value]) -> String {
    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    format!("({})({})", function.trim(), rendered.join(", "))
}

/// Filter, deduplicate and rank harvested elements.
///
/// Keeps texts shorter than 200 chars, first occurrence of each exact text,
/// and (with a keyword) only elements whose own or parent text mentions it.
/// Fraction-like texts rank first, then failure words, then `priority_keywords`.
pub fn rank_clickables(
    raw: Vec<RawClickable>,
    section_keyword: Option<&str>,
    priority_keywords: &[String],
    limit: usize,
) -> (usize, Vec<ClickableElement>) {
    let keyword = section_keyword
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty());
    let mut seen = HashSet::new();
    let mut elements = Vec::new();

    for item in raw {
        let text = item.text.trim();
        if text.is_empty() || text.chars().count() >= 200 {
            continue;
        }
        if let Some(k) = &keyword {
            if !text.to_lowercase().contains(k) && !item.parent_text.to_lowercase().contains(k) {
                continue;
            }
        }
        if !seen.insert(text.to_string()) {
            continue;
        }
        elements.push(ClickableElement {
            text: truncate_chars(text, MAX_CLICKABLE_TEXT),
            kind: item.kind,
        });
    }

    // Stable sort keeps harvest order inside one priority band.
    elements.sort_by_key(|e| priority(&e.text, priority_keywords));
    let total = elements.len();
    elements.truncate(limit);
    (total, elements)
}

fn priority(text: &str, priority_keywords: &[String]) -> i32 {
    let t = text.to_lowercase();
    let mut score = 0;
    if t.contains('/') && t.chars().any(|c| c.is_ascii_digit()) {
        score -= 10;
    }
    if t.contains("critical") || t.contains("error") || t.contains("fail") {
        score -= 5;
    }
    if priority_keywords.iter().any(|k| t.contains(k.as_str())) {
        score -= 3;
    }
    score
}
