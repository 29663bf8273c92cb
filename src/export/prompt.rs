//! Prompt driving for interactive exporters
//!
//! The exporter has no structured protocol: it prints prompts meant for a human
//! and waits for a key. A [`PromptDriver`] looks at each chunk of output and
//! decides whether a keystroke should be sent. The marker driver below covers the
//! exporter's current phrasing; another exporter version only needs another driver.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[()][0-9A-Za-z]")
        .expect("ANSI escape pattern is valid");
}

/// The prompts the exporter is known to wait at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptRule {
    /// Resource list shown; confirm the import selection
    ShowMenu,
    /// Acknowledge and continue
    Continue,
    /// Import finished and the exporter offers to quit
    Quit,
}

/// A keystroke to send in reply to a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptAction {
    pub rule: PromptRule,
    pub keystroke: String,
}

/// Turns exporter output into keystrokes
pub trait PromptDriver: Send {
    fn on_output_chunk(&mut self, chunk: &str) -> Option<PromptAction>;
}

/// Markers, keys and timings of the marker driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub show_menu_marker: String,
    pub continue_marker: String,
    pub quit_available_marker: String,
    pub import_completed_marker: String,

    pub select_key: String,
    pub acknowledge_key: String,
    pub quit_key: String,

    /// A rule that fired does not fire again within this window
    pub dedupe_window_ms: u64,
    /// Pause before a keystroke is written, so the prompt can finish rendering
    pub keystroke_delay_ms: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            show_menu_marker: "show menu".to_string(),
            continue_marker: "continue".to_string(),
            quit_available_marker: "quit".to_string(),
            import_completed_marker: "import completed".to_string(),
            select_key: "w".to_string(),
            acknowledge_key: "y".to_string(),
            quit_key: "q".to_string(),
            dedupe_window_ms: 2000,
            keystroke_delay_ms: 500,
        }
    }
}

impl PromptConfig {
    pub fn keystroke_delay(&self) -> Duration {
        Duration::from_millis(self.keystroke_delay_ms)
    }
}

/// Level-triggered marker matching with per-rule latching
pub struct MarkerPromptDriver {
    config: PromptConfig,
    dedupe_window: Duration,
    last_fired: HashMap<PromptRule, Instant>,
    quit_available_seen: bool,
    import_completed_seen: bool,
}

impl MarkerPromptDriver {
    pub fn new(config: PromptConfig) -> Self {
        let mut config = config;
        for marker in [
            &mut config.show_menu_marker,
            &mut config.continue_marker,
            &mut config.quit_available_marker,
            &mut config.import_completed_marker,
        ] {
            *marker = marker.to_lowercase();
        }

        Self {
            dedupe_window: Duration::from_millis(config.dedupe_window_ms),
            config,
            last_fired: HashMap::new(),
            quit_available_seen: false,
            import_completed_seen: false,
        }
    }

    fn keystroke(&self, rule: PromptRule) -> String {
        match rule {
            PromptRule::ShowMenu => self.config.select_key.clone(),
            PromptRule::Continue => self.config.acknowledge_key.clone(),
            PromptRule::Quit => self.config.quit_key.clone(),
        }
    }

    fn latched(&self, rule: PromptRule, now: Instant) -> bool {
        match self.last_fired.get(&rule) {
            Some(last) => now.duration_since(*last) < self.dedupe_window,
            None => false,
        }
    }
}

fn contains_marker(text: &str, marker: &str) -> bool {
    !marker.is_empty() && text.contains(marker)
}

impl PromptDriver for MarkerPromptDriver {
    fn on_output_chunk(&mut self, chunk: &str) -> Option<PromptAction> {
        let text = ANSI_ESCAPE.replace_all(chunk, "").to_lowercase();

        if contains_marker(&text, &self.config.quit_available_marker) {
            self.quit_available_seen = true;
        }
        if contains_marker(&text, &self.config.import_completed_marker) {
            self.import_completed_seen = true;
        }

        let now = Instant::now();
        let mut candidates = Vec::with_capacity(3);
        if self.quit_available_seen && self.import_completed_seen {
            // A quit prompt is consumed whether it fires or is swallowed by the latch
            self.quit_available_seen = false;
            self.import_completed_seen = false;
            candidates.push(PromptRule::Quit);
        }
        if contains_marker(&text, &self.config.continue_marker) {
            candidates.push(PromptRule::Continue);
        }
        if contains_marker(&text, &self.config.show_menu_marker) {
            candidates.push(PromptRule::ShowMenu);
        }

        let rule = candidates.into_iter().find(|candidate| {
            let latched = self.latched(*candidate, now);
            if latched {
                tracing::debug!(rule = ?candidate, "Prompt repeated within dedupe window, ignoring");
            }
            !latched
        })?;
        self.last_fired.insert(rule, now);

        Some(PromptAction {
            rule,
            keystroke: self.keystroke(rule),
        })
    }
}
