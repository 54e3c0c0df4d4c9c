use std::io::Write;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

/// How long a code block's action icon shows the outcome.
pub const ACTION_FLASH: Duration = Duration::from_secs(2);

fn target_path_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:(?:[a-zA-Z]:[\\/])|(?:\.{1,2}[\\/])|/)?(?:[a-zA-Z0-9_\-.+\[\]]+/)+(?:[a-zA-Z0-9_\-.+\[\]]+\.[a-zA-Z0-9_\-]+)\b",
        )
        .ok()
    })
    .as_ref()
}

/// The file a code block is meant for, taken from its first line
/// (usually a comment like `// src/main.rs` or `# app/models.py`).
pub fn derive_target_path(code: &str) -> Option<String> {
    let first = code.lines().find(|l| !l.trim().is_empty())?;
    target_path_regex()?
        .find(first)
        .map(|m| m.as_str().to_string())
}

/// Code to copy or apply: the block without surrounding blank lines.
pub fn code_payload(code: &str) -> &str {
    code.trim_matches('\n')
}

/// OSC 52 escape that asks the terminal to put `text` on the clipboard.
pub fn osc52_sequence(text: &str) -> String {
    format!("\x1b]52;c;{}\x07", STANDARD.encode(text.as_bytes()))
}

pub fn copy_to_clipboard(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(osc52_sequence(text).as_bytes())?;
    stdout.flush()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Copied,
    Applied,
    Failed,
}

impl ActionOutcome {
    pub fn icon(self) -> &'static str {
        match self {
            ActionOutcome::Copied => "✓ copied",
            ActionOutcome::Applied => "✓ applied",
            ActionOutcome::Failed => "✗ failed",
        }
    }
}

/// Outcome shown on one code block until it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionFlash {
    pub outcome: ActionOutcome,
    pub since: Instant,
}

impl ActionFlash {
    pub fn new(outcome: ActionOutcome) -> Self {
        Self {
            outcome,
            since: Instant::now(),
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.since) >= ACTION_FLASH
    }
}
