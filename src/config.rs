use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};

use crate::models::Session;

/// Where the analysis backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// LLM-backed endpoints can take a while; keep this generous.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// The chat this client attaches to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub query_id: String,
    #[serde(default)]
    pub query_text: String,
    /// Absolute path of the project's sources, used to build editor links.
    #[serde(default)]
    pub source_dir: Option<String>,
    /// Files currently in the LLM's context; listed checked.
    #[serde(default)]
    pub context_files: Vec<String>,
    /// Other project files offered for selection; listed unchecked.
    #[serde(default)]
    pub other_files: Vec<String>,
    /// Files whose context entry uses the YAML summary instead of the source.
    #[serde(default)]
    pub yaml_files: Vec<String>,
    /// Whether the query commits automatically after each answer.
    #[serde(default)]
    pub auto_commit: bool,
}

/// Behaviour tweaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Seconds between git status polls while the terminal has focus.
    #[serde(default = "default_git_poll_interval_secs")]
    pub git_poll_interval_secs: u64,
    /// How long the context status line stays up before fading.
    #[serde(default = "default_status_fade_ms")]
    pub status_fade_ms: u64,
    /// How long git action messages stay visible.
    #[serde(default = "default_git_message_ms")]
    pub git_message_ms: u64,
    /// URI scheme for file links, e.g. `vscode` or `cursor`.
    #[serde(default = "default_editor_scheme")]
    pub editor_scheme: String,
    /// Direction passed to `/optimize-prompt`.
    #[serde(default = "default_optimize_direction")]
    pub optimize_direction: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            git_poll_interval_secs: default_git_poll_interval_secs(),
            status_fade_ms: default_status_fade_ms(),
            git_message_ms: default_git_message_ms(),
            editor_scheme: default_editor_scheme(),
            optimize_direction: default_optimize_direction(),
        }
    }
}

impl Settings {
    pub fn git_poll_interval(&self) -> Duration {
        Duration::from_secs(self.git_poll_interval_secs.max(1))
    }

    pub fn status_fade(&self) -> Duration {
        Duration::from_millis(self.status_fade_ms)
    }

    pub fn git_message_duration(&self) -> Duration {
        Duration::from_millis(self.git_message_ms)
    }
}

// ── Keybinding configuration ────────────────────────────────────────────

/// User-configurable keybindings.
///
/// Each field is a key-combo string such as `"ctrl+q"`, `"space"`, `"a"`, `"ctrl+shift+s"`.
/// Supported modifiers: `ctrl`, `alt`, `shift`. Separator: `+`.
/// Special key names: `space`, `enter`, `esc`, `tab`, `backspace`, `up`, `down`, `left`, `right`,
/// `home`, `end`, `pageup`, `pagedown`, `delete`, `insert`, `f1`..`f12`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBindings {
    // ── Global ──────────────────────────────────────────────────────
    #[serde(default = "default_quit")]
    pub quit: String,
    #[serde(default = "default_focus_next")]
    pub focus_next: String,
    #[serde(default = "default_focus_input")]
    pub focus_input: String,

    // ── Input ───────────────────────────────────────────────────────
    #[serde(default = "default_send")]
    pub send: String,
    #[serde(default = "default_optimize_prompt")]
    pub optimize_prompt: String,
    #[serde(default = "default_reset_chat")]
    pub reset_chat: String,
    #[serde(default = "default_edit_query")]
    pub edit_query: String,

    // ── Message list ────────────────────────────────────────────────
    #[serde(default = "default_edit_message")]
    pub edit_message: String,
    #[serde(default = "default_hide_message")]
    pub hide_message: String,
    #[serde(default = "default_regenerate")]
    pub regenerate: String,
    #[serde(default = "default_branch_prev")]
    pub branch_prev: String,
    #[serde(default = "default_branch_next")]
    pub branch_next: String,
    #[serde(default = "default_next_code_block")]
    pub next_code_block: String,
    #[serde(default = "default_copy_code")]
    pub copy_code: String,
    #[serde(default = "default_apply_code")]
    pub apply_code: String,
    #[serde(default = "default_next_link")]
    pub next_link: String,
    #[serde(default = "default_open_link")]
    pub open_link: String,

    // ── Message draft ───────────────────────────────────────────────
    #[serde(default = "default_save_edit")]
    pub save_edit: String,
    #[serde(default = "default_toggle_new_branch")]
    pub toggle_new_branch: String,
    #[serde(default = "default_cancel_edit")]
    pub cancel_edit: String,

    // ── Context panel ───────────────────────────────────────────────
    #[serde(default = "default_toggle_file")]
    pub toggle_file: String,
    #[serde(default = "default_toggle_all")]
    pub toggle_all: String,
    #[serde(default = "default_toggle_yaml")]
    pub toggle_yaml: String,
    #[serde(default = "default_search_files")]
    pub search_files: String,

    // ── Git panel ───────────────────────────────────────────────────
    #[serde(default = "default_git_new_branch")]
    pub git_new_branch: String,
    #[serde(default = "default_git_checkout")]
    pub git_checkout: String,
    #[serde(default = "default_git_commit")]
    pub git_commit: String,
    #[serde(default = "default_git_push")]
    pub git_push: String,
    #[serde(default = "default_git_merge")]
    pub git_merge: String,
    #[serde(default = "default_git_auto_commit")]
    pub git_auto_commit: String,
}

// ── Default value functions for serde ───────────────────────────────────

fn default_base_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_request_timeout_secs() -> u64 {
    180
}
fn default_git_poll_interval_secs() -> u64 {
    10
}
fn default_status_fade_ms() -> u64 {
    2000
}
fn default_git_message_ms() -> u64 {
    5000
}
fn default_editor_scheme() -> String {
    "vscode".into()
}
fn default_optimize_direction() -> String {
    "Make the prompt clearer and more specific.".into()
}
fn default_quit() -> String {
    "ctrl+q".into()
}
fn default_focus_next() -> String {
    "tab".into()
}
fn default_focus_input() -> String {
    "i".into()
}
fn default_send() -> String {
    "enter".into()
}
fn default_optimize_prompt() -> String {
    "ctrl+o".into()
}
fn default_reset_chat() -> String {
    "ctrl+r".into()
}
fn default_edit_query() -> String {
    "ctrl+e".into()
}
fn default_edit_message() -> String {
    "e".into()
}
fn default_hide_message() -> String {
    "h".into()
}
fn default_regenerate() -> String {
    "r".into()
}
fn default_branch_prev() -> String {
    "[".into()
}
fn default_branch_next() -> String {
    "]".into()
}
fn default_next_code_block() -> String {
    "c".into()
}
fn default_copy_code() -> String {
    "y".into()
}
fn default_apply_code() -> String {
    "a".into()
}
fn default_next_link() -> String {
    "l".into()
}
fn default_open_link() -> String {
    "o".into()
}
fn default_save_edit() -> String {
    "ctrl+s".into()
}
fn default_toggle_new_branch() -> String {
    "ctrl+b".into()
}
fn default_cancel_edit() -> String {
    "esc".into()
}
fn default_toggle_file() -> String {
    "space".into()
}
fn default_toggle_all() -> String {
    "shift+a".into()
}
fn default_toggle_yaml() -> String {
    "shift+y".into()
}
fn default_search_files() -> String {
    "/".into()
}
fn default_git_new_branch() -> String {
    "n".into()
}
fn default_git_checkout() -> String {
    "b".into()
}
fn default_git_commit() -> String {
    "c".into()
}
fn default_git_push() -> String {
    "p".into()
}
fn default_git_merge() -> String {
    "m".into()
}
fn default_git_auto_commit() -> String {
    "t".into()
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            quit: default_quit(),
            focus_next: default_focus_next(),
            focus_input: default_focus_input(),
            send: default_send(),
            optimize_prompt: default_optimize_prompt(),
            reset_chat: default_reset_chat(),
            edit_query: default_edit_query(),
            edit_message: default_edit_message(),
            hide_message: default_hide_message(),
            regenerate: default_regenerate(),
            branch_prev: default_branch_prev(),
            branch_next: default_branch_next(),
            next_code_block: default_next_code_block(),
            copy_code: default_copy_code(),
            apply_code: default_apply_code(),
            next_link: default_next_link(),
            open_link: default_open_link(),
            save_edit: default_save_edit(),
            toggle_new_branch: default_toggle_new_branch(),
            cancel_edit: default_cancel_edit(),
            toggle_file: default_toggle_file(),
            toggle_all: default_toggle_all(),
            toggle_yaml: default_toggle_yaml(),
            search_files: default_search_files(),
            git_new_branch: default_git_new_branch(),
            git_checkout: default_git_checkout(),
            git_commit: default_git_commit(),
            git_push: default_git_push(),
            git_merge: default_git_merge(),
            git_auto_commit: default_git_auto_commit(),
        }
    }
}

// ── Key string parser ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCombo {
    pub modifiers: KeyModifiers,
    pub code: KeyCode,
}

impl KeyCombo {
    pub const fn new(modifiers: KeyModifiers, code: KeyCode) -> Self {
        Self { modifiers, code }
    }

    /// Shifted letters arrive as uppercase chars, sometimes without the SHIFT
    /// flag depending on the terminal, so SHIFT is ignored for char keys.
    pub fn matches(&self, key: &KeyEvent) -> bool {
        match self.code {
            KeyCode::Char(_) => {
                self.code == key.code
                    && key.modifiers.difference(KeyModifiers::SHIFT)
                        == self.modifiers.difference(KeyModifiers::SHIFT)
            }
            _ => self.code == key.code && key.modifiers == self.modifiers,
        }
    }
}

/// Parse a human-readable key string into a `KeyCombo`.
///
/// Examples: `"ctrl+q"`, `"ctrl+shift+s"`, `"space"`, `"a"`, `"f1"`, `"["`.
pub fn parse_key_combo(s: &str) -> Result<KeyCombo> {
    let s = s.trim().to_lowercase();
    let parts: Vec<&str> = s.split('+').collect();

    let mut modifiers = KeyModifiers::NONE;
    let key_part;

    if parts.len() == 1 {
        key_part = parts[0];
    } else {
        // All parts except the last are modifiers
        for &m in &parts[..parts.len() - 1] {
            match m {
                "ctrl" | "control" => modifiers |= KeyModifiers::CONTROL,
                "alt" | "meta" | "opt" | "option" => modifiers |= KeyModifiers::ALT,
                "shift" => modifiers |= KeyModifiers::SHIFT,
                other => anyhow::bail!("Unknown modifier '{other}' in key string '{s}'"),
            }
        }
        key_part = parts[parts.len() - 1];
    }

    let code = match key_part {
        "space" | "spc" => KeyCode::Char(' '),
        "enter" | "return" | "cr" => KeyCode::Enter,
        "esc" | "escape" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" | "bs" => KeyCode::Backspace,
        "delete" | "del" => KeyCode::Delete,
        "insert" | "ins" => KeyCode::Insert,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" | "pgup" => KeyCode::PageUp,
        "pagedown" | "pgdn" | "pgdown" => KeyCode::PageDown,
        k if k.len() > 1 && k.starts_with('f') => match k[1..].parse::<u8>() {
            Ok(n) if (1..=12).contains(&n) => KeyCode::F(n),
            _ => anyhow::bail!("Unknown key name '{k}' in key string '{s}'"),
        },
        // Single character keys
        k if k.chars().count() == 1 => {
            let ch = k.chars().next().unwrap_or(' ');
            if modifiers.contains(KeyModifiers::SHIFT) && ch.is_ascii_alphabetic() {
                // Shift+letter: crossterm sends uppercase char with SHIFT modifier
                KeyCode::Char(ch.to_ascii_uppercase())
            } else {
                KeyCode::Char(ch)
            }
        }
        other => anyhow::bail!("Unknown key name '{other}' in key string '{s}'"),
    };

    Ok(KeyCombo::new(modifiers, code))
}

/// Format a key-combo string back to a display label, e.g. `"Ctrl+Q"`.
pub fn format_key_display(s: &str) -> String {
    let s = s.trim().to_lowercase();
    let parts: Vec<&str> = s.split('+').collect();
    let mut out = Vec::new();
    for p in &parts {
        match *p {
            "ctrl" | "control" => out.push("Ctrl".to_string()),
            "alt" | "meta" | "opt" | "option" => out.push("Alt".to_string()),
            "shift" => out.push("Shift".to_string()),
            "space" | "spc" => out.push("Space".to_string()),
            "enter" | "return" | "cr" => out.push("Enter".to_string()),
            "esc" | "escape" => out.push("Esc".to_string()),
            "tab" => out.push("Tab".to_string()),
            "backspace" | "bs" => out.push("BS".to_string()),
            other => {
                let mut c = other.chars();
                match c.next() {
                    Some(first) => {
                        out.push(format!("{}{}", first.to_uppercase(), c.as_str()))
                    }
                    None => out.push(String::new()),
                }
            }
        }
    }
    out.join("+")
}

/// Top-level configuration persisted to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub keybindings: KeyBindings,
    /// Hex color overrides keyed by palette slot, e.g. `primary = "#fab283"`.
    #[serde(default)]
    pub theme: HashMap<String, String>,
}

impl Config {
    /// Return the path to the config file:
    /// `~/.config/qchat/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("qchat");
        Ok(config_dir.join("config.toml"))
    }

    /// Load the default config file, or the default config if it doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load the config from `path`, or return the default if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Session reference shared by all controllers.
    pub fn session(&self) -> Result<Session> {
        if self.session.project_name.trim().is_empty() {
            anyhow::bail!("No project configured (set session.project_name or pass --project)");
        }
        if self.session.query_id.trim().is_empty() {
            anyhow::bail!("No query configured (set session.query_id or pass --query-id)");
        }
        Ok(Session {
            project: self.session.project_name.clone(),
            query_id: self.session.query_id.clone(),
            query_text: self.session.query_text.clone(),
        })
    }

    /// Check that every keybinding string parses.
    pub fn validate_keybindings(&self) -> Result<()> {
        let kb = &self.keybindings;
        for (name, value) in [
            ("quit", &kb.quit),
            ("focus_next", &kb.focus_next),
            ("focus_input", &kb.focus_input),
            ("send", &kb.send),
            ("optimize_prompt", &kb.optimize_prompt),
            ("reset_chat", &kb.reset_chat),
            ("edit_query", &kb.edit_query),
            ("edit_message", &kb.edit_message),
            ("hide_message", &kb.hide_message),
            ("regenerate", &kb.regenerate),
            ("branch_prev", &kb.branch_prev),
            ("branch_next", &kb.branch_next),
            ("next_code_block", &kb.next_code_block),
            ("copy_code", &kb.copy_code),
            ("apply_code", &kb.apply_code),
            ("next_link", &kb.next_link),
            ("open_link", &kb.open_link),
            ("save_edit", &kb.save_edit),
            ("toggle_new_branch", &kb.toggle_new_branch),
            ("cancel_edit", &kb.cancel_edit),
            ("toggle_file", &kb.toggle_file),
            ("toggle_all", &kb.toggle_all),
            ("toggle_yaml", &kb.toggle_yaml),
            ("search_files", &kb.search_files),
            ("git_new_branch", &kb.git_new_branch),
            ("git_checkout", &kb.git_checkout),
            ("git_commit", &kb.git_commit),
            ("git_push", &kb.git_push),
            ("git_merge", &kb.git_merge),
            ("git_auto_commit", &kb.git_auto_commit),
        ] {
            parse_key_combo(value).with_context(|| format!("Invalid keybinding '{name}'"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_combo_modifiers() {
        let combo = parse_key_combo("ctrl+q").unwrap();
        assert_eq!(combo, KeyCombo::new(KeyModifiers::CONTROL, KeyCode::Char('q')));

        let combo = parse_key_combo("shift+a").unwrap();
        assert_eq!(combo.code, KeyCode::Char('A'));
        assert!(combo.modifiers.contains(KeyModifiers::SHIFT));

        assert_eq!(parse_key_combo("f5").unwrap().code, KeyCode::F(5));
        assert_eq!(parse_key_combo("[").unwrap().code, KeyCode::Char('['));
    }

    #[test]
    fn test_parse_key_combo_rejects_unknown() {
        assert!(parse_key_combo("hyper+q").is_err());
        assert!(parse_key_combo("f13").is_err());
        assert!(parse_key_combo("banana").is_err());
    }

    #[test]
    fn test_shifted_char_matches_without_shift_flag() {
        let combo = parse_key_combo("shift+a").unwrap();
        let key = KeyEvent::new(KeyCode::Char('A'), KeyModifiers::NONE);
        assert!(combo.matches(&key));
        let key = KeyEvent::new(KeyCode::Char('A'), KeyModifiers::SHIFT);
        assert!(combo.matches(&key));
        let key = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        assert!(!combo.matches(&key));
    }

    #[test]
    fn test_format_key_display() {
        assert_eq!(format_key_display("ctrl+q"), "Ctrl+Q");
        assert_eq!(format_key_display("shift+y"), "Shift+Y");
        assert_eq!(format_key_display("space"), "Space");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.settings.git_poll_interval_secs, 10);
        assert!(config.session().is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qchat/config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"
[session]
project_name = "demo"
query_id = "q-7"
source_dir = "/home/u/demo"

[keybindings]
quit = "ctrl+x"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.keybindings.quit, "ctrl+x");
        assert_eq!(config.keybindings.send, "enter");
        let session = config.session().unwrap();
        assert_eq!(session.project, "demo");
        assert_eq!(session.query_id, "q-7");
        config.validate_keybindings().unwrap();
        assert_eq!(config.session.source_dir.as_deref(), Some("/home/u/demo"));
    }
}
