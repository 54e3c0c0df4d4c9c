use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::config::{self, format_key_display, KeyBindings, KeyCombo};

/// Which pane has keyboard focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Focus {
    Input,
    Chat,
    Context,
    Git,
}

impl Focus {
    pub fn next(self) -> Self {
        match self {
            Focus::Input => Focus::Chat,
            Focus::Chat => Focus::Context,
            Focus::Context => Focus::Git,
            Focus::Git => Focus::Input,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Focus::Input => "INPUT",
            Focus::Chat => "CHAT",
            Focus::Context => "FILES",
            Focus::Git => "GIT",
        }
    }
}

/// Everything a key can trigger outside of text editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    FocusNext,
    FocusInput,
    Send,
    OptimizePrompt,
    ResetChat,
    EditQuery,
    EditMessage,
    HideMessage,
    Regenerate,
    BranchPrev,
    BranchNext,
    NextCodeBlock,
    CopyCode,
    ApplyCode,
    NextLink,
    OpenLink,
    ToggleFile,
    ToggleAll,
    ToggleYaml,
    SearchFiles,
    GitNewBranch,
    GitCheckout,
    GitCommit,
    GitPush,
    GitMerge,
    GitAutoCommit,
    // Message draft
    SaveEdit,
    ToggleNewBranch,
    CancelEdit,
}

/// An owned keybinding, built at startup from config.
#[derive(Debug, Clone)]
pub struct Binding {
    pub key: KeyCombo,
    /// The configured key string, kept for hint display.
    pub key_str: String,
    pub label: &'static str,
    pub action: Action,
    /// Panes the binding is live in. Empty = everywhere.
    pub scopes: &'static [Focus],
}

impl Binding {
    pub fn active_in(&self, focus: Focus) -> bool {
        self.scopes.is_empty() || self.scopes.contains(&focus)
    }

    pub fn display(&self) -> String {
        format_key_display(&self.key_str)
    }
}

fn parse(s: &str) -> KeyCombo {
    config::parse_key_combo(s).unwrap_or_else(|e| {
        tracing::error!("Bad keybinding config '{}': {}", s, e);
        // Fallback to something that won't match anything useful
        KeyCombo::new(KeyModifiers::NONE, KeyCode::F(255))
    })
}

const EVERYWHERE: &[Focus] = &[];
const INPUT: &[Focus] = &[Focus::Input];
const NOT_INPUT: &[Focus] = &[Focus::Chat, Focus::Context, Focus::Git];
const CHAT: &[Focus] = &[Focus::Chat];
const CONTEXT: &[Focus] = &[Focus::Context];
const GIT: &[Focus] = &[Focus::Git];

fn bind(key_str: &str, label: &'static str, action: Action, scopes: &'static [Focus]) -> Binding {
    Binding {
        key: parse(key_str),
        key_str: key_str.to_string(),
        label,
        action,
        scopes,
    }
}

/// The runtime keymap: bindings looked up by focus and key event.
#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: Vec<Binding>,
    /// Live only while a message draft is open; everything else is text.
    draft: Vec<Binding>,
}

impl Keymap {
    pub fn from_config(kb: &KeyBindings) -> Self {
        use Action::*;
        let bindings = vec![
            bind(&kb.quit, "Quit", Quit, EVERYWHERE),
            bind(&kb.focus_next, "Next pane", FocusNext, EVERYWHERE),
            bind(&kb.reset_chat, "Reset chat", ResetChat, EVERYWHERE),
            bind(&kb.edit_query, "Edit query", EditQuery, EVERYWHERE),
            bind(&kb.focus_input, "Write", FocusInput, NOT_INPUT),
            // Input
            bind(&kb.send, "Send", Send, INPUT),
            bind(&kb.optimize_prompt, "Optimize", OptimizePrompt, INPUT),
            // Chat
            bind(&kb.edit_message, "Edit", EditMessage, CHAT),
            bind(&kb.hide_message, "Hide/Show", HideMessage, CHAT),
            bind(&kb.regenerate, "Regenerate", Regenerate, CHAT),
            bind(&kb.branch_prev, "Prev branch", BranchPrev, CHAT),
            bind(&kb.branch_next, "Next branch", BranchNext, CHAT),
            bind(&kb.next_code_block, "Code block", NextCodeBlock, CHAT),
            bind(&kb.copy_code, "Copy", CopyCode, CHAT),
            bind(&kb.apply_code, "Apply", ApplyCode, CHAT),
            bind(&kb.next_link, "Link", NextLink, CHAT),
            bind(&kb.open_link, "Open", OpenLink, CHAT),
            // Context
            bind(&kb.toggle_file, "Toggle", ToggleFile, CONTEXT),
            bind(&kb.toggle_all, "Toggle all", ToggleAll, CONTEXT),
            bind(&kb.toggle_yaml, "YAML", ToggleYaml, CONTEXT),
            bind(&kb.search_files, "Search", SearchFiles, CONTEXT),
            // Git
            bind(&kb.git_new_branch, "New branch", GitNewBranch, GIT),
            bind(&kb.git_checkout, "Checkout", GitCheckout, GIT),
            bind(&kb.git_commit, "Commit", GitCommit, GIT),
            bind(&kb.git_push, "Push", GitPush, GIT),
            bind(&kb.git_merge, "Merge", GitMerge, GIT),
            bind(&kb.git_auto_commit, "Auto-commit", GitAutoCommit, GIT),
        ];
        let draft = vec![
            bind(&kb.save_edit, "Save", SaveEdit, CHAT),
            bind(&kb.toggle_new_branch, "New branch", ToggleNewBranch, CHAT),
            bind(&kb.cancel_edit, "Cancel", CancelEdit, CHAT),
        ];
        Self { bindings, draft }
    }

    /// Pane-specific bindings win over global ones.
    pub fn lookup(&self, focus: Focus, key: &KeyEvent) -> Option<Action> {
        let live = || {
            self.bindings
                .iter()
                .filter(move |b| b.active_in(focus) && b.key.matches(key))
        };
        live()
            .find(|b| !b.scopes.is_empty())
            .or_else(|| live().next())
            .map(|b| b.action)
    }

    /// Draft bindings, then `Quit`. Other keys edit the draft text.
    pub fn lookup_draft(&self, key: &KeyEvent) -> Option<Action> {
        self.draft
            .iter()
            .chain(self.bindings.iter().filter(|b| b.action == Action::Quit))
            .find(|b| b.key.matches(key))
            .map(|b| b.action)
    }

    pub fn draft_hints(&self) -> impl Iterator<Item = &Binding> {
        self.draft.iter()
    }

    /// Bindings shown as hints for the focused pane.
    pub fn hints(&self, focus: Focus) -> impl Iterator<Item = &Binding> {
        self.bindings
            .iter()
            .filter(move |b| !b.scopes.is_empty() && b.active_in(focus))
    }

    pub fn key_for(&self, action: Action) -> Option<&Binding> {
        self.bindings
            .iter()
            .chain(self.draft.iter())
            .find(|b| b.action == action)
    }
}
