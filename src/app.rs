use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::api::AnalysisBackend;
use crate::chat::{
    ChatController, EditTicket, HideTicket, HistoryTicket, MessageKey, MessageOp,
    RegenerateTicket, ResetTicket, SendTicket, SwitchTicket,
};
use crate::config::{Config, SessionSettings};
use crate::context::{Container, ContextSelector, ContextTicket, FileEntry, FileRef, YamlTicket};
use crate::error::{ApiError, ApiResult};
use crate::git::{AutoCommitTicket, GitAction, GitPanel, GitTicket, PendingGit};
use crate::keymap::{Focus, Keymap};
use crate::models::{
    BranchesReply, BranchingData, ChatReply, GitStatusReply, OptimizeRequest, RegenerateReply,
    ResetReply, ServerMessage, Session, UpdateMessageReply,
};
use crate::render::actions::{
    code_payload, copy_to_clipboard, derive_target_path, ActionFlash, ActionOutcome,
};
use crate::render::{render_markdown, LinkContext, RenderedMessage};
use crate::status::{clear_expired, StatusBanner, StatusKind};
use crate::text_input::TextArea;
use crate::theme::ThemeColors;

/// Events sent from background tokio tasks back to the main event loop.
/// The event loop calls `try_recv()` each tick and dispatches to
/// `App::handle_background_event`.
pub enum BackgroundEvent {
    // ── Chat ────────────────────────────────────────────────────────
    HistoryLoaded(HistoryTicket, ApiResult<Vec<ServerMessage>>),
    BranchingLoaded(ApiResult<BranchingData>),
    ChatReplied(SendTicket, ApiResult<ChatReply>),
    ResetDone(ResetTicket, ApiResult<ResetReply>),
    EditSaved(EditTicket, ApiResult<UpdateMessageReply>),
    VisibilityUpdated(HideTicket, ApiResult<()>),
    Regenerated(RegenerateTicket, ApiResult<RegenerateReply>),
    SiblingSwitched(SwitchTicket, ApiResult<()>),
    PromptOptimized(ApiResult<String>),
    CodeApplied {
        block: BlockRef,
        path: String,
        result: ApiResult<()>,
    },
    QueryUpdated {
        query: String,
        result: ApiResult<()>,
    },
    // ── Context ─────────────────────────────────────────────────────
    ContextUpdated(ContextTicket, ApiResult<()>),
    YamlUpdated(YamlTicket, ApiResult<()>),
    SearchDone(ApiResult<String>),
    // ── Git ─────────────────────────────────────────────────────────
    /// Periodic or post-action `/git-status` result.
    GitStatusFetched(ApiResult<GitStatusReply>),
    /// Periodic or post-action `/git-branches` result.
    GitBranchesFetched(ApiResult<BranchesReply>),
    GitActionDone(GitTicket, ApiResult<String>),
    BranchSuggested(ApiResult<String>),
    AutoCommitUpdated(AutoCommitTicket, ApiResult<()>),
}

/// A code block inside a rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub message: MessageKey,
    pub block: usize,
}

/// What a text prompt's answer is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPurpose {
    /// Commit message or new branch name for the pending git action.
    Git,
    ApplyCode(BlockRef),
    EditQuery,
    SearchFiles,
}

/// Modal overlay. At most one is open; it takes all keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    Alert {
        message: String,
    },
    /// Yes/no for the pending git action.
    Confirm {
        question: String,
    },
    Prompt {
        label: String,
        input: TextArea,
        purpose: PromptPurpose,
    },
}

/// One row of the context selector list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRow {
    Header(usize),
    File(FileRef),
}

/// Rendered markdown for one message, valid while the content is unchanged.
#[derive(Debug)]
pub struct CachedRender {
    content: String,
    pub rendered: RenderedMessage,
}

pub struct App {
    pub session: Session,
    backend: Arc<dyn AnalysisBackend>,
    pub chat: ChatController,
    pub context: ContextSelector,
    pub git: GitPanel,
    pub theme: ThemeColors,
    pub keymap: Keymap,
    pub links: LinkContext,
    pub focus: Focus,
    /// Chat input box.
    pub input: TextArea,
    pub optimizing: bool,
    pub searching: bool,
    pub dialog: Option<Dialog>,
    /// Message highlighted in the chat pane.
    pub selected: Option<MessageKey>,
    pub selected_block: Option<usize>,
    pub selected_link: Option<usize>,
    /// Editor for the message whose draft is open.
    pub editing: Option<(MessageKey, TextArea)>,
    pub context_cursor: usize,
    pub flashes: HashMap<BlockRef, ActionFlash>,
    pub renders: HashMap<MessageKey, CachedRender>,
    /// First visible line of the chat pane.
    pub chat_scroll: usize,
    /// Scroll the selected message into view on the next draw.
    pub reveal_selected: bool,
    pub status: Option<StatusBanner>,
    pub needs_redraw: bool,
    pub should_quit: bool,
    pub bg_tx: mpsc::UnboundedSender<BackgroundEvent>,
    focus_tx: watch::Sender<bool>,
    optimize_direction: String,
    status_fade: Duration,
}

/// Containers seeded from the session config: files already in the
/// context are checked, the rest are offered unchecked.
pub fn initial_containers(session: &SessionSettings) -> Vec<Container> {
    let entry = |path: &String, checked: bool| {
        let use_yaml = if path.to_lowercase().ends_with(".md") {
            None
        } else {
            Some(session.yaml_files.contains(path))
        };
        FileEntry::new(path.clone(), checked, use_yaml)
    };
    let mut containers = vec![Container::new(
        "context",
        session.context_files.iter().map(|p| entry(p, true)).collect(),
    )];
    if !session.other_files.is_empty() {
        containers.push(Container::new(
            "other",
            session.other_files.iter().map(|p| entry(p, false)).collect(),
        ));
    }
    containers
}

impl App {
    pub fn new(
        config: &Config,
        session: Session,
        backend: Arc<dyn AnalysisBackend>,
        bg_tx: mpsc::UnboundedSender<BackgroundEvent>,
        focus_tx: watch::Sender<bool>,
    ) -> Self {
        let settings = &config.settings;
        Self {
            session,
            backend,
            chat: ChatController::new(),
            context: ContextSelector::new(
                initial_containers(&config.session),
                settings.status_fade(),
            ),
            git: GitPanel::new(config.session.auto_commit, settings.git_message_duration()),
            theme: ThemeColors::from_overrides(&config.theme),
            keymap: Keymap::from_config(&config.keybindings),
            links: LinkContext {
                source_dir: config.session.source_dir.clone(),
                scheme: settings.editor_scheme.clone(),
            },
            focus: Focus::Input,
            input: TextArea::new(),
            optimizing: false,
            searching: false,
            dialog: None,
            selected: None,
            selected_block: None,
            selected_link: None,
            editing: None,
            context_cursor: 0,
            flashes: HashMap::new(),
            renders: HashMap::new(),
            chat_scroll: 0,
            reveal_selected: false,
            status: None,
            needs_redraw: true,
            should_quit: false,
            bg_tx,
            focus_tx,
            optimize_direction: settings.optimize_direction.clone(),
            status_fade: settings.status_fade(),
        }
    }

    /// Run `make` on a tokio task and post its event back to the loop.
    fn spawn<F, Fut>(&self, make: F)
    where
        F: FnOnce(Arc<dyn AnalysisBackend>, Session) -> Fut,
        Fut: Future<Output = BackgroundEvent> + Send + 'static,
    {
        let fut = make(Arc::clone(&self.backend), self.session.clone());
        let tx = self.bg_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(fut.await);
        });
    }

    pub fn show_status(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.status = Some(StatusBanner::fading(text, kind, self.status_fade));
    }

    pub fn alert(&mut self, message: impl Into<String>) {
        self.dialog = Some(Dialog::Alert {
            message: message.into(),
        });
    }

    /// Forward terminal focus changes to the git poller.
    pub fn set_terminal_focus(&mut self, focused: bool) {
        debug!(focused, "Terminal focus changed");
        self.focus_tx.send_replace(focused);
    }

    /// Initial fetches once the terminal is up. Git state comes from the
    /// poller's first round.
    pub fn start(&mut self) {
        self.reload_history();
    }

    // ── Chat ────────────────────────────────────────────────────────────

    pub fn reload_history(&mut self) {
        let ticket = self.chat.begin_reload();
        self.spawn(|backend, session| async move {
            let result = backend.fetch_history(&session).await;
            BackgroundEvent::HistoryLoaded(ticket, result)
        });
    }

    fn refresh_branching(&self) {
        self.spawn(|backend, session| async move {
            BackgroundEvent::BranchingLoaded(backend.fetch_branching(&session).await)
        });
    }

    pub fn send_message(&mut self) {
        if self.input.is_blank() {
            return;
        }
        let ticket = match self.chat.begin_send(&self.input.text()) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.show_status(e.user_message(), StatusKind::Error);
                return;
            }
        };
        self.input.clear();
        info!(len = ticket.text.len(), "Sending message");
        self.spawn(|backend, session| async move {
            let result = backend.chat(&session, &ticket.text).await;
            BackgroundEvent::ChatReplied(ticket, result)
        });
    }

    pub fn reset_chat(&mut self) {
        if self.chat.is_resetting() {
            return;
        }
        let ticket = self.chat.begin_reset();
        self.editing = None;
        self.select(None);
        self.spawn(|backend, session| async move {
            let result = backend.reset_chat(&session).await;
            BackgroundEvent::ResetDone(ticket, result)
        });
    }

    /// Open the draft editor on the selected message, or close it.
    pub fn toggle_edit(&mut self) {
        let Some(key) = self.selected else {
            return;
        };
        if let Err(e) = self.chat.toggle_edit_mode(key) {
            self.show_status(e.user_message(), StatusKind::Error);
            return;
        }
        self.editing = match self.chat.op(key) {
            Some(MessageOp::Editing(draft)) => Some((key, TextArea::from_text(&draft.text))),
            _ => None,
        };
    }

    pub fn cancel_edit(&mut self) {
        if let Some((key, _)) = self.editing.take() {
            self.chat.cancel_edit(key);
        }
    }

    /// Copy the editor buffer into the controller's draft.
    pub fn sync_draft(&mut self) {
        if let Some((key, area)) = &self.editing {
            if let Some(draft) = self.chat.draft_mut(*key) {
                draft.text = area.text();
            }
        }
    }

    pub fn toggle_new_branch_flag(&mut self) {
        if let Some((key, _)) = &self.editing {
            if let Some(draft) = self.chat.draft_mut(*key) {
                draft.create_new_branch = !draft.create_new_branch;
            }
        }
    }

    pub fn save_edit(&mut self) {
        let Some((key, _)) = &self.editing else {
            return;
        };
        let key = *key;
        self.sync_draft();
        let ticket = match self.chat.begin_save_edit(key) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.show_status(e.user_message(), StatusKind::Error);
                return;
            }
        };
        self.spawn(|backend, session| async move {
            let result = backend
                .update_message(&session, ticket.id, &ticket.text, ticket.create_new_branch)
                .await;
            BackgroundEvent::EditSaved(ticket, result)
        });
    }

    pub fn toggle_hidden(&mut self) {
        let Some(key) = self.selected else {
            return;
        };
        let ticket = match self.chat.begin_toggle_hidden(key) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.show_status(e.user_message(), StatusKind::Error);
                return;
            }
        };
        self.spawn(|backend, session| async move {
            let result = backend
                .set_message_hidden(&session, ticket.id, ticket.hidden)
                .await;
            BackgroundEvent::VisibilityUpdated(ticket, result)
        });
    }

    pub fn regenerate(&mut self) {
        let Some(key) = self.selected else {
            return;
        };
        let ticket = match self.chat.begin_regenerate(key) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.show_status(e.user_message(), StatusKind::Error);
                return;
            }
        };
        self.spawn(|backend, session| async move {
            let result = backend.regenerate_message(&session, ticket.id).await;
            BackgroundEvent::Regenerated(ticket, result)
        });
    }

    pub fn switch_sibling(&mut self, delta: isize) {
        let Some(key) = self.selected else {
            return;
        };
        let ticket = match self.chat.begin_switch_sibling(key, delta) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.show_status(e.user_message(), StatusKind::Info);
                return;
            }
        };
        self.spawn(|backend, session| async move {
            let result = backend.set_current_node(&session, ticket.target).await;
            BackgroundEvent::SiblingSwitched(ticket, result)
        });
    }

    pub fn optimize_prompt(&mut self) {
        if self.optimizing || self.input.is_blank() {
            return;
        }
        self.optimizing = true;
        let request = OptimizeRequest {
            original_prompt: self.input.text(),
            optimization_direction: self.optimize_direction.clone(),
            include_chat_history: true,
            include_context_files: true,
        };
        self.show_status("Optimizing prompt...", StatusKind::Info);
        self.spawn(|backend, session| async move {
            BackgroundEvent::PromptOptimized(backend.optimize_prompt(&session, &request).await)
        });
    }

    // ── Chat selection ──────────────────────────────────────────────────

    pub fn select(&mut self, key: Option<MessageKey>) {
        if self.selected != key {
            self.selected = key;
            self.selected_block = None;
            self.selected_link = None;
            self.reveal_selected = key.is_some();
        }
    }

    /// Move the highlight `delta` messages, clamping at the ends.
    pub fn move_selection(&mut self, delta: isize) {
        let store = self.chat.store();
        if store.is_empty() {
            self.select(None);
            return;
        }
        let last = store.len() as isize - 1;
        let next = match self.selected.and_then(|k| store.position(k)) {
            Some(pos) => (pos as isize + delta).clamp(0, last),
            None if delta < 0 => last,
            None => 0,
        };
        let key = store.at(next as usize).map(|m| m.key);
        self.select(key);
    }

    fn selected_render(&self) -> Option<&RenderedMessage> {
        self.selected
            .and_then(|k| self.renders.get(&k))
            .map(|c| &c.rendered)
    }

    pub fn cycle_code_block(&mut self) {
        let count = self.selected_render().map_or(0, |r| r.code_blocks.len());
        self.selected_block = cycle(self.selected_block, count);
    }

    pub fn cycle_link(&mut self) {
        let count = self.selected_render().map_or(0, |r| r.links.len());
        self.selected_link = cycle(self.selected_link, count);
    }

    fn selected_code(&self) -> Option<(BlockRef, String)> {
        let message = self.selected?;
        let block = self.selected_block?;
        let code = self.selected_render()?.code_blocks.get(block)?.code.clone();
        Some((BlockRef { message, block }, code))
    }

    pub fn copy_selected_code(&mut self) {
        let Some((block, code)) = self.selected_code() else {
            self.show_status("Select a code block first.", StatusKind::Info);
            return;
        };
        let outcome = match copy_to_clipboard(code_payload(&code)) {
            Ok(()) => ActionOutcome::Copied,
            Err(e) => {
                warn!(error = %e, "Clipboard write failed");
                ActionOutcome::Failed
            }
        };
        self.flashes.insert(block, ActionFlash::new(outcome));
    }

    /// Ask where to apply the selected block, pre-filled from its first line.
    pub fn request_apply_code(&mut self) {
        let Some((block, code)) = self.selected_code() else {
            self.show_status("Select a code block first.", StatusKind::Info);
            return;
        };
        let (label, path) = match derive_target_path(&code) {
            Some(path) => (format!("Apply code to '{path}'?"), path),
            None => (
                "Enter the relative file path to apply this code to (e.g., src/main.rs):"
                    .to_string(),
                String::new(),
            ),
        };
        self.dialog = Some(Dialog::Prompt {
            label,
            input: TextArea::from_text(&path),
            purpose: PromptPurpose::ApplyCode(block),
        });
    }

    fn apply_code(&mut self, block: BlockRef, path: String) {
        let Some(code) = self
            .renders
            .get(&block.message)
            .and_then(|c| c.rendered.code_blocks.get(block.block))
            .map(|b| code_payload(&b.code).to_string())
        else {
            return;
        };
        info!(path = %path, "Applying code block");
        self.spawn(|backend, session| async move {
            let result = backend.apply_code_to_file(&session, &path, &code).await;
            BackgroundEvent::CodeApplied {
                block,
                path,
                result,
            }
        });
    }

    pub fn open_selected_link(&mut self) {
        let Some(link) = self
            .selected_link
            .and_then(|i| self.selected_render()?.links.get(i))
        else {
            self.show_status("Select a file link first.", StatusKind::Info);
            return;
        };
        let uri = link.uri.clone();
        match open::that_detached(&uri) {
            Ok(()) => info!(uri = %uri, "Opened editor link"),
            Err(e) => {
                error!(uri = %uri, error = %e, "Failed to open editor link");
                self.show_status(format!("Could not open {uri}"), StatusKind::Error);
            }
        }
    }

    pub fn request_edit_query(&mut self) {
        self.dialog = Some(Dialog::Prompt {
            label: "Edit query:".to_string(),
            input: TextArea::from_text(&self.session.query_text),
            purpose: PromptPurpose::EditQuery,
        });
    }

    fn update_query(&mut self, query: String) {
        self.spawn(|backend, session| async move {
            let result = backend.update_query(&session, &query).await;
            BackgroundEvent::QueryUpdated { query, result }
        });
    }

    // ── Context ─────────────────────────────────────────────────────────

    pub fn context_rows(&self) -> Vec<ContextRow> {
        let mut rows = Vec::new();
        for (c, container) in self.context.containers().iter().enumerate() {
            rows.push(ContextRow::Header(c));
            rows.extend((0..container.files.len()).map(|file| {
                ContextRow::File(FileRef { container: c, file })
            }));
        }
        rows
    }

    pub fn move_context_cursor(&mut self, delta: isize) {
        let len = self.context_rows().len();
        if len == 0 {
            return;
        }
        let next = (self.context_cursor as isize + delta).clamp(0, len as isize - 1);
        self.context_cursor = next as usize;
    }

    fn context_row(&self) -> Option<ContextRow> {
        self.context_rows().get(self.context_cursor).copied()
    }

    /// Container name and file path under the cursor.
    fn context_anchor(&self) -> Option<(String, Option<String>)> {
        let containers = self.context.containers();
        match self.context_row()? {
            ContextRow::Header(c) => Some((containers.get(c)?.name.clone(), None)),
            ContextRow::File(at) => Some((
                containers.get(at.container)?.name.clone(),
                Some(self.context.entry(at)?.path.clone()),
            )),
        }
    }

    /// Put the cursor back on `anchor` after rows moved; the top row if it
    /// is gone.
    fn seek_context(&mut self, anchor: Option<(String, Option<String>)>) {
        let Some((name, path)) = anchor else {
            self.context_cursor = 0;
            return;
        };
        let containers = self.context.containers();
        self.context_cursor = self
            .context_rows()
            .iter()
            .position(|row| match *row {
                ContextRow::Header(c) => {
                    path.is_none() && containers.get(c).is_some_and(|x| x.name == name)
                }
                ContextRow::File(at) => {
                    containers.get(at.container).is_some_and(|x| x.name == name)
                        && self.context.entry(at).map(|f| &f.path) == path.as_ref()
                }
            })
            .unwrap_or(0);
    }

    fn send_context(&self, result: ApiResult<ContextTicket>) {
        let ticket = match result {
            Ok(ticket) => ticket,
            Err(e) => {
                debug!(error = %e, "Context toggle rejected");
                return;
            }
        };
        self.spawn(|backend, session| async move {
            let result = backend.update_context(&session, &ticket.files).await;
            BackgroundEvent::ContextUpdated(ticket, result)
        });
    }

    /// Toggle the file under the cursor, or the whole container on a header.
    pub fn toggle_context_file(&mut self) {
        let result = match self.context_row() {
            Some(ContextRow::File(at)) => self.context.toggle_file(at),
            Some(ContextRow::Header(c)) => self.context.toggle_all(c),
            None => return,
        };
        self.send_context(result);
    }

    pub fn toggle_context_container(&mut self) {
        let container = match self.context_row() {
            Some(ContextRow::File(at)) => at.container,
            Some(ContextRow::Header(c)) => c,
            None => return,
        };
        let result = self.context.toggle_all(container);
        self.send_context(result);
    }

    pub fn toggle_yaml(&mut self) {
        let Some(ContextRow::File(at)) = self.context_row() else {
            return;
        };
        let ticket = match self.context.begin_toggle_yaml(at) {
            Ok(ticket) => ticket,
            Err(e) => {
                self.show_status(e.user_message(), StatusKind::Info);
                return;
            }
        };
        self.spawn(|backend, session| async move {
            let result = backend
                .set_yaml_override(&session, &ticket.path, ticket.use_yaml)
                .await;
            BackgroundEvent::YamlUpdated(ticket, result)
        });
    }

    pub fn request_search(&mut self) {
        if self.searching {
            return;
        }
        self.dialog = Some(Dialog::Prompt {
            label: "Search related files:".to_string(),
            input: TextArea::from_text(&self.session.query_text),
            purpose: PromptPurpose::SearchFiles,
        });
    }

    fn search_files(&mut self, query: String) {
        self.searching = true;
        self.show_status("Searching related files...", StatusKind::Info);
        self.spawn(|backend, session| async move {
            BackgroundEvent::SearchDone(backend.search_related_files(&session, &query).await)
        });
    }

    // ── Git ─────────────────────────────────────────────────────────────

    pub fn refresh_git(&self) {
        self.spawn(|backend, session| async move {
            BackgroundEvent::GitStatusFetched(backend.git_status(&session).await)
        });
        self.spawn(|backend, session| async move {
            BackgroundEvent::GitBranchesFetched(backend.git_branches(&session).await)
        });
    }

    /// Open the dialog matching the git panel's pending action.
    fn open_git_dialog(&mut self) {
        let Some(pending) = self.git.pending() else {
            return;
        };
        self.dialog = Some(if pending.wants_text() {
            let prefill = match pending {
                PendingGit::CreateBranch { suggested } => suggested.clone(),
                _ => String::new(),
            };
            Dialog::Prompt {
                label: pending.prompt(),
                input: TextArea::from_text(&prefill),
                purpose: PromptPurpose::Git,
            }
        } else {
            Dialog::Confirm {
                question: pending.prompt(),
            }
        });
    }

    fn git_request(&mut self, result: ApiResult<()>) {
        match result {
            Ok(()) => self.open_git_dialog(),
            Err(e) => self.show_status(e.user_message(), StatusKind::Info),
        }
    }

    /// Move the branch highlight one step and ask to check it out.
    pub fn checkout_step(&mut self, step: isize) {
        let Some(branch) = self.git.cycle_branch(step) else {
            return;
        };
        let result = self.git.request_checkout(&branch).map(|_| ());
        self.git_request(result);
    }

    pub fn request_push(&mut self) {
        let result = self.git.request_push().map(|_| ());
        self.git_request(result);
    }

    pub fn request_merge(&mut self) {
        let result = self.git.request_merge().map(|_| ());
        self.git_request(result);
    }

    pub fn request_commit(&mut self) {
        let result = self.git.request_commit().map(|_| ());
        self.git_request(result);
    }

    /// Fetch a suggested name; the prompt opens when it arrives.
    pub fn request_new_branch(&mut self) {
        if let Err(e) = self.git.can_start_branch() {
            self.show_status(e.user_message(), StatusKind::Info);
            return;
        }
        self.spawn(|backend, session| async move {
            BackgroundEvent::BranchSuggested(backend.suggest_branch_name(&session).await)
        });
    }

    fn run_git(&self, ticket: GitTicket) {
        self.spawn(|backend, session| async move {
            let result = match (ticket.action, ticket.branch.as_deref()) {
                (GitAction::CreateBranch, Some(branch)) => {
                    backend.create_branch(&session, branch).await
                }
                (GitAction::Checkout, Some(branch)) => {
                    backend.checkout_branch(&session, branch).await
                }
                (GitAction::Commit, _) => {
                    let message = ticket.message.as_deref().unwrap_or_default();
                    backend.commit_changes(&session, message).await
                }
                (GitAction::Push, _) => backend.push_changes(&session).await,
                (GitAction::Merge, _) => backend.merge_branch(&session).await,
                (action, None) => Err(ApiError::validation(format!(
                    "{} needs a branch name.",
                    action.label()
                ))),
            };
            BackgroundEvent::GitActionDone(ticket, result)
        });
    }

    pub fn toggle_auto_commit(&mut self) {
        let ticket = match self.git.begin_toggle_auto_commit() {
            Ok(ticket) => ticket,
            Err(e) => {
                self.show_status(e.user_message(), StatusKind::Info);
                return;
            }
        };
        self.spawn(|backend, session| async move {
            let result = backend.set_auto_commit(&session, ticket.enabled).await;
            BackgroundEvent::AutoCommitUpdated(ticket, result)
        });
    }

    // ── Dialogs ─────────────────────────────────────────────────────────

    /// Enter on a dialog: confirm, or submit the typed text.
    pub fn submit_dialog(&mut self) {
        let Some(dialog) = self.dialog.take() else {
            return;
        };
        match dialog {
            Dialog::Alert { .. } => {}
            Dialog::Confirm { .. } => {
                if let Some(ticket) = self.git.confirm_pending(None) {
                    self.run_git(ticket);
                }
            }
            Dialog::Prompt { input, purpose, .. } => {
                let text = input.text().trim().to_string();
                match purpose {
                    PromptPurpose::Git => {
                        if let Some(ticket) = self.git.confirm_pending(Some(&text)) {
                            self.run_git(ticket);
                        }
                    }
                    PromptPurpose::ApplyCode(block) => {
                        if text.is_empty() {
                            debug!("File path not provided, not applying");
                        } else {
                            self.apply_code(block, text);
                        }
                    }
                    PromptPurpose::EditQuery => {
                        if !text.is_empty() {
                            self.update_query(text);
                        }
                    }
                    PromptPurpose::SearchFiles => {
                        if !text.is_empty() {
                            self.search_files(text);
                        }
                    }
                }
            }
        }
    }

    /// Esc on a dialog. A git dialog cancels the pending action.
    pub fn dismiss_dialog(&mut self) {
        match self.dialog.take() {
            Some(Dialog::Confirm { .. })
            | Some(Dialog::Prompt {
                purpose: PromptPurpose::Git,
                ..
            }) => self.git.cancel_pending(),
            _ => {}
        }
    }

    // ── Background results ──────────────────────────────────────────────

    pub fn handle_background_event(&mut self, event: BackgroundEvent) {
        match event {
            BackgroundEvent::HistoryLoaded(ticket, result) => {
                if let Err(e) = self.chat.complete_reload(ticket, result) {
                    self.show_status(
                        format!("Could not load chat history: {}", e.user_message()),
                        StatusKind::Error,
                    );
                }
            }
            BackgroundEvent::BranchingLoaded(result) => self.chat.apply_branching(result),
            BackgroundEvent::ChatReplied(ticket, result) => {
                self.chat.complete_send(ticket, result);
            }
            BackgroundEvent::ResetDone(ticket, result) => {
                if let Err(e) = &result {
                    self.show_status(
                        format!("Reset failed: {}", e.user_message()),
                        StatusKind::Error,
                    );
                }
                self.chat.complete_reset(ticket, result);
            }
            BackgroundEvent::EditSaved(ticket, result) => {
                if let Err(e) = self.chat.complete_save_edit(ticket, result) {
                    self.alert(format!("Failed to save message: {}", e.user_message()));
                }
            }
            BackgroundEvent::VisibilityUpdated(ticket, result) => {
                if let Err(e) = self.chat.complete_toggle_hidden(ticket, result) {
                    self.alert(format!(
                        "Failed to update message visibility: {}",
                        e.user_message()
                    ));
                }
            }
            BackgroundEvent::Regenerated(ticket, result) => {
                if let Err(e) = self.chat.complete_regenerate(ticket, result) {
                    self.alert(format!("Failed to regenerate message: {}", e.user_message()));
                }
            }
            BackgroundEvent::SiblingSwitched(ticket, result) => {
                if let Err(e) = self.chat.complete_switch_sibling(ticket, result) {
                    self.show_status(
                        format!("Could not switch branch: {}", e.user_message()),
                        StatusKind::Error,
                    );
                }
            }
            BackgroundEvent::PromptOptimized(result) => {
                self.optimizing = false;
                match result {
                    Ok(prompt) => {
                        self.input.set_text(&prompt);
                        self.show_status("Prompt optimized.", StatusKind::Success);
                    }
                    Err(e) => {
                        error!(error = %e, "Prompt optimization failed");
                        self.alert(format!("Failed to optimize prompt: {}", e.user_message()));
                    }
                }
            }
            BackgroundEvent::CodeApplied {
                block,
                path,
                result,
            } => {
                let outcome = match result {
                    Ok(()) => {
                        info!(path = %path, "Code applied");
                        self.alert(format!("Code successfully applied to {path}"));
                        ActionOutcome::Applied
                    }
                    Err(e) => {
                        error!(path = %path, error = %e, "Applying code failed");
                        self.alert(match &e {
                            ApiError::Transport { .. } => format!(
                                "A network error occurred while applying code to file: {e}"
                            ),
                            _ => format!("Failed to apply code to {path}: {}", e.user_message()),
                        });
                        ActionOutcome::Failed
                    }
                };
                self.flashes.insert(block, ActionFlash::new(outcome));
            }
            BackgroundEvent::QueryUpdated { query, result } => match result {
                Ok(()) => {
                    info!(query = %query, "Query updated");
                    self.session.query_text = query;
                    self.show_status("Query updated successfully!", StatusKind::Success);
                }
                Err(e) => {
                    error!(error = %e, "Updating query failed");
                    self.alert(match e {
                        ApiError::Transport { .. } => "An error occurred while updating the query.",
                        _ => "Failed to update query. Please try again.",
                    });
                }
            },
            BackgroundEvent::ContextUpdated(ticket, result) => {
                self.context.complete_update(ticket, result);
            }
            BackgroundEvent::YamlUpdated(ticket, result) => {
                if let Err(e) = self.context.complete_toggle_yaml(ticket, result) {
                    self.alert(format!("Failed to update YAML setting: {}", e.user_message()));
                }
            }
            BackgroundEvent::SearchDone(result) => {
                self.searching = false;
                match result {
                    Ok(html) => {
                        let anchor = self.context_anchor();
                        let found = self.context.apply_search_results(&html);
                        self.seek_context(anchor);
                        self.show_status(
                            format!("Found {found} related files."),
                            StatusKind::Success,
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Related file search failed");
                        self.alert(format!("Error searching files: {}", e.user_message()));
                    }
                }
            }
            BackgroundEvent::GitStatusFetched(result) => self.git.apply_status(result),
            BackgroundEvent::GitBranchesFetched(result) => self.git.apply_branches(result),
            BackgroundEvent::GitActionDone(ticket, result) => {
                if self.git.complete(ticket, result) {
                    self.refresh_git();
                }
            }
            BackgroundEvent::BranchSuggested(result) => match result {
                Ok(name) => {
                    let result = self.git.request_create_branch(name).map(|_| ());
                    self.git_request(result);
                }
                Err(e) => self.git.suggestion_failed(&e),
            },
            BackgroundEvent::AutoCommitUpdated(ticket, result) => {
                self.git.complete_toggle_auto_commit(ticket, result);
            }
        }
    }

    /// Housekeeping run every loop iteration. Returns true when something
    /// visible changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        changed |= clear_expired(&mut self.status, now);
        changed |= clear_expired(&mut self.context.status, now);
        changed |= clear_expired(&mut self.git.message, now);

        let before = self.flashes.len();
        self.flashes.retain(|_, flash| !flash.expired(now));
        changed |= self.flashes.len() != before;

        if self.chat.take_needs_reload() {
            self.reload_history();
        }
        if self.chat.take_needs_branching() {
            self.refresh_branching();
        }

        // Close the editor once its message is no longer being edited.
        if let Some((key, _)) = &self.editing {
            if !matches!(
                self.chat.op(*key),
                Some(MessageOp::Editing(_)) | Some(MessageOp::Saving(_))
            ) {
                self.editing = None;
                changed = true;
            }
        }
        if let Some(key) = self.selected {
            if self.chat.store().get(key).is_none() {
                self.select(None);
                changed = true;
            }
        }
        changed
    }

    /// Re-render messages whose content changed since the last draw.
    pub fn refresh_renders(&mut self) {
        let store = self.chat.store();
        self.renders.retain(|key, _| store.get(*key).is_some());
        for msg in store.iter() {
            let stale = self
                .renders
                .get(&msg.key)
                .map_or(true, |c| c.content != msg.content);
            if stale {
                let rendered = render_markdown(&msg.content, &self.links, &self.theme);
                self.renders.insert(
                    msg.key,
                    CachedRender {
                        content: msg.content.clone(),
                        rendered,
                    },
                );
            }
        }
    }
}

/// Next index in `0..count`, wrapping; `None` when there is nothing.
fn cycle(current: Option<usize>, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    Some(current.map_or(0, |i| (i + 1) % count))
}
