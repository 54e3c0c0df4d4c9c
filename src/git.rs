use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::models::{BranchesReply, GitStatusReply};
use crate::status::{StatusBanner, StatusKind};

pub fn is_default_branch(name: &str) -> bool {
    matches!(name, "main" | "master")
}

/// Which git controls are shown or enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonState {
    pub commit_visible: bool,
    pub push_visible: bool,
    pub merge_visible: bool,
    pub new_branch_enabled: bool,
}

/// Button visibility for a repository state. With no known branch the repo
/// is treated as sitting on its default branch.
pub fn button_state(
    has_uncommitted: bool,
    has_unpushed: bool,
    auto_commit_enabled: bool,
    current_branch: Option<&str>,
) -> ButtonState {
    let on_default = current_branch.map_or(true, is_default_branch);
    ButtonState {
        commit_visible: has_uncommitted && !auto_commit_enabled,
        push_visible: has_unpushed,
        merge_visible: !on_default,
        new_branch_enabled: on_default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitAction {
    CreateBranch,
    Checkout,
    Commit,
    Push,
    Merge,
}

impl GitAction {
    pub fn label(self) -> &'static str {
        match self {
            GitAction::CreateBranch => "Branch",
            GitAction::Checkout => "Checkout",
            GitAction::Commit => "Commit",
            GitAction::Push => "Push",
            GitAction::Merge => "Merge",
        }
    }

    /// Prefix for a failure the server explained.
    fn failure_prefix(self) -> &'static str {
        match self {
            GitAction::CreateBranch => "Failed to create branch",
            GitAction::Checkout => "Failed to checkout branch",
            GitAction::Commit => "Commit failed",
            GitAction::Push => "Push failed",
            GitAction::Merge => "Merge failed",
        }
    }

    /// Text for a failure where the server never answered usefully.
    fn transport_text(self) -> &'static str {
        match self {
            GitAction::CreateBranch => "Error suggesting or creating branch.",
            GitAction::Checkout => "Error checking out branch.",
            GitAction::Commit => "Error committing changes.",
            GitAction::Push => "Error pushing changes.",
            GitAction::Merge => "Error merging branch.",
        }
    }

    fn failure_text(self, err: &ApiError) -> String {
        match err {
            ApiError::Status { status: 409, .. } if self == GitAction::Merge => err.user_message(),
            ApiError::Application { message, .. } => {
                format!("{}: {}", self.failure_prefix(), message)
            }
            ApiError::Status { body, .. } if !body.trim().is_empty() => {
                format!("{}: {}", self.failure_prefix(), body.trim())
            }
            ApiError::Validation(msg) => msg.clone(),
            _ => self.transport_text().to_string(),
        }
    }
}

/// A git action that has been requested and is waiting for the user to
/// confirm it (or type its argument).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingGit {
    Checkout { branch: String },
    Push { branch: String },
    Merge { branch: String },
    Commit,
    CreateBranch { suggested: String },
}

impl PendingGit {
    pub fn action(&self) -> GitAction {
        match self {
            PendingGit::Checkout { .. } => GitAction::Checkout,
            PendingGit::Push { .. } => GitAction::Push,
            PendingGit::Merge { .. } => GitAction::Merge,
            PendingGit::Commit => GitAction::Commit,
            PendingGit::CreateBranch { .. } => GitAction::CreateBranch,
        }
    }

    /// Question shown in the confirm dialog, or the prompt label.
    pub fn prompt(&self) -> String {
        match self {
            PendingGit::Checkout { branch } => format!(
                "Are you sure you want to checkout to branch '{branch}'? Uncommitted changes will be carried over."
            ),
            PendingGit::Push { branch } => {
                format!("Are you sure you want to push changes for branch '{branch}' to remote?")
            }
            PendingGit::Merge { branch } => format!(
                "Are you sure you want to merge branch '{branch}' into the default branch and delete it?"
            ),
            PendingGit::Commit => "Enter commit message:".to_string(),
            PendingGit::CreateBranch { .. } => "Enter branch name:".to_string(),
        }
    }

    /// Whether the dialog asks for text rather than yes/no.
    pub fn wants_text(&self) -> bool {
        matches!(self, PendingGit::Commit | PendingGit::CreateBranch { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitTicket {
    pub action: GitAction,
    /// Branch to create or check out.
    pub branch: Option<String>,
    /// Commit message.
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCommitTicket {
    pub enabled: bool,
}

/// Git status, branch selector and action buttons for the project.
#[derive(Debug)]
pub struct GitPanel {
    pub status: GitStatusReply,
    pub current_branch: Option<String>,
    pub branches: Vec<String>,
    /// Branch highlighted in the selector; differs from `current_branch`
    /// while a checkout waits for confirmation or for the server.
    pub selected_branch: Option<String>,
    pub auto_commit: bool,
    auto_commit_pending: bool,
    busy: Option<GitAction>,
    pending: Option<PendingGit>,
    pub message: Option<StatusBanner>,
    message_for: Duration,
}

impl GitPanel {
    pub fn new(auto_commit: bool, message_for: Duration) -> Self {
        Self {
            status: GitStatusReply::default(),
            current_branch: None,
            branches: Vec::new(),
            selected_branch: None,
            auto_commit,
            auto_commit_pending: false,
            busy: None,
            pending: None,
            message: None,
            message_for,
        }
    }

    pub fn buttons(&self) -> ButtonState {
        button_state(
            self.status.has_uncommitted_changes,
            self.status.has_unpushed_commits,
            self.auto_commit,
            self.current_branch.as_deref(),
        )
    }

    pub fn busy(&self) -> Option<GitAction> {
        self.busy
    }

    pub fn pending(&self) -> Option<&PendingGit> {
        self.pending.as_ref()
    }

    fn show(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.message = Some(StatusBanner::fading(text, kind, self.message_for));
    }

    fn ensure_idle(&self) -> ApiResult<()> {
        if let Some(action) = self.busy {
            return Err(ApiError::validation(format!(
                "{} still in progress.",
                action.label()
            )));
        }
        if self.pending.is_some() {
            return Err(ApiError::validation("Another git action awaits confirmation."));
        }
        Ok(())
    }

    // ── Polling ─────────────────────────────────────────────────────────

    pub fn apply_status(&mut self, result: ApiResult<GitStatusReply>) {
        match result {
            Ok(status) if status.success => self.status = status,
            Ok(_) => debug!("Git status reported failure, keeping previous state"),
            Err(e) => warn!(error = %e, "Git status poll failed"),
        }
    }

    pub fn apply_branches(&mut self, result: ApiResult<BranchesReply>) {
        let reply = match result {
            Ok(reply) if reply.success && reply.branches.is_some() => reply,
            Ok(reply) => {
                warn!(message = %reply.message, "Branch list unavailable");
                self.show("Failed to refresh branch list.", StatusKind::Error);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Branch list request failed");
                self.show("Error refreshing branch list.", StatusKind::Error);
                return;
            }
        };
        self.branches = reply.branches.unwrap_or_default();
        self.current_branch = reply.current_repo_branch.filter(|b| !b.is_empty());
        // A checkout awaiting confirmation keeps its highlighted branch.
        if !matches!(self.pending, Some(PendingGit::Checkout { .. }))
            && self.busy != Some(GitAction::Checkout)
        {
            self.selected_branch = self.current_branch.clone();
        }
    }

    // ── Requesting actions ──────────────────────────────────────────────

    /// Highlight `branch` in the selector and ask for confirmation.
    pub fn request_checkout(&mut self, branch: &str) -> ApiResult<&PendingGit> {
        self.ensure_idle()?;
        if self.current_branch.as_deref() == Some(branch) {
            return Err(ApiError::validation(format!("Already on '{branch}'.")));
        }
        self.selected_branch = Some(branch.to_string());
        Ok(self.pending.insert(PendingGit::Checkout {
            branch: branch.to_string(),
        }))
    }

    /// The branch `step` places away from the highlighted one, wrapping.
    pub fn cycle_branch(&self, step: isize) -> Option<String> {
        if self.branches.is_empty() {
            return None;
        }
        let len = self.branches.len() as isize;
        let from = self
            .selected_branch
            .as_ref()
            .and_then(|s| self.branches.iter().position(|b| b == s))
            .unwrap_or(0) as isize;
        let next = (from + step).rem_euclid(len) as usize;
        self.branches.get(next).cloned()
    }

    pub fn request_push(&mut self) -> ApiResult<&PendingGit> {
        self.ensure_idle()?;
        if !self.buttons().push_visible {
            return Err(ApiError::validation("Nothing to push."));
        }
        let branch = self.current_branch.clone().unwrap_or_default();
        Ok(self.pending.insert(PendingGit::Push { branch }))
    }

    pub fn request_merge(&mut self) -> ApiResult<&PendingGit> {
        self.ensure_idle()?;
        if !self.buttons().merge_visible {
            return Err(ApiError::validation("Already on the default branch."));
        }
        let branch = self.current_branch.clone().unwrap_or_default();
        Ok(self.pending.insert(PendingGit::Merge { branch }))
    }

    pub fn request_commit(&mut self) -> ApiResult<&PendingGit> {
        self.ensure_idle()?;
        if !self.buttons().commit_visible {
            return Err(ApiError::validation("Nothing to commit."));
        }
        Ok(self.pending.insert(PendingGit::Commit))
    }

    /// Checks the new-branch button is enabled. The suggestion request is
    /// made by the caller before `request_create_branch`.
    pub fn can_start_branch(&self) -> ApiResult<()> {
        self.ensure_idle()?;
        if !self.buttons().new_branch_enabled {
            return Err(ApiError::validation(
                "New branches start from the default branch.",
            ));
        }
        Ok(())
    }

    pub fn request_create_branch(&mut self, suggested: String) -> ApiResult<&PendingGit> {
        self.can_start_branch()?;
        Ok(self.pending.insert(PendingGit::CreateBranch { suggested }))
    }

    pub fn suggestion_failed(&mut self, err: &ApiError) {
        error!(error = %err, "Suggesting a branch name failed");
        self.show(GitAction::CreateBranch.transport_text(), StatusKind::Error);
    }

    /// The user declined: "<Action> cancelled." and undo the highlight.
    pub fn cancel_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if let PendingGit::Checkout { .. } = pending {
            self.selected_branch = self.current_branch.clone();
        }
        let text = match pending.action() {
            GitAction::CreateBranch => return,
            action => format!("{} cancelled.", action.label()),
        };
        info!(text = %text, "Git action cancelled");
        self.show(text, StatusKind::Error);
    }

    /// The user confirmed. `input` is the typed text for commit and
    /// create-branch; empty input counts as cancelling.
    pub fn confirm_pending(&mut self, input: Option<&str>) -> Option<GitTicket> {
        let pending = self.pending.clone()?;
        let text = input.map(str::trim).filter(|t| !t.is_empty());
        if pending.wants_text() && text.is_none() {
            self.cancel_pending();
            return None;
        }
        self.pending = None;
        let ticket = match pending {
            PendingGit::Checkout { branch } => GitTicket {
                action: GitAction::Checkout,
                branch: Some(branch),
                message: None,
            },
            PendingGit::Push { .. } => GitTicket {
                action: GitAction::Push,
                branch: None,
                message: None,
            },
            PendingGit::Merge { .. } => GitTicket {
                action: GitAction::Merge,
                branch: None,
                message: None,
            },
            PendingGit::Commit => GitTicket {
                action: GitAction::Commit,
                branch: None,
                message: text.map(str::to_string),
            },
            PendingGit::CreateBranch { .. } => GitTicket {
                action: GitAction::CreateBranch,
                branch: text.map(str::to_string),
                message: None,
            },
        };
        self.busy = Some(ticket.action);
        Some(ticket)
    }

    /// Apply the server's answer. Returns true when status and branches
    /// should be re-fetched.
    pub fn complete(&mut self, ticket: GitTicket, result: ApiResult<String>) -> bool {
        self.busy = None;
        match result {
            Ok(message) => {
                info!(action = ?ticket.action, message = %message, "Git action succeeded");
                match ticket.action {
                    GitAction::Checkout | GitAction::CreateBranch => {
                        self.current_branch = ticket.branch.clone();
                        self.selected_branch = ticket.branch;
                    }
                    GitAction::Merge => {
                        self.current_branch = Some("main".to_string());
                        self.selected_branch = self.current_branch.clone();
                    }
                    GitAction::Commit => self.status.has_uncommitted_changes = false,
                    GitAction::Push => self.status.has_unpushed_commits = false,
                }
                let text = if message.trim().is_empty() {
                    format!("{} succeeded.", ticket.action.label())
                } else {
                    message
                };
                self.show(text, StatusKind::Success);
                true
            }
            Err(e) => {
                error!(action = ?ticket.action, error = %e, "Git action failed");
                if ticket.action == GitAction::Checkout {
                    self.selected_branch = self.current_branch.clone();
                }
                self.show(ticket.action.failure_text(&e), StatusKind::Error);
                false
            }
        }
    }

    // ── Auto-commit ─────────────────────────────────────────────────────

    pub fn begin_toggle_auto_commit(&mut self) -> ApiResult<AutoCommitTicket> {
        if self.auto_commit_pending {
            return Err(ApiError::validation("Auto-commit setting is being saved."));
        }
        self.auto_commit = !self.auto_commit;
        self.auto_commit_pending = true;
        Ok(AutoCommitTicket {
            enabled: self.auto_commit,
        })
    }

    pub fn complete_toggle_auto_commit(&mut self, ticket: AutoCommitTicket, result: ApiResult<()>) {
        self.auto_commit_pending = false;
        match result {
            Ok(()) => self.show("Auto-commit setting updated.", StatusKind::Success),
            Err(e) => {
                error!(error = %e, "Updating auto-commit failed");
                self.auto_commit = !ticket.enabled;
                let text = match &e {
                    ApiError::Application { message, .. } => {
                        format!("Failed to update auto-commit setting: {message}")
                    }
                    _ => "Error updating auto-commit setting.".to_string(),
                };
                self.show(text, StatusKind::Error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AnalysisBackend;
    use crate::test_support::{session, FakeBackend};

    fn panel_on(branch: &str) -> GitPanel {
        let mut panel = GitPanel::new(false, Duration::from_millis(5000));
        panel.apply_branches(Ok(BranchesReply {
            success: true,
            message: String::new(),
            branches: Some(vec!["main".into(), "feature/x".into()]),
            current_repo_branch: Some(branch.into()),
        }));
        panel
    }

    fn message(panel: &GitPanel) -> Option<&str> {
        panel.message.as_ref().map(|m| m.text.as_str())
    }

    #[test]
    fn test_push_visible_regardless_of_auto_commit() {
        for auto in [false, true] {
            let state = button_state(false, true, auto, Some("main"));
            assert!(!state.commit_visible);
            assert!(state.push_visible);
        }
    }

    #[test]
    fn test_commit_visibility_follows_auto_commit() {
        assert!(!button_state(true, false, true, Some("main")).commit_visible);
        assert!(button_state(true, false, false, Some("main")).commit_visible);
        assert!(!button_state(true, false, false, Some("main")).push_visible);
    }

    #[test]
    fn test_branch_buttons() {
        let main = button_state(false, false, false, Some("master"));
        assert!(!main.merge_visible);
        assert!(main.new_branch_enabled);
        let feature = button_state(false, false, false, Some("feature/x"));
        assert!(feature.merge_visible);
        assert!(!feature.new_branch_enabled);
    }

    #[test]
    fn test_cancel_checkout_reverts_selection() {
        let mut panel = panel_on("main");
        let prompt = panel.request_checkout("feature/x").unwrap().prompt();
        assert_eq!(
            prompt,
            "Are you sure you want to checkout to branch 'feature/x'? Uncommitted changes will be carried over."
        );
        assert_eq!(panel.selected_branch.as_deref(), Some("feature/x"));
        panel.cancel_pending();
        assert_eq!(panel.selected_branch.as_deref(), Some("main"));
        assert_eq!(message(&panel), Some("Checkout cancelled."));
    }

    #[test]
    fn test_cancel_messages() {
        let mut panel = panel_on("feature/x");
        panel.status.has_unpushed_commits = true;
        panel.request_push().unwrap();
        panel.cancel_pending();
        assert_eq!(message(&panel), Some("Push cancelled."));

        panel.request_merge().unwrap();
        panel.cancel_pending();
        assert_eq!(message(&panel), Some("Merge cancelled."));

        panel.status.has_uncommitted_changes = true;
        panel.request_commit().unwrap();
        assert!(panel.confirm_pending(Some("   ")).is_none());
        assert_eq!(message(&panel), Some("Commit cancelled."));
    }

    #[tokio::test]
    async fn test_checkout_success_updates_branch() {
        let backend = FakeBackend::new();
        let mut panel = panel_on("main");
        panel.request_checkout("feature/x").unwrap();
        let ticket = panel.confirm_pending(None).unwrap();
        assert_eq!(panel.busy(), Some(GitAction::Checkout));
        assert!(panel.request_push().is_err());

        let branch = ticket.branch.clone().unwrap();
        let result = backend.checkout_branch(&session(), &branch).await;
        assert!(panel.complete(ticket, result));
        assert_eq!(panel.current_branch.as_deref(), Some("feature/x"));
        assert!(panel.buttons().merge_visible);
        assert!(panel.busy().is_none());
    }

    #[tokio::test]
    async fn test_checkout_failure_reverts_selection() {
        let backend = FakeBackend::new();
        backend.fail("/checkout-git-branch", 500, "");
        let mut panel = panel_on("main");
        panel.request_checkout("feature/x").unwrap();
        let ticket = panel.confirm_pending(None).unwrap();
        let result = backend.checkout_branch(&session(), "feature/x").await;
        assert!(!panel.complete(ticket, result));
        assert_eq!(panel.selected_branch.as_deref(), Some("main"));
        assert_eq!(message(&panel), Some("Error checking out branch."));
    }

    #[tokio::test]
    async fn test_merge_conflict_shows_server_message() {
        let backend = FakeBackend::new();
        backend.fail("/merge-git-branch", 409, "Merge failed due to conflicts.");
        let mut panel = panel_on("feature/x");
        panel.request_merge().unwrap();
        let ticket = panel.confirm_pending(None).unwrap();
        let result = backend.merge_branch(&session()).await;
        panel.complete(ticket, result);
        assert_eq!(message(&panel), Some("Merge failed due to conflicts."));
        assert_eq!(
            panel.message.as_ref().map(|m| m.kind),
            Some(StatusKind::Error)
        );
        assert_eq!(panel.current_branch.as_deref(), Some("feature/x"));
    }

    #[test]
    fn test_application_failure_is_prefixed() {
        let mut panel = panel_on("main");
        panel.status.has_unpushed_commits = true;
        panel.request_push().unwrap();
        let ticket = panel.confirm_pending(None).unwrap();
        panel.complete(
            ticket,
            Err(ApiError::Application {
                endpoint: "/push-git-changes",
                message: "no upstream".into(),
            }),
        );
        assert_eq!(message(&panel), Some("Push failed: no upstream"));
    }

    #[test]
    fn test_new_branch_only_from_default_branch() {
        let mut panel = panel_on("feature/x");
        assert!(panel.request_create_branch("feature/y".into()).is_err());
        let mut panel = panel_on("main");
        let pending = panel.request_create_branch("feature/y".into()).unwrap();
        assert!(pending.wants_text());
        let ticket = panel.confirm_pending(Some("feature/z")).unwrap();
        assert_eq!(ticket.branch.as_deref(), Some("feature/z"));
    }

    #[test]
    fn test_auto_commit_failure_reverts() {
        let mut panel = panel_on("main");
        panel.status.has_uncommitted_changes = true;
        assert!(panel.buttons().commit_visible);

        let ticket = panel.begin_toggle_auto_commit().unwrap();
        assert!(panel.auto_commit);
        assert!(!panel.buttons().commit_visible);
        assert!(panel.begin_toggle_auto_commit().is_err());

        panel.complete_toggle_auto_commit(
            ticket,
            Err(ApiError::Application {
                endpoint: "/update-query-auto-commit",
                message: "query not found".into(),
            }),
        );
        assert!(!panel.auto_commit);
        assert!(panel.buttons().commit_visible);
        assert_eq!(
            message(&panel),
            Some("Failed to update auto-commit setting: query not found")
        );
    }

    #[test]
    fn test_branch_refresh_failure_message() {
        let mut panel = panel_on("main");
        panel.apply_branches(Ok(BranchesReply::default()));
        assert_eq!(message(&panel), Some("Failed to refresh branch list."));
        assert_eq!(panel.current_branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_cycle_branch_wraps() {
        let panel = panel_on("main");
        assert_eq!(panel.cycle_branch(1).as_deref(), Some("feature/x"));
        assert_eq!(panel.cycle_branch(-1).as_deref(), Some("feature/x"));
        assert_eq!(panel.cycle_branch(2).as_deref(), Some("main"));
    }
}
