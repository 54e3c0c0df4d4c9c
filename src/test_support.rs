//! In-memory `AnalysisBackend` for controller and app tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::AnalysisBackend;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    BranchesReply, BranchingData, ChatReply, GitStatusReply, MessageRef, OptimizeRequest,
    RegenerateReply, ResetReply, Role, ServerMessage, Session, UpdateMessageReply,
};

/// Records every request and answers from a tiny simulated chat path.
#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<(&'static str, Value)>>,
    failures: Mutex<HashMap<&'static str, (u16, String)>>,
    pub history: Mutex<Vec<ServerMessage>>,
    pub initial_history: Mutex<Vec<ServerMessage>>,
    pub status: Mutex<GitStatusReply>,
    pub branches: Mutex<BranchesReply>,
    pub search_html: Mutex<String>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let fake = Self::default();
        *fake.branches.lock().unwrap() = BranchesReply {
            success: true,
            message: String::new(),
            branches: Some(vec!["main".into(), "feature/x".into()]),
            current_repo_branch: Some("main".into()),
        };
        *fake.status.lock().unwrap() = GitStatusReply {
            success: true,
            has_uncommitted_changes: false,
            has_unpushed_commits: false,
        };
        fake
    }

    /// Make `endpoint` answer with HTTP `status` from now on.
    pub fn fail(&self, endpoint: &'static str, status: u16, body: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(endpoint, (status, body.to_string()));
    }

    pub fn calls(&self) -> Vec<(&'static str, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .count()
    }

    pub fn last_payload(&self, endpoint: &str) -> Option<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(e, _)| *e == endpoint)
            .map(|(_, v)| v.clone())
    }

    fn record(&self, endpoint: &'static str, payload: Value) -> ApiResult<()> {
        self.calls.lock().unwrap().push((endpoint, payload));
        match self.failures.lock().unwrap().get(endpoint) {
            Some((status, body)) => Err(ApiError::Status {
                endpoint,
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }

    fn parent_of(&self, id: Uuid) -> Option<Uuid> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.parent_id)
    }

    /// Cut the simulated path after `parent` and append `msg`.
    fn fork(&self, parent: Option<Uuid>, msg: ServerMessage) {
        let mut history = self.history.lock().unwrap();
        let cut = match parent {
            Some(p) => history.iter().position(|m| m.id == p).map_or(0, |i| i + 1),
            None => 0,
        };
        history.truncate(cut);
        history.push(msg);
    }
}

pub fn server_msg(role: Role, content: &str, parent_id: Option<Uuid>) -> ServerMessage {
    ServerMessage {
        id: Uuid::new_v4(),
        role,
        content: content.to_string(),
        hidden: false,
        parent_id,
    }
}

pub fn session() -> Session {
    Session {
        project: "demo".into(),
        query_id: "q1".into(),
        query_text: "where is the parser".into(),
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn chat(&self, _session: &Session, message: &str) -> ApiResult<ChatReply> {
        self.record("/chat-analysis", json!({ "message": message }))?;
        let parent = self.history.lock().unwrap().last().map(|m| m.id);
        let user = server_msg(Role::User, message, parent);
        let model = server_msg(Role::Model, &format!("echo: {message}"), Some(user.id));
        {
            let mut history = self.history.lock().unwrap();
            history.push(user.clone());
            history.push(model.clone());
        }
        Ok(ChatReply {
            success: true,
            user_message: MessageRef {
                id: user.id,
                content: user.content,
            },
            model_message: model,
        })
    }

    async fn reset_chat(&self, _session: &Session) -> ApiResult<ResetReply> {
        self.record("/reset-analysis-chat", json!({}))?;
        let initial = self.initial_history.lock().unwrap().clone();
        *self.history.lock().unwrap() = initial.clone();
        Ok(ResetReply {
            success: true,
            initial_chat_history: initial,
        })
    }

    async fn update_message(
        &self,
        _session: &Session,
        message_id: Uuid,
        content: &str,
        create_new_branch: bool,
    ) -> ApiResult<UpdateMessageReply> {
        self.record(
            "/update-chat-message",
            json!({
                "message_id": message_id,
                "content": content,
                "create_new_branch": create_new_branch,
            }),
        )?;
        let parent = self.parent_of(message_id);
        if create_new_branch {
            let original_role = self
                .history
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == message_id)
                .map_or(Role::User, |m| m.role);
            let forked = server_msg(original_role, content, parent);
            self.fork(parent, forked.clone());
            return Ok(UpdateMessageReply {
                success: true,
                message: forked,
                parent_message_id: parent,
            });
        }
        let mut history = self.history.lock().unwrap();
        let entry = history
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ApiError::validation("unknown message"))?;
        entry.content = content.to_string();
        Ok(UpdateMessageReply {
            success: true,
            message: entry.clone(),
            parent_message_id: parent,
        })
    }

    async fn set_message_hidden(
        &self,
        _session: &Session,
        message_id: Uuid,
        hidden: bool,
    ) -> ApiResult<()> {
        self.record(
            "/update-message-visibility",
            json!({ "message_id": message_id, "hidden": hidden }),
        )
    }

    async fn regenerate_message(
        &self,
        _session: &Session,
        message_id: Uuid,
    ) -> ApiResult<RegenerateReply> {
        self.record("/regenerate-chat-message", json!({ "message_id": message_id }))?;
        let user_id = self
            .parent_of(message_id)
            .ok_or_else(|| ApiError::validation("no parent"))?;
        let fresh = server_msg(Role::Model, "regenerated answer", Some(user_id));
        self.fork(Some(user_id), fresh.clone());
        Ok(RegenerateReply {
            success: true,
            new_model_message: fresh,
            user_message_id: user_id,
        })
    }

    async fn fetch_history(&self, _session: &Session) -> ApiResult<Vec<ServerMessage>> {
        self.record("chat_history", json!({}))?;
        Ok(self.history.lock().unwrap().clone())
    }

    async fn fetch_branching(&self, _session: &Session) -> ApiResult<BranchingData> {
        self.record("/get-branching-data", json!({}))?;
        Ok(BranchingData::new())
    }

    async fn set_current_node(&self, _session: &Session, node_id: Uuid) -> ApiResult<()> {
        self.record("/set-current-chat-node", json!({ "new_current_node_id": node_id }))
    }

    async fn update_context(&self, _session: &Session, files: &[String]) -> ApiResult<()> {
        self.record("/update-analysis-context", json!({ "files": files }))
    }

    async fn set_yaml_override(
        &self,
        _session: &Session,
        file_path: &str,
        use_yaml: bool,
    ) -> ApiResult<()> {
        self.record(
            "/update-file-yaml-override",
            json!({ "file_path": file_path, "use_yaml": use_yaml }),
        )
    }

    async fn search_related_files(&self, _session: &Session, query: &str) -> ApiResult<String> {
        self.record("/search-related-files", json!({ "query": query }))?;
        Ok(self.search_html.lock().unwrap().clone())
    }

    async fn update_query(&self, _session: &Session, query: &str) -> ApiResult<()> {
        self.record("/update-analysis-query", json!({ "query": query }))
    }

    async fn optimize_prompt(
        &self,
        _session: &Session,
        request: &OptimizeRequest,
    ) -> ApiResult<String> {
        self.record("/optimize-prompt", json!(request))?;
        Ok(format!("{} (optimized)", request.original_prompt))
    }

    async fn apply_code_to_file(
        &self,
        _session: &Session,
        file_path: &str,
        content: &str,
    ) -> ApiResult<()> {
        self.record(
            "/apply-code-to-file",
            json!({ "file_path": file_path, "content": content }),
        )
    }

    async fn git_status(&self, _session: &Session) -> ApiResult<GitStatusReply> {
        self.record("/git-status", json!({}))?;
        Ok(*self.status.lock().unwrap())
    }

    async fn git_branches(&self, _session: &Session) -> ApiResult<BranchesReply> {
        self.record("/git-branches", json!({}))?;
        Ok(self.branches.lock().unwrap().clone())
    }

    async fn create_branch(&self, _session: &Session, branch: &str) -> ApiResult<String> {
        self.record("/create-git-branch", json!({ "branch_name": branch }))?;
        let mut branches = self.branches.lock().unwrap();
        branches
            .branches
            .get_or_insert_with(Vec::new)
            .push(branch.to_string());
        branches.current_repo_branch = Some(branch.to_string());
        Ok(format!("Created and switched to branch '{branch}'"))
    }

    async fn checkout_branch(&self, _session: &Session, branch: &str) -> ApiResult<String> {
        self.record("/checkout-git-branch", json!({ "branch_name": branch }))?;
        self.branches.lock().unwrap().current_repo_branch = Some(branch.to_string());
        Ok(format!("Switched to branch '{branch}'"))
    }

    async fn merge_branch(&self, _session: &Session) -> ApiResult<String> {
        self.record("/merge-git-branch", json!({}))?;
        self.branches.lock().unwrap().current_repo_branch = Some("main".into());
        Ok("Merged into main".into())
    }

    async fn push_changes(&self, _session: &Session) -> ApiResult<String> {
        self.record("/push-git-changes", json!({}))?;
        self.status.lock().unwrap().has_unpushed_commits = false;
        Ok("Pushed".into())
    }

    async fn commit_changes(&self, _session: &Session, message: &str) -> ApiResult<String> {
        self.record("/commit-changes", json!({ "message": message }))?;
        let mut status = self.status.lock().unwrap();
        status.has_uncommitted_changes = false;
        status.has_unpushed_commits = true;
        Ok("Committed".into())
    }

    async fn suggest_branch_name(&self, _session: &Session) -> ApiResult<String> {
        self.record("/suggest-branch-name", json!({}))?;
        Ok("feature/suggested".into())
    }

    async fn set_auto_commit(&self, _session: &Session, enabled: bool) -> ApiResult<()> {
        self.record("/update-query-auto-commit", json!({ "auto_commit": enabled }))
    }
}
