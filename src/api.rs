use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    ActionReply, BranchesReply, BranchingData, ChatReply, GitStatusReply, HistoryReply,
    OptimizeReply, OptimizeRequest, RegenerateReply, ResetReply, SearchReply, ServerMessage,
    Session, SuggestBranchReply, UpdateMessageReply,
};

/// Everything the client asks of the analysis backend.
///
/// `ApiClient` is the HTTP implementation; controllers are generic over this
/// trait so they can be driven by an in-memory backend in tests.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    // ── Chat ────────────────────────────────────────────────────────
    async fn chat(&self, session: &Session, message: &str) -> ApiResult<ChatReply>;
    async fn reset_chat(&self, session: &Session) -> ApiResult<ResetReply>;
    async fn update_message(
        &self,
        session: &Session,
        message_id: Uuid,
        content: &str,
        create_new_branch: bool,
    ) -> ApiResult<UpdateMessageReply>;
    async fn set_message_hidden(
        &self,
        session: &Session,
        message_id: Uuid,
        hidden: bool,
    ) -> ApiResult<()>;
    async fn regenerate_message(
        &self,
        session: &Session,
        message_id: Uuid,
    ) -> ApiResult<RegenerateReply>;
    async fn fetch_history(&self, session: &Session) -> ApiResult<Vec<ServerMessage>>;
    async fn fetch_branching(&self, session: &Session) -> ApiResult<BranchingData>;
    async fn set_current_node(&self, session: &Session, node_id: Uuid) -> ApiResult<()>;

    // ── Context ─────────────────────────────────────────────────────
    async fn update_context(&self, session: &Session, files: &[String]) -> ApiResult<()>;
    async fn set_yaml_override(
        &self,
        session: &Session,
        file_path: &str,
        use_yaml: bool,
    ) -> ApiResult<()>;
    async fn search_related_files(&self, session: &Session, query: &str) -> ApiResult<String>;
    async fn update_query(&self, session: &Session, query: &str) -> ApiResult<()>;
    async fn optimize_prompt(
        &self,
        session: &Session,
        request: &OptimizeRequest,
    ) -> ApiResult<String>;
    async fn apply_code_to_file(
        &self,
        session: &Session,
        file_path: &str,
        content: &str,
    ) -> ApiResult<()>;

    // ── Git ─────────────────────────────────────────────────────────
    async fn git_status(&self, session: &Session) -> ApiResult<GitStatusReply>;
    async fn git_branches(&self, session: &Session) -> ApiResult<BranchesReply>;
    async fn create_branch(&self, session: &Session, branch: &str) -> ApiResult<String>;
    async fn checkout_branch(&self, session: &Session, branch: &str) -> ApiResult<String>;
    async fn merge_branch(&self, session: &Session) -> ApiResult<String>;
    async fn push_changes(&self, session: &Session) -> ApiResult<String>;
    async fn commit_changes(&self, session: &Session, message: &str) -> ApiResult<String>;
    async fn suggest_branch_name(&self, session: &Session) -> ApiResult<String>;
    async fn set_auto_commit(&self, session: &Session, enabled: bool) -> ApiResult<()>;
}

/// HTTP client for the analysis backend's REST API.
#[derive(Clone)]
pub struct ApiClient {
    /// Underlying HTTP client.
    client: Client,
    /// Server root, without a trailing slash.
    base_url: String,
}

impl ApiClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and decode the JSON answer.
    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: Value,
    ) -> ApiResult<T> {
        let url = self.url(endpoint);
        debug!(url, "POST");
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|source| ApiError::Transport { endpoint, source })?;
        decode(endpoint, check_status(endpoint, response).await?).await
    }

    /// POST a JSON body where any 2xx answer counts as success.
    async fn post_unit(&self, endpoint: &'static str, body: Value) -> ApiResult<()> {
        let url = self.url(endpoint);
        debug!(url, "POST");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ApiError::Transport { endpoint, source })?;
        check_status(endpoint, response).await?;
        Ok(())
    }

    /// POST to a git/context endpoint answering `{success, message}`.
    async fn post_action(&self, endpoint: &'static str, body: Value) -> ApiResult<String> {
        let reply: ActionReply = self.post_json(endpoint, body).await?;
        if !reply.success {
            return Err(ApiError::Application {
                endpoint,
                message: reply.failure_text(),
            });
        }
        Ok(reply.message)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: String,
        query: &[(&str, &str)],
    ) -> ApiResult<T> {
        debug!(url, "GET");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|source| ApiError::Transport { endpoint, source })?;
        decode(endpoint, check_status(endpoint, response).await?).await
    }

    /// `/{project}/{query_id}/chat_history`, with both segments escaped.
    fn history_url(&self, session: &Session) -> ApiResult<String> {
        let mut url = url::Url::parse(&self.base_url).map_err(|e| ApiError::Decode {
            endpoint: "chat_history",
            detail: format!("invalid base url: {e}"),
        })?;
        url.path_segments_mut()
            .map_err(|_| ApiError::validation("Server URL cannot carry a path"))?
            .pop_if_empty()
            .extend([
                session.project.as_str(),
                session.query_id.as_str(),
                "chat_history",
            ]);
        Ok(url.to_string())
    }
}

/// Turn a non-2xx response into `ApiError::Status`, pulling the server's
/// explanation out of a JSON `{message}` / `{error}` body when there is one.
async fn check_status(endpoint: &'static str, response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = match serde_json::from_str::<ActionReply>(&text) {
        Ok(reply) if !reply.message.is_empty() || reply.error.is_some() => reply.failure_text(),
        _ => text,
    };
    warn!(endpoint, status = status.as_u16(), body, "Backend returned error status");
    Err(ApiError::Status {
        endpoint,
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(endpoint: &'static str, response: Response) -> ApiResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|source| ApiError::Transport { endpoint, source })?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
        endpoint,
        detail: e.to_string(),
    })
}

/// Reject `success: false` bodies that still came back with a 2xx status.
fn require_success(endpoint: &'static str, success: bool) -> ApiResult<()> {
    if success {
        Ok(())
    } else {
        Err(ApiError::Application {
            endpoint,
            message: "The server could not complete the request.".to_string(),
        })
    }
}

#[async_trait]
impl AnalysisBackend for ApiClient {
    async fn chat(&self, session: &Session, message: &str) -> ApiResult<ChatReply> {
        let reply: ChatReply = self
            .post_json(
                "/chat-analysis",
                json!({
                    "project": session.project,
                    "message": message,
                    "query_id": session.query_id,
                }),
            )
            .await?;
        require_success("/chat-analysis", reply.success)?;
        Ok(reply)
    }

    async fn reset_chat(&self, session: &Session) -> ApiResult<ResetReply> {
        let reply: ResetReply = self
            .post_json(
                "/reset-analysis-chat",
                json!({ "project": session.project, "query_id": session.query_id }),
            )
            .await?;
        require_success("/reset-analysis-chat", reply.success)?;
        Ok(reply)
    }

    async fn update_message(
        &self,
        session: &Session,
        message_id: Uuid,
        content: &str,
        create_new_branch: bool,
    ) -> ApiResult<UpdateMessageReply> {
        let reply: UpdateMessageReply = self
            .post_json(
                "/update-chat-message",
                json!({
                    "project": session.project,
                    "content": content,
                    "message_id": message_id,
                    "query_id": session.query_id,
                    "create_new_branch": create_new_branch,
                }),
            )
            .await?;
        require_success("/update-chat-message", reply.success)?;
        Ok(reply)
    }

    async fn set_message_hidden(
        &self,
        session: &Session,
        message_id: Uuid,
        hidden: bool,
    ) -> ApiResult<()> {
        self.post_unit(
            "/update-message-visibility",
            json!({
                "project": session.project,
                "message_id": message_id,
                "query_id": session.query_id,
                "hidden": hidden,
            }),
        )
        .await
    }

    async fn regenerate_message(
        &self,
        session: &Session,
        message_id: Uuid,
    ) -> ApiResult<RegenerateReply> {
        let reply: RegenerateReply = self
            .post_json(
                "/regenerate-chat-message",
                json!({
                    "project": session.project,
                    "query_id": session.query_id,
                    "message_id": message_id,
                }),
            )
            .await?;
        require_success("/regenerate-chat-message", reply.success)?;
        Ok(reply)
    }

    async fn fetch_history(&self, session: &Session) -> ApiResult<Vec<ServerMessage>> {
        let url = self.history_url(session)?;
        let reply: HistoryReply = self.get_json("chat_history", url, &[]).await?;
        Ok(reply.history)
    }

    async fn fetch_branching(&self, session: &Session) -> ApiResult<BranchingData> {
        self.get_json(
            "/get-branching-data",
            self.url("/get-branching-data"),
            &[
                ("project_name", session.project.as_str()),
                ("query_id", session.query_id.as_str()),
            ],
        )
        .await
    }

    async fn set_current_node(&self, session: &Session, node_id: Uuid) -> ApiResult<()> {
        self.post_unit(
            "/set-current-chat-node",
            json!({
                "project_name": session.project,
                "query_id": session.query_id,
                "new_current_node_id": node_id,
            }),
        )
        .await
    }

    async fn update_context(&self, session: &Session, files: &[String]) -> ApiResult<()> {
        let reply: ActionReply = self
            .post_json(
                "/update-analysis-context",
                json!({
                    "project": session.project,
                    "query": session.query_text,
                    "files": files,
                    "query_id": session.query_id,
                }),
            )
            .await?;
        if !reply.success {
            return Err(ApiError::Application {
                endpoint: "/update-analysis-context",
                message: reply.failure_text(),
            });
        }
        Ok(())
    }

    async fn set_yaml_override(
        &self,
        session: &Session,
        file_path: &str,
        use_yaml: bool,
    ) -> ApiResult<()> {
        let result: Value = self
            .post_json(
                "/update-file-yaml-override",
                json!({
                    "project": session.project,
                    "file_path": file_path,
                    "use_yaml": use_yaml,
                }),
            )
            .await?;
        debug!(file_path, use_yaml, %result, "YAML override updated");
        Ok(())
    }

    async fn search_related_files(&self, session: &Session, query: &str) -> ApiResult<String> {
        let reply: SearchReply = self
            .post_json(
                "/search-related-files",
                json!({ "project": session.project, "query": query }),
            )
            .await?;
        if !reply.success {
            return Err(ApiError::Application {
                endpoint: "/search-related-files",
                message: reply.error.unwrap_or_else(|| "Search failed".to_string()),
            });
        }
        Ok(reply.html)
    }

    async fn update_query(&self, session: &Session, query: &str) -> ApiResult<()> {
        self.post_unit(
            "/update-analysis-query",
            json!({ "project": session.project, "query": query }),
        )
        .await
    }

    async fn optimize_prompt(
        &self,
        session: &Session,
        request: &OptimizeRequest,
    ) -> ApiResult<String> {
        let reply: OptimizeReply = self
            .post_json(
                "/optimize-prompt",
                json!({
                    "project": session.project,
                    "query_id": session.query_id,
                    "original_prompt": request.original_prompt,
                    "optimization_direction": request.optimization_direction,
                    "include_chat_history": request.include_chat_history,
                    "include_context_files": request.include_context_files,
                }),
            )
            .await?;
        if !reply.success {
            return Err(ApiError::Application {
                endpoint: "/optimize-prompt",
                message: reply
                    .error
                    .unwrap_or_else(|| "Prompt optimization failed".to_string()),
            });
        }
        Ok(reply.optimized_prompt)
    }

    async fn apply_code_to_file(
        &self,
        session: &Session,
        file_path: &str,
        content: &str,
    ) -> ApiResult<()> {
        self.post_unit(
            "/apply-code-to-file",
            json!({
                "project": session.project,
                "file_path": file_path,
                "content": content,
            }),
        )
        .await
    }

    async fn git_status(&self, session: &Session) -> ApiResult<GitStatusReply> {
        let reply: GitStatusReply = self
            .get_json(
                "/git-status",
                self.url("/git-status"),
                &[("project_name", session.project.as_str())],
            )
            .await?;
        require_success("/git-status", reply.success)?;
        Ok(reply)
    }

    async fn git_branches(&self, session: &Session) -> ApiResult<BranchesReply> {
        let reply: BranchesReply = self
            .get_json(
                "/git-branches",
                self.url("/git-branches"),
                &[("project_name", session.project.as_str())],
            )
            .await?;
        if !reply.success || reply.branches.is_none() {
            return Err(ApiError::Application {
                endpoint: "/git-branches",
                message: if reply.message.is_empty() {
                    "Failed to refresh branch list.".to_string()
                } else {
                    reply.message
                },
            });
        }
        Ok(reply)
    }

    async fn create_branch(&self, session: &Session, branch: &str) -> ApiResult<String> {
        self.post_action(
            "/create-git-branch",
            json!({ "project_name": session.project, "branch_name": branch }),
        )
        .await
    }

    async fn checkout_branch(&self, session: &Session, branch: &str) -> ApiResult<String> {
        self.post_action(
            "/checkout-git-branch",
            json!({ "project_name": session.project, "branch_name": branch }),
        )
        .await
    }

    async fn merge_branch(&self, session: &Session) -> ApiResult<String> {
        self.post_action("/merge-git-branch", json!({ "project_name": session.project }))
            .await
    }

    async fn push_changes(&self, session: &Session) -> ApiResult<String> {
        self.post_action("/push-git-changes", json!({ "project_name": session.project }))
            .await
    }

    async fn commit_changes(&self, session: &Session, message: &str) -> ApiResult<String> {
        self.post_action(
            "/commit-changes",
            json!({ "project_name": session.project, "message": message }),
        )
        .await
    }

    async fn suggest_branch_name(&self, session: &Session) -> ApiResult<String> {
        let reply: SuggestBranchReply = self
            .post_json(
                "/suggest-branch-name",
                json!({ "project_name": session.project, "query_id": session.query_id }),
            )
            .await?;
        Ok(reply.branch_name.trim().to_string())
    }

    async fn set_auto_commit(&self, session: &Session, enabled: bool) -> ApiResult<()> {
        self.post_action(
            "/update-query-auto-commit",
            json!({
                "project_name": session.project,
                "query_id": session.query_id,
                "auto_commit": enabled,
            }),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> Session {
        Session {
            project: "demo".into(),
            query_id: "q1".into(),
            query_text: "where is the parser".into(),
        }
    }

    async fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_chat_posts_id_based_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat-analysis"))
            .and(body_partial_json(json!({
                "project": "demo",
                "message": "hello",
                "query_id": "q1",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "user_message": { "id": "0b7d4d54-65c4-4f8e-8d0e-1c9f3b7c8a01", "content": "hello" },
                "model_message": {
                    "id": "0b7d4d54-65c4-4f8e-8d0e-1c9f3b7c8a02",
                    "role": "model",
                    "content": "hi there",
                    "hidden": false,
                    "parent_id": "0b7d4d54-65c4-4f8e-8d0e-1c9f3b7c8a01"
                },
                "new_current_node_id": "0b7d4d54-65c4-4f8e-8d0e-1c9f3b7c8a02"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let reply = client.chat(&session(), "hello").await.unwrap();
        assert_eq!(reply.model_message.content, "hi there");
        assert_eq!(
            reply.model_message.parent_id,
            Some(reply.user_message.id)
        );
    }

    #[tokio::test]
    async fn test_success_false_is_application_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/update-analysis-context"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": false, "error": "query not found" })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .update_context(&session(), &["src/lib.rs".to_string()])
            .await
            .unwrap_err();
        match err {
            ApiError::Application { message, .. } => assert_eq!(message, "query not found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_merge_conflict_keeps_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/merge-git-branch"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "success": false,
                "message": "Merge failed due to conflicts."
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.merge_branch(&session()).await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.user_message(), "Merge failed due to conflicts.");
    }

    #[tokio::test]
    async fn test_git_status_uses_project_query_param() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/git-status"))
            .and(query_param("project_name", "demo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "ok",
                "has_uncommitted_changes": true,
                "has_unpushed_commits": false
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let status = client.git_status(&session()).await.unwrap();
        assert!(status.has_uncommitted_changes);
        assert!(!status.has_unpushed_commits);
    }

    #[tokio::test]
    async fn test_history_path_is_escaped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/my%20proj/q1/chat_history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "history": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let mut s = session();
        s.project = "my proj".into();
        let history = client.fetch_history(&s).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_visibility_accepts_empty_ok_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/update-message-visibility"))
            .and(body_partial_json(json!({ "hidden": true })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .set_message_hidden(&session(), Uuid::new_v4(), true)
            .await
            .unwrap();
    }
}
