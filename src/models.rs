use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the chat a client is attached to: one project, one saved query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub project: String,
    pub query_id: String,
    /// The query text the analysis was started with.
    pub query_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    /// Bookkeeping entries the backend stores in history (e.g. `git-flag`).
    #[serde(other)]
    Other,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Model => "Model",
            Role::Other => "System",
        }
    }
}

/// A chat node as the backend serializes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// The echo of the user's message in a chat reply; only the id is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRef {
    pub id: Uuid,
    #[serde(default)]
    pub content: String,
}

// ── Chat endpoints ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub success: bool,
    pub user_message: MessageRef,
    pub model_message: ServerMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub initial_chat_history: Vec<ServerMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMessageReply {
    #[serde(default)]
    pub success: bool,
    pub message: ServerMessage,
    #[serde(default)]
    pub parent_message_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegenerateReply {
    #[serde(default)]
    pub success: bool,
    pub new_model_message: ServerMessage,
    pub user_message_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryReply {
    #[serde(default)]
    pub history: Vec<ServerMessage>,
}

/// Sibling information for one parent whose children fork the history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BranchDisplay {
    pub current_index: usize,
    pub total_siblings: usize,
    pub sibling_ids: Vec<Uuid>,
}

/// Keyed by the parent message id.
pub type BranchingData = HashMap<Uuid, BranchDisplay>;

// ── Generic `{success, message}` bodies ─────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionReply {
    /// Best description of what went wrong, for `success: false` bodies.
    pub fn failure_text(&self) -> String {
        match &self.error {
            Some(err) if !err.is_empty() => err.clone(),
            _ if !self.message.is_empty() => self.message.clone(),
            _ => "Unknown error".to_string(),
        }
    }
}

// ── Git endpoints ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct GitStatusReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub has_uncommitted_changes: bool,
    #[serde(default)]
    pub has_unpushed_commits: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchesReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub branches: Option<Vec<String>>,
    #[serde(default)]
    pub current_repo_branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestBranchReply {
    #[serde(default)]
    pub branch_name: String,
}

// ── Prompt helpers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptimizeReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub optimized_prompt: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Options for `/optimize-prompt`.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeRequest {
    pub original_prompt: String,
    pub optimization_direction: String,
    pub include_chat_history: bool,
    pub include_context_files: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_maps_to_other() {
        let msg: ServerMessage = serde_json::from_value(serde_json::json!({
            "id": "6f1c1b8e-8f5e-4b1e-9a57-0d8f3f1e2a11",
            "role": "git-flag",
            "content": "abc123",
        }))
        .unwrap();
        assert_eq!(msg.role, Role::Other);
        assert!(!msg.hidden);
        assert_eq!(msg.parent_id, None);
    }

    #[test]
    fn test_branching_data_keyed_by_parent() {
        let parent = "6f1c1b8e-8f5e-4b1e-9a57-0d8f3f1e2a11";
        let data: BranchingData = serde_json::from_value(serde_json::json!({
            parent: {
                "current_index": 1,
                "total_siblings": 2,
                "sibling_ids": [
                    "0b7d4d54-65c4-4f8e-8d0e-1c9f3b7c8a01",
                    "0b7d4d54-65c4-4f8e-8d0e-1c9f3b7c8a02"
                ]
            }
        }))
        .unwrap();
        let entry = &data[&parent.parse::<Uuid>().unwrap()];
        assert_eq!(entry.current_index, 1);
        assert_eq!(entry.sibling_ids.len(), 2);
    }

    #[test]
    fn test_action_reply_failure_text() {
        let reply = ActionReply {
            success: false,
            message: "Push rejected".into(),
            error: None,
        };
        assert_eq!(reply.failure_text(), "Push rejected");

        let reply = ActionReply {
            success: false,
            message: String::new(),
            error: Some("no remote".into()),
        };
        assert_eq!(reply.failure_text(), "no remote");
    }
}
