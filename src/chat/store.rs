use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{BranchDisplay, BranchingData, Role, ServerMessage};

/// Client-local handle for a message. Stable for the message's lifetime in
/// the store, and available before the server has assigned an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Known to the server.
    Persisted,
    /// Sent optimistically, waiting for the server to assign an id.
    Pending,
    /// Client-side error notice shown in place of a reply; never sent.
    LocalError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub key: MessageKey,
    pub id: Option<Uuid>,
    pub role: Role,
    /// Raw markdown as the server stores it.
    pub content: String,
    pub hidden: bool,
    pub parent_id: Option<Uuid>,
    pub kind: MessageKind,
}

/// Why a server result could not be placed on the active path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    UnknownParent(Uuid),
    UnknownMessage(MessageKey),
}

/// The active path of the chat tree, root first.
///
/// Every view of the chat is drawn from this store. Operations that change
/// the path's shape (branch-on-edit, regenerate) cut the path at the replaced
/// node and append its replacement, which is exactly the server's new path
/// because the replacement becomes the current node.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<ChatMessage>,
    next_key: u64,
    /// Bumped whenever the whole path is replaced; results computed against
    /// an older epoch are stale.
    epoch: u64,
    /// Bumped on every mutation; render caches key off it.
    revision: u64,
    branching: BranchingData,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    pub fn at(&self, index: usize) -> Option<&ChatMessage> {
        self.entries.get(index)
    }

    pub fn get(&self, key: MessageKey) -> Option<&ChatMessage> {
        self.entries.iter().find(|m| m.key == key)
    }

    pub fn get_mut(&mut self, key: MessageKey) -> Option<&mut ChatMessage> {
        self.revision += 1;
        self.entries.iter_mut().find(|m| m.key == key)
    }

    pub fn position(&self, key: MessageKey) -> Option<usize> {
        self.entries.iter().position(|m| m.key == key)
    }

    fn position_of_id(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|m| m.id == Some(id))
    }

    fn alloc_key(&mut self) -> MessageKey {
        self.next_key += 1;
        MessageKey(self.next_key)
    }

    fn push(&mut self, message: ChatMessage) -> MessageKey {
        let key = message.key;
        self.entries.push(message);
        self.revision += 1;
        key
    }

    fn from_server(&mut self, msg: ServerMessage) -> ChatMessage {
        ChatMessage {
            key: self.alloc_key(),
            id: Some(msg.id),
            role: msg.role,
            content: msg.content,
            hidden: msg.hidden,
            parent_id: msg.parent_id,
            kind: MessageKind::Persisted,
        }
    }

    /// Replace the whole path, e.g. after a history fetch or reset.
    pub fn replace_all(&mut self, history: Vec<ServerMessage>) {
        self.entries.clear();
        self.epoch += 1;
        self.revision += 1;
        for msg in history {
            let entry = self.from_server(msg);
            self.entries.push(entry);
        }
        debug!(count = self.entries.len(), epoch = self.epoch, "Chat path replaced");
    }

    /// Drop every message. Counts as a path replacement.
    pub fn clear(&mut self) {
        self.replace_all(Vec::new());
    }

    /// Optimistic user message, parented to the current tail.
    pub fn push_pending_user(&mut self, content: &str) -> MessageKey {
        let parent_id = self.entries.iter().rev().find_map(|m| m.id);
        let key = self.alloc_key();
        self.push(ChatMessage {
            key,
            id: None,
            role: Role::User,
            content: content.to_string(),
            hidden: false,
            parent_id,
            kind: MessageKind::Pending,
        })
    }

    pub fn push_server(&mut self, msg: ServerMessage) -> MessageKey {
        let entry = self.from_server(msg);
        self.push(entry)
    }

    pub fn push_local_error(&mut self, text: &str) -> MessageKey {
        let key = self.alloc_key();
        self.push(ChatMessage {
            key,
            id: None,
            role: Role::Model,
            content: text.to_string(),
            hidden: false,
            parent_id: None,
            kind: MessageKind::LocalError,
        })
    }

    /// Give an optimistic message the id the server assigned to it.
    pub fn confirm(&mut self, key: MessageKey, id: Uuid) -> Result<(), ReconcileError> {
        let entry = self
            .get_mut(key)
            .ok_or(ReconcileError::UnknownMessage(key))?;
        entry.id = Some(id);
        entry.kind = MessageKind::Persisted;
        Ok(())
    }

    /// Replace `replaced` (and everything after it) with `msg`, placed
    /// directly after the message with id `parent`. A `None` parent makes
    /// `msg` the new root.
    pub fn fork_after(
        &mut self,
        parent: Option<Uuid>,
        replaced: MessageKey,
        msg: ServerMessage,
    ) -> Result<MessageKey, ReconcileError> {
        let replaced_pos = self
            .position(replaced)
            .ok_or(ReconcileError::UnknownMessage(replaced))?;
        let cut = match parent {
            Some(parent_id) => {
                let parent_pos = self
                    .position_of_id(parent_id)
                    .ok_or(ReconcileError::UnknownParent(parent_id))?;
                if parent_pos >= replaced_pos {
                    warn!(%parent_id, "Parent sits after the replaced message");
                    return Err(ReconcileError::UnknownParent(parent_id));
                }
                parent_pos + 1
            }
            None => 0,
        };
        self.entries.truncate(cut);
        let entry = self.from_server(msg);
        Ok(self.push(entry))
    }

    pub fn set_branching(&mut self, data: BranchingData) {
        self.branching = data;
        self.revision += 1;
    }

    /// Sibling navigation info for a message whose parent forks.
    pub fn branch_for(&self, key: MessageKey) -> Option<&BranchDisplay> {
        let parent = self.get(key)?.parent_id?;
        self.branching.get(&parent)
    }

    /// The sibling `delta` steps away from `key` in its parent's fork, if any.
    pub fn sibling(&self, key: MessageKey, delta: isize) -> Option<Uuid> {
        let branch = self.branch_for(key)?;
        let target = branch.current_index as isize + delta;
        if target < 0 {
            return None;
        }
        branch.sibling_ids.get(target as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u128, role: Role, content: &str, parent: Option<u128>) -> ServerMessage {
        ServerMessage {
            id: Uuid::from_u128(id),
            role,
            content: content.into(),
            hidden: false,
            parent_id: parent.map(Uuid::from_u128),
        }
    }

    fn three_turns() -> MessageStore {
        let mut store = MessageStore::new();
        store.replace_all(vec![
            msg(1, Role::User, "q1", None),
            msg(2, Role::Model, "a1", Some(1)),
            msg(3, Role::User, "q2", Some(2)),
            msg(4, Role::Model, "a2", Some(3)),
        ]);
        store
    }

    fn contents(store: &MessageStore) -> Vec<&str> {
        store.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_pending_user_parents_to_tail() {
        let mut store = three_turns();
        let key = store.push_pending_user("q3");
        let entry = store.get(key).unwrap();
        assert_eq!(entry.kind, MessageKind::Pending);
        assert_eq!(entry.id, None);
        assert_eq!(entry.parent_id, Some(Uuid::from_u128(4)));

        store.confirm(key, Uuid::from_u128(5)).unwrap();
        let entry = store.get(key).unwrap();
        assert_eq!(entry.kind, MessageKind::Persisted);
        assert_eq!(store.position_of_id(Uuid::from_u128(5)), store.position(key));
    }

    #[test]
    fn test_fork_after_cuts_replaced_subtree() {
        let mut store = three_turns();
        let old_answer = store.at(1).unwrap().key;
        store
            .fork_after(Some(Uuid::from_u128(1)), old_answer, msg(9, Role::Model, "a1'", Some(1)))
            .unwrap();
        assert_eq!(contents(&store), vec!["q1", "a1'"]);
    }

    #[test]
    fn test_fork_after_root_replaces_everything() {
        let mut store = three_turns();
        let first = store.at(0).unwrap().key;
        store
            .fork_after(None, first, msg(7, Role::User, "q1 edited", None))
            .unwrap();
        assert_eq!(contents(&store), vec!["q1 edited"]);
    }

    #[test]
    fn test_fork_after_unknown_parent_leaves_store_alone() {
        let mut store = three_turns();
        let last = store.at(3).unwrap().key;
        let err = store
            .fork_after(Some(Uuid::from_u128(42)), last, msg(9, Role::Model, "x", Some(42)))
            .unwrap_err();
        assert_eq!(err, ReconcileError::UnknownParent(Uuid::from_u128(42)));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_replace_all_bumps_epoch() {
        let mut store = three_turns();
        let epoch = store.epoch();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.epoch(), epoch + 1);
    }

    #[test]
    fn test_sibling_navigation_bounds() {
        let mut store = three_turns();
        let answer = store.at(1).unwrap().key;
        let mut data = BranchingData::new();
        data.insert(
            Uuid::from_u128(1),
            BranchDisplay {
                current_index: 0,
                total_siblings: 2,
                sibling_ids: vec![Uuid::from_u128(2), Uuid::from_u128(8)],
            },
        );
        store.set_branching(data);

        assert_eq!(store.branch_for(answer).unwrap().total_siblings, 2);
        assert_eq!(store.sibling(answer, 1), Some(Uuid::from_u128(8)));
        assert_eq!(store.sibling(answer, -1), None);
        assert_eq!(store.sibling(answer, 2), None);
        // First message has no parent, so no fork to navigate.
        assert!(store.branch_for(store.at(0).unwrap().key).is_none());
    }
}
