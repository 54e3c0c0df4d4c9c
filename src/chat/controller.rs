use std::collections::HashMap;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::store::{MessageKey, MessageKind, MessageStore, ReconcileError};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    BranchingData, ChatReply, RegenerateReply, ResetReply, Role, ServerMessage,
    UpdateMessageReply,
};

/// Shown in place of a model reply when `/chat-analysis` fails.
pub const SEND_FAILED_TEXT: &str = "Error: Could not get a response.";

/// Raw-text editor state for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDraft {
    pub text: String,
    pub create_new_branch: bool,
}

/// The operation currently holding a message. At most one per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOp {
    Editing(EditDraft),
    Saving(EditDraft),
    Regenerating,
    Hiding { previous: bool },
}

impl MessageOp {
    fn name(&self) -> &'static str {
        match self {
            MessageOp::Editing(_) => "editing",
            MessageOp::Saving(_) => "saving",
            MessageOp::Regenerating => "regenerating",
            MessageOp::Hiding { .. } => "updating visibility",
        }
    }
}

// ── Tickets ─────────────────────────────────────────────────────────────
//
// A ticket is handed out when an operation starts and handed back with the
// server's answer. It carries the store epoch so results that arrive after a
// reset or reload are dropped instead of applied to the wrong path.

#[derive(Debug, Clone)]
pub struct SendTicket {
    epoch: u64,
    key: MessageKey,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ResetTicket {
    epoch: u64,
}

#[derive(Debug, Clone)]
pub struct EditTicket {
    epoch: u64,
    key: MessageKey,
    pub id: Uuid,
    pub text: String,
    pub create_new_branch: bool,
}

#[derive(Debug, Clone)]
pub struct HideTicket {
    epoch: u64,
    key: MessageKey,
    pub id: Uuid,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub struct RegenerateTicket {
    epoch: u64,
    key: MessageKey,
    pub id: Uuid,
}

#[derive(Debug, Clone)]
pub struct SwitchTicket {
    epoch: u64,
    pub target: Uuid,
}

#[derive(Debug, Clone)]
pub struct HistoryTicket {
    epoch: u64,
}

/// Owns the chat path and every in-flight operation on it.
///
/// The controller never touches the network. Each operation is split into a
/// `begin_*` step that validates, applies optimistic state and returns a
/// ticket, and a `complete_*` step that takes the server's answer and
/// reconciles. The app spawns the request in between.
#[derive(Debug, Default)]
pub struct ChatController {
    store: MessageStore,
    ops: HashMap<MessageKey, MessageOp>,
    sending: Option<MessageKey>,
    resetting: bool,
    /// History must be re-fetched; set when a result could not be placed.
    needs_reload: bool,
    /// Branch navigation info is out of date.
    needs_branching: bool,
    /// The view should jump to the newest message on next draw.
    pub scroll_to_bottom: bool,
}

impl ChatController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn op(&self, key: MessageKey) -> Option<&MessageOp> {
        self.ops.get(&key)
    }

    pub fn is_sending(&self) -> bool {
        self.sending.is_some()
    }

    pub fn is_resetting(&self) -> bool {
        self.resetting
    }

    pub fn take_needs_reload(&mut self) -> bool {
        std::mem::take(&mut self.needs_reload)
    }

    pub fn take_needs_branching(&mut self) -> bool {
        std::mem::take(&mut self.needs_branching)
    }

    fn is_current(&self, epoch: u64, what: &str) -> bool {
        if epoch == self.store.epoch() {
            return true;
        }
        debug!(what, epoch, current = self.store.epoch(), "Dropping stale result");
        false
    }

    /// Drop locks held by messages the last fork removed.
    fn prune_ops(&mut self) {
        let store = &self.store;
        self.ops.retain(|key, _| store.get(*key).is_some());
    }

    fn claim(&self, key: MessageKey) -> ApiResult<(Uuid, Role)> {
        let msg = self
            .store
            .get(key)
            .ok_or_else(|| ApiError::validation("Message no longer exists."))?;
        if let Some(op) = self.ops.get(&key) {
            return Err(ApiError::validation(format!(
                "Message is busy ({}).",
                op.name()
            )));
        }
        let id = msg
            .id
            .ok_or_else(|| ApiError::validation("Message has not been saved yet."))?;
        Ok((id, msg.role))
    }

    // ── Send ────────────────────────────────────────────────────────────

    /// Optimistically append the user's message. Whitespace-only input is
    /// rejected without touching the store.
    pub fn begin_send(&mut self, input: &str) -> ApiResult<SendTicket> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ApiError::validation("Message is empty."));
        }
        if self.sending.is_some() {
            return Err(ApiError::validation("Still waiting for the previous reply."));
        }
        let key = self.store.push_pending_user(text);
        self.sending = Some(key);
        self.scroll_to_bottom = true;
        debug!(?key, "Sending chat message");
        Ok(SendTicket {
            epoch: self.store.epoch(),
            key,
            text: text.to_string(),
        })
    }

    pub fn complete_send(&mut self, ticket: SendTicket, result: ApiResult<ChatReply>) {
        if self.sending == Some(ticket.key) {
            self.sending = None;
        }
        if !self.is_current(ticket.epoch, "send") {
            return;
        }
        match result {
            Ok(reply) => {
                if let Err(e) = self.store.confirm(ticket.key, reply.user_message.id) {
                    warn!(?e, "Optimistic message vanished before reply");
                    self.needs_reload = true;
                    return;
                }
                self.store.push_server(reply.model_message);
                self.needs_branching = true;
            }
            Err(e) => {
                error!(error = %e, "Chat request failed");
                self.store.push_local_error(SEND_FAILED_TEXT);
            }
        }
        self.scroll_to_bottom = true;
    }

    // ── Reset ───────────────────────────────────────────────────────────

    /// Clear the view at once; the server's initial history follows.
    pub fn begin_reset(&mut self) -> ResetTicket {
        self.store.clear();
        self.ops.clear();
        self.sending = None;
        self.resetting = true;
        info!("Resetting chat");
        ResetTicket {
            epoch: self.store.epoch(),
        }
    }

    pub fn complete_reset(&mut self, ticket: ResetTicket, result: ApiResult<ResetReply>) {
        if !self.is_current(ticket.epoch, "reset") {
            return;
        }
        self.resetting = false;
        match result {
            Ok(reply) => {
                self.store.replace_all(reply.initial_chat_history);
                self.needs_branching = true;
                self.scroll_to_bottom = true;
            }
            Err(e) => {
                error!(error = %e, "Chat reset failed, reloading history");
                self.needs_reload = true;
            }
        }
    }

    // ── Edit ────────────────────────────────────────────────────────────

    /// Enter edit mode, or leave it (discarding the draft) if already editing.
    pub fn toggle_edit_mode(&mut self, key: MessageKey) -> ApiResult<()> {
        if let Some(MessageOp::Editing(_)) = self.ops.get(&key) {
            self.cancel_edit(key);
            return Ok(());
        }
        self.claim(key)?;
        let original = self
            .store
            .get(key)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.ops.insert(
            key,
            MessageOp::Editing(EditDraft {
                text: original,
                create_new_branch: false,
            }),
        );
        Ok(())
    }

    /// Drop the draft. The stored message is untouched.
    pub fn cancel_edit(&mut self, key: MessageKey) {
        if let Some(MessageOp::Editing(_)) = self.ops.get(&key) {
            self.ops.remove(&key);
        }
    }

    pub fn draft_mut(&mut self, key: MessageKey) -> Option<&mut EditDraft> {
        match self.ops.get_mut(&key) {
            Some(MessageOp::Editing(draft)) => Some(draft),
            _ => None,
        }
    }

    pub fn begin_save_edit(&mut self, key: MessageKey) -> ApiResult<EditTicket> {
        let draft = match self.ops.get(&key) {
            Some(MessageOp::Editing(draft)) => draft.clone(),
            _ => return Err(ApiError::validation("Message is not being edited.")),
        };
        let id = self
            .store
            .get(key)
            .and_then(|m| m.id)
            .ok_or_else(|| ApiError::validation("Message has not been saved yet."))?;
        self.ops.insert(key, MessageOp::Saving(draft.clone()));
        Ok(EditTicket {
            epoch: self.store.epoch(),
            key,
            id,
            text: draft.text,
            create_new_branch: draft.create_new_branch,
        })
    }

    /// On failure the message goes back to editing with the draft intact.
    pub fn complete_save_edit(
        &mut self,
        ticket: EditTicket,
        result: ApiResult<UpdateMessageReply>,
    ) -> ApiResult<()> {
        if !self.is_current(ticket.epoch, "edit") {
            return Ok(());
        }
        let draft = match self.ops.remove(&ticket.key) {
            Some(MessageOp::Saving(draft)) => draft,
            _ => EditDraft {
                text: ticket.text.clone(),
                create_new_branch: ticket.create_new_branch,
            },
        };
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, id = %ticket.id, "Saving edit failed");
                if self.store.get(ticket.key).is_some() {
                    self.ops.insert(ticket.key, MessageOp::Editing(draft));
                }
                return Err(e);
            }
        };
        if reply.message.id == ticket.id {
            if let Some(entry) = self.store.get_mut(ticket.key) {
                entry.content = reply.message.content;
                entry.hidden = reply.message.hidden;
            }
        } else {
            info!(old = %ticket.id, new = %reply.message.id, "Edit forked a new branch");
            self.place_replacement(reply.parent_message_id, ticket.key, reply.message);
        }
        self.needs_branching = true;
        Ok(())
    }

    fn place_replacement(&mut self, parent: Option<Uuid>, key: MessageKey, msg: ServerMessage) {
        match self.store.fork_after(parent, key, msg) {
            Ok(_) => self.prune_ops(),
            Err(ReconcileError::UnknownParent(parent)) => {
                warn!(%parent, "Parent not on the active path, reloading history");
                self.needs_reload = true;
            }
            Err(ReconcileError::UnknownMessage(key)) => {
                warn!(?key, "Replaced message vanished, reloading history");
                self.needs_reload = true;
            }
        }
    }

    // ── Hide ────────────────────────────────────────────────────────────

    pub fn begin_toggle_hidden(&mut self, key: MessageKey) -> ApiResult<HideTicket> {
        let (id, _) = self.claim(key)?;
        let entry = self
            .store
            .get_mut(key)
            .ok_or_else(|| ApiError::validation("Message no longer exists."))?;
        let previous = entry.hidden;
        entry.hidden = !previous;
        self.ops.insert(key, MessageOp::Hiding { previous });
        Ok(HideTicket {
            epoch: self.store.epoch(),
            key,
            id,
            hidden: !previous,
        })
    }

    /// Failure reverts the flag.
    pub fn complete_toggle_hidden(
        &mut self,
        ticket: HideTicket,
        result: ApiResult<()>,
    ) -> ApiResult<()> {
        if !self.is_current(ticket.epoch, "hide") {
            return Ok(());
        }
        let previous = match self.ops.remove(&ticket.key) {
            Some(MessageOp::Hiding { previous }) => previous,
            _ => !ticket.hidden,
        };
        if let Err(e) = result {
            error!(error = %e, id = %ticket.id, "Updating visibility failed");
            if let Some(entry) = self.store.get_mut(ticket.key) {
                entry.hidden = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    // ── Regenerate ──────────────────────────────────────────────────────

    /// Only saved model messages can be regenerated. Content is left alone
    /// until the replacement arrives; the view shows a placeholder meanwhile.
    pub fn begin_regenerate(&mut self, key: MessageKey) -> ApiResult<RegenerateTicket> {
        let (id, role) = self.claim(key)?;
        if role != Role::Model {
            return Err(ApiError::validation("Only model messages can be regenerated."));
        }
        self.ops.insert(key, MessageOp::Regenerating);
        Ok(RegenerateTicket {
            epoch: self.store.epoch(),
            key,
            id,
        })
    }

    pub fn complete_regenerate(
        &mut self,
        ticket: RegenerateTicket,
        result: ApiResult<RegenerateReply>,
    ) -> ApiResult<()> {
        if !self.is_current(ticket.epoch, "regenerate") {
            return Ok(());
        }
        self.ops.remove(&ticket.key);
        match result {
            Ok(reply) => {
                self.place_replacement(
                    Some(reply.user_message_id),
                    ticket.key,
                    reply.new_model_message,
                );
                self.needs_branching = true;
                self.scroll_to_bottom = true;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, id = %ticket.id, "Regenerate failed");
                Err(e)
            }
        }
    }

    // ── Branch navigation & reload ──────────────────────────────────────

    /// Move the current node to the sibling `delta` steps away.
    pub fn begin_switch_sibling(
        &mut self,
        key: MessageKey,
        delta: isize,
    ) -> ApiResult<SwitchTicket> {
        if self.ops.contains_key(&key) {
            return Err(ApiError::validation("Message is busy."));
        }
        let target = self
            .store
            .sibling(key, delta)
            .ok_or_else(|| ApiError::validation("No branch in that direction."))?;
        Ok(SwitchTicket {
            epoch: self.store.epoch(),
            target,
        })
    }

    pub fn complete_switch_sibling(
        &mut self,
        ticket: SwitchTicket,
        result: ApiResult<()>,
    ) -> ApiResult<()> {
        if !self.is_current(ticket.epoch, "switch") {
            return Ok(());
        }
        result.inspect_err(|e| error!(error = %e, target = %ticket.target, "Switching branch failed"))?;
        self.needs_reload = true;
        Ok(())
    }

    pub fn begin_reload(&mut self) -> HistoryTicket {
        self.needs_reload = false;
        HistoryTicket {
            epoch: self.store.epoch(),
        }
    }

    pub fn complete_reload(
        &mut self,
        ticket: HistoryTicket,
        result: ApiResult<Vec<ServerMessage>>,
    ) -> ApiResult<()> {
        if !self.is_current(ticket.epoch, "history") {
            return Ok(());
        }
        let history = result.inspect_err(|e| error!(error = %e, "Loading history failed"))?;
        self.ops.clear();
        self.sending = None;
        self.resetting = false;
        self.store.replace_all(history);
        self.needs_branching = true;
        self.scroll_to_bottom = true;
        Ok(())
    }

    pub fn apply_branching(&mut self, result: ApiResult<BranchingData>) {
        match result {
            Ok(data) => self.store.set_branching(data),
            Err(e) => warn!(error = %e, "Could not load branching data"),
        }
    }

    /// Client-side error notices carry no actions.
    pub fn is_local_error(&self, key: MessageKey) -> bool {
        self.store
            .get(key)
            .is_some_and(|m| m.kind == MessageKind::LocalError)
    }
}

/// Label of the hide/show action for a message.
pub fn hide_label(hidden: bool) -> &'static str {
    if hidden {
        "Show"
    } else {
        "Hide"
    }
}
