//! Chat view state: the active message path and the operations on it.

mod controller;
mod store;

pub use controller::{
    hide_label, ChatController, EditDraft, EditTicket, HideTicket, HistoryTicket, MessageOp,
    RegenerateTicket, ResetTicket, SendTicket, SwitchTicket, SEND_FAILED_TEXT,
};
pub use store::{ChatMessage, MessageKey, MessageKind, MessageStore};
