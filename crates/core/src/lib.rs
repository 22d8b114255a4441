//! Jarvis core: the local actions a realtime voice model may invoke and the
//! tool schema that advertises them. Contains no networking.

pub mod actions;
pub mod tools;

pub use actions::{ActionError, ActionExecutor, ActionKind, ActionReceipt, Launcher};
