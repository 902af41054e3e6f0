//! TUI widgets for dbsage.

pub mod chat;
pub mod confirm;
pub mod header;
pub mod input;
