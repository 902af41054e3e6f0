//! Command parsing and dispatch for dbsage.
//!
//! Parsing is kept separate from execution so routing can be tested
//! without a registry.

pub mod handlers;
pub mod help;
pub mod router;
pub mod tokenizer;

pub use handlers::{execute, CommandContext, CommandResult};
pub use help::{GuidanceState, HELP_TEXT};
pub use router::{AddArgs, Command, CommandRouter};
