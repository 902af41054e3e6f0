//! Integration test modules.

pub mod commands_test;
pub mod common;
pub mod live_db_test;
pub mod registry_test;
pub mod scenarios_test;
pub mod transcript_test;
