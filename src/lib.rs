//! dbsage - A conversational database assistant for the terminal.
//!
//! This library exposes the core modules for the binary and for
//! integration tests.

pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod persistence;
pub mod safety;
pub mod tools;
pub mod tui;
