//! Suspension of a turn while the user approves or declines a tool call.

use super::{TurnId, TurnUpdate};
use crate::db::DatabaseBackend;
use crate::error::{DbSageError, Result};
use crate::llm::ToolCall;
use crate::tools::{RiskLevel, ToolCatalog};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A tool call waiting for the user's decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    pub turn: TurnId,
    /// Transcript length when the turn was suspended; the assistant message
    /// carrying `call` is the last entry.
    pub transcript_len: usize,
    pub call: ToolCall,
    /// Parsed arguments of `call`.
    pub arguments: Value,
    pub risk: RiskLevel,
    pub prompt: String,
}

/// Holds at most one [`PendingConfirmation`].
///
/// The orchestrator owns the mediator; the decision comes back through
/// `Orchestrator::resume`.
pub struct ConfirmationMediator {
    catalog: Arc<ToolCatalog>,
    pending: Option<PendingConfirmation>,
}

impl ConfirmationMediator {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self {
            catalog,
            pending: None,
        }
    }

    /// Describes the call, stores it and returns the update the UI should
    /// show. Fails with `Busy` if a confirmation is already pending.
    pub fn request(
        &mut self,
        turn: TurnId,
        transcript_len: usize,
        call: ToolCall,
        arguments: Value,
        backend: Option<DatabaseBackend>,
    ) -> Result<TurnUpdate> {
        if let Some(existing) = &self.pending {
            return Err(DbSageError::busy(format!(
                "A confirmation for {} is already pending",
                existing.call.name()
            )));
        }

        let risk = self.catalog.risk(call.name()).unwrap_or(RiskLevel::High);
        let prompt = self.catalog.describe(call.name(), &arguments, backend);
        let update = TurnUpdate::ConfirmationRequested {
            tool: call.name().to_string(),
            risk,
            prompt: prompt.clone(),
        };

        debug!(turn = %turn, tool = call.name(), "Awaiting confirmation");
        self.pending = Some(PendingConfirmation {
            turn,
            transcript_len,
            call,
            arguments,
            risk,
            prompt,
        });
        Ok(update)
    }

    /// Removes and returns the pending confirmation.
    pub fn take(&mut self) -> Option<PendingConfirmation> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    /// Drops the pending confirmation, if any.
    pub fn discard(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
