//! Terminal User Interface for dbsage.
//!
//! Provides the main TUI application loop using ratatui and crossterm. The
//! loop owns the orchestrator and is the only place the conversation is
//! mutated; background steps report back through its event channel.

pub mod app;
mod events;
mod ui;
pub mod widgets;

pub use app::App;
pub use events::{Event, EventHandler};

use crate::commands::{self, Command, CommandContext, CommandResult, CommandRouter, GuidanceState};
use crate::connection::{ConnectionRegistry, HandleProvider};
use crate::error::{DbSageError, Result};
use crate::orchestrator::{Orchestrator, OrchestratorEvent};
use app::{ChatMessage, PendingConfirm};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use std::io::{self, Stdout};
use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use widgets::confirm;

/// Everything the event loop drives.
pub struct Session {
    pub orchestrator: Orchestrator,
    pub events: mpsc::UnboundedReceiver<OrchestratorEvent>,
    pub registry: Arc<ConnectionRegistry>,
    pub tick_rate: Duration,
}

/// The main TUI application runner.
pub struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    /// Creates a new TUI instance, initializing the terminal.
    pub fn new() -> Result<Self> {
        let terminal = Self::setup_terminal()?;
        Ok(Self { terminal })
    }

    /// Sets up the terminal for TUI rendering.
    fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
        enable_raw_mode()
            .map_err(|e| DbSageError::internal(format!("Failed to enable raw mode: {e}")))?;

        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture).map_err(|e| {
            DbSageError::internal(format!("Failed to enter alternate screen: {e}"))
        })?;

        let backend = CrosstermBackend::new(stdout);
        Terminal::new(backend)
            .map_err(|e| DbSageError::internal(format!("Failed to create terminal: {e}")))
    }

    /// Restores the terminal to its original state.
    fn restore_terminal(&mut self) -> Result<()> {
        disable_raw_mode()
            .map_err(|e| DbSageError::internal(format!("Failed to disable raw mode: {e}")))?;

        execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )
        .map_err(|e| DbSageError::internal(format!("Failed to leave alternate screen: {e}")))?;

        self.terminal
            .show_cursor()
            .map_err(|e| DbSageError::internal(format!("Failed to show cursor: {e}")))?;

        Ok(())
    }

    /// Runs the event loop until the user exits.
    pub async fn run(&mut self, mut session: Session) -> Result<()> {
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(move |panic_info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
            original_hook(panic_info);
        }));

        let guidance = GuidanceState::new(!session.registry.is_empty().await, true);
        let mut app_state = App::new(connection_info(&session.registry).await, guidance);
        let mut terminal_events = EventHandler::spawn(session.tick_rate);

        let result = self
            .run_event_loop(&mut app_state, &mut session, &mut terminal_events)
            .await;

        if let Some(update) = session.orchestrator.cancel() {
            debug!(?update, "Cancelled turn on exit");
        }
        let _ = panic::take_hook();

        result
    }

    async fn run_event_loop(
        &mut self,
        app_state: &mut App,
        session: &mut Session,
        terminal_events: &mut EventHandler,
    ) -> Result<()> {
        loop {
            self.terminal
                .draw(|frame| ui::render(frame, app_state))
                .map_err(|e| DbSageError::internal(format!("Failed to draw: {e}")))?;

            if !app_state.running {
                break;
            }

            tokio::select! {
                event = terminal_events.next() => match event {
                    Some(Event::Key(key)) => handle_key(key, app_state, session).await,
                    Some(Event::Resize(..)) => {}
                    None => {
                        return Err(DbSageError::internal("Terminal event reader stopped"));
                    }
                },

                Some(event) = session.events.recv() => {
                    for update in session.orchestrator.on_event(event).await {
                        app_state.apply_update(update);
                    }
                }
            }
        }

        Ok(())
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        let _ = self.restore_terminal();
    }
}

/// Runs the TUI until the user exits.
pub async fn run(session: Session) -> Result<()> {
    let mut tui = Tui::new()?;
    tui.run(session).await
}

/// Header text for the current connection.
async fn connection_info(registry: &ConnectionRegistry) -> Option<String> {
    registry
        .current_target()
        .await
        .map(|(name, backend)| format!("{name} ({})", backend.dialect_name()))
}

async fn handle_key(key: KeyEvent, app_state: &mut App, session: &mut Session) {
    let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);

    if ctrl_c {
        match session.orchestrator.cancel() {
            Some(update) => app_state.apply_update(update),
            None => app_state.running = false,
        }
        return;
    }

    // The confirmation dialog takes every other key.
    if let Some(pending) = app_state.pending.as_mut() {
        let approved = match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => true,
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => false,
            code => {
                scroll_confirmation(pending, code);
                return;
            }
        };
        app_state.pending = None;
        match session.orchestrator.resume(approved).await {
            Ok(updates) => updates
                .into_iter()
                .for_each(|update| app_state.apply_update(update)),
            Err(e) => {
                app_state.busy = session.orchestrator.is_busy();
                app_state.add_message(ChatMessage::Error(e.to_string()));
            }
        }
        return;
    }

    if key.code != KeyCode::Enter {
        app_state.handle_key(key);
        return;
    }

    if let Some(input) = app_state.submit_input() {
        handle_input(input, app_state, session).await;
    }
}

/// Moves the prompt window of the confirmation dialog.
fn scroll_confirmation(pending: &mut PendingConfirm, code: KeyCode) {
    let Ok((width, height)) = crossterm::terminal::size() else {
        return;
    };
    let area = Rect::new(0, 0, width, height);
    pending.scroll = confirm::scroll_offset(&pending.prompt, area, pending.scroll, code);
}

async fn handle_input(input: String, app_state: &mut App, session: &mut Session) {
    let command = CommandRouter::parse(&input);
    app_state.add_message(ChatMessage::User(input));

    match command {
        Command::NaturalLanguage(text) => match session.orchestrator.submit(text) {
            Ok(turn) => {
                debug!(turn = %turn, "Submitted");
                app_state.busy = true;
            }
            Err(e) => app_state.add_message(ChatMessage::Error(e.to_string())),
        },
        command => {
            let ctx = CommandContext {
                registry: &session.registry,
            };
            match commands::execute(command, &ctx).await {
                CommandResult::Messages(messages) => {
                    messages.into_iter().for_each(|m| app_state.add_message(m));
                }
                CommandResult::ClearConversation => match session.orchestrator.clear() {
                    Ok(()) => {
                        app_state.clear_messages();
                        app_state.add_message(ChatMessage::System(
                            "Conversation cleared.".to_string(),
                        ));
                    }
                    Err(e) => app_state.add_message(ChatMessage::Error(e.to_string())),
                },
                CommandResult::Exit => {
                    info!("Exit requested");
                    app_state.running = false;
                }
                CommandResult::None => {}
            }

            app_state.connection_info = connection_info(&session.registry).await;
            app_state.guidance.has_connection = !session.registry.is_empty().await;
        }
    }

    app_state.guidance.transcript_empty = session.orchestrator.transcript().is_empty();
}
