//! Terminal event reading for the TUI.
//!
//! crossterm's reader blocks, so it runs on a blocking task and forwards
//! events over a channel the async loop can `select!` on.

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Application events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A key was pressed.
    Key(KeyEvent),
    /// The terminal was resized.
    Resize(u16, u16),
}

/// Reads terminal events on a background thread until dropped.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
    stop: Arc<AtomicBool>,
}

impl EventHandler {
    /// Starts reading. `tick_rate` bounds how long a poll blocks, and so how
    /// quickly the reader notices it should stop.
    pub fn spawn(tick_rate: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);

        tokio::task::spawn_blocking(move || {
            while !reader_stop.load(Ordering::SeqCst) {
                match event::poll(tick_rate) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!("Failed to poll terminal events: {e}");
                        break;
                    }
                }

                let event = match event::read() {
                    Ok(CrosstermEvent::Key(key)) if key.kind != KeyEventKind::Release => {
                        Event::Key(key)
                    }
                    Ok(CrosstermEvent::Resize(width, height)) => Event::Resize(width, height),
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Failed to read terminal event: {e}");
                        break;
                    }
                };

                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Self { rx, stop }
    }

    /// The next event, or `None` if the reader stopped.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
