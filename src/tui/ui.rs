//! UI rendering for the TUI.
//!
//! Defines the layout and renders all UI components.

use super::app::App;
use super::widgets::{chat, confirm, header, input};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    Frame,
};

/// Renders the entire UI.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(3),    // Chat
            Constraint::Length(3), // Input
        ])
        .split(area);

    render_header(frame, main_layout[0], app);
    render_chat(frame, main_layout[1], app);
    render_input(frame, main_layout[2], app);

    if let Some(pending) = &app.pending {
        confirm::render_confirmation_dialog(frame, pending);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let widget = header::Header::new(app.connection_info.as_deref(), app.busy);
    frame.render_widget(widget, area);
}

fn render_chat(frame: &mut Frame, area: Rect, app: &App) {
    let widget = chat::ChatPanel::new(&app.messages, app.chat_scroll);
    frame.render_widget(widget, area);
}

fn render_input(frame: &mut Frame, area: Rect, app: &App) {
    let locked = app.pending.is_some();
    let widget = input::InputBar::new(&app.input.text, app.input.cursor, locked);
    frame.render_widget(widget, area);

    if !locked {
        // Account for border (1) and prompt "> " (2)
        let available = input::InputBar::available_width(area);
        let column = app.input.cursor - input::calculate_scroll_offset(app.input.cursor, available);
        let cursor_x = area.x + 1 + 2 + column as u16;
        let cursor_y = area.y + 1;
        frame.set_cursor_position((cursor_x, cursor_y));
    }
}
