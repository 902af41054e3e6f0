//! Header widget for the TUI.
//!
//! Displays the application name, version, busy indicator and the current
//! connection.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::Span,
    widgets::Widget,
};

/// Header bar widget.
pub struct Header<'a> {
    connection_info: Option<&'a str>,
    busy: bool,
}

impl<'a> Header<'a> {
    pub fn new(connection_info: Option<&'a str>, busy: bool) -> Self {
        Self {
            connection_info,
            busy,
        }
    }
}

impl Widget for Header<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let style = Style::default()
            .bg(Color::Blue)
            .fg(Color::White)
            .add_modifier(Modifier::BOLD);

        for x in area.left()..area.right() {
            buf[(x, area.y)].set_style(style);
        }

        let left_text = format!(" dbsage v{}", env!("CARGO_PKG_VERSION"));
        buf.set_span(area.x, area.y, &Span::styled(left_text, style), area.width);

        if self.busy {
            let busy_text = "working... (Ctrl+C to cancel)";
            let busy_style = style.fg(Color::Yellow);
            let width = busy_text.len() as u16;
            let x = area.x + area.width.saturating_sub(width) / 2;
            buf.set_string(x, area.y, busy_text, busy_style);
        }

        let (dot, dot_color, info) = match self.connection_info {
            Some(info) => ("●", Color::Green, info),
            None => ("○", Color::Gray, "no connection"),
        };
        let right_text = format!(" {dot} [db: {info}] ");
        let right_width = right_text.chars().count() as u16;
        if right_width < area.width {
            let right_x = area.right().saturating_sub(right_width);
            buf.set_string(right_x + 1, area.y, dot, style.fg(dot_color));
            buf.set_string(right_x + 2, area.y, format!(" [db: {info}] "), style);
        }
    }
}
