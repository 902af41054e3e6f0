//! Input widget for the TUI.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};

/// Calculates the scroll offset needed to keep the cursor visible.
///
/// Returns the number of characters to skip from the start of the text.
pub fn calculate_scroll_offset(cursor: usize, available_width: usize) -> usize {
    cursor.saturating_sub(available_width)
}

/// Input bar widget.
pub struct InputBar<'a> {
    text: &'a str,
    cursor: usize,
    /// Input is locked while a confirmation dialog is open.
    locked: bool,
}

impl<'a> InputBar<'a> {
    pub fn new(text: &'a str, cursor: usize, locked: bool) -> Self {
        Self {
            text,
            cursor,
            locked,
        }
    }

    /// Columns available for text inside the borders and prompt.
    pub fn available_width(area: Rect) -> usize {
        // Border left (1) + prompt "> " (2) + border right (1) + cursor space (1) = 5
        area.width.saturating_sub(5) as usize
    }
}

impl Widget for InputBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let border_style = if self.locked {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Cyan)
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(" Input ");

        let prompt_style = Style::default()
            .fg(Color::Green)
            .add_modifier(Modifier::BOLD);

        let offset = calculate_scroll_offset(self.cursor, Self::available_width(area));
        let visible: String = self.text.chars().skip(offset).collect();

        let line = Line::from(vec![Span::styled("> ", prompt_style), Span::raw(visible)]);
        Paragraph::new(line).block(block).render(area, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_offset() {
        assert_eq!(calculate_scroll_offset(5, 20), 0);
        assert_eq!(calculate_scroll_offset(20, 20), 0);
        assert_eq!(calculate_scroll_offset(25, 20), 5);
        assert_eq!(calculate_scroll_offset(5, 0), 5);
    }

    #[test]
    fn test_render_scrolls_long_input() {
        let area = Rect::new(0, 0, 15, 3);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let mut buf = Buffer::empty(area);
        InputBar::new(text, text.len(), false).render(area, &mut buf);

        let row: String = (0..area.width).map(|x| buf[(x, 1)].symbol().to_string()).collect();
        assert!(row.contains("> qrstuvwxyz"));
    }
}
