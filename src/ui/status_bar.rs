use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Paragraph, Widget};

use super::banner_style;
use crate::app::App;
use crate::keymap::Action;

/// Status bar widget displayed at the bottom of the screen.
///
/// Shows: focused pane, the latest status message, and key hints for the
/// focused pane.
pub struct StatusBar<'a> {
    app: &'a App,
}

impl<'a> StatusBar<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }
}

impl<'a> Widget for StatusBar<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let theme = &self.app.theme;
        let mut spans = Vec::new();

        spans.push(Span::styled(
            format!(" {} ", self.app.focus.label()),
            Style::default()
                .fg(theme.background)
                .bg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ));

        if let Some(banner) = &self.app.status {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                banner.text.clone(),
                banner_style(theme, banner.kind).add_modifier(Modifier::BOLD),
            ));
        }

        let mut hints = Vec::new();
        for binding in self.app.keymap.hints(self.app.focus) {
            hints.push(Span::styled(
                binding.display(),
                Style::default().fg(theme.secondary),
            ));
            hints.push(Span::styled(
                format!(" {}  ", binding.label),
                Style::default().fg(theme.text_muted),
            ));
        }
        for action in [Action::FocusNext, Action::Quit] {
            if let Some(binding) = self.app.keymap.key_for(action) {
                hints.push(Span::styled(
                    binding.display(),
                    Style::default().fg(theme.secondary),
                ));
                hints.push(Span::styled(
                    format!(" {} ", binding.label),
                    Style::default().fg(theme.text_muted),
                ));
            }
        }

        let left_width: usize = spans.iter().map(|s| s.width()).sum();
        let right_width: usize = hints.iter().map(|s| s.width()).sum();
        let total_width = area.width as usize;
        // Hints yield to the status message on narrow terminals.
        if left_width + right_width < total_width {
            spans.push(Span::raw(" ".repeat(total_width - left_width - right_width)));
            spans.extend(hints);
        }

        let paragraph = Paragraph::new(Line::from(spans))
            .style(Style::default().bg(theme.background_panel));
        Widget::render(paragraph, area, buf);
    }
}
