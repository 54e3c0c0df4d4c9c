pub mod chat_view;
pub mod context_panel;
pub mod git_bar;
pub mod input_box;
pub mod input_dialog;
pub mod status_bar;

use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Widget};
use ratatui::Frame;

use crate::app::App;
use crate::keymap::Action;
use crate::status::StatusKind;
use crate::theme::ThemeColors;

use self::context_panel::ContextPanel;
use self::git_bar::{GitBar, GIT_PANEL_HEIGHT};
use self::input_box::{input_height, InputBox};
use self::input_dialog::InputDialog;
use self::status_bar::StatusBar;

/// Must be called BEFORE rendering the popup panel on top.
pub fn render_overlay_dim(area: Rect, buf: &mut Buffer) {
    let dim_bg = Color::Rgb(10, 10, 10);
    let dim_fg = Color::Rgb(60, 60, 60);
    for y in area.y..area.y + area.height {
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, y)) {
                cell.set_bg(dim_bg);
                cell.set_fg(dim_fg);
            }
        }
    }
}

pub fn banner_style(theme: &ThemeColors, kind: StatusKind) -> Style {
    let color = match kind {
        StatusKind::Info => theme.info,
        StatusKind::Success => theme.success,
        StatusKind::Error => theme.error,
    };
    Style::default().fg(color)
}

pub fn draw(frame: &mut Frame, app: &mut App) {
    let size = frame.area();
    app.refresh_renders();

    let bg_block = Block::default().style(Style::default().bg(app.theme.background));
    Widget::render(bg_block, size, frame.buffer_mut());

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(size);
    let (header_area, body_area, status_area) = (rows[0], rows[1], rows[2]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(68), Constraint::Percentage(32)])
        .split(body_area);
    let (left, right) = (columns[0], columns[1]);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(input_height(app, left.width)),
        ])
        .split(left);
    let right_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(GIT_PANEL_HEIGHT), Constraint::Min(3)])
        .split(right);

    render_header(app, header_area, frame.buffer_mut());
    chat_view::draw_chat(app, left_rows[0], frame.buffer_mut());
    frame.render_widget(InputBox::new(app), left_rows[1]);
    frame.render_widget(GitBar::new(app), right_rows[0]);
    frame.render_widget(ContextPanel::new(app), right_rows[1]);
    frame.render_widget(StatusBar::new(app), status_area);

    if app.dialog.is_some() {
        InputDialog::new(app).render_popup(size, frame.buffer_mut());
    }
}

/// Top line: project, query id and the query text being analysed.
fn render_header(app: &App, area: Rect, buf: &mut Buffer) {
    let theme = &app.theme;
    let query = app
        .session
        .query_text
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    let mut spans = vec![
        Span::styled(
            format!(" {} ", app.session.project),
            Style::default()
                .fg(theme.background)
                .bg(theme.primary)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" #{} ", app.session.query_id),
            Style::default().fg(theme.text_muted),
        ),
        Span::styled(query, Style::default().fg(theme.text)),
    ];
    if let Some(binding) = app.keymap.key_for(Action::EditQuery) {
        spans.push(Span::styled(
            format!("  {} edit", binding.display()),
            Style::default().fg(theme.text_muted),
        ));
    }
    Paragraph::new(Line::from(spans))
        .style(Style::default().bg(theme.background_panel))
        .render(area, buf);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::api::AnalysisBackend;
    use crate::config::Config;
    use crate::test_support::{session, FakeBackend};

    fn app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (focus_tx, _focus_rx) = watch::channel(true);
        let backend: Arc<dyn AnalysisBackend> = Arc::new(FakeBackend::new());
        App::new(&Config::default(), session(), backend, tx, focus_tx)
    }

    fn screen(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|frame| draw(frame, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_draw_shows_header_and_panels() {
        let mut app = app();
        let text = screen(&mut app);
        assert!(text.contains("demo"));
        assert!(text.contains("#q1"));
        assert!(text.contains("where is the parser"));
        assert!(text.contains("Files"));
        assert!(text.contains("Git"));
    }

    #[test]
    fn test_draw_shows_alert_popup() {
        let mut app = app();
        app.alert("boom");
        let text = screen(&mut app);
        assert!(text.contains("boom"));
    }
}
