use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph, Widget};

use crate::app::App;
use crate::keymap::{Action, Focus};

use super::banner_style;

/// Rows the git panel needs including borders.
pub const GIT_PANEL_HEIGHT: u16 = 8;

/// Branch selector, repository state and git action buttons.
pub struct GitBar<'a> {
    app: &'a App,
}

impl<'a> GitBar<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    fn key_span(&self, action: Action, enabled: bool) -> Span<'static> {
        let theme = &self.app.theme;
        let key = self
            .app
            .keymap
            .key_for(action)
            .map(|b| b.display())
            .unwrap_or_default();
        let style = if enabled && self.app.git.busy().is_none() {
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.text_muted)
        };
        Span::styled(format!("[{key}] "), style)
    }

    fn button(&self, action: Action, label: &str, enabled: bool) -> Vec<Span<'static>> {
        let theme = &self.app.theme;
        let label_color = if enabled && self.app.git.busy().is_none() {
            theme.text
        } else {
            theme.text_muted
        };
        vec![
            self.key_span(action, enabled),
            Span::styled(format!("{label}  "), Style::default().fg(label_color)),
        ]
    }
}

impl<'a> Widget for GitBar<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let theme = &self.app.theme;
        let git = &self.app.git;
        let focused = self.app.focus == Focus::Git;

        let mut title = vec![Span::styled(
            " Git ",
            Style::default().fg(theme.primary).add_modifier(Modifier::BOLD),
        )];
        if let Some(action) = git.busy() {
            title.push(Span::styled(
                format!("{}... ", action.label()),
                Style::default().fg(theme.warning),
            ));
        }
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(if focused {
                theme.border_active
            } else {
                theme.border
            }))
            .title(Line::from(title))
            .style(Style::default().bg(theme.background_panel));
        let inner = block.inner(area);
        block.render(area, buf);
        if inner.height == 0 {
            return;
        }

        let mut lines = Vec::new();

        let current = git.current_branch.as_deref().unwrap_or("(unknown)");
        let mut branch_line = vec![
            Span::styled(" ", Style::default().fg(theme.accent)),
            Span::styled(
                current.to_string(),
                Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
            ),
        ];
        if let Some(selected) = git
            .selected_branch
            .as_deref()
            .filter(|b| Some(*b) != git.current_branch.as_deref())
        {
            branch_line.push(Span::styled(
                format!("  → {selected}"),
                Style::default().fg(theme.warning),
            ));
        }
        if git.branches.len() > 1 {
            branch_line.push(Span::styled(
                format!("  ({} branches)", git.branches.len()),
                Style::default().fg(theme.text_muted),
            ));
        }
        lines.push(Line::from(branch_line));

        let mut state = Vec::new();
        if git.status.has_uncommitted_changes {
            state.push(Span::styled("● uncommitted  ", Style::default().fg(theme.warning)));
        }
        if git.status.has_unpushed_commits {
            state.push(Span::styled("↑ unpushed  ", Style::default().fg(theme.info)));
        }
        if state.is_empty() {
            state.push(Span::styled("clean", Style::default().fg(theme.text_muted)));
        }
        lines.push(Line::from(state));

        let buttons = git.buttons();
        let mut row = self.button(Action::GitNewBranch, "New branch", buttons.new_branch_enabled);
        row.extend(self.button(Action::GitCheckout, "Checkout", git.branches.len() > 1));
        lines.push(Line::from(row));

        let mut row = Vec::new();
        if buttons.commit_visible {
            row.extend(self.button(Action::GitCommit, "Commit", true));
        }
        if buttons.push_visible {
            row.extend(self.button(Action::GitPush, "Push", true));
        }
        if buttons.merge_visible {
            row.extend(self.button(Action::GitMerge, "Merge", true));
        }
        lines.push(Line::from(row));

        lines.push(Line::from(vec![
            self.key_span(Action::GitAutoCommit, true),
            Span::styled(
                if git.auto_commit { "[x]" } else { "[ ]" },
                Style::default().fg(theme.accent),
            ),
            Span::styled(" auto-commit", Style::default().fg(theme.text)),
        ]));

        if let Some(message) = &git.message {
            lines.push(Line::from(Span::styled(
                message.text.clone(),
                banner_style(theme, message.kind),
            )));
        }

        Paragraph::new(lines).render(inner, buf);
    }
}
