use std::sync::OnceLock;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use tracing::warn;

const THEME_NAME: &str = "base16-ocean.dark";

struct Assets {
    syntaxes: SyntaxSet,
    theme: Theme,
}

fn assets() -> &'static Assets {
    static ASSETS: OnceLock<Assets> = OnceLock::new();
    ASSETS.get_or_init(|| {
        let mut themes = ThemeSet::load_defaults();
        Assets {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            theme: themes.themes.remove(THEME_NAME).unwrap_or_default(),
        }
    })
}

fn to_style(style: syntect::highlighting::Style) -> Style {
    let fg = style.foreground;
    let mut out = Style::default().fg(Color::Rgb(fg.r, fg.g, fg.b));
    if style.font_style.contains(FontStyle::BOLD) {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.font_style.contains(FontStyle::ITALIC) {
        out = out.add_modifier(Modifier::ITALIC);
    }
    if style.font_style.contains(FontStyle::UNDERLINE) {
        out = out.add_modifier(Modifier::UNDERLINED);
    }
    out
}

/// Highlight `code` line by line. Unknown languages and highlighter errors
/// fall back to plain lines in `fallback` style.
pub fn highlight_code(code: &str, language: Option<&str>, fallback: Style) -> Vec<Line<'static>> {
    let assets = assets();
    let syntax = language
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .and_then(|l| assets.syntaxes.find_syntax_by_token(l));
    let Some(syntax) = syntax else {
        return plain_lines(code, fallback);
    };

    let mut highlighter = HighlightLines::new(syntax, &assets.theme);
    let mut lines = Vec::new();
    for line in LinesWithEndings::from(code) {
        match highlighter.highlight_line(line, &assets.syntaxes) {
            Ok(ranges) => {
                let spans: Vec<Span<'static>> = ranges
                    .into_iter()
                    .map(|(style, text)| {
                        Span::styled(text.trim_end_matches(['\n', '\r']).to_string(), to_style(style))
                    })
                    .filter(|span| !span.content.is_empty())
                    .collect();
                lines.push(Line::from(spans));
            }
            Err(e) => {
                warn!(error = %e, "Highlighting failed, falling back to plain text");
                return plain_lines(code, fallback);
            }
        }
    }
    lines
}

fn plain_lines(code: &str, style: Style) -> Vec<Line<'static>> {
    code.lines()
        .map(|l| Line::from(Span::styled(l.to_string(), style)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_known_language_keeps_text() {
        let code = "fn main() {\n    println!(\"hi\");\n}\n";
        let lines = highlight_code(code, Some("rust"), Style::default());
        assert_eq!(lines.len(), 3);
        assert_eq!(text_of(&lines[1]), "    println!(\"hi\");");
        assert!(lines[0].spans.len() > 1);
    }

    #[test]
    fn test_unknown_language_is_plain() {
        let lines = highlight_code("a\nb", Some("no-such-lang"), Style::default());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].spans.len(), 1);
        assert_eq!(text_of(&lines[1]), "b");
    }
}
