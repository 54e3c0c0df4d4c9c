use std::collections::HashMap;

use ratatui::style::Color;
use tracing::{debug, warn};

/// Resolved theme colors mapped to ratatui `Color` values.
#[derive(Debug, Clone)]
pub struct ThemeColors {
    pub primary: Color,
    pub secondary: Color,
    pub accent: Color,
    pub background: Color,
    pub background_panel: Color,
    pub background_element: Color,
    pub text: Color,
    pub text_muted: Color,
    pub border: Color,
    pub border_active: Color,
    pub error: Color,
    pub warning: Color,
    pub success: Color,
    pub info: Color,
    /// Background of fenced code blocks.
    pub code_background: Color,
    /// File links and markdown links.
    pub link: Color,
}

impl Default for ThemeColors {
    /// Dark palette used when nothing is overridden.
    fn default() -> Self {
        Self {
            primary: Color::Rgb(0xfa, 0xb2, 0x83),            // #fab283
            secondary: Color::Rgb(0x5c, 0x9c, 0xf5),          // #5c9cf5
            accent: Color::Rgb(0x9d, 0x7c, 0xd8),             // #9d7cd8
            background: Color::Rgb(0x0a, 0x0a, 0x0a),         // #0a0a0a
            background_panel: Color::Rgb(0x14, 0x14, 0x14),   // #141414
            background_element: Color::Rgb(0x1e, 0x1e, 0x1e), // #1e1e1e
            text: Color::Rgb(0xee, 0xee, 0xee),               // #eeeeee
            text_muted: Color::Rgb(0x80, 0x80, 0x80),         // #808080
            border: Color::Rgb(0x48, 0x48, 0x48),             // #484848
            border_active: Color::Rgb(0x60, 0x60, 0x60),      // #606060
            error: Color::Rgb(0xe0, 0x6c, 0x75),              // #e06c75
            warning: Color::Rgb(0xf5, 0xa7, 0x42),            // #f5a742
            success: Color::Rgb(0x7f, 0xd8, 0x8f),            // #7fd88f
            info: Color::Rgb(0x56, 0xb6, 0xc2),               // #56b6c2
            code_background: Color::Rgb(0x2b, 0x30, 0x3b),    // #2b303b
            link: Color::Rgb(0x5c, 0x9c, 0xf5),               // #5c9cf5
        }
    }
}

impl ThemeColors {
    /// Default palette with the `[theme]` table from the config applied.
    /// Unknown slots and malformed colors are logged and skipped.
    pub fn from_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut theme = Self::default();
        for (slot, value) in overrides {
            let Some(color) = hex_to_color(value) else {
                warn!(slot, value, "Ignoring malformed theme color");
                continue;
            };
            let target = match slot.as_str() {
                "primary" => &mut theme.primary,
                "secondary" => &mut theme.secondary,
                "accent" => &mut theme.accent,
                "background" => &mut theme.background,
                "background_panel" => &mut theme.background_panel,
                "background_element" => &mut theme.background_element,
                "text" => &mut theme.text,
                "text_muted" => &mut theme.text_muted,
                "border" => &mut theme.border,
                "border_active" => &mut theme.border_active,
                "error" => &mut theme.error,
                "warning" => &mut theme.warning,
                "success" => &mut theme.success,
                "info" => &mut theme.info,
                "code_background" => &mut theme.code_background,
                "link" => &mut theme.link,
                _ => {
                    warn!(slot, "Unknown theme slot");
                    continue;
                }
            };
            *target = color;
            debug!(slot, value, "Theme override applied");
        }
        theme
    }
}

/// Convert a hex color string (e.g. "#fab283") to a ratatui `Color::Rgb`.
fn hex_to_color(hex: &str) -> Option<Color> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color::Rgb(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_color() {
        assert_eq!(hex_to_color("#fab283"), Some(Color::Rgb(0xfa, 0xb2, 0x83)));
        assert_eq!(hex_to_color("fab283"), Some(Color::Rgb(0xfa, 0xb2, 0x83)));
        assert_eq!(hex_to_color("#fab"), None);
        assert_eq!(hex_to_color("#zzzzzz"), None);
    }

    #[test]
    fn test_overrides_apply_known_slots_only() {
        let mut overrides = HashMap::new();
        overrides.insert("primary".to_string(), "#010203".to_string());
        overrides.insert("nonsense".to_string(), "#010203".to_string());
        overrides.insert("error".to_string(), "red".to_string());
        let theme = ThemeColors::from_overrides(&overrides);
        assert_eq!(theme.primary, Color::Rgb(1, 2, 3));
        assert_eq!(theme.error, ThemeColors::default().error);
    }

    #[test]
    fn test_pane_borders_use_border_slots() {
        let mut overrides = HashMap::new();
        overrides.insert("border".to_string(), "#111111".to_string());
        overrides.insert("border_subtle".to_string(), "#222222".to_string());
        let theme = ThemeColors::from_overrides(&overrides);
        assert_eq!(theme.border, Color::Rgb(0x11, 0x11, 0x11));
        assert_eq!(theme.border_active, ThemeColors::default().border_active);
    }
}
