//! Theme loading: btop-style `theme[key]="value"` and hex → ratatui Color.

use ratatui::style::Color;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Block colours by width plus the UI colours, One Dark by default.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Block colours indexed by `width - 1`: green, yellow, red, blue, magenta, cyan.
    pub blocks: [Color; 6],
    /// Board background.
    pub bg: Color,
    /// Grid / border.
    pub div_line: Color,
    /// Text (score, counters).
    pub main_fg: Color,
    /// Highlight / titles.
    pub title: Color,
    /// Disabled bonuses, idle journal lines.
    pub inactive_fg: Color,
    /// Danger rows tint and error lines.
    pub danger: Color,
}

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

impl Default for Theme {
    fn default() -> Self {
        Self::onedark_default()
    }
}

const ONEDARK_BLOCKS: [Color; 6] = [
    Color::Rgb(0x98, 0xC3, 0x79), // mem_box / green
    Color::Rgb(0xE5, 0xC0, 0x7B), // title / yellow
    Color::Rgb(0xE0, 0x6C, 0x75), // cpu_end / red
    Color::Rgb(0x61, 0xAF, 0xEF), // cpu_box / blue
    Color::Rgb(0xC6, 0x78, 0xDD), // net_box / magenta
    Color::Rgb(0x56, 0xB6, 0xC2), // hi_fg / cyan
];

impl Theme {
    /// One Dark values from onedark.theme.
    pub fn onedark_default() -> Self {
        Self {
            blocks: ONEDARK_BLOCKS,
            bg: Color::Rgb(0x31, 0x35, 0x3F),
            div_line: Color::Rgb(0x3F, 0x44, 0x4F),
            main_fg: Color::Rgb(0xAB, 0xB2, 0xBF),
            title: Color::Rgb(0xE5, 0xC0, 0x7B),
            inactive_fg: Color::Rgb(0x5C, 0x63, 0x70),
            danger: Color::Rgb(0x4B, 0x2A, 0x2E),
        }
    }

    /// Load theme from a btop-style file: `theme[key]="value"` or `theme[key]='value'`.
    /// Falls back to One Dark if path is None or the file is missing.
    pub fn load(path: Option<&Path>, palette: crate::Palette) -> Result<Self, ThemeError> {
        let mut theme = match path {
            Some(p) if p.exists() => Self::from_map(&parse_theme_file(&std::fs::read_to_string(p)?)),
            _ => Self::onedark_default(),
        };
        theme.apply_palette(palette);
        Ok(theme)
    }

    /// Override block colours for high-contrast or colorblind.
    pub fn apply_palette(&mut self, palette: crate::Palette) {
        match palette {
            crate::Palette::Normal => {}
            crate::Palette::HighContrast => {
                self.blocks = [
                    Color::Rgb(0x00, 0xFF, 0x00),
                    Color::Rgb(0xFF, 0xFF, 0x00),
                    Color::Rgb(0xFF, 0x00, 0x00),
                    Color::Rgb(0x00, 0x88, 0xFF),
                    Color::Rgb(0xFF, 0x00, 0xFF),
                    Color::Rgb(0x00, 0xFF, 0xFF),
                ];
            }
            crate::Palette::Colorblind => {
                // Paul Tol's bright scheme.
                self.blocks = [
                    Color::Rgb(0x00, 0x77, 0xBB),
                    Color::Rgb(0xEE, 0x77, 0x33),
                    Color::Rgb(0x00, 0x99, 0x88),
                    Color::Rgb(0xCC, 0x33, 0x11),
                    Color::Rgb(0xEE, 0x33, 0x77),
                    Color::Rgb(0xBB, 0xBB, 0x00),
                ];
            }
        }
    }

    fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).and_then(|v| parse_hex(v).ok()));
        let d = Self::onedark_default();
        Self {
            blocks: [
                get(&["mem_box", "cpu_start"]).unwrap_or(d.blocks[0]),
                get(&["title", "cpu_mid"]).unwrap_or(d.blocks[1]),
                get(&["cpu_end", "temp_end"]).unwrap_or(d.blocks[2]),
                get(&["cpu_box"]).unwrap_or(d.blocks[3]),
                get(&["net_box"]).unwrap_or(d.blocks[4]),
                get(&["hi_fg", "proc_misc"]).unwrap_or(d.blocks[5]),
            ],
            bg: get(&["meter_bg"]).unwrap_or(d.bg),
            div_line: get(&["div_line"]).unwrap_or(d.div_line),
            main_fg: get(&["main_fg"]).unwrap_or(d.main_fg),
            title: get(&["title"]).unwrap_or(d.title),
            inactive_fg: get(&["inactive_fg"]).unwrap_or(d.inactive_fg),
            danger: get(&["selected_bg"]).unwrap_or(d.danger),
        }
    }

    /// Colour for a block of `width` cells.
    #[inline]
    pub fn block_color(&self, width: usize) -> Color {
        self.blocks[width.saturating_sub(1) % self.blocks.len()]
    }
}

/// Parse btop-style theme file into key -> value map.
fn parse_theme_file(s: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in s.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        let Some(stripped) = line.strip_prefix("theme[") else {
            continue;
        };
        let Some((key, rest)) = stripped.split_once(']') else {
            continue;
        };
        let Some((_, value)) = rest.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if !value.is_empty() {
            map.insert(key.trim().to_string(), value.to_string());
        }
    }
    map
}

/// Parse hex colour "#RRGGBB" or "#RGB" into ratatui Color.
pub fn parse_hex(s: &str) -> Result<Color, ThemeError> {
    let s = s.trim().trim_start_matches('#');
    let invalid = || ThemeError::InvalidHex(s.to_string());
    let channel = |range: std::ops::Range<usize>| {
        s.get(range)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .ok_or_else(invalid)
    };
    match s.len() {
        6 => Ok(Color::Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
        3 => Ok(Color::Rgb(
            channel(0..1)? * 17,
            channel(1..2)? * 17,
            channel(2..3)? * 17,
        )),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_6() {
        let c = parse_hex("#98C379").unwrap();
        assert!(matches!(c, Color::Rgb(0x98, 0xC3, 0x79)));
    }

    #[test]
    fn test_parse_hex_3() {
        let c = parse_hex("#FFF").unwrap();
        assert!(matches!(c, Color::Rgb(255, 255, 255)));
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex("#12345").is_err());
        assert!(parse_hex("#GG0000").is_err());
    }

    #[test]
    fn test_parse_theme_line() {
        let map = parse_theme_file(r##"theme[meter_bg]="#31353F""##);
        assert_eq!(map.get("meter_bg"), Some(&"#31353F".to_string()));
    }

    #[test]
    fn test_theme_keys_override_defaults() {
        let map = parse_theme_file("theme[net_box]=\"#010203\"\n# comment\ntheme[main_fg]='#FFF'");
        let t = Theme::from_map(&map);
        assert_eq!(t.block_color(5), Color::Rgb(1, 2, 3));
        assert_eq!(t.main_fg, Color::Rgb(255, 255, 255));
        assert_eq!(t.bg, Theme::default().bg);
    }

    #[test]
    fn test_block_color_by_width() {
        let t = Theme::default();
        assert_eq!(t.block_color(1), ONEDARK_BLOCKS[0]);
        assert_eq!(t.block_color(4), ONEDARK_BLOCKS[3]);
    }
}
