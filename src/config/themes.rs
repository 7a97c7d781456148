use std::collections::HashSet;

use ratatui::style::Color;

use super::ThemeName;

#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    names: HashSet<ThemeName>,
}

impl ThemeRegistry {
    pub fn contains(&self, theme: &ThemeName) -> bool {
        self.names.contains(theme)
    }

    pub fn all(&self) -> impl Iterator<Item = &ThemeName> {
        self.names.iter()
    }
}

impl Default for ThemeRegistry {
    fn default() -> Self {
        let names = [
            ThemeName::Dark,
            ThemeName::Light,
            ThemeName::HighContrast,
            ThemeName::Solarized,
        ]
        .into_iter()
        .collect();
        Self { names }
    }
}

/// Colors the renderer pulls from; one per role rather than per widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub accent: Color,
    pub highlight: Color,
    pub muted: Color,
    pub danger: Color,
    pub confirm: Color,
    pub selection_bg: Color,
    pub selection_fg: Color,
}

impl Palette {
    pub fn for_theme(theme: &ThemeName) -> Self {
        match theme {
            ThemeName::Dark => Self {
                accent: Color::Cyan,
                highlight: Color::Yellow,
                muted: Color::Gray,
                danger: Color::Red,
                confirm: Color::Green,
                selection_bg: Color::Blue,
                selection_fg: Color::Black,
            },
            ThemeName::Light => Self {
                accent: Color::Blue,
                highlight: Color::Magenta,
                muted: Color::DarkGray,
                danger: Color::Red,
                confirm: Color::Green,
                selection_bg: Color::LightBlue,
                selection_fg: Color::Black,
            },
            ThemeName::HighContrast => Self {
                accent: Color::White,
                highlight: Color::LightYellow,
                muted: Color::White,
                danger: Color::LightRed,
                confirm: Color::LightGreen,
                selection_bg: Color::White,
                selection_fg: Color::Black,
            },
            ThemeName::Solarized => Self {
                accent: Color::Rgb(38, 139, 210),
                highlight: Color::Rgb(181, 137, 0),
                muted: Color::Rgb(147, 161, 161),
                danger: Color::Rgb(220, 50, 47),
                confirm: Color::Rgb(133, 153, 0),
                selection_bg: Color::Rgb(7, 54, 66),
                selection_fg: Color::Rgb(238, 232, 213),
            },
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::for_theme(&ThemeName::Dark)
    }
}
