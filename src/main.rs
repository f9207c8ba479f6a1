//! Kubetui: zKube-style block puzzle in the terminal, played against an authoritative backend.

mod app;
mod authority;
mod bitfield;
mod bonus;
mod counters;
mod grid;
mod highscores;
mod input;
mod journal;
mod linegen;
mod phase;
mod reconcile;
mod session;
mod theme;
mod ui;

use anyhow::Result;
use app::App;
use clap::{Parser, ValueEnum};
use journal::Journal;
use std::time::{SystemTime, UNIX_EPOCH};

/// Options derived from CLI that affect the simulation, the backend and the animations.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub width: usize,
    pub height: usize,
    /// Gravity ticker interval.
    pub tick_ms: u64,
    /// Drop animation length; gravity waits for it before clearing rows.
    pub transition_ms: u64,
    /// Busy flag stays set this long after a confirmation is applied.
    pub settle_delay_ms: u64,
    pub latency_ms: u64,
    pub fail_every: Option<u32>,
    pub seed: u32,
    pub animation: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: 8,
            height: 10,
            tick_ms: 100,
            transition_ms: 300,
            settle_delay_ms: 200,
            latency_ms: 400,
            fail_every: None,
            seed: 0,
            animation: true,
        }
    }
}

impl From<&Args> for GameConfig {
    fn from(args: &Args) -> Self {
        let seed = args.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos() ^ d.as_secs() as u32)
                .unwrap_or(0)
        });
        Self {
            width: args.width as usize,
            height: args.height as usize,
            tick_ms: args.tick_ms.max(1),
            transition_ms: args.transition_ms,
            settle_delay_ms: args.settle_ms,
            latency_ms: args.latency_ms,
            fail_every: args.fail_every,
            seed,
            animation: !args.no_animation,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let theme = theme::Theme::load(args.theme.as_deref(), args.palette).unwrap_or_default();
    let journal = match args.log_file.as_deref() {
        Some(path) => Journal::new().with_file(path)?,
        None => Journal::new(),
    };
    let config = GameConfig::from(&args);
    let mut app = App::new(config, theme, journal)?;
    app.run()?;
    Ok(())
}

/// zKube-style block puzzle in the terminal.
#[derive(Debug, Parser)]
#[command(
    name = "kubetui",
    version,
    about = "zKube-style block puzzle in the terminal. Slide blocks sideways, fill rows, chain combos.",
    long_about = "Kubetui is a terminal block puzzle inspired by zKube.\n\n\
        Slide one block per turn. Blocks fall, full rows clear, and a new line rises from the \
        floor after every move. Every move is checked by a backend; the board you see is a \
        prediction until the backend confirms it.\n\n\
        CONTROLS:\n  Arrows / hjkl   Move cursor (or the grabbed block)\n  Space / Enter   Grab / release, or fire the armed bonus\n  \
        1 / 2 / 3       Arm Hammer / Wave / Totem\n  Esc             Release or disarm\n  R               Restart\n  Q               Quit menu\n\n\
        The mouse works too: press on a block, drag sideways, release."
)]
pub struct Args {
    /// Grid width in columns.
    #[arg(long, default_value = "8", value_name = "COLS", value_parser = clap::value_parser!(u16).range(2..=10))]
    pub width: u16,

    /// Grid height in rows.
    #[arg(long, default_value = "10", value_name = "ROWS", value_parser = clap::value_parser!(u16).range(4..=24))]
    pub height: u16,

    /// Gravity tick interval in ms.
    #[arg(long, default_value = "100", value_name = "MS")]
    pub tick_ms: u64,

    /// Drop animation duration in ms.
    #[arg(long, default_value = "300", value_name = "MS")]
    pub transition_ms: u64,

    /// Delay before input unlocks after the backend confirms a move, in ms.
    #[arg(long, default_value = "200", value_name = "MS")]
    pub settle_ms: u64,

    /// Simulated backend round-trip in ms.
    #[arg(long, default_value = "400", value_name = "MS")]
    pub latency_ms: u64,

    /// Make the backend drop every N-th submission (exercises failure handling).
    #[arg(long, value_name = "N")]
    pub fail_every: Option<u32>,

    /// Seed for the generated lines. Random if not set.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u32>,

    /// Path to theme file (btop-style theme[key]=\"value\"). Uses One Dark if not set.
    #[arg(short, long, value_name = "FILE")]
    pub theme: Option<std::path::PathBuf>,

    /// Colour palette: normal (theme), high-contrast, or colorblind.
    #[arg(long, default_value = "normal")]
    pub palette: Palette,

    /// Disable drop and clear animations.
    #[arg(long)]
    pub no_animation: bool,

    /// Append the event journal to this file.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Palette {
    #[default]
    Normal,

    #[value(alias = "highcontrast", alias = "contrast")]
    HighContrast,

    #[value(alias = "colourblind")]
    Colorblind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config_default() {
        let args = Args::parse_from(["kubetui", "--seed", "3"]);
        let config = GameConfig::from(&args);
        let d = GameConfig::default();
        assert_eq!((config.width, config.height), (d.width, d.height));
        assert_eq!(config.tick_ms, d.tick_ms);
        assert_eq!(config.transition_ms, d.transition_ms);
        assert_eq!(config.settle_delay_ms, d.settle_delay_ms);
        assert_eq!(config.latency_ms, d.latency_ms);
        assert_eq!(config.seed, 3);
        assert!(config.animation);
    }

    #[test]
    fn test_width_limited_to_packed_row() {
        assert!(Args::try_parse_from(["kubetui", "--width", "11"]).is_err());
        let args = Args::parse_from(["kubetui", "--width", "10", "--no-animation", "--fail-every", "3"]);
        let config = GameConfig::from(&args);
        assert_eq!(config.width, 10);
        assert!(!config.animation);
        assert_eq!(config.fail_every, Some(3));
    }
}
