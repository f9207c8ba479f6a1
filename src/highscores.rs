//! Persist best score and best combo to disk (XDG config or ~/.config/kubetui).

use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const FILENAME: &str = "highscores";

/// Best results across games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Records {
    pub score: u32,
    pub combo: u32,
}

impl Records {
    /// Fold in a finished game. Returns true if either record was beaten.
    pub fn update(&mut self, score: u32, max_combo: u32) -> bool {
        let beaten = score > self.score || max_combo > self.combo;
        self.score = self.score.max(score);
        self.combo = self.combo.max(max_combo);
        beaten
    }
}

/// Returns the path to the high scores file (config dir / kubetui / highscores).
fn config_path() -> PathBuf {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".config"))
            .unwrap_or_else(|_| PathBuf::from(".")),
    };
    base.join("kubetui").join(FILENAME)
}

fn parse(content: &str) -> Records {
    let mut lines = content
        .lines()
        .map(|l| l.trim().parse::<u32>().unwrap_or(0));
    Records {
        score: lines.next().unwrap_or(0),
        combo: lines.next().unwrap_or(0),
    }
}

fn load_from(path: &Path) -> Records {
    fs::read_to_string(path).map(|c| parse(&c)).unwrap_or_default()
}

fn save_to(path: &Path, records: Records) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::File::create(path)?;
    writeln!(f, "{}", records.score)?;
    writeln!(f, "{}", records.combo)?;
    Ok(())
}

/// Load records from disk; zeros on missing file or parse error.
pub fn load_high_scores() -> Records {
    load_from(&config_path())
}

/// Save records to disk. Creates the config directory if needed.
pub fn save_high_scores(records: Records) -> Result<()> {
    save_to(&config_path(), records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tolerates_garbage() {
        assert_eq!(parse("12\n3\n"), Records { score: 12, combo: 3 });
        assert_eq!(parse("x\n"), Records::default());
        assert_eq!(parse(""), Records::default());
    }

    #[test]
    fn test_update_reports_new_record() {
        let mut r = Records { score: 10, combo: 4 };
        assert!(!r.update(8, 2));
        assert!(r.update(8, 5));
        assert_eq!(r, Records { score: 10, combo: 5 });
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("kubetui-hs-{}", std::process::id()));
        let path = dir.join("nested").join(FILENAME);
        save_to(&path, Records { score: 77, combo: 6 }).unwrap();
        assert_eq!(load_from(&path), Records { score: 77, combo: 6 });
        let _ = fs::remove_dir_all(&dir);
    }
}
