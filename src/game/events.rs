//! The events file: flavor lines for calamities ("C"), godsends ("G"),
//! and quest templates ("Q").
//!
//! The file is re-read whenever its mtime changes, so operators can add
//! lines while the bot runs.

use std::path::Path;
use std::time::SystemTime;

use tracing::info;

use crate::core::error::Result;
use crate::game::quest::{parse_quest_template, QuestTemplate};

#[derive(Default)]
pub struct EventTable {
    calamities: Vec<String>,
    godsends: Vec<String>,
    quests: Vec<QuestTemplate>,
    loaded_mtime: Option<SystemTime>,
}

impl EventTable {
    pub fn new() -> EventTable {
        EventTable::default()
    }

    /// Reload from `path` if it changed since the last load. Returns true
    /// when a reload happened.
    pub fn refresh(&mut self, path: &Path) -> Result<bool> {
        let mtime = std::fs::metadata(path)?.modified()?;
        if self.loaded_mtime == Some(mtime) {
            return Ok(false);
        }
        let text = std::fs::read_to_string(path)?;
        self.calamities.clear();
        self.godsends.clear();
        self.quests.clear();
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let body = line[1..].trim_start();
            match line.as_bytes()[0] {
                b'C' => self.calamities.push(body.to_string()),
                b'G' => self.godsends.push(body.to_string()),
                b'Q' => {
                    if let Some(t) = parse_quest_template(body) {
                        self.quests.push(t);
                    }
                }
                _ => {}
            }
        }
        self.loaded_mtime = Some(mtime);
        info!(
            "loaded events: {} calamities, {} godsends, {} quests",
            self.calamities.len(),
            self.godsends.len(),
            self.quests.len()
        );
        Ok(true)
    }

    pub fn calamities(&self) -> &[String] {
        &self.calamities
    }

    pub fn godsends(&self) -> &[String] {
        &self.godsends
    }

    pub fn quests(&self) -> &[QuestTemplate] {
        &self.quests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_caches_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "C fell into a bog").unwrap();
        writeln!(f, "G found a four-leaf clover").unwrap();
        writeln!(f, "Q 1 slay the dragon of the north").unwrap();
        writeln!(f, "Q 2 10 20 30 40 carry the relic home").unwrap();
        writeln!(f, "X ignored line").unwrap();
        writeln!(f).unwrap();
        drop(f);

        let mut table = EventTable::new();
        assert!(table.refresh(&path).unwrap());
        assert_eq!(table.calamities(), ["fell into a bog"]);
        assert_eq!(table.godsends(), ["found a four-leaf clover"]);
        assert_eq!(table.quests().len(), 2);

        // Unchanged mtime short-circuits.
        assert!(!table.refresh(&path).unwrap());
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut table = EventTable::new();
        assert!(table.refresh(Path::new("/nonexistent/events.txt")).is_err());
    }
}
