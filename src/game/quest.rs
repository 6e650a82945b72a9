//! Quest state.
//!
//! At most one quest runs at a time, with exactly four questors. Timed
//! quests complete on the clock; waypoint quests complete when all four
//! questors stand on each destination in turn.

/// How a quest completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestMode {
    Timed {
        /// Epoch seconds when the quest succeeds.
        end: i64,
    },
    Waypoint {
        dests: Vec<(i32, i32)>,
        /// 1-based index of the destination currently being walked to.
        stage: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quest {
    /// The four chosen player names.
    pub questors: Vec<String>,
    pub text: String,
    pub mode: QuestMode,
}

impl Quest {
    pub fn is_questor(&self, name: &str) -> bool {
        self.questors.iter().any(|q| q == name)
    }

    /// Current waypoint destination, if this is a waypoint quest with
    /// stages remaining.
    pub fn current_dest(&self) -> Option<(i32, i32)> {
        match &self.mode {
            QuestMode::Waypoint { dests, stage } => dests.get(stage - 1).copied(),
            QuestMode::Timed { .. } => None,
        }
    }
}

/// A quest template parsed from the events file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestTemplate {
    Timed(String),
    Waypoint { dests: Vec<(i32, i32)>, text: String },
}

/// Parse a quest line from the events file. Two shapes are accepted:
/// `1 <text>` for a timed quest and `2 <x1> <y1> <x2> <y2> <text>` for a
/// waypoint quest. Anything else is rejected.
pub fn parse_quest_template(line: &str) -> Option<QuestTemplate> {
    let mut parts = line.splitn(2, ' ');
    match parts.next()? {
        "1" => {
            let text = parts.next()?.trim();
            if text.is_empty() {
                return None;
            }
            Some(QuestTemplate::Timed(text.to_string()))
        }
        "2" => {
            let rest = parts.next()?;
            let mut words = rest.splitn(5, ' ');
            let mut coords = [0i32; 4];
            for c in coords.iter_mut() {
                *c = words.next()?.parse().ok()?;
            }
            let text = words.next()?.trim();
            if text.is_empty() {
                return None;
            }
            Some(QuestTemplate::Waypoint {
                dests: vec![(coords[0], coords[1]), (coords[2], coords[3])],
                text: text.to_string(),
            })
        }
        _ => None,
    }
}
