//! Player characters and their equipment.

use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};

use crate::core::config::Config;
use crate::core::error::{DallyError, Result};

/// The ten equipment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemSlot {
    Ring,
    Amulet,
    Charm,
    Weapon,
    Helm,
    Tunic,
    Gloves,
    Leggings,
    Shield,
    Boots,
}

impl ItemSlot {
    pub const ALL: [ItemSlot; 10] = [
        ItemSlot::Ring,
        ItemSlot::Amulet,
        ItemSlot::Charm,
        ItemSlot::Weapon,
        ItemSlot::Helm,
        ItemSlot::Tunic,
        ItemSlot::Gloves,
        ItemSlot::Leggings,
        ItemSlot::Shield,
        ItemSlot::Boots,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSlot::Ring => "ring",
            ItemSlot::Amulet => "amulet",
            ItemSlot::Charm => "charm",
            ItemSlot::Weapon => "weapon",
            ItemSlot::Helm => "helm",
            ItemSlot::Tunic => "tunic",
            ItemSlot::Gloves => "gloves",
            ItemSlot::Leggings => "leggings",
            ItemSlot::Shield => "shield",
            ItemSlot::Boots => "boots",
        }
    }

    pub fn from_str(s: &str) -> Option<ItemSlot> {
        ItemSlot::ALL.iter().copied().find(|slot| slot.as_str() == s)
    }

    /// How the item reads in messages ("pair of boots", not "boots").
    pub fn desc(&self) -> &'static str {
        match self {
            ItemSlot::Gloves => "pair of gloves",
            ItemSlot::Leggings => "set of leggings",
            ItemSlot::Boots => "pair of boots",
            other => other.as_str(),
        }
    }
}

/// The unique artifacts. Each keeps its name through the flat-file store
/// via a single-letter suffix on the stored item level.
pub const ITEM_CODES: [(&str, char); 8] = [
    ("Mattt's Omniscience Grand Crown", 'a'),
    ("Res0's Protectorate Plate Mail", 'b'),
    ("Dwyn's Storm Magic Amulet", 'c'),
    ("Jotun's Fury Colossal Sword", 'd'),
    ("Drdink's Cane of Blind Rage", 'e'),
    ("Mrquick's Magical Boots of Swiftness", 'f'),
    ("Jeff's Cluehammer of Doom", 'g'),
    ("Juliet's Glorious Ring of Sparkliness", 'h'),
];

pub fn item_code(name: &str) -> Option<char> {
    ITEM_CODES.iter().find(|(n, _)| *n == name).map(|(_, c)| *c)
}

pub fn item_name_for_code(code: char) -> Option<&'static str> {
    ITEM_CODES.iter().find(|(_, c)| *c == code).map(|(n, _)| *n)
}

/// An item in a slot. Most items are anonymous; the special artifacts
/// carry a proper name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub level: i64,
    pub name: String,
}

impl Item {
    pub fn new(level: i64, name: &str) -> Item {
        Item { level, name: name.to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Good,
    Neutral,
    Evil,
}

impl Alignment {
    pub fn as_char(&self) -> char {
        match self {
            Alignment::Good => 'g',
            Alignment::Neutral => 'n',
            Alignment::Evil => 'e',
        }
    }

    pub fn from_char(c: char) -> Option<Alignment> {
        match c {
            'g' => Some(Alignment::Good),
            'n' => Some(Alignment::Neutral),
            'e' => Some(Alignment::Evil),
            _ => None,
        }
    }

    pub fn word(&self) -> &'static str {
        match self {
            Alignment::Good => "good",
            Alignment::Neutral => "neutral",
            Alignment::Evil => "evil",
        }
    }
}

/// Why a penalty was applied. Each kind has its own lifetime counter on
/// the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyKind {
    Message,
    Nick,
    Part,
    Kick,
    Quit,
    Dropped,
    Quest,
    Logout,
}

impl PenaltyKind {
    /// Base penalty seconds from the config.
    pub fn base(&self, cfg: &Config) -> i64 {
        match self {
            PenaltyKind::Message => cfg.penmessage,
            PenaltyKind::Nick => cfg.pennick,
            PenaltyKind::Part => cfg.penpart,
            PenaltyKind::Kick => cfg.penkick,
            PenaltyKind::Quit => cfg.penquit,
            PenaltyKind::Dropped => cfg.pendropped,
            PenaltyKind::Quest => cfg.penquest,
            PenaltyKind::Logout => cfg.penlogout,
        }
    }

    /// Description used in the penalty notice. Dropped connections and
    /// quits get no notice, since the recipient is gone.
    pub fn desc(&self) -> &'static str {
        match self {
            PenaltyKind::Message => "messaging",
            PenaltyKind::Nick => "changing nicks",
            PenaltyKind::Part => "parting",
            PenaltyKind::Kick => "being kicked",
            PenaltyKind::Quit => "quitting",
            PenaltyKind::Dropped => "dropped connection",
            PenaltyKind::Quest => "losing a quest",
            PenaltyKind::Logout => "LOGOUT command",
        }
    }
}

/// One registered character.
#[derive(Debug, Clone)]
pub struct Player {
    /// Account name, the primary key.
    pub name: String,
    /// Argon2 password hash.
    pub pw: String,
    /// Character class. Pure flavor.
    pub class: String,
    pub isadmin: bool,
    pub level: i32,
    /// Seconds of idling left until the next level. Penalties push it up;
    /// blessings may push it below zero until the next tick levels them.
    pub nextlvl: i64,
    pub online: bool,
    pub nick: String,
    /// Userhost when online, used for automatic re-login.
    pub userhost: String,
    /// Lifetime idled seconds.
    pub idled: i64,
    pub posx: i32,
    pub posy: i32,
    pub penmessage: i64,
    pub pennick: i64,
    pub penpart: i64,
    pub penkick: i64,
    pub penquit: i64,
    pub pendropped: i64,
    pub penquest: i64,
    pub penlogout: i64,
    pub created: DateTime<Utc>,
    pub lastlogin: DateTime<Utc>,
    pub alignment: Alignment,
    pub items: HashMap<ItemSlot, Item>,
}

impl Player {
    pub fn new(name: &str, class: &str, password: &str, nextlvl: i64) -> Result<Player> {
        let now = Utc::now();
        let mut p = Player {
            name: name.to_string(),
            pw: String::new(),
            class: class.to_string(),
            isadmin: false,
            level: 0,
            nextlvl,
            online: false,
            nick: String::new(),
            userhost: String::new(),
            idled: 0,
            posx: 0,
            posy: 0,
            penmessage: 0,
            pennick: 0,
            penpart: 0,
            penkick: 0,
            penquit: 0,
            pendropped: 0,
            penquest: 0,
            penlogout: 0,
            created: now,
            lastlogin: now,
            alignment: Alignment::Neutral,
            items: HashMap::new(),
        };
        p.set_password(password)?;
        Ok(p)
    }

    pub fn set_password(&mut self, password: &str) -> Result<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| DallyError::PasswordHash(e.to_string()))?;
        self.pw = hash.to_string();
        Ok(())
    }

    pub fn check_password(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.pw) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn item_level(&self, slot: ItemSlot) -> i64 {
        self.items.get(&slot).map_or(0, |i| i.level)
    }

    pub fn item_name(&self, slot: ItemSlot) -> &str {
        self.items.get(&slot).map_or("", |i| i.name.as_str())
    }

    pub fn acquire_item(&mut self, slot: ItemSlot, level: i64, name: &str) {
        self.items.insert(slot, Item::new(level, name));
    }

    /// Total power of all equipped items.
    pub fn itemsum(&self) -> i64 {
        self.items.values().map(|i| i.level).sum()
    }

    /// Item power adjusted for battle: good players get a boost, evil
    /// players a penalty.
    pub fn battleitemsum(&self, cfg: &Config) -> i64 {
        let sum = self.itemsum();
        match self.alignment {
            Alignment::Evil => sum * cfg.evil_battle_pct / 100,
            Alignment::Good => sum * cfg.good_battle_pct / 100,
            Alignment::Neutral => sum,
        }
    }

    /// Record a penalty of `amount` seconds against its lifetime counter
    /// and the level clock.
    pub fn add_penalty(&mut self, kind: PenaltyKind, amount: i64) {
        let counter = match kind {
            PenaltyKind::Message => &mut self.penmessage,
            PenaltyKind::Nick => &mut self.pennick,
            PenaltyKind::Part => &mut self.penpart,
            PenaltyKind::Kick => &mut self.penkick,
            PenaltyKind::Quit => &mut self.penquit,
            PenaltyKind::Dropped => &mut self.pendropped,
            PenaltyKind::Quest => &mut self.penquest,
            PenaltyKind::Logout => &mut self.penlogout,
        };
        *counter += amount;
        self.nextlvl += amount;
    }
}

/// Seconds of idling required to go from `level` to `level + 1`.
/// Exponential up to level 60, then linear, with `rpbase` scaling both
/// regimes.
pub fn level_time(cfg: &Config, level: i32) -> i64 {
    if level > 60 {
        (cfg.rpbase as f64 * (cfg.rpstep.powi(60) + 86_400.0 * (level - 60) as f64)) as i64
    } else {
        (cfg.rpbase as f64 * cfg.rpstep.powi(level)) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        toml::from_str(
            r##"
            servers = ["irc.example.net:6697"]
            botnick = "dally"
            botchan = "#dally"
            "##,
        )
        .unwrap()
    }

    #[test]
    fn password_round_trip() {
        let mut p = Player::new("alice", "Crab Wrangler", "hunter2", 600).unwrap();
        assert!(p.check_password("hunter2"));
        assert!(!p.check_password("hunter3"));
        p.set_password("s3cret").unwrap();
        assert!(p.check_password("s3cret"));
        assert!(!p.check_password("hunter2"));
    }

    #[test]
    fn battleitemsum_respects_alignment() {
        let cfg = cfg();
        let mut p = Player::new("a", "b", "c", 600).unwrap();
        p.acquire_item(ItemSlot::Amulet, 100, "");
        assert_eq!(p.battleitemsum(&cfg), 100);
        p.alignment = Alignment::Good;
        assert_eq!(p.battleitemsum(&cfg), 110);
        p.alignment = Alignment::Evil;
        assert_eq!(p.battleitemsum(&cfg), 90);
    }

    #[test]
    fn penalties_hit_counter_and_clock() {
        let mut p = Player::new("a", "b", "c", 600).unwrap();
        p.add_penalty(PenaltyKind::Nick, 30);
        p.add_penalty(PenaltyKind::Nick, 12);
        assert_eq!(p.pennick, 42);
        assert_eq!(p.nextlvl, 642);
    }

    #[test]
    fn level_curve_goes_linear_after_sixty() {
        let cfg = cfg();
        assert_eq!(level_time(&cfg, 0), 600);
        assert_eq!(level_time(&cfg, 1), (600.0 * 1.16f64) as i64);
        // rpbase scales the linear regime too: each level past 60 costs
        // rpbase extra days, not one.
        let l60 = level_time(&cfg, 60);
        assert_eq!(level_time(&cfg, 61), l60 + 600 * 86_400);
        assert_eq!(level_time(&cfg, 65), l60 + 5 * 600 * 86_400);
        assert_eq!(level_time(&cfg, 62) - level_time(&cfg, 61), 600 * 86_400);
    }

    #[test]
    fn slot_names_round_trip() {
        for slot in ItemSlot::ALL {
            assert_eq!(ItemSlot::from_str(slot.as_str()), Some(slot));
        }
        assert_eq!(ItemSlot::from_str("hat"), None);
        assert_eq!(ItemSlot::Gloves.desc(), "pair of gloves");
    }
}
