//! Player persistence.
//!
//! Two backends share one trait: the classic tab-delimited flat file
//! (with a sidecar quest file and an append-only history log) and a
//! sqlite database. [`GameDb`] wraps whichever backend is configured and
//! keeps the in-memory player map.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::error::{DallyError, Result};
use crate::game::player::{
    item_code, item_name_for_code, Alignment, Item, ItemSlot, Player,
};
use crate::game::quest::{Quest, QuestMode};

// Flat-file column order. The ten item columns are not in ItemSlot::ALL
// order; this is the order the file format has always used.
const FILE_ITEM_SLOTS: [ItemSlot; 10] = [
    ItemSlot::Amulet,
    ItemSlot::Charm,
    ItemSlot::Helm,
    ItemSlot::Boots,
    ItemSlot::Gloves,
    ItemSlot::Ring,
    ItemSlot::Leggings,
    ItemSlot::Shield,
    ItemSlot::Tunic,
    ItemSlot::Weapon,
];

const FILE_FIELDS: [&str; 32] = [
    "username", "pass", "is admin", "level", "class", "next ttl", "nick",
    "userhost", "online", "idled", "x pos", "y pos", "pen mesg", "pen nick",
    "pen part", "pen kick", "pen quit", "pen quest", "pen logout",
    "creation time", "last login", "amulet", "charm", "helm", "boots",
    "gloves", "ring", "leggings", "shield", "tunic", "weapon", "alignment",
];

/// A persistence backend for players, quests, and game history.
pub trait GameStorage: Send {
    /// Does the underlying store exist yet?
    fn exists(&self) -> bool;
    /// Create an empty store.
    fn create(&mut self) -> Result<()>;
    /// Copy the store into the backup directory with a timestamped name.
    fn backup(&mut self) -> Result<()>;
    /// Read every player.
    fn readall(&mut self) -> Result<Vec<Player>>;
    /// Persist players. `changed` names what actually moved; `all` is the
    /// full roster for backends that rewrite the world.
    fn write(&mut self, changed: &[&Player], all: &[&Player]) -> Result<()>;
    fn new_player(&mut self, player: &Player, all: &[&Player]) -> Result<()>;
    fn rename_player(&mut self, old: &str, new: &str, all: &[&Player]) -> Result<()>;
    fn delete_player(&mut self, name: &str, all: &[&Player]) -> Result<()>;
    /// Append a line to the game history log.
    fn add_history(&mut self, players: &[&str], text: &str) -> Result<()>;
    fn read_quest(&mut self) -> Result<Option<Quest>>;
    fn update_quest(&mut self, quest: Option<&Quest>) -> Result<()>;
}

// === FLAT FILE ===

/// The tab-delimited flat-file store, compatible with the venerable
/// idlerpg format.
pub struct IdleRpgStore {
    db_path: PathBuf,
    quest_path: PathBuf,
    mods_path: PathBuf,
    backup_dir: PathBuf,
    write_quest_file: bool,
}

impl IdleRpgStore {
    pub fn new(conf: &Config) -> IdleRpgStore {
        IdleRpgStore {
            db_path: conf.data_path(&conf.dbfile),
            quest_path: conf.data_path(&conf.questfilename),
            mods_path: conf.data_path("modifiers.txt"),
            backup_dir: conf.data_path(&conf.backupdir),
            write_quest_file: conf.writequestfile,
        }
    }

    fn write_lines(&self, players: &[&Player]) -> Result<()> {
        let tmp = self.db_path.with_extension("tmp");
        {
            let mut out = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
            writeln!(out, "# {}", FILE_FIELDS.join("\t"))?;
            for p in players {
                writeln!(out, "{}", player_to_line(p))?;
            }
            out.flush()?;
        }
        std::fs::rename(&tmp, &self.db_path)?;
        Ok(())
    }
}

fn bool01(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

fn item_field(p: &Player, slot: ItemSlot) -> String {
    match p.items.get(&slot) {
        Some(item) => match item_code(&item.name) {
            Some(code) => format!("{}{}", item.level, code),
            None => item.level.to_string(),
        },
        None => "0".to_string(),
    }
}

fn player_to_line(p: &Player) -> String {
    let mut fields: Vec<String> = Vec::with_capacity(FILE_FIELDS.len());
    fields.push(p.name.clone());
    fields.push(p.pw.clone());
    fields.push(bool01(p.isadmin).to_string());
    fields.push(p.level.to_string());
    fields.push(p.class.clone());
    fields.push(p.nextlvl.to_string());
    fields.push(p.nick.clone());
    fields.push(p.userhost.clone());
    fields.push(bool01(p.online).to_string());
    fields.push(p.idled.to_string());
    fields.push(p.posx.to_string());
    fields.push(p.posy.to_string());
    fields.push(p.penmessage.to_string());
    fields.push(p.pennick.to_string());
    fields.push(p.penpart.to_string());
    fields.push(p.penkick.to_string());
    // The format has no dropped-connection column; it rides along with
    // quit penalties.
    fields.push((p.penquit + p.pendropped).to_string());
    fields.push(p.penquest.to_string());
    fields.push(p.penlogout.to_string());
    fields.push(p.created.timestamp().to_string());
    fields.push(p.lastlogin.timestamp().to_string());
    for slot in FILE_ITEM_SLOTS {
        fields.push(item_field(p, slot));
    }
    fields.push(p.alignment.as_char().to_string());
    fields.join("\t")
}

fn parse_int<T: std::str::FromStr>(field: &str, what: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| DallyError::Store(format!("bad {what} field '{field}'")))
}

fn parse_time(field: &str, what: &str) -> Result<DateTime<Utc>> {
    // Old files may carry float timestamps.
    let secs: f64 = parse_int(field, what)?;
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .ok_or_else(|| DallyError::Store(format!("bad {what} field '{field}'")))
}

fn parse_item_field(field: &str, what: &str) -> Result<Option<Item>> {
    let split = field
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(field.len());
    let (digits, code) = field.split_at(split);
    let level: i64 = parse_int(digits, what)?;
    if level == 0 {
        return Ok(None);
    }
    let name = match code.chars().next() {
        Some(c) => item_name_for_code(c)
            .ok_or_else(|| DallyError::Store(format!("bad {what} item code '{field}'")))?,
        None => "",
    };
    Ok(Some(Item::new(level, name)))
}

fn line_to_player(line: &str) -> Result<Player> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != FILE_FIELDS.len() {
        return Err(DallyError::Store(format!(
            "player record has {} fields, expected {}",
            fields.len(),
            FILE_FIELDS.len()
        )));
    }
    let mut items = HashMap::new();
    for (i, slot) in FILE_ITEM_SLOTS.iter().enumerate() {
        if let Some(item) = parse_item_field(fields[21 + i], slot.as_str())? {
            items.insert(*slot, item);
        }
    }
    let alignment = fields[31]
        .chars()
        .next()
        .and_then(Alignment::from_char)
        .ok_or_else(|| DallyError::Store(format!("bad alignment '{}'", fields[31])))?;
    Ok(Player {
        name: fields[0].to_string(),
        pw: fields[1].to_string(),
        isadmin: fields[2] == "1",
        level: parse_int(fields[3], "level")?,
        class: fields[4].to_string(),
        nextlvl: parse_int(fields[5], "next ttl")?,
        nick: fields[6].to_string(),
        userhost: fields[7].to_string(),
        online: fields[8] == "1",
        idled: parse_int(fields[9], "idled")?,
        posx: parse_int(fields[10], "x pos")?,
        posy: parse_int(fields[11], "y pos")?,
        penmessage: parse_int(fields[12], "pen mesg")?,
        pennick: parse_int(fields[13], "pen nick")?,
        penpart: parse_int(fields[14], "pen part")?,
        penkick: parse_int(fields[15], "pen kick")?,
        penquit: parse_int(fields[16], "pen quit")?,
        pendropped: 0,
        penquest: parse_int(fields[17], "pen quest")?,
        penlogout: parse_int(fields[18], "pen logout")?,
        created: parse_time(fields[19], "creation time")?,
        lastlogin: parse_time(fields[20], "last login")?,
        alignment,
        items,
    })
}

impl GameStorage for IdleRpgStore {
    fn exists(&self) -> bool {
        self.db_path.exists()
    }

    fn create(&mut self) -> Result<()> {
        self.write_lines(&[])?;
        info!("created player db at {}", self.db_path.display());
        Ok(())
    }

    fn backup(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.backup_dir)?;
        let stamp = Utc::now().format("%Y-%m-%d-%H:%M:%S");
        let name = self
            .db_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("players.db");
        std::fs::copy(&self.db_path, self.backup_dir.join(format!("{name}.{stamp}")))?;
        Ok(())
    }

    fn readall(&mut self) -> Result<Vec<Player>> {
        let text = std::fs::read_to_string(&self.db_path)?;
        let mut players = Vec::new();
        for line in text.lines() {
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            players.push(line_to_player(line)?);
        }
        Ok(players)
    }

    fn write(&mut self, _changed: &[&Player], all: &[&Player]) -> Result<()> {
        self.write_lines(all)
    }

    fn new_player(&mut self, _player: &Player, all: &[&Player]) -> Result<()> {
        self.write_lines(all)
    }

    fn rename_player(&mut self, _old: &str, _new: &str, all: &[&Player]) -> Result<()> {
        self.write_lines(all)
    }

    fn delete_player(&mut self, _name: &str, all: &[&Player]) -> Result<()> {
        self.write_lines(all)
    }

    fn add_history(&mut self, _players: &[&str], text: &str) -> Result<()> {
        let mut out = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.mods_path)?;
        writeln!(out, "[{}] {}", Utc::now().format("%m/%d/%y %H:%M:%S"), text)?;
        Ok(())
    }

    fn read_quest(&mut self) -> Result<Option<Quest>> {
        let text = match std::fs::read_to_string(&self.quest_path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        parse_quest_file(&text)
    }

    fn update_quest(&mut self, quest: Option<&Quest>) -> Result<()> {
        if !self.write_quest_file {
            return Ok(());
        }
        let mut out = std::io::BufWriter::new(std::fs::File::create(&self.quest_path)?);
        if let Some(q) = quest {
            writeln!(out, "T {}", q.text)?;
            match &q.mode {
                QuestMode::Timed { end } => {
                    writeln!(out, "Y 1")?;
                    writeln!(out, "S {end}")?;
                }
                QuestMode::Waypoint { dests, stage } => {
                    writeln!(out, "Y 2")?;
                    writeln!(out, "S {stage}")?;
                    let coords: Vec<String> = dests
                        .iter()
                        .flat_map(|(x, y)| [x.to_string(), y.to_string()])
                        .collect();
                    writeln!(out, "P {}", coords.join(" "))?;
                }
            }
            for (i, name) in q.questors.iter().enumerate() {
                writeln!(out, "P{} {}", i + 1, name)?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

fn parse_quest_file(text: &str) -> Result<Option<Quest>> {
    let mut tags: HashMap<&str, &str> = HashMap::new();
    for line in text.lines() {
        if let Some((tag, rest)) = line.split_once(' ') {
            tags.insert(tag, rest.trim());
        }
    }
    let (Some(text), Some(mode)) = (tags.get("T"), tags.get("Y")) else {
        return Ok(None);
    };
    let mut questors = Vec::new();
    for tag in ["P1", "P2", "P3", "P4"] {
        match tags.get(tag) {
            Some(name) => questors.push(name.to_string()),
            None => return Ok(None),
        }
    }
    let stage_field = tags
        .get("S")
        .ok_or_else(|| DallyError::Store("quest file missing S line".into()))?;
    let mode = match *mode {
        "1" => QuestMode::Timed { end: parse_int(stage_field, "quest time")? },
        "2" => {
            let coords: Vec<i32> = tags
                .get("P")
                .ok_or_else(|| DallyError::Store("quest file missing P line".into()))?
                .split_whitespace()
                .map(|w| parse_int(w, "quest coordinate"))
                .collect::<Result<_>>()?;
            if coords.len() != 4 {
                return Err(DallyError::Store("quest file needs four coordinates".into()));
            }
            QuestMode::Waypoint {
                dests: vec![(coords[0], coords[1]), (coords[2], coords[3])],
                stage: parse_int(stage_field, "quest stage")?,
            }
        }
        other => {
            return Err(DallyError::Store(format!("bad quest mode '{other}'")));
        }
    };
    Ok(Some(Quest { questors, text: text.to_string(), mode }))
}

// === SQLITE ===

pub struct SqliteStore {
    db_path: PathBuf,
    backup_dir: PathBuf,
    conn: Option<Connection>,
}

impl SqliteStore {
    pub fn new(conf: &Config) -> SqliteStore {
        SqliteStore {
            db_path: conf.data_path(&conf.dbfile),
            backup_dir: conf.data_path(&conf.backupdir),
            conn: None,
        }
    }

    fn conn(&mut self) -> Result<&mut Connection> {
        if self.conn.is_none() {
            self.conn = Some(Connection::open(&self.db_path)?);
        }
        Ok(self.conn.as_mut().expect("connection just opened"))
    }

    fn upsert_player(tx: &rusqlite::Transaction<'_>, p: &Player) -> Result<()> {
        tx.execute(
            "REPLACE INTO player (username, pw, isadmin, level, class, nextlvl,
                 nick, userhost, online, idled, posx, posy,
                 penmessage, pennick, penpart, penkick, penquit, pendropped,
                 penquest, penlogout, created, lastlogin, alignment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                 ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                p.name,
                p.pw,
                p.isadmin,
                p.level,
                p.class,
                p.nextlvl,
                p.nick,
                p.userhost,
                p.online,
                p.idled,
                p.posx,
                p.posy,
                p.penmessage,
                p.pennick,
                p.penpart,
                p.penkick,
                p.penquit,
                p.pendropped,
                p.penquest,
                p.penlogout,
                p.created.timestamp(),
                p.lastlogin.timestamp(),
                p.alignment.as_char().to_string(),
            ],
        )?;
        tx.execute("DELETE FROM item WHERE username = ?1", params![p.name])?;
        for (slot, item) in &p.items {
            tx.execute(
                "INSERT INTO item (username, slot, level, name) VALUES (?1, ?2, ?3, ?4)",
                params![p.name, slot.as_str(), item.level, item.name],
            )?;
        }
        Ok(())
    }
}

impl GameStorage for SqliteStore {
    fn exists(&self) -> bool {
        self.db_path.exists()
    }

    fn create(&mut self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS player (
                 username TEXT PRIMARY KEY,
                 pw TEXT NOT NULL,
                 isadmin INTEGER NOT NULL,
                 level INTEGER NOT NULL,
                 class TEXT NOT NULL,
                 nextlvl INTEGER NOT NULL,
                 nick TEXT NOT NULL,
                 userhost TEXT NOT NULL,
                 online INTEGER NOT NULL,
                 idled INTEGER NOT NULL,
                 posx INTEGER NOT NULL,
                 posy INTEGER NOT NULL,
                 penmessage INTEGER NOT NULL,
                 pennick INTEGER NOT NULL,
                 penpart INTEGER NOT NULL,
                 penkick INTEGER NOT NULL,
                 penquit INTEGER NOT NULL,
                 pendropped INTEGER NOT NULL,
                 penquest INTEGER NOT NULL,
                 penlogout INTEGER NOT NULL,
                 created INTEGER NOT NULL,
                 lastlogin INTEGER NOT NULL,
                 alignment TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS item (
                 username TEXT NOT NULL,
                 slot TEXT NOT NULL,
                 level INTEGER NOT NULL,
                 name TEXT NOT NULL,
                 PRIMARY KEY (username, slot)
             );
             CREATE TABLE IF NOT EXISTS history (
                 id INTEGER PRIMARY KEY,
                 username TEXT NOT NULL,
                 time INTEGER NOT NULL,
                 text TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS quest (
                 singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
                 text TEXT NOT NULL,
                 mode INTEGER NOT NULL,
                 stage INTEGER NOT NULL,
                 dest1x INTEGER, dest1y INTEGER, dest2x INTEGER, dest2y INTEGER,
                 questor1 TEXT NOT NULL,
                 questor2 TEXT NOT NULL,
                 questor3 TEXT NOT NULL,
                 questor4 TEXT NOT NULL
             );",
        )?;
        info!("created sqlite player db at {}", self.db_path.display());
        Ok(())
    }

    fn backup(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.backup_dir)?;
        // Checkpoint so the file copy sees everything.
        self.conn()?.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        let stamp = Utc::now().format("%Y-%m-%d-%H:%M:%S");
        let name = self
            .db_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("players.db");
        std::fs::copy(&self.db_path, self.backup_dir.join(format!("{name}.{stamp}")))?;
        Ok(())
    }

    fn readall(&mut self) -> Result<Vec<Player>> {
        let conn = self.conn()?;
        let mut items: HashMap<String, HashMap<ItemSlot, Item>> = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT username, slot, level, name FROM item")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (user, slot, level, name) = row?;
                let Some(slot) = ItemSlot::from_str(&slot) else {
                    warn!("ignoring item in unknown slot '{slot}' for {user}");
                    continue;
                };
                items.entry(user).or_default().insert(slot, Item::new(level, &name));
            }
        }
        let mut stmt = conn.prepare(
            "SELECT username, pw, isadmin, level, class, nextlvl, nick, userhost,
                 online, idled, posx, posy, penmessage, pennick, penpart, penkick,
                 penquit, pendropped, penquest, penlogout, created, lastlogin,
                 alignment
             FROM player",
        )?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            Ok(Player {
                name: name.clone(),
                pw: row.get(1)?,
                isadmin: row.get(2)?,
                level: row.get(3)?,
                class: row.get(4)?,
                nextlvl: row.get(5)?,
                nick: row.get(6)?,
                userhost: row.get(7)?,
                online: row.get(8)?,
                idled: row.get(9)?,
                posx: row.get(10)?,
                posy: row.get(11)?,
                penmessage: row.get(12)?,
                pennick: row.get(13)?,
                penpart: row.get(14)?,
                penkick: row.get(15)?,
                penquit: row.get(16)?,
                pendropped: row.get(17)?,
                penquest: row.get(18)?,
                penlogout: row.get(19)?,
                created: Utc
                    .timestamp_opt(row.get::<_, i64>(20)?, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                lastlogin: Utc
                    .timestamp_opt(row.get::<_, i64>(21)?, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                alignment: row
                    .get::<_, String>(22)?
                    .chars()
                    .next()
                    .and_then(Alignment::from_char)
                    .unwrap_or(Alignment::Neutral),
                items: HashMap::new(),
            })
        })?;
        let mut players = Vec::new();
        for row in rows {
            let mut p = row?;
            if let Some(i) = items.remove(&p.name) {
                p.items = i;
            }
            players.push(p);
        }
        Ok(players)
    }

    fn write(&mut self, changed: &[&Player], _all: &[&Player]) -> Result<()> {
        let tx = self.conn()?.transaction()?;
        for p in changed {
            Self::upsert_player(&tx, p)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn new_player(&mut self, player: &Player, _all: &[&Player]) -> Result<()> {
        let tx = self.conn()?.transaction()?;
        Self::upsert_player(&tx, player)?;
        tx.commit()?;
        Ok(())
    }

    fn rename_player(&mut self, old: &str, new: &str, _all: &[&Player]) -> Result<()> {
        let tx = self.conn()?.transaction()?;
        tx.execute("UPDATE player SET username = ?1 WHERE username = ?2", params![new, old])?;
        tx.execute("UPDATE item SET username = ?1 WHERE username = ?2", params![new, old])?;
        tx.execute("UPDATE history SET username = ?1 WHERE username = ?2", params![new, old])?;
        tx.commit()?;
        Ok(())
    }

    fn delete_player(&mut self, name: &str, _all: &[&Player]) -> Result<()> {
        let tx = self.conn()?.transaction()?;
        tx.execute("DELETE FROM player WHERE username = ?1", params![name])?;
        tx.execute("DELETE FROM item WHERE username = ?1", params![name])?;
        tx.commit()?;
        Ok(())
    }

    fn add_history(&mut self, players: &[&str], text: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        let tx = self.conn()?.transaction()?;
        for name in players {
            tx.execute(
                "INSERT INTO history (username, time, text) VALUES (?1, ?2, ?3)",
                params![name, now, text],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read_quest(&mut self) -> Result<Option<Quest>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT text, mode, stage, dest1x, dest1y, dest2x, dest2y,
                 questor1, questor2, questor3, questor4
             FROM quest WHERE singleton = 1",
        )?;
        let mut rows = stmt.query([])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let text: String = row.get(0)?;
        let mode: i64 = row.get(1)?;
        let stage: i64 = row.get(2)?;
        let questors = vec![row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?];
        let mode = if mode == 1 {
            QuestMode::Timed { end: stage }
        } else {
            QuestMode::Waypoint {
                dests: vec![
                    (row.get(3)?, row.get(4)?),
                    (row.get(5)?, row.get(6)?),
                ],
                stage: stage as usize,
            }
        };
        Ok(Some(Quest { questors, text, mode }))
    }

    fn update_quest(&mut self, quest: Option<&Quest>) -> Result<()> {
        let conn = self.conn()?;
        match quest {
            None => {
                conn.execute("DELETE FROM quest WHERE singleton = 1", [])?;
            }
            Some(q) => {
                let (mode, stage, dests) = match &q.mode {
                    QuestMode::Timed { end } => (1i64, *end, None),
                    QuestMode::Waypoint { dests, stage } => {
                        (2i64, *stage as i64, Some((dests[0], dests[1])))
                    }
                };
                let (d1, d2) = dests.unwrap_or(((0, 0), (0, 0)));
                conn.execute(
                    "REPLACE INTO quest (singleton, text, mode, stage,
                         dest1x, dest1y, dest2x, dest2y,
                         questor1, questor2, questor3, questor4)
                     VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        q.text,
                        mode,
                        stage,
                        d1.0,
                        d1.1,
                        d2.0,
                        d2.1,
                        q.questors[0],
                        q.questors[1],
                        q.questors[2],
                        q.questors[3],
                    ],
                )?;
            }
        }
        Ok(())
    }
}

// === IN-MEMORY DB ===

/// The in-memory roster plus its backing store.
pub struct GameDb {
    store: Box<dyn GameStorage>,
    players: HashMap<String, Player>,
}

impl GameDb {
    pub fn new(store: Box<dyn GameStorage>) -> GameDb {
        GameDb { store, players: HashMap::new() }
    }

    /// Pick the backend named by `store_format` in the config.
    pub fn from_config(conf: &Config) -> GameDb {
        let store: Box<dyn GameStorage> = if conf.store_format == "sqlite" {
            Box::new(SqliteStore::new(conf))
        } else {
            Box::new(IdleRpgStore::new(conf))
        };
        GameDb::new(store)
    }

    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    pub fn create(&mut self) -> Result<()> {
        self.store.create()
    }

    pub fn backup(&mut self) -> Result<()> {
        self.store.backup()
    }

    pub fn load(&mut self) -> Result<()> {
        let players = self.store.readall()?;
        info!("loaded {} players", players.len());
        self.players = players.into_iter().map(|p| (p.name.clone(), p)).collect();
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.players.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.players.contains_key(name)
    }

    pub fn player(&self, name: &str) -> Result<&Player> {
        self.players
            .get(name)
            .ok_or_else(|| DallyError::UnknownPlayer(name.to_string()))
    }

    pub fn player_mut(&mut self, name: &str) -> Result<&mut Player> {
        self.players
            .get_mut(name)
            .ok_or_else(|| DallyError::UnknownPlayer(name.to_string()))
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Names of all online players, sorted for stable iteration.
    pub fn online_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .players
            .values()
            .filter(|p| p.online)
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    /// The online player using this nick, if any.
    pub fn player_by_nick(&self, nick: &str) -> Option<&Player> {
        self.players.values().find(|p| p.online && p.nick == nick)
    }

    /// The player whose last session matched this nick and userhost, for
    /// automatic re-login after reconnects and netsplits.
    pub fn player_by_userhost(&self, nick: &str, userhost: &str) -> Option<&Player> {
        self.players
            .values()
            .find(|p| p.nick == nick && p.userhost == userhost)
    }

    pub fn check_login(&self, name: &str, password: &str) -> bool {
        self.players
            .get(name)
            .map_or(false, |p| p.check_password(password))
    }

    pub fn new_player(&mut self, player: Player) -> Result<()> {
        let name = player.name.clone();
        self.players.insert(name.clone(), player);
        let all: Vec<&Player> = self.players.values().collect();
        let p = &self.players[&name];
        self.store.new_player(p, &all)
    }

    pub fn delete_player(&mut self, name: &str) -> Result<()> {
        if self.players.remove(name).is_none() {
            return Err(DallyError::UnknownPlayer(name.to_string()));
        }
        let all: Vec<&Player> = self.players.values().collect();
        self.store.delete_player(name, &all)
    }

    pub fn rename_player(&mut self, old: &str, new: &str) -> Result<()> {
        let mut p = self
            .players
            .remove(old)
            .ok_or_else(|| DallyError::UnknownPlayer(old.to_string()))?;
        p.name = new.to_string();
        self.players.insert(new.to_string(), p);
        let all: Vec<&Player> = self.players.values().collect();
        self.store.rename_player(old, new, &all)
    }

    /// Persist the named players.
    pub fn write_players(&mut self, names: &[&str]) -> Result<()> {
        let mut changed = Vec::with_capacity(names.len());
        for name in names {
            changed.push(
                self.players
                    .get(*name)
                    .ok_or_else(|| DallyError::UnknownPlayer(name.to_string()))?,
            );
        }
        let all: Vec<&Player> = self.players.values().collect();
        self.store.write(&changed, &all)
    }

    pub fn write_all(&mut self) -> Result<()> {
        let all: Vec<&Player> = self.players.values().collect();
        self.store.write(&all, &all)
    }

    /// Swap the items two players hold in one slot.
    pub fn swap_items(&mut self, a: &str, b: &str, slot: ItemSlot) -> Result<()> {
        let item_a = self.player(a)?.items.get(&slot).cloned();
        let item_b = self.player(b)?.items.get(&slot).cloned();
        let pa = self.player_mut(a)?;
        match item_b {
            Some(i) => {
                pa.items.insert(slot, i);
            }
            None => {
                pa.items.remove(&slot);
            }
        }
        let pb = self.player_mut(b)?;
        match item_a {
            Some(i) => {
                pb.items.insert(slot, i);
            }
            None => {
                pb.items.remove(&slot);
            }
        }
        Ok(())
    }

    /// Highest itemsum across all players. The landlord fights at this
    /// strength plus one.
    pub fn max_player_power(&self) -> i64 {
        self.players.values().map(|p| p.itemsum()).max().unwrap_or(0)
    }

    /// The top `n` players by level, ties broken by who is closer to
    /// leveling.
    pub fn top_players(&self, n: usize) -> Vec<&Player> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by_key(|p| (Reverse(p.level), p.nextlvl, p.name.clone()));
        players.truncate(n);
        players
    }

    /// Names of offline players whose last login is older than `cutoff`
    /// seconds before `now`.
    pub fn inactive_players(&self, now: i64, cutoff: i64) -> Vec<String> {
        let mut names: Vec<String> = self
            .players
            .values()
            .filter(|p| !p.online && now - p.lastlogin.timestamp() > cutoff)
            .map(|p| p.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn add_history(&mut self, players: &[&str], text: &str) -> Result<()> {
        self.store.add_history(players, text)
    }

    pub fn read_quest(&mut self) -> Result<Option<Quest>> {
        self.store.read_quest()
    }

    pub fn update_quest(&mut self, quest: Option<&Quest>) -> Result<()> {
        self.store.update_quest(quest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn conf_in(dir: &Path, format: &str) -> Config {
        let mut conf: Config = toml::from_str(
            r##"
            servers = ["irc.example.net:6697"]
            botnick = "dally"
            botchan = "#dally"
            "##,
        )
        .unwrap();
        conf.datadir = dir.to_path_buf();
        conf.store_format = format.to_string();
        conf
    }

    fn sample_player() -> Player {
        let mut p = Player::new("alice", "Crab Wrangler", "pw", 600).unwrap();
        p.level = 12;
        p.nextlvl = 3400;
        p.nick = "alice`".into();
        p.userhost = "alice`!al@example.com".into();
        p.online = true;
        p.idled = 5000;
        p.posx = 12;
        p.posy = 480;
        p.penquit = 40;
        p.pendropped = 20;
        p.alignment = Alignment::Evil;
        p.acquire_item(ItemSlot::Weapon, 50, "Jeff's Cluehammer of Doom");
        p.acquire_item(ItemSlot::Boots, 7, "");
        p
    }

    #[test]
    fn flat_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdleRpgStore::new(&conf_in(dir.path(), "idlerpg"));
        assert!(!store.exists());
        store.create().unwrap();
        assert!(store.exists());

        let p = sample_player();
        store.write(&[&p], &[&p]).unwrap();
        let back = store.readall().unwrap();
        assert_eq!(back.len(), 1);
        let b = &back[0];
        assert_eq!(b.name, "alice");
        assert_eq!(b.level, 12);
        assert_eq!(b.class, "Crab Wrangler");
        assert_eq!(b.alignment, Alignment::Evil);
        assert_eq!(b.item_level(ItemSlot::Weapon), 50);
        assert_eq!(b.item_name(ItemSlot::Weapon), "Jeff's Cluehammer of Doom");
        assert_eq!(b.item_level(ItemSlot::Boots), 7);
        assert_eq!(b.item_name(ItemSlot::Boots), "");
        assert_eq!(b.item_level(ItemSlot::Helm), 0);
        // Dropped-connection penalties fold into the quit column.
        assert_eq!(b.penquit, 60);
        assert_eq!(b.pendropped, 0);
        assert!(b.check_password("pw"));
    }

    #[test]
    fn flat_file_rejects_short_records() {
        let dir = tempfile::tempdir().unwrap();
        let conf = conf_in(dir.path(), "idlerpg");
        std::fs::write(conf.data_path(&conf.dbfile), "a\tb\tc\n").unwrap();
        let mut store = IdleRpgStore::new(&conf);
        assert!(store.readall().is_err());
    }

    #[test]
    fn quest_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = IdleRpgStore::new(&conf_in(dir.path(), "idlerpg"));
        assert_eq!(store.read_quest().unwrap(), None);

        let questors = vec!["a".to_string(), "b".into(), "c".into(), "d".into()];
        let timed = Quest {
            questors: questors.clone(),
            text: "seek the grail".into(),
            mode: QuestMode::Timed { end: 1_700_000_000 },
        };
        store.update_quest(Some(&timed)).unwrap();
        assert_eq!(store.read_quest().unwrap(), Some(timed));

        let walk = Quest {
            questors,
            text: "carry the relic".into(),
            mode: QuestMode::Waypoint { dests: vec![(400, 475), (480, 380)], stage: 2 },
        };
        store.update_quest(Some(&walk)).unwrap();
        assert_eq!(store.read_quest().unwrap(), Some(walk));

        store.update_quest(None).unwrap();
        assert_eq!(store.read_quest().unwrap(), None);
    }

    #[test]
    fn sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::new(&conf_in(dir.path(), "sqlite"));
        store.create().unwrap();

        let p = sample_player();
        store.new_player(&p, &[&p]).unwrap();
        let back = store.readall().unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].item_name(ItemSlot::Weapon), "Jeff's Cluehammer of Doom");
        assert_eq!(back[0].pendropped, 20);

        store.rename_player("alice", "bob", &[]).unwrap();
        let back = store.readall().unwrap();
        assert_eq!(back[0].name, "bob");

        store.add_history(&["bob"], "bob did a thing").unwrap();
        store.delete_player("bob", &[]).unwrap();
        assert!(store.readall().unwrap().is_empty());
    }

    #[test]
    fn sqlite_quest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::new(&conf_in(dir.path(), "sqlite"));
        store.create().unwrap();
        assert_eq!(store.read_quest().unwrap(), None);
        let q = Quest {
            questors: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            text: "slay the wyrm".into(),
            mode: QuestMode::Waypoint { dests: vec![(1, 2), (3, 4)], stage: 1 },
        };
        store.update_quest(Some(&q)).unwrap();
        assert_eq!(store.read_quest().unwrap(), Some(q));
        store.update_quest(None).unwrap();
        assert_eq!(store.read_quest().unwrap(), None);
    }

    #[test]
    fn db_rankings() {
        let dir = tempfile::tempdir().unwrap();
        let conf = conf_in(dir.path(), "idlerpg");
        let mut db = GameDb::from_config(&conf);
        db.create().unwrap();
        for (name, level, nextlvl, sum) in
            [("a", 10, 500, 30), ("b", 12, 900, 5), ("c", 12, 100, 80)]
        {
            let mut p = Player::new(name, "x", "pw", nextlvl).unwrap();
            p.level = level;
            p.acquire_item(ItemSlot::Charm, sum, "");
            db.new_player(p).unwrap();
        }
        let top: Vec<&str> = db.top_players(2).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(top, ["c", "b"]);
        assert_eq!(db.max_player_power(), 80);

        db.swap_items("a", "b", ItemSlot::Charm).unwrap();
        assert_eq!(db.player("a").unwrap().item_level(ItemSlot::Charm), 5);
        assert_eq!(db.player("b").unwrap().item_level(ItemSlot::Charm), 30);

        db.rename_player("c", "cc").unwrap();
        assert!(db.contains("cc"));
        db.delete_player("cc").unwrap();
        assert_eq!(db.count(), 2);

        // Survives a reload from disk.
        db.write_all().unwrap();
        let mut db2 = GameDb::from_config(&conf);
        db2.load().unwrap();
        assert_eq!(db2.count(), 2);
        assert_eq!(db2.player("b").unwrap().item_level(ItemSlot::Charm), 30);
    }
}
