//! Bot configuration.
//!
//! Loaded once from a TOML file at startup. Admins can adjust a subset of
//! keys at runtime through the `config` chat command; every change swaps in
//! a fresh immutable snapshot behind [`ConfigHandle`], so running tasks keep
//! a consistent view until they next ask for one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::core::error::{DallyError, Result};

/// Everything tunable about the bot. Field names match the config file keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    // === CONNECTION ===
    /// Servers to try, as "host:port". Only the first is used per attempt.
    pub servers: Vec<String>,
    /// Preferred nick. May get a suffix if the nick is taken.
    pub botnick: String,
    #[serde(default = "default_botuser")]
    pub botuser: String,
    #[serde(default = "default_botrlnm")]
    pub botrlnm: String,
    /// The one channel the game runs in.
    pub botchan: String,
    /// User modes to set on ourselves after registration.
    #[serde(default)]
    pub botmodes: String,
    /// Raw line to send after joining when we don't have ops, with
    /// `%botnick%` substituted. Typically a services OP request.
    #[serde(default)]
    pub botopcmd: Option<String>,
    /// Raw line to send when our nick is taken, to reclaim it.
    #[serde(default)]
    pub botghostcmd: Option<String>,
    /// Server password. The BOTPASS environment variable overrides this.
    #[serde(default)]
    pub bot_password: Option<String>,
    #[serde(default = "default_true")]
    pub ssl: bool,
    #[serde(default = "default_true")]
    pub reconnect: bool,
    /// Seconds to wait between reconnect attempts.
    #[serde(default = "default_reconnect_wait")]
    pub reconnect_wait: u64,

    // === PRESENTATION ===
    #[serde(default)]
    pub helpurl: String,
    #[serde(default)]
    pub admincommurl: String,
    /// Name of the owner account. Always an admin, cannot be deleted.
    #[serde(default)]
    pub owner: String,
    /// Voice (+v) players when they log in, devoice on logout.
    #[serde(default = "default_true")]
    pub voiceonlogin: bool,
    #[serde(default = "default_true")]
    pub allowuserinfo: bool,
    #[serde(default = "default_true")]
    pub statuscmd: bool,

    // === ANTI-ABUSE ===
    /// Kickban advertisers when we have ops.
    #[serde(default = "default_true")]
    pub doban: bool,
    /// URL hosts that are fine to paste in the channel.
    #[serde(default)]
    pub okurls: Vec<String>,
    /// Seconds after joining during which a user can't be banned.
    #[serde(default = "default_bannable_time")]
    pub bannable_time: i64,

    // === THROTTLE ===
    #[serde(default = "default_true")]
    pub throttle: bool,
    /// Messages allowed per throttle period.
    #[serde(default = "default_throttle_rate")]
    pub throttle_rate: u32,
    /// Throttle period in seconds.
    #[serde(default = "default_throttle_period")]
    pub throttle_period: u64,
    /// Wrap outgoing channel/notice text at this many characters.
    #[serde(default = "default_message_wrap_len")]
    pub message_wrap_len: usize,

    // === NETSPLITS ===
    /// Treat quits that look like "server1 server2" as netsplits.
    #[serde(default = "default_true")]
    pub detectsplits: bool,
    /// Seconds to wait for a split user to return before penalizing.
    #[serde(default = "default_splitwait")]
    pub splitwait: i64,

    // === GAME PACING ===
    /// Seconds between game ticks.
    #[serde(default = "default_self_clock")]
    pub self_clock: i64,
    /// Map width.
    #[serde(default = "default_mapx")]
    pub mapx: i32,
    /// Map height.
    #[serde(default = "default_mapy")]
    pub mapy: i32,
    /// Seconds to reach level 1.
    #[serde(default = "default_rpbase")]
    pub rpbase: i64,
    /// Per-level multiplier on time-to-level.
    #[serde(default = "default_rpstep")]
    pub rpstep: f64,
    /// Per-level multiplier on penalties.
    #[serde(default = "default_rppenstep")]
    pub rppenstep: f64,
    /// Hard cap on any single penalty, in seconds. Zero means no cap.
    #[serde(default)]
    pub limitpen: i64,

    // === PENALTIES (base seconds; 0 disables that penalty) ===
    #[serde(default = "default_penquest")]
    pub penquest: i64,
    #[serde(default = "default_pennick")]
    pub pennick: i64,
    #[serde(default = "default_penmessage")]
    pub penmessage: i64,
    #[serde(default = "default_penpart")]
    pub penpart: i64,
    #[serde(default = "default_penkick")]
    pub penkick: i64,
    #[serde(default = "default_penquit")]
    pub penquit: i64,
    #[serde(default = "default_pendropped")]
    pub pendropped: i64,
    #[serde(default = "default_penlogout")]
    pub penlogout: i64,

    // === COMBAT ===
    /// Item sum percentage for good-aligned players in battle.
    #[serde(default = "default_good_battle_pct")]
    pub good_battle_pct: i64,
    /// Item sum percentage for evil-aligned players in battle.
    #[serde(default = "default_evil_battle_pct")]
    pub evil_battle_pct: i64,

    // === REGISTRATION ===
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
    #[serde(default = "default_max_class_len")]
    pub max_class_len: usize,

    // === QUESTS ===
    /// Minimum seconds between quests.
    #[serde(default = "default_quest_interval_min")]
    pub quest_interval_min: i64,
    /// Maximum seconds between quests.
    #[serde(default = "default_quest_interval_max")]
    pub quest_interval_max: i64,
    /// Minimum level to be picked for a quest.
    #[serde(default = "default_quest_min_level")]
    pub quest_min_level: i32,

    // === FILES ===
    /// Directory all relative paths below resolve against.
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,
    #[serde(default = "default_eventsfile")]
    pub eventsfile: String,
    #[serde(default = "default_dbfile")]
    pub dbfile: String,
    /// "idlerpg" for the tab-delimited flat file, "sqlite" for sqlite.
    #[serde(default = "default_store_format")]
    pub store_format: String,
    #[serde(default = "default_backupdir")]
    pub backupdir: String,
    #[serde(default = "default_questfile")]
    pub questfilename: String,
    #[serde(default = "default_true")]
    pub writequestfile: bool,
}

fn default_true() -> bool { true }
fn default_botuser() -> String { "dallyrpg".into() }
fn default_botrlnm() -> String { "Dally RPG Bot".into() }
fn default_reconnect_wait() -> u64 { 30 }
fn default_bannable_time() -> i64 { 86_400 }
fn default_throttle_rate() -> u32 { 4 }
fn default_throttle_period() -> u64 { 1 }
fn default_message_wrap_len() -> usize { 400 }
fn default_splitwait() -> i64 { 600 }
fn default_self_clock() -> i64 { 3 }
fn default_mapx() -> i32 { 700 }
fn default_mapy() -> i32 { 500 }
fn default_rpbase() -> i64 { 600 }
fn default_rpstep() -> f64 { 1.16 }
fn default_rppenstep() -> f64 { 1.14 }
fn default_penquest() -> i64 { 15 }
fn default_pennick() -> i64 { 30 }
fn default_penmessage() -> i64 { 1 }
fn default_penpart() -> i64 { 200 }
fn default_penkick() -> i64 { 250 }
fn default_penquit() -> i64 { 20 }
fn default_pendropped() -> i64 { 20 }
fn default_penlogout() -> i64 { 20 }
fn default_good_battle_pct() -> i64 { 110 }
fn default_evil_battle_pct() -> i64 { 90 }
fn default_max_name_len() -> usize { 16 }
fn default_max_class_len() -> usize { 30 }
fn default_quest_interval_min() -> i64 { 43_200 }
fn default_quest_interval_max() -> i64 { 86_400 }
fn default_quest_min_level() -> i32 { 24 }
fn default_datadir() -> PathBuf { PathBuf::from(".") }
fn default_eventsfile() -> String { "events.txt".into() }
fn default_dbfile() -> String { "dallyrpg.db".into() }
fn default_store_format() -> String { "idlerpg".into() }
fn default_backupdir() -> String { ".dbbackup".into() }
fn default_questfile() -> String { "questinfo.txt".into() }

impl Config {
    /// Keys readable through [`Config::get_key`].
    pub const KEYS: &'static [&'static str] = &[
        "servers", "botnick", "botchan", "helpurl", "admincommurl", "owner",
        "voiceonlogin", "allowuserinfo", "statuscmd", "doban", "okurls",
        "bannable_time", "throttle", "throttle_rate", "throttle_period",
        "message_wrap_len", "detectsplits", "splitwait", "self_clock", "mapx",
        "mapy", "rpbase", "rpstep", "rppenstep", "limitpen", "penquest",
        "pennick", "penmessage", "penpart", "penkick", "penquit", "pendropped",
        "penlogout", "good_battle_pct", "evil_battle_pct", "max_name_len",
        "max_class_len", "quest_interval_min", "quest_interval_max",
        "quest_min_level", "reconnect", "reconnect_wait", "store_format",
        "writequestfile",
    ];

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let mut conf: Config = toml::from_str(&text)?;
        // Relative file paths are relative to the config file.
        if conf.datadir.is_relative() {
            if let Some(parent) = path.parent() {
                conf.datadir = parent.join(&conf.datadir);
            }
        }
        conf.validate().map_err(DallyError::Config)?;
        Ok(conf)
    }

    /// Check internal consistency. Returns a human-readable complaint.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.servers.is_empty() {
            return Err("servers must list at least one host:port".into());
        }
        for s in &self.servers {
            let Some((_, port)) = s.rsplit_once(':') else {
                return Err(format!("server '{s}' is not host:port"));
            };
            if port.parse::<u16>().is_err() {
                return Err(format!("server '{s}' has a bad port"));
            }
        }
        if self.botnick.is_empty() {
            return Err("botnick must be set".into());
        }
        if !self.botchan.starts_with('#') {
            return Err("botchan must start with '#'".into());
        }
        if self.self_clock < 1 {
            return Err("self_clock must be at least 1".into());
        }
        if self.mapx < 1 || self.mapy < 1 {
            return Err("map dimensions must be positive".into());
        }
        if self.rpbase < 1 {
            return Err("rpbase must be positive".into());
        }
        if self.rpstep <= 1.0 || self.rppenstep <= 1.0 {
            return Err("rpstep and rppenstep must be greater than 1.0".into());
        }
        if self.throttle_rate == 0 || self.throttle_period == 0 {
            return Err("throttle_rate and throttle_period must be positive".into());
        }
        if self.quest_interval_min > self.quest_interval_max {
            return Err("quest_interval_min must not exceed quest_interval_max".into());
        }
        match self.store_format.as_str() {
            "idlerpg" | "sqlite" => {}
            other => return Err(format!("unknown store_format '{other}'")),
        }
        Ok(())
    }

    /// Resolve a configured file name against the data directory.
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.datadir.join(name)
    }

    /// Set a key from its string form. Only runtime-safe keys are settable.
    pub fn set_key(&mut self, key: &str, val: &str) -> std::result::Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, val: &str) -> std::result::Result<T, String> {
            val.parse().map_err(|_| format!("bad value '{val}' for {key}"))
        }
        match key {
            "helpurl" => self.helpurl = val.to_string(),
            "admincommurl" => self.admincommurl = val.to_string(),
            "botopcmd" => self.botopcmd = Some(val.to_string()),
            "botghostcmd" => self.botghostcmd = Some(val.to_string()),
            "voiceonlogin" => self.voiceonlogin = parse(key, val)?,
            "allowuserinfo" => self.allowuserinfo = parse(key, val)?,
            "statuscmd" => self.statuscmd = parse(key, val)?,
            "doban" => self.doban = parse(key, val)?,
            "okurls" => self.okurls = val.split_whitespace().map(String::from).collect(),
            "bannable_time" => self.bannable_time = parse(key, val)?,
            "throttle" => self.throttle = parse(key, val)?,
            "throttle_rate" => self.throttle_rate = parse(key, val)?,
            "throttle_period" => self.throttle_period = parse(key, val)?,
            "message_wrap_len" => self.message_wrap_len = parse(key, val)?,
            "detectsplits" => self.detectsplits = parse(key, val)?,
            "splitwait" => self.splitwait = parse(key, val)?,
            "limitpen" => self.limitpen = parse(key, val)?,
            "penquest" => self.penquest = parse(key, val)?,
            "pennick" => self.pennick = parse(key, val)?,
            "penmessage" => self.penmessage = parse(key, val)?,
            "penpart" => self.penpart = parse(key, val)?,
            "penkick" => self.penkick = parse(key, val)?,
            "penquit" => self.penquit = parse(key, val)?,
            "pendropped" => self.pendropped = parse(key, val)?,
            "penlogout" => self.penlogout = parse(key, val)?,
            "good_battle_pct" => self.good_battle_pct = parse(key, val)?,
            "evil_battle_pct" => self.evil_battle_pct = parse(key, val)?,
            "quest_interval_min" => self.quest_interval_min = parse(key, val)?,
            "quest_interval_max" => self.quest_interval_max = parse(key, val)?,
            "quest_min_level" => self.quest_min_level = parse(key, val)?,
            "reconnect" => self.reconnect = parse(key, val)?,
            "reconnect_wait" => self.reconnect_wait = parse(key, val)?,
            "writequestfile" => self.writequestfile = parse(key, val)?,
            _ => return Err(format!("{key} is not a settable config key")),
        }
        Ok(())
    }

    /// Fetch a key's current value as a string, for the `config` command.
    pub fn get_key(&self, key: &str) -> Option<String> {
        let v = match key {
            "servers" => self.servers.join(" "),
            "botnick" => self.botnick.clone(),
            "botchan" => self.botchan.clone(),
            "helpurl" => self.helpurl.clone(),
            "admincommurl" => self.admincommurl.clone(),
            "owner" => self.owner.clone(),
            "voiceonlogin" => self.voiceonlogin.to_string(),
            "allowuserinfo" => self.allowuserinfo.to_string(),
            "statuscmd" => self.statuscmd.to_string(),
            "doban" => self.doban.to_string(),
            "okurls" => self.okurls.join(" "),
            "bannable_time" => self.bannable_time.to_string(),
            "throttle" => self.throttle.to_string(),
            "throttle_rate" => self.throttle_rate.to_string(),
            "throttle_period" => self.throttle_period.to_string(),
            "message_wrap_len" => self.message_wrap_len.to_string(),
            "detectsplits" => self.detectsplits.to_string(),
            "splitwait" => self.splitwait.to_string(),
            "self_clock" => self.self_clock.to_string(),
            "mapx" => self.mapx.to_string(),
            "mapy" => self.mapy.to_string(),
            "rpbase" => self.rpbase.to_string(),
            "rpstep" => self.rpstep.to_string(),
            "rppenstep" => self.rppenstep.to_string(),
            "limitpen" => self.limitpen.to_string(),
            "penquest" => self.penquest.to_string(),
            "pennick" => self.pennick.to_string(),
            "penmessage" => self.penmessage.to_string(),
            "penpart" => self.penpart.to_string(),
            "penkick" => self.penkick.to_string(),
            "penquit" => self.penquit.to_string(),
            "pendropped" => self.pendropped.to_string(),
            "penlogout" => self.penlogout.to_string(),
            "good_battle_pct" => self.good_battle_pct.to_string(),
            "evil_battle_pct" => self.evil_battle_pct.to_string(),
            "max_name_len" => self.max_name_len.to_string(),
            "max_class_len" => self.max_class_len.to_string(),
            "quest_interval_min" => self.quest_interval_min.to_string(),
            "quest_interval_max" => self.quest_interval_max.to_string(),
            "quest_min_level" => self.quest_min_level.to_string(),
            "reconnect" => self.reconnect.to_string(),
            "reconnect_wait" => self.reconnect_wait.to_string(),
            "store_format" => self.store_format.clone(),
            "writequestfile" => self.writequestfile.to_string(),
            _ => return None,
        };
        Some(v)
    }

    /// Case-insensitive okurls host check.
    pub fn url_host_allowed(&self, host: &str) -> bool {
        let hosts: HashSet<String> = self.okurls.iter().map(|u| u.to_lowercase()).collect();
        hosts.contains(&host.to_lowercase())
    }
}

/// Shared, swappable view of the config.
///
/// `snapshot()` is cheap (one Arc clone); callers should take one snapshot
/// per logical operation rather than re-reading mid-flight.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(conf: Config) -> Self {
        ConfigHandle { inner: Arc::new(RwLock::new(Arc::new(conf))) }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Apply a mutation and publish the new snapshot.
    pub fn update<F: FnOnce(&mut Config)>(&self, f: F) {
        let mut guard = self.inner.write().expect("config lock poisoned");
        let mut conf = (**guard).clone();
        f(&mut conf);
        *guard = Arc::new(conf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str(
            r##"
            servers = ["irc.example.net:6697"]
            botnick = "dallyrpg"
            botchan = "#dallyrpg"
            "##,
        )
        .unwrap()
    }

    #[test]
    fn minimal_config_is_valid() {
        let conf = minimal();
        assert!(conf.validate().is_ok());
        assert_eq!(conf.throttle_rate, 4);
        assert_eq!(conf.rpbase, 600);
        assert!(conf.voiceonlogin);
    }

    #[test]
    fn bad_channel_rejected() {
        let mut conf = minimal();
        conf.botchan = "dallyrpg".into();
        assert!(conf.validate().is_err());
    }

    #[test]
    fn set_key_round_trips() {
        let mut conf = minimal();
        conf.set_key("throttle_rate", "9").unwrap();
        assert_eq!(conf.get_key("throttle_rate").unwrap(), "9");
        assert!(conf.set_key("botnick", "nope").is_err());
        assert!(conf.set_key("splitwait", "fast").is_err());
    }

    #[test]
    fn handle_updates_are_visible_to_new_snapshots() {
        let handle = ConfigHandle::new(minimal());
        let before = handle.snapshot();
        handle.update(|c| c.pennick = 99);
        assert_eq!(before.pennick, 30);
        assert_eq!(handle.snapshot().pennick, 99);
    }
}
