//! Chat command integration tests.
//!
//! Commands arrive as private messages, so everything here goes through
//! [`BotEvents::private_message`] with a fake connection.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use dallyrpg::core::config::{Config, ConfigHandle};
use dallyrpg::game::{Alignment, GameBot, GameDb, Player, RollKey, RollOverride};
use dallyrpg::irc::client::{BotEvents, ChannelUser, ClientCommands};

#[derive(Default)]
struct FakeIrc {
    users: HashMap<String, String>,
    has_ops: bool,
    chanmsgs: Vec<String>,
    notices: Vec<(String, String)>,
    quit_reason: Option<String>,
}

impl FakeIrc {
    fn join(&mut self, nick: &str) {
        self.users
            .insert(nick.to_string(), format!("{nick}!{nick}@host.example"));
    }

    fn channel_user(&self, nick: &str) -> ChannelUser {
        ChannelUser {
            nick: nick.to_string(),
            userhost: self.users[nick].clone(),
            modes: HashSet::new(),
            joined: 0,
        }
    }

    fn said(&self, needle: &str) -> bool {
        self.chanmsgs.iter().any(|m| m.contains(needle))
    }

    fn noticed(&self, nick: &str, needle: &str) -> bool {
        self.notices
            .iter()
            .any(|(n, m)| n == nick && m.contains(needle))
    }
}

impl ClientCommands for FakeIrc {
    fn chanmsg(&mut self, text: &str) {
        self.chanmsgs.push(text.to_string());
    }
    fn notice(&mut self, target: &str, text: &str) {
        self.notices.push((target.to_string(), text.to_string()));
    }
    fn grant_voice(&mut self, _nicks: &[String]) {}
    fn revoke_voice(&mut self, _nicks: &[String]) {}
    fn set_channel_voices(&mut self, _voiced: &HashSet<String>) {}
    fn writeq_len(&self) -> usize {
        0
    }
    fn writeq_bytes(&self) -> usize {
        0
    }
    fn clear_writeq(&mut self) {}
    fn bytes_sent(&self) -> u64 {
        2048
    }
    fn bytes_received(&self) -> u64 {
        4096
    }
    fn servername(&self) -> String {
        "irc.example.net".into()
    }
    fn user_exists(&self, nick: &str) -> bool {
        self.users.contains_key(nick)
    }
    fn nick_userhost(&self, nick: &str) -> Option<String> {
        self.users.get(nick).cloned()
    }
    fn match_user(&self, nick: &str, userhost: &str) -> bool {
        self.users.get(nick).is_some_and(|u| u == userhost)
    }
    fn is_bot_nick(&self, nick: &str) -> bool {
        nick == "dally"
    }
    fn bot_has_ops(&self) -> bool {
        self.has_ops
    }
    fn quit(&mut self, text: &str) {
        self.quit_reason = Some(text.to_string());
    }
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("dallyrpg.toml");
    std::fs::write(
        &path,
        r##"
servers = ["irc.example.net:6697"]
botnick = "dally"
botchan = "#dally"
owner = "alice"
helpurl = "https://example.com/help"
admincommurl = "https://example.com/admin"
datadir = "."
"##,
    )
    .unwrap();
    path
}

fn new_bot(dir: &Path) -> (GameBot, ConfigHandle) {
    std::fs::write(
        dir.join("events.txt"),
        "C fell into a ravine\nG found a four-leaf clover\nQ1 locate the ancient lost unicorn\n",
    )
    .unwrap();
    let path = write_config(dir);
    let conf = Config::load(&path).unwrap();
    let mut db = GameDb::from_config(&conf);
    db.create().unwrap();
    db.load().unwrap();
    let handle = ConfigHandle::new(conf);
    let bot = GameBot::new(handle.clone(), db, path).unwrap();
    (bot, handle)
}

fn add_player(bot: &mut GameBot, irc: &mut FakeIrc, name: &str, level: i32, nextlvl: i64) {
    irc.join(name);
    let mut p = Player::new(name, "Deep Sea Fisher", "hunter2", nextlvl).unwrap();
    p.level = level;
    p.online = true;
    p.nick = name.to_string();
    p.userhost = irc.users[name].clone();
    bot.db_mut().new_player(p).unwrap();
}

/// A ready bot with admin alice and regular player bob logged in.
fn standard_setup(dir: &Path) -> (GameBot, ConfigHandle, FakeIrc) {
    let mut irc = FakeIrc::default();
    let (mut bot, handle) = new_bot(dir);
    add_player(&mut bot, &mut irc, "alice", 30, 40_000);
    add_player(&mut bot, &mut irc, "bob", 0, 10_000);
    bot.db_mut().player_mut("alice").unwrap().isadmin = true;
    bot.connected();
    bot.ready(&mut irc);
    (bot, handle, irc)
}

#[test]
fn commands_are_gated_by_login_and_admin() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    irc.join("stranger");
    let stranger = irc.channel_user("stranger");
    bot.private_message(&mut irc, &stranger, "whoami");
    assert!(irc.noticed("stranger", "You are not logged in."));
    bot.private_message(&mut irc, &stranger, "die");
    assert!(irc.noticed("stranger", "You cannot do 'die'."));

    let bob = irc.channel_user("bob");
    bot.private_message(&mut irc, &bob, "die");
    assert!(irc.noticed("bob", "You cannot do 'die'."));

    let alice = irc.channel_user("alice");
    bot.private_message(&mut irc, &alice, "frobnicate");
    assert!(irc.noticed("alice", "'frobnicate' isn't actually a command."));
}

#[test]
fn help_lists_match_privilege() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    irc.join("stranger");
    let stranger = irc.channel_user("stranger");
    bot.private_message(&mut irc, &stranger, "help");
    assert!(irc.noticed("stranger", "help,info,login,register,quest,version"));
    assert!(irc.noticed("stranger", "For more information, see https://example.com/help."));

    let alice = irc.channel_user("alice");
    bot.private_message(&mut irc, &alice, "help");
    assert!(irc.noticed("alice", "admin help is at https://example.com/admin"));
    bot.private_message(&mut irc, &alice, "help align");
    assert!(irc.noticed("alice", "align good|neutral|evil"));
    bot.private_message(&mut irc, &alice, "help dance");
    assert!(irc.noticed("alice", "dance is not a command you can get help on."));
}

#[test]
fn register_creates_a_character() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    irc.join("newbie");
    bot.rng_mut()
        .set_override(RollKey::NewPlayerX, RollOverride::Int(5));
    bot.rng_mut()
        .set_override(RollKey::NewPlayerY, RollOverride::Int(7));

    let newbie = irc.channel_user("newbie");
    bot.private_message(&mut irc, &newbie, "register Artemis hunter2 Goddess of the Hunt");
    assert!(irc.said("Welcome newbie's new player Artemis, the Goddess of the Hunt!"));
    assert!(irc.noticed("newbie", "Success! Account Artemis created."));
    let p = bot.db().player("Artemis").unwrap();
    assert!(p.online);
    assert_eq!(p.level, 0);
    assert_eq!((p.posx, p.posy), (5, 7));
    assert!(p.check_password("hunter2"));
}

#[test]
fn register_rejects_bad_names() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    irc.join("newbie");
    let newbie = irc.channel_user("newbie");

    bot.private_message(&mut irc, &newbie, "register bob pw Copycat");
    assert!(irc.noticed("newbie", "Sorry, that character name is already in use."));
    std::thread::sleep(std::time::Duration::from_millis(1100));
    bot.private_message(&mut irc, &newbie, "register dally pw Impostor");
    assert!(irc.noticed("newbie", "That character name cannot be registered."));
    std::thread::sleep(std::time::Duration::from_millis(1100));
    bot.private_message(&mut irc, &newbie, "register #chan pw Channel");
    assert!(irc.noticed("newbie", "Sorry, character names may not start with #."));
    assert!(!bot.db().contains("#chan"));
}

#[test]
fn login_logout_round_trip() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let bob = irc.channel_user("bob");
    bot.private_message(&mut irc, &bob, "logout");
    assert!(irc.noticed("bob", "You have been logged out."));
    assert!(irc.noticed("bob", "for LOGOUT command"));
    {
        let p = bot.db().player("bob").unwrap();
        assert!(!p.online);
        assert_eq!(p.penlogout, 20);
    }

    bot.private_message(&mut irc, &bob, "login bob wrong");
    assert!(irc.noticed("bob", "Wrong password."));
    bot.private_message(&mut irc, &bob, "login ghost hunter2");
    assert!(irc.noticed("bob", "Sorry, no such account name."));
    bot.private_message(&mut irc, &bob, "login bob hunter2");
    assert!(irc.noticed("bob", "Logon successful."));
    assert!(irc.said("bob, the level 0 Deep Sea Fisher, is now online from nickname bob."));
    assert!(bot.db().player("bob").unwrap().online);

    bot.private_message(&mut irc, &bob, "login bob hunter2");
    assert!(irc.noticed("bob", "You are already online as bob"));
}

#[test]
fn align_whoami_and_status_report_the_character() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let bob = irc.channel_user("bob");

    bot.private_message(&mut irc, &bob, "align evil");
    assert!(irc.noticed("bob", "You have converted to evil"));
    assert_eq!(bot.db().player("bob").unwrap().alignment, Alignment::Evil);
    bot.private_message(&mut irc, &bob, "align sideways");
    assert!(irc.noticed("bob", "Try: ALIGN good|neutral|evil"));

    bot.private_message(&mut irc, &bob, "whoami");
    assert!(irc.noticed("bob", "You are bob, the level 0 Deep Sea Fisher."));

    bot.private_message(&mut irc, &bob, "status alice");
    assert!(irc.noticed("bob", "alice: Level 30 Deep Sea Fisher; Status: Online"));
    bot.private_message(&mut irc, &bob, "status ghost");
    assert!(irc.noticed("bob", "No such player 'ghost'."));
}

#[test]
fn newpass_and_removeme_require_the_password() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let bob = irc.channel_user("bob");

    bot.private_message(&mut irc, &bob, "newpass wrong s3cret");
    assert!(irc.noticed("bob", "Wrong password."));
    bot.private_message(&mut irc, &bob, "newpass hunter2 s3cret");
    assert!(irc.noticed("bob", "Your password was changed."));
    assert!(bot.db().check_login("bob", "s3cret"));

    bot.private_message(&mut irc, &bob, "removeme hunter2");
    assert!(bot.db().contains("bob"));
    bot.private_message(&mut irc, &bob, "removeme s3cret");
    assert!(irc.said("bob removed their account. bob, the level 0 Deep Sea Fisher is no more."));
    assert!(!bot.db().contains("bob"));
}

#[test]
fn info_shows_operational_detail_to_admins() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let bob = irc.channel_user("bob");
    bot.private_message(&mut irc, &bob, "info");
    assert!(irc.noticed("bob", "On via server: irc.example.net"));

    let alice = irc.channel_user("alice");
    bot.private_message(&mut irc, &alice, "info");
    assert!(irc.noticed("alice", "PAUSE_MODE is off, SILENT_MODE is off."));
    assert!(irc.noticed("alice", "2.00kiB sent, 4.00kiB received"));
    assert!(irc.noticed("alice", "Admin online: alice"));
}

#[test]
fn config_command_reads_searches_and_writes() {
    let dir = TempDir::new().unwrap();
    let (mut bot, handle, mut irc) = standard_setup(dir.path());
    let alice = irc.channel_user("alice");

    bot.private_message(&mut irc, &alice, "config botnick");
    assert!(irc.noticed("alice", "botnick dally"));
    bot.private_message(&mut irc, &alice, "config pennick");
    assert!(irc.noticed("alice", "pennick 30"));
    bot.private_message(&mut irc, &alice, "config interval");
    assert!(irc.noticed(
        "alice",
        "Matching config keys: quest_interval_min, quest_interval_max"
    ));

    bot.private_message(&mut irc, &alice, "config pennick 60");
    assert!(irc.noticed("alice", "pennick set to 60."));
    assert_eq!(handle.snapshot().pennick, 60);
    bot.private_message(&mut irc, &alice, "config pennick lots");
    assert!(irc.noticed("alice", "bad value 'lots' for pennick"));
    bot.private_message(&mut irc, &alice, "config botnick newnick");
    assert!(irc.noticed("alice", "botnick is not a settable config key"));
}

#[test]
fn admin_account_management() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let alice = irc.channel_user("alice");

    bot.private_message(&mut irc, &alice, "mkadmin bob");
    assert!(irc.noticed("alice", "bob is now an admin."));
    assert!(bot.db().player("bob").unwrap().isadmin);
    bot.private_message(&mut irc, &alice, "deladmin bob");
    assert!(irc.noticed("alice", "bob is no longer an admin."));
    // The owner can't lose admin.
    bot.private_message(&mut irc, &alice, "deladmin alice");
    assert!(irc.noticed("alice", "You can't do that."));

    bot.private_message(&mut irc, &alice, "chclass bob Turnip Farmer");
    assert!(irc.noticed("alice", "bob's character class is now 'Turnip Farmer'."));
    bot.private_message(&mut irc, &alice, "chuser bob robert");
    assert!(irc.noticed("alice", "bob is now known as robert."));
    assert!(bot.db().contains("robert"));

    bot.private_message(&mut irc, &alice, "delold 3");
    assert!(irc.noticed("alice", "That seems a bit low."));
    bot.private_message(&mut irc, &alice, "del robert");
    assert!(irc.noticed("alice", "robert has been deleted."));
    assert!(!bot.db().contains("robert"));
}

#[test]
fn push_moves_the_level_clock_with_a_floor() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let alice = irc.channel_user("alice");

    bot.private_message(&mut irc, &alice, "push bob 500");
    assert!(irc.said("alice has pushed bob 500 seconds towards level 1."));
    assert_eq!(bot.db().player("bob").unwrap().nextlvl, 9_500);

    bot.private_message(&mut irc, &alice, "push bob -500");
    assert!(irc.said("alice has pushed bob 500 seconds away from level 1."));
    assert_eq!(bot.db().player("bob").unwrap().nextlvl, 10_000);

    bot.private_message(&mut irc, &alice, "push bob 99999");
    assert!(irc.noticed("alice", "setting TTL to 0."));
    assert_eq!(bot.db().player("bob").unwrap().nextlvl, 0);

    bot.private_message(&mut irc, &alice, "push bob 0");
    assert!(irc.noticed("alice", "That would not be interesting."));
}

#[test]
fn silent_mode_gates_the_right_outputs() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let alice = irc.channel_user("alice");

    bot.private_message(&mut irc, &alice, "silent 1");
    assert!(irc.noticed("alice", "Channel output is silenced."));
    bot.private_message(&mut irc, &alice, "announce the gods are sleeping");
    assert!(!irc.said("the gods are sleeping"));

    bot.private_message(&mut irc, &alice, "silent 3");
    assert!(irc.noticed("alice", "Channel and private notice output are silenced."));
    irc.notices.clear();
    bot.private_message(&mut irc, &alice, "whoami");
    assert!(irc.notices.is_empty());

    bot.private_message(&mut irc, &alice, "silent 0");
    assert!(irc.noticed("alice", "Channels and notices are enabled."));
    bot.private_message(&mut irc, &alice, "announce the gods are awake");
    assert!(irc.said("the gods are awake"));
}

#[test]
fn pause_blocks_writes_and_gates_reloaddb() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let alice = irc.channel_user("alice");

    bot.private_message(&mut irc, &alice, "reloaddb");
    assert!(irc.noticed("alice", "ERROR: can only use RELOADDB while in PAUSE mode."));

    bot.private_message(&mut irc, &alice, "pause");
    assert!(irc.noticed("alice", "Pause mode enabled."));

    irc.join("newbie");
    let newbie = irc.channel_user("newbie");
    bot.private_message(&mut irc, &newbie, "register Late hunter2 Straggler");
    assert!(irc.noticed("newbie", "new accounts may not be registered"));
    assert!(!bot.db().contains("Late"));

    bot.private_message(&mut irc, &alice, "reloaddb");
    assert!(irc.noticed("alice", "Player database reloaded."));
    bot.private_message(&mut irc, &alice, "pause");
    assert!(irc.noticed("alice", "Pause mode disabled."));
}

#[test]
fn die_requests_shutdown() {
    let dir = TempDir::new().unwrap();
    let (mut bot, _handle, mut irc) = standard_setup(dir.path());
    let alice = irc.channel_user("alice");
    bot.private_message(&mut irc, &alice, "die");
    assert!(irc.noticed("alice", "Shutting down."));
    assert!(bot.shutdown_requested());
    assert_eq!(irc.quit_reason.as_deref(), Some("Shutting down for maintenance."));
}
