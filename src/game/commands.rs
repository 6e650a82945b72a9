//! The chat command surface.
//!
//! Commands arrive as private messages. Anyone can use the commands in
//! [`ALLOWALL`], logged-in players get [`ALLOWPLAYERS`] too, and
//! everything else requires an admin account.

use chrono::Utc;
use tracing::{debug, info};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::game::bot::GameBot;
use crate::game::player::{level_time, Alignment, PenaltyKind, Player};
use crate::game::quest::QuestMode;
use crate::game::rng::RollKey;
use crate::irc::client::{ChannelUser, ClientCommands};
use crate::util::{duration, plural};

pub const ALLOWALL: [&str; 6] = ["help", "info", "login", "register", "quest", "version"];
pub const ALLOWPLAYERS: [&str; 6] =
    ["align", "logout", "newpass", "removeme", "status", "whoami"];

const CMDHELP: [(&str, &str); 28] = [
    ("help", "help [<command>] - Display help on commands."),
    ("login", "login <account> <password> - Login to your account."),
    ("register", "register <account> <password> <character class> - Create a new character."),
    ("quest", "quest - Display the current quest, if any."),
    ("version", "Display the version of the bot."),
    ("align", "align good|neutral|evil - Change your character's alignment."),
    ("logout", "logout - Log out of your account.  You will be penalized!"),
    ("newpass", "newpass <old password> <new password> - Change your account's password."),
    ("removeme", "removeme <password> - Delete your character."),
    ("status", "status - Show bot status."),
    ("whoami", "whoami - Shows who you are logged in as."),
    ("announce", "announce - Sends a message to the channel."),
    ("backup", "backup - Backup the player db."),
    ("chclass", "chclass <account> <new class> - Change the character class of the account."),
    ("chpass", "chpass <account> <new password> - Change the password of the account."),
    ("chuser", "chuser <account> <new name> - Change the name of the account."),
    ("clearq", "clearq - Clear the sending queue of the bot."),
    ("config", "config <key search>|<key> <value> - View or set a configuration setting."),
    ("del", "del <account> - Delete the account."),
    ("deladmin", "deladmin <account> - Remove admin privileges from account."),
    ("delold", "delold <# of days> - Remove all accounts older than a number of days."),
    ("die", "die - Shut down the bot."),
    ("mkadmin", "mkadmin <account> - Grant admin privileges to the account."),
    ("pause", "pause - Toggle pause mode."),
    ("rehash", "rehash - Re-read the configuration file."),
    ("reloaddb", "reloaddb - Reload the player database."),
    ("silent", "silent <mode> - Sets silentmode to the given mode."),
    ("hog", "hog - Triggers the Hand of God."),
];

const CMDHELP_EXTRA: [(&str, &str); 2] = [
    ("push", "push <account> <seconds> - Adds seconds to the next level of account."),
    (
        "trigger",
        "trigger calamity|godsend|hog|teambattle|evilness|goodness|battle|quest - \
         Triggers the event.",
    ),
];

fn cmd_help_text(cmd: &str) -> Option<&'static str> {
    CMDHELP
        .iter()
        .chain(CMDHELP_EXTRA.iter())
        .find(|(c, _)| *c == cmd)
        .map(|(_, h)| *h)
}

fn all_command_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CMDHELP
        .iter()
        .chain(CMDHELP_EXTRA.iter())
        .map(|(c, _)| *c)
        .collect();
    names.sort_unstable();
    names
}

impl GameBot {
    /// Dispatch one private-message command.
    pub(crate) fn handle_command(
        &mut self,
        irc: &mut dyn ClientCommands,
        user: &ChannelUser,
        text: &str,
    ) {
        let (cmd, args) = match text.split_once(' ') {
            Some((c, a)) => (c.to_lowercase(), a.trim().to_string()),
            None => (text.to_lowercase(), String::new()),
        };
        let nick = user.nick.clone();
        let player = self.player_name_by_userhost(&user.userhost);

        if ALLOWPLAYERS.contains(&cmd.as_str()) {
            if player.is_none() {
                self.notice(irc, &nick, "You are not logged in.");
                return;
            }
        } else if !ALLOWALL.contains(&cmd.as_str()) {
            let is_admin = player
                .as_deref()
                .and_then(|n| self.db.player(n).ok())
                .map(|p| p.isadmin)
                .unwrap_or(false);
            if !is_admin {
                self.notice(irc, &nick, &format!("You cannot do '{cmd}'."));
                return;
            }
        }

        let player = player.as_deref();
        let result = match cmd.as_str() {
            "help" => self.cmd_help(irc, player, &nick, &args),
            "version" => self.cmd_version(irc, &nick),
            "info" => self.cmd_info(irc, player, &nick),
            "quest" => self.cmd_quest(irc, &nick),
            "login" => self.cmd_login(irc, player, &nick, &args),
            "register" => self.cmd_register(irc, player, &nick, &args),
            "align" => self.cmd_align(irc, player.expect("gated"), &nick, &args),
            "logout" => self.cmd_logout(irc, player.expect("gated"), &nick),
            "newpass" => self.cmd_newpass(irc, player.expect("gated"), &nick, &args),
            "removeme" => self.cmd_removeme(irc, player.expect("gated"), &nick, &args),
            "status" => self.cmd_status(irc, player.expect("gated"), &nick, &args),
            "whoami" => self.cmd_whoami(irc, player.expect("gated"), &nick),
            "announce" => {
                self.chanmsg(irc, &args);
                Ok(())
            }
            "backup" => self.cmd_backup(irc, &nick),
            "chclass" => self.cmd_chclass(irc, &nick, &args),
            "chpass" => self.cmd_chpass(irc, &nick, &args),
            "chuser" => self.cmd_chuser(irc, &nick, &args),
            "clearq" => {
                irc.clear_writeq();
                self.notice(irc, &nick, "Output queue cleared.");
                Ok(())
            }
            "config" => self.cmd_config(irc, &nick, &args),
            "del" => self.cmd_del(irc, &nick, &args),
            "deladmin" => self.cmd_deladmin(irc, &nick, &args),
            "delold" => self.cmd_delold(irc, player.expect("gated"), &nick, &args),
            "die" => self.cmd_die(irc, player.expect("gated"), &nick),
            "hog" => self.cmd_hog(irc, player.expect("gated")),
            "mkadmin" => self.cmd_mkadmin(irc, &nick, &args),
            "pause" => {
                self.pause = !self.pause;
                if self.pause {
                    self.notice(irc, &nick, "Pause mode enabled.");
                } else {
                    self.notice(irc, &nick, "Pause mode disabled.");
                }
                Ok(())
            }
            "push" => self.cmd_push(irc, player.expect("gated"), &nick, &args),
            "rehash" => self.cmd_rehash(irc, &nick),
            "reloaddb" => self.cmd_reloaddb(irc, &nick),
            "silent" => self.cmd_silent(irc, &nick, &args),
            "trigger" => self.cmd_trigger(irc, player.expect("gated"), &nick, &args),
            _ => {
                self.notice(irc, &nick, &format!("'{cmd}' isn't actually a command."));
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("command '{cmd}' from {nick} failed: {e}");
            self.notice(irc, &nick, "Something went wrong running that command.");
        }
    }

    fn cmd_help(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: Option<&str>,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        if !args.is_empty() {
            match cmd_help_text(args) {
                Some(help) => self.notice(irc, nick, help),
                None => {
                    self.notice(irc, nick, &format!("{args} is not a command you can get help on."))
                }
            }
            return Ok(());
        }
        let is_admin = player
            .and_then(|n| self.db.player(n).ok())
            .map(|p| p.isadmin)
            .unwrap_or(false);
        if is_admin {
            self.notice(
                irc,
                nick,
                &format!("Available commands: {}", all_command_names().join(",")),
            );
            self.notice(
                irc,
                nick,
                &format!(
                    "Player help is at {} ; admin help is at {}",
                    cfg.helpurl, cfg.admincommurl
                ),
            );
        } else {
            let cmds: Vec<&str> = if player.is_some() {
                ALLOWALL.iter().chain(ALLOWPLAYERS.iter()).copied().collect()
            } else {
                ALLOWALL.to_vec()
            };
            self.notice(irc, nick, &format!("Available commands: {}", cmds.join(",")));
            self.notice(irc, nick, &format!("For more information, see {}.", cfg.helpurl));
        }
        Ok(())
    }

    fn cmd_version(&mut self, irc: &mut dyn ClientCommands, nick: &str) -> Result<()> {
        self.notice(irc, nick, concat!("DallyRPG v", env!("CARGO_PKG_VERSION")));
        Ok(())
    }

    fn cmd_info(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: Option<&str>,
        nick: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        let mut admins: Vec<String> = self
            .db
            .players()
            .filter(|p| p.online && p.isadmin)
            .map(|p| p.name.clone())
            .collect();
        admins.sort();
        let admin_notice = if admins.is_empty() {
            "No admins online.".to_string()
        } else {
            format!("Admin{} online: {}", plural(admins.len() as i64), admins.join(", "))
        };
        let is_admin = player
            .and_then(|n| self.db.player(n).ok())
            .map(|p| p.isadmin)
            .unwrap_or(false);
        if !is_admin {
            if cfg.allowuserinfo {
                let text = format!(
                    "DallyRPG v{}, On via server: {}. {admin_notice}",
                    env!("CARGO_PKG_VERSION"),
                    irc.servername()
                );
                self.notice(irc, nick, &text);
            } else {
                self.notice(irc, nick, "You cannot do 'info'.");
            }
            return Ok(());
        }

        let online_count = self.db.online_names().len() as i64;
        let q_msgs = irc.writeq_len() as i64;
        let q_bytes = irc.writeq_bytes() as i64;
        let silent_mode = match (self.silence.chanmsgs, self.silence.notices) {
            (false, false) => "off",
            (true, false) => "chanmsgs",
            (false, true) => "notices",
            (true, true) => "chanmsgs,notices",
        };
        let uptime = Utc::now().timestamp() - self.start_time;
        let text = format!(
            "{:.2}kiB sent, {:.2}kiB received in {}. \
             {online_count} player{} online of {} total users. \
             {} account{} created since startup. \
             PAUSE_MODE is {}, SILENT_MODE is {silent_mode}. \
             Outgoing queue is {q_bytes} byte{} in {q_msgs} item{}. \
             On via: {}. {admin_notice}",
            irc.bytes_sent() as f64 / 1024.0,
            irc.bytes_received() as f64 / 1024.0,
            duration(uptime),
            plural(online_count),
            self.db.count(),
            self.new_accounts,
            plural(self.new_accounts as i64),
            if self.pause { "on" } else { "off" },
            plural(q_bytes),
            plural(q_msgs),
            irc.servername()
        );
        self.notice(irc, nick, &text);
        Ok(())
    }

    fn cmd_quest(&mut self, irc: &mut dyn ClientCommands, nick: &str) -> Result<()> {
        let Some(quest) = self.quest.clone() else {
            self.notice(irc, nick, "There is no active quest.");
            return Ok(());
        };
        let qp = &quest.questors;
        match quest.mode {
            QuestMode::Timed { end } => {
                let left = end - Utc::now().timestamp();
                self.notice(
                    irc,
                    nick,
                    &format!(
                        "{}, {}, {}, and {} are on a quest to {}. Quest to complete in {}.",
                        qp[0],
                        qp[1],
                        qp[2],
                        qp[3],
                        quest.text,
                        duration(left)
                    ),
                );
            }
            QuestMode::Waypoint { ref dests, .. } => {
                self.notice(
                    irc,
                    nick,
                    &format!(
                        "{}, {}, {}, and {} are on a quest to {}. Participants must first \
                         reach ({}, {}), then ({}, {}).",
                        qp[0],
                        qp[1],
                        qp[2],
                        qp[3],
                        quest.text,
                        dests[0].0,
                        dests[0].1,
                        dests[1].0,
                        dests[1].1
                    ),
                );
            }
        }
        Ok(())
    }

    fn cmd_login(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: Option<&str>,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        if !irc.user_exists(nick) {
            self.notice(irc, nick, &format!("Sorry, you aren't on {}.", cfg.botchan));
            return Ok(());
        }
        if let Some(pname) = player {
            self.notice(irc, nick, &format!("You are already online as {pname}"));
            return Ok(());
        }
        let Some((pname, ppass)) = args.split_once(' ') else {
            self.notice(irc, nick, "Try: LOGIN <username> <password>");
            return Ok(());
        };
        if !self.db.contains(pname) {
            self.notice(
                irc,
                nick,
                "Sorry, no such account name.  Note that account names are case sensitive.",
            );
            return Ok(());
        }
        if !self.db.check_login(pname, ppass) {
            self.notice(irc, nick, "Wrong password.");
            return Ok(());
        }
        if cfg.voiceonlogin && irc.bot_has_ops() {
            irc.grant_voice(&[nick.to_string()]);
        }
        let userhost = irc.nick_userhost(nick).unwrap_or_default();
        let pname = pname.to_string();
        let (came_back, level, class, nextlvl) = {
            let p = self.db.player_mut(&pname)?;
            p.userhost = userhost;
            p.lastlogin = Utc::now();
            let came_back = p.online && p.nick == nick;
            p.online = true;
            p.nick = nick.to_string();
            (came_back, p.level, p.class.clone(), p.nextlvl)
        };
        if came_back {
            self.notice(
                irc,
                nick,
                &format!("Welcome back, {pname}. Next level in {}.", duration(nextlvl)),
            );
        } else {
            self.notice(
                irc,
                nick,
                &format!("Logon successful. Next level in {}.", duration(nextlvl)),
            );
            self.chanmsg(
                irc,
                &format!(
                    "{pname}, the level {level} {class}, is now online from nickname \
                     {nick}. Next level in {}.",
                    duration(nextlvl)
                ),
            );
        }
        self.save(&[&pname])
    }

    fn cmd_register(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: Option<&str>,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        if let Some(pname) = player {
            self.notice(irc, nick, &format!("Sorry, you are already online as {pname}"));
            return Ok(());
        }
        if !irc.user_exists(nick) {
            self.notice(irc, nick, &format!("Sorry, you aren't on {}", cfg.botchan));
            return Ok(());
        }
        if self.pause {
            self.notice(
                irc,
                nick,
                "Sorry, new accounts may not be registered while the bot is in pause \
                 mode; please wait a few minutes and try again.",
            );
            return Ok(());
        }
        let now = Utc::now().timestamp();
        if now - self.last_reg_time < 1 {
            self.notice(
                irc,
                nick,
                "Sorry, there have been too many registrations. Try again in a minute.",
            );
            return Ok(());
        }
        self.last_reg_time = now;

        let parts: Vec<&str> = args.splitn(3, ' ').collect();
        if parts.len() != 3 {
            self.notice(irc, nick, "Try: REGISTER <username> <password> <char class>");
            self.notice(irc, nick, "i.e. REGISTER Artemis MyPassword Goddess of the Hunt");
            return Ok(());
        }
        let (pname, ppass, pclass) = (parts[0], parts[1], parts[2]);
        if self.db.contains(pname) {
            self.notice(irc, nick, "Sorry, that character name is already in use.");
        } else if irc.is_bot_nick(pname) {
            self.notice(irc, nick, "That character name cannot be registered.");
        } else if pname.is_empty() || pname.len() > cfg.max_name_len {
            self.notice(
                irc,
                nick,
                &format!(
                    "Sorry, character names must be between 1 and {} characters long.",
                    cfg.max_name_len
                ),
            );
        } else if pclass.is_empty() || pclass.len() > cfg.max_class_len {
            self.notice(
                irc,
                nick,
                &format!(
                    "Sorry, character classes must be between 1 and {} characters long.",
                    cfg.max_class_len
                ),
            );
        } else if pname.starts_with('#') {
            self.notice(irc, nick, "Sorry, character names may not start with #.");
        } else if pname.chars().any(char::is_control) {
            self.notice(irc, nick, "Sorry, character names may not include control codes.");
        } else if pclass.chars().any(char::is_control) {
            self.notice(irc, nick, "Sorry, character classes may not include control codes.");
        } else {
            let mut p = Player::new(pname, pclass, ppass, level_time(&cfg, 0))?;
            p.online = true;
            p.nick = nick.to_string();
            p.userhost = irc.nick_userhost(nick).unwrap_or_default();
            p.posx = self.rng.int_between(RollKey::NewPlayerX, 0, cfg.mapx as i64 - 1) as i32;
            p.posy = self.rng.int_between(RollKey::NewPlayerY, 0, cfg.mapy as i64 - 1) as i32;
            let nextlvl = p.nextlvl;
            self.db.new_player(p)?;
            if cfg.voiceonlogin && irc.bot_has_ops() {
                irc.grant_voice(&[nick.to_string()]);
            }
            self.chanmsg(
                irc,
                &format!(
                    "Welcome {nick}'s new player {pname}, the {pclass}!  Next level in {}.",
                    duration(nextlvl)
                ),
            );
            self.notice(
                irc,
                nick,
                &format!(
                    "Success! Account {pname} created. You have {} seconds of idleness \
                     until you reach level 1.",
                    duration(nextlvl)
                ),
            );
            self.notice(
                irc,
                nick,
                "NOTE: The point of the game is to see who can idle the longest. As such, \
                 talking in the channel, parting, quitting, and changing nicks all \
                 penalize you.",
            );
            self.new_accounts += 1;
        }
        Ok(())
    }

    fn cmd_align(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let alignment = match args {
            "good" => Alignment::Good,
            "neutral" => Alignment::Neutral,
            "evil" => Alignment::Evil,
            _ => {
                self.notice(irc, nick, "Try: ALIGN good|neutral|evil");
                return Ok(());
            }
        };
        let player = player.to_string();
        self.db.player_mut(&player)?.alignment = alignment;
        self.notice(irc, nick, &format!("You have converted to {args}"));
        self.save(&[&player])
    }

    fn cmd_logout(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        self.notice(irc, nick, "You have been logged out.");
        let player = player.to_string();
        {
            let p = self.db.player_mut(&player)?;
            p.online = false;
            p.lastlogin = Utc::now();
        }
        self.save(&[&player])?;
        if cfg.voiceonlogin && irc.bot_has_ops() {
            irc.revoke_voice(&[nick.to_string()]);
        }
        self.penalize(irc, &player, PenaltyKind::Logout, None)
    }

    fn cmd_newpass(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let Some((old, new)) = args.split_once(' ') else {
            self.notice(irc, nick, "Try: NEWPASS <old password> <new password>");
            return Ok(());
        };
        if !self.db.check_login(player, old) {
            self.notice(irc, nick, "Wrong password.");
            return Ok(());
        }
        let player = player.to_string();
        self.db.player_mut(&player)?.set_password(new)?;
        self.save(&[&player])?;
        self.notice(irc, nick, "Your password was changed.");
        Ok(())
    }

    fn cmd_removeme(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        if args.is_empty() {
            self.notice(irc, nick, "Try: REMOVEME <password>");
            return Ok(());
        }
        if !self.db.check_login(player, args) {
            self.notice(irc, nick, "Wrong password.");
            return Ok(());
        }
        let (level, class) = {
            let p = self.db.player(player)?;
            (p.level, p.class.clone())
        };
        self.notice(irc, nick, &format!("Account {player} removed."));
        self.chanmsg(
            irc,
            &format!(
                "{nick} removed their account. {player}, the level {level} {class} is no more."
            ),
        );
        self.db.delete_player(player)?;
        if cfg.voiceonlogin && irc.bot_has_ops() {
            irc.revoke_voice(&[nick.to_string()]);
        }
        Ok(())
    }

    fn cmd_status(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        if !cfg.statuscmd {
            self.notice(irc, nick, "You cannot do 'status'.");
            return Ok(());
        }
        let target = if args.is_empty() { player } else { args };
        if !self.db.contains(target) {
            self.notice(irc, nick, &format!("No such player '{args}'."));
            return Ok(());
        }
        let p = self.db.player(target)?;
        let msg = format!(
            "{}: Level {} {}; Status: {}; TTL: {}; Idled: {}; Item sum: {}",
            p.name,
            p.level,
            p.class,
            if p.online { "Online" } else { "Offline" },
            duration(p.nextlvl),
            duration(p.idled),
            p.itemsum()
        );
        self.notice(irc, nick, &msg);
        Ok(())
    }

    fn cmd_whoami(&mut self, irc: &mut dyn ClientCommands, player: &str, nick: &str) -> Result<()> {
        let p = self.db.player(player)?;
        let msg = format!(
            "You are {}, the level {} {}. Next level in {}.",
            p.name,
            p.level,
            p.class,
            duration(p.nextlvl)
        );
        self.notice(irc, nick, &msg);
        Ok(())
    }

    fn cmd_backup(&mut self, irc: &mut dyn ClientCommands, nick: &str) -> Result<()> {
        self.db.backup()?;
        self.notice(irc, nick, "Player database backed up.");
        Ok(())
    }

    fn cmd_chclass(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        let cfg = self.conf.snapshot();
        let Some((account, class)) = args.split_once(' ') else {
            self.notice(irc, nick, "Try: CHCLASS <account> <new class>");
            return Ok(());
        };
        if !self.db.contains(account) {
            self.notice(irc, nick, &format!("{account} is not a valid account."));
        } else if class.is_empty() || class.len() > cfg.max_class_len {
            self.notice(
                irc,
                nick,
                &format!(
                    "Character classes must be between 1 and {} characters long.",
                    cfg.max_class_len
                ),
            );
        } else if class.chars().any(char::is_control) {
            self.notice(irc, nick, "Character classes may not include control codes.");
        } else {
            let account = account.to_string();
            self.db.player_mut(&account)?.class = class.to_string();
            self.save(&[&account])?;
            self.notice(irc, nick, &format!("{account}'s character class is now '{class}'."));
        }
        Ok(())
    }

    fn cmd_chpass(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        let Some((account, pass)) = args.split_once(' ') else {
            self.notice(irc, nick, "Try: CHPASS <account> <new password>");
            return Ok(());
        };
        if !self.db.contains(account) {
            self.notice(irc, nick, &format!("{account} is not a valid account."));
            return Ok(());
        }
        let account = account.to_string();
        self.db.player_mut(&account)?.set_password(pass)?;
        self.save(&[&account])?;
        self.notice(irc, nick, &format!("{account}'s password changed."));
        Ok(())
    }

    fn cmd_chuser(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        let cfg = self.conf.snapshot();
        let Some((old, new)) = args.split_once(' ') else {
            self.notice(irc, nick, "Try: CHUSER <account> <new account name>");
            return Ok(());
        };
        if !self.db.contains(old) {
            self.notice(irc, nick, &format!("{old} is not a valid account."));
        } else if self.db.contains(new) {
            self.notice(irc, nick, &format!("{new} is already taken."));
        } else if new.is_empty() || new.len() > cfg.max_name_len {
            self.notice(
                irc,
                nick,
                &format!(
                    "Character names must be between 1 and {} characters long.",
                    cfg.max_name_len
                ),
            );
        } else if new.starts_with('#') {
            self.notice(irc, nick, "Character names may not start with a #.");
        } else if new.chars().any(char::is_control) {
            self.notice(irc, nick, "Character names may not include control codes.");
        } else {
            self.db.rename_player(old, new)?;
            self.notice(irc, nick, &format!("{old} is now known as {new}."));
        }
        Ok(())
    }

    fn cmd_config(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        if args.is_empty() {
            self.notice(irc, nick, "Try: CONFIG <key search> or CONFIG <key> <value>");
            return Ok(());
        }
        let cfg = self.conf.snapshot();
        match args.split_once(' ') {
            None => {
                if let Some(val) = cfg.get_key(args) {
                    self.notice(irc, nick, &format!("{args} {val}"));
                } else {
                    let matching: Vec<&str> = Config::KEYS
                        .iter()
                        .filter(|k| k.contains(args))
                        .copied()
                        .collect();
                    self.notice(
                        irc,
                        nick,
                        &format!("Matching config keys: {}", matching.join(", ")),
                    );
                }
            }
            Some((key, val)) => {
                if cfg.get_key(key).is_none() {
                    self.notice(irc, nick, &format!("{key} is not a config key."));
                    return Ok(());
                }
                let mut probe = (*cfg).clone();
                if let Err(e) = probe.set_key(key, val) {
                    self.notice(irc, nick, &e);
                    return Ok(());
                }
                let (key, val) = (key.to_string(), val.to_string());
                self.conf.update(|c| {
                    // Already validated on the probe copy.
                    let _ = c.set_key(&key, &val);
                });
                self.notice(irc, nick, &format!("{key} set to {val}."));
            }
        }
        Ok(())
    }

    fn cmd_del(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        if !self.db.contains(args) {
            self.notice(irc, nick, &format!("{args} is not a valid account."));
            return Ok(());
        }
        self.db.delete_player(args)?;
        self.notice(irc, nick, &format!("{args} has been deleted."));
        Ok(())
    }

    fn cmd_deladmin(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        let cfg = self.conf.snapshot();
        if !self.db.contains(args) {
            self.notice(irc, nick, &format!("{args} is not a valid account."));
        } else if !self.db.player(args)?.isadmin {
            self.notice(irc, nick, &format!("{args} is already not an admin."));
        } else if args == cfg.owner {
            self.notice(irc, nick, "You can't do that.");
        } else {
            let account = args.to_string();
            self.db.player_mut(&account)?.isadmin = false;
            self.save(&[&account])?;
            self.notice(irc, nick, &format!("{account} is no longer an admin."));
        }
        Ok(())
    }

    fn cmd_mkadmin(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        if !self.db.contains(args) {
            self.notice(irc, nick, &format!("{args} is not a valid account."));
        } else if self.db.player(args)?.isadmin {
            self.notice(irc, nick, &format!("{args} is already an admin."));
        } else {
            let account = args.to_string();
            self.db.player_mut(&account)?.isadmin = true;
            self.save(&[&account])?;
            self.notice(irc, nick, &format!("{account} is now an admin."));
        }
        Ok(())
    }

    fn cmd_delold(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let Ok(days) = args.parse::<i64>() else {
            self.notice(irc, nick, "Try DELOLD <# of days>");
            return Ok(());
        };
        if days < 7 {
            self.notice(irc, nick, "That seems a bit low.");
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let old = self.db.inactive_players(now, days * 86_400);
        for name in &old {
            self.db.delete_player(name)?;
        }
        self.chanmsg(
            irc,
            &format!(
                "{} account{} not accessed in the last {days} days removed by {player}.",
                old.len(),
                plural(old.len() as i64)
            ),
        );
        Ok(())
    }

    fn cmd_die(&mut self, irc: &mut dyn ClientCommands, player: &str, nick: &str) -> Result<()> {
        self.notice(irc, nick, "Shutting down.");
        info!("{} (as {}) initiated shutdown", player, nick);
        self.shutdown = true;
        irc.quit("Shutting down for maintenance.");
        Ok(())
    }

    fn cmd_hog(&mut self, irc: &mut dyn ClientCommands, player: &str) -> Result<()> {
        self.chanmsg(irc, &format!("{player} has summoned the Hand of God."));
        self.hand_of_god(irc)
    }

    fn cmd_push(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        let parts: Vec<&str> = args.split(' ').collect();
        let amount = parts.get(1).and_then(|s| s.parse::<i64>().ok());
        let (Some(target), Some(mut amount)) = (parts.first(), amount) else {
            self.notice(irc, nick, "Try: PUSH <char name> <seconds>");
            return Ok(());
        };
        if !self.db.contains(target) {
            self.notice(irc, nick, &format!("No such username {target}."));
            return Ok(());
        }
        if amount == 0 {
            self.notice(irc, nick, "That would not be interesting.");
            return Ok(());
        }
        let target = target.to_string();
        let nextlvl = self.db.player(&target)?.nextlvl;
        if amount > nextlvl {
            self.notice(
                irc,
                nick,
                &format!(
                    "Time to level for {target} ({nextlvl}s) is lower than {amount}; \
                     setting TTL to 0."
                ),
            );
            amount = nextlvl;
        }
        let (level, nextlvl) = {
            let p = self.db.player_mut(&target)?;
            p.nextlvl -= amount;
            (p.level, p.nextlvl)
        };
        let direction = if amount > 0 { "towards" } else { "away from" };
        self.notice(
            irc,
            nick,
            &format!("{target} now reaches level {} in {}.", level + 1, duration(nextlvl)),
        );
        self.logchanmsg(
            irc,
            &[&target],
            &format!(
                "{player} has pushed {target} {} seconds {direction} level {}.  \
                 {target} reaches next level in {}.",
                amount.abs(),
                level + 1,
                duration(nextlvl)
            ),
        )?;
        self.save(&[&target])
    }

    fn cmd_rehash(&mut self, irc: &mut dyn ClientCommands, nick: &str) -> Result<()> {
        match Config::load(&self.config_path) {
            Ok(new_conf) => {
                self.conf.update(|c| *c = new_conf.clone());
                self.notice(irc, nick, "Configuration reloaded.");
            }
            Err(e) => {
                self.notice(irc, nick, &format!("Configuration reload failed: {e}"));
            }
        }
        Ok(())
    }

    fn cmd_reloaddb(&mut self, irc: &mut dyn ClientCommands, nick: &str) -> Result<()> {
        if !self.pause {
            self.notice(irc, nick, "ERROR: can only use RELOADDB while in PAUSE mode.");
            return Ok(());
        }
        self.db.load()?;
        self.notice(irc, nick, "Player database reloaded.");
        Ok(())
    }

    fn cmd_silent(&mut self, irc: &mut dyn ClientCommands, nick: &str, args: &str) -> Result<()> {
        match args {
            "0" => {
                self.silence.chanmsgs = false;
                self.silence.notices = false;
                self.notice(irc, nick, "Silent mode set to 0.  Channels and notices are enabled.");
            }
            "1" => {
                self.silence.notices = false;
                self.notice(irc, nick, "Silent mode set to 1.  Channel output is silenced.");
                self.silence.chanmsgs = true;
            }
            "2" => {
                self.silence.chanmsgs = false;
                self.notice(irc, nick, "Silent mode set to 2.  Private notices are silenced.");
                self.silence.notices = true;
            }
            "3" => {
                self.notice(
                    irc,
                    nick,
                    "Silent mode set to 3.  Channel and private notice output are silenced.",
                );
                self.silence.chanmsgs = true;
                self.silence.notices = true;
            }
            _ => {
                self.notice(irc, nick, "Try: SILENT 0|1|2|3");
            }
        }
        Ok(())
    }

    fn cmd_trigger(
        &mut self,
        irc: &mut dyn ClientCommands,
        player: &str,
        nick: &str,
        args: &str,
    ) -> Result<()> {
        match args {
            "calamity" => {
                self.chanmsg(irc, &format!("{player} brings down ruin upon the land."));
                self.calamity(irc)
            }
            "godsend" => {
                self.chanmsg(irc, &format!("{player} rains blessings upon the people."));
                self.godsend(irc)
            }
            "hog" => {
                self.chanmsg(irc, &format!("{player} has summoned the Hand of God."));
                self.hand_of_god(irc)
            }
            "teambattle" => {
                self.chanmsg(irc, &format!("{player} has decreed violence."));
                self.team_battle(irc)
            }
            "evilness" => {
                self.chanmsg(irc, &format!("{player} has swept the lands with evil."));
                self.evilness(irc)
            }
            "goodness" => {
                self.chanmsg(irc, &format!("{player} has drawn down light from the heavens."));
                self.goodness(irc)
            }
            "battle" => {
                self.chanmsg(irc, &format!("{player} has called forth a gladitorial arena."));
                let op = self.db.online_names();
                if let Some(i) = self.rng.pick_index(RollKey::TriggeredBattle, op.len()) {
                    let name = op[i].clone();
                    self.challenge_opp(irc, &name)?;
                }
                Ok(())
            }
            "quest" => {
                self.chanmsg(irc, &format!("{player} has called heroes to a quest."));
                if self.quest.is_some() {
                    self.notice(irc, nick, "There's already a quest on.");
                    return Ok(());
                }
                let cfg = self.conf.snapshot();
                let eligible = self
                    .db
                    .players()
                    .filter(|p| p.online && p.level > cfg.quest_min_level)
                    .count();
                if eligible < 4 {
                    self.notice(irc, nick, "There's not enough eligible players.");
                    return Ok(());
                }
                self.notice(irc, nick, "Starting quest.");
                self.quest_start(irc, Utc::now().timestamp())
            }
            _ => {
                self.notice(
                    irc,
                    nick,
                    "Try: TRIGGER calamity|godsend|hog|teambattle|evilness|goodness|battle|quest",
                );
                Ok(())
            }
        }
    }
}
