//! The IRC client sits between the wire and the game engine.
//!
//! Responsibilities:
//! - registration, nick recovery, and capability negotiation
//! - output throttling with a FIFO overflow queue
//! - tracking users in the game channel, including their channel modes
//! - translating protocol events into [`BotEvents`] calls
//!
//! The engine never sees raw IRC. It gets [`BotEvents`] callbacks and talks
//! back through [`ClientCommands`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core::config::{Config, ConfigHandle};
use crate::core::error::Result;
use crate::irc::message::Message;

/// A user currently in the game channel.
#[derive(Debug, Clone)]
pub struct ChannelUser {
    pub nick: String,
    pub userhost: String,
    /// Channel mode letters currently set on this user ('o', 'v', ...).
    pub modes: HashSet<char>,
    /// Epoch seconds when they joined.
    pub joined: i64,
}

/// What the engine may ask of the connection.
pub trait ClientCommands {
    /// Say something in the game channel, word-wrapped.
    fn chanmsg(&mut self, text: &str);
    /// Send a notice to a nick, word-wrapped.
    fn notice(&mut self, target: &str, text: &str);
    fn grant_voice(&mut self, nicks: &[String]);
    fn revoke_voice(&mut self, nicks: &[String]);
    /// Reconcile channel +v flags so exactly `voiced` have voice.
    fn set_channel_voices(&mut self, voiced: &HashSet<String>);
    fn writeq_len(&self) -> usize;
    fn writeq_bytes(&self) -> usize;
    fn clear_writeq(&mut self);
    fn bytes_sent(&self) -> u64;
    fn bytes_received(&self) -> u64;
    fn servername(&self) -> String;
    fn user_exists(&self, nick: &str) -> bool;
    fn nick_userhost(&self, nick: &str) -> Option<String>;
    /// True when `nick` is in the channel with exactly this userhost.
    fn match_user(&self, nick: &str, userhost: &str) -> bool;
    /// True for both our current nick and the configured one.
    fn is_bot_nick(&self, nick: &str) -> bool;
    fn bot_has_ops(&self) -> bool;
    fn quit(&mut self, text: &str);
}

/// What the connection reports to the engine.
pub trait BotEvents {
    fn connected(&mut self);
    fn disconnected(&mut self);
    /// The channel roster is known; the game can start.
    fn ready(&mut self, irc: &mut dyn ClientCommands);
    fn acquired_ops(&mut self, irc: &mut dyn ClientCommands);
    fn nick_parted(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser);
    fn nick_kicked(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser);
    /// The user vanished in a netsplit and may come back.
    fn netsplit(&mut self, user: &ChannelUser);
    /// Connection dropped (ping timeout / read error).
    fn nick_dropped(&mut self, user: &ChannelUser);
    fn nick_quit(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser);
    fn nick_changed(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, new_nick: &str);
    fn private_message(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str);
    fn channel_message(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str);
    fn channel_notice(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str);
    /// Periodic clock pulse, every `self_clock` seconds while connected.
    /// An error here is fatal to the process.
    fn think(&mut self, irc: &mut dyn ClientCommands, now: i64) -> Result<()>;
}

// === OUTBOUND THROTTLE ===

struct SendState {
    messages_sent: u32,
    writeq: VecDeque<Vec<u8>>,
    bytes_sent: u64,
}

/// Throttled writer front-end. Lines go straight out while under the
/// per-period allowance, and into a FIFO queue once over it. A single
/// lazily-started flush task drains the queue one period at a time.
pub struct Outbound {
    conf: ConfigHandle,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<Mutex<SendState>>,
    flush_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Outbound {
    pub fn new(conf: ConfigHandle, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Outbound {
            conf,
            tx,
            state: Arc::new(Mutex::new(SendState {
                messages_sent: 0,
                writeq: VecDeque::new(),
                bytes_sent: 0,
            })),
            flush_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Send a line, subject to the throttle.
    pub fn send(&self, line: &str) {
        let mut b = line.as_bytes().to_vec();
        b.extend_from_slice(b"\r\n");
        let cfg = self.conf.snapshot();

        if !cfg.throttle {
            debug!("-> {}", line);
            let mut st = self.state.lock().expect("send state poisoned");
            st.bytes_sent += b.len() as u64;
            let _ = self.tx.send(b);
            return;
        }

        {
            let mut st = self.state.lock().expect("send state poisoned");
            if st.messages_sent < cfg.throttle_rate {
                debug!("({})-> {}", st.messages_sent, line);
                st.messages_sent += 1;
                st.bytes_sent += b.len() as u64;
                let _ = self.tx.send(b);
            } else {
                trace!("queued {}", line);
                st.writeq.push_back(b);
            }
        }
        self.ensure_flush_task(&cfg);
    }

    /// Send a line immediately. Still counts against the allowance so a
    /// burst of urgent traffic delays the queue rather than losing it.
    pub fn sendnow(&self, line: &str) {
        debug!("=> {}", line);
        let mut b = line.as_bytes().to_vec();
        b.extend_from_slice(b"\r\n");
        let cfg = self.conf.snapshot();
        {
            let mut st = self.state.lock().expect("send state poisoned");
            st.messages_sent += 1;
            st.bytes_sent += b.len() as u64;
            let _ = self.tx.send(b);
        }
        if cfg.throttle {
            self.ensure_flush_task(&cfg);
        }
    }

    fn ensure_flush_task(&self, cfg: &Config) {
        if !cfg.throttle {
            return;
        }
        let mut slot = self.flush_task.lock().expect("flush slot poisoned");
        if slot.is_some() {
            return;
        }
        let conf = self.conf.clone();
        let tx = self.tx.clone();
        let state = self.state.clone();
        let flush_task = self.flush_task.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                let cfg = conf.snapshot();
                tokio::time::sleep(std::time::Duration::from_secs(cfg.throttle_period)).await;
                let mut st = state.lock().expect("send state poisoned");
                st.messages_sent = st.messages_sent.saturating_sub(cfg.throttle_rate);
                while st.messages_sent < cfg.throttle_rate {
                    match st.writeq.pop_front() {
                        Some(b) => {
                            trace!("({})~> queued line released", st.messages_sent);
                            st.messages_sent += 1;
                            st.bytes_sent += b.len() as u64;
                            let _ = tx.send(b);
                        }
                        None => break,
                    }
                }
                if st.writeq.is_empty() {
                    break;
                }
            }
            flush_task.lock().expect("flush slot poisoned").take();
        }));
    }

    pub fn writeq_len(&self) -> usize {
        self.state.lock().expect("send state poisoned").writeq.len()
    }

    pub fn writeq_bytes(&self) -> usize {
        let st = self.state.lock().expect("send state poisoned");
        st.writeq.iter().map(|b| b.len()).sum()
    }

    pub fn clear_writeq(&self) {
        self.state.lock().expect("send state poisoned").writeq.clear();
    }

    pub fn bytes_sent(&self) -> u64 {
        self.state.lock().expect("send state poisoned").bytes_sent
    }

    /// Stop the flush task, dropping whatever is still queued.
    pub fn shutdown(&self) {
        if let Some(task) = self.flush_task.lock().expect("flush slot poisoned").take() {
            task.abort();
        }
        self.clear_writeq();
    }
}

// === CLIENT ===

/// Scan for an `http(s)://host/` URL whose host isn't on the allow list.
/// Returns the first offending host.
pub fn untrusted_url_host(text: &str, conf: &Config) -> Option<String> {
    let mut rest = text;
    while let Some(idx) = rest.find("http") {
        rest = &rest[idx..];
        let after = rest
            .strip_prefix("https://")
            .or_else(|| rest.strip_prefix("http://"));
        let Some(after) = after else {
            rest = &rest[4..];
            continue;
        };
        // Hosts only count when followed by a path slash.
        if let Some(slash) = after.find('/') {
            let host = &after[..slash];
            if !host.is_empty() && !conf.url_host_allowed(host) {
                return Some(host.to_string());
            }
            rest = &after[slash..];
        } else {
            rest = after;
        }
    }
    None
}

pub struct IrcClient {
    conf: ConfigHandle,
    out: Outbound,
    nick: String,
    server: Option<String>,
    caps: HashSet<String>,
    users: HashMap<String, ChannelUser>,
    /// Prefix symbol ('@') to mode letter ('o'), learned from 005.
    prefixmodes: HashMap<char, char>,
    /// Mode letter to its parameter class (1-4), learned from 005.
    modetypes: HashMap<char, u8>,
    maxmodes: usize,
    bytes_received: u64,
    ready_sent: bool,
    pub quitting: bool,
}

impl IrcClient {
    pub fn new(conf: ConfigHandle, out: Outbound) -> Self {
        let nick = conf.snapshot().botnick.clone();
        IrcClient {
            conf,
            out,
            nick,
            server: None,
            caps: HashSet::new(),
            users: HashMap::new(),
            prefixmodes: HashMap::new(),
            modetypes: HashMap::new(),
            maxmodes: 3,
            bytes_received: 0,
            ready_sent: false,
            quitting: false,
        }
    }

    /// Register with the server. Must be the first thing on the wire.
    pub fn handshake(&mut self) {
        let cfg = self.conf.snapshot();
        self.out.sendnow("CAP REQ :multi-prefix userhost-in-names");
        self.out.sendnow("CAP END");
        let pass = std::env::var("BOTPASS").ok().or_else(|| cfg.bot_password.clone());
        if let Some(pass) = pass {
            self.out.sendnow(&format!("PASS {pass}"));
        }
        self.out.sendnow(&format!("NICK {}", cfg.botnick));
        self.out.sendnow(&format!("USER {} 0 * :{}", cfg.botuser, cfg.botrlnm));
    }

    pub fn note_received(&mut self, n: usize) {
        self.bytes_received += n as u64;
    }

    pub fn shutdown(&self) {
        self.out.shutdown();
    }

    /// Route one parsed message to its handler.
    pub fn dispatch(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        match msg.cmd.as_str() {
            "PING" => self.handle_ping(msg),
            "005" => self.handle_005(msg),
            "376" | "422" => self.handle_end_of_motd(),
            "352" => self.handle_who_reply(msg),
            "315" => self.fire_ready(bot),
            "353" => self.handle_names(msg),
            "366" => self.handle_end_of_names(bot),
            "433" => self.handle_nick_in_use(),
            "CAP" => self.handle_cap(msg),
            "JOIN" => self.handle_join(msg),
            "PART" => self.handle_part(msg, bot),
            "KICK" => self.handle_kick(msg, bot),
            "MODE" => self.handle_mode(msg, bot),
            "NICK" => self.handle_nick(msg, bot),
            "QUIT" => self.handle_quit(msg, bot),
            "NOTICE" => self.handle_notice(msg, bot),
            "PRIVMSG" => self.handle_privmsg(msg, bot),
            _ => {}
        }
    }

    fn handle_ping(&mut self, msg: &Message) {
        let token = msg.trailing.as_deref().unwrap_or("");
        self.out.sendnow(&format!("PONG :{token}"));
    }

    /// RPL_ISUPPORT. Teaches us the server name, the mode-change batch
    /// limit, prefix symbols, and mode parameter classes.
    fn handle_005(&mut self, msg: &Message) {
        if let Some(src) = &msg.src {
            self.server = Some(src.clone());
        }
        for arg in &msg.args {
            let (key, val) = match arg.split_once('=') {
                Some((k, v)) => (k, v),
                None => (arg.as_str(), arg.as_str()),
            };
            match key {
                "MODES" => {
                    if let Ok(n) = val.parse() {
                        self.maxmodes = n;
                    }
                }
                "PREFIX" => {
                    // Format is "(modes)symbols", e.g. "(ov)@+".
                    if let Some(body) = val.strip_prefix('(') {
                        if let Some((modes, symbols)) = body.split_once(')') {
                            for (sym, mode) in symbols.chars().zip(modes.chars()) {
                                self.prefixmodes.insert(sym, mode);
                                self.modetypes.insert(mode, 2);
                            }
                        }
                    }
                }
                "CHANMODES" => {
                    // Four comma-separated groups, one per parameter class.
                    for (i, group) in val.splitn(4, ',').enumerate() {
                        for mode in group.chars() {
                            self.modetypes.insert(mode, i as u8 + 1);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_end_of_motd(&mut self) {
        let cfg = self.conf.snapshot();
        if !cfg.botmodes.is_empty() {
            self.out.send(&format!("MODE {} {}", cfg.botnick, cfg.botmodes));
        }
        self.out.sendnow(&format!("JOIN {}", cfg.botchan));
    }

    /// RPL_WHOREPLY: args are channel, user, host, server, nick, flags.
    fn handle_who_reply(&mut self, msg: &Message) {
        if msg.args.len() < 6 {
            return;
        }
        let nick = msg.args[4].clone();
        let userhost = format!("{}!{}@{}", nick, msg.args[1], msg.args[2]);
        // Flags are [GH] followed by prefix symbols.
        let modes = msg.args[5]
            .chars()
            .skip(1)
            .filter_map(|p| self.prefixmodes.get(&p).copied())
            .collect();
        self.add_user(nick, userhost, modes, msg.time);
    }

    /// RPL_NAMREPLY. Only useful when the server sends full userhosts.
    fn handle_names(&mut self, msg: &Message) {
        if !self.caps.contains("userhost-in-names") {
            return;
        }
        let Some(trailing) = &msg.trailing else { return };
        for token in trailing.split(' ') {
            let stripped = token.trim_start_matches(|c| self.prefixmodes.contains_key(&c));
            let modes: HashSet<char> = token[..token.len() - stripped.len()]
                .chars()
                .filter_map(|p| self.prefixmodes.get(&p).copied())
                .collect();
            let Some((nick, rest)) = stripped.split_once('!') else { continue };
            if nick.is_empty() || !rest.contains('@') {
                continue;
            }
            self.add_user(nick.to_string(), stripped.to_string(), modes, msg.time);
        }
    }

    /// RPL_ENDOFNAMES: we're in the channel. Ask services for ops if
    /// configured, then either go ready or fall back to WHO for userhosts.
    fn handle_end_of_names(&mut self, bot: &mut dyn BotEvents) {
        let cfg = self.conf.snapshot();
        if let Some(opcmd) = &cfg.botopcmd {
            let line = opcmd.replace("%botnick%", &self.nick);
            self.out.sendnow(&line);
        }
        if self.caps.contains("userhost-in-names") {
            self.fire_ready(bot);
        } else {
            self.out.send(&format!("WHO {}", cfg.botchan));
        }
    }

    fn handle_nick_in_use(&mut self) {
        let cfg = self.conf.snapshot();
        self.nick.push('0');
        let nick = self.nick.clone();
        self.out.sendnow(&format!("NICK {nick}"));
        if let Some(ghostcmd) = &cfg.botghostcmd {
            self.out.send(ghostcmd);
        }
    }

    fn handle_cap(&mut self, msg: &Message) {
        if msg.args.len() >= 3 && msg.args[1] == "ACK" {
            self.caps.extend(msg.args[2].split(' ').map(String::from));
        }
    }

    fn handle_join(&mut self, msg: &Message) {
        let Some(src) = &msg.src else { return };
        let userhost = format!(
            "{}!{}@{}",
            src,
            msg.user.as_deref().unwrap_or(""),
            msg.host.as_deref().unwrap_or("")
        );
        self.add_user(src.clone(), userhost, HashSet::new(), msg.time);
    }

    fn handle_part(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        let Some(src) = &msg.src else { return };
        if let Some(user) = self.remove_user(src) {
            bot.nick_parted(self, &user);
        }
    }

    fn handle_kick(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        if msg.args.len() < 2 {
            return;
        }
        let kicked = msg.args[1].clone();
        if let Some(user) = self.remove_user(&kicked) {
            bot.nick_kicked(self, &user);
        }
    }

    /// Channel mode change. The modetype tables tell us which changes
    /// consume a parameter; only user-mode changes (class 2) matter to us.
    fn handle_mode(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        let cfg = self.conf.snapshot();
        if msg.args.first().map(String::as_str) != Some(cfg.botchan.as_str()) {
            return;
        }
        let mut changes: Vec<(char, char)> = Vec::new();
        let mut params: VecDeque<String> = VecDeque::new();
        for arg in &msg.args[1..] {
            if arg.starts_with(['+', '-']) {
                let mut dir = '+';
                for c in arg.chars() {
                    match c {
                        '+' | '-' => dir = c,
                        mode => changes.push((dir, mode)),
                    }
                }
            } else {
                params.push_back(arg.clone());
            }
        }
        for (dir, mode) in changes {
            let modetype = self.modetypes.get(&mode).copied().unwrap_or(4);
            if modetype == 1 || modetype == 2 || (modetype == 3 && dir == '+') {
                let Some(param) = params.pop_front() else { continue };
                if modetype != 2 {
                    continue;
                }
                if dir == '+' {
                    if let Some(user) = self.users.get_mut(&param) {
                        user.modes.insert(mode);
                    }
                    if param == self.nick && mode == 'o' {
                        bot.acquired_ops(self);
                    }
                } else if let Some(user) = self.users.get_mut(&param) {
                    user.modes.remove(&mode);
                }
            }
        }
    }

    fn handle_nick(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        let cfg = self.conf.snapshot();
        let Some(src) = msg.src.clone() else { return };
        let Some(new_nick) = msg.args.first().cloned() else { return };
        let Some(mut user) = self.users.remove(&src) else { return };

        // Tell the engine before the rename so the old nick still resolves.
        bot.nick_changed(self, &user, &new_nick);

        user.nick = new_nick.clone();
        self.users.insert(new_nick.clone(), user);

        if src == self.nick {
            self.nick = new_nick;
        } else if src == cfg.botnick {
            // Someone gave up our preferred nick; take it back.
            self.out.sendnow(&format!("NICK {}", cfg.botnick));
        }
    }

    fn handle_quit(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        let cfg = self.conf.snapshot();
        let Some(src) = &msg.src else { return };
        if *src == cfg.botnick && *src != self.nick {
            self.out.sendnow(&format!("NICK {}", cfg.botnick));
        }
        let Some(user) = self.remove_user(src) else { return };
        let reason = msg.trailing.as_deref().unwrap_or("");
        if cfg.detectsplits && looks_like_netsplit(reason) {
            bot.netsplit(&user);
        } else if reason.starts_with("Read error") || reason.starts_with("Ping timeout") {
            bot.nick_dropped(&user);
        } else {
            bot.nick_quit(self, &user);
        }
    }

    fn handle_notice(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        let Some(src) = msg.src.clone() else { return };
        // Private notices are ignored to avoid bot loops.
        if msg.args.first().map(String::as_str) == Some(self.nick.as_str()) {
            return;
        }
        let text = msg.trailing.clone().unwrap_or_default();
        if self.users.contains_key(&src) && self.user_is_ok(&src, &text, msg.time) {
            if let Some(user) = self.users.get(&src).cloned() {
                bot.channel_notice(self, &user, &text);
            }
        }
    }

    fn handle_privmsg(&mut self, msg: &Message, bot: &mut dyn BotEvents) {
        let Some(src) = msg.src.clone() else { return };
        if !self.users.contains_key(&src) {
            // Server messages.
            return;
        }
        let text = msg.trailing.clone().unwrap_or_default();
        if msg.args.first().map(String::as_str) == Some(self.nick.as_str()) {
            if let Some(user) = self.users.get(&src).cloned() {
                bot.private_message(self, &user, &text);
            }
        } else if self.user_is_ok(&src, &text, msg.time) {
            if let Some(user) = self.users.get(&src).cloned() {
                bot.channel_message(self, &user, &text);
            }
        }
    }

    fn fire_ready(&mut self, bot: &mut dyn BotEvents) {
        if self.ready_sent {
            return;
        }
        self.ready_sent = true;
        bot.ready(self);
    }

    fn add_user(&mut self, nick: String, userhost: String, modes: HashSet<char>, joined: i64) {
        self.users.insert(
            nick.clone(),
            ChannelUser { nick, userhost, modes, joined },
        );
    }

    fn remove_user(&mut self, nick: &str) -> Option<ChannelUser> {
        let user = self.users.remove(nick)?;
        if self.users.len() == 1 && !self.bot_has_ops() {
            // Alone without ops; cycle the channel to pick them up.
            let cfg = self.conf.snapshot();
            self.out.sendnow(&format!("PART {} :Acquiring ops", cfg.botchan));
            self.out.sendnow(&format!("JOIN {}", cfg.botchan));
        }
        Some(user)
    }

    /// Anti-abuse gate for channel traffic. Recently-joined users pasting
    /// URLs off the allow list get kickbanned when we're able to.
    fn user_is_ok(&mut self, src: &str, text: &str, msgtime: i64) -> bool {
        let cfg = self.conf.snapshot();
        if !cfg.doban || !self.bot_has_ops() {
            return true;
        }
        if src == self.nick {
            return true;
        }
        let Some(user) = self.users.get(src) else {
            // Not in the channel; the channel could probably use +n.
            return false;
        };
        if msgtime > user.joined + cfg.bannable_time {
            return true;
        }
        if untrusted_url_host(text, &cfg).is_some() {
            self.kickban(src);
            return false;
        }
        true
    }

    fn kickban(&mut self, nick: &str) {
        let cfg = self.conf.snapshot();
        self.out.sendnow(&format!("MODE {} +b {nick}", cfg.botchan));
        self.out.sendnow(&format!("KICK {} {nick} :No advertising", cfg.botchan));
    }

    #[cfg(test)]
    fn user(&self, nick: &str) -> Option<&ChannelUser> {
        self.users.get(nick)
    }

    #[cfg(test)]
    fn current_nick(&self) -> &str {
        &self.nick
    }
}

fn looks_like_netsplit(reason: &str) -> bool {
    // Netsplit quit reasons look like "server1.net server2.net".
    let dotted = |s: &str| {
        !s.is_empty() && !s.starts_with('.') && !s.ends_with('.') && s.contains('.')
    };
    match reason.split_once(' ') {
        Some((a, b)) => dotted(a) && b.split(' ').next().is_some_and(dotted),
        None => false,
    }
}

impl ClientCommands for IrcClient {
    fn chanmsg(&mut self, text: &str) {
        let cfg = self.conf.snapshot();
        for line in crate::util::wrap(text, cfg.message_wrap_len) {
            self.out.send(&format!("PRIVMSG {} :{line}", cfg.botchan));
        }
    }

    fn notice(&mut self, target: &str, text: &str) {
        let cfg = self.conf.snapshot();
        for line in crate::util::wrap(text, cfg.message_wrap_len) {
            self.out.send(&format!("NOTICE {target} :{line}"));
        }
    }

    fn grant_voice(&mut self, nicks: &[String]) {
        let cfg = self.conf.snapshot();
        for batch in nicks.chunks(self.maxmodes) {
            self.out.send(&format!(
                "MODE {} +{} {}",
                cfg.botchan,
                "v".repeat(batch.len()),
                batch.join(" ")
            ));
        }
    }

    fn revoke_voice(&mut self, nicks: &[String]) {
        let cfg = self.conf.snapshot();
        for batch in nicks.chunks(self.maxmodes) {
            self.out.send(&format!(
                "MODE {} -{} {}",
                cfg.botchan,
                "v".repeat(batch.len()),
                batch.join(" ")
            ));
        }
    }

    fn set_channel_voices(&mut self, voiced: &HashSet<String>) {
        let mut add = Vec::new();
        let mut remove = Vec::new();
        for (nick, user) in &self.users {
            if user.modes.contains(&'v') {
                if !voiced.contains(nick) {
                    remove.push(nick.clone());
                }
            } else if voiced.contains(nick) {
                add.push(nick.clone());
            }
        }
        if !add.is_empty() {
            self.grant_voice(&add);
        }
        if !remove.is_empty() {
            self.revoke_voice(&remove);
        }
    }

    fn writeq_len(&self) -> usize {
        self.out.writeq_len()
    }

    fn writeq_bytes(&self) -> usize {
        self.out.writeq_bytes()
    }

    fn clear_writeq(&mut self) {
        self.out.clear_writeq();
    }

    fn bytes_sent(&self) -> u64 {
        self.out.bytes_sent()
    }

    fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn servername(&self) -> String {
        self.server.clone().unwrap_or_else(|| "<disconnected>".into())
    }

    fn user_exists(&self, nick: &str) -> bool {
        self.users.contains_key(nick)
    }

    fn nick_userhost(&self, nick: &str) -> Option<String> {
        self.users.get(nick).map(|u| u.userhost.clone())
    }

    fn match_user(&self, nick: &str, userhost: &str) -> bool {
        self.users.get(nick).is_some_and(|u| u.userhost == userhost)
    }

    fn is_bot_nick(&self, nick: &str) -> bool {
        nick == self.nick || nick == self.conf.snapshot().botnick
    }

    fn bot_has_ops(&self) -> bool {
        self.users
            .get(&self.nick)
            .is_some_and(|u| u.modes.contains(&'o'))
    }

    fn quit(&mut self, text: &str) {
        self.quitting = true;
        if text.is_empty() {
            self.out.sendnow("QUIT");
        } else {
            self.out.sendnow(&format!("QUIT :{text}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::irc::message::parse_message;

    fn test_conf() -> ConfigHandle {
        let conf: Config = toml::from_str(
            r##"
            servers = ["irc.example.net:6697"]
            botnick = "dally"
            botchan = "#dally"
            okurls = ["example.com"]
            "##,
        )
        .unwrap();
        ConfigHandle::new(conf)
    }

    fn test_client(conf: &ConfigHandle) -> (IrcClient, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (IrcClient::new(conf.clone(), Outbound::new(conf.clone(), tx)), rx)
    }

    fn drain_lines(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(String::from_utf8(b).unwrap().trim_end().to_string());
        }
        out
    }

    #[derive(Default)]
    struct RecordingBot {
        ready_count: u32,
        ops_count: u32,
        splits: Vec<String>,
        dropped: Vec<String>,
        quits: Vec<String>,
        renames: Vec<(String, String)>,
        channel_lines: Vec<(String, String)>,
        private_lines: Vec<(String, String)>,
    }

    impl BotEvents for RecordingBot {
        fn connected(&mut self) {}
        fn disconnected(&mut self) {}
        fn ready(&mut self, _irc: &mut dyn ClientCommands) {
            self.ready_count += 1;
        }
        fn acquired_ops(&mut self, _irc: &mut dyn ClientCommands) {
            self.ops_count += 1;
        }
        fn nick_parted(&mut self, _irc: &mut dyn ClientCommands, _user: &ChannelUser) {}
        fn nick_kicked(&mut self, _irc: &mut dyn ClientCommands, _user: &ChannelUser) {}
        fn netsplit(&mut self, user: &ChannelUser) {
            self.splits.push(user.nick.clone());
        }
        fn nick_dropped(&mut self, user: &ChannelUser) {
            self.dropped.push(user.nick.clone());
        }
        fn nick_quit(&mut self, _irc: &mut dyn ClientCommands, user: &ChannelUser) {
            self.quits.push(user.nick.clone());
        }
        fn nick_changed(
            &mut self,
            _irc: &mut dyn ClientCommands,
            user: &ChannelUser,
            new_nick: &str,
        ) {
            self.renames.push((user.nick.clone(), new_nick.to_string()));
        }
        fn private_message(&mut self, _irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str) {
            self.private_lines.push((user.nick.clone(), text.to_string()));
        }
        fn channel_message(&mut self, _irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str) {
            self.channel_lines.push((user.nick.clone(), text.to_string()));
        }
        fn channel_notice(&mut self, _irc: &mut dyn ClientCommands, _user: &ChannelUser, _text: &str) {}
        fn think(&mut self, _irc: &mut dyn ClientCommands, _now: i64) -> Result<()> {
            Ok(())
        }
    }

    fn feed(client: &mut IrcClient, bot: &mut RecordingBot, line: &str) {
        let msg = parse_message(line, 1000).unwrap();
        client.dispatch(&msg, bot);
    }

    #[tokio::test]
    async fn cap_ack_updates_caps() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":server CAP * ACK :multi-prefix userhost-in-names");
        assert!(client.caps.contains("multi-prefix"));
        assert!(client.caps.contains("userhost-in-names"));
    }

    #[tokio::test]
    async fn isupport_builds_mode_tables() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(
            &mut client,
            &mut bot,
            ":irc.example.net 005 dally MODES=6 PREFIX=(ov)@+ CHANMODES=beI,k,l,imnpst :are supported by this server",
        );
        assert_eq!(client.maxmodes, 6);
        assert_eq!(client.prefixmodes.get(&'@'), Some(&'o'));
        assert_eq!(client.prefixmodes.get(&'+'), Some(&'v'));
        assert_eq!(client.modetypes.get(&'b'), Some(&1));
        assert_eq!(client.modetypes.get(&'k'), Some(&2));
        assert_eq!(client.modetypes.get(&'l'), Some(&3));
        assert_eq!(client.modetypes.get(&'m'), Some(&4));
        assert_eq!(client.modetypes.get(&'o'), Some(&2));
        assert_eq!(client.servername(), "irc.example.net");
    }

    #[tokio::test]
    async fn who_reply_builds_userhost_from_reply_fields() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":irc.example.net 005 dally PREFIX=(ov)@+ :supported");
        feed(
            &mut client,
            &mut bot,
            ":irc.example.net 352 dally #dally ident example.com irc.example.net alice H@ :0 Alice",
        );
        let user = client.user("alice").unwrap();
        assert_eq!(user.userhost, "alice!ident@example.com");
        assert!(user.modes.contains(&'o'));
    }

    #[tokio::test]
    async fn names_reply_needs_userhost_cap() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":irc.example.net 005 dally PREFIX=(ov)@+ :supported");
        feed(&mut client, &mut bot, ":irc.example.net 353 dally = #dally :@alice!a@h +bob!b@h");
        assert!(client.user("alice").is_none());

        feed(&mut client, &mut bot, ":server CAP * ACK :userhost-in-names");
        feed(&mut client, &mut bot, ":irc.example.net 353 dally = #dally :@alice!a@h +bob!b@h");
        assert!(client.user("alice").unwrap().modes.contains(&'o'));
        assert!(client.user("bob").unwrap().modes.contains(&'v'));
        assert_eq!(client.user("bob").unwrap().userhost, "bob!b@h");
    }

    #[tokio::test]
    async fn ready_fires_once_per_connection() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":server CAP * ACK :userhost-in-names");
        feed(&mut client, &mut bot, ":irc.example.net 366 dally #dally :End of /NAMES list.");
        feed(&mut client, &mut bot, ":irc.example.net 315 dally #dally :End of WHO list");
        assert_eq!(bot.ready_count, 1);
    }

    #[tokio::test]
    async fn nick_change_renames_atomically() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":foo!bar@example.com JOIN :#dally");
        feed(&mut client, &mut bot, ":foo!bar@example.com NICK :baz");
        assert!(client.user("foo").is_none());
        let user = client.user("baz").unwrap();
        assert_eq!(user.nick, "baz");
        assert_eq!(user.userhost, "foo!bar@example.com");
        assert_eq!(bot.renames, vec![("foo".to_string(), "baz".to_string())]);
    }

    #[tokio::test]
    async fn own_nick_change_tracked_and_preferred_nick_reclaimed() {
        let conf = test_conf();
        let (mut client, mut rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":dally!d@h JOIN :#dally");
        feed(&mut client, &mut bot, ":dally!d@h NICK :dally0");
        assert_eq!(client.current_nick(), "dally0");
        drain_lines(&mut rx);

        // Someone else drops our preferred nick; we ask for it back.
        feed(&mut client, &mut bot, ":stranger!s@h JOIN :#dally");
        feed(&mut client, &mut bot, ":stranger!s@h NICK :dally");
        feed(&mut client, &mut bot, ":dally!s@h QUIT :bye");
        let lines = drain_lines(&mut rx);
        assert!(lines.iter().any(|l| l == "NICK dally"));
    }

    #[tokio::test]
    async fn quit_reasons_are_classified() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        for nick in ["a", "b", "c", "d", "e"] {
            feed(&mut client, &mut bot, &format!(":{nick}!x@h JOIN :#dally"));
        }
        feed(&mut client, &mut bot, ":a!x@h QUIT :hub.example.net leaf.example.net");
        feed(&mut client, &mut bot, ":b!x@h QUIT :Ping timeout: 240 seconds");
        feed(&mut client, &mut bot, ":c!x@h QUIT :Read error: connection reset");
        feed(&mut client, &mut bot, ":d!x@h QUIT :goodbye cruel world");
        assert_eq!(bot.splits, vec!["a"]);
        assert_eq!(bot.dropped, vec!["b", "c"]);
        assert_eq!(bot.quits, vec!["d"]);
    }

    #[tokio::test]
    async fn mode_changes_consume_params_in_order() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(
            &mut client,
            &mut bot,
            ":irc.example.net 005 dally PREFIX=(ov)@+ CHANMODES=beI,k,l,imnpst :supported",
        );
        feed(&mut client, &mut bot, ":dally!d@h JOIN :#dally");
        feed(&mut client, &mut bot, ":alice!a@h JOIN :#dally");
        // +b consumes the first param, +o the second, +n none.
        feed(&mut client, &mut bot, ":op!o@h MODE #dally +bon *!*@spam.example dally");
        assert!(client.bot_has_ops());
        assert_eq!(bot.ops_count, 1);

        feed(&mut client, &mut bot, ":op!o@h MODE #dally +v-o alice dally");
        assert!(client.user("alice").unwrap().modes.contains(&'v'));
        assert!(!client.bot_has_ops());
    }

    #[tokio::test]
    async fn advertising_newcomer_is_kickbanned() {
        let conf = test_conf();
        let (mut client, mut rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":irc.example.net 005 dally PREFIX=(ov)@+ :supported");
        feed(&mut client, &mut bot, ":dally!d@h JOIN :#dally");
        feed(&mut client, &mut bot, ":op!o@h MODE #dally +o dally");
        feed(&mut client, &mut bot, ":spammer!s@h JOIN :#dally");
        drain_lines(&mut rx);

        feed(&mut client, &mut bot, ":spammer!s@h PRIVMSG #dally :buy stuff at https://spam.example/shop now");
        let lines = drain_lines(&mut rx);
        assert!(lines.iter().any(|l| l.starts_with("MODE #dally +b spammer")));
        assert!(lines.iter().any(|l| l.starts_with("KICK #dally spammer")));
        assert!(bot.channel_lines.is_empty());

        // Allow-listed URL is fine.
        feed(&mut client, &mut bot, ":spammer2!s@h JOIN :#dally");
        feed(&mut client, &mut bot, ":spammer2!s@h PRIVMSG #dally :see https://example.com/page");
        assert_eq!(bot.channel_lines.len(), 1);
    }

    #[tokio::test]
    async fn private_and_channel_messages_are_separated() {
        let conf = test_conf();
        let (mut client, _rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":alice!a@h JOIN :#dally");
        feed(&mut client, &mut bot, ":alice!a@h PRIVMSG dally :login alice hunter2");
        feed(&mut client, &mut bot, ":alice!a@h PRIVMSG #dally :hello all");
        feed(&mut client, &mut bot, ":ghost!g@h PRIVMSG dally :hi");
        assert_eq!(bot.private_lines, vec![("alice".to_string(), "login alice hunter2".to_string())]);
        assert_eq!(bot.channel_lines, vec![("alice".to_string(), "hello all".to_string())]);
    }

    #[tokio::test]
    async fn lone_user_without_ops_cycles_channel() {
        let conf = test_conf();
        let (mut client, mut rx) = test_client(&conf);
        let mut bot = RecordingBot::default();
        feed(&mut client, &mut bot, ":dally!d@h JOIN :#dally");
        feed(&mut client, &mut bot, ":alice!a@h JOIN :#dally");
        drain_lines(&mut rx);
        feed(&mut client, &mut bot, ":alice!a@h PART #dally :bye");
        let lines = drain_lines(&mut rx);
        assert_eq!(lines, vec!["PART #dally :Acquiring ops", "JOIN #dally"]);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_queues_and_drains_in_order() {
        let conf = test_conf();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = Outbound::new(conf.clone(), tx);
        for i in 0..10 {
            out.send(&format!("PRIVMSG #dally :line {i}"));
        }
        // Four go out immediately (throttle_rate default), six queue.
        let sent = drain_lines(&mut rx);
        assert_eq!(sent.len(), 4);
        assert_eq!(out.writeq_len(), 6);

        // Let the flush task reach its sleep before moving the clock.
        tokio::task::yield_now().await;
        tokio::time::advance(std::time::Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        let sent = drain_lines(&mut rx);
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0], "PRIVMSG #dally :line 4");

        tokio::time::advance(std::time::Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        let sent = drain_lines(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(out.writeq_len(), 0);
        out.shutdown();
    }

    #[tokio::test]
    async fn untrusted_hosts_require_path_slash() {
        let conf = test_conf();
        let cfg = conf.snapshot();
        assert_eq!(
            untrusted_url_host("go to https://spam.example/x", &cfg).as_deref(),
            Some("spam.example")
        );
        // No trailing slash, no match.
        assert_eq!(untrusted_url_host("https://spam.example", &cfg), None);
        assert_eq!(untrusted_url_host("https://example.com/ok", &cfg), None);
        assert_eq!(
            untrusted_url_host("https://example.com/ok then http://evil.example/z", &cfg).as_deref(),
            Some("evil.example")
        );
        assert_eq!(untrusted_url_host("no urls here", &cfg), None);
    }
}
