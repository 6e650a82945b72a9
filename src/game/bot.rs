//! The game engine.
//!
//! [`GameBot`] reacts to connection events and runs the periodic game
//! tick: idling progress, penalties, random events, map movement, and
//! quests. It never touches the wire directly; everything outbound goes
//! through [`ClientCommands`].

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use crate::core::config::ConfigHandle;
use crate::core::error::Result;
use crate::game::events::EventTable;
use crate::game::player::{level_time, Alignment, PenaltyKind};
use crate::game::quest::{Quest, QuestMode, QuestTemplate};
use crate::game::rng::{GameRng, RollKey};
use crate::game::store::GameDb;
use crate::irc::client::{BotEvents, ChannelUser, ClientCommands};
use crate::util::{duration, plural, wrap_coord, wrapped_step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BotState {
    Disconnected,
    Connected,
    Ready,
}

/// Which output channels an admin has silenced.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Silence {
    pub chanmsgs: bool,
    pub notices: bool,
}

pub struct GameBot {
    pub(crate) conf: ConfigHandle,
    pub(crate) config_path: PathBuf,
    pub(crate) db: GameDb,
    pub(crate) state: BotState,
    pub(crate) quest: Option<Quest>,
    /// Epoch seconds when the next quest may start.
    pub(crate) qtimer: i64,
    pub(crate) silence: Silence,
    /// Pause mode stops all database writes.
    pub(crate) pause: bool,
    pub(crate) last_reg_time: i64,
    pub(crate) events: EventTable,
    pub(crate) new_accounts: u64,
    pub(crate) rng: GameRng,
    pub(crate) start_time: i64,
    pub(crate) last_tick: Option<i64>,
    pub(crate) shutdown: bool,
}

impl GameBot {
    /// Build the engine over an already-loaded [`GameDb`]. Restores a
    /// persisted quest if its questors still exist.
    pub fn new(conf: ConfigHandle, mut db: GameDb, config_path: PathBuf) -> Result<GameBot> {
        let quest = db.read_quest()?.filter(|q| {
            let ok = q.questors.iter().all(|name| db.contains(name));
            if !ok {
                info!("dropping persisted quest with unknown questors");
            }
            ok
        });
        Ok(GameBot {
            conf,
            config_path,
            db,
            state: BotState::Disconnected,
            quest,
            qtimer: 0,
            silence: Silence::default(),
            pause: false,
            last_reg_time: 0,
            events: EventTable::new(),
            new_accounts: 0,
            rng: GameRng::new(),
            start_time: Utc::now().timestamp(),
            last_tick: None,
            shutdown: false,
        })
    }

    // Accessors for the driver loop and integration tests.

    pub fn db(&self) -> &GameDb {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut GameDb {
        &mut self.db
    }

    pub fn rng_mut(&mut self) -> &mut GameRng {
        &mut self.rng
    }

    pub fn quest(&self) -> Option<&Quest> {
        self.quest.as_ref()
    }

    /// True after an admin issued `die`; the driver must not reconnect.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    // === OUTPUT ===

    pub(crate) fn chanmsg(&self, irc: &mut dyn ClientCommands, text: &str) {
        if self.silence.chanmsgs {
            return;
        }
        irc.chanmsg(text);
    }

    pub(crate) fn notice(&self, irc: &mut dyn ClientCommands, nick: &str, text: &str) {
        if self.silence.notices {
            return;
        }
        irc.notice(nick, text);
    }

    /// Channel message that also lands in the named players' history.
    pub(crate) fn logchanmsg(
        &mut self,
        irc: &mut dyn ClientCommands,
        players: &[&str],
        text: &str,
    ) -> Result<()> {
        self.chanmsg(irc, text);
        self.db.add_history(players, text)
    }

    // === PERSISTENCE GUARDS ===

    pub(crate) fn save(&mut self, names: &[&str]) -> Result<()> {
        if self.pause {
            return Ok(());
        }
        self.db.write_players(names)
    }

    pub(crate) fn save_all(&mut self) -> Result<()> {
        if self.pause {
            return Ok(());
        }
        self.db.write_all()
    }

    pub(crate) fn player_name_by_userhost(&self, userhost: &str) -> Option<String> {
        self.db
            .players()
            .find(|p| p.online && p.userhost == userhost)
            .map(|p| p.name.clone())
    }

    // === PENALTIES ===

    /// Exact a penalty on a transgressing player. `text` scales message
    /// penalties by length. Aborts the quest if the player is a questor.
    pub(crate) fn penalize(
        &mut self,
        irc: &mut dyn ClientCommands,
        name: &str,
        kind: PenaltyKind,
        text: Option<&str>,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        let base = kind.base(&cfg);
        if base == 0 {
            return Ok(());
        }

        if self.quest.as_ref().is_some_and(|q| q.is_questor(name)) {
            let questors = self.quest.take().expect("quest just checked").questors;
            let msg = format!(
                "{name}'s insolence has brought the wrath of the gods down upon them.  \
                 Your great wickedness burdens you like lead, drawing you downwards \
                 with great force towards hell. Thereby have you plunged {} steps \
                 closer to that gaping maw.",
                cfg.penquest
            );
            let qnames: Vec<&str> = questors.iter().map(String::as_str).collect();
            self.logchanmsg(irc, &qnames, &msg)?;
            for qname in &questors {
                let p = self.db.player_mut(qname)?;
                let gain = (cfg.penquest as f64 * cfg.rppenstep.powi(p.level)) as i64;
                p.add_penalty(PenaltyKind::Quest, gain);
            }
            self.qtimer = Utc::now().timestamp() + cfg.quest_interval_min;
            self.db.update_quest(None)?;
            let qnames: Vec<&str> = questors.iter().map(String::as_str).collect();
            self.save(&qnames)?;
        }

        let p = self.db.player_mut(name)?;
        let mut penalty = base;
        if let Some(text) = text {
            penalty *= text.len() as i64;
        }
        penalty = (penalty as f64 * cfg.rppenstep.powi(p.level)) as i64;
        if cfg.limitpen > 0 && penalty > cfg.limitpen {
            penalty = cfg.limitpen;
        }
        p.add_penalty(kind, penalty);
        let nick = p.nick.clone();
        // No notice for quits and drops; the recipient is gone.
        if !matches!(kind, PenaltyKind::Quit | PenaltyKind::Dropped) {
            self.notice(
                irc,
                &nick,
                &format!(
                    "Penalty of {} added to your timer for {}.",
                    duration(penalty),
                    kind.desc()
                ),
            );
        }
        Ok(())
    }

    /// Take players offline if their nick has been missing since before
    /// the split grace period.
    pub(crate) fn expire_splits(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let cfg = self.conf.snapshot();
        let expiration = Utc::now().timestamp() - cfg.splitwait;
        let expired: Vec<String> = self
            .db
            .players()
            .filter(|p| {
                p.online
                    && !irc.user_exists(&p.nick)
                    && p.lastlogin.timestamp() <= expiration
            })
            .map(|p| p.name.clone())
            .collect();
        for name in &expired {
            info!("expiring {} who was lost in a netsplit", name);
            self.penalize(irc, name, PenaltyKind::Dropped, None)?;
            self.db.player_mut(name)?.online = false;
        }
        let names: Vec<&str> = expired.iter().map(String::as_str).collect();
        self.save(&names)
    }

    // === GAME TICK ===

    pub(crate) fn gametick(
        &mut self,
        irc: &mut dyn ClientCommands,
        now: i64,
        passed: i64,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        if cfg.detectsplits {
            self.expire_splits(irc)?;
        }
        self.events.refresh(&cfg.data_path(&cfg.eventsfile))?;

        let op = self.db.online_names();
        let online_count = op.len() as i64;
        let mut evil_count = 0i64;
        let mut good_count = 0i64;
        for name in &op {
            match self.db.player(name)?.alignment {
                Alignment::Evil => evil_count += 1,
                Alignment::Good => good_count += 1,
                Alignment::Neutral => {}
            }
        }

        let day_ticks = 86_400 / cfg.self_clock;
        if self.rng.int_between(RollKey::HogTrigger, 0, 20 * day_ticks) < online_count {
            self.hand_of_god(irc)?;
        }
        if self.rng.int_between(RollKey::TeamBattleTrigger, 0, 24 * day_ticks) < online_count {
            self.team_battle(irc)?;
        }
        if self.rng.int_between(RollKey::CalamityTrigger, 0, 8 * day_ticks) < online_count {
            self.calamity(irc)?;
        }
        if self.rng.int_between(RollKey::GodsendTrigger, 0, 4 * day_ticks) < online_count {
            self.godsend(irc)?;
        }
        if self.rng.int_between(RollKey::EvilnessTrigger, 0, 8 * day_ticks) < evil_count {
            self.evilness(irc)?;
        }
        if self.rng.int_between(RollKey::GoodnessTrigger, 0, 12 * day_ticks) < good_count {
            self.goodness(irc)?;
        }

        self.move_players(irc)?;
        self.quest_check(irc, now)?;

        if now % 120 == 0 && self.quest.is_some() {
            let quest = self.quest.clone();
            self.db.update_quest(quest.as_ref())?;
        }
        if now % 36_000 == 0 {
            let top: Vec<(String, i32, String, i64)> = self
                .db
                .top_players(3)
                .iter()
                .map(|p| (p.name.clone(), p.level, p.class.clone(), p.nextlvl))
                .collect();
            if !top.is_empty() {
                self.chanmsg(irc, "Idle RPG Top Players:");
                for (i, (name, level, class, nextlvl)) in top.iter().enumerate() {
                    self.chanmsg(
                        irc,
                        &format!(
                            "{name}, the level {level} {class}, is #{}! Next level in {}.",
                            i + 1,
                            duration(*nextlvl)
                        ),
                    );
                }
            }
            self.db.backup()?;
        }

        // High level players fight each other on the hour.
        let hlp: Vec<String> = op
            .iter()
            .filter(|n| self.db.player(n).map(|p| p.level >= 45).unwrap_or(false))
            .cloned()
            .collect();
        if now % 3_600 == 0 && hlp.len() as f64 > op.len() as f64 * 0.15 {
            if let Some(i) = self.rng.pick_index(RollKey::HourlyBattle, hlp.len()) {
                let name = hlp[i].clone();
                self.challenge_opp(irc, &name)?;
            }
        }

        if now % 600 == 0 && self.pause {
            self.chanmsg(irc, "WARNING: Cannot write database in PAUSE mode!");
        }

        for name in &op {
            let p = self.db.player_mut(name)?;
            p.nextlvl -= passed;
            p.idled += passed;
            if p.nextlvl < 1 {
                p.level += 1;
                p.nextlvl = level_time(&cfg, p.level);
                let (level, class, nextlvl) = (p.level, p.class.clone(), p.nextlvl);
                self.chanmsg(
                    irc,
                    &format!(
                        "{name}, the {class}, has attained level {level}! Next level in {}.",
                        duration(nextlvl)
                    ),
                );
                self.find_item(irc, name)?;
                // Players below level 25 have fewer battles.
                if level >= 25 || self.rng.one_chance_in(RollKey::LowLevelBattle, 4) {
                    self.challenge_opp(irc, name)?;
                }
            }
        }
        let names: Vec<&str> = op.iter().map(String::as_str).collect();
        self.save(&names)
    }

    /// The Hand of God pushes a random player forward or back.
    pub(crate) fn hand_of_god(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let op = self.db.online_names();
        let Some(i) = self.rng.pick_index(RollKey::HogPlayer, op.len()) else {
            return Ok(());
        };
        let name = op[i].clone();
        let (level, nextlvl) = {
            let p = self.db.player(&name)?;
            (p.level, p.nextlvl)
        };
        let amount = nextlvl * (5 + self.rng.int_between(RollKey::HogAmount, 0, 71)) / 100;
        if self.rng.one_chance_in(RollKey::HogEffect, 5) {
            self.logchanmsg(
                irc,
                &[&name],
                &format!(
                    "Verily I say unto thee, the Heavens have burst forth, and the blessed \
                     hand of God carried {name} {} toward level {}.",
                    duration(amount),
                    level + 1
                ),
            )?;
            self.db.player_mut(&name)?.nextlvl -= amount;
        } else {
            self.logchanmsg(
                irc,
                &[&name],
                &format!(
                    "Thereupon He stretched out His little finger among them and consumed \
                     {name} with fire, slowing the heathen {} from level {}.",
                    duration(amount),
                    level + 1
                ),
            )?;
            self.db.player_mut(&name)?.nextlvl += amount;
        }
        let nextlvl = self.db.player(&name)?.nextlvl;
        self.chanmsg(irc, &format!("{name} reaches next level in {}.", duration(nextlvl)));
        self.save(&[&name])
    }

    // === MOVEMENT ===

    pub(crate) fn move_players(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let mut op = self.db.online_names();
        if op.is_empty() {
            return Ok(());
        }
        self.rng.shuffle(RollKey::MoveOrder, &mut op);
        let cfg = self.conf.snapshot();
        let (mapx, mapy) = (cfg.mapx, cfg.mapy);

        // Waypoint questors walk toward the goal at a tenth of normal
        // speed and never brawl along the way.
        if let Some(quest) = self.quest.clone() {
            if let Some((destx, desty)) = quest.current_dest() {
                for qname in &quest.questors {
                    op.retain(|n| n != qname);
                    if !self.rng.one_chance_in(RollKey::QuestMovement, 10) {
                        continue;
                    }
                    let p = self.db.player_mut(qname)?;
                    p.posx = wrap_coord(p.posx + wrapped_step(p.posx, destx, mapx), mapx);
                    p.posy = wrap_coord(p.posy + wrapped_step(p.posy, desty, mapy), mapy);
                }
            }
        }

        let mut combatants: HashMap<(i32, i32), String> = HashMap::new();
        let wander_count = op.len() as i64;
        for name in op {
            let dx = self.rng.int_between(RollKey::MoveX, -1, 1) as i32;
            let dy = self.rng.int_between(RollKey::MoveY, -1, 1) as i32;
            let p = self.db.player_mut(&name)?;
            p.posx = wrap_coord(p.posx + dx, mapx);
            p.posy = wrap_coord(p.posy + dy, mapy);
            let pos = (p.posx, p.posy);

            if let Some(other) = combatants.get(&pos).cloned() {
                let other_is_admin = self.db.player(&other)?.isadmin;
                if other_is_admin && self.rng.one_chance_in(RollKey::MoveBow, 100) {
                    self.chanmsg(irc, &format!("{name} encounters {other} and bows humbly."));
                } else if self.rng.one_chance_in(RollKey::MoveCombat, wander_count) {
                    self.pvp_battle(
                        irc,
                        &name,
                        Some(&other),
                        "come upon",
                        "and taken them in combat",
                        "and been defeated in combat",
                    )?;
                    combatants.remove(&pos);
                }
            } else {
                combatants.insert(pos, name);
            }
        }
        Ok(())
    }

    // === QUESTS ===

    pub(crate) fn quest_start(&mut self, irc: &mut dyn ClientCommands, now: i64) -> Result<()> {
        let cfg = self.conf.snapshot();
        let latest_login = now - 36_000;
        let eligible: Vec<String> = self
            .db
            .players()
            .filter(|p| {
                p.online
                    && p.level > cfg.quest_min_level
                    && p.lastlogin.timestamp() < latest_login
            })
            .map(|p| p.name.clone())
            .collect();
        if eligible.len() < 4 {
            return Ok(());
        }
        let picks = self.rng.sample_indices(RollKey::QuestMembers, eligible.len(), 4);
        let questors: Vec<String> = picks.iter().map(|&i| eligible[i].clone()).collect();
        let templates = self.events.quests().to_vec();
        let Some(t) = self
            .rng
            .pick_index(RollKey::QuestSelection, templates.len())
            .map(|i| templates[i].clone())
        else {
            return Ok(());
        };

        let quest = match t {
            QuestTemplate::Timed(text) => {
                let quest_time = self.rng.int_between(RollKey::QuestTime, 6, 12) * 3_600;
                self.chanmsg(
                    irc,
                    &format!(
                        "{}, {}, {}, and {} have been chosen by the gods to {text}.  \
                         Quest to end in {}.",
                        questors[0],
                        questors[1],
                        questors[2],
                        questors[3],
                        duration(quest_time)
                    ),
                );
                Quest { questors, text, mode: QuestMode::Timed { end: now + quest_time } }
            }
            QuestTemplate::Waypoint { dests, text } => {
                self.chanmsg(
                    irc,
                    &format!(
                        "{}, {}, {}, and {} have been chosen by the gods to {text}.  \
                         Participants must first reach ({},{}), then ({},{}).",
                        questors[0],
                        questors[1],
                        questors[2],
                        questors[3],
                        dests[0].0,
                        dests[0].1,
                        dests[1].0,
                        dests[1].1
                    ),
                );
                Quest { questors, text, mode: QuestMode::Waypoint { dests, stage: 1 } }
            }
        };
        self.db.update_quest(Some(&quest))?;
        self.quest = Some(quest);
        Ok(())
    }

    fn complete_quest(&mut self, irc: &mut dyn ClientCommands, now: i64, msg: &str) -> Result<()> {
        let cfg = self.conf.snapshot();
        let questors = self.quest.take().expect("quest in progress").questors;
        let names: Vec<&str> = questors.iter().map(String::as_str).collect();
        self.logchanmsg(irc, &names, msg)?;
        for name in &questors {
            let p = self.db.player_mut(name)?;
            p.nextlvl = (p.nextlvl as f64 * 0.75) as i64;
        }
        self.qtimer = now + cfg.quest_interval_min;
        self.db.update_quest(None)?;
        let names: Vec<&str> = questors.iter().map(String::as_str).collect();
        self.save(&names)
    }

    pub(crate) fn quest_check(&mut self, irc: &mut dyn ClientCommands, now: i64) -> Result<()> {
        let Some(quest) = self.quest.clone() else {
            if now >= self.qtimer {
                self.quest_start(irc, now)?;
            }
            return Ok(());
        };
        let qp = &quest.questors;
        match quest.mode {
            QuestMode::Timed { end } => {
                if now >= end {
                    let msg = format!(
                        "{}, {}, {}, and {} have blessed the realm by completing their \
                         quest! 25% of their burden is eliminated.",
                        qp[0], qp[1], qp[2], qp[3]
                    );
                    self.complete_quest(irc, now, &msg)?;
                }
            }
            QuestMode::Waypoint { ref dests, stage } => {
                let (destx, desty) = dests[stage - 1];
                for name in qp {
                    let p = self.db.player(name)?;
                    if p.posx != destx || p.posy != desty {
                        return Ok(());
                    }
                }
                let dests_left = dests.len() as i64 - stage as i64;
                if dests_left > 0 {
                    let remain = if dests_left == 1 { "remains" } else { "remain" };
                    self.chanmsg(
                        irc,
                        &format!(
                            "{}, {}, {}, and {} have reached a landmark on their journey! \
                             {dests_left} landmark{} {remain}.",
                            qp[0],
                            qp[1],
                            qp[2],
                            qp[3],
                            plural(dests_left)
                        ),
                    );
                    if let Some(Quest { mode: QuestMode::Waypoint { stage, .. }, .. }) =
                        self.quest.as_mut()
                    {
                        *stage += 1;
                    }
                    let quest = self.quest.clone();
                    self.db.update_quest(quest.as_ref())?;
                } else {
                    let msg = format!(
                        "{}, {}, {}, and {} have completed their journey! 25% of \
                         their burden is eliminated.",
                        qp[0], qp[1], qp[2], qp[3]
                    );
                    self.complete_quest(irc, now, &msg)?;
                }
            }
        }
        Ok(())
    }
}

// === CONNECTION EVENTS ===

impl BotEvents for GameBot {
    fn connected(&mut self) {
        self.state = BotState::Connected;
        info!("connected to server");
    }

    fn disconnected(&mut self) {
        self.state = BotState::Disconnected;
        self.last_tick = None;
        info!("disconnected from server");
    }

    fn ready(&mut self, irc: &mut dyn ClientCommands) {
        self.state = BotState::Ready;
        let cfg = self.conf.snapshot();
        if let Err(e) = self.events.refresh(&cfg.data_path(&cfg.eventsfile)) {
            debug!("could not load events file: {e}");
        }

        // Players whose nick and userhost are still present come back
        // online automatically; everyone else is logged out.
        let mut autologin = Vec::new();
        let mut dropped = Vec::new();
        for p in self.db.players() {
            if !p.online {
                continue;
            }
            if irc.match_user(&p.nick, &p.userhost) {
                autologin.push(p.name.clone());
            } else {
                dropped.push(p.name.clone());
            }
        }
        let now = Utc::now();
        for name in &dropped {
            if let Ok(p) = self.db.player_mut(name) {
                p.online = false;
                p.lastlogin = now;
            }
        }
        if let Err(e) = self.save_all() {
            debug!("could not save players during startup: {e}");
        }
        if autologin.is_empty() {
            self.chanmsg(irc, "0 users qualified for auto login.");
        } else {
            autologin.sort();
            self.chanmsg(
                irc,
                &format!(
                    "{} user{} automatically logged in; accounts: {}",
                    autologin.len(),
                    plural(autologin.len() as i64),
                    autologin.join(", ")
                ),
            );
            if irc.bot_has_ops() {
                self.acquired_ops(irc);
            }
        }
        self.qtimer = now.timestamp()
            + self.rng.int_between(
                RollKey::QtimerInit,
                cfg.quest_interval_min,
                cfg.quest_interval_max,
            );
    }

    fn acquired_ops(&mut self, irc: &mut dyn ClientCommands) {
        let cfg = self.conf.snapshot();
        if !cfg.voiceonlogin || self.state != BotState::Ready {
            return;
        }
        let voiced = self
            .db
            .players()
            .filter(|p| p.online)
            .map(|p| p.nick.clone())
            .collect();
        irc.set_channel_voices(&voiced);
    }

    fn nick_parted(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser) {
        let Some(name) = self.player_name_by_userhost(&user.userhost) else {
            return;
        };
        if let Err(e) = self.penalize(irc, &name, PenaltyKind::Part, None) {
            debug!("part penalty failed for {name}: {e}");
        }
        if let Ok(p) = self.db.player_mut(&name) {
            p.online = false;
            p.lastlogin = Utc::now();
        }
        if let Err(e) = self.save(&[&name]) {
            debug!("could not save {name}: {e}");
        }
    }

    fn nick_kicked(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser) {
        let Some(name) = self.player_name_by_userhost(&user.userhost) else {
            return;
        };
        if let Err(e) = self.penalize(irc, &name, PenaltyKind::Kick, None) {
            debug!("kick penalty failed for {name}: {e}");
        }
        if let Ok(p) = self.db.player_mut(&name) {
            p.online = false;
            p.lastlogin = Utc::now();
        }
        if let Err(e) = self.save(&[&name]) {
            debug!("could not save {name}: {e}");
        }
    }

    fn netsplit(&mut self, user: &ChannelUser) {
        // Stay online; expire_splits handles the no-show case.
        if let Some(name) = self.player_name_by_userhost(&user.userhost) {
            if let Ok(p) = self.db.player_mut(&name) {
                p.lastlogin = Utc::now();
            }
        }
    }

    fn nick_dropped(&mut self, user: &ChannelUser) {
        if let Some(name) = self.player_name_by_userhost(&user.userhost) {
            if let Ok(p) = self.db.player_mut(&name) {
                p.lastlogin = Utc::now();
            }
        }
    }

    fn nick_quit(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser) {
        let Some(name) = self.player_name_by_userhost(&user.userhost) else {
            return;
        };
        if let Err(e) = self.penalize(irc, &name, PenaltyKind::Quit, None) {
            debug!("quit penalty failed for {name}: {e}");
        }
        if let Ok(p) = self.db.player_mut(&name) {
            p.online = false;
            p.lastlogin = Utc::now();
        }
        if let Err(e) = self.save(&[&name]) {
            debug!("could not save {name}: {e}");
        }
    }

    fn nick_changed(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, new_nick: &str) {
        let Some(name) = self.player_name_by_userhost(&user.userhost) else {
            return;
        };
        if let Ok(p) = self.db.player_mut(&name) {
            p.nick = new_nick.to_string();
            // Keep the stored userhost in sync with the new nick.
            if let Some((_, rest)) = p.userhost.split_once('!') {
                p.userhost = format!("{new_nick}!{rest}");
            }
        }
        if let Err(e) = self.penalize(irc, &name, PenaltyKind::Nick, None) {
            debug!("nick penalty failed for {name}: {e}");
        }
    }

    fn private_message(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.state != BotState::Ready {
            self.notice(irc, &user.nick, "The bot isn't ready yet.");
            return;
        }
        self.handle_command(irc, user, text);
    }

    fn channel_message(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str) {
        if let Some(name) = self.player_name_by_userhost(&user.userhost) {
            if let Err(e) = self.penalize(irc, &name, PenaltyKind::Message, Some(text)) {
                debug!("message penalty failed for {name}: {e}");
            }
        }
    }

    fn channel_notice(&mut self, irc: &mut dyn ClientCommands, user: &ChannelUser, text: &str) {
        if let Some(name) = self.player_name_by_userhost(&user.userhost) {
            if let Err(e) = self.penalize(irc, &name, PenaltyKind::Message, Some(text)) {
                debug!("message penalty failed for {name}: {e}");
            }
        }
    }

    fn think(&mut self, irc: &mut dyn ClientCommands, now: i64) -> Result<()> {
        if self.state != BotState::Ready {
            self.last_tick = Some(now);
            return Ok(());
        }
        let passed = match self.last_tick {
            Some(last) => (now - last).max(0),
            None => 1,
        };
        self.last_tick = Some(now);
        self.gametick(irc, now, passed)
    }
}
