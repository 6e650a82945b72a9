//! Battles, blessings, curses, and loot.
//!
//! All of these run off [`GameBot`]'s keyed RNG so tests can force any
//! outcome.

use crate::core::error::Result;
use crate::game::bot::GameBot;
use crate::game::player::{Alignment, ItemSlot};
use crate::game::rng::RollKey;
use crate::irc::client::ClientCommands;
use crate::util::duration;

struct SpecialItem {
    minlvl: i32,
    itemlvl: i64,
    lvlspread: i64,
    slot: ItemSlot,
    name: &'static str,
    flavor: &'static str,
}

// Order matters: each item is less likely to be picked than the previous.
const SPECIAL_ITEMS: [SpecialItem; 8] = [
    SpecialItem {
        minlvl: 25,
        itemlvl: 50,
        lvlspread: 25,
        slot: ItemSlot::Helm,
        name: "Mattt's Omniscience Grand Crown",
        flavor: "Your enemies fall before you as you anticipate their every move.",
    },
    SpecialItem {
        minlvl: 25,
        itemlvl: 50,
        lvlspread: 25,
        slot: ItemSlot::Ring,
        name: "Juliet's Glorious Ring of Sparkliness",
        flavor: "Your enemies are blinded by both its glory and their greed as you \
                 bring desolation upon them.",
    },
    SpecialItem {
        minlvl: 30,
        itemlvl: 75,
        lvlspread: 25,
        slot: ItemSlot::Tunic,
        name: "Res0's Protectorate Plate Mail",
        flavor: "Your enemies cower in fear as their attacks have no effect on you.",
    },
    SpecialItem {
        minlvl: 35,
        itemlvl: 100,
        lvlspread: 25,
        slot: ItemSlot::Amulet,
        name: "Dwyn's Storm Magic Amulet",
        flavor: "Your enemies are swept away by an elemental fury before the war \
                 has even begun.",
    },
    SpecialItem {
        minlvl: 40,
        itemlvl: 150,
        lvlspread: 25,
        slot: ItemSlot::Weapon,
        name: "Jotun's Fury Colossal Sword",
        flavor: "Your enemies' hatred is brought to a quick end as you arc your \
                 wrist, dealing the crushing blow.",
    },
    SpecialItem {
        minlvl: 45,
        itemlvl: 175,
        lvlspread: 26,
        slot: ItemSlot::Weapon,
        name: "Drdink's Cane of Blind Rage",
        flavor: "Your enemies are tossed aside as you blindly swing your arm \
                 around hitting stuff.",
    },
    SpecialItem {
        minlvl: 48,
        itemlvl: 250,
        lvlspread: 51,
        slot: ItemSlot::Boots,
        name: "Mrquick's Magical Boots of Swiftness",
        flavor: "Your enemies are left choking on your dust as you run from them \
                 very, very quickly.",
    },
    SpecialItem {
        minlvl: 25,
        itemlvl: 300,
        lvlspread: 51,
        slot: ItemSlot::Weapon,
        name: "Jeff's Cluehammer of Doom",
        flavor: "Your enemies are left with a sudden and intense clarity of \
                 mind... even as you relieve them of it.",
    },
];

fn calamity_text(name: &str, slot: ItemSlot) -> String {
    match slot {
        ItemSlot::Ring => format!("{name} accidentally smashed their ring with a hammer!"),
        ItemSlot::Amulet => format!("{name} fell, chipping the stone in their amulet!"),
        ItemSlot::Charm => format!("{name} slipped and dropped their charm in a dirty bog!"),
        ItemSlot::Weapon => format!("{name} left their weapon out in the rain to rust!"),
        ItemSlot::Helm => format!("{name}'s helm was touched by a rust monster!"),
        ItemSlot::Tunic => {
            format!("{name} spilled a level 7 shrinking potion on their tunic!")
        }
        ItemSlot::Gloves => format!("{name} dipped their gloved fingers in a pool of acid!"),
        ItemSlot::Leggings => {
            format!("{name} burned a hole through their leggings while ironing them!")
        }
        ItemSlot::Shield => {
            format!("{name}'s shield was damaged by a dragon's fiery breath!")
        }
        ItemSlot::Boots => format!("{name} stepped in some hot lava!"),
    }
}

fn godsend_text(name: &str, slot: ItemSlot) -> String {
    match slot {
        ItemSlot::Ring => format!("{name} dipped their ring into a sacred fountain!"),
        ItemSlot::Amulet => format!("{name}'s amulet was blessed by a passing cleric!"),
        ItemSlot::Charm => format!("{name}'s charm ate a bolt of lightning!"),
        ItemSlot::Weapon => format!("{name} sharpened the edge of their weapon!"),
        ItemSlot::Helm => format!("{name} polished their helm to a mirror shine."),
        ItemSlot::Tunic => {
            format!("A magician cast a spell of Rigidity on {name}'s tunic!")
        }
        ItemSlot::Gloves => format!("{name} lined their gloves with a magical cloth!"),
        ItemSlot::Leggings => {
            format!("The local wizard imbued {name}'s pants with a Spirit of Fortitude!")
        }
        ItemSlot::Shield => {
            format!("{name} reinforced their shield with a dragon's scale!")
        }
        ItemSlot::Boots => format!("A sorceror enchanted {name}'s boots with Swiftness!"),
    }
}

impl GameBot {
    /// Find a random item, keeping it only if it beats the current one.
    /// High level players have a shot at the unique artifacts first.
    pub(crate) fn find_item(&mut self, irc: &mut dyn ClientCommands, name: &str) -> Result<()> {
        let (level, nick) = {
            let p = self.db.player(name)?;
            (p.level, p.nick.clone())
        };
        for si in &SPECIAL_ITEMS {
            if level >= si.minlvl && self.rng.one_chance_in(RollKey::SpecialItemFind, 40) {
                let ilvl =
                    si.itemlvl + self.rng.int_between(RollKey::SpecialItemLevel, 0, si.lvlspread);
                self.db.player_mut(name)?.acquire_item(si.slot, ilvl, si.name);
                self.notice(
                    irc,
                    &nick,
                    &format!(
                        "The light of the gods shines down upon you! You have found the \
                         level {ilvl} {}!  {}",
                        si.name, si.flavor
                    ),
                );
                self.save(&[name])?;
                return Ok(());
            }
        }

        let Some(i) = self.rng.pick_index(RollKey::FindItemSlot, ItemSlot::ALL.len()) else {
            return Ok(());
        };
        let slot = ItemSlot::ALL[i];
        // Found items never exceed one and a half times the finder's level.
        let max = (level as f64 * 1.5) as i64;
        let found = self.rng.item_level_flips(RollKey::FindItemLevel, 1.4, max);
        let old = self.db.player(name)?.item_level(slot);
        if found > old {
            self.notice(
                irc,
                &nick,
                &format!(
                    "You found a level {found} {desc}! Your current {desc} is only \
                     level {old}, so it seems Luck is with you!",
                    desc = slot.desc()
                ),
            );
            self.db.player_mut(name)?.acquire_item(slot, found, "");
            self.save(&[name])?;
        } else {
            self.notice(
                irc,
                &nick,
                &format!(
                    "You found a level {found} {desc}. Your current {desc} is level \
                     {old}, so it seems Luck is against you.  You toss the {desc}.",
                    desc = slot.desc()
                ),
            );
        }
        Ok(())
    }

    /// Pit a player against a random opponent, possibly the bot itself.
    pub(crate) fn challenge_opp(&mut self, irc: &mut dyn ClientCommands, name: &str) -> Result<()> {
        let mut op = self.db.online_names();
        op.retain(|n| n != name);
        // One extra slot for the bot opponent.
        let Some(i) = self.rng.pick_index(RollKey::ChallengeOpp, op.len() + 1) else {
            return Ok(());
        };
        let opp = op.get(i).cloned();
        self.pvp_battle(irc, name, opp.as_deref(), "challenged", "and won", "and lost")
    }

    pub(crate) fn pvp_battle(
        &mut self,
        irc: &mut dyn ClientCommands,
        name: &str,
        opp: Option<&str>,
        flavor_start: &str,
        flavor_win: &str,
        flavor_loss: &str,
    ) -> Result<()> {
        let cfg = self.conf.snapshot();
        let (oppname, oppsum) = match opp {
            Some(o) => (o.to_string(), self.db.player(o)?.battleitemsum(&cfg)),
            None => (cfg.botnick.clone(), self.db.max_player_power() + 1),
        };
        let (playersum, alignment) = {
            let p = self.db.player(name)?;
            (p.battleitemsum(&cfg), p.alignment)
        };
        let playerroll = self.rng.int_between(RollKey::PvpPlayerRoll, 0, playersum);
        let opproll = self.rng.int_between(RollKey::PvpOppRoll, 0, oppsum);
        if playerroll >= opproll {
            let gain = match opp {
                None => 20,
                Some(o) => (self.db.player(o)?.level as i64 / 4).max(7),
            };
            let amount = gain * self.db.player(name)?.nextlvl / 100;
            self.logchanmsg(
                irc,
                &[name],
                &format!(
                    "{name} [{playerroll}/{playersum}] has {flavor_start} {oppname} \
                     [{opproll}/{oppsum}] {flavor_win}! {} is removed from {name}'s clock.",
                    duration(amount)
                ),
            )?;
            let nextlvl = {
                let p = self.db.player_mut(name)?;
                p.nextlvl -= amount;
                p.nextlvl
            };
            if nextlvl > 0 {
                self.chanmsg(irc, &format!("{name} reaches next level in {}.", duration(nextlvl)));
            }
            if let Some(opp) = opp {
                let crit_odds = match alignment {
                    Alignment::Good => 50,
                    Alignment::Neutral => 35,
                    Alignment::Evil => 20,
                };
                if self.rng.one_chance_in(RollKey::PvpCritical, crit_odds) {
                    let pct = 5 + self.rng.int_between(RollKey::PvpCriticalPct, 0, 20);
                    let penalty = pct * self.db.player(opp)?.nextlvl / 100;
                    self.logchanmsg(
                        irc,
                        &[opp],
                        &format!(
                            "{name} has dealt {opp} a Critical Strike! {} is added to \
                             {opp}'s clock.",
                            duration(penalty)
                        ),
                    )?;
                    let opp_nextlvl = {
                        let p = self.db.player_mut(opp)?;
                        p.nextlvl += penalty;
                        p.nextlvl
                    };
                    self.chanmsg(
                        irc,
                        &format!("{opp} reaches next level in {}.", duration(opp_nextlvl)),
                    );
                } else if self.db.player(name)?.level > 19
                    && self.rng.one_chance_in(RollKey::PvpSwapItem, 25)
                {
                    if let Some(i) = self.rng.pick_index(RollKey::PvpSwapSlot, ItemSlot::ALL.len())
                    {
                        let slot = ItemSlot::ALL[i];
                        let mine = self.db.player(name)?.item_level(slot);
                        let theirs = self.db.player(opp)?.item_level(slot);
                        if theirs > mine {
                            self.logchanmsg(
                                irc,
                                &[name, opp],
                                &format!(
                                    "In the fierce battle, {opp} dropped their level {theirs} \
                                     {desc}! {name} picks it up, tossing their old level \
                                     {mine} {desc} to {opp}.",
                                    desc = slot.desc()
                                ),
                            )?;
                            self.db.swap_items(name, opp, slot)?;
                        }
                    }
                }
            }
        } else {
            let loss = match opp {
                None => 10,
                Some(o) => (self.db.player(o)?.level as i64 / 7).max(7),
            };
            let amount = loss * self.db.player(name)?.nextlvl / 100;
            self.logchanmsg(
                irc,
                &[name],
                &format!(
                    "{name} [{playerroll}/{playersum}] has {flavor_start} {oppname} \
                     [{opproll}/{oppsum}] {flavor_loss}! {} is added to {name}'s clock.",
                    duration(amount)
                ),
            )?;
            let nextlvl = {
                let p = self.db.player_mut(name)?;
                p.nextlvl += amount;
                p.nextlvl
            };
            self.chanmsg(irc, &format!("{name} reaches next level in {}.", duration(nextlvl)));
        }

        let find_odds = match alignment {
            Alignment::Good => 50,
            Alignment::Neutral => 67,
            Alignment::Evil => 100,
        };
        if self.rng.one_chance_in(RollKey::PvpFindItem, find_odds) {
            self.logchanmsg(
                irc,
                &[name],
                &format!(
                    "While recovering from battle, {name} notices a glint in the mud. \
                     Upon investigation, they find an old lost item!"
                ),
            )?;
            self.find_item(irc, name)?;
        }
        Ok(())
    }

    /// A 3-on-3 battle between random online players.
    pub(crate) fn team_battle(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let cfg = self.conf.snapshot();
        let op = self.db.online_names();
        if op.len() < 6 {
            return Ok(());
        }
        let picks = self.rng.sample_indices(RollKey::TeamBattleMembers, op.len(), 6);
        let chosen: Vec<String> = picks.iter().map(|&i| op[i].clone()).collect();
        let mut sums = [0i64; 6];
        let mut min_nextlvl = i64::MAX;
        for (i, name) in chosen.iter().enumerate() {
            let p = self.db.player(name)?;
            sums[i] = p.battleitemsum(&cfg);
            min_nextlvl = min_nextlvl.min(p.nextlvl);
        }
        let team_a: i64 = sums[0..3].iter().sum();
        let team_b: i64 = sums[3..6].iter().sum();
        let gain = min_nextlvl / 5;
        let roll_a = self.rng.int_between(RollKey::TeamARoll, 0, team_a);
        let roll_b = self.rng.int_between(RollKey::TeamBRoll, 0, team_b);
        let outcome = if roll_a >= roll_b {
            format!("and won!  {} is removed from their clocks.", duration(gain))
        } else {
            format!("and lost!  {} is added to their clocks.", duration(gain))
        };
        let msg = format!(
            "{}, {}, and {} [{roll_a}/{team_a}] have team battled {}, {}, and {} \
             [{roll_b}/{team_b}] {outcome}",
            chosen[0], chosen[1], chosen[2], chosen[3], chosen[4], chosen[5]
        );
        let winners: Vec<&str> = chosen[0..3].iter().map(String::as_str).collect();
        self.logchanmsg(irc, &winners, &msg)?;
        for name in &chosen[0..3] {
            let p = self.db.player_mut(name)?;
            if roll_a >= roll_b {
                p.nextlvl -= gain;
            } else {
                p.nextlvl += gain;
            }
        }
        Ok(())
    }

    /// Something terrible happens to a random player.
    pub(crate) fn calamity(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let op = self.db.online_names();
        let Some(i) = self.rng.pick_index(RollKey::CalamityTarget, op.len()) else {
            return Ok(());
        };
        let name = op[i].clone();

        let mut slots: Vec<ItemSlot> = self.db.player(&name)?.items.keys().copied().collect();
        slots.sort();
        if !slots.is_empty() && self.rng.one_chance_in(RollKey::CalamityItemDamage, 10) {
            let i = self
                .rng
                .pick_index(RollKey::CalamitySlot, slots.len())
                .expect("slots nonempty");
            let slot = slots[i];
            let msg = format!(
                "{} {name}'s {} loses 10% of its effectiveness.",
                calamity_text(&name, slot),
                slot.desc()
            );
            self.logchanmsg(irc, &[&name], &msg)?;
            let p = self.db.player_mut(&name)?;
            if let Some(item) = p.items.get_mut(&slot) {
                item.level = item.level * 9 / 10;
            }
            return self.save(&[&name]);
        }

        let calamities = self.events.calamities().to_vec();
        let Some(i) = self.rng.pick_index(RollKey::CalamityAction, calamities.len()) else {
            return Ok(());
        };
        let action = calamities[i].clone();
        let amount = {
            let p = self.db.player(&name)?;
            self.rng.int_between(RollKey::CalamitySetbackPct, 5, 13) * p.nextlvl / 100
        };
        let (level, nextlvl) = {
            let p = self.db.player_mut(&name)?;
            p.nextlvl += amount;
            (p.level, p.nextlvl)
        };
        self.logchanmsg(
            irc,
            &[&name],
            &format!(
                "{name} {action}! This terrible calamity has slowed them {} from level {}.",
                duration(amount),
                level + 1
            ),
        )?;
        if nextlvl > 0 {
            self.chanmsg(irc, &format!("{name} reaches next level in {}.", duration(nextlvl)));
        }
        self.save(&[&name])
    }

    /// Something wonderful happens to a random player.
    pub(crate) fn godsend(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let op = self.db.online_names();
        let Some(i) = self.rng.pick_index(RollKey::GodsendTarget, op.len()) else {
            return Ok(());
        };
        let name = op[i].clone();

        let mut slots: Vec<ItemSlot> = self.db.player(&name)?.items.keys().copied().collect();
        slots.sort();
        if !slots.is_empty() && self.rng.one_chance_in(RollKey::GodsendItemImprove, 10) {
            let i = self
                .rng
                .pick_index(RollKey::GodsendSlot, slots.len())
                .expect("slots nonempty");
            let slot = slots[i];
            let msg = format!(
                "{} {name}'s {} gains 10% effectiveness.",
                godsend_text(&name, slot),
                slot.desc()
            );
            self.logchanmsg(irc, &[&name], &msg)?;
            let p = self.db.player_mut(&name)?;
            if let Some(item) = p.items.get_mut(&slot) {
                item.level = item.level * 11 / 10;
            }
            return self.save(&[&name]);
        }

        let godsends = self.events.godsends().to_vec();
        let Some(i) = self.rng.pick_index(RollKey::GodsendAction, godsends.len()) else {
            return Ok(());
        };
        let action = godsends[i].clone();
        let amount = {
            let p = self.db.player(&name)?;
            self.rng.int_between(RollKey::GodsendAmountPct, 5, 13) * p.nextlvl / 100
        };
        let (level, nextlvl) = {
            let p = self.db.player_mut(&name)?;
            p.nextlvl -= amount;
            (p.level, p.nextlvl)
        };
        self.logchanmsg(
            irc,
            &[&name],
            &format!(
                "{name} {action}! This wondrous godsend has accelerated them {} towards level {}.",
                duration(amount),
                level + 1
            ),
        )?;
        if nextlvl > 0 {
            self.chanmsg(irc, &format!("{name} reaches next level in {}.", duration(nextlvl)));
        }
        self.save(&[&name])
    }

    /// An evil player steals an item or is forsaken by their god.
    pub(crate) fn evilness(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let op = self.db.online_names();
        let evil: Vec<String> = op
            .iter()
            .filter(|n| {
                self.db
                    .player(n)
                    .map(|p| p.alignment == Alignment::Evil)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        let Some(i) = self.rng.pick_index(RollKey::EvilnessPlayer, evil.len()) else {
            return Ok(());
        };
        let name = evil[i].clone();

        if self.rng.one_chance_in(RollKey::EvilnessTheft, 2) {
            let good: Vec<String> = op
                .iter()
                .filter(|n| {
                    self.db
                        .player(n)
                        .map(|p| p.alignment == Alignment::Good)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            let Some(i) = self.rng.pick_index(RollKey::EvilnessTarget, good.len()) else {
                return Ok(());
            };
            let target = good[i].clone();
            let Some(i) = self.rng.pick_index(RollKey::EvilnessSlot, ItemSlot::ALL.len()) else {
                return Ok(());
            };
            let slot = ItemSlot::ALL[i];
            let mine = self.db.player(&name)?.item_level(slot);
            let theirs = self.db.player(&target)?.item_level(slot);
            if mine < theirs {
                self.db.swap_items(&name, &target, slot)?;
                self.logchanmsg(
                    irc,
                    &[&name, &target],
                    &format!(
                        "{name} stole {target}'s level {theirs} {desc} while they were \
                         sleeping!  {name} leaves their old level {mine} {desc} behind, \
                         which {target} then takes.",
                        desc = slot.desc()
                    ),
                )?;
                self.save(&[&name, &target])?;
            } else {
                let nick = self.db.player(&name)?.nick.clone();
                self.notice(
                    irc,
                    &nick,
                    &format!(
                        "You made to steal {target}'s {}, but realized it was lower level \
                         than your own.  You creep back into the shadows.",
                        slot.desc()
                    ),
                );
            }
        } else {
            let amount = {
                let p = self.db.player(&name)?;
                p.nextlvl * self.rng.int_between(RollKey::EvilnessPenaltyPct, 1, 6) / 100
            };
            let nextlvl = {
                let p = self.db.player_mut(&name)?;
                p.nextlvl += amount;
                p.nextlvl
            };
            self.logchanmsg(
                irc,
                &[&name],
                &format!(
                    "{name} is forsaken by their evil god. {} is added to their clock.",
                    duration(amount)
                ),
            )?;
            if nextlvl > 0 {
                self.chanmsg(irc, &format!("{name} reaches next level in {}.", duration(nextlvl)));
            }
            self.save(&[&name])?;
        }
        Ok(())
    }

    /// Two good players pray together and are both rewarded.
    pub(crate) fn goodness(&mut self, irc: &mut dyn ClientCommands) -> Result<()> {
        let good: Vec<String> = self
            .db
            .online_names()
            .into_iter()
            .filter(|n| {
                self.db
                    .player(n)
                    .map(|p| p.alignment == Alignment::Good)
                    .unwrap_or(false)
            })
            .collect();
        if good.len() < 2 {
            return Ok(());
        }
        let picks = self.rng.sample_indices(RollKey::GoodnessPlayers, good.len(), 2);
        let a = good[picks[0]].clone();
        let b = good[picks[1]].clone();
        let gain = self.rng.int_between(RollKey::GoodnessGainPct, 5, 13);
        self.logchanmsg(
            irc,
            &[&a, &b],
            &format!(
                "{a} and {b} have not let the iniquities of evil people poison them. \
                 Together have they prayed to their god, and light now shines down \
                 upon them. {gain}% of their time is removed from their clocks."
            ),
        )?;
        for name in [&a, &b] {
            let nextlvl = {
                let p = self.db.player_mut(name)?;
                p.nextlvl = p.nextlvl * (100 - gain) / 100;
                p.nextlvl
            };
            if nextlvl > 0 {
                self.chanmsg(irc, &format!("{name} reaches next level in {}.", duration(nextlvl)));
            }
        }
        self.save(&[&a, &b])
    }
}
