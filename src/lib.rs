//! dallyrpg - an idle RPG that lives on IRC.
//!
//! The bot connects to an IRC network, sits in a single channel, and runs a
//! persistent world simulation in which the only way to advance is to do
//! nothing. Talking, parting, or quitting sets your character back.
//!
//! The crate is split along the protocol/game seam:
//! - [`irc`] owns the connection, the wire codec, the channel roster, and
//!   outbound throttling.
//! - [`game`] owns the player base, the periodic tick, quests, combat, and
//!   persistence.
//!
//! The two halves only talk through the [`irc::ClientCommands`] and
//! [`irc::BotEvents`] traits, so each side can be tested with a fake of the
//! other.

pub mod core;
pub mod game;
pub mod irc;
pub mod util;
