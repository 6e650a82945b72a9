//! The game half of the bot: players, persistence, the tick, quests,
//! combat, and the chat command surface.

pub mod bot;
pub mod combat;
pub mod commands;
pub mod events;
pub mod player;
pub mod quest;
pub mod rng;
pub mod store;

pub use bot::GameBot;
pub use player::{Alignment, Item, ItemSlot, PenaltyKind, Player};
pub use quest::{Quest, QuestMode};
pub use rng::{GameRng, RollKey, RollOverride};
pub use store::{GameDb, GameStorage, IdleRpgStore, SqliteStore};
