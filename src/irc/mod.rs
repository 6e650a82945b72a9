//! IRC protocol layer: codec, connection plumbing, and the channel client.

pub mod client;
pub mod message;
pub mod net;

pub use client::{BotEvents, ChannelUser, ClientCommands, IrcClient, Outbound};
pub use message::Message;
