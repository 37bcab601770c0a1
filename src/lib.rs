//! Anonymous one-to-one chat pairing: each WebSocket connection gets a
//! temporary identity, is matched with another waiting visitor and exchanges
//! messages until either side leaves.

pub mod channel;
pub mod config;
pub mod identity;
pub mod messages;
pub mod models;
pub mod pairing;
pub mod server;
pub mod session;
pub mod store;
pub mod view;
