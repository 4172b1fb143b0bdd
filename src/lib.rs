pub mod chat;
pub mod config;
pub mod data;
pub mod filter;
pub mod logging;
pub mod map;
pub mod server;
pub mod session;
