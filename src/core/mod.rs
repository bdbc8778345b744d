pub mod branch;
pub mod chat_stream;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod ids;
pub mod message;
pub mod models;
pub mod session;
pub mod store;
pub mod sync_bus;
pub mod throttle;
pub mod title;
pub mod transcript;
