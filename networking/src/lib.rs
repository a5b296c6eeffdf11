pub mod config;
pub mod connection;
pub mod server;
pub mod sync;
pub mod types;
