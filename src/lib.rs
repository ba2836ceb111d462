pub mod blockchain;
pub mod config;
