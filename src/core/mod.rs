//! Core translation engine module

pub mod budget;
pub mod client;
pub mod config;
pub mod errors;
pub mod mock;
pub mod models;
pub mod prompt;
pub mod quality;
pub mod retry;
