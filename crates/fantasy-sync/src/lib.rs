// Library root: re-exports all modules so integration tests and external
// consumers can access the crate's public API.

pub mod binding;
pub mod cache;
pub mod config;
pub mod db;
pub mod events;
pub mod game;
pub mod manager;
pub mod persistence;
pub mod remote;
pub mod session;
