//! Core library for musivault: pull a Spotify user's library into a local SQLite vault.
pub mod config;
pub mod db;
pub mod models;
pub mod store;
pub mod library;
pub mod retry;
pub mod api;
pub mod collector;
pub mod server;
pub mod export;
pub mod backup;
