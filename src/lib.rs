// src/lib.rs

//! Starwatch: private leaderboard watcher

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
