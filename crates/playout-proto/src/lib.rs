//! Shared types for the playout engine: configuration, wire protocol,
//! published engine snapshot and text helpers.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod text;
