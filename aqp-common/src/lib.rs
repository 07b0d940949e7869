//! # AQP Common Library
//!
//! Shared code for the AQP audio queue player crates:
//! - Error type shared by configuration loading
//! - TOML bootstrap configuration (playback tuning + logging)
//! - Player event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, LifecycleState, PlayerEvent};
