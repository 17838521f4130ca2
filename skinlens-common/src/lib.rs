//! # SkinLens Common Library
//!
//! Shared code for the SkinLens services:
//! - Error type used for configuration, IO and database plumbing
//! - TOML bootstrap configuration and root folder resolution
//! - Analysis event types and the broadcast event bus
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{AnalysisEvent, EventBus};
