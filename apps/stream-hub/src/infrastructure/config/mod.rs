//! Configuration Module
//!
//! Configuration loading for the hub service.

mod settings;

pub use settings::{
    ApiKey, ConfigError, HubConfig, LaneSettings, PushSettings, ServerSettings, StoreSettings,
};
