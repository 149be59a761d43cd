//! Configuration Module
//!
//! Configuration loading for the ticker feed.

mod settings;

pub use settings::{
    ChannelSettings, ConfigError, Endpoints, FeedConfig, PollingSettings, ReconnectSettings,
    ServerSettings,
};
