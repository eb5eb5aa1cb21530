//! # Callmix
//!
//! Real-time media bridging for telephony: bridges join call legs into a
//! shared audio path, bridge technologies relay or mix their audio, and
//! audiohooks let other components tap, inject or transform a channel's
//! audio without owning the call.
//!
//! Start with [`bridge::BridgeCore::with_default_technologies`], create a
//! [`bridge::Bridge`] and join or impart [`channel::Channel`]s into it.

pub mod alert;
pub mod audio;
pub mod audiohook;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod technology;

pub use bridge::{Bridge, BridgeChannel, BridgeCore, BridgeFeatures, BridgeFlags, ChannelState};
pub use channel::{Channel, ChannelEndpoint};
pub use config::CoreConfig;
pub use error::{AudiohookError, BridgeError, ChannelError, ConfigError};
