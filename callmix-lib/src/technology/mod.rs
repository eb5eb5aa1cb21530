//! Bridge technologies: the engines that move audio between participants.
//!
//! A [`BridgeTechnology`] is a stateless factory registered with the
//! [`crate::bridge::BridgeCore`]. Each bridge asks the core for the best
//! technology matching its capabilities and keeps the per-bridge
//! [`TechnologyInstance`] it creates. All instance calls happen with the
//! bridge lock held.

pub mod multiplexed;
pub mod simple;
pub mod softmix;

use std::sync::Arc;

use bitflags::bitflags;

use crate::audio::Frame;
use crate::bridge::BridgeChannel;
use crate::config::CoreConfig;
use crate::error::BridgeError;

pub use multiplexed::MultiplexedBridge;
pub use simple::SimpleBridge;
pub use softmix::SoftmixBridge;

bitflags! {
    /// What a technology can do, and what a bridge asks for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Hands media to the channel drivers directly.
        const NATIVE = 1 << 0;
        /// Relays audio between exactly two participants.
        const ONE_TO_ONE_MIX = 1 << 1;
        /// Mixes any number of participants.
        const MULTI_MIX = 1 << 2;
        /// Each participant thread reads its own channel.
        const MULTI_THREADED = 1 << 3;
        /// Runs its own thread per bridge.
        const THREAD = 1 << 4;
        const VIDEO = 1 << 5;
    }
}

/// Tie breaker between technologies with matching capabilities.
///
/// Ordered so that the preferred technology compares lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Preference {
    High,
    Medium,
    Low,
}

/// Mixing parameters a bridge hands to its technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixSettings {
    /// Mixing rate in Hz; 0 lets the technology pick.
    pub internal_sample_rate: u32,
    pub mixing_interval_ms: u32,
}

/// Everything a technology sees when creating its per-bridge state.
pub struct TechnologyContext<'a> {
    pub bridge_id: &'a str,
    pub config: &'a CoreConfig,
    pub mix: MixSettings,
}

/// Stateless technology descriptor and instance factory.
pub trait BridgeTechnology: Send + Sync {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> Capabilities;
    fn preference(&self) -> Preference;

    /// Build the per-bridge state, starting any technology thread.
    fn create(&self, context: &TechnologyContext<'_>) -> Result<Box<dyn TechnologyInstance>, BridgeError>;
}

/// Per-bridge technology state.
pub trait TechnologyInstance: Send {
    /// Start carrying media for `bridge_channel`.
    fn join(&mut self, bridge_channel: &Arc<BridgeChannel>) -> Result<(), BridgeError>;

    /// Stop carrying media for `bridge_channel` and drop its state.
    fn leave(&mut self, bridge_channel: &Arc<BridgeChannel>);

    /// Stop mixing a participant that is busy elsewhere.
    fn suspend(&mut self, _bridge_channel: &Arc<BridgeChannel>) {}

    fn unsuspend(&mut self, _bridge_channel: &Arc<BridgeChannel>) {}

    /// Media read from `bridge_channel` for the rest of the bridge.
    fn write(&mut self, bridge_channel: &Arc<BridgeChannel>, frame: &Frame);

    /// The participant woke without input; flush anything waiting for it.
    fn poke(&mut self, _bridge_channel: &Arc<BridgeChannel>) {}

    /// Mixing rate or interval changed on the bridge.
    fn reconfigure(&mut self, _mix: &MixSettings) {}

    /// Tear down before the instance is dropped or replaced.
    fn destroy(&mut self) {}
}

/// Write `frame` to every participant except `from`.
pub(crate) fn write_to_others(
    members: &[Arc<BridgeChannel>],
    from: &Arc<BridgeChannel>,
    frame: &Frame,
) {
    for member in members.iter().filter(|member| member.id() != from.id()) {
        if let Err(err) = member.channel().write(frame) {
            log::debug!("dropping frame for {}: {}", member.channel().name(), err);
        }
    }
}
