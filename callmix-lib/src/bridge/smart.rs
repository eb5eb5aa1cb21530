//! Switching smart bridges between two-party and multi-party technologies.

use std::sync::Arc;

use super::{Bridge, BridgeFlags, BridgeState};
use crate::error::BridgeError;
use crate::technology::Capabilities;

/// Capability a smart bridge needs for `count` participants.
pub(crate) fn wanted_capability(count: usize) -> Capabilities {
    if count > 2 {
        Capabilities::MULTI_MIX
    } else {
        Capabilities::ONE_TO_ONE_MIX
    }
}

/// Move a smart bridge to the technology suited to `count` participants.
///
/// Every current participant leaves the old instance and joins the new one
/// before the old instance is destroyed. Non-smart bridges are left alone.
pub(crate) fn reconfigure(bridge: &Arc<Bridge>, state: &mut BridgeState, count: usize) -> Result<(), BridgeError> {
    if !state.flags.contains(BridgeFlags::SMART) {
        return Ok(());
    }
    let wanted = wanted_capability(count);
    if state.capabilities.contains(wanted) {
        return Ok(());
    }
    let technology = bridge
        .core()
        .find_best_technology(wanted)
        .ok_or(BridgeError::NoTechnology(wanted))?;
    let instance = technology.create(&bridge.technology_context(state.mix))?;
    log::debug!(
        "smart bridge {} switching {} -> {} for {} participants",
        bridge.id(),
        state.technology.name(),
        technology.name(),
        count
    );

    for bridge_channel in &state.channels {
        state.instance.leave(bridge_channel);
    }
    let mut old = std::mem::replace(&mut state.instance, instance);
    let reads_channel = technology.capabilities().contains(Capabilities::MULTI_THREADED);
    state.technology = technology;
    state.capabilities = wanted;

    let channels = state.channels.clone();
    for bridge_channel in &channels {
        bridge_channel.set_bridge(bridge, reads_channel);
        match state.instance.join(bridge_channel) {
            Ok(()) => {
                if bridge_channel.is_suspended() {
                    state.instance.suspend(bridge_channel);
                }
            }
            Err(err) => {
                log::warn!(
                    "channel {} could not follow bridge {} to its new technology: {}",
                    bridge_channel.channel().name(),
                    bridge.id(),
                    err
                );
                bridge_channel.change_state(super::ChannelState::Hangup);
            }
        }
        bridge_channel.poke();
    }
    old.destroy();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_follows_participant_count() {
        assert_eq!(wanted_capability(0), Capabilities::ONE_TO_ONE_MIX);
        assert_eq!(wanted_capability(2), Capabilities::ONE_TO_ONE_MIX);
        assert_eq!(wanted_capability(3), Capabilities::MULTI_MIX);
    }
}
