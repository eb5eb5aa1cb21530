//! Two-party pass-through run on the participants' own threads.

use std::sync::Arc;

use super::{
    write_to_others, BridgeTechnology, Capabilities, Preference, TechnologyContext, TechnologyInstance,
};
use crate::audio::Frame;
use crate::bridge::BridgeChannel;
use crate::error::BridgeError;

/// Relays each participant's frames straight to the other one.
#[derive(Debug, Default)]
pub struct SimpleBridge;

impl BridgeTechnology for SimpleBridge {
    fn name(&self) -> &'static str {
        "simple_bridge"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ONE_TO_ONE_MIX | Capabilities::MULTI_THREADED
    }

    fn preference(&self) -> Preference {
        Preference::Medium
    }

    fn create(&self, _context: &TechnologyContext<'_>) -> Result<Box<dyn TechnologyInstance>, BridgeError> {
        Ok(Box::new(SimpleInstance::default()))
    }
}

#[derive(Default)]
struct SimpleInstance {
    members: Vec<Arc<BridgeChannel>>,
}

impl TechnologyInstance for SimpleInstance {
    fn join(&mut self, bridge_channel: &Arc<BridgeChannel>) -> Result<(), BridgeError> {
        if self.members.len() >= 2 {
            return Err(BridgeError::Rejected {
                technology: "simple_bridge",
                channel: bridge_channel.channel().name().to_string(),
                reason: "bridge already has two participants".to_string(),
            });
        }
        self.members.push(bridge_channel.clone());
        Ok(())
    }

    fn leave(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        self.members.retain(|member| member.id() != bridge_channel.id());
    }

    fn write(&mut self, bridge_channel: &Arc<BridgeChannel>, frame: &Frame) {
        write_to_others(&self.members, bridge_channel, frame);
    }
}
