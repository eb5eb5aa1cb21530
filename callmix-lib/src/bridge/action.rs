//! Work queued for a participant's own thread.

use std::fmt;
use std::sync::Arc;

use super::BridgeChannel;
use crate::audio::Frame;

pub(crate) type ActionCallback = Box<dyn FnOnce(&Arc<BridgeChannel>) + Send>;

pub(crate) enum BridgeAction {
    /// Play DTMF digits to the participant.
    DtmfStream(String),
    /// Run on the participant's thread while it is suspended from mixing.
    Callback(ActionCallback),
    /// Write a frame to the participant.
    WriteFrame(Frame),
}

impl fmt::Debug for BridgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeAction::DtmfStream(digits) => f.debug_tuple("DtmfStream").field(digits).finish(),
            BridgeAction::Callback(_) => f.write_str("Callback"),
            BridgeAction::WriteFrame(frame) => f.debug_tuple("WriteFrame").field(&frame.kind).finish(),
        }
    }
}
