//! Multi-party software mixing.
//!
//! Each bridge gets a mixing thread. Participant threads feed what they read
//! into per-channel sample queues; every interval the mixing thread sums all
//! queued audio and leaves each participant the mix minus its own voice.
//! The participant thread is woken to write that frame to its channel.

mod channel;
mod mixer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::{BridgeTechnology, Capabilities, MixSettings, Preference, TechnologyContext, TechnologyInstance};
use crate::alert::Alert;
use crate::audio::{Frame, FrameKind};
use crate::bridge::BridgeChannel;
use crate::config::{normalize_mixing_interval, normalize_sample_rate};
use crate::constants::DEFAULT_SAMPLE_RATE;
use crate::error::BridgeError;

use channel::{mixing_format, SoftmixChannel};
use mixer::{run_mixing_thread, Members, MixerContext, SoftmixShared};

/// Software mixer for any number of participants.
#[derive(Debug, Default)]
pub struct SoftmixBridge;

impl BridgeTechnology for SoftmixBridge {
    fn name(&self) -> &'static str {
        "softmix"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MULTI_MIX | Capabilities::THREAD | Capabilities::MULTI_THREADED
    }

    fn preference(&self) -> Preference {
        Preference::Medium
    }

    fn create(&self, context: &TechnologyContext<'_>) -> Result<Box<dyn TechnologyInstance>, BridgeError> {
        Ok(Box::new(SoftmixInstance::start(context)?))
    }
}

fn fixed_rate(mix: &MixSettings) -> Option<u32> {
    (mix.internal_sample_rate != 0).then(|| normalize_sample_rate(mix.internal_sample_rate))
}

struct SoftmixInstance {
    shared: Arc<SoftmixShared>,
    thread: Option<JoinHandle<()>>,
    /// Mixing rate pinned by the bridge; `None` follows the participants.
    fixed_rate: Option<u32>,
}

impl SoftmixInstance {
    /// Spawn the mixing thread for a new bridge.
    fn start(context: &TechnologyContext<'_>) -> Result<Self, BridgeError> {
        let fixed_rate = fixed_rate(&context.mix);
        let shared = Arc::new(SoftmixShared {
            members: Mutex::new(Members {
                channels: Vec::new(),
                rate: fixed_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
                interval_ms: normalize_mixing_interval(context.mix.mixing_interval_ms),
            }),
            wake: Alert::new(),
            stop: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
        });
        let mixer_context = MixerContext {
            shared: shared.clone(),
            talk: context.config.softmix.clone(),
            bridge_id: context.bridge_id.to_string(),
        };
        let thread = thread::Builder::new()
            .name(format!("softmix-{}", context.bridge_id))
            .spawn(move || run_mixing_thread(mixer_context))?;
        Ok(Self {
            shared,
            thread: Some(thread),
            fixed_rate,
        })
    }

    fn find(&self, bridge_channel: &BridgeChannel) -> Option<Arc<SoftmixChannel>> {
        self.shared
            .members
            .lock()
            .unwrap()
            .channels
            .iter()
            .find(|channel| channel.id() == bridge_channel.id())
            .cloned()
    }

    /// Rate the bridge should mix at for the current participants.
    fn wanted_rate(&self, members: &Members) -> u32 {
        if let Some(rate) = self.fixed_rate {
            return rate;
        }
        members
            .channels
            .iter()
            .filter_map(|channel| channel.bridge_channel())
            .map(|bridge_channel| normalize_sample_rate(bridge_channel.channel().native_format().rate))
            .max()
            .unwrap_or(members.rate)
    }

    /// Move every participant to `rate`.
    fn apply_rate(members: &mut Members, rate: u32) {
        if members.rate != rate {
            log::debug!("softmix mixing rate {} -> {}", members.rate, rate);
        }
        members.rate = rate;
        for channel in &members.channels {
            channel.set_rate(rate);
            if let Some(bridge_channel) = channel.bridge_channel() {
                set_channel_formats(&bridge_channel, rate);
            }
        }
    }

    fn set_suspended(&self, bridge_channel: &BridgeChannel, suspended: bool) {
        if let Some(channel) = self.find(bridge_channel) {
            let mut state = channel.lock();
            state.suspended = suspended;
            state.have_frame = false;
            if !suspended {
                state.factory.flush();
            }
        }
    }

    fn write_output(bridge_channel: &BridgeChannel, frame: Option<Frame>) {
        if let Some(frame) = frame {
            if let Err(err) = bridge_channel.channel().write(&frame) {
                log::debug!("softmix dropping mix for {}: {}", bridge_channel.channel().name(), err);
            }
        }
    }
}

fn set_channel_formats(bridge_channel: &BridgeChannel, rate: u32) {
    let channel = bridge_channel.channel();
    channel.set_read_format(mixing_format(rate));
    channel.set_write_format(mixing_format(rate));
}

impl TechnologyInstance for SoftmixInstance {
    fn join(&mut self, bridge_channel: &Arc<BridgeChannel>) -> Result<(), BridgeError> {
        let mut members = self.shared.members.lock().unwrap();
        let native = normalize_sample_rate(bridge_channel.channel().native_format().rate);
        let rate = match self.fixed_rate {
            Some(rate) => rate,
            None if members.channels.is_empty() => native,
            None => members.rate.max(native),
        };
        members
            .channels
            .push(Arc::new(SoftmixChannel::new(bridge_channel, rate)));
        Self::apply_rate(&mut members, rate);
        drop(members);
        self.shared.wake.notify();
        Ok(())
    }

    fn leave(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        let mut members = self.shared.members.lock().unwrap();
        members
            .channels
            .retain(|channel| channel.id() != bridge_channel.id());
        let rate = self.wanted_rate(&members);
        if rate != members.rate {
            Self::apply_rate(&mut members, rate);
        }
        drop(members);
        self.shared.wake.notify();
    }

    fn suspend(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        self.set_suspended(bridge_channel, true);
    }

    fn unsuspend(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        self.set_suspended(bridge_channel, false);
    }

    fn write(&mut self, bridge_channel: &Arc<BridgeChannel>, frame: &Frame) {
        match frame.kind {
            FrameKind::Voice => {
                let output = self.find(bridge_channel).and_then(|channel| channel.feed(frame));
                Self::write_output(bridge_channel, output);
            }
            FrameKind::Null => {}
            _ => {
                let channels = self.shared.members.lock().unwrap().channels.clone();
                for other in channels.iter().filter(|channel| channel.id() != bridge_channel.id()) {
                    if let Some(other) = other.bridge_channel() {
                        if let Err(err) = other.channel().write(frame) {
                            log::debug!("dropping frame for {}: {}", other.channel().name(), err);
                        }
                    }
                }
            }
        }
    }

    fn poke(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        let output = self.find(bridge_channel).and_then(|channel| channel.take_output());
        Self::write_output(bridge_channel, output);
    }

    fn reconfigure(&mut self, mix: &MixSettings) {
        self.fixed_rate = fixed_rate(mix);
        let mut members = self.shared.members.lock().unwrap();
        members.interval_ms = normalize_mixing_interval(mix.mixing_interval_ms);
        let rate = self.wanted_rate(&members);
        Self::apply_rate(&mut members, rate);
        drop(members);
        self.shared.wake.notify();
    }

    fn destroy(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify();
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            log::warn!("softmix mixing thread panicked");
        }
        self.shared.members.lock().unwrap().channels.clear();
    }
}

impl Drop for SoftmixInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}
