//! Bridges: groups of channels sharing one audio path.
//!
//! A [`Bridge`] owns its participants, the technology instance moving their
//! media and the policy deciding when it dissolves. Channels enter through
//! [`Bridge::join`] (blocking, on the caller's thread) or [`Bridge::impart`]
//! (on a new thread) and leave when their [`BridgeChannel`] reaches a
//! terminal state.
//!
//! Lock order: the bridge lock is taken before any participant lock, and
//! never while holding one.

mod action;
mod channel;
mod features;
mod interval;
mod registry;
mod smart;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use bitflags::bitflags;

use crate::audio::Frame;
use crate::channel::Channel;
use crate::config::{normalize_mixing_interval, normalize_sample_rate};
use crate::error::BridgeError;
use crate::technology::{BridgeTechnology, Capabilities, MixSettings, TechnologyContext, TechnologyInstance};

pub use self::channel::{BridgeChannel, ChannelState};
pub use self::registry::BridgeCore;
pub use self::features::{BridgeFeatures, BuiltinFeature, HookAction, HookCallback, TalkCallback};
pub use self::interval::{IntervalAction, IntervalCallback, IntervalHooks};

bitflags! {
    /// Dissolve and technology policy of a bridge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BridgeFlags: u32 {
        /// Dissolve when a participant hangs up.
        const DISSOLVE_HANGUP = 1 << 0;
        /// Dissolve when the last participant leaves.
        const DISSOLVE_EMPTY = 1 << 1;
        /// Switch between two-party and multi-party technologies by size.
        const SMART = 1 << 2;
    }
}

/// Everything guarded by the bridge lock.
pub(crate) struct BridgeState {
    pub(crate) technology: Arc<dyn BridgeTechnology>,
    pub(crate) instance: Box<dyn TechnologyInstance>,
    pub(crate) channels: Vec<Arc<BridgeChannel>>,
    pub(crate) capabilities: Capabilities,
    pub(crate) flags: BridgeFlags,
    /// Participants not suspended.
    pub(crate) num_active: usize,
    pub(crate) mix: MixSettings,
    pub(crate) dissolved: bool,
    /// Hooks copied into every participant that joins.
    pub(crate) features: BridgeFeatures,
}

impl BridgeState {
    fn reads_channel(&self) -> bool {
        self.technology
            .capabilities()
            .contains(Capabilities::MULTI_THREADED)
    }

    fn find(&self, channel: &Channel) -> Option<Arc<BridgeChannel>> {
        self.channels
            .iter()
            .find(|bridge_channel| bridge_channel.id() == channel.id())
            .cloned()
    }

    pub(crate) fn suspend_channel(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        if bridge_channel.set_suspended(true) {
            self.num_active = self.num_active.saturating_sub(1);
            self.instance.suspend(bridge_channel);
        }
    }

    pub(crate) fn unsuspend_channel(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        if bridge_channel.set_suspended(false) {
            self.num_active += 1;
            self.instance.unsuspend(bridge_channel);
            bridge_channel.poke();
        }
    }

    /// Take a participant out without evaluating dissolve policy.
    fn remove_channel(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        self.channels
            .retain(|member| member.id() != bridge_channel.id());
        if !bridge_channel.is_suspended() {
            self.num_active = self.num_active.saturating_sub(1);
        }
        self.instance.leave(bridge_channel);
        bridge_channel.clear_bridge();
        bridge_channel.clear_roles();
        bridge_channel.features().remove_on_pull();
    }
}

/// A set of channels sharing media through one technology.
pub struct Bridge {
    id: String,
    core: Arc<BridgeCore>,
    state: Mutex<BridgeState>,
    dissolving: AtomicBool,
}

impl Bridge {
    /// Create a bridge using the best technology for `capabilities`.
    ///
    /// # Arguments
    ///
    /// * `core` - Registries to pick the technology from.
    /// * `capabilities` - Capabilities the technology must offer (any of).
    /// * `flags` - Dissolve and smart-switching policy.
    ///
    /// # Returns
    ///
    /// The new bridge, or `NoTechnology` when nothing registered fits. A
    /// smart bridge also needs a technology for the other party size.
    pub fn new(
        core: &Arc<BridgeCore>,
        capabilities: Capabilities,
        flags: BridgeFlags,
    ) -> Result<Arc<Bridge>, BridgeError> {
        if flags.contains(BridgeFlags::SMART) {
            let other = if capabilities.contains(Capabilities::ONE_TO_ONE_MIX) {
                Capabilities::MULTI_MIX
            } else {
                Capabilities::ONE_TO_ONE_MIX
            };
            if !core.check(other) {
                return Err(BridgeError::NoTechnology(other));
            }
        }
        let technology = core
            .find_best_technology(capabilities)
            .ok_or(BridgeError::NoTechnology(capabilities))?;
        let id = format!("{:016x}", rand::random::<u64>());
        let mix = MixSettings {
            internal_sample_rate: core.config().internal_sample_rate,
            mixing_interval_ms: core.config().mixing_interval_ms,
        };
        let instance = technology.create(&TechnologyContext {
            bridge_id: &id,
            config: core.config(),
            mix,
        })?;
        log::debug!(
            "bridge {} created with technology {} ({:?})",
            id,
            technology.name(),
            flags
        );
        let bridge = Arc::new(Bridge {
            id,
            core: core.clone(),
            state: Mutex::new(BridgeState {
                technology,
                instance,
                channels: Vec::new(),
                capabilities,
                flags,
                num_active: 0,
                mix,
                dissolved: false,
                features: BridgeFeatures::new(),
            }),
            dissolving: AtomicBool::new(false),
        });
        core.track(&bridge);
        Ok(bridge)
    }

    /// Whether `Bridge::new` could find a technology for `capabilities`.
    pub fn check(core: &BridgeCore, capabilities: Capabilities) -> bool {
        core.check(capabilities)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn core(&self) -> &Arc<BridgeCore> {
        &self.core
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn technology_context(&self, mix: MixSettings) -> TechnologyContext<'_> {
        TechnologyContext {
            bridge_id: &self.id,
            config: self.core.config(),
            mix,
        }
    }

    pub fn technology_name(&self) -> &'static str {
        self.lock_state().technology.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.lock_state().capabilities
    }

    pub fn flags(&self) -> BridgeFlags {
        self.lock_state().flags
    }

    pub fn num_channels(&self) -> usize {
        self.lock_state().channels.len()
    }

    pub fn num_active(&self) -> usize {
        self.lock_state().num_active
    }

    pub fn channels(&self) -> Vec<Arc<BridgeChannel>> {
        self.lock_state().channels.clone()
    }

    pub fn find(&self, channel: &Channel) -> Option<Arc<BridgeChannel>> {
        self.lock_state().find(channel)
    }

    pub fn is_dissolved(&self) -> bool {
        self.dissolving.load(Ordering::Acquire)
    }

    /// Edit the hooks every future participant inherits.
    pub fn update_features<R>(&self, f: impl FnOnce(&mut BridgeFeatures) -> R) -> R {
        f(&mut self.lock_state().features)
    }

    /// Put `channel` in the bridge and service it on the calling thread.
    ///
    /// Blocks until the channel leaves and returns the state it left with.
    pub fn join(
        self: &Arc<Self>,
        channel: Arc<Channel>,
        swap: Option<&Arc<Channel>>,
        features: BridgeFeatures,
    ) -> Result<ChannelState, BridgeError> {
        let bridge_channel = BridgeChannel::new(channel, features);
        bridge_channel.enter(self, swap)?;
        let state = bridge_channel.run();
        bridge_channel.exit();
        Ok(state)
    }

    /// Put `channel` in the bridge and service it on a new thread.
    ///
    /// The channel is hung up when it leaves with `End` or `Hangup`; use
    /// [`Bridge::depart`] to take it back instead.
    pub fn impart(
        self: &Arc<Self>,
        channel: Arc<Channel>,
        swap: Option<&Arc<Channel>>,
        features: BridgeFeatures,
    ) -> Result<Arc<BridgeChannel>, BridgeError> {
        let bridge_channel = BridgeChannel::new(channel, features);
        bridge_channel.enter(self, swap)?;
        let worker = bridge_channel.clone();
        let spawned = thread::Builder::new()
            .name(format!("bridge-{}", bridge_channel.channel().name()))
            .spawn(move || {
                let state = worker.run();
                worker.exit();
                if matches!(state, ChannelState::End | ChannelState::Hangup) {
                    worker.channel().hangup();
                }
                state
            });
        match spawned {
            Ok(handle) => {
                *bridge_channel.thread.lock().unwrap() = Some(handle);
                Ok(bridge_channel)
            }
            Err(err) => {
                log::error!(
                    "could not start thread for {} in bridge {}: {}",
                    bridge_channel.channel().name(),
                    self.id,
                    err
                );
                bridge_channel.change_state(ChannelState::Hangup);
                bridge_channel.exit();
                Err(err.into())
            }
        }
    }

    /// Take an imparted participant back, waiting for its thread to finish.
    pub fn depart(&self, bridge_channel: &Arc<BridgeChannel>) -> Result<ChannelState, BridgeError> {
        let handle = bridge_channel.thread.lock().unwrap().take();
        let Some(handle) = handle else {
            return Err(BridgeError::NotInBridge {
                channel: bridge_channel.channel().name().to_string(),
                bridge: self.id.clone(),
            });
        };
        bridge_channel.change_state(ChannelState::Depart);
        if handle.thread().id() == thread::current().id() {
            return Ok(ChannelState::Depart);
        }
        match handle.join() {
            Ok(state) => Ok(state),
            Err(_) => {
                log::warn!("bridge thread for {} panicked", bridge_channel.channel().name());
                Ok(ChannelState::Depart)
            }
        }
    }

    /// Make `channel` leave the bridge and hang up.
    pub fn remove(&self, channel: &Channel) -> Result<(), BridgeError> {
        let bridge_channel = self.find(channel).ok_or_else(|| self.not_in_bridge(channel))?;
        bridge_channel.change_state(ChannelState::Hangup);
        Ok(())
    }

    /// Stop mixing `channel` without removing it.
    pub fn suspend(&self, channel: &Channel) -> Result<(), BridgeError> {
        let mut state = self.lock_state();
        let bridge_channel = state.find(channel).ok_or_else(|| self.not_in_bridge(channel))?;
        state.suspend_channel(&bridge_channel);
        Ok(())
    }

    pub fn unsuspend(&self, channel: &Channel) -> Result<(), BridgeError> {
        let mut state = self.lock_state();
        let bridge_channel = state.find(channel).ok_or_else(|| self.not_in_bridge(channel))?;
        state.unsuspend_channel(&bridge_channel);
        Ok(())
    }

    fn not_in_bridge(&self, channel: &Channel) -> BridgeError {
        BridgeError::NotInBridge {
            channel: channel.name().to_string(),
            bridge: self.id.clone(),
        }
    }

    /// Play `dtmf` to every participant except `from`.
    pub fn dtmf_stream(&self, dtmf: &str, from: Option<&Channel>) {
        for bridge_channel in self.others(from) {
            bridge_channel.queue_dtmf_stream(dtmf);
        }
    }

    /// Queue `frame` for every participant except `from`.
    pub fn queue_everyone_else(&self, from: Option<&Channel>, frame: &Frame) {
        for bridge_channel in self.others(from) {
            bridge_channel.queue_frame(frame.clone());
        }
    }

    fn others(&self, from: Option<&Channel>) -> Vec<Arc<BridgeChannel>> {
        let skip = from.map(Channel::id);
        self.lock_state()
            .channels
            .iter()
            .filter(|bridge_channel| Some(bridge_channel.id()) != skip)
            .cloned()
            .collect()
    }

    /// Change the softmix interval; snapped to 10, 20 or 40 ms.
    pub fn set_mixing_interval(&self, interval_ms: u32) {
        let mut state = self.lock_state();
        state.mix.mixing_interval_ms = normalize_mixing_interval(interval_ms);
        let mix = state.mix;
        state.instance.reconfigure(&mix);
    }

    /// Pin the mixing rate; 0 lets the technology follow the participants.
    pub fn set_internal_sample_rate(&self, rate: u32) {
        let mut state = self.lock_state();
        state.mix.internal_sample_rate = if rate == 0 { 0 } else { normalize_sample_rate(rate) };
        let mix = state.mix;
        state.instance.reconfigure(&mix);
    }

    pub fn mix_settings(&self) -> MixSettings {
        self.lock_state().mix
    }

    /// Add a participant. Called with no participant locks held.
    pub(crate) fn push(
        self: &Arc<Self>,
        bridge_channel: &Arc<BridgeChannel>,
        swap: Option<&Arc<Channel>>,
    ) -> Result<(), BridgeError> {
        let mut state = self.lock_state();
        if state.dissolved {
            return Err(BridgeError::Dissolved(self.id.clone()));
        }
        if bridge_channel.state() != ChannelState::Wait {
            return Err(BridgeError::NotWaiting(bridge_channel.channel().name().to_string()));
        }
        let swap = match swap {
            Some(channel) => match state.find(channel) {
                Some(found) if found.state() == ChannelState::Wait => Some(found),
                _ => return Err(BridgeError::SwapNotWaiting(channel.name().to_string())),
            },
            None => None,
        };

        bridge_channel.features().inherit(&state.features);
        let joined = self.attach(&mut state, bridge_channel, swap.is_none());
        if let Err(err) = joined {
            bridge_channel.features().remove_on_pull();
            bridge_channel.clear_bridge();
            bridge_channel.clear_roles();
            return Err(err);
        }
        state.channels.push(bridge_channel.clone());
        state.num_active += 1;
        log::debug!(
            "channel {} joined bridge {} ({} participants)",
            bridge_channel.channel().name(),
            self.id,
            state.channels.len()
        );

        if let Some(swap) = swap {
            log::debug!("channel {} swapped out of bridge {}", swap.channel().name(), self.id);
            swap.change_state(ChannelState::Hangup);
            state.remove_channel(&swap);
        }
        drop(state);
        bridge_channel.poke();
        Ok(())
    }

    fn attach(
        self: &Arc<Self>,
        state: &mut BridgeState,
        bridge_channel: &Arc<BridgeChannel>,
        growing: bool,
    ) -> Result<(), BridgeError> {
        if growing {
            let count = state.channels.len() + 1;
            smart::reconfigure(self, state, count)?;
        }
        bridge_channel.set_bridge(self, state.reads_channel());
        bridge_channel.establish_roles();
        state.instance.join(bridge_channel)
    }

    /// Remove a participant leaving with `leaving` and apply dissolve policy.
    pub(crate) fn pull(self: &Arc<Self>, bridge_channel: &Arc<BridgeChannel>, leaving: ChannelState) {
        let mut state = self.lock_state();
        if !state
            .channels
            .iter()
            .any(|member| member.id() == bridge_channel.id())
        {
            return;
        }
        state.remove_channel(bridge_channel);
        log::debug!(
            "channel {} pulled from bridge {} ({} participants)",
            bridge_channel.channel().name(),
            self.id,
            state.channels.len()
        );
        let remaining = state.channels.len();
        if let Err(err) = smart::reconfigure(self, &mut state, remaining) {
            log::warn!("bridge {} could not change technology: {}", self.id, err);
        }

        let empty = state.channels.is_empty() && state.flags.contains(BridgeFlags::DISSOLVE_EMPTY);
        let hung_up = leaving == ChannelState::End
            && (state.flags.contains(BridgeFlags::DISSOLVE_HANGUP) || bridge_channel.features().dissolve_hangup);
        if (empty || hung_up) && self.dissolve_locked(&mut state, ChannelState::Hangup) {
            log::debug!(
                "bridge {} dissolved by {} leaving",
                self.id,
                bridge_channel.channel().name()
            );
        }
    }

    /// Mark the bridge dissolved and tell every participant to leave.
    ///
    /// Only the first caller does anything and gets `true` back.
    fn dissolve_locked(&self, state: &mut BridgeState, cause: ChannelState) -> bool {
        if self
            .dissolving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        state.dissolved = true;
        log::debug!("bridge {} dissolving ({} participants)", self.id, state.channels.len());
        for bridge_channel in &state.channels {
            bridge_channel.change_state(cause);
        }
        true
    }

    /// Dissolve the bridge, ending every participant.
    pub fn destroy(&self) {
        let mut state = self.lock_state();
        self.dissolve_locked(&mut state, ChannelState::End);
    }

    /// Move every participant of `from` into this bridge.
    pub fn merge(self: &Arc<Self>, from: &Arc<Bridge>) -> Result<(), BridgeError> {
        if Arc::ptr_eq(self, from) {
            return Err(self.merge_refused(from, "a bridge cannot merge into itself"));
        }
        // Both locks in address order.
        let (mut into_state, mut from_state) = if Arc::as_ptr(self) < Arc::as_ptr(from) {
            let into_state = self.lock_state();
            let from_state = from.lock_state();
            (into_state, from_state)
        } else {
            let from_state = from.lock_state();
            let into_state = self.lock_state();
            (into_state, from_state)
        };
        if into_state.dissolved || from_state.dissolved {
            return Err(self.merge_refused(from, "bridge is dissolved"));
        }
        let total = into_state.channels.len() + from_state.channels.len();
        if total > 2
            && !into_state.capabilities.contains(Capabilities::MULTI_MIX)
            && !into_state.flags.contains(BridgeFlags::SMART)
        {
            return Err(self.merge_refused(from, "too many participants for a two-party bridge"));
        }
        smart::reconfigure(self, &mut into_state, total)?;

        let moving = std::mem::take(&mut from_state.channels);
        from_state.num_active = 0;
        let reads_channel = into_state.reads_channel();
        for bridge_channel in moving {
            from_state.instance.leave(&bridge_channel);
            {
                let mut features = bridge_channel.features();
                features.remove_on_pull();
                features.inherit(&into_state.features);
            }
            bridge_channel.set_bridge(self, reads_channel);
            if let Err(err) = into_state.instance.join(&bridge_channel) {
                log::warn!(
                    "channel {} could not be merged into bridge {}: {}",
                    bridge_channel.channel().name(),
                    self.id,
                    err
                );
                bridge_channel.clear_bridge();
                bridge_channel.change_state(ChannelState::Hangup);
                continue;
            }
            if bridge_channel.is_suspended() {
                into_state.instance.suspend(&bridge_channel);
            } else {
                into_state.num_active += 1;
            }
            into_state.channels.push(bridge_channel.clone());
            bridge_channel.poke();
        }
        log::debug!(
            "bridge {} merged into {} ({} participants)",
            from.id,
            self.id,
            into_state.channels.len()
        );
        if from_state.flags.contains(BridgeFlags::DISSOLVE_EMPTY) {
            from.dissolve_locked(&mut from_state, ChannelState::Hangup);
        }
        Ok(())
    }

    fn merge_refused(&self, from: &Bridge, reason: &str) -> BridgeError {
        BridgeError::MergeRefused {
            from: from.id.clone(),
            into: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.id)
            .field("dissolved", &self.is_dissolved())
            .finish()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            state.instance.destroy();
        }
        log::debug!("bridge {} destroyed", self.id);
    }
}
