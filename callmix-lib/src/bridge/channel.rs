//! Bridge participants and the loop each one runs.
//!
//! A [`BridgeChannel`] wraps a [`Channel`] for as long as it is in a bridge.
//! Its thread reads the channel (for multithreaded technologies), hands
//! frames to the bridge technology, and services queued actions, DTMF
//! features, talk events and interval hooks until a terminal state is set.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::action::BridgeAction;
use super::features::{BridgeFeatures, DtmfMatch, HookAction, HookKind};
use super::interval::{next_trip, IntervalAction};
use super::{Bridge, BridgeState};
use crate::alert::Alert;
use crate::audio::{ControlFrame, Format, Frame, FrameKind};
use crate::channel::{Channel, ChannelRead, DigitWait};
use crate::constants::{FEATURE_DIGIT_TIMEOUT_MS, MAXIMUM_DTMF_FEATURE_STRING};
use crate::error::BridgeError;

/// Where a participant is in its bridge lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// In the bridge, exchanging media.
    Wait,
    /// Leave the bridge; the channel hung up or was told to end.
    End,
    /// Leave the bridge and hang up.
    Hangup,
    /// Leave the bridge; the channel goes back to whoever imparted it.
    Depart,
    /// Collecting a DTMF feature sequence.
    Feature,
    /// Streaming DTMF to the participant.
    Dtmf,
    StartTalking,
    StopTalking,
}

impl ChannelState {
    /// States that make the participant's thread leave the bridge.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::End | ChannelState::Hangup | ChannelState::Depart)
    }
}

struct Inner {
    state: ChannelState,
    bridge: Option<Weak<Bridge>>,
    /// The technology is multithreaded, so this thread reads the channel.
    reads_channel: bool,
    suspended: bool,
    actions: VecDeque<BridgeAction>,
    roles: HashMap<String, HashMap<String, String>>,
    saved_formats: Option<(Format, Format)>,
}

/// One channel's membership of a bridge.
pub struct BridgeChannel {
    id: u64,
    channel: Arc<Channel>,
    inner: Mutex<Inner>,
    alert: Arc<Alert>,
    features: Mutex<BridgeFeatures>,
    pub(crate) thread: Mutex<Option<JoinHandle<ChannelState>>>,
}

impl BridgeChannel {
    pub(crate) fn new(channel: Arc<Channel>, features: BridgeFeatures) -> Arc<Self> {
        Arc::new(Self {
            id: channel.id(),
            channel,
            inner: Mutex::new(Inner {
                state: ChannelState::Wait,
                bridge: None,
                reads_channel: true,
                suspended: false,
                actions: VecDeque::new(),
                roles: HashMap::new(),
                saved_formats: None,
            }),
            alert: Arc::new(Alert::new()),
            features: Mutex::new(features),
            thread: Mutex::new(None),
        })
    }

    /// Same as the wrapped channel's id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().unwrap().state
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock().unwrap().suspended
    }

    /// Bridge this participant is currently in.
    pub fn bridge(&self) -> Option<Arc<Bridge>> {
        self.inner
            .lock()
            .unwrap()
            .bridge
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn features(&self) -> MutexGuard<'_, BridgeFeatures> {
        self.features.lock().unwrap()
    }

    pub(crate) fn alert(&self) -> Arc<Alert> {
        self.alert.clone()
    }

    /// Move to `state` and wake the participant's thread.
    ///
    /// Once terminal, the state no longer changes.
    pub fn change_state(&self, state: ChannelState) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                return;
            }
            if inner.state != state {
                log::debug!("bridge channel {} {:?} -> {:?}", self.channel.name(), inner.state, state);
            }
            inner.state = state;
        }
        self.alert.notify();
    }

    /// Back to `Wait`, but only if still in `from`.
    fn reset_state(&self, from: ChannelState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == from {
            inner.state = ChannelState::Wait;
        }
    }

    /// Talk detection result from the mixing technology.
    pub(crate) fn notify_talking(&self, talking: bool) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != ChannelState::Wait {
                return;
            }
            inner.state = if talking {
                ChannelState::StartTalking
            } else {
                ChannelState::StopTalking
            };
        }
        self.alert.notify();
    }

    /// Wake the participant's thread without queuing anything.
    pub fn poke(&self) {
        self.alert.notify();
    }

    pub(crate) fn queue_action(&self, action: BridgeAction) {
        self.inner.lock().unwrap().actions.push_back(action);
        self.alert.notify();
    }

    /// Play `digits` to this participant.
    pub fn queue_dtmf_stream(&self, digits: &str) {
        self.queue_action(BridgeAction::DtmfStream(digits.to_string()));
    }

    /// Run `callback` on the participant's own thread.
    pub fn queue_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Arc<BridgeChannel>) + Send + 'static,
    {
        self.queue_action(BridgeAction::Callback(Box::new(callback)));
    }

    /// Write `frame` to the participant from its own thread.
    pub fn queue_frame(&self, frame: Frame) {
        self.queue_action(BridgeAction::WriteFrame(frame));
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.inner.lock().unwrap().roles.contains_key(role)
    }

    pub fn role_option(&self, role: &str, option: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .roles
            .get(role)
            .and_then(|options| options.get(option))
            .cloned()
    }

    pub(crate) fn set_bridge(&self, bridge: &Arc<Bridge>, reads_channel: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.bridge = Some(Arc::downgrade(bridge));
        inner.reads_channel = reads_channel;
    }

    pub(crate) fn clear_bridge(&self) {
        self.inner.lock().unwrap().bridge = None;
    }

    pub(crate) fn establish_roles(&self) {
        let roles = self.channel.roles_snapshot();
        self.inner.lock().unwrap().roles = roles;
    }

    pub(crate) fn clear_roles(&self) {
        self.inner.lock().unwrap().roles.clear();
    }

    /// Returns whether the flag changed.
    pub(crate) fn set_suspended(&self, suspended: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let changed = inner.suspended != suspended;
        inner.suspended = suspended;
        changed
    }

    fn is_in(&self, bridge: &Arc<Bridge>) -> bool {
        self.inner
            .lock()
            .unwrap()
            .bridge
            .as_ref()
            .map(|current| Weak::ptr_eq(current, &Arc::downgrade(bridge)))
            .unwrap_or(false)
    }

    /// Run `f` with the current bridge locked.
    ///
    /// Retries when the participant was moved to another bridge while the
    /// lock was being taken. Returns `None` outside any bridge.
    pub(crate) fn with_bridge<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&Arc<Bridge>, &mut BridgeState) -> R,
    ) -> Option<R> {
        loop {
            let bridge = self.bridge()?;
            let mut state = bridge.lock_state();
            if self.is_in(&bridge) {
                return Some(f(&bridge, &mut state));
            }
        }
    }

    fn suspend_self(self: &Arc<Self>) {
        self.with_bridge(|_, state| state.suspend_channel(self));
    }

    fn unsuspend_self(self: &Arc<Self>) {
        self.with_bridge(|_, state| state.unsuspend_channel(self));
    }

    /// Enter `bridge`, replacing `swap` if given.
    pub(crate) fn enter(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        swap: Option<&Arc<Channel>>,
    ) -> Result<(), BridgeError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.saved_formats = Some((self.channel.read_format(), self.channel.write_format()));
        }
        self.channel.set_waiter(Some(self.alert.clone()));
        if let Err(err) = bridge.push(self, swap) {
            log::debug!(
                "channel {} failed to join bridge {}: {}",
                self.channel.name(),
                bridge.id(),
                err
            );
            self.channel.set_waiter(None);
            self.restore_formats();
            return Err(err);
        }
        self.run_hooks(HookKind::Join);
        Ok(())
    }

    /// Leave whatever bridge the participant is in.
    pub(crate) fn exit(self: &Arc<Self>) {
        let state = self.state();
        if state == ChannelState::End {
            self.run_hooks(HookKind::Hangup);
        }
        self.run_hooks(HookKind::Leave);
        if let Some(bridge) = self.bridge() {
            bridge.pull(self, state);
        }
        self.channel.set_waiter(None);
        self.restore_formats();
        log::debug!("channel {} left its bridge ({:?})", self.channel.name(), state);
    }

    fn restore_formats(&self) {
        let saved = self.inner.lock().unwrap().saved_formats.take();
        if let Some((read, write)) = saved {
            self.channel.set_read_format(read);
            self.channel.set_write_format(write);
        }
    }

    fn run_hooks(self: &Arc<Self>, kind: HookKind) {
        let hooks = self.features().hooks(kind);
        for hook in hooks {
            if (hook.callback)(self) == HookAction::Remove {
                self.features().remove_hook(hook.id);
            }
        }
    }

    /// Service the participant until it reaches a terminal state.
    pub(crate) fn run(self: &Arc<Self>) -> ChannelState {
        loop {
            let seen = self.alert.generation();
            match self.state() {
                ChannelState::Wait => {}
                ChannelState::Feature => {
                    self.handle_feature();
                    continue;
                }
                state @ (ChannelState::StartTalking | ChannelState::StopTalking) => {
                    self.handle_talk(state);
                    continue;
                }
                ChannelState::Dtmf => {
                    self.reset_state(ChannelState::Dtmf);
                    continue;
                }
                terminal => return terminal,
            }
            if self.step() {
                continue;
            }
            self.with_bridge(|_, state| state.instance.poke(self));
            let timeout = self
                .features()
                .intervals
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            self.alert.wait_since(seen, timeout);
        }
    }

    /// Handle one unit of work; false when there was none.
    fn step(self: &Arc<Self>) -> bool {
        let (reads_channel, suspended) = {
            let inner = self.inner.lock().unwrap();
            (inner.reads_channel, inner.suspended)
        };
        if reads_channel && !suspended {
            match self.channel.read() {
                ChannelRead::Frame(frame) => {
                    self.handle_frame(frame);
                    return true;
                }
                ChannelRead::Hangup => {
                    self.change_state(ChannelState::End);
                    return true;
                }
                ChannelRead::Empty => {}
            }
        }
        let action = self.inner.lock().unwrap().actions.pop_front();
        if let Some(action) = action {
            self.handle_action(action);
            return true;
        }
        self.run_intervals()
    }

    /// Route a frame read from the channel.
    pub(crate) fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let (mute, passthrough) = {
            let features = self.features();
            if let FrameKind::DtmfBegin(digit) = frame.kind {
                if features.starts_feature(digit) {
                    drop(features);
                    self.change_state(ChannelState::Feature);
                    return;
                }
            }
            (features.mute, features.dtmf_passthrough)
        };
        match frame.kind {
            FrameKind::DtmfBegin(_) | FrameKind::DtmfEnd(_) if !passthrough => return,
            FrameKind::Voice if mute => return,
            FrameKind::Null | FrameKind::Control(ControlFrame::Answer) => return,
            _ => {}
        }
        self.with_bridge(|_, state| state.instance.write(self, &frame));
    }

    fn handle_action(self: &Arc<Self>, action: BridgeAction) {
        match action {
            BridgeAction::DtmfStream(digits) => {
                self.change_state(ChannelState::Dtmf);
                self.suspend_self();
                if let Err(err) = self.channel.write_dtmf_stream(&digits) {
                    log::debug!("DTMF stream to {} failed: {}", self.channel.name(), err);
                }
                self.unsuspend_self();
                self.reset_state(ChannelState::Dtmf);
            }
            BridgeAction::Callback(callback) => {
                self.suspend_self();
                callback(self);
                self.unsuspend_self();
            }
            BridgeAction::WriteFrame(frame) => {
                if let Err(err) = self.channel.write(&frame) {
                    log::debug!("queued frame for {} dropped: {}", self.channel.name(), err);
                }
            }
        }
    }

    fn handle_talk(self: &Arc<Self>, state: ChannelState) {
        let talker = self.features().talker.clone();
        if let Some(talker) = talker {
            talker(self, state == ChannelState::StartTalking);
        }
        self.reset_state(state);
    }

    /// Collect digits and run the feature they spell.
    fn handle_feature(self: &Arc<Self>) {
        self.suspend_self();
        let timeout = Duration::from_millis(
            self.bridge()
                .map(|bridge| bridge.core().config().feature_digit_timeout_ms)
                .unwrap_or(FEATURE_DIGIT_TIMEOUT_MS),
        );

        let mut digits = String::new();
        let mut hung_up = false;
        let matched = loop {
            match self.channel.wait_for_digit(timeout) {
                DigitWait::Digit(digit) => {
                    digits.push(digit);
                    match self.features().match_dtmf(&digits) {
                        DtmfMatch::Exact(hook) => break Some(hook),
                        DtmfMatch::Partial if digits.len() < MAXIMUM_DTMF_FEATURE_STRING => {}
                        _ => break None,
                    }
                }
                DigitWait::Timeout => break None,
                DigitWait::Hangup => {
                    hung_up = true;
                    break None;
                }
            }
        };

        match matched {
            Some(hook) => {
                log::debug!("channel {} triggered feature {}", self.channel.name(), hook.code);
                if (hook.callback)(self) == HookAction::Remove {
                    self.features().remove_hook(hook.id);
                }
            }
            None if !hung_up && !digits.is_empty() => {
                if let Some(bridge) = self.bridge() {
                    bridge.dtmf_stream(&digits, Some(self.channel.as_ref()));
                }
            }
            None => {}
        }

        self.unsuspend_self();
        if hung_up {
            self.change_state(ChannelState::End);
        } else {
            self.reset_state(ChannelState::Feature);
        }
    }

    /// Fire every due interval hook with the participant suspended.
    fn run_intervals(self: &Arc<Self>) -> bool {
        let now = Instant::now();
        let due: Vec<_> = {
            let mut features = self.features();
            std::iter::from_fn(|| features.intervals.pop_due(now)).collect()
        };
        if due.is_empty() {
            return false;
        }
        self.suspend_self();
        for mut hook in due {
            match (hook.callback)(self) {
                IntervalAction::Keep => {
                    hook.trip = next_trip(hook.trip, hook.period, Instant::now());
                    self.features().intervals.reinsert(hook);
                }
                IntervalAction::Reschedule(period) if !period.is_zero() => {
                    hook.period = period;
                    hook.trip = Instant::now() + period;
                    self.features().intervals.reinsert(hook);
                }
                IntervalAction::Reschedule(_) | IntervalAction::Remove => {}
            }
        }
        self.unsuspend_self();
        true
    }
}

impl std::fmt::Debug for BridgeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeChannel")
            .field("channel", &self.channel.name())
            .field("state", &self.state())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(name: &str) -> Arc<BridgeChannel> {
        let (channel, _far) = Channel::pair(name, Format::slin(8000));
        BridgeChannel::new(channel, BridgeFeatures::new())
    }

    #[test]
    fn terminal_states_stick() {
        let bridge_channel = participant("SIP/sticky");
        bridge_channel.change_state(ChannelState::Feature);
        assert_eq!(bridge_channel.state(), ChannelState::Feature);
        bridge_channel.change_state(ChannelState::End);
        bridge_channel.change_state(ChannelState::Dtmf);
        bridge_channel.change_state(ChannelState::Depart);
        assert_eq!(bridge_channel.state(), ChannelState::End);
    }

    #[test]
    fn talk_events_only_interrupt_waiting_channels() {
        let bridge_channel = participant("SIP/talker");
        bridge_channel.notify_talking(true);
        assert_eq!(bridge_channel.state(), ChannelState::StartTalking);
        bridge_channel.reset_state(ChannelState::StartTalking);
        bridge_channel.change_state(ChannelState::Feature);
        bridge_channel.notify_talking(false);
        assert_eq!(bridge_channel.state(), ChannelState::Feature);
    }

    #[test]
    fn actions_run_in_queue_order() {
        let bridge_channel = participant("SIP/queue");
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            bridge_channel.queue_callback(move |_| order.lock().unwrap().push(n));
        }
        while bridge_channel.step() {}
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn run_returns_terminal_state() {
        let bridge_channel = participant("SIP/runner");
        let remote = bridge_channel.clone();
        let handle = std::thread::spawn(move || remote.run());
        std::thread::sleep(Duration::from_millis(10));
        bridge_channel.change_state(ChannelState::Depart);
        assert_eq!(handle.join().unwrap(), ChannelState::Depart);
    }
}
