//! Pooled two-party bridging.
//!
//! Instead of each participant thread reading its own channel, one pool
//! thread serves the channels of several two-party bridges. Participant
//! threads only handle actions, features and interval hooks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{
    write_to_others, BridgeTechnology, Capabilities, Preference, TechnologyContext, TechnologyInstance,
};
use crate::alert::Alert;
use crate::audio::Frame;
use crate::bridge::{BridgeChannel, ChannelState};
use crate::channel::ChannelRead;
use crate::error::BridgeError;

const IDLE_WAIT_MS: u64 = 1000;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

type Pool = Arc<Mutex<Vec<Arc<MultiplexedGroup>>>>;

/// Two-party technology sharing one thread between several bridges.
pub struct MultiplexedBridge {
    pool: Pool,
    bridges_per_thread: usize,
}

impl MultiplexedBridge {
    pub fn new(bridges_per_thread: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(Vec::new())),
            bridges_per_thread: bridges_per_thread.max(1),
        }
    }

    /// Pool threads currently running.
    pub fn thread_count(&self) -> usize {
        self.pool.lock().unwrap().len()
    }
}

impl BridgeTechnology for MultiplexedBridge {
    fn name(&self) -> &'static str {
        "multiplexed_bridge"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ONE_TO_ONE_MIX
    }

    fn preference(&self) -> Preference {
        Preference::High
    }

    fn create(&self, context: &TechnologyContext<'_>) -> Result<Box<dyn TechnologyInstance>, BridgeError> {
        let mut pool = self.pool.lock().unwrap();
        let existing = pool
            .iter()
            .find(|group| group.state.lock().unwrap().bridges < self.bridges_per_thread)
            .cloned();
        let group = match existing {
            Some(group) => group,
            None => {
                let group = MultiplexedGroup::start()?;
                pool.push(group.clone());
                group
            }
        };
        group.state.lock().unwrap().bridges += 1;
        log::debug!("bridge {} served by multiplexed group {}", context.bridge_id, group.id);
        Ok(Box::new(MultiplexedInstance {
            group,
            pool: self.pool.clone(),
            members: Vec::new(),
            destroyed: false,
        }))
    }
}

#[derive(Default)]
struct GroupState {
    bridges: usize,
    members: Vec<Arc<BridgeChannel>>,
}

/// One pool thread and the channels it reads.
struct MultiplexedGroup {
    id: u64,
    state: Mutex<GroupState>,
    alert: Arc<Alert>,
    stop: AtomicBool,
}

impl MultiplexedGroup {
    fn start() -> Result<Arc<Self>, BridgeError> {
        let group = Arc::new(Self {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(GroupState::default()),
            alert: Arc::new(Alert::new()),
            stop: AtomicBool::new(false),
        });
        let worker = group.clone();
        // Detached: the pool thread may be waiting on a bridge lock held by
        // whoever stops it.
        thread::Builder::new()
            .name(format!("multiplexed-{}", group.id))
            .spawn(move || run_group(worker))?;
        Ok(group)
    }

    fn add(&self, bridge_channel: &Arc<BridgeChannel>) {
        let mut state = self.state.lock().unwrap();
        if !state.members.iter().any(|member| member.id() == bridge_channel.id()) {
            state.members.push(bridge_channel.clone());
        }
        drop(state);
        bridge_channel.channel().set_waiter(Some(self.alert.clone()));
        self.alert.notify();
    }

    fn remove(&self, bridge_channel: &Arc<BridgeChannel>) {
        self.state
            .lock()
            .unwrap()
            .members
            .retain(|member| member.id() != bridge_channel.id());
        bridge_channel.channel().set_waiter(Some(bridge_channel.alert()));
        bridge_channel.poke();
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.alert.notify();
        log::debug!("multiplexed group {} stopping", self.id);
    }
}

/// Pool thread: read every waiting member and hand frames to its bridge.
fn run_group(group: Arc<MultiplexedGroup>) {
    let mut start = 0usize;
    while !group.stop.load(Ordering::Acquire) {
        let seen = group.alert.generation();
        let members = group.state.lock().unwrap().members.clone();
        let count = members.len();
        let mut handled = false;
        for offset in 0..count {
            let member = &members[(start + offset) % count];
            if !relaying(member) {
                continue;
            }
            match member.channel().read() {
                ChannelRead::Frame(frame) => handled |= relay(member, frame),
                ChannelRead::Hangup => {
                    member.change_state(ChannelState::End);
                    handled = true;
                }
                ChannelRead::Empty => {}
            }
        }
        if count > 0 {
            start = (start + 1) % count;
        }
        if !handled {
            group
                .alert
                .wait_since(seen, Some(Duration::from_millis(IDLE_WAIT_MS)));
        }
    }
}

fn relaying(member: &BridgeChannel) -> bool {
    !member.is_suspended() && member.state() == ChannelState::Wait
}

/// Pass a frame read by the pool thread to the member's bridge.
///
/// The member may have left `Wait` or been suspended while the frame was
/// read. Its own thread owns the channel then: DTMF goes back to the channel
/// for it and anything else is dropped.
fn relay(member: &Arc<BridgeChannel>, frame: Frame) -> bool {
    if !relaying(member) {
        if frame.is_dtmf() {
            member.channel().unread(frame);
        }
        return false;
    }
    member.handle_frame(frame);
    true
}

struct MultiplexedInstance {
    group: Arc<MultiplexedGroup>,
    pool: Pool,
    members: Vec<Arc<BridgeChannel>>,
    destroyed: bool,
}

impl TechnologyInstance for MultiplexedInstance {
    fn join(&mut self, bridge_channel: &Arc<BridgeChannel>) -> Result<(), BridgeError> {
        if self.members.len() >= 2 {
            return Err(BridgeError::Rejected {
                technology: "multiplexed_bridge",
                channel: bridge_channel.channel().name().to_string(),
                reason: "bridge already has two participants".to_string(),
            });
        }
        self.members.push(bridge_channel.clone());
        if !bridge_channel.is_suspended() {
            self.group.add(bridge_channel);
        }
        Ok(())
    }

    fn leave(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        self.members.retain(|member| member.id() != bridge_channel.id());
        self.group.remove(bridge_channel);
    }

    fn suspend(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        self.group.remove(bridge_channel);
    }

    fn unsuspend(&mut self, bridge_channel: &Arc<BridgeChannel>) {
        self.group.add(bridge_channel);
    }

    fn write(&mut self, bridge_channel: &Arc<BridgeChannel>, frame: &Frame) {
        write_to_others(&self.members, bridge_channel, frame);
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        for member in std::mem::take(&mut self.members) {
            self.group.remove(&member);
        }
        let mut pool = self.pool.lock().unwrap();
        let empty = {
            let mut state = self.group.state.lock().unwrap();
            state.bridges = state.bridges.saturating_sub(1);
            state.bridges == 0
        };
        if empty {
            pool.retain(|group| !Arc::ptr_eq(group, &self.group));
            drop(pool);
            self.group.stop();
        }
    }
}

impl Drop for MultiplexedInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Format;
    use crate::bridge::BridgeFeatures;
    use crate::channel::{Channel, DigitWait};
    use crate::config::CoreConfig;
    use crate::technology::MixSettings;

    fn context(config: &CoreConfig) -> TechnologyContext<'_> {
        TechnologyContext {
            bridge_id: "test",
            config,
            mix: MixSettings {
                internal_sample_rate: 0,
                mixing_interval_ms: 20,
            },
        }
    }

    #[test]
    fn digits_read_during_a_feature_go_back_to_the_channel() {
        let (channel, far) = Channel::pair("SIP/feature", Format::slin(8000));
        let bridge_channel = BridgeChannel::new(channel.clone(), BridgeFeatures::new());
        bridge_channel.change_state(ChannelState::Feature);

        assert!(!relay(&bridge_channel, Frame::dtmf_end('7')));
        assert!(!relay(&bridge_channel, Frame::voice(8000, vec![100; 160])));
        assert_eq!(channel.wait_for_digit(Duration::from_millis(10)), DigitWait::Digit('7'));
        assert_eq!(channel.read(), ChannelRead::Empty);
        assert!(far.drain().is_empty());
    }

    #[test]
    fn groups_fill_before_new_threads_start() {
        let config = CoreConfig::default();
        let technology = MultiplexedBridge::new(2);
        let a = technology.create(&context(&config)).unwrap();
        let b = technology.create(&context(&config)).unwrap();
        assert_eq!(technology.thread_count(), 1);
        let c = technology.create(&context(&config)).unwrap();
        assert_eq!(technology.thread_count(), 2);
        drop(c);
        assert_eq!(technology.thread_count(), 1);
        drop(a);
        drop(b);
        assert_eq!(technology.thread_count(), 0);
    }
}
