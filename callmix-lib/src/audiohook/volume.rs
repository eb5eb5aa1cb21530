//! Per-channel volume control built on a manipulate hook.
//!
//! The first non-zero adjustment on a channel attaches a "Volume"
//! manipulator and records it in the channel's datastores; later calls only
//! update the stored levels.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use super::{Audiohook, AudiohookFlags, AudiohookStatus, Direction};
use crate::audio::Frame;
use crate::channel::Channel;
use crate::error::AudiohookError;

const VOLUME_DATASTORE: &str = "volume";
const VOLUME_SOURCE: &str = "Volume";

#[derive(Default)]
struct VolumeLevels {
    read: AtomicI32,
    write: AtomicI32,
}

impl VolumeLevels {
    fn get(&self, direction: Direction) -> i32 {
        match direction {
            Direction::Write => self.write.load(Ordering::Relaxed),
            _ => self.read.load(Ordering::Relaxed),
        }
    }

    fn set(&self, direction: Direction, volume: i32) {
        match direction {
            Direction::Read => self.read.store(volume, Ordering::Relaxed),
            Direction::Write => self.write.store(volume, Ordering::Relaxed),
            Direction::Both => {
                self.read.store(volume, Ordering::Relaxed);
                self.write.store(volume, Ordering::Relaxed);
            }
        }
    }

    fn adjust(&self, direction: Direction, delta: i32) {
        if matches!(direction, Direction::Read | Direction::Both) {
            saturating_add(&self.read, delta);
        }
        if matches!(direction, Direction::Write | Direction::Both) {
            saturating_add(&self.write, delta);
        }
    }
}

fn saturating_add(level: &AtomicI32, delta: i32) {
    let _ = level.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_add(delta))
    });
}

struct VolumeState {
    hook: Arc<Audiohook>,
    levels: Arc<VolumeLevels>,
}

fn find(channel: &Channel) -> Option<Arc<VolumeState>> {
    channel
        .datastores()
        .get::<VolumeState>(VOLUME_DATASTORE)
        .filter(|state| state.hook.status() != AudiohookStatus::Done)
}

fn find_or_create(channel: &Arc<Channel>) -> Result<Arc<VolumeState>, AudiohookError> {
    if let Some(state) = find(channel) {
        return Ok(state);
    }
    let levels = Arc::new(VolumeLevels::default());
    let manipulated = levels.clone();
    let hook = Audiohook::manipulate(
        VOLUME_SOURCE,
        AudiohookFlags::empty(),
        move |frame: Option<&mut Frame>, direction: Direction| match frame {
            Some(frame) => {
                let volume = manipulated.get(direction);
                volume != 0 && frame.adjust_volume(volume)
            }
            None => false,
        },
    );
    let state = Arc::new(VolumeState { hook, levels });
    channel.datastores().insert(VOLUME_DATASTORE, state.clone());
    state.hook.attach(channel)?;
    Ok(state)
}

/// Set the volume step for `direction` on `channel`.
///
/// Setting zero on a channel without a volume hook is a no-op.
pub fn volume_set(channel: &Arc<Channel>, direction: Direction, volume: i32) -> Result<(), AudiohookError> {
    let state = if volume == 0 {
        match find(channel) {
            Some(state) => state,
            None => return Ok(()),
        }
    } else {
        find_or_create(channel)?
    };
    state.levels.set(direction, volume);
    Ok(())
}

/// Current volume step for `direction`; `Both` reports the read side.
pub fn volume_get(channel: &Channel, direction: Direction) -> i32 {
    find(channel)
        .map(|state| state.levels.get(direction))
        .unwrap_or(0)
}

/// Change the volume step for `direction` by `delta`.
pub fn volume_adjust(channel: &Arc<Channel>, direction: Direction, delta: i32) -> Result<(), AudiohookError> {
    let state = find_or_create(channel)?;
    state.levels.adjust(direction, delta);
    Ok(())
}
