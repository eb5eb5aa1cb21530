//! Channel-level audiohook operations addressed by source name.

use std::sync::Arc;

use super::{Audiohook, AudiohookFlags, AudiohookList, AudiohookType, Direction};
use crate::channel::Channel;
use crate::error::AudiohookError;

fn not_found(channel: &Channel, source: &str) -> AudiohookError {
    AudiohookError::NotFound {
        label: source.to_string(),
        channel: channel.name().to_string(),
    }
}

/// Detach the first hook on `channel` whose source is `source`.
pub fn detach_source(channel: &Channel, source: &str) -> Result<(), AudiohookError> {
    let hook = {
        let hooks = channel.audiohooks();
        hooks.as_ref().and_then(|list| list.find_by_source(source))
    };
    match hook {
        Some(hook) => {
            hook.detach();
            Ok(())
        }
        None => Err(not_found(channel, source)),
    }
}

/// Take `hook` off `channel` right away.
///
/// The hook is finished in place; a reader blocked on it wakes up and sees
/// it done.
pub fn remove(channel: &Channel, hook: &Arc<Audiohook>) -> Result<(), AudiohookError> {
    let mut hooks = channel.audiohooks();
    let removed = hooks.as_mut().map(|list| list.remove(hook)).unwrap_or(false);
    if removed {
        Ok(())
    } else {
        Err(not_found(channel, hook.source()))
    }
}

/// Move the hook named `source` from `old` to `new`, keeping its status.
pub fn move_by_source(old: &Channel, new: &Arc<Channel>, source: &str) -> Result<(), AudiohookError> {
    let hook = {
        let mut hooks = old.audiohooks();
        let list = hooks.as_mut().ok_or_else(|| not_found(old, source))?;
        let hook = list.find_by_source(source).ok_or_else(|| not_found(old, source))?;
        list.take(&hook);
        hook
    };
    hook.set_owner(new);
    let mut hooks = new.audiohooks();
    hooks.get_or_insert_with(AudiohookList::new).insert(hook);
    log::debug!("moved audiohook '{}' from {} to {}", source, old.name(), new.name());
    Ok(())
}

/// Set or clear the mute flag for `direction` on the hook named `source`.
///
/// `Direction::Both` touches both mute flags.
pub fn set_mute(
    channel: &Channel,
    source: &str,
    direction: Direction,
    mute: bool,
) -> Result<(), AudiohookError> {
    let hook = {
        let hooks = channel.audiohooks();
        hooks.as_ref().and_then(|list| list.find_by_source(source))
    }
    .ok_or_else(|| not_found(channel, source))?;

    let flags = match direction {
        Direction::Read => AudiohookFlags::MUTE_READ,
        Direction::Write => AudiohookFlags::MUTE_WRITE,
        Direction::Both => AudiohookFlags::MUTE_READ | AudiohookFlags::MUTE_WRITE,
    };
    if mute {
        hook.set_flags(flags);
    } else {
        hook.clear_flags(flags);
    }
    Ok(())
}

/// Hooks of `kind` named `source` on `channel`.
pub fn count_by_source(channel: &Channel, source: &str, kind: AudiohookType) -> usize {
    let hooks = channel.audiohooks();
    hooks
        .as_ref()
        .map(|list| list.count_by_source(source, kind))
        .unwrap_or(0)
}

/// Running hooks of `kind` named `source` on `channel`.
pub fn count_by_source_running(channel: &Channel, source: &str, kind: AudiohookType) -> usize {
    let hooks = channel.audiohooks();
    hooks
        .as_ref()
        .map(|list| list.count_by_source_running(source, kind))
        .unwrap_or(0)
}

/// Finish every hook on `channel`, as done when the channel goes away.
pub fn detach_list(channel: &Channel) {
    let list = channel.audiohooks().take();
    if let Some(mut list) = list {
        list.detach_all();
    }
}
