//! Audiohooks: taps, injectors and in-line transformers on a channel's
//! audio path.
//!
//! A hook is created with [`Audiohook::new`] (spy / whisper) or
//! [`Audiohook::manipulate`], attached to one channel, and from then on
//! sees every frame the channel reads or writes through the channel's
//! [`AudiohookList`]. Spies buffer what they see per direction so a reader
//! can pull it back out, whispers buffer audio that gets mixed into the
//! channel's outbound frames, and manipulators edit frames in place.

mod channel_ops;
mod list;
mod volume;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::audio::saturate;
use crate::audio::{default_translation, Format, Frame, SampleFactory, TranslationFactory, Translator};
use crate::channel::Channel;
use crate::constants::{
    AUDIOHOOK_SMALL_QUEUE_TOLERANCE_MS, AUDIOHOOK_SYNC_TOLERANCE_MS, AUDIOHOOK_TRIGGER_WAIT_MS,
    DEFAULT_SAMPLE_RATE,
};
use crate::error::AudiohookError;

pub use channel_ops::{
    count_by_source, count_by_source_running, detach_list, detach_source, move_by_source, remove,
    set_mute,
};
pub use list::AudiohookList;
pub use volume::{volume_adjust, volume_get, volume_set};

/// Role of a hook in the audio path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudiohookType {
    /// Receives a copy of the audio.
    Spy,
    /// Injects audio into the channel's outbound stream.
    Whisper,
    /// Modifies frames in place.
    Manipulate,
}

/// Lifecycle of a hook. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AudiohookStatus {
    New,
    Running,
    Shutdown,
    Done,
}

/// Which side of the channel a frame travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Audio coming from the far end.
    Read,
    /// Audio going to the far end.
    Write,
    Both,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AudiohookFlags: u32 {
        /// Wake readers when read-side audio arrives.
        const TRIGGER_READ = 1 << 0;
        /// Wake readers when write-side audio arrives.
        const TRIGGER_WRITE = 1 << 1;
        /// Keep both sides aligned and wake readers on any audio.
        const TRIGGER_SYNC = 1 << 2;
        /// Bound buffered audio to the small-queue tolerance.
        const SMALL_QUEUE = 1 << 3;
        const MUTE_READ = 1 << 4;
        const MUTE_WRITE = 1 << 5;
        /// Manipulator also receives DTMF frames.
        const WANTS_DTMF = 1 << 6;
    }
}

/// In-place frame editor run by a manipulate hook.
///
/// Called once per frame with the frame in the list's signed-linear
/// format, and one last time with `None` when the hook is torn down.
pub trait Manipulator: Send + Sync {
    /// Returns `true` when the frame was changed.
    fn manipulate(&self, frame: Option<&mut Frame>, direction: Direction) -> bool;
}

impl<F> Manipulator for F
where
    F: Fn(Option<&mut Frame>, Direction) -> bool + Send + Sync,
{
    fn manipulate(&self, frame: Option<&mut Frame>, direction: Direction) -> bool {
        self(frame, direction)
    }
}

/// Combined read of both sides of a hook.
#[derive(Debug, Clone)]
pub struct AudiohookRead {
    /// Sum of both sides in the requested format.
    pub mixed: Frame,
    /// Read-side audio in signed linear, if that side contributed.
    pub read: Option<Frame>,
    /// Write-side audio in signed linear, if that side contributed.
    pub write: Option<Frame>,
}

struct HookState {
    status: AudiohookStatus,
    flags: AudiohookFlags,
    rate: u32,
    read_factory: SampleFactory,
    write_factory: SampleFactory,
    read_time: Instant,
    write_time: Instant,
    read_volume: i32,
    write_volume: i32,
    translation: Arc<dyn TranslationFactory>,
    out_path: Option<(Format, Box<dyn Translator>)>,
    owner: Option<Weak<Channel>>,
}

impl HookState {
    fn factories(&mut self, direction: Direction) -> (&mut SampleFactory, &mut SampleFactory) {
        match direction {
            Direction::Read => (&mut self.read_factory, &mut self.write_factory),
            _ => (&mut self.write_factory, &mut self.read_factory),
        }
    }

    fn volume(&self, direction: Direction) -> i32 {
        match direction {
            Direction::Read => self.read_volume,
            _ => self.write_volume,
        }
    }
}

/// One interceptor on one channel.
pub struct Audiohook {
    kind: AudiohookType,
    source: String,
    state: Mutex<HookState>,
    trigger: Condvar,
    manipulator: Option<Arc<dyn Manipulator>>,
}

impl Audiohook {
    /// Create a spy or whisper hook.
    ///
    /// # Arguments
    ///
    /// * `kind` - Spy or whisper. Use [`Audiohook::manipulate`] for manipulators.
    /// * `source` - Label used to find the hook again (e.g. `"ChanSpy"`).
    /// * `flags` - Trigger, queue and mute behaviour.
    pub fn new(kind: AudiohookType, source: &str, flags: AudiohookFlags) -> Arc<Audiohook> {
        Arc::new(Self::build(kind, source, flags, None))
    }

    /// Create a manipulate hook around `manipulator`.
    pub fn manipulate(
        source: &str,
        flags: AudiohookFlags,
        manipulator: impl Manipulator + 'static,
    ) -> Arc<Audiohook> {
        Arc::new(Self::build(
            AudiohookType::Manipulate,
            source,
            flags,
            Some(Arc::new(manipulator) as Arc<dyn Manipulator>),
        ))
    }

    fn build(
        kind: AudiohookType,
        source: &str,
        flags: AudiohookFlags,
        manipulator: Option<Arc<dyn Manipulator>>,
    ) -> Self {
        let translation = default_translation();
        let now = Instant::now();
        Self {
            kind,
            source: source.to_string(),
            state: Mutex::new(HookState {
                status: AudiohookStatus::New,
                flags,
                rate: DEFAULT_SAMPLE_RATE,
                read_factory: SampleFactory::new(DEFAULT_SAMPLE_RATE, translation.clone()),
                write_factory: SampleFactory::new(DEFAULT_SAMPLE_RATE, translation.clone()),
                read_time: now,
                write_time: now,
                read_volume: 0,
                write_volume: 0,
                translation,
                out_path: None,
                owner: None,
            }),
            trigger: Condvar::new(),
            manipulator,
        }
    }

    pub fn kind(&self) -> AudiohookType {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn status(&self) -> AudiohookStatus {
        self.lock().status
    }

    pub fn flags(&self) -> AudiohookFlags {
        self.lock().flags
    }

    pub fn set_flags(&self, flags: AudiohookFlags) {
        self.lock().flags.insert(flags);
    }

    pub fn clear_flags(&self, flags: AudiohookFlags) {
        self.lock().flags.remove(flags);
    }

    /// Internal signed-linear rate of the hook's buffers.
    pub fn rate(&self) -> u32 {
        self.lock().rate
    }

    /// Move the status forward; earlier or equal statuses are ignored.
    pub fn update_status(&self, status: AudiohookStatus) {
        let mut state = self.lock();
        if status > state.status {
            state.status = status;
        }
        self.trigger.notify_all();
    }

    pub fn set_volume(&self, direction: Direction, volume: i32) {
        let mut state = self.lock();
        match direction {
            Direction::Read => state.read_volume = volume,
            Direction::Write => state.write_volume = volume,
            Direction::Both => {
                state.read_volume = volume;
                state.write_volume = volume;
            }
        }
    }

    /// Volume of one side; `Both` reports the read side.
    pub fn volume(&self, direction: Direction) -> i32 {
        self.lock().volume(direction)
    }

    /// Samples queued on each side as `(read, write)`.
    pub fn available(&self) -> (usize, usize) {
        let state = self.lock();
        (state.read_factory.available(), state.write_factory.available())
    }

    /// Attach to `channel`; the hook starts running immediately.
    pub fn attach(self: &Arc<Self>, channel: &Arc<Channel>) -> Result<(), AudiohookError> {
        {
            let mut state = self.lock();
            match state.status {
                AudiohookStatus::New => {}
                AudiohookStatus::Done => return Err(AudiohookError::Finished(self.source.clone())),
                _ => return Err(AudiohookError::AlreadyAttached(self.source.clone())),
            }
            state.owner = Some(Arc::downgrade(channel));
            state.translation = channel.translation().clone();
        }
        let mut hooks = channel.audiohooks();
        hooks.get_or_insert_with(AudiohookList::new).insert(self.clone());
        log::debug!("attached {:?} audiohook '{}' to {}", self.kind, self.source, channel.name());
        Ok(())
    }

    /// Take the hook off its channel and mark it done.
    ///
    /// Calling this on a hook that never attached or already finished does
    /// nothing.
    pub fn detach(self: &Arc<Self>) {
        let owner = {
            let state = self.lock();
            if matches!(state.status, AudiohookStatus::New | AudiohookStatus::Done) {
                return;
            }
            state.owner.as_ref().and_then(Weak::upgrade)
        };
        let removed = match owner {
            Some(channel) => {
                let mut hooks = channel.audiohooks();
                hooks.as_mut().map(|list| list.remove(self)).unwrap_or(false)
            }
            None => false,
        };
        // The list may already have dropped it while we waited for the lock.
        if removed || self.status() != AudiohookStatus::Done {
            self.finish();
        }
    }

    /// Wait up to the trigger timeout for new audio.
    pub fn trigger_wait(&self) {
        let state = self.lock();
        let _ = self
            .trigger
            .wait_timeout(state, Duration::from_millis(AUDIOHOOK_TRIGGER_WAIT_MS))
            .unwrap();
    }

    /// Feed one frame of signed linear at the hook rate into one side.
    ///
    /// Mute zeroes the audio before it is queued. With `TRIGGER_SYNC`, a
    /// side running more than the sync tolerance ahead of the other flushes
    /// both; with `SMALL_QUEUE`, a backlog over the small-queue tolerance on
    /// either side flushes both.
    pub fn write_frame(&self, direction: Direction, frame: &Frame) {
        let mut state = self.lock();
        if state.status == AudiohookStatus::Done {
            return;
        }
        let now = Instant::now();
        let previous = match direction {
            Direction::Read => std::mem::replace(&mut state.read_time, now),
            _ => std::mem::replace(&mut state.write_time, now),
        };
        let flags = state.flags;
        let (ours, other) = state.factories(direction);

        let our_samples = ours.available();
        let our_ms = now.duration_since(previous).as_millis() as u64 + ours.available_ms();
        let other_samples = other.available();
        let other_ms = other.available_ms();

        if flags.contains(AudiohookFlags::TRIGGER_SYNC)
            && other_samples > 0
            && our_ms.saturating_sub(other_ms) > AUDIOHOOK_SYNC_TOLERANCE_MS
        {
            log::debug!("flushing audiohook '{}' so it remains in sync", self.source);
            ours.flush();
            other.flush();
        }

        if flags.contains(AudiohookFlags::SMALL_QUEUE) {
            let cap = ours.format().samples_for_ms(AUDIOHOOK_SMALL_QUEUE_TOLERANCE_MS);
            if our_samples > cap || other_samples > cap {
                log::debug!("audiohook '{}' has stale audio, flushing both sides", self.source);
                ours.flush();
                other.flush();
            }
        }

        let mute_both = AudiohookFlags::MUTE_READ | AudiohookFlags::MUTE_WRITE;
        let mute = match direction {
            Direction::Read => flags.contains(AudiohookFlags::MUTE_READ),
            _ => flags.contains(AudiohookFlags::MUTE_WRITE),
        } || flags.contains(mute_both);

        if mute {
            let mut silent = frame.clone();
            silent.clear();
            ours.feed(&silent);
        } else {
            ours.feed(frame);
        }

        let trigger_read = flags.contains(AudiohookFlags::TRIGGER_READ) && direction == Direction::Read;
        let trigger_write =
            flags.contains(AudiohookFlags::TRIGGER_WRITE) && direction == Direction::Write;
        if trigger_read || trigger_write || flags.contains(AudiohookFlags::TRIGGER_SYNC) {
            self.trigger.notify_all();
        }
    }

    /// Read `samples` samples from one side (or both mixed) in `format`.
    ///
    /// # Returns
    ///
    /// `None` when not enough audio is ready, the hook is done, or no
    /// translation path to `format` exists.
    pub fn read_frame(&self, samples: usize, direction: Direction, format: Format) -> Option<Frame> {
        let mut state = self.lock();
        if state.status == AudiohookStatus::Done {
            return None;
        }
        let frame = match direction {
            Direction::Both => read_both(&mut state, samples, &self.source)?.mixed,
            _ => read_single(&mut state, samples, direction)?,
        };
        translate_out(&mut state, frame, format)
    }

    /// Read both sides mixed, and each side on its own.
    pub fn read_frame_all(&self, samples: usize, format: Format) -> Option<AudiohookRead> {
        let mut state = self.lock();
        if state.status == AudiohookStatus::Done {
            return None;
        }
        let mut read = read_both(&mut state, samples, &self.source)?;
        read.mixed = translate_out(&mut state, read.mixed, format)?;
        Some(read)
    }

    /// Pending whisper audio for the list's combine step.
    pub(crate) fn take_whisper(&self, samples: usize) -> Option<Vec<i16>> {
        let mut state = self.lock();
        if state.write_factory.available() < samples {
            return None;
        }
        let mut buf = vec![0i16; samples];
        state.write_factory.read(&mut buf);
        saturate::adjust_volume(&mut buf, state.write_volume);
        Some(buf)
    }

    /// Switch the hook's buffers to `rate`, dropping queued audio.
    pub(crate) fn set_internal_rate(&self, rate: u32) {
        let mut state = self.lock();
        if state.rate == rate {
            return;
        }
        state.rate = rate;
        state.read_factory = SampleFactory::new(rate, state.translation.clone());
        state.write_factory = SampleFactory::new(rate, state.translation.clone());
        state.out_path = None;
    }

    pub(crate) fn set_owner(&self, channel: &Arc<Channel>) {
        let mut state = self.lock();
        state.owner = Some(Arc::downgrade(channel));
        state.translation = channel.translation().clone();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.status() == AudiohookStatus::Running
    }

    /// Run the manipulator over `frame`.
    pub(crate) fn run_manipulator(&self, frame: &mut Frame, direction: Direction) -> bool {
        match &self.manipulator {
            Some(manipulator) => manipulator.manipulate(Some(frame), direction),
            None => false,
        }
    }

    /// Mark done, wake readers and give a manipulator its final call.
    pub(crate) fn finish(&self) {
        {
            let mut state = self.lock();
            state.status = AudiohookStatus::Done;
            state.owner = None;
            state.read_factory.flush();
            state.write_factory.flush();
            self.trigger.notify_all();
        }
        if let Some(manipulator) = &self.manipulator {
            manipulator.manipulate(None, Direction::Both);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HookState> {
        self.state.lock().unwrap()
    }
}

impl std::fmt::Debug for Audiohook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Audiohook")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .finish()
    }
}

fn read_single(state: &mut HookState, samples: usize, direction: Direction) -> Option<Frame> {
    let rate = state.rate;
    let volume = state.volume(direction);
    let (factory, _) = state.factories(direction);
    if samples == 0 || factory.available() < samples {
        return None;
    }
    let mut buf = vec![0i16; samples];
    if factory.read(&mut buf) != samples {
        return None;
    }
    let mut frame = Frame::voice(rate, buf);
    if volume != 0 {
        frame.adjust_volume(volume);
    }
    Some(frame)
}

fn read_both(state: &mut HookState, samples: usize, source: &str) -> Option<AudiohookRead> {
    if samples == 0 {
        return None;
    }
    let rate = state.rate;
    let format = Format::slin(rate);

    if state.flags.contains(AudiohookFlags::TRIGGER_SYNC) {
        let read_ms = state.read_factory.available_ms();
        let write_ms = state.write_factory.available_ms();
        if read_ms.abs_diff(write_ms) > AUDIOHOOK_SYNC_TOLERANCE_MS {
            log::debug!(
                "audiohook '{}' sides drifted ({}ms / {}ms), flushing",
                source,
                read_ms,
                write_ms
            );
            state.read_factory.flush();
            state.write_factory.flush();
            return None;
        }
    }

    let usable_read = state.read_factory.available() >= samples;
    let usable_write = state.write_factory.available() >= samples;
    if !usable_read && !usable_write {
        return None;
    }

    // Give a side that fed recently a chance to catch up before mixing alone.
    let grace = Duration::from_millis(format.ms_for_samples(samples) * 2);
    if usable_read && !usable_write && state.write_time.elapsed() < grace {
        return None;
    }
    if usable_write && !usable_read && state.read_time.elapsed() < grace {
        return None;
    }

    let read = if usable_read {
        read_single(state, samples, Direction::Read)
    } else {
        None
    };
    let write = if usable_write {
        read_single(state, samples, Direction::Write)
    } else {
        None
    };

    let mixed = match (&read, &write) {
        (Some(read), Some(write)) => {
            let mut mixed = read.clone();
            if let (Some(dst), Some(src)) = (mixed.linear_mut(), write.linear()) {
                saturate::add_into(dst, src);
            }
            mixed
        }
        (Some(only), None) | (None, Some(only)) => only.clone(),
        (None, None) => return None,
    };
    Some(AudiohookRead { mixed, read, write })
}

fn translate_out(state: &mut HookState, frame: Frame, format: Format) -> Option<Frame> {
    if frame.format == format {
        return Some(frame);
    }
    let rebuild = match &state.out_path {
        Some((current, _)) => *current != format,
        None => true,
    };
    if rebuild {
        state.out_path = None;
        let path = state.translation.build_path(format, frame.format)?;
        state.out_path = Some((format, path));
    }
    let (_, path) = state.out_path.as_mut()?;
    path.translate(&frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Codec;

    fn spy(flags: AudiohookFlags) -> Arc<Audiohook> {
        Audiohook::new(AudiohookType::Spy, "test", flags)
    }

    #[test]
    fn write_then_read_returns_the_same_samples() {
        let hook = spy(AudiohookFlags::empty());
        let samples: Vec<i16> = (0..160).map(|i| i as i16 * 3 - 200).collect();
        hook.write_frame(Direction::Read, &Frame::voice(8000, samples.clone()));
        let frame = hook
            .read_frame(160, Direction::Read, Format::slin(8000))
            .expect("frame");
        assert_eq!(frame.linear().unwrap(), &samples[..]);
    }

    #[test]
    fn read_mute_yields_exact_silence() {
        let hook = spy(AudiohookFlags::MUTE_READ);
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![1234; 160]));
        let frame = hook.read_frame(160, Direction::Read, Format::slin(8000)).unwrap();
        assert_eq!(frame.samples, 160);
        assert!(frame.linear().unwrap().iter().all(|s| *s == 0));
    }

    #[test]
    fn mute_on_both_flags_silences_either_side() {
        let hook = spy(AudiohookFlags::MUTE_READ | AudiohookFlags::MUTE_WRITE);
        hook.write_frame(Direction::Write, &Frame::voice(8000, vec![99; 160]));
        let frame = hook.read_frame(160, Direction::Write, Format::slin(8000)).unwrap();
        assert!(frame.linear().unwrap().iter().all(|s| *s == 0));
    }

    #[test]
    fn short_buffers_yield_nothing() {
        let hook = spy(AudiohookFlags::empty());
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![1; 80]));
        assert!(hook.read_frame(160, Direction::Read, Format::slin(8000)).is_none());
        assert_eq!(hook.available(), (80, 0));
    }

    #[test]
    fn volume_is_applied_on_read() {
        let hook = spy(AudiohookFlags::empty());
        hook.set_volume(Direction::Read, 2);
        hook.set_volume(Direction::Write, -4);
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![100; 160]));
        hook.write_frame(Direction::Write, &Frame::voice(8000, vec![100; 160]));
        let read = hook.read_frame(160, Direction::Read, Format::slin(8000)).unwrap();
        let write = hook.read_frame(160, Direction::Write, Format::slin(8000)).unwrap();
        assert_eq!(read.linear().unwrap()[0], 200);
        assert_eq!(write.linear().unwrap()[0], 25);
    }

    #[test]
    fn both_sides_are_summed_with_saturation() {
        let hook = spy(AudiohookFlags::empty());
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![30000; 160]));
        hook.write_frame(Direction::Write, &Frame::voice(8000, vec![10000; 160]));
        let all = hook.read_frame_all(160, Format::slin(8000)).unwrap();
        assert!(all.mixed.linear().unwrap().iter().all(|s| *s == i16::MAX));
        assert_eq!(all.read.unwrap().linear().unwrap()[0], 30000);
        assert_eq!(all.write.unwrap().linear().unwrap()[0], 10000);
    }

    #[test]
    fn one_sided_read_waits_for_a_recent_counterpart() {
        let hook = spy(AudiohookFlags::empty());
        hook.write_frame(Direction::Write, &Frame::voice(8000, vec![5; 160]));
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![7; 160]));
        hook.read_frame(160, Direction::Read, Format::slin(8000)).unwrap();
        // Write side is ready, read side fed moments ago: hold off.
        assert!(hook.read_frame(160, Direction::Both, Format::slin(8000)).is_none());
        std::thread::sleep(Duration::from_millis(60));
        let frame = hook.read_frame(160, Direction::Both, Format::slin(8000)).unwrap();
        assert_eq!(frame.linear().unwrap()[0], 5);
    }

    #[test]
    fn sync_drift_flushes_instead_of_returning_stale_audio() {
        let hook = spy(AudiohookFlags::TRIGGER_SYNC);
        for _ in 0..10 {
            hook.write_frame(Direction::Read, &Frame::voice(8000, vec![42; 160]));
        }
        assert_eq!(hook.available(), (1600, 0));
        assert!(hook.read_frame(160, Direction::Both, Format::slin(8000)).is_none());
        assert_eq!(hook.available(), (0, 0));
    }

    #[test]
    fn small_queue_bounds_the_backlog() {
        let hook = spy(AudiohookFlags::SMALL_QUEUE);
        for _ in 0..10 {
            hook.write_frame(Direction::Read, &Frame::voice(8000, vec![1; 160]));
        }
        let (read, _) = hook.available();
        assert!(read <= 800 + 160, "backlog {} not bounded", read);
    }

    #[test]
    fn missing_translation_path_yields_nothing() {
        let hook = spy(AudiohookFlags::empty());
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![1; 160]));
        assert!(hook
            .read_frame(160, Direction::Read, Format::new(Codec::Ulaw, 8000))
            .is_none());
    }

    #[test]
    fn requested_rate_is_translated() {
        let hook = spy(AudiohookFlags::empty());
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![1; 160]));
        let frame = hook.read_frame(160, Direction::Read, Format::slin(16000)).unwrap();
        assert_eq!(frame.format, Format::slin(16000));
        assert_eq!(frame.samples, 320);
    }

    #[test]
    fn status_never_moves_backwards() {
        let hook = spy(AudiohookFlags::empty());
        hook.update_status(AudiohookStatus::Shutdown);
        hook.update_status(AudiohookStatus::Running);
        assert_eq!(hook.status(), AudiohookStatus::Shutdown);
    }

    #[test]
    fn done_hooks_ignore_io() {
        let hook = spy(AudiohookFlags::empty());
        hook.update_status(AudiohookStatus::Done);
        hook.write_frame(Direction::Read, &Frame::voice(8000, vec![1; 160]));
        assert_eq!(hook.available(), (0, 0));
        assert!(hook.read_frame(160, Direction::Read, Format::slin(8000)).is_none());
    }

    #[test]
    fn trigger_wait_returns_after_timeout() {
        let hook = spy(AudiohookFlags::TRIGGER_READ);
        let started = Instant::now();
        hook.trigger_wait();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
