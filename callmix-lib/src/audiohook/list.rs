//! Per-channel collection of audiohooks and the frame routing through them.

use std::sync::Arc;

use super::{Audiohook, AudiohookFlags, AudiohookStatus, AudiohookType, Direction};
use crate::audio::saturate;
use crate::audio::{Format, Frame, TranslationFactory, Translator};
use crate::constants::DEFAULT_SAMPLE_RATE;

struct Path {
    src: Format,
    dst: Format,
    translator: Box<dyn Translator>,
}

/// Hooks attached to one channel, grouped by type.
pub struct AudiohookList {
    spies: Vec<Arc<Audiohook>>,
    whispers: Vec<Arc<Audiohook>>,
    manipulators: Vec<Arc<Audiohook>>,
    /// Indexed by direction: 0 read, 1 write.
    in_paths: [Option<Path>; 2],
    out_paths: [Option<Path>; 2],
    rate: u32,
}

impl Default for AudiohookList {
    fn default() -> Self {
        Self::new()
    }
}

impl AudiohookList {
    pub fn new() -> Self {
        Self {
            spies: Vec::new(),
            whispers: Vec::new(),
            manipulators: Vec::new(),
            in_paths: [None, None],
            out_paths: [None, None],
            rate: DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spies.is_empty() && self.whispers.is_empty() && self.manipulators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spies.len() + self.whispers.len() + self.manipulators.len()
    }

    /// Signed-linear rate frames are processed at.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    fn sublist(&mut self, kind: AudiohookType) -> &mut Vec<Arc<Audiohook>> {
        match kind {
            AudiohookType::Spy => &mut self.spies,
            AudiohookType::Whisper => &mut self.whispers,
            AudiohookType::Manipulate => &mut self.manipulators,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Audiohook>> {
        self.spies
            .iter()
            .chain(self.whispers.iter())
            .chain(self.manipulators.iter())
    }

    /// Add a hook, starting it if it has not run yet.
    pub(crate) fn insert(&mut self, hook: Arc<Audiohook>) {
        hook.set_internal_rate(self.rate);
        hook.update_status(AudiohookStatus::Running);
        self.sublist(hook.kind()).push(hook);
    }

    /// Remove a hook without finishing it.
    pub(crate) fn take(&mut self, hook: &Arc<Audiohook>) -> bool {
        let list = self.sublist(hook.kind());
        match list.iter().position(|candidate| Arc::ptr_eq(candidate, hook)) {
            Some(index) => {
                list.remove(index);
                self.reset_if_empty();
                true
            }
            None => false,
        }
    }

    /// Remove and finish a hook. Returns `false` if it was not in the list.
    pub(crate) fn remove(&mut self, hook: &Arc<Audiohook>) -> bool {
        if self.take(hook) {
            hook.finish();
            true
        } else {
            false
        }
    }

    /// First hook whose source matches, ignoring case.
    pub fn find_by_source(&self, source: &str) -> Option<Arc<Audiohook>> {
        self.iter()
            .find(|hook| hook.source().eq_ignore_ascii_case(source))
            .cloned()
    }

    pub fn count_by_source(&self, source: &str, kind: AudiohookType) -> usize {
        self.iter()
            .filter(|hook| hook.kind() == kind && hook.source().eq_ignore_ascii_case(source))
            .count()
    }

    pub fn count_by_source_running(&self, source: &str, kind: AudiohookType) -> usize {
        self.iter()
            .filter(|hook| {
                hook.kind() == kind
                    && hook.source().eq_ignore_ascii_case(source)
                    && hook.is_running()
            })
            .count()
    }

    /// Finish every hook and empty the list.
    pub fn detach_all(&mut self) {
        let hooks: Vec<_> = self
            .spies
            .drain(..)
            .chain(self.whispers.drain(..))
            .chain(self.manipulators.drain(..))
            .collect();
        for hook in hooks {
            hook.finish();
        }
        self.reset_if_empty();
    }

    fn reset_if_empty(&mut self) {
        if self.is_empty() {
            self.rate = DEFAULT_SAMPLE_RATE;
            self.in_paths = [None, None];
            self.out_paths = [None, None];
        }
    }

    /// Raise the processing rate; hooks restart their buffers at the new rate.
    fn raise_rate(&mut self, rate: u32) {
        if rate <= self.rate {
            return;
        }
        log::debug!("audiohook list rate raised from {} to {}", self.rate, rate);
        self.rate = rate;
        for hook in self.iter() {
            hook.set_internal_rate(rate);
        }
        self.in_paths = [None, None];
        self.out_paths = [None, None];
    }

    /// Pass one frame through every hook for `direction`.
    ///
    /// Voice is converted to signed linear at the list rate once, fed to
    /// spies, mixed with whisper audio (write direction only) and handed to
    /// manipulators in registration order. The original frame comes back
    /// untouched unless a whisper or manipulator changed the audio. DTMF
    /// only reaches manipulators flagged [`AudiohookFlags::WANTS_DTMF`].
    pub fn write_list(
        &mut self,
        direction: Direction,
        frame: Frame,
        translation: &Arc<dyn TranslationFactory>,
    ) -> Frame {
        if frame.is_dtmf() {
            return self.dtmf_list(direction, frame);
        }
        if !frame.is_voice() {
            return frame;
        }

        self.raise_rate(frame.format.rate);
        let internal = Format::slin(self.rate);
        let index = path_index(direction);
        let mut middle = if frame.format == internal {
            frame.clone()
        } else {
            match run_path(&mut self.in_paths[index], translation, &frame, internal) {
                Some(converted) => converted,
                None => return frame,
            }
        };

        let mut index_hook = 0;
        while index_hook < self.spies.len() {
            let hook = self.spies[index_hook].clone();
            if !hook.is_running() {
                self.spies.remove(index_hook);
                hook.finish();
                continue;
            }
            hook.write_frame(direction, &middle);
            index_hook += 1;
        }

        let mut modified = false;
        if direction == Direction::Write && !self.whispers.is_empty() {
            let samples = middle.samples;
            let mut combined = vec![0i16; samples];
            let mut have_whisper = false;
            let mut index_hook = 0;
            while index_hook < self.whispers.len() {
                let hook = self.whispers[index_hook].clone();
                if !hook.is_running() {
                    self.whispers.remove(index_hook);
                    hook.finish();
                    continue;
                }
                if let Some(audio) = hook.take_whisper(samples) {
                    saturate::add_into(&mut combined, &audio);
                    have_whisper = true;
                }
                index_hook += 1;
            }
            if have_whisper {
                if let Some(samples) = middle.linear_mut() {
                    saturate::add_into(samples, &combined);
                    modified = true;
                }
            }
        }

        let mut index_hook = 0;
        while index_hook < self.manipulators.len() {
            let hook = self.manipulators[index_hook].clone();
            if !hook.is_running() {
                self.manipulators.remove(index_hook);
                hook.finish();
                continue;
            }
            if hook.run_manipulator(&mut middle, direction) {
                modified = true;
            }
            index_hook += 1;
        }
        self.reset_if_empty();

        if !modified {
            return frame;
        }
        if middle.format == frame.format {
            return middle;
        }
        match run_path(&mut self.out_paths[index], translation, &middle, frame.format) {
            Some(converted) => converted,
            None => frame,
        }
    }

    fn dtmf_list(&mut self, direction: Direction, mut frame: Frame) -> Frame {
        let mut index_hook = 0;
        while index_hook < self.manipulators.len() {
            let hook = self.manipulators[index_hook].clone();
            if !hook.is_running() {
                self.manipulators.remove(index_hook);
                hook.finish();
                continue;
            }
            if hook.flags().contains(AudiohookFlags::WANTS_DTMF) {
                hook.run_manipulator(&mut frame, direction);
            }
            index_hook += 1;
        }
        frame
    }
}

fn path_index(direction: Direction) -> usize {
    match direction {
        Direction::Read => 0,
        _ => 1,
    }
}

fn run_path(
    slot: &mut Option<Path>,
    translation: &Arc<dyn TranslationFactory>,
    frame: &Frame,
    dst: Format,
) -> Option<Frame> {
    let stale = match slot {
        Some(path) => path.src != frame.format || path.dst != dst,
        None => true,
    };
    if stale {
        *slot = translation
            .build_path(dst, frame.format)
            .map(|translator| Path {
                src: frame.format,
                dst,
                translator,
            });
    }
    slot.as_mut()?.translator.translate(frame)
}
