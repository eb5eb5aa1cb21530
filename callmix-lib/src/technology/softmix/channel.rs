//! Per-participant softmix state.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::alert::Alert;
use crate::audio::{Format, Frame, SampleFactory, TranslationFactory};
use crate::bridge::BridgeChannel;
use crate::config::SoftmixSettings;

/// Mixing state guarded by the channel's softmix lock.
pub(super) struct MixState {
    pub(super) factory: SampleFactory,
    /// What this channel put into the current tick.
    pub(super) our_buf: Vec<i16>,
    /// Mix for this channel, own contribution removed.
    pub(super) final_buf: Vec<i16>,
    pub(super) have_audio: bool,
    pub(super) have_frame: bool,
    pub(super) suspended: bool,
    pub(super) talk: TalkDetector,
}

pub(super) struct SoftmixChannel {
    id: u64,
    bridge_channel: Weak<BridgeChannel>,
    alert: Arc<Alert>,
    translation: Arc<dyn TranslationFactory>,
    state: Mutex<MixState>,
}

impl SoftmixChannel {
    pub(super) fn new(bridge_channel: &Arc<BridgeChannel>, rate: u32) -> Self {
        let translation = bridge_channel.channel().translation().clone();
        let mut channel = Self::with_parts(
            bridge_channel.id(),
            Arc::downgrade(bridge_channel),
            bridge_channel.alert(),
            rate,
            translation,
        );
        channel.state.get_mut().unwrap().suspended = bridge_channel.is_suspended();
        channel
    }

    pub(super) fn with_parts(
        id: u64,
        bridge_channel: Weak<BridgeChannel>,
        alert: Arc<Alert>,
        rate: u32,
        translation: Arc<dyn TranslationFactory>,
    ) -> Self {
        Self {
            id,
            bridge_channel,
            alert,
            state: Mutex::new(MixState {
                factory: SampleFactory::new(rate, translation.clone()),
                our_buf: Vec::new(),
                final_buf: Vec::new(),
                have_audio: false,
                have_frame: false,
                suspended: false,
                talk: TalkDetector::default(),
            }),
            translation,
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, MixState> {
        self.state.lock().unwrap()
    }

    pub(super) fn bridge_channel(&self) -> Option<Arc<BridgeChannel>> {
        self.bridge_channel.upgrade()
    }

    /// Wake the owning participant thread.
    pub(super) fn notify(&self) {
        self.alert.notify();
    }

    /// Restart buffers at a new mixing rate.
    pub(super) fn set_rate(&self, rate: u32) {
        let mut state = self.lock();
        if state.factory.format().rate == rate {
            return;
        }
        state.factory = SampleFactory::new(rate, self.translation.clone());
        state.our_buf.clear();
        state.final_buf.clear();
        state.have_audio = false;
        state.have_frame = false;
    }

    /// Queue input and hand back a ready output frame, if any.
    pub(super) fn feed(&self, frame: &Frame) -> Option<Frame> {
        let mut state = self.lock();
        if !state.suspended {
            state.factory.feed(frame);
        }
        take_output(&mut state)
    }

    pub(super) fn take_output(&self) -> Option<Frame> {
        take_output(&mut self.lock())
    }
}

fn take_output(state: &mut MixState) -> Option<Frame> {
    if !state.have_frame {
        return None;
    }
    state.have_frame = false;
    let rate = state.factory.format().rate;
    Some(Frame::voice(rate, std::mem::take(&mut state.final_buf)))
}

/// Energy-based talk detection over whole mixing intervals.
#[derive(Debug, Default)]
pub(super) struct TalkDetector {
    talking: bool,
    quiet_ms: u64,
}

impl TalkDetector {
    /// Account one interval of audio (`None` when the channel sent nothing).
    ///
    /// # Returns
    ///
    /// `Some(true)` when talking starts, `Some(false)` when it stops.
    pub(super) fn update(
        &mut self,
        samples: Option<&[i16]>,
        interval_ms: u64,
        settings: &SoftmixSettings,
    ) -> Option<bool> {
        let loud = samples
            .filter(|samples| !samples.is_empty())
            .map(|samples| average_amplitude(samples) > settings.talk_threshold)
            .unwrap_or(false);
        if loud {
            self.quiet_ms = 0;
            if !self.talking {
                self.talking = true;
                return Some(true);
            }
            return None;
        }
        if self.talking {
            self.quiet_ms += interval_ms;
            if self.quiet_ms >= settings.silence_threshold_ms {
                self.talking = false;
                self.quiet_ms = 0;
                return Some(false);
            }
        }
        None
    }

    #[cfg(test)]
    pub(super) fn is_talking(&self) -> bool {
        self.talking
    }
}

fn average_amplitude(samples: &[i16]) -> u32 {
    let total: u64 = samples.iter().map(|s| (*s as i32).unsigned_abs() as u64).sum();
    (total / samples.len() as u64) as u32
}

/// Format a softmix channel is read and written in.
pub(super) fn mixing_format(rate: u32) -> Format {
    Format::slin(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talk_starts_on_energy_and_stops_after_silence() {
        let settings = SoftmixSettings {
            talk_detection: true,
            talk_threshold: 100,
            silence_threshold_ms: 60,
        };
        let mut detector = TalkDetector::default();
        let loud = vec![500i16; 160];
        let quiet = vec![10i16; 160];
        assert_eq!(detector.update(Some(&loud), 20, &settings), Some(true));
        assert_eq!(detector.update(Some(&loud), 20, &settings), None);
        assert_eq!(detector.update(Some(&quiet), 20, &settings), None);
        assert_eq!(detector.update(None, 20, &settings), None);
        assert_eq!(detector.update(Some(&quiet), 20, &settings), Some(false));
        assert!(!detector.is_talking());
    }
}
