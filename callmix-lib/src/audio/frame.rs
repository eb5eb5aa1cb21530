//! Media frames exchanged between channels, audiohooks and bridges.

use std::fmt::{Display, Formatter};

use super::saturate;
use crate::constants::DEFAULT_SAMPLE_RATE;

/// Payload encoding of a voice frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// 16-bit signed linear PCM, native endian.
    Slin,
    Ulaw,
    Alaw,
    G722,
    Gsm,
    Opus,
}

/// Codec plus sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format {
    pub codec: Codec,
    pub rate: u32,
}

impl Format {
    pub const fn new(codec: Codec, rate: u32) -> Self {
        Self { codec, rate }
    }

    /// Signed linear at `rate`.
    pub const fn slin(rate: u32) -> Self {
        Self::new(Codec::Slin, rate)
    }

    pub fn is_slin(&self) -> bool {
        self.codec == Codec::Slin
    }

    /// Number of samples covering `ms` milliseconds at this rate.
    pub fn samples_for_ms(&self, ms: u64) -> usize {
        (self.rate as u64 * ms / 1000) as usize
    }

    /// Duration in milliseconds of `samples` samples at this rate.
    pub fn ms_for_samples(&self, samples: usize) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        samples as u64 * 1000 / self.rate as u64
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::slin(DEFAULT_SAMPLE_RATE)
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self.codec {
            Codec::Slin => "slin",
            Codec::Ulaw => "ulaw",
            Codec::Alaw => "alaw",
            Codec::G722 => "g722",
            Codec::Gsm => "gsm",
            Codec::Opus => "opus",
        };
        write!(f, "{}@{}", name, self.rate)
    }
}

/// Call-control indications carried in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Hangup,
    Answer,
    Ringing,
    Hold,
    Unhold,
    SourceUpdate,
}

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Voice,
    DtmfBegin(char),
    DtmfEnd(char),
    Control(ControlFrame),
    /// Carries nothing; used as a "nothing to deliver" placeholder.
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Linear(Vec<i16>),
    Encoded(Vec<u8>),
}

/// A unit of media or signalling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub format: Format,
    /// Samples covered by the payload (voice frames only).
    pub samples: usize,
    pub payload: Payload,
}

impl Frame {
    /// Signed-linear voice frame at `rate`.
    pub fn voice(rate: u32, samples: Vec<i16>) -> Self {
        Self {
            kind: FrameKind::Voice,
            format: Format::slin(rate),
            samples: samples.len(),
            payload: Payload::Linear(samples),
        }
    }

    /// Signed-linear frame of `samples` zeros.
    pub fn silence(rate: u32, samples: usize) -> Self {
        Self::voice(rate, vec![0; samples])
    }

    /// Voice frame in a non-linear codec.
    pub fn encoded(format: Format, samples: usize, data: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Voice,
            format,
            samples,
            payload: Payload::Encoded(data),
        }
    }

    pub fn dtmf_begin(digit: char) -> Self {
        Self::signalling(FrameKind::DtmfBegin(digit))
    }

    pub fn dtmf_end(digit: char) -> Self {
        Self::signalling(FrameKind::DtmfEnd(digit))
    }

    pub fn control(control: ControlFrame) -> Self {
        Self::signalling(FrameKind::Control(control))
    }

    pub fn null() -> Self {
        Self::signalling(FrameKind::Null)
    }

    fn signalling(kind: FrameKind) -> Self {
        Self {
            kind,
            format: Format::default(),
            samples: 0,
            payload: Payload::None,
        }
    }

    pub fn is_voice(&self) -> bool {
        self.kind == FrameKind::Voice
    }

    pub fn is_dtmf(&self) -> bool {
        matches!(self.kind, FrameKind::DtmfBegin(_) | FrameKind::DtmfEnd(_))
    }

    /// Signed-linear samples, if this frame carries them.
    pub fn linear(&self) -> Option<&[i16]> {
        match &self.payload {
            Payload::Linear(samples) => Some(samples),
            _ => None,
        }
    }

    pub fn linear_mut(&mut self) -> Option<&mut [i16]> {
        match &mut self.payload {
            Payload::Linear(samples) => Some(samples),
            _ => None,
        }
    }

    /// Zero a signed-linear payload in place.
    pub fn clear(&mut self) {
        if let Some(samples) = self.linear_mut() {
            samples.iter_mut().for_each(|s| *s = 0);
        }
    }

    /// Apply a volume step to a signed-linear payload.
    ///
    /// Returns `false` when the frame does not carry linear audio.
    pub fn adjust_volume(&mut self, adjustment: i32) -> bool {
        match self.linear_mut() {
            Some(samples) => {
                saturate::adjust_volume(samples, adjustment);
                true
            }
            None => false,
        }
    }

    /// Duration of the payload in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.format.ms_for_samples(self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sample_math() {
        let fmt = Format::slin(16000);
        assert_eq!(fmt.samples_for_ms(20), 320);
        assert_eq!(fmt.ms_for_samples(320), 20);
        assert_eq!(fmt.to_string(), "slin@16000");
    }

    #[test]
    fn clear_and_volume_touch_only_linear_payloads() {
        let mut frame = Frame::voice(8000, vec![10, -10]);
        assert!(frame.adjust_volume(3));
        assert_eq!(frame.linear(), Some(&[30i16, -30][..]));
        frame.clear();
        assert_eq!(frame.linear(), Some(&[0i16, 0][..]));

        let mut encoded = Frame::encoded(Format::new(Codec::Ulaw, 8000), 2, vec![0xff, 0x7f]);
        assert!(!encoded.adjust_volume(3));
        assert_eq!(encoded.payload, Payload::Encoded(vec![0xff, 0x7f]));
    }

    #[test]
    fn signalling_frames_carry_no_samples() {
        let frame = Frame::dtmf_begin('5');
        assert!(frame.is_dtmf());
        assert_eq!(frame.samples, 0);
        assert!(frame.linear().is_none());
    }
}
