//! Format translation seam.
//!
//! Codec work lives outside the bridging core. Components that need a
//! conversion ask a [`TranslationFactory`] for a path between two formats
//! and keep the returned [`Translator`] until the formats change. The
//! built-in [`LinearTranslationFactory`] only converts signed linear between
//! sample rates.

use std::sync::Arc;

use super::frame::{Format, Frame, FrameKind};

/// A stateful conversion from one format to another.
pub trait Translator: Send {
    fn source(&self) -> Format;
    fn destination(&self) -> Format;

    /// Convert one voice frame.
    ///
    /// Returns `None` when the frame could not be converted; callers treat
    /// that as "no audio this cycle".
    fn translate(&mut self, frame: &Frame) -> Option<Frame>;
}

/// Builds translation paths on demand.
pub trait TranslationFactory: Send + Sync {
    /// Build a path converting frames in `src` into `dst`.
    fn build_path(&self, dst: Format, src: Format) -> Option<Box<dyn Translator>>;
}

/// Factory converting signed linear between sample rates.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearTranslationFactory;

impl TranslationFactory for LinearTranslationFactory {
    fn build_path(&self, dst: Format, src: Format) -> Option<Box<dyn Translator>> {
        if !dst.is_slin() || !src.is_slin() || dst.rate == 0 || src.rate == 0 {
            log::debug!("no linear translation path from {} to {}", src, dst);
            return None;
        }
        Some(Box::new(LinearResampler::new(src.rate, dst.rate)))
    }
}

/// Shared instance of the built-in factory.
pub fn default_translation() -> Arc<dyn TranslationFactory> {
    Arc::new(LinearTranslationFactory)
}

/// Linear-interpolating resampler that keeps its phase across frames.
struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    last_sample: i16,
    position: f64,
}

impl LinearResampler {
    fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            src_rate,
            dst_rate,
            last_sample: 0,
            position: 0.0,
        }
    }

    fn resample(&mut self, input: &[i16]) -> Vec<i16> {
        if self.src_rate == self.dst_rate {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }
        let step = self.src_rate as f64 / self.dst_rate as f64;
        let len = input.len() as f64;
        let at = |index: usize, last: i16| -> f64 {
            if index == 0 {
                last as f64
            } else {
                input[index - 1] as f64
            }
        };

        // Positions index into [last_sample, input...].
        let mut out = Vec::with_capacity((len / step).ceil() as usize + 1);
        let mut position = self.position;
        while position < len {
            let index = position.floor() as usize;
            let frac = position - index as f64;
            let a = at(index, self.last_sample);
            let b = at(index + 1, self.last_sample);
            out.push((a + (b - a) * frac).round() as i16);
            position += step;
        }
        self.position = position - len;
        self.last_sample = input[input.len() - 1];
        out
    }
}

impl Translator for LinearResampler {
    fn source(&self) -> Format {
        Format::slin(self.src_rate)
    }

    fn destination(&self) -> Format {
        Format::slin(self.dst_rate)
    }

    fn translate(&mut self, frame: &Frame) -> Option<Frame> {
        if frame.kind != FrameKind::Voice || frame.format != self.source() {
            return None;
        }
        let samples = self.resample(frame.linear()?);
        Some(Frame::voice(self.dst_rate, samples))
    }
}
