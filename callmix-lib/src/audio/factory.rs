//! Sample factory: a signed-linear queue with sample-accurate accounting.

use std::sync::Arc;

use dasp_ring_buffer::Bounded;

use super::frame::{Format, Frame};
use super::translate::{TranslationFactory, Translator};
use crate::constants::FACTORY_HOLD_MS;

/// Queue of signed-linear samples at a fixed rate.
///
/// Frames in other formats are translated on the way in. The factory holds
/// a bounded amount of audio; input that would overflow it is refused.
pub struct SampleFactory {
    ring: Bounded<Vec<i16>>,
    format: Format,
    translation: Arc<dyn TranslationFactory>,
    path: Option<(Format, Box<dyn Translator>)>,
}

impl SampleFactory {
    /// Create an empty factory at `rate` able to hold [`FACTORY_HOLD_MS`].
    pub fn new(rate: u32, translation: Arc<dyn TranslationFactory>) -> Self {
        let capacity = Format::slin(rate).samples_for_ms(FACTORY_HOLD_MS).max(1);
        Self::with_capacity(rate, capacity, translation)
    }

    pub fn with_capacity(
        rate: u32,
        capacity: usize,
        translation: Arc<dyn TranslationFactory>,
    ) -> Self {
        Self {
            ring: Bounded::from(vec![0i16; capacity.max(1)]),
            format: Format::slin(rate),
            translation,
            path: None,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Samples ready to be read.
    pub fn available(&self) -> usize {
        self.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.ring.max_len()
    }

    /// Queued audio in milliseconds.
    pub fn available_ms(&self) -> u64 {
        self.format.ms_for_samples(self.available())
    }

    /// Queue a voice frame, translating it to the factory format if needed.
    ///
    /// # Returns
    ///
    /// Number of samples queued. Zero when the frame carries no audio, can
    /// not be translated, or does not fit.
    pub fn feed(&mut self, frame: &Frame) -> usize {
        if !frame.is_voice() {
            return 0;
        }
        if frame.format == self.format {
            return match frame.linear() {
                Some(samples) => self.feed_samples(samples),
                None => 0,
            };
        }

        let rebuild = match &self.path {
            Some((src, _)) => *src != frame.format,
            None => true,
        };
        if rebuild {
            self.path = self
                .translation
                .build_path(self.format, frame.format)
                .map(|path| (frame.format, path));
        }
        let translated = match self.path.as_mut() {
            Some((_, path)) => path.translate(frame),
            None => None,
        };
        match translated.as_ref().and_then(|frame| frame.linear()) {
            Some(samples) => self.feed_samples(samples),
            None => {
                log::debug!("sample factory could not translate {} to {}", frame.format, self.format);
                0
            }
        }
    }

    /// Queue raw samples already in the factory format.
    pub fn feed_samples(&mut self, samples: &[i16]) -> usize {
        if samples.len() > self.capacity() - self.available() {
            log::warn!(
                "sample factory full ({} of {} samples), dropping {} samples",
                self.available(),
                self.capacity(),
                samples.len()
            );
            return 0;
        }
        for sample in samples {
            self.ring.push(*sample);
        }
        samples.len()
    }

    /// Fill `buf` from the front of the queue.
    ///
    /// # Returns
    ///
    /// Number of samples copied; the rest of `buf` is untouched.
    pub fn read(&mut self, buf: &mut [i16]) -> usize {
        let mut count = 0;
        for slot in buf.iter_mut() {
            match self.ring.pop() {
                Some(sample) => {
                    *slot = sample;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Drop everything queued.
    pub fn flush(&mut self) {
        while self.ring.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::translate::default_translation;

    #[test]
    fn feed_then_read_preserves_order() {
        let mut factory = SampleFactory::new(8000, default_translation());
        assert_eq!(factory.feed(&Frame::voice(8000, vec![1, 2, 3, 4])), 4);
        assert_eq!(factory.available(), 4);

        let mut buf = [0i16; 3];
        assert_eq!(factory.read(&mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(factory.available(), 1);

        let mut buf = [9i16; 3];
        assert_eq!(factory.read(&mut buf), 1);
        assert_eq!(buf, [4, 9, 9]);
    }

    #[test]
    fn overflow_is_refused_whole() {
        let mut factory = SampleFactory::with_capacity(8000, 200, default_translation());
        assert_eq!(factory.feed(&Frame::silence(8000, 160)), 160);
        assert_eq!(factory.feed(&Frame::silence(8000, 160)), 0);
        assert_eq!(factory.available(), 160);
    }

    #[test]
    fn other_rates_are_resampled_on_feed() {
        let mut factory = SampleFactory::new(8000, default_translation());
        assert_eq!(factory.feed(&Frame::voice(16000, vec![100; 320])), 160);
        assert_eq!(factory.available_ms(), 20);
    }

    #[test]
    fn flush_empties_the_queue() {
        let mut factory = SampleFactory::new(8000, default_translation());
        factory.feed(&Frame::silence(8000, 160));
        factory.flush();
        assert_eq!(factory.available(), 0);
    }
}
