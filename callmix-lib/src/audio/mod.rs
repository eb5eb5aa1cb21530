//! Audio primitives: frames, saturating arithmetic, sample queues and
//! translation.

pub mod factory;
pub mod frame;
pub mod saturate;
pub mod translate;

pub use factory::SampleFactory;
pub use frame::{Codec, ControlFrame, Format, Frame, FrameKind, Payload};
pub use translate::{default_translation, LinearTranslationFactory, TranslationFactory, Translator};
