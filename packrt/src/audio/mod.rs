//! Streaming audio decode and the fixed-channel software
//! mixer that consumes it.

pub mod decoder;
pub mod mixer;
pub mod mp3;
pub mod ogg;
pub mod resampler;
pub mod source;
pub mod types;
pub mod wav;

pub use decoder::AudioDecoder;
pub use mixer::Mixer;
pub use resampler::Resampler;
pub use source::{ReadAhead, Source};
pub use types::{AudioFrame, Decoder, DecoderInfo, LoopMode};
