//! The pull-based audio decode core: wraps a format backend (WAV/Ogg/MP3)
//! with resampling and the loop contract.
//!
//! Seeking to an arbitrary loop point reuses a decode-from-start-and-skip
//! approach rather than adding per-backend seek support: `reset()`
//! rewinds to frame 0, then the target frame count is discarded through
//! ordinary `get_pcm` calls. Sample-accurate timing across a reset is
//! explicitly not guaranteed.

use packrt_common::error::Error;
use packrt_common::Result;

use super::mp3::Mp3Decoder;
use super::ogg::OggDecoder;
use super::resampler::Resampler;
use super::source::ReadAhead;
use super::types::{Decoder, DecoderInfo, LoopMode};
use super::wav::WavDecoder;

/// Audio format tag values.
const FORMAT_WAV: u16 = 0x0001;
const FORMAT_MP3: u16 = 0x0055;
const FORMAT_OGG: u16 = 0x674F;

const SKIP_CHUNK_FRAMES: usize = 1024;

/// Opens the right backend for a format tag and wraps it in the shared
/// resample/loop machinery.
pub struct AudioDecoder {
    backend: Box<dyn Decoder>,
    loop_mode: LoopMode,
    resampler: Resampler,
    output_freq: u32,
    stereo: bool,
    native_pos: u64,
    native_scratch: Vec<i16>,
}

impl AudioDecoder {
    pub fn open(
        format_tag: u16,
        source: ReadAhead,
        output_freq: u32,
        loop_start: u64,
        loop_len: i64,
        interpolate: bool,
    ) -> Result<Self> {
        let backend: Box<dyn Decoder> = match format_tag {
            FORMAT_WAV => Box::new(WavDecoder::open(source)?),
            FORMAT_OGG => Box::new(OggDecoder::open(source)?),
            FORMAT_MP3 => Box::new(Mp3Decoder::open(source)?),
            other => return Err(Error::BadFormat(format!("unrecognized audio format tag {other:#06x}"))),
        };
        Self::from_backend(backend, output_freq, loop_start, loop_len, interpolate)
    }

    fn from_backend(
        backend: Box<dyn Decoder>,
        output_freq: u32,
        loop_start: u64,
        loop_len: i64,
        interpolate: bool,
    ) -> Result<Self> {
        let DecoderInfo { native_freq, stereo } = backend.info();
        Ok(AudioDecoder {
            backend,
            loop_mode: LoopMode::from_loop_params(loop_start, loop_len),
            resampler: Resampler::new(native_freq, output_freq, stereo, interpolate),
            output_freq,
            stereo,
            native_pos: 0,
            native_scratch: Vec::new(),
        })
    }

    pub fn native_info(&self) -> DecoderInfo {
        self.backend.info()
    }

    /// Rewind to frame 0 and discard `target` native frames.
    fn seek_to_frame(&mut self, target: u64) -> Result<()> {
        self.backend.reset()?;
        self.native_pos = 0;
        let channels = if self.stereo { 2 } else { 1 };
        let mut remaining = target;
        let mut chunk = vec![0i16; SKIP_CHUNK_FRAMES * channels];
        while remaining > 0 {
            let want = remaining.min(SKIP_CHUNK_FRAMES as u64) as usize;
            let produced = self.backend.get_pcm(&mut chunk[..want * channels])?;
            if produced == 0 {
                break; // loop_start beyond stream length; nothing more to skip.
            }
            remaining -= produced as u64;
            self.native_pos += produced as u64;
        }
        Ok(())
    }

    /// Pull up to `out.len()/channels` resampled frames. Returns the
    /// number of frames actually produced; `0` means true end of stream
    /// (no loop configured, or loop-back itself failed).
    pub fn get_pcm(&mut self, out: &mut [i16]) -> Result<usize> {
        let channels = if self.stereo { 2 } else { 1 };
        let mut resampled = Vec::with_capacity(out.len());

        while resampled.len() < out.len() {
            let region_end = match self.loop_mode {
                LoopMode::Region { loop_start, loop_len } => Some(loop_start + loop_len),
                _ => None,
            };

            let native_budget = match region_end {
                Some(end) if self.native_pos < end => (end - self.native_pos).min(SKIP_CHUNK_FRAMES as u64) as usize,
                Some(_) => 0, // already at/past the boundary; loop-back below handles it
                None => SKIP_CHUNK_FRAMES,
            };

            if native_budget == 0 {
                if let LoopMode::Region { loop_start, .. } = self.loop_mode {
                    self.seek_to_frame(loop_start)?;
                    continue;
                }
            }

            let frames = native_budget.max(1);
            self.native_scratch.resize(frames * channels, 0);
            let produced = self.backend.get_pcm(&mut self.native_scratch[..frames * channels])?;

            if produced == 0 {
                match self.loop_mode {
                    LoopMode::None => break,
                    LoopMode::LoopAtEnd { loop_start } => {
                        self.seek_to_frame(loop_start)?;
                        continue;
                    }
                    LoopMode::Region { loop_start, .. } => {
                        self.seek_to_frame(loop_start)?;
                        continue;
                    }
                }
            }

            self.native_pos += produced as u64;
            self.resampler.process(&self.native_scratch[..produced * channels], &mut resampled);
        }

        let written = resampled.len().min(out.len());
        out[..written].copy_from_slice(&resampled[..written]);
        Ok(written / channels.max(1))
    }

    pub fn reset(&mut self) -> Result<()> {
        self.seek_to_frame(0)
    }
}

impl Decoder for AudioDecoder {
    fn info(&self) -> DecoderInfo {
        DecoderInfo {
            native_freq: self.output_freq,
            stereo: self.stereo,
        }
    }
    fn reset(&mut self) -> Result<()> {
        AudioDecoder::reset(self)
    }
    fn get_pcm(&mut self, buf: &mut [i16]) -> Result<usize> {
        AudioDecoder::get_pcm(self, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::Source;

    fn make_wav(channels: u16, rate: u32, samples: &[i16]) -> Vec<u8> {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&rate.to_le_bytes());
        buf.extend_from_slice(&(rate * channels as u32 * 2).to_le_bytes());
        buf.extend_from_slice(&(channels * 2).to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&data);
        buf
    }

    #[test]
    fn passthrough_wav_no_loop_reaches_true_eof() {
        let samples: Vec<i16> = (0..20).collect();
        let wav = make_wav(1, 44100, &samples);
        let mut dec =
            AudioDecoder::open(FORMAT_WAV, ReadAhead::new(Source::MemBuf(wav)), 44100, 0, 0, false).unwrap();
        let mut out = vec![0i16; 100];
        let produced = dec.get_pcm(&mut out).unwrap();
        assert_eq!(produced, 20);
        let produced2 = dec.get_pcm(&mut out).unwrap();
        assert_eq!(produced2, 0);
    }

    #[test]
    fn loop_at_end_rewinds_to_loop_start() {
        let samples: Vec<i16> = (0..10).collect();
        let wav = make_wav(1, 44100, &samples);
        let mut dec =
            AudioDecoder::open(FORMAT_WAV, ReadAhead::new(Source::MemBuf(wav)), 44100, 2, -1, false).unwrap();
        let mut out = vec![0i16; 14];
        let produced = dec.get_pcm(&mut out).unwrap();
        assert_eq!(produced, 14);
        // first 10 are the file, then loop back to sample index 2
        assert_eq!(&out[0..10], &samples[..]);
        assert_eq!(&out[10..14], &samples[2..6]);
    }
}
