//! Ogg Vorbis decoder backend, via `symphonia` rather than a direct
//! libvorbis FFI binding — the `read`/`seek`/`tell` callback-adapter shape
//! is exactly what `ReadAhead`'s `Read + Seek` impl already gives
//! symphonia's `MediaSource`.

use std::io::{Read, Seek};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_VORBIS};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use packrt_common::error::Error;
use packrt_common::Result;

use super::source::ReadAhead;
use super::types::{Decoder, DecoderInfo};

struct SeekableAdapter(ReadAhead);

impl Read for SeekableAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}
impl Seek for SeekableAdapter {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.0.seek(pos)
    }
}
impl MediaSource for SeekableAdapter {
    fn is_seekable(&self) -> bool {
        true
    }
    fn byte_len(&self) -> Option<u64> {
        Some(self.0.len())
    }
}

pub struct OggDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    native_freq: u32,
    stereo: bool,
    pending: Vec<i16>,
    pending_pos: usize,
}

impl OggDecoder {
    pub fn open(source: ReadAhead) -> Result<Self> {
        let boxed: Box<dyn MediaSource> = Box::new(SeekableAdapter(source));
        let mss = MediaSourceStream::new(boxed, Default::default());

        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::BadFormat(format!("ogg probe failed: {e}")))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec == CODEC_TYPE_VORBIS)
            .ok_or_else(|| Error::BadFormat("no vorbis track found".into()))?;
        let track_id = track.id;
        let native_freq = track.codec_params.sample_rate.unwrap_or(44100);
        let stereo = track.codec_params.channels.map(|c| c.count() >= 2).unwrap_or(true);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::BadFormat(format!("no vorbis decoder: {e}")))?;

        Ok(OggDecoder {
            format,
            decoder,
            track_id,
            native_freq,
            stereo,
            pending: Vec::new(),
            pending_pos: 0,
        })
    }

    /// Decode one more packet into `pending`, retrying past corrupt
    /// packets until data arrives or EOF.
    fn refill(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(e) => return Err(Error::BadFormat(format!("ogg demux error: {e}"))),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(sample_buf.samples());
                    self.pending_pos = 0;
                    return Ok(true);
                }
                // A decode error on one packet ("HOLE") is not fatal —
                // retry with the next packet.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(Error::BadFormat(format!("ogg decode error: {e}"))),
            }
        }
    }
}

impl Decoder for OggDecoder {
    fn info(&self) -> DecoderInfo {
        DecoderInfo {
            native_freq: self.native_freq,
            stereo: self.stereo,
        }
    }

    fn reset(&mut self) -> Result<()> {
        use symphonia::core::formats::{SeekMode, SeekTo};
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp { ts: 0, track_id: self.track_id },
            )
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        self.pending.clear();
        self.pending_pos = 0;
        Ok(())
    }

    fn get_pcm(&mut self, buf: &mut [i16]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.pending_pos >= self.pending.len() {
                if !self.refill()? {
                    break;
                }
            }
            let avail = self.pending.len() - self.pending_pos;
            let want = (buf.len() - written).min(avail);
            buf[written..written + want]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + want]);
            self.pending_pos += want;
            written += want;
        }
        Ok(written / if self.stereo { 2 } else { 1 })
    }
}
