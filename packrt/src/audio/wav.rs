//! WAV decoder backend.
//!
//! Scans up to 2 KiB of header, requires `RIFF....WAVE`, and locates
//! `fmt ` then `data` in that order. `get_pcm` is a direct byte copy out
//! of the source — no actual decoding, since the payload is already
//! linear PCM.

use std::io::Read;

use packrt_common::error::Error;
use packrt_common::Result;

use super::source::ReadAhead;
use super::types::{Decoder, DecoderInfo};

const HEADER_SCAN_LIMIT: u64 = 2048;

pub struct WavDecoder {
    source: ReadAhead,
    data_start: u64,
    data_len: u64,
    cursor: u64,
    channels: u16,
    native_freq: u32,
}

impl WavDecoder {
    pub fn open(mut source: ReadAhead) -> Result<Self> {
        let mut header = vec![0u8; HEADER_SCAN_LIMIT.min(source.len()) as usize];
        source.read_exact(&mut header).map_err(Error::Io)?;

        if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
            return Err(Error::BadFormat("not a RIFF/WAVE file".into()));
        }

        let mut pos = 12usize;
        let mut fmt: Option<(u16, u16, u32, u16)> = None; // tag, channels, rate, bits
        let mut data: Option<(u64, u64)> = None;

        while pos + 8 <= header.len() {
            let chunk_id = &header[pos..pos + 4];
            let chunk_size = u32::from_le_bytes(header[pos + 4..pos + 8].try_into().unwrap());
            let body = pos + 8;

            if chunk_id == b"fmt " {
                if body + 16 > header.len() {
                    return Err(Error::BadFormat("truncated fmt chunk".into()));
                }
                let tag = u16::from_le_bytes(header[body..body + 2].try_into().unwrap());
                let channels = u16::from_le_bytes(header[body + 2..body + 4].try_into().unwrap());
                let rate = u32::from_le_bytes(header[body + 4..body + 8].try_into().unwrap());
                let bits = u16::from_le_bytes(header[body + 14..body + 16].try_into().unwrap());
                fmt = Some((tag, channels, rate, bits));
            } else if chunk_id == b"data" {
                if fmt.is_none() {
                    return Err(Error::BadFormat("data chunk before fmt chunk".into()));
                }
                data = Some((body as u64, chunk_size as u64));
                break;
            }

            pos = body + chunk_size as usize + (chunk_size as usize % 2);
        }

        let (tag, channels, rate, bits) = fmt.ok_or_else(|| Error::BadFormat("missing fmt chunk".into()))?;
        let (data_start, data_len) = data.ok_or_else(|| Error::BadFormat("missing data chunk".into()))?;

        if tag != 0x0001 {
            return Err(Error::BadFormat(format!("unsupported WAV format tag {tag:#06x}")));
        }
        if channels != 1 && channels != 2 {
            return Err(Error::BadFormat(format!("unsupported channel count {channels}")));
        }
        if bits != 16 {
            return Err(Error::BadFormat(format!("unsupported bit depth {bits}")));
        }

        Ok(WavDecoder {
            source,
            data_start,
            data_len,
            cursor: 0,
            channels,
            native_freq: rate,
        })
    }
}

impl Decoder for WavDecoder {
    fn info(&self) -> DecoderInfo {
        DecoderInfo {
            native_freq: self.native_freq,
            stereo: self.channels == 2,
        }
    }

    fn reset(&mut self) -> Result<()> {
        use std::io::{Seek, SeekFrom};
        self.cursor = 0;
        self.source
            .seek(SeekFrom::Start(self.data_start))
            .map_err(Error::Io)?;
        Ok(())
    }

    fn get_pcm(&mut self, buf: &mut [i16]) -> Result<usize> {
        let remaining = (self.data_len - self.cursor) / 2;
        let want = (buf.len() as u64).min(remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let mut bytes = vec![0u8; want * 2];
        self.source.read_exact(&mut bytes).map_err(Error::Io)?;
        for (i, chunk) in bytes.chunks_exact(2).enumerate() {
            buf[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        self.cursor += bytes.len() as u64;
        Ok(want / self.channels.max(1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::Source;

    fn make_wav(channels: u16, samples: &[i16]) -> Vec<u8> {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&44100u32.to_le_bytes());
        buf.extend_from_slice(&(44100u32 * channels as u32 * 2).to_le_bytes());
        buf.extend_from_slice(&(channels * 2).to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&data);
        buf
    }

    #[test]
    fn parses_header_and_reads_samples() {
        let samples = [1i16, -1, 2, -2, 3, -3];
        let wav = make_wav(2, &samples);
        let mut decoder = WavDecoder::open(ReadAhead::new(Source::MemBuf(wav))).unwrap();
        assert!(decoder.info().stereo);
        let mut buf = [0i16; 6];
        let produced = decoder.get_pcm(&mut buf).unwrap();
        assert_eq!(produced, 3);
        assert_eq!(buf, samples);
    }

    #[test]
    fn rejects_non_riff_header() {
        let bogus = vec![0u8; 64];
        assert!(WavDecoder::open(ReadAhead::new(Source::MemBuf(bogus))).is_err());
    }

    #[test]
    fn reset_rewinds_to_data_start() {
        let samples = [10i16, 20, 30, 40];
        let wav = make_wav(2, &samples);
        let mut decoder = WavDecoder::open(ReadAhead::new(Source::MemBuf(wav))).unwrap();
        let mut buf = [0i16; 4];
        decoder.get_pcm(&mut buf).unwrap();
        decoder.reset().unwrap();
        let mut buf2 = [0i16; 4];
        decoder.get_pcm(&mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }
}
