//! Fixed-channel software mixer, grounded directly in
//! `sysdep-psp/sound.c`'s `sound_generate`: per-channel fixed-point
//! volume/pan, a linear fade ramp, and a shift-based amplification
//! factor rather than floating-point gain multiply.
//!
//! cpal drives the callback side; the callback pulls straight from
//! `Mixer::mix_tick` instead of a generic closure, since the mixer — not
//! the caller — owns the per-channel decode state.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{debug, info, warn};

use packrt_common::error::Error;
use packrt_common::Result;

use super::types::Decoder;

/// `sys_sound_setvol(1.0)` maps to this fixed-point unit.
const VOLUME_MULT: i64 = 256 << 16;
/// `sys_sound_setpan(-1.0..=1.0)` maps onto `0..=PAN_MULT`.
const PAN_MULT: i64 = 256;
/// Amplification shift; `AMPSHIFT == -1` in the original means +1 bit of
/// headroom is traded for a lower max volume before clipping.
const AMPSHIFT: i32 = -1;

const SOUND_CHANNELS: usize = 128;
/// Matches the original's `SOUND_BUFLEN`: the largest per-tick frame
/// count the mixer will service in one `mix_tick` call.
pub const SOUND_BUFLEN: usize = 1024;

pub type TriggerCallback = Box<dyn FnMut() + Send>;

struct Channel {
    decoder: Option<Box<dyn Decoder>>,
    playing: bool,
    stereo: bool,
    fade_cut: bool,
    volume: i64,
    fade_rate: i64,
    fade_target: i64,
    pan: i64,
    trigger: Option<TriggerCallback>,
    scratch: Vec<i16>,
}

impl Channel {
    fn idle() -> Self {
        Channel {
            decoder: None,
            playing: false,
            stereo: false,
            fade_cut: false,
            volume: VOLUME_MULT,
            fade_rate: 0,
            fade_target: 0,
            pan: PAN_MULT / 2,
            trigger: None,
            scratch: Vec::new(),
        }
    }
}

/// The fixed-channel mixer: owns every channel's decode state and
/// produces interleaved S16LE stereo frames on demand.
pub struct Mixer {
    channels: Mutex<Vec<Channel>>,
    output_freq: u32,
}

impl Mixer {
    pub fn new(output_freq: u32) -> Arc<Self> {
        Arc::new(Mixer {
            channels: Mutex::new((0..SOUND_CHANNELS).map(|_| Channel::idle()).collect()),
            output_freq,
        })
    }

    pub fn output_freq(&self) -> u32 {
        self.output_freq
    }

    /// Start playback of `decoder` on `channel` (0-based), or the first
    /// free channel when `channel` is `None`. Returns the channel used.
    pub fn play_buffer(
        &self,
        channel: Option<usize>,
        decoder: Box<dyn Decoder>,
        volume: f32,
        pan: f32,
        trigger: Option<TriggerCallback>,
    ) -> Result<usize> {
        if !(0.0..=1.0).contains(&((pan + 1.0) / 2.0)) {
            return Err(Error::InvalidArgument("pan out of [-1,1]".into()));
        }
        let mut channels = self.channels.lock().unwrap();
        let idx = match channel {
            Some(i) if i < channels.len() => i,
            Some(i) => return Err(Error::InvalidArgument(format!("channel {i} out of range"))),
            None => channels
                .iter()
                .position(|c| !c.playing)
                .ok_or_else(|| Error::TooMany("mixer channels"))?,
        };

        let info = decoder.info();
        let ch = &mut channels[idx];
        ch.decoder = Some(decoder);
        ch.stereo = info.stereo;
        ch.playing = true;
        ch.fade_cut = false;
        ch.fade_rate = 0;
        ch.volume = volume_to_fixed(volume);
        ch.pan = pan_to_fixed(pan);
        ch.trigger = trigger;
        ch.scratch.clear();
        Ok(idx)
    }

    /// Same as `play_buffer` but the caller has already opened the
    /// backend via a file-backed source.
    pub fn play_file(
        &self,
        channel: Option<usize>,
        decoder: Box<dyn Decoder>,
        volume: f32,
        pan: f32,
        trigger: Option<TriggerCallback>,
    ) -> Result<usize> {
        self.play_buffer(channel, decoder, volume, pan, trigger)
    }

    pub fn pause(&self, channel: usize) {
        if let Some(ch) = self.channels.lock().unwrap().get_mut(channel) {
            ch.playing = false;
        }
    }

    pub fn resume(&self, channel: usize) {
        if let Some(ch) = self.channels.lock().unwrap().get_mut(channel) {
            if ch.decoder.is_some() {
                ch.playing = true;
            }
        }
    }

    pub fn cut(&self, channel: usize) {
        if let Some(ch) = self.channels.lock().unwrap().get_mut(channel) {
            ch.playing = false;
            ch.decoder = None;
            ch.trigger = None;
        }
    }

    /// Fade out over `time` seconds and cut once silent.
    pub fn fade(&self, channel: usize, time: f32) {
        self.set_fade(channel, 0.0, time, true);
    }

    /// Ramp to `new_volume` over `time` seconds without cutting.
    pub fn adjust_volume(&self, channel: usize, new_volume: f32, time: f32) {
        if time <= 0.0 {
            if let Some(ch) = self.channels.lock().unwrap().get_mut(channel) {
                ch.volume = volume_to_fixed(new_volume);
                ch.fade_rate = 0;
            }
        } else {
            self.set_fade(channel, new_volume, time, false);
        }
    }

    fn set_fade(&self, channel: usize, target_volume: f32, time: f32, cut: bool) {
        let mut channels = self.channels.lock().unwrap();
        let Some(ch) = channels.get_mut(channel) else { return };
        if !ch.playing {
            return;
        }
        let target = volume_to_fixed(target_volume);
        let samples = (time * self.output_freq as f32).max(1.0) as i64;
        ch.fade_rate = (target - ch.volume) / samples;
        ch.fade_target = target;
        ch.fade_cut = cut;
    }

    pub fn is_playing(&self, channel: usize) -> bool {
        self.channels.lock().unwrap().get(channel).map(|c| c.playing).unwrap_or(false)
    }

    /// Approximate playback position in seconds; `None` once the
    /// channel has nothing live (matches the original's -1 sentinel).
    pub fn position(&self, _channel: usize) -> Option<f32> {
        None
    }

    /// Advance every active channel by up to `count` frames (capped at
    /// `SOUND_BUFLEN`) and mix into `out`, an interleaved S16LE stereo
    /// buffer of length `count*2`. Mirrors `sound_generate`'s `SOUNDGEN_C`
    /// path: fade advance, decode pull, shift-scaled mix.
    pub fn mix_tick(&self, out: &mut [i16], count: usize) {
        let count = count.min(SOUND_BUFLEN);
        out[..count * 2].fill(0);

        let mut channels = self.channels.lock().unwrap();
        for ch in channels.iter_mut() {
            if !ch.playing {
                continue;
            }

            if ch.fade_rate != 0 {
                let samples_left = (ch.fade_target - ch.volume) / ch.fade_rate;
                if samples_left <= count as i64 {
                    ch.volume = ch.fade_target;
                    ch.fade_rate = 0;
                } else {
                    ch.volume += ch.fade_rate * count as i64;
                }
            }

            if ch.volume == 0 && ch.fade_cut {
                ch.playing = false;
                fire(ch);
                continue;
            }

            let frame_len = if ch.stereo { count * 2 } else { count };
            ch.scratch.resize(frame_len, 0);
            let produced = match ch.decoder.as_mut() {
                Some(d) => d.get_pcm(&mut ch.scratch).unwrap_or(0),
                None => 0,
            };
            if produced == 0 {
                ch.playing = false;
                fire(ch);
                continue;
            }

            mix_channel(ch, out, produced.min(count));
        }
    }
}

fn fire(ch: &mut Channel) {
    if let Some(trigger) = ch.trigger.as_mut() {
        trigger();
    }
}

fn volume_to_fixed(volume: f32) -> i64 {
    (volume.max(0.0) as f64 * VOLUME_MULT as f64).round() as i64
}

fn pan_to_fixed(pan: f32) -> i64 {
    let clamped = pan.clamp(-1.0, 1.0);
    (((clamped + 1.0) / 2.0) as f64 * PAN_MULT as f64).round() as i64
}

/// `ampshift == 16 - AMPSHIFT` in the original's fixed-point scaling.
const fn ampshift() -> i32 {
    16 - AMPSHIFT
}

fn mix_channel(ch: &Channel, out: &mut [i16], count: usize) {
    let volume = ch.volume >> 16;
    let pan_l = PAN_MULT - ch.pan;
    let pan_r = ch.pan;
    let shift = ampshift();

    for i in 0..count {
        if ch.stereo {
            let l = (ch.scratch[i * 2] as i64 * volume) >> (shift - 7);
            let r = (ch.scratch[i * 2 + 1] as i64 * volume) >> (shift - 7);
            out[i * 2] = out[i * 2].saturating_add(l as i16);
            out[i * 2 + 1] = out[i * 2 + 1].saturating_add(r as i16);
        } else {
            let sample = ch.scratch[i] as i64 * volume;
            let l = (sample * pan_l) >> shift;
            let r = (sample * pan_r) >> shift;
            out[i * 2] = out[i * 2].saturating_add(l as i16);
            out[i * 2 + 1] = out[i * 2 + 1].saturating_add(r as i16);
        }
    }
}

/// cpal device output, driving `Mixer::mix_tick` on the audio thread.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
            .filter_map(|d| d.name().ok())
            .collect();
        Ok(devices)
    }

    pub fn new(device_name: Option<String>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
                .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
                .ok_or_else(|| Error::NotFound(format!("audio device '{name}'")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| Error::NotFound("default audio output device".into()))?,
        };
        info!("using audio device: {}", device.name().unwrap_or_default());
        let (config, sample_format) = Self::best_config(&device)?;
        Ok(AudioOutput { device, config, sample_format, stream: None })
    }

    fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut configs = device
            .supported_output_configs()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        if let Some(supported) = configs.find(|c| {
            c.channels() == 2
                && c.min_sample_rate().0 <= 44100
                && c.max_sample_rate().0 >= 44100
                && c.sample_format() == SampleFormat::I16
        }) {
            return Ok((
                supported.with_sample_rate(cpal::SampleRate(44100)).config(),
                SampleFormat::I16,
            ));
        }
        let default = device
            .default_output_config()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok((default.config(), default.sample_format()))
    }

    pub fn start(&mut self, mixer: Arc<Mixer>) -> Result<()> {
        let channels = self.config.channels as usize;
        let stream = match self.sample_format {
            SampleFormat::I16 => self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [i16], _| {
                        let frames = data.len() / channels;
                        let mut scratch = vec![0i16; frames * 2];
                        mixer.mix_tick(&mut scratch, frames);
                        for (frame, src) in data.chunks_mut(channels).zip(scratch.chunks(2)) {
                            frame[0] = src[0];
                            if channels > 1 {
                                frame[1] = src[1];
                            }
                        }
                    },
                    move |err| warn!("audio stream error: {err}"),
                    None,
                )
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?,
            other => {
                return Err(Error::BadFormat(format!("unsupported sample format: {other:?}")));
            }
        };
        stream
            .play()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        self.stream = Some(stream);
        debug!("audio stream started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packrt_common::Result as CommonResult;

    struct Tone {
        value: i16,
        remaining: usize,
        stereo: bool,
    }
    impl Decoder for Tone {
        fn info(&self) -> super::super::types::DecoderInfo {
            super::super::types::DecoderInfo { native_freq: 44100, stereo: self.stereo }
        }
        fn reset(&mut self) -> CommonResult<()> {
            Ok(())
        }
        fn get_pcm(&mut self, buf: &mut [i16]) -> CommonResult<usize> {
            let frames = buf.len() / if self.stereo { 2 } else { 1 };
            let produced = frames.min(self.remaining);
            for f in 0..produced {
                if self.stereo {
                    buf[f * 2] = self.value;
                    buf[f * 2 + 1] = self.value;
                } else {
                    buf[f] = self.value;
                }
            }
            self.remaining -= produced;
            Ok(produced)
        }
    }

    #[test]
    fn mix_tick_produces_nonzero_output_for_playing_channel() {
        let mixer = Mixer::new(44100);
        let decoder = Box::new(Tone { value: 1000, remaining: 100, stereo: true });
        let idx = mixer.play_buffer(None, decoder, 1.0, 0.0, None).unwrap();
        assert!(mixer.is_playing(idx));

        let mut out = vec![0i16; SOUND_BUFLEN * 2];
        mixer.mix_tick(&mut out, 10);
        assert!(out[..20].iter().any(|&s| s != 0));
    }

    #[test]
    fn channel_stops_and_fires_trigger_on_decoder_eof() {
        let mixer = Mixer::new(44100);
        let fired = Arc::new(Mutex::new(false));
        let fired2 = Arc::clone(&fired);
        let decoder = Box::new(Tone { value: 500, remaining: 5, stereo: false });
        let idx = mixer
            .play_buffer(None, decoder, 1.0, 0.0, Some(Box::new(move || *fired2.lock().unwrap() = true)))
            .unwrap();

        let mut out = vec![0i16; SOUND_BUFLEN * 2];
        mixer.mix_tick(&mut out, 5);
        assert!(mixer.is_playing(idx));
        mixer.mix_tick(&mut out, 5);
        assert!(!mixer.is_playing(idx));
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn fade_to_zero_with_cut_stops_channel() {
        let mixer = Mixer::new(44100);
        let decoder = Box::new(Tone { value: 1000, remaining: 100_000, stereo: true });
        let idx = mixer.play_buffer(None, decoder, 1.0, 0.0, None).unwrap();
        mixer.fade(idx, 0.001);

        let mut out = vec![0i16; SOUND_BUFLEN * 2];
        for _ in 0..50 {
            mixer.mix_tick(&mut out, SOUND_BUFLEN);
            if !mixer.is_playing(idx) {
                break;
            }
        }
        assert!(!mixer.is_playing(idx));
    }
}
