//! Core audio types shared by every decoder backend and the mixer
//!.

/// One stereo sample pair, the unit the mixer accumulates into.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioFrame {
    pub left: f32,
    pub right: f32,
}

impl AudioFrame {
    pub fn zero() -> Self {
        AudioFrame { left: 0.0, right: 0.0 }
    }

    pub fn from_mono(sample: f32) -> Self {
        AudioFrame { left: sample, right: sample }
    }

    pub fn from_stereo(left: f32, right: f32) -> Self {
        AudioFrame { left, right }
    }

    pub fn apply_volume(&mut self, volume: f32) {
        self.left *= volume;
        self.right *= volume;
    }

    pub fn add(&mut self, other: &AudioFrame) {
        self.left += other.left;
        self.right += other.right;
    }

    pub fn clamp(&mut self) {
        self.left = self.left.clamp(-1.0, 1.0);
        self.right = self.right.clamp(-1.0, 1.0);
    }
}

/// Loop behavior at end-of-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// `loop_len == 0`: no loop, pad with silence at EOF.
    None,
    /// `loop_len < 0`: on EOF, seek back to `loop_start` and continue.
    LoopAtEnd { loop_start: u64 },
    /// `loop_len > 0`: strictly enforce `[loop_start, loop_start+loop_len)`.
    Region { loop_start: u64, loop_len: u64 },
}

impl LoopMode {
    pub fn from_loop_params(loop_start: u64, loop_len: i64) -> Self {
        if loop_len == 0 {
            LoopMode::None
        } else if loop_len < 0 {
            LoopMode::LoopAtEnd { loop_start }
        } else {
            LoopMode::Region {
                loop_start,
                loop_len: loop_len as u64,
            }
        }
    }
}

/// What `open` on a backend fills in, mirroring the decoder callback
/// contract every backend implements.
#[derive(Debug, Clone, Copy)]
pub struct DecoderInfo {
    pub native_freq: u32,
    pub stereo: bool,
}

/// The pull interface every backend (WAV/Ogg/MP3) implements. `close`
/// is just `Drop` in this idiom — there's no separate teardown call.
pub trait Decoder: Send {
    fn info(&self) -> DecoderInfo;
    fn reset(&mut self) -> packrt_common::Result<()>;
    /// Produce up to `buf.len() / channels` frames of interleaved PCM,
    /// returning the number of frames actually produced. `0` means EOF
    /// (caller applies the loop contract).
    fn get_pcm(&mut self, buf: &mut [i16]) -> packrt_common::Result<usize>;
}
