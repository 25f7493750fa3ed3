//! Fixed-point resampler: no external resampling library. The exact
//! algorithm (`pos_frac`/`resample_pos` plus optional linear
//! interpolation) is a plain fixed-point accumulator rather than
//! anything a sinc-based library like `rubato` exposes, so that
//! dependency is dropped; see DESIGN.md.

#[derive(Debug, Clone, Copy)]
struct LastSample {
    left: i16,
    right: i16,
}

/// Converts a stream nominally at `native_freq` into one at `output_freq`,
/// one native frame consumed per call to `feed`, any number of output
/// frames produced per call to `pull` depending on accumulated phase.
pub struct Resampler {
    native_freq: u32,
    output_freq: u32,
    stereo: bool,
    pos_frac: u64,
    last: LastSample,
    current: LastSample,
    interpolate: bool,
}

impl Resampler {
    pub fn new(native_freq: u32, output_freq: u32, stereo: bool, interpolate: bool) -> Self {
        Resampler {
            native_freq,
            output_freq,
            stereo,
            pos_frac: 0,
            last: LastSample { left: 0, right: 0 },
            current: LastSample { left: 0, right: 0 },
            interpolate,
        }
    }

    pub fn passthrough(&self) -> bool {
        self.native_freq == self.output_freq
    }

    fn feed(&mut self, left: i16, right: i16) {
        self.last = self.current;
        self.current = LastSample { left, right };
    }

    fn interpolated(&self, t: f32) -> (i16, i16) {
        if !self.interpolate {
            return (self.current.left, self.current.right);
        }
        let l = self.last.left as f32 + (self.current.left as f32 - self.last.left as f32) * t;
        let r = self.last.right as f32 + (self.current.right as f32 - self.last.right as f32) * t;
        (l as i16, r as i16)
    }

    /// Resample `native` interleaved PCM (stereo or mono per `self.stereo`)
    /// into `out`, appending. Returns the number of output frames written.
    pub fn process(&mut self, native: &[i16], out: &mut Vec<i16>) -> usize {
        if self.passthrough() {
            out.extend_from_slice(native);
            return native.len() / if self.stereo { 2 } else { 1 };
        }

        let channels = if self.stereo { 2 } else { 1 };
        let mut produced = 0;
        for frame in native.chunks(channels) {
            let (l, r) = if channels == 2 { (frame[0], frame[1]) } else { (frame[0], frame[0]) };
            self.feed(l, r);

            self.pos_frac += self.native_freq as u64;
            while self.pos_frac >= self.output_freq as u64 {
                self.pos_frac -= self.output_freq as u64;
                let t = 1.0 - (self.pos_frac as f32 / self.output_freq as f32);
                let (ol, or_) = self.interpolated(t);
                out.push(ol);
                if self.stereo {
                    out.push(or_);
                }
                produced += 1;
            }
        }
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_rates_match() {
        let mut r = Resampler::new(44100, 44100, true, false);
        let native = vec![1i16, 2, 3, 4];
        let mut out = Vec::new();
        let produced = r.process(&native, &mut out);
        assert_eq!(produced, 2);
        assert_eq!(out, native);
    }

    #[test]
    fn downsampling_halves_frame_count_roughly() {
        let mut r = Resampler::new(44100, 22050, true, false);
        let native: Vec<i16> = (0..200).collect();
        let mut out = Vec::new();
        let produced = r.process(&native, &mut out);
        let native_frames = native.len() / 2;
        assert!(produced < native_frames);
        assert!(produced >= native_frames / 2 - 2);
    }

    #[test]
    fn upsampling_increases_frame_count() {
        let mut r = Resampler::new(22050, 44100, true, false);
        let native: Vec<i16> = (0..100).collect();
        let mut out = Vec::new();
        let produced = r.process(&native, &mut out);
        let native_frames = native.len() / 2;
        assert!(produced > native_frames);
    }

    #[test]
    fn interpolation_blends_between_samples() {
        let mut r = Resampler::new(1, 2, false, true);
        let mut out = Vec::new();
        r.process(&[0], &mut out);
        r.process(&[100], &mut out);
        assert!(!out.is_empty());
    }
}
