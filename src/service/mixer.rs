//! Float mixing of client FIFOs into one device burst

use crate::error::{AAudioError, Result};
use crate::fifo::FifoBuffer;
use crate::stream::AudioFormat;
use byteorder::{ByteOrder, LittleEndian};

const BYTES_PER_F32: usize = 4;

/// Accumulates one burst of interleaved float samples
pub struct AudioMixer {
    samples_per_frame: usize,
    frames_per_burst: usize,
    mix: Vec<f32>,
    scratch: Vec<u8>,
}

impl AudioMixer {
    pub fn new(samples_per_frame: i32, frames_per_burst: i32) -> Self {
        let samples_per_frame = samples_per_frame.max(1) as usize;
        let frames_per_burst = frames_per_burst.max(1) as usize;
        let samples = samples_per_frame * frames_per_burst;
        Self {
            samples_per_frame,
            frames_per_burst,
            mix: vec![0.0; samples],
            scratch: vec![0u8; samples * BYTES_PER_F32],
        }
    }

    pub fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst as u32
    }

    pub fn samples_per_frame(&self) -> u32 {
        self.samples_per_frame as u32
    }

    /// Silence the accumulator
    pub fn clear(&mut self) {
        self.mix.fill(0.0);
    }

    /// Add one burst from `fifo`, padding any shortfall with silence.
    /// Returns the frames that came from real data.
    pub fn mix(&mut self, fifo: &FifoBuffer) -> u32 {
        let frames = fifo.read_now(&mut self.scratch);
        for (acc, bytes) in self
            .mix
            .iter_mut()
            .zip(self.scratch.chunks_exact(BYTES_PER_F32))
        {
            *acc += LittleEndian::read_f32(bytes);
        }
        frames
    }

    pub fn mixed(&self) -> &[f32] {
        &self.mix
    }

    /// Encode the accumulated burst in the device format
    pub fn render(&self, format: AudioFormat, out: &mut [u8]) -> Result<usize> {
        encode_samples(&self.mix, format, out)
    }
}

/// Bytes needed for `frames` frames of `channels` samples in `format`
pub fn burst_bytes(format: AudioFormat, channels: i32, frames: i32) -> Result<usize> {
    Ok(format.bytes_per_sample()? as usize * channels.max(0) as usize * frames.max(0) as usize)
}

/// Write `samples` into `out` as `format`, clamping to full scale
pub fn encode_samples(samples: &[f32], format: AudioFormat, out: &mut [u8]) -> Result<usize> {
    let width = format.bytes_per_sample()? as usize;
    let bytes = samples.len() * width;
    if out.len() < bytes {
        return Err(AAudioError::out_of_range("output buffer", out.len() as i64));
    }
    match format {
        AudioFormat::PCM_I16 => {
            for (sample, dst) in samples.iter().zip(out.chunks_exact_mut(2)) {
                let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                LittleEndian::write_i16(dst, value);
            }
        }
        _ => {
            for (sample, dst) in samples.iter().zip(out.chunks_exact_mut(4)) {
                LittleEndian::write_f32(dst, sample.clamp(-1.0, 1.0));
            }
        }
    }
    Ok(bytes)
}

/// Decode `input` in `format` into float samples
pub fn decode_samples(input: &[u8], format: AudioFormat, out: &mut [f32]) -> Result<usize> {
    let width = format.bytes_per_sample()? as usize;
    let count = (input.len() / width).min(out.len());
    match format {
        AudioFormat::PCM_I16 => {
            for (src, dst) in input.chunks_exact(2).zip(out.iter_mut()).take(count) {
                *dst = LittleEndian::read_i16(src) as f32 / 32768.0;
            }
        }
        _ => {
            for (src, dst) in input.chunks_exact(4).zip(out.iter_mut()).take(count) {
                *dst = LittleEndian::read_f32(src);
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fifo_with(value: f32, frames: usize) -> FifoBuffer {
        let fifo = FifoBuffer::new(8, 64).unwrap();
        let mut bytes = vec![0u8; frames * 8];
        for chunk in bytes.chunks_exact_mut(4) {
            LittleEndian::write_f32(chunk, value);
        }
        fifo.write(&bytes);
        fifo
    }

    #[test]
    fn test_mix_sums_clients() {
        let mut mixer = AudioMixer::new(2, 4);
        let a = fifo_with(0.25, 4);
        let b = fifo_with(0.5, 4);
        assert_eq!(mixer.mix(&a), 4);
        assert_eq!(mixer.mix(&b), 4);
        assert!(mixer.mixed().iter().all(|s| (*s - 0.75).abs() < 1e-6));
    }

    #[test]
    fn test_mix_pads_underrun_with_silence() {
        let mut mixer = AudioMixer::new(2, 4);
        let short = fifo_with(0.5, 1);
        assert_eq!(mixer.mix(&short), 1);
        assert_eq!(mixer.mixed()[0], 0.5);
        assert_eq!(mixer.mixed()[2], 0.0);
        assert_eq!(short.underrun_count(), 1);
        assert_eq!(short.frames_underrun(), 3);
    }

    #[test]
    fn test_render_clamps_i16() {
        let mut out = [0u8; 4];
        encode_samples(&[2.0, -2.0], AudioFormat::PCM_I16, &mut out).unwrap();
        assert_eq!(LittleEndian::read_i16(&out[0..2]), 32767);
        assert_eq!(LittleEndian::read_i16(&out[2..4]), -32767);
    }

    #[test]
    fn test_encode_rejects_small_buffer() {
        let mut out = [0u8; 4];
        assert!(encode_samples(&[0.0, 0.0], AudioFormat::PCM_FLOAT, &mut out).is_err());
        assert!(encode_samples(&[0.0], AudioFormat::UNSPECIFIED, &mut out).is_err());
    }

    #[test]
    fn test_decode_i16() {
        let mut input = [0u8; 4];
        LittleEndian::write_i16(&mut input[0..2], 16384);
        LittleEndian::write_i16(&mut input[2..4], -32768);
        let mut out = [0.0f32; 2];
        assert_eq!(decode_samples(&input, AudioFormat::PCM_I16, &mut out), Ok(2));
        assert_eq!(out, [0.5, -1.0]);
    }
}
