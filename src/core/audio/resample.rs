//! Block-synchronous sample-rate conversion for capture blocks.
//!
//! Each capture block is resampled as a complete batch (no streaming filter
//! state carried between blocks) using linear interpolation. The output length
//! is fixed by the block duration: `ceil(len / input_rate * output_rate)`
//! samples, so downstream framing stays deterministic regardless of device
//! rate.

/// Number of output samples produced for a block of `input_len` samples.
pub fn output_len(input_len: usize, input_rate: u32, output_rate: u32) -> usize {
    (input_len as u64 * output_rate as u64).div_ceil(input_rate as u64) as usize
}

/// Resample one block of mono samples from `input_rate` to `output_rate`.
///
/// Produces exactly [`output_len`] samples. An empty block yields an empty
/// output; identical rates copy the block through untouched.
pub fn resample_block(samples: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    if input_rate == output_rate {
        return samples.to_vec();
    }

    let out_len = output_len(samples.len(), input_rate, output_rate);
    let step = input_rate as f64 / output_rate as f64;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let position = i as f64 * step;
        let index = position as usize;
        if index + 1 < samples.len() {
            let frac = (position - index as f64) as f32;
            out.push(samples[index] * (1.0 - frac) + samples[index + 1] * frac);
        } else {
            // Past the last interpolation pair; hold the final sample.
            out.push(samples[samples.len() - 1]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_is_ceil_of_duration_scaled() {
        // 512 samples at 44.1 kHz → ceil(512 / 44100 * 16000) = 186
        assert_eq!(output_len(512, 44_100, 16_000), 186);
        // 512 at 48 kHz → ceil(512 / 3) = 171
        assert_eq!(output_len(512, 48_000, 16_000), 171);
        // Exact ratio
        assert_eq!(output_len(480, 48_000, 16_000), 160);
    }

    #[test]
    fn resampled_block_has_exact_length() {
        let block = vec![0.25_f32; 512];
        assert_eq!(resample_block(&block, 44_100, 16_000).len(), 186);
        assert_eq!(resample_block(&block, 48_000, 16_000).len(), 171);
    }

    #[test]
    fn identical_rates_pass_through() {
        let block = vec![0.1, -0.2, 0.3];
        assert_eq!(resample_block(&block, 16_000, 16_000), block);
    }

    #[test]
    fn constant_signal_stays_constant() {
        let block = vec![0.5_f32; 1024];
        for sample in resample_block(&block, 48_000, 16_000) {
            assert!((sample - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_block_yields_empty_output() {
        assert!(resample_block(&[], 48_000, 16_000).is_empty());
    }

    #[test]
    fn downsample_interpolates_between_neighbors() {
        // A ramp should stay a ramp after linear interpolation.
        let block: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let out = resample_block(&block, 48_000, 16_000);
        assert_eq!(out.len(), 160);
        for pair in out.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }
}
