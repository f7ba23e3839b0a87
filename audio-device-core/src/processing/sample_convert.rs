//! Allocation-free sample format and channel conversions.
//!
//! Hardware commonly hands out `f32` while the bridge exchanges 16-bit PCM;
//! these helpers convert in place into caller-owned scratch so they can run
//! inside an I/O callback.

/// Convert `[-1.0, 1.0]` floats to 16-bit PCM. Out-of-range values are clamped.
///
/// Converts `min(src.len(), dst.len())` samples and returns that count.
pub fn f32_to_i16(src: &[f32], dst: &mut [i16]) -> usize {
    let n = src.len().min(dst.len());
    for (out, &sample) in dst[..n].iter_mut().zip(&src[..n]) {
        *out = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
    }
    n
}

/// Convert 16-bit PCM to `[-1.0, 1.0]` floats.
pub fn i16_to_f32(src: &[i16], dst: &mut [f32]) -> usize {
    let n = src.len().min(dst.len());
    for (out, &sample) in dst[..n].iter_mut().zip(&src[..n]) {
        *out = sample as f32 / i16::MAX as f32;
    }
    n
}

/// Remap interleaved frames between channel counts.
///
/// Downmixing averages all source channels; upmixing copies the source
/// channels and repeats the last one. Returns the number of frames written.
pub fn remap_channels(src: &[i16], src_channels: usize, dst: &mut [i16], dst_channels: usize) -> usize {
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    let frames = (src.len() / src_channels).min(dst.len() / dst_channels);

    if src_channels == dst_channels {
        let n = frames * src_channels;
        dst[..n].copy_from_slice(&src[..n]);
        return frames;
    }

    for frame in 0..frames {
        let input = &src[frame * src_channels..(frame + 1) * src_channels];
        let output = &mut dst[frame * dst_channels..(frame + 1) * dst_channels];
        if dst_channels == 1 {
            let sum: i32 = input.iter().map(|&s| s as i32).sum();
            output[0] = (sum / src_channels as i32) as i16;
        } else {
            for (ch, out) in output.iter_mut().enumerate() {
                *out = input[ch.min(src_channels - 1)];
            }
        }
    }
    frames
}

/// RMS level of 16-bit PCM, normalized to `0.0..=1.0`.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt().min(1.0) as f32
}
