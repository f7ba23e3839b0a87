use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::error::RenderError;

/// How channel samples are arranged inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleLayout {
    /// `[L0, R0, L1, R1, ...]`
    #[default]
    Interleaved,
    /// `[L0, L1, ..., R0, R1, ...]`, one contiguous run per channel.
    Planar,
}

impl SampleLayout {
    #[inline]
    fn index(self, frame: usize, channel: usize, frames: usize, channels: usize) -> usize {
        match self {
            Self::Interleaved => frame * channels + channel,
            Self::Planar => channel * frames + frame,
        }
    }
}

/// Render action flag word passed through every real-time callback.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderActionFlags(u32);

impl RenderActionFlags {
    pub const NONE: Self = Self(0);
    pub const PRE_RENDER: Self = Self(1 << 2);
    pub const POST_RENDER: Self = Self(1 << 3);
    /// The buffer carries silence; its contents are zeroed.
    pub const OUTPUT_IS_SILENCE: Self = Self(1 << 4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RenderActionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RenderActionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for RenderActionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_set();
        if self.contains(Self::PRE_RENDER) {
            list.entry(&"PRE_RENDER");
        }
        if self.contains(Self::POST_RENDER) {
            list.entry(&"POST_RENDER");
        }
        if self.contains(Self::OUTPUT_IS_SILENCE) {
            list.entry(&"OUTPUT_IS_SILENCE");
        }
        list.finish()
    }
}

/// Per-callback timestamp.
///
/// `sample_time` counts frames on the stream's own clock; `host_time_ns` is
/// the host clock at which the slice hits (or left) the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioTimestamp {
    pub sample_time: f64,
    pub host_time_ns: u64,
}

impl AudioTimestamp {
    pub fn new(sample_time: f64, host_time_ns: u64) -> Self {
        Self {
            sample_time,
            host_time_ns,
        }
    }

    /// This timestamp shifted forward by `nanos` on the host clock.
    pub fn offset_host_time(&self, nanos: u64) -> Self {
        Self {
            sample_time: self.sample_time,
            host_time_ns: self.host_time_ns.saturating_add(nanos),
        }
    }
}

/// Read-only view of 16-bit PCM for the duration of one callback.
#[derive(Debug, Clone, Copy)]
pub struct AudioBuffer<'a> {
    data: &'a [i16],
    frames: usize,
    channels: usize,
    layout: SampleLayout,
}

impl<'a> AudioBuffer<'a> {
    /// Wrap `data` holding `frames` frames of `channels` channels.
    pub fn new(
        data: &'a [i16],
        frames: usize,
        channels: u16,
        layout: SampleLayout,
    ) -> Result<Self, RenderError> {
        let channels = channels.max(1) as usize;
        check_len(data.len(), frames, channels)?;
        Ok(Self {
            data: &data[..frames * channels],
            frames,
            channels,
            layout,
        })
    }

    /// Interleaved view spanning all of `data`.
    pub fn interleaved(data: &'a [i16], channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let frames = data.len() / channels;
        Self {
            data: &data[..frames * channels],
            frames,
            channels,
            layout: SampleLayout::Interleaved,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn channel_count(&self) -> u16 {
        self.channels as u16
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn samples(&self) -> &'a [i16] {
        self.data
    }

    pub fn sample(&self, frame: usize, channel: usize) -> i16 {
        self.data[self.layout.index(frame, channel, self.frames, self.channels)]
    }

    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|&s| s == 0)
    }
}

/// Writable view of 16-bit PCM for the duration of one callback.
#[derive(Debug)]
pub struct AudioBufferMut<'a> {
    data: &'a mut [i16],
    frames: usize,
    channels: usize,
    layout: SampleLayout,
}

impl<'a> AudioBufferMut<'a> {
    pub fn new(
        data: &'a mut [i16],
        frames: usize,
        channels: u16,
        layout: SampleLayout,
    ) -> Result<Self, RenderError> {
        let channels = channels.max(1) as usize;
        check_len(data.len(), frames, channels)?;
        Ok(Self {
            data: &mut data[..frames * channels],
            frames,
            channels,
            layout,
        })
    }

    pub fn interleaved(data: &'a mut [i16], channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let frames = data.len() / channels;
        Self {
            data: &mut data[..frames * channels],
            frames,
            channels,
            layout: SampleLayout::Interleaved,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn channel_count(&self) -> u16 {
        self.channels as u16
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn samples(&self) -> &[i16] {
        &*self.data
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut *self.data
    }

    pub fn set_sample(&mut self, frame: usize, channel: usize, value: i16) {
        let idx = self.layout.index(frame, channel, self.frames, self.channels);
        self.data[idx] = value;
    }

    pub fn fill_silence(&mut self) {
        self.data.fill(0);
    }

    pub fn as_view(&self) -> AudioBuffer<'_> {
        AudioBuffer {
            data: &*self.data,
            frames: self.frames,
            channels: self.channels,
            layout: self.layout,
        }
    }

    /// Copy frames from `src`, remapping layout and channel count.
    ///
    /// Extra destination channels repeat the last source channel; frames past
    /// the end of `src` are zeroed so nothing stale survives.
    pub fn copy_from(&mut self, src: &AudioBuffer<'_>) {
        if self.layout == src.layout
            && self.channels == src.channels
            && self.frames == src.frames
        {
            self.data.copy_from_slice(src.data);
            return;
        }

        let frames = self.frames.min(src.frames);
        let src_channels = src.channels;
        for frame in 0..frames {
            for ch in 0..self.channels {
                let value = src.sample(frame, ch.min(src_channels - 1));
                self.set_sample(frame, ch, value);
            }
        }
        for frame in frames..self.frames {
            for ch in 0..self.channels {
                self.set_sample(frame, ch, 0);
            }
        }
    }
}

fn check_len(len: usize, frames: usize, channels: usize) -> Result<(), RenderError> {
    let required = frames * channels;
    if len < required {
        return Err(RenderError::BufferTooSmall {
            required,
            available: len,
        });
    }
    Ok(())
}
