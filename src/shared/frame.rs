// This is free and unencumbered software released into the public domain.

use bytes::Bytes;
use derive_more::Display;

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq)]
pub enum PixelFormat {
    /// `kCVPixelFormatType_32BGRA`
    #[default]
    #[display("BGRA")]
    Bgra8,
    // Yuv420,
    // ...
}

impl PixelFormat {
    /// The CoreVideo four-character code for this format.
    pub const fn four_cc(self) -> u32 {
        match self {
            PixelFormat::Bgra8 => 0x4247_5241, // 'BGRA'
        }
    }

    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// Rational media time, `value / timescale` seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// The duration of one frame at `fps` frames per second.
    pub fn from_fps(fps: u32) -> Self {
        Self::new(1, fps.max(1) as i32)
    }

    pub fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    pub fn as_secs_f64(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }
}

impl core::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub pixel_format: PixelFormat,
    pub timestamp: MediaTime,
}

impl VideoFrame {
    pub fn new_bgra(
        data: impl Into<Bytes>,
        width: usize,
        height: usize,
        stride: usize,
        timestamp: MediaTime,
    ) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            stride,
            pixel_format: PixelFormat::Bgra8,
            timestamp,
        }
    }
}

/// Per-pixel depth (or disparity) samples as native-endian `f32`.
#[derive(Clone, Debug)]
pub struct DepthFrame {
    pub data: Bytes,
    pub width: usize,
    pub height: usize,
    pub timestamp: MediaTime,
    pub filtered: bool,
}

impl DepthFrame {
    pub fn from_samples(
        samples: &[f32],
        width: usize,
        height: usize,
        timestamp: MediaTime,
    ) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            data.extend_from_slice(&s.to_ne_bytes());
        }
        Self {
            data: data.into(),
            width,
            height,
            timestamp,
            filtered: false,
        }
    }

    pub fn sample(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y * self.width + x) * 4;
        let bytes = self.data.get(at..at + 4)?;
        Some(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_from_fps() {
        let d = MediaTime::from_fps(30);
        assert_eq!(d, MediaTime::new(1, 30));
        assert!((d.as_secs_f64() - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(MediaTime::from_fps(0), MediaTime::new(1, 1));
    }

    #[test]
    fn invalid_time_is_zero_seconds() {
        assert_eq!(MediaTime::new(5, 0).as_secs_f64(), 0.0);
    }

    #[test]
    fn depth_samples_are_addressable() {
        let depth = DepthFrame::from_samples(&[0.5, 1.0, 1.5, 2.0], 2, 2, MediaTime::ZERO);
        assert_eq!(depth.sample(1, 1), Some(2.0));
        assert_eq!(depth.sample(0, 1), Some(1.5));
        assert_eq!(depth.sample(2, 0), None);
    }

    #[test]
    fn bgra_four_cc() {
        assert_eq!(PixelFormat::Bgra8.four_cc(), 1111970369);
    }
}
