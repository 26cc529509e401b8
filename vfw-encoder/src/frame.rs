use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::config::StreamParams;

/// Frame rate as a rational, e.g. `30000/1001`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Duration of a single frame. Zero for a degenerate rate.
    pub fn period(&self) -> Duration {
        if self.num == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.den as f64 / self.num as f64)
    }
}

impl Display for FrameRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Bgra,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorRange {
    Full,
    Partial,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Bt601,
    Bt709,
}

/// Input format the pipeline asks the host to deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub format: PixelFormat,
    pub range: ColorRange,
    pub colorspace: ColorSpace,
}

/// One frame handed in by the real-time caller.
///
/// `data` holds interleaved 32-bit BGRA rows, `linesize` bytes apart.
#[derive(Clone, Copy, Debug)]
pub struct InputFrame<'a> {
    pub data: &'a [u8],
    pub linesize: usize,
    pub pts: i64,
    pub force_keyframe: bool,
}

impl<'a> InputFrame<'a> {
    pub fn new(data: &'a [u8], linesize: usize, pts: i64) -> Self {
        Self {
            data,
            linesize,
            pts,
            force_keyframe: false,
        }
    }

    pub fn with_keyframe(mut self, force: bool) -> Self {
        self.force_keyframe = force;
        self
    }
}

/// The unit that travels through every stage queue.
///
/// `payload` holds pixels up to the compress stage and encoded bytes after it.
#[derive(Debug)]
pub struct FrameItem {
    pub payload: BytesMut,
    pub timestamp: i64,
    pub keyframe_hint: bool,
    pub keyframe: bool,
}

impl FrameItem {
    pub fn new(payload: BytesMut, timestamp: i64, keyframe_hint: bool) -> Self {
        Self {
            payload,
            timestamp,
            keyframe_hint,
            keyframe: false,
        }
    }

    /// Copies `linesize * height` bytes out of the caller's frame.
    /// Returns `None` when a row is narrower than `width` BGRA pixels or the
    /// frame is shorter than that.
    pub fn copy_from_input(frame: &InputFrame<'_>, params: &StreamParams) -> Option<Self> {
        if frame.linesize < params.row_bytes() {
            return None;
        }
        let size = frame.linesize.checked_mul(params.height as usize)?;
        let pixels = frame.data.get(..size)?;
        Some(Self::new(
            BytesMut::from(pixels),
            frame.pts,
            frame.force_keyframe,
        ))
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl Display for FrameItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "FrameItem {{ pts: {}, size: {}, keyframe: {} }}",
            self.timestamp,
            self.payload.len(),
            self.keyframe
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_period() {
        assert_eq!(FrameRate::new(25, 1).period(), Duration::from_millis(40));
        assert_eq!(FrameRate::new(0, 1).period(), Duration::ZERO);
        assert!((FrameRate::new(30000, 1001).as_f64() - 29.97).abs() < 0.001);
    }

    #[test]
    fn test_copy_from_input() {
        let data = vec![7u8; 4 * 2 * 3 + 5];
        let frame = InputFrame::new(&data, 8, 42).with_keyframe(true);
        let params = StreamParams::new(2, 3, FrameRate::new(30, 1));
        let item = FrameItem::copy_from_input(&frame, &params).unwrap();
        assert_eq!(item.len(), 24);
        assert_eq!(item.timestamp, 42);
        assert!(item.keyframe_hint);
        assert!(!item.keyframe);
    }

    #[test]
    fn test_copy_from_short_input() {
        let data = vec![0u8; 10];
        let frame = InputFrame::new(&data, 8, 0);
        let params = StreamParams::new(2, 2, FrameRate::new(30, 1));
        assert!(FrameItem::copy_from_input(&frame, &params).is_none());
    }

    #[test]
    fn test_copy_rejects_narrow_rows() {
        let data = vec![0u8; 64];
        let params = StreamParams::new(2, 2, FrameRate::new(30, 1));
        assert!(FrameItem::copy_from_input(&InputFrame::new(&data, 0, 0), &params).is_none());
        assert!(FrameItem::copy_from_input(&InputFrame::new(&data, 7, 0), &params).is_none());
        // padded rows are fine
        let padded = FrameItem::copy_from_input(&InputFrame::new(&data, 16, 0), &params).unwrap();
        assert_eq!(padded.len(), 32);
    }
}
