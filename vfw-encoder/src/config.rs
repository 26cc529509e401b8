use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::codec::CodecInfo;
use crate::frame::FrameRate;

/// Upper bound of the latency knob, in frames.
pub const MAX_LATENCY: u32 = 10;

/// Static parameters of the stream being encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub width: u32,
    pub height: u32,
    pub fps: FrameRate,
}

impl StreamParams {
    pub fn new(width: u32, height: u32, fps: FrameRate) -> Self {
        Self { width, height, fps }
    }

    /// Bytes per row of the BGRA input, without padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * 4
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalType {
    #[default]
    Seconds,
    Frames,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeMode {
    /// One compress call per frame, no reference frame.
    Normal,
    /// Like normal, but the previous input is passed for prediction.
    Temporal,
    /// The driver manages its own frame sequence.
    #[default]
    Sequential,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressMode {
    #[default]
    Fast,
    Normal,
}

impl CompressMode {
    /// The mode tried when this one fails to open.
    pub fn fallback(self) -> Self {
        match self {
            CompressMode::Fast => CompressMode::Normal,
            CompressMode::Normal => CompressMode::Fast,
        }
    }
}

/// User-facing encoder settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    // bps, 0 = codec default
    pub bitrate: u32,
    // 1.0 ..= 100.0
    pub quality: f64,
    pub interval_type: IntervalType,
    pub keyframe_interval_secs: f64,
    pub keyframe_interval_frames: u32,
    pub force_keyframes: bool,
    pub mode: EncodeMode,
    pub compress_mode: CompressMode,
    // frames, 0 ..= MAX_LATENCY
    pub latency: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate: 0,
            quality: 100.0,
            interval_type: IntervalType::Seconds,
            keyframe_interval_secs: 1.0,
            keyframe_interval_frames: 30,
            force_keyframes: true,
            mode: EncodeMode::Sequential,
            compress_mode: CompressMode::Fast,
            latency: 3,
        }
    }
}

impl EncoderSettings {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid encoder settings")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Keyframe interval in frames for the given rate.
    pub fn keyframe_interval(&self, fps: FrameRate) -> u32 {
        match self.interval_type {
            IntervalType::Seconds => {
                let frames = fps.as_f64() * self.keyframe_interval_secs;
                if frames.is_finite() && frames > 0.0 {
                    frames as u32
                } else {
                    0
                }
            }
            IntervalType::Frames => self.keyframe_interval_frames,
        }
    }

    /// Freezes the settings into the record the pipeline runs with.
    pub fn resolve(&self, params: &StreamParams, codec: &CodecInfo) -> PipelineConfig {
        let latency = self.latency.min(MAX_LATENCY);
        let caps = codec.capabilities;

        let temporal = match self.mode {
            EncodeMode::Temporal if caps.temporal => true,
            EncodeMode::Temporal => {
                log::warn!(
                    "<{}> temporal mode not supported by codec, using normal mode",
                    codec.name
                );
                false
            }
            _ => false,
        };

        PipelineConfig {
            latency,
            max_queue_size: (latency as usize + 1) * 2,
            keyframe_interval: self.keyframe_interval(params.fps),
            bitrate: if caps.crunch { self.bitrate } else { 0 },
            quality: if caps.quality {
                (self.quality.clamp(1.0, 100.0) * 100.0) as u32
            } else {
                0
            },
            force_keyframes: self.force_keyframes,
            temporal,
            mode: self.mode,
            compress_mode: self.compress_mode,
        }
    }
}

/// Immutable configuration record, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Packets held back in the final queue before delivery.
    pub latency: u32,
    /// `(latency + 1) * 2`
    pub max_queue_size: usize,
    /// Frames between forced keyframes; 0 disables.
    pub keyframe_interval: u32,
    pub bitrate: u32,
    pub quality: u32,
    pub force_keyframes: bool,
    pub temporal: bool,
    pub mode: EncodeMode,
    pub compress_mode: CompressMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            latency: 3,
            max_queue_size: 8,
            keyframe_interval: 30,
            bitrate: 0,
            quality: 0,
            force_keyframes: true,
            temporal: false,
            mode: EncodeMode::Sequential,
            compress_mode: CompressMode::Fast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Capabilities;

    fn params() -> StreamParams {
        StreamParams::new(640, 480, FrameRate::new(30, 1))
    }

    #[test]
    fn test_defaults() {
        let settings = EncoderSettings::default();
        assert_eq!(settings.latency, 3);
        assert!(settings.force_keyframes);
        assert_eq!(settings.mode, EncodeMode::Sequential);
        assert_eq!(settings.compress_mode, CompressMode::Fast);

        let config = settings.resolve(&params(), &CodecInfo::new("c", "abcd"));
        assert_eq!(config.max_queue_size, 8);
        assert_eq!(config.keyframe_interval, 30);
        assert_eq!(config.quality, 0);
        assert!(!config.temporal);
    }

    #[test]
    fn test_from_json_partial() -> anyhow::Result<()> {
        let settings = EncoderSettings::from_json(
            r#"{ "latency": 42, "interval_type": "frames", "keyframe_interval_frames": 12, "mode": "temporal" }"#,
        )?;
        assert_eq!(settings.keyframe_interval_frames, 12);
        assert_eq!(settings.quality, 100.0);

        let codec = CodecInfo::new("c", "abcd").with_capabilities(Capabilities {
            temporal: true,
            quality: true,
            crunch: false,
        });
        let config = settings.resolve(&params(), &codec);
        assert_eq!(config.latency, MAX_LATENCY);
        assert_eq!(config.max_queue_size, 22);
        assert_eq!(config.keyframe_interval, 12);
        assert_eq!(config.quality, 10_000);
        assert!(config.temporal);
        Ok(())
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(EncoderSettings::from_json("{ \"mode\": \"bogus\" }").is_err());
    }

    #[test]
    fn test_keyframe_interval_seconds() {
        let settings = EncoderSettings {
            keyframe_interval_secs: 2.0,
            ..Default::default()
        };
        assert_eq!(settings.keyframe_interval(FrameRate::new(30000, 1001)), 59);
        assert_eq!(settings.keyframe_interval(FrameRate::new(0, 1)), 0);
    }

    #[test]
    fn test_temporal_needs_capability() {
        let settings = EncoderSettings {
            mode: EncodeMode::Temporal,
            bitrate: 5000,
            ..Default::default()
        };
        let codec = CodecInfo::new("c", "abcd");
        let config = settings.resolve(&params(), &codec);
        assert!(!config.temporal);
        assert_eq!(config.bitrate, 0);
    }

    #[test]
    fn test_compress_mode_fallback() {
        assert_eq!(CompressMode::Fast.fallback(), CompressMode::Normal);
        assert_eq!(CompressMode::Normal.fallback(), CompressMode::Fast);
    }
}
