//! Seam to the external compressor.
//!
//! The pipeline only needs a synchronous `compress` call; everything about
//! driver enumeration and configuration dialogs lives on the host side.

use serde::{Deserialize, Serialize};

use crate::config::{PipelineConfig, StreamParams};

/// Errors reported by a compressor. Mirrors the VFW `ICERR_*` codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Unsupported")]
    Unsupported,
    #[error("Bad Format")]
    BadFormat,
    #[error("Memory")]
    Memory,
    #[error("Internal")]
    Internal,
    #[error("Bad Flags")]
    BadFlags,
    #[error("Bad Parameter")]
    BadParameter,
    #[error("Bad Size")]
    BadSize,
    #[error("Bad Handle")]
    BadHandle,
    #[error("Can't Update")]
    CantUpdate,
    #[error("Abort")]
    Abort,
    #[error("Generic Error")]
    Error,
    #[error("Bad Bit Depth")]
    BadBitDepth,
    #[error("Bad Image Size")]
    BadImageSize,
    #[error("Custom Error ({0})")]
    Custom(i64),
    #[error("{0}")]
    Failed(String),
}

impl CodecError {
    /// Maps a raw `ICERR_*` return value. `None` for `ICERR_OK`.
    pub fn from_code(code: i64) -> Option<Self> {
        let err = match code {
            0 => return None,
            -1 => Self::Unsupported,
            -2 => Self::BadFormat,
            -3 => Self::Memory,
            -4 => Self::Internal,
            -5 => Self::BadFlags,
            -6 => Self::BadParameter,
            -7 => Self::BadSize,
            -8 => Self::BadHandle,
            -9 => Self::CantUpdate,
            -10 => Self::Abort,
            -100 => Self::Error,
            -200 => Self::BadBitDepth,
            -201 => Self::BadImageSize,
            other => Self::Custom(other),
        };
        Some(err)
    }
}

/// What a driver can do, as advertised in its `VIDCF_*` flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Accepts the previous frame for temporal prediction.
    pub temporal: bool,
    /// Honours the quality knob.
    pub quality: bool,
    /// Honours a target data rate.
    pub crunch: bool,
}

/// Static identity of a compressor driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    /// Stable id, `<driver name>-<fourcc>`, e.g. `mvcVfwMpeg2-mmes`.
    pub id: String,
    pub name: String,
    pub fourcc: String,
    pub capabilities: Capabilities,
}

/// Drivers whose FourCC does not match the codec name downstream muxers know.
const CODEC_CORRECTIONS: &[(&str, &str)] = &[
    // Cinepak
    ("cvid", "cinepak"),
    // Intel IYUV
    ("iyuv", "h263i"),
    ("i420", "h263p"),
    // Microsoft
    ("mrle", "msrle"),
    ("msvc", "msvideo1"),
    // x264vfw
    ("x264", "h264"),
    // Matrox
    ("mjpg", "mjpeg"),
    ("m103", "ayuv"),
    ("m104", "ayuv"),
    ("m702", "mpeg2video"),
    ("m703", "mpeg2video"),
    ("mmes", "mpeg2video"),
    ("m704", "mpeg2video"),
    ("m701", "mpeg2video"),
    ("m705", "mpeg2video"),
    ("dvh1", "dvvideo"),
    ("dvsd", "dvvideo"),
    ("dv25", "dvvideo"),
    ("dv50", "dvvideo"),
];

impl CodecInfo {
    pub fn new(name: impl Into<String>, fourcc: impl Into<String>) -> Self {
        let name = name.into();
        let fourcc = fourcc.into();
        Self {
            id: format!("{}-{}", name, fourcc),
            name,
            fourcc,
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Codec name as understood by downstream consumers.
    pub fn codec_name(&self) -> &str {
        CODEC_CORRECTIONS
            .iter()
            .find(|(fourcc, _)| *fourcc == self.fourcc)
            .map(|(_, name)| *name)
            .unwrap_or(self.fourcc.as_str())
    }
}

/// One synchronous compress call.
#[derive(Debug)]
pub struct CompressRequest<'a> {
    pub pixels: &'a [u8],
    pub timestamp: i64,
    /// Ask the codec for a keyframe.
    pub keyframe: bool,
    /// Previous input frame, only in temporal mode and never for keyframes.
    pub previous: Option<&'a [u8]>,
    /// Zero when the codec does not support a target data rate, and always
    /// zero in sequential mode.
    pub bitrate: u32,
    /// Zero when unsupported or in sequential mode, 0..=10000 otherwise.
    pub quality: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedFrame {
    pub data: Vec<u8>,
    /// The codec's own keyframe flag.
    pub keyframe: bool,
}

/// An opened compressor. Owned by the compress worker; may block.
pub trait Compressor: Send {
    fn compress(&mut self, request: &CompressRequest<'_>) -> Result<CompressedFrame, CodecError>;
}

/// Opens compressors for one driver.
pub trait CodecDriver {
    fn info(&self) -> &CodecInfo;

    /// Opens a compressor in `config.compress_mode`.
    ///
    /// In [`EncodeMode::Sequential`](crate::config::EncodeMode::Sequential)
    /// the driver owns rate control: keyframe interval, bitrate and quality
    /// are taken from `config` here and are not repeated per frame.
    fn open(
        &self,
        params: &StreamParams,
        config: &PipelineConfig,
    ) -> Result<Box<dyn Compressor>, CodecError>;
}

pub mod raw {
    //! Uncompressed reference driver: the output is the input.

    use super::*;

    pub struct RawDriver {
        info: CodecInfo,
    }

    impl RawDriver {
        pub fn new() -> Self {
            Self {
                info: CodecInfo::new("rawVfw", "DIB "),
            }
        }
    }

    impl Default for RawDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    impl CodecDriver for RawDriver {
        fn info(&self) -> &CodecInfo {
            &self.info
        }

        fn open(
            &self,
            params: &StreamParams,
            _config: &PipelineConfig,
        ) -> Result<Box<dyn Compressor>, CodecError> {
            if params.width == 0 || params.height == 0 {
                return Err(CodecError::BadImageSize);
            }
            Ok(Box::new(RawCompressor))
        }
    }

    pub struct RawCompressor;

    impl Compressor for RawCompressor {
        fn compress(
            &mut self,
            request: &CompressRequest<'_>,
        ) -> Result<CompressedFrame, CodecError> {
            Ok(CompressedFrame {
                data: request.pixels.to_vec(),
                keyframe: true,
            })
        }
    }
}
