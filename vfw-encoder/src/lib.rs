//! Three-stage asynchronous encoding pipeline for VFW-style compressors.
//!
//! ```text
//! submit ─► [pre-process] ─► [compress] ─► [post-process] ─► final ─► retrieve
//!             flip rows       codec call     bitstream fixups
//! ```
//!
//! The caller drives [`pipeline::Pipeline::submit_and_retrieve`] once per
//! real-time tick; the call never waits longer than one frame period.

pub mod bsf;
pub mod codec;
pub mod config;
pub mod encoder;
pub mod frame;
pub mod packet;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod queue;
pub mod stats;

pub use codec::{CodecDriver, CodecError, CodecInfo, Compressor};
pub use config::{EncoderSettings, PipelineConfig, StreamParams};
pub use frame::{FrameRate, InputFrame};
pub use packet::EncodedPacket;
pub use pipeline::Pipeline;
