use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;

use crate::codec::{CompressRequest, Compressor};
use crate::config::{EncodeMode, PipelineConfig};
use crate::frame::FrameItem;
use crate::queue::StageQueues;
use crate::stats::PipelineStats;

/// Whether the pipeline asks the codec for a keyframe at `timestamp`.
///
/// Only the interval rule applies here; the caller's hint is folded in by
/// [`resolve_keyframe`] and never changes what the codec is asked for.
pub fn wants_keyframe(timestamp: i64, interval: u32) -> bool {
    interval > 0 && timestamp.rem_euclid(interval as i64) == 0
}

/// The keyframe flag the packet leaves the compress stage with.
///
/// `requested` is the interval decision or the caller's hint.
pub fn resolve_keyframe(force_keyframes: bool, requested: bool, from_codec: bool) -> bool {
    if force_keyframes {
        requested || from_codec
    } else {
        from_codec
    }
}

/// Owns the compressor and runs the compress stage.
pub struct CompressWorker {
    queues: Arc<StageQueues>,
    stats: Arc<PipelineStats>,
    compressor: Box<dyn Compressor>,
    config: PipelineConfig,
    codec_name: String,
    // last successfully compressed input, temporal mode only
    previous: Option<BytesMut>,
}

impl CompressWorker {
    pub fn new(
        queues: Arc<StageQueues>,
        stats: Arc<PipelineStats>,
        compressor: Box<dyn Compressor>,
        config: PipelineConfig,
        codec_name: impl Into<String>,
    ) -> Self {
        Self {
            queues,
            stats,
            compressor,
            config,
            codec_name: codec_name.into(),
            previous: None,
        }
    }

    pub fn run(mut self) {
        log::debug!("<{}> compress worker started", self.codec_name);
        while let Some(item) = self.queues.compress.pop_blocking() {
            match self.encode(item) {
                Some(out) => {
                    if !self.queues.compress.forward(&self.queues.post, out) {
                        break;
                    }
                }
                None => self.queues.compress.finish(),
            }
        }
        log::debug!("<{}> compress worker stopped", self.codec_name);
    }

    /// Compresses one frame. `None` drops it.
    fn encode(&mut self, item: FrameItem) -> Option<FrameItem> {
        let started = Instant::now();
        let make_keyframe = wants_keyframe(item.timestamp, self.config.keyframe_interval);
        let previous = if self.config.temporal && !make_keyframe {
            self.previous.as_deref()
        } else {
            None
        };
        // sequential drivers got their rate control at open
        let (bitrate, quality) = match self.config.mode {
            EncodeMode::Sequential => (0, 0),
            EncodeMode::Normal | EncodeMode::Temporal => (self.config.bitrate, self.config.quality),
        };
        let request = CompressRequest {
            pixels: &item.payload,
            timestamp: item.timestamp,
            keyframe: make_keyframe,
            previous,
            bitrate,
            quality,
        };

        let frame = match self.compressor.compress(&request) {
            Ok(frame) => frame,
            Err(e) => {
                let failures = self.stats.record_codec_failure();
                log::error!(
                    "<{}> compressing frame {} failed: {} ({} failures)",
                    self.codec_name,
                    item.timestamp,
                    e,
                    failures
                );
                return None;
            }
        };

        let mut out = FrameItem::new(
            BytesMut::from(frame.data.as_slice()),
            item.timestamp,
            item.keyframe_hint,
        );
        out.keyframe = resolve_keyframe(
            self.config.force_keyframes,
            make_keyframe || item.keyframe_hint,
            frame.keyframe,
        );
        log::trace!(
            "<{}> compress {} took {:?}",
            self.codec_name,
            out,
            started.elapsed()
        );

        if self.config.temporal {
            self.previous = Some(item.payload);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::codec::{CodecError, CompressedFrame};

    #[test]
    fn test_wants_keyframe() {
        assert!(wants_keyframe(0, 30));
        assert!(wants_keyframe(60, 30));
        assert!(!wants_keyframe(31, 30));
        // disabled interval
        assert!(!wants_keyframe(0, 0));
        assert!(wants_keyframe(-30, 30));
    }

    #[test]
    fn test_resolve_keyframe() {
        assert!(resolve_keyframe(true, true, false));
        assert!(resolve_keyframe(true, false, true));
        assert!(!resolve_keyframe(true, false, false));
        assert!(!resolve_keyframe(false, true, false));
        assert!(resolve_keyframe(false, false, true));
    }

    /// One compress call as the codec saw it.
    #[derive(Debug, PartialEq)]
    struct Seen {
        timestamp: i64,
        keyframe: bool,
        previous: Option<Vec<u8>>,
        rates: (u32, u32),
    }

    fn seen(timestamp: i64, keyframe: bool, previous: Option<Vec<u8>>) -> Seen {
        Seen {
            timestamp,
            keyframe,
            previous,
            rates: (0, 0),
        }
    }

    type Calls = Arc<std::sync::Mutex<Vec<Seen>>>;

    struct Recorder {
        calls: Calls,
        fail_at: Option<i64>,
    }

    impl Compressor for Recorder {
        fn compress(
            &mut self,
            request: &CompressRequest<'_>,
        ) -> Result<CompressedFrame, CodecError> {
            self.calls.lock().unwrap().push(Seen {
                timestamp: request.timestamp,
                keyframe: request.keyframe,
                previous: request.previous.map(|p| p.to_vec()),
                rates: (request.bitrate, request.quality),
            });
            if self.fail_at == Some(request.timestamp) {
                return Err(CodecError::Internal);
            }
            Ok(CompressedFrame {
                data: vec![request.timestamp as u8],
                keyframe: false,
            })
        }
    }

    fn compress_worker(
        config: PipelineConfig,
        fail_at: Option<i64>,
    ) -> (CompressWorker, Calls, Arc<PipelineStats>) {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let stats = Arc::new(PipelineStats::default());
        let queues = Arc::new(StageQueues::new(8, CancellationToken::new()));
        let worker = CompressWorker::new(
            queues,
            stats.clone(),
            Box::new(Recorder {
                calls: calls.clone(),
                fail_at,
            }),
            config,
            "test",
        );
        (worker, calls, stats)
    }

    fn frame(ts: i64) -> FrameItem {
        FrameItem::new(BytesMut::from(&[ts as u8, 0xAA][..]), ts, false)
    }

    fn hinted(ts: i64) -> FrameItem {
        FrameItem::new(BytesMut::from(&[ts as u8, 0xAA][..]), ts, true)
    }

    #[test]
    fn test_temporal_previous_frame() {
        let config = PipelineConfig {
            temporal: true,
            keyframe_interval: 3,
            ..Default::default()
        };
        let (mut worker, calls, _) = compress_worker(config, None);
        for ts in 0..4 {
            let out = worker.encode(frame(ts)).unwrap();
            assert_eq!(out.keyframe, ts % 3 == 0);
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], seen(0, true, None));
        assert_eq!(calls[1], seen(1, false, Some(vec![0, 0xAA])));
        assert_eq!(calls[2], seen(2, false, Some(vec![1, 0xAA])));
        // keyframes never get a reference
        assert_eq!(calls[3], seen(3, true, None));
    }

    #[test]
    fn test_failed_frame_keeps_previous() {
        let config = PipelineConfig {
            temporal: true,
            keyframe_interval: 0,
            ..Default::default()
        };
        let (mut worker, calls, stats) = compress_worker(config, Some(1));
        assert!(worker.encode(frame(0)).is_some());
        assert!(worker.encode(frame(1)).is_none());
        assert!(worker.encode(frame(2)).is_some());

        assert_eq!(stats.snapshot().codec_failures, 1);
        let calls = calls.lock().unwrap();
        assert_eq!(calls[2].previous, Some(vec![0, 0xAA]));
    }

    #[test]
    fn test_no_previous_outside_temporal_mode() {
        let config = PipelineConfig {
            temporal: false,
            keyframe_interval: 0,
            force_keyframes: false,
            ..Default::default()
        };
        let (mut worker, calls, _) = compress_worker(config, None);
        for ts in 0..3 {
            let out = worker.encode(frame(ts)).unwrap();
            assert!(!out.keyframe);
            assert_eq!(&out.payload[..], &[ts as u8]);
        }
        assert!(calls.lock().unwrap().iter().all(|c| c.previous.is_none()));
    }

    #[test]
    fn test_hint_only_affects_forced_flag() {
        let config = PipelineConfig {
            temporal: true,
            keyframe_interval: 0,
            force_keyframes: false,
            mode: EncodeMode::Temporal,
            ..Default::default()
        };
        let (mut worker, calls, _) = compress_worker(config, None);
        assert!(!worker.encode(frame(0)).unwrap().keyframe);
        // not forced: the hint is ignored and the reference survives
        assert!(!worker.encode(hinted(1)).unwrap().keyframe);
        {
            let calls = calls.lock().unwrap();
            assert_eq!(calls[1], seen(1, false, Some(vec![0, 0xAA])));
        }

        let forced = PipelineConfig {
            force_keyframes: true,
            ..config
        };
        let (mut worker, calls, _) = compress_worker(forced, None);
        assert!(!worker.encode(frame(0)).unwrap().keyframe);
        assert!(worker.encode(hinted(1)).unwrap().keyframe);
        // the codec is still asked for a delta frame
        assert_eq!(calls.lock().unwrap()[1], seen(1, false, Some(vec![0, 0xAA])));
    }

    #[test]
    fn test_rate_control_per_mode() {
        let base = PipelineConfig {
            keyframe_interval: 0,
            bitrate: 4_000_000,
            quality: 7_500,
            ..Default::default()
        };
        let (mut worker, calls, _) = compress_worker(
            PipelineConfig {
                mode: EncodeMode::Normal,
                ..base
            },
            None,
        );
        worker.encode(frame(0)).unwrap();
        assert_eq!(calls.lock().unwrap()[0].rates, (4_000_000, 7_500));

        // sequential drivers were configured at open
        let (mut worker, calls, _) = compress_worker(
            PipelineConfig {
                mode: EncodeMode::Sequential,
                ..base
            },
            None,
        );
        worker.encode(frame(0)).unwrap();
        assert_eq!(calls.lock().unwrap()[0].rates, (0, 0));
    }
}
