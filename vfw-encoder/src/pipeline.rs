//! The controller: owns the stage queues and workers, and implements the
//! deadline-bounded submit/retrieve call.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::codec::{CodecDriver, CodecInfo, Compressor};
use crate::config::{EncoderSettings, PipelineConfig, StreamParams};
use crate::encoder::CompressWorker;
use crate::frame::{ColorRange, ColorSpace, FrameItem, InputFrame, PixelFormat, VideoInfo};
use crate::packet::EncodedPacket;
use crate::postprocess::{FixupRegistry, PostProcessWorker};
use crate::preprocess::PreProcessWorker;
use crate::queue::{QueueDepths, StageQueues, admit};
use crate::stats::{PipelineStats, StatsSnapshot};

/// How long the controller sleeps between admission and retrieval attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Log dropped frames at most every N drops.
const DROP_LOG_INTERVAL: u64 = 120;

pub struct Pipeline {
    codec: CodecInfo,
    params: StreamParams,
    config: PipelineConfig,
    queues: Arc<StageQueues>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Opens a compressor from `driver` and starts the stage workers, with
    /// the built-in bitstream fixups.
    pub fn new(
        driver: &dyn CodecDriver,
        params: StreamParams,
        settings: &EncoderSettings,
    ) -> anyhow::Result<Self> {
        Self::with_fixups(driver, params, settings, &FixupRegistry::new())
    }

    pub fn with_fixups(
        driver: &dyn CodecDriver,
        params: StreamParams,
        settings: &EncoderSettings,
        fixups: &FixupRegistry,
    ) -> anyhow::Result<Self> {
        let codec = driver.info().clone();
        if params.width == 0 || params.height == 0 {
            anyhow::bail!(
                "<{}> invalid resolution {}x{}",
                codec.name,
                params.width,
                params.height
            );
        }
        if params.fps.num == 0 || params.fps.den == 0 {
            anyhow::bail!("<{}> invalid frame rate {}", codec.name, params.fps);
        }

        let config = settings.resolve(&params, &codec);
        log::info!(
            "<{}> initializing (id: {}, codec: {}, resolution: {}x{}, fps: {}, mode: {:?}, latency: {}, keyframe interval: {})",
            codec.name,
            codec.id,
            codec.codec_name(),
            params.width,
            params.height,
            params.fps,
            config.mode,
            config.latency,
            config.keyframe_interval
        );

        let compressor = open_compressor(driver, &params, &config)?;
        Self::start(codec, params, config, compressor, fixups)
    }

    fn start(
        codec: CodecInfo,
        params: StreamParams,
        config: PipelineConfig,
        compressor: Box<dyn Compressor>,
        fixups: &FixupRegistry,
    ) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();
        let queues = Arc::new(StageQueues::new(config.max_queue_size, cancel.clone()));
        let stats = Arc::new(PipelineStats::default());

        // Dropping a half-started pipeline joins whatever did start.
        let mut pipeline = Self {
            codec,
            params,
            config,
            queues,
            stats,
            cancel,
            workers: Vec::with_capacity(3),
        };

        let pre = PreProcessWorker::new(pipeline.queues.clone(), params.height);
        pipeline.spawn_worker("vfw-preprocess", move || pre.run())?;

        let compress = CompressWorker::new(
            pipeline.queues.clone(),
            pipeline.stats.clone(),
            compressor,
            config,
            pipeline.codec.name.clone(),
        );
        pipeline.spawn_worker("vfw-compress", move || compress.run())?;

        let post = PostProcessWorker::new(
            pipeline.queues.clone(),
            fixups.lookup(&pipeline.codec.id),
            params.fps,
        );
        pipeline.spawn_worker("vfw-postprocess", move || post.run())?;

        log::info!("<{}> pipeline started", pipeline.codec.name);
        Ok(pipeline)
    }

    fn spawn_worker<F>(&mut self, name: &str, f: F) -> anyhow::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .with_context(|| format!("<{}> spawning {} worker", self.codec.name, name))?;
        self.workers.push(handle);
        Ok(())
    }

    /// Hands one frame to the pipeline and returns at most one finished
    /// packet. Never blocks longer than one frame period.
    ///
    /// A frame that cannot be admitted before the deadline is dropped.
    pub fn submit_and_retrieve(&self, frame: &InputFrame<'_>) -> Option<EncodedPacket> {
        let deadline = Instant::now() + self.params.fps.period();
        self.stats.record_submitted();

        let mut pending = FrameItem::copy_from_input(frame, &self.params);
        if pending.is_none() {
            let drops = self.stats.record_admission_drop();
            log::error!(
                "<{}> frame {} does not fit {}x{} ({} bytes, linesize {}), dropped ({} total)",
                self.codec.name,
                frame.pts,
                self.params.width,
                self.params.height,
                frame.data.len(),
                frame.linesize,
                drops
            );
        }

        let mut packet = None;
        loop {
            if let Some(item) = pending.take() {
                pending = admit(&self.queues.admission_chain(), item).err();
            }
            if packet.is_none() {
                packet = self
                    .queues
                    .output
                    .pop_if_deeper_than(self.config.latency as usize)
                    .map(EncodedPacket::from);
            }

            let now = Instant::now();
            if (pending.is_none() && packet.is_some()) || now >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }

        if let Some(item) = pending {
            let drops = self.stats.record_admission_drop();
            if drops % DROP_LOG_INTERVAL == 1 {
                log::debug!(
                    "<{}> pipeline full, dropped frame {} ({} dropped so far, depths: {:?})",
                    self.codec.name,
                    item.timestamp,
                    drops,
                    self.queues.depths()
                );
            }
        }

        if let Some(packet) = &packet {
            self.stats.record_delivered();
            log::trace!(
                "<{}> delivered packet pts {} ({} bytes, keyframe: {})",
                self.codec.name,
                packet.pts,
                packet.size(),
                packet.keyframe
            );
        }
        packet
    }

    /// Format the host must deliver frames in.
    pub fn video_info(&self) -> VideoInfo {
        VideoInfo {
            format: PixelFormat::Bgra,
            range: ColorRange::Full,
            colorspace: ColorSpace::Bt709,
        }
    }

    /// Codec extra data for muxers. VFW codecs carry none.
    pub fn extra_data(&self) -> Option<Bytes> {
        None
    }

    pub fn codec(&self) -> &CodecInfo {
        &self.codec
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue_depths(&self) -> QueueDepths {
        self.queues.depths()
    }

    /// Signals shutdown and joins the workers. Queued frames are discarded.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.cancel.cancel();
        self.queues.wake_all();
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("<{}> {} panicked", self.codec.name, name);
            }
        }
        log::info!(
            "<{}> pipeline stopped ({})",
            self.codec.name,
            self.stats.snapshot()
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens in the configured compress mode, retrying once in the other mode.
fn open_compressor(
    driver: &dyn CodecDriver,
    params: &StreamParams,
    config: &PipelineConfig,
) -> anyhow::Result<Box<dyn Compressor>> {
    let name = &driver.info().name;
    let mode = config.compress_mode;
    match driver.open(params, config) {
        Ok(compressor) => {
            log::info!("<{}> compressor opened ({:?}, {:?})", name, mode, config.mode);
            Ok(compressor)
        }
        Err(e) => {
            let fallback = PipelineConfig {
                compress_mode: mode.fallback(),
                ..*config
            };
            log::warn!(
                "<{}> opening in {:?} mode failed: {}, retrying in {:?} mode",
                name,
                mode,
                e,
                fallback.compress_mode
            );
            let compressor = driver
                .open(params, &fallback)
                .with_context(|| format!("<{}> failed to open compressor", name))?;
            log::info!(
                "<{}> compressor opened ({:?}, {:?}, fallback)",
                name,
                fallback.compress_mode,
                config.mode
            );
            Ok(compressor)
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
