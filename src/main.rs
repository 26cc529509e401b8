use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use vfw_encoder::codec::raw::RawDriver;
use vfw_encoder::frame::InputFrame;
use vfw_encoder::{EncoderSettings, Pipeline, StreamParams};

mod config;
mod source;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("vfw_encoder", log::LevelFilter::Debug)
        .init();
}

/// `vfw-pipe [settings.json] [frame count]`
fn parse_args() -> anyhow::Result<(EncoderSettings, Option<u64>)> {
    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) if path != "-" => EncoderSettings::load(&path)?,
        _ => EncoderSettings::default(),
    };
    let frames = args
        .next()
        .map(|n| n.parse::<u64>().with_context(|| format!("invalid frame count: {}", n)))
        .transpose()?;
    Ok((settings, frames))
}

/// Drives the pipeline once per frame period until cancelled or `frames`
/// have been submitted.
fn run_encode_loop(
    settings: EncoderSettings,
    frames: Option<u64>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let cfg = config::config();
    let params = StreamParams::new(cfg.width(), cfg.height(), cfg.fps());
    let pipeline = Pipeline::new(&RawDriver::new(), params, &settings)?;
    log::info!(
        "encoding {}x{} @ {} with {} ({:?})",
        params.width,
        params.height,
        params.fps,
        pipeline.codec().codec_name(),
        pipeline.video_info()
    );

    let mut source = source::MovingBar::new(params.width, params.height);
    let period = params.fps.period();
    let mut next_tick = Instant::now();
    let mut last_stats = Instant::now();
    let mut bytes_out: u64 = 0;
    let mut pts: i64 = 0;

    while !cancel.is_cancelled() && frames.is_none_or(|n| (pts as u64) < n) {
        let linesize = source.linesize();
        let frame = InputFrame::new(source.render(pts), linesize, pts);
        if let Some(packet) = pipeline.submit_and_retrieve(&frame) {
            bytes_out += packet.size() as u64;
            log::debug!(
                "packet pts: {}, size: {}, keyframe: {}",
                packet.pts,
                packet.size(),
                packet.keyframe
            );
        }
        pts += 1;

        if last_stats.elapsed() >= STATS_INTERVAL {
            log::info!(
                "{}, {} bytes out, depths: {:?}",
                pipeline.stats(),
                bytes_out,
                pipeline.queue_depths()
            );
            last_stats = Instant::now();
        }

        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    log::info!("encode loop finished after {} frames: {}", pts, pipeline.stats());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let (settings, frames) = parse_args()?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let mut handle =
        tokio::task::spawn_blocking(move || run_encode_loop(settings, frames, cancel_clone));

    tokio::select! {
        res = &mut handle => {
            return res.context("encode loop panicked")?;
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("ctrl-c received, stopping");
            cancel.cancel();
        },
    }

    handle.await.context("encode loop panicked")?
}
