use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Arg, Command};
use common::{MediaKind, PipelineEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use media_pipeline::codec::{
    synthetic_frames, MockCodecProbe, MockDecoderFactory, MockEncoderFactory,
};
use media_pipeline::transport::LoopbackTransport;
use media_pipeline::{
    CaptureClock, MediaSession, PipelineConfig, SessionCodecs, SessionOutputs, SessionStats,
};

/// 回环传输通道容量
const LOOPBACK_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 解析命令行参数
    let matches = Command::new("Media Pipeline Simulator")
        .version("1.0")
        .author("Video Streaming Team")
        .about("Runs synthetic audio/video through the encode and decode pipelines over a loopback transport")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Pipeline configuration file (created with defaults if missing)")
                .required(false),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .help("Length of the synthetic capture")
                .value_parser(clap::value_parser!(u64))
                .default_value("10"),
        )
        .arg(
            Arg::new("reorder")
                .short('r')
                .long("reorder")
                .value_name("PROBABILITY")
                .help("Probability of swapping adjacent objects in transit (0.0-1.0)")
                .value_parser(clap::value_parser!(f64))
                .default_value("0.0"),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => PipelineConfig::load(PathBuf::from(path))
            .await
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => PipelineConfig::default(),
    };

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let duration = Duration::from_secs(matches.get_one::<u64>("duration").copied().unwrap_or(10));
    let reorder = matches.get_one::<f64>("reorder").copied().unwrap_or(0.0);

    info!(
        "Starting simulation: {}s, reorder probability {:.2}",
        duration.as_secs(),
        reorder
    );

    let (transport, inbound) = LoopbackTransport::new(LOOPBACK_BUFFER, reorder);
    let codecs = SessionCodecs {
        video_encoder: MockEncoderFactory::new(MediaKind::Video, MockCodecProbe::new()),
        audio_encoder: MockEncoderFactory::new(MediaKind::Audio, MockCodecProbe::new()),
        video_decoder: MockDecoderFactory::new(MockCodecProbe::new()),
        audio_decoder: MockDecoderFactory::new(MockCodecProbe::new()),
    };

    let (session, outputs) =
        MediaSession::start(&config, codecs, transport, inbound, CaptureClock::new()).await?;
    info!("Session {} ready", session.id());
    let SessionOutputs {
        video: mut video_frames,
        audio: mut audio_frames,
        events: mut event_rx,
    } = outputs;

    // 监测消息
    let events = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match &event {
                PipelineEvent::Bitrate { media, kbps } => info!("{} bitrate: {:.1} kbps", media, kbps),
                PipelineEvent::ConfigError { .. } => match serde_json::to_string(&event) {
                    Ok(json) => warn!("Configuration error: {}", json),
                    Err(e) => warn!("Configuration error (unserializable: {})", e),
                },
            }
        }
    });

    // 渲染端：只统计
    let video_render = tokio::spawn(async move {
        let mut rendered = 0u64;
        while video_frames.recv().await.is_some() {
            rendered += 1;
        }
        rendered
    });
    let audio_render = tokio::spawn(async move {
        let mut rendered = 0u64;
        while audio_frames.recv().await.is_some() {
            rendered += 1;
        }
        rendered
    });

    // 原生时间戳故意不从0开始
    let video_bytes = (config.video.bitrate / 8) as f64 / config.video.framerate;
    let audio_bytes = (config.audio.bitrate / 8) as f64 / config.audio.framerate;
    session
        .attach_video(synthetic_frames(
            5_000_000,
            config.video.framerate,
            video_bytes as usize,
            duration,
        ))
        .await?;
    session
        .attach_audio(synthetic_frames(
            5_000_000,
            config.audio.framerate,
            audio_bytes as usize,
            duration,
        ))
        .await?;

    let stats = tokio::select! {
        stats = session.finish() => stats?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stream statistics are partial");
            return Ok(());
        }
    };

    let video_rendered = video_render.await.unwrap_or_default();
    let audio_rendered = audio_render.await.unwrap_or_default();
    events.abort();

    print_summary(&stats);
    info!("Render sinks received {} video and {} audio frames", video_rendered, audio_rendered);
    Ok(())
}

fn print_summary(stats: &SessionStats) {
    for (media, encode, decode) in [
        (MediaKind::Video, &stats.video_encode, &stats.video_decode),
        (MediaKind::Audio, &stats.audio_encode, &stats.audio_decode),
    ] {
        info!(
            "{} encode: submitted {}, backpressure drops {}, sent {}, groups {}, markers {}, send failures {}",
            media,
            encode.frames_submitted,
            encode.frames_dropped_backpressure,
            encode.chunks_sent,
            encode.groups_started,
            encode.end_of_group_markers,
            encode.send_failures
        );
        if let Some(latency) = encode.last_capture_latency_us {
            info!("{} capture-to-encode latency: {} us", media, latency);
        }
        info!(
            "{} decode: received {}, played {}, decoded {}, rendered {}, keyframe waits {}, late {}, overflow {}",
            media,
            decode.objects_received,
            decode.entries_played,
            decode.chunks_decoded,
            decode.frames_rendered,
            decode.keyframe_wait_discards,
            decode.late_drops,
            decode.overflow_drops
        );
        if decode.stream_restarts > 0 {
            info!(
                "{} stream restarts: {}, stale objects dropped: {}",
                media, decode.stream_restarts, decode.stale_epoch_drops
            );
        }
    }
    info!(
        "Router: {} objects routed, {} unknown track",
        stats.routed_objects, stats.unknown_track_objects
    );
}
