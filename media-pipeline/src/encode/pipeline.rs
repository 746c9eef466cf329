// 编码管线实现
//
// 状态机：Idle →（挂接流）→ Encoding →（流结束）→ Idle；
// 编码器出错时在 Encoding 内自动重建。
//
// 每个编码块：时间戳重定基到流起点、关联采集延迟、分配组/对象编号、
// 按需先发组头再发对象，跨组时为上一组补发组结束标记（组0除外）。

use super::capture::PendingCaptureTimestamps;
use super::cursor::{ClosedGroup, GroupCursor};
use crate::codec::{CodecState, Encoder, EncoderFactory, MediaFrame};
use crate::config::MediaConfig;
use crate::error::{PipelineError, Result};
use crate::events::EventSink;
use crate::timing::{BitrateMeter, CaptureClock};
use crate::transport::ObjectSender;
use bytes::Bytes;
use common::{
    pack_payload, CodecConfig, ConfigErrorReason, EncodedChunk, GroupHeader, MediaKind,
    ObjectStatus, OutboundObject, PipelineEvent,
};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 帧序列
pub type FrameStream<F> = BoxStream<'static, F>;

/// 编码管线参数
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub media: MediaKind,
    pub track_alias: u64,
    /// 每N帧请求一次关键帧
    pub keyframe_interval: u64,
    /// 编码器待处理队列超过该值时丢帧
    pub max_queue_size: usize,
}

impl EncodeSettings {
    pub fn from_config(media: MediaKind, config: &MediaConfig) -> Self {
        Self {
            media,
            track_alias: config.track_alias,
            keyframe_interval: config.keyframe_interval.max(1),
            max_queue_size: config.max_encode_queue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    Idle,
    Encoding,
}

/// 编码统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeStats {
    pub frames_submitted: u64,
    /// 背压丢帧
    pub frames_dropped_backpressure: u64,
    /// 无可用编码器丢帧
    pub frames_dropped_no_codec: u64,
    pub chunks_sent: u64,
    pub groups_started: u64,
    pub end_of_group_markers: u64,
    pub codec_resets: u64,
    pub send_failures: u64,
    /// 最近一次采集到编码完成的延迟（微秒）
    pub last_capture_latency_us: Option<i64>,
}

/// 编码工作任务的控制命令
pub enum EncodeCommand<F> {
    Configure(CodecConfig),
    /// 挂接新帧序列，放弃之前的序列
    Attach(FrameStream<F>),
}

pub struct EncodePipeline<F: EncoderFactory, S: ObjectSender> {
    settings: EncodeSettings,
    factory: F,
    sender: S,
    clock: CaptureClock,
    events: EventSink,
    config: Option<CodecConfig>,
    encoder: Option<F::Encoder>,
    /// 新建编码器的第一帧必须是关键帧
    force_keyframe: bool,
    output_tx: mpsc::UnboundedSender<EncodedChunk>,
    output_rx: Option<mpsc::UnboundedReceiver<EncodedChunk>>,
    cursor: GroupCursor,
    /// 推流代次，随对象发出，接收端据此识别重新推流
    epoch: u64,
    pending: PendingCaptureTimestamps,
    timestamp_origin: Option<i64>,
    frame_index: u64,
    bitrate: BitrateMeter,
    state: EncodeState,
    stats: EncodeStats,
}

impl<F: EncoderFactory, S: ObjectSender> EncodePipeline<F, S> {
    pub fn new(
        settings: EncodeSettings,
        factory: F,
        sender: S,
        clock: CaptureClock,
        events: EventSink,
    ) -> Self {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let media = settings.media;
        Self {
            settings,
            factory,
            sender,
            clock,
            events,
            config: None,
            encoder: None,
            force_keyframe: true,
            output_tx,
            output_rx: Some(output_rx),
            cursor: GroupCursor::new(),
            epoch: 0,
            pending: PendingCaptureTimestamps::new(),
            timestamp_origin: None,
            frame_index: 0,
            bitrate: BitrateMeter::new(media),
            state: EncodeState::Idle,
            stats: EncodeStats::default(),
        }
    }

    pub fn media(&self) -> MediaKind {
        self.settings.media
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    pub fn stats(&self) -> &EncodeStats {
        &self.stats
    }

    pub fn cursor(&self) -> &GroupCursor {
        &self.cursor
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn config(&self) -> Option<&CodecConfig> {
        self.config.as_ref()
    }

    /// 应用编码配置
    ///
    /// 不支持的配置上报 `unsupported` 并保留原配置；已有可用编码器时尝试原地重配置，
    /// 失败则上报 `reconfigure_failed`，并丢弃该编码器，下一帧按新配置重建。
    pub fn configure(&mut self, config: CodecConfig) -> Result<()> {
        let media = self.settings.media;

        if !self.factory.is_supported(&config) {
            warn!("Unsupported {} configuration: {}", media, config.codec);
            let codec = config.codec.clone();
            self.events.emit(PipelineEvent::ConfigError {
                media,
                reason: ConfigErrorReason::Unsupported,
                config,
            });
            return Err(PipelineError::ConfigurationUnsupported { media, codec });
        }

        let reconfigure_result = match self.encoder.as_mut() {
            Some(encoder) if encoder.state() != CodecState::Closed => {
                Some(encoder.configure(&config))
            }
            _ => None,
        };
        self.config = Some(config.clone());

        match reconfigure_result {
            Some(Err(source)) => {
                warn!("Reconfiguring {} encoder failed: {}", media, source);
                self.encoder = None;
                self.force_keyframe = true;
                self.events.emit(PipelineEvent::ConfigError {
                    media,
                    reason: ConfigErrorReason::ReconfigureFailed,
                    config,
                });
                Err(PipelineError::ReconfigureFailed { media, source })
            }
            Some(Ok(())) => {
                info!("{} encoder reconfigured: {}", media, config.codec);
                Ok(())
            }
            None => {
                info!("{} encoder configuration stored: {}", media, config.codec);
                Ok(())
            }
        }
    }

    /// 挂接帧序列并编码直到序列结束
    pub async fn attach_stream<St>(&mut self, mut frames: St)
    where
        St: Stream<Item = F::Frame> + Unpin,
    {
        let Some(mut outputs) = self.output_rx.take() else {
            warn!("{} encode pipeline is already running", self.settings.media);
            return;
        };

        self.begin_stream();
        loop {
            tokio::select! {
                biased;
                Some(chunk) = outputs.recv() => self.handle_output(chunk).await,
                frame = frames.next() => match frame {
                    Some(frame) => self.submit_frame(frame),
                    None => break,
                },
            }
        }
        self.finish_stream(&mut outputs).await;
        self.output_rx = Some(outputs);
    }

    /// 工作任务主循环
    ///
    /// 收到关闭信号时立即退出；命令通道关闭后编码完当前序列再退出。
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<EncodeCommand<F::Frame>>,
        shutdown: CancellationToken,
    ) -> EncodeStats {
        let media = self.settings.media;
        let Some(mut outputs) = self.output_rx.take() else {
            warn!("{} encode pipeline is already running", media);
            return self.stats;
        };
        let mut frames: Option<FrameStream<F::Frame>> = None;
        let mut commands_open = true;

        info!("{} encode pipeline started", media);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(EncodeCommand::Configure(config)) => {
                        if let Err(e) = self.configure(config) {
                            debug!("{} configure command rejected: {}", media, e);
                        }
                    }
                    Some(EncodeCommand::Attach(stream)) => {
                        if frames.take().is_some() {
                            info!("{} stream replaced, abandoning previous source", media);
                            self.finish_stream(&mut outputs).await;
                        }
                        self.begin_stream();
                        frames = Some(stream);
                    }
                    None => {
                        commands_open = false;
                        if frames.is_none() {
                            break;
                        }
                    }
                },
                Some(chunk) = outputs.recv() => self.handle_output(chunk).await,
                frame = next_frame(&mut frames) => match frame {
                    Some(frame) => self.submit_frame(frame),
                    None => {
                        frames = None;
                        self.finish_stream(&mut outputs).await;
                        if !commands_open {
                            break;
                        }
                    }
                },
            }
        }

        info!(
            "{} encode pipeline stopped (submitted: {}, dropped: {}, sent: {})",
            media,
            self.stats.frames_submitted,
            self.stats.frames_dropped_backpressure,
            self.stats.chunks_sent
        );
        self.stats
    }

    fn begin_stream(&mut self) {
        self.epoch += 1;
        self.timestamp_origin = None;
        self.pending.clear();
        self.cursor.reset();
        self.frame_index = 0;
        self.force_keyframe = true;
        self.bitrate.reset();
        self.state = EncodeState::Encoding;
        info!("{} stream attached (epoch {})", self.settings.media, self.epoch);
    }

    async fn finish_stream(&mut self, outputs: &mut mpsc::UnboundedReceiver<EncodedChunk>) {
        if let Some(encoder) = self.encoder.as_mut() {
            if let Err(e) = encoder.flush() {
                warn!("{} encoder flush failed: {}", self.settings.media, e);
            }
        }
        while let Ok(chunk) = outputs.try_recv() {
            self.handle_output(chunk).await;
        }
        if let Err(e) = self.sender.flush().await {
            self.stats.send_failures += 1;
            warn!("Failed to flush {} transport: {}", self.settings.media, e);
        }
        self.state = EncodeState::Idle;
        info!("{} stream ended", self.settings.media);
    }

    /// 确保有可用编码器，必要时（首次使用或已关闭）重建
    fn ensure_encoder(&mut self) -> bool {
        let media = self.settings.media;
        let needs_new = match &self.encoder {
            Some(encoder) => encoder.state() == CodecState::Closed,
            None => true,
        };

        if needs_new {
            if self.encoder.take().is_some() {
                self.stats.codec_resets += 1;
                info!("{} encoder closed, recreating", media);
            }

            let Some(config) = self.config.as_ref() else {
                warn!("{} encoder has no configuration, dropping frame", media);
                return false;
            };

            match self.factory.create(config, self.output_tx.clone()) {
                Ok(encoder) => {
                    info!("{} encoder created: {}", media, config.codec);
                    self.encoder = Some(encoder);
                    self.force_keyframe = true;
                }
                Err(e) => {
                    warn!("Failed to create {} encoder: {}", media, e);
                    return false;
                }
            }
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return false;
        };
        if encoder.state() == CodecState::Uninitialized {
            let Some(config) = self.config.as_ref() else {
                return false;
            };
            if let Err(e) = encoder.configure(config) {
                warn!("Failed to configure {} encoder: {}", media, e);
                self.encoder = None;
                return false;
            }
        }
        true
    }

    /// 提交一帧；帧在函数返回时释放
    fn submit_frame(&mut self, frame: F::Frame) {
        if !self.ensure_encoder() {
            self.stats.frames_dropped_no_codec += 1;
            return;
        }

        let queue_size = self.encoder.as_ref().map_or(0, |e| e.queue_size());
        if queue_size > self.settings.max_queue_size {
            self.stats.frames_dropped_backpressure += 1;
            debug!(
                "{} encoder queue {} > {}, dropping frame at {}",
                self.settings.media,
                queue_size,
                self.settings.max_queue_size,
                frame.timestamp()
            );
            return;
        }

        let keyframe =
            self.force_keyframe || self.frame_index % self.settings.keyframe_interval == 0;
        self.frame_index += 1;
        self.pending.record(frame.timestamp(), self.clock.now());

        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };
        match encoder.encode(&frame, keyframe) {
            Ok(()) => {
                self.stats.frames_submitted += 1;
                self.force_keyframe = false;
            }
            Err(e) => {
                warn!("{} encode failed: {}", self.settings.media, e);
                if encoder.state() == CodecState::Closed {
                    self.force_keyframe = true;
                }
            }
        }
    }

    /// 编码输出回调
    pub async fn handle_output(&mut self, chunk: EncodedChunk) {
        let media = self.settings.media;

        let origin = *self.timestamp_origin.get_or_insert(chunk.timestamp);
        let timestamp = chunk.timestamp - origin;

        if let Some(captured) = self.pending.take(chunk.timestamp) {
            let latency = self.clock.latency_from(captured);
            self.stats.last_capture_latency_us = Some(latency);
            debug!("{} capture-to-encode latency: {} us", media, latency);
        }

        let position = self.cursor.advance(chunk.is_key());
        if position.new_group {
            self.stats.groups_started += 1;
        }

        let mut metadata = chunk.metadata();
        metadata.timestamp = timestamp;
        let payload = match pack_payload(&metadata, &chunk.data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to pack {} chunk: {}", media, e);
                return;
            }
        };

        if let Some(sample) = self.bitrate.add_bytes(payload.len()) {
            self.events.emit(sample.into_event());
        }

        if !self.cursor.header_sent() {
            let header = GroupHeader {
                track_alias: self.settings.track_alias,
                group_id: position.group_id,
                subgroup_id: position.subgroup_id,
                priority: media.group_priority(),
            };
            match self.sender.send_group_header(header).await {
                Ok(()) => self.cursor.mark_header_sent(),
                Err(e) => {
                    self.stats.send_failures += 1;
                    warn!(
                        "Failed to send {} group header {}: {}",
                        media, position.group_id, e
                    );
                }
            }
        }

        let object = OutboundObject {
            track_alias: self.settings.track_alias,
            epoch: self.epoch,
            group_id: position.group_id,
            subgroup_id: position.subgroup_id,
            object_id: position.object_id,
            payload,
            status: None,
        };
        match self.sender.send_object(object).await {
            Ok(()) => self.stats.chunks_sent += 1,
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(
                    "Failed to send {} object ({}, {}): {}",
                    media, position.group_id, position.object_id, e
                );
            }
        }

        if let Some(closed) = position.closed_group {
            self.send_end_of_group(closed).await;
        }
    }

    async fn send_end_of_group(&mut self, closed: ClosedGroup) {
        let media = self.settings.media;

        // 标记组0会导致下游启动阶段不稳定
        if closed.group_id == 0 {
            debug!("Skipping end-of-group marker for {} group 0", media);
            return;
        }

        let marker = OutboundObject {
            track_alias: self.settings.track_alias,
            epoch: self.epoch,
            group_id: closed.group_id,
            subgroup_id: closed.subgroup_id,
            object_id: closed.last_object_id + 1,
            payload: Bytes::new(),
            status: Some(ObjectStatus::EndOfGroup),
        };

        match self.sender.send_object(marker).await {
            Ok(()) => {
                self.stats.end_of_group_markers += 1;
                debug!("{} group {} closed", media, closed.group_id);
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(
                    "Failed to send end-of-group marker for {} group {}: {}",
                    media, closed.group_id, e
                );
            }
        }
    }
}

async fn next_frame<F>(frames: &mut Option<FrameStream<F>>) -> Option<F> {
    match frames {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
