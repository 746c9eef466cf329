use crate::codec::{CodecState, Decoder, DecoderFactory};
use crate::config::MediaConfig;
use crate::events::EventSink;
use crate::jitter::{JitterBuffer, PushOutcome};
use crate::timing::BitrateMeter;
use common::{unpack_payload, CodecConfig, EncodedChunk, InboundObject, MediaKind};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 解码管线参数
#[derive(Debug, Clone)]
pub struct DecodeSettings {
    pub media: MediaKind,
    /// 抖动缓冲最小停留时间
    pub min_delay: Duration,
    /// 抖动缓冲容量
    pub capacity: usize,
    /// 播放节拍
    pub playout_interval: Duration,
}

impl DecodeSettings {
    pub fn from_config(media: MediaKind, config: &MediaConfig) -> Self {
        Self {
            media,
            min_delay: Duration::from_millis(config.jitter_min_delay_ms),
            capacity: config.jitter_capacity,
            playout_interval: Duration::from_millis(config.playout_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// 丢弃非关键帧，直到收到关键帧
    WaitingForKeyframe,
    Decoding,
}

/// 解码统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub objects_received: u64,
    /// 来自已被替换的推流代次的对象
    pub stale_epoch_drops: u64,
    /// 发送端重新推流的次数
    pub stream_restarts: u64,
    /// 视频丢弃的结束标记和空对象
    pub control_objects_dropped: u64,
    /// 从抖动缓冲放出的条目数
    pub entries_played: u64,
    pub overflow_drops: u64,
    pub late_drops: u64,
    /// 等待关键帧期间丢弃的块
    pub keyframe_wait_discards: u64,
    pub malformed_payloads: u64,
    pub chunks_decoded: u64,
    pub frames_rendered: u64,
    /// 渲染端繁忙或已关闭时丢弃的帧
    pub render_drops: u64,
    pub codec_resets: u64,
}

/// 可渲染的帧及其发送端时间戳
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame<O> {
    pub frame: O,
    /// 重定基后的发送端时间戳（微秒）
    pub sender_timestamp: Option<i64>,
}

/// 解码工作任务的输入
#[derive(Debug)]
pub enum DecodeCommand {
    Object(InboundObject),
}

/// 解码管线
///
/// 抖动缓冲区只属于本管线，不需要加锁。每个解码器实例有自己的输出通道，
/// 重建后旧实例的迟到输出随通道一起丢弃。
///
/// 重新推流随对象的代次在带内传递：新代次的第一个对象清空缓冲，
/// 之后到达的旧代次对象不进入缓冲。
pub struct DecodePipeline<F: DecoderFactory> {
    settings: DecodeSettings,
    factory: F,
    config: CodecConfig,
    decoder: Option<F::Decoder>,
    outputs: Option<mpsc::UnboundedReceiver<F::Output>>,
    /// 与解码提交一一对应的时间戳队列
    pending_timestamps: VecDeque<i64>,
    buffer: JitterBuffer<InboundObject>,
    /// 当前接受的推流代次
    epoch: Option<u64>,
    render: mpsc::Sender<RenderedFrame<F::Output>>,
    bitrate: BitrateMeter,
    events: EventSink,
    state: DecodeState,
    stats: DecodeStats,
}

impl<F: DecoderFactory> DecodePipeline<F> {
    pub fn new(
        settings: DecodeSettings,
        factory: F,
        config: CodecConfig,
        render: mpsc::Sender<RenderedFrame<F::Output>>,
        events: EventSink,
    ) -> Self {
        let buffer = JitterBuffer::new(settings.capacity, settings.min_delay);
        let bitrate = BitrateMeter::new(settings.media);
        Self {
            settings,
            factory,
            config,
            decoder: None,
            outputs: None,
            pending_timestamps: VecDeque::new(),
            buffer,
            epoch: None,
            render,
            bitrate,
            events,
            state: DecodeState::WaitingForKeyframe,
            stats: DecodeStats::default(),
        }
    }

    pub fn media(&self) -> MediaKind {
        self.settings.media
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            overflow_drops: self.buffer.overflow_drops(),
            late_drops: self.buffer.late_drops(),
            ..self.stats.clone()
        }
    }

    /// 接收传输层对象
    pub fn on_receive(&mut self, object: InboundObject) {
        let media = self.settings.media;
        self.stats.objects_received += 1;

        if !self.admit_epoch(&object) {
            return;
        }

        if object.is_control() && media.discards_control_objects() {
            self.stats.control_objects_dropped += 1;
            debug!(
                "Dropping {} control object ({}, {}) status {:?}",
                media, object.group_id, object.object_id, object.status
            );
            return;
        }

        if let Some(sample) = self.bitrate.add_bytes(object.payload.len()) {
            self.events.emit(sample.into_event());
        }

        match self.buffer.push(object.group_id, object.object_id, object) {
            PushOutcome::Buffered => {}
            PushOutcome::Evicted(entry) => debug!(
                "{} jitter buffer full, dropped ({}, {})",
                media, entry.group_id, entry.sequence_id
            ),
            PushOutcome::Late => debug!("{} object arrived after its playout slot", media),
        }
    }

    /// 播放节拍：最多放出一个条目并解码
    ///
    /// # 返回
    ///
    /// 本节拍是否放出了条目
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        let played = match self.buffer.pop_at(now) {
            Some(entry) => {
                self.stats.entries_played += 1;
                self.decode_object(entry.payload);
                true
            }
            None => false,
        };
        self.flush_outputs();
        played
    }

    fn decode_object(&mut self, object: InboundObject) {
        let media = self.settings.media;

        if object.is_control() {
            debug!(
                "{} control object ({}, {}) reached playout, nothing to decode",
                media, object.group_id, object.object_id
            );
            return;
        }

        let (metadata, data) = match unpack_payload(&object.payload) {
            Ok(parts) => parts,
            Err(e) => {
                self.stats.malformed_payloads += 1;
                warn!(
                    "Malformed {} payload ({}, {}): {}",
                    media, object.group_id, object.object_id, e
                );
                return;
            }
        };
        let chunk = EncodedChunk::from_parts(metadata, data);
        self.decode_chunk(chunk);
    }

    fn decode_chunk(&mut self, chunk: EncodedChunk) {
        let media = self.settings.media;
        let keyframe = chunk.is_key();

        if self.state == DecodeState::WaitingForKeyframe {
            if !keyframe {
                self.stats.keyframe_wait_discards += 1;
                debug!("{} waiting for keyframe, discarding chunk at {}", media, chunk.timestamp);
                return;
            }
            self.state = DecodeState::Decoding;
            info!("{} keyframe received, decoding", media);
        }

        let needs_new = match &self.decoder {
            Some(decoder) => decoder.state() == CodecState::Closed,
            None => true,
        };

        if needs_new {
            if self.decoder.take().is_some() {
                self.stats.codec_resets += 1;
                info!("{} decoder closed, recreating", media);
            }

            // 新解码器没有参考帧
            if !keyframe {
                self.stats.keyframe_wait_discards += 1;
                self.state = DecodeState::WaitingForKeyframe;
                debug!("{} decoder needs a keyframe, discarding chunk", media);
                return;
            }

            if !self.create_decoder() {
                self.state = DecodeState::WaitingForKeyframe;
                return;
            }
        }

        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        match decoder.decode(&chunk) {
            Ok(()) => {
                self.stats.chunks_decoded += 1;
                self.pending_timestamps.push_back(chunk.timestamp);
            }
            Err(e) => {
                warn!("{} decode failed at {}: {}", media, chunk.timestamp, e);
                self.state = DecodeState::WaitingForKeyframe;
            }
        }
    }

    fn create_decoder(&mut self) -> bool {
        let media = self.settings.media;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut decoder = match self.factory.create(&self.config, tx) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("Failed to create {} decoder: {}", media, e);
                return false;
            }
        };
        if decoder.state() == CodecState::Uninitialized {
            if let Err(e) = decoder.configure(&self.config) {
                warn!("Failed to configure {} decoder: {}", media, e);
                return false;
            }
        }

        info!("{} decoder created: {}", media, self.config.codec);
        self.decoder = Some(decoder);
        self.outputs = Some(rx);
        self.pending_timestamps.clear();
        true
    }

    /// 将解码器已产生的输出交给渲染端
    pub fn flush_outputs(&mut self) {
        let Some(outputs) = self.outputs.as_mut() else {
            return;
        };

        while let Ok(frame) = outputs.try_recv() {
            let rendered = RenderedFrame {
                frame,
                sender_timestamp: self.pending_timestamps.pop_front(),
            };
            match self.render.try_send(rendered) {
                Ok(()) => self.stats.frames_rendered += 1,
                Err(_) => {
                    self.stats.render_drops += 1;
                    debug!("{} render sink unavailable, dropping frame", self.settings.media);
                }
            }
        }
    }

    /// 按推流代次过滤对象
    ///
    /// 更新的代次表示发送端重新推流，组编号从0重新开始。
    fn admit_epoch(&mut self, object: &InboundObject) -> bool {
        let media = self.settings.media;
        match self.epoch {
            Some(current) if object.epoch < current => {
                self.stats.stale_epoch_drops += 1;
                debug!(
                    "Dropping {} object ({}, {}) from superseded epoch {} (current: {})",
                    media, object.group_id, object.object_id, object.epoch, current
                );
                false
            }
            Some(current) if object.epoch == current => true,
            previous => {
                if previous.is_some() {
                    self.restart(object.epoch);
                }
                self.epoch = Some(object.epoch);
                true
            }
        }
    }

    /// 清空缓冲及其放出位置，重新等待关键帧
    fn restart(&mut self, epoch: u64) {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.state = DecodeState::WaitingForKeyframe;
        self.stats.stream_restarts += 1;
        info!(
            "{} stream restarted at epoch {}, discarded {} buffered entries",
            self.settings.media, epoch, discarded
        );
    }

    /// 工作任务主循环
    ///
    /// 收到关闭信号时立即退出；输入通道关闭后播放完缓冲区中剩余的条目再退出。
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<DecodeCommand>,
        shutdown: CancellationToken,
    ) -> DecodeStats {
        let media = self.settings.media;
        let mut ticker = time::interval(self.settings.playout_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        info!(
            "{} decode pipeline started (min delay: {:?}, capacity: {})",
            media,
            self.buffer.min_delay(),
            self.buffer.capacity()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv(), if commands_open => match command {
                    Some(DecodeCommand::Object(object)) => self.on_receive(object),
                    None => commands_open = false,
                },
                _ = ticker.tick() => {
                    self.tick();
                    if !commands_open && self.buffer.is_empty() {
                        break;
                    }
                }
            }
        }

        let stats = self.stats();
        info!(
            "{} decode pipeline stopped (received: {}, played: {}, rendered: {})",
            media, stats.objects_received, stats.entries_played, stats.frames_rendered
        );
        stats
    }
}
