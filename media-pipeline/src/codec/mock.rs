// 模拟编解码器
//
// 不依赖真实编解码库的确定性实现，供模拟器和测试使用。
// 编码输出同步写入输出通道；`MockCodecProbe` 用于观察提交记录和注入故障。

use super::{CodecState, Decoder, DecoderFactory, Encoder, EncoderFactory, MediaFrame};
use bytes::Bytes;
use common::{ChunkType, CodecConfig, CodecError, EncodedChunk, MediaKind};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// 模拟采集帧
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticFrame {
    pub timestamp: i64,
    pub duration: Option<u64>,
    /// 编码后的数据大小（字节）
    pub encoded_size: usize,
}

impl SyntheticFrame {
    pub fn new(timestamp: i64, duration: Option<u64>, encoded_size: usize) -> Self {
        Self {
            timestamp,
            duration,
            encoded_size,
        }
    }
}

impl MediaFrame for SyntheticFrame {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn duration(&self) -> Option<u64> {
        self.duration
    }
}

/// 按固定帧率生成模拟帧序列
///
/// # 参数
///
/// * `base_timestamp` - 第一帧的原生时间戳（微秒）
/// * `framerate` - 帧率
/// * `encoded_size` - 每帧编码后的大小
/// * `duration` - 序列总时长
pub fn synthetic_frames(
    base_timestamp: i64,
    framerate: f64,
    encoded_size: usize,
    duration: Duration,
) -> BoxStream<'static, SyntheticFrame> {
    let framerate = if framerate > 0.0 { framerate } else { 30.0 };
    let frame_interval = Duration::from_secs_f64(1.0 / framerate);
    let frame_duration_us = frame_interval.as_micros() as u64;
    let total_frames = (duration.as_secs_f64() * framerate).round() as u64;
    let ticker = tokio::time::interval(frame_interval);

    stream::unfold((ticker, 0u64), move |(mut ticker, index)| async move {
        if index >= total_frames {
            return None;
        }
        ticker.tick().await;

        let frame = SyntheticFrame::new(
            base_timestamp + (index * frame_duration_us) as i64,
            Some(frame_duration_us),
            encoded_size,
        );
        Some((frame, (ticker, index + 1)))
    })
    .boxed()
}

/// 模拟解码输出
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub timestamp: i64,
    pub chunk_type: ChunkType,
    pub size: usize,
}

#[derive(Debug, Default)]
struct ProbeState {
    unsupported_codecs: Vec<String>,
    reconfigure_fails: bool,
    queue_size: usize,
    fail_next: bool,
    /// 被标记为关闭的实例代号
    crashed_generation: Option<u64>,
    created: u64,
    configured: Vec<CodecConfig>,
    encoded: Vec<(i64, bool)>,
    decoded: Vec<(i64, ChunkType)>,
}

/// 模拟编解码器探针
///
/// 同一探针可被工厂和测试共享。
#[derive(Debug, Clone, Default)]
pub struct MockCodecProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl MockCodecProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_unsupported(&self, codec: &str) {
        self.lock().unsupported_codecs.push(codec.to_string());
    }

    pub fn set_reconfigure_fails(&self, fails: bool) {
        self.lock().reconfigure_fails = fails;
    }

    /// 设置编码器报告的待处理队列深度
    pub fn set_queue_size(&self, queue_size: usize) {
        self.lock().queue_size = queue_size;
    }

    /// 下一次提交失败，并使实例进入关闭状态
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    /// 将当前实例标记为关闭（模拟异步故障）
    pub fn crash(&self) {
        let mut state = self.lock();
        state.crashed_generation = Some(state.created);
    }

    /// 已创建的实例数
    pub fn created(&self) -> u64 {
        self.lock().created
    }

    pub fn configured(&self) -> Vec<CodecConfig> {
        self.lock().configured.clone()
    }

    /// 编码提交记录：(原生时间戳, 是否请求关键帧)
    pub fn encoded(&self) -> Vec<(i64, bool)> {
        self.lock().encoded.clone()
    }

    /// 解码提交记录：(时间戳, 块类型)
    pub fn decoded(&self) -> Vec<(i64, ChunkType)> {
        self.lock().decoded.clone()
    }

    fn is_supported(&self, config: &CodecConfig) -> bool {
        !self.lock().unsupported_codecs.contains(&config.codec)
    }

    fn register(&self, config: &CodecConfig) -> u64 {
        let mut state = self.lock();
        state.created += 1;
        state.configured.push(config.clone());
        state.created
    }

    fn reconfigure(&self, config: &CodecConfig) -> Result<(), CodecError> {
        let mut state = self.lock();
        if state.reconfigure_fails {
            return Err(CodecError::Rejected {
                message: format!("cannot switch to {}", config.codec),
            });
        }
        state.configured.push(config.clone());
        Ok(())
    }

    fn is_crashed(&self, generation: u64) -> bool {
        self.lock().crashed_generation == Some(generation)
    }

    fn take_failure(&self) -> bool {
        std::mem::take(&mut self.lock().fail_next)
    }
}

pub struct MockEncoderFactory {
    media: MediaKind,
    probe: MockCodecProbe,
}

impl MockEncoderFactory {
    pub fn new(media: MediaKind, probe: MockCodecProbe) -> Self {
        Self { media, probe }
    }
}

impl EncoderFactory for MockEncoderFactory {
    type Frame = SyntheticFrame;
    type Encoder = MockEncoder;

    fn is_supported(&self, config: &CodecConfig) -> bool {
        self.probe.is_supported(config)
    }

    fn create(
        &self,
        config: &CodecConfig,
        output: mpsc::UnboundedSender<EncodedChunk>,
    ) -> Result<MockEncoder, CodecError> {
        if !self.probe.is_supported(config) {
            return Err(CodecError::Unsupported {
                codec: config.codec.clone(),
            });
        }
        let generation = self.probe.register(config);
        Ok(MockEncoder {
            media: self.media,
            generation,
            closed: false,
            output,
            probe: self.probe.clone(),
        })
    }
}

pub struct MockEncoder {
    media: MediaKind,
    generation: u64,
    closed: bool,
    output: mpsc::UnboundedSender<EncodedChunk>,
    probe: MockCodecProbe,
}

impl Encoder for MockEncoder {
    type Frame = SyntheticFrame;

    fn state(&self) -> CodecState {
        if self.closed || self.probe.is_crashed(self.generation) {
            CodecState::Closed
        } else {
            CodecState::Ready
        }
    }

    fn queue_size(&self) -> usize {
        self.probe.lock().queue_size
    }

    fn configure(&mut self, config: &CodecConfig) -> Result<(), CodecError> {
        if self.state() == CodecState::Closed {
            return Err(CodecError::Closed);
        }
        self.probe.reconfigure(config)
    }

    fn encode(&mut self, frame: &SyntheticFrame, keyframe: bool) -> Result<(), CodecError> {
        if self.state() == CodecState::Closed {
            return Err(CodecError::Closed);
        }
        if self.probe.take_failure() {
            self.closed = true;
            return Err(CodecError::Rejected {
                message: "injected encode failure".to_string(),
            });
        }

        self.probe.lock().encoded.push((frame.timestamp, keyframe));

        // 音频块都可以独立解码
        let chunk_type = if keyframe || self.media == MediaKind::Audio {
            ChunkType::Key
        } else {
            ChunkType::Delta
        };

        let chunk = EncodedChunk {
            chunk_type,
            timestamp: frame.timestamp,
            duration: frame.duration,
            data: Bytes::from(vec![0xA5; frame.encoded_size]),
        };
        debug!("Mock {} encoder produced {:?} chunk", self.media, chunk_type);

        self.output.send(chunk).map_err(|_| {
            self.closed = true;
            CodecError::Closed
        })
    }
}

pub struct MockDecoderFactory {
    probe: MockCodecProbe,
}

impl MockDecoderFactory {
    pub fn new(probe: MockCodecProbe) -> Self {
        Self { probe }
    }
}

impl DecoderFactory for MockDecoderFactory {
    type Output = DecodedFrame;
    type Decoder = MockDecoder;

    fn create(
        &self,
        config: &CodecConfig,
        output: mpsc::UnboundedSender<DecodedFrame>,
    ) -> Result<MockDecoder, CodecError> {
        if !self.probe.is_supported(config) {
            return Err(CodecError::Unsupported {
                codec: config.codec.clone(),
            });
        }
        let generation = self.probe.register(config);
        Ok(MockDecoder {
            generation,
            closed: false,
            output,
            probe: self.probe.clone(),
        })
    }
}

pub struct MockDecoder {
    generation: u64,
    closed: bool,
    output: mpsc::UnboundedSender<DecodedFrame>,
    probe: MockCodecProbe,
}

impl Decoder for MockDecoder {
    fn state(&self) -> CodecState {
        if self.closed || self.probe.is_crashed(self.generation) {
            CodecState::Closed
        } else {
            CodecState::Ready
        }
    }

    fn configure(&mut self, config: &CodecConfig) -> Result<(), CodecError> {
        self.probe.reconfigure(config)
    }

    fn decode(&mut self, chunk: &EncodedChunk) -> Result<(), CodecError> {
        if self.state() == CodecState::Closed {
            return Err(CodecError::Closed);
        }
        if self.probe.take_failure() {
            self.closed = true;
            return Err(CodecError::Rejected {
                message: "injected decode failure".to_string(),
            });
        }

        self.probe
            .lock()
            .decoded
            .push((chunk.timestamp, chunk.chunk_type));

        let frame = DecodedFrame {
            timestamp: chunk.timestamp,
            chunk_type: chunk.chunk_type,
            size: chunk.data.len(),
        };
        self.output.send(frame).map_err(|_| {
            self.closed = true;
            CodecError::Closed
        })
    }
}
