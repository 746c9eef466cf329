// 编解码器抽象
//
// 编码/解码管线只依赖这里定义的能力集合，音频和视频各自提供适配器。
// 编解码器的输出通过创建时传入的通道异步回送（对应输出回调）。

pub mod mock;

use common::{CodecError, EncodedChunk};
use tokio::sync::mpsc;

pub use common::CodecConfig;

/// 编解码器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    /// 已创建但尚未配置
    Uninitialized,
    /// 可用
    Ready,
    /// 已关闭或出错，需要重建
    Closed,
}

/// 原始媒体帧（采集输出）
///
/// 帧占用的资源在 drop 时释放。
pub trait MediaFrame: Send + 'static {
    /// 原生时间戳（微秒），不保证从0开始
    fn timestamp(&self) -> i64;

    /// 时长（微秒）
    fn duration(&self) -> Option<u64> {
        None
    }
}

pub trait Encoder: Send {
    type Frame: MediaFrame;

    fn state(&self) -> CodecState;

    /// 编码器内部尚未完成的任务数
    fn queue_size(&self) -> usize;

    /// 应用配置（原地重配置）
    fn configure(&mut self, config: &CodecConfig) -> Result<(), CodecError>;

    /// 提交一帧，`keyframe` 为显式关键帧请求
    fn encode(&mut self, frame: &Self::Frame, keyframe: bool) -> Result<(), CodecError>;

    /// 输出缓冲中的剩余编码块
    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

pub trait EncoderFactory: Send + 'static {
    type Frame: MediaFrame;
    type Encoder: Encoder<Frame = Self::Frame>;

    fn is_supported(&self, config: &CodecConfig) -> bool;

    /// 创建编码器，编码块写入 `output`
    fn create(
        &self,
        config: &CodecConfig,
        output: mpsc::UnboundedSender<EncodedChunk>,
    ) -> Result<Self::Encoder, CodecError>;
}

pub trait Decoder: Send {
    fn state(&self) -> CodecState;

    fn configure(&mut self, config: &CodecConfig) -> Result<(), CodecError>;

    fn decode(&mut self, chunk: &EncodedChunk) -> Result<(), CodecError>;
}

pub trait DecoderFactory: Send + 'static {
    /// 可渲染的解码输出
    type Output: Send + 'static;
    type Decoder: Decoder;

    fn create(
        &self,
        config: &CodecConfig,
        output: mpsc::UnboundedSender<Self::Output>,
    ) -> Result<Self::Decoder, CodecError>;
}

pub use mock::{
    synthetic_frames, DecodedFrame, MockCodecProbe, MockDecoder, MockDecoderFactory, MockEncoder,
    MockEncoderFactory, SyntheticFrame,
};
