// 管线工作任务
//
// 每条管线运行在独立任务中，外部只能通过命令通道交互，
// 帧序列和传输对象的所有权随消息转移。

use crate::codec::{DecoderFactory, EncoderFactory};
use crate::decode::{DecodeCommand, DecodePipeline, DecodeStats};
use crate::encode::{EncodeCommand, EncodePipeline, EncodeStats, FrameStream};
use crate::error::{PipelineError, Result};
use crate::transport::ObjectSender;
use common::{CodecConfig, InboundObject, MediaKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 命令通道容量
pub const COMMAND_BUFFER: usize = 64;

/// 编码工作任务句柄
pub struct EncodeHandle<Fr> {
    media: MediaKind,
    commands: mpsc::Sender<EncodeCommand<Fr>>,
    shutdown: CancellationToken,
    task: JoinHandle<EncodeStats>,
}

/// 启动编码工作任务
///
/// # 参数
///
/// * `pipeline` - 编码管线，所有权移入任务
/// * `parent` - 父级关闭信号，取消时任务一并退出
pub fn spawn_encode_worker<F, S>(
    pipeline: EncodePipeline<F, S>,
    parent: &CancellationToken,
) -> EncodeHandle<F::Frame>
where
    F: EncoderFactory,
    S: ObjectSender,
{
    let media = pipeline.media();
    let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
    let shutdown = parent.child_token();
    let task = tokio::spawn(pipeline.run(rx, shutdown.clone()));

    info!("{} encode worker spawned", media);
    EncodeHandle {
        media,
        commands,
        shutdown,
        task,
    }
}

impl<Fr: Send + 'static> EncodeHandle<Fr> {
    pub fn media(&self) -> MediaKind {
        self.media
    }

    pub async fn configure(&self, config: CodecConfig) -> Result<()> {
        self.send(EncodeCommand::Configure(config)).await
    }

    /// 挂接新的帧序列，之前的序列被放弃
    pub async fn attach_stream(&self, frames: FrameStream<Fr>) -> Result<()> {
        self.send(EncodeCommand::Attach(frames)).await
    }

    async fn send(&self, command: EncodeCommand<Fr>) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PipelineError::WorkerGone { media: self.media })
    }

    /// 关闭命令通道，等待当前帧序列编码完毕
    pub async fn finish(self) -> Result<EncodeStats> {
        let media = self.media;
        drop(self.commands);
        join(media, self.task).await
    }

    /// 立即停止
    pub async fn shutdown(self) -> Result<EncodeStats> {
        self.shutdown.cancel();
        join(self.media, self.task).await
    }
}

/// 解码工作任务句柄
pub struct DecodeHandle {
    media: MediaKind,
    commands: mpsc::Sender<DecodeCommand>,
    shutdown: CancellationToken,
    task: JoinHandle<DecodeStats>,
}

/// 启动解码工作任务
pub fn spawn_decode_worker<F>(pipeline: DecodePipeline<F>, parent: &CancellationToken) -> DecodeHandle
where
    F: DecoderFactory,
{
    let media = pipeline.media();
    let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
    let shutdown = parent.child_token();
    let task = tokio::spawn(pipeline.run(rx, shutdown.clone()));

    info!("{} decode worker spawned", media);
    DecodeHandle {
        media,
        commands,
        shutdown,
        task,
    }
}

impl DecodeHandle {
    pub fn media(&self) -> MediaKind {
        self.media
    }

    /// 投递传输层对象
    pub async fn deliver(&self, object: InboundObject) -> Result<()> {
        self.send(DecodeCommand::Object(object)).await
    }

    /// 命令通道的发送端，供路由任务使用
    pub fn sender(&self) -> mpsc::Sender<DecodeCommand> {
        self.commands.clone()
    }

    async fn send(&self, command: DecodeCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PipelineError::WorkerGone { media: self.media })
    }

    /// 关闭输入，播放完缓冲区后退出
    ///
    /// 通过 `sender()` 取得的发送端全部释放后才会结束。
    pub async fn finish(self) -> Result<DecodeStats> {
        let media = self.media;
        drop(self.commands);
        join(media, self.task).await
    }

    /// 立即停止，缓冲区中的条目被丢弃
    pub async fn shutdown(self) -> Result<DecodeStats> {
        self.shutdown.cancel();
        join(self.media, self.task).await
    }
}

async fn join<T>(media: MediaKind, task: JoinHandle<T>) -> Result<T> {
    task.await.map_err(|e| {
        warn!("{} worker task failed: {}", media, e);
        PipelineError::WorkerGone { media }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MockCodecProbe, MockDecoderFactory, MockEncoderFactory, SyntheticFrame};
    use crate::decode::DecodeSettings;
    use crate::encode::EncodeSettings;
    use crate::events::EventSink;
    use crate::timing::CaptureClock;
    use crate::transport::LoopbackTransport;
    use bytes::Bytes;
    use common::{pack_payload, ChunkMetadata, ChunkType, ObjectStatus};
    use futures::{stream, StreamExt};
    use std::time::Duration;

    fn audio_config() -> CodecConfig {
        CodecConfig {
            codec: "opus".to_string(),
            width: None,
            height: None,
            bitrate: 64_000,
            framerate: 50.0,
            sample_rate: Some(48_000),
            channels: Some(2),
        }
    }

    #[tokio::test]
    async fn test_encode_worker_finish_drains_stream() {
        let probe = MockCodecProbe::new();
        let (transport, mut inbound) = LoopbackTransport::new(64, 0.0);
        let pipeline = EncodePipeline::new(
            EncodeSettings {
                media: MediaKind::Audio,
                track_alias: 2,
                keyframe_interval: 1,
                max_queue_size: 8,
            },
            MockEncoderFactory::new(MediaKind::Audio, probe.clone()),
            transport,
            CaptureClock::new(),
            EventSink::disabled(),
        );

        let root = CancellationToken::new();
        let handle = spawn_encode_worker(pipeline, &root);
        handle.configure(audio_config()).await.unwrap();
        let frames: Vec<SyntheticFrame> = (0..5)
            .map(|i| SyntheticFrame::new(i * 20_000, Some(20_000), 40))
            .collect();
        handle.attach_stream(stream::iter(frames).boxed()).await.unwrap();

        let stats = handle.finish().await.unwrap();
        assert_eq!(stats.frames_submitted, 5);
        assert_eq!(stats.chunks_sent, 5);

        // 音频每块一组；组0的结束标记被省略
        let mut received = Vec::new();
        while let Ok(object) = inbound.try_recv() {
            received.push((object.group_id, object.object_id, object.status));
        }
        let data: Vec<u64> = received
            .iter()
            .filter(|(_, _, status)| *status == ObjectStatus::Normal)
            .map(|(group_id, _, _)| *group_id)
            .collect();
        assert_eq!(data, vec![0, 1, 2, 3, 4]);
        let markers = received
            .iter()
            .filter(|(_, _, status)| *status == ObjectStatus::EndOfGroup)
            .count();
        assert_eq!(markers, 3);
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_workers() {
        let probe = MockCodecProbe::new();
        let (render_tx, _render_rx) = mpsc::channel(4);
        let pipeline = DecodePipeline::new(
            DecodeSettings {
                media: MediaKind::Video,
                min_delay: Duration::from_millis(10),
                capacity: 8,
                playout_interval: Duration::from_millis(5),
            },
            MockDecoderFactory::new(probe),
            audio_config(),
            render_tx,
            EventSink::disabled(),
        );

        let root = CancellationToken::new();
        let handle = spawn_decode_worker(pipeline, &root);
        let metadata = ChunkMetadata {
            chunk_type: ChunkType::Key,
            timestamp: 0,
            duration: None,
        };
        handle
            .deliver(InboundObject {
                track_alias: 1,
                epoch: 1,
                group_id: 0,
                object_id: 0,
                payload: pack_payload(&metadata, b"k").unwrap(),
                status: ObjectStatus::Normal,
            })
            .await
            .unwrap();
        handle
            .deliver(InboundObject {
                track_alias: 1,
                epoch: 1,
                group_id: 0,
                object_id: 1,
                payload: Bytes::new(),
                status: ObjectStatus::EndOfGroup,
            })
            .await
            .unwrap();

        root.cancel();
        let stats = handle.shutdown().await.unwrap();
        assert!(stats.objects_received <= 2);
    }

    #[tokio::test]
    async fn test_commands_fail_after_worker_exits() {
        let probe = MockCodecProbe::new();
        let (render_tx, _render_rx) = mpsc::channel(4);
        let pipeline = DecodePipeline::new(
            DecodeSettings {
                media: MediaKind::Audio,
                min_delay: Duration::ZERO,
                capacity: 8,
                playout_interval: Duration::from_millis(5),
            },
            MockDecoderFactory::new(probe),
            audio_config(),
            render_tx,
            EventSink::disabled(),
        );

        let root = CancellationToken::new();
        let handle = spawn_decode_worker(pipeline, &root);
        let sender = handle.sender();
        root.cancel();
        let _ = handle.shutdown().await.unwrap();

        let marker = InboundObject {
            track_alias: 2,
            epoch: 1,
            group_id: 0,
            object_id: 1,
            payload: Bytes::new(),
            status: ObjectStatus::EndOfGroup,
        };
        assert!(sender.send(DecodeCommand::Object(marker)).await.is_err());
    }
}
