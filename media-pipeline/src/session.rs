// 媒体会话
//
// 按配置组装四条管线（音视频各一条编码、一条解码），
// 路由任务按 track alias 把传输层收到的对象分发给对应的解码工作任务。

use crate::codec::{DecoderFactory, EncoderFactory};
use crate::config::PipelineConfig;
use crate::decode::{DecodeCommand, DecodePipeline, DecodeStats, RenderedFrame};
use crate::encode::{EncodePipeline, EncodeStats, FrameStream};
use crate::error::Result;
use crate::events::EventSink;
use crate::timing::CaptureClock;
use crate::transport::ObjectSender;
use crate::worker::{spawn_decode_worker, spawn_encode_worker, DecodeHandle, EncodeHandle};
use common::{InboundObject, MediaKind, PipelineEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 渲染通道容量
pub const RENDER_BUFFER: usize = 32;

/// 会话使用的编解码器工厂
pub struct SessionCodecs<VE, AE, VD, AD> {
    pub video_encoder: VE,
    pub audio_encoder: AE,
    pub video_decoder: VD,
    pub audio_decoder: AD,
}

/// 会话输出：渲染帧与监测消息
pub struct SessionOutputs<VO, AO> {
    pub video: mpsc::Receiver<RenderedFrame<VO>>,
    pub audio: mpsc::Receiver<RenderedFrame<AO>>,
    pub events: mpsc::UnboundedReceiver<PipelineEvent>,
}

/// 会话统计
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub video_encode: EncodeStats,
    pub audio_encode: EncodeStats,
    pub video_decode: DecodeStats,
    pub audio_decode: DecodeStats,
    pub routed_objects: u64,
    /// track alias 无法识别的对象
    pub unknown_track_objects: u64,
}

#[derive(Debug, Default)]
struct RouterStats {
    routed: u64,
    unknown_track: u64,
}

pub struct MediaSession<VF, AF> {
    id: Uuid,
    root: CancellationToken,
    router_shutdown: CancellationToken,
    video_encode: EncodeHandle<VF>,
    audio_encode: EncodeHandle<AF>,
    video_decode: DecodeHandle,
    audio_decode: DecodeHandle,
    router: JoinHandle<RouterStats>,
}

impl<VF: Send + 'static, AF: Send + 'static> MediaSession<VF, AF> {
    /// 启动会话
    ///
    /// # 参数
    ///
    /// * `config` - 管线配置，启动前校验
    /// * `codecs` - 编解码器工厂
    /// * `sender` - 发送端传输，两条编码管线共享
    /// * `inbound` - 接收端传输对象
    /// * `clock` - 共享的采集时钟
    pub async fn start<VE, AE, VD, AD, S>(
        config: &PipelineConfig,
        codecs: SessionCodecs<VE, AE, VD, AD>,
        sender: S,
        inbound: mpsc::Receiver<InboundObject>,
        clock: CaptureClock,
    ) -> Result<(Self, SessionOutputs<VD::Output, AD::Output>)>
    where
        VE: EncoderFactory<Frame = VF>,
        AE: EncoderFactory<Frame = AF>,
        VD: DecoderFactory,
        AD: DecoderFactory,
        S: ObjectSender + Clone,
    {
        config.validate()?;

        let id = Uuid::new_v4();
        let root = CancellationToken::new();
        let (events, event_rx) = EventSink::channel();

        let video_encode = spawn_encode_worker(
            EncodePipeline::new(
                config.video.encode_settings(MediaKind::Video),
                codecs.video_encoder,
                sender.clone(),
                clock.clone(),
                events.clone(),
            ),
            &root,
        );
        let audio_encode = spawn_encode_worker(
            EncodePipeline::new(
                config.audio.encode_settings(MediaKind::Audio),
                codecs.audio_encoder,
                sender,
                clock,
                events.clone(),
            ),
            &root,
        );

        let (video_render, video_rx) = mpsc::channel(RENDER_BUFFER);
        let (audio_render, audio_rx) = mpsc::channel(RENDER_BUFFER);
        let video_decode = spawn_decode_worker(
            DecodePipeline::new(
                config.video.decode_settings(MediaKind::Video),
                codecs.video_decoder,
                config.video.codec_config(),
                video_render,
                events.clone(),
            ),
            &root,
        );
        let audio_decode = spawn_decode_worker(
            DecodePipeline::new(
                config.audio.decode_settings(MediaKind::Audio),
                codecs.audio_decoder,
                config.audio.codec_config(),
                audio_render,
                events,
            ),
            &root,
        );

        video_encode.configure(config.video.codec_config()).await?;
        audio_encode.configure(config.audio.codec_config()).await?;

        let router_shutdown = root.child_token();
        let router = tokio::spawn(route_objects(
            inbound,
            [
                (config.video.track_alias, video_decode.sender()),
                (config.audio.track_alias, audio_decode.sender()),
            ],
            router_shutdown.clone(),
        ));

        info!("Media session {} started", id);

        let session = Self {
            id,
            root,
            router_shutdown,
            video_encode,
            audio_encode,
            video_decode,
            audio_decode,
            router,
        };
        let outputs = SessionOutputs {
            video: video_rx,
            audio: audio_rx,
            events: event_rx,
        };
        Ok((session, outputs))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 挂接视频采集序列
    ///
    /// 新序列的组编号从0重新开始，并以新的推流代次发出；
    /// 接收端收到新代次的第一个对象时清空缓冲，仍在途中的旧序列对象被丢弃。
    pub async fn attach_video(&self, frames: FrameStream<VF>) -> Result<()> {
        self.video_encode.attach_stream(frames).await
    }

    /// 挂接音频采集序列
    pub async fn attach_audio(&self, frames: FrameStream<AF>) -> Result<()> {
        self.audio_encode.attach_stream(frames).await
    }

    /// 等待采集序列编码完毕、接收端播放完缓冲区后结束会话
    pub async fn finish(self) -> Result<SessionStats> {
        let video_encode = self.video_encode.finish().await?;
        let audio_encode = self.audio_encode.finish().await?;

        self.router_shutdown.cancel();
        let router = self.router.await.unwrap_or_else(|e| {
            warn!("Object router failed: {}", e);
            RouterStats::default()
        });

        let video_decode = self.video_decode.finish().await?;
        let audio_decode = self.audio_decode.finish().await?;

        info!("Media session {} finished", self.id);
        Ok(SessionStats {
            video_encode,
            audio_encode,
            video_decode,
            audio_decode,
            routed_objects: router.routed,
            unknown_track_objects: router.unknown_track,
        })
    }

    /// 立即停止所有管线
    pub async fn shutdown(self) -> Result<SessionStats> {
        self.root.cancel();

        let router = self.router.await.unwrap_or_else(|e| {
            warn!("Object router failed: {}", e);
            RouterStats::default()
        });
        let stats = SessionStats {
            video_encode: self.video_encode.shutdown().await?,
            audio_encode: self.audio_encode.shutdown().await?,
            video_decode: self.video_decode.shutdown().await?,
            audio_decode: self.audio_decode.shutdown().await?,
            routed_objects: router.routed,
            unknown_track_objects: router.unknown_track,
        };

        info!("Media session {} shut down", self.id);
        Ok(stats)
    }
}

/// 按 track alias 分发对象
///
/// 收到关闭信号后把接收通道中已有的对象分发完再退出。
async fn route_objects(
    mut inbound: mpsc::Receiver<InboundObject>,
    routes: [(u64, mpsc::Sender<DecodeCommand>); 2],
    shutdown: CancellationToken,
) -> RouterStats {
    let mut stats = RouterStats::default();

    loop {
        let object = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            object = inbound.recv() => match object {
                Some(object) => object,
                None => break,
            },
        };
        dispatch(&routes, object, &mut stats).await;
    }

    while let Ok(object) = inbound.try_recv() {
        dispatch(&routes, object, &mut stats).await;
    }

    debug!(
        "Object router stopped (routed: {}, unknown track: {})",
        stats.routed, stats.unknown_track
    );
    stats
}

async fn dispatch(
    routes: &[(u64, mpsc::Sender<DecodeCommand>)],
    object: InboundObject,
    stats: &mut RouterStats,
) {
    let Some((_, route)) = routes.iter().find(|(alias, _)| *alias == object.track_alias) else {
        stats.unknown_track += 1;
        debug!("Dropping object for unknown track {}", object.track_alias);
        return;
    };

    if route.send(DecodeCommand::Object(object)).await.is_err() {
        debug!("Decode worker gone, dropping object");
        return;
    }
    stats.routed += 1;
}
