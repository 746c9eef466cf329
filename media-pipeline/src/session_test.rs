#[cfg(test)]
mod tests {
    use crate::codec::{
        synthetic_frames, MockCodecProbe, MockDecoderFactory, MockEncoderFactory,
    };
    use crate::config::PipelineConfig;
    use crate::session::{MediaSession, SessionCodecs};
    use crate::timing::CaptureClock;
    use crate::transport::LoopbackTransport;
    use bytes::Bytes;
    use common::{
        ChunkType, ConfigErrorReason, InboundObject, MediaKind, ObjectStatus, PipelineEvent,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Probes {
        video_encoder: MockCodecProbe,
        audio_encoder: MockCodecProbe,
        video_decoder: MockCodecProbe,
        audio_decoder: MockCodecProbe,
    }

    impl Probes {
        fn new() -> Self {
            Self {
                video_encoder: MockCodecProbe::new(),
                audio_encoder: MockCodecProbe::new(),
                video_decoder: MockCodecProbe::new(),
                audio_decoder: MockCodecProbe::new(),
            }
        }

        fn codecs(
            &self,
        ) -> SessionCodecs<MockEncoderFactory, MockEncoderFactory, MockDecoderFactory, MockDecoderFactory>
        {
            SessionCodecs {
                video_encoder: MockEncoderFactory::new(MediaKind::Video, self.video_encoder.clone()),
                audio_encoder: MockEncoderFactory::new(MediaKind::Audio, self.audio_encoder.clone()),
                video_decoder: MockDecoderFactory::new(self.video_decoder.clone()),
                audio_decoder: MockDecoderFactory::new(self.audio_decoder.clone()),
            }
        }
    }

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.video.keyframe_interval = 10;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_session_delivers_in_order() {
        let config = test_config();
        let probes = Probes::new();
        let (transport, inbound) = LoopbackTransport::new(256, 0.0);

        let (session, mut outputs) = MediaSession::start(
            &config,
            probes.codecs(),
            transport,
            inbound,
            CaptureClock::new(),
        )
        .await
        .unwrap();

        session
            .attach_video(synthetic_frames(3_000_000, 30.0, 1200, Duration::from_secs(1)))
            .await
            .unwrap();
        session
            .attach_audio(synthetic_frames(3_000_000, 50.0, 160, Duration::from_secs(1)))
            .await
            .unwrap();

        let stats = session.finish().await.unwrap();

        // 视频：关键帧位于第0、10、20帧，组0的结束标记被省略
        assert_eq!(stats.video_encode.frames_submitted, 30);
        assert_eq!(stats.video_encode.chunks_sent, 30);
        assert_eq!(stats.video_encode.groups_started, 3);
        assert_eq!(stats.video_encode.end_of_group_markers, 1);
        assert_eq!(stats.video_decode.objects_received, 31);
        assert_eq!(stats.video_decode.control_objects_dropped, 1);
        assert_eq!(stats.video_decode.chunks_decoded, 30);
        assert_eq!(stats.video_decode.frames_rendered, 30);

        // 音频：每块一组，结束标记也进入缓冲区
        assert_eq!(stats.audio_encode.chunks_sent, 50);
        assert_eq!(stats.audio_encode.end_of_group_markers, 48);
        assert_eq!(stats.audio_decode.objects_received, 98);
        assert_eq!(stats.audio_decode.control_objects_dropped, 0);
        assert_eq!(stats.audio_decode.chunks_decoded, 50);

        assert_eq!(stats.routed_objects, 129);
        assert_eq!(stats.unknown_track_objects, 0);

        let mut timestamps = Vec::new();
        while let Ok(frame) = outputs.video.try_recv() {
            timestamps.push(frame.sender_timestamp.unwrap());
        }
        assert_eq!(timestamps.len(), 30);
        assert_eq!(timestamps[0], 0);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        let decoded = probes.video_decoder.decoded();
        assert_eq!(decoded[0].1, ChunkType::Key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reordering_transport_keeps_playout_order() {
        let config = test_config();
        let probes = Probes::new();
        let (transport, inbound) = LoopbackTransport::new(256, 0.5);

        let (session, _outputs) = MediaSession::start(
            &config,
            probes.codecs(),
            transport,
            inbound,
            CaptureClock::new(),
        )
        .await
        .unwrap();

        session
            .attach_video(synthetic_frames(0, 30.0, 800, Duration::from_secs(2)))
            .await
            .unwrap();
        let stats = session.finish().await.unwrap();

        // 被暂扣的最后一个对象在序列结束时发出，交换只发生在相邻对象之间
        assert_eq!(
            stats.video_decode.objects_received,
            stats.video_encode.chunks_sent + stats.video_encode.end_of_group_markers
        );
        assert_eq!(stats.video_decode.late_drops, 0);
        assert_eq!(stats.video_decode.stale_epoch_drops, 0);
        assert_eq!(stats.video_decode.chunks_decoded, stats.video_encode.chunks_sent);

        let decoded = probes.video_decoder.decoded();
        assert_eq!(decoded.len() as u64, stats.video_encode.chunks_sent);
        assert_eq!(decoded[0].1, ChunkType::Key);
        assert!(decoded.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_while_previous_stream_in_flight() {
        let config = test_config();
        let probes = Probes::new();
        let (transport, inbound) = LoopbackTransport::new(256, 0.0);

        let (session, _outputs) = MediaSession::start(
            &config,
            probes.codecs(),
            transport,
            inbound,
            CaptureClock::new(),
        )
        .await
        .unwrap();

        session
            .attach_video(synthetic_frames(0, 30.0, 800, Duration::from_secs(3600)))
            .await
            .unwrap();
        // 第一个序列已进入组1，缓冲区中仍有未播放的对象
        tokio::time::sleep(Duration::from_millis(500)).await;

        session
            .attach_video(synthetic_frames(9_000_000, 30.0, 800, Duration::from_secs(1)))
            .await
            .unwrap();
        let stats = session.finish().await.unwrap();

        assert_eq!(stats.video_decode.stream_restarts, 1);
        assert_eq!(stats.video_decode.late_drops, 0);
        assert_eq!(stats.video_decode.keyframe_wait_discards, 0);

        // 第二个序列的30帧全部按顺序解码
        let decoded = probes.video_decoder.decoded();
        assert!(decoded.len() > 30);
        let restarted: Vec<(i64, ChunkType)> = decoded[decoded.len() - 30..].to_vec();
        let expected: Vec<(i64, ChunkType)> = (0..30)
            .map(|i| {
                let chunk_type = if i % 10 == 0 { ChunkType::Key } else { ChunkType::Delta };
                (i * 33_333, chunk_type)
            })
            .collect();
        assert_eq!(restarted, expected);
        assert!(decoded[decoded.len() - 31].0 > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_live_streams() {
        let config = test_config();
        let probes = Probes::new();
        let (transport, inbound) = LoopbackTransport::new(256, 0.0);

        let (session, _outputs) = MediaSession::start(
            &config,
            probes.codecs(),
            transport,
            inbound,
            CaptureClock::new(),
        )
        .await
        .unwrap();

        session
            .attach_video(synthetic_frames(0, 30.0, 800, Duration::from_secs(3600)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let stats = session.shutdown().await.unwrap();
        assert!(stats.video_encode.frames_submitted > 0);
        assert!(stats.video_encode.frames_submitted < 3600 * 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_counts_unknown_tracks() {
        let config = test_config();
        let probes = Probes::new();
        let (transport, _loopback_inbound) = LoopbackTransport::new(8, 0.0);
        let (inbound_tx, inbound_rx) = mpsc::channel(8);

        let (session, _outputs) = MediaSession::start(
            &config,
            probes.codecs(),
            transport,
            inbound_rx,
            CaptureClock::new(),
        )
        .await
        .unwrap();

        for track_alias in [99, config.video.track_alias] {
            inbound_tx
                .send(InboundObject {
                    track_alias,
                    epoch: 1,
                    group_id: 1,
                    object_id: 4,
                    payload: Bytes::new(),
                    status: ObjectStatus::EndOfGroup,
                })
                .await
                .unwrap();
        }

        let stats = session.finish().await.unwrap();
        assert_eq!(stats.unknown_track_objects, 1);
        assert_eq!(stats.routed_objects, 1);
        assert_eq!(stats.video_decode.control_objects_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_codec_is_reported() {
        let config = test_config();
        let probes = Probes::new();
        probes.video_encoder.set_unsupported("avc1.42001f");
        let (transport, inbound) = LoopbackTransport::new(8, 0.0);

        let (session, mut outputs) = MediaSession::start(
            &config,
            probes.codecs(),
            transport,
            inbound,
            CaptureClock::new(),
        )
        .await
        .unwrap();

        match outputs.events.recv().await {
            Some(PipelineEvent::ConfigError { media, reason, config }) => {
                assert_eq!(media, MediaKind::Video);
                assert_eq!(reason, ConfigErrorReason::Unsupported);
                assert_eq!(config.codec, "avc1.42001f");
            }
            other => panic!("Expected ConfigError, got {:?}", other),
        }

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.audio.jitter_capacity = 0;
        let (transport, inbound) = LoopbackTransport::new(8, 0.0);

        let result = MediaSession::start(
            &config,
            Probes::new().codecs(),
            transport,
            inbound,
            CaptureClock::new(),
        )
        .await;
        assert!(result.is_err());
    }
}
