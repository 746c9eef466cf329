// 码率统计
//
// 1秒滚动窗口的字节计数器，仅用于监测，不参与码率控制。

use common::{MediaKind, PipelineEvent};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 统计窗口长度
const WINDOW: Duration = Duration::from_secs(1);

/// 码率采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateSample {
    pub media: MediaKind,
    pub mbps: f64,
}

impl BitrateSample {
    pub fn kbps(&self) -> f64 {
        self.mbps * 1000.0
    }

    pub fn into_event(self) -> PipelineEvent {
        PipelineEvent::Bitrate {
            media: self.media,
            kbps: self.kbps(),
        }
    }
}

/// 码率计
///
/// 窗口按墙钟差值推进而不是固定节拍：长时间无数据时不会产生空采样，
/// 下一次 `add_bytes` 才会结束当前窗口。
#[derive(Debug)]
pub struct BitrateMeter {
    media: MediaKind,
    window_start: Instant,
    window_bytes: u64,
}

impl BitrateMeter {
    pub fn new(media: MediaKind) -> Self {
        Self::starting_at(media, Instant::now())
    }

    pub fn starting_at(media: MediaKind, start: Instant) -> Self {
        Self {
            media,
            window_start: start,
            window_bytes: 0,
        }
    }

    /// 累加字节数，窗口满1秒时返回采样
    pub fn add_bytes(&mut self, bytes: usize) -> Option<BitrateSample> {
        self.add_bytes_at(Instant::now(), bytes)
    }

    pub fn add_bytes_at(&mut self, now: Instant, bytes: usize) -> Option<BitrateSample> {
        self.window_bytes += bytes as u64;

        if now.saturating_duration_since(self.window_start) < WINDOW {
            return None;
        }

        let sample = BitrateSample {
            media: self.media,
            mbps: (self.window_bytes * 8) as f64 / 1e6,
        };

        debug!(
            "{} bitrate: {:.3} Mbps ({} bytes in window)",
            self.media, sample.mbps, self.window_bytes
        );

        self.window_bytes = 0;
        self.window_start = now;
        Some(sample)
    }

    /// 当前窗口累计字节数
    pub fn pending_bytes(&self) -> u64 {
        self.window_bytes
    }

    pub fn reset(&mut self) {
        self.window_bytes = 0;
        self.window_start = Instant::now();
    }
}
