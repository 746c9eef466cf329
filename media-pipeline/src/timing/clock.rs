// 采集时钟实现
//
// 将本地单调时钟转换为稳定的微秒时间线。

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// 采集时钟
///
/// 基于单调时钟加原点偏移量生成微秒时间戳。可廉价克隆，
/// 克隆体共享同一时间线。`now()` 保证不回退，即使 `resync()` 把偏移量调小。
#[derive(Debug, Clone)]
pub struct CaptureClock {
    inner: Arc<ClockInner>,
}

#[derive(Debug)]
struct ClockInner {
    /// 单调时钟原点
    origin: Instant,
    /// 原点偏移量（微秒）
    offset_us: AtomicI64,
    /// 已发布的最大时间戳（微秒）
    last_us: AtomicU64,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    /// 创建带初始偏移量的时钟
    ///
    /// # 参数
    ///
    /// * `offset_us` - 原点对应的时间戳（微秒）
    pub fn with_offset(offset_us: i64) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                origin: Instant::now(),
                offset_us: AtomicI64::new(offset_us),
                last_us: AtomicU64::new(0),
            }),
        }
    }

    /// 当前时间戳（微秒）
    pub fn now(&self) -> u64 {
        let raw = self.raw_now();
        let previous = self.inner.last_us.fetch_max(raw, Ordering::AcqRel);
        previous.max(raw)
    }

    /// 从采集时间戳计算延迟（微秒）
    ///
    /// 时钟偏差下可能为负值，调用方只做上报。
    pub fn latency_from(&self, capture_us: u64) -> i64 {
        self.now() as i64 - capture_us as i64
    }

    /// 重新同步到参考时间戳
    ///
    /// 调整偏移量使当前时刻映射到 `reference_us`。若参考时间早于已发布的时间戳，
    /// `now()` 会保持在已发布值直到时间线追上。
    pub fn resync(&self, reference_us: u64) {
        let elapsed = self.elapsed_us();
        let new_offset = reference_us as i64 - elapsed;
        let old_offset = self.inner.offset_us.swap(new_offset, Ordering::AcqRel);

        info!(
            "CaptureClock resynced: offset {} -> {} us",
            old_offset, new_offset
        );

        let last = self.inner.last_us.load(Ordering::Acquire);
        if reference_us < last {
            debug!(
                "Resync reference {} us is behind published {} us, holding",
                reference_us, last
            );
        }
    }

    fn elapsed_us(&self) -> i64 {
        self.inner.origin.elapsed().as_micros() as i64
    }

    fn raw_now(&self) -> u64 {
        let offset = self.inner.offset_us.load(Ordering::Acquire);
        (self.elapsed_us() + offset).max(0) as u64
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}
