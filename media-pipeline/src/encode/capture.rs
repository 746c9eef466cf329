// 采集时间戳关联
//
// 编码器异步输出，用原生时间戳把编码块对回采集时刻以计算采集到编码的延迟。

use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

/// 默认容量
pub const PENDING_CAPTURE_CAPACITY: usize = 1024;

/// 待关联的采集时间戳
///
/// 有界映射，满时按插入顺序淘汰最旧条目。只插入和取出、从不读取，
/// 因此 LRU 淘汰顺序即 FIFO。每个条目最多被取出一次。
pub struct PendingCaptureTimestamps {
    entries: LruCache<i64, u64>,
    evicted: u64,
}

impl PendingCaptureTimestamps {
    pub fn new() -> Self {
        Self::with_capacity(PENDING_CAPTURE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            evicted: 0,
        }
    }

    /// 记录帧的采集时间戳
    ///
    /// # 参数
    ///
    /// * `frame_timestamp` - 帧原生时间戳（编码输出沿用该值）
    /// * `capture_us` - 采集时钟读数（微秒）
    pub fn record(&mut self, frame_timestamp: i64, capture_us: u64) {
        if let Some((old_timestamp, _)) = self.entries.push(frame_timestamp, capture_us) {
            if old_timestamp != frame_timestamp {
                self.evicted += 1;
                debug!(
                    "Pending capture timestamp {} evicted (total evicted: {})",
                    old_timestamp, self.evicted
                );
            }
        }
    }

    /// 取出并移除关联的采集时间戳
    pub fn take(&mut self, frame_timestamp: i64) -> Option<u64> {
        self.entries.pop(&frame_timestamp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for PendingCaptureTimestamps {
    fn default() -> Self {
        Self::new()
    }
}
