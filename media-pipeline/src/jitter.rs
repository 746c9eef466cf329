// 抖动缓冲区实现
//
// 按 (group_id, sequence_id) 排序的延迟门控缓冲区：乱序到达的对象在此重排，
// 条目在缓冲区中停留至少 `min_delay` 后才按顺序放出。
// 纯数据结构，所有操作都不阻塞。

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 缓冲条目
#[derive(Debug, Clone, PartialEq)]
pub struct BufferEntry<T> {
    pub group_id: u64,
    pub sequence_id: u64,
    pub enqueued_at: Instant,
    pub payload: T,
}

impl<T> BufferEntry<T> {
    /// 排序键：组ID为主键，序号为次键
    pub fn key(&self) -> (u64, u64) {
        (self.group_id, self.sequence_id)
    }
}

/// 插入结果
#[derive(Debug, PartialEq)]
pub enum PushOutcome<T> {
    /// 已入缓冲
    Buffered,
    /// 已入缓冲，但超出容量，最旧条目被挤出
    Evicted(BufferEntry<T>),
    /// 排序早于已放出的条目，直接丢弃
    Late,
}

/// 抖动缓冲区
///
/// # 不变量
///
/// - 条目始终按 `(group_id, sequence_id)` 升序排列，键相同时保持到达顺序（不去重）
/// - `len() <= capacity`，超出时丢弃最前面（最旧）的条目，记为溢出丢弃
/// - 连续 `pop()` 返回的键单调不减；早于上次放出键的迟到条目会被丢弃
pub struct JitterBuffer<T> {
    entries: VecDeque<BufferEntry<T>>,
    capacity: usize,
    min_delay: Duration,
    last_released: Option<(u64, u64)>,
    overflow_drops: u64,
    late_drops: u64,
}

impl<T> JitterBuffer<T> {
    /// 创建抖动缓冲区
    ///
    /// # 参数
    ///
    /// * `capacity` - 最大条目数（最小为1）
    /// * `min_delay` - 条目放出前的最小停留时间
    pub fn new(capacity: usize, min_delay: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            min_delay,
            last_released: None,
            overflow_drops: 0,
            late_drops: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 因容量不足被挤出的条目数
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops
    }

    /// 因迟到被丢弃的条目数
    pub fn late_drops(&self) -> u64 {
        self.late_drops
    }

    /// 最早的条目
    pub fn peek(&self) -> Option<&BufferEntry<T>> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferEntry<T>> {
        self.entries.iter()
    }

    pub fn push(&mut self, group_id: u64, sequence_id: u64, payload: T) -> PushOutcome<T> {
        self.push_at(Instant::now(), group_id, sequence_id, payload)
    }

    /// 在指定时刻插入条目
    ///
    /// 插入位置从最新条目向前查找，近似单调到达时为 O(1)。
    pub fn push_at(
        &mut self,
        now: Instant,
        group_id: u64,
        sequence_id: u64,
        payload: T,
    ) -> PushOutcome<T> {
        let key = (group_id, sequence_id);

        if let Some(released) = self.last_released {
            if key < released {
                self.late_drops += 1;
                debug!(
                    "Dropping late entry ({}, {}), already released ({}, {})",
                    group_id, sequence_id, released.0, released.1
                );
                return PushOutcome::Late;
            }
        }

        let mut index = self.entries.len();
        while index > 0 && self.entries[index - 1].key() > key {
            index -= 1;
        }

        self.entries.insert(
            index,
            BufferEntry {
                group_id,
                sequence_id,
                enqueued_at: now,
                payload,
            },
        );

        if self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.overflow_drops += 1;
                debug!(
                    "Jitter buffer overflow, evicted ({}, {}) (total drops: {})",
                    evicted.group_id, evicted.sequence_id, self.overflow_drops
                );
                return PushOutcome::Evicted(evicted);
            }
        }

        PushOutcome::Buffered
    }

    pub fn pop(&mut self) -> Option<BufferEntry<T>> {
        self.pop_at(Instant::now())
    }

    /// 在指定时刻取出最早条目
    ///
    /// 最早条目停留不足 `min_delay` 时返回 `None`。
    pub fn pop_at(&mut self, now: Instant) -> Option<BufferEntry<T>> {
        let front = self.entries.front()?;
        if now.saturating_duration_since(front.enqueued_at) < self.min_delay {
            return None;
        }

        let entry = self.entries.pop_front()?;
        self.last_released = Some(entry.key());
        Some(entry)
    }

    /// 清空缓冲区并重置放出位置
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_released = None;
    }
}
