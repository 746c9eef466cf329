// 回环传输
//
// 将发出的对象直接转成接收端对象，可按概率交换相邻对象的顺序以模拟乱序到达。

use super::ObjectSender;
use async_trait::async_trait;
use common::{GroupHeader, InboundObject, OutboundObject, TransportError};
use rand::Rng;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Clone)]
pub struct LoopbackTransport {
    inbound: mpsc::Sender<InboundObject>,
    reorder_probability: f64,
    /// 被暂扣、等待与下一个对象交换顺序的对象
    held: Arc<Mutex<Option<InboundObject>>>,
}

impl LoopbackTransport {
    /// 创建回环传输，返回接收端
    ///
    /// # 参数
    ///
    /// * `buffer` - 接收通道容量
    /// * `reorder_probability` - 交换相邻对象顺序的概率（0.0-1.0）
    pub fn new(buffer: usize, reorder_probability: f64) -> (Self, mpsc::Receiver<InboundObject>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let transport = Self {
            inbound: tx,
            reorder_probability: reorder_probability.clamp(0.0, 1.0),
            held: Arc::new(Mutex::new(None)),
        };
        (transport, rx)
    }

    fn take_held(&self) -> Option<InboundObject> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// 尝试暂扣对象；已有暂扣对象时返回原对象
    fn try_hold(&self, object: InboundObject) -> Option<InboundObject> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if held.is_some() {
            return Some(object);
        }
        *held = Some(object);
        None
    }

    async fn deliver(&self, object: InboundObject) -> Result<(), TransportError> {
        self.inbound
            .send(object)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl ObjectSender for LoopbackTransport {
    async fn send_group_header(&self, header: GroupHeader) -> Result<(), TransportError> {
        trace!(
            "Loopback group header: track={} group={} subgroup={} priority={}",
            header.track_alias,
            header.group_id,
            header.subgroup_id,
            header.priority
        );
        if self.inbound.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn send_object(&self, object: OutboundObject) -> Result<(), TransportError> {
        // 按线上字段重建对象，状态码在此校验
        let status_code = object.status_code();
        let object = InboundObject::from_wire(
            object.track_alias,
            object.epoch,
            object.group_id,
            object.object_id,
            status_code,
            object.payload,
        )
        .map_err(|e| TransportError::SendFailed {
            message: e.to_string(),
        })?;

        let reorder = self.reorder_probability > 0.0
            && rand::thread_rng().gen_bool(self.reorder_probability);
        let object = if reorder {
            match self.try_hold(object) {
                None => return Ok(()),
                Some(object) => object,
            }
        } else {
            object
        };

        self.deliver(object).await?;

        if let Some(held) = self.take_held() {
            debug!(
                "Loopback delivering held object ({}, {}) out of order",
                held.group_id, held.object_id
            );
            self.deliver(held).await?;
        }
        Ok(())
    }

    /// 发出被暂扣的对象
    async fn flush(&self) -> Result<(), TransportError> {
        if let Some(held) = self.take_held() {
            debug!(
                "Loopback flushing held object ({}, {})",
                held.group_id, held.object_id
            );
            self.deliver(held).await?;
        }
        Ok(())
    }
}
