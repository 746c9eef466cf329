// 传输层接口
//
// 本核心只依赖传输层的两个发送操作；帧格式、拥塞控制和会话协商由外部协议层负责。

pub mod loopback;

use async_trait::async_trait;
use common::{GroupHeader, OutboundObject, TransportError};
use std::sync::Arc;

pub use loopback::LoopbackTransport;

/// 对象发送接口
#[async_trait]
pub trait ObjectSender: Send + Sync + 'static {
    /// 发送组头（每个 group/subgroup 只发一次）
    async fn send_group_header(&self, header: GroupHeader) -> Result<(), TransportError>;

    /// 发送对象
    async fn send_object(&self, object: OutboundObject) -> Result<(), TransportError>;

    /// 采集序列结束时调用，发出仍在发送端暂存的对象
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl<T: ObjectSender + ?Sized> ObjectSender for Arc<T> {
    async fn send_group_header(&self, header: GroupHeader) -> Result<(), TransportError> {
        (**self).send_group_header(header).await
    }

    async fn send_object(&self, object: OutboundObject) -> Result<(), TransportError> {
        (**self).send_object(object).await
    }

    async fn flush(&self) -> Result<(), TransportError> {
        (**self).flush().await
    }
}
