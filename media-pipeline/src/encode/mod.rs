// 编码管线
//
// - `GroupCursor`: 组/子组/对象编号分配
// - `PendingCaptureTimestamps`: 编码输出时间戳 → 采集时间戳的有界映射
// - `EncodePipeline`: 驱动编码器、分配传输编号、发送组结束标记、队列深度背压

pub mod capture;
pub mod cursor;
pub mod pipeline;

pub use capture::{PendingCaptureTimestamps, PENDING_CAPTURE_CAPACITY};
pub use cursor::{ClosedGroup, GroupCursor, ObjectPosition};
pub use pipeline::{
    EncodeCommand, EncodePipeline, EncodeSettings, EncodeState, EncodeStats, FrameStream,
};
