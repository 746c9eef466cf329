// 时间基准与码率统计
//
// - `CaptureClock`: 单调不回退的微秒时间线，用于采集时间戳与延迟计算
// - `BitrateMeter`: 按1秒滚动窗口统计吞吐量，仅用于监测

pub mod bitrate;
pub mod clock;

pub use bitrate::{BitrateMeter, BitrateSample};
pub use clock::CaptureClock;
