// 解码管线
//
// 传输层收到的对象先进入抖动缓冲区，播放定时器每个节拍最多取出一个条目交给解码器。
// 解码器重建或出错后重新等待关键帧。

pub mod pipeline;

pub use pipeline::{
    DecodeCommand, DecodePipeline, DecodeSettings, DecodeState, DecodeStats, RenderedFrame,
};
