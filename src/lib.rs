// gbsip: GB28181 国标信令层核心库
//
// 架构设计：
// - 只做信令：注册鉴权、设备生命周期、MANSCDP 指令编解码、PTZ 控制指令
// - 传输层（SIP 解析/事务）、媒体面（RTP/PS）、持久化均通过窄接口注入
// - 每条入站请求独立调度，设备注册表为并发 KV 存储

pub mod error;
pub mod config;
pub mod transport;
pub mod auth;
pub mod device;
pub mod manscdp;
pub mod ptz;
pub mod event;
pub mod dispatch;

// 重新导出常用类型
pub use config::{InviteMode, PositionConfig, SignalConfig};
pub use device::{Device, DeviceRegistry, DeviceStatus};
pub use dispatch::{Dispatcher, InviteGateway, RecordSink};
pub use error::{Result, SignalError};
pub use event::{EventBus, SignalEvent};
pub use transport::{
    InboundRequest, OutboundSender, ServerTransaction, SipMethod, SipResponse,
};
