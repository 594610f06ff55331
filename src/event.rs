// 信令事件总线
// 发布即忘：消息/通知处理后对外广播，无人订阅时静默丢弃

use crate::device::Device;
use crate::manscdp::Alarm;
use std::sync::Arc;
use tokio::sync::broadcast;

/// 对外广播的信令事件
#[derive(Debug, Clone)]
pub enum SignalEvent {
    /// MESSAGE 处理产生的事件（Keepalive / Alarm）
    Message {
        cmd_type: String,
        device: Arc<Device>,
        alarm: Option<Alarm>,
    },
    /// NOTIFY 处理产生的事件（Catalog / MobilePosition / Alarm）
    Notify {
        cmd_type: String,
        device: Arc<Device>,
    },
}

impl SignalEvent {
    pub fn device(&self) -> &Arc<Device> {
        match self {
            SignalEvent::Message { device, .. } => device,
            SignalEvent::Notify { device, .. } => device,
        }
    }

    pub fn cmd_type(&self) -> &str {
        match self {
            SignalEvent::Message { cmd_type, .. } => cmd_type,
            SignalEvent::Notify { cmd_type, .. } => cmd_type,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SignalEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SignalEvent) {
        // 没有订阅者不算错误
        let _ = self.sender.send(event);
    }
}
