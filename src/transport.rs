// SIP 传输层边界
// 报文解析、事务管理由外部传输层完成，这里只定义交接的数据类型和窄接口

use crate::device::Device;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// SIP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipMethod {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Message,
    Subscribe,
    Notify,
    Info,
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMethod::Register => write!(f, "REGISTER"),
            SipMethod::Invite => write!(f, "INVITE"),
            SipMethod::Ack => write!(f, "ACK"),
            SipMethod::Bye => write!(f, "BYE"),
            SipMethod::Cancel => write!(f, "CANCEL"),
            SipMethod::Message => write!(f, "MESSAGE"),
            SipMethod::Subscribe => write!(f, "SUBSCRIBE"),
            SipMethod::Notify => write!(f, "NOTIFY"),
            SipMethod::Info => write!(f, "INFO"),
        }
    }
}

impl SipMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(SipMethod::Register),
            "INVITE" => Some(SipMethod::Invite),
            "ACK" => Some(SipMethod::Ack),
            "BYE" => Some(SipMethod::Bye),
            "CANCEL" => Some(SipMethod::Cancel),
            "MESSAGE" => Some(SipMethod::Message),
            "SUBSCRIBE" => Some(SipMethod::Subscribe),
            "NOTIFY" => Some(SipMethod::Notify),
            "INFO" => Some(SipMethod::Info),
            _ => None,
        }
    }
}

/// 传输层交付的已解析入站请求
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: SipMethod,
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

impl InboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// 从 From 头部提取设备国标编码（sip:ID@domain 的 user 部分）
    pub fn from_user(&self) -> Option<&str> {
        let from = self.header("From")?;
        let start = from.find("sip:")? + 4;
        let end = from[start..].find('@')?;
        Some(&from[start..start + end])
    }

    /// 消息体的尽力而为字符串视图，仅用于日志
    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// SIP 响应（状态行 + 头部覆盖 + 可选消息体）
/// 其余头部（Via/From/Call-ID/CSeq 等）由传输层从请求复制
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub status_code: u16,
    pub reason_phrase: String,
    /// To 头部 tag 参数覆盖
    pub to_tag: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl SipResponse {
    pub fn new(status_code: u16, reason_phrase: &str) -> Self {
        Self {
            status_code,
            reason_phrase: reason_phrase.to_string(),
            to_tag: None,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn add_header(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_string(), value);
    }

    pub fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }
}

/// 服务端事务：每条入站请求配一个应答通道，只应答一次
#[async_trait]
pub trait ServerTransaction: Send + Sync {
    async fn respond(&self, response: SipResponse) -> Result<()>;
}

/// 出站信令发送：对设备发起 MESSAGE 查询 / SUBSCRIBE 订阅
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// 发送 MANSCDP MESSAGE 查询
    async fn send_message(&self, device: &Device, body: String) -> Result<()>;

    /// 发送 SUBSCRIBE 订阅，call_id 用于订阅去重标记
    async fn send_subscribe(
        &self,
        device: &Device,
        call_id: &str,
        expires: u32,
        body: String,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_from(from: &str) -> InboundRequest {
        let mut headers = HashMap::new();
        headers.insert("From".to_string(), from.to_string());
        InboundRequest {
            method: SipMethod::Message,
            uri: "sip:34020000002000000001@3402000000".to_string(),
            headers,
            body: Bytes::new(),
            source: "192.168.1.100:5060".parse().unwrap(),
            destination: "192.168.1.1:5060".parse().unwrap(),
        }
    }

    #[test]
    fn test_from_user_extraction() {
        let req = request_with_from("<sip:34020000001320000001@3402000000>;tag=123");
        assert_eq!(req.from_user(), Some("34020000001320000001"));
    }

    #[test]
    fn test_from_user_missing() {
        let req = request_with_from("garbage");
        assert_eq!(req.from_user(), None);
    }

    #[test]
    fn test_method_roundtrip() {
        assert_eq!(SipMethod::parse("REGISTER"), Some(SipMethod::Register));
        assert_eq!(SipMethod::parse("SUBSCRIBE"), Some(SipMethod::Subscribe));
        assert_eq!(SipMethod::parse("PUBLISH"), None);
        assert_eq!(SipMethod::Message.to_string(), "MESSAGE");
    }
}
