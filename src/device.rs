// 设备模型与注册表
// 设备记录归注册表独占所有；分发器按请求取引用，同一设备的并发写按
// 最后写入生效处理，通道表用并发容器，时间戳只单调前进

use crate::manscdp::{ChannelInfo, ChannelNotifyItem, DeviceInfoBody};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// 设备生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceStatus {
    /// 注册流程中
    Registering = 0,
    /// 在线
    Online = 1,
    /// 离线
    Offline = 2,
    /// 等待恢复（重新注册后、首条会话消息前）
    Recovering = 3,
    /// 已上报报警
    Alarmed = 4,
}

impl DeviceStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DeviceStatus::Online,
            2 => DeviceStatus::Offline,
            3 => DeviceStatus::Recovering,
            4 => DeviceStatus::Alarmed,
            _ => DeviceStatus::Registering,
        }
    }
}

/// 设备基础信息（DeviceInfo 应答回填）
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub owner: String,
}

/// GPS 定位
#[derive(Debug, Clone, Default)]
pub struct DevicePosition {
    pub device_id: String,
    pub time: String,
    pub longitude: f64,
    pub latitude: f64,
}

/// 订阅类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeType {
    Catalog,
    Position,
}

/// 在途订阅标记，用于避免重复下发订阅
#[derive(Debug, Clone)]
pub struct Subscription {
    pub call_id: String,
    pub expires_at: DateTime<Utc>,
}

/// GB28181 设备（摄像头/NVR）
#[derive(Debug)]
pub struct Device {
    /// 设备国标编码（20位）
    pub id: String,

    info: RwLock<DeviceInfo>,

    status: AtomicU8,

    /// 注册/最近活动/最近心跳/最近通道同步时间（Unix 毫秒）
    register_time: AtomicI64,
    update_time: AtomicI64,
    keepalive_time: AtomicI64,
    last_sync_time: AtomicI64,

    /// 出站查询序列号
    sn: AtomicU32,

    /// 通道表（channel_id -> ChannelInfo）
    pub channels: DashMap<String, ChannelInfo>,

    /// 最近 GPS 定位及其时间
    position: RwLock<DevicePosition>,
    gps_time: AtomicI64,

    /// 设备注册来源地址
    addr: RwLock<SocketAddr>,

    subscriptions: DashMap<SubscribeType, Subscription>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl Device {
    pub fn new(id: String, addr: SocketAddr) -> Self {
        let now = now_ms();
        Self {
            id,
            info: RwLock::new(DeviceInfo::default()),
            status: AtomicU8::new(DeviceStatus::Registering as u8),
            register_time: AtomicI64::new(now),
            update_time: AtomicI64::new(now),
            keepalive_time: AtomicI64::new(0),
            last_sync_time: AtomicI64::new(0),
            sn: AtomicU32::new(0),
            channels: DashMap::new(),
            position: RwLock::new(DevicePosition::default()),
            gps_time: AtomicI64::new(0),
            addr: RwLock::new(addr),
            subscriptions: DashMap::new(),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: DeviceStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    pub fn addr(&self) -> SocketAddr {
        *self.addr.read().unwrap()
    }

    pub fn set_addr(&self, addr: SocketAddr) {
        *self.addr.write().unwrap() = addr;
    }

    pub fn info(&self) -> DeviceInfo {
        self.info.read().unwrap().clone()
    }

    /// DeviceInfo 应答回填主设备信息
    pub fn set_device_info(&self, body: &DeviceInfoBody) {
        let mut info = self.info.write().unwrap();
        info.name = body.device_name.clone();
        info.manufacturer = body.manufacturer.clone();
        info.model = body.model.clone();
        info.firmware = body.firmware.clone();
    }

    /// 最近活动时间只前进不后退
    pub fn touch_update(&self) {
        self.update_time.fetch_max(now_ms(), Ordering::Relaxed);
    }

    pub fn touch_keepalive(&self) {
        let now = now_ms();
        self.keepalive_time.fetch_max(now, Ordering::Relaxed);
        self.update_time.fetch_max(now, Ordering::Relaxed);
    }

    pub fn update_time(&self) -> DateTime<Utc> {
        ms_to_datetime(self.update_time.load(Ordering::Relaxed))
    }

    pub fn keepalive_time(&self) -> DateTime<Utc> {
        ms_to_datetime(self.keepalive_time.load(Ordering::Relaxed))
    }

    pub fn register_time(&self) -> DateTime<Utc> {
        ms_to_datetime(self.register_time.load(Ordering::Relaxed))
    }

    /// 是否从未做过通道同步
    pub fn never_synced(&self) -> bool {
        self.last_sync_time.load(Ordering::Acquire) == 0
    }

    /// 通道同步去抖：窗口内只允许通过一次
    /// CAS 保证并发心跳下同一窗口只有一个赢家
    pub fn should_sync(&self, window: Duration) -> bool {
        let now = now_ms();
        let last = self.last_sync_time.load(Ordering::Acquire);
        if now.saturating_sub(last) <= window.as_millis() as i64 {
            return false;
        }
        self.last_sync_time
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 出站查询序列号，单调递增
    pub fn next_sn(&self) -> u32 {
        self.sn.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn sn(&self) -> u32 {
        self.sn.load(Ordering::Relaxed)
    }

    /// Catalog 应答：按通道编码插入或整体替换
    pub fn update_channels(&self, items: Vec<ChannelInfo>) {
        for item in items {
            if item.device_id.is_empty() {
                continue;
            }
            tracing::debug!(
                target: "gbsip::device",
                device_id = %self.id,
                channel_id = %item.device_id,
                name = %item.name,
                "channel updated"
            );
            self.channels.insert(item.device_id.clone(), item);
        }
    }

    /// 目录订阅通知：按 Event 增删改通道或翻转状态
    pub fn update_channel_status(&self, items: Vec<ChannelNotifyItem>) {
        for item in items {
            if item.device_id.is_empty() {
                continue;
            }
            match item.event.as_str() {
                "DEL" => {
                    self.channels.remove(&item.device_id);
                }
                // 部分设备不带 Event，按更新处理
                "ADD" | "UPDATE" | "" => {
                    let info = ChannelInfo {
                        device_id: item.device_id.clone(),
                        name: item.name,
                        manufacturer: item.manufacturer,
                        model: item.model,
                        owner: item.owner,
                        civil_code: item.civil_code,
                        address: item.address,
                        parental: item.parental,
                        parent_id: item.parent_id,
                        safety_way: item.safety_way,
                        register_way: item.register_way,
                        secrecy: item.secrecy,
                        status: item.status,
                        longitude: None,
                        latitude: None,
                    };
                    self.channels.insert(item.device_id.clone(), info);
                }
                // ON/OFF/VLOST/DEFECT：已知通道只改状态，未知通道忽略
                event => {
                    if let Some(mut channel) = self.channels.get_mut(&item.device_id) {
                        channel.status = event.to_string();
                    } else {
                        tracing::debug!(
                            target: "gbsip::device",
                            device_id = %self.id,
                            channel_id = %item.device_id,
                            event = %event,
                            "status event for unknown channel"
                        );
                    }
                }
            }
        }
    }

    /// 位置上报：编码等于设备本身时更新设备定位，否则更新对应通道坐标
    pub fn update_channel_position(&self, channel_id: &str, time: &str, longitude: &str, latitude: &str) {
        let (Ok(lon), Ok(lat)) = (longitude.parse::<f64>(), latitude.parse::<f64>()) else {
            tracing::warn!(
                target: "gbsip::device",
                device_id = %self.id,
                longitude = %longitude,
                latitude = %latitude,
                "unparseable position"
            );
            return;
        };

        // 新鲜度按收到时间计，设备时钟不可信
        self.gps_time.fetch_max(now_ms(), Ordering::Relaxed);

        if channel_id == self.id || channel_id.is_empty() {
            let mut position = self.position.write().unwrap();
            position.device_id = self.id.clone();
            position.time = time.to_string();
            position.longitude = lon;
            position.latitude = lat;
        } else if let Some(mut channel) = self.channels.get_mut(channel_id) {
            channel.longitude = Some(lon);
            channel.latitude = Some(lat);
        }
    }

    pub fn position(&self) -> DevicePosition {
        self.position.read().unwrap().clone()
    }

    /// 最近一次定位距今时长；从未定位时视为无限陈旧
    pub fn gps_age(&self) -> Duration {
        let ms = now_ms().saturating_sub(self.gps_time.load(Ordering::Relaxed));
        Duration::from_millis(ms.max(0) as u64)
    }

    /// 申请发起订阅：已有未过期订阅时返回 None，否则登记新标记并
    /// 返回用于订阅请求的 call_id
    pub fn begin_subscription(&self, kind: SubscribeType, expires: u32) -> Option<String> {
        let now = Utc::now();
        let entry = self.subscriptions.entry(kind);
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                if e.get().expires_at > now {
                    return None;
                }
                let sub = new_subscription(expires);
                let call_id = sub.call_id.clone();
                e.insert(sub);
                Some(call_id)
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let sub = new_subscription(expires);
                let call_id = sub.call_id.clone();
                e.insert(sub);
                Some(call_id)
            }
        }
    }
}

fn new_subscription(expires: u32) -> Subscription {
    Subscription {
        call_id: crate::auth::rand_num_string(16),
        expires_at: Utc::now() + chrono::Duration::seconds(expires as i64),
    }
}

/// 设备注册表：并发 KV 存储，load / store / load_or_store /
/// load_and_delete / delete 都是原子操作
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    pub fn load(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id).map(|d| d.clone())
    }

    pub fn store(&self, device: Arc<Device>) {
        self.devices.insert(device.id.clone(), device);
    }

    /// 已存在则返回现有记录，否则存入给定记录；并发注册只会留下一个赢家
    pub fn load_or_store(&self, device: Arc<Device>) -> Arc<Device> {
        self.devices
            .entry(device.id.clone())
            .or_insert(device)
            .clone()
    }

    pub fn load_and_delete(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.remove(id).map(|(_, d)| d)
    }

    pub fn delete(&self, id: &str) -> bool {
        self.devices.remove(id).is_some()
    }

    pub fn list(&self) -> Vec<Arc<Device>> {
        self.devices.iter().map(|d| d.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
