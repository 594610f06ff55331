// 信令分发器
// 每类入站请求一个入口：REGISTER 鉴权与生命周期、MESSAGE 按 CmdType
// 路由、BYE 应答、NOTIFY 订阅通知。通道同步作为后台任务调度，不阻塞应答

use crate::auth::{rand_num_string, AuthChallenges, Authorization};
use crate::config::{InviteMode, SignalConfig};
use crate::device::{Device, DeviceRegistry, DeviceStatus, SubscribeType};
use crate::error::{Result, SignalError};
use crate::event::{EventBus, SignalEvent};
use crate::manscdp::{
    self, Alarm, CatalogBody, ChannelInfo, DeviceInfoBody, Envelope, NotifyBody, Record,
    RecordInfoBody,
};
use crate::transport::{InboundRequest, OutboundSender, ServerTransaction, SipResponse};
use chrono::Local;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// 注册应答 Date 头部格式
const TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// 注册应答固定有效期（秒）
const REGISTER_EXPIRES: u32 = 3600;

/// 目录/报警订阅有效期（秒）
const SUBSCRIBE_EXPIRES: u32 = 3600;

/// 录像索引消费方：RecordInfo 结果分片交付，凭 SN 与 SumNum 聚合
pub trait RecordSink: Send + Sync {
    fn put(&self, device_id: &str, channel_id: &str, sn: u32, sum_num: u32, records: Vec<Record>);
}

/// 自动点播触发，由媒体面实现
pub trait InviteGateway: Send + Sync {
    fn try_auto_invite(&self, device: &Device, channel: &ChannelInfo);
}

/// GB28181 信令分发器
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<SignalConfig>,
    registry: Arc<DeviceRegistry>,
    challenges: Arc<AuthChallenges>,
    events: EventBus,
    outbound: Arc<dyn OutboundSender>,
    records: Arc<dyn RecordSink>,
    invites: Arc<dyn InviteGateway>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<SignalConfig>,
        registry: Arc<DeviceRegistry>,
        outbound: Arc<dyn OutboundSender>,
        records: Arc<dyn RecordSink>,
        invites: Arc<dyn InviteGateway>,
    ) -> Self {
        Self {
            config,
            registry,
            challenges: Arc::new(AuthChallenges::new()),
            events: EventBus::new(64),
            outbound,
            records,
            invites,
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// 挑战状态表，供外部维护流程清除失败计数
    pub fn challenges(&self) -> &AuthChallenges {
        &self.challenges
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 处理 REGISTER：注册、注销、Digest 鉴权
    pub async fn on_register(
        &self,
        req: &InboundRequest,
        tx: &dyn ServerTransaction,
    ) -> Result<()> {
        let Some(id) = req.from_user().map(str::to_string) else {
            tracing::error!(target: "gbsip::dispatch", source = %req.source, "register without device id");
            return Ok(());
        };

        tracing::debug!(
            target: "gbsip::dispatch",
            device_id = %id,
            source = %req.source,
            "SIP<-REGISTER"
        );

        // Expires 缺失或非法的流量无法归属协议行为，直接丢弃不应答
        let is_unregister = match req.header("Expires") {
            Some(value) => match value.trim().parse::<i64>() {
                Ok(seconds) => seconds == 0,
                Err(_) => {
                    tracing::info!(
                        target: "gbsip::dispatch",
                        device_id = %id,
                        expires = %value,
                        "wrong expires header value"
                    );
                    return Ok(());
                }
            },
            None => {
                tracing::info!(
                    target: "gbsip::dispatch",
                    device_id = %id,
                    source = %req.source,
                    "register has no expires header"
                );
                return Ok(());
            }
        };

        tracing::info!(
            target: "gbsip::dispatch",
            device_id = %id,
            is_unregister = is_unregister,
            source = %req.source,
            destination = %req.destination,
            "register"
        );

        if id.len() != 20 {
            tracing::info!(target: "gbsip::dispatch", device_id = %id, "wrong gb28181 id");
            return Ok(());
        }

        let mut pass_auth = false;
        if self.config.auth_disabled() {
            pass_auth = true;
        } else if let Some(header) = req.header("Authorization") {
            let auth = Authorization::parse(header);

            // 有些摄像头没有配置用户名的地方，用户名就是自己的国标编码
            let username = if auth.username == id {
                id.clone()
            } else {
                self.config.username.clone()
            };

            let (attempts, existed) = self.challenges.register_attempt(&id);
            if existed && attempts > self.config.max_register_count {
                tx.respond(SipResponse::new(403, "Forbidden")).await?;
                return Ok(());
            }

            match self.challenges.stored_nonce(&id) {
                Some(nonce)
                    if auth.verify(
                        &username,
                        &self.config.password,
                        &self.config.realm,
                        &nonce,
                    ) =>
                {
                    pass_auth = true;
                }
                _ => self.challenges.record_failure(&id),
            }
        }

        if pass_auth {
            let device = if is_unregister {
                match self.registry.load_and_delete(&id) {
                    Some(device) => {
                        tracing::info!(target: "gbsip::dispatch", device_id = %id, "unregister device");
                        device
                    }
                    // 未知设备的注销不产生任何动作
                    None => return Ok(()),
                }
            } else {
                match self.registry.load(&id) {
                    Some(device) => {
                        self.recover_for_register(&device, req);
                        device
                    }
                    None => self.store_device(&id, req),
                }
            };

            self.challenges.clear(&id);

            let mut response = SipResponse::new(200, "OK");
            response.to_tag = Some(rand_num_string(9));
            response.add_header("Expires", REGISTER_EXPIRES.to_string());
            response.add_header("Date", Local::now().format(TIME_LAYOUT).to_string());
            tx.respond(response).await?;

            if !is_unregister {
                // 订阅设备更新，不等待结果
                self.spawn_sync(device);
            }
        } else {
            tracing::info!(
                target: "gbsip::dispatch",
                device_id = %id,
                source = %req.source,
                "register unauthorized"
            );
            let nonce = self.challenges.challenge_nonce(&id);
            let mut response = SipResponse::new(401, "Unauthorized");
            response.add_header(
                "WWW-Authenticate",
                format!(
                    r#"Digest realm="{}",algorithm=MD5,nonce="{}""#,
                    self.config.realm, nonce
                ),
            );
            tx.respond(response).await?;
        }

        Ok(())
    }

    /// 处理会话内 MESSAGE：心跳、目录、录像索引、设备信息、报警等
    pub async fn on_message(
        &self,
        req: &InboundRequest,
        tx: &dyn ServerTransaction,
    ) -> Result<()> {
        let Some(id) = req.from_user().map(str::to_string) else {
            tracing::error!(target: "gbsip::dispatch", source = %req.source, "message without device id");
            return Ok(());
        };

        tracing::debug!(
            target: "gbsip::dispatch",
            device_id = %id,
            source = %req.source,
            "SIP<-MESSAGE"
        );

        // 未注册设备的消息不应答，只留痕
        let Some(device) = self.registry.load(&id) else {
            tracing::debug!(
                target: "gbsip::dispatch",
                device_id = %id,
                "unauthorized message, device not found"
            );
            return Ok(());
        };

        match device.status() {
            DeviceStatus::Offline | DeviceStatus::Recovering => {
                self.recover_device(&device, req);
                self.spawn_sync(device.clone());
            }
            DeviceStatus::Registering => device.set_status(DeviceStatus::Online),
            _ => {}
        }
        device.touch_update();

        let envelope: Envelope = self.decode_or_default(&id, &req.body);
        let cmd_type = envelope.cmd_type.clone();

        match cmd_type.as_str() {
            "Keepalive" => {
                device.touch_keepalive();
                if device.never_synced() {
                    self.spawn_sync(device.clone());
                } else if self.config.invite_mode == InviteMode::Auto {
                    for channel in device.channels.iter() {
                        self.invites.try_auto_invite(&device, channel.value());
                    }
                }

                // 定位过期则重新订阅移动位置
                if self.config.position.autosub_position
                    && device.gps_age() > Duration::from_secs(self.config.position.interval * 2)
                {
                    self.subscribe_position(&device).await;
                    tracing::debug!(
                        target: "gbsip::dispatch",
                        device_id = %device.id,
                        "mobile position subscribe"
                    );
                }

                tracing::debug!(target: "gbsip::dispatch", device_id = %device.id, "keepalive");
                self.events.publish(SignalEvent::Message {
                    cmd_type,
                    device: device.clone(),
                    alarm: None,
                });
            }
            "Catalog" => {
                let body: CatalogBody = self.decode_or_default(&id, &req.body);
                device.update_channels(body.device_list.items);
            }
            "RecordInfo" => {
                let body: RecordInfoBody = self.decode_or_default(&id, &req.body);
                tracing::info!(
                    target: "gbsip::dispatch",
                    device_id = %device.id,
                    sn = body.sn,
                    sum_num = body.sum_num,
                    records = body.record_list.items.len(),
                    "record info message"
                );
                self.records.put(
                    &device.id,
                    &body.device_id,
                    body.sn,
                    body.sum_num,
                    body.record_list.items,
                );
            }
            "DeviceInfo" => {
                let body: DeviceInfoBody = self.decode_or_default(&id, &req.body);
                device.set_device_info(&body);
            }
            "Alarm" => {
                device.set_status(DeviceStatus::Alarmed);
                tracing::info!(
                    target: "gbsip::dispatch",
                    device_id = %device.id,
                    body = %req.body_str(),
                    "alarm message"
                );

                let mut response = SipResponse::new(200, "OK");
                response.set_body(manscdp::build_alarm_response(device.sn(), &device.id));
                tx.respond(response).await?;

                // 应答已发出，详情解析失败只记录
                let alarm: Alarm = self.decode_or_default(&id, &req.body);
                self.events.publish(SignalEvent::Message {
                    cmd_type,
                    device: device.clone(),
                    alarm: Some(alarm),
                });
                return Ok(());
            }
            "Broadcast" => {
                tracing::info!(
                    target: "gbsip::dispatch",
                    device_id = %device.id,
                    body = %req.body_str(),
                    "broadcast message"
                );
            }
            "DeviceControl" => {
                tracing::info!(
                    target: "gbsip::dispatch",
                    device_id = %device.id,
                    body = %req.body_str(),
                    "device control message"
                );
            }
            other => {
                tracing::warn!(
                    target: "gbsip::dispatch",
                    device_id = %device.id,
                    cmd_type = %other,
                    "not supported CmdType"
                );
                tx.respond(SipResponse::new(400, "Bad Request")).await?;
                return Ok(());
            }
        }

        tx.respond(SipResponse::new(200, "OK")).await?;
        Ok(())
    }

    /// 处理 BYE：无条件应答
    pub async fn on_bye(&self, _req: &InboundRequest, tx: &dyn ServerTransaction) -> Result<()> {
        tx.respond(SipResponse::new(200, "OK")).await
    }

    /// 处理 NOTIFY：目录状态推送、移动位置上报、报警通知
    pub async fn on_notify(
        &self,
        req: &InboundRequest,
        tx: &dyn ServerTransaction,
    ) -> Result<()> {
        let Some(id) = req.from_user().map(str::to_string) else {
            tracing::error!(target: "gbsip::dispatch", source = %req.source, "notify without device id");
            return Ok(());
        };

        let Some(device) = self.registry.load(&id) else {
            tracing::debug!(
                target: "gbsip::dispatch",
                device_id = %id,
                "notify from unknown device"
            );
            return Ok(());
        };
        device.touch_update();

        let body: NotifyBody = self.decode_or_default(&id, &req.body);
        let cmd_type = body.cmd_type.clone();

        match cmd_type.as_str() {
            "Catalog" => {
                device.update_channel_status(body.device_list.items);
            }
            "MobilePosition" => {
                device.update_channel_position(
                    &body.device_id,
                    &body.time,
                    &body.longitude,
                    &body.latitude,
                );
            }
            "Alarm" => {
                device.set_status(DeviceStatus::Alarmed);
            }
            other => {
                tracing::warn!(
                    target: "gbsip::dispatch",
                    device_id = %device.id,
                    cmd_type = %other,
                    "not supported CmdType"
                );
                tx.respond(SipResponse::new(400, "Bad Request")).await?;
                return Ok(());
            }
        }

        self.events.publish(SignalEvent::Notify {
            cmd_type,
            device: device.clone(),
        });
        tx.respond(SipResponse::new(200, "OK")).await?;
        Ok(())
    }

    /// 同步设备信息与下属通道：目录查询、目录订阅、报警订阅、设备详情。
    /// 按 2 倍心跳间隔去抖，同一窗口内只执行一次
    pub async fn sync_channels(&self, device: &Device) {
        if !device.should_sync(self.config.sync_window()) {
            return;
        }

        tracing::info!(target: "gbsip::dispatch", device_id = %device.id, "sync channels");

        self.send_query(device, manscdp::build_catalog_query(device.next_sn(), &device.id))
            .await;
        self.subscribe_catalog(device).await;
        self.subscribe_alarm(device).await;
        self.send_query(
            device,
            manscdp::build_device_info_query(device.next_sn(), &device.id),
        )
        .await;
    }

    /// 主动发起目录查询
    pub async fn query_catalog(&self, device_id: &str) -> Result<()> {
        let device = self.load_known(device_id)?;
        let xml = manscdp::build_catalog_query(device.next_sn(), &device.id);
        self.outbound.send_message(&device, xml).await
    }

    /// 主动发起录像索引查询，start/end 为 Unix 秒或毫秒
    pub async fn query_record_info(&self, device_id: &str, start: i64, end: i64) -> Result<()> {
        let device = self.load_known(device_id)?;
        let xml = manscdp::build_record_info_query(device.next_sn(), &device.id, start, end);
        self.outbound.send_message(&device, xml).await
    }

    /// 主动查询预置位列表
    pub async fn query_preset(&self, device_id: &str) -> Result<()> {
        let device = self.load_known(device_id)?;
        let xml = manscdp::build_preset_query(device.next_sn(), &device.id);
        self.outbound.send_message(&device, xml).await
    }

    fn load_known(&self, device_id: &str) -> Result<Arc<Device>> {
        self.registry
            .load(device_id)
            .ok_or_else(|| SignalError::Other(format!("device not found: {}", device_id)))
    }

    /// 首次注册入库；并发注册时保留先入库的记录
    fn store_device(&self, id: &str, req: &InboundRequest) -> Arc<Device> {
        let device = Arc::new(Device::new(id.to_string(), req.source));
        let device = self.registry.load_or_store(device);
        tracing::info!(
            target: "gbsip::dispatch",
            device_id = %id,
            source = %req.source,
            "store device"
        );
        device
    }

    /// 已有记录的重新注册：刷新地址，标记待恢复
    fn recover_for_register(&self, device: &Device, req: &InboundRequest) {
        device.set_addr(req.source);
        device.set_status(DeviceStatus::Recovering);
        device.touch_update();
        tracing::info!(
            target: "gbsip::dispatch",
            device_id = %device.id,
            "device re-registered, pending recovery"
        );
    }

    /// 离线/待恢复设备收到会话消息后回到在线
    fn recover_device(&self, device: &Device, req: &InboundRequest) {
        device.set_addr(req.source);
        device.set_status(DeviceStatus::Online);
        device.touch_update();
        tracing::info!(target: "gbsip::dispatch", device_id = %device.id, "device recovered");
    }

    fn spawn_sync(&self, device: Arc<Device>) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.sync_channels(&device).await;
        });
    }

    async fn send_query(&self, device: &Device, xml: String) {
        if let Err(err) = self.outbound.send_message(device, xml).await {
            tracing::warn!(
                target: "gbsip::dispatch",
                device_id = %device.id,
                error = %err,
                "outbound query send failed"
            );
        }
    }

    async fn subscribe_catalog(&self, device: &Device) {
        let Some(call_id) = device.begin_subscription(SubscribeType::Catalog, SUBSCRIBE_EXPIRES)
        else {
            return;
        };
        let xml = manscdp::build_catalog_query(device.next_sn(), &device.id);
        if let Err(err) = self
            .outbound
            .send_subscribe(device, &call_id, SUBSCRIBE_EXPIRES, xml)
            .await
        {
            tracing::warn!(
                target: "gbsip::dispatch",
                device_id = %device.id,
                error = %err,
                "catalog subscribe send failed"
            );
        }
    }

    async fn subscribe_alarm(&self, device: &Device) {
        let call_id = rand_num_string(16);
        let xml = manscdp::build_alarm_subscribe(device.next_sn(), &device.id);
        if let Err(err) = self
            .outbound
            .send_subscribe(device, &call_id, SUBSCRIBE_EXPIRES, xml)
            .await
        {
            tracing::warn!(
                target: "gbsip::dispatch",
                device_id = %device.id,
                error = %err,
                "alarm subscribe send failed"
            );
        }
    }

    async fn subscribe_position(&self, device: &Device) {
        let Some(call_id) =
            device.begin_subscription(SubscribeType::Position, self.config.position.expires)
        else {
            return;
        };
        let xml = manscdp::build_position_subscribe(
            device.next_sn(),
            &device.id,
            self.config.position.interval,
        );
        if let Err(err) = self
            .outbound
            .send_subscribe(device, &call_id, self.config.position.expires, xml)
            .await
        {
            tracing::warn!(
                target: "gbsip::dispatch",
                device_id = %device.id,
                error = %err,
                "position subscribe send failed"
            );
        }
    }

    /// 解码失败记录后按零值继续，空 CmdType 会走不支持分支
    fn decode_or_default<T: DeserializeOwned + Default>(&self, id: &str, raw: &[u8]) -> T {
        match manscdp::decode(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(
                    target: "gbsip::dispatch",
                    device_id = %id,
                    error = %err,
                    "decode manscdp err"
                );
                T::default()
            }
        }
    }
}
