// MANSCDP 指令编解码
// 出站查询/订阅/应答 XML 构造，入站 XML 按声明字符集解码、GBK 兜底

use crate::error::{Result, SignalError};
use chrono::{DateTime, Local, TimeZone};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// 通用查询指令
pub fn build_query_xml(cmd: &str, sn: u32, id: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<Query>
<CmdType>{}</CmdType>
<SN>{}</SN>
<DeviceID>{}</DeviceID>
</Query>"#,
        cmd, sn, id
    )
}

/// 设备详情查询
pub fn build_device_info_query(sn: u32, id: &str) -> String {
    build_query_xml("DeviceInfo", sn, id)
}

/// NVR 下属通道目录查询
pub fn build_catalog_query(sn: u32, id: &str) -> String {
    build_query_xml("Catalog", sn, id)
}

/// 预置位列表查询
pub fn build_preset_query(sn: u32, id: &str) -> String {
    build_query_xml("PresetQuery", sn, id)
}

/// 报警订阅
pub fn build_alarm_subscribe(sn: u32, id: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<Query>
<CmdType>Alarm</CmdType>
<SN>{}</SN>
<DeviceID>{}</DeviceID>
<StartAlarmPriority>1</StartAlarmPriority>
<EndAlarmPriority>4</EndAlarmPriority>
<AlarmMethod>0</AlarmMethod>
</Query>"#,
        sn, id
    )
}

/// 移动位置订阅
pub fn build_position_subscribe(sn: u32, id: &str, interval: u64) -> String {
    format!(
        r#"<?xml version="1.0"?>
<Query>
<CmdType>MobilePosition</CmdType>
<SN>{}</SN>
<DeviceID>{}</DeviceID>
<Interval>{}</Interval>
</Query>"#,
        sn, id, interval
    )
}

/// 录像文件列表查询
/// start/end 为 Unix 秒（10位）或毫秒（13位），其他位数回退为当前时间
pub fn build_record_info_query(sn: u32, id: &str, start: i64, end: i64) -> String {
    format!(
        r#"<?xml version="1.0"?>
<Query>
<CmdType>RecordInfo</CmdType>
<SN>{}</SN>
<DeviceID>{}</DeviceID>
<StartTime>{}</StartTime>
<EndTime>{}</EndTime>
<Secrecy>0</Secrecy>
<Type>all</Type>
</Query>"#,
        sn,
        id,
        int_to_time(start).format("%Y-%m-%dT%H:%M:%S"),
        int_to_time(end).format("%Y-%m-%dT%H:%M:%S")
    )
}

/// 报警应答
pub fn build_alarm_response(sn: u32, id: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<Response>
<CmdType>Alarm</CmdType>
<SN>{}</SN>
<DeviceID>{}</DeviceID>
</Response>"#,
        sn, id
    )
}

/// 按十进制位数区分秒/毫秒时间戳
fn int_to_time(t: i64) -> DateTime<Local> {
    match t.to_string().len() {
        10 => Local.timestamp_opt(t, 0).single().unwrap_or_else(Local::now),
        13 => Local.timestamp_millis_opt(t).single().unwrap_or_else(Local::now),
        _ => Local::now(),
    }
}

/// 解码入站 MANSCDP XML
/// 第一遍按文档声明的字符集读取；失败后按 GBK 兜底重解
/// （部分设备声明 UTF-8 实际发 GBK，或不带声明直接发 GBK）
pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    match quick_xml::de::from_reader(raw) {
        Ok(v) => Ok(v),
        Err(primary) => {
            let (text, _, _) = encoding_rs::GBK.decode(raw);
            quick_xml::de::from_str(text.as_ref()).map_err(|fallback| {
                tracing::debug!(
                    target: "gbsip::manscdp",
                    primary = %primary,
                    fallback = %fallback,
                    "both decode passes failed"
                );
                SignalError::Xml(fallback)
            })
        }
    }
}

/// 最小信封：先取 CmdType 再按指令类型二次解码
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct Envelope {
    pub cmd_type: String,

    #[serde(rename = "SN")]
    pub sn: u32,

    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

/// 目录项（通道信息）
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ChannelInfo {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub owner: String,
    pub civil_code: String,
    pub address: String,

    /// 是否有子设备（1-有，0-没有）
    pub parental: u8,

    #[serde(rename = "ParentID")]
    pub parent_id: String,

    pub safety_way: u8,
    pub register_way: u8,
    pub secrecy: u8,

    /// ON/OFF
    pub status: String,

    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct DeviceList {
    #[serde(rename = "@Num", default)]
    pub num: Option<u32>,

    #[serde(rename = "Item", default)]
    pub items: Vec<ChannelInfo>,
}

/// Catalog 响应体
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct CatalogBody {
    #[serde(rename = "SN")]
    pub sn: u32,

    #[serde(rename = "DeviceID")]
    pub device_id: String,

    pub sum_num: u32,
    pub device_list: DeviceList,
}

/// 录像索引条目
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct Record {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    pub name: String,
    pub file_path: String,
    pub address: String,
    pub start_time: String,
    pub end_time: String,
    pub secrecy: u8,

    #[serde(rename = "Type")]
    pub record_type: String,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct RecordList {
    #[serde(rename = "Item", default)]
    pub items: Vec<Record>,
}

/// RecordInfo 响应体；结果分多条消息返回，SumNum 用于判断是否收全
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct RecordInfoBody {
    #[serde(rename = "SN")]
    pub sn: u32,

    #[serde(rename = "DeviceID")]
    pub device_id: String,

    pub sum_num: u32,
    pub record_list: RecordList,
}

/// DeviceInfo 响应体
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct DeviceInfoBody {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    pub device_name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
}

/// 报警详情
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct Alarm {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    pub alarm_priority: String,
    pub alarm_method: String,
    pub alarm_time: String,
    pub alarm_description: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

/// 目录订阅通知项，Event 取值 ON/OFF/VLOST/DEFECT/ADD/DEL/UPDATE
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ChannelNotifyItem {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    #[serde(rename = "ParentID")]
    pub parent_id: String,

    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub owner: String,
    pub civil_code: String,
    pub address: String,
    pub port: u16,
    pub parental: u8,
    pub safety_way: u8,
    pub register_way: u8,
    pub secrecy: u8,
    pub status: String,
    pub event: String,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct NotifyList {
    #[serde(rename = "Item", default)]
    pub items: Vec<ChannelNotifyItem>,
}

/// NOTIFY 消息体：目录状态推送或移动位置上报
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct NotifyBody {
    pub cmd_type: String,

    #[serde(rename = "SN")]
    pub sn: u32,

    #[serde(rename = "DeviceID")]
    pub device_id: String,

    /// 位置上报 GPS 时间
    pub time: String,

    /// 位置上报经度
    pub longitude: String,

    /// 位置上报纬度
    pub latitude: String,

    pub device_list: NotifyList,
}

/// 预置位
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct Preset {
    #[serde(rename = "DeviceID")]
    pub device_id: String,

    #[serde(rename = "PresetID")]
    pub preset_id: u32,

    pub preset_name: String,
}
