// PTZ 云台控制指令编码
// 8 字节指令帧渲染为 16 进制字符串，末字节为累加校验

use crate::error::{Result, SignalError};

/// 指令名到操作码
fn ptz_code(cmd: &str) -> Result<u8> {
    let code = match cmd {
        "stop" => 0x00,
        "right" => 0x01,
        "left" => 0x02,
        "down" => 0x04,
        "downright" => 0x05,
        "downleft" => 0x06,
        "up" => 0x08,
        "upright" => 0x09,
        "upleft" => 0x0A,
        "zoomin" => 0x10,
        "zoomout" => 0x20,

        // 预置位
        "set" => 0x81,
        "goto" => 0x82,
        "remove" => 0x83,

        _ => return Err(SignalError::InvalidPtzCommand(cmd.to_string())),
    };
    Ok(code)
}

/// 云台转动/变倍指令
/// zoom 速率按协议只占高 4 bit
pub fn move_cmd(cmd: &str, horizontal_speed: u8, vertical_speed: u8, zoom_speed: u8) -> Result<String> {
    let code = ptz_code(cmd)?;

    let check = (0xA5u16
        + 0x0F
        + 0x01
        + code as u16
        + horizontal_speed as u16
        + vertical_speed as u16
        + (zoom_speed & 0xF0) as u16)
        % 0x100;

    Ok(format!(
        "A50F01{:02X}{:02X}{:02X}{:01X}0{:02X}",
        code,
        horizontal_speed,
        vertical_speed,
        zoom_speed >> 4,
        check
    ))
}

/// 预置位指令（设置/调用/删除）
pub fn preset_cmd(cmd: &str, preset: u8) -> Result<String> {
    let code = ptz_code(cmd)?;

    let check = (0xA5u16 + 0x0F + 0x01 + code as u16 + preset as u16) % 0x100;

    Ok(format!("A50F01{:02X}00{:02X}00{:02X}", code, preset, check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_cmd() {
        let cmd = move_cmd("stop", 0, 0, 0).unwrap();
        assert_eq!(cmd.len(), 18);
        assert!(cmd.starts_with("A50F0100"));
        // 0xA5 + 0x0F + 0x01 = 0xB5
        assert_eq!(cmd, "A50F010000000000B5");
    }

    #[test]
    fn test_move_cmd_with_speeds() {
        let cmd = move_cmd("upleft", 0x7F, 0x40, 0xFF).unwrap();
        // zoom 只保留高 4 bit：0xF0 参与校验，渲染为 F0
        let check = (0xA5u16 + 0x0F + 0x01 + 0x0A + 0x7F + 0x40 + 0xF0) % 0x100;
        assert_eq!(cmd, format!("A50F010A7F40F0{:02X}", check));
    }

    #[test]
    fn test_zoom_cmd() {
        let cmd = move_cmd("zoomin", 0, 0, 0x30).unwrap();
        let check = (0xA5u16 + 0x0F + 0x01 + 0x10 + 0x30) % 0x100;
        assert_eq!(cmd, format!("A50F011000003{}{:02X}", 0, check));
    }

    #[test]
    fn test_invalid_cmd() {
        let err = move_cmd("invalidcmd", 0, 0, 0).unwrap_err();
        assert!(matches!(err, SignalError::InvalidPtzCommand(_)));
        assert!(preset_cmd("fly", 1).is_err());
    }

    #[test]
    fn test_preset_set_checksum() {
        let cmd = preset_cmd("set", 5).unwrap();
        let check = (0xA5u16 + 0x0F + 0x01 + 0x81 + 0x05) % 0x100;
        assert_eq!(cmd.len(), 18);
        assert!(cmd.starts_with("A50F0181"));
        assert!(cmd.ends_with(&format!("{:02X}", check)));
        assert_eq!(cmd, "A50F01810005003B");
    }

    #[test]
    fn test_preset_goto_and_remove() {
        let goto = preset_cmd("goto", 1).unwrap();
        assert!(goto.starts_with("A50F0182"));
        let remove = preset_cmd("remove", 255).unwrap();
        assert!(remove.starts_with("A50F0183"));
        assert!(remove.contains("00FF00"));
    }
}
