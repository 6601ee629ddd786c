//! STK500v1 programmer bridge: the minimal command subset needed to erase,
//! program, and read back flash over a serial transport, plus signature
//! readback. The serial transport itself is out of scope; this module maps
//! a command byte stream to a reply byte stream.

use crate::board::BoardProfile;
use crate::mcu::McuState;

const NOSYNC: u8 = 0x15;
const INSYNC: u8 = 0x14;
const OK: u8 = 0x10;
const FAILED: u8 = 0x11;

const CMD_GET_SYNC: u8 = 0x30;
const CMD_GET_PARAMETER: u8 = 0x41;
const CMD_SET_DEVICE: u8 = 0x42;
const CMD_SET_DEVICE_EXT: u8 = 0x45;
const CMD_ENTER_PROGMODE: u8 = 0x50;
const CMD_LEAVE_PROGMODE: u8 = 0x51;
const CMD_LOAD_ADDRESS: u8 = 0x55;
const CMD_PROG_PAGE: u8 = 0x64;
const CMD_READ_PAGE: u8 = 0x74;
const CMD_READ_SIGN: u8 = 0x75;
const SYNC_CRC_EOP: u8 = 0x20;

pub struct Stk500Bridge {
    address_words: u32,
}

impl Stk500Bridge {
    pub fn new() -> Self {
        Stk500Bridge { address_words: 0 }
    }

    /// Process one command frame (already stripped of any higher-level
    /// framing) and append the reply bytes to `out`. `cmd` includes its
    /// trailing `SYNC_CRC_EOP` byte, per the STK500v1 convention.
    pub fn handle(&mut self, mcu: &mut McuState, profile: &'static BoardProfile, cmd: &[u8], out: &mut Vec<u8>) {
        if cmd.is_empty() {
            out.push(NOSYNC);
            return;
        }
        let op = cmd[0];
        let eop_ok = cmd.last() == Some(&SYNC_CRC_EOP);
        if !eop_ok {
            out.push(NOSYNC);
            return;
        }
        match op {
            CMD_GET_SYNC => {
                out.push(INSYNC);
                out.push(OK);
            }
            CMD_GET_PARAMETER => {
                out.push(INSYNC);
                out.push(0x03); // arbitrary firmware-version-like value
                out.push(OK);
            }
            CMD_SET_DEVICE | CMD_SET_DEVICE_EXT => {
                out.push(INSYNC);
                out.push(OK);
            }
            CMD_ENTER_PROGMODE => {
                let limit = profile.application_flash_bytes();
                for b in mcu.flash[..limit].iter_mut() {
                    *b = 0xFF;
                }
                mcu.soft_reset();
                out.push(INSYNC);
                out.push(OK);
            }
            CMD_LEAVE_PROGMODE => {
                mcu.firmware_loaded = true;
                mcu.soft_reset();
                out.push(INSYNC);
                out.push(OK);
            }
            CMD_LOAD_ADDRESS => {
                if cmd.len() < 4 {
                    out.push(NOSYNC);
                    return;
                }
                self.address_words = cmd[1] as u32 | ((cmd[2] as u32) << 8);
                out.push(INSYNC);
                out.push(OK);
            }
            CMD_PROG_PAGE => {
                if cmd.len() < 5 {
                    out.push(NOSYNC);
                    return;
                }
                let len = ((cmd[1] as usize) << 8) | cmd[2] as usize;
                let mem_type = cmd[3];
                let data = &cmd[4..cmd.len() - 1];
                if mem_type != b'F' || data.len() < len {
                    out.push(INSYNC);
                    out.push(FAILED);
                    return;
                }
                let byte_addr = (self.address_words as usize) * 2;
                let limit = profile.application_flash_bytes();
                if byte_addr + len > limit {
                    out.push(INSYNC);
                    out.push(FAILED);
                    return;
                }
                mcu.flash[byte_addr..byte_addr + len].copy_from_slice(&data[..len]);
                out.push(INSYNC);
                out.push(OK);
            }
            CMD_READ_PAGE => {
                if cmd.len() < 4 {
                    out.push(NOSYNC);
                    return;
                }
                let len = ((cmd[1] as usize) << 8) | cmd[2] as usize;
                let byte_addr = (self.address_words as usize) * 2;
                out.push(INSYNC);
                if byte_addr + len > mcu.flash.len() {
                    out.push(FAILED);
                    return;
                }
                out.extend_from_slice(&mcu.flash[byte_addr..byte_addr + len]);
                out.push(OK);
            }
            CMD_READ_SIGN => {
                out.push(INSYNC);
                out.extend_from_slice(&profile.family.signature());
                out.push(OK);
            }
            _ => {
                out.push(NOSYNC);
            }
        }
    }
}

impl Default for Stk500Bridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::UNO;

    #[test]
    fn get_sync_replies_insync_ok() {
        let mut mcu = McuState::new(&UNO);
        let mut bridge = Stk500Bridge::new();
        let mut out = Vec::new();
        bridge.handle(&mut mcu, &UNO, &[CMD_GET_SYNC, SYNC_CRC_EOP], &mut out);
        assert_eq!(out, vec![INSYNC, OK]);
    }

    #[test]
    fn read_sign_returns_family_signature() {
        let mut mcu = McuState::new(&UNO);
        let mut bridge = Stk500Bridge::new();
        let mut out = Vec::new();
        bridge.handle(&mut mcu, &UNO, &[CMD_READ_SIGN, SYNC_CRC_EOP], &mut out);
        assert_eq!(out, vec![INSYNC, 0x1E, 0x95, 0x0F, OK]);
    }

    #[test]
    fn missing_eop_is_framing_error() {
        let mut mcu = McuState::new(&UNO);
        let mut bridge = Stk500Bridge::new();
        let mut out = Vec::new();
        bridge.handle(&mut mcu, &UNO, &[CMD_GET_SYNC], &mut out);
        assert_eq!(out, vec![NOSYNC]);
    }

    #[test]
    fn prog_page_then_read_page_round_trips() {
        let mut mcu = McuState::new(&UNO);
        let mut bridge = Stk500Bridge::new();
        let mut out = Vec::new();
        bridge.handle(&mut mcu, &UNO, &[CMD_ENTER_PROGMODE, SYNC_CRC_EOP], &mut out);
        out.clear();
        bridge.handle(&mut mcu, &UNO, &[CMD_LOAD_ADDRESS, 0x00, 0x00, SYNC_CRC_EOP], &mut out);
        out.clear();
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut cmd = vec![CMD_PROG_PAGE, 0x00, 0x04, b'F'];
        cmd.extend_from_slice(&data);
        cmd.push(SYNC_CRC_EOP);
        bridge.handle(&mut mcu, &UNO, &cmd, &mut out);
        assert_eq!(out, vec![INSYNC, OK]);
        out.clear();
        bridge.handle(&mut mcu, &UNO, &[CMD_READ_PAGE, 0x00, 0x04, SYNC_CRC_EOP], &mut out);
        assert_eq!(out, vec![INSYNC, 0xDE, 0xAD, 0xBE, 0xEF, OK]);
    }
}
