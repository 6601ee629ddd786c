//! Wire protocol framing: the 24-byte header, the ten message payloads, and
//! the 96-byte `debug_bits` diagnostic mirror packed at stable offsets.
//!
//! All integers are little-endian. The named-pipe transport itself ("read
//! exactly N bytes or fail") is out of scope; this module only encodes and
//! decodes already-read byte slices.

use crate::error::ProtocolError;
use crate::mcu::McuState;

pub const MAGIC: u32 = 0x5746_5452;
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 3;
pub const MAX_PAYLOAD: u32 = 8 * 1024 * 1024;

pub const PIN_COUNT: usize = 70;
pub const BOARD_ID_SIZE: usize = 64;
pub const ANALOG_COUNT: usize = 16;
pub const UNKNOWN_PIN_VALUE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Hello = 1,
    HelloAck = 2,
    LoadBvm = 3,
    Step = 4,
    OutputState = 5,
    Serial = 6,
    Status = 7,
    Log = 8,
    Error = 9,
    MemoryPatch = 10,
}

impl MessageType {
    fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => MessageType::Hello,
            2 => MessageType::HelloAck,
            3 => MessageType::LoadBvm,
            4 => MessageType::Step,
            5 => MessageType::OutputState,
            6 => MessageType::Serial,
            7 => MessageType::Status,
            8 => MessageType::Log,
            9 => MessageType::Error,
            10 => MessageType::MemoryPatch,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub msg_type: u16,
    pub flags: u16,
    pub payload_size: u32,
    pub sequence: u32,
}

pub const HEADER_LEN: usize = 24;

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version_major.to_le_bytes());
        buf[6..8].copy_from_slice(&self.version_minor.to_le_bytes());
        buf[8..10].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.sequence.to_le_bytes());
        // bytes 20..24 reserved/padding, zeroed
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Header, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::ShortRead { wanted: HEADER_LEN, got: buf.len() });
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let version_major = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let version_minor = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        if version_major != VERSION_MAJOR {
            return Err(ProtocolError::UnsupportedVersion { major: version_major, minor: version_minor });
        }
        let msg_type = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        if MessageType::from_u16(msg_type).is_none() {
            return Err(ProtocolError::UnknownMessageType(msg_type));
        }
        let flags = u16::from_le_bytes(buf[10..12].try_into().unwrap());
        let payload_size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        if payload_size > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(payload_size));
        }
        let sequence = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        Ok(Header { magic, version_major, version_minor, msg_type, flags, payload_size, sequence })
    }
}

fn read_fixed_str(buf: &[u8], len: usize) -> String {
    let end = buf[..len].iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn write_fixed_str(out: &mut Vec<u8>, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (len - n), 0);
}

#[derive(Debug, Clone)]
pub struct HelloPayload {
    pub flags: u32,
    pub pin_count: u32,
    pub board_id_size: u32,
    pub analog_count: u32,
}

impl HelloPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < 16 {
            return Err(ProtocolError::Truncated { what: "Hello" });
        }
        Ok(HelloPayload {
            flags: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            pin_count: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            board_id_size: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            analog_count: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HelloAckPayload {
    pub flags: u32,
    pub flash_bytes: u32,
    pub sram_bytes: u32,
    pub eeprom_bytes: u32,
    pub io_bytes: u32,
    pub cpu_hz: u32,
}

impl HelloAckPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&(PIN_COUNT as u32).to_le_bytes());
        out.extend_from_slice(&(BOARD_ID_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&(ANALOG_COUNT as u32).to_le_bytes());
        out.extend_from_slice(&self.flash_bytes.to_le_bytes());
        out.extend_from_slice(&self.sram_bytes.to_le_bytes());
        out.extend_from_slice(&self.eeprom_bytes.to_le_bytes());
        out.extend_from_slice(&self.io_bytes.to_le_bytes());
        out.extend_from_slice(&self.cpu_hz.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone)]
pub struct LoadBvmPayload {
    pub board_id: String,
    pub board_profile: String,
    pub container: Vec<u8>,
}

impl LoadBvmPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < 128 {
            return Err(ProtocolError::Truncated { what: "LoadBvm" });
        }
        let board_id = read_fixed_str(&buf[0..64], 64);
        let board_profile = read_fixed_str(&buf[64..128], 64);
        let container = buf[128..].to_vec();
        Ok(LoadBvmPayload { board_id, board_profile, container })
    }
}

#[derive(Debug, Clone)]
pub struct StepPayload {
    pub board_id: String,
    pub step_sequence: u64,
    pub delta_micros: u32,
    pub pins: [u8; PIN_COUNT],
    pub analog: [u16; ANALOG_COUNT],
    pub sent_micros: u64,
}

impl StepPayload {
    const LEN: usize = 64 + 8 + 4 + PIN_COUNT + ANALOG_COUNT * 2 + 8;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::LEN {
            return Err(ProtocolError::Truncated { what: "Step" });
        }
        let board_id = read_fixed_str(&buf[0..64], 64);
        let mut off = 64;
        let step_sequence = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let delta_micros = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let mut pins = [0u8; PIN_COUNT];
        pins.copy_from_slice(&buf[off..off + PIN_COUNT]);
        off += PIN_COUNT;
        let mut analog = [0u16; ANALOG_COUNT];
        for i in 0..ANALOG_COUNT {
            analog[i] = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
            off += 2;
        }
        let sent_micros = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        Ok(StepPayload { board_id, step_sequence, delta_micros, pins, analog, sent_micros })
    }
}

/// A 96-byte diagnostic mirror packed at fixed byte offsets for host tooling
/// that indexes it by offset rather than by named field.
pub fn encode_debug_bits(mcu: &McuState) -> [u8; 96] {
    let mut buf = [0u8; 96];
    buf[0..2].copy_from_slice(&mcu.pc.to_le_bytes());
    buf[2..4].copy_from_slice(&mcu.sp().to_le_bytes());
    buf[4] = mcu.sreg;
    buf[8..12].copy_from_slice(&(mcu.profile.flash_bytes as u32).to_le_bytes());
    buf[16..20].copy_from_slice(&(mcu.profile.sram_bytes as u32).to_le_bytes());
    buf[24..28].copy_from_slice(&(mcu.profile.eeprom_bytes as u32).to_le_bytes());
    buf[32..36].copy_from_slice(&(mcu.profile.io_bytes as u32).to_le_bytes());
    buf[40..48].copy_from_slice(&mcu.profile.effective_cpu_hz().to_le_bytes());
    buf[48..52].copy_from_slice(&mcu.diagnostics.stack_high_water_mark.to_le_bytes());
    // offset 56: stack overflow count -- not modeled by this core, zero-filled.
    buf[60..64].copy_from_slice(&mcu.diagnostics.invalid_memory_access_count.to_le_bytes());
    buf[64..68].copy_from_slice(&mcu.diagnostics.interrupt_dispatch_count.to_le_bytes());
    buf[68..72].copy_from_slice(&(mcu.diagnostics.critical_section_cycles as u32).to_le_bytes());
    buf[72..76].copy_from_slice(&(mcu.diagnostics.uart_overflow_count as u32).to_le_bytes());
    buf[76..80].copy_from_slice(&(mcu.diagnostics.timer_overflow_count as u32).to_le_bytes());
    buf[80..84].copy_from_slice(&mcu.diagnostics.gpio_state_change_count.to_le_bytes());
    buf[84..88].copy_from_slice(&(mcu.diagnostics.pwm_active_cycles as u32).to_le_bytes());
    buf[88..92].copy_from_slice(&(mcu.diagnostics.spi_transfers as u32).to_le_bytes());
    buf[92..96].copy_from_slice(&(mcu.diagnostics.twi_transfers as u32).to_le_bytes());
    buf
}

pub struct OutputStatePayload {
    pub board_id: String,
    pub step_sequence: u64,
    pub tick_count: u64,
    pub pins: Vec<u8>,
    pub retired_cycles: u64,
    pub adc_samples: u64,
    pub uart_bytes: [u64; 4],
    pub spi_transfers: u64,
    pub twi_transfers: u64,
    pub wdt_resets: u64,
    pub timestamp_micros: u64,
    pub debug_bits: [u8; 96],
}

impl OutputStatePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 8 + 8 + PIN_COUNT + 8 * 7 + 8 + 96);
        write_fixed_str(&mut out, &self.board_id, 64);
        out.extend_from_slice(&self.step_sequence.to_le_bytes());
        out.extend_from_slice(&self.tick_count.to_le_bytes());
        let mut pins = self.pins.clone();
        pins.resize(PIN_COUNT, UNKNOWN_PIN_VALUE);
        out.extend_from_slice(&pins);
        out.extend_from_slice(&self.retired_cycles.to_le_bytes());
        out.extend_from_slice(&self.adc_samples.to_le_bytes());
        for b in &self.uart_bytes {
            out.extend_from_slice(&b.to_le_bytes());
        }
        out.extend_from_slice(&self.spi_transfers.to_le_bytes());
        out.extend_from_slice(&self.twi_transfers.to_le_bytes());
        out.extend_from_slice(&self.wdt_resets.to_le_bytes());
        out.extend_from_slice(&self.timestamp_micros.to_le_bytes());
        out.extend_from_slice(&self.debug_bits);
        out
    }
}

pub struct StatusPayload {
    pub board_id: String,
    pub tick_count: u64,
}

impl StatusPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 8);
        write_fixed_str(&mut out, &self.board_id, 64);
        out.extend_from_slice(&self.tick_count.to_le_bytes());
        out
    }
}

pub struct SerialPayload {
    pub board_id: String,
    pub bytes: Vec<u8>,
}

impl SerialPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.bytes.len());
        write_fixed_str(&mut out, &self.board_id, 64);
        out.extend_from_slice(&self.bytes);
        out
    }
}

pub struct ErrorPayload {
    pub board_id: String,
    pub code: u32,
    pub text: String,
}

impl ErrorPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 4 + self.text.len());
        write_fixed_str(&mut out, &self.board_id, 64);
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(self.text.as_bytes());
        out
    }
}

pub struct LogPayload {
    pub board_id: String,
    pub level: u8,
    pub text: String,
}

impl LogPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 1 + self.text.len());
        write_fixed_str(&mut out, &self.board_id, 64);
        out.push(self.level);
        out.extend_from_slice(self.text.as_bytes());
        out
    }
}

#[derive(Debug, Clone)]
pub struct MemoryPatchPayload {
    pub board_id: String,
    pub memory_type: u8,
    pub address: u32,
    pub length: u32,
    pub data: Vec<u8>,
}

impl MemoryPatchPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < 76 {
            return Err(ProtocolError::Truncated { what: "MemoryPatch" });
        }
        let board_id = read_fixed_str(&buf[0..64], 64);
        let memory_type = buf[64];
        let address = u32::from_le_bytes(buf[68..72].try_into().unwrap());
        let length = u32::from_le_bytes(buf[72..76].try_into().unwrap());
        let data = buf[76..].to_vec();
        if data.len() < length as usize {
            return Err(ProtocolError::Truncated { what: "MemoryPatch.data" });
        }
        Ok(MemoryPatchPayload { board_id, memory_type, address, length, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            msg_type: MessageType::Step as u16,
            flags: 0,
            payload_size: 128,
            sequence: 7,
        };
        let encoded = h.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.payload_size, 128);
        assert_eq!(decoded.msg_type, MessageType::Step as u16);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut encoded = Header {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            msg_type: 4,
            flags: 0,
            payload_size: 0,
            sequence: 0,
        }
        .encode();
        encoded[0] = 0;
        assert_eq!(Header::decode(&encoded), Err(ProtocolError::BadMagic(u32::from_le_bytes([0, encoded[1], encoded[2], encoded[3]]))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let encoded = Header {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            msg_type: 4,
            flags: 0,
            payload_size: MAX_PAYLOAD + 1,
            sequence: 0,
        }
        .encode();
        assert_eq!(Header::decode(&encoded), Err(ProtocolError::PayloadTooLarge(MAX_PAYLOAD + 1)));
    }

    #[test]
    fn status_payload_encodes_board_id_and_tick_count() {
        let encoded = StatusPayload { board_id: "uno-1".into(), tick_count: 99 }.encode();
        assert_eq!(encoded.len(), 64 + 8);
        assert_eq!(&encoded[0..5], b"uno-1");
        assert_eq!(u64::from_le_bytes(encoded[64..72].try_into().unwrap()), 99);
    }

    #[test]
    fn step_payload_round_trips_pins_and_analog() {
        let mut buf = vec![0u8; StepPayload::LEN];
        write_fixed_str(&mut buf, "uno-1", 64);
        buf[64..72].copy_from_slice(&42u64.to_le_bytes());
        buf[72..76].copy_from_slice(&1000u32.to_le_bytes());
        buf[76 + 13] = 1; // pin 13 high
        let decoded = StepPayload::decode(&buf).unwrap();
        assert_eq!(decoded.board_id, "uno-1");
        assert_eq!(decoded.step_sequence, 42);
        assert_eq!(decoded.delta_micros, 1000);
        assert_eq!(decoded.pins[13], 1);
    }
}
