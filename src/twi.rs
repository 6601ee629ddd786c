//! Two-wire (I2C) byte engine: START/STOP status codes and a byte-timed
//! transfer, not a full multi-master bus model.

use crate::io_regs as io;
use crate::mcu::McuState;

const TWINT: u8 = 1 << 7;
const TWEA: u8 = 1 << 6;
const TWSTA: u8 = 1 << 5;
const TWSTO: u8 = 1 << 4;
const TWEN: u8 = 1 << 2;

const STATUS_START: u8 = 0x08;
const STATUS_RESTART: u8 = 0x10;
const STATUS_ACK: u8 = 0x28;
const STATUS_NACK: u8 = 0x30;
const STATUS_IDLE: u8 = 0xF8;

#[derive(Debug, Clone, Default)]
pub struct TwiUnit {
    remaining: i64,
    in_flight: bool,
}

impl TwiUnit {
    pub fn new() -> Self {
        TwiUnit::default()
    }

    pub fn reset(&mut self) {
        self.remaining = 0;
        self.in_flight = false;
    }

    fn prescaler(twsr: u8) -> f64 {
        match twsr & 0b11 {
            0 => 1.0,
            1 => 4.0,
            2 => 16.0,
            _ => 64.0,
        }
    }

    pub fn on_twcr_write(&mut self, io: &mut [u8]) {
        let twcr = io[io::TWCR];
        if twcr & TWEN == 0 {
            return;
        }
        if twcr & TWINT != 0 {
            // Write-1-to-clear: firmware acknowledging the previous event.
            io[io::TWCR] &= !TWINT;
        }
        if twcr & TWSTA != 0 {
            io[io::TWSR] = (io[io::TWSR] & 0b11) | STATUS_START;
            io[io::TWCR] |= TWINT;
        } else if twcr & TWSTO != 0 {
            io[io::TWSR] = (io[io::TWSR] & 0b11) | STATUS_RESTART;
            io[io::TWCR] |= TWINT;
            io[io::TWCR] &= !TWSTO;
        }
    }

    pub fn on_twdr_write(&mut self, io: &[u8]) {
        if io[io::TWCR] & TWEN != 0 && !self.in_flight {
            let cycles_per_bit = (16.0 + 2.0 * (io[io::TWBR] as f64) * Self::prescaler(io[io::TWSR])).max(4.0);
            self.in_flight = true;
            self.remaining = (9.0 * cycles_per_bit).round() as i64;
        }
    }

    pub fn tick(&mut self, io: &mut [u8], executed: u64, transfer_counter: &mut u64) {
        if !self.in_flight {
            return;
        }
        self.remaining -= executed as i64;
        if self.remaining > 0 {
            return;
        }
        self.in_flight = false;
        if io[io::TWSR] & 0b1111_1000 == STATUS_IDLE {
            let status = if io[io::TWCR] & TWEA != 0 { STATUS_ACK } else { STATUS_NACK };
            io[io::TWSR] = (io[io::TWSR] & 0b11) | status;
        }
        io[io::TWCR] |= TWINT;
        *transfer_counter += 1;
    }
}

pub fn tick(mcu: &mut McuState, executed: u64) {
    let counter = &mut mcu.diagnostics.twi_transfers;
    mcu.twi.tick(&mut mcu.io, executed, counter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::UNO;
    use crate::mcu::McuState;

    #[test]
    fn start_condition_sets_status_and_twint() {
        let mut mcu = McuState::new(&UNO);
        mcu.io[io::TWCR] = TWEN | TWSTA | TWINT;
        mcu.twi.on_twcr_write(&mut mcu.io);
        assert_eq!(mcu.io[io::TWSR] & 0xF8, STATUS_START);
        assert_eq!(mcu.io[io::TWCR] & TWINT, TWINT);
    }

    #[test]
    fn transfer_acks_when_twea_set() {
        let mut mcu = McuState::new(&UNO);
        mcu.io[io::TWCR] = TWEN | TWEA;
        mcu.io[io::TWSR] = STATUS_IDLE;
        mcu.io[io::TWBR] = 72;
        mcu.twi.on_twdr_write(&mcu.io.clone());
        tick(&mut mcu, 10_000);
        assert_eq!(mcu.io[io::TWSR] & 0xF8, STATUS_ACK);
    }
}
