//! Embedded self-test programs for the `self-test` CLI subcommand.
//!
//! Each test drives one peripheral directly at the register level, the same
//! way the peripheral's own unit tests do, and reports pass/fail rather than
//! panicking — a hardware bring-up smoke test, not a correctness proof (that
//! lives in each module's `#[cfg(test)]` block).

use crate::adc;
use crate::board::UNO;
use crate::io_regs as io;
use crate::mcu::McuState;
use crate::spi;
use crate::timers;
use crate::twi;
use crate::uart;

pub struct SelfTestResult {
    pub name: &'static str,
    pub passed: bool,
}

pub fn run() -> Vec<SelfTestResult> {
    vec![
        SelfTestResult { name: "adc", passed: test_adc() },
        SelfTestResult { name: "uart", passed: test_uart() },
        SelfTestResult { name: "timer", passed: test_timer() },
        SelfTestResult { name: "spi", passed: test_spi() },
        SelfTestResult { name: "twi", passed: test_twi() },
    ]
}

fn w(mcu: &mut McuState, reg: usize, value: u8) {
    mcu.data_write(0x20 + reg as u16, value);
}

fn test_adc() -> bool {
    let mut mcu = McuState::new(&UNO);
    mcu.analog_inputs[0] = 2.5;
    w(&mut mcu, io::ADMUX, 0);
    w(&mut mcu, io::ADCSRA, 0b1100_0111); // ADEN | ADSC, prescaler 128
    adc::tick(&mut mcu, 13 * 128);
    let adif_set = mcu.io[io::ADCSRA] & 0b0001_0000 != 0;
    let value = mcu.io[io::ADCL] as u16 | ((mcu.io[io::ADCH] as u16) << 8);
    adif_set && (500..=524).contains(&value)
}

fn test_uart() -> bool {
    let mut mcu = McuState::new(&UNO);
    w(&mut mcu, io::UCSR0B, 1 << 3); // TXEN
    w(&mut mcu, io::UBRR0L, 0);
    w(&mut mcu, io::UBRR0H, 0);
    w(&mut mcu, io::UDR0, b'K');
    uart::tick_all(&mut mcu, 10 * 16);
    mcu.uarts[0].drain_tx() == vec![b'K']
}

fn test_timer() -> bool {
    let mut mcu = McuState::new(&UNO);
    w(&mut mcu, io::TCCR1B, 0b0000_0001); // CS10, Normal mode
    timers::tick_all(&mut mcu, 65536);
    mcu.io[io::TIFR1] & 0b1 == 0b1
}

fn test_spi() -> bool {
    let mut mcu = McuState::new(&UNO);
    w(&mut mcu, io::SPCR, 1 << 6); // SPE, SPR=00, no 2x -> divisor 4
    w(&mut mcu, io::SPDR, 0x5A);
    spi::tick(&mut mcu, 8 * 4);
    mcu.io[io::SPSR] & (1 << 7) != 0
}

fn test_twi() -> bool {
    let mut mcu = McuState::new(&UNO);
    w(&mut mcu, io::TWCR, (1 << 2) | (1 << 6)); // TWEN | TWEA
    w(&mut mcu, io::TWSR, 0xF8); // STATUS_IDLE
    w(&mut mcu, io::TWBR, 72);
    w(&mut mcu, io::TWDR, 0x10);
    twi::tick(&mut mcu, 10_000);
    mcu.io[io::TWSR] & 0xF8 == 0x28 // STATUS_ACK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_peripheral_self_test_passes() {
        for result in run() {
            assert!(result.passed, "self-test {} failed", result.name);
        }
    }
}
