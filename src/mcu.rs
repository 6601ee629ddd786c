//! Per-board emulated state: backing stores for flash/SRAM/EEPROM/IO/general
//! registers, plus every peripheral unit. Owned exclusively by one `Session`
//! (see `session.rs`); nothing here is shared across boards.

use crate::adc::AdcUnit;
use crate::board::BoardProfile;
use crate::io_regs as io;
use crate::pcint::PinEdgeTracker;
use crate::spi::SpiUnit;
use crate::timers::TimerUnit;
use crate::twi::TwiUnit;
use crate::uart::UartChannel;
use crate::wdt::WdtUnit;

/// Counters mirrored into `OutputState`: retired cycles, per-peripheral
/// sample/transfer counts, and reset counters for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub retired_cycles: u64,
    pub adc_samples: u64,
    pub uart_bytes: [u64; 4],
    pub uart_overflow_count: u64,
    pub spi_transfers: u64,
    pub twi_transfers: u64,
    pub wdt_resets: u64,
    pub stack_high_water_mark: u32,
    pub invalid_memory_access_count: u32,
    pub interrupt_dispatch_count: u32,
    pub critical_section_cycles: u64,
    pub timer_overflow_count: u64,
    pub gpio_state_change_count: u32,
    pub pwm_active_cycles: u64,
}

/// Previous-step PIN register snapshot, for pin-change/external-interrupt
/// edge detection (`pcint.rs`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PrevPins {
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
}

pub struct McuState {
    pub profile: &'static BoardProfile,
    pub flash: Vec<u8>,
    pub sram: Vec<u8>,
    pub eeprom: Vec<u8>,
    pub io: Vec<u8>,
    pub regs: [u8; 32],
    pub pc: u16,
    pub sreg: u8,
    pub tick_count: u64,

    /// Commanded input per logical pin; `None` = "don't override" (the port's
    /// own PORTx bit keeps driving PINx on input-configured pins).
    pub pin_inputs: Vec<Option<bool>>,
    pub analog_inputs: [f32; 16],

    pub timers: Vec<TimerUnit>,
    pub uarts: Vec<UartChannel>,
    pub adc: AdcUnit,
    pub spi: SpiUnit,
    pub twi: TwiUnit,
    pub wdt: WdtUnit,
    pub prev_pins: PrevPins,

    pub firmware_loaded: bool,
    pub diagnostics: Diagnostics,

    /// Set when the watchdog armed a reset; applied at the end of the
    /// current step rather than mid-instruction.
    pub pending_wdt_reset: bool,
}

impl McuState {
    pub fn new(profile: &'static BoardProfile) -> Self {
        let mut mcu = McuState {
            profile,
            flash: vec![0; profile.flash_bytes],
            sram: vec![0; profile.sram_bytes],
            eeprom: vec![0; profile.eeprom_bytes],
            io: vec![0; profile.io_bytes],
            regs: [0; 32],
            pc: 0,
            sreg: 0,
            tick_count: 0,
            pin_inputs: vec![None; profile.pin_count],
            analog_inputs: [0.0; 16],
            timers: (0..6).map(|i| TimerUnit::new(profile.family, i)).collect(),
            uarts: (0..4).map(|i| UartChannel::new(profile.family, i)).collect(),
            adc: AdcUnit::new(),
            spi: SpiUnit::new(),
            twi: TwiUnit::new(),
            wdt: WdtUnit::new(),
            prev_pins: PrevPins::default(),
            firmware_loaded: false,
            diagnostics: Diagnostics::default(),
            pending_wdt_reset: false,
        };
        mcu.sp_set(profile.sram_start() as u16 + profile.sram_bytes as u16 - 1);
        mcu
    }

    /// Stack pointer, read from the SPL/SPH IO mirror.
    pub fn sp(&self) -> u16 {
        self.io[io::SPL] as u16 | ((self.io[io::SPH] as u16) << 8)
    }

    pub fn sp_set(&mut self, value: u16) {
        self.io[io::SPL] = (value & 0xFF) as u8;
        self.io[io::SPH] = (value >> 8) as u8;
    }

    /// Hard reset: zeros flash, SRAM, EEPROM, IO, registers, all peripheral
    /// transient state. Used by `Reset` and by every firmware load.
    pub fn hard_reset(&mut self) {
        self.flash.iter_mut().for_each(|b| *b = 0);
        self.soft_reset();
    }

    /// Soft reset: preserves flash and EEPROM, clears everything else
    /// (general registers, SRAM, IO, peripheral transient state, tick count).
    pub fn soft_reset(&mut self) {
        self.sram.iter_mut().for_each(|b| *b = 0);
        self.io.iter_mut().for_each(|b| *b = 0);
        self.regs = [0; 32];
        self.pc = 0;
        self.sreg = 0;
        self.tick_count = 0;
        for t in self.timers.iter_mut() {
            t.reset();
        }
        for u in self.uarts.iter_mut() {
            u.reset(0);
        }
        self.adc.reset(0);
        self.spi.reset();
        self.twi.reset();
        self.wdt.reset();
        self.prev_pins = PrevPins::default();
        self.pending_wdt_reset = false;
        self.diagnostics = Diagnostics::default();
        self.sp_set(self.profile.sram_start() as u16 + self.profile.sram_bytes as u16 - 1);
    }

    /// Unified data-space read: registers, then IO, then SRAM.
    pub fn data_read(&mut self, addr: u16) -> u8 {
        let addr = addr as usize;
        if addr < 32 {
            self.regs[addr]
        } else if addr < 32 + self.profile.io_bytes {
            self.on_io_read(addr - 32);
            self.io[addr - 32]
        } else if addr >= self.profile.sram_start() && addr < self.profile.sram_start() + self.sram.len() {
            self.sram[addr - self.profile.sram_start()]
        } else {
            self.diagnostics.invalid_memory_access_count += 1;
            0
        }
    }

    /// Unified data-space write: registers, then IO, then SRAM.
    pub fn data_write(&mut self, addr: u16, value: u8) {
        let addr = addr as usize;
        if addr < 32 {
            self.regs[addr] = value;
        } else if addr < 32 + self.profile.io_bytes {
            self.io_write(addr - 32, value);
        } else if addr >= self.profile.sram_start() && addr < self.profile.sram_start() + self.sram.len() {
            self.sram[addr - self.profile.sram_start()] = value;
            let sp = self.sp();
            let depth = self.profile.sram_start() as u32 + self.sram.len() as u32 - sp as u32;
            if depth > self.diagnostics.stack_high_water_mark {
                self.diagnostics.stack_high_water_mark = depth;
            }
        } else {
            self.diagnostics.invalid_memory_access_count += 1;
        }
    }

    /// IO write with the per-register side effects modeled as write hooks:
    /// SP mirroring, UDRn, UCSRnA write-1-to-clear, SPDR/SPSR, TWCR/TWDR,
    /// ADCSRA, WDTCSR.
    fn io_write(&mut self, reg: usize, value: u8) {
        let before = self.io[reg];
        self.io[reg] = value;
        match reg {
            io::SPL | io::SPH => { /* already mirrored via self.io */ }
            r if r == io::UDR0 => {
                self.uarts[0].write_udr(&mut self.io);
            }
            r if r == io::UDR1 => {
                self.uarts[1].write_udr(&mut self.io);
            }
            r if r == io::UDR2 => {
                self.uarts[2].write_udr(&mut self.io);
            }
            r if r == io::UDR3 => {
                self.uarts[3].write_udr(&mut self.io);
            }
            r if r == io::UCSR0A => {
                self.io[reg] = crate::uart::apply_ucsra_write1_clear(before, value);
            }
            r if r == io::UCSR1A => {
                self.io[reg] = crate::uart::apply_ucsra_write1_clear(before, value);
            }
            r if r == io::UCSR2A => {
                self.io[reg] = crate::uart::apply_ucsra_write1_clear(before, value);
            }
            r if r == io::UCSR3A => {
                self.io[reg] = crate::uart::apply_ucsra_write1_clear(before, value);
            }
            r if r == io::UCSR0B => self.uarts[0].write_ucsrb_side_effect(&mut self.io),
            r if r == io::UCSR1B => self.uarts[1].write_ucsrb_side_effect(&mut self.io),
            r if r == io::UCSR2B => self.uarts[2].write_ucsrb_side_effect(&mut self.io),
            r if r == io::UCSR3B => self.uarts[3].write_ucsrb_side_effect(&mut self.io),
            r if r == io::SPDR => self.spi.on_spdr_write(&mut self.io),
            r if r == io::TWCR => self.twi.on_twcr_write(&mut self.io),
            r if r == io::TWDR => self.twi.on_twdr_write(&self.io),
            r if r == io::ADCSRA => self.adc.on_adcsra_write(&mut self.io),
            r if r == io::WDTCSR => {
                self.wdt.on_wdtcsr_write(before, value);
                if value & (crate::wdt::WDE | crate::wdt::WDIE) != 0 {
                    self.wdt.arm(value, self.profile.effective_cpu_hz());
                }
            }
            _ => {}
        }
        if matches!(reg, r if [io::PORTB, io::PORTC, io::PORTD, io::DDRB, io::DDRC, io::DDRD].contains(&r))
            && before != self.io[reg]
        {
            self.diagnostics.gpio_state_change_count += 1;
        }
    }

    /// IO read with the read-side side effects: RXC clear on UDRn read, the
    /// SPSR-then-SPDR SPIF/WCOL clear sequence.
    fn on_io_read(&mut self, reg: usize) {
        match reg {
            r if r == io::UDR0 => self.uarts[0].read_udr_side_effect(&mut self.io),
            r if r == io::UDR1 => self.uarts[1].read_udr_side_effect(&mut self.io),
            r if r == io::UDR2 => self.uarts[2].read_udr_side_effect(&mut self.io),
            r if r == io::UDR3 => self.uarts[3].read_udr_side_effect(&mut self.io),
            r if r == io::SPSR => self.spi.on_spsr_read(&self.io),
            r if r == io::SPDR => self.spi.on_spdr_read(&mut self.io),
            _ => {}
        }
    }

    /// Advance every peripheral by `executed` cycles, scheduled after each
    /// CPU instruction. Also runs the pin-change/external interrupt
    /// edge-check once the step's input sync has happened.
    pub fn tick_peripherals(&mut self, executed: u64) {
        crate::timers::tick_all(self, executed);
        crate::uart::tick_all(self, executed);
        crate::adc::tick(self, executed);
        crate::spi::tick(self, executed);
        crate::twi::tick(self, executed);
        if self.wdt.tick(executed, &mut self.io) {
            self.diagnostics.wdt_resets += 1;
            self.pending_wdt_reset = true;
        }
        if self.sreg & 0x80 == 0 {
            self.diagnostics.critical_section_cycles += executed;
        }
        let any_pwm = (0..6).any(|i| self.timers[i].in_active_pwm_mode(&self.io));
        if any_pwm {
            self.diagnostics.pwm_active_cycles += executed;
        }
    }

    /// Edge-detect pin-change and external interrupts against the previous
    /// step's PIN register snapshot, then update the snapshot.
    pub fn update_pin_edges(&mut self) {
        PinEdgeTracker::update(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::UNO;

    #[test]
    fn hard_reset_zeros_flash_soft_reset_preserves_it() {
        let mut mcu = McuState::new(&UNO);
        mcu.flash[10] = 0xAB;
        mcu.eeprom[3] = 0xCD;
        mcu.soft_reset();
        assert_eq!(mcu.flash[10], 0xAB);
        assert_eq!(mcu.eeprom[3], 0xCD);
        mcu.hard_reset();
        assert_eq!(mcu.flash[10], 0);
        assert_eq!(mcu.eeprom[3], 0xCD);
    }

    #[test]
    fn sp_write_mirrors_through_spl_sph() {
        let mut mcu = McuState::new(&UNO);
        mcu.data_write(0x20 + io::SPL as u16, 0x34);
        mcu.data_write(0x20 + io::SPH as u16, 0x12);
        assert_eq!(mcu.sp(), 0x1234);
    }

    #[test]
    fn out_of_range_data_access_is_counted_not_fatal() {
        let mut mcu = McuState::new(&UNO);
        let huge = (mcu.profile.sram_start() + mcu.sram.len() + 100) as u16;
        mcu.data_write(huge, 0x11);
        assert_eq!(mcu.diagnostics.invalid_memory_access_count, 1);
    }
}
