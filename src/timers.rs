//! General-purpose timers 0 (8-bit), 1/3/4/5 (16-bit), 2 (8-bit, async
//! prescaler). Ticked once per CPU step with the instruction's retired
//! cycle count; a per-timer `f64` residual absorbs the fractional cycles the
//! prescaler divide leaves behind.

use crate::board::{BoardProfile, McuFamily};
use crate::io_regs as io;
use crate::mcu::McuState;
use crate::pins::pin_to_port;

#[derive(Debug, Clone, Copy)]
struct TimerAddrs {
    tccra: usize,
    tccrb: usize,
    tcnt_lo: usize,
    tcnt_hi: Option<usize>,
    ocra_lo: usize,
    ocra_hi: Option<usize>,
    ocrb_lo: usize,
    ocrb_hi: Option<usize>,
    icr_lo: Option<usize>,
    icr_hi: Option<usize>,
    tifr: usize,
    timsk: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaveMode {
    Normal,
    Ctc,
    FastPwm,
    PhaseCorrectPwm,
}

#[derive(Debug, Clone)]
pub struct TimerUnit {
    pub index: usize,
    is16: bool,
    residual: f64,
    up: bool,
    addrs: TimerAddrs,
}

fn addrs_8bit(tccra: usize, tccrb: usize, tcnt: usize, ocra: usize, ocrb: usize, tifr: usize, timsk: usize) -> TimerAddrs {
    TimerAddrs {
        tccra,
        tccrb,
        tcnt_lo: tcnt,
        tcnt_hi: None,
        ocra_lo: ocra,
        ocra_hi: None,
        ocrb_lo: ocrb,
        ocrb_hi: None,
        icr_lo: None,
        icr_hi: None,
        tifr,
        timsk,
    }
}

#[allow(clippy::too_many_arguments)]
fn addrs_16bit(
    tccra: usize,
    tccrb: usize,
    tcnt_lo: usize,
    tcnt_hi: usize,
    ocra_lo: usize,
    ocra_hi: usize,
    ocrb_lo: usize,
    ocrb_hi: usize,
    icr_lo: usize,
    icr_hi: usize,
    tifr: usize,
    timsk: usize,
) -> TimerAddrs {
    TimerAddrs {
        tccra,
        tccrb,
        tcnt_lo,
        tcnt_hi: Some(tcnt_hi),
        ocra_lo,
        ocra_hi: Some(ocra_hi),
        ocrb_lo,
        ocrb_hi: Some(ocrb_hi),
        icr_lo: Some(icr_lo),
        icr_hi: Some(icr_hi),
        tifr,
        timsk,
    }
}

fn layout(family: McuFamily, index: usize) -> TimerAddrs {
    match index {
        0 => addrs_8bit(io::TCCR0A, io::TCCR0B, io::TCNT0, io::OCR0A, io::OCR0B, io::TIFR0, io::TIMSK0),
        2 => addrs_8bit(io::TCCR2A, io::TCCR2B, io::TCNT2, io::OCR2A, io::OCR2B, io::TIFR2, io::TIMSK2),
        1 => addrs_16bit(
            io::TCCR1A, io::TCCR1B, io::TCNT1L, io::TCNT1H, io::OCR1AL, io::OCR1AH, io::OCR1BL, io::OCR1BH,
            io::ICR1L, io::ICR1H, io::TIFR1, io::TIMSK1,
        ),
        3 if family == McuFamily::M2560 => addrs_16bit(
            io::TCCR3A, io::TCCR3B, io::TCNT3L, io::TCNT3H, io::OCR3AL, io::OCR3AH, io::OCR3BL, io::OCR3BH,
            io::ICR3L, io::ICR3H, io::TIFR3, io::TIMSK3,
        ),
        4 if family == McuFamily::M2560 => addrs_16bit(
            io::TCCR4A, io::TCCR4B, io::TCNT4L, io::TCNT4H, io::OCR4AL, io::OCR4AH, io::OCR4BL, io::OCR4BH,
            io::ICR4L, io::ICR4H, io::TIFR4, io::TIMSK4,
        ),
        5 if family == McuFamily::M2560 => addrs_16bit(
            io::TCCR5A, io::TCCR5B, io::TCNT5L, io::TCNT5H, io::OCR5AL, io::OCR5AH, io::OCR5BL, io::OCR5BH,
            io::ICR5L, io::ICR5H, io::TIFR5, io::TIMSK5,
        ),
        // Timers 3/4/5 don't exist on the 328P; give them an inert layout
        // aliased onto scratch GPIOR registers so reads/writes are harmless.
        _ => addrs_8bit(io::GPIOR1, io::GPIOR2, io::GPIOR0, io::GPIOR0, io::GPIOR0, io::TIFR0, io::TIMSK0),
    }
}

/// Pins driven by each timer's two (or three) compare units, by family.
/// `(timer_index, unit) -> logical pin`. Unit 0 = A, 1 = B.
fn pwm_pin(family: McuFamily, timer_index: usize, unit: usize) -> Option<usize> {
    match family {
        McuFamily::M328P => match (timer_index, unit) {
            (0, 0) => Some(6),  // OC0A -> D6
            (0, 1) => Some(5),  // OC0B -> D5
            (1, 0) => Some(9),  // OC1A -> D9
            (1, 1) => Some(10), // OC1B -> D10
            (2, 0) => Some(11), // OC2A -> D11
            (2, 1) => Some(3),  // OC2B -> D3
            _ => None,
        },
        McuFamily::M2560 => match (timer_index, unit) {
            (0, 0) => Some(13),
            (0, 1) => Some(4),
            (1, 0) => Some(11),
            (1, 1) => Some(12),
            (2, 0) => Some(10),
            (2, 1) => Some(9),
            (3, 0) => Some(5),
            (3, 1) => Some(2),
            (4, 0) => Some(6),
            (4, 1) => Some(7),
            (5, 0) => Some(46),
            (5, 1) => Some(45),
            _ => None,
        },
    }
}

impl TimerUnit {
    pub fn new(family: McuFamily, index: usize) -> Self {
        TimerUnit {
            index,
            is16: matches!(index, 1 | 3 | 4 | 5),
            residual: 0.0,
            up: true,
            addrs: layout(family, index),
        }
    }

    pub fn reset(&mut self) {
        self.residual = 0.0;
        self.up = true;
    }

    fn prescaler(&self, cs: u8) -> u32 {
        if self.index == 2 {
            match cs {
                1 => 1,
                2 => 8,
                3 => 32,
                4 => 64,
                5 => 128,
                6 => 256,
                7 => 1024,
                _ => 0,
            }
        } else {
            match cs {
                1 => 1,
                2 => 8,
                3 => 64,
                4 => 256,
                5 => 1024,
                // 6/7 select external clock pins, which this core does not
                // model; treat as stopped.
                _ => 0,
            }
        }
    }

    fn read16(io: &[u8], lo: usize, hi: usize) -> u32 {
        io[lo] as u32 | ((io[hi] as u32) << 8)
    }

    fn write16(io: &mut [u8], lo: usize, hi: usize, val: u32) {
        io[lo] = (val & 0xFF) as u8;
        io[hi] = ((val >> 8) & 0xFF) as u8;
    }

    fn counter(&self, io: &[u8]) -> u32 {
        if self.is16 {
            Self::read16(io, self.addrs.tcnt_lo, self.addrs.tcnt_hi.unwrap())
        } else {
            io[self.addrs.tcnt_lo] as u32
        }
    }

    fn set_counter(&self, io: &mut [u8], val: u32) {
        if self.is16 {
            Self::write16(io, self.addrs.tcnt_lo, self.addrs.tcnt_hi.unwrap(), val);
        } else {
            io[self.addrs.tcnt_lo] = val as u8;
        }
    }

    fn ocra(&self, io: &[u8]) -> u32 {
        if self.is16 {
            Self::read16(io, self.addrs.ocra_lo, self.addrs.ocra_hi.unwrap())
        } else {
            io[self.addrs.ocra_lo] as u32
        }
    }

    fn ocrb(&self, io: &[u8]) -> u32 {
        if self.is16 {
            Self::read16(io, self.addrs.ocrb_lo, self.addrs.ocrb_hi.unwrap())
        } else {
            io[self.addrs.ocrb_lo] as u32
        }
    }

    fn icr(&self, io: &[u8]) -> u32 {
        match (self.addrs.icr_lo, self.addrs.icr_hi) {
            (Some(lo), Some(hi)) => Self::read16(io, lo, hi),
            _ => 0,
        }
    }

    fn mode(&self, io: &[u8]) -> (WaveMode, u32) {
        let tccra = io[self.addrs.tccra];
        let tccrb = io[self.addrs.tccrb];
        if self.is16 {
            let wgm = (((tccrb >> 3) & 0b11) << 2) | (tccra & 0b11);
            match wgm {
                0 => (WaveMode::Normal, 0xFFFF),
                1 => (WaveMode::PhaseCorrectPwm, 0x00FF),
                2 => (WaveMode::PhaseCorrectPwm, 0x01FF),
                3 => (WaveMode::PhaseCorrectPwm, 0x03FF),
                4 => (WaveMode::Ctc, self.ocra(io)),
                5 => (WaveMode::FastPwm, 0x00FF),
                6 => (WaveMode::FastPwm, 0x01FF),
                7 => (WaveMode::FastPwm, 0x03FF),
                8 => (WaveMode::PhaseCorrectPwm, self.icr(io)),
                9 => (WaveMode::PhaseCorrectPwm, self.ocra(io)),
                10 => (WaveMode::PhaseCorrectPwm, self.icr(io)),
                11 => (WaveMode::PhaseCorrectPwm, self.ocra(io)),
                12 => (WaveMode::Ctc, self.icr(io)),
                14 => (WaveMode::FastPwm, self.icr(io)),
                15 => (WaveMode::FastPwm, self.ocra(io)),
                _ => (WaveMode::Normal, 0xFFFF),
            }
        } else {
            let wgm = (((tccrb >> 3) & 1) << 2) | (tccra & 0b11);
            match wgm {
                0 => (WaveMode::Normal, 0xFF),
                1 => (WaveMode::PhaseCorrectPwm, 0xFF),
                2 => (WaveMode::Ctc, self.ocra(io)),
                3 => (WaveMode::FastPwm, 0xFF),
                5 => (WaveMode::PhaseCorrectPwm, self.ocra(io)),
                7 => (WaveMode::FastPwm, self.ocra(io)),
                _ => (WaveMode::Normal, 0xFF),
            }
        }
    }

    /// Advance by `executed` CPU cycles; returns true if the counter wrapped
    /// (TOV) at least once.
    pub fn tick(&mut self, io: &mut [u8], executed: u64) -> bool {
        let cs = io[self.addrs.tccrb] & 0b111;
        let prescaler = self.prescaler(cs);
        if prescaler == 0 {
            return false;
        }
        let scaled = executed as f64 / prescaler as f64 + self.residual;
        let ticks = scaled.floor() as u64;
        self.residual = scaled - scaled.floor();
        if ticks == 0 {
            return false;
        }
        let (mode, top) = self.mode(io);
        let top = top.max(1);
        let before = self.counter(io);
        let ocra = self.ocra(io);
        let ocrb = self.ocrb(io);
        let mut wrapped = false;
        let mut ocfa = false;
        let mut ocfb = false;

        match mode {
            WaveMode::Normal | WaveMode::Ctc | WaveMode::FastPwm => {
                let period = top as u64 + 1;
                wrapped = before as u64 + ticks >= period;
                ocfa = crosses(before, ticks, period as u32, ocra);
                ocfb = crosses(before, ticks, period as u32, ocrb);
                let after = ((before as u64 + ticks) % period) as u32;
                self.set_counter(io, after);
            }
            WaveMode::PhaseCorrectPwm => {
                let period = (top as u64) * 2;
                let period = period.max(1);
                let pos_before = if self.up { before as u64 } else { period - before as u64 };
                let pos_after = pos_before + ticks;
                wrapped = pos_after >= period;
                ocfa = crosses(pos_before as u32, ticks, period as u32, ocra)
                    || crosses(pos_before as u32, ticks, period as u32, period as u32 - ocra);
                ocfb = crosses(pos_before as u32, ticks, period as u32, ocrb)
                    || crosses(pos_before as u32, ticks, period as u32, period as u32 - ocrb);
                let pos_final = pos_after % period;
                if pos_final <= top as u64 {
                    self.up = true;
                    self.set_counter(io, pos_final as u32);
                } else {
                    self.up = false;
                    self.set_counter(io, (period - pos_final) as u32);
                }
            }
        }

        if wrapped {
            io[self.addrs.tifr] |= 0b0000_0001; // TOVn
        }
        if ocfa {
            io[self.addrs.tifr] |= 0b0000_0010; // OCFnA
        }
        if ocfb {
            io[self.addrs.tifr] |= 0b0000_0100; // OCFnB
        }
        wrapped
    }

    /// Whether this unit's waveform-generation mode is currently a PWM mode
    /// (fast or phase-correct), for the PWM-active-cycle diagnostic.
    pub fn in_active_pwm_mode(&self, io: &[u8]) -> bool {
        matches!(self.mode(io).0, WaveMode::FastPwm | WaveMode::PhaseCorrectPwm)
    }

    /// Compute the duty-scaled output pin state, for output sampling.
    /// Returns `None` if this unit isn't driving compare output on its pin.
    pub fn pwm_duty(&self, io: &[u8], unit: usize) -> Option<u8> {
        let (mode, top) = self.mode(io);
        if !matches!(mode, WaveMode::FastPwm | WaveMode::PhaseCorrectPwm) {
            return None;
        }
        let tccra = io[self.addrs.tccra];
        let com_bits = if unit == 0 { (tccra >> 6) & 0b11 } else { (tccra >> 4) & 0b11 };
        if com_bits == 0 {
            return None;
        }
        let ocr = if unit == 0 { self.ocra(io) } else { self.ocrb(io) };
        if top == 0 {
            return Some(0);
        }
        let duty = ((255.0 * ocr as f64 / top as f64).round()) as i64;
        Some(duty.clamp(0, 255) as u8)
    }
}

fn crosses(before: u32, ticks: u64, period: u32, target: u32) -> bool {
    if period == 0 {
        return false;
    }
    if ticks >= period as u64 {
        return true;
    }
    let target = target % period;
    let distance = ((target as i64 - before as i64).rem_euclid(period as i64)) as u64;
    distance < ticks
}

/// Tick every timer and write PWM-driven output pins. Called once per CPU
/// step from `McuState::advance`.
pub fn tick_all(mcu: &mut McuState, executed: u64) {
    for i in 0..6 {
        let wrapped = mcu.timers[i].tick(&mut mcu.io, executed);
        if wrapped {
            mcu.diagnostics.timer_overflow_count += 1;
        }
    }
}

/// Sample the PWM-driven output byte for a logical pin, if any timer compare
/// unit drives it and its DDR bit is configured as output.
pub fn pwm_output_for_pin(mcu: &McuState, profile: &BoardProfile, pin: usize) -> Option<u8> {
    let route = pin_to_port(profile.family, pin)?;
    if mcu.io[route.addrs.ddr] & (1 << route.bit) == 0 {
        return None;
    }
    for i in 0..6 {
        for unit in 0..2 {
            if pwm_pin(profile.family, i, unit) == Some(pin) {
                if let Some(duty) = mcu.timers[i].pwm_duty(&mcu.io, unit) {
                    return Some(duty);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::UNO;
    use crate::mcu::McuState;

    #[test]
    fn timer1_normal_wraps_after_65536_cycles() {
        let mut mcu = McuState::new(&UNO);
        mcu.io[io::TCCR1B] = 0b0000_0001; // CS10, Normal mode
        tick_all(&mut mcu, 65536);
        assert_eq!(mcu.io[io::TIFR1] & 0b1, 0b1);
        assert_eq!(mcu.timers[1].counter(&mcu.io), 0);
    }

    #[test]
    fn timer0_fast_pwm_wgm_bits_decode_from_tccr0a_bits_1_0() {
        let mut mcu = McuState::new(&UNO);
        // WGM02=0 (TCCR0B bit3), WGM01=1, WGM00=1 (TCCR0A bits 1:0) -> Fast PWM, TOP=0xFF.
        mcu.io[io::TCCR0A] = 0b0000_0011;
        mcu.io[io::TCCR0B] = 0b0000_0000;
        let (wave_mode, top) = mcu.timers[0].mode(&mcu.io);
        assert_eq!(wave_mode, WaveMode::FastPwm);
        assert_eq!(top, 0xFF);
    }

    #[test]
    fn timer0_ctc_and_phase_correct_wgm_bits_decode_from_tccr0a_bits_1_0() {
        let mut mcu = McuState::new(&UNO);
        mcu.io[io::TCCR0A] = 0b0000_0010; // WGM01=1, WGM00=0 -> CTC
        let (wave_mode, _) = mcu.timers[0].mode(&mcu.io);
        assert_eq!(wave_mode, WaveMode::Ctc);

        mcu.io[io::TCCR0A] = 0b0000_0001; // WGM01=0, WGM00=1 -> Phase Correct PWM
        let (wave_mode, top) = mcu.timers[0].mode(&mcu.io);
        assert_eq!(wave_mode, WaveMode::PhaseCorrectPwm);
        assert_eq!(top, 0xFF);
    }

    #[test]
    fn fast_pwm_zero_compare_is_always_low() {
        let mut mcu = McuState::new(&UNO);
        // Fast PWM, TOP=0xFF, OC0A output enabled, OCR0A = 0.
        mcu.io[io::TCCR0A] = 0b1000_0011;
        mcu.io[io::TCCR0B] = 0b0000_0001;
        mcu.io[io::OCR0A] = 0;
        mcu.io[io::DDRD] |= 1 << 6;
        tick_all(&mut mcu, 1000);
        let duty = pwm_output_for_pin(&mcu, &UNO, 6).unwrap();
        assert_eq!(duty, 0);
    }
}
