//! Logical pin <-> (DDRx, PORTx, PINx, bit) routing, per board family.
//!
//! The pin router is the single source of truth for which port backs a given
//! logical pin index; timer PWM output and input-sync both look addresses up
//! here rather than hard-coding port literals.

use crate::board::{BoardProfile, McuFamily};
use crate::io_regs as io;
use crate::mcu::McuState;
use crate::timers;

/// Value emitted for a pin whose DDR bit reads as input, or for a logical
/// pin index with no backing port.
pub const UNKNOWN_PIN_VALUE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAddrs {
    pub ddr: usize,
    pub port: usize,
    pub pin: usize,
}

/// Where a logical pin index lands: which port register triple, and which
/// bit within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinRoute {
    pub addrs: PortAddrs,
    pub bit: u8,
}

fn route(ddr: usize, port: usize, pin: usize, bit: u8) -> Option<PinRoute> {
    Some(PinRoute { addrs: PortAddrs { ddr, port, pin }, bit })
}

/// Resolve a logical pin index (0-based, digital pins first, then the 16
/// analog channels as `Ax`) to its backing port/bit, or `None` if the index
/// has no backing port ("unmapped pins are silently ignored for IO").
pub fn pin_to_port(family: McuFamily, pin: usize) -> Option<PinRoute> {
    match family {
        McuFamily::M328P => route_328p(pin),
        McuFamily::M2560 => route_2560(pin),
    }
}

fn route_328p(pin: usize) -> Option<PinRoute> {
    match pin {
        // D0..D7 = PORTD
        0..=7 => route(io::DDRD, io::PORTD, io::PIND, pin as u8),
        // D8..D13 = PORTB
        8..=13 => route(io::DDRB, io::PORTB, io::PINB, (pin - 8) as u8),
        // A0..A5 = PORTC (analog channels occupy indices 14..19)
        14..=19 => route(io::DDRC, io::PORTC, io::PINC, (pin - 14) as u8),
        _ => None,
    }
}

fn route_2560(pin: usize) -> Option<PinRoute> {
    use io::*;
    let pb = |bit| route(DDRB, PORTB, PINB, bit);
    let pd = |bit| route(DDRD, PORTD, PIND, bit);
    let pe = |bit| route(DDRE, PORTE, PINE, bit);
    let pa = |bit| route(DDRA, PORTA, PINA, bit);
    let pc = |bit| route(DDRC, PORTC, PINC, bit);
    let pg = |bit| route(DDRG, PORTG, PING, bit);
    let ph = |bit| route(DDRH, PORTH, PINH, bit);
    let pj = |bit| route(DDRJ, PORTJ, PINJ, bit);
    let pl = |bit| route(DDRL, PORTL, PINL, bit);
    let pf = |bit| route(DDRF, PORTF, PINF, bit);
    let pk = |bit| route(DDRK, PORTK, PINK, bit);
    match pin {
        0 => pe(0),
        1 => pe(1),
        2 => pe(4),
        3 => pe(5),
        4 => pg(5),
        5 => pe(3),
        6 => ph(3),
        7 => ph(4),
        8 => ph(5),
        9 => ph(6),
        10 => pb(4),
        11 => pb(5),
        12 => pb(6),
        13 => pb(7),
        14 => pj(1),
        15 => pj(0),
        16 => ph(1),
        17 => ph(0),
        18 => pd(3),
        19 => pd(2),
        20 => pd(1),
        21 => pd(0),
        22..=29 => pa((pin - 22) as u8),
        // 30..37 = PORTC7-0 (descending)
        30..=37 => pc((37 - pin) as u8),
        38 => pd(7),
        // 39..41 = PORTG2-0 (descending)
        39..=41 => pg((41 - pin) as u8),
        // 42..49 = PORTL7-0 (descending)
        42..=49 => pl((49 - pin) as u8),
        // 50..53 = PORTB3-0 (descending)
        50..=53 => pb((53 - pin) as u8),
        // Analog channels: A0..A7 = PORTF0-7, A8..A15 = PORTK0-7
        54..=61 => pf((pin - 54) as u8),
        62..=69 => pk((pin - 62) as u8),
        _ => None,
    }
}

/// Once per step, before the CPU executes: for every pin with a commanded
/// input, either force the PIN bit (input-configured pins) or mirror PORT
/// into PIN (output-configured pins).
pub fn sync_inputs(mcu: &mut McuState, profile: &'static BoardProfile, pin_inputs: &[Option<bool>]) {
    for (pin, commanded) in pin_inputs.iter().enumerate() {
        let commanded = match commanded {
            Some(v) => *v,
            None => continue,
        };
        let route = match pin_to_port(profile.family, pin) {
            Some(r) => r,
            None => continue,
        };
        let is_input = mcu.io[route.addrs.ddr] & (1 << route.bit) == 0;
        let mut pin_reg = mcu.io[route.addrs.pin];
        if is_input {
            if commanded {
                pin_reg |= 1 << route.bit;
            } else {
                pin_reg &= !(1 << route.bit);
            }
        } else {
            let port_bit = mcu.io[route.addrs.port] & (1 << route.bit) != 0;
            if port_bit {
                pin_reg |= 1 << route.bit;
            } else {
                pin_reg &= !(1 << route.bit);
            }
        }
        mcu.io[route.addrs.pin] = pin_reg;
    }
}

/// Output sampling: `0xFF` for input-configured pins, PWM duty for
/// hardware-driven compare outputs, else the raw digital `PORT` bit.
pub fn sample_outputs(mcu: &McuState, profile: &'static BoardProfile) -> Vec<u8> {
    (0..profile.pin_count)
        .map(|pin| {
            let route = match pin_to_port(profile.family, pin) {
                Some(r) => r,
                None => return UNKNOWN_PIN_VALUE,
            };
            if mcu.io[route.addrs.ddr] & (1 << route.bit) == 0 {
                return UNKNOWN_PIN_VALUE;
            }
            if let Some(duty) = timers::pwm_output_for_pin(mcu, profile, pin) {
                return duty;
            }
            if mcu.io[route.addrs.port] & (1 << route.bit) != 0 {
                1
            } else {
                0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uno_led_pin_is_portb5() {
        let r = pin_to_port(McuFamily::M328P, 13).unwrap();
        assert_eq!(r.addrs, PortAddrs { ddr: io::DDRB, port: io::PORTB, pin: io::PINB });
        assert_eq!(r.bit, 5);
    }

    #[test]
    fn mega_pin11_is_portb5() {
        let r = pin_to_port(McuFamily::M2560, 11).unwrap();
        assert_eq!(r.addrs.port, io::PORTB);
        assert_eq!(r.bit, 5);
    }

    #[test]
    fn out_of_range_pins_are_unmapped() {
        assert!(pin_to_port(McuFamily::M328P, 25).is_none());
        assert!(pin_to_port(McuFamily::M2560, 70).is_none());
    }
}
