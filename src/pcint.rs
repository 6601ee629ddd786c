//! Pin-change (PCINT0/1/2) and external (INT0/1, INT4/5 on the 2560)
//! interrupt flag generation. Runs once per step, after input sync, by
//! comparing the freshly-synced PINx registers to the previous step's values.

use crate::board::McuFamily;
use crate::io_regs as io;
use crate::mcu::McuState;

pub struct PinEdgeTracker;

impl PinEdgeTracker {
    pub fn update(mcu: &mut McuState) {
        let cur_b = mcu.io[io::PINB];
        let cur_c = mcu.io[io::PINC];
        let cur_d = mcu.io[io::PIND];
        let cur_e = if mcu.profile.family == McuFamily::M2560 { mcu.io[io::PINE] } else { 0 };

        let changed_b = cur_b ^ mcu.prev_pins.b;
        let changed_c = cur_c ^ mcu.prev_pins.c;
        let changed_d = cur_d ^ mcu.prev_pins.d;
        let changed_e = cur_e ^ mcu.prev_pins.e;

        if mcu.io[io::PCICR] & 0b001 != 0 && changed_b & mcu.io[io::PCMSK0] != 0 {
            mcu.io[io::PCIFR] |= 0b001;
        }
        if mcu.io[io::PCICR] & 0b010 != 0 && changed_c & mcu.io[io::PCMSK1] != 0 {
            mcu.io[io::PCIFR] |= 0b010;
        }
        if mcu.io[io::PCICR] & 0b100 != 0 && changed_d & mcu.io[io::PCMSK2] != 0 {
            mcu.io[io::PCIFR] |= 0b100;
        }

        // INT0 = PORTD bit 2, INT1 = PORTD bit 3 on both families.
        let eimsk = mcu.io[io::EIMSK];
        if eimsk & 0b01 != 0 && changed_d & 0b0000_0100 != 0 {
            mcu.io[io::EIFR] |= 0b01;
        }
        if eimsk & 0b10 != 0 && changed_d & 0b0000_1000 != 0 {
            mcu.io[io::EIFR] |= 0b10;
        }
        // INT4/INT5 on the 2560 live on PORTE bits 4/5.
        if mcu.profile.family == McuFamily::M2560 {
            if eimsk & 0b0001_0000 != 0 && changed_e & 0b0001_0000 != 0 {
                mcu.io[io::EIFR] |= 0b0001_0000;
            }
            if eimsk & 0b0010_0000 != 0 && changed_e & 0b0010_0000 != 0 {
                mcu.io[io::EIFR] |= 0b0010_0000;
            }
        }

        mcu.prev_pins.b = cur_b;
        mcu.prev_pins.c = cur_c;
        mcu.prev_pins.d = cur_d;
        mcu.prev_pins.e = cur_e;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::UNO;

    #[test]
    fn pin_change_on_portb_sets_pcif0() {
        let mut mcu = McuState::new(&UNO);
        mcu.io[io::PCICR] = 0b001;
        mcu.io[io::PCMSK0] = 0xFF;
        mcu.prev_pins.b = 0x00;
        mcu.io[io::PINB] = 0x01;
        PinEdgeTracker::update(&mut mcu);
        assert_eq!(mcu.io[io::PCIFR] & 0b001, 0b001);
    }

    #[test]
    fn int0_rising_edge_sets_eifr_when_enabled() {
        let mut mcu = McuState::new(&UNO);
        mcu.io[io::EIMSK] = 0b01;
        mcu.prev_pins.d = 0x00;
        mcu.io[io::PIND] = 0b0000_0100;
        PinEdgeTracker::update(&mut mcu);
        assert_eq!(mcu.io[io::EIFR] & 0b01, 0b01);
    }
}
