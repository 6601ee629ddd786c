//! End-to-end scenarios exercising the session/lockstep driver, the
//! firmware loader, and the STK500 bridge together, the way a host
//! simulator would actually drive this core. Module-level `#[cfg(test)]`
//! blocks cover each peripheral in isolation; these tests cross module
//! boundaries the way a real run does.

use avr_lockstep::board::{McuFamily, BoardProfile, MEGA2560, UNO};
use avr_lockstep::io_regs as io;
use avr_lockstep::mcu::McuState;
use avr_lockstep::protocol::{self, StepPayload};
use avr_lockstep::session::{Registry, Session};
use avr_lockstep::stk500::Stk500Bridge;
use avr_lockstep::timers;

const CONTAINER_MAGIC: u32 = 0x4353_4E45;
const HEADER_SIZE: usize = 28;
const ENTRY_SIZE: usize = 20;
const FLAG_RAW: u32 = 1 << 4;

/// Build a minimal BVM container with one `.text` section, mirroring the
/// layout firmware.rs's own test helper builds.
fn build_container(program: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&CONTAINER_MAGIC.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());

    let mut name = [0u8; 8];
    name[..5].copy_from_slice(b".text");
    buf.extend_from_slice(&name);
    buf.extend_from_slice(&((HEADER_SIZE + ENTRY_SIZE) as u32).to_le_bytes());
    buf.extend_from_slice(&(program.len() as u32).to_le_bytes());
    buf.extend_from_slice(&FLAG_RAW.to_le_bytes());
    buf.extend_from_slice(program);
    buf
}

fn step_request(board_id: &str, seq: u64, delta_micros: u32) -> StepPayload {
    StepPayload {
        board_id: board_id.to_string(),
        step_sequence: seq,
        delta_micros,
        pins: [0u8; protocol::PIN_COUNT],
        analog: [0u16; protocol::ANALOG_COUNT],
        sent_micros: 0,
    }
}

#[test]
fn step_without_firmware_still_emits_unknown_pins_and_echoes_sequence() {
    let mut session = Session::new("uno-1".into(), &UNO, None, false);
    let (output, serial, _) = session.step(&step_request("uno-1", 3, 1_000_000));
    assert_eq!(output.step_sequence, 3);
    assert_eq!(output.tick_count, 0);
    assert!(output.pins.iter().all(|&p| p == protocol::UNKNOWN_PIN_VALUE));
    assert!(serial.is_empty());
}

#[test]
fn blink_firmware_advances_tick_count_by_exactly_one_second_of_cycles() {
    // LDI r16,0xFF ; OUT DDRB,r16 ; RJMP -1 (spins forever with DDRB set).
    let ddrb_a = (io::DDRB - 0x20) as u16;
    let out_op = 0xB800 | ((ddrb_a & 0x30) << 5) | (ddrb_a & 0x0F) | (16u16 << 4);
    let words: [u16; 3] = [0xE0FF, out_op, 0xCFFF];
    let mut program = Vec::new();
    for w in words {
        program.push((w & 0xFF) as u8);
        program.push((w >> 8) as u8);
    }
    let container = build_container(&program);

    let mut session = Session::new("uno-1".into(), &UNO, None, false);
    session.load_firmware(&container).unwrap();

    let (output, _, _) = session.step(&step_request("uno-1", 1, 1_000_000));
    assert_eq!(output.step_sequence, 1);
    assert_eq!(output.tick_count, 16_000_000);
    // DDRB is all-output now, PORTB starts at 0 -> digital low, not PWM.
    assert_eq!(output.pins[13], 0);
}

#[test]
fn determinism_two_independent_sessions_match_on_everything_but_timestamp() {
    let ddrb_a = (io::DDRB - 0x20) as u16;
    let out_op = 0xB800 | ((ddrb_a & 0x30) << 5) | (ddrb_a & 0x0F) | (16u16 << 4);
    let words: [u16; 3] = [0xE0FF, out_op, 0xCFFF];
    let mut program = Vec::new();
    for w in words {
        program.push((w & 0xFF) as u8);
        program.push((w >> 8) as u8);
    }
    let container = build_container(&program);

    let run = || {
        let mut session = Session::new("uno-1".into(), &UNO, None, false);
        session.load_firmware(&container).unwrap();
        let mut outputs = Vec::new();
        for seq in 1..=3u64 {
            let (output, _, _) = session.step(&step_request("uno-1", seq, 250_000));
            outputs.push(output);
        }
        outputs
    };

    let a = run();
    let b = run();
    assert_eq!(a.len(), b.len());
    for (oa, ob) in a.iter().zip(b.iter()) {
        assert_eq!(oa.step_sequence, ob.step_sequence);
        assert_eq!(oa.tick_count, ob.tick_count);
        assert_eq!(oa.pins, ob.pins);
        assert_eq!(oa.retired_cycles, ob.retired_cycles);
        assert_eq!(oa.adc_samples, ob.adc_samples);
        assert_eq!(oa.uart_bytes, ob.uart_bytes);
        assert_eq!(oa.spi_transfers, ob.spi_transfers);
        assert_eq!(oa.twi_transfers, ob.twi_transfers);
        assert_eq!(oa.wdt_resets, ob.wdt_resets);
        // debug_bits encodes PC/SP/SREG/profile sizes, not wall-clock time.
        assert_eq!(oa.debug_bits, ob.debug_bits);
    }
}

#[test]
fn adc_conversion_at_vref_half_completes_in_exactly_13_times_prescaler_cycles() {
    let mut mcu = McuState::new(&UNO);
    mcu.analog_inputs[0] = 2.5; // Vref/2 at the default AVCC (5V) reference
    mcu.data_write(0x20 + io::ADMUX as u16, 0);
    mcu.data_write(0x20 + io::ADCSRA as u16, 0b1100_0111); // ADEN | ADSC, ADPS=111 (/128)
    mcu.tick_peripherals(13 * 128);
    let adif_set = mcu.io[io::ADCSRA] & 0b0001_0000 != 0;
    let value = mcu.io[io::ADCL] as u16 | ((mcu.io[io::ADCH] as u16) << 8);
    assert!(adif_set, "ADIF should be set after the conversion completes");
    assert!((511..=513).contains(&value), "expected 512 +/- 1 noise, got {}", value);
}

#[test]
fn mega_timer1_fast_pwm_on_pin11_matches_expected_duty() {
    let mut mcu = McuState::new(&MEGA2560);
    // WGM13:10 = 0b1110 (Fast PWM, TOP=ICR1): WGM11 in TCCR1A, WGM13/12 in TCCR1B.
    mcu.io[io::TCCR1A] = 0b1000_0010; // COM1A1=1, WGM11=1
    mcu.io[io::TCCR1B] = 0b0001_1001; // WGM13=1, WGM12=1, CS10=1 (prescaler 1)
    mcu.io[io::ICR1L] = (799 & 0xFF) as u8;
    mcu.io[io::ICR1H] = (799 >> 8) as u8;
    mcu.io[io::OCR1AL] = (199 & 0xFF) as u8;
    mcu.io[io::OCR1AH] = (199 >> 8) as u8;
    mcu.io[io::DDRB] |= 1 << 5; // pin 11 on the 2560 is PORTB5

    timers::tick_all(&mut mcu, 1600);

    let duty = timers::pwm_output_for_pin(&mcu, &MEGA2560, 11).unwrap();
    assert!((62..=64).contains(&duty), "expected duty around 63, got {}", duty);
}

#[test]
fn watchdog_expiry_resets_tick_count_and_drops_pins_to_unknown() {
    let mut session = Session::new("uno-1".into(), &UNO, None, false);
    session.mcu.firmware_loaded = true; // all-zero flash is a field of NOPs
    session.mcu.data_write(0x20 + io::WDTCSR as u16, avr_lockstep::wdt::WDE); // WDE=1, WDP=0 (~16ms)

    let (output, _, _) = session.step(&step_request("uno-1", 1, 20_000));

    assert_eq!(output.wdt_resets, 1);
    assert_eq!(output.tick_count, 0);
    assert!(output.pins.iter().all(|&p| p == protocol::UNKNOWN_PIN_VALUE));
}

#[test]
fn stk500_upload_then_step_without_new_firmware_still_reports_signature_and_outputs() {
    let mut registry = Registry::new(None, false);
    let profile: &'static BoardProfile = &UNO;
    let mut bridge = Stk500Bridge::new();

    {
        let session = registry.ensure("uno-1", profile);
        let mut out = Vec::new();
        bridge.handle(&mut session.mcu, profile, &[0x50, 0x20], &mut out); // ENTER_PROGMODE
        out.clear();
        bridge.handle(&mut session.mcu, profile, &[0x55, 0x00, 0x00, 0x20], &mut out); // LOAD_ADDRESS 0
        out.clear();
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut cmd = vec![0x64, 0x00, 0x04, b'F'];
        cmd.extend_from_slice(&data);
        cmd.push(0x20);
        bridge.handle(&mut session.mcu, profile, &cmd, &mut out); // PROG_PAGE
        out.clear();
        bridge.handle(&mut session.mcu, profile, &[0x51, 0x20], &mut out); // LEAVE_PROGMODE
        out.clear();
        bridge.handle(&mut session.mcu, profile, &[0x75, 0x20], &mut out); // READ_SIGN
        assert_eq!(&out[1..4], &[0x1E, 0x95, 0x0F]);
    }

    let session = registry.ensure("uno-1", profile);
    assert!(session.mcu.firmware_loaded);
    assert_eq!(&session.mcu.flash[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
    let (output, _, _) = session.step(&step_request("uno-1", 1, 0));
    assert_eq!(output.step_sequence, 1);
}

#[test]
fn eeprom_persists_across_session_teardown_and_recreation() {
    let dir = std::env::temp_dir().join(format!("avr-lockstep-eeprom-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let eeprom_dir = Some(dir.clone());

    {
        let mut registry = Registry::new(eeprom_dir.clone(), false);
        let session = registry.ensure("uno-eeprom", &UNO);
        session.mcu.eeprom[0] = 0x42;
        session.mcu.eeprom[10] = 0x99;
        registry.remove("uno-eeprom");
    }

    {
        let mut registry = Registry::new(eeprom_dir, false);
        let session = registry.ensure("uno-eeprom", &UNO);
        assert_eq!(session.mcu.eeprom[0], 0x42);
        assert_eq!(session.mcu.eeprom[10], 0x99);
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn firmware_exceeding_application_flash_region_is_rejected_leaving_bootloader_untouched() {
    let mut session = Session::new("uno-1".into(), &UNO, None, false);
    let oversized = vec![0xAAu8; UNO.application_flash_bytes() + 1];
    let container = build_container(&oversized);
    let before = session.mcu.flash[UNO.application_flash_bytes()..].to_vec();
    let result = session.load_firmware(&container);
    assert!(result.is_err());
    assert_eq!(session.mcu.flash[UNO.application_flash_bytes()..], before[..]);
}

#[test]
fn m328p_and_m2560_pin_routers_agree_with_their_board_profiles() {
    assert!(avr_lockstep::pins::pin_to_port(McuFamily::M328P, 13).is_some());
    assert!(avr_lockstep::pins::pin_to_port(McuFamily::M2560, 53).is_some());
    assert!(avr_lockstep::pins::pin_to_port(McuFamily::M328P, 20).is_none());
}
