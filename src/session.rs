//! Per-board session state and the lockstep `step()` algorithm: the only
//! place that ties the CPU interpreter, peripheral engine, pin router, and
//! firmware loader together behind one call per host `Step` message.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::board::BoardProfile;
use crate::cpu::Cpu;
use crate::error::LoadError;
use crate::firmware;
use crate::mcu::McuState;
use crate::pins;
use crate::protocol::{self, OutputStatePayload, StepPayload};
use crate::trace::{TraceRecord, TraceRing};

pub struct Session {
    pub board_id: String,
    pub profile: &'static BoardProfile,
    pub mcu: McuState,
    cycle_remainder: f64,
    last_outputs: Vec<u8>,
    eeprom_path: Option<PathBuf>,
    trace: TraceRing,
}

impl Session {
    pub fn new(board_id: String, profile: &'static BoardProfile, eeprom_dir: Option<&PathBuf>, trace_enabled: bool) -> Self {
        let mut mcu = McuState::new(profile);
        let eeprom_path = eeprom_dir.map(|dir| dir.join(format!("{}.eeprom", board_id)));
        if let Some(path) = &eeprom_path {
            if let Ok(bytes) = std::fs::read(path) {
                let n = bytes.len().min(mcu.eeprom.len());
                mcu.eeprom[..n].copy_from_slice(&bytes[..n]);
            }
        }
        Session {
            board_id,
            profile,
            mcu,
            cycle_remainder: 0.0,
            last_outputs: vec![protocol::UNKNOWN_PIN_VALUE; profile.pin_count],
            eeprom_path,
            trace: TraceRing::new(trace_enabled),
        }
    }

    /// Rebuild state against a different board profile, dropping firmware
    /// and any in-flight peripheral state.
    pub fn rebuild_profile(&mut self, profile: &'static BoardProfile) {
        if std::ptr::eq(self.profile, profile) {
            return;
        }
        self.profile = profile;
        self.mcu = McuState::new(profile);
        self.cycle_remainder = 0.0;
        self.last_outputs = vec![protocol::UNKNOWN_PIN_VALUE; profile.pin_count];
    }

    pub fn load_firmware(&mut self, container: &[u8]) -> Result<(), LoadError> {
        firmware::load(&mut self.mcu, self.profile, container)
    }

    pub fn persist_eeprom(&self) {
        if let Some(path) = &self.eeprom_path {
            let _ = std::fs::write(path, &self.mcu.eeprom);
        }
    }

    /// Transport loss resets serial buffers and the last sampled pin
    /// snapshot but preserves `McuState`.
    pub fn reset_transient(&mut self) {
        for uart in self.mcu.uarts.iter_mut() {
            uart.drain_tx();
        }
        self.last_outputs = vec![protocol::UNKNOWN_PIN_VALUE; self.profile.pin_count];
    }

    /// The lockstep contract: exactly one `OutputState` (plus zero or more
    /// drained Serial byte batches, and, with opcode tracing on, the trace
    /// records accumulated during this step) per `Step`.
    pub fn step(&mut self, req: &StepPayload) -> (OutputStatePayload, Vec<Vec<u8>>, Vec<TraceRecord>) {
        for (i, &raw) in req.pins.iter().enumerate() {
            if i < self.mcu.pin_inputs.len() {
                self.mcu.pin_inputs[i] = Some(raw != 0);
            }
        }
        for (i, &v) in req.analog.iter().enumerate() {
            if i < self.mcu.analog_inputs.len() {
                self.mcu.analog_inputs[i] = (v as f32) * 5.0 / 1023.0;
            }
        }

        if req.delta_micros > 0 && self.mcu.firmware_loaded {
            pins::sync_inputs(&mut self.mcu, self.profile, &self.mcu.pin_inputs.clone());
            let scaled = (req.delta_micros as f64) * self.profile.effective_cpu_hz() / 1_000_000.0 + self.cycle_remainder;
            let mut cycles_remaining = scaled.floor() as i64;
            self.cycle_remainder = scaled - scaled.floor();

            while cycles_remaining > 0 {
                let interrupt_cycles = Cpu::dispatch_interrupt(&mut self.mcu);
                let executed = if interrupt_cycles > 0 {
                    interrupt_cycles
                } else {
                    if self.trace.is_enabled() {
                        let pc = self.mcu.pc;
                        let addr = pc as usize * 2;
                        let opcode = if addr + 1 < self.mcu.flash.len() {
                            self.mcu.flash[addr] as u16 | ((self.mcu.flash[addr + 1] as u16) << 8)
                        } else {
                            0
                        };
                        self.trace.push(TraceRecord { tick_count: self.mcu.tick_count, pc, opcode });
                    }
                    Cpu::step(&mut self.mcu) as u64
                };
                self.mcu.tick_peripherals(executed);
                self.mcu.tick_count += executed;
                self.mcu.diagnostics.retired_cycles += executed;
                cycles_remaining -= executed as i64;
                if self.mcu.pending_wdt_reset {
                    break;
                }
            }

            if self.mcu.pending_wdt_reset {
                let wdt_resets = self.mcu.diagnostics.wdt_resets;
                self.mcu.soft_reset();
                self.mcu.diagnostics.wdt_resets = wdt_resets;
                self.cycle_remainder = 0.0;
            }
        }

        self.mcu.update_pin_edges();
        self.last_outputs = pins::sample_outputs(&self.mcu, self.profile);

        let mut serial_batches = Vec::new();
        for uart in self.mcu.uarts.iter_mut() {
            let bytes = uart.drain_tx();
            if !bytes.is_empty() {
                serial_batches.push(bytes);
            }
        }

        let timestamp_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let output = OutputStatePayload {
            board_id: self.board_id.clone(),
            step_sequence: req.step_sequence,
            tick_count: self.mcu.tick_count,
            pins: self.last_outputs.clone(),
            retired_cycles: self.mcu.diagnostics.retired_cycles,
            adc_samples: self.mcu.diagnostics.adc_samples,
            uart_bytes: self.mcu.diagnostics.uart_bytes,
            spi_transfers: self.mcu.diagnostics.spi_transfers,
            twi_transfers: self.mcu.diagnostics.twi_transfers,
            wdt_resets: self.mcu.diagnostics.wdt_resets,
            timestamp_micros,
            debug_bits: protocol::encode_debug_bits(&self.mcu),
        };

        let trace_records = self.trace.drain_and_clear();

        (output, serial_batches, trace_records)
    }
}

/// Keyed map of live sessions, one per connected board id.
#[derive(Default)]
pub struct Registry {
    sessions: HashMap<String, Session>,
    eeprom_dir: Option<PathBuf>,
    trace_enabled: bool,
}

impl Registry {
    pub fn new(eeprom_dir: Option<PathBuf>, trace_enabled: bool) -> Self {
        Registry { sessions: HashMap::new(), eeprom_dir, trace_enabled }
    }

    pub fn ensure(&mut self, board_id: &str, profile: &'static BoardProfile) -> &mut Session {
        if let Some(existing) = self.sessions.get_mut(board_id) {
            existing.rebuild_profile(profile);
        } else {
            log::info!("session created for board '{}' ({})", board_id, profile.id);
            self.sessions.insert(
                board_id.to_string(),
                Session::new(board_id.to_string(), profile, self.eeprom_dir.as_ref(), self.trace_enabled),
            );
        }
        self.sessions.get_mut(board_id).unwrap()
    }

    /// Look up a session that must already exist (a `Step` for a board id
    /// with no prior `LoadBvm` binds it to the Uno profile on first touch).
    pub fn get_mut(&mut self, board_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(board_id)
    }

    /// Transport loss: reset every live session's transient state without
    /// tearing the sessions themselves down.
    pub fn reset_all_transient(&mut self) {
        for session in self.sessions.values_mut() {
            session.reset_transient();
        }
    }

    pub fn remove(&mut self, board_id: &str) {
        if let Some(session) = self.sessions.remove(board_id) {
            session.persist_eeprom();
        }
    }
}
