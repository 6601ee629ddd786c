//! Binary entry point: the CLI surface, the lockstep read/decode/dispatch
//! loop, and the STK500 serial bridge loop.
//!
//! The named-pipe and serial transports are external collaborators: this
//! binary only reads and writes already-opened `Read + Write` byte streams.
//! Opening and supervising those streams belongs to the process supervisor;
//! this binary assumes the path it is given already names a connectable
//! endpoint.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};

use avr_lockstep::board::BoardProfile;
use avr_lockstep::protocol::{
    self, ErrorPayload, Header, HelloAckPayload, HelloPayload, LoadBvmPayload, LogPayload, MemoryPatchPayload,
    MessageType, SerialPayload,
};
use avr_lockstep::self_test;
use avr_lockstep::session::Registry;
use avr_lockstep::stk500::Stk500Bridge;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cycle-accurate AVR lockstep emulation core", long_about = None)]
struct Args {
    /// Named pipe the host simulator connects to.
    #[arg(long, default_value = "/tmp/avr-lockstep.pipe")]
    pipe: PathBuf,

    /// Override a board profile's nominal clock, in Hz.
    #[arg(long)]
    cpu_hz: Option<f64>,

    #[arg(long, value_enum, default_value_t = Mode::Lockstep)]
    mode: Mode,

    /// Push a per-step opcode trace record into each session's trace ring.
    #[arg(long)]
    trace_opcodes: bool,

    /// Log each Step's sequence number and cycle budget at debug level.
    #[arg(long)]
    trace_lockstep: bool,

    /// Serial port for the STK500v1 programming bridge. When given, this
    /// process runs the bridge instead of the lockstep session loop.
    #[arg(long)]
    stk500_port: Option<PathBuf>,

    /// Board identity the STK500 bridge programs.
    #[arg(long, default_value = "arduino-uno")]
    board: String,

    /// Raspberry-Pi frame side-channel path. Accepted and ignored: the side
    /// channel is an external collaborator owned by the process supervisor.
    #[arg(long)]
    rpi_frame_channel: Option<PathBuf>,

    /// Raspberry-Pi sensor side-channel path. Accepted and ignored.
    #[arg(long)]
    rpi_sensor_channel: Option<PathBuf>,

    /// Directory EEPROM images are persisted under.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a 328P profile, exercise ADC/UART/timer/SPI/TWI, print pass/fail.
    SelfTest,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Lockstep,
    Realtime,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value().expect("no skipped variants").get_name().fmt(f)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(hz) = args.cpu_hz {
        avr_lockstep::board::set_cpu_hz_override(hz);
    }

    if matches!(args.command, Some(Command::SelfTest)) {
        return run_self_test();
    }

    if args.mode == Mode::Realtime {
        warn!("realtime mode requested; this core only implements lockstep pacing, continuing in lockstep mode");
    }

    if let Some(port) = &args.stk500_port {
        return run_stk500(port, &args.board);
    }

    let mut registry = Registry::new(Some(args.log_dir.clone()), args.trace_opcodes);
    run_lockstep(&args.pipe, &mut registry, args.trace_lockstep)
}

fn run_self_test() -> Result<()> {
    let results = self_test::run();
    let mut all_passed = true;
    for r in &results {
        println!("{:<8} {}", r.name, if r.passed { "PASS" } else { "FAIL" });
        all_passed &= r.passed;
    }
    if all_passed {
        println!("self-test: all peripherals passed");
        Ok(())
    } else {
        bail!("self-test: one or more peripherals failed");
    }
}

/// Accept connections on `pipe` forever. Each connection gets the full
/// handshake-then-dispatch loop; a connection that ends (cleanly or via a
/// framing error) resets every live session's transient state and the
/// process waits for the next connection. Transient session state (serial
/// buffers, last outputs) resets on disconnect; `McuState` itself survives
/// the gap.
fn run_lockstep(pipe: &PathBuf, registry: &mut Registry, trace_lockstep: bool) -> Result<()> {
    loop {
        info!("waiting for a host connection on {}", pipe.display());
        let mut transport = OpenOptions::new()
            .read(true)
            .write(true)
            .open(pipe)
            .with_context(|| format!("failed to open pipe {}", pipe.display()))?;
        match serve_connection(&mut transport, registry, trace_lockstep) {
            Ok(()) => info!("host disconnected cleanly"),
            Err(e) => warn!("connection ended: {:#}", e),
        }
        registry.reset_all_transient();
    }
}

fn read_message<T: Read>(transport: &mut T) -> Result<(Header, Vec<u8>)> {
    let mut hdr_buf = [0u8; protocol::HEADER_LEN];
    transport.read_exact(&mut hdr_buf).context("short read on message header")?;
    let header = Header::decode(&hdr_buf).map_err(|e| anyhow::anyhow!(e))?;
    let mut payload = vec![0u8; header.payload_size as usize];
    transport.read_exact(&mut payload).context("short read on message payload")?;
    Ok((header, payload))
}

fn write_message<T: Write>(transport: &mut T, sequence: u32, msg_type: MessageType, payload: &[u8]) -> Result<()> {
    let header = Header {
        magic: protocol::MAGIC,
        version_major: protocol::VERSION_MAJOR,
        version_minor: protocol::VERSION_MINOR,
        msg_type: msg_type as u16,
        flags: 0,
        payload_size: payload.len() as u32,
        sequence,
    };
    transport.write_all(&header.encode()).context("transport write error")?;
    transport.write_all(payload).context("transport write error")?;
    Ok(())
}

/// One connection's lifetime: Hello/HelloAck handshake, then LoadBvm/Step/
/// MemoryPatch dispatch until the transport errors or the host disconnects.
fn serve_connection<T: Read + Write>(transport: &mut T, registry: &mut Registry, trace_lockstep: bool) -> Result<()> {
    let mut out_seq: u32 = 0;

    let (header, payload) = read_message(transport)?;
    if header.msg_type != MessageType::Hello as u16 {
        bail!("expected Hello as the first message, got type {}", header.msg_type);
    }
    let hello = HelloPayload::decode(&payload).map_err(|e| anyhow::anyhow!(e))?;
    debug!(
        "Hello: flags={:#x} pin_count={} board_id_size={} analog_count={}",
        hello.flags, hello.pin_count, hello.board_id_size, hello.analog_count
    );

    let uno = BoardProfile::lookup("uno");
    let ack = HelloAckPayload {
        flags: 0,
        flash_bytes: uno.flash_bytes as u32,
        sram_bytes: uno.sram_bytes as u32,
        eeprom_bytes: uno.eeprom_bytes as u32,
        io_bytes: uno.io_bytes as u32,
        cpu_hz: uno.effective_cpu_hz() as u32,
    };
    write_message(transport, out_seq, MessageType::HelloAck, &ack.encode())?;
    out_seq += 1;

    loop {
        let (header, payload) = read_message(transport)?;
        if header.msg_type == MessageType::LoadBvm as u16 {
            let load = LoadBvmPayload::decode(&payload).map_err(|e| anyhow::anyhow!(e))?;
            let profile = BoardProfile::lookup(&load.board_profile);
            let session = registry.ensure(&load.board_id, profile);
            match session.load_firmware(&load.container) {
                Ok(()) => info!("firmware loaded for board '{}' ({} bytes)", load.board_id, load.container.len()),
                Err(e) => {
                    warn!("firmware load rejected for board '{}': {}", load.board_id, e);
                    let err = ErrorPayload { board_id: load.board_id.clone(), code: e.code(), text: e.to_string() };
                    write_message(transport, out_seq, MessageType::Error, &err.encode())?;
                    out_seq += 1;
                }
            }
        } else if header.msg_type == MessageType::Step as u16 {
            let step = protocol::StepPayload::decode(&payload).map_err(|e| anyhow::anyhow!(e))?;
            let profile = registry.get_mut(&step.board_id).map(|s| s.profile).unwrap_or_else(|| BoardProfile::lookup("uno"));
            let session = registry.ensure(&step.board_id, profile);
            if trace_lockstep {
                debug!("step {} board='{}' delta_micros={}", step.step_sequence, step.board_id, step.delta_micros);
            }
            let (output, serial_batches, trace_records) = session.step(&step);
            write_message(transport, out_seq, MessageType::OutputState, &output.encode())?;
            out_seq += 1;
            for bytes in serial_batches {
                let serial = SerialPayload { board_id: step.board_id.clone(), bytes };
                write_message(transport, out_seq, MessageType::Serial, &serial.encode())?;
                out_seq += 1;
            }
            if !trace_records.is_empty() {
                let text = trace_records
                    .iter()
                    .map(|r| format!("tick={} pc={:#06x} opcode={:#06x}", r.tick_count, r.pc, r.opcode))
                    .collect::<Vec<_>>()
                    .join("\n");
                let log = LogPayload { board_id: step.board_id.clone(), level: 0, text };
                write_message(transport, out_seq, MessageType::Log, &log.encode())?;
                out_seq += 1;
            }
        } else if header.msg_type == MessageType::MemoryPatch as u16 {
            let patch = MemoryPatchPayload::decode(&payload).map_err(|e| anyhow::anyhow!(e))?;
            apply_memory_patch(registry, &patch);
        } else {
            warn!("ignoring unexpected message type {} after handshake", header.msg_type);
        }
    }
}

/// `memory_type` follows the STK500 byte convention this core already uses
/// for flash ('F'); EEPROM and SRAM are supplemental so a host can poke
/// either without going through a full firmware reload.
fn apply_memory_patch(registry: &mut Registry, patch: &MemoryPatchPayload) {
    let profile = registry.get_mut(&patch.board_id).map(|s| s.profile).unwrap_or_else(|| BoardProfile::lookup("uno"));
    let session = registry.ensure(&patch.board_id, profile);
    let addr = patch.address as usize;
    let len = (patch.length as usize).min(patch.data.len());
    match patch.memory_type {
        b'F' => {
            let limit = session.profile.application_flash_bytes().min(session.mcu.flash.len());
            if addr + len <= limit {
                session.mcu.flash[addr..addr + len].copy_from_slice(&patch.data[..len]);
            } else {
                warn!("MemoryPatch to flash at {:#x}+{} rejected: exceeds application flash region", addr, len);
            }
        }
        b'E' => {
            if addr + len <= session.mcu.eeprom.len() {
                session.mcu.eeprom[addr..addr + len].copy_from_slice(&patch.data[..len]);
            } else {
                warn!("MemoryPatch to EEPROM at {:#x}+{} out of bounds", addr, len);
            }
        }
        b'S' => {
            for (i, &b) in patch.data[..len].iter().enumerate() {
                session.mcu.data_write((addr + i) as u16, b);
            }
        }
        other => {
            warn!("MemoryPatch with unrecognized memory_type {:#x} ignored", other);
        }
    }
}

/// STK500v1 bridge loop: read one command frame at a time (terminated by
/// `SYNC_CRC_EOP`), dispatch it, write the reply. Runs against a single
/// board identity's session rather than the multi-board registry, mirroring
/// how a real programmer targets one attached part.
fn run_stk500(port: &PathBuf, board_id: &str) -> Result<()> {
    let profile = BoardProfile::lookup(board_id);
    let mut registry = Registry::new(None, false);
    let mut bridge = Stk500Bridge::new();
    info!("STK500 bridge listening on {} for board '{}'", port.display(), board_id);
    let mut transport = OpenOptions::new()
        .read(true)
        .write(true)
        .open(port)
        .with_context(|| format!("failed to open serial port {}", port.display()))?;

    const SYNC_CRC_EOP: u8 = 0x20;
    const MAX_FRAME: usize = 300;
    let mut cmd_buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match transport.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) => {
                warn!("STK500 transport read error: {}", e);
                return Ok(());
            }
        }
        cmd_buf.push(byte[0]);
        if byte[0] == SYNC_CRC_EOP {
            let session = registry.ensure(board_id, profile);
            let mut out = Vec::new();
            bridge.handle(&mut session.mcu, profile, &cmd_buf, &mut out);
            if let Err(e) = transport.write_all(&out) {
                warn!("STK500 transport write error: {}", e);
                return Ok(());
            }
            cmd_buf.clear();
        } else if cmd_buf.len() > MAX_FRAME {
            warn!("STK500 command frame exceeded {} bytes without an EOP; dropping", MAX_FRAME);
            cmd_buf.clear();
        }
    }
}
