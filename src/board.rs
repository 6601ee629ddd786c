//! Immutable board identity: MCU family, memory sizes, pin count, clock.
//!
//! Profiles are looked up by a normalized identifier string and never mutated
//! once constructed, matching the data model's "created on first reference,
//! never mutated" lifecycle.

use std::sync::OnceLock;

/// Process-wide `--cpu-hz` override, set once at startup from the CLI.
/// Applies uniformly to every board profile rather than threading a
/// per-session override through `McuState`, since the override is a
/// single process-level knob, not something a host varies per board.
static CPU_HZ_OVERRIDE: OnceLock<f64> = OnceLock::new();

/// Install the CLI's `--cpu-hz` override, if any. Must be called at most
/// once, before any session is created.
pub fn set_cpu_hz_override(hz: f64) {
    let _ = CPU_HZ_OVERRIDE.set(hz);
}

/// Which of the two supported AVR parts a board carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuFamily {
    M328P,
    M2560,
}

impl McuFamily {
    /// The three-byte STK500 `READ_SIGN` signature for this part.
    pub fn signature(self) -> [u8; 3] {
        match self {
            McuFamily::M328P => [0x1E, 0x95, 0x0F],
            McuFamily::M2560 => [0x1E, 0x98, 0x01],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoardProfile {
    pub id: &'static str,
    pub family: McuFamily,
    pub flash_bytes: usize,
    pub sram_bytes: usize,
    pub eeprom_bytes: usize,
    pub io_bytes: usize,
    pub pin_count: usize,
    pub cpu_hz: f64,
    pub bootloader_bytes: usize,
    /// Caps exposed pin count to the CPU's physical limit (the 2560 is
    /// core-limited: its silkscreen names 70 logical pins but the pin router
    /// only drives the ones wired to a real port).
    pub core_limited: bool,
}

impl BoardProfile {
    /// This profile's clock, with the process-wide `--cpu-hz` override
    /// applied if one was installed at startup.
    pub fn effective_cpu_hz(&self) -> f64 {
        *CPU_HZ_OVERRIDE.get().unwrap_or(&self.cpu_hz)
    }

    /// Data-space offset at which SRAM begins for this profile: IO registers
    /// occupy `[0x20, sram_start)`, general registers `[0, 0x20)`.
    pub fn sram_start(&self) -> usize {
        0x20 + self.io_bytes
    }

    /// Flash offset beyond which firmware programming must never write
    /// (the bootloader reservation at the top of flash).
    pub fn application_flash_bytes(&self) -> usize {
        self.flash_bytes - self.bootloader_bytes
    }

    pub fn analog_channels(&self) -> usize {
        16
    }

    /// Digital pin count, i.e. `pin_count` minus the 16 analog channels that
    /// also occupy a pin slot in the `pins[70]` wire array.
    pub fn digital_pin_count(&self) -> usize {
        self.pin_count - self.analog_channels()
    }

    pub fn lookup(id: &str) -> &'static BoardProfile {
        let key = normalize(id);
        for profile in PROFILES.iter() {
            for alias in profile.aliases {
                if *alias == key {
                    return profile.profile;
                }
            }
        }
        // An unrecognized id falls back to the Uno profile.
        &UNO
    }
}

fn normalize(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

struct ProfileEntry {
    aliases: &'static [&'static str],
    profile: &'static BoardProfile,
}

pub static UNO: BoardProfile = BoardProfile {
    id: "arduinouno",
    family: McuFamily::M328P,
    flash_bytes: 0x8000,
    sram_bytes: 0x0800,
    eeprom_bytes: 0x0400,
    io_bytes: 0x0100,
    pin_count: 20,
    cpu_hz: 16_000_000.0,
    bootloader_bytes: 0x0200,
    core_limited: false,
};

pub static NANO: BoardProfile = BoardProfile {
    id: "arduinonano",
    ..UNO
};

pub static PROMINI: BoardProfile = BoardProfile {
    id: "arduinopromini",
    ..UNO
};

pub static MEGA2560: BoardProfile = BoardProfile {
    id: "arduinomega2560",
    family: McuFamily::M2560,
    flash_bytes: 0x40000,
    sram_bytes: 0x2000,
    eeprom_bytes: 0x1000,
    io_bytes: 0x0200,
    pin_count: 70,
    cpu_hz: 16_000_000.0,
    bootloader_bytes: 0x2000,
    core_limited: true,
};

static PROFILES: &[ProfileEntry] = &[
    ProfileEntry { aliases: &["arduinouno", "uno"], profile: &UNO },
    ProfileEntry { aliases: &["arduinonano", "nano"], profile: &NANO },
    ProfileEntry { aliases: &["arduinopromini", "promini"], profile: &PROMINI },
    ProfileEntry {
        aliases: &["arduinomega", "mega", "arduinomega2560", "mega2560"],
        profile: &MEGA2560,
    },
];
