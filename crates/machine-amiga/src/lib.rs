//! Cycle-accurate Amiga (OCS/ECS) timing-and-bus core.
//!
//! Everything in the machine is clocked from one master oscillator. The
//! scheduler in Agnus advances the whole system in DMA-cycle steps (8
//! master cycles), the chip-bus arbiter serialises Agnus, Copper, Blitter
//! and CPU accesses into the per-rasterline slot grid, and the memory map
//! routes 24-bit accesses to the right bank with the right bus side
//! effects.
//!
//! The host-facing entry point is [`Amiga`]; the chip container driven by
//! the worker thread is [`bus::AmigaBus`].

pub mod agnus;
pub mod amiga;
pub mod bus;
pub mod config;
pub mod control_port;
pub mod cpu;
pub mod custom;
pub mod dma_debugger;
pub mod drive;
pub mod error;
pub mod keyboard;
pub mod memory;
pub mod messages;
pub mod rtc;
pub mod scheduler;
pub mod snapshot;
pub mod zorro;

pub use amiga::{Amiga, AmigaInfo, EmulatorState};
pub use bus::AmigaBus;
pub use config::{AmigaConfig, AmigaModel, ConfigOption, DriveOption};
pub use error::AmigaError;
pub use messages::{Message, MessageQueue};

// Re-export the chip crates so tests and downstream users can reach their
// types without spelling out extra dependencies.
pub use commodore_denise_ocs;
pub use commodore_paula_8364;
pub use mos_cia_8520;

/// Master cycle count (28 MHz class master oscillator ticks).
pub type Cycle = i64;

/// PAL master crystal frequency in Hz.
pub const PAL_CLOCK_FREQUENCY: i64 = 28_375_160;
/// NTSC master crystal frequency in Hz.
pub const NTSC_CLOCK_FREQUENCY: i64 = 28_636_360;

/// Trigger value of an empty event slot.
pub const NEVER: Cycle = i64::MAX;

/// Master cycles per DMA cycle (colour clock).
#[must_use]
pub const fn dma_cycles(n: i64) -> Cycle {
    n * 8
}

/// Master cycles per CPU cycle.
#[must_use]
pub const fn cpu_cycles(n: i64) -> Cycle {
    n * 4
}

/// Master cycles per CIA E-clock.
#[must_use]
pub const fn cia_cycles(n: i64) -> Cycle {
    n * 40
}

#[must_use]
pub const fn as_dma_cycles(cycle: Cycle) -> i64 {
    cycle / 8
}

#[must_use]
pub const fn as_cia_cycles(cycle: Cycle) -> i64 {
    cycle / 40
}
