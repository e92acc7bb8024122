//! Commodore 8364 Paula.
//!
//! Paula bundles the interrupt controller, four audio DMA channels, the
//! serial port UART, the potentiometer counters and the disk controller
//! byte engine. This crate holds the chip-local state machines; actual DMA
//! transfers (chip-RAM reads and writes, slot allocation) are mediated by
//! the machine crate, which owns the bus.

pub mod audio;
pub mod disk;
pub mod uart;

use log::trace;

pub use audio::{AudioChannel, ChannelState};
pub use disk::{DiskController, DiskDmaState};
pub use uart::Uart;

/// INTREQ/INTENA bit positions.
pub const INT_TBE: u16 = 1 << 0;
pub const INT_DSKBLK: u16 = 1 << 1;
pub const INT_SOFT: u16 = 1 << 2;
pub const INT_PORTS: u16 = 1 << 3;
pub const INT_COPER: u16 = 1 << 4;
pub const INT_VERTB: u16 = 1 << 5;
pub const INT_BLIT: u16 = 1 << 6;
pub const INT_AUD0: u16 = 1 << 7;
pub const INT_AUD1: u16 = 1 << 8;
pub const INT_AUD2: u16 = 1 << 9;
pub const INT_AUD3: u16 = 1 << 10;
pub const INT_RBF: u16 = 1 << 11;
pub const INT_DSKSYN: u16 = 1 << 12;
pub const INT_EXTER: u16 = 1 << 13;

/// Set/clear selector in INTENA/INTREQ/ADKCON/DMACON writes.
pub const SETCLR: u16 = 0x8000;

/// Commodore 8364 Paula.
pub struct Paula8364 {
    /// Pending interrupts.
    pub intreq: u16,
    /// Enabled interrupts.
    pub intena: u16,
    /// Audio/disk control.
    pub adkcon: u16,

    pub audio: [AudioChannel; 4],
    pub disk: DiskController,
    pub uart: Uart,

    // Potentiometer counters, sampled once per rasterline while POTGO
    // start is set.
    pub potgo: u16,
    pot_counter_x: [u8; 2],
    pot_counter_y: [u8; 2],
}

impl Paula8364 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            intreq: 0,
            intena: 0,
            adkcon: 0,
            audio: [
                AudioChannel::new(0),
                AudioChannel::new(1),
                AudioChannel::new(2),
                AudioChannel::new(3),
            ],
            disk: DiskController::new(),
            uart: Uart::new(),
            potgo: 0,
            pot_counter_x: [0; 2],
            pot_counter_y: [0; 2],
        }
    }

    pub fn reset(&mut self) {
        let use_fifo = self.disk.use_fifo;
        *self = Self::new();
        self.disk.use_fifo = use_fifo;
    }

    //
    // Interrupt logic
    //

    pub fn poke_intena(&mut self, value: u16) {
        trace!("poke INTENA({value:04X})");
        Self::set_clr(&mut self.intena, value);
    }

    pub fn poke_intreq(&mut self, value: u16) {
        trace!("poke INTREQ({value:04X})");
        Self::set_clr(&mut self.intreq, value);
    }

    #[must_use]
    pub fn peek_intena_r(&self) -> u16 {
        self.intena
    }

    #[must_use]
    pub fn peek_intreq_r(&self) -> u16 {
        self.intreq
    }

    /// Raise a pending interrupt (does not depend on INTENA).
    pub fn raise_irq(&mut self, bit: u16) {
        self.intreq |= bit;
    }

    /// Interrupt level currently presented to the CPU (0 = none, 1..6).
    #[must_use]
    pub fn interrupt_level(&self) -> u8 {
        Self::level(self.intreq, self.intena)
    }

    /// Pure mapping from pending/enabled masks to a CPU interrupt level.
    ///
    /// Source groups: bits 13/14 post level 6, 11/12 level 5, 7..10
    /// level 4, 4..6 level 3, bit 3 level 2, bits 0..2 level 1.
    #[must_use]
    pub fn level(intreq: u16, intena: u16) -> u8 {
        let masked = intreq & intena & 0x7FFF;
        if masked == 0 {
            0
        } else if masked & 0x6000 != 0 {
            6
        } else if masked & 0x1800 != 0 {
            5
        } else if masked & 0x0780 != 0 {
            4
        } else if masked & 0x0070 != 0 {
            3
        } else if masked & 0x0008 != 0 {
            2
        } else {
            1
        }
    }

    pub fn poke_adkcon(&mut self, value: u16) {
        Self::set_clr(&mut self.adkcon, value);
    }

    #[must_use]
    pub fn peek_adkcon_r(&self) -> u16 {
        self.adkcon
    }

    fn set_clr(reg: &mut u16, value: u16) {
        if value & SETCLR != 0 {
            *reg |= value & 0x7FFF;
        } else {
            *reg &= !(value & 0x7FFF);
        }
    }

    //
    // Potentiometer counters
    //

    pub fn poke_potgo(&mut self, value: u16) {
        self.potgo = value;
        if value & 0x0001 != 0 {
            // START: counters restart from zero.
            self.pot_counter_x = [0; 2];
            self.pot_counter_y = [0; 2];
        }
    }

    /// Advance the pot counters one step (once per rasterline). `charged`
    /// reports, per port, whether the X/Y input pins read high.
    pub fn pot_line_tick(&mut self, charged_x: [bool; 2], charged_y: [bool; 2]) {
        if self.potgo & 0x0001 == 0 {
            return;
        }
        for port in 0..2 {
            if !charged_x[port] {
                self.pot_counter_x[port] = self.pot_counter_x[port].wrapping_add(1);
            }
            if !charged_y[port] {
                self.pot_counter_y[port] = self.pot_counter_y[port].wrapping_add(1);
            }
        }
    }

    #[must_use]
    pub fn peek_potx_dat(&self, port: usize) -> u16 {
        (u16::from(self.pot_counter_y[port]) << 8) | u16::from(self.pot_counter_x[port])
    }

    /// POTGOR reflects the output latches and the pin levels; with nothing
    /// driving the lines, the data bits read back as set.
    #[must_use]
    pub fn peek_potgo_r(&self) -> u16 {
        self.potgo | 0x5500
    }
}

impl Default for Paula8364 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intena_setclr_semantics() {
        let mut paula = Paula8364::new();
        paula.poke_intena(SETCLR | 0x0041);
        assert_eq!(paula.peek_intena_r(), 0x0041);
        paula.poke_intena(0x0001);
        assert_eq!(paula.peek_intena_r(), 0x0040);
    }

    #[test]
    fn level_zero_iff_nothing_pending_and_enabled() {
        assert_eq!(Paula8364::level(0, 0xFFFF), 0);
        assert_eq!(Paula8364::level(0xFFFF, 0), 0);
        assert_eq!(Paula8364::level(INT_BLIT, INT_VERTB), 0);
    }

    #[test]
    fn level_follows_priority_groups() {
        assert_eq!(Paula8364::level(INT_TBE, INT_TBE), 1);
        assert_eq!(Paula8364::level(INT_PORTS, INT_PORTS), 2);
        assert_eq!(Paula8364::level(INT_VERTB, INT_VERTB), 3);
        assert_eq!(Paula8364::level(INT_AUD2, INT_AUD2), 4);
        assert_eq!(Paula8364::level(INT_DSKSYN, INT_DSKSYN), 5);
        assert_eq!(Paula8364::level(INT_EXTER, INT_EXTER), 6);
        // Highest group wins when several are pending.
        assert_eq!(
            Paula8364::level(INT_TBE | INT_EXTER, INT_TBE | INT_EXTER),
            6
        );
    }

    #[test]
    fn pot_counters_count_while_uncharged() {
        let mut paula = Paula8364::new();
        paula.poke_potgo(0x0001);
        for _ in 0..5 {
            paula.pot_line_tick([false, true], [true, false]);
        }
        assert_eq!(paula.peek_potx_dat(0), 0x0005);
        assert_eq!(paula.peek_potx_dat(1), 0x0500);
    }
}
