//! Agnus — beam counters, the event scheduler, and the chip-bus arbiter.
//!
//! Agnus owns the master clock, the per-rasterline bus-owner grid and the
//! DMA calendars (the fixed refresh/disk/audio/sprite layout and the
//! DDF-derived bitplane fetch table). The Copper and the Blitter live here
//! as sub-engines; the machine-level driver that wires them to memory and
//! the other chips is in [`crate::bus`].

pub mod blitter;
pub mod copper;

use crate::scheduler::EventScheduler;
use crate::{dma_cycles, Cycle};

pub use blitter::Blitter;
pub use copper::Copper;

/// DMA slots per rasterline.
pub const HPOS_CNT: usize = 227;
pub const HPOS_MAX: i16 = 226;
/// Lines per PAL long and short frame.
pub const VPOS_CNT_LF: i16 = 313;
pub const VPOS_CNT_SF: i16 = 312;

// DMACON bits.
pub const DMA_SETCLR: u16 = 0x8000;
pub const DMA_BBUSY: u16 = 0x4000;
pub const DMA_BZERO: u16 = 0x2000;
pub const DMA_BLTPRI: u16 = 0x0400;
pub const DMA_DMAEN: u16 = 0x0200;
pub const DMA_BPLEN: u16 = 0x0100;
pub const DMA_COPEN: u16 = 0x0080;
pub const DMA_BLTEN: u16 = 0x0040;
pub const DMA_SPREN: u16 = 0x0020;
pub const DMA_DSKEN: u16 = 0x0010;
pub const DMA_AUD3EN: u16 = 0x0008;
pub const DMA_AUD2EN: u16 = 0x0004;
pub const DMA_AUD1EN: u16 = 0x0002;
pub const DMA_AUD0EN: u16 = 0x0001;

/// Beam position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Beam {
    pub v: i16,
    pub h: i16,
}

/// Who owns a DMA slot on the current rasterline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusOwner {
    #[default]
    None,
    Cpu,
    Refresh,
    Disk,
    Audio(u8),
    Sprite(u8),
    Bitplane(u8),
    Copper,
    Blitter,
}

/// Fixed-calendar DMA duty of a slot (refresh, disk, audio, sprites).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DasEvent {
    Refresh,
    Disk(u8),
    Audio(u8),
    /// First or second fetch slot of a sprite.
    Sprite { nr: u8, second: bool },
}

/// The fixed slot layout on the left edge of every rasterline.
#[must_use]
pub fn das_event(h: i16) -> Option<DasEvent> {
    match h {
        0x01..=0x03 | 0x1B => Some(DasEvent::Refresh),
        0x04..=0x06 => Some(DasEvent::Disk((h - 0x04) as u8)),
        0x07..=0x0A => Some(DasEvent::Audio((h - 0x07) as u8)),
        0x0B..=0x1A => Some(DasEvent::Sprite {
            nr: ((h - 0x0B) / 2) as u8,
            second: (h - 0x0B) % 2 == 1,
        }),
        _ => None,
    }
}

/// First fixed-calendar slot at or after `h`, if any.
#[must_use]
pub fn next_das_slot(h: i16) -> Option<i16> {
    (h.max(0x01)..=0x1B).find(|&n| das_event(n).is_some())
}

/// Lowres bitplane fetch order within an 8-slot group. Plane 1 comes
/// last and triggers the shift-register load in Denise.
pub const LOWRES_FETCH_ORDER: [Option<u8>; 8] = [
    None,
    Some(3),
    Some(5),
    Some(1),
    None,
    Some(2),
    Some(4),
    Some(0),
];

/// Hires fetch order: four planes, twice per group.
pub const HIRES_FETCH_ORDER: [Option<u8>; 8] = [
    Some(3),
    Some(1),
    Some(2),
    Some(0),
    Some(3),
    Some(1),
    Some(2),
    Some(0),
];

/// A delayed register write queued for the REG slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegChange {
    Bplcon0 = 0,
    Bplcon1 = 1,
    Bplcon2 = 2,
}

/// Per-sprite DMA sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SprDmaState {
    /// No fetches this frame.
    #[default]
    Idle,
    /// Fetching the pos/ctl control words.
    Control,
    /// Control words latched, waiting for the start line.
    Waiting,
    /// Inside the vertical window, fetching data words every line.
    Active,
}

pub struct Agnus {
    /// The master clock, advanced in DMA-cycle steps.
    pub clock: Cycle,
    pub frame: i64,
    pub pos: Beam,
    /// Long-frame flag (VPOSR bit 15).
    pub lof: bool,
    /// Interlace enable latched from BPLCON0.
    pub lace: bool,

    pub scheduler: EventScheduler,

    /// One owner per DMA slot per line, plus the value moved.
    pub bus_owner: [BusOwner; HPOS_CNT],
    pub bus_value: [u16; HPOS_CNT],

    pub dmacon: u16,
    /// Blitter-slowdown line: the CPU has been stalled for two slots.
    pub bls: bool,

    // Pointer registers.
    pub dskpt: u32,
    pub bplpt: [u32; 6],
    pub sprpt: [u32; 8],
    pub bpl1mod: i16,
    pub bpl2mod: i16,

    /// Agnus' copy of BPLCON0 (BPU and HIRES drive the fetch table).
    pub bplcon0: u16,

    // Display window and data fetch registers.
    pub diwstrt: u16,
    pub diwstop: u16,
    pub ddfstrt: u16,
    pub ddfstop: u16,

    // Display window flip-flops.
    pub diw_v_flop: bool,
    pub diw_h_flop: bool,

    // Sprite DMA bookkeeping: per sprite, the sequencer phase and the
    // vertical window latched from pos/ctl.
    pub spr_dma_state: [SprDmaState; 8],
    pub spr_vstrt: [i16; 8],
    pub spr_vstop: [i16; 8],

    /// True if any bitplane DMA happened on the current line (modulo add).
    pub bpl_dma_line: bool,

    /// Master cycle at which the current frame started.
    pub frame_start: Cycle,

    /// Delayed register writes, applied by the REG slot.
    pub reg_change_queue: Vec<(Cycle, RegChange, u16)>,

    pub copper: Copper,
    pub blitter: Blitter,
}

impl Agnus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: 0,
            frame: 0,
            pos: Beam::default(),
            lof: true,
            lace: false,
            scheduler: EventScheduler::new(),
            bus_owner: [BusOwner::None; HPOS_CNT],
            bus_value: [0; HPOS_CNT],
            dmacon: 0,
            bls: false,
            dskpt: 0,
            bplpt: [0; 6],
            sprpt: [0; 8],
            bpl1mod: 0,
            bpl2mod: 0,
            bplcon0: 0,
            diwstrt: 0,
            diwstop: 0,
            ddfstrt: 0,
            ddfstop: 0,
            diw_v_flop: false,
            diw_h_flop: false,
            spr_dma_state: [SprDmaState::Idle; 8],
            spr_vstrt: [0; 8],
            spr_vstop: [0; 8],
            bpl_dma_line: false,
            frame_start: 0,
            reg_change_queue: Vec::with_capacity(16),
            copper: Copper::new(),
            blitter: Blitter::new(),
        }
    }

    pub fn reset(&mut self) {
        let accuracy = self.blitter.accuracy;
        *self = Self::new();
        self.blitter.accuracy = accuracy;
    }

    //
    // Clock / beam arithmetic
    //

    /// Lines in the current frame (long or short field).
    #[must_use]
    pub fn lines_in_frame(&self) -> i16 {
        if self.lof {
            VPOS_CNT_LF
        } else {
            VPOS_CNT_SF
        }
    }

    /// Master cycle at which beam position (v, h) of this frame starts.
    #[must_use]
    pub fn cycle_of(&self, v: i16, h: i16) -> Cycle {
        self.frame_start + dma_cycles(i64::from(v) * HPOS_CNT as i64 + i64::from(h))
    }

    //
    // DMA enable tests
    //

    #[must_use]
    pub fn dma_enabled(&self, channel: u16) -> bool {
        self.dmacon & DMA_DMAEN != 0 && self.dmacon & channel != 0
    }

    #[must_use]
    pub fn audio_dma_enabled(&self, nr: u8) -> bool {
        self.dma_enabled(1 << nr)
    }

    //
    // Bus arbiter
    //

    /// Claim the current DMA slot. Fails if someone else owns it.
    pub fn allocate_bus(&mut self, owner: BusOwner) -> bool {
        let h = self.pos.h as usize;
        match self.bus_owner[h] {
            BusOwner::None => {
                self.bus_owner[h] = owner;
                true
            }
            current => {
                debug_assert!(
                    current == owner,
                    "bus slot double-allocation at h={h}: {current:?} vs {owner:?}"
                );
                current == owner
            }
        }
    }

    /// True if the current slot is free or already ours.
    #[must_use]
    pub fn bus_is_free(&self, owner: BusOwner) -> bool {
        let current = self.bus_owner[self.pos.h as usize];
        current == BusOwner::None || current == owner
    }

    //
    // Bitplane fetch table
    //

    #[must_use]
    pub fn bpu(&self) -> usize {
        commodore_denise_ocs::DeniseOcs::bpu(self.bplcon0)
    }

    #[must_use]
    pub fn hires(&self) -> bool {
        self.bplcon0 & 0x8000 != 0
    }

    /// The plane fetched in slot `h`, per the DDF window and the
    /// interleaved hardware fetch order.
    #[must_use]
    pub fn bpl_event(&self, h: i16) -> Option<u8> {
        let bpu = self.bpu();
        if bpu == 0 {
            return None;
        }
        let strt = (self.ddfstrt & 0x00FC) as i16;
        let stop = (self.ddfstop & 0x00FC) as i16;
        if !(0x18..=0xD8).contains(&strt) || stop < strt {
            return None;
        }
        if h < strt || h > stop + 7 {
            return None;
        }
        let pos_in_group = ((h - strt) % 8) as usize;
        let order = if self.hires() {
            &HIRES_FETCH_ORDER
        } else {
            &LOWRES_FETCH_ORDER
        };
        order[pos_in_group].filter(|&plane| usize::from(plane) < bpu)
    }

    /// First bitplane fetch slot at or after `h`, if any.
    #[must_use]
    pub fn next_bpl_slot(&self, h: i16) -> Option<i16> {
        let stop = ((self.ddfstop & 0x00FC) as i16 + 7).min(HPOS_MAX);
        (h..=stop).find(|&n| self.bpl_event(n).is_some())
    }

    //
    // Display window
    //

    #[must_use]
    pub fn diw_vstrt(&self) -> i16 {
        (self.diwstrt >> 8) as i16
    }

    #[must_use]
    pub fn diw_vstop(&self) -> i16 {
        let v = (self.diwstop >> 8) as i16;
        // V8 is the complement of bit 7.
        if v & 0x80 == 0 {
            v | 0x100
        } else {
            v
        }
    }

    /// Horizontal window start in lores pixels.
    #[must_use]
    pub fn diw_hstrt(&self) -> i16 {
        (self.diwstrt & 0xFF) as i16
    }

    /// Horizontal window stop in lores pixels (H8 implied set).
    #[must_use]
    pub fn diw_hstop(&self) -> i16 {
        ((self.diwstop & 0xFF) | 0x100) as i16
    }

    //
    // Sprite geometry (Agnus' latched copy)
    //

    pub fn latch_sprite_pos(&mut self, nr: usize, value: u16) {
        let vstrt = (self.spr_vstrt[nr] & 0x100) | ((value >> 8) & 0xFF) as i16;
        self.spr_vstrt[nr] = vstrt;
    }

    pub fn latch_sprite_ctl(&mut self, nr: usize, value: u16) {
        self.spr_vstrt[nr] =
            (self.spr_vstrt[nr] & 0xFF) | (((value as i16) & 0b100) << 6);
        self.spr_vstop[nr] = ((value >> 8) & 0xFF) as i16 | (((value as i16) & 0b010) << 7);
    }

    //
    // Delayed register writes (REG slot)
    //

    pub fn record_reg_change(&mut self, delay: Cycle, reg: RegChange, value: u16) {
        self.reg_change_queue.push((self.clock + delay, reg, value));
    }

    /// Trigger cycle of the earliest queued change.
    #[must_use]
    pub fn next_reg_change(&self) -> Option<Cycle> {
        self.reg_change_queue.iter().map(|&(c, _, _)| c).min()
    }
}

impl Default for Agnus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_allocation_is_exclusive_per_slot() {
        let mut agnus = Agnus::new();
        agnus.pos.h = 0x30;
        assert!(agnus.allocate_bus(BusOwner::Copper));
        assert!(agnus.bus_is_free(BusOwner::Copper), "owner retains the slot");
        assert!(!agnus.bus_is_free(BusOwner::Blitter));
        agnus.pos.h = 0x31;
        assert!(agnus.allocate_bus(BusOwner::Blitter));
    }

    #[test]
    fn das_calendar_layout() {
        assert_eq!(das_event(0x00), None);
        assert_eq!(das_event(0x01), Some(DasEvent::Refresh));
        assert_eq!(das_event(0x04), Some(DasEvent::Disk(0)));
        assert_eq!(das_event(0x07), Some(DasEvent::Audio(0)));
        assert_eq!(
            das_event(0x0B),
            Some(DasEvent::Sprite {
                nr: 0,
                second: false
            })
        );
        assert_eq!(
            das_event(0x1A),
            Some(DasEvent::Sprite {
                nr: 7,
                second: true
            })
        );
        assert_eq!(das_event(0x1B), Some(DasEvent::Refresh));
        assert_eq!(das_event(0x1C), None);
    }

    #[test]
    fn lowres_fetch_order_puts_plane_one_last() {
        let mut agnus = Agnus::new();
        agnus.bplcon0 = 6 << 12;
        agnus.ddfstrt = 0x38;
        agnus.ddfstop = 0x38;
        let fetched: Vec<Option<u8>> = (0x38..0x40).map(|h| agnus.bpl_event(h)).collect();
        assert_eq!(
            fetched,
            vec![
                None,
                Some(3),
                Some(5),
                Some(1),
                None,
                Some(2),
                Some(4),
                Some(0)
            ]
        );
        // Fetch window closes after ddfstop + 7.
        assert_eq!(agnus.bpl_event(0x40), None);
    }

    #[test]
    fn bpl_fetches_limited_to_enabled_planes() {
        let mut agnus = Agnus::new();
        agnus.bplcon0 = 2 << 12;
        agnus.ddfstrt = 0x38;
        agnus.ddfstop = 0x38;
        let fetched: Vec<u8> = (0x38..0x40).filter_map(|h| agnus.bpl_event(h)).collect();
        assert_eq!(fetched, vec![1, 0]);
    }

    #[test]
    fn diw_vstop_high_bit_is_complement_of_bit7() {
        let mut agnus = Agnus::new();
        agnus.diwstop = 0x2C81; // vstop 0x2C: below 0x80, V8 implied
        assert_eq!(agnus.diw_vstop(), 0x12C);
        agnus.diwstop = 0xF481;
        assert_eq!(agnus.diw_vstop(), 0xF4);
    }

    #[test]
    fn cycle_of_is_monotonic_in_beam_order() {
        let mut agnus = Agnus::new();
        agnus.frame_start = 1000;
        assert!(agnus.cycle_of(0, 1) > agnus.cycle_of(0, 0));
        assert!(agnus.cycle_of(1, 0) > agnus.cycle_of(0, HPOS_MAX));
        assert_eq!(agnus.cycle_of(0, 0), 1000);
    }
}
