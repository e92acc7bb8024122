//! The chip container and its single-threaded drive loop.
//!
//! [`AmigaBus`] owns every chip and advances the machine in DMA-cycle
//! steps: events due at the current cycle are serviced in slot order, the
//! beam advances, and the rasterline/frame handlers run at the wraps. CPU
//! memory accesses land here too, synchronizing Agnus up to the CPU clock
//! and stalling on contended chip-bus slots.

use std::sync::Arc;

use log::warn;

use commodore_denise_ocs::{DeniseOcs, LineGeometry};
use commodore_paula_8364::uart::SerialDevice;
use commodore_paula_8364::{Paula8364, INT_AUD0, INT_DSKBLK, INT_DSKSYN, INT_EXTER, INT_PORTS, INT_RBF, INT_TBE, INT_VERTB};
use mos_cia_8520::Cia8520;

use crate::agnus::blitter::{BlitMode, BlitProgress, ChipAccess};
use crate::agnus::copper::CopState;
use crate::agnus::{
    das_event, next_das_slot, Agnus, BusOwner, DasEvent, RegChange, SprDmaState, DMA_BLTEN,
    DMA_BLTPRI, DMA_BPLEN, DMA_COPEN, DMA_DSKEN, DMA_SPREN, HPOS_CNT, HPOS_MAX,
};
use crate::amiga::{InspectionTarget, Shared};
use crate::control_port::ControlPort;
use crate::dma_debugger::DmaDebugger;
use crate::drive::FloppyDrive;
use crate::keyboard::Keyboard;
use crate::memory::Memory;
use crate::messages::{Message, MessageQueue};
use crate::rtc::Rtc;
use crate::scheduler::{EventId, Slot};
use crate::zorro::ZorroBoard;
use crate::{cia_cycles, dma_cycles, Cycle, PAL_CLOCK_FREQUENCY};

/// Host audio sample rate the worker resamples to.
pub const AUDIO_SAMPLE_RATE: i64 = 48_000;
const MASTER_CYCLES_PER_SAMPLE: Cycle = PAL_CLOCK_FREQUENCY / AUDIO_SAMPLE_RATE;
const AUDIO_BUFFER_LIMIT: usize = AUDIO_SAMPLE_RATE as usize * 2;

/// Where a custom-register write came from. CPU writes take effect one
/// pixel earlier in the colour pipeline than Copper writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PokeSource {
    Cpu,
    Copper,
}

/// One CIA plus the clock divider bookkeeping that feeds it E-clocks.
pub struct CiaBridge {
    pub chip: Cia8520,
    /// Master cycle the chip has been executed up to.
    pub clock: Cycle,
}

impl CiaBridge {
    fn new(label: &'static str) -> Self {
        Self {
            chip: Cia8520::new(label),
            clock: 0,
        }
    }

    /// Catch the chip up with the master clock.
    pub fn execute_until(&mut self, target: Cycle) {
        let elapsed = crate::as_cia_cycles(target) - crate::as_cia_cycles(self.clock);
        if elapsed > 0 {
            self.chip.execute(elapsed as u32);
        }
        self.clock = target.max(self.clock);
    }
}

pub struct AmigaBus {
    pub mem: Memory,
    pub agnus: Agnus,
    pub denise: DeniseOcs,
    pub paula: Paula8364,
    pub cia_a: CiaBridge,
    pub cia_b: CiaBridge,
    pub rtc: Rtc,
    pub zorro: ZorroBoard,
    pub port1: ControlPort,
    pub port2: ControlPort,
    pub keyboard: Keyboard,
    pub df: [FloppyDrive; 4],
    pub dma_debugger: DmaDebugger,

    pub queue: MessageQueue,
    pub shared: Arc<Shared>,

    /// Mirror of the CPU clock, set before every instruction.
    pub cpu_clock: Cycle,
    /// Wait states accumulated by bus stalls during the current
    /// instruction, in master cycles.
    pub wait_states: Cycle,
    /// Interrupt level pending towards the CPU (updated by the IRQ slot).
    pub ipl: u8,

    /// Frames finished since power-on, for host pacing.
    pub frames_completed: i64,

    /// Warp mode mirror: audio ramps down while set.
    pub warp: bool,

    // Host-facing audio: stereo interleaved samples at 48 kHz,
    // drained concurrently by the host audio callback.
    pub audio_buffer: Arc<parking_lot::Mutex<Vec<f32>>>,
    audio_phase: Cycle,
    volume: f32,

    pub ins_target: InspectionTarget,
}

impl AmigaBus {
    #[must_use]
    pub fn new(queue: MessageQueue, shared: Arc<Shared>) -> Self {
        Self {
            mem: Memory::new(),
            agnus: Agnus::new(),
            denise: DeniseOcs::new(),
            paula: Paula8364::new(),
            cia_a: CiaBridge::new("cia-a"),
            cia_b: CiaBridge::new("cia-b"),
            rtc: Rtc::new(),
            zorro: ZorroBoard::new(),
            port1: ControlPort::new(1),
            port2: ControlPort::new(2),
            keyboard: Keyboard::new(),
            df: [
                FloppyDrive::new(0),
                FloppyDrive::new(1),
                FloppyDrive::new(2),
                FloppyDrive::new(3),
            ],
            dma_debugger: DmaDebugger::new(),
            queue,
            shared,
            cpu_clock: 0,
            wait_states: 0,
            ipl: 0,
            frames_completed: 0,
            warp: false,
            audio_buffer: Arc::new(parking_lot::Mutex::new(Vec::with_capacity(
                AUDIO_BUFFER_LIMIT,
            ))),
            audio_phase: 0,
            volume: 1.0,
            ins_target: InspectionTarget::None,
        }
    }

    /// Power-on: zero RAM with the startup pattern, rebuild the decode
    /// table and arm the first scheduled events.
    pub fn power_on(&mut self) {
        self.reset();
        self.mem.fill_ram_with_startup_pattern();
        self.mem.update_mem_src_table();
        self.agnus
            .scheduler
            .schedule_abs(Slot::Vbl, self.agnus.clock, EventId::VblIrq, 0);
        if self.ins_target != InspectionTarget::None {
            self.agnus.scheduler.schedule_abs(
                Slot::Ins,
                self.agnus.clock,
                EventId::Inspect,
                self.ins_target as i64,
            );
        }
    }

    /// Reset clears registers but keeps configured ROMs and RAM sizes.
    pub fn reset(&mut self) {
        self.agnus.reset();
        self.denise.reset();
        self.paula.reset();
        self.cia_a.chip.reset();
        self.cia_b.chip.reset();
        self.cia_a.clock = 0;
        self.cia_b.clock = 0;
        self.zorro.reset();
        self.keyboard.reset();
        for drive in &mut self.df {
            drive.reset();
        }
        self.cpu_clock = 0;
        self.wait_states = 0;
        self.ipl = 0;
        self.audio_phase = 0;
        self.audio_buffer.lock().clear();

        // The OVL line comes up high: ROM mirrored at address 0.
        self.mem.ovl = true;
        self.mem.data_bus = 0;
        self.mem.update_mem_src_table();

        self.agnus
            .scheduler
            .schedule_abs(Slot::Vbl, self.agnus.clock, EventId::VblIrq, 0);
    }

    //
    // The master drive loop
    //

    /// Replay scheduled events and beam progress up to `target`.
    pub fn execute_until(&mut self, target: Cycle) {
        while self.agnus.clock < target {
            self.execute_one_cycle();
        }
    }

    fn execute_one_cycle(&mut self) {
        self.service_due_events();
        self.advance_beam();
    }

    fn service_due_events(&mut self) {
        while let Some(slot) = self.agnus.scheduler.due_slot(self.agnus.clock) {
            self.service_slot(slot);
        }
    }

    fn advance_beam(&mut self) {
        self.agnus.clock += dma_cycles(1);
        self.agnus.pos.h += 1;
        if self.agnus.pos.h > HPOS_MAX {
            self.hsync_handler();
        }
    }

    /// Advance Agnus until the current DMA slot is free for the CPU, then
    /// claim it. Chip-window accesses call this before touching the bus.
    pub fn execute_until_bus_is_free(&mut self) {
        let target = self.cpu_clock + self.wait_states;
        while self.agnus.clock < target {
            self.execute_one_cycle();
        }
        self.service_due_events();

        let mut delay: i64 = 0;
        while self.agnus.bus_owner[self.agnus.pos.h as usize] != BusOwner::None {
            self.advance_beam();
            self.service_due_events();
            delay += 1;
            if delay == 2 {
                // Assert the blitter-slowdown line.
                self.agnus.bls = true;
            }
        }
        self.agnus.bls = false;
        self.agnus.bus_owner[self.agnus.pos.h as usize] = BusOwner::Cpu;
        self.wait_states += dma_cycles(delay);
    }

    //
    // Event dispatch
    //

    fn service_slot(&mut self, slot: Slot) {
        let event = self.agnus.scheduler.slot[slot as usize];
        match slot {
            Slot::Reg => self.service_reg_event(),
            Slot::CiaA => self.service_cia_event(false),
            Slot::CiaB => self.service_cia_event(true),
            Slot::Bpl => self.service_bpl_event(),
            Slot::Das => self.service_das_event(),
            Slot::Cop => self.service_cop_event(),
            Slot::Blt => self.service_blt_event(event.id),
            Slot::Sec => {
                // The SEC gate only fires when no secondary is due, which
                // means a stale minimum; recompute by cancelling.
                self.agnus.scheduler.cancel(Slot::Sec);
            }
            Slot::Irq => {
                self.agnus.scheduler.cancel(Slot::Irq);
                self.ipl = self.paula.interrupt_level();
            }
            Slot::Kbd => self.service_kbd_event(),
            Slot::Txd => self.service_txd_event(event.data),
            Slot::Rxd => self.service_rxd_event(event.data),
            Slot::Pot => {
                // POTGO charge cycle complete.
                self.agnus.scheduler.cancel(Slot::Pot);
            }
            Slot::Dsk => self.service_dsk_event(),
            Slot::Vbl => self.service_vbl_event(),
            Slot::Ins => self.service_ins_event(event.data),
        }
    }

    fn service_reg_event(&mut self) {
        let clock = self.agnus.clock;
        let pixel = i64::from(self.agnus.pos.h) * 4;
        let mut remaining = Vec::new();
        let queue = std::mem::take(&mut self.agnus.reg_change_queue);
        for (trigger, reg, value) in queue {
            if trigger > clock {
                remaining.push((trigger, reg, value));
                continue;
            }
            match reg {
                RegChange::Bplcon0 => self.denise.set_bplcon0(value, pixel),
                RegChange::Bplcon1 => self.denise.set_bplcon1(value),
                RegChange::Bplcon2 => self.denise.set_bplcon2(value, pixel),
            }
        }
        self.agnus.reg_change_queue = remaining;
        match self.agnus.next_reg_change() {
            Some(cycle) => {
                self.agnus
                    .scheduler
                    .schedule_abs(Slot::Reg, cycle, EventId::RegChange, 0);
            }
            None => self.agnus.scheduler.cancel(Slot::Reg),
        }
    }

    fn service_cia_event(&mut self, second: bool) {
        let clock = self.agnus.clock;
        let bridge = if second { &mut self.cia_b } else { &mut self.cia_a };
        bridge.execute_until(clock);
        let irq = bridge.chip.irq();
        if irq {
            let bit = if second { INT_EXTER } else { INT_PORTS };
            self.paula.raise_irq(bit);
            self.schedule_irq_check();
        }
        self.schedule_cia_wakeup(second);
    }

    /// Schedule the next CIA wake-up from the chip's own prediction.
    pub fn schedule_cia_wakeup(&mut self, second: bool) {
        let slot = if second { Slot::CiaB } else { Slot::CiaA };
        let bridge = if second { &mut self.cia_b } else { &mut self.cia_a };
        match bridge.chip.eclocks_until_irq() {
            Some(eclocks) => {
                let cycle = bridge.clock + cia_cycles(i64::from(eclocks));
                self.agnus
                    .scheduler
                    .schedule_abs(slot, cycle.max(self.agnus.clock + 1), EventId::CiaWakeup, 0);
            }
            None => self.agnus.scheduler.cancel(slot),
        }
    }

    //
    // Bitplane DMA (BPL slot)
    //

    fn service_bpl_event(&mut self) {
        let h = self.agnus.pos.h;
        if self.agnus.dma_enabled(DMA_BPLEN) && self.agnus.diw_v_flop {
            if let Some(plane) = self.agnus.bpl_event(h) {
                if self.agnus.allocate_bus(BusOwner::Bitplane(plane + 1)) {
                    let index = usize::from(plane);
                    let addr = self.agnus.bplpt[index];
                    let word = self.mem.read_chip16(addr);
                    self.agnus.bus_value[h as usize] = word;
                    self.agnus.bplpt[index] = addr.wrapping_add(2) & 0x001F_FFFE;
                    self.agnus.bpl_dma_line = true;
                    // Denise sees the data in the following slot.
                    self.denise.set_bpldat(index, word, h + 1);
                }
            }
        }
        match self.agnus.next_bpl_slot(h + 1) {
            Some(next) => {
                let cycle = self.agnus.cycle_of(self.agnus.pos.v, next);
                self.agnus
                    .scheduler
                    .schedule_abs(Slot::Bpl, cycle, EventId::BplFetch, 0);
            }
            None => self.agnus.scheduler.cancel(Slot::Bpl),
        }
    }

    //
    // Fixed-calendar DMA (DAS slot)
    //

    fn service_das_event(&mut self) {
        let h = self.agnus.pos.h;
        if let Some(event) = das_event(h) {
            match event {
                DasEvent::Refresh => {
                    self.agnus.allocate_bus(BusOwner::Refresh);
                }
                DasEvent::Disk(_) => self.service_disk_dma(),
                DasEvent::Audio(nr) => self.service_audio_dma(nr),
                DasEvent::Sprite { nr, second } => self.service_sprite_dma(nr, second),
            }
        }
        match next_das_slot(h + 1) {
            Some(next) => {
                let cycle = self.agnus.cycle_of(self.agnus.pos.v, next);
                self.agnus
                    .scheduler
                    .schedule_abs(Slot::Das, cycle, EventId::DasEvent, 0);
            }
            None => self.agnus.scheduler.cancel(Slot::Das),
        }
    }

    fn service_disk_dma(&mut self) {
        if !self.agnus.dma_enabled(DMA_DSKEN) {
            return;
        }
        let writing = self.paula.disk.state == crate::commodore_paula_8364::DiskDmaState::Writing;
        if writing {
            if !self.agnus.allocate_bus(BusOwner::Disk) {
                return;
            }
            let word = self.mem.read_chip16(self.agnus.dskpt);
            self.agnus.bus_value[self.agnus.pos.h as usize] = word;
            self.agnus.dskpt = self.agnus.dskpt.wrapping_add(2) & 0x001F_FFFE;
            if let Some(drive) = self.selected_drive() {
                drive.write_head((word >> 8) as u8);
                drive.write_head(word as u8);
            }
            if let Some(events) = self.paula.disk.write_word_to_drive() {
                if events.block_done {
                    self.paula.raise_irq(INT_DSKBLK);
                    self.schedule_irq_check();
                }
            }
            return;
        }

        // Read path: pull bytes off the head into the controller, then
        // drain assembled words through the bus slot.
        let speed = self.df[0].speed.clamp(1, 8);
        let mut incoming = Vec::new();
        if let Some(drive) = self.selected_drive() {
            for _ in 0..(2 * speed) {
                if let Some(byte) = drive.read_head() {
                    incoming.push(byte);
                }
            }
        }
        let mut direct_words = Vec::new();
        let mut irqs = 0u16;
        for byte in incoming {
            let events = self.paula.disk.byte_from_drive(byte);
            if events.sync_matched {
                irqs |= INT_DSKSYN;
            }
            if let Some(word) = events.word_ready {
                direct_words.push(word);
            }
            if events.block_done {
                irqs |= INT_DSKBLK;
            }
        }
        while let Some((word, events)) = self.paula.disk.dma_word() {
            direct_words.push(word);
            if events.block_done {
                irqs |= INT_DSKBLK;
            }
        }
        if !direct_words.is_empty() && self.agnus.allocate_bus(BusOwner::Disk) {
            for word in direct_words {
                self.mem.write_chip16(self.agnus.dskpt, word);
                self.agnus.bus_value[self.agnus.pos.h as usize] = word;
                self.agnus.dskpt = self.agnus.dskpt.wrapping_add(2) & 0x001F_FFFE;
            }
        }
        if irqs != 0 {
            self.paula.intreq |= irqs;
            self.schedule_irq_check();
        }
    }

    fn selected_drive(&mut self) -> Option<&mut FloppyDrive> {
        self.df
            .iter_mut()
            .find(|d| d.connected && d.selected() && d.has_disk())
    }

    fn service_audio_dma(&mut self, nr: u8) {
        if !self.agnus.audio_dma_enabled(nr) {
            return;
        }
        let channel = &mut self.paula.audio[usize::from(nr)];
        if !channel.wants_dma_word() {
            return;
        }
        if !self.agnus.allocate_bus(BusOwner::Audio(nr)) {
            return;
        }
        let addr = channel.dma_pointer();
        let word = self.mem.read_chip16(addr);
        self.agnus.bus_value[self.agnus.pos.h as usize] = word;
        if channel.supply_dma_word(word) {
            self.paula.raise_irq(INT_AUD0 << nr);
            self.schedule_irq_check();
        }
    }

    fn service_sprite_dma(&mut self, nr: u8, second: bool) {
        if !self.agnus.dma_enabled(DMA_SPREN) {
            return;
        }
        let v = self.agnus.pos.v;
        if v < 25 {
            return;
        }
        let index = usize::from(nr);

        if !second {
            // Phase transitions happen in the first cycle of the pair.
            if v == 25 {
                self.agnus.spr_dma_state[index] = SprDmaState::Control;
            } else {
                match self.agnus.spr_dma_state[index] {
                    SprDmaState::Waiting if v == self.agnus.spr_vstrt[index] => {
                        self.agnus.spr_dma_state[index] = SprDmaState::Active;
                    }
                    SprDmaState::Active if v == self.agnus.spr_vstop[index] => {
                        self.agnus.spr_dma_state[index] = SprDmaState::Control;
                    }
                    _ => {}
                }
            }
        }

        let state = self.agnus.spr_dma_state[index];
        if !matches!(state, SprDmaState::Control | SprDmaState::Active) {
            return;
        }
        if !self.agnus.allocate_bus(BusOwner::Sprite(nr)) {
            return;
        }

        let addr = self.agnus.sprpt[index];
        let word = self.mem.read_chip16(addr);
        let h = self.agnus.pos.h;
        self.agnus.bus_value[h as usize] = word;
        self.agnus.sprpt[index] = addr.wrapping_add(2) & 0x001F_FFFE;

        let pixel = i64::from(h) * 4;
        match (state, second) {
            (SprDmaState::Control, false) => {
                self.agnus.latch_sprite_pos(index, word);
                self.denise.poke_sprpos(index, word, pixel);
            }
            (SprDmaState::Control, true) => {
                self.agnus.latch_sprite_ctl(index, word);
                self.denise.poke_sprctl(index, word, pixel);
                self.agnus.spr_dma_state[index] = SprDmaState::Waiting;
            }
            (SprDmaState::Active, false) => {
                self.denise.poke_sprdata(index, word, pixel);
            }
            (SprDmaState::Active, true) => {
                self.denise.poke_sprdatb(index, word, pixel);
            }
            _ => {}
        }
    }

    //
    // Copper (COP slot)
    //

    fn service_cop_event(&mut self) {
        if !self.agnus.dma_enabled(DMA_COPEN) {
            self.agnus.scheduler.cancel(Slot::Cop);
            return;
        }
        let v = self.agnus.pos.v;
        let h = self.agnus.pos.h;

        match self.agnus.copper.state {
            CopState::Off => self.agnus.scheduler.cancel(Slot::Cop),
            CopState::FetchIr1 => {
                if h % 2 != 0 || !self.agnus.allocate_bus(BusOwner::Copper) {
                    self.schedule_cop_rel(1);
                    return;
                }
                let word = self.mem.read_chip16(self.agnus.copper.coppc);
                self.agnus.bus_value[h as usize] = word;
                self.agnus.copper.ir1 = word;
                self.agnus.copper.coppc = self.agnus.copper.coppc.wrapping_add(2);
                self.agnus.copper.state = CopState::FetchIr2;
                self.schedule_cop_rel(2);
            }
            CopState::FetchIr2 => {
                if h % 2 != 0 || !self.agnus.allocate_bus(BusOwner::Copper) {
                    self.schedule_cop_rel(1);
                    return;
                }
                let word = self.mem.read_chip16(self.agnus.copper.coppc);
                self.agnus.bus_value[h as usize] = word;
                self.agnus.copper.ir2 = word;
                self.agnus.copper.coppc = self.agnus.copper.coppc.wrapping_add(2);

                if self.agnus.copper.skip_next {
                    self.agnus.copper.skip_next = false;
                    self.agnus.copper.state = CopState::FetchIr1;
                    self.schedule_cop_rel(2);
                    return;
                }

                if self.agnus.copper.is_move() {
                    let target = self.agnus.copper.move_target();
                    let value = self.agnus.copper.ir2;
                    if self.agnus.copper.move_is_legal() {
                        self.poke_custom16(u32::from(target), value, PokeSource::Copper);
                    } else {
                        warn!("copper MOVE to privileged register {target:03X} ignored");
                    }
                    self.agnus.copper.state = CopState::FetchIr1;
                    self.schedule_cop_rel(2);
                } else if self.agnus.copper.is_skip() {
                    self.agnus.copper.skip_next = self.agnus.copper.beam_matches(v, h);
                    self.agnus.copper.state = CopState::FetchIr1;
                    self.schedule_cop_rel(2);
                } else {
                    self.agnus.copper.state = CopState::Waiting;
                    self.schedule_copper_wakeup();
                }
            }
            CopState::Waiting => {
                if self.agnus.copper.blitter_finish_gates_wait() && self.agnus.blitter.bbusy {
                    self.agnus.copper.waiting_for_blitter = true;
                    self.agnus.scheduler.cancel(Slot::Cop);
                    return;
                }
                if self.agnus.copper.beam_matches(v, h) {
                    self.agnus.copper.state = CopState::FetchIr1;
                    self.schedule_cop_rel(2);
                } else {
                    self.schedule_copper_wakeup();
                }
            }
        }
    }

    pub(crate) fn schedule_cop_rel(&mut self, slots: i64) {
        self.agnus.scheduler.schedule_rel(
            Slot::Cop,
            self.agnus.clock,
            dma_cycles(slots),
            EventId::CopService,
            0,
        );
    }

    fn schedule_copper_wakeup(&mut self) {
        let lines = self.agnus.lines_in_frame();
        match self
            .agnus
            .copper
            .next_wakeup(self.agnus.pos.v, self.agnus.pos.h, lines)
        {
            Some((v, h)) => {
                let cycle = self.agnus.cycle_of(v, h).max(self.agnus.clock + dma_cycles(1));
                self.agnus
                    .scheduler
                    .schedule_abs(Slot::Cop, cycle, EventId::CopService, 0);
            }
            // Unreachable this frame: sleep until the vertical blank.
            None => self.agnus.scheduler.cancel(Slot::Cop),
        }
    }

    /// Copper restart / COPJMP strobes.
    pub fn copper_jump(&mut self, second_list: bool) {
        self.agnus.copper.jump(second_list);
        if self.agnus.dma_enabled(DMA_COPEN) {
            self.schedule_cop_rel(if self.agnus.pos.h % 2 == 0 { 2 } else { 1 });
        }
    }

    //
    // Blitter (BLT slot)
    //

    /// BLTSIZE (or BLTSIZH) arrived: kick the blit off.
    pub fn start_blit(&mut self) {
        let accuracy = self.agnus.blitter.accuracy;
        let line = self.agnus.blitter.line_mode();
        let mode = if line {
            self.agnus.blitter.begin_line_blit(&mut self.mem)
        } else {
            self.agnus.blitter.begin_copy_blit(&mut self.mem)
        };

        if accuracy == 0 {
            // Result already in memory; only completion timing remains.
            self.agnus.blitter.mode = None;
            let duration = dma_cycles(self.agnus.blitter.estimated_cycles());
            self.agnus.scheduler.schedule_rel(
                Slot::Blt,
                self.agnus.clock,
                duration,
                EventId::BltFastDone,
                0,
            );
        } else {
            let id = match mode {
                BlitMode::Slow => EventId::BltCopySlow,
                BlitMode::Fake => EventId::BltCopyFake,
                BlitMode::LineFake => EventId::BltLineFake,
            };
            self.agnus
                .scheduler
                .schedule_rel(Slot::Blt, self.agnus.clock, dma_cycles(1), id, 0);
        }
    }

    fn service_blt_event(&mut self, id: EventId) {
        if id == EventId::BltFastDone {
            self.agnus.scheduler.cancel(Slot::Blt);
            self.finish_blit();
            return;
        }
        if !self.agnus.dma_enabled(DMA_BLTEN) {
            // Blitter DMA switched off mid-blit: stall in place.
            self.agnus.scheduler.reschedule_abs(Slot::Blt, self.agnus.clock + dma_cycles(1));
            return;
        }

        let progress = {
            let agnus = &mut self.agnus;
            let yield_to_cpu = agnus.bls && agnus.dmacon & DMA_BLTPRI == 0;
            let Agnus {
                blitter,
                bus_owner,
                bus_value,
                pos,
                ..
            } = agnus;
            let mut bus = ChipAccess {
                h: pos.h as usize,
                bus_owner,
                bus_value,
                mem: &mut self.mem,
                yield_to_cpu,
            };
            match id {
                EventId::BltCopySlow => blitter.exec(&mut bus),
                _ => blitter.fake_exec(&mut bus),
            }
        };

        match progress {
            BlitProgress::Done => {
                self.agnus.scheduler.cancel(Slot::Blt);
                self.finish_blit();
            }
            _ => {
                self.agnus
                    .scheduler
                    .reschedule_abs(Slot::Blt, self.agnus.clock + dma_cycles(1));
            }
        }
    }

    fn finish_blit(&mut self) {
        self.agnus.blitter.bbusy = false;
        self.paula.raise_irq(commodore_paula_8364::INT_BLIT);
        self.schedule_irq_check();
        if self.agnus.copper.waiting_for_blitter {
            self.agnus.copper.waiting_for_blitter = false;
            self.schedule_cop_rel(1);
        }
    }

    //
    // Secondary slots
    //

    fn service_kbd_event(&mut self) {
        self.keyboard.handshake();
        if let Some(byte) = self.keyboard.next_wire_byte() {
            self.cia_a.chip.feed_serial(byte);
            if self.cia_a.chip.irq() {
                self.paula.raise_irq(INT_PORTS);
                self.schedule_irq_check();
            }
            // Next byte once the handshake window has passed.
            self.agnus.scheduler.schedule_rel(
                Slot::Kbd,
                self.agnus.clock,
                dma_cycles(2000),
                EventId::KbdTransmit,
                0,
            );
        } else {
            self.agnus.scheduler.cancel(Slot::Kbd);
        }
    }

    fn service_txd_event(&mut self, _data: i64) {
        self.agnus.scheduler.cancel(Slot::Txd);
        let (tbe, sent, restarted) = self.paula.uart.tx_done();
        if tbe {
            self.paula.raise_irq(INT_TBE);
            self.schedule_irq_check();
        }
        if let Some(word) = sent {
            if self.paula.uart.device == SerialDevice::Loopback {
                self.agnus.scheduler.schedule_rel(
                    Slot::Rxd,
                    self.agnus.clock,
                    dma_cycles(1),
                    EventId::RxdDone,
                    i64::from(word),
                );
            }
        }
        if restarted {
            let duration = dma_cycles(self.paula.uart.frame_duration());
            self.agnus.scheduler.schedule_rel(
                Slot::Txd,
                self.agnus.clock,
                duration,
                EventId::TxdDone,
                0,
            );
        }
    }

    fn service_rxd_event(&mut self, data: i64) {
        self.agnus.scheduler.cancel(Slot::Rxd);
        self.paula.uart.rx_byte(data as u16);
        self.paula.raise_irq(INT_RBF);
        self.schedule_irq_check();
    }

    fn service_dsk_event(&mut self) {
        // Index pulse once per revolution while any motor spins.
        let any_motor = self.df.iter().any(|d| d.connected && d.motor);
        if any_motor {
            self.cia_b.chip.pulse_flag();
            if self.cia_b.chip.irq() {
                self.paula.raise_irq(INT_EXTER);
                self.schedule_irq_check();
            }
            let revolution = PAL_CLOCK_FREQUENCY / 5;
            self.agnus.scheduler.schedule_rel(
                Slot::Dsk,
                self.agnus.clock,
                revolution,
                EventId::DskRotate,
                0,
            );
        } else {
            self.agnus.scheduler.cancel(Slot::Dsk);
        }
    }

    fn service_vbl_event(&mut self) {
        self.agnus.scheduler.cancel(Slot::Vbl);
        self.paula.raise_irq(INT_VERTB);
        self.schedule_irq_check();
        self.cia_a.chip.increment_tod();
        if self.cia_a.chip.irq() {
            self.paula.raise_irq(INT_PORTS);
            self.schedule_irq_check();
        }
        // The vertical blank strobes the Copper back to list 1.
        self.copper_jump(false);
    }

    fn service_ins_event(&mut self, data: i64) {
        self.agnus.scheduler.cancel(Slot::Ins);
        let target = InspectionTarget::from_value(data);
        if target != InspectionTarget::None {
            self.record_info(target);
            // Refresh roughly once per frame.
            let frame = dma_cycles(HPOS_CNT as i64 * i64::from(self.agnus.lines_in_frame()));
            self.agnus.scheduler.schedule_rel(
                Slot::Ins,
                self.agnus.clock,
                frame,
                EventId::Inspect,
                data,
            );
        }
    }

    pub fn schedule_irq_check(&mut self) {
        self.agnus.scheduler.schedule_rel(
            Slot::Irq,
            self.agnus.clock,
            dma_cycles(1),
            EventId::IrqCheck,
            0,
        );
    }

    //
    // Rasterline and frame wraps
    //

    fn hsync_handler(&mut self) {
        let v = self.agnus.pos.v;

        // Finish the line in Denise.
        let geometry = self.line_geometry();
        self.denise.end_of_line(v as usize, &geometry);

        // Superimpose the bus trace if the DMA debugger is on.
        if self.dma_debugger.enabled && v >= 26 {
            let row = self.denise.pixel_engine.working_row(v as usize);
            self.dma_debugger
                .compute_overlay(row, &self.agnus.bus_owner, &self.agnus.bus_value);
        }

        // Bitplane modulos.
        if self.agnus.bpl_dma_line {
            let planes = self.agnus.bpu();
            for i in 0..planes {
                let modulo = if i % 2 == 0 {
                    i64::from(self.agnus.bpl1mod)
                } else {
                    i64::from(self.agnus.bpl2mod)
                };
                self.agnus.bplpt[i] =
                    ((self.agnus.bplpt[i] as i64 + modulo) as u32) & 0x001F_FFFE;
            }
            self.agnus.bpl_dma_line = false;
        }

        // Per-line peripheral duties.
        self.cia_b.chip.increment_tod();
        if self.cia_b.chip.irq() {
            self.paula.raise_irq(INT_EXTER);
            self.schedule_irq_check();
        }
        let charged_x = [self.port1.potgor_bits() & 0x0400 != 0, self.port2.potgor_bits() & 0x4000 != 0];
        self.paula.pot_line_tick(charged_x, [true, true]);

        self.run_audio_line();

        // Advance the beam vertically.
        self.agnus.pos.h = 0;
        self.agnus.pos.v += 1;
        self.agnus.bus_owner = [BusOwner::None; HPOS_CNT];

        if self.agnus.pos.v >= self.agnus.lines_in_frame() {
            self.vsync_handler();
        }

        // Vertical display window flip-flop for the new line.
        let v = self.agnus.pos.v;
        if v == self.agnus.diw_vstrt() {
            self.agnus.diw_v_flop = true;
        }
        if v == self.agnus.diw_vstop() {
            self.agnus.diw_v_flop = false;
        }

        self.denise.begin_of_line();

        // Arm the per-line DMA walkers.
        if let Some(first) = next_das_slot(0) {
            let cycle = self.agnus.cycle_of(v, first);
            self.agnus
                .scheduler
                .schedule_abs(Slot::Das, cycle, EventId::DasEvent, 0);
        }
        match self.agnus.next_bpl_slot(0) {
            Some(first) => {
                let cycle = self.agnus.cycle_of(v, first);
                self.agnus
                    .scheduler
                    .schedule_abs(Slot::Bpl, cycle, EventId::BplFetch, 0);
            }
            None => self.agnus.scheduler.cancel(Slot::Bpl),
        }

        // Kick keyboard traffic when idle.
        if self.keyboard.has_pending() && !self.agnus.scheduler.is_pending(Slot::Kbd) {
            self.agnus.scheduler.schedule_rel(
                Slot::Kbd,
                self.agnus.clock,
                dma_cycles(8),
                EventId::KbdTransmit,
                0,
            );
        }
    }

    fn line_geometry(&mut self) -> LineGeometry {
        let agnus = &mut self.agnus;
        let at_start = agnus.diw_h_flop;
        let hstrt = agnus.diw_hstrt();
        let hstop = agnus.diw_hstop();
        let on = if at_start { None } else { Some(hstrt) };
        let off = if (at_start || on.is_some()) && hstop <= 455 {
            Some(hstop)
        } else {
            None
        };
        agnus.diw_h_flop = off.is_none() && (at_start || on.is_some());
        LineGeometry {
            v_flop: agnus.diw_v_flop,
            h_flop_at_start: at_start,
            h_flop_on: on,
            h_flop_off: off,
        }
    }

    fn vsync_handler(&mut self) {
        self.agnus.pos.v = 0;
        self.agnus.frame += 1;
        self.agnus.frame_start = self.agnus.clock;
        self.frames_completed += 1;

        // Long/short frame alternation in interlace.
        self.agnus.lace = self.denise.bplcon0 & 0x0004 != 0;
        self.agnus.lof = if self.agnus.lace { !self.agnus.lof } else { true };
        self.denise.vsync(self.agnus.lof);

        self.agnus
            .scheduler
            .schedule_abs(Slot::Vbl, self.agnus.clock, EventId::VblIrq, 0);
    }

    fn run_audio_line(&mut self) {
        for nr in 0..4u8 {
            let enabled = self.agnus.audio_dma_enabled(nr);
            let channel = &mut self.paula.audio[usize::from(nr)];
            channel.set_dma_enabled(enabled);
            channel.run(HPOS_CNT as u32);
        }

        // Warp mode ramps the master volume down, leaving warp ramps up.
        let target: f32 = if self.warp { 0.0 } else { 1.0 };
        self.volume += (target - self.volume) * 0.01;

        let left = (self.paula.audio[0].output() + self.paula.audio[3].output()) * self.volume;
        let right = (self.paula.audio[1].output() + self.paula.audio[2].output()) * self.volume;
        let mut buffer = self.audio_buffer.lock();
        while self.audio_phase <= self.agnus.clock {
            if buffer.len() < AUDIO_BUFFER_LIMIT {
                buffer.push(left);
                buffer.push(right);
            }
            self.audio_phase += MASTER_CYCLES_PER_SAMPLE;
        }
    }

    //
    // Inspection
    //

    pub fn record_info(&mut self, target: InspectionTarget) {
        let mut info = self.shared.info.lock();
        match target {
            InspectionTarget::None => {}
            InspectionTarget::Amiga => {
                info.amiga.dma_clock = self.agnus.clock;
                info.amiga.cpu_clock = self.cpu_clock;
                info.amiga.cia_a_clock = self.cia_a.clock;
                info.amiga.cia_b_clock = self.cia_b.clock;
                info.amiga.frame = self.agnus.frame;
                info.amiga.vpos = self.agnus.pos.v;
                info.amiga.hpos = self.agnus.pos.h;
            }
            InspectionTarget::Paula => {
                info.paula.intreq = self.paula.intreq;
                info.paula.intena = self.paula.intena;
                info.paula.adkcon = self.paula.adkcon;
            }
            InspectionTarget::Denise => {
                info.denise.bplcon0 = self.denise.bplcon0;
                info.denise.bplcon1 = self.denise.bplcon1;
                info.denise.bplcon2 = self.denise.bplcon2;
                info.denise.bpu = DeniseOcs::bpu(self.denise.bplcon0) as u8;
                info.denise.diwstrt = self.agnus.diwstrt;
                info.denise.diwstop = self.agnus.diwstop;
                for i in 0..32 {
                    info.denise.color[i] = self.denise.pixel_engine.get_color(i);
                }
            }
            InspectionTarget::Ports => {
                info.port1.joydat = self.port1.joydat();
                info.port2.joydat = self.port2.joydat();
            }
        }
    }

    pub fn put_message(&self, msg: Message) {
        self.queue.put(msg);
    }
}
