//! Snapshots: a header plus a component-by-component walk of reset and
//! persistent items, big-endian on disk.
//!
//! Corrupt region sizes do not abort a restore; the affected region is
//! reset to zero size and loading continues.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::agnus::blitter::BlitMode;
use crate::agnus::copper::CopState;
use crate::agnus::SprDmaState;
use crate::bus::AmigaBus;
use crate::cpu::Cpu;
use crate::error::AmigaError;
use crate::scheduler::{EventId, Slot, ALL_SLOTS, SLOT_COUNT};

pub const SNAPSHOT_MAGIC: &[u8; 6] = b"VAMIGA";
pub const V_MAJOR: u8 = 0;
pub const V_MINOR: u8 = 1;
pub const V_SUBMINOR: u8 = 0;

/// Upper bounds used to reject corrupt size fields.
const MAX_ROM: usize = 512 * 1024;
const MAX_WOM: usize = 256 * 1024;
const MAX_EXT: usize = 512 * 1024;
const MAX_CHIP: usize = 2 * 1024 * 1024;
const MAX_SLOW: usize = 512 * 1024;
const MAX_FAST: usize = 8 * 1024 * 1024;

/// One stored machine state.
#[derive(Clone)]
pub struct Snapshot {
    pub frame: i64,
    pub timestamp: u64,
    pub data: Vec<u8>,
}

//
// Big-endian buffer walkers
//

pub struct SerWriter {
    pub buffer: Vec<u8>,
}

impl SerWriter {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn i16(&mut self, value: i16) {
        self.u16(value as u16);
    }

    pub fn i64(&mut self, value: i64) {
        self.u64(value as u64);
    }

    pub fn flag(&mut self, value: bool) {
        self.u8(u8::from(value));
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn sized_bytes(&mut self, data: &[u8]) {
        self.u32(data.len() as u32);
        self.bytes(data);
    }
}

impl Default for SerWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SerReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AmigaError> {
        if self.pos + n > self.data.len() {
            return Err(AmigaError::SnapshotCorrupt("unexpected end of buffer"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, AmigaError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, AmigaError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32, AmigaError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64, AmigaError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn i16(&mut self) -> Result<i16, AmigaError> {
        Ok(self.u16()? as i16)
    }

    pub fn i64(&mut self) -> Result<i64, AmigaError> {
        Ok(self.u64()? as i64)
    }

    pub fn flag(&mut self) -> Result<bool, AmigaError> {
        Ok(self.u8()? != 0)
    }

    pub fn bytes(&mut self, n: usize) -> Result<Vec<u8>, AmigaError> {
        Ok(self.take(n)?.to_vec())
    }

    /// Length-prefixed region with an upper bound; out-of-range sizes
    /// yield an empty region and skip nothing (the writer never produces
    /// them, so a bad size means the rest is garbage anyway).
    pub fn sized_bytes(&mut self, max: usize) -> Result<Vec<u8>, AmigaError> {
        let len = self.u32()? as usize;
        if len > max {
            return Ok(Vec::new());
        }
        self.bytes(len)
    }
}

//
// EventId <-> wire encoding
//

fn event_id_to_u8(id: EventId) -> u8 {
    match id {
        EventId::None => 0,
        EventId::RegChange => 1,
        EventId::CiaWakeup => 2,
        EventId::BplFetch => 3,
        EventId::DasEvent => 4,
        EventId::CopService => 5,
        EventId::BltCopySlow => 6,
        EventId::BltCopyFake => 7,
        EventId::BltLineFake => 8,
        EventId::BltFastDone => 9,
        EventId::IrqCheck => 10,
        EventId::KbdTransmit => 11,
        EventId::TxdDone => 12,
        EventId::RxdDone => 13,
        EventId::DskRotate => 14,
        EventId::VblIrq => 15,
        EventId::Inspect => 16,
    }
}

fn event_id_from_u8(value: u8) -> EventId {
    match value {
        1 => EventId::RegChange,
        2 => EventId::CiaWakeup,
        3 => EventId::BplFetch,
        4 => EventId::DasEvent,
        5 => EventId::CopService,
        6 => EventId::BltCopySlow,
        7 => EventId::BltCopyFake,
        8 => EventId::BltLineFake,
        9 => EventId::BltFastDone,
        10 => EventId::IrqCheck,
        11 => EventId::KbdTransmit,
        12 => EventId::TxdDone,
        13 => EventId::RxdDone,
        14 => EventId::DskRotate,
        15 => EventId::VblIrq,
        16 => EventId::Inspect,
        _ => EventId::None,
    }
}

//
// The component walk
//

/// Serialize the whole machine into a snapshot.
#[must_use]
pub fn save_core(bus: &AmigaBus, cpu: &Cpu) -> Snapshot {
    let mut w = SerWriter::new();

    // Header
    w.bytes(SNAPSHOT_MAGIC);
    w.u8(V_MAJOR);
    w.u8(V_MINOR);
    w.u8(V_SUBMINOR);
    w.i64(bus.agnus.frame);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    w.u64(timestamp);

    // Memory: sizes, then bodies.
    w.sized_bytes(&bus.mem.rom);
    w.sized_bytes(&bus.mem.wom);
    w.sized_bytes(&bus.mem.ext);
    w.sized_bytes(&bus.mem.chip);
    w.sized_bytes(&bus.mem.slow);
    w.sized_bytes(&bus.mem.fast);
    w.flag(bus.mem.wom_locked);
    w.u8(bus.mem.ext_start);
    w.flag(bus.mem.ovl);
    w.flag(bus.mem.rtc_attached);
    w.u16(bus.mem.data_bus);

    // Agnus
    let agnus = &bus.agnus;
    w.i64(agnus.clock);
    w.i64(agnus.frame_start);
    w.i16(agnus.pos.v);
    w.i16(agnus.pos.h);
    w.flag(agnus.lof);
    w.flag(agnus.lace);
    w.u16(agnus.dmacon);
    w.u32(agnus.dskpt);
    for pt in &agnus.bplpt {
        w.u32(*pt);
    }
    for pt in &agnus.sprpt {
        w.u32(*pt);
    }
    w.i16(agnus.bpl1mod);
    w.i16(agnus.bpl2mod);
    w.u16(agnus.bplcon0);
    w.u16(agnus.diwstrt);
    w.u16(agnus.diwstop);
    w.u16(agnus.ddfstrt);
    w.u16(agnus.ddfstop);
    w.flag(agnus.diw_v_flop);
    w.flag(agnus.diw_h_flop);
    for i in 0..8 {
        w.u8(agnus.spr_dma_state[i] as u8);
        w.i16(agnus.spr_vstrt[i]);
        w.i16(agnus.spr_vstop[i]);
    }

    // Scheduler
    for slot in ALL_SLOTS {
        let event = agnus.scheduler.slot[slot as usize];
        w.i64(event.trigger);
        w.u8(event_id_to_u8(event.id));
        w.i64(event.data);
    }

    // Copper
    let copper = &agnus.copper;
    w.u32(copper.cop1lc);
    w.u32(copper.cop2lc);
    w.u32(copper.coppc);
    w.flag(copper.cdang);
    w.u8(copper.state as u8);
    w.u16(copper.ir1);
    w.u16(copper.ir2);
    w.flag(copper.skip_next);
    w.flag(copper.waiting_for_blitter);

    // Blitter
    let blt = &agnus.blitter;
    w.u16(blt.bltcon0);
    w.u16(blt.bltcon1);
    w.u32(blt.bltapt);
    w.u32(blt.bltbpt);
    w.u32(blt.bltcpt);
    w.u32(blt.bltdpt);
    w.u16(blt.bltafwm);
    w.u16(blt.bltalwm);
    w.u16(blt.bltamod);
    w.u16(blt.bltbmod);
    w.u16(blt.bltcmod);
    w.u16(blt.bltdmod);
    w.u16(blt.bltsize_w);
    w.u16(blt.bltsize_h);
    w.u16(blt.anew);
    w.u16(blt.bnew);
    w.u16(blt.aold);
    w.u16(blt.bold);
    w.u16(blt.ahold);
    w.u16(blt.bhold);
    w.u16(blt.chold);
    w.u16(blt.dhold);
    w.u16(blt.x_counter);
    w.u16(blt.y_counter);
    w.u16(blt.cnt_a);
    w.u16(blt.cnt_b);
    w.u16(blt.cnt_c);
    w.u16(blt.cnt_d);
    w.u16(blt.mask);
    w.u16(blt.bltpc as u16);
    w.u8(match blt.mode {
        None => 0,
        Some(BlitMode::Slow) => 1,
        Some(BlitMode::Fake) => 2,
        Some(BlitMode::LineFake) => 3,
    });
    w.flag(blt.lock_d);
    w.flag(blt.fill_carry);
    w.flag(blt.bbusy);
    w.flag(blt.bzero);
    w.u8(blt.accuracy);

    // Denise
    let denise = &bus.denise;
    w.u16(denise.bplcon0);
    w.u16(denise.bplcon1);
    w.u16(denise.bplcon2);
    w.u16(denise.clxcon);
    for i in 0..6 {
        w.u16(denise.bpldat[i]);
    }
    for i in 0..8 {
        w.u16(denise.sprpos[i]);
        w.u16(denise.sprctl[i]);
        w.u16(denise.sprdata[i]);
        w.u16(denise.sprdatb[i]);
    }
    w.u8(denise.armed);
    for i in 0..32 {
        w.u16(denise.pixel_engine.get_color(i));
    }

    // Paula
    let paula = &bus.paula;
    w.u16(paula.intreq);
    w.u16(paula.intena);
    w.u16(paula.adkcon);
    w.u16(paula.potgo);
    for ch in &paula.audio {
        w.u32(ch.lc);
        w.u32(ch.pt);
        w.u16(ch.len);
        w.u16(ch.len_counter);
        w.u16(ch.per);
        w.u16(ch.vol);
        w.u16(ch.dat);
    }
    w.u16(paula.uart.serper);
    w.u16(paula.disk.dsklen);
    w.u16(paula.disk.dsksync);
    w.flag(paula.disk.use_fifo);

    // CIAs
    for bridge in [&bus.cia_a, &bus.cia_b] {
        let state = bridge.chip.save_state();
        w.u8(state.pra);
        w.u8(state.prb);
        w.u8(state.ddra);
        w.u8(state.ddrb);
        w.u16(state.ta_counter);
        w.u16(state.ta_latch);
        w.u16(state.tb_counter);
        w.u16(state.tb_latch);
        w.u32(state.tod);
        w.u32(state.tod_alarm);
        w.u8(state.sdr);
        w.u8(state.icr_status);
        w.u8(state.icr_mask);
        w.u8(state.cra);
        w.u8(state.crb);
        w.i64(bridge.clock);
    }

    // CPU
    w.i64(cpu.clock);
    w.i64(cpu.speed);
    w.sized_bytes(&cpu.core.get_context());

    Snapshot {
        frame: bus.agnus.frame,
        timestamp,
        data: w.buffer,
    }
}

/// Restore the machine from a snapshot buffer.
pub fn load_core(bus: &mut AmigaBus, cpu: &mut Cpu, data: &[u8]) -> Result<(), AmigaError> {
    let mut r = SerReader::new(data);

    if r.bytes(6)? != SNAPSHOT_MAGIC {
        return Err(AmigaError::SnapshotCorrupt("bad magic"));
    }
    if r.u8()? != V_MAJOR {
        return Err(AmigaError::SnapshotCorrupt("incompatible version"));
    }
    let _minor = r.u8()?;
    let _subminor = r.u8()?;
    let _frame = r.i64()?;
    let _timestamp = r.u64()?;

    // Memory
    let rom = r.sized_bytes(MAX_ROM)?;
    let wom = r.sized_bytes(MAX_WOM)?;
    let ext = r.sized_bytes(MAX_EXT)?;
    let chip = r.sized_bytes(MAX_CHIP)?;
    let slow = r.sized_bytes(MAX_SLOW)?;
    let fast = r.sized_bytes(MAX_FAST)?;
    bus.mem.rom = rom;
    bus.mem.wom = wom;
    bus.mem.ext = ext;
    bus.mem.alloc_chip(chip.len());
    bus.mem.chip = chip;
    bus.mem.alloc_slow(slow.len());
    bus.mem.slow = slow;
    bus.mem.alloc_fast(fast.len());
    bus.mem.fast = fast;
    bus.mem.wom_locked = r.flag()?;
    bus.mem.ext_start = r.u8()?;
    bus.mem.ovl = r.flag()?;
    bus.mem.rtc_attached = r.flag()?;
    bus.mem.data_bus = r.u16()?;
    bus.mem.update_mem_src_table();

    // Agnus
    let agnus = &mut bus.agnus;
    agnus.clock = r.i64()?;
    agnus.frame_start = r.i64()?;
    agnus.pos.v = r.i16()?;
    agnus.pos.h = r.i16()?;
    agnus.lof = r.flag()?;
    agnus.lace = r.flag()?;
    agnus.dmacon = r.u16()?;
    agnus.dskpt = r.u32()?;
    for pt in &mut agnus.bplpt {
        *pt = r.u32()?;
    }
    for pt in &mut agnus.sprpt {
        *pt = r.u32()?;
    }
    agnus.bpl1mod = r.i16()?;
    agnus.bpl2mod = r.i16()?;
    agnus.bplcon0 = r.u16()?;
    agnus.diwstrt = r.u16()?;
    agnus.diwstop = r.u16()?;
    agnus.ddfstrt = r.u16()?;
    agnus.ddfstop = r.u16()?;
    agnus.diw_v_flop = r.flag()?;
    agnus.diw_h_flop = r.flag()?;
    for i in 0..8 {
        agnus.spr_dma_state[i] = match r.u8()? {
            1 => SprDmaState::Control,
            2 => SprDmaState::Waiting,
            3 => SprDmaState::Active,
            _ => SprDmaState::Idle,
        };
        agnus.spr_vstrt[i] = r.i16()?;
        agnus.spr_vstop[i] = r.i16()?;
    }

    // Scheduler
    for slot in ALL_SLOTS {
        let trigger = r.i64()?;
        let id = event_id_from_u8(r.u8()?);
        let data = r.i64()?;
        agnus.scheduler.schedule_abs(slot, trigger, id, data);
    }
    restore_sec_gate(&mut agnus.scheduler);

    // Copper
    let copper = &mut agnus.copper;
    copper.cop1lc = r.u32()?;
    copper.cop2lc = r.u32()?;
    copper.coppc = r.u32()?;
    copper.cdang = r.flag()?;
    copper.state = match r.u8()? {
        1 => CopState::FetchIr1,
        2 => CopState::FetchIr2,
        3 => CopState::Waiting,
        _ => CopState::Off,
    };
    copper.ir1 = r.u16()?;
    copper.ir2 = r.u16()?;
    copper.skip_next = r.flag()?;
    copper.waiting_for_blitter = r.flag()?;

    // Blitter
    let blt = &mut agnus.blitter;
    blt.bltcon0 = r.u16()?;
    blt.bltcon1 = r.u16()?;
    blt.bltapt = r.u32()?;
    blt.bltbpt = r.u32()?;
    blt.bltcpt = r.u32()?;
    blt.bltdpt = r.u32()?;
    blt.bltafwm = r.u16()?;
    blt.bltalwm = r.u16()?;
    blt.bltamod = r.u16()?;
    blt.bltbmod = r.u16()?;
    blt.bltcmod = r.u16()?;
    blt.bltdmod = r.u16()?;
    blt.bltsize_w = r.u16()?;
    blt.bltsize_h = r.u16()?;
    blt.anew = r.u16()?;
    blt.bnew = r.u16()?;
    blt.aold = r.u16()?;
    blt.bold = r.u16()?;
    blt.ahold = r.u16()?;
    blt.bhold = r.u16()?;
    blt.chold = r.u16()?;
    blt.dhold = r.u16()?;
    blt.x_counter = r.u16()?;
    blt.y_counter = r.u16()?;
    blt.cnt_a = r.u16()?;
    blt.cnt_b = r.u16()?;
    blt.cnt_c = r.u16()?;
    blt.cnt_d = r.u16()?;
    blt.mask = r.u16()?;
    blt.bltpc = usize::from(r.u16()?);
    blt.mode = match r.u8()? {
        1 => Some(BlitMode::Slow),
        2 => Some(BlitMode::Fake),
        3 => Some(BlitMode::LineFake),
        _ => None,
    };
    blt.lock_d = r.flag()?;
    blt.fill_carry = r.flag()?;
    blt.bbusy = r.flag()?;
    blt.bzero = r.flag()?;
    blt.accuracy = r.u8()?;
    blt.rederive_shift_parameters();

    // Denise
    let denise = &mut bus.denise;
    let bplcon0 = r.u16()?;
    denise.bplcon0 = bplcon0;
    denise.set_bplcon1(r.u16()?);
    denise.bplcon2 = r.u16()?;
    denise.poke_clxcon(r.u16()?);
    for i in 0..6 {
        denise.bpldat[i] = r.u16()?;
    }
    for i in 0..8 {
        denise.sprpos[i] = r.u16()?;
        let ctl = r.u16()?;
        denise.poke_sprctl(i, ctl, 0);
        denise.sprdata[i] = r.u16()?;
        denise.sprdatb[i] = r.u16()?;
    }
    denise.armed = r.u8()?;
    for i in 0..32 {
        let color = r.u16()?;
        denise.pixel_engine.set_color(i, color);
    }
    denise.spr_changes.clear();
    denise.con_changes.clear();
    denise.pixel_engine.col_changes.clear();

    // Paula
    let paula = &mut bus.paula;
    paula.intreq = r.u16()?;
    paula.intena = r.u16()?;
    paula.adkcon = r.u16()?;
    paula.potgo = r.u16()?;
    for ch in &mut paula.audio {
        ch.lc = r.u32()?;
        ch.pt = r.u32()?;
        ch.len = r.u16()?;
        ch.len_counter = r.u16()?;
        ch.per = r.u16()?;
        ch.vol = r.u16()?;
        ch.dat = r.u16()?;
    }
    paula.uart.serper = r.u16()?;
    paula.disk.dsklen = r.u16()?;
    paula.disk.dsksync = r.u16()?;
    paula.disk.use_fifo = r.flag()?;

    // CIAs
    for bridge in [&mut bus.cia_a, &mut bus.cia_b] {
        let state = mos_cia_8520::CiaState {
            pra: r.u8()?,
            prb: r.u8()?,
            ddra: r.u8()?,
            ddrb: r.u8()?,
            ta_counter: r.u16()?,
            ta_latch: r.u16()?,
            tb_counter: r.u16()?,
            tb_latch: r.u16()?,
            tod: r.u32()?,
            tod_alarm: r.u32()?,
            sdr: r.u8()?,
            icr_status: r.u8()?,
            icr_mask: r.u8()?,
            cra: r.u8()?,
            crb: r.u8()?,
        };
        bridge.chip.restore_state(&state);
        bridge.clock = r.i64()?;
    }

    // CPU
    cpu.clock = r.i64()?;
    cpu.speed = r.i64()?;
    let context = r.sized_bytes(4096)?;
    cpu.core.set_context(&context);

    bus.cpu_clock = cpu.clock;
    Ok(())
}

/// Rebuilding the scheduler slot by slot leaves the SEC gate holding the
/// serialized SEC trigger; recompute it from the secondaries.
fn restore_sec_gate(scheduler: &mut crate::scheduler::EventScheduler) {
    // Any secondary-slot write refreshes the gate; Ins is always last.
    let event = scheduler.slot[Slot::Ins as usize];
    scheduler.schedule_abs(Slot::Ins, event.trigger, event.id, event.data);
}

const _: () = assert!(SLOT_COUNT == 16);
