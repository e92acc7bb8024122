//! Address decoding entry points and the custom-chip register file.
//!
//! Every CPU access funnels through the page-descriptor table here; chip,
//! slow, CIA, RTC, custom and autoconfig windows synchronize Agnus and
//! occupy a bus slot, Fast RAM and ROM do not. The custom register
//! dispatch distinguishes the poke source: CPU writes to the colour
//! registers take effect one pixel earlier than Copper writes.

use log::{debug, warn};

use crate::agnus::copper::CopState;
use crate::agnus::{RegChange, DMA_BLTEN, DMA_COPEN, DMA_DMAEN, DMA_SETCLR};
use crate::bus::{AmigaBus, PokeSource};
use crate::cpu::M68kBus;
use crate::memory::MemorySource;
use crate::messages::Message;
use crate::scheduler::{EventId, Slot};
use crate::{dma_cycles, Cycle};
use commodore_paula_8364::{INT_RBF, SETCLR};

impl AmigaBus {
    //
    // CPU-facing accessors (bus side effects included)
    //

    pub fn peek8(&mut self, addr: u32) -> u8 {
        let addr = addr & 0x00FF_FFFF;
        match self.mem.source(addr) {
            MemorySource::Unmapped => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                self.mem.data_bus = 0;
                0
            }
            MemorySource::Chip => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = self.mem.read_chip8(addr);
                self.mem.data_bus = u16::from(value);
                value
            }
            MemorySource::Fast => {
                self.mem.stats.fast_reads += 1;
                self.mem.read_fast8(addr)
            }
            MemorySource::Cia => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = self.peek_cia8(addr);
                self.mem.data_bus = u16::from(value);
                value
            }
            MemorySource::Slow => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = self.mem.read_slow8(addr);
                self.mem.data_bus = u16::from(value);
                value
            }
            MemorySource::Rtc => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = self.peek_rtc8(addr);
                self.mem.data_bus = u16::from(value);
                value
            }
            MemorySource::Custom => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                self.peek_custom8(addr)
            }
            MemorySource::AutoConf => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                self.zorro.peek8(addr)
            }
            MemorySource::Rom => {
                self.mem.stats.rom_reads += 1;
                self.mem.read_rom8(addr)
            }
            MemorySource::Wom => {
                self.mem.stats.rom_reads += 1;
                self.mem.read_wom8(addr)
            }
            MemorySource::Ext => {
                self.mem.stats.rom_reads += 1;
                self.mem.read_ext8(addr)
            }
        }
    }

    pub fn peek16(&mut self, addr: u32) -> u16 {
        let addr = self.align16(addr, "peek16");
        match self.mem.source(addr) {
            MemorySource::Unmapped => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                self.mem.data_bus = 0;
                0
            }
            MemorySource::Chip => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = self.mem.read_chip16(addr);
                self.mem.data_bus = value;
                value
            }
            MemorySource::Fast => {
                self.mem.stats.fast_reads += 1;
                self.mem.read_fast16(addr)
            }
            MemorySource::Cia => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = self.peek_cia16(addr);
                self.mem.data_bus = value;
                value
            }
            MemorySource::Slow => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = self.mem.read_slow16(addr);
                self.mem.data_bus = value;
                value
            }
            MemorySource::Rtc => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value =
                    (u16::from(self.peek_rtc8(addr)) << 8) | u16::from(self.peek_rtc8(addr + 1));
                self.mem.data_bus = value;
                value
            }
            MemorySource::Custom => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                self.peek_custom16(addr)
            }
            MemorySource::AutoConf => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_reads += 1;
                let value = (u16::from(self.zorro.peek8(addr)) << 8)
                    | u16::from(self.zorro.peek8(addr + 1));
                self.mem.data_bus = value;
                value
            }
            MemorySource::Rom => {
                self.mem.stats.rom_reads += 1;
                self.mem.read_rom16(addr)
            }
            MemorySource::Wom => {
                self.mem.stats.rom_reads += 1;
                self.mem.read_wom16(addr)
            }
            MemorySource::Ext => {
                self.mem.stats.rom_reads += 1;
                self.mem.read_ext16(addr)
            }
        }
    }

    pub fn peek32(&mut self, addr: u32) -> u32 {
        (u32::from(self.peek16(addr)) << 16) | u32::from(self.peek16(addr.wrapping_add(2)))
    }

    pub fn poke8(&mut self, addr: u32, value: u8) {
        let addr = addr & 0x00FF_FFFF;
        match self.mem.source(addr) {
            MemorySource::Unmapped => {
                self.mem.stats.chip_writes += 1;
            }
            MemorySource::Chip => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = u16::from(value);
                self.mem.write_chip8(addr, value);
            }
            MemorySource::Fast => {
                self.mem.stats.fast_writes += 1;
                self.mem.write_fast8(addr, value);
            }
            MemorySource::Cia => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = u16::from(value);
                self.poke_cia8(addr, value);
            }
            MemorySource::Slow => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = u16::from(value);
                self.mem.write_slow8(addr, value);
            }
            MemorySource::Rtc => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = u16::from(value);
                self.poke_rtc8(addr, value);
            }
            MemorySource::Custom => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                // Byte writes to custom registers mirror the value on
                // both byte lanes (hardware bug).
                let word = (u16::from(value) << 8) | u16::from(value);
                self.poke_custom16(addr & !1, word, PokeSource::Cpu);
            }
            MemorySource::AutoConf => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = u16::from(value);
                self.zorro.poke8(addr, value);
            }
            MemorySource::Rom => {
                self.mem.stats.rom_writes += 1;
            }
            MemorySource::Wom => {
                self.mem.stats.rom_writes += 1;
                if self.mem.write_wom8(addr, value) {
                    self.put_message(Message::MemLayout);
                }
            }
            MemorySource::Ext => {
                self.mem.stats.rom_writes += 1;
            }
        }
    }

    pub fn poke16(&mut self, addr: u32, value: u16) {
        let addr = self.align16(addr, "poke16");
        match self.mem.source(addr) {
            MemorySource::Unmapped => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = value;
            }
            MemorySource::Chip => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = value;
                self.mem.write_chip16(addr, value);
            }
            MemorySource::Fast => {
                self.mem.stats.fast_writes += 1;
                self.mem.write_fast16(addr, value);
            }
            MemorySource::Cia => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = value;
                self.poke_cia16(addr, value);
            }
            MemorySource::Slow => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = value;
                self.mem.write_slow16(addr, value);
            }
            MemorySource::Rtc => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = value;
                self.poke_rtc8(addr, (value >> 8) as u8);
                self.poke_rtc8(addr + 1, value as u8);
            }
            MemorySource::Custom => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.poke_custom16(addr, value, PokeSource::Cpu);
            }
            MemorySource::AutoConf => {
                self.execute_until_bus_is_free();
                self.mem.stats.chip_writes += 1;
                self.mem.data_bus = value;
                self.zorro.poke8(addr, (value >> 8) as u8);
            }
            MemorySource::Rom => {
                self.mem.stats.rom_writes += 1;
            }
            MemorySource::Wom => {
                self.mem.stats.rom_writes += 1;
                if self.mem.write_wom8(addr, (value >> 8) as u8) {
                    self.put_message(Message::MemLayout);
                }
                self.mem.write_wom8(addr + 1, value as u8);
            }
            MemorySource::Ext => {
                self.mem.stats.rom_writes += 1;
            }
        }
    }

    pub fn poke32(&mut self, addr: u32, value: u32) {
        self.poke16(addr, (value >> 16) as u16);
        self.poke16(addr.wrapping_add(2), value as u16);
    }

    /// Odd 16-bit accesses are address violations: warn, clear A0 and
    /// proceed, the way the hardware does.
    fn align16(&self, addr: u32, what: &str) -> u32 {
        let addr = addr & 0x00FF_FFFF;
        if addr & 1 != 0 {
            warn!("{what}({addr:06X}): address violation (odd address)");
        }
        addr & !1
    }

    //
    // Side-effect-free inspection
    //

    #[must_use]
    pub fn spypeek8(&self, addr: u32) -> u8 {
        let addr = addr & 0x00FF_FFFF;
        match self.mem.source(addr) {
            MemorySource::Unmapped => 0,
            MemorySource::Chip => self.mem.read_chip8(addr),
            MemorySource::Fast => self.mem.read_fast8(addr),
            MemorySource::Cia => {
                let reg = ((addr >> 8) & 0xF) as u8;
                if addr & 1 != 0 {
                    self.cia_a.chip.spypeek(reg)
                } else {
                    self.cia_b.chip.spypeek(reg)
                }
            }
            MemorySource::Slow => self.mem.read_slow8(addr),
            MemorySource::Rtc => {
                if addr & 1 != 0 {
                    self.rtc.peek(((addr >> 2) & 0xF) as u8)
                } else {
                    0
                }
            }
            MemorySource::Custom => 0,
            MemorySource::AutoConf => self.zorro.peek8(addr),
            MemorySource::Rom => self.mem.read_rom8(addr),
            MemorySource::Wom => self.mem.read_wom8(addr),
            MemorySource::Ext => self.mem.read_ext8(addr),
        }
    }

    #[must_use]
    pub fn spypeek16(&self, addr: u32) -> u16 {
        let addr = addr & 0x00FF_FFFE;
        (u16::from(self.spypeek8(addr)) << 8) | u16::from(self.spypeek8(addr + 1))
    }

    #[must_use]
    pub fn spypeek32(&self, addr: u32) -> u32 {
        (u32::from(self.spypeek16(addr)) << 16) | u32::from(self.spypeek16(addr.wrapping_add(2)))
    }

    //
    // CIA window: A12 selects CIA-A, A13 selects CIA-B, A0 the byte lane.
    //

    fn peek_cia8(&mut self, addr: u32) -> u8 {
        let reg = ((addr >> 8) & 0xF) as u8;
        let sel_a = addr & 0x1000 == 0;
        let sel_b = addr & 0x2000 == 0;
        let a0 = addr & 1 != 0;
        let clock = self.agnus.clock;

        // CIA-A answers on odd addresses, CIA-B on even ones. Unselected
        // lanes float to the open-bus residue.
        if a0 {
            if sel_a {
                self.cia_a.execute_until(clock);
                return self.cia_a.chip.peek(reg);
            }
            return self.mem.data_bus as u8;
        }
        if sel_b {
            self.cia_b.execute_until(clock);
            return self.cia_b.chip.peek(reg);
        }
        (self.mem.data_bus >> 8) as u8
    }

    fn peek_cia16(&mut self, addr: u32) -> u16 {
        let reg = ((addr >> 8) & 0xF) as u8;
        let sel_a = addr & 0x1000 == 0;
        let sel_b = addr & 0x2000 == 0;
        let clock = self.agnus.clock;

        let lo = if sel_a {
            self.cia_a.execute_until(clock);
            self.cia_a.chip.peek(reg)
        } else {
            0xFF
        };
        let hi = if sel_b {
            self.cia_b.execute_until(clock);
            self.cia_b.chip.peek(reg)
        } else {
            0xFF
        };
        (u16::from(hi) << 8) | u16::from(lo)
    }

    fn poke_cia8(&mut self, addr: u32, value: u8) {
        let reg = ((addr >> 8) & 0xF) as u8;
        let sel_a = addr & 0x1000 == 0;
        let sel_b = addr & 0x2000 == 0;
        let clock = self.agnus.clock;

        if sel_a {
            self.cia_a.execute_until(clock);
            self.cia_a.chip.poke(reg, value);
            self.after_cia_a_poke(reg);
        }
        if sel_b {
            self.cia_b.execute_until(clock);
            self.cia_b.chip.poke(reg, value);
            self.after_cia_b_poke(reg);
        }
    }

    fn poke_cia16(&mut self, addr: u32, value: u16) {
        let reg = ((addr >> 8) & 0xF) as u8;
        let sel_a = addr & 0x1000 == 0;
        let sel_b = addr & 0x2000 == 0;
        let clock = self.agnus.clock;

        if sel_a {
            self.cia_a.execute_until(clock);
            self.cia_a.chip.poke(reg, value as u8);
            self.after_cia_a_poke(reg);
        }
        if sel_b {
            self.cia_b.execute_until(clock);
            self.cia_b.chip.poke(reg, (value >> 8) as u8);
            self.after_cia_b_poke(reg);
        }
    }

    /// CIA-A port A carries the OVL and power-LED lines.
    fn after_cia_a_poke(&mut self, reg: u8) {
        if reg == 0 || reg == 2 {
            let pa = self.cia_a.chip.pa();
            let ovl = pa & 0x01 != 0;
            if ovl != self.mem.ovl {
                self.mem.ovl = ovl;
                self.mem.update_mem_src_table();
                self.put_message(Message::MemLayout);
            }
            let led_off = pa & 0x02 != 0;
            self.put_message(if led_off {
                Message::PowerLedOff
            } else {
                Message::PowerLedOn
            });
        }
        self.schedule_cia_wakeup(false);
    }

    /// CIA-B port B drives the drive select/step/motor lines.
    fn after_cia_b_poke(&mut self, reg: u8) {
        if reg == 1 || reg == 3 {
            let prb = self.cia_b.chip.pb();
            for nr in 0..4 {
                if self.df[nr].update_from_prb(prb) {
                    let drive = nr as u8;
                    if self.df[nr].motor {
                        self.put_message(Message::DriveMotorOn { drive });
                        if !self.agnus.scheduler.is_pending(Slot::Dsk) {
                            self.agnus.scheduler.schedule_rel(
                                Slot::Dsk,
                                self.agnus.clock,
                                dma_cycles(1000),
                                EventId::DskRotate,
                                0,
                            );
                        }
                    } else {
                        self.put_message(Message::DriveMotorOff { drive });
                    }
                }
            }
            // Drive status lines feed back into CIA-A port A, alongside
            // the port fire buttons.
            let mut pra = 0xFF;
            for drive in &mut self.df {
                pra &= drive.pra_bits();
            }
            if !self.port1.cia_pa_bit() {
                pra &= !0x40;
            }
            if !self.port2.cia_pa_bit() {
                pra &= !0x80;
            }
            self.cia_a.chip.external_a = pra;
        }
        self.schedule_cia_wakeup(true);
    }

    //
    // RTC window: registers on odd addresses, selected by addr[5:2].
    //

    fn peek_rtc8(&mut self, addr: u32) -> u8 {
        if addr & 1 == 0 {
            return 0;
        }
        self.rtc.peek(((addr >> 2) & 0xF) as u8)
    }

    fn poke_rtc8(&mut self, addr: u32, value: u8) {
        if addr & 1 == 0 {
            return;
        }
        self.rtc.poke(((addr >> 2) & 0xF) as u8, value);
    }

    //
    // Custom chip registers, addressed by the low nine bits.
    //

    fn peek_custom8(&mut self, addr: u32) -> u8 {
        if addr & 1 == 0 {
            (self.peek_custom16(addr) >> 8) as u8
        } else {
            self.peek_custom16(addr & !1) as u8
        }
    }

    pub fn peek_custom16(&mut self, addr: u32) -> u16 {
        let offset = (addr & 0x1FE) as usize;
        let result = match offset {
            0x000 => 0, // BLTDDAT
            0x002 => self.peek_dmaconr(),
            0x004 => self.peek_vposr(),
            0x006 => self.peek_vhposr(),
            0x008 => self.paula.disk.peek_dskdatr(),
            0x00A => self.port1.joydat(),
            0x00C => self.port2.joydat(),
            0x00E => self.denise.peek_clxdat(),
            0x010 => self.paula.peek_adkcon_r(),
            0x012 => self.paula.peek_potx_dat(0),
            0x014 => self.paula.peek_potx_dat(1),
            0x016 => {
                self.paula.peek_potgo_r() & self.port1.potgor_bits() & self.port2.potgor_bits()
            }
            0x018 => self.paula.uart.peek_serdatr(),
            0x01A => self.paula.disk.peek_dskbytr(),
            0x01C => self.paula.peek_intena_r(),
            0x01E => self.paula.peek_intreq_r(),
            _ => return self.peek_custom_faulty16(addr),
        };
        self.mem.data_bus = result;
        result
    }

    /// Reading a write-only or nonexistent register. The previous bus
    /// residue is written into the addressed register, and the read
    /// returns current-slot DMA data if any, open bus otherwise.
    fn peek_custom_faulty16(&mut self, addr: u32) -> u16 {
        debug!("faulty read of custom register {:03X}", addr & 0x1FE);
        let residue = self.mem.data_bus;
        self.poke_custom16(addr, residue, PokeSource::Cpu);
        let h = self.agnus.pos.h as usize;
        match self.agnus.bus_owner[h] {
            // Only genuine DMA leaves data on the bus; a CPU-held slot
            // reads as open bus.
            crate::agnus::BusOwner::None | crate::agnus::BusOwner::Cpu => 0xFFFF,
            _ => self.agnus.bus_value[h],
        }
    }

    fn peek_dmaconr(&self) -> u16 {
        let mut value = self.agnus.dmacon & 0x07FF;
        if self.agnus.blitter.bbusy {
            value |= 0x4000;
        }
        if self.agnus.blitter.bzero {
            value |= 0x2000;
        }
        value
    }

    fn peek_vposr(&self) -> u16 {
        let lof = u16::from(self.agnus.lof) << 15;
        lof | ((self.agnus.pos.v as u16 >> 8) & 1)
    }

    fn peek_vhposr(&self) -> u16 {
        ((self.agnus.pos.v as u16 & 0xFF) << 8) | (self.agnus.pos.h as u16 & 0xFF)
    }

    /// The central custom-register write dispatch.
    pub fn poke_custom16(&mut self, addr: u32, value: u16, source: PokeSource) {
        let offset = (addr & 0x1FE) as usize;
        self.mem.data_bus = value;

        match offset {
            // Disk
            0x020 => {
                self.agnus.dskpt =
                    (self.agnus.dskpt & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
            }
            0x022 => {
                self.agnus.dskpt = (self.agnus.dskpt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x024 => {
                let wordsync = self.paula.adkcon & 0x0400 != 0;
                self.paula.disk.poke_dsklen(value, wordsync);
            }
            0x026 => {} // DSKDAT
            0x028 => {} // REFPTR
            0x02A => {
                // VPOSW: only the frame flip-flop is writable here.
                self.agnus.lof = value & 0x8000 != 0;
            }
            0x02C => {} // VHPOSW
            0x02E => self.agnus.copper.cdang = value & 1 != 0,
            0x030 => {
                if self.paula.uart.poke_serdat(value) {
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
            0x032 => self.paula.uart.poke_serper(value),
            0x034 => {
                self.paula.poke_potgo(value);
                // Pot charge window: roughly one frame.
                let frame = dma_cycles(crate::agnus::HPOS_CNT as i64 * 313);
                self.agnus
                    .scheduler
                    .schedule_rel(Slot::Pot, self.agnus.clock, frame, EventId::None, 0);
            }
            0x036 => {
                self.port1.poke_joytest(value);
                self.port2.poke_joytest(value);
            }
            0x038 | 0x03A | 0x03C | 0x03E => {} // beam strobes

            // Blitter
            0x040 => self.agnus.blitter.bltcon0 = value,
            0x042 => self.agnus.blitter.bltcon1 = value,
            0x044 => self.agnus.blitter.bltafwm = value,
            0x046 => self.agnus.blitter.bltalwm = value,
            0x048 => {
                self.agnus.blitter.bltcpt =
                    (self.agnus.blitter.bltcpt & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
            }
            0x04A => {
                self.agnus.blitter.bltcpt =
                    (self.agnus.blitter.bltcpt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x04C => {
                self.agnus.blitter.bltbpt =
                    (self.agnus.blitter.bltbpt & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
            }
            0x04E => {
                self.agnus.blitter.bltbpt =
                    (self.agnus.blitter.bltbpt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x050 => {
                self.agnus.blitter.bltapt =
                    (self.agnus.blitter.bltapt & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
            }
            0x052 => {
                self.agnus.blitter.bltapt =
                    (self.agnus.blitter.bltapt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x054 => {
                self.agnus.blitter.bltdpt =
                    (self.agnus.blitter.bltdpt & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
            }
            0x056 => {
                self.agnus.blitter.bltdpt =
                    (self.agnus.blitter.bltdpt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x058 => {
                // BLTSIZE: zero encodes the maximum in both fields.
                let h = (value >> 6) & 0x3FF;
                let w = value & 0x3F;
                self.agnus.blitter.bltsize_h = if h == 0 { 1024 } else { h };
                self.agnus.blitter.bltsize_w = if w == 0 { 64 } else { w };
                self.start_blit();
            }
            0x05A => {
                // BLTCON0L (ECS): replaces the minterm bits only.
                self.agnus.blitter.bltcon0 =
                    (self.agnus.blitter.bltcon0 & 0xFF00) | (value & 0x00FF);
            }
            0x05C => {
                let h = value & 0x7FFF;
                self.agnus.blitter.bltsize_h = if h == 0 { 0x8000 } else { h };
            }
            0x05E => {
                let w = value & 0x7FF;
                self.agnus.blitter.bltsize_w = if w == 0 { 0x800 } else { w };
                self.start_blit();
            }
            0x060 => self.agnus.blitter.bltcmod = value & 0xFFFE,
            0x062 => self.agnus.blitter.bltbmod = value & 0xFFFE,
            0x064 => self.agnus.blitter.bltamod = value & 0xFFFE,
            0x066 => self.agnus.blitter.bltdmod = value & 0xFFFE,
            0x070 => self.agnus.blitter.chold = value, // BLTCDAT
            0x072 => self.agnus.blitter.bnew = value,  // BLTBDAT
            0x074 => self.agnus.blitter.anew = value,  // BLTADAT

            0x07E => self.paula.disk.poke_dsksync(value),

            // Copper
            0x080 => {
                self.agnus.copper.cop1lc =
                    (self.agnus.copper.cop1lc & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
            }
            0x082 => {
                self.agnus.copper.cop1lc =
                    (self.agnus.copper.cop1lc & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x084 => {
                self.agnus.copper.cop2lc =
                    (self.agnus.copper.cop2lc & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
            }
            0x086 => {
                self.agnus.copper.cop2lc =
                    (self.agnus.copper.cop2lc & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x088 => self.copper_jump(false),
            0x08A => self.copper_jump(true),
            0x08C => {} // COPINS

            // Display geometry
            0x08E => self.agnus.diwstrt = value,
            0x090 => self.agnus.diwstop = value,
            0x092 => self.agnus.ddfstrt = value & 0x00FC,
            0x094 => self.agnus.ddfstop = value & 0x00FC,

            0x096 => self.poke_dmacon(value),
            0x098 => self.denise.poke_clxcon(value),
            0x09A => {
                self.paula.poke_intena(value);
                self.schedule_irq_check();
            }
            0x09C => {
                if value & SETCLR == 0 && value & INT_RBF != 0 {
                    self.paula.uart.clear_rbf();
                }
                self.paula.poke_intreq(value);
                self.schedule_irq_check();
            }
            0x09E => self.paula.poke_adkcon(value),

            // Audio channels: eight registers each.
            0x0A0..=0x0DF => {
                let channel = (offset - 0x0A0) / 0x10;
                let reg = (offset & 0x0F) >> 1;
                let ch = &mut self.paula.audio[channel.min(3)];
                match reg {
                    0 => ch.poke_lch(value),
                    1 => ch.poke_lcl(value),
                    2 => ch.poke_len(value),
                    3 => ch.poke_per(value),
                    4 => ch.poke_vol(value),
                    5 => {
                        if ch.poke_dat(value) {
                            let bit = commodore_paula_8364::INT_AUD0 << channel;
                            self.paula.raise_irq(bit);
                            self.schedule_irq_check();
                        }
                    }
                    _ => {}
                }
            }

            // Bitplane pointers
            0x0E0..=0x0F7 => {
                let plane = (offset - 0x0E0) / 4;
                let low = offset & 2 != 0;
                if plane < 6 {
                    let pt = &mut self.agnus.bplpt[plane];
                    if low {
                        *pt = (*pt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
                    } else {
                        *pt = (*pt & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
                    }
                }
            }

            // Bitplane control: Agnus sees the value immediately, Denise
            // after the pipeline delay through the REG slot.
            0x100 => {
                self.agnus.bplcon0 = value;
                self.record_reg_change(dma_cycles(1), RegChange::Bplcon0, value);
            }
            0x102 => self.record_reg_change(dma_cycles(2), RegChange::Bplcon1, value),
            0x104 => self.record_reg_change(dma_cycles(2), RegChange::Bplcon2, value),
            0x106 => {} // BPLCON3 (ECS)
            0x108 => self.agnus.bpl1mod = (value & 0xFFFE) as i16,
            0x10A => self.agnus.bpl2mod = (value & 0xFFFE) as i16,

            // Bitplane data
            0x110..=0x11B => {
                let plane = (offset - 0x110) / 2;
                self.denise.set_bpldat(plane, value, self.agnus.pos.h);
            }

            // Sprite pointers
            0x120..=0x13F => {
                let nr = (offset - 0x120) / 4;
                let low = offset & 2 != 0;
                let pt = &mut self.agnus.sprpt[nr.min(7)];
                if low {
                    *pt = (*pt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
                } else {
                    *pt = (*pt & 0x0000_FFFF) | (u32::from(value & 0x1F) << 16);
                }
            }

            // Sprite registers
            0x140..=0x17F => {
                let nr = (offset - 0x140) / 8;
                let reg = (offset & 0x06) >> 1;
                let pixel = self.denise_pixel(source);
                match reg {
                    0 => {
                        self.agnus.latch_sprite_pos(nr, value);
                        self.denise.poke_sprpos(nr, value, pixel);
                    }
                    1 => {
                        self.agnus.latch_sprite_ctl(nr, value);
                        self.denise.poke_sprctl(nr, value, pixel);
                    }
                    2 => self.denise.poke_sprdata(nr, value, pixel),
                    _ => self.denise.poke_sprdatb(nr, value, pixel),
                }
            }

            // Colour registers
            0x180..=0x1BF => {
                let reg = (offset - 0x180) / 2;
                let pixel = self.denise_pixel(source);
                self.denise.poke_color(reg, value, pixel);
            }

            _ => {
                debug!("poke to unhandled custom register {:03X}", offset);
            }
        }
    }

    /// Pixel column at which a register write becomes visible. Copper
    /// pokes land on the current slot; CPU pokes one slot earlier, which
    /// is where the access cycle actually sat.
    fn denise_pixel(&self, source: PokeSource) -> i64 {
        let h = i64::from(self.agnus.pos.h);
        match source {
            PokeSource::Copper => 4 * h,
            PokeSource::Cpu => 4 * (h - 1).max(0),
        }
    }

    fn record_reg_change(&mut self, delay: Cycle, reg: RegChange, value: u16) {
        self.agnus.record_reg_change(delay, reg, value);
        if let Some(cycle) = self.agnus.next_reg_change() {
            self.agnus
                .scheduler
                .schedule_abs(Slot::Reg, cycle, EventId::RegChange, 0);
        }
    }

    fn poke_dmacon(&mut self, value: u16) {
        let old = self.agnus.dmacon;
        if value & DMA_SETCLR != 0 {
            self.agnus.dmacon |= value & 0x07FF;
        } else {
            self.agnus.dmacon &= !(value & 0x07FF);
        }
        let new = self.agnus.dmacon;

        // Copper DMA switched on: resume the interpreter.
        let copen = |d: u16| d & DMA_DMAEN != 0 && d & DMA_COPEN != 0;
        if !copen(old) && copen(new) && self.agnus.copper.state != CopState::Off {
            self.schedule_cop_rel(1);
        }

        // Blitter DMA switched on with a blit pending: resume it.
        let blten = |d: u16| d & DMA_DMAEN != 0 && d & DMA_BLTEN != 0;
        if !blten(old)
            && blten(new)
            && self.agnus.blitter.bbusy
            && !self.agnus.scheduler.is_pending(Slot::Blt)
        {
            let id = match self.agnus.blitter.mode {
                Some(crate::agnus::blitter::BlitMode::Slow) => EventId::BltCopySlow,
                Some(crate::agnus::blitter::BlitMode::Fake) => EventId::BltCopyFake,
                Some(crate::agnus::blitter::BlitMode::LineFake) => EventId::BltLineFake,
                None => EventId::BltFastDone,
            };
            self.agnus
                .scheduler
                .schedule_rel(Slot::Blt, self.agnus.clock, dma_cycles(1), id, 0);
        }
    }
}

//
// The 68000 socket view.
//

impl M68kBus for AmigaBus {
    fn read8(&mut self, addr: u32) -> u8 {
        self.peek8(addr)
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.peek16(addr)
    }

    fn read32(&mut self, addr: u32) -> u32 {
        self.peek32(addr)
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.poke8(addr, value);
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.poke16(addr, value);
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.poke32(addr, value);
    }

    fn disassembler_read16(&self, addr: u32) -> u16 {
        self.spypeek16(addr)
    }

    fn disassembler_read32(&self, addr: u32) -> u32 {
        self.spypeek32(addr)
    }
}
