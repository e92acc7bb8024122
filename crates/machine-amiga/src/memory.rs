//! Memory banks and the address decoder.
//!
//! Decoding works at 64 KiB page granularity through a derived table of
//! 256 page descriptors; rebuilding that table is the only legal way to
//! change the decode. The CPU-facing peek/poke entry points live on
//! [`crate::bus::AmigaBus`] because chip-window accesses have bus side
//! effects; this module owns the raw banks, the table, and the ROM
//! bookkeeping.

use log::{info, warn};

/// Where a 64 KiB page routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MemorySource {
    #[default]
    Unmapped = 0,
    Chip = 1,
    Slow = 2,
    Fast = 3,
    Rom = 4,
    Wom = 5,
    Ext = 6,
    Cia = 7,
    Rtc = 8,
    Custom = 9,
    AutoConf = 10,
}

/// Identified ROM images. Unknown fingerprints still load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RomRevision {
    #[default]
    Missing,
    Unknown,
    BootA1000_8k,
    BootA1000_64k,
    Kick11_31_034,
    Kick12_33_166,
    Kick12_33_180,
    Kick121_34_004,
    Kick13_34_005,
    Kick20_36_028,
    Kick202_36_207,
    Kick204_37_175,
    Kick205_37_299,
    Kick205_37_300,
    Kick205_37_350,
    Kick30_39_106,
    Kick31_40_063,
    Hyp314_46_143,
    Aros55696,
    Aros55696Ext,
    Diag11,
    Diag12,
    Logica20,
}

impl RomRevision {
    /// The authoritative fingerprint table (CRC-32 over the image).
    #[must_use]
    pub fn of(fingerprint: u32) -> Self {
        match fingerprint {
            0x0000_0000 => Self::Missing,
            0x62F1_1C04 => Self::BootA1000_8k,
            0x0B1A_D2D0 => Self::BootA1000_64k,
            0xEC86_DAE2 => Self::Kick11_31_034,
            0x9ED7_83D0 => Self::Kick12_33_166,
            0xA6CE_1636 => Self::Kick12_33_180,
            0xDB4C_8033 => Self::Kick121_34_004,
            0xC4F0_F55F => Self::Kick13_34_005,
            0xB411_3910 => Self::Kick20_36_028,
            0x9A15_519D => Self::Kick202_36_207,
            0xC3BD_B240 => Self::Kick204_37_175,
            0x8302_8FB5 => Self::Kick205_37_299,
            0x6446_6C2A => Self::Kick205_37_300,
            0x43B0_DF7B => Self::Kick205_37_350,
            0x6C9B_07D2 => Self::Kick30_39_106,
            0xFC24_AE0D => Self::Kick31_40_063,
            0xD52B_52FD => Self::Hyp314_46_143,
            0x3F4F_CC0A => Self::Aros55696,
            0xF2E5_2B07 => Self::Aros55696Ext,
            0x4C4B_5C05 => Self::Diag11,
            0x771C_D0EA => Self::Diag12,
            0x8484_F426 => Self::Logica20,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn is_boot_rom(self) -> bool {
        matches!(self, Self::BootA1000_8k | Self::BootA1000_64k)
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Missing => "",
            Self::Unknown => "Unknown or patched ROM",
            Self::BootA1000_8k | Self::BootA1000_64k => "Amiga 1000 Boot ROM",
            Self::Kick11_31_034 => "Kickstart 1.1",
            Self::Kick12_33_166 | Self::Kick12_33_180 => "Kickstart 1.2",
            Self::Kick121_34_004 => "Kickstart 1.21",
            Self::Kick13_34_005 => "Kickstart 1.3",
            Self::Kick20_36_028 => "Kickstart 2.0",
            Self::Kick202_36_207 => "Kickstart 2.02",
            Self::Kick204_37_175 => "Kickstart 2.04",
            Self::Kick205_37_299 | Self::Kick205_37_300 | Self::Kick205_37_350 => "Kickstart 2.05",
            Self::Kick30_39_106 => "Kickstart 3.0",
            Self::Kick31_40_063 => "Kickstart 3.1",
            Self::Hyp314_46_143 => "Kickstart 3.14 (Hyperion)",
            Self::Aros55696 => "AROS Kickstart replacement",
            Self::Aros55696Ext => "AROS Kickstart extension",
            Self::Diag11 | Self::Diag12 => "Amiga DiagROM",
            Self::Logica20 => "Logica Diagnostic",
        }
    }
}

/// Access statistics, sampled by the inspectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemStats {
    pub chip_reads: u64,
    pub chip_writes: u64,
    pub fast_reads: u64,
    pub fast_writes: u64,
    pub rom_reads: u64,
    pub rom_writes: u64,
}

pub struct Memory {
    pub rom: Vec<u8>,
    pub wom: Vec<u8>,
    pub ext: Vec<u8>,
    pub chip: Vec<u8>,
    pub slow: Vec<u8>,
    pub fast: Vec<u8>,

    rom_mask: u32,
    wom_mask: u32,
    ext_mask: u32,
    chip_mask: u32,

    /// The derived page-descriptor table, indexed by address bits 23..16.
    pub mem_src: [MemorySource; 256],

    /// Residue of the last value moved over the chip bus.
    pub data_bus: u16,

    /// First page of the extended ROM window (0xE0 or 0xF0).
    pub ext_start: u8,
    /// A WOM locks on its first write and then behaves like a ROM.
    pub wom_locked: bool,
    /// Mirror of CIA-A port A bit 0: ROM overlay at address 0.
    pub ovl: bool,
    /// A real-time clock is installed (maps the RTC window).
    pub rtc_attached: bool,

    pub stats: MemStats,
}

impl Memory {
    #[must_use]
    pub fn new() -> Self {
        let mut mem = Self {
            rom: Vec::new(),
            wom: Vec::new(),
            ext: Vec::new(),
            chip: Vec::new(),
            slow: Vec::new(),
            fast: Vec::new(),
            rom_mask: 0,
            wom_mask: 0,
            ext_mask: 0,
            chip_mask: 0,
            mem_src: [MemorySource::Unmapped; 256],
            data_bus: 0,
            ext_start: 0xE0,
            wom_locked: false,
            ovl: true,
            rtc_attached: false,
            stats: MemStats::default(),
        };
        mem.update_mem_src_table();
        mem
    }

    //
    // Allocation
    //

    pub fn alloc_chip(&mut self, bytes: usize) {
        Self::alloc(&mut self.chip, &mut self.chip_mask, bytes);
        self.update_mem_src_table();
    }

    pub fn alloc_slow(&mut self, bytes: usize) {
        let mut unused = 0;
        Self::alloc(&mut self.slow, &mut unused, bytes);
        self.update_mem_src_table();
    }

    pub fn alloc_fast(&mut self, bytes: usize) {
        let mut unused = 0;
        Self::alloc(&mut self.fast, &mut unused, bytes);
        self.update_mem_src_table();
    }

    fn alloc(bank: &mut Vec<u8>, mask: &mut u32, bytes: usize) {
        if bank.len() == bytes {
            return;
        }
        *bank = vec![0; bytes];
        *mask = if bytes == 0 { 0 } else { bytes as u32 - 1 };
    }

    /// Install a Kickstart or Boot ROM image. A Boot ROM brings a WOM
    /// along; a Kickstart removes any WOM and extended ROM.
    pub fn load_rom(&mut self, image: &[u8]) {
        self.rom = image.to_vec();
        self.rom_mask = (self.rom.len() as u32).next_power_of_two().max(1) - 1;

        if self.rom_revision().is_boot_rom() {
            self.wom = vec![0; 256 * 1024];
            self.wom_mask = self.wom.len() as u32 - 1;
            self.wom_locked = false;
        } else {
            self.wom = Vec::new();
            self.wom_mask = 0;
        }
        self.ext = Vec::new();
        self.ext_mask = 0;

        info!(
            "installed ROM: {} (CRC {:08X})",
            self.rom_revision().title(),
            self.rom_fingerprint()
        );
        self.update_mem_src_table();
    }

    pub fn load_ext(&mut self, image: &[u8]) {
        self.ext = image.to_vec();
        self.ext_mask = (self.ext.len() as u32).next_power_of_two().max(1) - 1;
        self.update_mem_src_table();
    }

    pub fn set_ext_start(&mut self, page: u8) {
        debug_assert!(page == 0xE0 || page == 0xF0);
        self.ext_start = page;
        self.update_mem_src_table();
    }

    #[must_use]
    pub fn has_rom(&self) -> bool {
        !self.rom.is_empty()
    }

    #[must_use]
    pub fn has_wom(&self) -> bool {
        !self.wom.is_empty()
    }

    #[must_use]
    pub fn has_ext(&self) -> bool {
        !self.ext.is_empty()
    }

    #[must_use]
    pub fn has_chip_ram(&self) -> bool {
        !self.chip.is_empty()
    }

    #[must_use]
    pub fn rom_fingerprint(&self) -> u32 {
        crc32(&self.rom)
    }

    #[must_use]
    pub fn rom_revision(&self) -> RomRevision {
        if self.rom.is_empty() {
            RomRevision::Missing
        } else {
            RomRevision::of(self.rom_fingerprint())
        }
    }

    /// Until the proper startup pattern is known, power-on fills RAM
    /// with zeroes.
    pub fn fill_ram_with_startup_pattern(&mut self) {
        self.chip.fill(0);
        self.slow.fill(0);
        self.fast.fill(0);
        if self.has_wom() {
            self.wom.fill(0);
            self.wom_locked = false;
        }
    }

    //
    // The page-descriptor table
    //

    /// Recompute the decode table after a size, OVL, WOM-lock or RTC
    /// change. Idempotent.
    pub fn update_mem_src_table(&mut self) {
        let mem_rom = if self.has_rom() {
            MemorySource::Rom
        } else {
            MemorySource::Unmapped
        };
        let mem_wom = if self.has_wom() {
            MemorySource::Wom
        } else {
            mem_rom
        };

        let mut chip_pages = self.chip.len() / 0x1_0000;
        let slow_pages = self.slow.len() / 0x1_0000;
        let fast_pages = self.fast.len() / 0x1_0000;
        let ext_pages = if self.has_ext() { 8 } else { 0 };
        let has_wom = self.has_wom();

        // A 256 KiB chip RAM mirrors through the first 512 KiB.
        if chip_pages == 4 {
            chip_pages = 8;
        }

        let table = &mut self.mem_src;
        *table = [MemorySource::Unmapped; 256];

        for i in 0..chip_pages.min(0x20) {
            table[i] = MemorySource::Chip;
        }
        for i in 0..fast_pages.min(0x80) {
            table[0x20 + i] = MemorySource::Fast;
        }
        for i in 0xA0..=0xBF {
            table[i] = MemorySource::Cia;
        }
        for i in 0xC0..=0xDF {
            table[i] = MemorySource::Custom;
        }
        for i in 0..slow_pages.min(0x18) {
            table[0xC0 + i] = MemorySource::Slow;
        }
        if self.rtc_attached {
            for i in 0xDC..=0xDE {
                table[i] = MemorySource::Rtc;
            }
        }
        for i in 0xE8..=0xEF {
            table[i] = MemorySource::AutoConf;
        }
        for i in 0..ext_pages {
            table[usize::from(self.ext_start) + i] = MemorySource::Ext;
        }

        // Kickstart ROM or WOM on the top pages.
        for i in 0xF8..=0xFF {
            table[i] = mem_wom;
        }
        // An unlocked WOM exposes the Boot ROM on its lower half.
        if has_wom && !self.wom_locked {
            for i in 0xF8..=0xFB {
                table[i] = mem_rom;
            }
        }

        // Reset overlay: mirror the top pages at address 0.
        if self.ovl {
            for i in 0..8 {
                if table[0xF8 + i] == MemorySource::Unmapped {
                    break;
                }
                table[i] = table[0xF8 + i];
            }
        }
    }

    #[must_use]
    pub fn source(&self, addr: u32) -> MemorySource {
        self.mem_src[(addr >> 16) as usize & 0xFF]
    }

    //
    // Raw bank access (no bus side effects)
    //

    #[must_use]
    pub fn read_chip8(&self, addr: u32) -> u8 {
        if self.chip.is_empty() {
            return 0;
        }
        self.chip[(addr & self.chip_mask) as usize]
    }

    #[must_use]
    pub fn read_chip16(&self, addr: u32) -> u16 {
        if self.chip.is_empty() {
            return 0;
        }
        let offset = (addr & self.chip_mask & !1) as usize;
        (u16::from(self.chip[offset]) << 8) | u16::from(self.chip[offset + 1])
    }

    pub fn write_chip8(&mut self, addr: u32, value: u8) {
        if !self.chip.is_empty() {
            self.chip[(addr & self.chip_mask) as usize] = value;
        }
    }

    pub fn write_chip16(&mut self, addr: u32, value: u16) {
        if !self.chip.is_empty() {
            let offset = (addr & self.chip_mask & !1) as usize;
            self.chip[offset] = (value >> 8) as u8;
            self.chip[offset + 1] = value as u8;
        }
    }

    #[must_use]
    pub fn read_slow8(&self, addr: u32) -> u8 {
        let offset = (addr as usize - 0xC0_0000) % self.slow.len().max(1);
        if self.slow.is_empty() {
            0
        } else {
            self.slow[offset]
        }
    }

    #[must_use]
    pub fn read_slow16(&self, addr: u32) -> u16 {
        (u16::from(self.read_slow8(addr)) << 8) | u16::from(self.read_slow8(addr + 1))
    }

    pub fn write_slow8(&mut self, addr: u32, value: u8) {
        if !self.slow.is_empty() {
            let offset = (addr as usize - 0xC0_0000) % self.slow.len();
            self.slow[offset] = value;
        }
    }

    pub fn write_slow16(&mut self, addr: u32, value: u16) {
        self.write_slow8(addr, (value >> 8) as u8);
        self.write_slow8(addr + 1, value as u8);
    }

    #[must_use]
    pub fn read_fast8(&self, addr: u32) -> u8 {
        let offset = (addr as usize - 0x20_0000) % self.fast.len().max(1);
        if self.fast.is_empty() {
            0
        } else {
            self.fast[offset]
        }
    }

    #[must_use]
    pub fn read_fast16(&self, addr: u32) -> u16 {
        (u16::from(self.read_fast8(addr)) << 8) | u16::from(self.read_fast8(addr + 1))
    }

    pub fn write_fast8(&mut self, addr: u32, value: u8) {
        if !self.fast.is_empty() {
            let offset = (addr as usize - 0x20_0000) % self.fast.len();
            self.fast[offset] = value;
        }
    }

    pub fn write_fast16(&mut self, addr: u32, value: u16) {
        self.write_fast8(addr, (value >> 8) as u8);
        self.write_fast8(addr + 1, value as u8);
    }

    #[must_use]
    pub fn read_rom8(&self, addr: u32) -> u8 {
        if self.rom.is_empty() {
            return 0;
        }
        self.rom[((addr & self.rom_mask) as usize) % self.rom.len()]
    }

    #[must_use]
    pub fn read_rom16(&self, addr: u32) -> u16 {
        (u16::from(self.read_rom8(addr)) << 8) | u16::from(self.read_rom8(addr + 1))
    }

    #[must_use]
    pub fn read_wom8(&self, addr: u32) -> u8 {
        if self.wom.is_empty() {
            return 0;
        }
        self.wom[(addr & self.wom_mask) as usize]
    }

    #[must_use]
    pub fn read_wom16(&self, addr: u32) -> u16 {
        (u16::from(self.read_wom8(addr)) << 8) | u16::from(self.read_wom8(addr + 1))
    }

    /// WOM write. The first write locks the region; once locked, writes
    /// are ignored and the WOM serves as the Kickstart image.
    pub fn write_wom8(&mut self, addr: u32, value: u8) -> bool {
        if self.wom.is_empty() {
            return false;
        }
        let newly_locked = !self.wom_locked;
        if !self.wom_locked {
            warn!("WOM is locking itself");
            self.wom_locked = true;
            self.update_mem_src_table();
        }
        // The lock protects against later writes, not the locking one.
        if newly_locked {
            self.wom[(addr & self.wom_mask) as usize] = value;
        }
        newly_locked
    }

    #[must_use]
    pub fn read_ext8(&self, addr: u32) -> u8 {
        if self.ext.is_empty() {
            return 0;
        }
        self.ext[((addr & self.ext_mask) as usize) % self.ext.len()]
    }

    #[must_use]
    pub fn read_ext16(&self, addr: u32) -> u16 {
        (u16::from(self.read_ext8(addr)) << 8) | u16::from(self.read_ext8(addr + 1))
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-32 (IEEE) over a byte slice, used for ROM fingerprints.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// FNV-1a over 32-bit words, used for blit checksums.
#[must_use]
pub fn fnv32_it(hash: u32, value: u32) -> u32 {
    (hash ^ value).wrapping_mul(0x0100_0193)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_banks() -> Memory {
        let mut mem = Memory::new();
        mem.alloc_chip(512 * 1024);
        mem.alloc_slow(512 * 1024);
        mem.alloc_fast(1024 * 1024);
        mem.load_rom(&vec![0xAA; 256 * 1024]);
        mem
    }

    #[test]
    fn table_routes_all_windows() {
        let mut mem = with_banks();
        mem.ovl = false;
        mem.rtc_attached = true;
        mem.update_mem_src_table();

        assert_eq!(mem.source(0x00_0000), MemorySource::Chip);
        assert_eq!(mem.source(0x07_FFFF), MemorySource::Chip);
        assert_eq!(mem.source(0x20_0000), MemorySource::Fast);
        assert_eq!(mem.source(0xA0_0000), MemorySource::Cia);
        assert_eq!(mem.source(0xBF_E001), MemorySource::Cia);
        assert_eq!(mem.source(0xC0_0000), MemorySource::Slow);
        assert_eq!(mem.source(0xDC_0000), MemorySource::Rtc);
        assert_eq!(mem.source(0xDF_F000), MemorySource::Custom);
        assert_eq!(mem.source(0xE8_0000), MemorySource::AutoConf);
        assert_eq!(mem.source(0xF8_0000), MemorySource::Rom);
    }

    #[test]
    fn overlay_mirrors_rom_at_zero() {
        let mut mem = with_banks();
        assert_eq!(mem.source(0x00_0000), MemorySource::Rom);
        mem.ovl = false;
        mem.update_mem_src_table();
        assert_eq!(mem.source(0x00_0000), MemorySource::Chip);
    }

    #[test]
    fn quarter_meg_chip_ram_mirrors() {
        let mut mem = Memory::new();
        mem.alloc_chip(256 * 1024);
        mem.ovl = false;
        mem.update_mem_src_table();
        assert_eq!(mem.source(0x04_0000), MemorySource::Chip);
        mem.write_chip8(0x0000, 0x55);
        assert_eq!(mem.read_chip8(0x4_0000), 0x55, "address wraps at 256K");
    }

    #[test]
    fn update_table_is_idempotent() {
        let mut mem = with_banks();
        mem.update_mem_src_table();
        let first = mem.mem_src;
        mem.update_mem_src_table();
        assert_eq!(first.as_slice(), mem.mem_src.as_slice());
    }

    #[test]
    fn wom_locks_on_first_write() {
        let mut mem = Memory::new();
        // 8K Boot ROM image (unknown CRC is fine, force a WOM manually).
        mem.load_rom(&vec![0x11; 8 * 1024]);
        mem.wom = vec![0; 256 * 1024];
        mem.wom_mask = 256 * 1024 - 1;
        mem.wom_locked = false;
        mem.update_mem_src_table();

        assert_eq!(mem.source(0xF8_0000), MemorySource::Rom);
        assert_eq!(mem.source(0xFC_0000), MemorySource::Wom);
        assert!(mem.write_wom8(0xFC_0000, 0x42));
        assert!(mem.wom_locked);
        assert_eq!(mem.read_wom8(0xFC_0000), 0x42);
        assert!(!mem.write_wom8(0xFC_0000, 0x99), "locked WOM drops writes");
        assert_eq!(mem.read_wom8(0xFC_0000), 0x42);
        assert_eq!(mem.source(0xF8_0000), MemorySource::Wom);
    }

    #[test]
    fn kickstart_13_fingerprint_recognized() {
        assert_eq!(RomRevision::of(0xC4F0_F55F), RomRevision::Kick13_34_005);
        assert_eq!(RomRevision::of(0x1234_5678), RomRevision::Unknown);
    }

    #[test]
    fn crc32_matches_reference_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
