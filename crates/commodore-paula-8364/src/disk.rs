//! Disk controller byte engine.
//!
//! The controller consumes the raw byte stream coming off the selected
//! drive head, watches for the DSKSYNC word, assembles 16-bit words and
//! reports them for the machine to store at DSKPT. Decoding disk images
//! into that byte stream is the drive's business, not ours.

use log::debug;

/// DMA state of the disk controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiskDmaState {
    /// DSKLEN bit 15 clear, nothing moves.
    #[default]
    Off,
    /// Armed, waiting for the sync word (WORDSYNC on) or started outright.
    WaitSync,
    /// Streaming words into memory.
    Reading,
    /// Streaming words out of memory.
    Writing,
}

pub struct DiskController {
    pub state: DiskDmaState,
    /// Raw DSKLEN register; bit 15 = DMAEN, bit 14 = WRITE.
    pub dsklen: u16,
    /// Sync word compared against the incoming stream (DSKSYNC).
    pub dsksync: u16,
    /// FIFO buffering between head and DMA engine (config switch).
    pub use_fifo: bool,

    // Kick-off protection: DMA starts only after two consecutive writes
    // with bit 15 set.
    armed_once: bool,

    // Incoming byte assembly.
    shift: u32,
    bits_in_shift: u8,
    fifo: [u16; 6],
    fifo_len: usize,

    // Words left in the running transfer.
    length_counter: u16,

    // DSKBYTR state.
    last_byte: u8,
    byte_ready: bool,
    word_synced: bool,
}

impl DiskController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DiskDmaState::Off,
            dsklen: 0,
            dsksync: 0x4489, // MFM sync mark, the reset-time default
            use_fifo: true,
            armed_once: false,
            shift: 0,
            bits_in_shift: 0,
            fifo: [0; 6],
            fifo_len: 0,
            length_counter: 0,
            last_byte: 0,
            byte_ready: false,
            word_synced: false,
        }
    }

    pub fn reset(&mut self) {
        let use_fifo = self.use_fifo;
        *self = Self::new();
        self.use_fifo = use_fifo;
    }

    /// DSKLEN write. DMA arms on the second consecutive write with bit 15
    /// set; any write with bit 15 clear disarms.
    pub fn poke_dsklen(&mut self, value: u16, wordsync_enabled: bool) {
        self.dsklen = value;
        if value & 0x8000 == 0 {
            self.armed_once = false;
            self.state = DiskDmaState::Off;
            return;
        }
        if !self.armed_once {
            self.armed_once = true;
            return;
        }
        self.armed_once = false;
        self.length_counter = value & 0x3FFF;
        self.fifo_len = 0;
        self.bits_in_shift = 0;
        self.word_synced = false;
        if value & 0x4000 != 0 {
            self.state = DiskDmaState::Writing;
            debug!("disk DMA write armed, {} words", self.length_counter);
        } else if wordsync_enabled {
            self.state = DiskDmaState::WaitSync;
            debug!("disk DMA read armed, waiting for sync {:04X}", self.dsksync);
        } else {
            self.state = DiskDmaState::Reading;
            debug!("disk DMA read armed, {} words", self.length_counter);
        }
    }

    pub fn poke_dsksync(&mut self, value: u16) {
        self.dsksync = value;
    }

    /// Feed one byte from the drive head. Returns the events the machine
    /// has to act on.
    pub fn byte_from_drive(&mut self, byte: u8) -> DiskEvents {
        let mut events = DiskEvents::default();
        self.last_byte = byte;
        self.byte_ready = true;

        self.shift = (self.shift << 8) | u32::from(byte);
        if self.bits_in_shift < 16 {
            self.bits_in_shift += 8;
        }

        if self.bits_in_shift >= 16 {
            let word = (self.shift & 0xFFFF) as u16;

            // Sync detection runs regardless of DMA state.
            if word == self.dsksync {
                self.word_synced = true;
                events.sync_matched = true;
                if self.state == DiskDmaState::WaitSync {
                    self.state = DiskDmaState::Reading;
                    // The sync word itself is not stored.
                    self.bits_in_shift = 0;
                    return events;
                }
            }

            if self.state == DiskDmaState::Reading {
                self.bits_in_shift = 0;
                if self.use_fifo {
                    if self.fifo_len < self.fifo.len() {
                        self.fifo[self.fifo_len] = word;
                        self.fifo_len += 1;
                    }
                } else {
                    events.word_ready = Some(word);
                    self.account_word(&mut events);
                }
            }
        }
        events
    }

    /// Pop a buffered word for the DSK DMA slot, if one is pending.
    pub fn dma_word(&mut self) -> Option<(u16, DiskEvents)> {
        if self.state != DiskDmaState::Reading || self.fifo_len == 0 {
            return None;
        }
        let word = self.fifo[0];
        self.fifo.copy_within(1.., 0);
        self.fifo_len -= 1;
        let mut events = DiskEvents::default();
        self.account_word(&mut events);
        Some((word, events))
    }

    fn account_word(&mut self, events: &mut DiskEvents) {
        self.length_counter = self.length_counter.saturating_sub(1);
        if self.length_counter == 0 {
            self.state = DiskDmaState::Off;
            events.block_done = true;
        }
    }

    /// Words still expected by a write transfer; the machine fetches them
    /// from chip RAM and pushes them to the drive.
    pub fn write_word_to_drive(&mut self) -> Option<DiskEvents> {
        if self.state != DiskDmaState::Writing {
            return None;
        }
        let mut events = DiskEvents::default();
        self.account_word(&mut events);
        Some(events)
    }

    /// DSKBYTR: destructive read of the last head byte.
    pub fn peek_dskbytr(&mut self) -> u16 {
        let mut value = u16::from(self.last_byte);
        if self.byte_ready {
            value |= 1 << 15;
        }
        if self.state != DiskDmaState::Off && self.dsklen & 0x8000 != 0 {
            value |= 1 << 14; // DMAON
        }
        if self.dsklen & 0x4000 != 0 {
            value |= 1 << 13; // DISKWRITE
        }
        if self.word_synced {
            value |= 1 << 12; // WORDEQUAL
        }
        self.byte_ready = false;
        value
    }

    /// DSKDATR, the debugger-visible data port.
    #[must_use]
    pub fn peek_dskdatr(&self) -> u16 {
        if self.fifo_len > 0 {
            self.fifo[0]
        } else {
            (self.shift & 0xFFFF) as u16
        }
    }

    #[must_use]
    pub fn dma_active(&self) -> bool {
        matches!(self.state, DiskDmaState::Reading | DiskDmaState::Writing)
    }
}

impl Default for DiskController {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened as a consequence of feeding the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskEvents {
    /// A word is ready to be stored at DSKPT (FIFO off path).
    pub word_ready: Option<u16>,
    /// The incoming stream matched DSKSYNC.
    pub sync_matched: bool,
    /// The transfer length reached zero.
    pub block_done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed_reader(words: u16, wordsync: bool) -> DiskController {
        let mut disk = DiskController::new();
        disk.use_fifo = false;
        disk.poke_dsklen(0x8000 | words, wordsync);
        disk.poke_dsklen(0x8000 | words, wordsync);
        disk
    }

    #[test]
    fn single_dsklen_write_does_not_start_dma() {
        let mut disk = DiskController::new();
        disk.poke_dsklen(0x8004, false);
        assert_eq!(disk.state, DiskDmaState::Off);
        disk.poke_dsklen(0x8004, false);
        assert_eq!(disk.state, DiskDmaState::Reading);
    }

    #[test]
    fn dsklen_clear_disarms() {
        let mut disk = DiskController::new();
        disk.poke_dsklen(0x8004, false);
        disk.poke_dsklen(0x0000, false);
        disk.poke_dsklen(0x8004, false);
        assert_eq!(disk.state, DiskDmaState::Off, "arming counter restarted");
    }

    #[test]
    fn words_assemble_and_block_completes() {
        let mut disk = armed_reader(2, false);
        assert_eq!(disk.byte_from_drive(0x12).word_ready, None);
        let ev = disk.byte_from_drive(0x34);
        assert_eq!(ev.word_ready, Some(0x1234));
        assert!(!ev.block_done);
        disk.byte_from_drive(0x56);
        let ev = disk.byte_from_drive(0x78);
        assert_eq!(ev.word_ready, Some(0x5678));
        assert!(ev.block_done);
        assert_eq!(disk.state, DiskDmaState::Off);
    }

    #[test]
    fn sync_word_gates_transfer_and_is_not_stored() {
        let mut disk = armed_reader(1, true);
        assert_eq!(disk.state, DiskDmaState::WaitSync);
        disk.byte_from_drive(0x00);
        disk.byte_from_drive(0x00);
        disk.byte_from_drive(0x44);
        let ev = disk.byte_from_drive(0x89);
        assert!(ev.sync_matched);
        assert_eq!(ev.word_ready, None);
        assert_eq!(disk.state, DiskDmaState::Reading);
        disk.byte_from_drive(0xAB);
        let ev = disk.byte_from_drive(0xCD);
        assert_eq!(ev.word_ready, Some(0xABCD));
    }

    #[test]
    fn fifo_path_buffers_until_dma_slot() {
        let mut disk = DiskController::new();
        disk.poke_dsklen(0x8002, false);
        disk.poke_dsklen(0x8002, false);
        disk.byte_from_drive(0xDE);
        let ev = disk.byte_from_drive(0xAD);
        assert_eq!(ev.word_ready, None, "word parked in the FIFO");
        let (word, _) = disk.dma_word().expect("fifo holds a word");
        assert_eq!(word, 0xDEAD);
        assert!(disk.dma_word().is_none());
    }

    #[test]
    fn dskbytr_reports_and_clears_byte_ready() {
        let mut disk = armed_reader(4, false);
        disk.byte_from_drive(0x5A);
        let value = disk.peek_dskbytr();
        assert_eq!(value & 0x80FF, 0x805A);
        assert_eq!(disk.peek_dskbytr() & 0x8000, 0);
    }
}
