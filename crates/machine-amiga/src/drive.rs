//! Floppy drive mechanics.
//!
//! The drive consumes a raw per-track byte stream supplied by the host
//! (image decoding is not our business) and exposes the mechanical
//! signals CIA-B observes: select, motor, step, track-zero, write
//! protect, disk change and ready.

use log::debug;

use crate::config::DriveType;

pub const CYLINDER_COUNT: u8 = 80;

/// CIA-B port B output bits (all active low).
pub const PRB_STEP: u8 = 0x01;
pub const PRB_DIR: u8 = 0x02;
pub const PRB_SIDE: u8 = 0x04;
pub const PRB_SEL0: u8 = 0x08;
/// CIA-B port B bit 7 carries the motor latch.
pub const PRB_MTR: u8 = 0x80;

/// CIA-A port A input bits (active low).
pub const PRA_CHNG: u8 = 0x04;
pub const PRA_WPRO: u8 = 0x08;
pub const PRA_TK0: u8 = 0x10;
pub const PRA_RDY: u8 = 0x20;

/// A disk: one raw byte stream per track (2 heads by 80 cylinders).
pub struct DiskStream {
    pub tracks: Vec<Vec<u8>>,
    pub write_protected: bool,
}

impl DiskStream {
    /// A disk whose every track carries the same stream, convenient for
    /// sync-pattern tests.
    #[must_use]
    pub fn uniform(track: Vec<u8>, write_protected: bool) -> Self {
        Self {
            tracks: vec![track; usize::from(CYLINDER_COUNT) * 2],
            write_protected,
        }
    }
}

pub struct FloppyDrive {
    pub nr: u8,
    pub connected: bool,
    pub drive_type: DriveType,
    /// Byte-rate multiplier relative to a real drive.
    pub speed: i64,

    pub motor: bool,
    pub cylinder: u8,
    side: u8,
    selected: bool,
    disk: Option<DiskStream>,
    head_pos: usize,
    /// Disk-change latch, cleared by stepping with no disk inserted.
    disk_change: bool,
    /// Drive identity shifter (32 bits, reloaded on motor edges).
    id_shifter: u32,
    prev_step: bool,
}

impl FloppyDrive {
    #[must_use]
    pub fn new(nr: u8) -> Self {
        Self {
            nr,
            connected: nr == 0,
            drive_type: DriveType::Dd35,
            speed: 1,
            motor: false,
            cylinder: 0,
            side: 0,
            selected: false,
            disk: None,
            head_pos: 0,
            disk_change: true,
            id_shifter: 0,
            prev_step: true,
        }
    }

    pub fn reset(&mut self) {
        self.motor = false;
        self.cylinder = 0;
        self.side = 0;
        self.selected = false;
        self.head_pos = 0;
        self.prev_step = true;
    }

    pub fn insert_disk(&mut self, disk: DiskStream) {
        self.disk = Some(disk);
        self.disk_change = false;
        self.head_pos = 0;
    }

    pub fn eject_disk(&mut self) {
        self.disk = None;
        self.disk_change = true;
    }

    #[must_use]
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    #[must_use]
    pub fn selected(&self) -> bool {
        self.selected
    }

    /// React to a CIA-B port B update. Returns true if the motor state
    /// changed (for the host message).
    pub fn update_from_prb(&mut self, prb: u8) -> bool {
        if !self.connected {
            return false;
        }
        let sel = prb & (PRB_SEL0 << self.nr) == 0;
        let step = prb & PRB_STEP == 0;
        let mut motor_changed = false;

        // The motor latch transfers on the falling select edge.
        if sel && !self.selected {
            let motor = prb & PRB_MTR == 0;
            if motor != self.motor {
                self.motor = motor;
                motor_changed = true;
                // Reload the identity shifter: 3.5" DD reads all ones.
                self.id_shifter = 0xFFFF_FFFF;
                debug!("df{}: motor {}", self.nr, if motor { "on" } else { "off" });
            }
        }
        self.selected = sel;
        self.side = u8::from(prb & PRB_SIDE == 0);

        // Step on the falling edge of the step line while selected.
        if sel && step && self.prev_step != step {
            let outward = prb & PRB_DIR != 0;
            if outward {
                self.cylinder = self.cylinder.saturating_sub(1);
            } else if self.cylinder < CYLINDER_COUNT - 1 {
                self.cylinder += 1;
            }
            self.head_pos = 0;
            if self.disk.is_none() {
                self.disk_change = true;
            }
            debug!("df{}: step to cylinder {}", self.nr, self.cylinder);
        }
        self.prev_step = step;
        motor_changed
    }

    /// CIA-A port A input bits contributed by this drive when selected.
    #[must_use]
    pub fn pra_bits(&mut self) -> u8 {
        if !self.connected || !self.selected {
            return PRA_CHNG | PRA_WPRO | PRA_TK0 | PRA_RDY;
        }
        let mut bits = 0xFF;
        if self.has_disk() && !self.disk_change {
            // pin low = no change
            bits &= !PRA_CHNG;
        }
        if self.disk.as_ref().is_some_and(|d| d.write_protected) {
            bits &= !PRA_WPRO;
        }
        if self.cylinder == 0 {
            bits &= !PRA_TK0;
        }
        if self.motor {
            bits &= !PRA_RDY;
        } else {
            // Motor off: RDY serves the identity shifter.
            if self.id_shifter & 0x8000_0000 != 0 {
                bits &= !PRA_RDY;
            }
            self.id_shifter <<= 1;
        }
        bits
    }

    /// Next byte under the head, if the drive is spinning with a disk in.
    pub fn read_head(&mut self) -> Option<u8> {
        if !self.selected || !self.motor {
            return None;
        }
        let track_index = usize::from(self.cylinder) * 2 + usize::from(self.side);
        let disk = self.disk.as_ref()?;
        let track = disk.tracks.get(track_index)?;
        if track.is_empty() {
            return None;
        }
        let byte = track[self.head_pos % track.len()];
        self.head_pos = (self.head_pos + 1) % track.len();
        Some(byte)
    }

    /// Write one byte under the head.
    pub fn write_head(&mut self, byte: u8) {
        if !self.selected || !self.motor {
            return;
        }
        let track_index = usize::from(self.cylinder) * 2 + usize::from(self.side);
        if let Some(disk) = self.disk.as_mut() {
            if disk.write_protected {
                return;
            }
            if let Some(track) = disk.tracks.get_mut(track_index) {
                if !track.is_empty() {
                    let pos = self.head_pos % track.len();
                    track[pos] = byte;
                    self.head_pos = (self.head_pos + 1) % track.len();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected_spinning() -> FloppyDrive {
        let mut df0 = FloppyDrive::new(0);
        df0.insert_disk(DiskStream::uniform(vec![0x11, 0x22, 0x33], false));
        // Falling select edge with motor bit low latches the motor.
        df0.update_from_prb(0xFF);
        df0.update_from_prb(0xFF & !(PRB_SEL0 | PRB_MTR));
        df0
    }

    #[test]
    fn motor_latches_on_select_edge() {
        let df0 = selected_spinning();
        assert!(df0.motor);
    }

    #[test]
    fn head_stream_wraps_around_track() {
        let mut df0 = selected_spinning();
        assert_eq!(df0.read_head(), Some(0x11));
        assert_eq!(df0.read_head(), Some(0x22));
        assert_eq!(df0.read_head(), Some(0x33));
        assert_eq!(df0.read_head(), Some(0x11));
    }

    #[test]
    fn stepping_moves_between_cylinders() {
        let mut df0 = selected_spinning();
        let base = 0xFF & !(PRB_SEL0 | PRB_MTR);
        // Inward step pulse (DIR low).
        df0.update_from_prb(base & !(PRB_STEP | PRB_DIR));
        df0.update_from_prb(base & !PRB_DIR);
        assert_eq!(df0.cylinder, 1);
        // Outward step pulse (DIR high).
        df0.update_from_prb(base & !PRB_STEP);
        assert_eq!(df0.cylinder, 0);
        assert_eq!(df0.pra_bits() & PRA_TK0, 0, "track zero asserted");
    }

    #[test]
    fn unselected_drive_floats_status_lines() {
        let mut df0 = FloppyDrive::new(0);
        assert_eq!(
            df0.pra_bits(),
            PRA_CHNG | PRA_WPRO | PRA_TK0 | PRA_RDY
        );
    }
}
