//! Serial port UART (SERPER / SERDAT / SERDATR).
//!
//! Transmission timing is event-driven: the machine asks for the duration
//! of the frame on the wire and schedules the TXD/RXD slots accordingly.

/// Devices that can sit on the serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerialDevice {
    #[default]
    None,
    /// TXD wired back to RXD.
    Loopback,
}

pub struct Uart {
    pub device: SerialDevice,
    /// Bit period minus one, bit 15 selects 9 data bits (SERPER).
    pub serper: u16,

    // Transmit side: buffer register plus shift register.
    tx_buffer: Option<u16>,
    tx_shift: Option<u16>,

    // Receive side.
    rx_data: u16,
    rx_buffer_full: bool,
    rx_overrun: bool,
}

impl Uart {
    #[must_use]
    pub fn new() -> Self {
        Self {
            device: SerialDevice::None,
            serper: 0,
            tx_buffer: None,
            tx_shift: None,
            rx_data: 0,
            rx_buffer_full: false,
            rx_overrun: false,
        }
    }

    pub fn reset(&mut self) {
        let device = self.device;
        *self = Self::new();
        self.device = device;
    }

    #[must_use]
    pub fn data_bits(&self) -> u32 {
        if self.serper & 0x8000 != 0 {
            9
        } else {
            8
        }
    }

    /// Length of one frame (start + data + stop) in DMA cycles.
    #[must_use]
    pub fn frame_duration(&self) -> i64 {
        let bit = i64::from(self.serper & 0x7FFF) + 1;
        bit * (i64::from(self.data_bits()) + 2)
    }

    pub fn poke_serper(&mut self, value: u16) {
        self.serper = value;
    }

    /// Write SERDAT. Returns true if a shift-out starts now (the machine
    /// then schedules the TXD event after `frame_duration`).
    pub fn poke_serdat(&mut self, value: u16) -> bool {
        self.tx_buffer = Some(value);
        self.try_load_shift()
    }

    fn try_load_shift(&mut self) -> bool {
        if self.tx_shift.is_none() {
            if let Some(word) = self.tx_buffer.take() {
                self.tx_shift = Some(word);
                return true;
            }
        }
        false
    }

    /// The scheduled TXD event fired: the shift register drained. Returns
    /// `(tbe_irq, transmitted, next_shift_started)`.
    pub fn tx_done(&mut self) -> (bool, Option<u16>, bool) {
        let sent = self.tx_shift.take();
        let restarted = self.try_load_shift();
        (true, sent, restarted)
    }

    /// A frame arrived on RXD (from the device or the loopback path).
    pub fn rx_byte(&mut self, value: u16) {
        if self.rx_buffer_full {
            self.rx_overrun = true;
        }
        self.rx_data = value & 0x03FF;
        self.rx_buffer_full = true;
    }

    /// SERDATR: received data plus status bits.
    #[must_use]
    pub fn peek_serdatr(&self) -> u16 {
        let mut value = self.rx_data;
        if self.rx_overrun {
            value |= 1 << 15; // OVRUN
        }
        if self.rx_buffer_full {
            value |= 1 << 14; // RBF
        }
        if self.tx_buffer.is_none() {
            value |= 1 << 13; // TBE
        }
        if self.tx_buffer.is_none() && self.tx_shift.is_none() {
            value |= 1 << 12; // TSRE
        }
        value | (1 << 11) // RXD pin idles high
    }

    /// INTREQ write clearing RBF also clears the receive status.
    pub fn clear_rbf(&mut self) {
        self.rx_buffer_full = false;
        self.rx_overrun = false;
    }
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_counts_start_and_stop_bits() {
        let mut uart = Uart::new();
        uart.poke_serper(368 - 1); // 9600 baud on PAL
        assert_eq!(uart.frame_duration(), 368 * 10);
        uart.poke_serper(0x8000 | (368 - 1));
        assert_eq!(uart.frame_duration(), 368 * 11);
    }

    #[test]
    fn transmit_status_bits_track_buffer_and_shifter() {
        let mut uart = Uart::new();
        assert_eq!(uart.peek_serdatr() & 0x3000, 0x3000, "TBE and TSRE idle");
        assert!(uart.poke_serdat(0x141));
        // Buffer drained into the shifter immediately: TBE set, TSRE clear.
        assert_eq!(uart.peek_serdatr() & 0x2000, 0x2000);
        assert_eq!(uart.peek_serdatr() & 0x1000, 0);
        let (_, sent, restarted) = uart.tx_done();
        assert_eq!(sent, Some(0x141));
        assert!(!restarted);
        assert_eq!(uart.peek_serdatr() & 0x3000, 0x3000);
    }

    #[test]
    fn second_write_queues_in_buffer() {
        let mut uart = Uart::new();
        assert!(uart.poke_serdat(1));
        assert!(!uart.poke_serdat(2), "shifter busy, word waits in buffer");
        assert_eq!(uart.peek_serdatr() & 0x2000, 0, "TBE clear while queued");
        let (_, _, restarted) = uart.tx_done();
        assert!(restarted, "queued word enters the shifter");
    }

    #[test]
    fn receive_sets_rbf_and_overrun() {
        let mut uart = Uart::new();
        uart.rx_byte(0x55);
        assert_eq!(uart.peek_serdatr() & 0x4000, 0x4000);
        uart.rx_byte(0xAA);
        assert_eq!(uart.peek_serdatr() & 0x8000, 0x8000, "overrun flagged");
        uart.clear_rbf();
        assert_eq!(uart.peek_serdatr() & 0xC000, 0);
    }
}
