//! Keyboard shell: raw keycodes in, CIA-A serial traffic out.
//!
//! HID decoding happens on the host side; this module only queues raw
//! Amiga keycodes and clocks them into the CIA-A serial register through
//! the KBD event slot, applying the wire encoding (bit-rotated, inverted).

use std::collections::VecDeque;

pub struct Keyboard {
    pub layout: i64,
    queue: VecDeque<u8>,
    /// Waiting for the CIA handshake pulse before sending more.
    awaiting_handshake: bool,
}

impl Keyboard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            layout: 0,
            queue: VecDeque::with_capacity(16),
            awaiting_handshake: false,
        }
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.awaiting_handshake = false;
    }

    /// Queue a key event. Bit 7 of the keycode is the release flag.
    pub fn push_key(&mut self, keycode: u8, released: bool) {
        let code = if released { keycode | 0x80 } else { keycode & 0x7F };
        if self.queue.len() < 16 {
            self.queue.push_back(code);
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty() && !self.awaiting_handshake
    }

    /// Pop the next byte in wire encoding.
    pub fn next_wire_byte(&mut self) -> Option<u8> {
        if self.awaiting_handshake {
            return None;
        }
        let code = self.queue.pop_front()?;
        self.awaiting_handshake = true;
        Some(!(code.rotate_left(1)))
    }

    /// CIA-A acknowledged the byte (SP line handshake).
    pub fn handshake(&mut self) {
        self.awaiting_handshake = false;
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_encoding_rotates_and_inverts() {
        let mut kbd = Keyboard::new();
        kbd.push_key(0x45, false); // Escape
        assert_eq!(kbd.next_wire_byte(), Some(!(0x8A)));
    }

    #[test]
    fn transmission_waits_for_handshake() {
        let mut kbd = Keyboard::new();
        kbd.push_key(0x40, false);
        kbd.push_key(0x40, true);
        assert!(kbd.next_wire_byte().is_some());
        assert_eq!(kbd.next_wire_byte(), None);
        kbd.handshake();
        assert!(kbd.next_wire_byte().is_some());
    }
}
