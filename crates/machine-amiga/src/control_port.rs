//! Control ports: mouse and joystick inputs feeding JOYxDAT, the pot
//! lines and the CIA-A fire-button bits.

/// What is plugged into a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortDevice {
    #[default]
    None,
    Mouse,
    Joystick,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JoystickState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub button: bool,
}

#[derive(Debug, Default)]
pub struct ControlPort {
    pub nr: u8,
    pub device: PortDevice,

    // Mouse state: accumulated deltas drain into the counters on JOYDAT
    // reads, the way the quadrature counters behave.
    mouse_counter_x: u8,
    mouse_counter_y: u8,
    pending_dx: i32,
    pending_dy: i32,
    pub mouse_left: bool,
    pub mouse_right: bool,

    pub joystick: JoystickState,
}

impl ControlPort {
    #[must_use]
    pub fn new(nr: u8) -> Self {
        Self {
            nr,
            ..Self::default()
        }
    }

    pub fn connect(&mut self, device: PortDevice) {
        self.device = device;
    }

    /// Host mouse movement, in counter steps.
    pub fn mouse_moved(&mut self, dx: i32, dy: i32) {
        self.pending_dx += dx;
        self.pending_dy += dy;
    }

    pub fn joydat(&mut self) -> u16 {
        match self.device {
            PortDevice::None => 0,
            PortDevice::Mouse => {
                self.mouse_counter_x = self.mouse_counter_x.wrapping_add(self.pending_dx as u8);
                self.mouse_counter_y = self.mouse_counter_y.wrapping_add(self.pending_dy as u8);
                self.pending_dx = 0;
                self.pending_dy = 0;
                (u16::from(self.mouse_counter_y) << 8) | u16::from(self.mouse_counter_x)
            }
            PortDevice::Joystick => {
                let j = self.joystick;
                // Direction lines are quadrature-encoded: X1/Y1 carry
                // right/down, X0/Y0 fold in the diagonal information.
                let x1 = j.right;
                let y1 = j.left || (j.right && j.down) || (!j.right && j.up);
                let x0 = j.right ^ j.down;
                let y0 = (j.left || j.up) ^ j.up;
                (u16::from(y1) << 9)
                    | (u16::from(y0) << 8)
                    | (u16::from(x1) << 1)
                    | u16::from(x0)
            }
        }
    }

    /// JOYTEST presets the upper counter bits of both counters.
    pub fn poke_joytest(&mut self, value: u16) {
        self.mouse_counter_y = (self.mouse_counter_y & 0b11) | ((value >> 8) as u8 & 0b1111_1100);
        self.mouse_counter_x = (self.mouse_counter_x & 0b11) | (value as u8 & 0b1111_1100);
    }

    /// Fire button / left mouse button on the CIA-A port A bit.
    #[must_use]
    pub fn cia_pa_bit(&self) -> bool {
        match self.device {
            PortDevice::None => true,
            PortDevice::Mouse => !self.mouse_left,
            PortDevice::Joystick => !self.joystick.button,
        }
    }

    /// Right mouse button pulls the POT line low.
    #[must_use]
    pub fn potgor_bits(&self) -> u16 {
        if self.device == PortDevice::Mouse && self.mouse_right {
            if self.nr == 1 {
                !0x0400
            } else {
                !0x4000
            }
        } else {
            0xFFFF
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_deltas_accumulate_into_counters() {
        let mut port = ControlPort::new(1);
        port.connect(PortDevice::Mouse);
        port.mouse_moved(3, -2);
        assert_eq!(port.joydat(), 0xFE03);
        port.mouse_moved(1, 1);
        assert_eq!(port.joydat(), 0xFF04);
    }

    #[test]
    fn joytest_presets_counter_high_bits() {
        let mut port = ControlPort::new(1);
        port.connect(PortDevice::Mouse);
        port.poke_joytest(0xA8A4);
        assert_eq!(port.joydat() & 0xFCFC, 0xA8A4);
    }

    #[test]
    fn fire_button_is_active_low() {
        let mut port = ControlPort::new(1);
        port.connect(PortDevice::Joystick);
        assert!(port.cia_pa_bit());
        port.joystick.button = true;
        assert!(!port.cia_pa_bit());
    }
}
