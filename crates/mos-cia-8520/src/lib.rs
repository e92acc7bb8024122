//! MOS 8520 Complex Interface Adapter (CIA).
//!
//! The Amiga carries two of these (CIA-A and CIA-B), clocked by the E-clock
//! (1/40 of the master crystal). Each provides two 8-bit I/O ports, two
//! 16-bit countdown timers, a 24-bit binary time-of-day counter with alarm,
//! a serial shift register and a small interrupt controller.
//!
//! The chip is driven in batches: the machine calls [`Cia8520::execute`]
//! with the number of E-clocks that elapsed since the last call and uses
//! [`Cia8520::eclocks_until_irq`] to decide when the next wake-up event has
//! to be scheduled. The TOD counter does not run on the E-clock; it is
//! advanced externally (VSYNC for CIA-A, HSYNC for CIA-B).

use log::trace;

/// Interrupt control register bits.
pub const ICR_TA: u8 = 0x01;
pub const ICR_TB: u8 = 0x02;
pub const ICR_ALARM: u8 = 0x04;
pub const ICR_SP: u8 = 0x08;
pub const ICR_FLAG: u8 = 0x10;

const CRA_START: u8 = 0x01;
const CRA_RUNMODE: u8 = 0x08;
const CRA_LOAD: u8 = 0x10;
const CRA_INMODE: u8 = 0x20;
const CRA_SPMODE: u8 = 0x40;

const CRB_START: u8 = 0x01;
const CRB_RUNMODE: u8 = 0x08;
const CRB_LOAD: u8 = 0x10;
const CRB_INMODE: u8 = 0x60;
const CRB_ALARM: u8 = 0x80;

/// One of the two 16-bit countdown timers.
#[derive(Debug, Clone, Copy)]
struct Timer {
    counter: u16,
    latch: u16,
    running: bool,
    oneshot: bool,
    force_load: bool,
}

impl Timer {
    fn new() -> Self {
        Self {
            counter: 0xFFFF,
            latch: 0xFFFF,
            running: false,
            oneshot: false,
            force_load: false,
        }
    }

    /// Advance by `ticks` counted events. Returns the number of underflows.
    fn count(&mut self, mut ticks: u32) -> u32 {
        if self.force_load {
            self.counter = self.latch;
            self.force_load = false;
        }
        if !self.running || ticks == 0 {
            return 0;
        }

        let mut underflows = 0;
        while ticks > 0 {
            let avail = u32::from(self.counter);
            if ticks <= avail {
                self.counter -= ticks as u16;
                break;
            }
            // Hit zero: reload and record the underflow.
            ticks -= avail + 1;
            self.counter = self.latch;
            underflows += 1;
            if self.oneshot {
                self.running = false;
                break;
            }
            // A latch of 0 underflows on every event.
            if self.latch == 0 && ticks > 0 {
                underflows += ticks;
                break;
            }
        }
        underflows
    }

    /// E-clocks until the next underflow, if the timer is counting E-clocks.
    fn eclocks_until_underflow(&self) -> Option<u32> {
        if self.running {
            Some(u32::from(self.counter) + 1)
        } else {
            None
        }
    }
}

/// MOS 8520 Complex Interface Adapter.
pub struct Cia8520 {
    label: &'static str,

    // I/O ports. `pr*` are the output registers, `external_*` the pin state
    // driven from outside (pulled up by default).
    pra: u8,
    prb: u8,
    ddra: u8,
    ddrb: u8,
    pub external_a: u8,
    pub external_b: u8,

    timer_a: Timer,
    timer_b: Timer,

    // 24-bit time-of-day counter plus alarm.
    tod: u32,
    tod_alarm: u32,
    tod_latch: u32,
    tod_latched: bool,
    tod_halted: bool,

    // Serial shift register. In input mode, bytes arrive fully formed via
    // `feed_serial`. In output mode, a write to SDR starts shifting on
    // timer A underflows (two underflows per bit).
    sdr: u8,
    serial_shift_remaining: u8,

    icr_status: u8,
    icr_mask: u8,

    cra: u8,
    crb: u8,
}

impl Cia8520 {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            pra: 0xFF,
            prb: 0xFF,
            ddra: 0,
            ddrb: 0,
            external_a: 0xFF,
            external_b: 0xFF,
            timer_a: Timer::new(),
            timer_b: Timer::new(),
            tod: 0,
            tod_alarm: 0,
            tod_latch: 0,
            tod_latched: false,
            tod_halted: false,
            sdr: 0,
            serial_shift_remaining: 0,
            icr_status: 0,
            icr_mask: 0,
            cra: 0,
            crb: 0,
        }
    }

    pub fn reset(&mut self) {
        let label = self.label;
        let external_a = self.external_a;
        let external_b = self.external_b;
        *self = Self::new(label);
        self.external_a = external_a;
        self.external_b = external_b;
    }

    /// Effective level on port A pins (output register where DDR says
    /// output, external pin state elsewhere).
    #[must_use]
    pub fn pa(&self) -> u8 {
        (self.pra & self.ddra) | (self.external_a & !self.ddra)
    }

    /// Effective level on port B pins.
    #[must_use]
    pub fn pb(&self) -> u8 {
        (self.prb & self.ddrb) | (self.external_b & !self.ddrb)
    }

    /// Advance the chip by `eclocks` E-clock cycles.
    pub fn execute(&mut self, eclocks: u32) {
        let ta_underflows = if self.cra & CRA_INMODE == 0 {
            self.timer_a.count(eclocks)
        } else {
            // CNT counting is not wired on the Amiga board.
            self.timer_a.count(0)
        };
        if ta_underflows > 0 {
            self.trigger(ICR_TA);
            if self.cra & CRA_RUNMODE != 0 {
                self.cra &= !CRA_START;
            }
            self.shift_serial(ta_underflows);
        }

        let tb_ticks = match (self.crb & CRB_INMODE) >> 5 {
            0 => eclocks,
            2 | 3 => ta_underflows,
            _ => 0,
        };
        if self.timer_b.count(tb_ticks) > 0 {
            self.trigger(ICR_TB);
            if self.crb & CRB_RUNMODE != 0 {
                self.crb &= !CRB_START;
            }
        }
    }

    /// E-clocks until this chip next raises an interrupt on its own, used
    /// by the machine to schedule the next wake-up sparsely. `None` means
    /// the chip is fully idle (no event needs to be scheduled).
    #[must_use]
    pub fn eclocks_until_irq(&self) -> Option<u32> {
        let mut soonest: Option<u32> = None;
        if self.cra & CRA_INMODE == 0 {
            soonest = self.timer_a.eclocks_until_underflow();
        }
        if (self.crb & CRB_INMODE) >> 5 == 0 {
            if let Some(b) = self.timer_b.eclocks_until_underflow() {
                soonest = Some(soonest.map_or(b, |a| a.min(b)));
            }
        }
        soonest
    }

    /// Advance the TOD counter by one external tick.
    pub fn increment_tod(&mut self) {
        if self.tod_halted {
            return;
        }
        self.tod = (self.tod + 1) & 0x00FF_FFFF;
        if self.tod == self.tod_alarm {
            self.trigger(ICR_ALARM);
        }
    }

    /// Deliver a fully shifted-in byte to the serial register (keyboard
    /// traffic on CIA-A). Only effective in input mode.
    pub fn feed_serial(&mut self, byte: u8) {
        if self.cra & CRA_SPMODE == 0 {
            self.sdr = byte;
            self.trigger(ICR_SP);
        }
    }

    /// Pulse the FLAG input (disk index on CIA-B).
    pub fn pulse_flag(&mut self) {
        self.trigger(ICR_FLAG);
    }

    /// True while the IRQ line is pulled low.
    #[must_use]
    pub fn irq(&self) -> bool {
        self.icr_status & self.icr_mask & 0x1F != 0
    }

    fn trigger(&mut self, bit: u8) {
        self.icr_status |= bit;
    }

    fn shift_serial(&mut self, underflows: u32) {
        if self.cra & CRA_SPMODE == 0 || self.serial_shift_remaining == 0 {
            return;
        }
        // Two timer A underflows move one bit out.
        let steps = (underflows / 2).min(u32::from(self.serial_shift_remaining));
        self.serial_shift_remaining -= steps as u8;
        if self.serial_shift_remaining == 0 {
            self.trigger(ICR_SP);
        }
    }

    /// Register read with side effects.
    pub fn peek(&mut self, reg: u8) -> u8 {
        match reg & 0x0F {
            0x0 => self.pa(),
            0x1 => self.pb(),
            0x2 => self.ddra,
            0x3 => self.ddrb,
            0x4 => self.timer_a.counter as u8,
            0x5 => (self.timer_a.counter >> 8) as u8,
            0x6 => self.timer_b.counter as u8,
            0x7 => (self.timer_b.counter >> 8) as u8,
            0x8 => {
                // Reading the LSB releases the read latch.
                let value = if self.tod_latched { self.tod_latch } else { self.tod };
                self.tod_latched = false;
                value as u8
            }
            0x9 => {
                let value = if self.tod_latched { self.tod_latch } else { self.tod };
                (value >> 8) as u8
            }
            0xA => {
                // Reading the MSB freezes a snapshot until the LSB is read.
                if !self.tod_latched {
                    self.tod_latch = self.tod;
                    self.tod_latched = true;
                }
                (self.tod_latch >> 16) as u8
            }
            0xB => 0,
            0xC => self.sdr,
            0xD => {
                // Reading ICR clears all pending bits.
                let mut value = self.icr_status;
                if self.irq() {
                    value |= 0x80;
                }
                self.icr_status = 0;
                value
            }
            0xE => self.cra,
            0xF => self.crb,
            _ => unreachable!(),
        }
    }

    /// Register read without side effects, for the debugger.
    #[must_use]
    pub fn spypeek(&self, reg: u8) -> u8 {
        match reg & 0x0F {
            0x0 => self.pa(),
            0x1 => self.pb(),
            0x2 => self.ddra,
            0x3 => self.ddrb,
            0x4 => self.timer_a.counter as u8,
            0x5 => (self.timer_a.counter >> 8) as u8,
            0x6 => self.timer_b.counter as u8,
            0x7 => (self.timer_b.counter >> 8) as u8,
            0x8 => self.tod as u8,
            0x9 => (self.tod >> 8) as u8,
            0xA => (self.tod >> 16) as u8,
            0xB => 0,
            0xC => self.sdr,
            0xD => {
                let mut value = self.icr_status;
                if self.irq() {
                    value |= 0x80;
                }
                value
            }
            0xE => self.cra,
            0xF => self.crb,
            _ => unreachable!(),
        }
    }

    /// Register write.
    pub fn poke(&mut self, reg: u8, value: u8) {
        trace!("{}: poke({:X}, {:02X})", self.label, reg & 0x0F, value);
        match reg & 0x0F {
            0x0 => self.pra = value,
            0x1 => self.prb = value,
            0x2 => self.ddra = value,
            0x3 => self.ddrb = value,
            0x4 => {
                self.timer_a.latch = (self.timer_a.latch & 0xFF00) | u16::from(value);
            }
            0x5 => {
                self.timer_a.latch = (self.timer_a.latch & 0x00FF) | (u16::from(value) << 8);
                // Writing the high byte of a stopped timer loads the counter.
                if !self.timer_a.running {
                    self.timer_a.counter = self.timer_a.latch;
                }
                if self.cra & CRA_RUNMODE != 0 {
                    self.cra |= CRA_START;
                    self.timer_a.running = true;
                }
            }
            0x6 => {
                self.timer_b.latch = (self.timer_b.latch & 0xFF00) | u16::from(value);
            }
            0x7 => {
                self.timer_b.latch = (self.timer_b.latch & 0x00FF) | (u16::from(value) << 8);
                if !self.timer_b.running {
                    self.timer_b.counter = self.timer_b.latch;
                }
                if self.crb & CRB_RUNMODE != 0 {
                    self.crb |= CRB_START;
                    self.timer_b.running = true;
                }
            }
            0x8 => {
                if self.crb & CRB_ALARM != 0 {
                    self.tod_alarm = (self.tod_alarm & 0xFF_FF00) | u32::from(value);
                } else {
                    self.tod = (self.tod & 0xFF_FF00) | u32::from(value);
                    // Writing the LSB restarts a halted counter.
                    self.tod_halted = false;
                }
            }
            0x9 => {
                if self.crb & CRB_ALARM != 0 {
                    self.tod_alarm =
                        (self.tod_alarm & 0xFF_00FF) | (u32::from(value) << 8);
                } else {
                    self.tod = (self.tod & 0xFF_00FF) | (u32::from(value) << 8);
                }
            }
            0xA => {
                if self.crb & CRB_ALARM != 0 {
                    self.tod_alarm =
                        (self.tod_alarm & 0x00_FFFF) | (u32::from(value) << 16);
                } else {
                    self.tod = (self.tod & 0x00_FFFF) | (u32::from(value) << 16);
                    // Writing the MSB halts the counter until the LSB follows.
                    self.tod_halted = true;
                }
            }
            0xB => {}
            0xC => {
                self.sdr = value;
                if self.cra & CRA_SPMODE != 0 {
                    self.serial_shift_remaining = 8;
                }
            }
            0xD => {
                if value & 0x80 != 0 {
                    self.icr_mask |= value & 0x1F;
                } else {
                    self.icr_mask &= !(value & 0x1F);
                }
            }
            0xE => {
                self.cra = value;
                self.timer_a.running = value & CRA_START != 0;
                self.timer_a.oneshot = value & CRA_RUNMODE != 0;
                if value & CRA_LOAD != 0 {
                    self.timer_a.force_load = true;
                    self.cra &= !CRA_LOAD;
                }
            }
            0xF => {
                self.crb = value;
                self.timer_b.running = value & CRB_START != 0;
                self.timer_b.oneshot = value & CRB_RUNMODE != 0;
                if value & CRB_LOAD != 0 {
                    self.timer_b.force_load = true;
                    self.crb &= !CRB_LOAD;
                }
            }
            _ => unreachable!(),
        }
    }

    // Raw accessors used by the snapshot walker.

    #[must_use]
    pub fn save_state(&self) -> CiaState {
        CiaState {
            pra: self.pra,
            prb: self.prb,
            ddra: self.ddra,
            ddrb: self.ddrb,
            ta_counter: self.timer_a.counter,
            ta_latch: self.timer_a.latch,
            tb_counter: self.timer_b.counter,
            tb_latch: self.timer_b.latch,
            tod: self.tod,
            tod_alarm: self.tod_alarm,
            sdr: self.sdr,
            icr_status: self.icr_status,
            icr_mask: self.icr_mask,
            cra: self.cra,
            crb: self.crb,
        }
    }

    pub fn restore_state(&mut self, s: &CiaState) {
        self.pra = s.pra;
        self.prb = s.prb;
        self.ddra = s.ddra;
        self.ddrb = s.ddrb;
        self.timer_a.counter = s.ta_counter;
        self.timer_a.latch = s.ta_latch;
        self.timer_b.counter = s.tb_counter;
        self.timer_b.latch = s.tb_latch;
        self.tod = s.tod;
        self.tod_alarm = s.tod_alarm;
        self.sdr = s.sdr;
        self.icr_status = s.icr_status;
        self.icr_mask = s.icr_mask;
        self.poke(0xE, s.cra);
        self.poke(0xF, s.crb);
    }
}

/// Flat register state for serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CiaState {
    pub pra: u8,
    pub prb: u8,
    pub ddra: u8,
    pub ddrb: u8,
    pub ta_counter: u16,
    pub ta_latch: u16,
    pub tb_counter: u16,
    pub tb_latch: u16,
    pub tod: u32,
    pub tod_alarm: u32,
    pub sdr: u8,
    pub icr_status: u8,
    pub icr_mask: u8,
    pub cra: u8,
    pub crb: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(latch: u16) -> Cia8520 {
        let mut cia = Cia8520::new("cia-test");
        cia.poke(0x4, latch as u8);
        cia.poke(0x5, (latch >> 8) as u8);
        cia.poke(0xD, 0x81); // enable timer A interrupt
        cia.poke(0xE, CRA_START);
        cia
    }

    #[test]
    fn timer_a_counts_down_and_raises_irq() {
        let mut cia = started(9);
        cia.execute(9);
        assert!(!cia.irq());
        cia.execute(1);
        assert!(cia.irq());
        assert_eq!(cia.peek(0xD) & 0x81, 0x81);
        assert!(!cia.irq(), "ICR read must clear pending bits");
    }

    #[test]
    fn batched_execute_matches_single_steps() {
        let mut a = started(100);
        let mut b = started(100);
        a.execute(517);
        for _ in 0..517 {
            b.execute(1);
        }
        assert_eq!(a.spypeek(0x4), b.spypeek(0x4));
        assert_eq!(a.spypeek(0x5), b.spypeek(0x5));
    }

    #[test]
    fn oneshot_timer_stops_after_underflow() {
        let mut cia = Cia8520::new("cia-test");
        cia.poke(0x4, 4);
        cia.poke(0x5, 0);
        cia.poke(0xE, CRA_START | CRA_RUNMODE);
        cia.execute(5);
        assert_eq!(cia.spypeek(0xE) & CRA_START, 0);
        cia.execute(100);
        assert_eq!(cia.spypeek(0xD) & ICR_TA, ICR_TA);
    }

    #[test]
    fn timer_b_counts_timer_a_underflows() {
        let mut cia = Cia8520::new("cia-test");
        cia.poke(0x4, 1);
        cia.poke(0x5, 0);
        cia.poke(0x6, 2);
        cia.poke(0x7, 0);
        cia.poke(0xE, CRA_START);
        cia.poke(0xF, CRB_START | 0x40); // count A underflows
        // Timer A underflows every 2 E-clocks; B needs 3 underflows.
        cia.execute(6);
        assert_eq!(cia.spypeek(0xD) & ICR_TB, 0);
        cia.execute(2);
        assert_eq!(cia.spypeek(0xD) & ICR_TB, ICR_TB);
    }

    #[test]
    fn tod_read_latches_until_lsb() {
        let mut cia = Cia8520::new("cia-test");
        for _ in 0..0x1FF {
            cia.increment_tod();
        }
        assert_eq!(cia.peek(0xA), 0x00);
        cia.increment_tod(); // counter moves on, latch must not
        assert_eq!(cia.peek(0x9), 0x01);
        assert_eq!(cia.peek(0x8), 0xFF);
        // Latch released: next read sees the live counter.
        assert_eq!(cia.peek(0x8), 0x00);
    }

    #[test]
    fn tod_write_halts_until_lsb() {
        let mut cia = Cia8520::new("cia-test");
        cia.poke(0xA, 0x01);
        cia.increment_tod();
        assert_eq!(cia.spypeek(0x8), 0, "halted TOD must not advance");
        cia.poke(0x9, 0x02);
        cia.poke(0x8, 0x03);
        cia.increment_tod();
        assert_eq!(cia.spypeek(0x8), 0x04);
        assert_eq!(cia.spypeek(0x9), 0x02);
        assert_eq!(cia.spypeek(0xA), 0x01);
    }

    #[test]
    fn tod_alarm_raises_interrupt() {
        let mut cia = Cia8520::new("cia-test");
        cia.poke(0xF, CRB_ALARM);
        cia.poke(0xA, 0);
        cia.poke(0x9, 0);
        cia.poke(0x8, 3);
        cia.poke(0xF, 0);
        cia.poke(0xD, 0x84);
        cia.increment_tod();
        cia.increment_tod();
        assert!(!cia.irq());
        cia.increment_tod();
        assert!(cia.irq());
    }

    #[test]
    fn port_mixes_output_register_and_pins() {
        let mut cia = Cia8520::new("cia-test");
        cia.poke(0x2, 0x0F); // low nibble output
        cia.poke(0x0, 0x05);
        cia.external_a = 0xA0;
        assert_eq!(cia.pa(), 0xA5);
    }

    #[test]
    fn serial_input_raises_sp_interrupt() {
        let mut cia = Cia8520::new("cia-test");
        cia.poke(0xD, 0x88);
        cia.feed_serial(0x59);
        assert_eq!(cia.peek(0xC), 0x59);
        assert!(cia.irq());
    }

    #[test]
    fn wakeup_prediction_matches_underflow() {
        let mut cia = started(250);
        let due = cia.eclocks_until_irq().expect("timer running");
        cia.execute(due - 1);
        assert!(!cia.irq());
        cia.execute(1);
        assert!(cia.irq());
    }

    #[test]
    fn state_roundtrip_is_lossless() {
        let mut cia = started(123);
        cia.execute(50);
        let state = cia.save_state();
        let mut other = Cia8520::new("cia-copy");
        other.restore_state(&state);
        assert_eq!(other.save_state(), state);
    }
}
