//! The master event scheduler.
//!
//! A fixed-width vector of named slots, not a heap: the number of event
//! sources is small and known at compile time. The first eight slots are
//! primary and inspected on the hot path; the other eight are secondary
//! and gated by the SEC slot, whose trigger cycle is the minimum over all
//! secondary triggers. Ties are serviced in declaration order.

use crate::{Cycle, NEVER};

/// Event slots, in service order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Slot {
    // Primary slots.
    Reg = 0,
    CiaA = 1,
    CiaB = 2,
    Bpl = 3,
    Das = 4,
    Cop = 5,
    Blt = 6,
    Sec = 7,
    // Secondary slots, gated by Sec.
    Irq = 8,
    Kbd = 9,
    Txd = 10,
    Rxd = 11,
    Pot = 12,
    Dsk = 13,
    Vbl = 14,
    Ins = 15,
}

pub const SLOT_COUNT: usize = 16;
pub const PRIMARY_SLOT_COUNT: usize = 8;
pub const SEC_SLOT: usize = Slot::Sec as usize;

pub const ALL_SLOTS: [Slot; SLOT_COUNT] = [
    Slot::Reg,
    Slot::CiaA,
    Slot::CiaB,
    Slot::Bpl,
    Slot::Das,
    Slot::Cop,
    Slot::Blt,
    Slot::Sec,
    Slot::Irq,
    Slot::Kbd,
    Slot::Txd,
    Slot::Rxd,
    Slot::Pot,
    Slot::Dsk,
    Slot::Vbl,
    Slot::Ins,
];

/// What a pending event means when its slot fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventId {
    #[default]
    None,
    /// Apply queued delayed register changes.
    RegChange,
    /// Wake a sleeping CIA for its next timer underflow.
    CiaWakeup,
    /// Table-driven bitplane fetch.
    BplFetch,
    /// Table-driven refresh/disk/audio/sprite slot.
    DasEvent,
    /// Advance the Copper state machine.
    CopService,
    /// One micro-instruction of a full-execution copy blit.
    BltCopySlow,
    /// One micro-instruction of a bus-only copy blit replay.
    BltCopyFake,
    /// One micro-instruction of the line-mode replay.
    BltLineFake,
    /// Completion of an accuracy-0 blit.
    BltFastDone,
    /// Recompute the interrupt level presented to the CPU.
    IrqCheck,
    /// Transmit the next keyboard byte.
    KbdTransmit,
    /// The UART shift register drained.
    TxdDone,
    /// A serial frame arrived.
    RxdDone,
    /// Rotate the selected floppy under the head.
    DskRotate,
    /// Start-of-frame duties: VERTB, TOD, Copper restart.
    VblIrq,
    /// Refresh the debugger info structs (target in `data`).
    Inspect,
}

/// One scheduled event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub trigger: Cycle,
    pub id: EventId,
    pub data: i64,
}

impl Event {
    const EMPTY: Self = Self {
        trigger: NEVER,
        id: EventId::None,
        data: 0,
    };
}

pub struct EventScheduler {
    pub slot: [Event; SLOT_COUNT],
    /// Cached minimum over the primary slots.
    next_trigger: Cycle,
}

impl EventScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: [Event::EMPTY; SLOT_COUNT],
            next_trigger: NEVER,
        }
    }

    pub fn reset(&mut self) {
        self.slot = [Event::EMPTY; SLOT_COUNT];
        self.next_trigger = NEVER;
    }

    /// Soonest pending primary trigger.
    #[must_use]
    pub fn next_trigger(&self) -> Cycle {
        self.next_trigger
    }

    pub fn schedule_abs(&mut self, slot: Slot, cycle: Cycle, id: EventId, data: i64) {
        let index = slot as usize;
        self.slot[index] = Event {
            trigger: cycle,
            id,
            data,
        };
        self.refresh(index);
    }

    pub fn schedule_rel(&mut self, slot: Slot, now: Cycle, delta: Cycle, id: EventId, data: i64) {
        self.schedule_abs(slot, now + delta, id, data);
    }

    /// Move an already scheduled event without touching id/data.
    pub fn reschedule_abs(&mut self, slot: Slot, cycle: Cycle) {
        let index = slot as usize;
        self.slot[index].trigger = cycle;
        self.refresh(index);
    }

    pub fn cancel(&mut self, slot: Slot) {
        let index = slot as usize;
        self.slot[index] = Event::EMPTY;
        self.refresh(index);
    }

    #[must_use]
    pub fn is_pending(&self, slot: Slot) -> bool {
        self.slot[slot as usize].trigger != NEVER
    }

    /// The next due slot at `clock`, honoring smallest-trigger order with
    /// declaration order as the tie-breaker. Secondary slots surface
    /// through their own index once SEC is due.
    #[must_use]
    pub fn due_slot(&self, clock: Cycle) -> Option<Slot> {
        let mut best: Option<(Cycle, usize)> = None;
        for index in 0..PRIMARY_SLOT_COUNT {
            let trigger = self.slot[index].trigger;
            if trigger <= clock && best.map_or(true, |(t, _)| trigger < t) {
                best = Some((trigger, index));
            }
        }
        let (_, index) = best?;
        if index != SEC_SLOT {
            return Some(ALL_SLOTS[index]);
        }
        // SEC gate: surface the earliest due secondary slot.
        let mut best_sec: Option<(Cycle, usize)> = None;
        for index in PRIMARY_SLOT_COUNT..SLOT_COUNT {
            let trigger = self.slot[index].trigger;
            if trigger <= clock && best_sec.map_or(true, |(t, _)| trigger < t) {
                best_sec = Some((trigger, index));
            }
        }
        best_sec.map(|(_, index)| ALL_SLOTS[index])
    }

    /// Recompute the SEC gate and the cached primary minimum after slot
    /// `index` changed.
    fn refresh(&mut self, index: usize) {
        if index >= PRIMARY_SLOT_COUNT {
            let min_sec = self.slot[PRIMARY_SLOT_COUNT..]
                .iter()
                .map(|e| e.trigger)
                .min()
                .unwrap_or(NEVER);
            self.slot[SEC_SLOT].trigger = min_sec;
            if min_sec != NEVER {
                self.slot[SEC_SLOT].id = EventId::None;
            }
        }
        self.next_trigger = self.slot[..PRIMARY_SLOT_COUNT]
            .iter()
            .map(|e| e.trigger)
            .min()
            .unwrap_or(NEVER);
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_and_cancel_update_next_trigger() {
        let mut sched = EventScheduler::new();
        assert_eq!(sched.next_trigger(), NEVER);
        sched.schedule_abs(Slot::Cop, 100, EventId::CopService, 0);
        sched.schedule_abs(Slot::Blt, 50, EventId::BltCopySlow, 0);
        assert_eq!(sched.next_trigger(), 50);
        sched.cancel(Slot::Blt);
        assert_eq!(sched.next_trigger(), 100);
    }

    #[test]
    fn due_slot_picks_smallest_then_declaration_order() {
        let mut sched = EventScheduler::new();
        sched.schedule_abs(Slot::Cop, 10, EventId::CopService, 0);
        sched.schedule_abs(Slot::Reg, 10, EventId::RegChange, 0);
        assert_eq!(sched.due_slot(10), Some(Slot::Reg));
        sched.cancel(Slot::Reg);
        assert_eq!(sched.due_slot(10), Some(Slot::Cop));
        assert_eq!(sched.due_slot(9), None);
    }

    #[test]
    fn secondary_events_gate_through_sec() {
        let mut sched = EventScheduler::new();
        sched.schedule_abs(Slot::Vbl, 30, EventId::VblIrq, 0);
        sched.schedule_abs(Slot::Kbd, 20, EventId::KbdTransmit, 0);
        // The SEC slot mirrors the earliest secondary trigger.
        assert_eq!(sched.next_trigger(), 20);
        assert_eq!(sched.due_slot(25), Some(Slot::Kbd));
        sched.cancel(Slot::Kbd);
        assert_eq!(sched.next_trigger(), 30);
        assert_eq!(sched.due_slot(35), Some(Slot::Vbl));
        sched.cancel(Slot::Vbl);
        assert_eq!(sched.next_trigger(), NEVER);
    }
}
