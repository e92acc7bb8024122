//! Randomized laws over the scheduler, the minterm circuit and the
//! interrupt logic.

use machine_amiga::agnus::blitter::{minterm, minterm_fast};
use machine_amiga::commodore_paula_8364::Paula8364;
use machine_amiga::scheduler::{EventId, EventScheduler, Slot, ALL_SLOTS};
use machine_amiga::NEVER;

use proptest::prelude::*;

proptest! {
    /// The micro-engine's logic circuit equals the naive reference for
    /// every minterm code.
    #[test]
    fn minterm_fast_equals_reference(a in any::<u16>(), b in any::<u16>(), c in any::<u16>()) {
        for code in 0..=255u8 {
            prop_assert_eq!(minterm_fast(a, b, c, code), minterm(a, b, c, code));
        }
    }

    /// The posted interrupt level is zero exactly when nothing is both
    /// pending and enabled, and otherwise matches the group of the
    /// highest qualifying bit.
    #[test]
    fn interrupt_level_matches_priority_groups(req in any::<u16>(), ena in any::<u16>()) {
        let level = Paula8364::level(req, ena);
        let masked = req & ena & 0x7FFF;
        prop_assert_eq!(level == 0, masked == 0);
        if masked != 0 {
            let highest = 15 - masked.leading_zeros();
            let expected = match highest {
                13..=14 => 6,
                11..=12 => 5,
                7..=10 => 4,
                4..=6 => 3,
                3 => 2,
                _ => 1,
            };
            prop_assert_eq!(level, expected);
        }
    }

    /// INTREQ set-then-clear leaves exactly the previous bits minus the
    /// written ones.
    #[test]
    fn intreq_set_clear_roundtrip(prev in 0u16..0x8000, bits in 0u16..0x8000) {
        let mut paula = Paula8364::new();
        paula.poke_intreq(0x8000 | prev);
        paula.poke_intreq(0x8000 | bits);
        paula.poke_intreq(bits);
        assert_eq!(paula.peek_intreq_r(), prev & !bits);
    }

    /// Every relative schedule produces exactly one service at
    /// `clock + delta`, and service times never decrease.
    #[test]
    fn scheduler_services_each_event_once_in_order(
        deltas in proptest::collection::vec(1i64..10_000, 1..8)
    ) {
        let mut sched = EventScheduler::new();
        let clock0 = 12_345i64;
        let slots = [Slot::Reg, Slot::CiaA, Slot::CiaB, Slot::Bpl, Slot::Das, Slot::Cop, Slot::Blt, Slot::Kbd];
        let mut expected: Vec<(i64, usize)> = Vec::new();
        for (i, &delta) in deltas.iter().enumerate() {
            sched.schedule_rel(slots[i], clock0, delta, EventId::RegChange, 0);
            expected.push((clock0 + delta, slots[i] as usize));
        }
        expected.sort();

        let mut serviced = Vec::new();
        let mut last_trigger = i64::MIN;
        while let Some(slot) = sched.due_slot(clock0 + 10_000) {
            let trigger = sched.slot[slot as usize].trigger;
            prop_assert!(trigger >= last_trigger, "service times must not decrease");
            last_trigger = trigger;
            serviced.push((trigger, slot as usize));
            sched.cancel(slot);
        }
        prop_assert_eq!(serviced, expected);
    }
}

#[test]
fn cancel_empties_every_slot() {
    let mut sched = EventScheduler::new();
    for slot in ALL_SLOTS {
        sched.schedule_abs(slot, 100, EventId::RegChange, 0);
    }
    for slot in ALL_SLOTS {
        sched.cancel(slot);
    }
    assert_eq!(sched.next_trigger(), NEVER);
    assert_eq!(sched.due_slot(i64::MAX - 1), None);
}
