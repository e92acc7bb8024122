//! Snapshot round-trip and corruption handling.

use machine_amiga::bus::PokeSource;
use machine_amiga::snapshot;
use machine_amiga::{dma_cycles, Amiga};

fn rom_image() -> Vec<u8> {
    let mut rom = vec![0u8; 256 * 1024];
    rom[0..4].copy_from_slice(&0x0004_0000u32.to_be_bytes());
    rom[4..8].copy_from_slice(&0x00F8_0008u32.to_be_bytes());
    rom
}

fn busy_machine() -> Amiga {
    let mut amiga = Amiga::new();
    amiga.load_rom(&rom_image());
    amiga.power_on().expect("power on");
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;
        bus.poke_custom16(0x096, 0x8000 | 0x0200 | 0x0100 | 0x0080, poke);
        bus.poke_custom16(0x08E, 0x2C81, poke);
        bus.poke_custom16(0x090, 0x2CC1, poke);
        bus.poke_custom16(0x092, 0x0038, poke);
        bus.poke_custom16(0x094, 0x00D0, poke);
        bus.poke_custom16(0x100, 2 << 12, poke);
        bus.poke_custom16(0x180, 0x0F00, poke);
        bus.mem.write_chip16(0x1234, 0xC0DE);
        bus.execute_until(bus.agnus.clock + dma_cycles(50_000));
    });
    amiga
}

#[test]
fn save_restore_save_is_byte_identical() {
    let amiga = busy_machine();
    let (first, second) = amiga.with_core(|core| {
        let first = snapshot::save_core(&core.bus, &core.cpu);
        let restore = first.data.clone();
        let core_ref = &mut *core;
        snapshot::load_core(&mut core_ref.bus, &mut core_ref.cpu, &restore)
            .expect("restore");
        let second = snapshot::save_core(&core.bus, &core.cpu);
        (first, second)
    });
    // The timestamp is taken at save time, so compare the payload that
    // follows the header's timestamp field.
    assert_eq!(first.data[..17], second.data[..17]);
    assert_eq!(first.data[25..], second.data[25..]);
}

#[test]
fn restored_machine_continues_identically() {
    let amiga = busy_machine();
    let (a, b) = amiga.with_core(|core| {
        let saved = snapshot::save_core(&core.bus, &core.cpu);

        // Run ahead, remember a probe, then rewind and run again.
        core.bus
            .execute_until(core.bus.agnus.clock + dma_cycles(10_000));
        let probe_a = (
            core.bus.agnus.clock,
            core.bus.agnus.pos,
            core.bus.denise.pixel_engine.get_color(0),
            core.bus.mem.read_chip16(0x1234),
        );

        let core_ref = &mut *core;
        snapshot::load_core(&mut core_ref.bus, &mut core_ref.cpu, &saved.data)
            .expect("restore");
        core.bus
            .execute_until(core.bus.agnus.clock + dma_cycles(10_000));
        let probe_b = (
            core.bus.agnus.clock,
            core.bus.agnus.pos,
            core.bus.denise.pixel_engine.get_color(0),
            core.bus.mem.read_chip16(0x1234),
        );
        (probe_a, probe_b)
    });
    assert_eq!(a, b);
}

#[test]
fn corrupt_magic_is_rejected() {
    let amiga = busy_machine();
    amiga.with_core(|core| {
        let mut snapshot = snapshot::save_core(&core.bus, &core.cpu);
        snapshot.data[0] = b'X';
        let core_ref = &mut *core;
        assert!(
            snapshot::load_core(&mut core_ref.bus, &mut core_ref.cpu, &snapshot.data).is_err()
        );
    });
}

#[test]
fn oversized_region_is_zeroed_not_fatal() {
    let amiga = busy_machine();
    amiga.with_core(|core| {
        let snapshot = snapshot::save_core(&core.bus, &core.cpu);
        let mut data = snapshot.data.clone();
        // The ROM length field sits right after the 25-byte header.
        data[25..29].copy_from_slice(&(0x7FFF_FFFFu32).to_be_bytes());
        // A huge size cannot be walked any further, but it must not
        // produce a bogus allocation.
        let core_ref = &mut *core;
        let _ = snapshot::load_core(&mut core_ref.bus, &mut core_ref.cpu, &data);
        assert!(core_ref.bus.mem.rom.len() <= 512 * 1024);
    });
}

#[test]
fn host_snapshot_storage_round_trips() {
    let mut amiga = busy_machine();
    amiga.take_snapshot();
    assert_eq!(amiga.num_snapshots(), 1);

    // Wreck the palette, then rewind.
    amiga.with_core(|core| {
        core.bus
            .poke_custom16(0x180, 0x0123, PokeSource::Cpu);
    });
    amiga.restore_snapshot(0).expect("restore");
    amiga.with_core(|core| {
        assert_eq!(core.bus.denise.pixel_engine.get_color(0), 0x0F00);
    });
    assert!(amiga.restore_snapshot(7).is_err());
}
