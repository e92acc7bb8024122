//! End-to-end scenarios driving the chip container through the custom
//! register file, the way a program on the machine would.

use machine_amiga::agnus::{BusOwner, HPOS_CNT};
use machine_amiga::bus::PokeSource;
use machine_amiga::commodore_denise_ocs::HPIXELS;
use machine_amiga::commodore_paula_8364::{INT_BLIT, INT_VERTB};
use machine_amiga::{dma_cycles, Amiga, ConfigOption};

const DMACON_SET: u16 = 0x8000;
const DMAEN: u16 = 0x0200;
const BPLEN: u16 = 0x0100;
const COPEN: u16 = 0x0080;
const BLTEN: u16 = 0x0040;
const SPREN: u16 = 0x0020;

fn rom_image() -> Vec<u8> {
    let mut rom = vec![0u8; 256 * 1024];
    rom[0..4].copy_from_slice(&0x0004_0000u32.to_be_bytes());
    rom[4..8].copy_from_slice(&0x00F8_0008u32.to_be_bytes());
    rom
}

fn powered_machine() -> Amiga {
    let mut amiga = Amiga::new();
    amiga.load_rom(&rom_image());
    amiga.power_on().expect("power on");
    amiga
}

fn frame_cycles() -> i64 {
    dma_cycles(HPOS_CNT as i64 * 313)
}

//
// Blitter
//

#[test]
fn blitter_memset_writes_pattern_and_interrupts_once() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;

        bus.poke_custom16(0x096, DMACON_SET | DMAEN | BLTEN, poke);
        bus.poke_custom16(0x040, 0x01FF, poke); // BLTCON0: D only, minterm $FF
        bus.poke_custom16(0x042, 0x0000, poke);
        bus.poke_custom16(0x054, 0x0001, poke); // BLTDPTH
        bus.poke_custom16(0x056, 0x0000, poke); // BLTDPTL = $10000
        bus.poke_custom16(0x066, 0x0000, poke); // BLTDMOD
        bus.poke_custom16(0x058, (100 << 6) | 1, poke); // 1 word x 100 rows

        let dmaconr_busy = bus.peek_custom16(0x002);
        assert_ne!(dmaconr_busy & 0x4000, 0, "BBUSY while the blit runs");

        bus.execute_until(bus.agnus.clock + dma_cycles(4000));

        for row in 0..100u32 {
            assert_eq!(bus.mem.read_chip16(0x1_0000 + 2 * row), 0xFFFF);
        }
        assert_eq!(bus.mem.read_chip16(0x1_0000 + 200), 0x0000, "one past end");

        let dmaconr = bus.peek_custom16(0x002);
        assert_eq!(dmaconr & 0x4000, 0, "BBUSY cleared");
        assert_eq!(dmaconr & 0x2000, 0, "result was non-zero");
        assert_ne!(bus.paula.intreq & INT_BLIT, 0, "completion interrupt");

        // The interrupt fires exactly once.
        bus.poke_custom16(0x09C, INT_BLIT, poke);
        bus.execute_until(bus.agnus.clock + dma_cycles(2000));
        assert_eq!(bus.paula.intreq & INT_BLIT, 0);
    });
}

#[test]
fn blitter_zero_result_sets_bzero() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;
        bus.poke_custom16(0x096, DMACON_SET | DMAEN | BLTEN, poke);
        bus.poke_custom16(0x040, 0x0100, poke); // D only, minterm $00
        bus.poke_custom16(0x054, 0x0001, poke);
        bus.poke_custom16(0x056, 0x8000, poke);
        bus.poke_custom16(0x058, (4 << 6) | 2, poke);
        bus.execute_until(bus.agnus.clock + dma_cycles(500));
        assert_ne!(bus.peek_custom16(0x002) & 0x2000, 0, "BZERO set");
    });
}

#[test]
fn blitter_accuracy_levels_agree_on_memory_result() {
    let run = |accuracy: i64| -> Vec<u16> {
        let mut amiga = powered_machine();
        amiga
            .configure(ConfigOption::BlitterAccuracy, accuracy)
            .unwrap();
        amiga.with_core(|core| {
            let bus = &mut core.bus;
            let poke = PokeSource::Cpu;
            for i in 0..64u32 {
                bus.mem.write_chip16(0x2_0000 + 2 * i, (0x1111u16).wrapping_mul(i as u16));
                bus.mem.write_chip16(0x3_0000 + 2 * i, 0x5A5A);
            }
            bus.poke_custom16(0x096, DMACON_SET | DMAEN | BLTEN, poke);
            bus.poke_custom16(0x040, 0x0DFC | (2 << 12), poke); // A,B,D; A|B
            bus.poke_custom16(0x044, 0x3FFF, poke);
            bus.poke_custom16(0x046, 0xFFF0, poke);
            bus.poke_custom16(0x050, 0x0002, poke);
            bus.poke_custom16(0x052, 0x0000, poke);
            bus.poke_custom16(0x04C, 0x0003, poke);
            bus.poke_custom16(0x04E, 0x0000, poke);
            bus.poke_custom16(0x054, 0x0004, poke);
            bus.poke_custom16(0x056, 0x0000, poke);
            bus.poke_custom16(0x064, 0x0000, poke);
            bus.poke_custom16(0x062, 0x0000, poke);
            bus.poke_custom16(0x066, 0x0000, poke);
            bus.poke_custom16(0x058, (8 << 6) | 8, poke);
            bus.execute_until(bus.agnus.clock + dma_cycles(4000));
            (0..64u32).map(|i| bus.mem.read_chip16(0x4_0000 + 2 * i)).collect()
        })
    };

    let fast = run(0);
    let replay = run(1);
    let slow = run(2);
    assert_eq!(fast, replay);
    assert_eq!(fast, slow);
}

//
// Copper
//

#[test]
fn copper_palette_change_turns_border_red_mid_frame() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;

        // Copper list at $20000: WAIT line $2A, COLOR00 = red, end.
        bus.mem.write_chip16(0x2_0000, 0x2A01);
        bus.mem.write_chip16(0x2_0002, 0xFFFE);
        bus.mem.write_chip16(0x2_0004, 0x0180);
        bus.mem.write_chip16(0x2_0006, 0x0F00);
        bus.mem.write_chip16(0x2_0008, 0xFFFF);
        bus.mem.write_chip16(0x2_000A, 0xFFFE);

        bus.poke_custom16(0x080, 0x0002, poke);
        bus.poke_custom16(0x082, 0x0000, poke);
        bus.poke_custom16(0x096, DMACON_SET | DMAEN | COPEN, poke);

        // Two frames: one to take effect, one for a stable buffer swap.
        let end = bus.agnus.clock + 2 * frame_cycles() + dma_cycles(1000);
        bus.execute_until(end);
    });

    let frame = amiga.get_stable_long_frame();
    let red = 0xFF00_00FF;
    let row = |v: usize| &frame.pixels[v * HPIXELS..(v + 1) * HPIXELS];

    assert!(
        row(0x28).iter().all(|&p| p != red),
        "lines above the wait position stay background-colored"
    );
    assert!(
        row(0x50).iter().filter(|&&p| p == red).count() > HPIXELS / 2,
        "rasterlines after the wait are painted red"
    );
    assert!(row(0x130).iter().any(|&p| p == red), "red until end of frame");
}

#[test]
fn copper_skip_bypasses_one_instruction() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;

        // SKIP if beam >= line 0 (always true), then a COLOR00 move that
        // must be skipped, then a COLOR01 move that must execute.
        bus.mem.write_chip16(0x2_0000, 0x0001);
        bus.mem.write_chip16(0x2_0002, 0xFFFF);
        bus.mem.write_chip16(0x2_0004, 0x0180);
        bus.mem.write_chip16(0x2_0006, 0x0F00);
        bus.mem.write_chip16(0x2_0008, 0x0182);
        bus.mem.write_chip16(0x2_000A, 0x00F0);
        bus.mem.write_chip16(0x2_000C, 0xFFFF);
        bus.mem.write_chip16(0x2_000E, 0xFFFE);

        bus.poke_custom16(0x080, 0x0002, poke);
        bus.poke_custom16(0x082, 0x0000, poke);
        bus.poke_custom16(0x096, DMACON_SET | DMAEN | COPEN, poke);

        bus.execute_until(bus.agnus.clock + frame_cycles());
        assert_eq!(bus.denise.pixel_engine.get_color(0), 0x0000, "skipped");
        assert_eq!(bus.denise.pixel_engine.get_color(1), 0x00F0, "executed");
    });
}

#[test]
fn copper_respects_the_danger_bit() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;

        // MOVE to BLTAFWM (privileged) then to COLOR00.
        bus.mem.write_chip16(0x2_0000, 0x0044);
        bus.mem.write_chip16(0x2_0002, 0x1234);
        bus.mem.write_chip16(0x2_0004, 0x0180);
        bus.mem.write_chip16(0x2_0006, 0x0777);
        bus.mem.write_chip16(0x2_0008, 0xFFFF);
        bus.mem.write_chip16(0x2_000A, 0xFFFE);

        bus.poke_custom16(0x080, 0x0002, poke);
        bus.poke_custom16(0x082, 0x0000, poke);
        bus.poke_custom16(0x096, DMACON_SET | DMAEN | COPEN, poke);
        bus.execute_until(bus.agnus.clock + frame_cycles());

        assert_eq!(bus.agnus.blitter.bltafwm, 0xFFFF, "privileged MOVE blocked");
        assert_eq!(bus.denise.pixel_engine.get_color(0), 0x0777);

        // With CDANG set the same list reaches the blitter register.
        bus.poke_custom16(0x02E, 0x0001, poke);
        bus.execute_until(bus.agnus.clock + frame_cycles());
        assert_eq!(bus.agnus.blitter.bltafwm, 0x1234);
    });
}

//
// Bus arbitration
//

#[test]
fn bus_grid_has_exclusive_owners_per_slot() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;

        bus.poke_custom16(0x08E, 0x2C81, poke); // DIWSTRT
        bus.poke_custom16(0x090, 0x2CC1, poke); // DIWSTOP
        bus.poke_custom16(0x092, 0x0038, poke); // DDFSTRT
        bus.poke_custom16(0x094, 0x00D0, poke); // DDFSTOP
        bus.poke_custom16(0x100, 4 << 12, poke); // four planes
        bus.poke_custom16(0x096, DMACON_SET | DMAEN | BPLEN | SPREN, poke);

        // Stop late on a display line and inspect the slot grid.
        let target = bus.agnus.cycle_of(0x60, 0xE0);
        bus.execute_until(target);

        assert_eq!(bus.agnus.pos.v, 0x60);
        assert_eq!(bus.agnus.bus_owner[0x01], BusOwner::Refresh);
        assert_eq!(bus.agnus.bus_owner[0x1B], BusOwner::Refresh);

        // Inside the fetch window the interleaved plane order holds and
        // nothing was double-booked.
        assert_eq!(bus.agnus.bus_owner[0x38], BusOwner::None);
        assert_eq!(bus.agnus.bus_owner[0x39], BusOwner::Bitplane(4));
        assert_eq!(bus.agnus.bus_owner[0x3B], BusOwner::Bitplane(2));
        assert_eq!(bus.agnus.bus_owner[0x3D], BusOwner::Bitplane(3));
        assert_eq!(bus.agnus.bus_owner[0x3F], BusOwner::Bitplane(1));
    });
}

//
// Sprites
//

#[test]
fn sprite_dma_feeds_denise_and_composites_over_background() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        let poke = PokeSource::Cpu;

        // Sprite 0 list at $18000: one 2-line sprite at (h=$40, v=$50).
        // pos/ctl then two lines of data/datb, then termination words.
        bus.mem.write_chip16(0x1_8000, 0x5080); // VSTART $50, HSTART $80>>1=$40
        bus.mem.write_chip16(0x1_8002, 0x5200); // VSTOP $52
        bus.mem.write_chip16(0x1_8004, 0xFFFF); // line 1 data
        bus.mem.write_chip16(0x1_8006, 0x0000);
        bus.mem.write_chip16(0x1_8008, 0xFFFF); // line 2 data
        bus.mem.write_chip16(0x1_800A, 0x0000);
        bus.mem.write_chip16(0x1_800C, 0x0000); // end of sprite
        bus.mem.write_chip16(0x1_800E, 0x0000);

        bus.poke_custom16(0x120, 0x0001, poke); // SPR0PTH
        bus.poke_custom16(0x122, 0x8000, poke); // SPR0PTL
        bus.poke_custom16(0x1A2, 0x0F0F, poke); // sprite 0 colour 1
        bus.poke_custom16(0x08E, 0x2C81, poke);
        bus.poke_custom16(0x090, 0x2CC1, poke);
        bus.poke_custom16(0x096, DMACON_SET | DMAEN | SPREN, poke);

        bus.execute_until(bus.agnus.clock + frame_cycles() + dma_cycles(1000));
    });

    let frame = amiga.get_stable_long_frame();
    // Palette slot 17, 0x0F0F, through the identity colour table.
    let sprite_color = 0xFF00_FFFF;
    let row = &frame.pixels[0x51 * HPIXELS..0x52 * HPIXELS];
    let strt = 2 + 2 * 0x100; // hstart $100 in lores pixels
    let hits = row[strt..strt + 40]
        .iter()
        .filter(|&&p| p == sprite_color)
        .count();
    assert!(hits > 8, "sprite pixels visible on its line (got {hits})");

    let above = &frame.pixels[0x4E * HPIXELS..0x4F * HPIXELS];
    assert!(
        above.iter().all(|&p| p != sprite_color),
        "no sprite pixels above VSTART"
    );
}

//
// Interrupts and the vertical blank
//

#[test]
fn vertical_blank_raises_vertb_every_frame() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        bus.execute_until(bus.agnus.clock + dma_cycles(100));
        assert_ne!(bus.paula.intreq & INT_VERTB, 0, "power-on frame VBL");

        bus.poke_custom16(0x09C, INT_VERTB, PokeSource::Cpu);
        assert_eq!(bus.paula.intreq & INT_VERTB, 0);

        bus.execute_until(bus.agnus.clock + frame_cycles());
        assert_ne!(bus.paula.intreq & INT_VERTB, 0, "next frame VBL");
    });
}

#[test]
fn enabled_interrupt_posts_cpu_level() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        bus.poke_custom16(0x09A, 0x8000 | 0x4000 | INT_VERTB, PokeSource::Cpu);
        bus.execute_until(bus.agnus.clock + frame_cycles());
        assert_eq!(bus.ipl, 3, "VERTB posts level 3");
    });
}

//
// Denise timing seam
//

#[test]
fn cpu_and_copper_colour_pokes_differ_by_one_slot() {
    let amiga = powered_machine();
    amiga.with_core(|core| {
        let bus = &mut core.bus;
        bus.execute_until(bus.agnus.cycle_of(40, 0x80));
        let h = i64::from(bus.agnus.pos.h);

        bus.poke_custom16(0x180, 0x0111, PokeSource::Cpu);
        bus.poke_custom16(0x180, 0x0222, PokeSource::Copper);

        let changes: Vec<_> = bus
            .denise
            .pixel_engine
            .col_changes
            .iter()
            .map(|c| (c.trigger, c.value))
            .collect();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0], (4 * (h - 1), 0x0111));
        assert_eq!(changes[1], (4 * h, 0x0222));
    });
}
