//! Wall-clock pacing behavior of the worker thread.

use std::time::{Duration, Instant};

use machine_amiga::Amiga;

fn rom_image() -> Vec<u8> {
    let mut rom = vec![0u8; 256 * 1024];
    rom[0..4].copy_from_slice(&0x0004_0000u32.to_be_bytes());
    rom[4..8].copy_from_slice(&0x00F8_0008u32.to_be_bytes());
    rom
}

fn frames_after(amiga: &Amiga, duration: Duration) -> i64 {
    std::thread::sleep(duration);
    amiga.get_info().amiga.frame
}

#[test]
fn paced_run_tracks_fifty_hertz() {
    let mut amiga = Amiga::new();
    amiga.load_rom(&rom_image());
    amiga.power_on().expect("power on");
    amiga.run();

    let start = Instant::now();
    let frames = frames_after(&amiga, Duration::from_millis(400));
    let elapsed = start.elapsed().as_secs_f64();
    amiga.pause();

    // 50 Hz PAL: allow generous slack for a loaded test host, but a
    // paced emulator must not run far ahead of the wall clock.
    let expected = elapsed * 50.0;
    assert!(
        (frames as f64) <= expected * 1.5 + 5.0,
        "paced run produced {frames} frames in {elapsed:.2}s"
    );
    assert!(frames >= 2, "emulation made visible progress");
}

#[test]
fn warp_ignores_the_wall_clock() {
    let mut amiga = Amiga::new();
    amiga.load_rom(&rom_image());
    amiga.power_on().expect("power on");
    amiga.set_warp(true);
    amiga.run();

    let frames = frames_after(&amiga, Duration::from_millis(400));
    amiga.pause();

    // Warp never sleeps, so progress is bounded by host speed alone; on
    // a slow host this still has to make some headway.
    assert!(frames >= 1, "warp run made progress (got {frames} frames)");
    assert!(!amiga.is_running());
}
