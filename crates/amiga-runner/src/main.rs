//! Windowed and headless front-end for the Amiga machine core.
//!
//! Loads a Kickstart image (or builds a self-contained Copper demo scene
//! with `--demo`), powers the machine on and displays the stable frame
//! buffer. The emulation itself runs on the machine's own worker thread;
//! this process only feeds input in and pulls frames and audio out.

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::info;
use machine_amiga::bus::PokeSource;
use machine_amiga::commodore_denise_ocs::{HPIXELS, VPIXELS};
use machine_amiga::{Amiga, Message};
use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

// Visible crop of the emulator texture: the classic 640 x 256 PAL window.
const CROP_X: usize = 258;
const CROP_Y: usize = 44;
const FB_WIDTH: u32 = 640;
const FB_HEIGHT: u32 = 256;
const SCALE: u32 = 2;
const FRAME_DURATION: Duration = Duration::from_millis(20);

struct CliArgs {
    rom_path: Option<PathBuf>,
    demo: bool,
    headless: bool,
    frames: u32,
    warp: bool,
    mute: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        rom_path: None,
        demo: false,
        headless: false,
        frames: 250,
        warp: false,
        mute: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rom" | "--kickstart" => {
                i += 1;
                cli.rom_path = args.get(i).map(PathBuf::from);
            }
            "--demo" => cli.demo = true,
            "--headless" => cli.headless = true,
            "--frames" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.frames = s.parse().unwrap_or(250);
                }
            }
            "--warp" => cli.warp = true,
            "--mute" => cli.mute = true,
            "--help" | "-h" => {
                eprintln!("Usage: amiga-runner [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --rom <file>     Kickstart ROM image");
                eprintln!("  --demo           Run the built-in Copper demo scene");
                eprintln!("  --headless       Run without a window");
                eprintln!("  --frames <n>     Frames to run in headless mode [default: 250]");
                eprintln!("  --warp           Start with warp mode on");
                eprintln!("  --mute           Disable audio output");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }
    cli
}

fn make_amiga(cli: &CliArgs) -> Amiga {
    let mut amiga = Amiga::new();

    if let Some(path) = &cli.rom_path {
        let image = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Failed to read ROM {}: {e}", path.display());
                process::exit(1);
            }
        };
        amiga.load_rom(&image);
        info!("installed ROM from {}", path.display());
    } else if cli.demo {
        // A blank image satisfies the power-up check; the scene below
        // does not execute any 68000 code.
        amiga.load_rom(&vec![0u8; 256 * 1024]);
    } else {
        eprintln!("No ROM specified. Use --rom <file> or --demo.");
        process::exit(1);
    }

    if let Err(e) = amiga.power_on() {
        eprintln!("Power-on failed: {e}");
        process::exit(1);
    }

    if cli.demo {
        install_demo_scene(&mut amiga);
    }
    amiga.set_warp(cli.warp);
    amiga.run();
    amiga
}

/// A machine-language-free demo: a Copper list repaints the background
/// every few rasterlines and a two-plane checkerboard sits in the window.
fn install_demo_scene(amiga: &mut Amiga) {
    amiga.with_core(|core| {
        let bus = &mut core.bus;

        // Checkerboard bitplane data at $10000 / $14000.
        for line in 0..256u32 {
            for word in 0..20u32 {
                let pattern0 = if (line / 16) % 2 == 0 { 0xF0F0 } else { 0x0F0F };
                let pattern1 = if (line / 32) % 2 == 0 { 0xFF00 } else { 0x00FF };
                bus.mem.write_chip16(0x1_0000 + line * 40 + word * 2, pattern0);
                bus.mem.write_chip16(0x1_4000 + line * 40 + word * 2, pattern1);
            }
        }

        // Copper list at $20000: a palette gradient down the screen.
        let mut addr = 0x2_0000u32;
        let emit = |a: &mut u32, ir1: u16, ir2: u16, bus: &mut machine_amiga::AmigaBus| {
            bus.mem.write_chip16(*a, ir1);
            bus.mem.write_chip16(*a + 2, ir2);
            *a += 4;
        };
        for step in 0..24u16 {
            let line = 0x2C + step * 8;
            emit(&mut addr, (line << 8) | 0x01, 0xFFFE, bus); // WAIT line
            let color = (step % 16) | ((15 - step % 16) << 8);
            emit(&mut addr, 0x0180, color, bus); // COLOR00
        }
        emit(&mut addr, 0xFFFF, 0xFFFE, bus); // end of list

        // Registers: display window, fetch, palette, pointers, DMA on.
        bus.poke_custom16(0x08E, 0x2C81, PokeSource::Cpu); // DIWSTRT
        bus.poke_custom16(0x090, 0x2CC1, PokeSource::Cpu); // DIWSTOP
        bus.poke_custom16(0x092, 0x0038, PokeSource::Cpu); // DDFSTRT
        bus.poke_custom16(0x094, 0x00D0, PokeSource::Cpu); // DDFSTOP
        bus.poke_custom16(0x0E0, 0x0001, PokeSource::Cpu); // BPL1PTH
        bus.poke_custom16(0x0E2, 0x0000, PokeSource::Cpu); // BPL1PTL
        bus.poke_custom16(0x0E4, 0x0001, PokeSource::Cpu); // BPL2PTH
        bus.poke_custom16(0x0E6, 0x4000, PokeSource::Cpu); // BPL2PTL
        bus.poke_custom16(0x100, 2 << 12, PokeSource::Cpu); // BPLCON0: 2 planes
        bus.poke_custom16(0x104, 0x0024, PokeSource::Cpu); // BPLCON2
        bus.poke_custom16(0x180, 0x0348, PokeSource::Cpu); // COLOR00
        bus.poke_custom16(0x182, 0x0FFF, PokeSource::Cpu); // COLOR01
        bus.poke_custom16(0x184, 0x0F60, PokeSource::Cpu); // COLOR02
        bus.poke_custom16(0x186, 0x006F, PokeSource::Cpu); // COLOR03
        bus.poke_custom16(0x080, 0x0002, PokeSource::Cpu); // COP1LCH
        bus.poke_custom16(0x082, 0x0000, PokeSource::Cpu); // COP1LCL
        bus.poke_custom16(0x096, 0x83C0, PokeSource::Cpu); // DMACON: master+bpl+cop+blt
    });
}

//
// Headless mode
//

fn run_headless(cli: &CliArgs) {
    let amiga = make_amiga(cli);
    let start = Instant::now();
    let target_frames = i64::from(cli.frames);

    loop {
        std::thread::sleep(Duration::from_millis(5));
        let info = amiga.get_info();
        if info.amiga.frame >= target_frames {
            break;
        }
        if start.elapsed() > Duration::from_secs(120) {
            eprintln!("Timeout waiting for frame {target_frames}");
            break;
        }
    }

    let elapsed = start.elapsed();
    let info = amiga.get_info();
    let frame = amiga.get_stable_long_frame();
    let checksum: u32 = frame
        .pixels
        .iter()
        .fold(0u32, |acc, &p| acc.wrapping_mul(31).wrapping_add(p));
    println!(
        "ran {} frames in {:.2}s ({:.1} fps), frame checksum {checksum:08X}",
        info.amiga.frame,
        elapsed.as_secs_f64(),
        info.amiga.frame as f64 / elapsed.as_secs_f64(),
    );
}

//
// Windowed mode
//

struct App {
    amiga: Amiga,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    last_frame_time: Instant,
    _audio_stream: Option<cpal::Stream>,
}

impl App {
    fn new(amiga: Amiga, mute: bool) -> Self {
        let audio_stream = if mute { None } else { start_audio(&amiga) };
        Self {
            amiga,
            window: None,
            pixels: None,
            last_frame_time: Instant::now(),
            _audio_stream: audio_stream,
        }
    }

    fn update_pixels(&mut self) {
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };
        let source = self.amiga.get_stable_long_frame();
        let frame = pixels.frame_mut();

        for y in 0..FB_HEIGHT as usize {
            let src_row = (y + CROP_Y).min(VPIXELS - 1) * HPIXELS;
            for x in 0..FB_WIDTH as usize {
                let rgba = source.pixels[src_row + (x + CROP_X).min(HPIXELS - 1)];
                let offset = (y * FB_WIDTH as usize + x) * 4;
                frame[offset..offset + 4].copy_from_slice(&rgba.to_be_bytes());
            }
        }
    }

    fn forward_key(&mut self, keycode: KeyCode, pressed: bool) {
        // A positional sample of the keymap; full HID decoding is the
        // host's business.
        let amiga_code = match keycode {
            KeyCode::Space => 0x40,
            KeyCode::Enter => 0x44,
            KeyCode::Backspace => 0x41,
            KeyCode::Tab => 0x42,
            KeyCode::ArrowUp => 0x4C,
            KeyCode::ArrowDown => 0x4D,
            KeyCode::ArrowRight => 0x4E,
            KeyCode::ArrowLeft => 0x4F,
            _ => return,
        };
        if pressed {
            self.amiga.key_down(amiga_code);
        } else {
            self.amiga.key_up(amiga_code);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_size = winit::dpi::LogicalSize::new(FB_WIDTH * SCALE, FB_HEIGHT * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("amiga-runner")
            .with_inner_size(window_size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FB_WIDTH, FB_HEIGHT, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        eprintln!("Failed to create pixels: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.amiga.power_off();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(keycode) = event.physical_key {
                    let pressed = event.state == ElementState::Pressed;
                    match keycode {
                        KeyCode::Escape if pressed => {
                            self.amiga.power_off();
                            event_loop.exit();
                        }
                        KeyCode::F12 if pressed => {
                            let warp = !self.amiga.warp();
                            self.amiga.set_warp(warp);
                        }
                        _ => self.forward_key(keycode, pressed),
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= FRAME_DURATION {
                    self.update_pixels();
                    self.last_frame_time = now;

                    // Surface pending machine messages in the log.
                    loop {
                        match self.amiga.get_message() {
                            Message::None => break,
                            msg => info!("machine: {msg:?}"),
                        }
                    }
                }
                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(e) = pixels.render() {
                        eprintln!("Render error: {e}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

fn start_audio(amiga: &Amiga) -> Option<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device()?;
    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(machine_amiga::bus::AUDIO_SAMPLE_RATE as u32),
        buffer_size: cpal::BufferSize::Default,
    };
    let buffer = amiga.audio_buffer();
    let stream = device
        .build_output_stream(
            &config,
            move |out: &mut [f32], _| {
                let mut source = buffer.lock();
                let take = out.len().min(source.len());
                for (dst, src) in out.iter_mut().zip(source.drain(..take)) {
                    *dst = src;
                }
                for dst in out.iter_mut().skip(take) {
                    *dst = 0.0;
                }
            },
            |err| eprintln!("audio stream error: {err}"),
            None,
        )
        .ok()?;
    stream.play().ok()?;
    Some(stream)
}

fn main() {
    env_logger::init();
    let cli = parse_args();

    if cli.headless {
        run_headless(&cli);
        return;
    }

    let amiga = make_amiga(&cli);
    let mut app = App::new(amiga, cli.mute);

    let event_loop = match EventLoop::new() {
        Ok(el) => el,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {e}");
        process::exit(1);
    }
}
