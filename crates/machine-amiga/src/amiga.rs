//! The host-facing emulator: run/pause/off state machine, the worker
//! thread, wall-clock pacing and the snapshot store.
//!
//! Two threads touch the machine. The worker owns the chip container for
//! the whole time it runs (it holds the core lock); the host mutates the
//! core only while the emulator is paused, which the suspend/resume
//! protocol guarantees. Cross-thread signalling goes through atomic
//! control flags, the message queue and the copied info structs.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use commodore_denise_ocs::pixel_engine::ScreenBuffer;

use crate::bus::AmigaBus;
use crate::config::{
    AmigaConfig, AmigaModel, ConfigOption, DriveOption, DriveType, FilterActivation, FilterType,
};
use crate::control_port::{JoystickState, PortDevice};
use crate::cpu::{Cpu, M68kCore, ScriptedCore};
use crate::drive::DiskStream;
use crate::error::AmigaError;
use crate::messages::{Message, MessageQueue};
use crate::snapshot::{self, Snapshot};
use crate::{Cycle, PAL_CLOCK_FREQUENCY};

// Run-loop control flags.
pub const RL_ENABLE_TRACING: u32 = 1 << 0;
pub const RL_ENABLE_BREAKPOINTS: u32 = 1 << 1;
pub const RL_SNAPSHOT: u32 = 1 << 2;
pub const RL_INSPECT: u32 = 1 << 3;
pub const RL_STOP: u32 = 1 << 4;

pub const MAX_SNAPSHOTS: usize = 32;

/// Emulator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    Off,
    Paused,
    Running,
}

/// What the INS slot samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum InspectionTarget {
    None = 0,
    Amiga = 1,
    Paula = 2,
    Denise = 3,
    Ports = 4,
}

impl InspectionTarget {
    #[must_use]
    pub fn from_value(value: i64) -> Self {
        match value {
            1 => Self::Amiga,
            2 => Self::Paula,
            3 => Self::Denise,
            4 => Self::Ports,
            _ => Self::None,
        }
    }
}

//
// Info structs copied out for the debugger
//

#[derive(Debug, Clone, Copy, Default)]
pub struct AmigaInfo {
    pub cpu_clock: Cycle,
    pub dma_clock: Cycle,
    pub cia_a_clock: Cycle,
    pub cia_b_clock: Cycle,
    pub frame: i64,
    pub vpos: i16,
    pub hpos: i16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuInfo {
    pub pc: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PaulaInfo {
    pub intreq: u16,
    pub intena: u16,
    pub adkcon: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeniseInfo {
    pub bplcon0: u16,
    pub bplcon1: u16,
    pub bplcon2: u16,
    pub bpu: u8,
    pub diwstrt: u16,
    pub diwstop: u16,
    pub color: [u16; 32],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControlPortInfo {
    pub joydat: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InfoShelf {
    pub amiga: AmigaInfo,
    pub cpu: CpuInfo,
    pub paula: PaulaInfo,
    pub denise: DeniseInfo,
    pub port1: ControlPortInfo,
    pub port2: ControlPortInfo,
}

/// Host input events, drained by the worker at frame boundaries.
#[derive(Debug, Clone, Copy)]
pub enum InputEvent {
    Key { keycode: u8, released: bool },
    MouseDelta { dx: i32, dy: i32 },
    MouseButtons { left: bool, right: bool },
    Joystick { port: u8, state: JoystickState },
}

/// State shared between the host and the worker.
pub struct Shared {
    pub ctrl: AtomicU32,
    pub warp: AtomicBool,
    pub info: Mutex<InfoShelf>,
    pub input: Mutex<Vec<InputEvent>>,
    pub snapshots: Mutex<Vec<Snapshot>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            ctrl: AtomicU32::new(0),
            warp: AtomicBool::new(false),
            info: Mutex::new(InfoShelf::default()),
            input: Mutex::new(Vec::new()),
            snapshots: Mutex::new(Vec::new()),
        }
    }
}

/// The chip container plus the CPU socket, as moved between threads.
pub struct AmigaCore {
    pub cpu: Cpu,
    pub bus: AmigaBus,
}

/// A complete virtual Amiga. Creating one object is enough to run the
/// emulator; the public API controls the lifecycle and the configuration,
/// the message queue reports what happened.
pub struct Amiga {
    core: Arc<Mutex<AmigaCore>>,
    shared: Arc<Shared>,
    queue: MessageQueue,
    worker: Option<JoinHandle<()>>,
    state: EmulatorState,
    suspend_counter: u32,
    config: AmigaConfig,

    // Frame buffer and audio handles, stable across resets.
    stable_long: Arc<Mutex<ScreenBuffer>>,
    stable_short: Arc<Mutex<ScreenBuffer>>,
    audio_handle: Arc<Mutex<Vec<f32>>>,
}

impl Amiga {
    #[must_use]
    pub fn new() -> Self {
        Self::with_boxed_core(Box::new(ScriptedCore::idle()))
    }

    /// Build the machine around an external 68000 core.
    #[must_use]
    pub fn with_boxed_core(core: Box<dyn M68kCore>) -> Self {
        let queue = MessageQueue::new();
        let shared = Arc::new(Shared::new());
        let mut bus = AmigaBus::new(queue.clone(), Arc::clone(&shared));
        let config = AmigaConfig::default();
        bus.mem.alloc_chip(config.chip_kb as usize * 1024);

        let stable_long = bus.denise.pixel_engine.stable_long_frame();
        let stable_short = bus.denise.pixel_engine.stable_short_frame();
        let audio_handle = Arc::clone(&bus.audio_buffer);

        Self {
            core: Arc::new(Mutex::new(AmigaCore {
                cpu: Cpu::new(core),
                bus,
            })),
            shared,
            queue,
            worker: None,
            state: EmulatorState::Off,
            suspend_counter: 0,
            config,
            stable_long,
            stable_short,
            audio_handle,
        }
    }

    //
    // Lifecycle
    //

    #[must_use]
    pub fn is_powered_on(&self) -> bool {
        self.state != EmulatorState::Off
    }

    #[must_use]
    pub fn is_powered_off(&self) -> bool {
        self.state == EmulatorState::Off
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state == EmulatorState::Paused
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == EmulatorState::Running
    }

    /// True if `power_on` would succeed: chip RAM and a ROM image must be
    /// installed.
    #[must_use]
    pub fn ready_to_power_up(&self) -> bool {
        if self.is_running() {
            return true;
        }
        let core = self.core.lock();
        core.bus.mem.has_chip_ram() && core.bus.mem.has_rom()
    }

    pub fn power_on(&mut self) -> Result<(), AmigaError> {
        if self.state != EmulatorState::Off {
            return Ok(());
        }
        if !self.ready_to_power_up() {
            self.queue.put(Message::RomMissing);
            return Err(AmigaError::NotReady("chip RAM or ROM missing"));
        }
        {
            let mut core = self.core.lock();
            let AmigaCore { cpu, bus } = &mut *core;
            bus.power_on();
            cpu.reset();
        }
        self.state = EmulatorState::Paused;
        self.queue.put(Message::PowerOn);
        Ok(())
    }

    pub fn power_off(&mut self) {
        match self.state {
            EmulatorState::Off => {}
            EmulatorState::Running => {
                self.stop_worker();
                self.teardown();
            }
            EmulatorState::Paused => self.teardown(),
        }
    }

    fn teardown(&mut self) {
        {
            let mut core = self.core.lock();
            core.bus.agnus.scheduler.reset();
        }
        self.state = EmulatorState::Off;
        self.queue.put(Message::PowerOff);
    }

    pub fn run(&mut self) {
        if self.state != EmulatorState::Paused {
            return;
        }
        self.shared.ctrl.fetch_and(!RL_STOP, Ordering::SeqCst);
        let core = Arc::clone(&self.core);
        let shared = Arc::clone(&self.shared);
        let queue = self.queue.clone();
        self.worker = Some(std::thread::spawn(move || {
            run_loop(&core, &shared, &queue);
        }));
        self.state = EmulatorState::Running;
        self.queue.put(Message::Run);
    }

    pub fn pause(&mut self) {
        if self.state != EmulatorState::Running {
            return;
        }
        self.stop_worker();
        self.state = EmulatorState::Paused;
        self.queue.put(Message::Pause);
    }

    fn stop_worker(&mut self) {
        self.shared.ctrl.fetch_or(RL_STOP, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.ctrl.fetch_and(!RL_STOP, Ordering::SeqCst);
    }

    /// Reset clears registers but keeps the configured ROMs.
    pub fn reset(&mut self) {
        let was_running = self.is_running();
        if was_running {
            self.pause();
        }
        if self.state == EmulatorState::Off {
            return;
        }
        {
            let mut core = self.core.lock();
            let AmigaCore { cpu, bus } = &mut *core;
            bus.reset();
            cpu.reset();
        }
        self.queue.put(Message::Reset);
        if was_running {
            self.run();
        }
    }

    /// Pause the worker for a host-side mutation. Nestable; the matching
    /// `resume` restarts the worker when the counter drains.
    pub fn suspend(&mut self) {
        if self.suspend_counter == 0 && !self.is_running() {
            return;
        }
        self.pause();
        self.suspend_counter += 1;
    }

    pub fn resume(&mut self) {
        if self.suspend_counter == 0 {
            return;
        }
        self.suspend_counter -= 1;
        if self.suspend_counter == 0 {
            self.run();
        }
    }

    #[must_use]
    pub fn suspend_depth(&self) -> u32 {
        self.suspend_counter
    }

    //
    // Warp and debugging
    //

    pub fn set_warp(&mut self, warp: bool) {
        let was = self.shared.warp.swap(warp, Ordering::SeqCst);
        if was != warp {
            self.queue
                .put(if warp { Message::WarpOn } else { Message::WarpOff });
        }
    }

    #[must_use]
    pub fn warp(&self) -> bool {
        self.shared.warp.load(Ordering::SeqCst)
    }

    pub fn set_debug_mode(&mut self, enabled: bool) {
        if enabled {
            self.shared
                .ctrl
                .fetch_or(RL_ENABLE_TRACING | RL_ENABLE_BREAKPOINTS, Ordering::SeqCst);
        } else {
            self.shared.ctrl.fetch_and(
                !(RL_ENABLE_TRACING | RL_ENABLE_BREAKPOINTS),
                Ordering::SeqCst,
            );
        }
    }

    pub fn set_breakpoint(&mut self, addr: u32) {
        self.suspend();
        self.core.lock().cpu.bp.set_at(addr);
        self.shared
            .ctrl
            .fetch_or(RL_ENABLE_BREAKPOINTS, Ordering::SeqCst);
        self.resume();
    }

    pub fn step_into(&mut self) {
        if self.is_running() || self.state == EmulatorState::Off {
            return;
        }
        self.core.lock().cpu.bp.set_soft_at(u32::MAX);
        self.shared
            .ctrl
            .fetch_or(RL_ENABLE_BREAKPOINTS, Ordering::SeqCst);
        self.run();
    }

    pub fn step_over(&mut self) {
        if self.is_running() || self.state == EmulatorState::Off {
            return;
        }
        {
            let mut core = self.core.lock();
            let next = core.cpu.pc().wrapping_add(2);
            core.cpu.bp.set_soft_at(next);
        }
        self.shared
            .ctrl
            .fetch_or(RL_ENABLE_BREAKPOINTS, Ordering::SeqCst);
        self.run();
    }

    pub fn set_inspection_target(&mut self, target: InspectionTarget) {
        self.suspend();
        {
            let mut core = self.core.lock();
            core.bus.ins_target = target;
            let clock = core.bus.agnus.clock;
            core.bus.agnus.scheduler.schedule_abs(
                crate::scheduler::Slot::Ins,
                clock,
                crate::scheduler::EventId::Inspect,
                target as i64,
            );
        }
        self.resume();
    }

    /// Ask the worker for a fresh info sample, then copy it out.
    #[must_use]
    pub fn get_info(&self) -> InfoShelf {
        if self.is_running() {
            self.shared.ctrl.fetch_or(RL_INSPECT, Ordering::SeqCst);
            // The worker clears the flag within one instruction.
            while self.shared.ctrl.load(Ordering::SeqCst) & RL_INSPECT != 0 {
                std::thread::yield_now();
            }
        } else if self.state == EmulatorState::Paused {
            let mut core = self.core.lock();
            record_all_info(&mut core);
        }
        *self.shared.info.lock()
    }

    //
    // Configuration
    //

    #[must_use]
    pub fn config(&self) -> &AmigaConfig {
        &self.config
    }

    /// Apply one configuration option. Invalid values are rejected with
    /// no state change.
    pub fn configure(&mut self, option: ConfigOption, value: i64) -> Result<(), AmigaError> {
        let reject = || AmigaError::ConfigRejected {
            option: option.name(),
            value,
        };

        // Validate first so rejected values leave everything untouched.
        match option {
            ConfigOption::Model => {
                AmigaModel::from_value(value).ok_or_else(reject)?;
            }
            ConfigOption::ChipRam => {
                if value != 256 && value != 512 {
                    warn!("invalid chip RAM size: {value} (valid: 256, 512)");
                    return Err(reject());
                }
            }
            ConfigOption::SlowRam => {
                if value % 256 != 0 || value > 512 || value < 0 {
                    warn!("invalid slow RAM size: {value} (valid: 0, 256, 512)");
                    return Err(reject());
                }
            }
            ConfigOption::FastRam => {
                if value % 64 != 0 || value > 8192 || value < 0 {
                    warn!("invalid fast RAM size: {value} (valid: 0, 64, ..., 8192)");
                    return Err(reject());
                }
            }
            ConfigOption::CpuSpeed => {
                if !matches!(value, 1 | 2 | 4) {
                    warn!("unsupported CPU speed: {value} (valid: 1, 2, 4)");
                    return Err(reject());
                }
            }
            ConfigOption::BlitterAccuracy => {
                if !(0..=2).contains(&value) {
                    return Err(reject());
                }
            }
            ConfigOption::FilterActivation => {
                FilterActivation::from_value(value).ok_or_else(reject)?;
            }
            ConfigOption::FilterType => {
                FilterType::from_value(value).ok_or_else(reject)?;
            }
            ConfigOption::SerialDevice => {
                if !(0..=1).contains(&value) {
                    return Err(reject());
                }
            }
            ConfigOption::DriveSpeed => {
                if !AmigaConfig::is_valid_drive_speed(value) {
                    return Err(reject());
                }
            }
            _ => {}
        }

        self.suspend();
        {
            let mut core = self.core.lock();
            let AmigaCore { cpu, bus } = &mut *core;
            match option {
                ConfigOption::Model => {
                    let model = AmigaModel::from_value(value).unwrap();
                    self.config.model = model;
                    if model == AmigaModel::A2000 {
                        self.config.rt_clock = true;
                        bus.rtc.attached = true;
                        bus.mem.rtc_attached = true;
                    }
                    bus.mem.update_mem_src_table();
                }
                ConfigOption::KbLayout => {
                    self.config.kb_layout = value;
                    bus.keyboard.layout = value;
                }
                ConfigOption::ChipRam => {
                    self.config.chip_kb = value;
                    bus.mem.alloc_chip(value as usize * 1024);
                }
                ConfigOption::SlowRam => {
                    self.config.slow_kb = value;
                    bus.mem.alloc_slow(value as usize * 1024);
                }
                ConfigOption::FastRam => {
                    self.config.fast_kb = value;
                    bus.mem.alloc_fast(value as usize * 1024);
                    bus.zorro.fast_ram_size = value as usize * 1024;
                    bus.zorro.reset();
                }
                ConfigOption::RtClock => {
                    self.config.rt_clock = value != 0;
                    bus.rtc.attached = value != 0;
                    bus.mem.rtc_attached = value != 0;
                    bus.mem.update_mem_src_table();
                }
                ConfigOption::EmulateSprites => {
                    self.config.emulate_sprites = value != 0;
                    bus.denise.config.emulate_sprites = value != 0;
                }
                ConfigOption::ClxSprSpr => {
                    self.config.clx_spr_spr = value != 0;
                    bus.denise.config.clx_spr_spr = value != 0;
                }
                ConfigOption::ClxSprPlf => {
                    self.config.clx_spr_plf = value != 0;
                    bus.denise.config.clx_spr_plf = value != 0;
                }
                ConfigOption::ClxPlfPlf => {
                    self.config.clx_plf_plf = value != 0;
                    bus.denise.config.clx_plf_plf = value != 0;
                }
                ConfigOption::FilterActivation => {
                    self.config.filter_activation = FilterActivation::from_value(value).unwrap();
                }
                ConfigOption::FilterType => {
                    self.config.filter_type = FilterType::from_value(value).unwrap();
                }
                ConfigOption::CpuSpeed => {
                    self.config.cpu_speed = value;
                    cpu.speed = value;
                }
                ConfigOption::BlitterAccuracy => {
                    self.config.blitter_accuracy = value;
                    bus.agnus.blitter.accuracy = value as u8;
                }
                ConfigOption::FifoBuffering => {
                    self.config.fifo_buffering = value != 0;
                    bus.paula.disk.use_fifo = value != 0;
                }
                ConfigOption::SerialDevice => {
                    self.config.serial_device = value;
                    bus.paula.uart.device = if value == 1 {
                        commodore_paula_8364::uart::SerialDevice::Loopback
                    } else {
                        commodore_paula_8364::uart::SerialDevice::None
                    };
                }
                ConfigOption::DriveSpeed => {
                    self.config.drive_speed = value;
                    for drive in &mut bus.df {
                        drive.speed = value;
                    }
                }
            }
        }
        self.resume();
        self.queue.put(Message::Config);
        Ok(())
    }

    pub fn configure_drive(
        &mut self,
        drive: usize,
        option: DriveOption,
        value: i64,
    ) -> Result<(), AmigaError> {
        if drive >= 4 {
            return Err(AmigaError::ConfigRejected {
                option: "DRIVE",
                value: drive as i64,
            });
        }
        match option {
            DriveOption::Connect => {
                if drive == 0 && value == 0 {
                    warn!("df0 cannot be disconnected");
                    return Err(AmigaError::UnsupportedFeature("df0 is always connected"));
                }
                self.suspend();
                self.config.drive_connected[drive] = value != 0;
                self.core.lock().bus.df[drive].connected = value != 0;
                self.resume();
            }
            DriveOption::Type => {
                if value != 0 {
                    return Err(AmigaError::UnsupportedFeature("only 3.5\" DD drives"));
                }
                self.config.drive_type[drive] = DriveType::Dd35;
            }
        }
        self.queue.put(Message::Config);
        Ok(())
    }

    //
    // ROMs and disks
    //

    pub fn load_rom(&mut self, image: &[u8]) {
        self.suspend();
        self.core.lock().bus.mem.load_rom(image);
        self.resume();
        self.queue.put(Message::MemLayout);
    }

    pub fn load_ext_rom(&mut self, image: &[u8]) {
        self.suspend();
        self.core.lock().bus.mem.load_ext(image);
        self.resume();
        self.queue.put(Message::MemLayout);
    }

    pub fn insert_disk(&mut self, drive: usize, disk: DiskStream) {
        self.suspend();
        self.core.lock().bus.df[drive.min(3)].insert_disk(disk);
        self.resume();
        self.queue.put(Message::DiskInserted {
            drive: drive.min(3) as u8,
        });
    }

    pub fn eject_disk(&mut self, drive: usize) {
        self.suspend();
        self.core.lock().bus.df[drive.min(3)].eject_disk();
        self.resume();
        self.queue.put(Message::DiskEjected {
            drive: drive.min(3) as u8,
        });
    }

    //
    // Input injection
    //

    pub fn key_down(&self, keycode: u8) {
        self.shared.input.lock().push(InputEvent::Key {
            keycode,
            released: false,
        });
    }

    pub fn key_up(&self, keycode: u8) {
        self.shared.input.lock().push(InputEvent::Key {
            keycode,
            released: true,
        });
    }

    pub fn mouse_moved(&self, dx: i32, dy: i32) {
        self.shared
            .input
            .lock()
            .push(InputEvent::MouseDelta { dx, dy });
    }

    pub fn mouse_buttons(&self, left: bool, right: bool) {
        self.shared
            .input
            .lock()
            .push(InputEvent::MouseButtons { left, right });
    }

    pub fn set_joystick(&self, port: u8, state: JoystickState) {
        self.shared
            .input
            .lock()
            .push(InputEvent::Joystick { port, state });
    }

    pub fn connect_device(&mut self, port: u8, device: PortDevice) {
        self.suspend();
        {
            let mut core = self.core.lock();
            if port == 1 {
                core.bus.port1.connect(device);
            } else {
                core.bus.port2.connect(device);
            }
        }
        self.resume();
    }

    //
    // Frames, messages, audio
    //

    /// Copy of the most recent completed long-frame field.
    #[must_use]
    pub fn get_stable_long_frame(&self) -> ScreenBuffer {
        self.stable_long.lock().clone()
    }

    /// Copy of the most recent completed short-frame field (interlace).
    #[must_use]
    pub fn get_stable_short_frame(&self) -> ScreenBuffer {
        self.stable_short.lock().clone()
    }

    /// Next pending message, or [`Message::None`].
    #[must_use]
    pub fn get_message(&self) -> Message {
        self.queue.get()
    }

    /// Handle to the resampled audio stream; the host audio callback
    /// drains it concurrently with the worker.
    #[must_use]
    pub fn audio_buffer(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.audio_handle)
    }

    //
    // Snapshots
    //

    pub fn take_snapshot(&mut self) {
        self.suspend();
        {
            let core = self.core.lock();
            let snapshot = snapshot::save_core(&core.bus, &core.cpu);
            let mut storage = self.shared.snapshots.lock();
            if storage.len() >= MAX_SNAPSHOTS {
                storage.remove(0);
            }
            storage.push(snapshot);
        }
        self.resume();
        self.queue.put(Message::SnapshotTaken);
    }

    pub fn restore_snapshot(&mut self, index: usize) -> Result<(), AmigaError> {
        self.suspend();
        let result = {
            let data = {
                let storage = self.shared.snapshots.lock();
                storage
                    .get(index)
                    .map(|s| s.data.clone())
                    .ok_or(AmigaError::NoSuchSnapshot(index))
            };
            data.and_then(|data| {
                let mut core = self.core.lock();
                let AmigaCore { cpu, bus } = &mut *core;
                snapshot::load_core(bus, cpu, &data)
            })
        };
        self.resume();
        result
    }

    #[must_use]
    pub fn num_snapshots(&self) -> usize {
        self.shared.snapshots.lock().len()
    }

    pub fn delete_snapshot(&mut self, index: usize) {
        let mut storage = self.shared.snapshots.lock();
        if index < storage.len() {
            storage.remove(index);
        }
    }

    /// Exclusive access to the core for tests and debugger front-ends.
    /// Panics if called while the worker is running.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut AmigaCore) -> R) -> R {
        assert!(!self.is_running(), "core access requires a paused emulator");
        f(&mut self.core.lock())
    }
}

impl Default for Amiga {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Amiga {
    fn drop(&mut self) {
        self.power_off();
    }
}

fn record_all_info(core: &mut AmigaCore) {
    let pc = core.cpu.pc();
    for target in [
        InspectionTarget::Amiga,
        InspectionTarget::Paula,
        InspectionTarget::Denise,
        InspectionTarget::Ports,
    ] {
        core.bus.record_info(target);
    }
    core.bus.shared.info.lock().cpu.pc = pc;
}

//
// The worker
//

fn run_loop(core: &Arc<Mutex<AmigaCore>>, shared: &Arc<Shared>, queue: &MessageQueue) {
    let mut core = core.lock();
    let AmigaCore { cpu, bus } = &mut *core;

    let mut pacer = Pacer::new(bus.agnus.clock);
    let mut frames_seen = bus.frames_completed;

    debug!("run loop entered at PC {:06X}", cpu.pc());

    loop {
        // Emulate the next CPU instruction, then Agnus up to its clock.
        bus.cpu_clock = cpu.clock;
        bus.wait_states = 0;
        cpu.execute_instruction(bus);
        cpu.add_wait_states(bus.wait_states);
        bus.execute_until(cpu.clock);
        cpu.set_irq_level(bus.ipl);

        // Frame boundary: inputs, warp, pacing.
        if bus.frames_completed != frames_seen {
            frames_seen = bus.frames_completed;
            drain_input(bus, shared);
            bus.warp = shared.warp.load(Ordering::Relaxed);
            if bus.warp {
                pacer.restart(bus.agnus.clock);
            } else {
                pacer.synchronize(bus.agnus.clock);
            }
        }

        let ctrl = shared.ctrl.load(Ordering::SeqCst);
        if ctrl != 0 {
            if ctrl & RL_SNAPSHOT != 0 {
                let snapshot = snapshot::save_core(bus, cpu);
                let mut storage = shared.snapshots.lock();
                if storage.len() >= MAX_SNAPSHOTS {
                    storage.remove(0);
                }
                storage.push(snapshot);
                drop(storage);
                queue.put(Message::SnapshotTaken);
                shared.ctrl.fetch_and(!RL_SNAPSHOT, Ordering::SeqCst);
            }
            if ctrl & RL_INSPECT != 0 {
                let pc = cpu.pc();
                for target in [
                    InspectionTarget::Amiga,
                    InspectionTarget::Paula,
                    InspectionTarget::Denise,
                    InspectionTarget::Ports,
                ] {
                    bus.record_info(target);
                }
                shared.info.lock().cpu.pc = pc;
                shared.ctrl.fetch_and(!RL_INSPECT, Ordering::SeqCst);
            }
            if ctrl & RL_ENABLE_TRACING != 0 {
                let pc = cpu.pc();
                cpu.trace.record(pc);
            }
            if ctrl & RL_ENABLE_BREAKPOINTS != 0 {
                let pc = cpu.pc();
                if cpu.bp.should_stop(pc) {
                    queue.put(Message::BreakpointReached);
                    break;
                }
            }
            if ctrl & RL_STOP != 0 {
                break;
            }
        }
    }
}

fn drain_input(bus: &mut AmigaBus, shared: &Arc<Shared>) {
    let events: Vec<InputEvent> = std::mem::take(&mut *shared.input.lock());
    for event in events {
        match event {
            InputEvent::Key { keycode, released } => bus.keyboard.push_key(keycode, released),
            InputEvent::MouseDelta { dx, dy } => bus.port1.mouse_moved(dx, dy),
            InputEvent::MouseButtons { left, right } => {
                bus.port1.mouse_left = left;
                bus.port1.mouse_right = right;
            }
            InputEvent::Joystick { port, state } => {
                if port == 1 {
                    bus.port1.joystick = state;
                } else {
                    bus.port2.joystick = state;
                }
            }
        }
    }
}

/// Wall-clock pacing against the master clock.
struct Pacer {
    time_base: Instant,
    clock_base: Cycle,
}

impl Pacer {
    fn new(clock: Cycle) -> Self {
        Self {
            time_base: Instant::now(),
            clock_base: clock,
        }
    }

    fn restart(&mut self, clock: Cycle) {
        self.time_base = Instant::now();
        self.clock_base = clock;
    }

    /// Sleep until the wall clock catches up with the emulated clock.
    /// More than 200 ms of drift in either direction restarts the timer.
    fn synchronize(&mut self, clock: Cycle) {
        let elapsed_ns = (clock - self.clock_base) * 1_000_000_000 / PAL_CLOCK_FREQUENCY;
        let target = self.time_base + Duration::from_nanos(elapsed_ns.max(0) as u64);
        let now = Instant::now();
        let limit = Duration::from_millis(200);

        if now > target {
            if now - target > limit {
                // The host is too slow to keep up; resynchronize.
                self.restart(clock);
            }
            return;
        }
        if target - now > limit {
            warn!("emulator is running ahead of the wall clock");
            self.restart(clock);
            return;
        }
        std::thread::sleep(target - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered() -> Amiga {
        let mut amiga = Amiga::new();
        amiga.load_rom(&vec![0x4E; 256 * 1024]);
        amiga.power_on().expect("power on");
        amiga
    }

    #[test]
    fn power_on_requires_a_rom() {
        let mut amiga = Amiga::new();
        assert!(amiga.power_on().is_err());
        assert_eq!(amiga.get_message(), Message::RomMissing);
        assert!(amiga.is_powered_off());
    }

    #[test]
    fn lifecycle_transitions() {
        let mut amiga = powered();
        assert!(amiga.is_paused());
        amiga.run();
        assert!(amiga.is_running());
        amiga.pause();
        assert!(amiga.is_paused());
        amiga.power_off();
        assert!(amiga.is_powered_off());
    }

    #[test]
    fn suspend_resume_counter_balances() {
        let mut amiga = powered();
        amiga.run();
        amiga.suspend();
        amiga.suspend();
        assert!(amiga.is_paused());
        amiga.resume();
        assert!(amiga.is_paused(), "still one suspension deep");
        amiga.resume();
        assert!(amiga.is_running());
        amiga.pause();
    }

    #[test]
    fn suspend_on_paused_machine_is_a_no_op() {
        let mut amiga = powered();
        amiga.suspend();
        amiga.resume();
        assert!(amiga.is_paused());
    }

    #[test]
    fn configure_rejects_out_of_range_values() {
        let mut amiga = Amiga::new();
        assert!(amiga.configure(ConfigOption::ChipRam, 384).is_err());
        assert!(amiga.configure(ConfigOption::CpuSpeed, 3).is_err());
        assert!(amiga.configure(ConfigOption::FastRam, 100).is_err());
        assert!(amiga.configure(ConfigOption::ChipRam, 512).is_ok());
    }

    #[test]
    fn df0_cannot_be_disconnected() {
        let mut amiga = Amiga::new();
        assert!(amiga
            .configure_drive(0, DriveOption::Connect, 0)
            .is_err());
        assert!(amiga
            .configure_drive(1, DriveOption::Connect, 1)
            .is_ok());
    }

    #[test]
    fn worker_stops_within_reasonable_time() {
        let mut amiga = powered();
        amiga.run();
        std::thread::sleep(Duration::from_millis(20));
        amiga.pause();
        let info = amiga.get_info();
        assert!(info.amiga.dma_clock > 0, "machine made progress");
    }

    #[test]
    fn snapshots_are_bounded() {
        let mut amiga = powered();
        for _ in 0..(MAX_SNAPSHOTS + 4) {
            amiga.take_snapshot();
        }
        assert_eq!(amiga.num_snapshots(), MAX_SNAPSHOTS);
        amiga.delete_snapshot(0);
        assert_eq!(amiga.num_snapshots(), MAX_SNAPSHOTS - 1);
    }
}
