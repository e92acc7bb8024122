//! Machine configuration and the option-by-option setter vocabulary.

/// Emulated Amiga models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmigaModel {
    A500,
    /// 256K chip RAM default, Boot ROM plus WOM.
    A1000,
    /// Like the A500 but with a battery-backed clock on board.
    A2000,
}

impl AmigaModel {
    #[must_use]
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::A500),
            1 => Some(Self::A1000),
            2 => Some(Self::A2000),
            _ => None,
        }
    }
}

/// Options accepted by `Amiga::configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
    Model,
    KbLayout,
    ChipRam,
    SlowRam,
    FastRam,
    RtClock,
    EmulateSprites,
    ClxSprSpr,
    ClxSprPlf,
    ClxPlfPlf,
    FilterActivation,
    FilterType,
    CpuSpeed,
    BlitterAccuracy,
    FifoBuffering,
    SerialDevice,
    DriveSpeed,
}

impl ConfigOption {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Model => "MODEL",
            Self::KbLayout => "KB_LAYOUT",
            Self::ChipRam => "CHIP_RAM",
            Self::SlowRam => "SLOW_RAM",
            Self::FastRam => "FAST_RAM",
            Self::RtClock => "RT_CLOCK",
            Self::EmulateSprites => "EMULATE_SPRITES",
            Self::ClxSprSpr => "CLX_SPR_SPR",
            Self::ClxSprPlf => "CLX_SPR_PLF",
            Self::ClxPlfPlf => "CLX_PLF_PLF",
            Self::FilterActivation => "FILTER_ACTIVATION",
            Self::FilterType => "FILTER_TYPE",
            Self::CpuSpeed => "CPU_SPEED",
            Self::BlitterAccuracy => "BLITTER_ACCURACY",
            Self::FifoBuffering => "FIFO_BUFFERING",
            Self::SerialDevice => "SERIAL_DEVICE",
            Self::DriveSpeed => "DRIVE_SPEED",
        }
    }
}

/// Per-drive options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOption {
    /// DF0 cannot be disconnected.
    Connect,
    /// Only 3.5" DD drives are supported.
    Type,
}

/// Audio filter activation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterActivation {
    #[default]
    PowerLed,
    AlwaysOn,
    AlwaysOff,
}

impl FilterActivation {
    #[must_use]
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::PowerLed),
            1 => Some(Self::AlwaysOn),
            2 => Some(Self::AlwaysOff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    Butterworth,
    None,
}

impl FilterType {
    #[must_use]
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Butterworth),
            1 => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveType {
    #[default]
    Dd35,
}

/// The resolved machine configuration.
#[derive(Debug, Clone)]
pub struct AmigaConfig {
    pub model: AmigaModel,
    pub kb_layout: i64,
    pub chip_kb: i64,
    pub slow_kb: i64,
    pub fast_kb: i64,
    pub rt_clock: bool,
    pub emulate_sprites: bool,
    pub clx_spr_spr: bool,
    pub clx_spr_plf: bool,
    pub clx_plf_plf: bool,
    pub filter_activation: FilterActivation,
    pub filter_type: FilterType,
    pub cpu_speed: i64,
    pub blitter_accuracy: i64,
    pub fifo_buffering: bool,
    pub serial_device: i64,
    pub drive_speed: i64,
    pub drive_connected: [bool; 4],
    pub drive_type: [DriveType; 4],
}

impl Default for AmigaConfig {
    fn default() -> Self {
        Self {
            model: AmigaModel::A500,
            kb_layout: 0,
            chip_kb: 512,
            slow_kb: 0,
            fast_kb: 0,
            rt_clock: false,
            emulate_sprites: true,
            clx_spr_spr: true,
            clx_spr_plf: true,
            clx_plf_plf: true,
            filter_activation: FilterActivation::PowerLed,
            filter_type: FilterType::Butterworth,
            cpu_speed: 1,
            blitter_accuracy: 2,
            fifo_buffering: true,
            serial_device: 0,
            drive_speed: 1,
            drive_connected: [true, false, false, false],
            drive_type: [DriveType::Dd35; 4],
        }
    }
}

impl AmigaConfig {
    /// Valid drive speed factors.
    #[must_use]
    pub fn is_valid_drive_speed(value: i64) -> bool {
        matches!(value, 1 | 2 | 4 | 8)
    }
}
