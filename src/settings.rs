//! User-editable settings and their persisted image.
//!
//! Loaded once at boot; written back only when the calibration gesture
//! completes.

use core::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::config::{FP_STICK_X4_HIGH, FP_STICK_X4_LOW};
use crate::fixed_point::{Fp, ZERO};
use crate::state::{Axes, PilotInput, RcChannel};

// ── Gains ─────────────────────────────────────────────────────────────────────

/// Raw fixed-point PID gains per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidGains {
    pub p: Axes,
    pub i: Axes,
    pub d: Axes,
}

impl PidGains {
    pub fn from_raw(p: [i32; 3], i: [i32; 3], d: [i32; 3]) -> Self {
        Self {
            p: p.map(Fp::from_bits),
            i: i.map(Fp::from_bits),
            d: d.map(Fp::from_bits),
        }
    }
}

impl Default for PidGains {
    fn default() -> Self {
        // 1.5 / .008 / 8 on the configurator, yaw P doubled.
        Self::from_raw([15 << 3, 15 << 3, 30 << 3], [8, 8, 8], [8 << 2, 8 << 2, 8 << 2])
    }
}

// ── Checkbox items ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CheckboxItem {
    HighAngle = 0,
    SemiAcro = 1,
    FullAcro = 2,
    HighRates = 3,
}

pub const CHECKBOX_ITEM_COUNT: usize = 4;

impl CheckboxItem {
    pub const fn mask(self) -> u16 {
        1 << (self as u16)
    }
}

/// Aux switch position bits, three per aux channel.
pub const AUX1_LOW: u16 = 1 << 0;
pub const AUX1_MID: u16 = 1 << 1;
pub const AUX1_HIGH: u16 = 1 << 2;

const AUX_CHANNELS: [RcChannel; 4] = [
    RcChannel::Aux1,
    RcChannel::Aux2,
    RcChannel::Aux3,
    RcChannel::Aux4,
];

/// Position bits of all aux switches in the layout of [`AUX1_LOW`]..
pub fn aux_position_bits(pilot: &PilotInput) -> u16 {
    AUX_CHANNELS
        .iter()
        .enumerate()
        .fold(0, |bits, (n, &ch)| {
            let value = pilot.get(ch);
            let position = if value < FP_STICK_X4_LOW {
                0
            } else if value > FP_STICK_X4_HIGH {
                2
            } else {
                1
            };
            bits | 1 << (n * 3 + position)
        })
}

// ── User settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSettings {
    pub pid: PidGains,
    /// Degrees per second at full stick in the acro modes.
    pub max_yaw_rate: Fp,
    pub max_pitch_and_roll_rate: Fp,
    pub gyro_calibration: Axes,
    pub acc_calibration: Axes,
    pub checkbox_configuration: [u16; CHECKBOX_ITEM_COUNT],
}

impl Default for UserSettings {
    fn default() -> Self {
        let mut checkbox_configuration = [0; CHECKBOX_ITEM_COUNT];
        checkbox_configuration[CheckboxItem::HighAngle as usize] = AUX1_LOW;
        checkbox_configuration[CheckboxItem::SemiAcro as usize] = AUX1_HIGH;
        checkbox_configuration[CheckboxItem::HighRates as usize] = AUX1_HIGH;

        Self {
            pid: PidGains::default(),
            max_yaw_rate: Fp::lit("400"),
            max_pitch_and_roll_rate: Fp::lit("400"),
            gyro_calibration: [ZERO; 3],
            acc_calibration: [ZERO; 3],
            checkbox_configuration,
        }
    }
}

impl UserSettings {
    /// Checkbox items switched on by the current aux positions.
    pub fn active_items(&self, pilot: &PilotInput) -> u16 {
        let aux = aux_position_bits(pilot);
        self.checkbox_configuration
            .iter()
            .enumerate()
            .filter(|(_, cfg)| **cfg & aux != 0)
            .fold(0, |items, (n, _)| items | 1 << n)
    }
}

// ── Persisted image ───────────────────────────────────────────────────────────

pub const SETTINGS_MAGIC: [u8; 4] = *b"X4FC";
pub const SETTINGS_VERSION: u8 = 1;
/// magic + version + 9 gains + 2 rates + 6 biases + 4 checkbox words + crc32
pub const SETTINGS_IMAGE_LEN: usize = 4 + 1 + (9 + 2 + 6) * 4 + CHECKBOX_ITEM_COUNT * 2 + 4;
const CRC_OFFSET: usize = SETTINGS_IMAGE_LEN - 4;

const SETTINGS_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingsError {
    TooShort,
    BadMagic,
    BadVersion(u8),
    BadChecksum,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::TooShort => write!(f, "settings image too short"),
            SettingsError::BadMagic => write!(f, "no settings image"),
            SettingsError::BadVersion(v) => write!(f, "unsupported settings version {}", v),
            SettingsError::BadChecksum => write!(f, "settings checksum mismatch"),
        }
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, b: &[u8]) {
        self.buf[self.pos..self.pos + b.len()].copy_from_slice(b);
        self.pos += b.len();
    }

    fn fp(&mut self, v: Fp) {
        self.bytes(&v.to_bits().to_le_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn fp(&mut self) -> Fp {
        Fp::from_bits(i32::from_le_bytes(self.take()))
    }

    fn axes(&mut self) -> Axes {
        [self.fp(), self.fp(), self.fp()]
    }
}

impl UserSettings {
    pub fn to_bytes(&self) -> [u8; SETTINGS_IMAGE_LEN] {
        let mut buf = [0u8; SETTINGS_IMAGE_LEN];
        let mut w = Writer { buf: &mut buf, pos: 0 };

        w.bytes(&SETTINGS_MAGIC);
        w.bytes(&[SETTINGS_VERSION]);
        for gains in [&self.pid.p, &self.pid.i, &self.pid.d] {
            gains.iter().for_each(|&g| w.fp(g));
        }
        w.fp(self.max_yaw_rate);
        w.fp(self.max_pitch_and_roll_rate);
        self.gyro_calibration.iter().for_each(|&v| w.fp(v));
        self.acc_calibration.iter().for_each(|&v| w.fp(v));
        for word in self.checkbox_configuration {
            w.bytes(&word.to_le_bytes());
        }

        let crc = SETTINGS_CRC.checksum(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(image: &[u8]) -> Result<Self, SettingsError> {
        if image.len() < SETTINGS_IMAGE_LEN {
            return Err(SettingsError::TooShort);
        }
        let image = &image[..SETTINGS_IMAGE_LEN];
        if image[..4] != SETTINGS_MAGIC {
            return Err(SettingsError::BadMagic);
        }
        if image[4] != SETTINGS_VERSION {
            return Err(SettingsError::BadVersion(image[4]));
        }
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&image[CRC_OFFSET..]);
        if SETTINGS_CRC.checksum(&image[..CRC_OFFSET]) != u32::from_le_bytes(stored) {
            return Err(SettingsError::BadChecksum);
        }

        let mut r = Reader { buf: image, pos: 5 };
        let pid = PidGains {
            p: r.axes(),
            i: r.axes(),
            d: r.axes(),
        };
        let max_yaw_rate = r.fp();
        let max_pitch_and_roll_rate = r.fp();
        let gyro_calibration = r.axes();
        let acc_calibration = r.axes();
        let mut checkbox_configuration = [0u16; CHECKBOX_ITEM_COUNT];
        for word in checkbox_configuration.iter_mut() {
            *word = u16::from_le_bytes(r.take());
        }

        Ok(Self {
            pid,
            max_yaw_rate,
            max_pitch_and_roll_rate,
            gyro_calibration,
            acc_calibration,
            checkbox_configuration,
        })
    }
}

// ── Store seam ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Device,
    Corrupt(SettingsError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Device => write!(f, "settings device error"),
            StoreError::Corrupt(e) => write!(f, "{}", e),
        }
    }
}

impl From<SettingsError> for StoreError {
    fn from(e: SettingsError) -> Self {
        StoreError::Corrupt(e)
    }
}

/// Non-volatile home of [`UserSettings`].
pub trait SettingsStore {
    fn load(&mut self) -> Result<UserSettings, StoreError>;
    fn save(&mut self, settings: &UserSettings) -> Result<(), StoreError>;
}

/// Settings image held in RAM; loses its content on reset.
#[derive(Debug, Default)]
pub struct RamSettingsStore {
    image: Option<[u8; SETTINGS_IMAGE_LEN]>,
    saves: u32,
}

impl RamSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> u32 {
        self.saves
    }
}

impl SettingsStore for RamSettingsStore {
    fn load(&mut self) -> Result<UserSettings, StoreError> {
        match &self.image {
            Some(image) => Ok(UserSettings::from_bytes(image)?),
            None => Err(StoreError::Corrupt(SettingsError::BadMagic)),
        }
    }

    fn save(&mut self, settings: &UserSettings) -> Result<(), StoreError> {
        self.image = Some(settings.to_bytes());
        self.saves += 1;
        Ok(())
    }
}
