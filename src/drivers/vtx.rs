//! Frequency control for the 5.8 GHz video transmitter on the H107D camera.
//!
//! The transmitter takes a 25-bit frame clocked in over three lines (chip
//! select, clock, data). Frames are sent most-significant bit first; the two
//! middle fields carry their values bit-reversed.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::fixed_point::{Fp, ONE};

pub const FRAME_BITS: u32 = 25;
pub const FREQ_MIN_MHZ: u16 = 5725;
pub const FREQ_MAX_MHZ: u16 = 5875;
pub const FREQ_STEP_MHZ: u16 = 5;
pub const CHANNEL_COUNT: usize = 31;

/// Preamble and trailer, `100010`.
const FRAME_MARKER: u32 = 0b100010;
/// Frequency threshold at which the 6-bit field formula changes branch.
const BRANCH_MHZ: u16 = 5765;

/// Frame sent once at power-up before any frequency is selected.
pub const INIT_FRAME: u32 = 0b0000100001001100000000000;

/// Last-sent value at startup; no real channel, so the first request always goes out.
pub const FREQ_SENTINEL: u16 = 0;

pub const CLOCK_HIGH_US: u32 = 3;
pub const CLOCK_LOW_US: u32 = 1;

/// Per-channel frames, 5725 MHz first.
pub const FRAME_TABLE: [u32; CHANNEL_COUNT] = [
    0b1000101010100011110100010, // 5725
    0b1000100100100111110100010, // 5730
    0b1000101111000000001100010, // 5735
    0b1000100011000100001100010, // 5740
    0b1000101001000010001100010, // 5745
    0b1000100110000110001100010, // 5750
    0b1000101100000001001100010, // 5755
    0b1000100000000101001100010, // 5760
    0b1000101011111101001100010, // 5765
    0b1000100101111011001100010, // 5770
    0b1000101110111111001100010, // 5775
    0b1000100010111000101100010, // 5780
    0b1000101000111100101100010, // 5785
    0b1000100111011010101100010, // 5790
    0b1000101101011110101100010, // 5795
    0b1000100001011001101100010, // 5800
    0b1000101010011101101100010, // 5805
    0b1000100100011011101100010, // 5810
    0b1000101111101111101100010, // 5815
    0b1000100011101000011100010, // 5820
    0b1000101001101100011100010, // 5825
    0b1000100110101010011100010, // 5830
    0b1000101100101110011100010, // 5835
    0b1000100000101001011100010, // 5840
    0b1000101011001101011100010, // 5845
    0b1000100101001011011100010, // 5850
    0b1000101110001111011100010, // 5855
    0b1000100010001000111100010, // 5860
    0b1000101000001100111100010, // 5865
    0b1000100111110010111100010, // 5870
    0b1000101101110110111100010, // 5875
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VtxError<E> {
    UnsupportedFrequency(u16),
    Pin(E),
}

impl<E: fmt::Debug> fmt::Display for VtxError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VtxError::UnsupportedFrequency(mhz) => write!(f, "unsupported VTX frequency {} MHz", mhz),
            VtxError::Pin(e) => write!(f, "VTX pin error: {:?}", e),
        }
    }
}

/// One of the 31 supported channels, 5725..=5875 MHz in 5 MHz steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VtxFrequency(u16);

impl VtxFrequency {
    pub fn new(mhz: u16) -> Option<Self> {
        if (FREQ_MIN_MHZ..=FREQ_MAX_MHZ).contains(&mhz) && (mhz - FREQ_MIN_MHZ) % FREQ_STEP_MHZ == 0 {
            Some(Self(mhz))
        } else {
            None
        }
    }

    pub fn from_channel(index: usize) -> Option<Self> {
        if index < CHANNEL_COUNT {
            Some(Self(FREQ_MIN_MHZ + index as u16 * FREQ_STEP_MHZ))
        } else {
            None
        }
    }

    pub fn mhz(self) -> u16 {
        self.0
    }

    pub fn channel(self) -> usize {
        ((self.0 - FREQ_MIN_MHZ) / FREQ_STEP_MHZ) as usize
    }
}

/// Selects a channel from a switch or slider position in `[-1, 1)`,
/// lowest frequency at the bottom.
pub fn frequency_from_stick(value: Fp) -> VtxFrequency {
    let offset = value.clamp(-ONE, ONE - Fp::DELTA).to_bits() as i64 + ONE.to_bits() as i64;
    let index = ((offset * CHANNEL_COUNT as i64) >> 17) as usize;
    VtxFrequency(FREQ_MIN_MHZ + index.min(CHANNEL_COUNT - 1) as u16 * FREQ_STEP_MHZ)
}

fn reverse_bits(value: u32, width: u32) -> u32 {
    value.reverse_bits() >> (32 - width)
}

pub fn encode_table(freq: VtxFrequency) -> u32 {
    FRAME_TABLE[freq.channel()]
}

/// Builds the frame from the channel arithmetic instead of the table.
pub fn encode_formula(freq: VtxFrequency) -> u32 {
    let f = freq.mhz() as i32;
    let k = (f - FREQ_MIN_MHZ as i32) / FREQ_STEP_MHZ as i32;

    let coarse = (21 - 3 * k).rem_euclid(128) as u32;
    let fine = if freq.mhz() < BRANCH_MHZ {
        60 + k * 2 + 1 - f % 2
    } else {
        60 + (k - 1) * 2 + f % 2
    } as u32;

    (FRAME_MARKER << 19)
        | (reverse_bits(coarse, 7) << 12)
        | (reverse_bits(fine >> 1, 6) << 6)
        | FRAME_MARKER
}

/// Bit-banged transmitter on three output lines.
///
/// Chip select idles high and is held low for the duration of a frame.
pub struct VtxTransmitter<CS, CLK, DATA, D> {
    cs: CS,
    clk: CLK,
    data: DATA,
    delay: D,
    last_mhz: u16,
}

impl<CS, CLK, DATA, D, E> VtxTransmitter<CS, CLK, DATA, D>
where
    CS: OutputPin<Error = E>,
    CLK: OutputPin<Error = E>,
    DATA: OutputPin<Error = E>,
    D: DelayNs,
{
    pub fn new(cs: CS, clk: CLK, data: DATA, delay: D) -> Self {
        Self {
            cs,
            clk,
            data,
            delay,
            last_mhz: FREQ_SENTINEL,
        }
    }

    /// Drives the lines idle and sends the power-up frame.
    pub fn init(&mut self) -> Result<(), VtxError<E>> {
        self.last_mhz = FREQ_SENTINEL;
        self.cs.set_high().map_err(VtxError::Pin)?;
        self.data.set_low().map_err(VtxError::Pin)?;
        self.clk.set_low().map_err(VtxError::Pin)?;
        self.send_frame(INIT_FRAME)?;
        info!("vtx initialised");
        Ok(())
    }

    pub fn last_frequency(&self) -> u16 {
        self.last_mhz
    }

    /// Retunes to `mhz`. Returns `Ok(false)` when already on that frequency.
    pub fn set_frequency(&mut self, mhz: u16) -> Result<bool, VtxError<E>> {
        let Some(freq) = VtxFrequency::new(mhz) else {
            warn!("vtx frequency {} MHz rejected", mhz);
            return Err(VtxError::UnsupportedFrequency(mhz));
        };
        if freq.mhz() == self.last_mhz {
            return Ok(false);
        }
        // A frame cut short leaves the chip state unknown; force the next request out.
        if let Err(e) = self.send_frame(encode_table(freq)) {
            self.last_mhz = FREQ_SENTINEL;
            return Err(e);
        }
        self.last_mhz = freq.mhz();
        info!("vtx tuned to {} MHz", mhz);
        Ok(true)
    }

    fn send_frame(&mut self, frame: u32) -> Result<(), VtxError<E>> {
        self.cs.set_low().map_err(VtxError::Pin)?;
        for bit in (0..FRAME_BITS).rev() {
            if frame & (1 << bit) != 0 {
                self.data.set_high().map_err(VtxError::Pin)?;
            } else {
                self.data.set_low().map_err(VtxError::Pin)?;
            }
            self.clk.set_high().map_err(VtxError::Pin)?;
            self.delay.delay_us(CLOCK_HIGH_US);
            self.clk.set_low().map_err(VtxError::Pin)?;
            self.delay.delay_us(CLOCK_LOW_US);
        }
        self.cs.set_high().map_err(VtxError::Pin)?;
        Ok(())
    }

    pub fn release(self) -> (CS, CLK, DATA, D) {
        (self.cs, self.clk, self.data, self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;
    use std::rc::Rc;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Line {
        Cs,
        Clk,
        Data,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Set(Line, bool),
        DelayNs(u32),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct Pin {
        line: Line,
        log: Log,
    }

    impl ErrorType for Pin {
        type Error = Infallible;
    }

    impl OutputPin for Pin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.log.borrow_mut().push(Event::Set(self.line, false));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.log.borrow_mut().push(Event::Set(self.line, true));
            Ok(())
        }
    }

    struct Delay(Log);

    impl DelayNs for Delay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.borrow_mut().push(Event::DelayNs(ns));
        }
    }

    fn transmitter() -> (VtxTransmitter<Pin, Pin, Pin, Delay>, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let pin = |line| Pin { line, log: log.clone() };
        let vtx = VtxTransmitter::new(pin(Line::Cs), pin(Line::Clk), pin(Line::Data), Delay(log.clone()));
        (vtx, log)
    }

    /// Reassembles frames from the data line sampled on each rising clock edge
    /// while chip select is low.
    fn decode(log: &[Event]) -> Vec<u32> {
        let mut frames = Vec::new();
        let mut cs = true;
        let mut clk = false;
        let mut data = false;
        let mut bits = 0u32;
        let mut value = 0u32;
        for event in log {
            match *event {
                Event::Set(Line::Cs, level) => {
                    if !cs && level {
                        assert_eq!(bits, FRAME_BITS);
                        frames.push(value);
                    }
                    if cs && !level {
                        bits = 0;
                        value = 0;
                    }
                    cs = level;
                }
                Event::Set(Line::Clk, level) => {
                    if !clk && level {
                        assert!(!cs, "clock edge outside chip select");
                        value = (value << 1) | data as u32;
                        bits += 1;
                    }
                    clk = level;
                }
                Event::Set(Line::Data, level) => data = level,
                Event::DelayNs(_) => {}
            }
        }
        frames
    }

    #[test]
    fn test_table_matches_formula_for_every_channel() {
        for index in 0..CHANNEL_COUNT {
            let freq = VtxFrequency::from_channel(index).unwrap();
            assert_eq!(encode_table(freq), encode_formula(freq), "{} MHz", freq.mhz());
        }
    }

    #[test]
    fn test_frame_fields() {
        let freq = VtxFrequency::new(5725).unwrap();
        let frame = encode_formula(freq);
        assert_eq!(frame >> 19, FRAME_MARKER);
        assert_eq!(frame & 0x3F, FRAME_MARKER);
        // 21 = 0010101, reversed 1010100
        assert_eq!((frame >> 12) & 0x7F, 0b1010100);
    }

    #[test]
    fn test_branch_boundary() {
        let below = encode_formula(VtxFrequency::new(5760).unwrap());
        let above = encode_formula(VtxFrequency::new(5765).unwrap());
        assert_eq!(below, 0b1000100000000101001100010);
        assert_eq!(above, 0b1000101011111101001100010);
        // Both branches land on the same 6-bit field value either side of the threshold.
        assert_eq!((below >> 6) & 0x3F, (above >> 6) & 0x3F);
    }

    #[test]
    fn test_frequency_validation() {
        assert!(VtxFrequency::new(5725).is_some());
        assert!(VtxFrequency::new(5875).is_some());
        assert!(VtxFrequency::new(5720).is_none());
        assert!(VtxFrequency::new(5880).is_none());
        assert!(VtxFrequency::new(5727).is_none());
        assert_eq!(VtxFrequency::new(5800).unwrap().channel(), 15);
        assert!(VtxFrequency::from_channel(CHANNEL_COUNT).is_none());
    }

    #[test]
    fn test_frequency_from_stick() {
        assert_eq!(frequency_from_stick(-ONE).mhz(), FREQ_MIN_MHZ);
        assert_eq!(frequency_from_stick(Fp::lit("0.9999")).mhz(), FREQ_MAX_MHZ);
        assert_eq!(frequency_from_stick(Fp::ZERO).mhz(), 5800);
    }

    #[test]
    fn test_init_sends_power_up_frame() {
        let (mut vtx, log) = transmitter();
        vtx.init().unwrap();
        assert_eq!(decode(&log.borrow()), vec![INIT_FRAME]);
        assert_eq!(vtx.last_frequency(), FREQ_SENTINEL);

        let events = log.borrow();
        assert_eq!(events[0], Event::Set(Line::Cs, true));
        assert_eq!(*events.last().unwrap(), Event::Set(Line::Cs, true));
    }

    #[test]
    fn test_clock_dwell_times() {
        let (mut vtx, log) = transmitter();
        vtx.set_frequency(5800).unwrap();
        let delays: Vec<u32> = log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::DelayNs(ns) => Some(*ns),
                _ => None,
            })
            .collect();
        assert_eq!(delays.len(), 2 * FRAME_BITS as usize);
        for pair in delays.chunks(2) {
            assert_eq!(pair, &[CLOCK_HIGH_US * 1_000, CLOCK_LOW_US * 1_000]);
        }
    }

    #[test]
    fn test_set_frequency_is_idempotent() {
        let (mut vtx, log) = transmitter();
        assert_eq!(vtx.set_frequency(5800), Ok(true));
        assert_eq!(vtx.set_frequency(5800), Ok(false));
        assert_eq!(decode(&log.borrow()), vec![FRAME_TABLE[15]]);

        assert_eq!(vtx.set_frequency(5725), Ok(true));
        assert_eq!(vtx.last_frequency(), 5725);
        assert_eq!(decode(&log.borrow()), vec![FRAME_TABLE[15], FRAME_TABLE[0]]);
    }

    #[test]
    fn test_rejects_unsupported_frequency() {
        let (mut vtx, log) = transmitter();
        vtx.set_frequency(5740).unwrap();
        let before = log.borrow().len();

        assert_eq!(vtx.set_frequency(5742), Err(VtxError::UnsupportedFrequency(5742)));
        assert_eq!(vtx.set_frequency(0), Err(VtxError::UnsupportedFrequency(0)));
        assert_eq!(log.borrow().len(), before);
        assert_eq!(vtx.last_frequency(), 5740);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct LineFault;

    impl embedded_hal::digital::Error for LineFault {
        fn kind(&self) -> embedded_hal::digital::ErrorKind {
            embedded_hal::digital::ErrorKind::Other
        }
    }

    /// Pin that fails while `broken` is set and counts clock pulses otherwise.
    struct FlakyPin {
        is_clock: bool,
        broken: Rc<core::cell::Cell<bool>>,
        pulses: Rc<core::cell::Cell<u32>>,
    }

    impl ErrorType for FlakyPin {
        type Error = LineFault;
    }

    impl OutputPin for FlakyPin {
        fn set_low(&mut self) -> Result<(), LineFault> {
            if self.broken.get() {
                return Err(LineFault);
            }
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), LineFault> {
            if self.broken.get() {
                return Err(LineFault);
            }
            if self.is_clock {
                self.pulses.set(self.pulses.get() + 1);
            }
            Ok(())
        }
    }

    #[test]
    fn test_failed_send_is_retried() {
        let broken = Rc::new(core::cell::Cell::new(true));
        let pulses = Rc::new(core::cell::Cell::new(0));
        let pin = |is_clock| FlakyPin {
            is_clock,
            broken: broken.clone(),
            pulses: pulses.clone(),
        };
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut vtx = VtxTransmitter::new(pin(false), pin(true), pin(false), Delay(log));

        assert_eq!(vtx.set_frequency(5800), Err(VtxError::Pin(LineFault)));
        assert_eq!(vtx.last_frequency(), FREQ_SENTINEL);

        broken.set(false);
        assert_eq!(vtx.set_frequency(5800), Ok(true));
        assert_eq!(pulses.get(), FRAME_BITS);
        assert_eq!(vtx.last_frequency(), 5800);
        assert_eq!(vtx.set_frequency(5800), Ok(false));
    }
}
