//! DShot300 ESC protocol.
//!
//! Frame building and throttle scaling are portable; the bit-banged pin
//! driver exists only in firmware builds.

use crate::fixed_point::{Fp, ONE, SHIFT, ZERO};

/// Lowest throttle value; 1..=47 are ESC commands.
pub const DSHOT_THROTTLE_MIN: u16 = 48;
pub const DSHOT_THROTTLE_MAX: u16 = 2047;
/// Motor stop.
pub const DSHOT_CMD_STOP: u16 = 0;

pub fn dshot_frame(command: u16, telemetry: bool) -> u16 {
    let mut packet = (command & 0x07ff) << 1;
    if telemetry {
        packet |= 1;
    }

    let mut csum = 0u16;
    let mut csum_data = packet;
    for _ in 0..3 {
        csum ^= csum_data;
        csum_data >>= 4;
    }
    csum &= 0x000f;

    (packet << 4) | csum
}

/// Motor command in `[0, 1]` to a DShot throttle value. Zero stops the motor.
pub fn fixed_to_dshot(value: Fp) -> u16 {
    if value <= ZERO {
        return DSHOT_CMD_STOP;
    }
    let span = (DSHOT_THROTTLE_MAX - DSHOT_THROTTLE_MIN) as i64;
    let scaled = (value.min(ONE).to_bits() as i64 * span) >> SHIFT;
    DSHOT_THROTTLE_MIN + scaled as u16
}

#[cfg(feature = "firmware")]
pub use self::pins::{Dshot300, DshotMotors};

#[cfg(feature = "firmware")]
mod pins {
    use cortex_m::asm;
    use embassy_stm32::gpio::{AnyPin, Level, Output, Speed};

    use super::{dshot_frame, fixed_to_dshot};
    use crate::control::mixer::MOTOR_COUNT;
    use crate::fixed_point::Fp;
    use crate::hal::MotorOutput;

    pub struct Dshot300 {
        pin: Output<'static, AnyPin>,
    }

    impl Dshot300 {
        // Cycle counts at 168 MHz.
        const BIT_TOTAL_CYCLES: u32 = 560;
        const BIT1_HIGH_CYCLES: u32 = 420;
        const BIT1_LOW_CYCLES: u32 = Self::BIT_TOTAL_CYCLES - Self::BIT1_HIGH_CYCLES;
        const BIT0_HIGH_CYCLES: u32 = 210;
        const BIT0_LOW_CYCLES: u32 = Self::BIT_TOTAL_CYCLES - Self::BIT0_HIGH_CYCLES;
        const FRAME_GAP_CYCLES: u32 = 5200;

        pub fn new(pin: AnyPin) -> Self {
            Self {
                pin: Output::new(pin, Level::Low, Speed::VeryHigh),
            }
        }

        pub fn send_command(&mut self, command_11bit: u16, telemetry: bool) {
            self.send_frame(dshot_frame(command_11bit, telemetry));
        }

        pub fn send_frame(&mut self, frame: u16) {
            // Interrupts off for the frame; any ISR stretches a bit.
            critical_section::with(|_cs| {
                for bit in (0..16).rev() {
                    let one = ((frame >> bit) & 0x1) != 0;

                    self.pin.set_high();
                    if one {
                        asm::delay(Self::BIT1_HIGH_CYCLES);
                        self.pin.set_low();
                        asm::delay(Self::BIT1_LOW_CYCLES);
                    } else {
                        asm::delay(Self::BIT0_HIGH_CYCLES);
                        self.pin.set_low();
                        asm::delay(Self::BIT0_LOW_CYCLES);
                    }
                }

                self.pin.set_low();
                asm::delay(Self::FRAME_GAP_CYCLES);
            });
        }
    }

    /// The four quad ESCs, in mixer order.
    pub struct DshotMotors {
        escs: [Dshot300; MOTOR_COUNT],
    }

    impl DshotMotors {
        pub fn new(escs: [Dshot300; MOTOR_COUNT]) -> Self {
            Self { escs }
        }
    }

    impl MotorOutput for DshotMotors {
        fn set_motor(&mut self, index: usize, value: Fp) {
            if let Some(esc) = self.escs.get_mut(index) {
                esc.send_command(fixed_to_dshot(value), false);
            }
        }
    }
}
