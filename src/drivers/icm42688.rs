use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{block_for, Duration};

use crate::fixed_point::{Fp, SHIFT, ZERO};
use crate::hal::{CalibrationBiases, SensorCalibration};

const REG_DEVICE_CONFIG: u8 = 0x11;
const REG_ACCEL_DATA_X1: u8 = 0x1F;
const REG_PWR_MGMT0: u8 = 0x4E;
const REG_WHO_AM_I: u8 = 0x75;
const WHO_AM_I: u8 = 0x47;

pub const CALIBRATION_SAMPLES: i64 = 100;
const CALIBRATION_INTERVAL: Duration = Duration::from_millis(10);
/// 1 g at ±16 g full scale.
const ACCEL_ONE_G_LSB: i64 = 2048;

pub struct Icm42688<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance> Icm42688<'d, T> {
    pub fn new(spi: Spi<'d, T, NoDma, NoDma>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        let buf = [reg & 0x7F, value];
        self.cs.set_low();
        let res = self.spi.blocking_write(&buf);
        self.cs.set_high();
        res
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let tx = [reg | 0x80, 0x00];
        let mut rx = [0u8; 2];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();

        res?;
        Ok(rx[1])
    }

    pub fn init(&mut self) -> Result<(), Error> {
        // Soft reset
        self.write_reg(REG_DEVICE_CONFIG, 0x01)?;
        block_for(Duration::from_millis(10));

        let id = self.read_reg(REG_WHO_AM_I)?;
        if id != WHO_AM_I {
            warn!("icm42688 unexpected WHO_AM_I {=u8:#x}", id);
        }

        // Gyro and accel in low-noise mode
        self.write_reg(REG_PWR_MGMT0, 0x0F)?;
        block_for(Duration::from_millis(50));

        Ok(())
    }

    /// One accel + gyro sample, raw LSB.
    pub fn read_all(&mut self) -> Result<([i16; 3], [i16; 3]), Error> {
        let mut tx = [0u8; 13];
        tx[0] = REG_ACCEL_DATA_X1 | 0x80;
        let mut rx = [0u8; 13];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();
        res?;

        let word = |i: usize| i16::from_be_bytes([rx[i], rx[i + 1]]);
        Ok(([word(1), word(3), word(5)], [word(7), word(9), word(11)]))
    }
}

impl<'d, T: Instance> SensorCalibration for Icm42688<'d, T> {
    /// Averages samples with the airframe at rest. Accel Z keeps 1 g removed.
    fn calibrate_gyro_and_accel(&mut self) -> CalibrationBiases {
        let mut accel_sum = [0i64; 3];
        let mut gyro_sum = [0i64; 3];
        let mut taken = 0i64;

        for _ in 0..CALIBRATION_SAMPLES {
            if let Ok((accel, gyro)) = self.read_all() {
                for j in 0..3 {
                    accel_sum[j] += accel[j] as i64;
                    gyro_sum[j] += gyro[j] as i64;
                }
                taken += 1;
            }
            block_for(CALIBRATION_INTERVAL);
        }

        if taken == 0 {
            warn!("icm42688 calibration got no samples");
            return CalibrationBiases::default();
        }
        accel_sum[2] -= ACCEL_ONE_G_LSB * taken;

        let average = |sum: i64| Fp::from_bits(((sum << SHIFT) / taken) as i32);
        let mut biases = CalibrationBiases {
            gyro: [ZERO; 3],
            accel: [ZERO; 3],
        };
        for j in 0..3 {
            biases.gyro[j] = average(gyro_sum[j]);
            biases.accel[j] = average(accel_sum[j]);
        }
        info!("icm42688 calibrated from {=i64} samples", taken);
        biases
    }
}
