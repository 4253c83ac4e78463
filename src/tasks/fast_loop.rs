use embassy_executor::task;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::peripherals::{SPI1, SPI3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Delay, Duration, Ticker};

use crate::attitude::GyroAttitude;
use crate::board::BoardClock;
use crate::config::AirframeProfile;
use crate::control::flight_loop::{FlightController, LoopIo};
use crate::drivers::crsf::{RcChannels, RcReceiver};
use crate::drivers::dshot::DshotMotors;
use crate::drivers::flash::W25qxx;
use crate::drivers::icm42688::Icm42688;
use crate::drivers::vtx::{frequency_from_stick, VtxTransmitter};
use crate::hal::MicrosClock;
use crate::state::RcChannel;

/// Control loop rate.
const FAST_LOOP_HZ: u64 = 1000;

/// Channel that selects the video frequency.
const VTX_CHANNEL: RcChannel = RcChannel::Aux2;

pub type VtxRadio =
    VtxTransmitter<Output<'static, AnyPin>, Output<'static, AnyPin>, Output<'static, AnyPin>, Delay>;

pub struct FastLoopHardware {
    pub imu: Icm42688<'static, SPI1>,
    pub flash: W25qxx<'static, SPI3>,
    pub motors: DshotMotors,
    pub vtx: Option<VtxRadio>,
    pub led: Output<'static, AnyPin>,
}

#[task]
pub async fn fast_loop_task(
    hw: FastLoopHardware,
    profile: AirframeProfile,
    crsf_rx: Receiver<'static, CriticalSectionRawMutex, RcChannels, 1>,
) {
    let FastLoopHardware {
        mut imu,
        mut flash,
        mut motors,
        mut vtx,
        mut led,
    } = hw;

    let clock = BoardClock;
    let mut controller = FlightController::from_store(profile, &mut flash, clock.now_us());
    let mut attitude = GyroAttitude::new(controller.settings());
    let mut receiver = RcReceiver::new();

    let mut ticker = Ticker::every(Duration::from_hz(FAST_LOOP_HZ));

    loop {
        ticker.next().await;
        let now = clock.now_us();

        if let Ok(frame) = crsf_rx.try_receive() {
            receiver.on_frame(&frame, now);
        }

        // Skip the iteration on a bad SPI read; the next tick measures the whole gap.
        match imu.read_all() {
            Ok((_, gyro)) => attitude.update_gyro(gyro),
            Err(_) => {
                trace!("imu read failed");
                continue;
            }
        }

        let failsafe = receiver.failsafe(now);
        let mut io = LoopIo {
            attitude: &mut attitude,
            calibration: &mut imu,
            store: &mut flash,
            motors: &mut motors,
        };
        controller.iterate(now, receiver.input(), failsafe, &mut io);

        if let Some(radio) = vtx.as_mut() {
            if !failsafe {
                let freq = frequency_from_stick(receiver.input().get(VTX_CHANNEL));
                if radio.set_frequency(freq.mhz()).is_err() {
                    warn!("vtx retune failed");
                }
            }
        }

        led.set_level(controller.status().led_on(now).into());
    }
}
