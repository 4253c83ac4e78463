#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Duration, Timer};
use {defmt_rtt as _, panic_probe as _};

use x4_flight::board::Board;
use x4_flight::config::{Airframe, AirframeProfile};
use x4_flight::drivers::crsf::RcChannels;
use x4_flight::drivers::dshot::{Dshot300, DshotMotors};
use x4_flight::drivers::flash::W25qxx;
use x4_flight::drivers::icm42688::Icm42688;
use x4_flight::drivers::vtx::VtxTransmitter;
use x4_flight::tasks::crsf_task::crsf_task;
use x4_flight::tasks::fast_loop::{fast_loop_task, FastLoopHardware};

const AIRFRAME: Airframe = Airframe::HubsanH107D;

// Cap=1: the fast loop only wants the latest frame.
static CRSF_CHAN: Channel<CriticalSectionRawMutex, RcChannels, 1> = Channel::new();

bind_interrupts!(struct Irqs {
    UART4 => embassy_stm32::usart::InterruptHandler<peripherals::UART4>;
});

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;
    let profile = AirframeProfile::new(AIRFRAME);

    // 2. SPI1 @ 10 MHz: ICM-42688 IMU (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PB12)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(10_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
    let cs_gyro = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    let mut imu = Icm42688::new(spi, cs_gyro);

    // 3. SPI3 @ 10 MHz: W25Qxx settings flash (SCK=PC10, MOSI=PC12, MISO=PC11, CS=PA15)
    let mut flash_config = SpiConfig::default();
    flash_config.frequency = TimeHertz(10_000_000);
    let flash_spi = Spi::new(p.SPI3, p.PC10, p.PC12, p.PC11, NoDma, NoDma, flash_config);
    let cs_flash = Output::new(p.PA15.degrade(), Level::High, Speed::VeryHigh);
    let mut flash = W25qxx::new(flash_spi, cs_flash);

    // 4. DShot300 ESCs in mixer order
    let motors = DshotMotors::new([
        Dshot300::new(p.PB0.degrade()),
        Dshot300::new(p.PB1.degrade()),
        Dshot300::new(p.PA3.degrade()),
        Dshot300::new(p.PA2.degrade()),
    ]);

    // 5. CRSF/ELRS UART4 @ 420000 (TX=PA0, RX=PA1), receive only
    let mut crsf_config = UsartConfig::default();
    crsf_config.baudrate = 420_000;
    let crsf_uart = Uart::new(p.UART4, p.PA1, p.PA0, Irqs, p.DMA1_CH4, p.DMA1_CH2, crsf_config).unwrap();
    let (_crsf_uart_tx, crsf_uart_rx) = crsf_uart.split();

    // 6. Heartbeat LED (PC13)
    let led = Output::new(p.PC13.degrade(), Level::High, Speed::Low);

    // 7. Sensor bring-up
    Timer::after(Duration::from_millis(100)).await;
    if imu.init().is_err() {
        defmt::warn!("icm42688 init failed");
    }
    match flash.read_id() {
        Ok(id) => defmt::info!("flash id {:x}", id),
        Err(_) => defmt::warn!("flash not responding"),
    }

    // 8. Video transmitter on the camera lines (CS=PC0, CLK=PC1, DATA=PC2)
    let vtx = if profile.has_vtx_camera {
        let mut radio = VtxTransmitter::new(
            Output::new(p.PC0.degrade(), Level::High, Speed::VeryHigh),
            Output::new(p.PC1.degrade(), Level::Low, Speed::VeryHigh),
            Output::new(p.PC2.degrade(), Level::Low, Speed::VeryHigh),
            Delay,
        );
        if radio.init().is_err() {
            defmt::warn!("vtx init failed");
        }
        Some(radio)
    } else {
        None
    };

    // 9. Tasks
    spawner
        .spawn(crsf_task(crsf_uart_rx, CRSF_CHAN.sender()))
        .unwrap();
    spawner
        .spawn(fast_loop_task(
            FastLoopHardware {
                imu,
                flash,
                motors,
                vtx,
                led,
            },
            profile,
            CRSF_CHAN.receiver(),
        ))
        .unwrap();
}
