use embassy_executor::task;
use embassy_stm32::peripherals::{DMA1_CH2, UART4};
use embassy_stm32::usart::UartRx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;

use crate::drivers::crsf::{CrsfParser, RcChannels};

/// Reads UART4 continuously and forwards every valid RC frame.
#[task]
pub async fn crsf_task(
    mut crsf_rx: UartRx<'static, UART4, DMA1_CH2>,
    crsf_tx: Sender<'static, CriticalSectionRawMutex, RcChannels, 1>,
) {
    let mut parser = CrsfParser::new();
    let mut buf = [0u8; 64];

    loop {
        match crsf_rx.read_until_idle(&mut buf).await {
            Ok(n) => {
                if let Some(frame) = parser.push_bytes(&buf[..n]) {
                    // Cap 1: drop the frame if the loop has not taken the last one.
                    let _ = crsf_tx.try_send(frame);
                }
            }
            Err(_) => warn!("crsf uart error"),
        }
    }
}
