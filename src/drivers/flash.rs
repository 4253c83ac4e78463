//! W25Qxx SPI NOR flash holding the settings image.

use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};

use crate::settings::{SettingsStore, StoreError, UserSettings, SETTINGS_IMAGE_LEN};

const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_SECTOR_ERASE: u8 = 0x20;
const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_READ_DATA: u8 = 0x03;
const CMD_READ_STATUS1: u8 = 0x05;
const CMD_JEDEC_ID: u8 = 0x9F;

const STATUS_BUSY: u8 = 0x01;
const PAGE_SIZE: usize = 256;

/// First 4 KiB sector is reserved for settings.
pub const SETTINGS_ADDRESS: u32 = 0x0000_0000;

const _: () = assert!(SETTINGS_IMAGE_LEN <= PAGE_SIZE);

pub struct W25qxx<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance> W25qxx<'d, T> {
    pub fn new(spi: Spi<'d, T, NoDma, NoDma>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    fn command(&mut self, header: &[u8], read: &mut [u8], write: &[u8]) -> Result<(), Error> {
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(header)
            .and_then(|_| if write.is_empty() { Ok(()) } else { self.spi.blocking_write(write) })
            .and_then(|_| if read.is_empty() { Ok(()) } else { self.spi.blocking_read(read) });
        self.cs.set_high();
        res
    }

    fn addressed(cmd: u8, address: u32) -> [u8; 4] {
        let a = address.to_be_bytes();
        [cmd, a[1], a[2], a[3]]
    }

    pub fn read_id(&mut self) -> Result<[u8; 3], Error> {
        let mut id = [0u8; 3];
        self.command(&[CMD_JEDEC_ID], &mut id, &[])?;
        Ok(id)
    }

    fn write_enable(&mut self) -> Result<(), Error> {
        self.command(&[CMD_WRITE_ENABLE], &mut [], &[])
    }

    fn wait_idle(&mut self) -> Result<(), Error> {
        let mut status = [STATUS_BUSY];
        while status[0] & STATUS_BUSY != 0 {
            self.command(&[CMD_READ_STATUS1], &mut status, &[])?;
        }
        Ok(())
    }

    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.command(&Self::addressed(CMD_READ_DATA, address), buf, &[])
    }

    pub fn erase_sector(&mut self, address: u32) -> Result<(), Error> {
        self.write_enable()?;
        self.command(&Self::addressed(CMD_SECTOR_ERASE, address), &mut [], &[])?;
        self.wait_idle()
    }

    /// Programs at most one page; `data` must not cross a page boundary.
    pub fn program_page(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.write_enable()?;
        self.command(&Self::addressed(CMD_PAGE_PROGRAM, address), &mut [], data)?;
        self.wait_idle()
    }
}

impl<'d, T: Instance> SettingsStore for W25qxx<'d, T> {
    fn load(&mut self) -> Result<UserSettings, StoreError> {
        let mut image = [0u8; SETTINGS_IMAGE_LEN];
        self.read(SETTINGS_ADDRESS, &mut image)
            .map_err(|_| StoreError::Device)?;
        Ok(UserSettings::from_bytes(&image)?)
    }

    fn save(&mut self, settings: &UserSettings) -> Result<(), StoreError> {
        let image = settings.to_bytes();
        self.erase_sector(SETTINGS_ADDRESS)
            .and_then(|_| self.program_page(SETTINGS_ADDRESS, &image))
            .map_err(|_| StoreError::Device)
    }
}
