pub mod crsf;
pub mod dshot;
pub mod vtx;

#[cfg(feature = "firmware")]
pub mod flash;
#[cfg(feature = "firmware")]
pub mod icm42688;
