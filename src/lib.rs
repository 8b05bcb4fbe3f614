//! Userspace access to the FMC ADC 100M 14b 4cha through its ZIO driver.
//!
//! A [`Device`] wraps the sysfs attributes and the control and data character
//! devices of channel set 0. Configuration travels in [`Conf`] records, data
//! in [`Buffer`]s filled one block at a time. The remaining modules back the
//! `fald-acq` tool.

pub mod board;
pub mod buffer;
pub mod cli;
pub mod command;
pub mod conf;
pub mod cycle;
pub mod device;
pub mod error;
pub mod output;
pub mod params;
pub mod settings;
pub mod sim;
pub mod stream;
pub mod sysfs;
pub mod utils;
pub mod zio;

pub use board::{BoardType, FMCADC_100MS_4CH_14BIT};
pub use buffer::Buffer;
pub use conf::{Conf, ConfField, ConfType};
pub use device::{Device, DeviceLocation};
pub use error::{Error, ErrorCode, Result};
pub use sim::SimulatedBoard;
pub use sysfs::{AttributeStore, SysfsStore};
pub use stream::{CharDevice, DeviceStream};
pub use zio::{Timestamp, ZioControl, ZIO_CONTROL_SIZE};

/// Board family name accepted by [`Device::open_by_name`].
pub const BOARD_NAME: &str = "fmc-adc-100m14b4cha";
