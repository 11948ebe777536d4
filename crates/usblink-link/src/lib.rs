//! Path-addressed link transport over a [`usblink_core::Session`].
//!
//! A link is one claimed interface carrying a bulk endpoint pair. Links are named by
//! `/usb/VVVV/PPPP/II/SERIAL` paths, enumerated with [`next_device_path`] and opened
//! with [`LinkDriver::open`].

mod config;
mod driver;
mod scan;

pub use config::{DEFAULT_FLUSH_TIMEOUT, DEFAULT_SCAN_VENDOR_ID, LinkConfig};
pub use driver::{LinkDriver, wait};
pub use scan::next_device_path;
