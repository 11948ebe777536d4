use std::time::Duration;
use usblink_core::{CandidatePolicy, DEFAULT_TIMEOUT};

/// Vendor id used to narrow fresh enumerations while scanning for links.
pub const DEFAULT_SCAN_VENDOR_ID: u16 = 0x20A0;
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration for [`crate::LinkDriver`] and [`crate::next_device_path`].
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Configuration value selected when opening a link.
    pub configuration: u8,
    /// Per-transfer timeout applied to the opened handle.
    pub timeout: Duration,
    /// Timeout used while draining stale input in [`crate::LinkDriver::flush`].
    pub flush_timeout: Duration,
    /// Vendor id filter for path scans; `0` scans every device.
    pub scan_vendor_id: u16,
    pub candidates: CandidatePolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            configuration: 1,
            timeout: DEFAULT_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            scan_vendor_id: DEFAULT_SCAN_VENDOR_ID,
            candidates: CandidatePolicy::default(),
        }
    }
}
