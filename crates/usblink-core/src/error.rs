use std::fmt;

/// Failure categories surfaced by the link transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsbErrorKind {
    /// Context initialisation or device enumeration failed.
    Discovery,
    /// No device or interface matched the requested identity.
    NotFound,
    /// Opening the device, selecting its configuration or claiming the interface failed.
    Open,
    /// A transfer was attempted on a control, isochronous or unclassified endpoint.
    UnsupportedTransferType,
    /// A low-level transfer failed for a reason other than a timeout.
    Transfer,
    /// The transfer did not complete before the handle timeout elapsed.
    Timeout,
    /// The device is no longer attached.
    Disconnected,
    /// A device path string could not be parsed.
    PathFormat,
}

/// Error surfaced by every fallible operation in the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsbError {
    kind: UsbErrorKind,
    message: Option<String>,
}

impl UsbError {
    pub const fn new(kind: UsbErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: UsbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> UsbErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Re-tag the error with `kind`, keeping the previous text as context for `op`.
    ///
    /// Disconnects keep their kind so callers can still tell a vanished device apart.
    pub fn reclassify(self, kind: UsbErrorKind, op: &str) -> Self {
        let kind = match self.kind {
            UsbErrorKind::Disconnected => UsbErrorKind::Disconnected,
            _ => kind,
        };
        UsbError::with_message(kind, format!("{op}: {self}"))
    }
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for UsbError {}

pub type UsbResult<T> = Result<T, UsbError>;

/// Outcome of a single failed packet transfer issued through a backend.
///
/// A timeout carries the number of bytes the controller moved before the deadline, which
/// can be non-zero when the timeout raced a partial delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PacketError {
    Timeout { transferred: usize },
    Failed(UsbError),
}

impl PacketError {
    pub fn into_usb_error(self, op: &str) -> UsbError {
        match self {
            PacketError::Timeout { transferred } => UsbError::with_message(
                UsbErrorKind::Timeout,
                format!("{op} timed out after {transferred} bytes"),
            ),
            PacketError::Failed(err) => err.reclassify(UsbErrorKind::Transfer, op),
        }
    }
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::Timeout { transferred } => {
                write!(f, "timeout ({transferred} bytes transferred)")
            }
            PacketError::Failed(err) => err.fmt(f),
        }
    }
}

impl From<UsbError> for PacketError {
    fn from(err: UsbError) -> Self {
        PacketError::Failed(err)
    }
}

/// Result of a single packet transfer: the number of bytes moved on success.
pub type PacketResult = Result<usize, PacketError>;
