//! Packetised transfers over a single endpoint.
//!
//! The access library moves whole packets; callers ask for arbitrary byte counts. Writes
//! are split into max-packet-size chunks and terminated with a zero-length packet when the
//! last chunk was full. Reads go through a per-endpoint read-ahead buffer so bytes from a
//! partially consumed packet are served to the next read in order.

use crate::{
    PacketError, PacketResult, UsbError, UsbErrorKind, UsbResult, backend::UsbDeviceHandle,
    descriptor::TransferType, endpoint::Endpoint,
};
use std::time::Duration;
use tracing::trace;

/// Read-ahead bytes for one endpoint address.
#[derive(Debug, Default)]
pub(crate) struct ReadBuffer {
    address: u8,
    data: Vec<u8>,
}

impl ReadBuffer {
    pub(crate) fn new(address: u8) -> Self {
        Self {
            address,
            data: Vec::new(),
        }
    }

    pub(crate) fn address(&self) -> u8 {
        self.address
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    /// Move up to `dest.len()` bytes from the front of the buffer into `dest`.
    fn take_into(&mut self, dest: &mut [u8]) -> usize {
        let count = dest.len().min(self.data.len());
        if count > 0 {
            dest[..count].copy_from_slice(&self.data[..count]);
            self.data.drain(..count);
        }
        count
    }
}

fn ensure_supported(endpoint: &Endpoint) -> UsbResult<()> {
    match endpoint.transfer_type() {
        TransferType::Bulk | TransferType::Interrupt => Ok(()),
        _ => Err(unsupported_error(endpoint)),
    }
}

fn unsupported_error(endpoint: &Endpoint) -> UsbError {
    UsbError::with_message(
        UsbErrorKind::UnsupportedTransferType,
        format!(
            "endpoint 0x{:02x} has transfer type {:?}",
            endpoint.address(),
            endpoint.transfer_type()
        ),
    )
}

/// Issue one IN packet on `endpoint`.
///
/// A read that times out after the controller already delivered bytes reports those bytes
/// as a successful transfer.
pub fn read_packet<H: UsbDeviceHandle>(
    handle: &H,
    endpoint: &Endpoint,
    buf: &mut [u8],
    timeout: Duration,
) -> PacketResult {
    let address = endpoint.read_address();
    let result = match endpoint.transfer_type() {
        TransferType::Bulk => handle.read_bulk(address, buf, timeout),
        TransferType::Interrupt => handle.read_interrupt(address, buf, timeout),
        _ => return Err(PacketError::Failed(unsupported_error(endpoint))),
    };
    match result {
        Err(PacketError::Timeout { transferred }) if transferred > 0 => Ok(transferred),
        other => other,
    }
}

/// Issue one OUT packet on `endpoint`. An empty `buf` sends a zero-length packet.
pub fn write_packet<H: UsbDeviceHandle>(
    handle: &H,
    endpoint: &Endpoint,
    buf: &[u8],
    timeout: Duration,
) -> PacketResult {
    let address = endpoint.write_address();
    match endpoint.transfer_type() {
        TransferType::Bulk => handle.write_bulk(address, buf, timeout),
        TransferType::Interrupt => handle.write_interrupt(address, buf, timeout),
        _ => Err(PacketError::Failed(unsupported_error(endpoint))),
    }
}

/// Send all of `data`, one max-packet-size chunk per transfer.
///
/// When the final chunk filled a whole packet a trailing zero-length packet marks the end
/// of the logical transfer. The first failing packet aborts the write.
pub fn write_all<H: UsbDeviceHandle>(
    handle: &H,
    endpoint: &Endpoint,
    data: &[u8],
    timeout: Duration,
) -> UsbResult<usize> {
    ensure_supported(endpoint)?;
    let max_packet_size = packet_size(endpoint)?;

    let mut transferred = 0;
    let mut last = 0;
    while transferred < data.len() {
        let chunk = &data[transferred..data.len().min(transferred + max_packet_size)];
        last = write_packet(handle, endpoint, chunk, timeout).map_err(|err| {
            err.into_usb_error(&format!(
                "write endpoint 0x{:02x}",
                endpoint.write_address()
            ))
        })?;
        if last == 0 {
            return Err(UsbError::with_message(
                UsbErrorKind::Transfer,
                format!(
                    "endpoint 0x{:02x} accepted no data after {transferred} bytes",
                    endpoint.write_address()
                ),
            ));
        }
        trace!(endpoint = endpoint.write_address(), bytes = last, "packet out");
        transferred += last;
    }

    if last == max_packet_size {
        trace!(endpoint = endpoint.write_address(), "zero-length packet");
        write_packet(handle, endpoint, &[], timeout)
            .map_err(|err| err.into_usb_error("zero-length packet"))?;
    }
    Ok(transferred)
}

/// Fill `out` from `buffer`, pulling whole packets from `endpoint` whenever it runs dry.
///
/// A timeout or zero-length packet ends the read early with the bytes gathered so far, which
/// may be none. Any other failure is returned unless some bytes were already delivered.
pub(crate) fn read_buffered<H: UsbDeviceHandle>(
    handle: &H,
    endpoint: &Endpoint,
    buffer: &mut ReadBuffer,
    out: &mut [u8],
    timeout: Duration,
) -> UsbResult<usize> {
    ensure_supported(endpoint)?;
    let max_packet_size = packet_size(endpoint)?;

    let mut copied = buffer.take_into(out);
    while copied < out.len() {
        buffer.data.resize(max_packet_size, 0);
        match read_packet(handle, endpoint, &mut buffer.data, timeout) {
            Ok(received) if received > 0 => {
                trace!(endpoint = endpoint.read_address(), bytes = received, "packet in");
                buffer.data.truncate(received.min(max_packet_size));
            }
            Ok(_) | Err(PacketError::Timeout { .. }) => {
                buffer.data.clear();
                return Ok(copied);
            }
            Err(PacketError::Failed(err)) => {
                buffer.data.clear();
                if copied > 0 {
                    trace!(%err, copied, "read failed after partial delivery");
                    return Ok(copied);
                }
                return Err(err.reclassify(
                    UsbErrorKind::Transfer,
                    &format!("read endpoint 0x{:02x}", endpoint.read_address()),
                ));
            }
        }
        copied += buffer.take_into(&mut out[copied..]);
    }
    Ok(copied)
}

fn packet_size(endpoint: &Endpoint) -> UsbResult<usize> {
    match endpoint.max_packet_size() {
        0 => Err(UsbError::with_message(
            UsbErrorKind::Transfer,
            format!("endpoint 0x{:02x} reports a zero max packet size", endpoint.address()),
        )),
        size => Ok(size as usize),
    }
}
