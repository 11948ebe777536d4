use usblink_core::{
    Device, DeviceHandle, StringTable, UsbErrorKind,
    mock::{self, MockDevice, MockHandle, MockPacket, MockRead, MockTransfer, MockWrite},
};

const LINK_INTERFACE: u8 = 1;
const BULK_IN: u8 = 0x81;
const BULK_OUT: u8 = 0x02;
const INTERRUPT_IN: u8 = 0x83;
const ISO_IN: u8 = 0x84;
const MAX_PACKET: u16 = 8;

fn link_device() -> MockDevice {
    let device = MockDevice::with_identity(0x20A0, 0x41D5, "Acme", "StratifyOS", "SN001");
    let mut link = mock::bulk_interface(LINK_INTERFACE, BULK_IN, BULK_OUT, MAX_PACKET);
    link.endpoints.push(mock::endpoint(INTERRUPT_IN, 0x03, MAX_PACKET));
    link.endpoints.push(mock::endpoint(ISO_IN, 0x01, MAX_PACKET));
    let mut control = mock::bulk_interface(0, 0x85, 0x06, 64);
    control.class_code = 0x02;
    device.add_configuration(mock::configuration(vec![control, link]));
    device
}

fn open(device: &MockDevice) -> DeviceHandle<MockHandle> {
    Device::with_strings(device.clone(), StringTable::default())
        .open_handle(None, LINK_INTERFACE)
        .expect("open link interface")
}

fn out_packets(device: &MockDevice) -> Vec<MockPacket> {
    device
        .packets()
        .into_iter()
        .filter(|packet| packet.address == BULK_OUT)
        .collect()
}

fn counting(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

#[test]
fn write_packet_count_follows_zero_length_rule() {
    let max = MAX_PACKET as usize;
    for len in [0, 1, 7, 8, 9, 15, 16, 17, 64] {
        let device = link_device();
        let mut handle = open(&device);
        let data = counting(len);

        assert_eq!(handle.write(BULK_OUT, &data).expect("write"), len);

        let packets = out_packets(&device);
        let zlp = usize::from(len > 0 && len % max == 0);
        assert_eq!(packets.len(), len.div_ceil(max) + zlp, "len {len}");
        assert!(packets.iter().all(|packet| packet.len <= max));
        assert_eq!(device.written(BULK_OUT), data);
        if zlp == 1 {
            assert_eq!(packets.last().map(|packet| packet.len), Some(0));
        }
    }
}

#[test]
fn short_packets_are_resumed_from_the_accepted_offset() {
    let device = link_device();
    let mut handle = open(&device);
    device.queue_write(BULK_OUT, MockWrite::Short(3));
    let data = counting(10);

    assert_eq!(handle.write(BULK_OUT, &data).expect("write"), 10);

    let lens: Vec<usize> = out_packets(&device).iter().map(|p| p.len).collect();
    assert_eq!(lens, vec![8, 7]);
    assert_eq!(device.written(BULK_OUT), data);
}

#[test]
fn write_timeout_is_an_error() {
    let device = link_device();
    let mut handle = open(&device);
    device.queue_write(BULK_OUT, MockWrite::Timeout);

    let err = handle.write(BULK_OUT, &[1, 2, 3]).expect_err("timeout");
    assert_eq!(err.kind(), UsbErrorKind::Timeout);
}

#[test]
fn zero_length_packet_failure_fails_the_write() {
    let device = link_device();
    let mut handle = open(&device);
    device.queue_write(BULK_OUT, MockWrite::Accept);
    device.queue_write(BULK_OUT, MockWrite::Fail(UsbErrorKind::Transfer));

    let err = handle.write(BULK_OUT, &counting(8)).expect_err("zlp failure");
    assert_eq!(err.kind(), UsbErrorKind::Transfer);
}

#[test]
fn odd_sized_reads_preserve_stream_order() {
    let device = link_device();
    let mut handle = open(&device);
    let stream = counting(80);
    device.queue_packets(BULK_IN, &stream, MAX_PACKET as usize);

    let mut received = Vec::new();
    for size in [3, 5, 10].into_iter().cycle() {
        let mut buf = vec![0u8; size];
        let n = handle.read(BULK_IN, &mut buf).expect("read");
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, stream);
}

#[test]
fn leftover_packet_bytes_are_kept_for_the_next_read() {
    let device = link_device();
    let mut handle = open(&device);
    device.queue_packets(BULK_IN, &counting(8), MAX_PACKET as usize);

    let mut buf = [0u8; 3];
    assert_eq!(handle.read(BULK_IN, &mut buf).expect("read"), 3);
    assert_eq!(handle.buffered(BULK_IN), 5);

    let mut rest = [0u8; 5];
    assert_eq!(handle.read(BULK_IN, &mut rest).expect("read"), 5);
    assert_eq!(rest, [3, 4, 5, 6, 7]);
    let reads = device
        .packets()
        .iter()
        .filter(|packet| packet.address == BULK_IN)
        .count();
    assert_eq!(reads, 1);
}

#[test]
fn idle_endpoint_returns_zero_bytes() {
    let device = link_device();
    let mut handle = open(&device);

    let mut buf = [0u8; 16];
    assert_eq!(handle.read(BULK_IN, &mut buf).expect("idle read"), 0);
}

#[test]
fn zero_length_packet_ends_a_read() {
    let device = link_device();
    let mut handle = open(&device);
    device.queue_read(BULK_IN, MockRead::Data(vec![9; 8]));
    device.queue_read(BULK_IN, MockRead::Data(Vec::new()));
    device.queue_read(BULK_IN, MockRead::Data(vec![1; 8]));

    let mut buf = [0u8; 32];
    assert_eq!(handle.read(BULK_IN, &mut buf).expect("read"), 8);
    assert_eq!(handle.read(BULK_IN, &mut buf).expect("read"), 8);
    assert_eq!(&buf[..8], &[1; 8]);
}

#[test]
fn timeout_with_partial_data_counts_as_success() {
    for address in [BULK_IN, INTERRUPT_IN] {
        let device = link_device();
        let mut handle = open(&device);
        device.queue_read(address, MockRead::Timeout(vec![1, 2, 3]));

        let mut buf = [0u8; 8];
        assert_eq!(handle.read(address, &mut buf).expect("partial"), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }
}

#[test]
fn read_failure_after_partial_delivery_returns_the_bytes() {
    let device = link_device();
    let mut handle = open(&device);
    device.queue_read(BULK_IN, MockRead::Data(counting(8)));
    device.queue_read(BULK_IN, MockRead::Fail(UsbErrorKind::Transfer));

    let mut buf = [0u8; 12];
    assert_eq!(handle.read(BULK_IN, &mut buf).expect("partial"), 8);

    device.queue_read(BULK_IN, MockRead::Fail(UsbErrorKind::Transfer));
    let err = handle.read(BULK_IN, &mut buf).expect_err("nothing copied");
    assert_eq!(err.kind(), UsbErrorKind::Transfer);
}

#[test]
fn interrupt_endpoints_use_interrupt_transfers() {
    let device = link_device();
    let mut handle = open(&device);
    device.queue_read(INTERRUPT_IN, MockRead::Data(vec![0xAA; 4]));

    let mut buf = [0u8; 4];
    assert_eq!(handle.read(INTERRUPT_IN, &mut buf).expect("read"), 4);
    let packet = device.packets().pop().expect("packet");
    assert_eq!(packet.transfer, MockTransfer::Interrupt);
    assert_eq!(packet.address, INTERRUPT_IN);
}

#[test]
fn unsupported_endpoints_are_rejected() {
    let device = link_device();
    let mut handle = open(&device);
    let mut buf = [0u8; 4];

    let err = handle.read(ISO_IN, &mut buf).expect_err("isochronous");
    assert_eq!(err.kind(), UsbErrorKind::UnsupportedTransferType);
    let err = handle.write(ISO_IN, &buf).expect_err("isochronous");
    assert_eq!(err.kind(), UsbErrorKind::UnsupportedTransferType);

    let err = handle.read(0x0F, &mut buf).expect_err("unknown endpoint");
    assert_eq!(err.kind(), UsbErrorKind::UnsupportedTransferType);
    assert!(device.packets().is_empty());
}

#[test]
fn unplugged_device_reports_disconnect() {
    let device = link_device();
    let mut handle = open(&device);
    device.unplug();

    let mut buf = [0u8; 4];
    let err = handle.read(BULK_IN, &mut buf).expect_err("unplugged");
    assert_eq!(err.kind(), UsbErrorKind::Disconnected);
    let err = handle.write(BULK_OUT, &buf).expect_err("unplugged");
    assert_eq!(err.kind(), UsbErrorKind::Disconnected);
}

#[test]
fn handle_timeout_is_passed_to_every_packet() {
    let device = link_device();
    let mut handle = open(&device);
    assert_eq!(handle.timeout(), usblink_core::DEFAULT_TIMEOUT);
    handle.set_timeout(std::time::Duration::from_millis(250));

    handle.write(BULK_OUT, &[1]).expect("write");
    assert!(device
        .packets()
        .iter()
        .all(|packet| packet.timeout == std::time::Duration::from_millis(250)));
}
