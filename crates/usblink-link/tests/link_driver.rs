use std::time::{Duration, Instant};
use usblink_core::{
    DeviceFilter, LinkPath, Session, UsbErrorKind,
    mock::{self, MockBackend, MockDevice, MockEvent, MockRead},
};
use usblink_link::{LinkConfig, LinkDriver, next_device_path, wait};

const LINK_INTERFACE: u8 = 1;

fn link_device(serial: &str) -> MockDevice {
    let device = MockDevice::with_identity(0x20A0, 0x41D5, "Stratify Labs", "StratifyOS", serial);
    let mut cdc = mock::bulk_interface(0, 0x81, 0x01, 64);
    cdc.class_code = 0x02;
    cdc.sub_class_code = 0x02;
    cdc.protocol_code = 0x00;
    device.add_configuration(mock::configuration(vec![
        cdc,
        mock::bulk_interface(LINK_INTERFACE, 0x82, 0x02, 64),
    ]));
    device
}

fn session_with(devices: &[&MockDevice]) -> (MockBackend, Session<MockBackend>) {
    let backend = MockBackend::new();
    for device in devices {
        backend.add_device(device);
    }
    (backend.clone(), Session::new(backend))
}

fn acquisitions(backend: &MockBackend) -> usize {
    backend
        .log()
        .events()
        .iter()
        .filter(|event| matches!(event, MockEvent::ListAcquired(_)))
        .count()
}

#[test]
fn open_selects_device_by_serial_and_uses_last_bulk_endpoint() {
    let abc = link_device("ABC");
    let xyz = link_device("XYZ");
    let (_backend, mut session) = session_with(&[&abc, &xyz]);

    let mut link =
        LinkDriver::open(&mut session, "/usb/20A0/41D5/01/XYZ", &LinkConfig::default())
            .expect("open");
    assert_eq!(link.endpoint(), 0x02);
    assert_eq!(link.path(), &LinkPath::new(0x20A0, 0x41D5, 1, "XYZ"));
    assert_eq!(link.handle().timeout(), Duration::from_millis(10));
    assert_eq!(xyz.claimed_interfaces(), vec![LINK_INTERFACE]);
    assert!(abc.claimed_interfaces().is_empty());

    assert_eq!(link.write(b"hello").expect("write"), 5);
    assert_eq!(xyz.written(0x02), b"hello");

    xyz.queue_read(0x82, MockRead::Data(b"world".to_vec()));
    let mut buf = [0u8; 16];
    assert_eq!(link.read(&mut buf).expect("read"), 5);
    assert_eq!(&buf[..5], b"world");
    assert_eq!(link.read(&mut buf).expect("idle"), 0);
}

#[test]
fn open_reloads_list_on_lookup_miss() {
    let device = link_device("ABC");
    let (backend, mut session) = session_with(&[&device]);

    LinkDriver::open(&mut session, "/usb/20a0/41d5/01/ABC", &LinkConfig::default())
        .expect("open after reload");
    assert_eq!(acquisitions(&backend), 1);
}

#[test]
fn open_retries_once_after_handle_failure() {
    let device = link_device("ABC");
    let (backend, mut session) = session_with(&[&device]);
    session.refresh(&DeviceFilter::all()).expect("refresh");

    device.fail_opens(1);
    let link = LinkDriver::open(&mut session, "/usb/20A0/41D5/01/ABC", &LinkConfig::default())
        .expect("open on retry");
    assert_eq!(acquisitions(&backend), 2);
    drop(link);
    assert_eq!(device.opens(), device.closes());
}

#[test]
fn open_gives_up_after_second_handle_failure() {
    let device = link_device("ABC");
    let (backend, mut session) = session_with(&[&device]);
    session.refresh(&DeviceFilter::all()).expect("refresh");

    // first link open, string fetch during reload, second link open
    device.fail_opens(3);
    let err = LinkDriver::open(&mut session, "/usb/20A0/41D5/01", &LinkConfig::default())
        .err()
        .expect("open fails");
    assert_eq!(err.kind(), UsbErrorKind::Open);
    assert_eq!(acquisitions(&backend), 2);
    assert!(device.claimed_interfaces().is_empty());
}

#[test]
fn open_reports_bad_paths_and_missing_devices() {
    let device = link_device("ABC");
    let (_backend, mut session) = session_with(&[&device]);
    let config = LinkConfig::default();

    let err = LinkDriver::open(&mut session, "/serial/20A0/41D5/01/ABC", &config)
        .err()
        .expect("bad path");
    assert_eq!(err.kind(), UsbErrorKind::PathFormat);

    let err = LinkDriver::open(&mut session, "/usb/20A0/41D5/01/NOPE", &config)
        .err()
        .expect("missing");
    assert_eq!(err.kind(), UsbErrorKind::NotFound);

    let err = LinkDriver::open(&mut session, "/usb/20A0/41D5/05/ABC", &config)
        .err()
        .expect("no bulk endpoint");
    assert_eq!(err.kind(), UsbErrorKind::NotFound);
    assert!(device.claimed_interfaces().is_empty());
}

#[test]
fn flush_discards_pending_input_and_restores_timeout() {
    let device = link_device("ABC");
    let (_backend, mut session) = session_with(&[&device]);
    let config = LinkConfig {
        timeout: Duration::from_millis(40),
        ..LinkConfig::default()
    };
    let mut link = LinkDriver::open(&mut session, "/usb/20A0/41D5/01/ABC", &config).expect("open");

    device.queue_packets(0x82, b"stale bytes", 4);
    assert_eq!(link.flush(), 11);
    assert_eq!(link.handle().timeout(), Duration::from_millis(40));
    assert!(device
        .packets()
        .iter()
        .filter(|packet| packet.address == 0x82)
        .all(|packet| packet.timeout == config.flush_timeout));

    let mut buf = [0u8; 4];
    assert_eq!(link.read(&mut buf).expect("read"), 0);
}

#[test]
fn status_reports_disconnect_and_close_releases() {
    let device = link_device("ABC");
    let (_backend, mut session) = session_with(&[&device]);
    let link = LinkDriver::open(&mut session, "/usb/20A0/41D5/01/ABC", &LinkConfig::default())
        .expect("open");
    link.status().expect("attached");

    device.unplug();
    assert_eq!(
        link.status().expect_err("unplugged").kind(),
        UsbErrorKind::Disconnected
    );

    link.close();
    assert!(device.claimed_interfaces().is_empty());
    assert_eq!(device.opens(), device.closes());
}

#[test]
fn path_cursor_walks_every_link_once() {
    let first = link_device("A1");
    let second = link_device("B2");

    let mouse = MockDevice::with_identity(0x20A0, 0x0001, "Acme", "Mouse", "M1");
    mouse.add_configuration(mock::configuration(vec![mock::bulk_interface(1, 0x81, 0x01, 8)]));

    let no_pair = MockDevice::with_identity(0x20A0, 0x41D6, "Stratify", "Board", "NP");
    let mut setting = mock::bulk_interface(1, 0x81, 0x01, 64);
    setting.endpoints.truncate(1);
    no_pair.add_configuration(mock::configuration(vec![setting]));

    let foreign = MockDevice::with_identity(0x1234, 0x41D5, "Stratify", "Clone", "F1");
    foreign.add_configuration(mock::configuration(vec![mock::bulk_interface(1, 0x81, 0x01, 64)]));

    let (_backend, mut session) = session_with(&[&first, &mouse, &no_pair, &foreign, &second]);
    let config = LinkConfig::default();

    let mut paths = Vec::new();
    let mut last = None;
    while let Some(path) = next_device_path(&mut session, &config, last.as_ref()).expect("scan") {
        paths.push(path.to_string());
        last = Some(path);
    }
    assert_eq!(paths, vec!["/usb/20A0/41D5/01/A1", "/usb/20A0/41D5/01/B2"]);
}

#[test]
fn path_cursor_merges_alternate_settings() {
    let device = MockDevice::with_identity(0x20A0, 0x41D5, "Stratify", "Board", "ALT");
    let mut alternate = mock::bulk_interface(1, 0x83, 0x03, 64);
    alternate.alternate_setting = 1;
    device.add_configuration(mock::configuration(vec![
        mock::bulk_interface(1, 0x82, 0x02, 64),
        alternate,
    ]));
    let (_backend, mut session) = session_with(&[&device]);
    let config = LinkConfig::default();

    let first = next_device_path(&mut session, &config, None)
        .expect("scan")
        .expect("first");
    assert_eq!(first.to_string(), "/usb/20A0/41D5/01/ALT");
    assert_eq!(
        next_device_path(&mut session, &config, Some(&first)).expect("scan"),
        None
    );
}

#[test]
fn unknown_cursor_ends_the_scan() {
    let device = link_device("ABC");
    let (_backend, mut session) = session_with(&[&device]);
    let config = LinkConfig::default();
    next_device_path(&mut session, &config, None).expect("scan");

    let stale = LinkPath::new(0x20A0, 0x41D5, 1, "GONE");
    assert_eq!(
        next_device_path(&mut session, &config, Some(&stale)).expect("scan"),
        None
    );
}

#[test]
fn short_waits_return_immediately() {
    let start = Instant::now();
    wait(1);
    assert!(start.elapsed() < Duration::from_millis(50));

    let start = Instant::now();
    wait(5);
    assert!(start.elapsed() >= Duration::from_millis(5));
}
