//! Scriptable in-memory backend for exercising discovery and transfers without hardware.
//!
//! Devices are described with regular descriptor values. IN endpoints replay queued
//! packets; OUT endpoints record what they receive. Every enumeration, open, claim and
//! release is appended to a shared [`EventLog`].

use crate::{
    PacketError, PacketResult, UsbError, UsbErrorKind, UsbResult,
    backend::{UsbBackend, UsbDevice, UsbDeviceHandle},
    descriptor::{
        ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, Interface,
        InterfaceDescriptor, parse_configuration,
    },
};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockEvent {
    ListAcquired(usize),
    ListReleased(usize),
    Opened(usize),
    Closed(usize),
    ConfigurationSet { device: usize, configuration: u8 },
    Claimed { device: usize, interface: u8 },
    Released { device: usize, interface: u8 },
}

/// Shared, ordered record of backend activity.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Arc<Mutex<Vec<MockEvent>>>);

impl EventLog {
    fn push(&self, event: MockEvent) {
        lock(&self.0).push(event);
    }

    pub fn events(&self) -> Vec<MockEvent> {
        lock(&self.0).clone()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted response to one IN packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockRead {
    Data(Vec<u8>),
    /// Time out after delivering the given bytes.
    Timeout(Vec<u8>),
    Fail(UsbErrorKind),
}

/// Scripted response to one OUT packet. Unscripted packets are accepted in full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockWrite {
    Accept,
    Short(usize),
    Timeout,
    Fail(UsbErrorKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockTransfer {
    Bulk,
    Interrupt,
}

/// One packet issued against a mock device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockPacket {
    pub transfer: MockTransfer,
    /// Endpoint address including the direction bit.
    pub address: u8,
    /// Buffer length offered to the transfer.
    pub len: usize,
    /// Payload for OUT packets.
    pub data: Vec<u8>,
    pub timeout: Duration,
}

struct DeviceState {
    id: usize,
    log: EventLog,
    attached: bool,
    descriptor: DeviceDescriptor,
    strings: Vec<String>,
    configurations: Vec<ConfigurationDescriptor>,
    active_configuration: usize,
    bus_number: u8,
    address: u8,
    ports: Vec<u8>,
    open_failures: usize,
    claim_failure: Option<UsbErrorKind>,
    claimed: Vec<u8>,
    reads: HashMap<u8, VecDeque<MockRead>>,
    writes: HashMap<u8, VecDeque<MockWrite>>,
    packets: Vec<MockPacket>,
    opens: usize,
    closes: usize,
}

struct ListToken {
    id: usize,
    log: EventLog,
}

impl Drop for ListToken {
    fn drop(&mut self) {
        self.log.push(MockEvent::ListReleased(self.id));
    }
}

/// In-memory device. Clones share state.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    list: Option<Arc<ListToken>>,
}

impl fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("MockDevice")
            .field("id", &state.id)
            .field("vendor_id", &state.descriptor.vendor_id)
            .field("product_id", &state.descriptor.product_id)
            .finish()
    }
}

impl MockDevice {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        let state = DeviceState {
            id: 0,
            log: EventLog::default(),
            attached: true,
            descriptor,
            strings: Vec::new(),
            configurations: Vec::new(),
            active_configuration: 0,
            bus_number: 1,
            address: 1,
            ports: vec![1],
            open_failures: 0,
            claim_failure: None,
            claimed: Vec::new(),
            reads: HashMap::new(),
            writes: HashMap::new(),
            packets: Vec::new(),
            opens: 0,
            closes: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            list: None,
        }
    }

    /// Device with the given identity whose strings are manufacturer, product and serial.
    pub fn with_identity(
        vendor_id: u16,
        product_id: u16,
        manufacturer: &str,
        product: &str,
        serial: &str,
    ) -> Self {
        let device = Self::new(DeviceDescriptor {
            usb_version: 0x0200,
            max_packet_size: 64,
            vendor_id,
            product_id,
            manufacturer_string_index: 1,
            product_string_index: 2,
            serial_number_string_index: 3,
            num_configurations: 0,
            ..Default::default()
        });
        device.set_strings([manufacturer, product, serial]);
        device
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.state)
    }

    pub fn id(&self) -> usize {
        self.state().id
    }

    /// Strings at indices 1, 2, ... in order.
    pub fn set_strings<I, S>(&self, strings: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().strings = strings.into_iter().map(Into::into).collect();
    }

    /// Append a configuration; the first one added is active.
    pub fn add_configuration(&self, config: ConfigurationDescriptor) {
        let mut state = self.state();
        state.configurations.push(config);
        state.descriptor.num_configurations = state.configurations.len() as u8;
    }

    /// Append a configuration described by a raw GET_DESCRIPTOR blob.
    pub fn add_configuration_bytes(&self, bytes: &[u8]) -> UsbResult<()> {
        self.add_configuration(parse_configuration(bytes)?);
        Ok(())
    }

    pub fn set_location(&self, bus_number: u8, address: u8, ports: Vec<u8>) {
        let mut state = self.state();
        state.bus_number = bus_number;
        state.address = address;
        state.ports = ports;
    }

    /// Fail the next `count` opens with an access error.
    pub fn fail_opens(&self, count: usize) {
        self.state().open_failures = count;
    }

    pub fn fail_claims(&self, kind: Option<UsbErrorKind>) {
        self.state().claim_failure = kind;
    }

    /// Detach the device: it leaves future enumerations and its handles report a disconnect.
    pub fn unplug(&self) {
        self.state().attached = false;
    }

    pub fn plug(&self) {
        self.state().attached = true;
    }

    pub fn queue_read(&self, address: u8, read: MockRead) {
        self.state()
            .reads
            .entry(address | 0x80)
            .or_default()
            .push_back(read);
    }

    /// Queue `data` split into packets of at most `packet_size` bytes.
    pub fn queue_packets(&self, address: u8, data: &[u8], packet_size: usize) {
        for chunk in data.chunks(packet_size.max(1)) {
            self.queue_read(address, MockRead::Data(chunk.to_vec()));
        }
    }

    pub fn queue_write(&self, address: u8, write: MockWrite) {
        self.state()
            .writes
            .entry(address & 0x7F)
            .or_default()
            .push_back(write);
    }

    pub fn packets(&self) -> Vec<MockPacket> {
        self.state().packets.clone()
    }

    /// Concatenated payload of every OUT packet sent to `address`.
    pub fn written(&self, address: u8) -> Vec<u8> {
        self.state()
            .packets
            .iter()
            .filter(|packet| packet.address == address & 0x7F)
            .flat_map(|packet| packet.data.iter().copied())
            .collect()
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.state().claimed.clone()
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    fn attach_to(&self, id: usize, log: EventLog) {
        let mut state = self.state();
        state.id = id;
        state.log = log;
    }

    fn snapshot(&self, list: Arc<ListToken>) -> Self {
        Self {
            state: self.state.clone(),
            list: Some(list),
        }
    }

    fn ensure_attached(&self) -> UsbResult<()> {
        if self.state().attached {
            Ok(())
        } else {
            Err(UsbError::with_message(
                UsbErrorKind::Disconnected,
                "mock device unplugged",
            ))
        }
    }
}

impl UsbDevice for MockDevice {
    type Handle = MockHandle;

    fn device_descriptor(&self) -> UsbResult<DeviceDescriptor> {
        Ok(self.state().descriptor.clone())
    }

    fn active_config_descriptor(&self) -> UsbResult<ConfigurationDescriptor> {
        let state = self.state();
        state
            .configurations
            .get(state.active_configuration)
            .cloned()
            .ok_or_else(|| UsbError::with_message(UsbErrorKind::NotFound, "device is unconfigured"))
    }

    fn config_descriptor(&self, index: u8) -> UsbResult<ConfigurationDescriptor> {
        self.state()
            .configurations
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                UsbError::with_message(UsbErrorKind::NotFound, format!("no configuration {index}"))
            })
    }

    fn bus_number(&self) -> u8 {
        self.state().bus_number
    }

    fn address(&self) -> u8 {
        self.state().address
    }

    fn port_number(&self) -> u8 {
        self.state().ports.last().copied().unwrap_or(0)
    }

    fn port_numbers(&self) -> UsbResult<Vec<u8>> {
        Ok(self.state().ports.clone())
    }

    fn open(&self) -> UsbResult<MockHandle> {
        self.ensure_attached()?;
        let mut state = self.state();
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(UsbError::with_message(UsbErrorKind::Open, "access denied"));
        }
        state.opens += 1;
        state.log.push(MockEvent::Opened(state.id));
        drop(state);
        Ok(MockHandle {
            device: Self {
                state: self.state.clone(),
                list: None,
            },
        })
    }
}

/// Open connection to a [`MockDevice`]. Dropping it counts as a close.
pub struct MockHandle {
    device: MockDevice,
}

impl fmt::Debug for MockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHandle")
            .field("device", &self.device)
            .finish()
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.device.state();
        state.closes += 1;
        state.log.push(MockEvent::Closed(state.id));
    }
}

impl MockHandle {
    fn read(
        &self,
        transfer: MockTransfer,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> PacketResult {
        self.device.ensure_attached()?;
        let mut state = self.device.state();
        state.packets.push(MockPacket {
            transfer,
            address: endpoint,
            len: buf.len(),
            data: Vec::new(),
            timeout,
        });
        let next = state
            .reads
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        match next {
            Some(MockRead::Data(data)) => Ok(copy_packet(&data, buf)),
            Some(MockRead::Timeout(data)) => Err(PacketError::Timeout {
                transferred: copy_packet(&data, buf),
            }),
            Some(MockRead::Fail(kind)) => Err(PacketError::Failed(UsbError::with_message(
                kind,
                "scripted read failure",
            ))),
            None => Err(PacketError::Timeout { transferred: 0 }),
        }
    }

    fn write(
        &self,
        transfer: MockTransfer,
        endpoint: u8,
        buf: &[u8],
        timeout: Duration,
    ) -> PacketResult {
        self.device.ensure_attached()?;
        let mut state = self.device.state();
        let scripted = state
            .writes
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockWrite::Accept);
        let accepted = match scripted {
            MockWrite::Accept => buf.len(),
            MockWrite::Short(len) => len.min(buf.len()),
            MockWrite::Timeout => 0,
            MockWrite::Fail(kind) => {
                return Err(PacketError::Failed(UsbError::with_message(
                    kind,
                    "scripted write failure",
                )));
            }
        };
        state.packets.push(MockPacket {
            transfer,
            address: endpoint,
            len: buf.len(),
            data: buf[..accepted].to_vec(),
            timeout,
        });
        match scripted {
            MockWrite::Timeout => Err(PacketError::Timeout { transferred: 0 }),
            _ => Ok(accepted),
        }
    }
}

fn copy_packet(data: &[u8], buf: &mut [u8]) -> usize {
    let len = data.len().min(buf.len());
    buf[..len].copy_from_slice(&data[..len]);
    len
}

impl UsbDeviceHandle for MockHandle {
    fn read_string_ascii(&self, index: u8) -> UsbResult<String> {
        let state = self.device.state();
        index
            .checked_sub(1)
            .and_then(|slot| state.strings.get(slot as usize))
            .cloned()
            .ok_or_else(|| {
                UsbError::with_message(UsbErrorKind::NotFound, format!("no string {index}"))
            })
    }

    fn active_configuration(&self) -> UsbResult<u8> {
        self.device.ensure_attached()?;
        let state = self.device.state();
        Ok(state
            .configurations
            .get(state.active_configuration)
            .map_or(0, |config| config.configuration_value))
    }

    fn set_active_configuration(&mut self, configuration: u8) -> UsbResult<()> {
        self.device.ensure_attached()?;
        let mut state = self.device.state();
        let index = state
            .configurations
            .iter()
            .position(|config| config.configuration_value == configuration)
            .ok_or_else(|| {
                UsbError::with_message(
                    UsbErrorKind::NotFound,
                    format!("no configuration value {configuration}"),
                )
            })?;
        state.active_configuration = index;
        let device = state.id;
        state.log.push(MockEvent::ConfigurationSet {
            device,
            configuration,
        });
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> UsbResult<()> {
        self.device.ensure_attached()?;
        let mut state = self.device.state();
        if let Some(kind) = state.claim_failure {
            return Err(UsbError::with_message(kind, "scripted claim failure"));
        }
        if state.claimed.contains(&interface) {
            return Err(UsbError::with_message(
                UsbErrorKind::Open,
                format!("interface {interface} is busy"),
            ));
        }
        state.claimed.push(interface);
        let device = state.id;
        state.log.push(MockEvent::Claimed { device, interface });
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> UsbResult<()> {
        let mut state = self.device.state();
        let position = state
            .claimed
            .iter()
            .position(|claimed| *claimed == interface)
            .ok_or_else(|| {
                UsbError::with_message(
                    UsbErrorKind::NotFound,
                    format!("interface {interface} not claimed"),
                )
            })?;
        state.claimed.remove(position);
        let device = state.id;
        state.log.push(MockEvent::Released { device, interface });
        Ok(())
    }

    fn set_alternate_setting(&mut self, _interface: u8, _setting: u8) -> UsbResult<()> {
        self.device.ensure_attached()
    }

    fn clear_halt(&mut self, _endpoint: u8) -> UsbResult<()> {
        self.device.ensure_attached()
    }

    fn reset(&mut self) -> UsbResult<()> {
        self.device.ensure_attached()
    }

    fn kernel_driver_active(&self, _interface: u8) -> UsbResult<bool> {
        self.device.ensure_attached().map(|()| false)
    }

    fn detach_kernel_driver(&mut self, _interface: u8) -> UsbResult<()> {
        self.device.ensure_attached()
    }

    fn attach_kernel_driver(&mut self, _interface: u8) -> UsbResult<()> {
        self.device.ensure_attached()
    }

    fn set_auto_detach_kernel_driver(&mut self, _enable: bool) -> UsbResult<()> {
        Ok(())
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> PacketResult {
        self.read(MockTransfer::Bulk, endpoint, buf, timeout)
    }

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> PacketResult {
        self.write(MockTransfer::Bulk, endpoint, buf, timeout)
    }

    fn read_interrupt(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> PacketResult {
        self.read(MockTransfer::Interrupt, endpoint, buf, timeout)
    }

    fn write_interrupt(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> PacketResult {
        self.write(MockTransfer::Interrupt, endpoint, buf, timeout)
    }
}

struct BackendState {
    devices: Mutex<Vec<MockDevice>>,
    log: EventLog,
    lists: AtomicUsize,
    enumeration_failure: Mutex<Option<UsbErrorKind>>,
}

/// In-memory access library. Clones share the same device set and event log.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<BackendState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BackendState {
                devices: Mutex::new(Vec::new()),
                log: EventLog::default(),
                lists: AtomicUsize::new(0),
                enumeration_failure: Mutex::new(None),
            }),
        }
    }

    /// Attach `device`; it is reported by every later enumeration while plugged in.
    pub fn add_device(&self, device: &MockDevice) {
        let mut devices = lock(&self.state.devices);
        device.attach_to(devices.len(), self.state.log.clone());
        devices.push(device.clone());
    }

    pub fn log(&self) -> EventLog {
        self.state.log.clone()
    }

    pub fn fail_enumeration(&self, kind: Option<UsbErrorKind>) {
        *lock(&self.state.enumeration_failure) = kind;
    }
}

impl UsbBackend for MockBackend {
    type Device = MockDevice;

    fn devices(&self) -> UsbResult<Vec<MockDevice>> {
        if let Some(kind) = *lock(&self.state.enumeration_failure) {
            return Err(UsbError::with_message(kind, "scripted enumeration failure"));
        }
        let id = self.state.lists.fetch_add(1, Ordering::SeqCst);
        self.state.log.push(MockEvent::ListAcquired(id));
        let token = Arc::new(ListToken {
            id,
            log: self.state.log.clone(),
        });
        Ok(lock(&self.state.devices)
            .iter()
            .filter(|device| device.state().attached)
            .map(|device| device.snapshot(token.clone()))
            .collect())
    }
}

/// Interface setting with one bulk IN and one bulk OUT endpoint.
pub fn bulk_interface(
    interface_number: u8,
    in_address: u8,
    out_address: u8,
    max_packet_size: u16,
) -> InterfaceDescriptor {
    InterfaceDescriptor {
        interface_number,
        alternate_setting: 0,
        class_code: 0xFF,
        sub_class_code: 0x50,
        protocol_code: 0x51,
        interface_string_index: 0,
        extra: Vec::new(),
        endpoints: vec![
            endpoint(in_address | 0x80, 0x02, max_packet_size),
            endpoint(out_address & 0x7F, 0x02, max_packet_size),
        ],
    }
}

pub fn endpoint(address: u8, attributes: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor {
        address,
        attributes,
        max_packet_size,
        ..Default::default()
    }
}

/// Configuration value 1 holding `settings`, grouped by interface number.
pub fn configuration(settings: Vec<InterfaceDescriptor>) -> ConfigurationDescriptor {
    let mut interfaces: Vec<Interface> = Vec::new();
    for setting in settings {
        match interfaces
            .iter_mut()
            .find(|iface| iface.number() == Some(setting.interface_number))
        {
            Some(iface) => iface.alternate_settings.push(setting),
            None => interfaces.push(Interface {
                alternate_settings: vec![setting],
            }),
        }
    }
    ConfigurationDescriptor {
        num_interfaces: interfaces.len() as u8,
        configuration_value: 1,
        attributes: 0x80,
        max_power: 50,
        interfaces,
        ..Default::default()
    }
}
