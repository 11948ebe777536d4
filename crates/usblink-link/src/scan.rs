use crate::LinkConfig;
use tracing::debug;
use usblink_core::{DeviceFilter, LinkPath, Session, UsbBackend, UsbResult};

/// Cursor over the link paths visible through `session`.
///
/// Passing `None` starts a new scan: the device list is refreshed, narrowed to
/// [`LinkConfig::scan_vendor_id`], and the first path is returned. Passing the previous
/// result returns the path after it in the same list, or `None` once the scan is exhausted
/// or `last` is no longer present.
///
/// A path is produced for every candidate interface of configuration 0 that owns both a
/// bulk IN and a bulk OUT endpoint. Alternate settings of one interface yield one path.
pub fn next_device_path<B: UsbBackend>(
    session: &mut Session<B>,
    config: &LinkConfig,
    last: Option<&LinkPath>,
) -> UsbResult<Option<LinkPath>> {
    if last.is_none() {
        session.refresh(&DeviceFilter::all().with_vendor_id(config.scan_vendor_id))?;
    }

    let paths = candidate_paths(session, config);
    let next = match last {
        None => paths.into_iter().next(),
        Some(last) => paths
            .iter()
            .position(|path| path == last)
            .and_then(|index| paths.get(index + 1).cloned()),
    };
    Ok(next)
}

fn candidate_paths<B: UsbBackend>(session: &Session<B>, config: &LinkConfig) -> Vec<LinkPath> {
    let policy = &config.candidates;
    let mut paths: Vec<LinkPath> = Vec::new();
    for device in session.device_list() {
        if !policy.is_device_candidate(device) {
            continue;
        }
        let configuration = match device.configuration(0) {
            Ok(configuration) => configuration,
            Err(err) => {
                debug!(
                    bus = device.bus_number(),
                    address = device.address(),
                    %err,
                    "skipping device without readable configuration"
                );
                continue;
            }
        };
        for setting in configuration.interfaces().flat_map(|iface| iface.descriptors()) {
            if !policy.is_interface_candidate(setting, device.strings()) || !setting.has_bulk_pair()
            {
                continue;
            }
            match LinkPath::for_device(device, setting.interface_number) {
                Ok(path) if !paths.contains(&path) => paths.push(path),
                Ok(_) => {}
                Err(err) => debug!(%err, "skipping device without readable descriptor"),
            }
        }
    }
    paths
}
