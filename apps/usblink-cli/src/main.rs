use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::{
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{signal, task};
use tracing::{debug, info};
use usblink_core::{DeviceFilter, EmptyStringPolicy};
use usblink_link::{LinkConfig, LinkDriver, next_device_path};
use usblink_rusb::open_session;

#[derive(Debug, Parser)]
#[command(name = "usblink-cli")]
#[command(about = "Inspect and talk to USB link devices", long_about = None)]
struct Args {
    /// Per-transfer timeout in milliseconds
    #[arg(long, default_value_t = 10)]
    timeout_ms: u64,
    /// Vendor ID used to narrow path scans (0 scans every device)
    #[arg(long, value_parser = parse_hex_u16, default_value = "0x20A0")]
    scan_vendor_id: u16,
    /// Ignore devices whose string descriptors cannot be read
    #[arg(long)]
    reject_empty_strings: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List attached USB devices
    List {
        /// Only list devices with this vendor ID
        #[arg(long, value_parser = parse_hex_u16)]
        vendor_id: Option<u16>,
        /// Only list devices with this product ID
        #[arg(long, value_parser = parse_hex_u16)]
        product_id: Option<u16>,
    },
    /// Print the path of every link interface
    Paths,
    /// Write text to a link
    Send {
        /// Link path, e.g. /usb/20A0/41D5/01/SERIAL
        path: String,
        text: String,
    },
    /// Stream bytes received on a link to stdout until Ctrl-C
    Monitor {
        /// Link path, e.g. /usb/20A0/41D5/01/SERIAL
        path: String,
    },
}

fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u16::from_str_radix(digits, 16).map_err(|err| format!("invalid hex id {value:?}: {err}"))
}

impl Args {
    fn link_config(&self) -> LinkConfig {
        let mut config = LinkConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            scan_vendor_id: self.scan_vendor_id,
            ..LinkConfig::default()
        };
        if self.reject_empty_strings {
            config.candidates.empty_strings = EmptyStringPolicy::Reject;
        }
        config
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.link_config();

    match args.command {
        Command::List {
            vendor_id,
            product_id,
        } => {
            let mut filter = DeviceFilter::all();
            if let Some(vendor_id) = vendor_id {
                filter = filter.with_vendor_id(vendor_id);
            }
            if let Some(product_id) = product_id {
                filter = filter.with_product_id(product_id);
            }
            blocking(move || list_devices(&filter)).await
        }
        Command::Paths => blocking(move || print_paths(&config)).await,
        Command::Send { path, text } => blocking(move || send(&path, &text, &config)).await,
        Command::Monitor { path } => monitor(path, config).await,
    }
}

async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|err| anyhow!("usb task join failed: {err}"))?
}

fn list_devices(filter: &DeviceFilter) -> Result<()> {
    let mut session = open_session().context("open usb session")?;
    let devices = session.refresh(filter).context("enumerate devices")?;
    for device in devices {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(err) => {
                debug!(%err, "skipping device");
                continue;
            }
        };
        let strings = device.strings();
        println!(
            "bus {:03} address {:03} {:04X}:{:04X} {:?} {:?} {:?}",
            device.bus_number(),
            device.address(),
            desc.vendor_id,
            desc.product_id,
            desc.manufacturer_string(strings),
            desc.product_string(strings),
            desc.serial_number_string(strings),
        );
    }
    Ok(())
}

fn print_paths(config: &LinkConfig) -> Result<()> {
    let mut session = open_session().context("open usb session")?;
    let mut last = None;
    while let Some(path) =
        next_device_path(&mut session, config, last.as_ref()).context("scan link paths")?
    {
        println!("{path}");
        last = Some(path);
    }
    Ok(())
}

fn send(path: &str, text: &str, config: &LinkConfig) -> Result<()> {
    let mut session = open_session().context("open usb session")?;
    let mut link = LinkDriver::open(&mut session, path, config).context("open link")?;
    let written = link.write(text.as_bytes()).context("write link")?;
    info!(path, bytes = written, "sent");
    link.close();
    Ok(())
}

async fn monitor(path: String, config: LinkConfig) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = stop.clone();
    let mut reader = task::spawn_blocking(move || -> Result<()> {
        let mut session = open_session().context("open usb session")?;
        let mut link = LinkDriver::open(&mut session, &path, &config).context("open link")?;
        link.flush();
        info!(path = %link.path(), "monitoring link");

        let mut buf = [0u8; 512];
        let mut stdout = std::io::stdout();
        while !reader_stop.load(Ordering::SeqCst) {
            let received = link.read(&mut buf).context("read link")?;
            if received > 0 {
                stdout.write_all(&buf[..received])?;
                stdout.flush()?;
            }
        }
        link.close();
        Ok(())
    });

    tokio::select! {
        res = &mut reader => {
            return res.map_err(|err| anyhow!("monitor task join failed: {err}"))?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown requested");
            stop.store(true, Ordering::SeqCst);
        }
    }
    reader
        .await
        .map_err(|err| anyhow!("monitor task join failed: {err}"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_ids_accept_optional_prefix() {
        assert_eq!(parse_hex_u16("0x20A0"), Ok(0x20A0));
        assert_eq!(parse_hex_u16("20a0"), Ok(0x20A0));
        assert!(parse_hex_u16("0xZZ").is_err());
        assert!(parse_hex_u16("0x12345").is_err());
    }

    #[test]
    fn flags_build_link_config() {
        let args = Args::parse_from([
            "usblink-cli",
            "--timeout-ms",
            "25",
            "--reject-empty-strings",
            "monitor",
            "/usb/20A0/41D5/01/SN",
        ]);
        let config = args.link_config();
        assert_eq!(config.timeout, Duration::from_millis(25));
        assert_eq!(config.scan_vendor_id, 0x20A0);
        assert_eq!(config.candidates.empty_strings, EmptyStringPolicy::Reject);
    }
}
