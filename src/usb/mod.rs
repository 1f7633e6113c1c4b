use std::io;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rusb::{DeviceHandle, UsbContext};

use crate::ant::Transport;

const FITBIT_VID: u16 = 0x10c4;
const FITBIT_PID: u16 = 0x84c4;
const BULK_EP: u8 = 1;
const BULK_TIMEOUT: Duration = Duration::from_millis(100);

/// A Fitbit ANT dongle opened over USB, implementing the `ant::Transport` trait.
///
/// Construction runs the vendor-specific init control-transfer dance the
/// dongle's CP210x-derived firmware expects before it will answer bulk I/O.
/// Identifies a physical USB device by bus/address, stable across rescans
/// (unlike an enumeration index) but not across replugs.
pub type DeviceKey = (u8, u8);

pub struct UsbAnt {
    handle: DeviceHandle<rusb::Context>,
    name: String,
    key: DeviceKey,
    dead: bool,
}

impl UsbAnt {
    pub fn key(&self) -> DeviceKey {
        self.key
    }
}

impl UsbAnt {
    fn vendor_init(handle: &mut DeviceHandle<rusb::Context>) -> Result<()> {
        handle.reset().context("resetting ANT dongle")?;

        let mut buf = [0u8; 1];

        handle
            .write_control(0x40, 0, 0xffff, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 1")?;
        handle
            .write_control(0x40, 1, 0x2000, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 2")?;

        handle
            .read_control(0xc0, 255, 0x370b, 0, &mut buf, BULK_TIMEOUT)
            .context("vendor init status read 1")?;
        if buf[0] != 0x02 {
            bail!("unexpected dongle status byte 0x{:02x} (expected 0x02)", buf[0]);
        }

        handle
            .write_control(0x40, 0, 0x0000, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 3")?;
        handle
            .write_control(0x40, 0, 0xffff, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 4")?;
        handle
            .write_control(0x40, 1, 0x2000, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 5")?;

        handle
            .read_control(0xc0, 255, 0x370b, 0, &mut buf, BULK_TIMEOUT)
            .context("vendor init status read 2")?;
        if buf[0] != 0x02 {
            bail!("unexpected dongle status byte 0x{:02x} (expected 0x02)", buf[0]);
        }

        handle
            .write_control(0x40, 1, 0x004a, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 6")?;

        handle
            .read_control(0xc0, 255, 0x370b, 0, &mut buf, BULK_TIMEOUT)
            .context("vendor init status read 3")?;
        if buf[0] != 0x02 {
            bail!("unexpected dongle status byte 0x{:02x} (expected 0x02)", buf[0]);
        }

        handle
            .write_control(0x40, 3, 0x0800, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 7")?;

        let mut cfg = [0u8; 16];
        cfg[0] = 0x08;
        cfg[4] = 0x40;
        handle
            .write_control(0x41, 19, 0x0000, 0, &cfg, BULK_TIMEOUT)
            .context("vendor init config")?;

        handle
            .write_control(0x40, 18, 0x000c, 0, &[], BULK_TIMEOUT)
            .context("vendor init step 8")?;

        // Drain whatever the dongle has buffered from the reset/init dance.
        let mut drain = [0u8; 4096];
        let _ = handle.read_bulk(BULK_EP | 0x80, &mut drain, BULK_TIMEOUT);

        Ok(())
    }

    fn open(device: rusb::Device<rusb::Context>, name: String) -> Result<Self> {
        let key = (device.bus_number(), device.address());
        let mut handle = device.open().context("opening ANT USB device")?;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            handle.set_auto_detach_kernel_driver(true).ok();
        }
        handle.claim_interface(0).context("claiming ANT USB interface")?;

        Self::vendor_init(&mut handle)?;

        Ok(UsbAnt { handle, name, key, dead: false })
    }
}

impl Transport for UsbAnt {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.handle.read_bulk(BULK_EP | 0x80, buf, BULK_TIMEOUT) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => {
                self.dead = true;
                Err(io::Error::new(io::ErrorKind::Other, e))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            match self.handle.write_bulk(BULK_EP, &buf[written..], BULK_TIMEOUT) {
                Ok(0) => {
                    self.dead = true;
                    return Err(io::Error::new(io::ErrorKind::Other, "bulk write stalled"));
                }
                Ok(n) => written += n,
                Err(e) => {
                    self.dead = true;
                    return Err(io::Error::new(io::ErrorKind::Other, e));
                }
            }
        }
        Ok(())
    }

    fn is_dead(&self) -> bool {
        self.dead
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Enumerate currently attached Fitbit ANT dongles not in `exclude`, opening
/// and vendor-initialising each newly found one.
///
/// Mirrors the original's lazy, run-once scan: callers loop and call this
/// again on their own schedule rather than registering a hotplug callback,
/// and already-open devices (tracked by the caller via [`UsbAnt::key`]) are
/// skipped rather than reopened.
pub fn discover(exclude: &[DeviceKey]) -> Result<Vec<UsbAnt>> {
    let ctx = rusb::Context::new().context("initializing libusb")?;
    let devices = ctx.devices().context("listing USB devices")?;

    let mut found = Vec::new();
    for (idx, device) in devices.iter().enumerate() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if desc.vendor_id() != FITBIT_VID || desc.product_id() != FITBIT_PID {
            continue;
        }
        if exclude.contains(&(device.bus_number(), device.address())) {
            continue;
        }
        let name = format!("antusb{}", idx);
        match UsbAnt::open(device, name) {
            Ok(dongle) => found.push(dongle),
            Err(e) => log::warn!("failed to initialize ANT dongle: {:#}", e),
        }
    }
    Ok(found)
}
