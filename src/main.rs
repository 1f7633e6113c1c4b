use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};

mod ant;
mod control;
mod fitbit;
mod prefs;
mod registry;
mod sync;
mod usb;
mod util;

use prefs::Preferences;
use registry::Registry;
use util::lock::LockFile;
use util::logging::{init_logger, LogVerbosity};

/// Background sync daemon for Fitbit trackers over the ANT USB dongle.
#[derive(Debug, Parser)]
#[command(name = "fitbitd", version, about = "Background sync daemon for Fitbit trackers over ANT")]
struct Cli {
    /// Don't daemonise; stay attached to the controlling terminal.
    #[arg(long)]
    no_daemon: bool,

    /// Disable the DBus control surface.
    #[arg(long)]
    no_dbus: bool,

    /// Dump every executed sync op (op/payload/response) under this directory.
    #[arg(long, value_name = "DIR")]
    dump: Option<PathBuf>,

    /// Write log messages to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Ask a running fitbitd instance to exit, then exit immediately.
    #[arg(long)]
    exit: bool,
}

#[cfg(unix)]
fn daemonize() -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // Already running under a supervisor (e.g. as a systemd service)?
    if unsafe { libc::getppid() } == 1 {
        return Ok(());
    }

    match unsafe { libc::fork() } {
        n if n < 0 => bail!("fork() failed"),
        0 => {}
        _ => std::process::exit(0),
    }

    unsafe {
        libc::umask(0);
        if libc::setsid() < 0 {
            bail!("setsid() failed");
        }
    }

    std::env::set_current_dir("/").context("chdir to / failed")?;

    let devnull = std::fs::OpenOptions::new().read(true).write(true).open("/dev/null")?;
    unsafe {
        libc::dup2(devnull.as_raw_fd(), 0);
        libc::dup2(devnull.as_raw_fd(), 1);
        libc::dup2(devnull.as_raw_fd(), 2);
    }

    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    warn!("daemonising is only supported on unix; continuing in the foreground");
    Ok(())
}

fn run_scan_loop(prefs: &Preferences, registry: &Arc<Registry>, control: &control::Control) -> Result<()> {
    let http = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("building HTTP client")?;

    let mut bases: Vec<(usb::DeviceKey, fitbit::FitbitChannel)> = Vec::new();

    while !control.exited() {
        let keys: Vec<usb::DeviceKey> = bases.iter().map(|(k, _)| *k).collect();
        match usb::discover(&keys) {
            Ok(dongles) => {
                for dongle in dongles {
                    info!("found ANT base {}", dongle.name());
                    let key = dongle.key();
                    let host = ant::AntHost::new(Box::new(dongle));
                    bases.push((key, fitbit::FitbitChannel::new(host, 0)));
                }
            }
            Err(e) => warn!("USB discovery failed: {:#}", e),
        }

        let mut i = 0;
        while i < bases.len() {
            let (_, base) = &mut bases[i];
            let result = base.sync_trackers(|fb, tracker| {
                if let Err(e) = sync::sync_tracker(fb, tracker, prefs, registry, &http, || control.signal_state_change()) {
                    error!("sync failed for {}: {:#}", tracker.serial_str, e);
                }
            });

            match result {
                Ok(count) => {
                    debug!("synced {} tracker(s) on {}", count, base.name());
                    i += 1;
                }
                Err(e) => {
                    debug!("base died ({:#}), dropping it", e);
                    bases.remove(i);
                }
            }

            if control.exited() {
                break;
            }
        }

        let stale_before = util::uptime::now() - (prefs.sync_delay.as_secs() as i64 * 3 / 2);
        registry.clean(stale_before);

        if !control.exited() {
            std::thread::sleep(prefs.scan_delay);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.exit {
        return match control::call_exit() {
            Ok(0) => Ok(()),
            Ok(code) => bail!("daemon reported exit failure (code {code})"),
            Err(e) => Err(e),
        };
    }

    let mut prefs = Preferences::new();
    prefs.dump_directory = cli.dump.clone();
    prefs.log_filename = cli.log.clone();

    init_logger(LogVerbosity::Normal, prefs.log_filename.as_deref());

    info!("fitbitd version {}", env!("CARGO_PKG_VERSION"));

    let _lock = LockFile::acquire(&prefs.lock_filename)
        .with_context(|| format!("is another fitbitd already running? ({})", prefs.lock_filename.display()))?;

    if !cli.no_daemon {
        daemonize().context("daemonising")?;
    }

    let registry = Arc::new(Registry::new());

    let control = if cli.no_dbus {
        control::Control::disabled()
    } else {
        match control::Control::start(registry.clone()) {
            Ok(c) => c,
            Err(e) => {
                error!("failed to start DBus control: {:#}", e);
                return Err(e);
            }
        }
    };

    let result = run_scan_loop(&prefs, &registry, &control);
    control.stop();
    result
}
