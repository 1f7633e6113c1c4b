use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use zbus::interface;

use crate::registry::Registry;
use crate::util::uptime;

const BUS_NAME: &str = "eu.paulburton.fitbitd";
const OBJECT_PATH: &str = "/eu/paulburton/fitbitd/FitBitD";
const INTERFACE: &str = "eu.paulburton.fitbitd.FitBitD";

struct FitbitdInterface {
    registry: Arc<Registry>,
    exit_requested: Arc<AtomicBool>,
}

#[interface(name = "eu.paulburton.fitbitd.FitBitD")]
impl FitbitdInterface {
    fn exit(&self) -> u32 {
        self.exit_requested.store(true, Ordering::SeqCst);
        0
    }

    fn get_devices(&self) -> Vec<(String, u32, u32, String, String)> {
        self.registry
            .enum_devices()
            .into_iter()
            .map(|d| {
                let since = (uptime::now() - d.last_sync_time).max(0) as u32;
                (d.serial_str(), d.state, since, d.tracker_id.clone(), d.user_id.clone())
            })
            .collect()
    }
}

/// A disabled control surface (`--no-dbus`) or one actually bound to the
/// session bus. Either way, callers poll [`Control::exited`] and call
/// [`Control::signal_state_change`] without needing to branch on which.
pub struct Control {
    conn: Option<zbus::blocking::Connection>,
    exit_requested: Arc<AtomicBool>,
}

impl Control {
    pub fn disabled() -> Self {
        Self { conn: None, exit_requested: Arc::new(AtomicBool::new(false)) }
    }

    pub fn start(registry: Arc<Registry>) -> Result<Self> {
        let exit_requested = Arc::new(AtomicBool::new(false));
        let iface = FitbitdInterface { registry, exit_requested: exit_requested.clone() };

        let conn = zbus::blocking::connection::Builder::session()
            .context("connecting to session bus")?
            .name(BUS_NAME)
            .context("requesting bus name")?
            .serve_at(OBJECT_PATH, iface)
            .context("registering object")?
            .build()
            .context("establishing DBus connection")?;

        Ok(Self { conn: Some(conn), exit_requested })
    }

    pub fn exited(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    pub fn signal_state_change(&self) {
        let Some(conn) = &self.conn else { return };
        let _ = conn.emit_signal(Option::<()>::None, OBJECT_PATH, INTERFACE, "StateChanged", &());
    }
}

/// Client side of `--exit`: ask a running daemon instance to shut down.
pub fn call_exit() -> Result<u32> {
    let conn = zbus::blocking::Connection::session().context("connecting to session bus")?;
    let reply = conn
        .call_method(Some(BUS_NAME), OBJECT_PATH, Some(INTERFACE), "Exit", &())
        .context("calling Exit")?;
    let code: u32 = reply.body().deserialize().context("decoding Exit reply")?;
    Ok(code)
}
