use std::collections::HashMap;
use std::sync::Mutex;

/// Bit flags recorded against a tracker while it's being synced.
pub mod state {
    pub const SYNCING: u32 = 1 << 0;
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    pub serial: [u8; 5],
    pub last_sync_time: i64,
    pub state: u32,
    pub tracker_id: String,
    pub user_id: String,
}

impl DeviceRecord {
    pub fn serial_str(&self) -> String {
        hex::encode(self.serial)
    }
}

/// Tracks last-seen state for every tracker this daemon has synced, keyed by
/// serial number. A `HashMap` replaces the original's doubly linked list,
/// which incidentally fixes a bug where removing the head of that list during
/// `clean` left the head pointer dangling to a freed node.
#[derive(Default)]
pub struct Registry {
    devices: Mutex<HashMap<[u8; 5], DeviceRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enum_devices(&self) -> Vec<DeviceRecord> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    /// Look up (or create) the record for `serial` and let `mutate` update it.
    pub fn record(&self, serial: [u8; 5], mutate: impl FnOnce(&mut DeviceRecord)) {
        let mut devices = self.devices.lock().unwrap();
        let entry = devices.entry(serial).or_insert_with(|| DeviceRecord {
            serial,
            ..Default::default()
        });
        mutate(entry);
    }

    /// Discard any record not synced since `discard_prior_to`.
    pub fn clean(&self, discard_prior_to: i64) {
        self.devices.lock().unwrap().retain(|_, dev| dev.last_sync_time >= discard_prior_to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_creates_then_updates_same_entry() {
        let reg = Registry::new();
        let serial = [1, 2, 3, 4, 5];
        reg.record(serial, |d| d.last_sync_time = 10);
        reg.record(serial, |d| d.state |= state::SYNCING);

        let devs = reg.enum_devices();
        assert_eq!(devs.len(), 1);
        assert_eq!(devs[0].last_sync_time, 10);
        assert_eq!(devs[0].state, state::SYNCING);
    }

    #[test]
    fn clean_discards_only_stale_entries_including_the_first_inserted() {
        let reg = Registry::new();
        reg.record([1, 0, 0, 0, 0], |d| d.last_sync_time = 0);
        reg.record([2, 0, 0, 0, 0], |d| d.last_sync_time = 100);

        reg.clean(50);

        let devs = reg.enum_devices();
        assert_eq!(devs.len(), 1);
        assert_eq!(devs[0].serial, [2, 0, 0, 0, 0]);
    }
}
