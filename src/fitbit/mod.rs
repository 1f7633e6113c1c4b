pub mod info;

use std::thread::sleep;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::ant::{AntHost, HostError};
pub use info::TrackerInfo;

#[derive(Debug, Error)]
pub enum FitbitError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("op requires a payload but none was given")]
    MissingPayload,
    #[error("tracker burst was not a recognised tracker data burst")]
    NotTrackerBurst,
    #[error("exhausted retry attempts running sync operation")]
    OpRetriesExhausted,
    #[error("greeting or chatter message exceeds 8 characters")]
    MessageTooLong,
    #[error("no tracker beacon heard before timeout")]
    NoBeacon,
    #[error("tracker info response too short ({got} bytes, need 12)")]
    ShortTrackerInfo { got: usize },
}

/// A Fitbit sync session running over one ANT channel of an opened base station.
///
/// Mirrors the C `fitbit_t` state machine: a single logical channel, a
/// packet-ID counter that resets at the start of each tracker sync, and the
/// "already set up, skip re-init" optimisation used when successive ops talk
/// to the same device number.
pub struct FitbitChannel {
    host: AntHost,
    chan: u8,
    packet_id: u8,
    packet_id_counter: u8,
    bank_id: u8,
    curr_dev_num: [u8; 2],
    skipped_setups: u8,
    max_skipped_setups: u8,
}

impl FitbitChannel {
    pub fn new(host: AntHost, chan: u8) -> Self {
        Self {
            host,
            chan,
            packet_id: 0,
            packet_id_counter: 1,
            bank_id: 0,
            curr_dev_num: [0, 0],
            skipped_setups: 0,
            max_skipped_setups: 10,
        }
    }

    pub fn name(&self) -> &str {
        self.host.name()
    }

    pub fn is_dead(&self) -> bool {
        self.host.is_dead()
    }

    pub fn set_max_setup_skip(&mut self, max_skip: u8) {
        self.max_skipped_setups = max_skip;
    }

    fn packet_id(&mut self) -> u8 {
        let curr = self.packet_id_counter;
        self.packet_id_counter = (self.packet_id_counter + 1) % 8;
        self.packet_id = 0x38 + curr;
        self.packet_id
    }

    /// (Re)initialise the ANT channel for `dev_num`, skipping the reset/reopen
    /// dance entirely if we're already configured for this device number and
    /// haven't exceeded `max_skipped_setups` consecutive skips.
    fn init_ant_channel(&mut self, dev_num: [u8; 2]) -> Result<(), FitbitError> {
        if dev_num == self.curr_dev_num && self.skipped_setups < self.max_skipped_setups {
            self.skipped_setups += 1;
            return Ok(());
        }

        // Clear the recorded device number first so a failed (re)init forces
        // a retry from scratch next time rather than wrongly claiming to be set up.
        self.curr_dev_num = [0, 0];

        self.host.reset()?;
        sleep(Duration::from_millis(500));
        self.host.wait_for_startup();

        let net_key = [0u8; 8];
        let period = [0x00, 0x10];
        self.host.set_network_key(self.chan, net_key)?;
        self.host.assign_channel(self.chan, 0, 0)?;
        self.host.set_channel_period(self.chan, period)?;
        self.host.set_channel_freq(self.chan, 2)?;
        self.host.set_tx_power(3)?;
        self.host.set_channel_search_timeout(self.chan, 0xff)?;
        self.host.set_channel_id(self.chan, dev_num, 1, 1)?;
        self.host.open_channel(self.chan)?;

        self.curr_dev_num = dev_num;
        self.skipped_setups = 0;
        Ok(())
    }

    fn find_tracker_beacon(&mut self) -> Result<(), FitbitError> {
        if self.host.wait_for_broadcast() {
            Ok(())
        } else {
            Err(FitbitError::NoBeacon)
        }
    }

    fn tracker_receive_burst(&mut self) -> Result<Vec<u8>, FitbitError> {
        let burst = self.host.receive_burst(self.chan)?;
        if burst.len() < 2 || burst[1] != 0x81 {
            return Err(FitbitError::NotTrackerBurst);
        }
        let datalen = LittleEndian::read_u16(&burst[2..4]) as usize;
        let avail = burst.len().saturating_sub(8);
        let n = datalen.min(avail);
        Ok(burst[8..8 + n].to_vec())
    }

    fn tracker_send_burst(&mut self, data: &[u8]) -> Result<(), FitbitError> {
        let cksum = data.iter().fold(0u8, |acc, &b| acc ^ b);
        let mut burst = vec![0u8; 8 + data.len()];
        burst[0] = self.packet_id();
        burst[1] = 0x80;
        LittleEndian::write_u16(&mut burst[2..4], data.len() as u16);
        burst[7] = cksum;
        burst[8..].copy_from_slice(data);
        self.host.send_burst(self.chan, &burst)?;
        Ok(())
    }

    fn get_data_bank(&mut self) -> Result<Vec<u8>, FitbitError> {
        let pid = self.packet_id();
        let mut data = [0u8; 8];
        data[0] = pid;
        data[1] = 0x70;
        data[3] = 0x02;
        data[4] = self.bank_id;
        self.bank_id = self.bank_id.wrapping_add(1);
        self.host.send_acked_data(self.chan, data)?;
        self.tracker_receive_burst()
    }

    /// Send a 7-byte tracker op, following whichever response path (direct,
    /// banked, or payload-then-direct) the tracker asks for, with up to 10 retries.
    pub fn run_op(
        &mut self,
        op: [u8; 7],
        payload: Option<&[u8]>,
        response_sz: usize,
    ) -> Result<Vec<u8>, FitbitError> {
        for _ in 0..10 {
            let pid = self.packet_id();
            let mut data = [0u8; 8];
            data[0] = pid;
            data[1..8].copy_from_slice(&op);
            if self.host.send_acked_data(self.chan, data).is_err() {
                continue;
            }

            let mut resp = [0u8; 8];
            if self.host.receive_acked_response(&mut resp).is_err() {
                continue;
            }
            if resp[0] != self.packet_id {
                continue;
            }

            match resp[1] {
                0x41 => {
                    let n = response_sz.min(6);
                    return Ok(resp[2..2 + n].to_vec());
                }
                0x42 => {
                    return self.get_data_bank().map(|bank| {
                        let n = response_sz.min(bank.len());
                        bank[..n].to_vec()
                    });
                }
                0x61 => {
                    let Some(payload) = payload else {
                        return Err(FitbitError::MissingPayload);
                    };
                    if self.tracker_send_burst(payload).is_err() {
                        continue;
                    }
                    if self.host.receive_acked_response(&mut resp).is_err() {
                        continue;
                    }
                    let n = response_sz.min(6);
                    return Ok(resp[2..2 + n].to_vec());
                }
                _ => continue,
            }
        }
        Err(FitbitError::OpRetriesExhausted)
    }

    /// Run the full handshake with a single tracker found by [`sync_trackers`]:
    /// reset, assign it a fresh device number, reopen the channel on that
    /// number, then fetch its identity.
    fn sync_single_tracker(&mut self) -> Result<TrackerInfo, FitbitError> {
        self.packet_id_counter = 1;

        let mut data = [0u8; 8];
        data[0] = 0x78;
        data[1] = 0x01;
        self.host.send_acked_data(self.chan, data)?;

        let dev_num = [rand::random::<u8>() % 0xff, rand::random::<u8>() % 0xff];

        let mut data = [0u8; 8];
        data[0] = 0x78;
        data[1] = 0x02;
        data[2] = dev_num[0];
        data[3] = dev_num[1];
        self.host.send_acked_data(self.chan, data)?;

        self.host.close_channel(self.chan)?;
        self.init_ant_channel(dev_num)?;
        self.find_tracker_beacon()?;

        let mut data = [0u8; 8];
        data[0] = 0x78;
        self.host.send_acked_data(self.chan, data)?;

        let op = [0x24, 0, 0, 0, 0, 0, 0];
        let info = self.run_op(op, None, 12)?;
        TrackerInfo::from_bytes(&info)
    }

    /// Repeatedly discover-and-sync trackers on this channel until no further
    /// beacon is heard, invoking `on_sync` once per tracker synced. Returns the
    /// number of trackers synced, or an error if the base itself died mid-scan.
    pub fn sync_trackers<F>(&mut self, mut on_sync: F) -> Result<u32, FitbitError>
    where
        F: FnMut(&mut Self, &TrackerInfo),
    {
        let mut count = 0;
        loop {
            self.init_ant_channel([0xff, 0xff])?;

            if self.find_tracker_beacon().is_err() {
                break;
            }

            match self.sync_single_tracker() {
                Ok(info) => {
                    on_sync(self, &info);
                    count += 1;
                }
                Err(_) => break,
            }
        }

        if self.host.is_dead() {
            return Err(FitbitError::Host(HostError::Dead));
        }

        Ok(count)
    }

    pub fn tracker_sleep(&mut self, duration_secs: u32) -> Result<(), FitbitError> {
        let mut data = [0u8; 8];
        data[0] = 0x7f;
        data[1] = 0x03;
        data[7] = (duration_secs / 15) as u8;
        self.host.send_acked_data(self.chan, data)?;
        Ok(())
    }

    /// Diagnostic-only: program the tracker's idle-screen greeting and chatter
    /// messages. Not part of the regular sync flow.
    pub fn tracker_set_chatter(&mut self, greeting: &str, messages: [&str; 3]) -> Result<(), FitbitError> {
        if greeting.len() > 8 {
            return Err(FitbitError::MessageTooLong);
        }
        for m in &messages {
            if m.len() > 8 {
                return Err(FitbitError::MessageTooLong);
            }
        }

        let op = [0x23, 0, 0x40, 0, 0, 0, 0];
        let mut payload = vec![0u8; 0x40];
        payload[4] = 0xe2;
        payload[5] = 0x02;
        payload[6] = 0x9d;
        payload[7] = 0x03;
        payload[8] = 0x48;
        payload[9] = 0x2f;
        payload[10] = 0x52;
        payload[11] = 0x09;
        payload[12] = 0x5b;
        payload[13] = 0x3e;
        payload[21] = 0xff;

        payload[24..24 + greeting.len()].copy_from_slice(greeting.as_bytes());
        for (i, m) in messages.iter().enumerate() {
            let base = 34 + i * 10;
            payload[base..base + m.len()].copy_from_slice(m.as_bytes());
        }

        self.run_op(op, Some(&payload), 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_id_sequence_wraps_from_0x39_through_0x38() {
        let host = AntHost::new(Box::new(crate::ant::tests_support::NullTransport));
        let mut fb = FitbitChannel::new(host, 0);
        let seq: Vec<u8> = (0..10).map(|_| fb.packet_id()).collect();
        assert_eq!(seq, vec![0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x38, 0x39, 0x3A]);
    }
}
