use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

use super::message::AntMessage;
use super::Transport;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const BURST_POLL_INTERVAL: Duration = Duration::from_millis(1);
const BURST_CHUNK_PAUSE: Duration = Duration::from_millis(10);

const MSG_RF_EVENT: u8 = 0x40;
const MSG_BROADCAST: u8 = 0x4E;
const MSG_ACKED_DATA: u8 = 0x4F;
const MSG_BURST_DATA: u8 = 0x50;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("ANT node is dead")]
    Dead,
    #[error("no response from base after {0} attempts")]
    Timeout(u32),
    #[error("command 0x{id:02x} failed with response code {code}")]
    CommandFailed { id: u8, code: u8 },
    #[error("acked data transmission failed")]
    AckedDataFailed,
    #[error("burst transfer failed")]
    BurstFailed,
    #[error("receive buffer overflowed")]
    Overflow,
}

/// Drives the ANT host controller commands over a raw [`Transport`].
///
/// Owns the receive buffer compaction described in spec.md 4.2: bytes are
/// appended from the transport, frames are decoded off the front, and the
/// consumed prefix (junk skipped plus a complete or discarded frame) is
/// dropped from the buffer.
pub struct AntHost {
    transport: Box<dyn Transport>,
    recvbuf: Vec<u8>,
}

impl AntHost {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport, recvbuf: Vec::with_capacity(512) }
    }

    pub fn name(&self) -> &str {
        self.transport.name()
    }

    pub fn is_dead(&self) -> bool {
        self.transport.is_dead()
    }

    fn send(&mut self, msg: &AntMessage) -> Result<(), HostError> {
        let buf = msg.encode();
        self.transport.write(&buf).map_err(|_| HostError::Dead)
    }

    /// Pull one frame off the wire, reading more bytes from the transport as needed.
    /// Returns `None` when the transport currently has nothing to offer (timeout).
    fn read_message(&mut self) -> Result<Option<AntMessage>, HostError> {
        loop {
            if !self.recvbuf.is_empty() {
                let (msg, consumed) = AntMessage::decode(&self.recvbuf);
                if consumed > 0 {
                    self.recvbuf.drain(..consumed);
                }
                if let Some(msg) = msg {
                    return Ok(Some(msg));
                }
                if consumed > 0 {
                    // Either junk was skipped or a bad-checksum frame was
                    // discarded; loop again in case another frame follows.
                    continue;
                }
            }

            let mut chunk = [0u8; 512];
            let n = self.transport.read(&mut chunk).map_err(|_| HostError::Dead)?;
            if n == 0 {
                return Ok(None);
            }
            self.recvbuf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Discard anything buffered or in flight.
    fn flush_recv(&mut self) {
        self.recvbuf.clear();
    }

    /// Poll for an RF event (`0x40`) carrying `data[1] == msg_id`, up to `attempts` tries.
    fn read_response(&mut self, msg_id: u8, attempts: u32) -> Result<u8, HostError> {
        for _ in 0..attempts {
            match self.read_message()? {
                None => sleep(POLL_INTERVAL),
                Some(msg) => {
                    if msg.id != MSG_RF_EVENT || msg.payload.len() < 3 {
                        sleep(POLL_INTERVAL);
                        continue;
                    }
                    if msg.payload[1] != msg_id {
                        sleep(POLL_INTERVAL);
                        continue;
                    }
                    return Ok(msg.payload[2]);
                }
            }
        }
        Err(HostError::Timeout(attempts))
    }

    fn check_ok(&mut self, msg_id: u8) -> Result<(), HostError> {
        for _ in 0..20 {
            match self.read_response(msg_id, 1) {
                Ok(0) => return Ok(()),
                Ok(code) => return Err(HostError::CommandFailed { id: msg_id, code }),
                Err(_) => sleep(POLL_INTERVAL),
            }
        }
        Err(HostError::Timeout(20))
    }

    fn command(&mut self, id: u8, payload: Vec<u8>) -> Result<(), HostError> {
        self.send(&AntMessage::new(id, payload))?;
        self.check_ok(id)
    }

    pub fn unassign_channel(&mut self, chan: u8) -> Result<(), HostError> {
        self.command(0x41, vec![chan])
    }

    pub fn assign_channel(&mut self, chan: u8, ty: u8, net: u8) -> Result<(), HostError> {
        self.command(0x42, vec![chan, ty, net, 0x00])
    }

    pub fn set_channel_period(&mut self, chan: u8, period: [u8; 2]) -> Result<(), HostError> {
        self.command(0x43, vec![chan, period[0], period[1]])
    }

    pub fn set_channel_search_timeout(&mut self, chan: u8, timeout: u8) -> Result<(), HostError> {
        self.command(0x44, vec![chan, timeout])
    }

    pub fn set_channel_freq(&mut self, chan: u8, freq: u8) -> Result<(), HostError> {
        self.command(0x45, vec![chan, freq])
    }

    pub fn set_network_key(&mut self, net: u8, key: [u8; 8]) -> Result<(), HostError> {
        let mut payload = vec![net];
        payload.extend_from_slice(&key);
        self.command(0x46, payload)
    }

    pub fn set_tx_power(&mut self, pwr: u8) -> Result<(), HostError> {
        self.command(0x47, vec![0x00, pwr])
    }

    /// Reset does not wait for a response code; it clears the receive buffer instead.
    pub fn reset(&mut self) -> Result<(), HostError> {
        self.send(&AntMessage::new(0x4A, vec![0x00]))?;
        self.flush_recv();
        Ok(())
    }

    pub fn open_channel(&mut self, chan: u8) -> Result<(), HostError> {
        self.command(0x4B, vec![chan])
    }

    pub fn close_channel(&mut self, chan: u8) -> Result<(), HostError> {
        self.command(0x4C, vec![chan])
    }

    pub fn set_channel_id(
        &mut self,
        chan: u8,
        dev_num: [u8; 2],
        dev_type: u8,
        trans_type: u8,
    ) -> Result<(), HostError> {
        self.command(0x51, vec![chan, dev_num[0], dev_num[1], dev_type, trans_type])
    }

    /// Poll for a message of the given id, up to `attempts` tries, `interval` apart.
    /// Returns the raw message payload without further interpretation.
    pub fn wait_for(&mut self, id: u8, attempts: u32, interval: Duration) -> Option<AntMessage> {
        for _ in 0..attempts {
            match self.read_message() {
                Ok(Some(msg)) if msg.id == id => return Some(msg),
                _ => sleep(interval),
            }
        }
        None
    }

    pub fn send_acked_data(&mut self, chan: u8, data: [u8; 8]) -> Result<(), HostError> {
        let mut payload = vec![chan];
        payload.extend_from_slice(&data);
        self.send(&AntMessage::new(0x4F, payload))?;

        for _ in 0..20 {
            match self.read_response(0x01, 1) {
                Ok(5) => return Ok(()),
                Ok(6) => return Err(HostError::AckedDataFailed),
                _ => sleep(POLL_INTERVAL),
            }
        }
        Err(HostError::Timeout(20))
    }

    /// Wait up to 20x100ms for an incoming acked-data (`0x4F`) message, returning
    /// its payload (minus the leading channel byte), truncated to `out.len()`.
    pub fn receive_acked_response(&mut self, out: &mut [u8]) -> Result<(), HostError> {
        for _ in 0..20 {
            match self.read_message()? {
                Some(msg) if msg.id == MSG_ACKED_DATA => {
                    let n = out.len().min(msg.payload.len().saturating_sub(1));
                    out[..n].copy_from_slice(&msg.payload[1..1 + n]);
                    return Ok(());
                }
                _ => sleep(POLL_INTERVAL),
            }
        }
        Err(HostError::Timeout(20))
    }

    /// Accumulate burst fragments for `chan` until the last one arrives.
    pub fn receive_burst(&mut self, chan: u8) -> Result<Vec<u8>, HostError> {
        let mut out = Vec::new();
        loop {
            let mut msg = None;
            for _ in 0..20 {
                match self.read_message()? {
                    Some(m) => {
                        msg = Some(m);
                        break;
                    }
                    None => sleep(BURST_POLL_INTERVAL),
                }
            }
            let msg = msg.ok_or(HostError::Timeout(20))?;

            match msg.id {
                MSG_RF_EVENT => {
                    if msg.payload.first() != Some(&chan) {
                        continue;
                    }
                    if msg.payload.get(2) == Some(&6) {
                        return Err(HostError::BurstFailed);
                    }
                }
                MSG_ACKED_DATA => {
                    out.extend_from_slice(&msg.payload[1..]);
                    return Ok(out);
                }
                MSG_BURST_DATA => {
                    if msg.payload.is_empty() {
                        continue;
                    }
                    out.extend_from_slice(&msg.payload[1..]);
                    if msg.payload[0] & 0x80 != 0 {
                        return Ok(out);
                    }
                }
                _ => continue,
            }
        }
    }

    /// Chop `data` into 8-byte chunks and burst-send them on `chan`.
    pub fn send_burst(&mut self, chan: u8, data: &[u8]) -> Result<(), HostError> {
        let mut seq: u8 = 0;
        let chunks: Vec<&[u8]> = if data.is_empty() { vec![&[]] } else { data.chunks(8).collect() };
        let n = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut header = chan & 0x1F;
            header |= seq << 5;
            seq += 1;
            if seq > 3 {
                seq = 1;
            }
            if i == n - 1 {
                header |= 0x80;
            }

            let mut payload = vec![0u8; 9];
            payload[0] = header;
            payload[1..1 + chunk.len()].copy_from_slice(chunk);
            self.send(&AntMessage::new(0x50, payload))?;
            sleep(BURST_CHUNK_PAUSE);
        }
        Ok(())
    }

    pub fn wait_for_broadcast(&mut self) -> bool {
        self.wait_for(MSG_BROADCAST, 50, POLL_INTERVAL).is_some()
    }

    pub fn wait_for_startup(&mut self) -> bool {
        self.wait_for(0x6F, 10, POLL_INTERVAL).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Scripted {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        dead: bool,
    }

    #[derive(Clone)]
    struct ScriptedTransport(Arc<Mutex<Scripted>>);

    impl ScriptedTransport {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Scripted::default())))
        }

        fn push_frame(&self, msg: &AntMessage) {
            self.0.lock().unwrap().inbound.extend(msg.encode());
        }
    }

    impl Transport for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut s = self.0.lock().unwrap();
            let n = buf.len().min(s.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = s.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
        fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.0.lock().unwrap().outbound.extend_from_slice(buf);
            Ok(())
        }
        fn is_dead(&self) -> bool {
            self.0.lock().unwrap().dead
        }
        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn burst_chunking_sequence_and_last_flag() {
        let t = ScriptedTransport::new();
        let inner = t.0.clone();
        let mut host = AntHost::new(Box::new(t));
        let data = (0..20u8).collect::<Vec<_>>(); // 3 chunks: 8,8,4
        host.send_burst(3, &data).unwrap();

        let outbound = inner.lock().unwrap().outbound.clone();
        let mut rest = outbound.as_slice();
        let mut frames = Vec::new();
        while !rest.is_empty() {
            let (msg, consumed) = AntMessage::decode(rest);
            frames.push(msg.expect("well-formed frame"));
            rest = &rest[consumed..];
        }

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].id, 0x50);
        // chunk 0: seq bits = 0, channel = 3, not last
        assert_eq!(frames[0].payload[0], 0x03);
        assert_eq!(&frames[0].payload[1..], &data[0..8]);
        // chunk 1: seq bits = 1, channel = 3, not last
        assert_eq!(frames[1].payload[0], (1 << 5) | 0x03);
        assert_eq!(&frames[1].payload[1..], &data[8..16]);
        // chunk 2: seq bits = 2, channel = 3, last chunk flagged, 4 real bytes padded to 8
        assert_eq!(frames[2].payload[0], (2 << 5) | 0x03 | 0x80);
        assert_eq!(&frames[2].payload[1..5], &data[16..20]);
    }

    #[test]
    fn check_ok_success() {
        let t = ScriptedTransport::new();
        t.push_frame(&AntMessage::new(0x40, vec![0, 0x42, 0]));
        let mut host = AntHost::new(Box::new(t));
        host.check_ok(0x42).unwrap();
    }

    #[test]
    fn check_ok_failure_code() {
        let t = ScriptedTransport::new();
        t.push_frame(&AntMessage::new(0x40, vec![0, 0x42, 7]));
        let mut host = AntHost::new(Box::new(t));
        let err = host.check_ok(0x42).unwrap_err();
        assert!(matches!(err, HostError::CommandFailed { id: 0x42, code: 7 }));
    }

    #[test]
    fn receive_burst_via_acked_data_terminator() {
        let t = ScriptedTransport::new();
        t.push_frame(&AntMessage::new(0x50, {
            let mut p = vec![0u8]; // seq 0, not last
            p.extend_from_slice(&[0u8; 7]);
            p
        }));
        t.push_frame(&AntMessage::new(0x4F, {
            let mut p = vec![0u8];
            p.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7]);
            p
        }));
        let mut host = AntHost::new(Box::new(t));
        let data = host.receive_burst(0).unwrap();
        assert_eq!(data.len(), 14);
    }

    #[test]
    fn receive_burst_last_packet_bit() {
        let t = ScriptedTransport::new();
        let mut p = vec![0x80u8];
        p.extend_from_slice(&(0..8).collect::<Vec<u8>>());
        t.push_frame(&AntMessage::new(0x50, p));
        let mut host = AntHost::new(Box::new(t));
        let data = host.receive_burst(0).unwrap();
        assert_eq!(data, (0..8).collect::<Vec<u8>>());
    }
}
