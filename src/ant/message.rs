use thiserror::Error;

pub const SYNC: u8 = 0xA4;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntMessage {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl AntMessage {
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Encode into a fixed-size scratch buffer, SYNC | len | id | payload | xor-checksum.
    /// Fails if `buf` is shorter than `payload.len() + 4`.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let need = self.payload.len() + 4;
        if buf.len() < need {
            return Err(EncodeError::BufferTooSmall { need, have: buf.len() });
        }
        buf[0] = SYNC;
        buf[1] = self.payload.len() as u8;
        buf[2] = self.id;
        buf[3..3 + self.payload.len()].copy_from_slice(&self.payload);
        let cksum = buf[..3 + self.payload.len()].iter().fold(0u8, |acc, &b| acc ^ b);
        buf[3 + self.payload.len()] = cksum;
        Ok(need)
    }

    /// Convenience wrapper returning an owned, exactly-sized encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.payload.len() + 4];
        self.encode_into(&mut buf).expect("buffer sized exactly");
        buf
    }

    /// Scan `buf` for a frame. Returns `(Some(msg), consumed)` on success,
    /// `(None, consumed)` when a frame was skipped/discarded or more bytes
    /// are needed (in which case `consumed` bytes of leading junk only).
    pub fn decode(buf: &[u8]) -> (Option<AntMessage>, usize) {
        let Some(sync_at) = buf.iter().position(|&b| b == SYNC) else {
            return (None, buf.len());
        };
        let skipped = sync_at;
        let rest = &buf[sync_at..];

        if rest.len() < 2 {
            return (None, skipped);
        }
        let len = rest[1] as usize;
        if rest.len() < 3 {
            return (None, skipped);
        }
        let id = rest[2];
        if rest.len() < 3 + len + 1 {
            return (None, skipped);
        }
        let payload = &rest[3..3 + len];
        let cksum_byte = rest[3 + len];

        let computed = rest[..3 + len].iter().fold(0u8, |acc, &b| acc ^ b);
        let consumed = skipped + 4 + len;
        if computed != cksum_byte {
            return (None, consumed);
        }

        (Some(AntMessage::new(id, payload.to_vec())), consumed)
    }
}
