use super::FitbitError;

/// Identity and firmware state reported by a tracker's `0x24` info op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerInfo {
    pub serial: [u8; 5],
    pub serial_str: String,
    pub firmware: u8,
    pub ver_bsl: (u8, u8),
    pub ver_app: (u8, u8),
    pub on_charger: bool,
}

impl TrackerInfo {
    /// Parse a tracker info response. Requires at least 12 bytes; the original
    /// reads this many bytes out of a fixed stack buffer regardless of how much
    /// of it the wire response actually populated, which can expose
    /// uninitialized memory when the response came back shorter than 12 bytes.
    /// Rejecting a short response instead is a deliberate improvement.
    pub fn from_bytes(info: &[u8]) -> Result<Self, FitbitError> {
        if info.len() < 12 {
            return Err(FitbitError::ShortTrackerInfo { got: info.len() });
        }
        let serial = [info[0], info[1], info[2], info[3], info[4]];
        Ok(TrackerInfo {
            serial,
            serial_str: hex::encode(serial),
            firmware: info[5],
            ver_bsl: (info[6], info[7]),
            ver_app: (info[8], info[9]),
            on_charger: info[11] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fields() {
        let info = [0x01, 0x02, 0x03, 0x04, 0x05, 7, 1, 2, 3, 4, 0, 1];
        let t = TrackerInfo::from_bytes(&info).unwrap();
        assert_eq!(t.serial, [1, 2, 3, 4, 5]);
        assert_eq!(t.serial_str, "0102030405");
        assert_eq!(t.firmware, 7);
        assert_eq!(t.ver_bsl, (1, 2));
        assert_eq!(t.ver_app, (3, 4));
        assert!(t.on_charger);
    }

    #[test]
    fn not_on_charger_when_zero() {
        let info = [0u8; 12];
        let t = TrackerInfo::from_bytes(&info).unwrap();
        assert!(!t.on_charger);
    }

    #[test]
    fn rejects_short_info() {
        let info = [0u8; 5];
        assert!(TrackerInfo::from_bytes(&info).is_err());
    }
}
