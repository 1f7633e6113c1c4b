pub mod host;
pub mod message;

pub use host::{AntHost, HostError};
pub use message::AntMessage;

/// Link-layer transport to an ANT node: a USB dongle, or a scripted fake in tests.
///
/// Reads return `Ok(0)` on a timeout (no data available yet, not an error); any
/// other I/O failure is expected to mark the node dead via `is_dead`.
pub trait Transport: Send {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()>;
    fn is_dead(&self) -> bool;
    fn name(&self) -> &str;
}

/// Minimal fakes shared by unit tests across modules that depend on `Transport`.
#[cfg(test)]
pub mod tests_support {
    use super::Transport;

    /// A transport that never has data and never fails; enough for tests that
    /// only exercise local state (packet-ID counters, framing) and never
    /// actually block on a real exchange.
    pub struct NullTransport;

    impl Transport for NullTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = buf;
            Ok(0)
        }
        fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
            let _ = buf;
            Ok(())
        }
        fn is_dead(&self) -> bool {
            false
        }
        fn name(&self) -> &str {
            "null"
        }
    }
}
