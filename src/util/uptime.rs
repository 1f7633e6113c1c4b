use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Seconds since this process started. Used only for relative comparisons
/// (device "last synced N seconds ago" bookkeeping), never as a wall-clock
/// timestamp, matching the original's use of a monotonic `get_uptime()`.
pub fn now() -> i64 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_monotonic_non_decreasing() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }
}
