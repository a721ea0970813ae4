use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lets one caller through per wall clock second. Failing allocations can happen in a tight loop
/// under memory pressure and each of them would otherwise log.
pub(crate) struct EverySecond {
    last: AtomicU64,
}

impl EverySecond {
    pub(crate) const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub(crate) fn ready(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            + 1; // keep 0 free as "never logged"
        let last = self.last.load(Ordering::Relaxed);
        last != now
            && self
                .last
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }
}

/// `tracing::error!`, at most once per second per call site.
macro_rules! error_every_second {
    ($($arg:tt)+) => {{
        static LIMIT: $crate::stack::every_second::EverySecond =
            $crate::stack::every_second::EverySecond::new();
        if LIMIT.ready() {
            tracing::error!($($arg)+);
        }
    }};
}
pub(crate) use error_every_second;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_limited() {
        let limit = EverySecond::new();
        assert!(limit.ready());
        // At most one more gets through, and only if the clock ticks over during the loop.
        let passed = (0..1000).filter(|_| limit.ready()).count();
        assert!(passed <= 1);
    }
}
