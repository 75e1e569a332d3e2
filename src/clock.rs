//! Time source.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock using the OS time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a timestamp, moved forward by hand.
#[cfg(test)]
pub struct FixedClock {
    timestamp: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp: timestamp.into(),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.timestamp
            .fetch_add(seconds, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let timestamp = self.timestamp.load(std::sync::atomic::Ordering::SeqCst);
        DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
    }
}
