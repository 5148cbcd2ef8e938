use std::time::{Duration, Instant};

/// Gate for repetitive diagnostics: lets one message through per interval.
///
/// Each owner keeps its own throttle, so two balls (or a ball and the server
/// loop) never suppress each other's output.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    interval: Duration,
    last_emitted: Option<Instant>,
    suppressed: u32,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: None,
            suppressed: 0,
        }
    }

    /// Returns true if a message may be logged now.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    pub fn ready_at(&mut self, now: Instant) -> bool {
        match self.last_emitted {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed += 1;
                false
            }
            _ => {
                self.last_emitted = Some(now);
                self.suppressed = 0;
                true
            }
        }
    }

    /// Number of messages swallowed since the last one that went through.
    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_passes() {
        let mut throttle = LogThrottle::new(Duration::from_secs(5));
        assert!(throttle.ready());
        assert!(!throttle.ready());
        assert_eq!(throttle.suppressed(), 1);
    }

    #[test]
    fn test_interval_elapsed() {
        let mut throttle = LogThrottle::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(throttle.ready_at(start));
        assert!(!throttle.ready_at(start + Duration::from_millis(50)));
        assert!(!throttle.ready_at(start + Duration::from_millis(99)));
        assert_eq!(throttle.suppressed(), 2);

        assert!(throttle.ready_at(start + Duration::from_millis(150)));
        assert_eq!(throttle.suppressed(), 0);
    }
}
