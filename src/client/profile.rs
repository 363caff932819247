use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const BULK_FILL: u8 = b'X';
const RATE_LIMITED_FILL: u8 = b'Y';

/// One load pattern run against an open connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LoadProfile {
    Bulk {
        message_count: u64,
        message_size: usize,
    },
    RateLimited {
        duration_secs: f64,
        rate: u32,
        message_size: usize,
    },
}

impl LoadProfile {
    pub fn message_size(&self) -> usize {
        match self {
            LoadProfile::Bulk { message_size, .. } => *message_size,
            LoadProfile::RateLimited { message_size, .. } => *message_size,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        let fill = match self {
            LoadProfile::Bulk { .. } => BULK_FILL,
            LoadProfile::RateLimited { .. } => RATE_LIMITED_FILL,
        };
        vec![fill; self.message_size()]
    }

    pub fn validate(&self) -> Result<()> {
        if self.message_size() == 0 {
            return Err(BenchError::Config("message_size must be positive".into()));
        }
        match self {
            LoadProfile::Bulk { message_count, .. } if *message_count == 0 => {
                Err(BenchError::Config("message_count must be positive".into()))
            }
            LoadProfile::RateLimited { rate, .. } if *rate == 0 => {
                Err(BenchError::Config("rate must be positive".into()))
            }
            LoadProfile::RateLimited { duration_secs, .. } => {
                run_length(*duration_secs).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    pub fn default_plan() -> Vec<LoadProfile> {
        vec![
            LoadProfile::Bulk {
                message_count: 100,
                message_size: 1024,
            },
            LoadProfile::RateLimited {
                duration_secs: 10.0,
                rate: 10,
                message_size: 512,
            },
        ]
    }
}

/// Converts a configured run length, rejecting values a `Duration` can't hold.
pub(crate) fn run_length(duration_secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(duration_secs) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(BenchError::Config(format!(
            "duration_secs must be a positive number of seconds, got {}",
            duration_secs
        ))),
    }
}

/// Gap between sends needed to hold `rate` messages per second.
pub(crate) fn send_interval(rate: u32) -> Duration {
    Duration::from_secs(1) / rate.max(1)
}

impl fmt::Display for LoadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadProfile::Bulk {
                message_count,
                message_size,
            } => write!(
                f,
                "bulk: {} messages of {} bytes",
                message_count, message_size
            ),
            LoadProfile::RateLimited {
                duration_secs,
                rate,
                message_size,
            } => write!(
                f,
                "rate-limited: {}s at {} msg/s, {} bytes each",
                duration_secs, rate, message_size
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_mode_fill_byte() {
        let bulk = LoadProfile::Bulk {
            message_count: 1,
            message_size: 4,
        };
        assert_eq!(bulk.payload(), b"XXXX".to_vec());

        let rate = LoadProfile::RateLimited {
            duration_secs: 1.0,
            rate: 5,
            message_size: 3,
        };
        assert_eq!(rate.payload(), b"YYY".to_vec());
    }

    #[test]
    fn rejects_degenerate_profiles() {
        let zero_rate = LoadProfile::RateLimited {
            duration_secs: 1.0,
            rate: 0,
            message_size: 8,
        };
        assert!(zero_rate.validate().is_err());

        let zero_duration = LoadProfile::RateLimited {
            duration_secs: 0.0,
            rate: 10,
            message_size: 8,
        };
        assert!(zero_duration.validate().is_err());

        for duration_secs in [1e20, f64::INFINITY, f64::NAN, -1.0] {
            let unrepresentable = LoadProfile::RateLimited {
                duration_secs,
                rate: 10,
                message_size: 8,
            };
            assert!(
                matches!(unrepresentable.validate(), Err(BenchError::Config(_))),
                "accepted duration_secs = {}",
                duration_secs
            );
        }

        let empty = LoadProfile::Bulk {
            message_count: 10,
            message_size: 0,
        };
        assert!(empty.validate().is_err());

        for profile in LoadProfile::default_plan() {
            assert!(profile.validate().is_ok());
        }
    }

    #[test]
    fn send_interval_matches_rate() {
        assert_eq!(send_interval(10), Duration::from_millis(100));
        assert_eq!(send_interval(50), Duration::from_millis(20));
    }
}
