//! Server timestamp parsing.
//!
//! The server writes times as `"<secs>"` or `"<secs>.<frac>"`. The
//! fractional part is right-padded to six digits, so `"1.5"` means one
//! second and 500000 microseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::WireError;

/// A unix timestamp with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ServerTime {
    pub secs: i64,
    pub micros: u32,
}

impl ServerTime {
    pub fn new(secs: i64, micros: u32) -> Self {
        ServerTime { secs, micros }
    }

    /// Parse `"secs[.frac]"`. Non-numeric input is an error.
    pub fn parse(raw: &str) -> Result<Self, WireError> {
        let bad = || WireError::BadTime(raw.to_owned());
        let (sec_part, frac_part) = match raw.split_once('.') {
            Some((s, f)) => (s, Some(f)),
            None => (raw, None),
        };
        let secs: i64 = sec_part.parse().map_err(|_| bad())?;
        let micros = match frac_part {
            None | Some("") => 0,
            Some(frac) => {
                if frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(bad());
                }
                let padded = format!("{frac:0<6}");
                padded.parse().map_err(|_| bad())?
            }
        };
        Ok(ServerTime { secs, micros })
    }

    pub fn as_secs_f64(self) -> f64 {
        self.secs as f64 + f64::from(self.micros) / 1_000_000.0
    }

    pub fn to_system_time(self) -> SystemTime {
        let offset = Duration::new(self.secs.unsigned_abs(), self.micros * 1000);
        if self.secs >= 0 {
            UNIX_EPOCH + offset
        } else {
            UNIX_EPOCH - offset
        }
    }
}
