//! Schedule — the time-based trigger specification attached to a rule.
//!
//! The spec is pure data; due-time computation (including sunrise/sunset
//! for a configured location) lives in the core scheduler. Validation
//! happens at rule-creation time so the scheduler never sees a malformed
//! schedule.

use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Astronomical reference points for [`ScheduleSpec::Sun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

impl std::fmt::Display for SunEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sunrise => f.write_str("sunrise"),
            Self::Sunset => f.write_str("sunset"),
        }
    }
}

/// When a scheduled rule becomes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Every day at a fixed `HH:MM` (24-hour, UTC).
    TimeOfDay { time: String },
    /// Relative to computed sunrise or sunset at the configured location.
    Sun {
        event: SunEvent,
        /// Offset in minutes; negative fires before the sun event.
        #[serde(default)]
        offset_minutes: i32,
    },
    /// Every `seconds` seconds.
    Interval { seconds: u64 },
    /// A cron expression (seconds-resolution, as accepted by the `cron`
    /// crate, e.g. `"0 30 7 * * * *"`).
    Cron { expression: String },
}

impl ScheduleSpec {
    /// Check the spec at rule-creation time.
    ///
    /// # Errors
    ///
    /// Returns the matching [`ValidationError`] for a malformed time of
    /// day, a zero interval, or an unparseable cron expression.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::TimeOfDay { time } => {
                parse_time_of_day(time).map(|_| ()).ok_or_else(|| {
                    ValidationError::InvalidTimeOfDay { value: time.clone() }
                })
            }
            Self::Sun { .. } => Ok(()),
            Self::Interval { seconds } => {
                if *seconds == 0 {
                    Err(ValidationError::ZeroInterval)
                } else {
                    Ok(())
                }
            }
            Self::Cron { expression } => cron::Schedule::from_str(expression)
                .map(|_| ())
                .map_err(|_| ValidationError::InvalidCron {
                    expression: expression.clone(),
                }),
        }
    }
}

impl std::fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeOfDay { time } => write!(f, "daily at {time}"),
            Self::Sun {
                event,
                offset_minutes,
            } => write!(f, "{event}{offset_minutes:+}min"),
            Self::Interval { seconds } => write!(f, "every {seconds}s"),
            Self::Cron { expression } => write!(f, "cron({expression})"),
        }
    }
}

/// Parse an `HH:MM` time-of-day string.
#[must_use]
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_accept_valid_time_of_day() {
        let spec = ScheduleSpec::TimeOfDay {
            time: "07:30".to_string(),
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn should_reject_malformed_time_of_day() {
        let spec = ScheduleSpec::TimeOfDay {
            time: "7h30".to_string(),
        };
        assert_eq!(
            spec.validate(),
            Err(ValidationError::InvalidTimeOfDay {
                value: "7h30".to_string()
            })
        );
    }

    #[test]
    fn should_reject_zero_interval() {
        let spec = ScheduleSpec::Interval { seconds: 0 };
        assert_eq!(spec.validate(), Err(ValidationError::ZeroInterval));
    }

    #[test]
    fn should_accept_sun_schedule_with_negative_offset() {
        let spec = ScheduleSpec::Sun {
            event: SunEvent::Sunset,
            offset_minutes: -15,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn should_accept_valid_cron_expression() {
        let spec = ScheduleSpec::Cron {
            expression: "0 30 7 * * * *".to_string(),
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn should_reject_invalid_cron_expression() {
        let spec = ScheduleSpec::Cron {
            expression: "not a cron".to_string(),
        };
        assert!(matches!(
            spec.validate(),
            Err(ValidationError::InvalidCron { .. })
        ));
    }

    #[test]
    fn should_display_schedule_variants() {
        assert_eq!(
            ScheduleSpec::TimeOfDay {
                time: "07:30".to_string()
            }
            .to_string(),
            "daily at 07:30"
        );
        assert_eq!(
            ScheduleSpec::Sun {
                event: SunEvent::Sunset,
                offset_minutes: -15
            }
            .to_string(),
            "sunset-15min"
        );
        assert_eq!(
            ScheduleSpec::Interval { seconds: 300 }.to_string(),
            "every 300s"
        );
    }

    #[test]
    fn should_roundtrip_through_serde_json() {
        let specs = vec![
            ScheduleSpec::TimeOfDay {
                time: "06:45".to_string(),
            },
            ScheduleSpec::Sun {
                event: SunEvent::Sunrise,
                offset_minutes: 30,
            },
            ScheduleSpec::Interval { seconds: 900 },
            ScheduleSpec::Cron {
                expression: "0 0 8 * * * *".to_string(),
            },
        ];
        for spec in &specs {
            let json = serde_json::to_string(spec).unwrap();
            let parsed: ScheduleSpec = serde_json::from_str(&json).unwrap();
            assert_eq!(&parsed, spec);
        }
    }

    #[test]
    fn should_default_sun_offset_to_zero_when_missing() {
        let json = serde_json::json!({ "type": "sun", "event": "sunrise" });
        let spec: ScheduleSpec = serde_json::from_value(json).unwrap();
        assert_eq!(
            spec,
            ScheduleSpec::Sun {
                event: SunEvent::Sunrise,
                offset_minutes: 0
            }
        );
    }
}
