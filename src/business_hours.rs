use crate::{error::ConfigurationError, types::hh_mm};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
    #[serde(with = "hh_mm")]
    pub open: NaiveTime,
    #[serde(with = "hh_mm")]
    pub close: NaiveTime,
}

impl OpeningHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    fn hours(open: u32, close: u32) -> Option<Self> {
        Some(Self::new(
            NaiveTime::from_hms_opt(open, 0, 0)?,
            NaiveTime::from_hms_opt(close, 0, 0)?,
        ))
    }
}

/// Hours in which candidate slots are offered, per day of the week. A `None`
/// day is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub monday: Option<OpeningHours>,
    pub tuesday: Option<OpeningHours>,
    pub wednesday: Option<OpeningHours>,
    pub thursday: Option<OpeningHours>,
    pub friday: Option<OpeningHours>,
    pub saturday: Option<OpeningHours>,
    pub sunday: Option<OpeningHours>,
}

impl Default for BusinessHours {
    /// 09:00-17:00 on weekdays, Saturday until 12:00, Sunday closed.
    fn default() -> Self {
        let weekday = OpeningHours::hours(9, 17);
        Self {
            monday: weekday,
            tuesday: weekday,
            wednesday: weekday,
            thursday: weekday,
            friday: weekday,
            saturday: OpeningHours::hours(9, 12),
            sunday: None,
        }
    }
}

impl BusinessHours {
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let business_hours: BusinessHours =
            serde_json::from_str(&content).map_err(|source| ConfigurationError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        business_hours.validate()?;
        Ok(business_hours)
    }

    pub fn for_weekday(&self, weekday: Weekday) -> Option<OpeningHours> {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let mut weekday = Weekday::Mon;
        for _ in 0..7 {
            if let Some(hours) = self.for_weekday(weekday) {
                if hours.open >= hours.close {
                    return Err(ConfigurationError::InvalidHours {
                        day: weekday.to_string(),
                    });
                }
            }
            weekday = weekday.succ();
        }
        Ok(())
    }
}
