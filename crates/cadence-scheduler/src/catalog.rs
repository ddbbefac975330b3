//! Supported schedule kinds and the field schema each one accepts.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Closed set of schedule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval,
    Crontab,
    Solar,
    Clocked,
}

impl ScheduleKind {
    pub const ALL: [ScheduleKind; 4] = [
        ScheduleKind::Interval,
        ScheduleKind::Crontab,
        ScheduleKind::Solar,
        ScheduleKind::Clocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Interval => "interval",
            ScheduleKind::Crontab => "crontab",
            ScheduleKind::Solar => "solar",
            ScheduleKind::Clocked => "clocked",
        }
    }

    /// Field schema for this kind.
    pub fn schema(&self) -> &'static [FieldSpec] {
        match self {
            ScheduleKind::Interval => INTERVAL_FIELDS,
            ScheduleKind::Crontab => CRONTAB_FIELDS,
            ScheduleKind::Solar => SOLAR_FIELDS,
            ScheduleKind::Clocked => CLOCKED_FIELDS,
        }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "interval" => Ok(ScheduleKind::Interval),
            "crontab" => Ok(ScheduleKind::Crontab),
            "solar" => Ok(ScheduleKind::Solar),
            "clocked" => Ok(ScheduleKind::Clocked),
            other => Err(SchedulerError::InvalidKind(other.to_string())),
        }
    }
}

/// Look up a kind by its name.
pub fn kind_of(name: &str) -> Result<ScheduleKind> {
    name.parse()
}

/// Schema of a kind.
pub fn schema_of(kind: ScheduleKind) -> &'static [FieldSpec] {
    kind.schema()
}

/// How a single field value is coerced and checked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    /// Integer > 0, given as a number or numeric string.
    PositiveInteger,
    /// One of a fixed set of names.
    Choice { options: &'static [&'static str] },
    /// One cron field, opaque beyond "non-empty, no whitespace".
    CronField,
    /// Five whitespace-separated cron fields.
    CronLine,
    /// Float within `[min, max]`.
    Float { min: f64, max: f64 },
    /// Timestamp; naive values are read in the default timezone.
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(flatten)]
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<&'static str>,
}

impl FieldSpec {
    const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
        }
    }

    const fn optional(name: &'static str, ty: FieldType, default: Option<&'static str>) -> Self {
        Self {
            name,
            ty,
            required: false,
            default,
        }
    }
}

/// Time unit of an interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalPeriod {
    Microseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalPeriod {
    pub const NAMES: &'static [&'static str] =
        &["microseconds", "seconds", "minutes", "hours", "days"];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalPeriod::Microseconds => "microseconds",
            IntervalPeriod::Seconds => "seconds",
            IntervalPeriod::Minutes => "minutes",
            IntervalPeriod::Hours => "hours",
            IntervalPeriod::Days => "days",
        }
    }
}

impl std::str::FromStr for IntervalPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "microseconds" => Ok(IntervalPeriod::Microseconds),
            "seconds" => Ok(IntervalPeriod::Seconds),
            "minutes" => Ok(IntervalPeriod::Minutes),
            "hours" => Ok(IntervalPeriod::Hours),
            "days" => Ok(IntervalPeriod::Days),
            other => Err(format!(
                "unknown period {other}; expected one of {}",
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// Astronomical event a solar schedule fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolarEvent {
    DawnAstronomical,
    DawnCivil,
    DawnNautical,
    DuskAstronomical,
    DuskCivil,
    DuskNautical,
    SolarNoon,
    Sunrise,
    Sunset,
}

impl SolarEvent {
    pub const NAMES: &'static [&'static str] = &[
        "dawn_astronomical",
        "dawn_civil",
        "dawn_nautical",
        "dusk_astronomical",
        "dusk_civil",
        "dusk_nautical",
        "solar_noon",
        "sunrise",
        "sunset",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SolarEvent::DawnAstronomical => "dawn_astronomical",
            SolarEvent::DawnCivil => "dawn_civil",
            SolarEvent::DawnNautical => "dawn_nautical",
            SolarEvent::DuskAstronomical => "dusk_astronomical",
            SolarEvent::DuskCivil => "dusk_civil",
            SolarEvent::DuskNautical => "dusk_nautical",
            SolarEvent::SolarNoon => "solar_noon",
            SolarEvent::Sunrise => "sunrise",
            SolarEvent::Sunset => "sunset",
        }
    }
}

impl std::str::FromStr for SolarEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dawn_astronomical" => Ok(SolarEvent::DawnAstronomical),
            "dawn_civil" => Ok(SolarEvent::DawnCivil),
            "dawn_nautical" => Ok(SolarEvent::DawnNautical),
            "dusk_astronomical" => Ok(SolarEvent::DuskAstronomical),
            "dusk_civil" => Ok(SolarEvent::DuskCivil),
            "dusk_nautical" => Ok(SolarEvent::DuskNautical),
            "solar_noon" => Ok(SolarEvent::SolarNoon),
            "sunrise" => Ok(SolarEvent::Sunrise),
            "sunset" => Ok(SolarEvent::Sunset),
            other => Err(format!(
                "unknown solar event {other}; expected one of {}",
                Self::NAMES.join(", ")
            )),
        }
    }
}

const COORDINATE: FieldType = FieldType::Float {
    min: -180.0,
    max: 180.0,
};

static INTERVAL_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("every", FieldType::PositiveInteger),
    FieldSpec::required(
        "period",
        FieldType::Choice {
            options: IntervalPeriod::NAMES,
        },
    ),
];

static CRONTAB_FIELDS: &[FieldSpec] = &[
    FieldSpec::optional("minute", FieldType::CronField, Some("*")),
    FieldSpec::optional("hour", FieldType::CronField, Some("*")),
    FieldSpec::optional("day_of_week", FieldType::CronField, Some("*")),
    FieldSpec::optional("day_of_month", FieldType::CronField, Some("*")),
    FieldSpec::optional("month_of_year", FieldType::CronField, Some("*")),
    FieldSpec::optional("crontab_line", FieldType::CronLine, None),
];

static SOLAR_FIELDS: &[FieldSpec] = &[
    FieldSpec::required(
        "event",
        FieldType::Choice {
            options: SolarEvent::NAMES,
        },
    ),
    FieldSpec::required("latitude", COORDINATE),
    FieldSpec::required("longitude", COORDINATE),
];

static CLOCKED_FIELDS: &[FieldSpec] = &[FieldSpec::required("clocked_time", FieldType::Timestamp)];
