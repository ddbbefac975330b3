//! Schedule values: per-kind field structs, validation against the catalog
//! schema, and the canonical content key used as the store's primary key.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::catalog::{FieldSpec, FieldType, IntervalPeriod, ScheduleKind, SolarEvent};
use crate::error::{Result, SchedulerError};

/// Raw, uncoerced field values keyed by field name.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSchedule {
    pub every: u64,
    pub period: IntervalPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrontabSchedule {
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
    pub day_of_month: String,
    pub month_of_year: String,
}

impl Default for CrontabSchedule {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_week: "*".to_string(),
            day_of_month: "*".to_string(),
            month_of_year: "*".to_string(),
        }
    }
}

impl CrontabSchedule {
    /// Expand a compact `minute hour day_of_week day_of_month month_of_year` line.
    pub fn from_line(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let &[minute, hour, day_of_week, day_of_month, month_of_year] = tokens.as_slice() else {
            return Err(SchedulerError::field(
                "crontab_line",
                format!("expected 5 fields, got {}", tokens.len()),
            ));
        };
        Ok(Self {
            minute: cron_field("minute", minute)?,
            hour: cron_field("hour", hour)?,
            day_of_week: cron_field("day_of_week", day_of_week)?,
            day_of_month: cron_field("day_of_month", day_of_month)?,
            month_of_year: cron_field("month_of_year", month_of_year)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSchedule {
    pub event: SolarEvent,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockedSchedule {
    pub clocked_time: DateTime<Utc>,
}

/// A validated schedule value. Two specs that compare equal are the same
/// schedule entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    Interval(IntervalSchedule),
    Crontab(CrontabSchedule),
    Solar(SolarSchedule),
    Clocked(ClockedSchedule),
}

impl ScheduleSpec {
    /// Validate raw `fields` against the schema of `kind`.
    ///
    /// Unknown keys are ignored. Naive timestamps are read in `tz`.
    pub fn from_fields(kind: ScheduleKind, fields: &Fields, tz: Tz) -> Result<Self> {
        let mut values = Coerced::default();
        for spec in kind.schema() {
            match fields.get(spec.name) {
                Some(Value::Null) | None => {
                    if spec.required {
                        return Err(SchedulerError::field(spec.name, "missing required field"));
                    }
                }
                Some(raw) => values.push(spec, coerce(spec, raw, tz)?),
            }
        }

        let spec = match kind {
            ScheduleKind::Interval => ScheduleSpec::Interval(IntervalSchedule {
                every: values.int("every")?,
                period: values
                    .text("period")?
                    .parse()
                    .map_err(|e: String| SchedulerError::field("period", e))?,
            }),
            ScheduleKind::Crontab => {
                // A compact line populates all five fields at once.
                let crontab = match values.opt_text("crontab_line") {
                    Some(line) => CrontabSchedule::from_line(&line)?,
                    None => {
                        let defaults = CrontabSchedule::default();
                        CrontabSchedule {
                            minute: values.opt_text("minute").unwrap_or(defaults.minute),
                            hour: values.opt_text("hour").unwrap_or(defaults.hour),
                            day_of_week: values
                                .opt_text("day_of_week")
                                .unwrap_or(defaults.day_of_week),
                            day_of_month: values
                                .opt_text("day_of_month")
                                .unwrap_or(defaults.day_of_month),
                            month_of_year: values
                                .opt_text("month_of_year")
                                .unwrap_or(defaults.month_of_year),
                        }
                    }
                };
                ScheduleSpec::Crontab(crontab)
            }
            ScheduleKind::Solar => ScheduleSpec::Solar(SolarSchedule {
                event: values
                    .text("event")?
                    .parse()
                    .map_err(|e: String| SchedulerError::field("event", e))?,
                latitude: values.float("latitude")?,
                longitude: values.float("longitude")?,
            }),
            ScheduleKind::Clocked => ScheduleSpec::Clocked(ClockedSchedule {
                clocked_time: values.time("clocked_time")?,
            }),
        };
        Ok(spec)
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            ScheduleSpec::Interval(_) => ScheduleKind::Interval,
            ScheduleSpec::Crontab(_) => ScheduleKind::Crontab,
            ScheduleSpec::Solar(_) => ScheduleKind::Solar,
            ScheduleSpec::Clocked(_) => ScheduleKind::Clocked,
        }
    }

    /// Content key: sha256 over the kind-tagged normalized JSON encoding.
    ///
    /// Field order is fixed by the struct definitions, so equal specs always
    /// encode to the same bytes.
    pub fn canonical_key(&self) -> Result<String> {
        let encoded = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }

    /// Human-readable description, e.g. `every 20 seconds`.
    pub fn summary(&self) -> String {
        match self {
            ScheduleSpec::Interval(i) => format!("every {} {}", i.every, i.period.as_str()),
            ScheduleSpec::Crontab(c) => format!(
                "{} {} {} {} {} (m/h/dw/dM/MY)",
                c.minute, c.hour, c.day_of_week, c.day_of_month, c.month_of_year
            ),
            ScheduleSpec::Solar(s) => {
                format!("{} ({}, {})", s.event.as_str(), s.latitude, s.longitude)
            }
            ScheduleSpec::Clocked(c) => format!("at {}", c.clocked_time.to_rfc3339()),
        }
    }
}

impl std::fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Parse a timestamp. RFC 3339 offsets are honoured; naive values are read
/// in `tz`. The result is always UTC.
pub fn parse_timestamp(field: &str, raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| SchedulerError::field(field, format!("unparseable timestamp: {raw}")))?;

    // Ambiguous local times (DST fold) resolve to the earlier instant.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| {
            SchedulerError::field(field, format!("{raw} does not exist in timezone {tz}"))
        })
}

// --- coercion ----------------------------------------------------------------

#[derive(Debug, Clone)]
enum FieldValue {
    Int(u64),
    Float(f64),
    Text(String),
    Time(DateTime<Utc>),
}

#[derive(Default)]
struct Coerced(Vec<(&'static str, FieldValue)>);

impl Coerced {
    fn push(&mut self, spec: &FieldSpec, value: FieldValue) {
        self.0.push((spec.name, value));
    }

    fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    fn missing(name: &str) -> SchedulerError {
        SchedulerError::field(name, "missing required field")
    }

    fn int(&self, name: &str) -> Result<u64> {
        match self.get(name) {
            Some(FieldValue::Int(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    fn float(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(FieldValue::Float(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    fn time(&self, name: &str) -> Result<DateTime<Utc>> {
        match self.get(name) {
            Some(FieldValue::Time(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    fn text(&self, name: &str) -> Result<String> {
        self.opt_text(name).ok_or_else(|| Self::missing(name))
    }

    fn opt_text(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Some(FieldValue::Text(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

fn coerce(spec: &FieldSpec, raw: &Value, tz: Tz) -> Result<FieldValue> {
    let name = spec.name;
    match spec.ty {
        FieldType::PositiveInteger => {
            let n = match raw {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| SchedulerError::field(name, format!("expected an integer, got {raw}")))?;
            if n <= 0 {
                return Err(SchedulerError::field(name, "must be > 0"));
            }
            Ok(FieldValue::Int(n as u64))
        }
        FieldType::Choice { options } => {
            let s = as_text(name, raw)?;
            let s = s.trim().to_lowercase();
            if !options.contains(&s.as_str()) {
                return Err(SchedulerError::field(
                    name,
                    format!("{s} is not one of {}", options.join(", ")),
                ));
            }
            Ok(FieldValue::Text(s))
        }
        FieldType::CronField => Ok(FieldValue::Text(cron_field(name, &as_text(name, raw)?)?)),
        FieldType::CronLine => Ok(FieldValue::Text(as_text(name, raw)?)),
        FieldType::Float { min, max } => {
            let v = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|v| v.is_finite())
            .ok_or_else(|| SchedulerError::field(name, format!("expected a number, got {raw}")))?;
            if !(min..=max).contains(&v) {
                return Err(SchedulerError::field(
                    name,
                    format!("must be >= {min} and <= {max}"),
                ));
            }
            // -0.0 == 0.0 but serializes differently; keep one key per value.
            Ok(FieldValue::Float(if v == 0.0 { 0.0 } else { v }))
        }
        FieldType::Timestamp => Ok(FieldValue::Time(parse_timestamp(
            name,
            &as_text(name, raw)?,
            tz,
        )?)),
    }
}

fn as_text(name: &str, raw: &Value) -> Result<String> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(SchedulerError::field(
            name,
            format!("expected a string, got {other}"),
        )),
    }
}

fn cron_field(name: &str, raw: &str) -> Result<String> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return Err(SchedulerError::field(name, "must not be empty"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(SchedulerError::field(name, "must be a single cron field"));
    }
    Ok(value)
}
