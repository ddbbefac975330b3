use anyhow::{bail, Context};
use cadence_scheduler::schedule::{parse_timestamp, Fields};
use cadence_scheduler::{CreateTask, TaskSpec};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

/// Periodic task registry.
#[derive(Parser, Debug)]
#[command(name = "cadence", about = "Manage periodic tasks and their schedules")]
pub struct Cli {
    /// Path to config file (default: $CADENCE_CONFIG or ~/.cadence/cadence.toml).
    #[arg(long = "config", global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a periodic task, resolving (or reusing) its schedule.
    Create(CreateArgs),

    /// Delete a periodic task and collect its schedule if unused.
    Delete { name: String },

    /// List periodic tasks with their schedule and failure streak.
    List,

    /// List registered executables.
    Executables,

    /// Print the field schema of every schedule kind.
    Kinds,

    /// Re-enable a task (e.g. after the circuit breaker tripped).
    Enable { name: String },

    /// Disable a task without deleting it.
    Disable { name: String },

    /// Run one schedule collection pass.
    Gc,

    /// Run the schedule collector until Ctrl-C.
    Collect,
}

#[derive(clap::Args, Debug)]
pub struct CreateArgs {
    /// Unique task name.
    pub name: String,

    /// Registered executable to run.
    #[arg(long)]
    pub target: String,

    /// Positional argument; JSON if it parses, string otherwise. Repeatable.
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Named argument as key=value. Repeatable.
    #[arg(long = "kwarg")]
    pub kwargs: Vec<String>,

    /// Schedule kind: interval, crontab, solar or clocked.
    #[arg(long)]
    pub kind: String,

    /// Schedule field as key=value, e.g. --field every=20. Repeatable.
    #[arg(long = "field")]
    pub fields: Vec<String>,

    /// Crontab shorthand: "minute hour day_of_week day_of_month month_of_year".
    #[arg(long)]
    pub crontab_line: Option<String>,

    /// Run once, then disable. Requires a clocked schedule.
    #[arg(long)]
    pub one_off: bool,

    /// Create the task disabled.
    #[arg(long)]
    pub disabled: bool,

    /// Priority, 0 (lowest) to 255.
    #[arg(long)]
    pub priority: Option<u8>,

    /// When the schedule starts triggering.
    #[arg(long)]
    pub start_time: Option<String>,

    /// When the schedule stops triggering.
    #[arg(long)]
    pub expires: Option<String>,
}

impl CreateArgs {
    /// Turn parsed flags into a service request. Naive times use `tz`.
    pub fn into_request(self, tz: Tz) -> anyhow::Result<CreateTask> {
        let mut schedule_fields: Fields = parse_pairs("--field", &self.fields)?;
        if let Some(line) = self.crontab_line {
            schedule_fields.insert("crontab_line".to_string(), Value::String(line));
        }

        let start_time = self
            .start_time
            .map(|raw| parse_timestamp("start_time", &raw, tz))
            .transpose()?;
        let expires = self
            .expires
            .map(|raw| parse_timestamp("expires", &raw, tz))
            .transpose()?;

        let mut task = TaskSpec::new(self.name, self.target);
        task.args = self.args.iter().map(|a| json_or_string(a)).collect();
        task.kwargs = parse_pairs("--kwarg", &self.kwargs)?;
        task.enabled = !self.disabled;
        task.one_off = self.one_off;
        task.priority = self.priority;
        task.start_time = start_time;
        task.expires = expires;

        Ok(CreateTask {
            task,
            schedule_kind: self.kind,
            schedule_fields,
        })
    }
}

fn json_or_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_pairs(flag: &str, pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("{flag} expects key=value, got {pair:?}"))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("{flag} has an empty key in {pair:?}");
        }
        map.insert(key.to_string(), json_or_string(value));
    }
    Ok(map)
}
