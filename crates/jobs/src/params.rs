use std::collections::VecDeque;
use std::fmt;

use media_io::SettingsList;
use thiserror::Error;
use tracing::debug;

use crate::extras::{JobExtras, FINAL_FILTER, OFFSET};
use crate::JobError;

/// Sentinel for "not set" in the integer tokens.
pub const UNSET: i64 = -1;

const CONSUMER_INDEX: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing {field}")]
    Missing { field: &'static str },
    #[error("{field} is not an integer: {value:?}")]
    NotAnInteger { field: &'static str, value: String },
}

/// Flat token list a job is created from:
/// `in, out, producer settings, filter, filter settings, consumer, consumer
/// settings[, insert position[, track]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobParameters {
    tokens: VecDeque<String>,
}

impl JobParameters {
    pub fn new<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Self {
        Self { tokens: tokens.into_iter().map(Into::into).collect() }
    }

    pub fn len(&self) -> usize { self.tokens.len() }

    pub fn is_empty(&self) -> bool { self.tokens.is_empty() }

    /// Consumer token, if the list is long enough to hold one.
    pub fn consumer(&self) -> Option<ConsumerSpec> {
        self.tokens.get(CONSUMER_INDEX).map(|s| ConsumerSpec::parse(s))
    }

    fn take(&mut self, field: &'static str) -> Result<String, ParseError> {
        self.tokens.pop_front().ok_or(ParseError::Missing { field })
    }

    fn take_int(&mut self, field: &'static str) -> Result<i64, ParseError> {
        let value = self.take(field)?;
        value.trim().parse().map_err(|_| ParseError::NotAnInteger { field, value })
    }

    fn take_optional_int(&mut self, field: &'static str) -> Result<i64, ParseError> {
        if self.tokens.is_empty() { return Ok(UNSET); }
        self.take_int(field)
    }

    /// Consume the tokens into a plan. Fills the `offset` and `finalfilter`
    /// defaults in `extras` along the way.
    pub fn decode(mut self, extras: &mut JobExtras) -> Result<JobPlan, JobError> {
        let start = self.take_int("trim in")?;
        if start > 0 {
            extras.insert_default(OFFSET, start.to_string());
        }
        let end = self.take_int("trim out")?;
        let producer_settings = SettingsList::parse(&self.take("producer settings")?);
        let filter = self.take("filter name")?;
        let filter_settings = SettingsList::parse(&self.take("filter settings")?);
        let consumer = ConsumerSpec::parse(&self.take("consumer")?);
        let consumer_settings = SettingsList::parse(&self.take("consumer settings")?);
        let insert_pos = self.take_optional_int("insert position")?;
        let track = self.take_optional_int("track")?;
        if !self.tokens.is_empty() {
            debug!(extra = ?self.tokens, "ignoring trailing job parameters");
        }
        extras.insert_default(FINAL_FILTER, filter.clone());

        let zone = Zone::new(start, end)?;
        Ok(JobPlan { zone, producer_settings, filter, filter_settings, consumer, consumer_settings, insert_pos, track })
    }
}

/// Trim range. `end` is exclusive; `None` means the whole clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub start: i64,
    pub end: Option<i64>,
}

impl Zone {
    pub fn new(start: i64, end: i64) -> Result<Self, JobError> {
        if end == UNSET {
            return Ok(Self { start, end: None });
        }
        if end <= start {
            return Err(JobError::InvalidZone { start, end });
        }
        Ok(Self { start, end: Some(end) })
    }

    pub fn length(&self) -> Option<i64> { self.end.map(|end| end - self.start) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub kind: String,
    pub target: Option<String>,
}

impl ConsumerSpec {
    /// `kind:target` or a bare `kind`. Only the first `:` separates, so
    /// targets may contain colons.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((kind, target)) => Self { kind: kind.to_string(), target: Some(target.to_string()) },
            None => Self { kind: spec.to_string(), target: None },
        }
    }
}

impl fmt::Display for ConsumerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}:{}", self.kind, target),
            None => f.write_str(&self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub zone: Zone,
    pub producer_settings: SettingsList,
    pub filter: String,
    pub filter_settings: SettingsList,
    pub consumer: ConsumerSpec,
    pub consumer_settings: SettingsList,
    pub insert_pos: i64,
    pub track: i64,
}
