use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

mod extras;
mod job;
mod params;
mod pipeline;
mod runtime;

pub use extras::JobExtras;
pub use job::{ClipAnalysisJob, JobContext, JobControl};
pub use params::{ConsumerSpec, JobParameters, JobPlan, ParseError, Zone, UNSET};
pub use pipeline::Pipeline;
pub use runtime::{ClipJobRequest, JobsHandle, JobsRuntime};

pub mod keys {
    pub use crate::extras::{FINAL_FILTER, OFFSET, PRODUCER_PROFILE, PROJECT_FILTER, RESIZE_PROFILE, RESULT_KEY};
}

/// Why a job ended without a result. Everything except `Aborted` leaves the
/// job `Crashed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("No producer for this clip.")]
    MissingResource,
    #[error("Invalid job parameters: {0}")]
    InvalidParameters(#[from] ParseError),
    #[error("Clip zone undefined ({start} - {end}).")]
    InvalidZone { start: i64, end: i64 },
    #[error("Cannot open clip {resource}.")]
    ProducerInvalid { resource: String },
    #[error("Cannot create consumer {kind}.")]
    ConsumerInvalid { kind: String },
    #[error("Filter {name} crashed")]
    FilterInvalid { name: String },
    #[error("Processing failed: {0}")]
    Runtime(String),
    #[error("job aborted")]
    Aborted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Working,
    Done,
    Crashed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool { matches!(self, JobStatus::Done | JobStatus::Crashed | JobStatus::Aborted) }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Working => "working",
            JobStatus::Done => "done",
            JobStatus::Crashed => "crashed",
            JobStatus::Aborted => "aborted",
        }
    }
}

/// Job type tag carried by progress events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Mlt,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self { JobKind::Mlt => "mlt" }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClipType {
    #[default]
    Unknown,
    Audio,
    Video,
    #[serde(rename = "av")]
    AudioVideo,
    Image,
    Playlist,
}

impl FromStr for ClipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(ClipType::Unknown),
            "audio" => Ok(ClipType::Audio),
            "video" => Ok(ClipType::Video),
            "av" => Ok(ClipType::AudioVideo),
            "image" => Ok(ClipType::Image),
            "playlist" => Ok(ClipType::Playlist),
            other => Err(format!("unknown clip type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Queued { job_id: String, clip_id: String },
    Status { job_id: String, clip_id: String, status: JobStatus, message: String },
    Progress { job_id: String, clip_id: String, percent: i32, kind: JobKind },
    Result {
        job_id: String,
        clip_id: String,
        insert_pos: i64,
        track: i64,
        results: BTreeMap<String, String>,
        extras: BTreeMap<String, String>,
    },
    Finished { job_id: String, clip_id: String, status: JobStatus, error: Option<String>, destination: Option<String> },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Queued { job_id, .. }
            | JobEvent::Status { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Result { job_id, .. }
            | JobEvent::Finished { job_id, .. } => job_id,
        }
    }
}
