use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use media_io::{resource_path, Engine, FrameShown, StopHandle};
use parking_lot::{Mutex, MutexGuard};
use project::ProjectSettings;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::extras::JobExtras;
use crate::params::JobParameters;
use crate::pipeline::Pipeline;
use crate::{ClipType, JobError, JobEvent, JobKind, JobStatus};

/// What every job needs from its owner.
#[derive(Clone)]
pub struct JobContext {
    pub engine: Arc<dyn Engine>,
    pub settings: ProjectSettings,
    pub events: Sender<JobEvent>,
}

struct ControlState {
    status: JobStatus,
    stop: Option<StopHandle>,
}

/// Status of a job, shared with whoever may cancel it. Every method is safe to
/// call from any thread while the job runs.
#[derive(Clone)]
pub struct JobControl {
    inner: Arc<Mutex<ControlState>>,
}

impl JobControl {
    fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(ControlState { status: JobStatus::Waiting, stop: None })) }
    }

    pub fn status(&self) -> JobStatus { self.inner.lock().status }

    /// Moving to `Aborted` stops a running consumer. Aborting a job that
    /// already finished does nothing.
    pub fn set_status(&self, status: JobStatus) {
        let mut state = self.inner.lock();
        if status == JobStatus::Aborted && state.status.is_terminal() {
            debug!(status = ?state.status, "ignoring cancel of finished job");
            return;
        }
        state.status = status;
        if status == JobStatus::Aborted {
            if let Some(stop) = &state.stop {
                stop.stop();
            }
        }
    }

    pub fn cancel(&self) { self.set_status(JobStatus::Aborted); }

    /// Move to `Crashed` unless the job was cancelled. Returns false when the
    /// cancel won.
    fn crash(&self) -> bool {
        let mut state = self.inner.lock();
        if state.status == JobStatus::Aborted { return false; }
        state.status = JobStatus::Crashed;
        true
    }

    /// Enter `Working` and publish the consumer's stop handle, unless a cancel
    /// already arrived.
    fn begin_running(&self, stop: StopHandle) -> bool {
        let mut state = self.inner.lock();
        if state.status == JobStatus::Aborted { return false; }
        state.status = JobStatus::Working;
        state.stop = Some(stop);
        true
    }

    fn end_running(&self) { self.inner.lock().stop = None; }

    fn lock(&self) -> MutexGuard<'_, ControlState> { self.inner.lock() }
}

/// Runs one filter over one clip through the engine and reports the value the
/// filter computed.
pub struct ClipAnalysisJob {
    id: String,
    clip_id: String,
    clip_type: ClipType,
    description: String,
    params: Option<JobParameters>,
    extras: JobExtras,
    resource: Option<String>,
    destination: Option<String>,
    errors: Vec<String>,
    control: JobControl,
    context: JobContext,
}

impl ClipAnalysisJob {
    pub fn new(clip_type: ClipType, clip_id: impl Into<String>, params: JobParameters, extras: JobExtras, context: JobContext) -> Self {
        let destination = params.consumer().and_then(|c| c.target);
        Self {
            id: Uuid::new_v4().to_string(),
            clip_id: clip_id.into(),
            clip_type,
            description: "Process clip".to_string(),
            params: Some(params),
            extras,
            resource: None,
            destination,
            errors: Vec::new(),
            control: JobControl::new(),
            context,
        }
    }

    pub fn id(&self) -> &str { &self.id }

    pub fn clip_id(&self) -> &str { &self.clip_id }

    pub fn clip_type(&self) -> ClipType { self.clip_type }

    pub fn kind(&self) -> JobKind { JobKind::Mlt }

    pub fn extras(&self) -> &JobExtras { &self.extras }

    pub fn set_resource(&mut self, url: &str) {
        let path = resource_path(url);
        self.resource = if path.is_empty() { None } else { Some(path) };
    }

    pub fn destination(&self) -> Option<&str> { self.destination.as_deref() }

    pub fn is_project_filter(&self) -> bool { self.extras.is_project_filter() }

    pub fn control(&self) -> JobControl { self.control.clone() }

    pub fn status(&self) -> JobStatus { self.control.status() }

    pub fn set_status(&self, status: JobStatus) { self.control.set_status(status); }

    pub fn status_message(&self) -> String {
        match self.status() {
            JobStatus::Working => self.description.clone(),
            JobStatus::Waiting => "Waiting to process clip".to_string(),
            _ => String::new(),
        }
    }

    pub fn error_message(&self) -> String { self.errors.join("\n") }

    /// Build and run the pipeline on the calling thread. Blocks until the
    /// clip is processed, the job fails, or it is cancelled. The outcome is
    /// left in `status()` and `error_message()`.
    pub fn start_job(&mut self) {
        if self.status() == JobStatus::Aborted {
            info!(job = %self.id, "job cancelled before start");
            return;
        }
        match self.execute() {
            Ok(()) => info!(job = %self.id, clip = %self.clip_id, status = ?self.status(), "job finished"),
            Err(JobError::Aborted) => info!(job = %self.id, "job cancelled before the pipeline started"),
            Err(err) => {
                if self.control.crash() {
                    error!(job = %self.id, clip = %self.clip_id, error = %err, "job crashed");
                    self.errors.push(err.to_string());
                } else {
                    info!(job = %self.id, error = %err, "job cancelled, ignoring engine error");
                }
            }
        }
    }

    fn execute(&mut self) -> Result<(), JobError> {
        let resource = self.resource.clone().ok_or(JobError::MissingResource)?;
        let plan = self.params.take().unwrap_or_default().decode(&mut self.extras)?;
        if let Some(target) = &plan.consumer.target {
            self.destination = Some(target.clone());
        }
        debug!(job = %self.id, ?plan, "decoded job parameters");

        let mut pipeline = Pipeline::build(self.context.engine.as_ref(), &self.context.settings, &resource, &plan, &self.extras)?;
        let length = pipeline.length();
        pipeline.subscribe(self.progress_listener(length));

        if !self.control.begin_running(pipeline.stop_handle()) {
            return Err(JobError::Aborted);
        }
        let _ = self.context.events.send(JobEvent::Status {
            job_id: self.id.clone(),
            clip_id: self.clip_id.clone(),
            status: JobStatus::Working,
            message: self.description.clone(),
        });
        info!(job = %self.id, clip = %self.clip_id, filter = %plan.filter, length, "pipeline running");
        let outcome = pipeline.run();
        self.control.end_running();
        outcome.map_err(|e| JobError::Runtime(e.to_string()))?;

        self.complete(&pipeline, plan.insert_pos, plan.track);
        Ok(())
    }

    /// Result emission and the move to `Done` happen under the control lock,
    /// so a concurrent cancel lands either entirely before or entirely after.
    fn complete(&self, pipeline: &Pipeline, insert_pos: i64, track: i64) {
        let mut state = self.control.lock();
        if state.status == JobStatus::Aborted {
            warn!(job = %self.id, "job aborted, discarding results");
            return;
        }
        if let Some(key) = self.extras.result_key() {
            let value = pipeline.filter_property(key).unwrap_or_default();
            let mut results = BTreeMap::new();
            results.insert(key.to_string(), value);
            let _ = self.context.events.send(JobEvent::Result {
                job_id: self.id.clone(),
                clip_id: self.clip_id.clone(),
                insert_pos,
                track,
                results,
                extras: self.extras.as_map().clone(),
            });
        }
        if state.status == JobStatus::Working {
            state.status = JobStatus::Done;
        }
    }

    fn progress_listener(&self, length: i64) -> FrameShown {
        let events = self.context.events.clone();
        let job_id = self.id.clone();
        let clip_id = self.clip_id.clone();
        let kind = self.kind();
        Box::new(move |position| {
            if length <= 0 { return; }
            let percent = (100 * position / length).clamp(0, 100) as i32;
            let _ = events.send(JobEvent::Progress { job_id: job_id.clone(), clip_id: clip_id.clone(), percent, kind });
        })
    }
}
