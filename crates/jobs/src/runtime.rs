use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use media_io::Engine;
use parking_lot::Mutex;
use project::ProjectSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::job::{ClipAnalysisJob, JobContext, JobControl};
use crate::{ClipType, JobEvent, JobExtras, JobParameters, JobStatus};

/// Everything needed to construct a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipJobRequest {
    pub clip_id: String,
    #[serde(default)]
    pub clip_type: ClipType,
    pub resource: String,
    pub parameters: Vec<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

/// Controls of unfinished jobs. `closed` is set once the runtime shuts down;
/// from then on nothing reaches the queue.
#[derive(Default)]
struct Registry {
    jobs: HashMap<String, JobControl>,
    closed: bool,
}

type Controls = Arc<Mutex<Registry>>;

#[derive(Clone)]
pub struct JobsHandle {
    tx_submit: Sender<ClipAnalysisJob>,
    context: JobContext,
    controls: Controls,
    pub rx_events: Receiver<JobEvent>,
}

/// Pool of workers, each running one job at a time to completion.
pub struct JobsRuntime {
    handle: JobsHandle,
    rx_submit: Receiver<ClipAnalysisJob>,
    tx_shutdown: Option<Sender<()>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl JobsRuntime {
    pub fn start(num_workers: usize, engine: Arc<dyn Engine>, settings: ProjectSettings) -> Self {
        let (tx_submit, rx_submit) = unbounded::<ClipAnalysisJob>();
        let (tx_events, rx_events) = unbounded::<JobEvent>();
        let (tx_shutdown, rx_shutdown) = unbounded::<()>();
        let context = JobContext { engine, settings, events: tx_events };
        let controls: Controls = Arc::new(Mutex::new(Registry::default()));

        let mut runtime = JobsRuntime {
            handle: JobsHandle { tx_submit, context, controls, rx_events },
            rx_submit,
            tx_shutdown: Some(tx_shutdown),
            workers: Vec::new(),
        };
        runtime.spawn_workers(num_workers.max(1), rx_shutdown);
        runtime
    }

    fn spawn_workers(&mut self, n: usize, rx_shutdown: Receiver<()>) {
        for i in 0..n {
            let rx_jobs = self.rx_submit.clone();
            let rx_shutdown = rx_shutdown.clone();
            let controls = self.handle.controls.clone();
            let tx_e = self.handle.context.events.clone();
            let spawned = thread::Builder::new().name(format!("clip-job-{i}")).spawn(move || loop {
                if matches!(rx_shutdown.try_recv(), Err(TryRecvError::Disconnected)) { break; }
                crossbeam_channel::select! {
                    recv(rx_shutdown) -> _ => break,
                    recv(rx_jobs) -> msg => match msg {
                        Ok(mut job) => {
                            job.start_job();
                            finish(job, &controls, &tx_e);
                        }
                        Err(_) => break,
                    },
                }
            });
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => error!(worker = i, error = %e, "failed to spawn job worker"),
            }
        }
        info!(workers = self.workers.len(), "job workers started");
    }

    pub fn handle(&self) -> JobsHandle { self.handle.clone() }

    /// Cancel everything, wait for the workers, and report queued jobs as
    /// aborted.
    pub fn shutdown(self) { drop(self); }
}

impl Drop for JobsRuntime {
    fn drop(&mut self) {
        {
            let mut registry = self.handle.controls.lock();
            registry.closed = true;
            for control in registry.jobs.values() {
                control.cancel();
            }
        }
        drop(self.tx_shutdown.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        while let Ok(job) = self.rx_submit.try_recv() {
            job.set_status(JobStatus::Aborted);
            finish(job, &self.handle.controls, &self.handle.context.events);
        }
        debug!("job workers stopped");
    }
}

fn finish(job: ClipAnalysisJob, controls: &Mutex<Registry>, events: &Sender<JobEvent>) {
    controls.lock().jobs.remove(job.id());
    let error = job.error_message();
    let _ = events.send(JobEvent::Finished {
        job_id: job.id().to_string(),
        clip_id: job.clip_id().to_string(),
        status: job.status(),
        error: (!error.is_empty()).then_some(error),
        destination: job.destination().map(str::to_string),
    });
}

impl JobsHandle {
    pub fn enqueue(&self, request: ClipJobRequest) -> String {
        let mut job = ClipAnalysisJob::new(
            request.clip_type,
            request.clip_id,
            JobParameters::new(request.parameters),
            JobExtras::from(request.extras),
            self.context.clone(),
        );
        job.set_resource(&request.resource);
        let id = job.id().to_string();
        let clip_id = job.clip_id().to_string();
        let _ = self.context.events.send(JobEvent::Queued { job_id: id.clone(), clip_id: clip_id.clone() });
        let _ = self.context.events.send(JobEvent::Status {
            job_id: id.clone(),
            clip_id,
            status: JobStatus::Waiting,
            message: job.status_message(),
        });

        // registering and queueing under the lock keeps a concurrent shutdown
        // from missing the job
        let mut registry = self.controls.lock();
        let rejected = if registry.closed {
            Some(job)
        } else {
            registry.jobs.insert(id.clone(), job.control());
            self.tx_submit.send(job).err().map(|e| e.into_inner())
        };
        drop(registry);
        if let Some(job) = rejected {
            debug!(job = %id, "runtime closed, aborting job");
            job.set_status(JobStatus::Aborted);
            finish(job, &self.controls, &self.context.events);
        }
        id
    }

    /// Cancel a queued or running job. Returns false if the job is unknown or
    /// already finished.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        match self.controls.lock().jobs.get(job_id) {
            Some(control) => {
                control.cancel();
                true
            }
            None => false,
        }
    }

    /// Status of a job that has not finished yet.
    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.controls.lock().jobs.get(job_id).map(JobControl::status)
    }

    pub fn active_jobs(&self) -> usize { self.controls.lock().jobs.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_io::sim::{SimEngine, SimMedia};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn engine() -> Arc<SimEngine> {
        Arc::new(
            SimEngine::new()
                .with_media("/clips/short.mp4", SimMedia::new(100))
                .with_media("/clips/long.mp4", SimMedia::new(20_000).with_frame_delay(Duration::from_millis(1))),
        )
    }

    fn request(resource: &str, tokens: &[&str], extras: &[(&str, &str)]) -> ClipJobRequest {
        ClipJobRequest {
            clip_id: "clip-9".into(),
            clip_type: ClipType::Video,
            resource: resource.into(),
            parameters: tokens.iter().map(|s| s.to_string()).collect(),
            extras: extras.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    /// Events of `job_id` up to and including its `Finished`.
    fn collect_until_finished(rx: &Receiver<JobEvent>, job_id: &str) -> Vec<JobEvent> {
        let mut out = Vec::new();
        loop {
            let ev = rx.recv_timeout(TIMEOUT).expect("job event");
            if ev.job_id() != job_id { continue; }
            let done = matches!(ev, JobEvent::Finished { .. });
            out.push(ev);
            if done { return out; }
        }
    }

    fn wait_for_progress(rx: &Receiver<JobEvent>, job_id: &str) {
        loop {
            let ev = rx.recv_timeout(TIMEOUT).expect("job event");
            if ev.job_id() == job_id && matches!(ev, JobEvent::Progress { .. }) { return; }
        }
    }

    #[test]
    fn test_job_runs_to_done() {
        let runtime = JobsRuntime::start(2, engine(), ProjectSettings::default());
        let h = runtime.handle();
        let id = h.enqueue(request("/clips/short.mp4", &["0", "50", "", "brightness", "level=50", "xml:/tmp/out.mlt", "", "10", "1"], &[("key", "level")]));
        let events = collect_until_finished(&h.rx_events, &id);

        assert!(matches!(events[0], JobEvent::Queued { .. }));
        assert!(matches!(&events[1], JobEvent::Status { status: JobStatus::Waiting, message, .. } if message == "Waiting to process clip"));
        assert!(matches!(&events[2], JobEvent::Status { status: JobStatus::Working, message, .. } if message == "Process clip"));
        assert!(events.iter().any(|e| matches!(e, JobEvent::Result { insert_pos: 10, track: 1, .. })));
        match events.last() {
            Some(JobEvent::Finished { status, error, destination, .. }) => {
                assert_eq!(*status, JobStatus::Done);
                assert_eq!(*error, None);
                assert_eq!(destination.as_deref(), Some("/tmp/out.mlt"));
            }
            other => panic!("unexpected last event {other:?}"),
        }
        assert_eq!(h.active_jobs(), 0);
        assert_eq!(h.status(&id), None);
        runtime.shutdown();
    }

    #[test]
    fn test_crash_is_reported_in_finished_event() {
        let runtime = JobsRuntime::start(1, engine(), ProjectSettings::default());
        let h = runtime.handle();
        let id = h.enqueue(request("/clips/short.mp4", &["0", "50", "", "no_such_filter", "", "null", ""], &[]));
        let events = collect_until_finished(&h.rx_events, &id);
        match events.last() {
            Some(JobEvent::Finished { status, error, .. }) => {
                assert_eq!(*status, JobStatus::Crashed);
                assert_eq!(error.as_deref(), Some("Filter no_such_filter crashed"));
            }
            other => panic!("unexpected last event {other:?}"),
        }
        assert!(!events.iter().any(|e| matches!(e, JobEvent::Progress { .. })));
    }

    #[test]
    fn test_cancel_running_and_queued_jobs() {
        let engine = engine();
        let runtime = JobsRuntime::start(1, engine.clone(), ProjectSettings::default());
        let h = runtime.handle();
        let long = h.enqueue(request("/clips/long.mp4", &["0", "-1", "", "framecount", "", "null", ""], &[("key", "frames")]));
        let queued = h.enqueue(request("/clips/short.mp4", &["0", "-1", "", "framecount", "", "null", ""], &[("key", "frames")]));

        wait_for_progress(&h.rx_events, &long);
        assert_eq!(h.status(&long), Some(JobStatus::Working));
        assert_eq!(h.status(&queued), Some(JobStatus::Waiting));
        assert!(h.cancel_job(&queued));
        assert!(h.cancel_job(&long));

        let long_events = collect_until_finished(&h.rx_events, &long);
        assert!(matches!(long_events.last(), Some(JobEvent::Finished { status: JobStatus::Aborted, .. })));
        assert!(!long_events.iter().any(|e| matches!(e, JobEvent::Result { .. })));

        let queued_events = collect_until_finished(&h.rx_events, &queued);
        assert!(matches!(queued_events.last(), Some(JobEvent::Finished { status: JobStatus::Aborted, .. })));
        assert!(!queued_events.iter().any(|e| matches!(e, JobEvent::Progress { .. } | JobEvent::Result { .. })));

        assert!(!h.cancel_job(&long));
        runtime.shutdown();
        assert_eq!(engine.stats().live_handles(), 0);
        assert_eq!(engine.stats().producers_opened, 1);
    }

    #[test]
    fn test_shutdown_aborts_outstanding_jobs() {
        let runtime = JobsRuntime::start(1, engine(), ProjectSettings::default());
        let h = runtime.handle();
        let running = h.enqueue(request("/clips/long.mp4", &["0", "-1", "", "brightness", "", "null", ""], &[]));
        let waiting = h.enqueue(request("/clips/short.mp4", &["0", "-1", "", "brightness", "", "null", ""], &[]));
        wait_for_progress(&h.rx_events, &running);
        runtime.shutdown();

        for id in [&running, &waiting] {
            let events = collect_until_finished(&h.rx_events, id);
            assert!(matches!(events.last(), Some(JobEvent::Finished { status: JobStatus::Aborted, .. })));
        }
        assert_eq!(h.active_jobs(), 0);

        let late = h.enqueue(request("/clips/short.mp4", &["0", "-1", "", "brightness", "", "null", ""], &[]));
        let events = collect_until_finished(&h.rx_events, &late);
        assert!(matches!(events.last(), Some(JobEvent::Finished { status: JobStatus::Aborted, .. })));
    }

    #[test]
    fn test_enqueue_racing_shutdown_never_leaves_jobs_behind() {
        let runtime = JobsRuntime::start(2, engine(), ProjectSettings::default());
        let h = runtime.handle();
        let submitter = {
            let h = h.clone();
            thread::spawn(move || {
                (0..200)
                    .map(|_| h.enqueue(request("/clips/short.mp4", &["0", "-1", "", "brightness", "", "null", ""], &[])))
                    .collect::<Vec<_>>()
            })
        };
        thread::sleep(Duration::from_millis(5));
        runtime.shutdown();
        let ids = submitter.join().unwrap();

        let mut finished = HashMap::new();
        while finished.len() < ids.len() {
            if let JobEvent::Finished { job_id, status, .. } = h.rx_events.recv_timeout(TIMEOUT).expect("job event") {
                finished.insert(job_id, status);
            }
        }
        for id in &ids {
            assert!(matches!(finished.get(id), Some(JobStatus::Done | JobStatus::Aborted)), "job {id} ended as {:?}", finished.get(id));
        }
        assert_eq!(h.active_jobs(), 0);
    }

    #[test]
    fn test_request_from_json() {
        let req: ClipJobRequest = serde_json::from_str(
            r#"{"clip_id": "7", "resource": "file:///a.mp4", "parameters": ["0", "-1", "", "brightness", "", "null", ""]}"#,
        )
        .unwrap();
        assert_eq!(req.clip_type, ClipType::Unknown);
        assert!(req.extras.is_empty());
    }
}
