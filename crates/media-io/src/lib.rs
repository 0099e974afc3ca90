//! Media engine seam for clip processing jobs.
//!
//! A job drives a profile -> producer -> filter -> consumer pipeline. The
//! traits here describe the handles an engine hands out; every handle owns its
//! native resources and releases them on drop. `sim` provides an in-process
//! engine that produces synthetic frames.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod profile;
mod resource;
mod settings;
pub mod sim;

pub use profile::{Profile, ProfilePreset, PROFILE_PRESETS};
pub use resource::resource_path;
pub use settings::SettingsList;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    #[error("unknown {kind} service: {name}")]
    UnknownService { kind: &'static str, name: String },
    #[error("invalid range {in_point}..{out_point} for producer of length {length}")]
    InvalidRange { in_point: i64, out_point: i64, length: i64 },
    #[error("engine failure: {0}")]
    Runtime(String),
}

/// Native stream parameters reported by an opened producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub sample_aspect_num: u32,
    pub sample_aspect_den: u32,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self { width: 1920, height: 1080, frame_rate_num: 25, frame_rate_den: 1, sample_aspect_num: 1, sample_aspect_den: 1 }
    }
}

/// String property bag carried by every service and frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self { Self::default() }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> { self.0.get(key).map(String::as_str) }

    pub fn get_int(&self, key: &str) -> Option<i64> { self.get(key).and_then(|v| v.trim().parse().ok()) }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub position: i64,
    pub properties: Properties,
}

/// Common surface of producers, filters and consumers.
pub trait Service: Send {
    fn is_valid(&self) -> bool;
    fn set(&mut self, key: &str, value: &str);
    fn get(&self, key: &str) -> Option<String>;
}

pub trait Producer: Service {
    /// Natural length in frames.
    fn length(&self) -> i64;

    /// Frames that will actually play, which differs from `length` only for
    /// engines that pad their cuts.
    fn playtime(&self) -> i64 { self.length() }

    fn media_info(&self) -> MediaInfo;

    /// Derive a producer covering `[in_point, out_point)` of this one.
    fn cut(&self, in_point: i64, out_point: i64) -> Result<Box<dyn Producer>, EngineError>;

    fn set_speed(&mut self, speed: f64);
    fn seek(&mut self, position: i64);
    fn position(&self) -> i64;

    /// Frame at the current position, advancing by the current speed. `None`
    /// once the producer is exhausted.
    fn get_frame(&mut self) -> Option<Frame>;
}

pub trait Filter: Service {
    fn process(&mut self, frame: &mut Frame);
}

pub type FrameShown = Box<dyn FnMut(i64) + Send>;

pub trait Consumer: Service {
    fn stop_handle(&self) -> StopHandle;

    /// Register a listener for the frame-shown notification. Listeners run on
    /// the thread that called `run`.
    fn on_frame_shown(&mut self, listener: FrameShown) -> Subscription;

    /// Play the tractor until it is exhausted or a stop is requested.
    fn run(&mut self, tractor: &mut Tractor<'_>) -> Result<(), EngineError>;
}

pub trait Engine: Send + Sync {
    fn name(&self) -> &str;
    fn open_producer(&self, profile: &Profile, resource: &str) -> Result<Box<dyn Producer>, EngineError>;
    fn create_consumer(&self, profile: &Profile, kind: &str, target: Option<&str>) -> Result<Box<dyn Consumer>, EngineError>;
    fn create_filter(&self, profile: &Profile, name: &str) -> Result<Box<dyn Filter>, EngineError>;
}

/// Cooperative stop request shared between a consumer and whoever wants to
/// interrupt it. Safe to trigger from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self { Self::default() }

    pub fn stop(&self) { self.0.store(true, Ordering::Release); }

    pub fn is_stopped(&self) -> bool { self.0.load(Ordering::Acquire) }
}

/// Live listener registration. Dropping it unsubscribes.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() { release(); }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.release.is_some()).finish()
    }
}

/// Single-track composition: one producer plus the filters attached to it,
/// borrowed for the duration of a run.
pub struct Tractor<'a> {
    producer: &'a mut dyn Producer,
    filters: Vec<&'a mut dyn Filter>,
}

impl<'a> Tractor<'a> {
    pub fn single_track(producer: &'a mut dyn Producer) -> Self {
        Self { producer, filters: Vec::new() }
    }

    pub fn attach(&mut self, filter: &'a mut dyn Filter) { self.filters.push(filter); }

    pub fn producer(&mut self) -> &mut dyn Producer { &mut *self.producer }

    pub fn filter_count(&self) -> usize { self.filters.len() }

    /// Pull the next frame and run it through the attached filters in order.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let mut frame = self.producer.get_frame()?;
        for filter in self.filters.iter_mut() {
            filter.process(&mut frame);
        }
        Some(frame)
    }
}
