//! Deterministic in-process engine.
//!
//! Media is registered by resource name instead of being read from disk, and
//! frames are synthesized on demand. Handle counters make it possible to check
//! that a pipeline released everything it opened.
//!
//! Consumers understand two failure switches: `fail_after=N` makes `run`
//! return an error once N frames were shown, `fail_on_stop=1` makes a stopped
//! run return an error instead of `Ok`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    Consumer, Engine, EngineError, Filter, Frame, FrameShown, MediaInfo, Producer, Profile, Properties, Service,
    StopHandle, Subscription, Tractor,
};

pub type Analyzer = Arc<dyn Fn(&mut Properties, &Frame) + Send + Sync>;

pub const CONSUMER_KINDS: &[&str] = &["null", "xml", "avformat"];

#[derive(Debug, Clone, Default)]
pub struct SimMedia {
    pub length: i64,
    pub info: MediaInfo,
    /// Source positions that start a new shot.
    pub scene_cuts: Vec<i64>,
    /// Simulated decode cost per frame.
    pub frame_delay: Option<Duration>,
    /// Frames still play but the producer reports a length of 0, like a
    /// stream whose duration the demuxer could not determine.
    pub length_unknown: bool,
}

impl SimMedia {
    pub fn new(length: i64) -> Self { Self { length, ..Default::default() } }

    pub fn with_info(mut self, info: MediaInfo) -> Self { self.info = info; self }

    pub fn with_scene_cuts(mut self, cuts: impl IntoIterator<Item = i64>) -> Self {
        self.scene_cuts = cuts.into_iter().collect();
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self { self.frame_delay = Some(delay); self }

    pub fn with_unknown_length(mut self) -> Self { self.length_unknown = true; self }
}

#[derive(Debug, Default)]
struct Counters {
    producers_opened: AtomicUsize,
    producers_released: AtomicUsize,
    consumers_opened: AtomicUsize,
    consumers_released: AtomicUsize,
    filter_requests: AtomicUsize,
    filters_opened: AtomicUsize,
    filters_released: AtomicUsize,
}

fn bump(counter: &AtomicUsize) { counter.fetch_add(1, Ordering::SeqCst); }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub producers_opened: usize,
    pub producers_released: usize,
    pub consumers_opened: usize,
    pub consumers_released: usize,
    pub filter_requests: usize,
    pub filters_opened: usize,
    pub filters_released: usize,
}

impl EngineStats {
    pub fn live_handles(&self) -> usize {
        (self.producers_opened - self.producers_released)
            + (self.consumers_opened - self.consumers_released)
            + (self.filters_opened - self.filters_released)
    }
}

pub struct SimEngine {
    media: RwLock<HashMap<String, Arc<SimMedia>>>,
    filters: RwLock<HashMap<String, Option<Analyzer>>>,
    counters: Arc<Counters>,
}

impl Default for SimEngine {
    fn default() -> Self { Self::new() }
}

impl SimEngine {
    pub fn new() -> Self {
        let engine = Self { media: RwLock::new(HashMap::new()), filters: RwLock::new(HashMap::new()), counters: Arc::new(Counters::default()) };
        engine.register_passthrough("brightness");
        engine.register_filter("framecount", |props, _frame| {
            let n = props.get_int("frames").unwrap_or(0) + 1;
            props.set("frames", &n.to_string());
        });
        engine.register_filter("scenecut", |props, frame| {
            if frame.properties.get("scene_change") != Some("1") { return; }
            let mut list = props.get("shot_change_list").unwrap_or_default().to_string();
            if !list.is_empty() { list.push(';'); }
            list.push_str(&frame.position.to_string());
            props.set("shot_change_list", &list);
        });
        engine
    }

    pub fn with_media(self, resource: impl Into<String>, media: SimMedia) -> Self {
        self.register_media(resource, media);
        self
    }

    pub fn register_media(&self, resource: impl Into<String>, media: SimMedia) {
        self.media.write().insert(resource.into(), Arc::new(media));
    }

    pub fn register_passthrough(&self, name: &str) {
        self.filters.write().insert(name.to_string(), None);
    }

    pub fn register_filter(&self, name: &str, analyzer: impl Fn(&mut Properties, &Frame) + Send + Sync + 'static) {
        self.filters.write().insert(name.to_string(), Some(Arc::new(analyzer)));
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            producers_opened: c.producers_opened.load(Ordering::SeqCst),
            producers_released: c.producers_released.load(Ordering::SeqCst),
            consumers_opened: c.consumers_opened.load(Ordering::SeqCst),
            consumers_released: c.consumers_released.load(Ordering::SeqCst),
            filter_requests: c.filter_requests.load(Ordering::SeqCst),
            filters_opened: c.filters_opened.load(Ordering::SeqCst),
            filters_released: c.filters_released.load(Ordering::SeqCst),
        }
    }
}

impl Engine for SimEngine {
    fn name(&self) -> &str { "sim" }

    fn open_producer(&self, _profile: &Profile, resource: &str) -> Result<Box<dyn Producer>, EngineError> {
        let media = self.media.read().get(resource).cloned().ok_or_else(|| EngineError::UnknownResource(resource.to_string()))?;
        bump(&self.counters.producers_opened);
        let mut props = Properties::new();
        props.set("resource", resource);
        Ok(Box::new(SimProducer {
            out_point: media.length,
            media,
            in_point: 0,
            position: 0,
            speed: 1.0,
            props,
            counters: self.counters.clone(),
        }))
    }

    fn create_consumer(&self, profile: &Profile, kind: &str, target: Option<&str>) -> Result<Box<dyn Consumer>, EngineError> {
        if !CONSUMER_KINDS.contains(&kind) {
            return Err(EngineError::UnknownService { kind: "consumer", name: kind.to_string() });
        }
        bump(&self.counters.consumers_opened);
        let mut props = Properties::new();
        props.set("width", &profile.width.to_string());
        props.set("height", &profile.height.to_string());
        if let Some(target) = target { props.set("target", target); }
        Ok(Box::new(SimConsumer {
            kind: kind.to_string(),
            props,
            stop: StopHandle::new(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: 0,
            counters: self.counters.clone(),
        }))
    }

    fn create_filter(&self, _profile: &Profile, name: &str) -> Result<Box<dyn Filter>, EngineError> {
        bump(&self.counters.filter_requests);
        let analyzer = self.filters.read().get(name).cloned().ok_or_else(|| EngineError::UnknownService { kind: "filter", name: name.to_string() })?;
        bump(&self.counters.filters_opened);
        Ok(Box::new(SimFilter { props: Properties::new(), analyzer, counters: self.counters.clone() }))
    }
}

struct SimProducer {
    media: Arc<SimMedia>,
    in_point: i64,
    out_point: i64,
    position: i64,
    speed: f64,
    props: Properties,
    counters: Arc<Counters>,
}

impl Service for SimProducer {
    fn is_valid(&self) -> bool { self.media.length > 0 }
    fn set(&mut self, key: &str, value: &str) { self.props.set(key, value); }
    fn get(&self, key: &str) -> Option<String> { self.props.get(key).map(str::to_string) }
}

impl SimProducer {
    fn frames(&self) -> i64 { self.out_point - self.in_point }
}

impl Producer for SimProducer {
    fn length(&self) -> i64 {
        if self.media.length_unknown { 0 } else { self.frames() }
    }

    fn media_info(&self) -> MediaInfo { self.media.info }

    fn cut(&self, in_point: i64, out_point: i64) -> Result<Box<dyn Producer>, EngineError> {
        let length = self.frames();
        if in_point < 0 || out_point <= in_point || out_point > length {
            return Err(EngineError::InvalidRange { in_point, out_point, length });
        }
        bump(&self.counters.producers_opened);
        Ok(Box::new(SimProducer {
            media: self.media.clone(),
            in_point: self.in_point + in_point,
            out_point: self.in_point + out_point,
            position: 0,
            speed: self.speed,
            props: self.props.clone(),
            counters: self.counters.clone(),
        }))
    }

    fn set_speed(&mut self, speed: f64) { self.speed = speed; }

    fn seek(&mut self, position: i64) { self.position = position; }

    fn position(&self) -> i64 { self.position }

    fn get_frame(&mut self) -> Option<Frame> {
        if self.position < 0 || self.position >= self.frames() { return None; }
        let mut frame = Frame { position: self.position, properties: Properties::new() };
        if self.media.scene_cuts.contains(&(self.in_point + self.position)) {
            frame.properties.set("scene_change", "1");
        }
        if let Some(delay) = self.media.frame_delay { thread::sleep(delay); }
        self.position += self.speed.round() as i64;
        Some(frame)
    }
}

impl Drop for SimProducer {
    fn drop(&mut self) { bump(&self.counters.producers_released); }
}

struct SimFilter {
    props: Properties,
    analyzer: Option<Analyzer>,
    counters: Arc<Counters>,
}

impl Service for SimFilter {
    fn is_valid(&self) -> bool { true }
    fn set(&mut self, key: &str, value: &str) { self.props.set(key, value); }
    fn get(&self, key: &str) -> Option<String> { self.props.get(key).map(str::to_string) }
}

impl Filter for SimFilter {
    fn process(&mut self, frame: &mut Frame) {
        if let Some(analyzer) = &self.analyzer { analyzer(&mut self.props, frame); }
    }
}

impl Drop for SimFilter {
    fn drop(&mut self) { bump(&self.counters.filters_released); }
}

type Listeners = Arc<Mutex<Vec<(u64, FrameShown)>>>;

struct SimConsumer {
    kind: String,
    props: Properties,
    stop: StopHandle,
    listeners: Listeners,
    next_listener: u64,
    counters: Arc<Counters>,
}

impl Service for SimConsumer {
    fn is_valid(&self) -> bool { true }
    fn set(&mut self, key: &str, value: &str) { self.props.set(key, value); }
    fn get(&self, key: &str) -> Option<String> { self.props.get(key).map(str::to_string) }
}

impl Consumer for SimConsumer {
    fn stop_handle(&self) -> StopHandle { self.stop.clone() }

    fn on_frame_shown(&mut self, listener: FrameShown) -> Subscription {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.lock().push((id, listener));
        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|(i, _)| *i != id);
            }
        })
    }

    fn run(&mut self, tractor: &mut Tractor<'_>) -> Result<(), EngineError> {
        if !tractor.producer().is_valid() {
            return Err(EngineError::Runtime("consumer connected to an invalid producer".into()));
        }
        let real_time = self.props.get_int("real_time").unwrap_or(1);
        let fail_after = self.props.get_int("fail_after");
        let fail_on_stop = self.props.get("fail_on_stop") == Some("1");
        debug!(consumer = %self.kind, real_time, filters = tractor.filter_count(), "consumer running");
        let mut shown = 0_i64;
        loop {
            if self.stop.is_stopped() {
                debug!(consumer = %self.kind, shown, "consumer stopped");
                if fail_on_stop {
                    return Err(EngineError::Runtime("interrupted".into()));
                }
                break;
            }
            if fail_after == Some(shown) {
                return Err(EngineError::Runtime(format!("failed after {shown} frames")));
            }
            let Some(frame) = tractor.next_frame() else { break };
            for (_, listener) in self.listeners.lock().iter_mut() {
                listener(frame.position);
            }
            shown += 1;
        }
        self.props.set("frames_shown", &shown.to_string());
        Ok(())
    }
}

impl Drop for SimConsumer {
    fn drop(&mut self) { bump(&self.counters.consumers_released); }
}
