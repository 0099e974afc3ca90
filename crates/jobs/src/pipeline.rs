use media_io::{Consumer, Engine, EngineError, Filter, FrameShown, Producer, Profile, Service, StopHandle, Subscription, Tractor};
use project::{ProjectSettings, ResizeAspect, ResizeOrder, ResizePolicy};
use tracing::{debug, warn};

use crate::extras::JobExtras;
use crate::params::{JobPlan, Zone};
use crate::JobError;

/// Live engine handles of one job.
///
/// Fields are dropped in declaration order, which is the reverse of the order
/// `build` acquires them in. A failed `build` drops whatever it already holds
/// on the way out.
pub struct Pipeline {
    subscription: Option<Subscription>,
    filter: Box<dyn Filter>,
    consumer: Box<dyn Consumer>,
    producer: Box<dyn Producer>,
    profile: Profile,
    length: i64,
}

impl Pipeline {
    pub fn build(
        engine: &dyn Engine,
        settings: &ProjectSettings,
        resource: &str,
        plan: &JobPlan,
        extras: &JobExtras,
    ) -> Result<Self, JobError> {
        let policy = settings.resize;
        let mut profile = if extras.uses_producer_profile() {
            let mut profile = Profile::implicit();
            if policy.order == ResizeOrder::BeforeMedia { resize(&mut profile, extras, policy); }
            profile
        } else {
            let mut profile = Profile::named(&settings.current_profile);
            resize(&mut profile, extras, policy);
            profile
        };

        let (mut producer, length) = open_producer(engine, &profile, resource, plan.zone)?;

        if !profile.is_explicit() {
            profile.adopt_media(&producer.media_info());
            if policy.order == ResizeOrder::AfterMedia { resize(&mut profile, extras, policy); }
            profile.set_explicit(true);
            debug!(width = profile.width, height = profile.height, fps = profile.fps(), "profile taken from clip");
        }
        plan.producer_settings.apply_to(producer.as_mut());

        let kind = &plan.consumer.kind;
        let mut consumer = engine
            .create_consumer(&profile, kind, plan.consumer.target.as_deref())
            .map_err(|e| {
                warn!(consumer = %plan.consumer, error = %e, "consumer construction failed");
                JobError::ConsumerInvalid { kind: kind.clone() }
            })?;
        if !consumer.is_valid() {
            return Err(JobError::ConsumerInvalid { kind: kind.clone() });
        }
        consumer.set("real_time", &settings.consumer_real_time().to_string());
        plan.consumer_settings.apply_to(consumer.as_mut());

        let mut filter = engine.create_filter(&profile, &plan.filter).map_err(|e| {
            warn!(filter = %plan.filter, error = %e, "filter construction failed");
            JobError::FilterInvalid { name: plan.filter.clone() }
        })?;
        if !filter.is_valid() {
            return Err(JobError::FilterInvalid { name: plan.filter.clone() });
        }
        plan.filter_settings.apply_to(filter.as_mut());

        Ok(Self { subscription: None, filter, consumer, producer, profile, length })
    }

    /// Frames the run will cover; 0 when unknown.
    pub fn length(&self) -> i64 { self.length }

    pub fn profile(&self) -> &Profile { &self.profile }

    pub fn stop_handle(&self) -> StopHandle { self.consumer.stop_handle() }

    /// Replaces any previous listener.
    pub fn subscribe(&mut self, listener: FrameShown) {
        self.subscription = Some(self.consumer.on_frame_shown(listener));
    }

    pub fn filter_property(&self, key: &str) -> Option<String> { self.filter.get(key) }

    /// Blocks until the producer is exhausted or the consumer is stopped.
    pub fn run(&mut self) -> Result<(), EngineError> {
        let Self { producer, consumer, filter, .. } = self;
        producer.set_speed(0.0);
        producer.seek(0);
        let mut tractor = Tractor::single_track(producer.as_mut());
        tractor.attach(filter.as_mut());
        tractor.producer().set_speed(1.0);
        consumer.run(&mut tractor)
    }
}

fn resize(profile: &mut Profile, extras: &JobExtras, policy: ResizePolicy) {
    let Some(height) = extras.resize_height() else { return };
    match policy.aspect {
        ResizeAspect::Display => profile.resize_to_height(height),
        ResizeAspect::Sample => profile.resize_to_height_by_sar(height),
    }
    debug!(width = profile.width, height = profile.height, aspect = ?policy.aspect, "profile resized");
}

fn open_producer(engine: &dyn Engine, profile: &Profile, resource: &str, zone: Zone) -> Result<(Box<dyn Producer>, i64), JobError> {
    let invalid = |e: EngineError| {
        warn!(resource, error = %e, "cannot open producer");
        JobError::ProducerInvalid { resource: resource.to_string() }
    };
    let full = engine.open_producer(profile, resource).map_err(invalid)?;
    let (producer, length) = match zone.end {
        None => {
            let length = full.length();
            (full, length)
        }
        Some(end) => {
            let cut = full.cut(zone.start, end);
            drop(full);
            let cut = cut.map_err(invalid)?;
            let length = cut.playtime();
            (cut, length)
        }
    };
    if !producer.is_valid() {
        return Err(JobError::ProducerInvalid { resource: resource.to_string() });
    }
    Ok((producer, length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::JobParameters;
    use media_io::sim::{SimEngine, SimMedia};
    use media_io::MediaInfo;
    use std::sync::Arc;

    fn plan(tokens: &[&str], extras: &mut JobExtras) -> JobPlan {
        JobParameters::new(tokens.iter().copied()).decode(extras).unwrap()
    }

    fn engine() -> SimEngine {
        SimEngine::new()
            .with_media("clip.mp4", SimMedia::new(100).with_info(MediaInfo { width: 1280, height: 720, frame_rate_num: 50, frame_rate_den: 1, sample_aspect_num: 1, sample_aspect_den: 1 }))
            .with_media("empty.mp4", SimMedia::new(0))
    }

    #[test]
    fn test_cut_length_is_zone_length() {
        let e = engine();
        let mut extras = JobExtras::new();
        let p = plan(&["20", "70", "", "brightness", "", "null", ""], &mut extras);
        let pipeline = Pipeline::build(&e, &ProjectSettings::default(), "clip.mp4", &p, &extras).unwrap();
        assert_eq!(pipeline.length(), 50);
        // full producer already released, the cut is still live
        let stats = e.stats();
        assert_eq!((stats.producers_opened, stats.producers_released), (2, 1));
        drop(pipeline);
        assert_eq!(e.stats().live_handles(), 0);
    }

    #[test]
    fn test_settings_reach_every_stage() {
        let e = engine();
        let mut extras = JobExtras::new();
        let p = plan(&["0", "-1", "audio_index=1 junk", "brightness", "level=30", "null", "terminate_on_pause=1"], &mut extras);
        let settings = ProjectSettings { current_profile: "dv_pal".into(), render_threads: 4, ..Default::default() };
        let pipeline = Pipeline::build(&e, &settings, "clip.mp4", &p, &extras).unwrap();
        assert_eq!(pipeline.length(), 100);
        assert_eq!(pipeline.producer.get("audio_index").as_deref(), Some("1"));
        assert_eq!(pipeline.filter_property("level").as_deref(), Some("30"));
        assert_eq!(pipeline.consumer.get("real_time").as_deref(), Some("-4"));
        assert_eq!(pipeline.consumer.get("terminate_on_pause").as_deref(), Some("1"));
        assert_eq!(pipeline.profile().width, 720);
    }

    #[test]
    fn test_profile_from_clip_then_resized() {
        let e = engine();
        let mut extras: JobExtras = [("producer_profile", "1"), ("resize_profile", "360")].into_iter().collect();
        let p = plan(&["0", "-1", "", "brightness", "", "null", ""], &mut extras);
        let pipeline = Pipeline::build(&e, &ProjectSettings::default(), "clip.mp4", &p, &extras).unwrap();
        let profile = pipeline.profile();
        assert!(profile.is_explicit());
        assert_eq!((profile.width, profile.height), (640, 360));
        assert_eq!(profile.fps(), 50.0);
        assert_eq!(pipeline.consumer.get("width").as_deref(), Some("640"));
    }

    fn resized(policy: ResizePolicy, extras: &[(&str, &str)]) -> (u32, u32) {
        let e = engine();
        let mut extras: JobExtras = extras.iter().copied().collect();
        let p = plan(&["0", "-1", "", "brightness", "", "null", ""], &mut extras);
        let settings = ProjectSettings { resize: policy, ..Default::default() };
        let pipeline = Pipeline::build(&e, &settings, "clip.mp4", &p, &extras).unwrap();
        (pipeline.profile().width, pipeline.profile().height)
    }

    #[test]
    fn test_resize_policies_on_named_profile() {
        let display = ResizePolicy { aspect: ResizeAspect::Display, order: ResizeOrder::AfterMedia };
        let sample = ResizePolicy { aspect: ResizeAspect::Sample, order: ResizeOrder::AfterMedia };
        assert_eq!(resized(display, &[("resize_profile", "360")]), (640, 360));
        assert_eq!(resized(sample, &[("resize_profile", "360")]), (360, 360));
        // order only matters when the profile comes from the clip
        let sample_before = ResizePolicy { order: ResizeOrder::BeforeMedia, ..sample };
        assert_eq!(resized(sample_before, &[("resize_profile", "360")]), (360, 360));
        assert_eq!(resized(display, &[]), (1920, 1080));
    }

    #[test]
    fn test_resize_policies_on_clip_profile() {
        let from_clip = [("producer_profile", "1"), ("resize_profile", "360")];
        let after = ResizePolicy { aspect: ResizeAspect::Display, order: ResizeOrder::AfterMedia };
        assert_eq!(resized(after, &from_clip), (640, 360));
        let after_sample = ResizePolicy { aspect: ResizeAspect::Sample, ..after };
        assert_eq!(resized(after_sample, &from_clip), (360, 360));
        // resizing the placeholder is undone by adopting the clip
        let before = ResizePolicy { order: ResizeOrder::BeforeMedia, ..after };
        assert_eq!(resized(before, &from_clip), (1280, 720));
        let before_sample = ResizePolicy { aspect: ResizeAspect::Sample, ..before };
        assert_eq!(resized(before_sample, &from_clip), (1280, 720));
    }

    #[test]
    fn test_invalid_producer() {
        let e = engine();
        let mut extras = JobExtras::new();
        let p = plan(&["0", "-1", "", "brightness", "", "null", ""], &mut extras);
        for resource in ["missing.mp4", "empty.mp4"] {
            let err = Pipeline::build(&e, &ProjectSettings::default(), resource, &p, &extras).err().unwrap();
            assert_eq!(err, JobError::ProducerInvalid { resource: resource.to_string() });
        }
        let p = plan(&["50", "150", "", "brightness", "", "null", ""], &mut extras);
        let err = Pipeline::build(&e, &ProjectSettings::default(), "clip.mp4", &p, &extras).err().unwrap();
        assert!(matches!(err, JobError::ProducerInvalid { .. }));
        assert_eq!(e.stats().live_handles(), 0);
    }

    #[test]
    fn test_consumer_failure_stops_before_filter() {
        let e = engine();
        let mut extras = JobExtras::new();
        let p = plan(&["0", "-1", "", "brightness", "", "sdl:window", ""], &mut extras);
        let err = Pipeline::build(&e, &ProjectSettings::default(), "clip.mp4", &p, &extras).err().unwrap();
        assert_eq!(err, JobError::ConsumerInvalid { kind: "sdl".into() });
        let stats = e.stats();
        assert_eq!(stats.filter_requests, 0);
        assert_eq!(stats.producers_opened, 1);
        assert_eq!(stats.producers_released, 1);
        assert_eq!(stats.live_handles(), 0);
    }

    #[test]
    fn test_filter_failure_releases_consumer_and_producer() {
        let e = engine();
        let mut extras = JobExtras::new();
        let p = plan(&["10", "20", "", "warp_drive", "", "null", ""], &mut extras);
        let err = Pipeline::build(&e, &ProjectSettings::default(), "clip.mp4", &p, &extras).err().unwrap();
        assert_eq!(err, JobError::FilterInvalid { name: "warp_drive".into() });
        let stats = e.stats();
        assert_eq!((stats.consumers_opened, stats.consumers_released), (1, 1));
        assert_eq!((stats.producers_opened, stats.producers_released), (2, 2));
    }

    #[test]
    fn test_run_feeds_listener_from_zero() {
        let e = engine();
        let mut extras = JobExtras::new();
        let p = plan(&["40", "60", "", "framecount", "", "null", ""], &mut extras);
        let mut pipeline = Pipeline::build(&e, &ProjectSettings::default(), "clip.mp4", &p, &extras).unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seen.clone();
        pipeline.subscribe(Box::new(move |pos| s.lock().push(pos)));
        pipeline.run().unwrap();
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<i64>>());
        assert_eq!(pipeline.filter_property("frames").as_deref(), Some("20"));
    }
}
