use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use motion_lab_core::audio::sample_tap;
use motion_lab_core::lifecycle::Transition;
use motion_lab_core::video::{video_feed, VideoSink};
use motion_lab_core::{
    AppConfig, AudioFeatures, AudioInput, AudioSignalHandle, AudioSourceKind, CameraStream,
    DecodedAudio, DeviceBackend, DeviceKind, Landmark, MediaElement, MotionLabError, Pipeline,
    PoseConfig, PoseDetector, RenderState, Resolution, Result, SampleTap, SessionState,
    SnapshotReader, StatusTone, Subject, TapWriter, VideoFrame, VideoSource,
};

const TICK: Duration = Duration::from_millis(16);

/// Shared record of what the fake devices were asked to do.
#[derive(Clone, Default)]
struct Rig {
    inner: Arc<Mutex<RigState>>,
    deny_camera: Arc<AtomicBool>,
    deny_microphone: Arc<AtomicBool>,
    block_autoplay: Arc<AtomicBool>,
    no_output: Arc<AtomicBool>,
}

#[derive(Default)]
struct RigState {
    events: Vec<String>,
    live_microphones: usize,
    max_live_microphones: usize,
    live_cameras: usize,
    mic_writers: Vec<TapWriter>,
    camera_sinks: Vec<Arc<VideoSink>>,
    watched: Option<SnapshotReader<AudioFeatures>>,
    loudness_at_close: Vec<f32>,
}

impl Rig {
    fn event(&self, event: impl Into<String>) {
        self.inner.lock().unwrap().events.push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    fn speak(&self, samples: &[f32]) {
        let mut state = self.inner.lock().unwrap();
        state.mic_writers.last_mut().unwrap().push(samples);
    }

    fn camera(&self) -> Arc<VideoSink> {
        self.inner.lock().unwrap().camera_sinks.last().cloned().unwrap()
    }

    fn watch(&self, reader: SnapshotReader<AudioFeatures>) {
        self.inner.lock().unwrap().watched = Some(reader);
    }
}

struct FakeBackend {
    rig: Rig,
}

impl DeviceBackend for FakeBackend {
    fn open_microphone(&mut self) -> Result<Box<dyn AudioInput>> {
        if self.rig.deny_microphone.load(Ordering::SeqCst) {
            self.rig.event("deny microphone");
            return Err(MotionLabError::PermissionDenied(DeviceKind::Microphone));
        }
        let (writer, tap) = sample_tap(8_192);
        let mut state = self.rig.inner.lock().unwrap();
        state.live_microphones += 1;
        state.max_live_microphones = state.max_live_microphones.max(state.live_microphones);
        state.mic_writers.push(writer);
        state.events.push("open microphone".into());
        Ok(Box::new(FakeInput {
            rig: self.rig.clone(),
            tap,
            kind: AudioSourceKind::Microphone,
            label: "fake mic".into(),
            closed: false,
        }))
    }

    fn open_camera(&mut self, requested: Resolution) -> Result<Box<dyn CameraStream>> {
        if self.rig.deny_camera.load(Ordering::SeqCst) {
            self.rig.event("deny camera");
            return Err(MotionLabError::PermissionDenied(DeviceKind::Camera));
        }
        let granted = Resolution::new(requested.width * 2, requested.height);
        let (sink, source) = video_feed(granted);
        let sink = Arc::new(sink);
        let mut state = self.rig.inner.lock().unwrap();
        state.live_cameras += 1;
        state.camera_sinks.push(sink.clone());
        state.events.push("open camera".into());
        Ok(Box::new(FakeCamera {
            rig: self.rig.clone(),
            sink,
            source,
            closed: false,
        }))
    }

    fn open_playback(&mut self, media: &MediaElement) -> Result<Box<dyn AudioInput>> {
        if self.rig.no_output.load(Ordering::SeqCst) {
            return Err(MotionLabError::ResourceUnavailable("no output device".into()));
        }
        self.rig.event(format!("open playback {}", media.name()));
        Ok(Box::new(FakeInput {
            rig: self.rig.clone(),
            tap: sample_tap(8_192).1,
            kind: AudioSourceKind::Media,
            label: media.name().to_string(),
            closed: false,
        }))
    }
}

struct FakeInput {
    rig: Rig,
    tap: SampleTap,
    kind: AudioSourceKind,
    label: String,
    closed: bool,
}

impl AudioInput for FakeInput {
    fn signal(&self) -> AudioSignalHandle {
        AudioSignalHandle::new(self.tap.clone(), 48_000, self.kind, self.label.clone())
    }

    fn resume(&mut self) -> Result<()> {
        if self.kind == AudioSourceKind::Media && self.rig.block_autoplay.load(Ordering::SeqCst) {
            return Err(MotionLabError::ResourceUnavailable("needs a gesture".into()));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.tap.close();
        let mut state = self.rig.inner.lock().unwrap();
        if self.kind == AudioSourceKind::Microphone {
            state.live_microphones -= 1;
            let loudness = state.watched.as_ref().map(|reader| reader.latest().loudness);
            if let Some(loudness) = loudness {
                state.loudness_at_close.push(loudness);
            }
            state.events.push("close microphone".into());
        } else {
            state.events.push(format!("close playback {}", self.label));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct FakeCamera {
    rig: Rig,
    sink: Arc<VideoSink>,
    source: VideoSource,
    closed: bool,
}

impl CameraStream for FakeCamera {
    fn source(&self) -> VideoSource {
        self.source.clone()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sink.close();
        let mut state = self.rig.inner.lock().unwrap();
        state.live_cameras -= 1;
        state.events.push("close camera".into());
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

type Script = Arc<Mutex<VecDeque<Result<Vec<Subject>>>>>;

/// Replays queued estimate results, then reports an empty scene.
struct ScriptedDetector {
    script: Script,
}

impl PoseDetector for ScriptedDetector {
    fn estimate(
        &mut self,
        _frame: &VideoFrame,
        _options: &motion_lab_core::pose::EstimateOptions,
    ) -> Result<Vec<Subject>> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn person(confidence: f32) -> Subject {
    Subject {
        keypoints: (0..17)
            .map(|i| Landmark::new(10.0 + i as f32, 20.0, confidence))
            .collect(),
        score: None,
    }
}

fn sine(frequency: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (TAU * frequency * i as f32 / 48_000.0).sin())
        .collect()
}

fn frame(resolution: Resolution, sequence: u64) -> VideoFrame {
    let len = (resolution.width * resolution.height * 3) as usize;
    VideoFrame::from_rgb(resolution.width, resolution.height, vec![40; len], sequence).unwrap()
}

struct Harness {
    rig: Rig,
    script: Script,
    loads: Arc<Mutex<u32>>,
    rendered: Arc<Mutex<Vec<RenderState>>>,
    pipeline: Pipeline,
}

fn harness_with_model(fail_first_loads: u32) -> Harness {
    let rig = Rig::default();
    let script: Script = Arc::default();
    let loads = Arc::new(Mutex::new(0_u32));
    let rendered = Arc::new(Mutex::new(Vec::new()));

    let factory_script = script.clone();
    let factory_loads = loads.clone();
    let factory = move |_: &PoseConfig| -> Result<Box<dyn PoseDetector>> {
        let mut attempts = factory_loads.lock().unwrap();
        *attempts += 1;
        if *attempts <= fail_first_loads {
            return Err(MotionLabError::ModelLoad("weights missing".into()));
        }
        Ok(Box::new(ScriptedDetector {
            script: factory_script.clone(),
        }))
    };
    let sink_rendered = rendered.clone();
    let pipeline = Pipeline::new(
        AppConfig::live_defaults(),
        Box::new(FakeBackend { rig: rig.clone() }),
        Box::new(factory),
        Box::new(move |state: &RenderState| sink_rendered.lock().unwrap().push(state.clone())),
    )
    .unwrap();
    rig.watch(pipeline.features());

    Harness {
        rig,
        script,
        loads,
        rendered,
        pipeline,
    }
}

fn harness() -> Harness {
    harness_with_model(0)
}

fn media(pipeline: &Pipeline, name: &str) -> MediaElement {
    let audio = DecodedAudio::new(sine(440.0, 4_800), 48_000).unwrap();
    MediaElement::from_decoded(name, audio, pipeline.ledger())
}

#[test]
fn scenario_a_microphone_loudness_rises_then_resets() {
    let mut h = harness();
    let status = h.pipeline.start(DeviceKind::Microphone);
    assert_eq!(status.label, "Microphone streaming");
    assert_eq!(status.tone, StatusTone::Success);

    h.pipeline.run_frame(TICK);
    assert_eq!(h.pipeline.features().latest().loudness, 0.0);

    h.rig.speak(&sine(1_000.0, 2_048));
    h.pipeline.run_frame(TICK);
    let features = h.pipeline.features().latest();
    assert!(features.loudness > 0.0);
    assert_eq!(features.spectrum.len(), 512);

    let status = h.pipeline.stop(DeviceKind::Microphone);
    assert_eq!(status.label, "Microphone stopped");
    let features = h.pipeline.features().latest();
    assert_eq!(features.loudness, 0.0);
    assert!(features.spectrum.is_empty());

    h.pipeline.run_frame(TICK);
    assert!(h.pipeline.features().latest().is_silent());
}

#[test]
fn scenario_b_camera_publishes_full_landmark_sets() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Camera);
    assert_eq!(h.pipeline.state(DeviceKind::Camera), SessionState::Active);

    let granted = Resolution::new(512, 256);
    let camera = h.rig.camera();
    for sequence in 1..=3 {
        camera.push(frame(granted, sequence));
        h.pipeline.run_frame(TICK);
        let pose = h.pipeline.poses().latest();
        assert!(pose.landmarks.is_empty());
        assert_eq!((pose.source_width, pose.source_height), (512.0, 256.0));
    }

    h.script.lock().unwrap().push_back(Ok(vec![person(0.1), person(0.8)]));
    camera.push(frame(granted, 4));
    h.pipeline.run_frame(TICK);

    let pose = h.pipeline.poses().latest();
    assert_eq!(pose.landmarks.len(), 17);
    assert!(pose.landmarks.iter().any(|landmark| landmark.score() > 0.2));
    assert_eq!(pose.source_width, 512.0);
}

#[test]
fn scenario_c_replacing_media_releases_previous_exactly_once() {
    let mut h = harness();
    let first = media(&h.pipeline, "a.wav");
    let first_id = first.resource_id();
    let status = h.pipeline.load_media(first);
    assert_eq!(status.label, "Loaded audio • a.wav");

    h.pipeline.run_frame(TICK);
    let second = media(&h.pipeline, "b.wav");
    let second_id = second.resource_id();
    h.pipeline.load_media(second);

    let ledger = h.pipeline.ledger().clone();
    assert_eq!(ledger.release_count(first_id), 1);
    assert_eq!(ledger.release_count(second_id), 0);
    assert_eq!(ledger.live(), 1);
    assert_eq!(
        h.rig
            .events()
            .iter()
            .filter(|event| *event == "close playback a.wav")
            .count(),
        1
    );

    h.pipeline.shutdown();
    assert_eq!(ledger.release_count(first_id), 1);
    assert_eq!(ledger.release_count(second_id), 1);
    assert_eq!(ledger.report_leaks(), 0);
}

#[test]
fn scenario_d_denied_camera_can_be_retried() {
    let mut h = harness();
    h.rig.deny_camera.store(true, Ordering::SeqCst);

    let status = h.pipeline.toggle_camera();
    assert_eq!(status.label, "Camera access denied");
    assert_eq!(status.tone, StatusTone::Warning);
    assert_eq!(h.pipeline.state(DeviceKind::Camera), SessionState::Denied);
    assert_eq!(h.pipeline.camera_caption(), "Camera idle");

    h.rig.deny_camera.store(false, Ordering::SeqCst);
    let status = h.pipeline.toggle_camera();
    assert_eq!(status.label, "Camera streaming");
    assert_eq!(h.pipeline.state(DeviceKind::Camera), SessionState::Active);
}

#[test]
fn restarting_a_device_releases_the_previous_session_first() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Microphone);
    h.pipeline.start(DeviceKind::Microphone);

    assert_eq!(h.rig.inner.lock().unwrap().max_live_microphones, 1);
    let transitions: Vec<(SessionState, SessionState)> = h
        .pipeline
        .manager()
        .table()
        .history()
        .filter(|transition| transition.kind == DeviceKind::Microphone)
        .map(|&Transition { from, to, .. }| (from, to))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (SessionState::Idle, SessionState::Acquiring),
            (SessionState::Acquiring, SessionState::Active),
            (SessionState::Active, SessionState::Releasing),
            (SessionState::Releasing, SessionState::Idle),
            (SessionState::Idle, SessionState::Acquiring),
            (SessionState::Acquiring, SessionState::Active),
        ]
    );
    assert_eq!(
        h.rig.events(),
        vec!["open microphone", "close microphone", "open microphone"]
    );
}

#[test]
fn snapshot_is_cleared_only_after_the_device_is_closed() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Microphone);
    h.rig.speak(&sine(500.0, 2_048));
    h.pipeline.run_frame(TICK);
    let live = h.pipeline.features().latest().loudness;
    assert!(live > 0.0);

    h.pipeline.stop(DeviceKind::Microphone);
    assert_eq!(h.rig.inner.lock().unwrap().loudness_at_close, vec![live]);
    assert!(h.pipeline.features().latest().is_silent());
}

#[test]
fn stop_is_idempotent() {
    let mut h = harness();
    let before = h.pipeline.status().clone();
    assert_eq!(h.pipeline.stop(DeviceKind::Camera), before);
    assert_eq!(h.pipeline.stop(DeviceKind::Microphone), before);

    h.pipeline.start(DeviceKind::Camera);
    h.pipeline.stop(DeviceKind::Camera);
    let stopped = h.pipeline.stop(DeviceKind::Camera);
    assert_eq!(stopped.label, "Camera stopped");
    assert_eq!(h.pipeline.state(DeviceKind::Camera), SessionState::Idle);
    assert_eq!(
        h.rig
            .events()
            .iter()
            .filter(|event| *event == "close camera")
            .count(),
        1
    );
}

#[test]
fn microphone_takes_precedence_over_loaded_media() {
    let mut h = harness();
    let element = media(&h.pipeline, "track.wav");
    h.pipeline.load_media(element);
    let analyzer = || h.pipeline.manager().analyzer().source_kind();
    assert_eq!(analyzer(), Some(AudioSourceKind::Media));

    h.pipeline.start(DeviceKind::Microphone);
    assert_eq!(
        h.pipeline.manager().analyzer().source_kind(),
        Some(AudioSourceKind::Microphone)
    );

    h.pipeline.stop(DeviceKind::Microphone);
    assert_eq!(
        h.pipeline.manager().analyzer().source_kind(),
        Some(AudioSourceKind::Media)
    );
}

#[test]
fn blocked_playback_waits_for_explicit_play() {
    let mut h = harness();
    h.rig.block_autoplay.store(true, Ordering::SeqCst);
    let element = media(&h.pipeline, "song.mp3");
    let status = h.pipeline.load_media(element);
    assert_eq!(status.label, "Audio ready - press play");
    assert_eq!(status.tone, StatusTone::Warning);
    assert!(h.pipeline.manager().analyzer().is_running());

    h.rig.block_autoplay.store(false, Ordering::SeqCst);
    let status = h.pipeline.play_audio();
    assert_eq!(status.label, "Playing audio • song.mp3");
    assert_eq!(status.tone, StatusTone::Success);
}

#[test]
fn model_load_failure_releases_camera_and_allows_one_retry() {
    let mut h = harness_with_model(1);
    let status = h.pipeline.start(DeviceKind::Camera);
    assert_eq!(status.label, "Pose model unavailable");
    assert_eq!(h.pipeline.state(DeviceKind::Camera), SessionState::Error);
    assert_eq!(h.rig.inner.lock().unwrap().live_cameras, 0);
    assert_eq!(*h.loads.lock().unwrap(), 1);

    for _ in 0..5 {
        h.pipeline.run_frame(TICK);
    }
    assert_eq!(*h.loads.lock().unwrap(), 1);

    h.pipeline.start(DeviceKind::Camera);
    assert_eq!(h.pipeline.state(DeviceKind::Camera), SessionState::Active);
    assert_eq!(*h.loads.lock().unwrap(), 2);
}

#[test]
fn model_survives_camera_sessions_until_shutdown() {
    let mut h = harness();
    for _ in 0..3 {
        h.pipeline.start(DeviceKind::Camera);
        h.pipeline.run_frame(TICK);
        h.pipeline.stop(DeviceKind::Camera);
    }
    assert_eq!(*h.loads.lock().unwrap(), 1);
    assert!(h.pipeline.manager().extractor().model_cache().is_loaded());

    h.pipeline.shutdown();
    assert!(!h.pipeline.manager().extractor().model_cache().is_loaded());
}

#[test]
fn failed_estimate_keeps_the_previous_pose() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Camera);
    let camera = h.rig.camera();
    let granted = Resolution::new(512, 256);
    {
        let mut script = h.script.lock().unwrap();
        script.push_back(Ok(vec![person(0.9)]));
        script.push_back(Err(MotionLabError::TransientInference("timeout".into())));
        script.push_back(Ok(vec![person(0.5)]));
    }

    camera.push(frame(granted, 1));
    h.pipeline.run_frame(TICK);
    let first = h.pipeline.poses().latest();
    assert_eq!(first.landmarks[0].score(), 0.9);

    h.pipeline.run_frame(TICK);
    let after_failure = h.pipeline.poses().latest();
    assert_eq!(after_failure.sequence(), first.sequence());

    h.pipeline.run_frame(TICK);
    assert_eq!(h.pipeline.poses().latest().landmarks[0].score(), 0.5);
}

#[test]
fn stopping_the_camera_resets_the_pose() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Camera);
    h.script.lock().unwrap().push_back(Ok(vec![person(0.9)]));
    h.rig.camera().push(frame(Resolution::new(512, 256), 1));
    h.pipeline.run_frame(TICK);
    assert!(h.pipeline.poses().latest().has_subject());

    h.pipeline.stop(DeviceKind::Camera);
    let pose = h.pipeline.poses().latest();
    assert!(pose.landmarks.is_empty());
    assert_eq!((pose.source_width, pose.source_height), (1.0, 1.0));
}

#[test]
fn render_loop_sees_each_refresh_without_blocking() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Microphone);
    for _ in 0..4 {
        h.pipeline.run_frame(TICK);
    }

    let rendered = h.rendered.lock().unwrap();
    assert_eq!(rendered.len(), 4);
    let indices: Vec<u64> = rendered.iter().map(|state| state.frame.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4]);
    assert!(rendered.iter().all(|state| state.pose.landmarks.is_empty()));
}

#[test]
fn shutdown_releases_everything_left_active() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Microphone);
    h.pipeline.start(DeviceKind::Camera);
    let element = media(&h.pipeline, "loop.wav");
    h.pipeline.load_media(element);

    h.pipeline.shutdown();
    let state = h.rig.inner.lock().unwrap();
    assert_eq!(state.live_microphones, 0);
    assert_eq!(state.live_cameras, 0);
    assert!(state.events.contains(&"close playback loop.wav".to_string()));
    assert_eq!(h.pipeline.ledger().live(), 0);
    assert_eq!(h.pipeline.status().label, "Waiting for input");
}

#[test]
fn render_reads_what_producers_published_in_the_same_refresh() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Microphone);
    h.pipeline.start(DeviceKind::Camera);
    let features = h.pipeline.features();
    let poses = h.pipeline.poses();

    let mut published = Vec::new();
    for _ in 0..3 {
        h.pipeline.run_frame(TICK);
        published.push((features.latest().sequence(), poses.latest().sequence()));
    }

    let rendered = h.rendered.lock().unwrap();
    let seen: Vec<(u64, u64)> = rendered
        .iter()
        .map(|state| (state.audio.sequence(), state.pose.sequence()))
        .collect();
    assert_eq!(seen, published);
    let audio: Vec<(u64, u64)> = rendered
        .iter()
        .map(|state| (state.frame.index, state.audio.frame_sequence))
        .collect();
    assert_eq!(audio, vec![(1, 1), (2, 2), (3, 3)]);
    assert!(rendered.iter().all(|state| state.audio_fresh));
}

#[test]
fn denied_microphone_is_reported_and_keeps_playback_analysis() {
    let mut h = harness();
    let element = media(&h.pipeline, "backing.wav");
    h.pipeline.load_media(element);
    h.pipeline.run_frame(TICK);
    h.pipeline.run_frame(TICK);
    let before = h.pipeline.features().latest();
    assert_eq!(before.frame_sequence, 2);

    h.rig.deny_microphone.store(true, Ordering::SeqCst);
    let status = h.pipeline.start(DeviceKind::Microphone);
    assert_eq!(status.label, "Microphone access denied");
    assert_eq!(status.tone, StatusTone::Warning);
    assert_eq!(h.pipeline.state(DeviceKind::Microphone), SessionState::Denied);
    assert_eq!(
        h.pipeline.manager().analyzer().source_kind(),
        Some(AudioSourceKind::Media)
    );
    assert_eq!(h.pipeline.features().latest().sequence(), before.sequence());

    h.pipeline.run_frame(TICK);
    assert_eq!(h.pipeline.features().latest().frame_sequence, 3);
}

#[test]
fn missing_audio_output_keeps_media_without_analysis() {
    let mut h = harness();
    h.rig.no_output.store(true, Ordering::SeqCst);
    let element = media(&h.pipeline, "quiet.wav");
    let id = element.resource_id();

    let status = h.pipeline.load_media(element);
    assert_eq!(status.label, "Audio output unavailable");
    assert_eq!(status.tone, StatusTone::Warning);
    assert_eq!(h.pipeline.manager().media_name(), Some("quiet.wav"));
    assert!(!h.pipeline.manager().analyzer().is_running());

    let ledger = h.pipeline.ledger().clone();
    h.pipeline.shutdown();
    assert_eq!(ledger.release_count(id), 1);
}

#[test]
fn dropping_the_pipeline_releases_everything() {
    let mut h = harness();
    h.pipeline.start(DeviceKind::Microphone);
    h.pipeline.start(DeviceKind::Camera);
    let element = media(&h.pipeline, "left-open.wav");
    h.pipeline.load_media(element);
    h.pipeline.run_frame(TICK);
    let ledger = h.pipeline.ledger().clone();

    drop(h.pipeline);

    let state = h.rig.inner.lock().unwrap();
    assert_eq!(state.live_microphones, 0);
    assert_eq!(state.live_cameras, 0);
    assert!(state.events.contains(&"close playback left-open.wav".to_string()));
    assert_eq!(ledger.live(), 0);
    assert_eq!(*h.loads.lock().unwrap(), 1);
}

mod properties {
    use motion_lab_core::{AudioConfig, FrameScheduler, SpectralAnalyzer};
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn loudness_is_bounded_and_spectrum_length_is_stable(
            blocks in prop::collection::vec(prop::collection::vec(-1.0f32..=1.0, 0..1_500), 1..4)
        ) {
            let mut analyzer = SpectralAnalyzer::new(AudioConfig::default()).unwrap();
            let mut scheduler = FrameScheduler::new();
            let (mut writer, tap) = sample_tap(4_096);
            analyzer
                .start(
                    &mut scheduler,
                    AudioSignalHandle::new(tap.clone(), 48_000, AudioSourceKind::Synthetic, "prop"),
                )
                .unwrap();
            let features = analyzer.features();

            for block in &blocks {
                writer.push(block);
                scheduler.run_frame(TICK);
                let latest = features.latest();
                prop_assert!((0.0..=1.0).contains(&latest.loudness));
                prop_assert_eq!(latest.spectrum.len(), 512);
            }
        }
    }
}
