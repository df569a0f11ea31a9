#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use runtrack_engine::geo::meters_to_latitude_degrees;
use runtrack_engine::protocol::{
    CompletionReceipt, CompletionRequest, MotionSample, RawFix, RunningSnapshot, SegmentAck,
    SegmentUpload, SessionId,
};
use runtrack_engine::{
    channel_adapter, ApiError, Authorization, RemoteStore, SensorFeed, SessionController,
    SnapshotStream, TrackerConfig,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type AppendHook = Box<dyn FnMut(&SegmentUpload) + Send>;

#[derive(Default)]
struct StoreState {
    sessions_created: usize,
    create_failures: VecDeque<ApiError>,
    append_failures: VecDeque<ApiError>,
    complete_failures: VecDeque<ApiError>,
    append_delay: Option<Duration>,
    append_hook: Option<AppendHook>,
    appends: Vec<SegmentUpload>,
    completions: Vec<CompletionRequest>,
}

/// In-memory backend with queued failures. Every call is recorded, including
/// the ones scripted to fail.
#[derive(Default)]
pub struct ScriptedStore {
    state: Mutex<StoreState>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_create(&self, err: ApiError) {
        self.state.lock().unwrap().create_failures.push_back(err);
    }

    pub fn fail_next_append(&self, err: ApiError) {
        self.state.lock().unwrap().append_failures.push_back(err);
    }

    pub fn fail_next_complete(&self, err: ApiError) {
        self.state.lock().unwrap().complete_failures.push_back(err);
    }

    pub fn set_append_delay(&self, delay: Duration) {
        self.state.lock().unwrap().append_delay = Some(delay);
    }

    /// Runs `hook` inside every append call, before the response is returned.
    pub fn on_append(&self, hook: impl FnMut(&SegmentUpload) + Send + 'static) {
        self.state.lock().unwrap().append_hook = Some(Box::new(hook));
    }

    pub fn appends(&self) -> Vec<SegmentUpload> {
        self.state.lock().unwrap().appends.clone()
    }

    pub fn completions(&self) -> Vec<CompletionRequest> {
        self.state.lock().unwrap().completions.clone()
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn create_session(&self) -> Result<SessionId, ApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        state.sessions_created += 1;
        Ok(SessionId::parse(format!("run-{}", state.sessions_created)).unwrap())
    }

    async fn append_segment(&self, upload: &SegmentUpload) -> Result<SegmentAck, ApiError> {
        let delay = self.state.lock().unwrap().append_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.appends.push(upload.clone());
        if let Some(hook) = state.append_hook.as_mut() {
            hook(upload);
        }
        if let Some(err) = state.append_failures.pop_front() {
            return Err(err);
        }
        Ok(SegmentAck {
            segment_id: format!("segment-{}", state.appends.len()),
            saved_count: upload.points.len(),
        })
    }

    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.completions.push(request.clone());
        if let Some(err) = state.complete_failures.pop_front() {
            return Err(err);
        }
        Ok(CompletionReceipt {
            map_image_url: Some(format!(
                "https://maps.example.test/{}.png",
                request.session_id
            )),
        })
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub fixes: SensorFeed<RawFix>,
    pub motion: SensorFeed<MotionSample>,
    pub store: Arc<ScriptedStore>,
}

pub fn harness() -> Harness {
    harness_with(TrackerConfig::default(), Authorization::Authorized)
}

pub fn harness_with(config: TrackerConfig, location_authorization: Authorization) -> Harness {
    let (location, fixes) = channel_adapter::<RawFix>(location_authorization);
    let (motion_adapter, motion) = channel_adapter::<MotionSample>(Authorization::Authorized);
    let store = ScriptedStore::new();
    let controller = SessionController::spawn(config, location, motion_adapter, store.clone())
        .expect("valid tracker config");
    Harness {
        controller,
        fixes,
        motion,
        store,
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_767_225_600, 0).unwrap()
}

/// Fix `seconds` after the base time, `meters_north` from the start line.
pub fn fix(seconds: i64, meters_north: f64) -> RawFix {
    fix_with_accuracy(seconds, meters_north, 5.0)
}

pub fn fix_with_accuracy(seconds: i64, meters_north: f64, horizontal_accuracy: f64) -> RawFix {
    RawFix {
        timestamp: base_time() + ChronoDuration::seconds(seconds),
        latitude: 37.5665 + meters_to_latitude_degrees(meters_north),
        longitude: 126.978,
        altitude: 38.0,
        speed: 3.2,
        horizontal_accuracy,
        vertical_accuracy: 4.0,
    }
}

pub fn motion_sample(steps: u64, cadence_spm: f64) -> MotionSample {
    MotionSample {
        steps,
        distance: None,
        elapsed_seconds: 60.0,
        average_pace_sec_per_meter: None,
        cadence_spm: Some(cadence_spm),
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

pub async fn next_snapshot(stream: &mut SnapshotStream) -> RunningSnapshot {
    stream
        .recv()
        .await
        .expect("snapshot stream closed")
        .expect("snapshot stream failed")
}
