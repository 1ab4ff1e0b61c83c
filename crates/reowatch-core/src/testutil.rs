// ── Test doubles ──
//
// In-memory CameraClient and SubscriptionManager used by unit tests
// across the crate. Failure modes are steered through atomic flags so a
// test can flip behavior mid-scenario.

#![allow(clippy::unwrap_used)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use url::Url;

use reowatch_api::model::{
    AiStateValue, CameraSettings, CameraStates, ChannelState, DeviceCapability, DeviceInfo,
    SearchFile, SearchResults, SearchStatus,
};
use reowatch_api::{CameraClient, Error as ApiError, SubscriptionManager};

pub(crate) fn device_info(mac: &str, channels: u8) -> DeviceInfo {
    DeviceInfo {
        mac: mac.to_owned(),
        model: "RLC-810A".to_owned(),
        name: "Yard".to_owned(),
        channels,
        host: "192.0.2.10".to_owned(),
        onvif_port: 8000,
        rtmp_port: 1935,
    }
}

fn transient() -> ApiError {
    ApiError::Timeout { timeout_secs: 5 }
}

// ── MockCamera ──────────────────────────────────────────────────────

pub(crate) struct MockCamera {
    pub info: DeviceInfo,
    pub states: Mutex<CameraStates>,
    pub statuses: Mutex<Vec<SearchStatus>>,
    pub files: Mutex<Vec<SearchFile>>,
    pub snapshot_body: Mutex<Bytes>,
    pub fail_states: AtomicBool,
    pub fail_search: AtomicBool,
    pub fail_snapshot: AtomicBool,
    pub states_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub snapshot_calls: AtomicUsize,
    pub last_search: Mutex<Option<(u8, DateTime<Utc>, DateTime<Utc>, bool)>>,
}

impl MockCamera {
    pub(crate) fn new(mac: &str, channels: u8) -> Self {
        let states = CameraStates {
            channels: (0..channels)
                .map(|channel| ChannelState {
                    channel,
                    motion: false,
                    ai: None,
                })
                .collect(),
        };
        Self {
            info: device_info(mac, channels),
            states: Mutex::new(states),
            statuses: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            snapshot_body: Mutex::new(Bytes::from_static(b"\xff\xd8jpeg")),
            fail_states: AtomicBool::new(false),
            fail_search: AtomicBool::new(false),
            fail_snapshot: AtomicBool::new(false),
            states_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            snapshot_calls: AtomicUsize::new(0),
            last_search: Mutex::new(None),
        }
    }

    pub(crate) fn set_channel(&self, channel: u8, motion: bool, ai: Option<AiStateValue>) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.channels.iter_mut().find(|s| s.channel == channel) {
            state.motion = motion;
            state.ai = ai;
        }
    }
}

#[async_trait]
impl CameraClient for MockCamera {
    async fn login(&self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn logout(&self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn device_info(&self) -> Result<DeviceInfo, ApiError> {
        Ok(self.info.clone())
    }

    async fn get_settings(&self, _channel: u8) -> Result<CameraSettings, ApiError> {
        Ok(CameraSettings::default())
    }

    async fn get_states(&self) -> Result<CameraStates, ApiError> {
        self.states_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_states.load(Ordering::SeqCst) {
            return Err(transient());
        }
        Ok(self.states.lock().unwrap().clone())
    }

    async fn set_capability(
        &self,
        _channel: u8,
        _capability: DeviceCapability,
        _enable: bool,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn search(
        &self,
        channel: u8,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status_only: bool,
    ) -> Result<SearchResults, ApiError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_search.lock().unwrap() = Some((channel, start, end, status_only));
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(transient());
        }
        if status_only {
            return Ok(SearchResults {
                statuses: self.statuses.lock().unwrap().clone(),
                files: Vec::new(),
            });
        }
        // The real camera only returns segments inside the window.
        let files = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| {
                f.start_time
                    .to_datetime()
                    .is_some_and(|at| start <= at && at <= end)
            })
            .cloned()
            .collect();
        Ok(SearchResults {
            statuses: Vec::new(),
            files,
        })
    }

    async fn snapshot(&self, _channel: u8) -> Result<Bytes, ApiError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(transient());
        }
        Ok(self.snapshot_body.lock().unwrap().clone())
    }

    async fn vod_source(&self, channel: u8, file: &str) -> Result<Url, ApiError> {
        let url = format!(
            "http://192.0.2.10/flv?port=1935&app=bcs&stream=playback.bcs&channel={channel}&type=1&start={file}&token=mock"
        );
        Url::parse(&url).map_err(ApiError::from)
    }
}

// ── MockSubscription ────────────────────────────────────────────────

pub(crate) struct MockSubscription {
    pub timer: Mutex<Option<Duration>>,
    pub fail_subscribe: AtomicBool,
    pub fail_renew: AtomicBool,
    pub subscribe_calls: AtomicUsize,
    pub renew_calls: AtomicUsize,
    pub unsubscribe_calls: AtomicUsize,
    pub last_callback: Mutex<Option<Url>>,
}

impl MockSubscription {
    pub(crate) fn new() -> Self {
        Self {
            timer: Mutex::new(None),
            fail_subscribe: AtomicBool::new(false),
            fail_renew: AtomicBool::new(false),
            subscribe_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            last_callback: Mutex::new(None),
        }
    }

    pub(crate) fn set_timer(&self, remaining: Option<Duration>) {
        *self.timer.lock().unwrap() = remaining;
    }
}

#[async_trait]
impl SubscriptionManager for MockSubscription {
    async fn subscribe(&self, callback: &Url) -> Result<(), ApiError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_callback.lock().unwrap() = Some(callback.clone());
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ApiError::Soap("subscribe refused".to_owned()));
        }
        self.set_timer(Some(Duration::from_secs(900)));
        Ok(())
    }

    async fn renew(&self) -> Result<(), ApiError> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_renew.load(Ordering::SeqCst) {
            return Err(ApiError::Soap("renew refused".to_owned()));
        }
        if self.timer.lock().unwrap().is_none() {
            return Err(ApiError::NoActiveLease);
        }
        self.set_timer(Some(Duration::from_secs(900)));
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), ApiError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.set_timer(None);
        Ok(())
    }

    fn renew_timer(&self) -> Option<Duration> {
        *self.timer.lock().unwrap()
    }
}
