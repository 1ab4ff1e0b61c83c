// ── Test doubles ──
//
// In-memory CameraClient and SubscriptionManager for the daemon's HTTP
// and SMTP tests. Unlike a free-form mock, StubCamera derives its
// month-status tables from the recordings fed to it, so search behaves
// like the real device.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use url::Url;

use reowatch_api::model::{
    CameraSettings, CameraStates, ChannelState, DeviceCapability, DeviceInfo, SearchFile,
    SearchResults, SearchStatus, SearchTime,
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

// ── StubCamera ──────────────────────────────────────────────────────

pub(crate) struct StubCamera {
    pub info: DeviceInfo,
    pub states: Mutex<CameraStates>,
    pub files: Mutex<Vec<SearchFile>>,
}

impl StubCamera {
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
            files: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_recording(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.files.lock().unwrap().push(SearchFile {
            start_time: SearchTime::from_datetime(&start),
            end_time: SearchTime::from_datetime(&end),
            name: format!("Rec_{}.mp4", start.format("%Y%m%d_%H%M%S")),
            size: Some(4_096_000),
            file_type: Some("main".to_owned()),
        });
    }

    pub(crate) fn set_motion(&self, channel: u8, motion: bool) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.channels.iter_mut().find(|s| s.channel == channel) {
            state.motion = motion;
        }
    }

    /// Month bitmaps derived from the stored recordings, the way a real
    /// camera answers a status-only search.
    fn statuses(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<SearchStatus> {
        let mut months: BTreeMap<(i32, u32), Vec<u32>> = BTreeMap::new();
        for file in self.files.lock().unwrap().iter() {
            let Some(at) = file.start_time.to_datetime() else {
                continue;
            };
            if at < start || at > end {
                continue;
            }
            months.entry((at.year(), at.month())).or_default().push(at.day());
        }
        months
            .into_iter()
            .map(|((year, mon), days)| {
                let mut table: Vec<u8> = vec![b'0'; 31];
                for day in days {
                    table[day as usize - 1] = b'1';
                }
                SearchStatus {
                    year,
                    mon,
                    table: String::from_utf8(table).unwrap(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl CameraClient for StubCamera {
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
        _channel: u8,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status_only: bool,
    ) -> Result<SearchResults, ApiError> {
        if status_only {
            return Ok(SearchResults {
                statuses: self.statuses(start, end),
                files: Vec::new(),
            });
        }
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
        Ok(Bytes::from_static(b"\xff\xd8stub-jpeg"))
    }

    async fn vod_source(&self, channel: u8, file: &str) -> Result<Url, ApiError> {
        let url = format!(
            "http://{}/flv?port={}&app=bcs&stream=playback.bcs&channel={channel}&type=1&start={file}&token=stub",
            self.info.host, self.info.rtmp_port
        );
        Url::parse(&url).map_err(ApiError::from)
    }
}

// ── StubSubscription ────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct StubSubscription {
    pub callback: Mutex<Option<Url>>,
    pub subscribed: AtomicBool,
}

#[async_trait]
impl SubscriptionManager for StubSubscription {
    async fn subscribe(&self, callback: &Url) -> Result<(), ApiError> {
        *self.callback.lock().unwrap() = Some(callback.clone());
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn renew(&self) -> Result<(), ApiError> {
        if !self.subscribed.load(Ordering::SeqCst) {
            return Err(ApiError::NoActiveLease);
        }
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), ApiError> {
        self.subscribed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn renew_timer(&self) -> Option<Duration> {
        self.subscribed
            .load(Ordering::SeqCst)
            .then_some(Duration::from_secs(900))
    }
}
