// ── VoD catalog ──
//
// Searches, caches, and reconciles recording events per camera. Two
// caches: day availability (which dates have recordings, per playback
// window) and the per-camera event list. Both hold immutable snapshots
// replaced wholesale, so readers are never blocked by a refresh.
//
// Incomplete events are placeholders created by motion captures; a later
// search result whose interval contains the capture's start absorbs the
// thumbnail and retires the placeholder.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use reowatch_api::model::{SearchFile, SearchStatus};

use crate::config::CoreSettings;
use crate::error::CoreError;
use crate::model::{CameraId, ThumbnailRef, VodEvent};
use crate::registry::{DeviceEntry, DeviceRegistry};
use crate::vod::thumbs::{PendingCapture, ThumbnailStore};

/// Snapshot of the most recent recording on a camera, with the range of
/// days the camera still holds. Refreshing it also prunes thumbnails
/// older than the oldest recording day, which are unreachable.
#[derive(Debug, Clone)]
pub struct LastEventSummary {
    pub event: VodEvent,
    pub oldest_day: NaiveDate,
    pub newest_day: NaiveDate,
    pub has_thumbnail: bool,
}

struct DayCache {
    /// The `playback_months` value this cache was built with; a mismatch
    /// forces a re-query.
    months: u32,
    days: Arc<Vec<NaiveDate>>,
}

/// Recording catalog shared by the router, browse tree, and HTTP views.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct VodCatalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    registry: Arc<DeviceRegistry>,
    thumbs: ThumbnailStore,
    playback_months: AtomicU32,
    days: DashMap<CameraId, DayCache>,
    events: DashMap<CameraId, Arc<Vec<VodEvent>>>,
    summaries: DashMap<CameraId, LastEventSummary>,
}

impl VodCatalog {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        thumbs: ThumbnailStore,
        settings: &CoreSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                registry,
                thumbs,
                playback_months: AtomicU32::new(settings.playback_months),
                days: DashMap::new(),
                events: DashMap::new(),
                summaries: DashMap::new(),
            }),
        }
    }

    pub fn playback_months(&self) -> u32 {
        self.inner.playback_months.load(Ordering::Relaxed)
    }

    /// Change the catalog window. Any change invalidates every cached
    /// day listing; event caches stay (they are keyed by day, not range).
    pub fn set_playback_months(&self, months: u32) {
        let previous = self.inner.playback_months.swap(months, Ordering::Relaxed);
        if previous != months {
            self.inner.days.clear();
            debug!(months, "playback window changed; day caches dropped");
        }
    }

    /// Days with recordings inside the playback window, oldest first.
    /// Today is always included so in-progress recordings are browsable.
    /// Served from cache while the window is unchanged.
    pub async fn list_days(&self, camera: &CameraId) -> Result<Vec<NaiveDate>, CoreError> {
        let months = self.playback_months();
        {
            let cached = self.inner.days.get(camera);
            if let Some(cache) = cached {
                if cache.months == months {
                    return Ok(cache.days.as_ref().clone());
                }
            }
        }
        let mut days = self.fetch_days(camera).await?;
        days.insert(Utc::now().date_naive());
        let days: Vec<NaiveDate> = days.into_iter().collect();
        self.inner.days.insert(
            camera.clone(),
            DayCache {
                months,
                days: Arc::new(days.clone()),
            },
        );
        Ok(days)
    }

    /// Events recorded on one day, newest first.
    ///
    /// Runs a full search over the day's 24h window, reconciles the
    /// results against cached incomplete captures (interval containment,
    /// thumbnail transplant), and replaces the camera's event cache.
    pub async fn list_events(
        &self,
        camera: &CameraId,
        day: NaiveDate,
    ) -> Result<Vec<VodEvent>, CoreError> {
        let entry = self.entry(camera)?;
        let start = day.and_time(NaiveTime::MIN).and_utc();
        let end = start + chrono::Duration::seconds(86_399);
        let results = entry
            .client
            .search(camera.channel(), start, end, false)
            .await?;
        Ok(self.merge_events(camera, day, &results.files))
    }

    /// Playable stream URL for a complete event. Unknown ids and events
    /// still waiting on their recording are both not-found.
    pub async fn resolve_playable_url(
        &self,
        camera: &CameraId,
        event_id: &str,
    ) -> Result<Url, CoreError> {
        let entry = self.entry(camera)?;
        let event = self
            .find_event(camera, event_id)
            .ok_or_else(|| unknown_event(event_id))?;
        let file = event.file.ok_or_else(|| unknown_event(event_id))?;
        let url = entry.client.vod_source(camera.channel(), &file).await?;
        Ok(url)
    }

    /// Fire-and-forget capture: record an incomplete event for `at` and
    /// fetch a live snapshot for it in the background. Failures downgrade
    /// to an event without a thumbnail.
    pub fn capture_snapshot(&self, camera: &CameraId, at: DateTime<Utc>) {
        let Some(entry) = self.inner.registry.entry_for_camera(camera) else {
            debug!(camera = %camera, "capture for unregistered camera skipped");
            return;
        };
        let event = VodEvent::incomplete(at);
        let event_id = event.event_id.clone();
        self.inner.upsert_event(camera, event);

        let inner = Arc::clone(&self.inner);
        let camera = camera.clone();
        tokio::spawn(async move {
            match entry.client.snapshot(camera.channel()).await {
                Ok(bytes) => {
                    // Durable copy first; the live bytes stay on the event
                    // for serving without a disk round-trip.
                    if let Err(err) = inner.thumbs.save(&camera, &event_id, bytes.clone()).await {
                        warn!(camera = %camera, error = %err, "thumbnail write failed");
                    }
                    inner.attach_thumbnail(&camera, &event_id, ThumbnailRef::Bytes(bytes));
                }
                Err(err) => {
                    debug!(camera = %camera, error = %err, "snapshot capture failed; event has no thumbnail");
                }
            }
        });
    }

    /// Look an event up and check its access token. Unknown camera,
    /// unknown event, and token mismatch are indistinguishable.
    pub fn authorize(
        &self,
        camera: &CameraId,
        event_id: &str,
        token: &str,
    ) -> Result<VodEvent, CoreError> {
        let event = self
            .find_event(camera, event_id)
            .ok_or_else(|| unknown_event(event_id))?;
        if event.token != token {
            return Err(unknown_event(event_id));
        }
        Ok(event)
    }

    /// Thumbnail for an authorized event: live bytes if a capture still
    /// holds them, else the stored file.
    pub async fn thumbnail(
        &self,
        camera: &CameraId,
        event_id: &str,
        token: &str,
    ) -> Result<ThumbnailRef, CoreError> {
        let event = self.authorize(camera, event_id, token)?;
        if let Some(thumb) = event.thumbnail {
            return Ok(thumb);
        }
        self.inner
            .thumbs
            .load(camera, event_id)
            .await
            .map(ThumbnailRef::File)
            .ok_or_else(|| unknown_event(event_id))
    }

    /// Event lookup without authorization, for trusted internal callers.
    pub fn event(&self, camera: &CameraId, event_id: &str) -> Option<VodEvent> {
        self.find_event(camera, event_id)
    }

    /// Whether any thumbnail exists for the event, live or on disk.
    pub async fn has_thumbnail(&self, camera: &CameraId, event: &VodEvent) -> bool {
        event.thumbnail.is_some()
            || self
                .inner
                .thumbs
                .load(camera, &event.event_id)
                .await
                .is_some()
    }

    /// Most recent recording plus the camera's day range, refreshed from
    /// the camera. Also prunes thumbnails predating the oldest recording
    /// day, and caches the result for [`Self::cached_summary`]. `None`
    /// when the camera holds no recordings at all.
    pub async fn last_event_summary(
        &self,
        camera: &CameraId,
    ) -> Result<Option<LastEventSummary>, CoreError> {
        let summary = self.compute_summary(camera).await?;
        match &summary {
            Some(summary) => {
                self.inner.summaries.insert(camera.clone(), summary.clone());
            }
            None => {
                self.inner.summaries.remove(camera);
            }
        }
        Ok(summary)
    }

    /// The summary from the last successful sweep, without touching the
    /// camera. `None` until a sweep has run.
    pub fn cached_summary(&self, camera: &CameraId) -> Option<LastEventSummary> {
        self.inner
            .summaries
            .get(camera)
            .map(|entry| entry.value().clone())
    }

    async fn compute_summary(
        &self,
        camera: &CameraId,
    ) -> Result<Option<LastEventSummary>, CoreError> {
        let days = self.fetch_days(camera).await?;
        let Some(&newest_day) = days.iter().next_back() else {
            return Ok(None);
        };
        let Some(&oldest_day) = days.iter().next() else {
            return Ok(None);
        };

        let events = self.list_events(camera, newest_day).await?;
        let Some(event) = events.into_iter().find(|e| !e.is_incomplete()) else {
            return Ok(None);
        };
        let has_thumbnail = self.has_thumbnail(camera, &event).await;

        let cutoff = oldest_day.and_time(NaiveTime::MIN).and_utc();
        self.purge_before(camera, cutoff).await;

        Ok(Some(LastEventSummary {
            event,
            oldest_day,
            newest_day,
            has_thumbnail,
        }))
    }

    /// Drop cached events and stored thumbnails that started before
    /// `cutoff`. Storage failures are logged, never raised.
    pub async fn purge_before(&self, camera: &CameraId, cutoff: DateTime<Utc>) {
        if let Some(mut entry) = self.inner.events.get_mut(camera) {
            let mut list = entry.value().as_ref().clone();
            list.retain(|event| event.start >= cutoff);
            *entry.value_mut() = Arc::new(list);
        }
        match self.inner.thumbs.purge(camera, cutoff).await {
            Ok(removed) if removed > 0 => {
                debug!(camera = %camera, removed, "aged thumbnails purged");
            }
            Ok(_) => {}
            Err(err) => warn!(camera = %camera, error = %err, "thumbnail purge failed"),
        }
    }

    /// Persist unmerged captures (incomplete events still holding live
    /// bytes) so they survive a restart.
    pub async fn flush_pending(&self) -> Result<(), CoreError> {
        let mut pending: HashMap<CameraId, Vec<PendingCapture>> = HashMap::new();
        for item in &self.inner.events {
            let captures: Vec<PendingCapture> = item
                .value()
                .iter()
                .filter(|event| event.is_incomplete())
                .filter_map(|event| match &event.thumbnail {
                    Some(ThumbnailRef::Bytes(bytes)) => Some(PendingCapture {
                        event_id: event.event_id.clone(),
                        start: event.start,
                        token: event.token.clone(),
                        bytes: bytes.clone(),
                    }),
                    _ => None,
                })
                .collect();
            if !captures.is_empty() {
                pending.insert(item.key().clone(), captures);
            }
        }
        self.inner.thumbs.flush_pending(pending).await
    }

    /// Reload captures persisted by the previous run into the event
    /// cache. Returns how many events came back.
    pub async fn restore_pending(&self) -> Result<usize, CoreError> {
        let pending = self.inner.thumbs.load_pending().await?;
        let mut restored = 0;
        for (camera, captures) in pending {
            for capture in captures {
                let event = VodEvent {
                    event_id: capture.event_id,
                    start: capture.start,
                    end: None,
                    file: None,
                    token: capture.token,
                    thumbnail: Some(ThumbnailRef::Bytes(capture.bytes)),
                };
                self.inner.upsert_event(&camera, event);
                restored += 1;
            }
        }
        if restored > 0 {
            debug!(restored, "pending captures restored");
        }
        Ok(restored)
    }

    /// Status-only search over the playback window, decoded to a day set.
    async fn fetch_days(&self, camera: &CameraId) -> Result<BTreeSet<NaiveDate>, CoreError> {
        let entry = self.entry(camera)?;
        let (start, end) = self.playback_window();
        let results = entry
            .client
            .search(camera.channel(), start, end, true)
            .await?;
        Ok(decode_days(&results.statuses))
    }

    fn playback_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        let months = self.playback_months();
        let start = now.checked_sub_months(Months::new(months)).unwrap_or(now);
        let start = start.date_naive().and_time(NaiveTime::MIN).and_utc();
        (start, now)
    }

    /// Reconcile fresh search results with the cached list for `camera`
    /// and return the day's listing, newest first.
    fn merge_events(
        &self,
        camera: &CameraId,
        day: NaiveDate,
        files: &[SearchFile],
    ) -> Vec<VodEvent> {
        let mut fresh: Vec<VodEvent> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for file in files {
            let Some(event) = VodEvent::from_search(file) else {
                debug!(camera = %camera, file = %file.name, "search record with bad timestamps skipped");
                continue;
            };
            if seen.insert(event.event_id.clone()) {
                fresh.push(event);
            }
        }

        let mut entry = self
            .inner
            .events
            .entry(camera.clone())
            .or_insert_with(|| Arc::new(Vec::new()));
        let old = entry.value().as_ref().clone();

        let mut kept: Vec<VodEvent> = Vec::new();
        let mut incompletes: Vec<VodEvent> = Vec::new();
        let mut previous_day: HashMap<String, VodEvent> = HashMap::new();
        for event in old {
            if event.is_incomplete() {
                incompletes.push(event);
            } else if event.start.date_naive() == day {
                previous_day.insert(event.event_id.clone(), event);
            } else {
                kept.push(event);
            }
        }

        // Re-sightings keep their token (handed-out URLs stay valid) and
        // their thumbnail.
        for event in &mut fresh {
            if let Some(previous) = previous_day.remove(&event.event_id) {
                event.token = previous.token;
                if event.thumbnail.is_none() {
                    event.thumbnail = previous.thumbnail;
                }
            }
        }

        // Containment merge: a completed recording absorbs the capture
        // taken while it was being written.
        let mut leftover: Vec<VodEvent> = Vec::new();
        'outer: for incomplete in incompletes {
            for event in &mut fresh {
                if event.contains(incomplete.start) {
                    if event.thumbnail.is_none() {
                        event.thumbnail = incomplete.thumbnail;
                    }
                    debug!(camera = %camera, event = %event.event_id, "incomplete capture merged");
                    continue 'outer;
                }
            }
            leftover.push(incomplete);
        }

        let mut day_list: Vec<VodEvent> = fresh.clone();
        day_list.extend(
            leftover
                .iter()
                .filter(|event| event.start.date_naive() == day)
                .cloned(),
        );
        day_list.sort_by(|a, b| b.start.cmp(&a.start));

        let mut cache = kept;
        cache.extend(fresh);
        cache.extend(leftover);
        *entry.value_mut() = Arc::new(cache);

        day_list
    }

    fn find_event(&self, camera: &CameraId, event_id: &str) -> Option<VodEvent> {
        let guard = self.inner.events.get(camera)?;
        guard
            .value()
            .iter()
            .find(|event| event.event_id == event_id)
            .cloned()
    }

    fn entry(&self, camera: &CameraId) -> Result<Arc<DeviceEntry>, CoreError> {
        self.inner
            .registry
            .entry_for_camera(camera)
            .ok_or_else(|| CoreError::UnknownCamera {
                camera_id: camera.clone(),
            })
    }
}

impl CatalogInner {
    fn upsert_event(&self, camera: &CameraId, event: VodEvent) {
        let mut entry = self
            .events
            .entry(camera.clone())
            .or_insert_with(|| Arc::new(Vec::new()));
        let mut list = entry.value().as_ref().clone();
        if let Some(existing) = list.iter_mut().find(|e| e.event_id == event.event_id) {
            // The first token handed out for an event stays authoritative.
            let token = existing.token.clone();
            *existing = event;
            existing.token = token;
        } else {
            list.push(event);
        }
        *entry.value_mut() = Arc::new(list);
    }

    fn attach_thumbnail(&self, camera: &CameraId, event_id: &str, thumb: ThumbnailRef) {
        if let Some(mut entry) = self.events.get_mut(camera) {
            let mut list = entry.value().as_ref().clone();
            if let Some(event) = list.iter_mut().find(|e| e.event_id == event_id) {
                event.thumbnail = Some(thumb);
                *entry.value_mut() = Arc::new(list);
            }
        }
    }
}

fn unknown_event(event_id: &str) -> CoreError {
    CoreError::UnknownEvent {
        event_id: event_id.to_owned(),
    }
}

fn decode_days(statuses: &[SearchStatus]) -> BTreeSet<NaiveDate> {
    let mut days = BTreeSet::new();
    for status in statuses {
        for day in status.days() {
            if let Some(date) = NaiveDate::from_ymd_opt(status.year, status.mon, day) {
                days.insert(date);
            } else {
                debug!(
                    year = status.year,
                    month = status.mon,
                    day,
                    "impossible date in search status skipped"
                );
            }
        }
    }
    days
}

/// Periodic recording sweep: refreshes every registered camera's
/// newest-recording summary for the status API and, through the
/// summary, prunes thumbnails that fell out of the playback window.
pub async fn summary_task(catalog: VodCatalog, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("summary task stopping");
                break;
            }
            _ = interval.tick() => {
                for camera in catalog.inner.registry.cameras() {
                    if let Err(err) = catalog.last_event_summary(&camera).await {
                        debug!(camera = %camera, error = %err, "summary sweep skipped");
                    }
                }
            }
        }
    }
}
