// ── VoD domain types ──
//
// A VodEvent is one motion-triggered recording. Complete events come out
// of camera searches (start, end, file name); incomplete events are
// placeholders created the moment motion fires, carrying a freshly
// captured thumbnail until the camera finishes writing the segment.

use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reowatch_api::model::SearchFile;

/// Where a thumbnail for an event currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailRef {
    /// Still in memory, captured during the motion window.
    Bytes(Bytes),
    /// Persisted to the thumbnail store.
    File(PathBuf),
}

/// One recording event on a single camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VodEvent {
    /// Stable identifier, derived from the start time. Two sightings of
    /// the same recording always produce the same id.
    pub event_id: String,
    pub start: DateTime<Utc>,
    /// Absent while the camera is still recording the segment.
    pub end: Option<DateTime<Utc>>,
    /// Vendor file name used to build playback URLs. Absent for
    /// incomplete events.
    pub file: Option<String>,
    /// Per-event access token; media URLs carry it as a query parameter.
    pub token: String,
    pub thumbnail: Option<ThumbnailRef>,
}

impl VodEvent {
    /// The identifier a recording starting at `start` will carry.
    pub fn id_for(start: &DateTime<Utc>) -> String {
        start.timestamp().to_string()
    }

    /// Placeholder for a recording the camera has not finished yet.
    pub fn incomplete(start: DateTime<Utc>) -> Self {
        Self {
            event_id: Self::id_for(&start),
            start,
            end: None,
            file: None,
            token: new_token(),
            thumbnail: None,
        }
    }

    /// Build a complete event from a search result. Returns `None` when
    /// the camera reported nonsense timestamps.
    pub fn from_search(file: &SearchFile) -> Option<Self> {
        let start = file.start_time.to_datetime()?;
        let end = file.end_time.to_datetime()?;
        Some(Self {
            event_id: Self::id_for(&start),
            start,
            end: Some(end),
            file: Some(file.name.clone()),
            token: new_token(),
            thumbnail: None,
        })
    }

    /// Whether this event is still waiting to be reconciled against a
    /// search result.
    pub fn is_incomplete(&self) -> bool {
        self.end.is_none() || self.file.is_none()
    }

    /// Whether `at` falls inside this event's recording interval. Always
    /// false for incomplete events.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && self.end.is_some_and(|end| at <= end)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end.map(|end| end - self.start)
    }
}

/// Random access token for one event's media URLs.
fn new_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reowatch_api::model::SearchTime;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 5, h, m, s).unwrap()
    }

    #[test]
    fn event_id_is_start_timestamp() {
        let start = at(14, 30, 0);
        let event = VodEvent::incomplete(start);
        assert_eq!(event.event_id, start.timestamp().to_string());
        assert_eq!(VodEvent::id_for(&start), event.event_id);
    }

    #[test]
    fn incomplete_flags_and_containment() {
        let event = VodEvent::incomplete(at(14, 30, 0));
        assert!(event.is_incomplete());
        assert!(!event.contains(at(14, 30, 5)));
    }

    #[test]
    fn from_search_maps_interval_and_file() {
        let file = SearchFile {
            start_time: SearchTime {
                year: 2023,
                mon: 1,
                day: 5,
                hour: 14,
                min: 30,
                sec: 0,
            },
            end_time: SearchTime {
                year: 2023,
                mon: 1,
                day: 5,
                hour: 14,
                min: 31,
                sec: 30,
            },
            name: "Rec_20230105_143000.mp4".to_owned(),
            size: Some(1024),
            file_type: Some("main".to_owned()),
        };
        let event = VodEvent::from_search(&file).unwrap();
        assert!(!event.is_incomplete());
        assert_eq!(event.start, at(14, 30, 0));
        assert_eq!(event.end, Some(at(14, 31, 30)));
        assert_eq!(event.file.as_deref(), Some("Rec_20230105_143000.mp4"));
        assert!(event.contains(at(14, 30, 45)));
        assert!(!event.contains(at(14, 32, 0)));
        assert_eq!(event.duration().unwrap().num_seconds(), 90);
    }

    #[test]
    fn from_search_rejects_zeroed_timestamps() {
        let file = SearchFile {
            start_time: SearchTime {
                year: 0,
                mon: 0,
                day: 0,
                hour: 0,
                min: 0,
                sec: 0,
            },
            end_time: SearchTime {
                year: 2023,
                mon: 1,
                day: 5,
                hour: 14,
                min: 31,
                sec: 30,
            },
            name: "bad.mp4".to_owned(),
            size: None,
            file_type: None,
        };
        assert!(VodEvent::from_search(&file).is_none());
    }

    #[test]
    fn tokens_are_unique_per_event() {
        let a = VodEvent::incomplete(at(14, 30, 0));
        let b = VodEvent::incomplete(at(14, 30, 0));
        assert_eq!(a.event_id, b.event_id);
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 32);
    }
}
