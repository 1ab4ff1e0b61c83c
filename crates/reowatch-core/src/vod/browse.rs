// ── Media browse tree ──
//
// Hierarchical view over the VoD catalog: cameras / years / months /
// days / events. Every level is computed from catalog queries at
// request time, so listings always reflect what the camera holds.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::CoreError;
use crate::model::{CameraId, VodEvent};
use crate::registry::DeviceRegistry;
use crate::vod::catalog::VodCatalog;

/// One node of the browse hierarchy, shaped for direct JSON delivery.
#[derive(Debug, Clone, Serialize)]
pub struct BrowseNode {
    /// Canonical browse path of this node.
    pub id: String,
    pub title: String,
    pub can_play: bool,
    pub can_expand: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Populated one level deep for the requested node only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BrowseNode>,
}

/// Lazy directory tree over recorded events.
///
/// Paths follow `camera/year/month/day/event_id`, each prefix being a
/// browsable directory. Malformed paths and paths pointing at nothing
/// are both not-found; the tree never distinguishes the two.
#[derive(Clone)]
pub struct MediaBrowseTree {
    registry: Arc<DeviceRegistry>,
    catalog: VodCatalog,
}

impl MediaBrowseTree {
    pub fn new(registry: Arc<DeviceRegistry>, catalog: VodCatalog) -> Self {
        Self { registry, catalog }
    }

    /// Resolve one browse path to its node, children included.
    pub async fn browse(&self, path: &str) -> Result<BrowseNode, CoreError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(self.root());
        }
        let segments: Vec<&str> = trimmed.split('/').collect();
        let Some((head, tail)) = segments.split_first() else {
            return Ok(self.root());
        };
        let camera: CameraId = head.parse().map_err(|_| invalid(path))?;
        match *tail {
            [] => self.camera_node(&camera).await,
            [year] => self.year_node(&camera, year, path).await,
            [year, month] => self.month_node(&camera, year, month, path).await,
            [year, month, day] => self.day_node(&camera, year, month, day, path).await,
            [year, month, day, event_id] => {
                self.event_node(&camera, year, month, day, event_id, path)
                    .await
            }
            _ => Err(invalid(path)),
        }
    }

    fn root(&self) -> BrowseNode {
        let mut cameras = self.registry.cameras();
        cameras.sort_by_key(ToString::to_string);
        let children = cameras
            .into_iter()
            .map(|camera| directory(camera.to_string(), self.camera_title(&camera)))
            .collect();
        let mut node = directory(String::new(), "Cameras".to_owned());
        node.children = children;
        node
    }

    async fn camera_node(&self, camera: &CameraId) -> Result<BrowseNode, CoreError> {
        let days = self.catalog.list_days(camera).await?;
        let years: BTreeSet<i32> = days.iter().map(Datelike::year).collect();
        let children = years
            .iter()
            .rev()
            .map(|year| directory(format!("{camera}/{year}"), year.to_string()))
            .collect();
        let mut node = directory(camera.to_string(), self.camera_title(camera));
        node.children = children;
        Ok(node)
    }

    async fn year_node(
        &self,
        camera: &CameraId,
        year: &str,
        path: &str,
    ) -> Result<BrowseNode, CoreError> {
        let year: i32 = year.parse().map_err(|_| invalid(path))?;
        let days = self.catalog.list_days(camera).await?;
        let months: BTreeSet<u32> = days
            .iter()
            .filter(|day| day.year() == year)
            .map(Datelike::month)
            .collect();
        if months.is_empty() {
            return Err(invalid(path));
        }
        let children = months
            .iter()
            .rev()
            .map(|month| {
                directory(
                    format!("{camera}/{year}/{month:02}"),
                    format!("{year}-{month:02}"),
                )
            })
            .collect();
        let mut node = directory(format!("{camera}/{year}"), year.to_string());
        node.children = children;
        Ok(node)
    }

    async fn month_node(
        &self,
        camera: &CameraId,
        year: &str,
        month: &str,
        path: &str,
    ) -> Result<BrowseNode, CoreError> {
        let year: i32 = year.parse().map_err(|_| invalid(path))?;
        let month: u32 = month.parse().map_err(|_| invalid(path))?;
        let days = self.catalog.list_days(camera).await?;
        let dates: Vec<NaiveDate> = days
            .into_iter()
            .filter(|day| day.year() == year && day.month() == month)
            .collect();
        if dates.is_empty() {
            return Err(invalid(path));
        }
        let children = dates
            .iter()
            .rev()
            .map(|date| {
                directory(
                    format!("{camera}/{year}/{month:02}/{:02}", date.day()),
                    date.to_string(),
                )
            })
            .collect();
        let mut node = directory(
            format!("{camera}/{year}/{month:02}"),
            format!("{year}-{month:02}"),
        );
        node.children = children;
        Ok(node)
    }

    async fn day_node(
        &self,
        camera: &CameraId,
        year: &str,
        month: &str,
        day: &str,
        path: &str,
    ) -> Result<BrowseNode, CoreError> {
        let date = parse_date(year, month, day).ok_or_else(|| invalid(path))?;
        if !self.catalog.list_days(camera).await?.contains(&date) {
            return Err(invalid(path));
        }
        let events = self.catalog.list_events(camera, date).await?;
        let mut children = Vec::with_capacity(events.len());
        for event in &events {
            children.push(self.event_leaf(camera, event).await);
        }
        let mut node = directory(day_id(camera, date), date.to_string());
        node.children = children;
        Ok(node)
    }

    async fn event_node(
        &self,
        camera: &CameraId,
        year: &str,
        month: &str,
        day: &str,
        event_id: &str,
        path: &str,
    ) -> Result<BrowseNode, CoreError> {
        let date = parse_date(year, month, day).ok_or_else(|| invalid(path))?;
        let events = self.catalog.list_events(camera, date).await?;
        let Some(event) = events.iter().find(|e| e.event_id == event_id) else {
            return Err(CoreError::UnknownEvent {
                event_id: event_id.to_owned(),
            });
        };
        Ok(self.event_leaf(camera, event).await)
    }

    async fn event_leaf(&self, camera: &CameraId, event: &VodEvent) -> BrowseNode {
        let playable = !event.is_incomplete();
        let media_url = playable.then(|| {
            format!(
                "/vod/{camera}/{}?token={}",
                event.event_id, event.token
            )
        });
        let thumbnail_url = if self.catalog.has_thumbnail(camera, event).await {
            Some(format!(
                "/media_proxy/{camera}/{}?token={}",
                event.event_id, event.token
            ))
        } else {
            None
        };
        BrowseNode {
            id: format!(
                "{}/{}",
                day_id(camera, event.start.date_naive()),
                event.event_id
            ),
            title: leaf_title(event),
            can_play: playable,
            can_expand: false,
            media_url,
            thumbnail_url,
            children: Vec::new(),
        }
    }

    fn camera_title(&self, camera: &CameraId) -> String {
        match self.registry.get(camera.device_id()) {
            Some(entry) if entry.info.channels > 1 => {
                format!("{} ch{}", entry.info.name, camera.channel())
            }
            Some(entry) => entry.info.name.clone(),
            None => camera.to_string(),
        }
    }
}

fn directory(id: String, title: String) -> BrowseNode {
    BrowseNode {
        id,
        title,
        can_play: false,
        can_expand: true,
        media_url: None,
        thumbnail_url: None,
        children: Vec::new(),
    }
}

fn day_id(camera: &CameraId, date: NaiveDate) -> String {
    format!(
        "{camera}/{}/{:02}/{:02}",
        date.year(),
        date.month(),
        date.day()
    )
}

fn leaf_title(event: &VodEvent) -> String {
    match event.end {
        Some(end) => format!(
            "{} - {}",
            event.start.format("%H:%M:%S"),
            end.format("%H:%M:%S")
        ),
        None => format!("{} (recording)", event.start.format("%H:%M:%S")),
    }
}

fn parse_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn invalid(path: &str) -> CoreError {
    CoreError::InvalidBrowsePath {
        path: path.to_owned(),
    }
}
