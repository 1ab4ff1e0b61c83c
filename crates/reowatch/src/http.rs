//! HTTP ingress: the webhook sink, media views, and the browse/status API.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use reowatch_api::SubscriptionManager;
use reowatch_api::model::AiKind;
use reowatch_core::{
    CameraId, CoreError, DeviceRegistry, MediaBrowseTree, MotionEventRouter, PushCoordinator,
    ThumbnailRef, VodCatalog,
};

// ── Shared state ─────────────────────────────────────────────────────

/// Everything the handlers reach for, cloned per request.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<DeviceRegistry>,
    pub coordinator: PushCoordinator,
    pub router: MotionEventRouter,
    pub catalog: VodCatalog,
    pub browse: MediaBrowseTree,
}

/// Build the daemon's HTTP surface.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/webhook/{webhook_id}", post(receive_webhook))
        .route("/media_proxy/{camera_id}/{event_id}", get(media_proxy))
        .route("/vod/{camera_id}/{event_id}", get(vod_redirect))
        .route("/api/browse", get(browse_root))
        .route("/api/browse/{*path}", get(browse_path))
        .route("/api/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: String,
}

// ── Webhook ──────────────────────────────────────────────────────────

/// Notification sink. Always 200: cameras treat any other status as a
/// delivery failure and may abandon the subscription.
#[allow(clippy::unused_async)] // axum handlers must be async
async fn receive_webhook(
    State(state): State<ApiState>,
    Path(webhook_id): Path<String>,
    body: String,
) -> StatusCode {
    state.coordinator.handle_webhook(&webhook_id, &body);
    StatusCode::OK
}

// ── Media views ──────────────────────────────────────────────────────

/// Thumbnail bytes for one event. Unknown camera, unknown event, and a
/// wrong token all produce the same empty 404.
async fn media_proxy(
    State(state): State<ApiState>,
    Path((camera_id, event_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let Ok(camera) = camera_id.parse::<CameraId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state
        .catalog
        .thumbnail(&camera, &event_id, &query.token)
        .await
    {
        Ok(ThumbnailRef::Bytes(bytes)) => jpeg(bytes),
        Ok(ThumbnailRef::File(path)) => match tokio::fs::read(&path).await {
            Ok(bytes) => jpeg(Bytes::from(bytes)),
            Err(err) => {
                warn!(camera = %camera, event = %event_id, error = %err, "thumbnail read failed");
                StatusCode::NOT_FOUND.into_response()
            }
        },
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Redirect to the camera's playable stream URL for one recording.
async fn vod_redirect(
    State(state): State<ApiState>,
    Path((camera_id, event_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let Ok(camera) = camera_id.parse::<CameraId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if state
        .catalog
        .authorize(&camera, &event_id, &query.token)
        .is_err()
    {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.catalog.resolve_playable_url(&camera, &event_id).await {
        Ok(url) => (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response(),
        Err(err) => {
            if err.is_transient() {
                warn!(camera = %camera, event = %event_id, error = %err, "stream resolution failed");
            }
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn jpeg(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response()
}

// ── Browse API ───────────────────────────────────────────────────────

async fn browse_root(State(state): State<ApiState>) -> Response {
    browse_reply(&state, String::new()).await
}

async fn browse_path(State(state): State<ApiState>, Path(path): Path<String>) -> Response {
    browse_reply(&state, path).await
}

async fn browse_reply(state: &ApiState, path: String) -> Response {
    match state.browse.browse(&path).await {
        Ok(node) => Json(node).into_response(),
        Err(err) => {
            let status = match &err {
                CoreError::UnknownDevice { .. }
                | CoreError::UnknownCamera { .. }
                | CoreError::UnknownEvent { .. }
                | CoreError::InvalidBrowsePath { .. } => StatusCode::NOT_FOUND,
                other if other.is_transient() => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status != StatusCode::NOT_FOUND {
                warn!(path = %path, error = %err, "browse failed");
            }
            (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
        }
    }
}

// ── Status API ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StatusReply {
    devices: Vec<DeviceStatus>,
}

#[derive(Debug, Serialize)]
struct DeviceStatus {
    device_id: String,
    name: String,
    model: String,
    channels: u8,
    available: bool,
    webhook_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease_remaining_secs: Option<u64>,
    cameras: Vec<CameraStatus>,
}

#[derive(Debug, Serialize)]
struct CameraStatus {
    camera_id: String,
    motion: bool,
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_motion: Option<DateTime<Utc>>,
    ai: BTreeMap<&'static str, AiStatus>,
    /// Filled by the recording summary sweep; absent until one has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    last_recording: Option<LastRecording>,
}

#[derive(Debug, Serialize)]
struct AiStatus {
    detected: bool,
    supported: bool,
    available: bool,
}

#[derive(Debug, Serialize)]
struct LastRecording {
    start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
    oldest_day: NaiveDate,
    newest_day: NaiveDate,
    has_thumbnail: bool,
}

/// Aggregated device, subscription, and detection state.
#[allow(clippy::unused_async)] // axum handlers must be async
async fn status(State(state): State<ApiState>) -> Json<StatusReply> {
    let mut devices: Vec<DeviceStatus> = state
        .registry
        .devices()
        .iter()
        .map(|entry| DeviceStatus {
            device_id: entry.device_id.to_string(),
            name: entry.info.name.clone(),
            model: entry.info.model.clone(),
            channels: entry.info.channels,
            available: state.coordinator.is_available(&entry.device_id),
            webhook_registered: state.coordinator.webhook_id(&entry.device_id).is_some(),
            lease_remaining_secs: entry.subscription.renew_timer().map(|d| d.as_secs()),
            cameras: entry
                .cameras
                .iter()
                .map(|camera| camera_status(&state, camera))
                .collect(),
        })
        .collect();
    devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    Json(StatusReply { devices })
}

fn camera_status(state: &ApiState, camera: &CameraId) -> CameraStatus {
    let motion = state.router.motion_state(camera);
    let ai = [AiKind::Person, AiKind::Vehicle, AiKind::Pet]
        .into_iter()
        .map(|kind| {
            let class = state.router.ai_state(camera, kind);
            (
                kind_key(kind),
                AiStatus {
                    detected: class.detected,
                    supported: class.supported,
                    available: class.available,
                },
            )
        })
        .collect();
    let last_recording = state
        .catalog
        .cached_summary(camera)
        .map(|summary| LastRecording {
            start: summary.event.start,
            end: summary.event.end,
            oldest_day: summary.oldest_day,
            newest_day: summary.newest_day,
            has_thumbnail: summary.has_thumbnail,
        });
    CameraStatus {
        camera_id: camera.to_string(),
        motion: motion.detected,
        available: motion.available,
        last_motion: motion.last_motion,
        ai,
        last_recording,
    }
}

fn kind_key(kind: AiKind) -> &'static str {
    match kind {
        AiKind::Person => "person",
        AiKind::Vehicle => "vehicle",
        AiKind::Pet => "pet",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::time::Duration;

    use chrono::{NaiveTime, Utc};
    use reowatch_core::{
        CoreSettings, DeviceRegistry, EventBus, ThumbnailStore, route_task,
    };
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::testutil::{StubCamera, StubSubscription, device_info};

    const MAC: &str = "aa:bb:cc:dd:ee:ff";

    struct Fixture {
        state: ApiState,
        base: String,
        http: reqwest::Client,
        camera: CameraId,
        camera_stub: Arc<StubCamera>,
        thumbs: ThumbnailStore,
        cancel: CancellationToken,
        _dir: TempDir,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    /// Boot the full engine behind an ephemeral-port HTTP server. With
    /// `with_callback` the server's own address becomes the webhook
    /// callback base, so push subscriptions can be exercised end to end.
    async fn serve(with_callback: bool) -> Fixture {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut settings = CoreSettings::default();
        if with_callback {
            settings.internal_url = Some(format!("http://{addr}/").parse().unwrap());
        }

        let dir = TempDir::new().unwrap();
        let registry = Arc::new(DeviceRegistry::new());
        let bus = EventBus::new(settings.namespace.clone());
        let thumbs = ThumbnailStore::new(dir.path());
        let coordinator = PushCoordinator::new(Arc::clone(&registry), bus.clone(), &settings);
        let catalog = VodCatalog::new(Arc::clone(&registry), thumbs.clone(), &settings);
        let router =
            MotionEventRouter::new(Arc::clone(&registry), bus.clone(), &settings, Some(catalog.clone()));
        let browse = MediaBrowseTree::new(Arc::clone(&registry), catalog.clone());

        let camera_stub = Arc::new(StubCamera::new(MAC, 1));
        let entry = registry.upsert_device(
            device_info(MAC, 1),
            Arc::clone(&camera_stub) as _,
            Arc::new(StubSubscription::default()),
        );
        let camera = registry.register_camera(&entry.device_id, 0).unwrap();

        let state = ApiState {
            registry,
            coordinator,
            router,
            catalog,
            browse,
        };
        let cancel = CancellationToken::new();
        tokio::spawn(route_task(state.router.clone(), cancel.clone()));
        while bus.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }

        let app = api_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        Fixture {
            state,
            base: format!("http://{addr}"),
            http,
            camera,
            camera_stub,
            thumbs,
            cancel,
            _dir: dir,
        }
    }

    /// Seed one completed recording for today and return its listed event.
    async fn seed_recording(fixture: &Fixture) -> reowatch_core::VodEvent {
        let today = Utc::now().date_naive();
        let start = today.and_time(NaiveTime::MIN).and_utc() + chrono::Duration::seconds(12 * 3600);
        fixture
            .camera_stub
            .add_recording(start, start + chrono::Duration::seconds(90));
        let events = fixture
            .state
            .catalog
            .list_events(&fixture.camera, today)
            .await
            .unwrap();
        events.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn webhook_always_returns_ok() {
        let fixture = serve(false).await;

        let response = fixture
            .http
            .post(format!("{}/webhook/no-such-id", fixture.base))
            .body("<not xml")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let response = fixture
            .http
            .post(format!("{}/webhook/no-such-id", fixture.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_notification_drives_motion_state() {
        let fixture = serve(true).await;
        let device_id = fixture.camera.device_id().clone();

        fixture.state.coordinator.subscribe(&device_id).await.unwrap();
        let webhook_id = fixture.state.coordinator.webhook_id(&device_id).unwrap();
        fixture.camera_stub.set_motion(0, true);

        let body = r#"<tt:SimpleItem Name="IsMotion" Value="true" />"#;
        let response = fixture
            .http
            .post(format!("{}/webhook/{webhook_id}", fixture.base))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let motion = fixture.state.router.motion_state(&fixture.camera);
            if motion.detected {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "motion never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn vod_redirects_with_valid_token() {
        let fixture = serve(false).await;
        let event = seed_recording(&fixture).await;

        let response = fixture
            .http
            .get(format!(
                "{}/vod/{}/{}?token={}",
                fixture.base, fixture.camera, event.event_id, event.token
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FOUND);
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.contains("playback.bcs"), "unexpected location {location}");
    }

    #[tokio::test]
    async fn wrong_token_and_unknown_event_read_identically() {
        let fixture = serve(false).await;
        let event = seed_recording(&fixture).await;

        let wrong_token = fixture
            .http
            .get(format!(
                "{}/vod/{}/{}?token=deadbeef",
                fixture.base, fixture.camera, event.event_id
            ))
            .send()
            .await
            .unwrap();
        let unknown_event = fixture
            .http
            .get(format!(
                "{}/vod/{}/999999?token={}",
                fixture.base, fixture.camera, event.token
            ))
            .send()
            .await
            .unwrap();

        assert_eq!(wrong_token.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(unknown_event.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(
            wrong_token.bytes().await.unwrap(),
            unknown_event.bytes().await.unwrap()
        );
    }

    #[tokio::test]
    async fn media_proxy_serves_persisted_thumbnail() {
        let fixture = serve(false).await;
        let event = seed_recording(&fixture).await;

        let body = Bytes::from_static(b"\xff\xd8fake-jpeg");
        fixture
            .thumbs
            .save(&fixture.camera, &event.event_id, body.clone())
            .await
            .unwrap();

        let response = fixture
            .http
            .get(format!(
                "{}/media_proxy/{}/{}?token={}",
                fixture.base, fixture.camera, event.event_id, event.token
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
        assert_eq!(response.bytes().await.unwrap(), body);
    }

    #[tokio::test]
    async fn media_proxy_missing_token_is_not_found() {
        let fixture = serve(false).await;
        let event = seed_recording(&fixture).await;

        let response = fixture
            .http
            .get(format!(
                "{}/media_proxy/{}/{}",
                fixture.base, fixture.camera, event.event_id
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let response = fixture
            .http
            .get(format!("{}/media_proxy/not-a-camera/123?token=x", fixture.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn browse_root_lists_cameras() {
        let fixture = serve(false).await;

        let response = fixture
            .http
            .get(format!("{}/api/browse", fixture.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let node: serde_json::Value = response.json().await.unwrap();
        assert_eq!(node["title"], "Cameras");
        assert_eq!(node["children"][0]["id"], fixture.camera.to_string());
    }

    #[tokio::test]
    async fn browse_unknown_path_is_not_found() {
        let fixture = serve(false).await;

        let response = fixture
            .http
            .get(format!("{}/api/browse/001122334455-0", fixture.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("Unknown camera"));
    }

    #[tokio::test]
    async fn status_reports_devices_and_cameras() {
        let fixture = serve(false).await;

        let response = fixture
            .http
            .get(format!("{}/api/status", fixture.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let reply: serde_json::Value = response.json().await.unwrap();

        let device = &reply["devices"][0];
        assert_eq!(device["device_id"], MAC);
        assert_eq!(device["name"], "Yard");
        assert_eq!(device["available"], false);
        assert_eq!(device["webhook_registered"], false);
        let camera = &device["cameras"][0];
        assert_eq!(camera["camera_id"], fixture.camera.to_string());
        assert_eq!(camera["motion"], false);
        assert_eq!(camera["ai"]["person"]["supported"], false);
        // No summary sweep has run yet.
        assert!(camera["last_recording"].is_null());
    }

    #[tokio::test]
    async fn status_reports_last_recording_after_sweep() {
        let fixture = serve(false).await;
        // The sweep's availability window ends at `now`, so the seeded
        // recording has to lie in the past.
        let start = Utc::now() - chrono::Duration::minutes(10);
        fixture
            .camera_stub
            .add_recording(start, start + chrono::Duration::seconds(90));
        fixture
            .state
            .catalog
            .last_event_summary(&fixture.camera)
            .await
            .unwrap();

        let response = fixture
            .http
            .get(format!("{}/api/status", fixture.base))
            .send()
            .await
            .unwrap();
        let reply: serde_json::Value = response.json().await.unwrap();

        let recording = &reply["devices"][0]["cameras"][0]["last_recording"];
        let day = start.date_naive().to_string();
        assert_eq!(recording["newest_day"], day);
        assert_eq!(recording["oldest_day"], day);
        assert_eq!(recording["has_thumbnail"], false);
        assert!(recording["start"].is_string());
    }
}
