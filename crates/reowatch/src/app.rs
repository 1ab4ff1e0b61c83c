//! Daemon assembly: build the engine from configuration, connect the
//! configured cameras, and drive everything until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reowatch_api::{
    CameraClient, Credentials, HttpCameraClient, OnvifSubscription, TlsMode, TransportConfig,
};
use reowatch_config::{CameraProfile, CameraStore, CameraStoreData, Config, resolve_password};
use reowatch_core::{
    CameraId, DeviceRegistry, EventBus, MediaBrowseTree, MotionEventRouter, PushCoordinator,
    ThumbnailStore, VodCatalog, poll_task, renew_task, route_task, summary_task,
};

use crate::error::AppError;
use crate::http::{ApiState, api_router};
use crate::smtp::smtp_task;

/// A fully assembled daemon, ready to serve.
pub struct App {
    bind_addr: SocketAddr,
    smtp_listen: Option<SocketAddr>,
    renew_interval: Duration,
    poll_interval: Option<Duration>,
    summary_interval: Option<Duration>,
    registry: Arc<DeviceRegistry>,
    bus: EventBus,
    coordinator: PushCoordinator,
    router: MotionEventRouter,
    catalog: VodCatalog,
    browse: MediaBrowseTree,
    cancel: CancellationToken,
}

impl App {
    /// Assemble the engine and connect every configured camera.
    ///
    /// A profile that fails to authenticate or connect is reported and
    /// skipped; the daemon serves whatever did come up, so one unplugged
    /// camera cannot take the rest of the fleet down with it.
    pub async fn build(
        config: &Config,
        bind_override: Option<SocketAddr>,
    ) -> Result<Self, AppError> {
        let settings = config.service.core_settings();
        let storage_root = config.service.storage_root_or_default();

        let registry = Arc::new(DeviceRegistry::new());
        let bus = EventBus::new(settings.namespace.clone());
        let thumbs = ThumbnailStore::new(storage_root.join("thumbnails"));
        let coordinator = PushCoordinator::new(Arc::clone(&registry), bus.clone(), &settings);
        let catalog = VodCatalog::new(Arc::clone(&registry), thumbs.clone(), &settings);
        let router = MotionEventRouter::new(
            Arc::clone(&registry),
            bus.clone(),
            &settings,
            Some(catalog.clone()),
        );
        let browse = MediaBrowseTree::new(Arc::clone(&registry), catalog.clone());

        match catalog.restore_pending().await {
            Ok(0) => {}
            Ok(restored) => info!(restored, "pending captures restored"),
            Err(err) => warn!(error = %err, "pending capture restore failed"),
        }

        let store = CameraStore::new(&storage_root);
        let mut store_data = store.load().unwrap_or_else(|err| {
            warn!(error = %err, "camera store unreadable, starting fresh");
            CameraStoreData::default()
        });

        let transport_timeout = Duration::from_secs(config.service.timeout);
        let mut profiles: Vec<_> = config.cameras.iter().collect();
        profiles.sort_by(|a, b| a.0.cmp(b.0));
        for (name, profile) in profiles {
            match connect_camera(&registry, name, profile, transport_timeout).await {
                Ok(cameras) => {
                    for camera in cameras {
                        if let Some(dir) = &profile.thumbnail_path {
                            thumbs.set_camera_dir(&camera, Some(dir.clone()));
                        }
                        store_data.configs.entry(camera.to_string()).or_default();
                    }
                }
                Err(err) => eprintln!("{:?}", miette::Report::new(err)),
            }
        }

        // Persisted per-camera options win over the profile's.
        for (camera_id, options) in &store_data.configs {
            if let (Ok(camera), Some(dir)) =
                (camera_id.parse::<CameraId>(), options.thumbnail_path.clone())
            {
                thumbs.set_camera_dir(&camera, Some(dir));
            }
        }
        if let Err(err) = store.save(&store_data) {
            warn!(error = %err, "camera store save failed");
        }

        for entry in registry.devices() {
            if let Err(err) = coordinator.subscribe(&entry.device_id).await {
                warn!(device = %entry.device_id, error = %err, "initial subscription failed");
            }
            router.refresh(&entry.device_id).await;
        }

        Ok(Self {
            bind_addr: bind_override.unwrap_or(config.service.bind_addr),
            smtp_listen: config.service.smtp_listen,
            renew_interval: settings.renew_interval,
            poll_interval: settings.poll_interval,
            summary_interval: settings.summary_interval,
            registry,
            bus,
            coordinator,
            router,
            catalog,
            browse,
            cancel: CancellationToken::new(),
        })
    }

    /// Serve until a shutdown signal, then unwind in order: stop the
    /// listeners, drop the subscriptions, flush pending captures, and
    /// wait for every background task.
    pub async fn run(self) -> Result<(), AppError> {
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(renew_task(
            self.coordinator.clone(),
            self.renew_interval,
            self.cancel.clone(),
        )));
        tasks.push(tokio::spawn(route_task(
            self.router.clone(),
            self.cancel.clone(),
        )));
        if let Some(period) = self.poll_interval {
            tasks.push(tokio::spawn(poll_task(
                self.router.clone(),
                period,
                self.cancel.clone(),
            )));
        }
        if let Some(period) = self.summary_interval {
            tasks.push(tokio::spawn(summary_task(
                self.catalog.clone(),
                period,
                self.cancel.clone(),
            )));
        }
        if let Some(smtp_addr) = self.smtp_listen {
            let listener = TcpListener::bind(smtp_addr).await?;
            info!(addr = %smtp_addr, "smtp alert listener up");
            tasks.push(tokio::spawn(smtp_task(
                listener,
                Arc::clone(&self.registry),
                self.bus.clone(),
                self.cancel.clone(),
            )));
        }

        let shutdown = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            shutdown.cancel();
        });

        let state = ApiState {
            registry: Arc::clone(&self.registry),
            coordinator: self.coordinator.clone(),
            router: self.router.clone(),
            catalog: self.catalog.clone(),
            browse: self.browse.clone(),
        };
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "http listener up");
        axum::serve(listener, api_router(state))
            .with_graceful_shutdown(self.cancel.clone().cancelled_owned())
            .await?;

        self.coordinator.unsubscribe_all().await;
        self.router.shutdown();
        if let Err(err) = self.catalog.flush_pending().await {
            warn!(error = %err, "pending capture flush failed");
        }
        futures_util::future::join_all(tasks).await;
        info!("shutdown complete");
        Ok(())
    }
}

/// Log in to one configured camera, register its channels, and return
/// the camera ids that came up.
async fn connect_camera(
    registry: &Arc<DeviceRegistry>,
    name: &str,
    profile: &CameraProfile,
    timeout: Duration,
) -> Result<Vec<CameraId>, AppError> {
    let password = resolve_password(profile, name).map_err(|_| AppError::NoCredentials {
        camera: name.to_owned(),
    })?;
    let credentials = Credentials::new(profile.username.clone(), password.expose_secret());
    let transport = TransportConfig {
        tls: if profile.accept_invalid_certs {
            TlsMode::DangerAcceptInvalid
        } else {
            TlsMode::System
        },
        timeout,
    };

    let client = HttpCameraClient::new(profile.base_url()?, credentials.clone(), &transport)
        .map_err(|err| AppError::from_camera_error(name, &profile.host, err))?;
    client
        .login()
        .await
        .map_err(|err| AppError::from_camera_error(name, &profile.host, err))?;
    let info = client
        .device_info()
        .await
        .map_err(|err| AppError::from_camera_error(name, &profile.host, err))?;

    let endpoint = OnvifSubscription::event_service_url(&profile.host, profile.onvif_port)
        .map_err(|err| AppError::from_camera_error(name, &profile.host, err))?;
    let subscription = OnvifSubscription::new(endpoint, credentials, &transport)
        .map_err(|err| AppError::from_camera_error(name, &profile.host, err))?;

    let entry = registry.upsert_device(info.clone(), Arc::new(client), Arc::new(subscription));
    let mut cameras = Vec::with_capacity(usize::from(info.channels));
    for channel in 0..info.channels {
        cameras.push(registry.register_camera(&entry.device_id, channel)?);
    }
    info!(
        camera = name,
        device = %entry.device_id,
        channels = info.channels,
        "camera connected"
    );
    Ok(cameras)
}
