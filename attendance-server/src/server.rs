use crate::{
    handlers,
    launch::{self, HttpRouter, LaunchSettings},
    settings::Settings,
    tracing as tracing_init,
};
use actix_web::web;
use attendance_logic::{
    auth::{AccessClaims, AuthError, JwtVerifier, TokenVerifier},
    cache::LocationCache,
    clients::whatsapp::CloudApiClient,
    error::ServiceError,
    eta::EtaEngine,
    realtime::{bus::EventBus, hub::Hub},
    repository::{
        DbEntityRepository, DbEventRepository, DbLocationRepository, DbParticipantRepository,
        DbSchedulerRepository, EntityRepository, EventRepository, LocationRepository,
        ParticipantRepository, SchedulerRepository,
    },
    services::{dispatch::ReminderDispatcher, LocationIngress, SchedulerWorker},
};
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SERVICE_NAME: &str = "attendance";

pub struct AppState {
    pub entities: Arc<dyn EntityRepository>,
    pub events: Arc<dyn EventRepository>,
    pub participants: Arc<dyn ParticipantRepository>,
    pub locations: Arc<dyn LocationRepository>,
    pub scheduler: Arc<dyn SchedulerRepository>,
    pub cache: LocationCache,
    pub bus: EventBus,
    pub hub: Hub,
    pub eta: EtaEngine,
    pub ingress: LocationIngress,
    pub verifier: Arc<dyn TokenVerifier>,
    pub whatsapp_verify_token: String,
}

impl AppState {
    pub fn authenticate(
        &self,
        req: &actix_web::HttpRequest,
    ) -> Result<AccessClaims, ServiceError> {
        let token = handlers::access_token(req).ok_or(AuthError::MissingToken)?;
        Ok(self.verifier.verify(&token)?)
    }
}

#[derive(Clone)]
struct Router {
    state: web::Data<AppState>,
}

impl HttpRouter for Router {
    fn register_routes(&self, service_config: &mut web::ServiceConfig) {
        service_config
            .app_data(self.state.clone())
            .route("/health", web::get().to(handlers::health::health))
            .service(
                web::scope("/webhook/whatsapp")
                    .route("", web::get().to(handlers::webhook::verify))
                    .route("", web::post().to(handlers::webhook::receive)),
            )
            .configure(handlers::websocket::config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::entities::config)
                    .configure(handlers::events::config)
                    .configure(handlers::participants::config)
                    .configure(handlers::locations::config)
                    .configure(handlers::eta::config)
                    .configure(handlers::cache::config),
            );
    }
}

pub async fn run(settings: Settings) -> Result<(), anyhow::Error> {
    tracing_init::init_logs(&settings.tracing)?;

    let mut connect_options = ConnectOptions::new(settings.database.url.clone());
    connect_options
        .max_connections(settings.database.max_connections)
        .sqlx_logging(false);
    let db = Arc::new(Database::connect(connect_options).await?);

    let cache = LocationCache::new(settings.redis.url.as_str()).await?;
    let bus = EventBus::new(settings.redis.url.as_str()).await?;

    let (hub, hub_runner) = Hub::new();
    tokio::spawn(hub_runner.run());

    let shutdown = CancellationToken::new();
    bus.run_subscriber(hub.clone(), shutdown.clone());

    let entities: Arc<dyn EntityRepository> = Arc::new(DbEntityRepository::new(db.clone()));
    let events: Arc<dyn EventRepository> = Arc::new(DbEventRepository::new(db.clone()));
    let participants: Arc<dyn ParticipantRepository> =
        Arc::new(DbParticipantRepository::new(db.clone()));
    let locations: Arc<dyn LocationRepository> = Arc::new(DbLocationRepository::new(db.clone()));
    let scheduler: Arc<dyn SchedulerRepository> = Arc::new(DbSchedulerRepository::new(db));

    // map routing stays behind its port; no provider implementation ships
    let eta = EtaEngine::from_settings(locations.clone(), None, &settings.eta);

    let ingress = LocationIngress::new(
        entities.clone(),
        events.clone(),
        participants.clone(),
        locations.clone(),
        cache.clone(),
        bus.clone(),
        eta.clone(),
    );

    let messenger = Arc::new(CloudApiClient::new(&settings.whatsapp)?);
    let dispatcher = Arc::new(ReminderDispatcher::new(
        events.clone(),
        participants.clone(),
        messenger,
    ));
    let worker = Arc::new(SchedulerWorker::new(
        scheduler.clone(),
        dispatcher,
        settings.worker.interval,
        settings.worker.batch_size,
    ));
    tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    // periodic drain of the webhook ingress buffers into postgres
    tokio::spawn({
        let ingress = ingress.clone();
        let shutdown = shutdown.clone();
        let interval = settings.ingress.flush_interval;
        let batch_size = settings.ingress.flush_batch_size;
        async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match ingress.flush_buffers(batch_size).await {
                            Ok(0) => {}
                            Ok(count) => tracing::debug!(count, "drained buffered pings"),
                            Err(err) => tracing::error!(error = ?err, "buffer drain sweep failed"),
                        }
                    }
                }
            }
        }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        let worker = Arc::clone(&worker);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                worker.stop();
                shutdown.cancel();
            }
        }
    });

    let state = web::Data::new(AppState {
        entities,
        events,
        participants,
        locations,
        scheduler,
        cache,
        bus,
        hub,
        eta,
        ingress,
        verifier: Arc::new(JwtVerifier::new(&settings.jwt.access_secret)),
        whatsapp_verify_token: settings.whatsapp.verify_token.clone(),
    });

    let launch_settings = LaunchSettings {
        service_name: SERVICE_NAME.to_string(),
        server: settings.server,
        metrics: settings.metrics,
    };

    launch::launch(launch_settings, Router { state }, shutdown).await
}
