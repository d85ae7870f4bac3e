//! HTTP and metrics server startup plus coordinated shutdown.

use crate::settings::{HttpServerSettings, MetricsSettings, ServerSettings};
use actix_web::{middleware::Condition, web::ServiceConfig, App, HttpServer};
use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use std::{collections::HashMap, net::SocketAddr};
use tokio_util::sync::CancellationToken;
use tracing_actix_web::TracingLogger;

pub struct LaunchSettings {
    pub service_name: String,
    pub server: ServerSettings,
    pub metrics: MetricsSettings,
}

pub trait HttpRouter {
    fn register_routes(&self, service_config: &mut ServiceConfig);
}

fn configure_router<R: HttpRouter>(router: &R) -> impl FnOnce(&mut ServiceConfig) + '_ {
    |service_config| router.register_routes(service_config)
}

/// Runs the HTTP server and, when enabled, the metrics listener, until one
/// of them fails or the shutdown token fires. On shutdown the servers stop
/// accepting connections and drain in-flight requests.
pub async fn launch<R>(
    settings: LaunchSettings,
    http: R,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error>
where
    R: HttpRouter + Send + Sync + Clone + 'static,
{
    let metrics = settings
        .metrics
        .enabled
        .then(|| Metrics::new(&settings.service_name, &settings.metrics.route));

    let mut futures = vec![];

    if settings.server.http.enabled {
        let http_server = http_serve(
            http,
            metrics
                .as_ref()
                .map(|metrics| metrics.http_middleware().clone()),
            &settings.server.http,
        );
        let handle = http_server.handle();
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                handle.stop(true).await;
            });
        }
        futures.push(tokio::spawn(async move {
            http_server.await.map_err(anyhow::Error::msg)
        }));
    }

    if let Some(metrics) = metrics {
        let metrics_server = metrics.run_server(settings.metrics.addr)?;
        let handle = metrics_server.handle();
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                handle.stop(true).await;
            });
        }
        futures.push(tokio::spawn(async move {
            metrics_server.await.map_err(anyhow::Error::msg)
        }));
    }

    if futures.is_empty() {
        shutdown.cancelled().await;
        return Ok(());
    }

    let (res, _, others) = futures::future::select_all(futures).await;
    // one server ended; take the rest down with it
    shutdown.cancel();
    for future in others.into_iter() {
        future.abort()
    }
    res?
}

fn http_serve<R>(
    http: R,
    metrics: Option<PrometheusMetrics>,
    settings: &HttpServerSettings,
) -> actix_web::dev::Server
where
    R: HttpRouter + Send + Sync + Clone + 'static,
{
    tracing::info!("starting http server on addr {}", settings.addr);

    let json_cfg = actix_web::web::JsonConfig::default().limit(settings.max_body_size);
    let cors_settings = settings.cors.clone();
    let cors_enabled = cors_settings.enabled;
    if let Some(metrics) = metrics {
        HttpServer::new(move || {
            let cors = cors_settings.clone().build();
            App::new()
                .wrap(metrics.clone())
                .wrap(TracingLogger::default())
                .wrap(Condition::new(cors_enabled, cors))
                .app_data(json_cfg.clone())
                .configure(configure_router(&http))
        })
        .bind(settings.addr)
        .expect("failed to bind server")
        .run()
    } else {
        HttpServer::new(move || {
            let cors = cors_settings.clone().build();
            App::new()
                .wrap(TracingLogger::default())
                .wrap(Condition::new(cors_enabled, cors))
                .app_data(json_cfg.clone())
                .configure(configure_router(&http))
        })
        .bind(settings.addr)
        .expect("failed to bind server")
        .run()
    }
}

#[derive(Clone)]
struct Metrics {
    metrics_middleware: PrometheusMetrics,
    http_middleware: PrometheusMetrics,
}

impl Metrics {
    fn new(service_name: &str, endpoint: &str) -> Self {
        let registry = prometheus::default_registry();
        let const_labels = HashMap::from([("service_name".into(), service_name.into())]);
        // the exporter's own middleware needs a namespace distinct from the
        // api middleware, both share one registry
        let exporter_namespace = format!("{service_name}_exporter");
        let metrics_middleware = PrometheusMetricsBuilder::new(&exporter_namespace)
            .registry(registry.clone())
            .endpoint(endpoint)
            .const_labels(const_labels)
            .build()
            .unwrap();
        let http_middleware = PrometheusMetricsBuilder::new(service_name)
            .registry(registry.clone())
            .build()
            .unwrap();

        Self {
            metrics_middleware,
            http_middleware,
        }
    }

    fn http_middleware(&self) -> &PrometheusMetrics {
        &self.http_middleware
    }

    fn run_server(self, addr: SocketAddr) -> Result<actix_web::dev::Server, anyhow::Error> {
        tracing::info!(addr = ?addr, "starting metrics server");
        let server = HttpServer::new(move || App::new().wrap(self.metrics_middleware.clone()))
            .bind(addr)?
            .run();
        Ok(server)
    }
}
