use attendance_logic::{
    clients::whatsapp::WhatsAppSettings,
    settings::{EtaSettings, IngressSettings, WorkerSettings},
};
use config::{Config, File};
use serde::{de::IgnoredAny, Deserialize};
use std::{net::SocketAddr, str::FromStr};
use url::Url;

/// Settings are assembled from an optional config file
/// (`{SERVICE_NAME}__CONFIG`) overlaid with `{SERVICE_NAME}`-prefixed
/// environment variables, `__` separating the path segments
/// (e.g. `ATTENDANCE__DATABASE__URL`).
pub trait ConfigSettings {
    const SERVICE_NAME: &'static str;

    fn build() -> anyhow::Result<Self>
    where
        Self: Deserialize<'static>,
    {
        let config_path_name = format!("{}__CONFIG", Self::SERVICE_NAME);
        let config_path = std::env::var(&config_path_name);

        let mut builder = Config::builder();
        if let Ok(config_path) = config_path {
            builder = builder.add_source(File::with_name(&config_path));
        };
        // `__` so that keys with underscores in names stay addressable
        builder = builder
            .add_source(config::Environment::with_prefix(Self::SERVICE_NAME).separator("__"));

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub tracing: TracingSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub ingress: IngressSettings,
    #[serde(default)]
    pub eta: EtaSettings,
    pub whatsapp: WhatsAppSettings,

    // Allows providing the config file path through the
    // `ATTENDANCE__CONFIG` env variable while unknown fields stay denied.
    #[serde(default, rename = "config")]
    pub config_path: IgnoredAny,
}

impl ConfigSettings for Settings {
    const SERVICE_NAME: &'static str = "ATTENDANCE";
}

impl Settings {
    pub fn default(database_url: String, redis_url: Url) -> Self {
        Self {
            server: Default::default(),
            metrics: Default::default(),
            tracing: Default::default(),
            database: DatabaseSettings {
                url: database_url,
                max_connections: default_max_connections(),
            },
            redis: RedisSettings { url: redis_url },
            jwt: JwtSettings {
                access_secret: "access-secret".to_string(),
            },
            worker: Default::default(),
            ingress: Default::default(),
            eta: Default::default(),
            whatsapp: WhatsAppSettings {
                api_url: Url::parse("https://graph.facebook.com/v19.0/").unwrap(),
                access_token: "token".to_string(),
                phone_number_id: "0".to_string(),
                verify_token: "verify".to_string(),
                request_timeout: std::time::Duration::from_secs(30),
            },
            config_path: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub http: HttpServerSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpServerSettings {
    pub enabled: bool,
    pub addr: SocketAddr,
    pub max_body_size: usize,
    pub cors: CorsSettings,
}

impl Default for HttpServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: SocketAddr::from_str("0.0.0.0:8050").unwrap(),
            max_body_size: 2 * 1024 * 1024, // 2 Mb - default Actix value
            cors: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CorsSettings {
    pub enabled: bool,
    pub allowed_origin: String,
    pub allowed_methods: String,
    pub allowed_credentials: bool,
    pub max_age: usize,
    pub block_on_origin_mismatch: bool,
    pub send_wildcard: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origin: "".to_string(),
            allowed_methods: "PUT, GET, POST, OPTIONS, DELETE, PATCH".to_string(),
            allowed_credentials: true,
            max_age: 3600,
            block_on_origin_mismatch: false,
            send_wildcard: false,
        }
    }
}

impl CorsSettings {
    pub fn build(self) -> actix_cors::Cors {
        if !self.enabled {
            return actix_cors::Cors::default();
        }
        let mut cors = actix_cors::Cors::default()
            .allow_any_header()
            .allowed_methods(split_string(&self.allowed_methods))
            .max_age(Some(self.max_age))
            .block_on_origin_mismatch(self.block_on_origin_mismatch);
        if self.allowed_credentials {
            cors = cors.supports_credentials()
        }
        if self.send_wildcard {
            cors = cors.send_wildcard()
        }
        match self.allowed_origin.as_str() {
            "*" => cors = cors.allow_any_origin(),
            allowed_origin => {
                for origin in split_string(allowed_origin) {
                    cors = cors.allowed_origin(origin)
                }
            }
        };
        cors
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub addr: SocketAddr,
    pub route: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: SocketAddr::from_str("0.0.0.0:6060").expect("should be valid url"),
            route: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TracingSettings {
    pub enabled: bool,
    pub format: TracingFormat,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            format: TracingFormat::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    Default,
    Json,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RedisSettings {
    pub url: Url,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JwtSettings {
    pub access_secret: String,
}

fn split_string(s: &str) -> Vec<&str> {
    s.split(',').map(|s| s.trim()).collect()
}
