use crate::settings::{TracingFormat, TracingSettings};
use tracing_subscriber::{
    filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
    Layer,
};

pub fn init_logs(settings: &TracingSettings) -> Result<(), anyhow::Error> {
    // If tracing is disabled, there is nothing to initialize
    if !settings.enabled {
        return Ok(());
    }

    let stdout_layer: Box<dyn Layer<_> + Sync + Send + 'static> = match settings.format {
        TracingFormat::Default => tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .boxed(),
        TracingFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .boxed(),
    };

    tracing_subscriber::registry().with(stdout_layer).try_init()?;
    Ok(())
}
