use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LogFormat;

/// 初始化 tracing subscriber。`RUST_LOG` 控制 filter，未設定時預設 info
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // JSON 欄位攤平到最外層，方便 Loki 解析
    let json_layer = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
    });
    let pretty_layer =
        (format == LogFormat::Pretty).then(|| tracing_subscriber::fmt::layer().pretty());

    Registry::default()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;

    Ok(())
}
