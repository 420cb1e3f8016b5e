use api::{bootstrap::build_state, config::AppConfig, telemetry};
use domain::{ChainId, TimeRange, ETHEREUM};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    telemetry::init_tracing(config.log_format)?;

    let symbols = std::env::var("PRICE_SYMBOLS").unwrap_or_else(|_| "ETH,USDC".to_string());
    let chain_id: ChainId = std::env::var("PRICE_CHAIN_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(ETHEREUM);
    let range: TimeRange = std::env::var("PRICE_RANGE")
        .ok()
        .map(|v| v.parse())
        .transpose()?
        .unwrap_or_default();

    let state = build_state(&config)?;
    let symbols: Vec<String> = symbols
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    for symbol in symbols {
        let Some(token) = state.registry.by_symbol(chain_id, &symbol) else {
            tracing::warn!(%symbol, chain_id, "token not listed on chain");
            continue;
        };
        match state.price_series.series(token, range).await {
            Ok(series) => {
                tracing::info!(%symbol, %range, points = series.len(), "price series built");
                println!("{}", serde_json::to_string(&series)?);
            }
            Err(err) => {
                tracing::warn!(%symbol, %err, "price series failed");
            }
        }
    }

    Ok(())
}
