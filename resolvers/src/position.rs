use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    Account, ChainId, DeFiPosition, PositionType, Protocol, ARBITRUM, ETHEREUM, POLYGON,
};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::{simulate_latency, within, PositionResolver, ResolutionError, ResolutionResult};

const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);
const ICON_BASE: &str =
    "https://raw.githubusercontent.com/Uniswap/assets/master/blockchains/ethereum/assets";

/// One DeFi protocol's view of an account.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn positions(&self, account: &Account) -> ResolutionResult<Vec<DeFiPosition>>;
}

#[derive(Clone)]
pub struct StaticProtocolAdapter {
    protocol: Protocol,
    positions: Vec<DeFiPosition>,
    latency: Duration,
}

impl StaticProtocolAdapter {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            positions: Vec::new(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_position(
        mut self,
        position_type: PositionType,
        asset: &str,
        value: f64,
        apy: f64,
        chain_id: ChainId,
    ) -> Self {
        let id = (self.positions.len() + 1).to_string();
        self.positions.push(DeFiPosition {
            id,
            protocol: self.protocol.clone(),
            position_type,
            asset: asset.to_string(),
            value,
            apy,
            chain_id,
        });
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl ProtocolAdapter for StaticProtocolAdapter {
    fn name(&self) -> &str {
        &self.protocol.name
    }

    async fn positions(&self, _account: &Account) -> ResolutionResult<Vec<DeFiPosition>> {
        simulate_latency(self.latency).await;
        Ok(self.positions.clone())
    }
}

fn protocol(name: &str, token_address: &str, url: &str) -> Protocol {
    Protocol {
        name: name.to_string(),
        icon: format!("{ICON_BASE}/{token_address}/logo.png"),
        url: url.to_string(),
    }
}

/// The dashboard's demo book: Aave, Compound, Uniswap, Lido and Sushiswap.
pub fn demo_adapters() -> Vec<Arc<dyn ProtocolAdapter>> {
    let aave = StaticProtocolAdapter::new(protocol(
        "Aave",
        "0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9",
        "https://aave.com",
    ))
    .with_position(PositionType::Lending, "USDC", 2543.67, 3.45, ETHEREUM)
    .with_position(PositionType::Lending, "MATIC", 612.19, 2.86, POLYGON);
    let compound = StaticProtocolAdapter::new(protocol(
        "Compound",
        "0xc00e94Cb662C3520282E6f5717214004A7f26888",
        "https://compound.finance",
    ))
    .with_position(PositionType::Lending, "ETH", 1820.33, 1.87, ETHEREUM);
    let uniswap = StaticProtocolAdapter::new(protocol(
        "Uniswap",
        "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984",
        "https://uniswap.org",
    ))
    .with_position(PositionType::Liquidity, "ETH/USDC", 1205.88, 15.72, POLYGON);
    let lido = StaticProtocolAdapter::new(protocol(
        "Lido",
        "0x5A98FcBEA516Cf06857215779Fd812CA3beF1B32",
        "https://lido.fi",
    ))
    .with_position(PositionType::Staking, "ETH", 835.42, 4.25, ETHEREUM);
    let sushiswap = StaticProtocolAdapter::new(protocol(
        "Sushiswap",
        "0x6B3595068778DD592e39A122f4f5a5cF09C90fE2",
        "https://sushi.com",
    ))
    .with_position(PositionType::Liquidity, "ETH/WBTC", 487.66, 12.34, ARBITRUM);

    vec![
        Arc::new(aave),
        Arc::new(compound),
        Arc::new(uniswap),
        Arc::new(lido),
        Arc::new(sushiswap),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterFailure {
    pub adapter: String,
    pub error: ResolutionError,
}

#[derive(Debug, Clone, Default)]
pub struct PositionReport {
    pub positions: Vec<DeFiPosition>,
    pub failures: Vec<AdapterFailure>,
}

/// Fans out to every adapter at once. A single adapter failing only removes its positions;
/// the call as a whole fails when no adapter answered.
#[derive(Clone)]
pub struct CompositePositionResolver {
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
    adapter_timeout: Duration,
}

impl CompositePositionResolver {
    pub fn new(adapters: Vec<Arc<dyn ProtocolAdapter>>) -> Self {
        Self {
            adapters,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub async fn resolve_report(&self, account: &Account) -> PositionReport {
        let calls = self.adapters.iter().map(|adapter| async move {
            let result = within(
                adapter.name(),
                self.adapter_timeout,
                adapter.positions(account),
            )
            .await;
            (adapter.name().to_string(), result)
        });
        let results = join_all(calls).await;

        let mut report = PositionReport::default();
        let mut seen = HashSet::new();
        for (adapter, result) in results {
            let positions = match result {
                Ok(positions) => positions,
                Err(error) => {
                    warn!(%adapter, error = %error, "protocol adapter failed");
                    report.failures.push(AdapterFailure { adapter, error });
                    continue;
                }
            };
            let prefix = adapter.to_lowercase().replace(' ', "-");
            for mut position in positions {
                if !position.is_valid() {
                    warn!(
                        %adapter,
                        id = %position.id,
                        value = position.value,
                        apy = position.apy,
                        "dropping position with negative or non-finite figures"
                    );
                    continue;
                }
                let base = format!("{prefix}:{}", position.id);
                let mut id = base.clone();
                let mut n = 1;
                while !seen.insert(id.clone()) {
                    n += 1;
                    id = format!("{base}-{n}");
                }
                position.id = id;
                report.positions.push(position);
            }
        }
        debug!(
            account = %account.short(),
            positions = report.positions.len(),
            failed_adapters = report.failures.len(),
            "positions resolved"
        );
        report
    }
}

#[async_trait]
impl PositionResolver for CompositePositionResolver {
    async fn resolve(&self, account: &Account) -> ResolutionResult<Vec<DeFiPosition>> {
        let report = self.resolve_report(account).await;
        if !self.adapters.is_empty() && report.failures.len() == self.adapters.len() {
            let message = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.adapter, f.error))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ResolutionError::unavailable("positions", message));
        }
        Ok(report.positions)
    }
}
