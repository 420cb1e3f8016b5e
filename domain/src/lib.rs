use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod registry;

pub use registry::{
    is_supported_chain, supported_chains, SupportedChain, TokenRegistry, ARBITRUM, BASE,
    ETHEREUM, NATIVE_TOKEN_ADDRESS, POLYGON,
};

pub type ChainId = u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid account address: {0}")]
    InvalidAccount(String),
    #[error("unknown time range: {0}")]
    UnknownTimeRange(String),
    #[error("unknown position type: {0}")]
    UnknownPositionType(String),
}

/// Chain-agnostic wallet address, stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account(String);

impl Account {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| DomainError::InvalidAccount(raw.to_string()))?;
        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidAccount(raw.to_string()));
        }
        Ok(Self(format!("0x{}", hex.to_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...abcd` form used in log lines and labels.
    pub fn short(&self) -> String {
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Account {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Account::parse(s)
    }
}

impl TryFrom<String> for Account {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Account::parse(&value)
    }
}

impl From<Account> for String {
    fn from(value: Account) -> Self {
        value.0
    }
}

/// The connected wallet, passed explicitly into every resolution call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletContext {
    pub account: Option<Account>,
    pub chain_ids: Vec<ChainId>,
}

impl WalletContext {
    pub fn new(account: Option<Account>, chain_ids: Vec<ChainId>) -> Self {
        Self { account, chain_ids }
    }

    pub fn connected(account: Account, chain_ids: Vec<ChainId>) -> Self {
        Self {
            account: Some(account),
            chain_ids,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenKey {
    pub chain_id: ChainId,
    pub address: String,
}

impl TokenKey {
    pub fn new(chain_id: ChainId, address: &str) -> Self {
        Self {
            chain_id,
            address: address.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Token {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub chain_id: ChainId,
    pub price: f64,
    #[serde(default)]
    pub logo_uri: String,
}

impl Token {
    pub fn key(&self) -> TokenKey {
        TokenKey::new(self.chain_id, &self.address)
    }

    pub fn is_native(&self) -> bool {
        self.address.eq_ignore_ascii_case(NATIVE_TOKEN_ADDRESS)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenBalance {
    pub token: Token,
    pub quantity: f64,
}

impl TokenBalance {
    pub fn value_usd(&self) -> f64 {
        self.quantity * self.token.price
    }
}

/// Token → quantity held by one account, ordered by (chain, address).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<TokenBalance>", into = "Vec<TokenBalance>")]
pub struct Balances {
    entries: BTreeMap<TokenKey, TokenBalance>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Negative or NaN quantities are stored as zero.
    pub fn insert(&mut self, token: Token, quantity: f64) {
        let quantity = if quantity.is_finite() && quantity > 0.0 {
            quantity
        } else {
            0.0
        };
        self.entries
            .insert(token.key(), TokenBalance { token, quantity });
    }

    pub fn get(&self, key: &TokenKey) -> Option<&TokenBalance> {
        self.entries.get(key)
    }

    pub fn quantity(&self, key: &TokenKey) -> f64 {
        self.entries.get(key).map(|b| b.quantity).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TokenKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenBalance> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TokenBalance> {
        self.entries.values_mut()
    }

    pub fn total_value_usd(&self) -> f64 {
        self.entries.values().map(TokenBalance::value_usd).sum()
    }

    pub fn value_by_chain(&self) -> BTreeMap<ChainId, f64> {
        let mut out = BTreeMap::new();
        for balance in self.entries.values() {
            *out.entry(balance.token.chain_id).or_insert(0.0) += balance.value_usd();
        }
        out
    }
}

impl From<Vec<TokenBalance>> for Balances {
    fn from(value: Vec<TokenBalance>) -> Self {
        let mut balances = Balances::new();
        for entry in value {
            balances.insert(entry.token, entry.quantity);
        }
        balances
    }
}

impl From<Balances> for Vec<TokenBalance> {
    fn from(value: Balances) -> Self {
        value.entries.into_values().collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PositionType {
    Lending,
    Liquidity,
    Staking,
}

impl FromStr for PositionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lending" => Ok(PositionType::Lending),
            "liquidity" => Ok(PositionType::Liquidity),
            "staking" => Ok(PositionType::Staking),
            _ => Err(DomainError::UnknownPositionType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionFilter {
    #[default]
    All,
    Only(PositionType),
}

impl PositionFilter {
    pub fn matches(&self, position: &DeFiPosition) -> bool {
        match self {
            PositionFilter::All => true,
            PositionFilter::Only(kind) => position.position_type == *kind,
        }
    }

    pub fn apply(&self, positions: Vec<DeFiPosition>) -> Vec<DeFiPosition> {
        match self {
            PositionFilter::All => positions,
            PositionFilter::Only(_) => positions.into_iter().filter(|p| self.matches(p)).collect(),
        }
    }
}

impl FromStr for PositionFilter {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(PositionFilter::All);
        }
        s.parse::<PositionType>().map(PositionFilter::Only)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Protocol {
    pub name: String,
    pub icon: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeFiPosition {
    pub id: String,
    pub protocol: Protocol,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub asset: String,
    /// USD
    pub value: f64,
    /// Percent, e.g. 3.45 for 3.45%.
    pub apy: f64,
    pub chain_id: ChainId,
}

impl DeFiPosition {
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value >= 0.0 && self.apy.is_finite() && self.apy >= 0.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeRange {
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "1W")]
    #[default]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "1Y")]
    OneYear,
}

impl TimeRange {
    pub const ALL: [TimeRange; 4] = [
        TimeRange::OneDay,
        TimeRange::OneWeek,
        TimeRange::OneMonth,
        TimeRange::OneYear,
    ];

    /// Number of intervals; a series holds one more point than this.
    pub fn point_count(self) -> usize {
        match self {
            TimeRange::OneDay => 24,
            TimeRange::OneWeek => 7,
            TimeRange::OneMonth => 30,
            TimeRange::OneYear => 365,
        }
    }

    pub fn step(self) -> Duration {
        match self {
            TimeRange::OneDay => Duration::hours(1),
            _ => Duration::days(1),
        }
    }

    pub fn span(self) -> Duration {
        self.step() * self.point_count() as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeRange::OneDay => "1D",
            TimeRange::OneWeek => "1W",
            TimeRange::OneMonth => "1M",
            TimeRange::OneYear => "1Y",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeRange {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "1D" => Ok(TimeRange::OneDay),
            "1W" => Ok(TimeRange::OneWeek),
            "1M" => Ok(TimeRange::OneMonth),
            "1Y" => Ok(TimeRange::OneYear),
            _ => Err(DomainError::UnknownTimeRange(s.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PriceSeries {
    pub symbol: String,
    pub chain_id: ChainId,
    pub range: TimeRange,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// Percent change from the first to the last point; 0 below two points.
    pub fn change_percent(&self) -> f64 {
        change_percent(&self.points)
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[1].timestamp > w[0].timestamp)
    }
}

pub fn change_percent(points: &[PricePoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let first = points[0].price;
    let last = points[points.len() - 1].price;
    if first == 0.0 {
        return 0.0;
    }
    (last - first) / first * 100.0
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeBasis {
    /// No comparable prior snapshot; change is reported as 0.
    Baseline,
    PriorSnapshot,
    /// Snapshot is partial; change is withheld.
    Incomplete,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub account: Account,
    pub chain_ids: Vec<ChainId>,
    pub total_value: f64,
    pub balance_value: f64,
    pub position_value: f64,
    pub chain_values: BTreeMap<ChainId, f64>,
    pub change_percent: f64,
    pub change_basis: ChangeBasis,
    pub partial: bool,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoSnapshotReason {
    NoAccount,
    AllSourcesFailed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Balances,
    Positions,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AggregateOutcome {
    Full {
        snapshot: PortfolioSnapshot,
    },
    Partial {
        snapshot: PortfolioSnapshot,
        failed: Vec<SourceKind>,
    },
    NoSnapshot {
        reason: NoSnapshotReason,
    },
}

impl AggregateOutcome {
    pub fn snapshot(&self) -> Option<&PortfolioSnapshot> {
        match self {
            AggregateOutcome::Full { snapshot } | AggregateOutcome::Partial { snapshot, .. } => {
                Some(snapshot)
            }
            AggregateOutcome::NoSnapshot { .. } => None,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, AggregateOutcome::Partial { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            AggregateOutcome::Full { .. } => "full",
            AggregateOutcome::Partial { .. } => "partial",
            AggregateOutcome::NoSnapshot { .. } => "no_snapshot",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Swap,
    Deposit,
    Withdraw,
    Claim,
    Transfer,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    pub value: f64,
    pub chain_id: ChainId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(symbol: &str, address: &str, chain_id: ChainId, price: f64) -> Token {
        Token {
            address: address.to_string(),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
            chain_id,
            price,
            logo_uri: String::new(),
        }
    }

    #[test]
    fn account_parse_normalizes_case() {
        let account = Account::parse(" 0x000000000000000000000000000000000000dEaD ").unwrap();
        assert_eq!(account.as_str(), "0x000000000000000000000000000000000000dead");
        assert_eq!(account.short(), "0x0000...dead");
    }

    #[test]
    fn account_parse_rejects_garbage() {
        assert!(Account::parse("").is_err());
        assert!(Account::parse("0x1234").is_err());
        assert!(Account::parse("000000000000000000000000000000000000dEaD").is_err());
        assert!(Account::parse("0xZZ0000000000000000000000000000000000dEaD").is_err());
    }

    #[test]
    fn balances_clamp_negative_quantities() {
        let mut balances = Balances::new();
        let usdc = token("USDC", "0xA0b8", 1, 1.0);
        balances.insert(usdc.clone(), -5.0);
        assert_eq!(balances.quantity(&usdc.key()), 0.0);
        balances.insert(usdc.clone(), f64::NAN);
        assert_eq!(balances.quantity(&usdc.key()), 0.0);
    }

    #[test]
    fn balances_value_by_chain_sums_per_network() {
        let mut balances = Balances::new();
        balances.insert(token("USDC", "0xa", 1, 1.0), 100.0);
        balances.insert(token("ETH", "0xb", 1, 2000.0), 0.5);
        balances.insert(token("USDC", "0xa", 137, 1.0), 40.0);
        let by_chain = balances.value_by_chain();
        assert_eq!(by_chain.get(&1), Some(&1100.0));
        assert_eq!(by_chain.get(&137), Some(&40.0));
        assert_eq!(balances.total_value_usd(), 1140.0);
    }

    #[test]
    fn balances_serialize_as_list() {
        let mut balances = Balances::new();
        balances.insert(token("USDC", "0xA", 1, 1.0), 10.0);
        let json = serde_json::to_value(&balances).unwrap();
        assert!(json.is_array());
        let back: Balances = serde_json::from_value(json).unwrap();
        assert_eq!(back, balances);
    }

    #[test]
    fn position_filter_parses_all_and_kinds() {
        assert_eq!("all".parse::<PositionFilter>().unwrap(), PositionFilter::All);
        assert_eq!(
            "Staking".parse::<PositionFilter>().unwrap(),
            PositionFilter::Only(PositionType::Staking)
        );
        assert!("borrowing".parse::<PositionFilter>().is_err());
    }

    #[test]
    fn time_range_point_counts() {
        let counts: Vec<_> = TimeRange::ALL.iter().map(|r| r.point_count()).collect();
        assert_eq!(counts, vec![24, 7, 30, 365]);
        assert_eq!(TimeRange::OneDay.span(), Duration::hours(24));
        assert_eq!("1w".parse::<TimeRange>().unwrap(), TimeRange::OneWeek);
        assert_eq!(TimeRange::default(), TimeRange::OneWeek);
        assert_eq!(
            serde_json::to_string(&TimeRange::OneYear).unwrap(),
            "\"1Y\""
        );
    }

    #[test]
    fn change_percent_needs_two_points() {
        let now = Utc::now();
        let single = [PricePoint {
            timestamp: now,
            price: 2000.0,
        }];
        assert_eq!(change_percent(&single), 0.0);
        assert_eq!(change_percent(&[]), 0.0);

        let pair = [
            PricePoint {
                timestamp: now - Duration::days(1),
                price: 2000.0,
            },
            PricePoint {
                timestamp: now,
                price: 2100.0,
            },
        ];
        assert!((change_percent(&pair) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_outcome_is_tagged() {
        let outcome = AggregateOutcome::NoSnapshot {
            reason: NoSnapshotReason::NoAccount,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "no_snapshot");
        assert_eq!(json["reason"], "no_account");
    }
}
