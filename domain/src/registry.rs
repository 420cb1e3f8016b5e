use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{ChainId, Token, TokenKey};

pub const ETHEREUM: ChainId = 1;
pub const POLYGON: ChainId = 137;
pub const ARBITRUM: ChainId = 42161;
pub const BASE: ChainId = 8453;

/// Sentinel address for a chain's native coin.
pub const NATIVE_TOKEN_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

const ASSETS_BASE: &str = "https://raw.githubusercontent.com/Uniswap/assets/master/blockchains";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SupportedChain {
    pub id: ChainId,
    pub name: String,
    pub native_symbol: String,
    pub explorer_url: String,
}

pub fn supported_chains() -> Vec<SupportedChain> {
    [
        (ETHEREUM, "Ethereum", "ETH", "https://etherscan.io"),
        (POLYGON, "Polygon", "MATIC", "https://polygonscan.com"),
        (ARBITRUM, "Arbitrum One", "ETH", "https://arbiscan.io"),
        (BASE, "Base", "ETH", "https://basescan.org"),
    ]
    .into_iter()
    .map(|(id, name, native, explorer)| SupportedChain {
        id,
        name: name.to_string(),
        native_symbol: native.to_string(),
        explorer_url: explorer.to_string(),
    })
    .collect()
}

pub fn is_supported_chain(chain_id: ChainId) -> bool {
    matches!(chain_id, ETHEREUM | POLYGON | ARBITRUM | BASE)
}

/// Fixed set of tokens known per chain. Resolvers never report anything outside it.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: Vec<Token>,
    index: HashMap<TokenKey, usize>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut registry = Self::default();
        for token in tokens {
            registry.register(token);
        }
        registry
    }

    /// Re-registering a key replaces the previous entry in place.
    pub fn register(&mut self, token: Token) {
        let key = token.key();
        match self.index.get(&key) {
            Some(&idx) => self.tokens[idx] = token,
            None => {
                self.index.insert(key, self.tokens.len());
                self.tokens.push(token);
            }
        }
    }

    pub fn get(&self, key: &TokenKey) -> Option<&Token> {
        self.index.get(key).map(|&idx| &self.tokens[idx])
    }

    pub fn contains(&self, key: &TokenKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn all(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn for_chain(&self, chain_id: ChainId) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(move |t| t.chain_id == chain_id)
    }

    /// Registry order is kept; an empty chain list means every chain.
    pub fn for_chains<'a>(&'a self, chain_ids: &'a [ChainId]) -> impl Iterator<Item = &'a Token> {
        self.tokens
            .iter()
            .filter(move |t| chain_ids.is_empty() || chain_ids.contains(&t.chain_id))
    }

    pub fn by_symbol(&self, chain_id: ChainId, symbol: &str) -> Option<&Token> {
        self.for_chain(chain_id)
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Case-insensitive substring match on name or symbol.
    pub fn search(&self, query: &str) -> Vec<&Token> {
        let needle = query.trim().to_lowercase();
        self.tokens
            .iter()
            .filter(|t| {
                needle.is_empty()
                    || t.name.to_lowercase().contains(&needle)
                    || t.symbol.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Overrides prices by symbol (upper-cased), for every chain the symbol appears on.
    pub fn with_prices(mut self, prices: &HashMap<String, f64>) -> Self {
        for token in &mut self.tokens {
            if let Some(price) = prices.get(&token.symbol.to_uppercase()) {
                if price.is_finite() && *price >= 0.0 {
                    token.price = *price;
                }
            }
        }
        self
    }

    #[rustfmt::skip]
    pub fn default_tokens() -> Self {
        let mut tokens = Vec::new();
        for chain in [ETHEREUM, ARBITRUM, BASE] {
            tokens.push(native(chain, "ETH", "Ether", 3450.0));
        }
        tokens.push(native(POLYGON, "MATIC", "Polygon", 0.72));

        tokens.extend([
            erc20(ETHEREUM, "USDC", "USD Coin", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6, 1.0),
            erc20(ETHEREUM, "USDT", "Tether USD", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6, 1.0),
            erc20(ETHEREUM, "WBTC", "Wrapped BTC", "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", 8, 65000.0),
            erc20(ETHEREUM, "UNI", "Uniswap", "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", 18, 7.5),
            erc20(ETHEREUM, "LINK", "Chainlink", "0x514910771AF9Ca656af840dff83E8264EcF986CA", 18, 14.2),
            erc20(POLYGON, "USDC", "USD Coin", "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359", 6, 1.0),
            erc20(POLYGON, "WETH", "Wrapped Ether", "0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619", 18, 3450.0),
            erc20(ARBITRUM, "USDC", "USD Coin", "0xaf88d065e77c8cC2239327C5EDb3A432268e5831", 6, 1.0),
            erc20(ARBITRUM, "ARB", "Arbitrum", "0x912CE59144191C1204E64559FE8253a0e49E6548", 18, 0.85),
            erc20(BASE, "USDC", "USD Coin", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6, 1.0),
        ]);
        Self::new(tokens)
    }
}

fn native(chain_id: ChainId, symbol: &str, name: &str, price: f64) -> Token {
    Token {
        address: NATIVE_TOKEN_ADDRESS.to_string(),
        symbol: symbol.to_string(),
        name: name.to_string(),
        decimals: 18,
        chain_id,
        price,
        logo_uri: format!("{ASSETS_BASE}/{}/info/logo.png", chain_slug(chain_id)),
    }
}

fn erc20(
    chain_id: ChainId,
    symbol: &str,
    name: &str,
    address: &str,
    decimals: u8,
    price: f64,
) -> Token {
    Token {
        address: address.to_lowercase(),
        symbol: symbol.to_string(),
        name: name.to_string(),
        decimals,
        chain_id,
        price,
        logo_uri: format!(
            "{ASSETS_BASE}/{}/assets/{address}/logo.png",
            chain_slug(chain_id)
        ),
    }
}

fn chain_slug(chain_id: ChainId) -> &'static str {
    match chain_id {
        POLYGON => "polygon",
        ARBITRUM => "arbitrum",
        BASE => "base",
        _ => "ethereum",
    }
}
