//! TzKT token discovery
//!
//! Finds Tezos tokens whose metadata carries an `artifactUri`, either for one
//! wallet (minted, held and contract tokens) or at random ("spider" mode).
//! All queries are paginated lazily and rate limited with governor.

use crate::cid::{extract_cid, ContentId};
use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use rand::Rng;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Largest page TzKT serves
pub const API_MAX: usize = 10_000;

/// Upper bound for spider-mode random offsets (approximate count of tokens
/// with artifacts)
pub const RANDOM_OFFSET_BOUND: usize = 8_000_000;

const USER_AGENT: &str = concat!("tz-archiver/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// TzKT client errors
#[derive(Debug, Error)]
pub enum TzktError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Token as returned by `/tokens` (or `/tokens/balances?select=token`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub contract: Option<Contract>,
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub standard: Option<String>,
    #[serde(default)]
    pub metadata: Option<TokenMetadata>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub alias: Option<String>,
    pub address: String,
}

/// The subset of TZIP-21 metadata this tool reads
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artifact_uri: Option<String>,
    #[serde(default)]
    pub display_uri: Option<String>,
    #[serde(default)]
    pub thumbnail_uri: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl Token {
    /// Content identifier of the token's artifact, if it lives on IPFS
    pub fn artifact_cid(&self) -> Option<ContentId> {
        self.metadata
            .as_ref()?
            .artifact_uri
            .as_deref()
            .and_then(extract_cid)
    }

    /// (contract address, token id)
    pub fn dedup_key(&self) -> (Option<String>, Option<String>) {
        (
            self.contract.as_ref().map(|c| c.address.clone()),
            self.token_id.clone(),
        )
    }
}

/// Supported token queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenQuery {
    /// Tokens first minted by an address
    MintedBy(String),
    /// Tokens with a non-zero balance held by an address
    HeldBy(String),
    /// Tokens of one contract
    Contract(String),
    /// Any token with an artifact
    WithArtifacts,
}

impl TokenQuery {
    fn path(&self) -> &'static str {
        match self {
            TokenQuery::HeldBy(_) => "tokens/balances",
            _ => "tokens",
        }
    }

    fn params(&self) -> Vec<(&'static str, &str)> {
        match self {
            TokenQuery::MintedBy(creator) => vec![
                ("firstMinter", creator.as_str()),
                ("metadata.artifactUri.null", "false"),
            ],
            TokenQuery::HeldBy(holder) => vec![
                ("account", holder.as_str()),
                ("balance.ne", "0"),
                ("select", "token"),
            ],
            TokenQuery::Contract(contract) => vec![
                ("contract", contract.as_str()),
                ("metadata.artifactUri.null", "false"),
            ],
            TokenQuery::WithArtifacts => vec![("metadata.artifactUri.null", "false")],
        }
    }
}

/// Keep the items that decode as tokens
fn parse_tokens(page: Vec<serde_json::Value>) -> Vec<Token> {
    page.into_iter()
        .filter_map(|value| match serde_json::from_value::<Token>(value) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!("Skipping malformed token: {}", e);
                None
            }
        })
        .collect()
}

/// TzKT API client
pub struct TzktClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl TzktClient {
    pub fn new(base_url: &str, requests_per_second: u32) -> Result<Self, TzktError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TzktError::NetworkError(e.to_string()))?;

        let quota =
            governor::Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn query_url(&self, query: &TokenQuery, limit: usize, offset: usize) -> Result<Url, TzktError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, query.path()))
            .map_err(|e| TzktError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .extend_pairs(query.params())
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url)
    }

    async fn fetch_page(
        &self,
        query: &TokenQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<serde_json::Value>, TzktError> {
        let url = self.query_url(query, limit, offset)?;

        self.rate_limiter.until_ready().await;
        debug!("TzKT request: {}", url);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| TzktError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TzktError::ApiError(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| TzktError::ParseError(e.to_string()))
    }

    /// Up to `limit` tokens matching `query`, starting at `offset`
    ///
    /// Pages are fetched on demand. An error is yielded once and ends the
    /// stream.
    pub fn paginated(
        &self,
        query: TokenQuery,
        limit: usize,
        offset: usize,
    ) -> impl Stream<Item = Result<Token, TzktError>> + '_ {
        stream! {
            let mut offset = offset;
            let mut remaining = limit;

            while remaining > 0 {
                let batch = remaining.min(API_MAX);
                match self.fetch_page(&query, batch, offset).await {
                    Ok(page) => {
                        let count = page.len();
                        for token in parse_tokens(page) {
                            yield Ok(token);
                        }
                        if count < batch {
                            break;
                        }
                        offset += count;
                        remaining -= count;
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }

    pub fn mints(
        &self,
        creator: &str,
        limit: usize,
    ) -> impl Stream<Item = Result<Token, TzktError>> + '_ {
        self.paginated(TokenQuery::MintedBy(creator.to_string()), limit, 0)
    }

    pub fn balances(
        &self,
        holder: &str,
        limit: usize,
    ) -> impl Stream<Item = Result<Token, TzktError>> + '_ {
        self.paginated(TokenQuery::HeldBy(holder.to_string()), limit, 0)
    }

    pub fn contract_tokens(
        &self,
        contract: &str,
        limit: usize,
    ) -> impl Stream<Item = Result<Token, TzktError>> + '_ {
        self.paginated(TokenQuery::Contract(contract.to_string()), limit, 0)
    }

    /// Tokens with artifacts from a random offset
    pub fn random_tokens(&self, limit: usize) -> impl Stream<Item = Result<Token, TzktError>> + '_ {
        let offset = rand::thread_rng().gen_range(0..RANDOM_OFFSET_BOUND);
        debug!("Random offset: {}", offset);
        self.paginated(TokenQuery::WithArtifacts, limit, offset)
    }
}

/// Minted, held and contract tokens of one wallet, without duplicates
///
/// A failing query is logged and the next one is tried.
pub fn wallet_tokens(
    client: &TzktClient,
    wallet: String,
    limit: usize,
) -> impl Stream<Item = Token> + '_ {
    stream! {
        let queries = [
            ("minted", TokenQuery::MintedBy(wallet.clone())),
            ("owned", TokenQuery::HeldBy(wallet.clone())),
            ("contract", TokenQuery::Contract(wallet.clone())),
        ];
        let mut seen = HashSet::new();

        for (label, query) in queries {
            info!("Fetching {} tokens...", label);
            let mut found = 0usize;
            let tokens = client.paginated(query, limit, 0);
            futures::pin_mut!(tokens);

            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => {
                        if seen.insert(token.dedup_key()) {
                            found += 1;
                            yield token;
                        }
                    }
                    Err(e) => warn!("Failed to fetch {} tokens for {}: {}", label, wallet, e),
                }
            }

            info!("Found {} {} tokens", found, label);
        }

        info!("Total unique tokens: {}", seen.len());
    }
}

/// Endless batches of random tokens
///
/// Sleeps `delay` between batches, twice that after a failed batch.
pub fn spider_tokens(
    client: &TzktClient,
    batch_size: usize,
    delay: Duration,
) -> impl Stream<Item = Token> + '_ {
    stream! {
        let mut iteration = 0u64;
        loop {
            iteration += 1;
            info!("Spider iteration {}", iteration);

            let mut count = 0usize;
            let mut failed = false;
            let tokens = client.random_tokens(batch_size);
            futures::pin_mut!(tokens);

            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => {
                        count += 1;
                        yield token;
                    }
                    Err(e) => {
                        warn!("Error in spider mode: {}", e);
                        failed = true;
                    }
                }
            }

            if failed {
                tokio::time::sleep(delay * 2).await;
            } else {
                if count == 0 {
                    warn!("No tokens returned from random query");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Artifact identifiers of a token stream; tokens without one are dropped
pub fn artifact_cids<S>(tokens: S) -> impl Stream<Item = ContentId>
where
    S: Stream<Item = Token>,
{
    tokens.filter_map(|token| futures::future::ready(token.artifact_cid()))
}
