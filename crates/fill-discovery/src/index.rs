//! Indexed API client.
//!
//! The indexer caches open orders and vault deposit addresses. Any
//! transport error, non-success status or malformed body is an error so the
//! caller can fall back to direct ledger queries.

use std::time::Duration;

use fill_core::{
    asset_for_mint, AssetIndex, AssetInfo, BoxFuture, DepositBalances, Order, OrderKind, TimeLock,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::error::{DiscoveryError, DiscoveryResult};

/// Default timeout for indexer requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Rent-exempt minimum of an empty account, held back on native deposit
/// addresses.
pub const LAMPORTS_RENT: u64 = 890_880;

/// Indexed order API.
pub trait OrderIndex: Send + Sync {
    /// All open withdraw and spend-limit orders.
    fn open_orders(&self) -> BoxFuture<'_, DiscoveryResult<Vec<Order>>>;

    /// Deposit-address balances of every vault.
    fn deposit_balances<'a>(
        &'a self,
        assets: &'a [AssetInfo],
    ) -> BoxFuture<'a, DiscoveryResult<Vec<DepositBalances>>>;

    /// Whether a time-locked order is still open.
    fn order_exists(&self, kind: OrderKind, account: Pubkey) -> BoxFuture<'_, DiscoveryResult<bool>>;
}

#[derive(Debug, Deserialize)]
struct RawTimeLock {
    owner: String,
    is_owner_payer: bool,
    release_slot: u64,
}

#[derive(Debug, Deserialize)]
struct RawWithdrawAccount {
    time_lock: RawTimeLock,
    amount_base_units: u64,
    drift_market_index: u16,
    reduce_only: bool,
    destination: String,
}

#[derive(Debug, Deserialize)]
struct RawSpendLimitsAccount {
    time_lock: RawTimeLock,
    spend_limit_per_transaction: u64,
    spend_limit_per_timeframe: u64,
    timeframe_in_seconds: u64,
    next_timeframe_reset_timestamp: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder<T> {
    public_key: String,
    account: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrdersBody {
    withdraw_orders: Vec<RawOrder<RawWithdrawAccount>>,
    spend_limits_orders: Vec<RawOrder<RawSpendLimitsAccount>>,
}

#[derive(Debug, Deserialize)]
struct RawVaultData {
    owner: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSplAccount {
    mint: String,
    amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDepositAddress {
    lamports: u64,
    #[serde(default)]
    spl_accounts: Vec<RawSplAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVault {
    vault: RawVaultData,
    deposit_address: RawDepositAddress,
}

#[derive(Debug, Deserialize)]
struct UsersBody {
    users: Vec<RawVault>,
}

#[derive(Debug, Deserialize)]
struct OrderLookupBody {
    order: Option<serde_json::Value>,
}

fn parse_pubkey(value: &str) -> DiscoveryResult<Pubkey> {
    value
        .parse::<Pubkey>()
        .map_err(|e| DiscoveryError::Decode(format!("pubkey {value}: {e}")))
}

impl RawTimeLock {
    fn into_time_lock(self) -> DiscoveryResult<TimeLock> {
        Ok(TimeLock {
            owner: parse_pubkey(&self.owner)?,
            is_owner_payer: self.is_owner_payer,
            release_slot: self.release_slot,
        })
    }
}

/// Parse the `all-open-orders` body into orders.
pub fn parse_open_orders(body: &str) -> DiscoveryResult<Vec<Order>> {
    let body: OpenOrdersBody = serde_json::from_str(body)
        .map_err(|e| DiscoveryError::Decode(format!("open orders: {e}")))?;

    let mut orders = Vec::with_capacity(body.withdraw_orders.len() + body.spend_limits_orders.len());
    for raw in body.withdraw_orders {
        let account = raw.account;
        orders.push(Order::withdraw(
            parse_pubkey(&raw.public_key)?,
            account.time_lock.into_time_lock()?,
            account.amount_base_units,
            AssetIndex(account.drift_market_index),
            account.reduce_only,
            parse_pubkey(&account.destination)?,
        ));
    }
    for raw in body.spend_limits_orders {
        let account = raw.account;
        orders.push(Order::spend_limit(
            parse_pubkey(&raw.public_key)?,
            account.time_lock.into_time_lock()?,
            account.spend_limit_per_transaction,
            account.spend_limit_per_timeframe,
            account.timeframe_in_seconds,
            account.next_timeframe_reset_timestamp,
        ));
    }
    Ok(orders)
}

/// Parse the `users` section of the `all-open-orders` body.
///
/// The native balance excludes the rent-exempt minimum. Token accounts
/// with an unsupported mint are ignored.
pub fn parse_deposit_balances(
    body: &str,
    assets: &[AssetInfo],
) -> DiscoveryResult<Vec<DepositBalances>> {
    let body: UsersBody = serde_json::from_str(body)
        .map_err(|e| DiscoveryError::Decode(format!("vault users: {e}")))?;

    body.users
        .into_iter()
        .map(|user| {
            let mut balances = DepositBalances::new(parse_pubkey(&user.vault.owner)?);
            balances.balances.insert(
                AssetIndex::NATIVE,
                user.deposit_address.lamports.saturating_sub(LAMPORTS_RENT),
            );
            for spl in &user.deposit_address.spl_accounts {
                let mint = parse_pubkey(&spl.mint)?;
                if let Some(asset) = asset_for_mint(assets, &mint) {
                    balances.balances.insert(asset, spl.amount);
                }
            }
            Ok(balances)
        })
        .collect()
}

/// HTTP client for the indexed API.
pub struct IndexerClient {
    client: Client,
    base_url: String,
}

impl IndexerClient {
    pub fn new(base_url: impl Into<String>) -> DiscoveryResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> DiscoveryResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn all_open_orders_url(&self) -> String {
        format!("{}/data/all-open-orders", self.base_url)
    }

    async fn fetch_text(&self, url: &str, query: &[(&str, String)]) -> DiscoveryResult<String> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| DiscoveryError::Http(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Http(format!("HTTP {status}: {body}")));
        }

        response
            .text()
            .await
            .map_err(|e| DiscoveryError::Http(format!("Failed to read response: {e}")))
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> DiscoveryResult<T> {
        let body = self.fetch_text(url, query).await?;
        serde_json::from_str(&body)
            .map_err(|e| DiscoveryError::Decode(format!("Failed to parse response: {e}")))
    }

    async fn fetch_open_orders(&self) -> DiscoveryResult<Vec<Order>> {
        let body = self.fetch_text(&self.all_open_orders_url(), &[]).await?;
        let orders = parse_open_orders(&body)?;
        debug!(count = orders.len(), "Fetched open orders from indexer");
        Ok(orders)
    }

    async fn fetch_deposit_balances(
        &self,
        assets: &[AssetInfo],
    ) -> DiscoveryResult<Vec<DepositBalances>> {
        let body = self.fetch_text(&self.all_open_orders_url(), &[]).await?;
        parse_deposit_balances(&body, assets)
    }

    async fn fetch_order_exists(&self, kind: OrderKind, account: Pubkey) -> DiscoveryResult<bool> {
        let path = match kind {
            OrderKind::Withdraw => "withdraw",
            OrderKind::SpendLimitUpdate => "spend-limits",
            OrderKind::DepositCredit => {
                return Err(DiscoveryError::Decode(
                    "Deposit credits have no order account".to_string(),
                ))
            }
        };
        let url = format!("{}/data/order/{path}", self.base_url);
        let body: OrderLookupBody = self
            .fetch_json(&url, &[("publicKey", account.to_string())])
            .await?;
        Ok(body.order.is_some_and(|order| !order.is_null()))
    }
}

impl OrderIndex for IndexerClient {
    fn open_orders(&self) -> BoxFuture<'_, DiscoveryResult<Vec<Order>>> {
        Box::pin(self.fetch_open_orders())
    }

    fn deposit_balances<'a>(
        &'a self,
        assets: &'a [AssetInfo],
    ) -> BoxFuture<'a, DiscoveryResult<Vec<DepositBalances>>> {
        Box::pin(self.fetch_deposit_balances(assets))
    }

    fn order_exists(&self, kind: OrderKind, account: Pubkey) -> BoxFuture<'_, DiscoveryResult<bool>> {
        Box::pin(self.fetch_order_exists(kind, account))
    }
}
