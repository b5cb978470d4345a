//! reqwest-backed provider gateway.
//!
//! # Responsibilities
//! - Authenticate every call with the configured client id and secret
//! - Map the provider's JSON shapes onto this crate's types
//! - Bound every call with the provider timeout
//! - Turn provider error bodies into `ProviderError::Api`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::observability::metrics;
use crate::provider::api::ProviderApi;
use crate::provider::types::{
    CreatedLinkToken, Institution, ItemMetadata, LinkTokenRequest, ProviderError, ProviderResult,
    TokenExchange, TransactionPage,
};
use crate::resilience::bounded;
use crate::storage::{AccountSnapshot, TransactionSnapshot};

/// HTTP gateway to the aggregation provider. Constructed once per process.
#[derive(Clone)]
pub struct ProviderGateway {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    secret: String,
    link: LinkSettings,
    timeout: Duration,
}

#[derive(Clone)]
struct LinkSettings {
    client_name: String,
    products: Vec<String>,
    country_codes: Vec<String>,
    language: String,
    webhook_url: Option<String>,
}

/// Request body with credentials merged in.
#[derive(Serialize)]
struct Authenticated<'a, T: Serialize> {
    client_id: &'a str,
    secret: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

impl ProviderGateway {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("link-reconciler/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            secret: config.secret.clone(),
            link: LinkSettings {
                client_name: config.client_name.clone(),
                products: config.products.clone(),
                country_codes: config.country_codes.clone(),
                language: config.language.clone(),
                webhook_url: config.webhook_url.clone(),
            },
            timeout,
        })
    }

    async fn post<B, R>(&self, endpoint: &'static str, body: &B) -> ProviderResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let payload = Authenticated {
            client_id: &self.client_id,
            secret: &self.secret,
            body,
        };

        let call = async {
            let response = self
                .http
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|source| ProviderError::Transport { endpoint, source })?;

            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|source| ProviderError::Transport { endpoint, source })?;

            if !status.is_success() {
                return Err(api_error(endpoint, status.as_u16(), &bytes));
            }
            serde_json::from_slice::<R>(&bytes).map_err(|e| ProviderError::Decode {
                endpoint,
                message: e.to_string(),
            })
        };

        let result = match bounded(self.timeout, call).await {
            Ok(result) => result,
            Err(elapsed) => Err(ProviderError::Timeout { endpoint, elapsed }),
        };

        match &result {
            Ok(_) => metrics::record_provider_request(endpoint, "ok"),
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "Provider call failed");
                metrics::record_provider_request(endpoint, outcome_label(e));
            }
        }
        result
    }
}

fn outcome_label(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Api { .. } => "api_error",
        ProviderError::Timeout { .. } => "timeout",
        ProviderError::Transport { .. } => "transport_error",
        ProviderError::Decode { .. } => "decode_error",
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_type: String,
    error_code: String,
    #[serde(default)]
    error_message: String,
}

fn api_error(endpoint: &'static str, status: u16, body: &[u8]) -> ProviderError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) => ProviderError::Api {
            endpoint,
            status,
            error_type: err.error_type,
            code: err.error_code,
            message: err.error_message,
        },
        Err(_) => ProviderError::Api {
            endpoint,
            status,
            error_type: "HTTP_ERROR".to_string(),
            code: format!("HTTP_{status}"),
            message: String::from_utf8_lossy(body).chars().take(200).collect(),
        },
    }
}

// Wire shapes

#[derive(Serialize)]
struct AccessTokenBody<'a> {
    access_token: &'a str,
}

#[derive(Serialize)]
struct PublicTokenBody<'a> {
    public_token: &'a str,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Deserialize)]
struct ItemResponse {
    item: WireItem,
}

#[derive(Deserialize)]
struct WireItem {
    item_id: String,
    institution_id: Option<String>,
}

#[derive(Serialize)]
struct InstitutionBody<'a> {
    institution_id: &'a str,
    country_codes: &'a [String],
}

#[derive(Deserialize)]
struct InstitutionResponse {
    institution: WireInstitution,
}

#[derive(Deserialize)]
struct WireInstitution {
    institution_id: String,
    name: String,
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<WireAccount>,
}

#[derive(Deserialize)]
struct WireAccount {
    account_id: String,
    name: String,
    official_name: Option<String>,
    mask: Option<String>,
    #[serde(rename = "type")]
    account_type: Option<String>,
    subtype: Option<String>,
    #[serde(default)]
    balances: WireBalances,
}

#[derive(Deserialize, Default)]
struct WireBalances {
    current: Option<f64>,
    available: Option<f64>,
    iso_currency_code: Option<String>,
}

impl From<WireAccount> for AccountSnapshot {
    fn from(a: WireAccount) -> Self {
        Self {
            provider_account_id: a.account_id,
            name: a.name,
            official_name: a.official_name,
            mask: a.mask,
            account_type: a.account_type,
            subtype: a.subtype,
            current_balance: a.balances.current,
            available_balance: a.balances.available,
            iso_currency_code: a.balances.iso_currency_code,
        }
    }
}

#[derive(Serialize)]
struct SyncBody<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
}

#[derive(Deserialize)]
struct SyncResponse {
    #[serde(default)]
    added: Vec<WireTransaction>,
    #[serde(default)]
    modified: Vec<WireTransaction>,
    #[serde(default)]
    removed: Vec<WireRemoved>,
    next_cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
struct WireTransaction {
    transaction_id: String,
    account_id: String,
    amount: f64,
    iso_currency_code: Option<String>,
    date: String,
    name: String,
    merchant_name: Option<String>,
    personal_finance_category: Option<WireCategory>,
    #[serde(default)]
    category: Option<Vec<String>>,
    #[serde(default)]
    pending: bool,
}

#[derive(Deserialize)]
struct WireCategory {
    primary: String,
}

#[derive(Deserialize)]
struct WireRemoved {
    transaction_id: String,
}

impl From<WireTransaction> for TransactionSnapshot {
    fn from(t: WireTransaction) -> Self {
        let category = t
            .personal_finance_category
            .map(|c| c.primary)
            .or_else(|| t.category.and_then(|c| c.into_iter().next()));
        Self {
            provider_transaction_id: t.transaction_id,
            provider_account_id: t.account_id,
            amount: t.amount,
            iso_currency_code: t.iso_currency_code,
            date: t.date,
            name: t.name,
            merchant_name: t.merchant_name,
            category,
            pending: t.pending,
        }
    }
}

#[derive(Serialize)]
struct LinkTokenBody<'a> {
    client_name: &'a str,
    user: LinkUser<'a>,
    products: &'a [String],
    country_codes: &'a [String],
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
}

#[derive(Serialize)]
struct LinkUser<'a> {
    client_user_id: &'a str,
}

#[derive(Deserialize)]
struct LinkTokenResponse {
    link_token: String,
    expiration: Option<DateTime<Utc>>,
}

#[async_trait]
impl ProviderApi for ProviderGateway {
    async fn exchange_public_token(&self, public_token: &str) -> ProviderResult<TokenExchange> {
        let response: ExchangeResponse = self
            .post("/item/public_token/exchange", &PublicTokenBody { public_token })
            .await?;
        Ok(TokenExchange {
            access_token: response.access_token,
            item_id: response.item_id,
        })
    }

    async fn get_item(&self, access_token: &str) -> ProviderResult<ItemMetadata> {
        let response: ItemResponse = self
            .post("/item/get", &AccessTokenBody { access_token })
            .await?;
        Ok(ItemMetadata {
            item_id: response.item.item_id,
            institution_id: response.item.institution_id,
        })
    }

    async fn get_institution(&self, institution_id: &str) -> ProviderResult<Institution> {
        let body = InstitutionBody {
            institution_id,
            country_codes: &self.link.country_codes,
        };
        let response: InstitutionResponse = self.post("/institutions/get_by_id", &body).await?;
        Ok(Institution {
            institution_id: response.institution.institution_id,
            name: response.institution.name,
        })
    }

    async fn get_accounts(&self, access_token: &str) -> ProviderResult<Vec<AccountSnapshot>> {
        let response: AccountsResponse = self
            .post("/accounts/get", &AccessTokenBody { access_token })
            .await?;
        Ok(response.accounts.into_iter().map(AccountSnapshot::from).collect())
    }

    async fn sync_transactions(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        count: u32,
    ) -> ProviderResult<TransactionPage> {
        let body = SyncBody {
            access_token,
            cursor,
            count,
        };
        let response: SyncResponse = self.post("/transactions/sync", &body).await?;
        Ok(TransactionPage {
            added: response.added.into_iter().map(Into::into).collect(),
            modified: response.modified.into_iter().map(Into::into).collect(),
            removed: response.removed.into_iter().map(|r| r.transaction_id).collect(),
            next_cursor: response.next_cursor,
            has_more: response.has_more,
        })
    }

    async fn remove_item(&self, access_token: &str) -> ProviderResult<()> {
        let _: IgnoredAny = self
            .post("/item/remove", &AccessTokenBody { access_token })
            .await?;
        Ok(())
    }

    async fn create_link_token(
        &self,
        request: &LinkTokenRequest,
    ) -> ProviderResult<CreatedLinkToken> {
        let body = LinkTokenBody {
            client_name: &self.link.client_name,
            user: LinkUser {
                client_user_id: &request.client_user_id,
            },
            products: &self.link.products,
            country_codes: &self.link.country_codes,
            language: &self.link.language,
            webhook: self.link.webhook_url.as_deref(),
            access_token: request.access_token.as_deref(),
        };
        let response: LinkTokenResponse = self.post("/link/token/create", &body).await?;
        Ok(CreatedLinkToken {
            link_token: response.link_token,
            expiration: response.expiration,
        })
    }
}
