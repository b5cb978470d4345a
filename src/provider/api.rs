//! The provider operations this service depends on.

use async_trait::async_trait;

use crate::provider::types::{
    CreatedLinkToken, Institution, ItemMetadata, LinkTokenRequest, ProviderResult, TokenExchange,
    TransactionPage,
};
use crate::storage::AccountSnapshot;

/// Remote calls to the aggregation provider. Every method may fail transiently.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Swap a short-lived public token for a long-lived access token.
    async fn exchange_public_token(&self, public_token: &str) -> ProviderResult<TokenExchange>;

    async fn get_item(&self, access_token: &str) -> ProviderResult<ItemMetadata>;

    async fn get_institution(&self, institution_id: &str) -> ProviderResult<Institution>;

    /// Current account list for the item behind `access_token`.
    async fn get_accounts(&self, access_token: &str) -> ProviderResult<Vec<AccountSnapshot>>;

    /// One page of cursor-based transaction changes.
    async fn sync_transactions(
        &self,
        access_token: &str,
        cursor: Option<&str>,
        count: u32,
    ) -> ProviderResult<TransactionPage>;

    /// Revoke the item behind `access_token` at the provider.
    async fn remove_item(&self, access_token: &str) -> ProviderResult<()>;

    async fn create_link_token(&self, request: &LinkTokenRequest)
        -> ProviderResult<CreatedLinkToken>;
}
