//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use link_reconciler::config::ServiceConfig;
use link_reconciler::http::AppState;
use link_reconciler::lifecycle::Services;
use link_reconciler::provider::{
    CreatedLinkToken, Institution, ItemMetadata, LinkTokenRequest, ProviderApi, ProviderError,
    ProviderResult, TokenExchange, TransactionPage,
};
use link_reconciler::storage::{
    AccountSnapshot, Database, DeliveryWindows, Item, LinkMode, NewItem, NewLinkToken,
    TransactionSnapshot,
};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const LEASE: DeliveryWindows = DeliveryWindows {
    reclaim_after: Duration::from_secs(60),
    dedup_window: Duration::from_secs(300),
};

/// Same lease, but a processed delivery never suppresses a later identical body.
pub const NO_DEDUP_WINDOW: DeliveryWindows = DeliveryWindows {
    reclaim_after: Duration::from_secs(60),
    dedup_window: Duration::ZERO,
};

/// Provider double scripted per test.
#[derive(Default)]
pub struct FakeProvider {
    /// public token → (access token, provider item id)
    exchanges: Mutex<HashMap<String, (String, String)>>,
    /// access token → institution id
    institutions_by_token: Mutex<HashMap<String, Option<String>>>,
    institution_names: Mutex<HashMap<String, String>>,
    accounts: Mutex<HashMap<String, Vec<AccountSnapshot>>>,
    /// Scripted sync pages; an empty queue yields one final empty page.
    pages: Mutex<VecDeque<Result<TransactionPage, String>>>,
    removed: Mutex<Vec<String>>,
    link_requests: Mutex<Vec<LinkTokenRequest>>,
    pub exchange_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a public token that exchanges into `item_id` at `institution`.
    pub fn link(&self, public_token: &str, item_id: &str, institution: Option<&str>) -> String {
        let access_token = format!("access-{item_id}");
        self.exchanges.lock().unwrap().insert(
            public_token.to_string(),
            (access_token.clone(), item_id.to_string()),
        );
        self.institutions_by_token
            .lock()
            .unwrap()
            .insert(access_token.clone(), institution.map(str::to_string));
        if let Some(institution) = institution {
            self.institution_names
                .lock()
                .unwrap()
                .insert(institution.to_string(), format!("Bank {institution}"));
        }
        access_token
    }

    pub fn set_accounts(&self, access_token: &str, ids: &[&str]) {
        let snapshots = ids.iter().map(|id| account(id)).collect();
        self.accounts
            .lock()
            .unwrap()
            .insert(access_token.to_string(), snapshots);
    }

    pub fn push_page(&self, page: TransactionPage) {
        self.pages.lock().unwrap().push_back(Ok(page));
    }

    pub fn push_page_error(&self, code: &str) {
        self.pages.lock().unwrap().push_back(Err(code.to_string()));
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn link_requests(&self) -> Vec<LinkTokenRequest> {
        self.link_requests.lock().unwrap().clone()
    }
}

fn api_error(endpoint: &'static str, code: &str) -> ProviderError {
    ProviderError::Api {
        endpoint,
        status: 400,
        error_type: "INVALID_INPUT".to_string(),
        code: code.to_string(),
        message: format!("scripted {code}"),
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn exchange_public_token(&self, public_token: &str) -> ProviderResult<TokenExchange> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let exchanges = self.exchanges.lock().unwrap();
        match exchanges.get(public_token) {
            Some((access_token, item_id)) => Ok(TokenExchange {
                access_token: access_token.clone(),
                item_id: item_id.clone(),
            }),
            None => Err(api_error("/item/public_token/exchange", "INVALID_PUBLIC_TOKEN")),
        }
    }

    async fn get_item(&self, access_token: &str) -> ProviderResult<ItemMetadata> {
        let institutions = self.institutions_by_token.lock().unwrap();
        let institution_id = institutions
            .get(access_token)
            .cloned()
            .ok_or_else(|| api_error("/item/get", "INVALID_ACCESS_TOKEN"))?;
        Ok(ItemMetadata {
            item_id: access_token.trim_start_matches("access-").to_string(),
            institution_id,
        })
    }

    async fn get_institution(&self, institution_id: &str) -> ProviderResult<Institution> {
        let names = self.institution_names.lock().unwrap();
        match names.get(institution_id) {
            Some(name) => Ok(Institution {
                institution_id: institution_id.to_string(),
                name: name.clone(),
            }),
            None => Err(api_error("/institutions/get_by_id", "INVALID_INSTITUTION")),
        }
    }

    async fn get_accounts(&self, access_token: &str) -> ProviderResult<Vec<AccountSnapshot>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .unwrap_or_default())
    }

    async fn sync_transactions(
        &self,
        _access_token: &str,
        _cursor: Option<&str>,
        _count: u32,
    ) -> ProviderResult<TransactionPage> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.lock().unwrap().pop_front() {
            Some(Ok(page)) => Ok(page),
            Some(Err(code)) => Err(api_error("/transactions/sync", &code)),
            None => Ok(TransactionPage {
                next_cursor: "cursor-final".to_string(),
                ..Default::default()
            }),
        }
    }

    async fn remove_item(&self, access_token: &str) -> ProviderResult<()> {
        self.removed.lock().unwrap().push(access_token.to_string());
        Ok(())
    }

    async fn create_link_token(
        &self,
        request: &LinkTokenRequest,
    ) -> ProviderResult<CreatedLinkToken> {
        let mut requests = self.link_requests.lock().unwrap();
        requests.push(request.clone());
        Ok(CreatedLinkToken {
            link_token: format!("link-sandbox-{}", requests.len()),
            expiration: None,
        })
    }
}

pub fn account(id: &str) -> AccountSnapshot {
    AccountSnapshot {
        provider_account_id: id.to_string(),
        name: format!("Account {id}"),
        official_name: None,
        mask: Some("1234".to_string()),
        account_type: Some("depository".to_string()),
        subtype: Some("checking".to_string()),
        current_balance: Some(100.0),
        available_balance: None,
        iso_currency_code: Some("USD".to_string()),
    }
}

pub fn transaction(id: &str, account: &str, amount: f64) -> TransactionSnapshot {
    TransactionSnapshot {
        provider_transaction_id: id.to_string(),
        provider_account_id: account.to_string(),
        amount,
        iso_currency_code: Some("USD".to_string()),
        date: "2024-05-01".to_string(),
        name: format!("Purchase {id}"),
        merchant_name: None,
        category: None,
        pending: false,
    }
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config.sync.max_pages = 5;
    config
}

/// Fully wired services over an in-memory database and a fake provider.
pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub services: Arc<Services>,
    pub config: Arc<ArcSwap<ServiceConfig>>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: ServiceConfig) -> Self {
        let db = Database::connect(&config.database, Duration::from_secs(5))
            .await
            .unwrap();
        let provider = FakeProvider::new();
        let services = Services::new(db, provider.clone(), &config);
        services.keys.ensure_active_key(true).await.unwrap();

        Self {
            provider,
            services: Arc::new(services),
            config: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Harness over a database file, so a test can open a second connection.
    pub async fn on_file(path: &std::path::Path) -> Self {
        let mut config = test_config();
        config.database.url = format!("sqlite://{}", path.display());
        Self::with_config(config).await
    }

    pub fn db(&self) -> &Database {
        &self.services.db
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.config.clone(), self.services.clone())
    }

    /// Insert an active item whose access token is `access-<provider_item_id>`.
    pub async fn seed_item(
        &self,
        client_id: &str,
        provider_item_id: &str,
        institution: Option<&str>,
    ) -> Item {
        let sealed = self
            .services
            .cipher
            .encrypt_str(&format!("access-{provider_item_id}"))
            .await
            .unwrap();
        self.db()
            .insert_item(&NewItem {
                client_id: client_id.to_string(),
                provider_item_id: provider_item_id.to_string(),
                institution_id: institution.map(str::to_string),
                institution_name: None,
                access_token_ciphertext: sealed.ciphertext,
                access_token_key_id: sealed.key_id,
            })
            .await
            .unwrap()
    }

    pub async fn seed_accounts(&self, item_id: i64, ids: &[&str]) {
        let snapshots: Vec<_> = ids.iter().map(|id| account(id)).collect();
        self.db()
            .sync_item_accounts(item_id, &snapshots)
            .await
            .unwrap();
    }

    pub async fn seed_link_token(&self, token: &str, client_id: &str, item_id: Option<i64>) {
        self.db()
            .insert_link_token(&NewLinkToken {
                token: token.to_string(),
                client_id: client_id.to_string(),
                mode: if item_id.is_some() {
                    LinkMode::Update
                } else {
                    LinkMode::Create
                },
                item_id,
                expires_at: None,
            })
            .await
            .unwrap();
    }

    pub async fn item(&self, id: i64) -> Item {
        self.db().get_item(id).await.unwrap().unwrap()
    }

    pub async fn item_count(&self) -> i64 {
        self.db()
            .item_status_counts()
            .await
            .unwrap()
            .iter()
            .map(|(_, count)| count)
            .sum()
    }
}

pub fn body(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

pub fn session_finished(link_token: &str, public_tokens: &[&str]) -> Vec<u8> {
    body(serde_json::json!({
        "webhook_type": "LINK",
        "webhook_code": "SESSION_FINISHED",
        "link_token": link_token,
        "link_session_id": format!("session-{link_token}"),
        "status": "SUCCESS",
        "public_tokens": public_tokens,
    }))
}

pub fn item_error(item_id: &str, code: &str) -> Vec<u8> {
    body(serde_json::json!({
        "webhook_type": "ITEM",
        "webhook_code": "ERROR",
        "item_id": item_id,
        "error": {
            "error_type": "ITEM_ERROR",
            "error_code": code,
            "error_message": "the login details of this item have changed",
        },
    }))
}

/// A captured request to the programmable backend.
#[derive(Debug, Clone)]
pub struct Captured {
    pub path: String,
    pub body: String,
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` sees the request path and body and returns the status and body to send.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<Mutex<Vec<Captured>>>)
where
    F: Fn(Captured) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let captured = Arc::new(Mutex::new(Vec::new()));
    let log = captured.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                log.lock().unwrap().push(request.clone());

                let (status, body) = f(request).await;
                let status_text = match status {
                    200 => "200 OK",
                    400 => "400 Bad Request",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, captured)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let end = buf.len().min(header_end + content_length);
    Some(Captured {
        path,
        body: String::from_utf8_lossy(&buf[header_end..end]).to_string(),
    })
}
