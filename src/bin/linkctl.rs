use clap::{ArgGroup, Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "linkctl")]
#[command(about = "Operator CLI for the link reconciler admin API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "LINKCTL_URL", default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long, env = "ADMIN_API_KEY", hide_env_values = true)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Item counts, webhook log totals and encryption key state
    Status,
    /// Generate a new encryption key version
    RotateKey,
    /// Issue a link token for a new connection or an update-mode repair
    #[command(group(ArgGroup::new("target").required(true).args(["client_id", "item_id"])))]
    LinkToken {
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        item_id: Option<i64>,
    },
    /// Pull transactions for one item now
    Sync { item_id: i64 },
    /// Pull transactions for items flagged for sync
    Sweep {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::RotateKey => client.post(format!("{base}/admin/keys/rotate")),
        Commands::LinkToken { client_id, item_id } => client
            .post(format!("{base}/admin/link-tokens"))
            .json(&json!({ "client_id": client_id, "item_id": item_id })),
        Commands::Sync { item_id } => client.post(format!("{base}/admin/items/{item_id}/sync")),
        Commands::Sweep { limit } => {
            let mut request = client.post(format!("{base}/admin/sync/sweep"));
            if let Some(limit) = limit {
                request = request.query(&[("limit", limit)]);
            }
            request
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if !status.is_success() {
        eprintln!("{rendered}");
        return Err(format!("admin API returned status {status}").into());
    }

    println!("{rendered}");
    Ok(())
}
