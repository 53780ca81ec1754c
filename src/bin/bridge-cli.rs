use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Management CLI for the runtime bridge", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "BRIDGE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall bridge status
    Status,
    /// Circuit breaker states
    Breakers,
    /// Reset one circuit breaker
    ResetBreaker { name: String },
    /// Force a circuit breaker open (maintenance)
    OpenBreaker { name: String },
    /// Force a circuit breaker closed
    CloseBreaker { name: String },
    /// Connection state, metrics and disconnect buffer
    Connection,
    /// Leave the Failed state and reconnect
    Reconnect,
    /// Zero the connection metrics
    ResetMetrics,
    /// Event filter chain statistics
    Filters,
    /// Recent runtime events
    Events {
        #[arg(short = 't', long)]
        event_type: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Breakers => client.get(format!("{}/admin/breakers", cli.url)),
        Commands::ResetBreaker { name } => {
            client.post(format!("{}/admin/breakers/{}/reset", cli.url, name))
        }
        Commands::OpenBreaker { name } => {
            client.post(format!("{}/admin/breakers/{}/open", cli.url, name))
        }
        Commands::CloseBreaker { name } => {
            client.post(format!("{}/admin/breakers/{}/close", cli.url, name))
        }
        Commands::Connection => client.get(format!("{}/admin/connection", cli.url)),
        Commands::Reconnect => client.post(format!("{}/admin/connection/reset", cli.url)),
        Commands::ResetMetrics => client.post(format!("{}/admin/metrics/reset", cli.url)),
        Commands::Filters => client.get(format!("{}/admin/events/filters", cli.url)),
        Commands::Events { event_type, limit } => {
            let mut query = vec![("limit", limit.to_string())];
            if let Some(event_type) = event_type {
                query.push(("event_type", event_type));
            }
            client.get(format!("{}/admin/events", cli.url)).query(&query)
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
