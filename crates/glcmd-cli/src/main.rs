//! glcmd: read-only CLI over the daemon's HTTP API.
//!
//! Every subcommand is a thin GET against the local daemon; output is the
//! API's JSON, pretty-printed. `follow` tails the SSE stream.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;

#[derive(Parser)]
#[command(name = "glcmd")]
#[command(about = "Read-only client for the glcmd CGM gateway", long_about = None)]
struct Cli {
    /// Daemon base URL; defaults to GLCMD_API_URL or http://localhost:8080.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Glucose readings
    Glucose {
        #[command(subcommand)]
        cmd: GlucoseCmd,
    },

    /// Sensor lifecycle
    Sensor {
        #[command(subcommand)]
        cmd: SensorCmd,
    },

    /// Daemon health
    Health,

    /// Runtime counters
    Metrics,

    /// Tail the SSE event stream
    Follow {
        /// Comma-separated subset of glucose,sensor,keepalive; empty = all
        #[arg(long)]
        types: Option<String>,
    },
}

#[derive(Subcommand)]
enum GlucoseCmd {
    /// Most recent reading
    Latest,
    /// Page through readings
    List(ListArgs),
    /// Aggregate statistics
    Stats(RangeArgs),
}

#[derive(Subcommand)]
enum SensorCmd {
    /// Current sensor with derived status
    Latest,
    /// Page through sensors
    List(ListArgs),
    /// Wear-duration statistics
    Stats(RangeArgs),
}

#[derive(Args)]
struct ListArgs {
    /// RFC-3339 lower bound
    #[arg(long)]
    start: Option<String>,
    /// RFC-3339 upper bound
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    offset: Option<u32>,
}

#[derive(Args)]
struct RangeArgs {
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let base_url = cli
        .api_url
        .or_else(|| std::env::var(glcmd_config::ENV_API_URL).ok())
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let base_url = base_url.trim_end_matches('/').to_string();
    let http = reqwest::Client::new();

    match cli.cmd {
        Commands::Glucose { cmd } => match cmd {
            GlucoseCmd::Latest => get_json(&http, &base_url, "/v1/glucose/latest", &[]).await?,
            GlucoseCmd::List(args) => {
                get_json(&http, &base_url, "/v1/glucose", &list_query(&args)).await?
            }
            GlucoseCmd::Stats(args) => {
                get_json(&http, &base_url, "/v1/glucose/stats", &range_query(&args)).await?
            }
        },

        Commands::Sensor { cmd } => match cmd {
            SensorCmd::Latest => get_json(&http, &base_url, "/v1/sensor/latest", &[]).await?,
            SensorCmd::List(args) => {
                get_json(&http, &base_url, "/v1/sensor", &list_query(&args)).await?
            }
            SensorCmd::Stats(args) => {
                get_json(&http, &base_url, "/v1/sensor/stats", &range_query(&args)).await?
            }
        },

        Commands::Health => get_json(&http, &base_url, "/health", &[]).await?,
        Commands::Metrics => get_json(&http, &base_url, "/metrics", &[]).await?,

        Commands::Follow { types } => follow(&http, &base_url, types).await?,
    }

    Ok(())
}

fn list_query(args: &ListArgs) -> Vec<(&'static str, String)> {
    let mut q = Vec::new();
    if let Some(start) = &args.start {
        q.push(("start", start.clone()));
    }
    if let Some(end) = &args.end {
        q.push(("end", end.clone()));
    }
    if let Some(limit) = args.limit {
        q.push(("limit", limit.to_string()));
    }
    if let Some(offset) = args.offset {
        q.push(("offset", offset.to_string()));
    }
    q
}

fn range_query(args: &RangeArgs) -> Vec<(&'static str, String)> {
    let mut q = Vec::new();
    if let Some(start) = &args.start {
        q.push(("start", start.clone()));
    }
    if let Some(end) = &args.end {
        q.push(("end", end.clone()));
    }
    q
}

/// GET a path, pretty-print the JSON. Non-2xx responses surface the error
/// envelope's message and a non-zero exit.
async fn get_json(
    http: &reqwest::Client,
    base_url: &str,
    path: &str,
    query: &[(&'static str, String)],
) -> Result<()> {
    let resp = http
        .get(format!("{base_url}{path}"))
        .query(query)
        .send()
        .await
        .with_context(|| format!("request to {base_url}{path} failed"))?;

    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .context("response was not valid JSON")?;

    if !status.is_success() {
        let message = body["error"]["message"].as_str().unwrap_or("request failed");
        return Err(anyhow!("{} ({})", message, status.as_u16()));
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Tail /v1/stream, printing one line per SSE frame.
async fn follow(http: &reqwest::Client, base_url: &str, types: Option<String>) -> Result<()> {
    let mut req = http.get(format!("{base_url}/v1/stream"));
    if let Some(types) = types {
        req = req.query(&[("types", types)]);
    }

    let resp = req.send().await.context("stream request failed")?;
    if !resp.status().is_success() {
        return Err(anyhow!("stream refused ({})", resp.status().as_u16()));
    }

    let mut event_name = String::new();
    let mut buffer = String::new();
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("stream read failed")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        // Frames are newline-delimited; a blank line ends one.
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            if let Some(name) = line.strip_prefix("event: ") {
                event_name = name.to_string();
            } else if let Some(data) = line.strip_prefix("data: ") {
                println!("[{event_name}] {data}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_query_includes_only_set_flags() {
        let args = ListArgs {
            start: Some("2024-03-05T00:00:00Z".to_string()),
            end: None,
            limit: Some(50),
            offset: None,
        };
        let q = list_query(&args);
        assert_eq!(q.len(), 2);
        assert_eq!(q[0].0, "start");
        assert_eq!(q[1], ("limit", "50".to_string()));
    }
}
