use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "faceseek", about = "Face search over cached embeddings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze images and cache their face embeddings
    Embed {
        /// Image URLs or local paths
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Find the target person's face across candidate images
    Find {
        /// Target image (URL or path)
        target: String,
        /// Candidate images to search
        scope: Vec<String>,
        /// Similarity threshold in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Which target face(s) to use: all, largest, best, an index, or
        /// a comma-separated index list (negative counts from the end)
        #[arg(short, long)]
        policy: Option<String>,
        /// Include per-pair match details and a target face summary
        #[arg(short, long)]
        details: bool,
        /// Cap on ranked results (0 = unlimited)
        #[arg(short = 'n', long)]
        max_results: Option<i64>,
    },
    /// Show detected faces for one image
    Inspect {
        source: String,
        /// Fail instead of analyzing when the image is not cached
        #[arg(long)]
        cached: bool,
    },
    /// Show cache statistics
    Stats,
    /// Remove every cache entry
    Clear,
    /// Drop cache entries whose sources are no longer reachable
    Cleanup,
    /// Show daemon status
    Status,
}

// `#[zbus::proxy]` generates `FaceSeekProxy` from this trait.
#[zbus::proxy(
    interface = "org.faceseek.FaceSeek1",
    default_service = "org.faceseek.FaceSeek1",
    default_path = "/org/faceseek/FaceSeek1"
)]
trait FaceSeek {
    async fn embed(&self, sources: &str) -> zbus::Result<String>;
    async fn find_in(&self, request: &str) -> zbus::Result<String>;
    async fn inspect(&self, identifier: &str, cached_only: bool) -> zbus::Result<String>;
    async fn cache_stats(&self) -> zbus::Result<String>;
    async fn cache_clear(&self) -> zbus::Result<String>;
    async fn cache_cleanup(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Wire form of a `--policy` argument: `3` and `-1` are indices, `0,2`
/// is an index list, anything else is a policy name.
fn parse_policy(raw: &str) -> serde_json::Value {
    if let Ok(index) = raw.parse::<i64>() {
        return serde_json::json!(index);
    }
    if raw.contains(',') {
        let indices: Result<Vec<i64>, _> =
            raw.split(',').map(|part| part.trim().parse::<i64>()).collect();
        if let Ok(indices) = indices {
            return serde_json::json!(indices);
        }
    }
    serde_json::json!(raw)
}

/// Pretty-print a daemon reply; a tagged failure becomes a nonzero exit.
fn render(reply: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(reply)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    if value.get("success").and_then(serde_json::Value::as_bool) == Some(false) {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session().await?;
    let proxy = FaceSeekProxy::new(&conn).await?;

    match cli.command {
        Commands::Embed { sources } => {
            let reply = proxy.embed(&serde_json::json!(sources).to_string()).await?;
            render(&reply)?;
        }
        Commands::Find {
            target,
            scope,
            threshold,
            policy,
            details,
            max_results,
        } => {
            let mut request = serde_json::json!({
                "target": target,
                "scope": scope,
                "include_details": details,
            });
            if let Some(threshold) = threshold {
                request["threshold"] = serde_json::json!(threshold);
            }
            if let Some(policy) = policy {
                request["policy"] = parse_policy(&policy);
            }
            if let Some(max_results) = max_results {
                request["max_results"] = serde_json::json!(max_results);
            }
            let reply = proxy.find_in(&request.to_string()).await?;
            render(&reply)?;
        }
        Commands::Inspect { source, cached } => {
            let reply = proxy.inspect(&source, cached).await?;
            render(&reply)?;
        }
        Commands::Stats => render(&proxy.cache_stats().await?)?,
        Commands::Clear => render(&proxy.cache_clear().await?)?,
        Commands::Cleanup => render(&proxy.cache_cleanup().await?)?,
        Commands::Status => render(&proxy.status().await?)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy_names_and_indices() {
        assert_eq!(parse_policy("all"), serde_json::json!("all"));
        assert_eq!(parse_policy("largest"), serde_json::json!("largest"));
        assert_eq!(parse_policy("2"), serde_json::json!(2));
        assert_eq!(parse_policy("-1"), serde_json::json!(-1));
        assert_eq!(parse_policy("0, 2"), serde_json::json!([0, 2]));
        // A malformed list falls through as a name for the daemon to reject.
        assert_eq!(parse_policy("0,x"), serde_json::json!("0,x"));
    }
}
