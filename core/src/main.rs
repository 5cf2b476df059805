/// Msgcache replay - drive a message cache from JSON command lines
use msgcache_core::config::CacheConfig;
use msgcache_core::replay::{self, ReplayCommand};
use msgcache_core::CacheSession;
use std::env;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Logs to stderr; stdout carries results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let options = CacheConfig::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let local = LocalSet::new();
    local
        .run_until(async move {
            let session = CacheSession::start(options.cache.clone())
                .map_err(|e| anyhow::anyhow!("Cache error: {}", e))?;

            let reader: Box<dyn AsyncBufRead + Unpin> = match &options.input {
                Some(path) => {
                    let file = tokio::fs::File::open(path).await.map_err(|e| {
                        anyhow::anyhow!("Cannot open {}: {}", path.display(), e)
                    })?;
                    Box::new(BufReader::new(file))
                }
                None => Box::new(BufReader::new(tokio::io::stdin())),
            };

            let mut lines = reader.lines();
            let mut applied = 0usize;
            let mut line_no = 0usize;
            while let Some(line) = lines.next_line().await? {
                line_no += 1;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let command = match ReplayCommand::parse(line) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("Skipping line {}: {}", line_no, e);
                        continue;
                    }
                };
                let output = replay::apply(&mut session.cache().borrow_mut(), command);
                println!("{}", output);
                applied += 1;
            }

            info!("Replayed {} commands", applied);
            session.shutdown();
            Ok::<(), anyhow::Error>(())
        })
        .await
}
