use anyhow::{Context, Result};
use clap::Parser;
use rangeq::client::Client;
use rangeq::config::Config;
use std::io::BufRead;
use std::time::Duration;

/// rangeq - resolve range queries
///
/// Sends each expression to a pool of range servers and prints the
/// resulting hosts one per line. When no expressions are given, reads one
/// expression per line from standard input.
///
/// Examples:
///   rangeq -s range1:80 '%foo.example.1'
///   echo '{foo,bar}' | rangeq -s range1:80 -s range2:80 --retries 2
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Range server address ("host:port"); repeat for a pool (also via
    /// RANGEQ_SERVERS, comma-separated)
    #[arg(
        long = "server",
        short = 's',
        env = "RANGEQ_SERVERS",
        value_delimiter = ',',
        required = true,
        value_name = "HOST:PORT"
    )]
    servers: Vec<String>,

    /// Abort a query after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<f64>,

    /// Number of times to retry a failed query
    #[arg(long, default_value_t = 0, value_name = "COUNT")]
    retries: usize,

    /// Pause between retries, in milliseconds
    #[arg(long, default_value_t = 0, value_name = "MILLIS")]
    pause: u64,

    /// Print results as a JSON array instead of one result per line
    #[arg(long)]
    json: bool,

    /// Range expressions to resolve
    #[arg(value_name = "EXPRESSION")]
    expressions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let client = Client::new(Config {
        servers: cli.servers.clone(),
        retry_count: cli.retries,
        retry_pause: Duration::from_millis(cli.pause),
        ..Config::default()
    })?;

    if cli.expressions.is_empty() {
        // Piped/interactive mode: answer each input line, keep going on
        // per-query errors.
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = line.context("cannot read standard input")?;
            let expression = line.trim();
            if expression.is_empty() {
                continue;
            }
            if let Err(err) = resolve(&client, &cli, expression).await {
                eprintln!("ERROR: {:#}", err);
            }
        }
    } else {
        for expression in &cli.expressions {
            resolve(&client, &cli, expression).await?;
        }
    }

    Ok(())
}

async fn resolve(client: &Client, cli: &Cli, expression: &str) -> Result<()> {
    let result = match cli.timeout {
        Some(seconds) => {
            let timeout = Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("invalid timeout: {}", seconds))?;
            client.query_with_timeout(timeout, expression).await
        }
        None => client.query(expression).await,
    };
    let values = result.with_context(|| format!("query {:?} failed", expression))?;

    if cli.json {
        println!("{}", serde_json::to_string(&values)?);
    } else {
        for value in values {
            println!("{}", value);
        }
    }
    Ok(())
}
