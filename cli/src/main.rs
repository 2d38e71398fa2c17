mod http;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ember_core::{
    ClientError, FileBackend, PartialLocator, RetrievalState, SecretCache, SecretClient, Source,
};
use log::{LevelFilter, debug};

use crate::http::HttpTransport;

#[derive(Parser, Debug)]
#[command(version, about = "Share secrets that can be read exactly once")]
struct Cli {
    /// Base URL of the ember server
    #[arg(long, env = "EMBER_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Base URL that share links are built under
    ///
    /// Defaults to the server URL.
    #[arg(long, env = "EMBER_ORIGIN", value_name = "URL")]
    origin: Option<String>,

    /// Location of the local secret cache
    ///
    /// Defaults to `<data dir>/ember/cache.json`.
    #[arg(long, env = "EMBER_CACHE", value_name = "PATH")]
    cache: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    timeout: u64,

    /// Print each retrieval step
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a new secret and print its share link
    Send {
        /// The secret content to store
        ///
        /// This can be any UTF-8 text. Consider quoting the value
        /// if it contains spaces or special characters. Read from
        /// stdin when omitted.
        #[arg(short, long, value_name = "TEXT")]
        text: Option<String>,
    },

    /// Retrieve a secret from its share link
    Recv {
        /// Full share link, or `id#key`
        ///
        /// The part after `#` is the decryption key and is never
        /// sent to the server.
        #[arg(long, value_name = "URL")]
        source: String,

        /// Print the plaintext
        ///
        /// Without this flag the secret is fetched and kept in the
        /// local cache, but not shown.
        #[arg(long)]
        reveal: bool,
    },

    /// Manage the local secret cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Forget every locally cached secret
    Clear,
    /// Print where the cache lives
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = pretty_env_logger::formatted_timed_builder();
    logger
        .format_timestamp_millis()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        });
    logger.init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ClientError>() {
                Some(client_error) => {
                    let report = client_error.report();
                    eprintln!("Error ({}): {}", report.kind, report.message);
                    if client_error.is_retryable() {
                        eprintln!("The server may not have been reached. It is safe to try again.");
                    }
                }
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

type Client = SecretClient<HttpTransport, FileBackend>;

async fn run(cli: Cli) -> Result<()> {
    let cache_backend = match &cli.cache {
        Some(path) => FileBackend::open(path),
        None => FileBackend::open_default(),
    }
    .context("Failed to open the local cache")?;
    let cache = SecretCache::new(cache_backend);

    let connect = |cache: SecretCache<FileBackend>| -> Result<Client> {
        let transport = HttpTransport::new(&cli.server, Duration::from_secs(cli.timeout))
            .context("Failed to build HTTP client")?;
        let origin = cli.origin.as_deref().unwrap_or(&cli.server);
        Ok(SecretClient::new(transport, cache, origin)?)
    };

    match cli.command {
        Command::Cache { action } => cache_command(&cache, &action),
        Command::Send { text } => send(&connect(cache)?, text).await,
        Command::Recv { source, reveal } => recv(&connect(cache)?, &source, reveal).await,
    }
}

async fn send(client: &Client, text: Option<String>) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => read_stdin()?,
    };

    let created = client.create(&text).await?;
    if !created.cached {
        eprintln!("Warning: could not cache the secret locally; opening the link will burn it.");
    }
    debug!("Share link built under {}", created.locator.origin());
    println!("{}", created.locator);

    Ok(())
}

async fn recv(client: &Client, source: &str, reveal: bool) -> Result<()> {
    let locator = PartialLocator::parse(source).map_err(ClientError::from)?;

    let mut secret = client
        .retrieve_with(&locator, |state| log_state(&locator.id, state))
        .await?;

    if secret.source() == Source::Store {
        eprintln!("The server copy of this secret has now been deleted.");
    }

    if reveal {
        println!("{}", secret.reveal());
    } else {
        eprintln!("Secret retrieved and hidden. Run again with --reveal to display it.");
    }

    Ok(())
}

fn cache_command(cache: &SecretCache<FileBackend>, action: &CacheAction) -> Result<()> {
    match action {
        CacheAction::Clear => {
            let removed = cache.clear().context("Failed to clear the local cache")?;
            println!("Removed {removed} cached secrets");
        }
        CacheAction::Path => println!("{}", cache.backend().path().display()),
    }
    Ok(())
}

fn log_state(id: &str, state: RetrievalState) {
    debug!("Secret {id}: {state:?}");
}

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read the secret from stdin")?;

    if text.is_empty() {
        bail!("No secret given: pass --text or pipe it on stdin");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn recv_takes_a_link() {
        let cli = Cli::try_parse_from([
            "ember",
            "--server",
            "http://localhost:8080",
            "recv",
            "--source",
            "http://localhost:8080/01ABC#key",
            "--reveal",
        ])
        .unwrap();

        match cli.command {
            Command::Recv { source, reveal } => {
                assert_eq!(source, "http://localhost:8080/01ABC#key");
                assert!(reveal);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
