use std::path::PathBuf;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use datastore::{
    config::Config, secrets::SecretChain, url::StoreUrl, AzureBlobStore, DataStore, LocalStore,
};

#[derive(Parser)]
#[command(name = "datastore")]
#[command(about = "Read and write blobs in local or Azure Blob Storage data stores")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the contents of a blob
    Get {
        /// Store URL, e.g. az://container/key or a local path
        url: String,
        /// Number of bytes to read (default: to the end)
        #[arg(short, long)]
        size: Option<u64>,
        /// Byte offset to start reading from
        #[arg(short, long, default_value = "0")]
        offset: u64,
        /// Write to this file instead of stdout
        #[arg(short = 'O', long)]
        output: Option<PathBuf>,
    },

    /// Write data to a blob (reads stdin when DATA is omitted)
    Put {
        url: String,
        data: Option<String>,
        /// Append instead of overwriting (local stores only)
        #[arg(short, long)]
        append: bool,
    },

    /// Copy a local file into a store
    Upload { src: PathBuf, url: String },

    /// Copy a blob to a local file
    Download { url: String, target: PathBuf },

    /// Show size and modification time as JSON
    Stat { url: String },

    /// List names under a directory key
    Ls { url: String },
}

fn open_store(
    url: &StoreUrl,
    config: &Config,
    secrets: &SecretChain,
) -> anyhow::Result<Box<dyn DataStore>> {
    match url.scheme.as_str() {
        "file" => Ok(Box::new(
            LocalStore::new("/")?.with_name(config.store_name.as_str()),
        )),
        "az" => Ok(Box::new(AzureBlobStore::from_secret(
            &config.store_name,
            &url.endpoint,
            secrets,
            &config.secrets.connection_secret,
        )?)),
        other => anyhow::bail!("Unsupported store scheme: {other}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    // stdout carries command output, so logs go to stderr
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer().with_writer(std::io::stderr))
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = Cli::parse();
    let config = Config::load()?;
    let secrets = config.secret_chain()?;

    match cli.command {
        Commands::Get {
            url,
            size,
            offset,
            output,
        } => {
            let url = StoreUrl::parse(&url)?;
            let store = open_store(&url, &config, &secrets)?;
            let data = store.get(&url.key, size, offset).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &data).await?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Commands::Put { url, data, append } => {
            let url = StoreUrl::parse(&url)?;
            let store = open_store(&url, &config, &secrets)?;
            let data = match data {
                Some(text) => Bytes::from(text),
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    Bytes::from(buf)
                }
            };
            let len = data.len();
            store.put(&url.key, data, append).await?;
            info!(url = %url, bytes = len, "put complete");
        }
        Commands::Upload { src, url } => {
            let url = StoreUrl::parse(&url)?;
            let store = open_store(&url, &config, &secrets)?;
            store.upload(&url.key, &src).await?;
            info!(url = %url, src = %src.display(), "upload complete");
        }
        Commands::Download { url, target } => {
            let url = StoreUrl::parse(&url)?;
            let store = open_store(&url, &config, &secrets)?;
            store.download(&url.key, &target).await?;
            info!(url = %url, target = %target.display(), "download complete");
        }
        Commands::Stat { url } => {
            let url = StoreUrl::parse(&url)?;
            let store = open_store(&url, &config, &secrets)?;
            let stats = store.stat(&url.key).await?;
            println!("{}", serde_json::to_string(&stats)?);
        }
        Commands::Ls { url } => {
            let url = StoreUrl::parse(&url)?;
            let store = open_store(&url, &config, &secrets)?;
            for name in store.listdir(&url.key).await? {
                println!("{name}");
            }
        }
    }

    Ok(())
}
