//! Content store command line
//!
//! ## Usage
//!
//! ```bash
//! # Save an API token
//! content-store token eyJhbGciOi...
//!
//! # Upload files or directories
//! content-store put ./photos --name holiday
//!
//! # Check pin and deal status
//! content-store status bafybei...
//!
//! # Browse and download
//! content-store ls bafybei...
//! content-store walk bafybei...
//! content-store cat bafybei... --path photos/a.jpg
//! content-store get bafybei... --output ./restored
//!
//! # List previous uploads
//! content-store list --max 20
//! content-store list --json
//!
//! # Forget the saved token
//! content-store token --delete
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use content_store_client::config::default_config_path;
use content_store_client::{
    files_from_path, ClientConfig, ContentId, ListOptions, PutOptions, StoreClient, Upload,
    VirtualFile,
};
use futures::{pin_mut, TryStreamExt};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "content-store")]
#[command(about = "Store and retrieve content-addressed data")]
struct Args {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Service endpoint
    #[arg(long, env = "CONTENT_STORE_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// API token
    #[arg(long, env = "CONTENT_STORE_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload files and directories
    Put {
        /// Files or directories to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Upload label
        #[arg(short, long)]
        name: Option<String>,

        /// Do not wrap the upload in a directory
        #[arg(long)]
        no_wrap: bool,

        /// Include dot-files
        #[arg(long)]
        hidden: bool,
    },

    /// Upload an existing CAR file
    PutCar {
        file: PathBuf,

        /// Upload label
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show pin and deal status
    Status { cid: ContentId },

    /// Download content to disk
    Get {
        cid: ContentId,

        /// Destination (defaults to ./<cid>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the entries of a directory
    Ls { cid: ContentId },

    /// Recursively list everything under a root
    Walk { cid: ContentId },

    /// Write a file to stdout
    Cat {
        cid: ContentId,

        /// Path of the file below the root
        #[arg(short, long)]
        path: Option<String>,
    },

    /// List previous uploads
    List {
        /// Maximum number of uploads to show
        #[arg(short, long)]
        max: Option<usize>,

        /// Print only identifiers
        #[arg(long)]
        cids: bool,

        /// Print newline-delimited JSON
        #[arg(long, conflicts_with = "cids")]
        json: bool,
    },

    /// Save an API token to the config file
    Token {
        #[arg(value_name = "TOKEN", required_unless_present = "delete")]
        api_token: Option<String>,

        /// Delete the saved token
        #[arg(long, conflicts_with = "api_token")]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("content_store_client=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let file_config = ClientConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if let Command::Token { api_token, delete } = &args.command {
        let mut saved = file_config;
        if *delete {
            saved.forget_credentials();
            saved.save(&config_path)?;
            info!(path = %config_path.display(), "Deleted API token");
            return Ok(());
        }
        saved.token = api_token.clone();
        if let Some(endpoint) = &args.endpoint {
            saved.endpoint = endpoint.clone();
        }
        saved.validate()?;
        saved.save(&config_path)?;
        info!(path = %config_path.display(), "Saved API token");
        return Ok(());
    }

    // Apply environment, then CLI overrides
    let mut config = file_config.with_env()?;
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(token) = args.token {
        config.token = Some(token);
    }
    if let Some(timeout) = args.timeout_secs {
        config.timeout_secs = timeout;
    }

    let client = StoreClient::new(config)?;

    match args.command {
        Command::Put {
            paths,
            name,
            no_wrap,
            hidden,
        } => {
            let mut files = Vec::new();
            for path in &paths {
                files.extend(
                    files_from_path(path, hidden)
                        .with_context(|| format!("reading {}", path.display()))?,
                );
            }
            let options = PutOptions {
                name,
                wrap_with_directory: !no_wrap,
            };
            let cid = client.put(files, options).await?;
            println!("{}", cid);
        }

        Command::PutCar { file, name } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let options = PutOptions {
                name,
                ..Default::default()
            };
            let cid = client.put_car(bytes, options).await?;
            println!("{}", cid);
        }

        Command::Status { cid } => {
            let status = client.status(&cid).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Command::Get { cid, output } => {
            let root = client.get(&cid).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(cid.to_string()));
            materialize(root, &output)?;
            info!(cid = %cid, output = %output.display(), "Saved content");
        }

        Command::Ls { cid } => {
            let root = client.get(&cid).await?;
            for entry in root.list_children(0)? {
                let kind = if entry.is_dir { 'd' } else { '-' };
                println!("{} {:>12} {}", kind, entry.size, entry.name);
            }
        }

        Command::Walk { cid } => {
            let root = client.get(&cid).await?;
            for entry in root.walk() {
                let entry = entry?;
                println!("{} ({} bytes)", entry.path, entry.size);
            }
        }

        Command::Cat { cid, path } => {
            let root = client.get(&cid).await?;
            let file = root.open(path.as_deref().unwrap_or(""))?;
            let mut reader = file.reader()?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut reader, &mut out)?;
            out.flush()?;
        }

        Command::List { max, cids, json } => {
            let format = if json {
                ListFormat::Json
            } else if cids {
                ListFormat::Cids
            } else {
                ListFormat::Table
            };
            let uploads = client.list(ListOptions {
                max_results: max,
                ..Default::default()
            });
            pin_mut!(uploads);
            while let Some(upload) = uploads.try_next().await? {
                println!("{}", format.line(&upload)?);
            }
        }

        Command::Token { .. } => {}
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListFormat {
    Table,
    Cids,
    /// One JSON object per line
    Json,
}

impl ListFormat {
    fn line(self, upload: &Upload) -> anyhow::Result<String> {
        Ok(match self {
            ListFormat::Cids => upload.cid.to_string(),
            ListFormat::Json => serde_json::to_string(upload)?,
            ListFormat::Table => {
                let created = upload
                    .created
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{}  {:<8}  {}  {}",
                    upload.cid,
                    format!("{:?}", upload.state()),
                    created,
                    upload.name.as_deref().unwrap_or("")
                )
            }
        })
    }
}

/// Write a retrieved tree to disk below `output`
fn materialize(root: VirtualFile, output: &Path) -> anyhow::Result<()> {
    if !root.is_dir() {
        return write_file(&root, output);
    }

    let tree = root.clone();
    for entry in root.walk() {
        let entry = entry?;
        let relative = entry.path.trim_start_matches('/');
        let target = output.join(relative);
        if entry.is_dir {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else {
            write_file(&tree.open(relative)?, &target)?;
        }
    }
    Ok(())
}

fn write_file(file: &VirtualFile, target: &Path) -> anyhow::Result<()> {
    if target.exists() {
        bail!("{} already exists", target.display());
    }
    let mut reader = file.reader()?;
    let mut out =
        File::create(target).with_context(|| format!("creating {}", target.display()))?;
    io::copy(&mut reader, &mut out)?;
    Ok(())
}
