//! cloudsh: move files to and from a cloudsh storage account.

mod config;
mod progress;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cloudsh_transfer::{ByteSource, Scope, TransferClient, TransferError, TransferRequest};
use tokio::fs::OpenOptions;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;
use crate::progress::ProgressLine;

#[derive(Debug, Parser)]
#[command(name = "cloudsh", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
struct Cli {
    /// Metadata API root, overriding the config file.
    #[arg(long, global = true, env = "CLOUDSH_BASE_URL")]
    base_url: Option<String>,

    /// Access token, overriding the config file.
    #[arg(long, global = true, env = "CLOUDSH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Workspace to register uploads in.
    #[arg(long, global = true)]
    workspace: Option<i64>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store the API root and access token in the config file.
    Login(LoginArgs),
    /// Upload a local file.
    #[command(alias = "put")]
    Upload(UploadArgs),
    /// Download a file entry by its handle.
    #[command(alias = "get")]
    Download(DownloadArgs),
    /// Ask the server whether a download can be resumed.
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
struct LoginArgs {
    /// Access token issued by the service.
    token: String,
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// Local file, or `-` for stdin.
    path: PathBuf,

    /// Name to register; defaults to the file name.
    #[arg(long)]
    name: Option<String>,

    /// Parent folder id.
    #[arg(long)]
    parent: Option<i64>,

    /// Upload into the vault. The file must already be encrypted with this IV.
    #[arg(long, value_name = "IV")]
    vault_iv: Option<String>,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// Download handle of the file entry.
    handle: String,

    /// Destination path.
    out: PathBuf,

    /// Continue a partial download already present at `out`.
    #[arg(long)]
    resume: bool,
}

#[derive(Debug, Args)]
struct ProbeArgs {
    handle: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn report(e: &anyhow::Error) -> ExitCode {
    let transfer = e.chain().find_map(|c| c.downcast_ref::<TransferError>());
    match transfer {
        Some(t) if t.is_auth_expired() => {
            eprintln!("Your session has expired. Run `cloudsh login <token>` to sign in again.");
            ExitCode::from(3)
        }
        Some(t) if t.is_cancelled() => {
            eprintln!("Cancelled.");
            ExitCode::from(130)
        }
        _ => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = CliConfig::load()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(token) = cli.token {
        config.access_token = token;
    }
    if let Some(workspace) = cli.workspace {
        config.workspace_id = workspace;
    }

    if let Command::Login(args) = cli.cmd {
        config.access_token = args.token;
        config.save()?;
        println!("Saved credentials to {}", config::config_path()?.display());
        return Ok(());
    }

    if config.base_url.is_empty() {
        anyhow::bail!("no API base URL; pass --base-url or run `cloudsh login` with --base-url");
    }

    let client = TransferClient::new(
        config.base_url.clone(),
        config.access_token.clone(),
        config.transfer_config(),
    )?;

    let cancel = client.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    match cli.cmd {
        Command::Upload(args) => upload(&client, &config, args).await,
        Command::Download(args) => download(&client, args).await,
        Command::Probe(args) => probe(&client, &args.handle).await,
        Command::Login(_) => Ok(()),
    }
}

async fn upload(client: &TransferClient, config: &CliConfig, args: UploadArgs) -> anyhow::Result<()> {
    let from_stdin = args.path == Path::new("-");
    let name = match args.name {
        Some(name) => name,
        None if from_stdin => anyhow::bail!("--name is required when reading stdin"),
        None => args
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("cannot derive a name from the path; pass --name")?,
    };

    let source = if from_stdin {
        ByteSource::sequential(std::io::stdin())
    } else {
        ByteSource::file(&args.path)
            .with_context(|| format!("failed to open {}", args.path.display()))?
    };

    let scope = match args.vault_iv {
        Some(iv) => Scope::Vault { iv },
        None => Scope::Workspace(config.workspace_id),
    };

    let line = ProgressLine::new(format!("upload {name}"));
    let request = TransferRequest::new(source, name)?
        .with_parent(args.parent)
        .with_scope(scope)
        .with_progress(line.callback());

    let result = client.upload(request).await;
    line.finish();
    let outcome = result?;

    println!(
        "{}  id={}  size={}  handle={}",
        outcome.entry.name, outcome.entry.id, outcome.size, outcome.entry.hash
    );
    Ok(())
}

async fn download(client: &TransferClient, args: DownloadArgs) -> anyhow::Result<()> {
    let existing = existing_len(&args.out).await?;

    let mut offset = 0;
    if args.resume && existing > 0 {
        let support = client.probe(&args.handle).await?;
        if support.accepts_ranges {
            offset = existing;
        } else {
            tracing::warn!(
                handle = %args.handle,
                "server does not accept ranges, downloading from the start"
            );
        }
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(offset == 0)
        .open(&args.out)
        .await
        .with_context(|| format!("failed to open {}", args.out.display()))?;

    let line = ProgressLine::new(format!("download {}", args.handle));
    let result = client
        .download(&args.handle, &mut file, Some(line.callback()), offset)
        .await;
    line.finish();
    let outcome = result?;

    // A restart after a refused range may leave stale bytes past the end.
    file.set_len(outcome.total_size).await?;

    let how = if outcome.resumed { "resumed" } else { "downloaded" };
    println!(
        "{how} {} ({} bytes written, {} total)",
        args.out.display(),
        outcome.bytes_written,
        outcome.total_size
    );
    Ok(())
}

/// Length of a partial download already at `path`; 0 when nothing is there.
async fn existing_len(path: &Path) -> anyhow::Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e).with_context(|| format!("failed to inspect {}", path.display())),
    }
}

async fn probe(client: &TransferClient, handle: &str) -> anyhow::Result<()> {
    let support = client.probe(handle).await?;
    let length = support
        .content_length
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());
    println!("ranges: {}  length: {length}", if support.accepts_ranges { "yes" } else { "no" });
    Ok(())
}
