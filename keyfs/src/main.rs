use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use keyfs::meta::record::{is_directory, is_symlink};
use keyfs::{FetchBackend, FetchConfig, MetadataRecord};
use tracing::error;

#[derive(Parser)]
#[command(name = "keyfs", version, about = "Inspect keyfs records and remote file indexes")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a remote file to stdout.
    Cat(CatArgs),
    /// List the remote index.
    Ls(RemoteArgs),
    /// Decode a binary metadata record and print it as JSON.
    Inspect(InspectArgs),
}

#[derive(Args)]
struct RemoteArgs {
    /// YAML backend configuration.
    #[arg(long, value_name = "FILE", env = "KEYFS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured base URL.
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
}

#[derive(Args)]
struct CatArgs {
    #[command(flatten)]
    remote: RemoteArgs,

    #[arg(value_name = "PATH")]
    path: String,
}

#[derive(Args)]
struct InspectArgs {
    #[arg(value_name = "RECORD_FILE")]
    record: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "keyfs=info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Cat(args) => cat_cmd(args).await,
        Command::Ls(args) => ls_cmd(args).await,
        Command::Inspect(args) => inspect_cmd(args),
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn open_backend(args: RemoteArgs, prefetch: bool) -> anyhow::Result<FetchBackend> {
    let mut config = match &args.config {
        Some(path) => FetchConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => match args.base_url.clone() {
            Some(url) => FetchConfig::new(url),
            None => FetchConfig::from_default_path().context("no config given")?,
        },
    };
    if let Some(url) = args.base_url {
        config.base_url = url;
    }
    config.disable_prefetch |= !prefetch;

    FetchBackend::from_config(config)
        .await
        .context("failed to open remote backend")
}

async fn cat_cmd(args: CatArgs) -> anyhow::Result<()> {
    let backend = open_backend(args.remote, false).await?;
    let record = backend.stat(&args.path)?;
    if is_directory(record.mode) {
        anyhow::bail!("{} is a directory", args.path);
    }

    let mut buf = vec![0u8; record.size as usize];
    let n = backend.read(&args.path, &mut buf, 0, None).await?;
    std::io::stdout().write_all(&buf[..n])?;
    Ok(())
}

async fn ls_cmd(args: RemoteArgs) -> anyhow::Result<()> {
    let backend = open_backend(args, false).await?;
    let mut out = std::io::stdout().lock();
    for (path, record) in backend.entries() {
        writeln!(out, "{} {:>10} {}", mode_string(&record), record.size, path)?;
    }
    Ok(())
}

fn inspect_cmd(args: InspectArgs) -> anyhow::Result<()> {
    let raw = std::fs::read(&args.record)
        .with_context(|| format!("failed to read {}", args.record.display()))?;
    let record = MetadataRecord::decode(&raw)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn mode_string(record: &MetadataRecord) -> String {
    let kind = if is_directory(record.mode) {
        'd'
    } else if is_symlink(record.mode) {
        'l'
    } else {
        '-'
    };
    let mut s = String::with_capacity(10);
    s.push(kind);
    for shift in [6u16, 3, 0] {
        let bits = (record.mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}
