mod config;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    pack_links::{
        forcepack_config, pack_download_url, server_properties_snippet, ForcePackMode,
    },
    upload::{check_upload, format_bytes},
    ConversionEvent, ConversionOutcome, ConversionSessionController, HttpResourcePackApi,
    LoginGate, LoginOutcome, PackUpload, Preflight, ResourcePackApi, TokioTimer,
};
use shared::{
    domain::PackId, pack_format::version_range_for_format, protocol::ResourcePackRecord,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "packctl", about = "Manage and convert Minecraft resource packs")]
struct Args {
    /// Base url of the resource pack API (overrides config and environment).
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true, default_value = "packctl.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List uploaded and converted packs.
    List,
    Show { pack_id: i64 },
    /// Print the SHA-1 the server computed for a pack.
    Hash { pack_id: i64 },
    Conversions { pack_id: i64 },
    /// Convert a pack and follow the job until it settles.
    Convert {
        pack_id: i64,
        target_version: String,
        /// Convert even when this version was already produced.
        #[arg(long)]
        force: bool,
    },
    Delete { pack_id: i64 },
    Upload { path: PathBuf },
    /// Print a ForcePack configuration for a pack.
    Forcepack {
        pack_id: i64,
        /// Render a per-server block instead of the global one.
        #[arg(long)]
        server: Option<String>,
    },
    /// Check demo credentials against the configured ones.
    Login { username: String, password: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = load_settings(&args.config);
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }

    match args.command {
        Command::Login { username, password } => login(&settings, &username, &password),
        Command::List => list(&*connect(&settings)?).await,
        Command::Show { pack_id } => show(&*connect(&settings)?, PackId(pack_id)).await,
        Command::Hash { pack_id } => {
            let hash = connect(&settings)?.pack_hash(PackId(pack_id)).await?;
            println!("{hash}");
            Ok(())
        }
        Command::Conversions { pack_id } => {
            let conversions = connect(&settings)?
                .list_conversions(PackId(pack_id))
                .await?;
            if conversions.is_empty() {
                println!("no conversions for pack {pack_id}");
            }
            for record in &conversions {
                print_row(record);
            }
            Ok(())
        }
        Command::Convert {
            pack_id,
            target_version,
            force,
        } => {
            let api = connect(&settings)?;
            convert(api, &settings, PackId(pack_id), &target_version, force).await
        }
        Command::Delete { pack_id } => {
            connect(&settings)?.delete_pack(PackId(pack_id)).await?;
            println!("deleted pack {pack_id}");
            Ok(())
        }
        Command::Upload { path } => upload(&*connect(&settings)?, path).await,
        Command::Forcepack { pack_id, server } => {
            forcepack(&*connect(&settings)?, PackId(pack_id), server).await
        }
    }
}

fn connect(settings: &Settings) -> Result<Arc<HttpResourcePackApi>> {
    let api = HttpResourcePackApi::new(&settings.api_url)
        .with_context(|| format!("invalid api url '{}'", settings.api_url))?;
    info!(api_url = api.base_url(), "packctl: using api");
    Ok(Arc::new(api))
}

fn login(settings: &Settings, username: &str, password: &str) -> Result<()> {
    let gate = LoginGate::new(settings.login_user.clone(), settings.login_pass.clone());
    match gate.check(username, password) {
        LoginOutcome::Accepted => {
            println!("login accepted");
            Ok(())
        }
        LoginOutcome::Rejected => bail!("invalid credentials"),
        LoginOutcome::NotConfigured => {
            bail!("no demo credentials configured (set LOGIN_USER and LOGIN_PASS)")
        }
    }
}

fn print_row(record: &ResourcePackRecord) {
    let kind = match (&record.target_version, record.source_pack_id()) {
        (Some(version), Some(source)) => format!("-> {version} (from #{source})"),
        (Some(version), None) => format!("-> {version}"),
        _ => "original".to_string(),
    };
    println!(
        "#{:<5} {:<40} {:>10}  {}  {}",
        record.id,
        record.original_filename,
        format_bytes(record.size),
        record.upload_date.format("%Y-%m-%d %H:%M"),
        kind
    );
}

async fn list(api: &HttpResourcePackApi) -> Result<()> {
    let packs = api.list_packs().await?;
    if packs.is_empty() {
        println!("no packs uploaded");
    }
    for record in &packs {
        print_row(record);
    }
    Ok(())
}

async fn show(api: &HttpResourcePackApi, pack_id: PackId) -> Result<()> {
    let pack = api.get_pack(pack_id).await?;
    let url = pack_download_url(api.base_url(), &pack);
    println!("id:          {}", pack.id);
    println!("file:        {}", pack.original_filename);
    println!("size:        {}", format_bytes(pack.size));
    println!("uploaded:    {}", pack.upload_date);
    if let Some(format) = pack.pack_format {
        println!(
            "pack format: {format} ({})",
            version_range_for_format(format)
        );
    }
    if let Some(version) = &pack.target_version {
        println!("converted:   {version}");
    }
    println!("download:    {url}");
    println!();
    println!(
        "{}",
        server_properties_snippet(&url, pack.file_hash.as_deref())
    );
    Ok(())
}

/// Loads a pack from disk, refusing oversized files before reading them.
async fn read_upload(path: &Path) -> Result<PackUpload> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("'{}' has no usable file name", path.display()))?
        .to_string();
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat '{}'", path.display()))?;
    check_upload(&filename, metadata.len())?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    Ok(PackUpload::new(filename, bytes)?)
}

async fn upload(api: &HttpResourcePackApi, path: PathBuf) -> Result<()> {
    let upload = read_upload(&path).await?;
    let record = api.upload_pack(upload).await?;
    println!(
        "uploaded {} as pack {} ({})",
        record.original_filename,
        record.id,
        format_bytes(record.size)
    );
    Ok(())
}

async fn forcepack(
    api: &HttpResourcePackApi,
    pack_id: PackId,
    server: Option<String>,
) -> Result<()> {
    let pack = api.get_pack(pack_id).await?;
    let (mode, conversions) = match server {
        Some(name) => (
            ForcePackMode::Server { name },
            api.list_conversions(pack_id).await?,
        ),
        None => (ForcePackMode::Global, Vec::new()),
    };
    println!(
        "{}",
        forcepack_config(api.base_url(), &pack, &conversions, &mode)?
    );
    Ok(())
}

async fn convert(
    api: Arc<HttpResourcePackApi>,
    settings: &Settings,
    pack_id: PackId,
    target_version: &str,
    force: bool,
) -> Result<()> {
    let base_url = api.base_url().to_string();
    let session = ConversionSessionController::new_with_dependencies(
        api,
        Arc::new(TokioTimer),
        settings.conversion_policy(),
        pack_id,
    );

    if let Preflight::WouldOverwrite(existing) = session.preflight(target_version).await? {
        if !force {
            bail!(
                "pack {pack_id} already has a {target_version} conversion (pack {}); pass --force to convert again",
                existing.id
            );
        }
        warn!(
            existing_pack_id = existing.id.0,
            "packctl: converting again over an existing conversion"
        );
    }

    let mut events = session.events();
    let job = session.start_conversion(target_version).await?;
    println!("job {} accepted: {}", job.id, job.status);

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConversionEvent::JobUpdated { job, .. }) => {
                    println!("job {}: {}", job.id, job.status);
                }
                Ok(ConversionEvent::PollFailed { consecutive_failures, error, .. }) => {
                    eprintln!("status check failed ({consecutive_failures}): {error}");
                }
                Ok(ConversionEvent::Resolved { outcome, .. }) => break outcome,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("conversion session closed unexpectedly"),
            },
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
                bail!("conversion cancelled; job {} keeps running on the server", job.id);
            }
        }
    };

    if let Some(log) = session.snapshot().job.and_then(|job| job.console_log) {
        println!("--- converter output ---");
        print!("{log}");
        if !log.ends_with('\n') {
            println!();
        }
        println!("------------------------");
    }

    match outcome {
        ConversionOutcome::Completed {
            converted_pack: Some(converted),
        } => {
            let url = pack_download_url(&base_url, &converted);
            println!("converted pack {} ready", converted.id);
            println!("download: {url}");
            println!(
                "{}",
                server_properties_snippet(&url, converted.file_hash.as_deref())
            );
            Ok(())
        }
        ConversionOutcome::Completed {
            converted_pack: None,
        } => {
            println!(
                "conversion completed, but no {target_version} pack was listed yet; run `packctl conversions {pack_id}`"
            );
            Ok(())
        }
        ConversionOutcome::Failed { error_message } => {
            bail!("conversion failed: {error_message}")
        }
        ConversionOutcome::TimedOut { elapsed, polls } => bail!(
            "gave up waiting after {}s ({polls} status checks); the job may still finish",
            elapsed.as_secs()
        ),
        ConversionOutcome::Abandoned { last_error } => {
            bail!("lost contact with the server: {last_error}")
        }
    }
}
