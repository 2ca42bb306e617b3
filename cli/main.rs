use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filevault::{
    config,
    file_crypto::FileCryptoService,
    metadata::{FileSelector, UserId},
    vault::{UploadFile, UploadOptions, UploadOutcome, Vault},
    Algorithm,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// FileVault - per-user encrypted file vault with switchable AEAD ciphers
#[derive(Parser)]
#[command(name = "filevault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file and create the vault directories
    Init {
        /// Object storage directory
        #[arg(long, default_value = "./uploads")]
        storage_dir: String,

        /// Staging directory for migrations
        #[arg(long, default_value = "./staging")]
        staging_dir: String,

        /// Metadata document path
        #[arg(long, default_value = "./vault.json")]
        metadata_path: String,
    },

    /// Register a user
    AddUser { name: String },

    /// Generate the user's secret key (shown once)
    GenKey {
        #[arg(short, long)]
        user: UserId,
    },

    /// Check a secret key against the stored hash
    VerifyKey {
        #[arg(short, long)]
        user: UserId,
        #[arg(short, long)]
        key: String,
    },

    /// Upload one or more files
    Upload {
        #[arg(short, long)]
        user: UserId,

        /// Files to upload
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Encrypt with the user's key and current algorithm
        #[arg(short, long)]
        encrypt: bool,

        /// Secret key (hex), required with --encrypt
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Download a file
    Download {
        #[arg(short, long)]
        user: UserId,

        /// User-visible filename
        filename: String,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Secret key (hex), required for encrypted files
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Delete a file
    Delete {
        #[arg(short, long)]
        user: UserId,

        /// User-visible filename, or storage name with --by-storage-name
        name: String,

        #[arg(long)]
        by_storage_name: bool,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List a user's files
    List {
        #[arg(short, long)]
        user: UserId,

        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// List supported algorithms
    Algos,

    /// Switch the user's algorithm, re-encrypting every encrypted file
    SwitchAlgo {
        #[arg(short, long)]
        user: UserId,

        /// Target algorithm (AES-256 or ChaCha20)
        algorithm: String,

        /// Secret key (hex), required when encrypted files exist
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Encrypt a local file outside the vault
    Seal {
        input: PathBuf,
        output: PathBuf,
        #[arg(short, long)]
        key: String,
        #[arg(short, long, default_value = "AES-256")]
        algorithm: String,
    },

    /// Decrypt a local file produced by `seal`
    Open {
        input: PathBuf,
        output: PathBuf,
        #[arg(short, long)]
        key: String,
        #[arg(short, long, default_value = "AES-256")]
        algorithm: String,
    },

    /// Remove staged plaintext older than the retention window
    SweepStaging {
        /// Keep running, sweeping every N seconds
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },

    /// Show a user's algorithm, key status and storage statistics
    Status {
        #[arg(short, long)]
        user: UserId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG to control log level (e.g. RUST_LOG=info,filevault=debug)
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "FileVault starting");

    match cli.command {
        Commands::Init {
            storage_dir,
            staging_dir,
            metadata_path,
        } => cmd_init(&cli.config, storage_dir, staging_dir, metadata_path).await,
        Commands::AddUser { name } => cmd_add_user(&cli.config, &name).await,
        Commands::GenKey { user } => cmd_gen_key(&cli.config, user).await,
        Commands::VerifyKey { user, key } => cmd_verify_key(&cli.config, user, &key).await,
        Commands::Upload {
            user,
            inputs,
            encrypt,
            key,
        } => cmd_upload(&cli.config, user, &inputs, encrypt, key).await,
        Commands::Download {
            user,
            filename,
            output,
            key,
        } => cmd_download(&cli.config, user, &filename, output.as_ref(), key.as_deref()).await,
        Commands::Delete {
            user,
            name,
            by_storage_name,
            yes,
        } => cmd_delete(&cli.config, user, name, by_storage_name, yes).await,
        Commands::List { user, verbose } => cmd_list(&cli.config, user, verbose).await,
        Commands::Algos => cmd_algos(&cli.config).await,
        Commands::SwitchAlgo {
            user,
            algorithm,
            key,
        } => cmd_switch_algo(&cli.config, user, &algorithm, key.as_deref()).await,
        Commands::Seal {
            input,
            output,
            key,
            algorithm,
        } => cmd_seal(&input, &output, &key, &algorithm).await,
        Commands::Open {
            input,
            output,
            key,
            algorithm,
        } => cmd_open(&input, &output, &key, &algorithm).await,
        Commands::SweepStaging { watch } => cmd_sweep_staging(&cli.config, watch).await,
        Commands::Status { user } => cmd_status(&cli.config, user).await,
    }
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

async fn open_vault(config_path: &str) -> Result<Vault> {
    let cfg = config::Config::load_with_env(Some(config_path))?;
    Vault::open(&cfg)
        .await
        .with_context(|| format!("opening vault from '{}'", config_path))
}

async fn cmd_init(
    config_path: &str,
    storage_dir: String,
    staging_dir: String,
    metadata_path: String,
) -> Result<()> {
    if fs::try_exists(config_path).await.unwrap_or(false) {
        anyhow::bail!(
            "Configuration file '{}' already exists. Remove it first or use a different path.",
            config_path
        );
    }

    let cfg = config::Config::new(storage_dir, staging_dir, metadata_path);
    cfg.validate()?;

    fs::create_dir_all(&cfg.storage_dir)
        .await
        .with_context(|| format!("creating storage directory '{}'", cfg.storage_dir))?;
    fs::create_dir_all(&cfg.staging_dir)
        .await
        .with_context(|| format!("creating staging directory '{}'", cfg.staging_dir))?;

    let config_json = serde_json::to_string_pretty(&cfg)?;
    fs::write(config_path, config_json)
        .await
        .with_context(|| format!("writing config to '{}'", config_path))?;

    println!("Initialization complete!");
    println!("Config:   {}", config_path);
    println!("Storage:  {}", cfg.storage_dir);
    println!("Staging:  {}", cfg.staging_dir);
    println!("Metadata: {}", cfg.metadata_path);
    Ok(())
}

async fn cmd_add_user(config_path: &str, name: &str) -> Result<()> {
    let vault = open_vault(config_path).await?;
    let account = vault.add_user(name).await?;
    println!("Added user '{}' with id {} ({})", account.name, account.id, account.algorithm);
    Ok(())
}

async fn cmd_gen_key(config_path: &str, user: UserId) -> Result<()> {
    let vault = open_vault(config_path).await?;
    let key_hex = vault.generate_key(user).await?;

    println!("{}", key_hex.as_str());
    eprintln!();
    eprintln!("IMPORTANT: This key is shown only once and cannot be recovered.");
    eprintln!("Without it, your encrypted files cannot be decrypted.");
    Ok(())
}

async fn cmd_verify_key(config_path: &str, user: UserId, key: &str) -> Result<()> {
    let vault = open_vault(config_path).await?;
    if vault.verify_key(user, key).await {
        println!("Key is valid");
        Ok(())
    } else {
        anyhow::bail!("Key is not valid for user {}", user)
    }
}

async fn cmd_upload(
    config_path: &str,
    user: UserId,
    inputs: &[PathBuf],
    encrypt: bool,
    key: Option<String>,
) -> Result<()> {
    let vault = open_vault(config_path).await?;

    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        let filename = input
            .file_name()
            .context("input file has no filename")?
            .to_string_lossy()
            .to_string();
        let content = fs::read(input)
            .await
            .with_context(|| format!("reading {:?}", input))?;
        files.push(UploadFile::new(filename, content));
    }

    let spinner = create_spinner(&format!("Uploading {} file(s)...", files.len()));
    let options = UploadOptions {
        encrypted: encrypt,
        key_hex: key,
    };
    let report = vault.upload(user, files, options).await?;
    spinner.finish_with_message(format!(
        "{} uploaded, {} failed",
        report.uploaded(),
        report.failed()
    ));

    for entry in &report.outcomes {
        match &entry.outcome {
            UploadOutcome::Uploaded { storage_name } => {
                println!("  {} -> {}", entry.filename, storage_name)
            }
            UploadOutcome::Failed { reason } => println!("  {} FAILED: {}", entry.filename, reason),
        }
    }

    if report.failed() > 0 {
        anyhow::bail!("{} file(s) failed to upload", report.failed());
    }
    Ok(())
}

async fn cmd_download(
    config_path: &str,
    user: UserId,
    filename: &str,
    output: Option<&PathBuf>,
    key: Option<&str>,
) -> Result<()> {
    let vault = open_vault(config_path).await?;
    let spinner = create_spinner(&format!("Downloading {}...", filename));

    match output {
        Some(output_path) => {
            let bytes = vault.download_to(user, filename, key, output_path).await?;
            spinner.finish_with_message(format!("Wrote {} bytes -> {:?}", bytes, output_path));
        }
        None => {
            let data = vault.download(user, filename, key).await?;
            spinner.finish_and_clear();
            io::stdout().write_all(&data)?;
            eprintln!("Wrote {} bytes to stdout", data.len());
        }
    }
    Ok(())
}

async fn cmd_delete(
    config_path: &str,
    user: UserId,
    name: String,
    by_storage_name: bool,
    yes: bool,
) -> Result<()> {
    let vault = open_vault(config_path).await?;

    if !yes {
        print!("Delete '{}'? This cannot be undone. [y/N]: ", name);
        io::stdout().flush()?;

        let mut response = String::new();
        io::stdin().read_line(&mut response)?;

        if !response.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let selector = if by_storage_name {
        FileSelector::StorageName(name.clone())
    } else {
        FileSelector::Filename(name.clone())
    };
    vault.delete(user, selector).await?;
    println!("Deleted '{}'", name);
    Ok(())
}

async fn cmd_list(config_path: &str, user: UserId, verbose: bool) -> Result<()> {
    let vault = open_vault(config_path).await?;
    let files = vault.list_files(user).await?;

    if files.is_empty() {
        println!("No files found");
        return Ok(());
    }

    println!("Files ({} total):", files.len());
    println!();

    if verbose {
        println!("{:<32} {:<42} {:>10}", "FILENAME", "STORAGE NAME", "ALGORITHM");
        println!("{}", "-".repeat(86));
        for file in files {
            let algorithm = file
                .algorithm
                .map(|a| a.to_string())
                .unwrap_or_else(|| "plain".to_string());
            println!("{:<32} {:<42} {:>10}", file.filename, file.storage_name, algorithm);
        }
    } else {
        for file in files {
            let marker = if file.encrypted { " (encrypted)" } else { "" };
            println!("  {}{}", file.filename, marker);
        }
    }
    Ok(())
}

async fn cmd_algos(config_path: &str) -> Result<()> {
    let vault = open_vault(config_path).await?;
    for algorithm in vault.algorithms() {
        println!("{}", algorithm);
    }
    Ok(())
}

async fn cmd_switch_algo(
    config_path: &str,
    user: UserId,
    algorithm: &str,
    key: Option<&str>,
) -> Result<()> {
    let target: Algorithm = algorithm.parse()?;
    let vault = open_vault(config_path).await?;

    let spinner = create_spinner(&format!("Switching to {}...", target));
    let report = match vault.switch_algorithm(user, target, key).await {
        Ok(report) => report,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };
    spinner.finish_with_message(format!(
        "Algorithm updated to {} ({} file(s) re-encrypted)",
        report.to,
        report.migrated.len()
    ));

    if !report.skipped.is_empty() {
        println!();
        println!(
            "WARNING: {} missing file(s) were left under {}:",
            report.skipped.len(),
            report.from
        );
        for name in &report.skipped {
            println!("  {}", name);
        }
    }
    Ok(())
}

async fn cmd_seal(input: &PathBuf, output: &PathBuf, key: &str, algorithm: &str) -> Result<()> {
    let algorithm: Algorithm = algorithm.parse()?;
    let data = fs::read(input)
        .await
        .with_context(|| format!("reading {:?}", input))?;
    FileCryptoService::new()
        .encrypt_file(&data, output, key, algorithm)
        .await?;
    println!("  {} -> {} ({})", input.display(), output.display(), algorithm);
    Ok(())
}

async fn cmd_open(input: &PathBuf, output: &PathBuf, key: &str, algorithm: &str) -> Result<()> {
    let algorithm: Algorithm = algorithm.parse()?;
    FileCryptoService::new()
        .decrypt_file(input, output, key, algorithm)
        .await?;
    println!("  {} -> {}", input.display(), output.display());
    Ok(())
}

async fn cmd_sweep_staging(config_path: &str, watch: Option<u64>) -> Result<()> {
    let vault = open_vault(config_path).await?;
    let removed = vault.sweep_staging().await?;
    println!("Removed {} expired staged file(s)", removed);

    if let Some(secs) = watch {
        if secs == 0 {
            anyhow::bail!("--watch interval must be at least 1 second");
        }
        println!("Sweeping every {}s, press Ctrl-C to stop", secs);
        vault
            .spawn_staging_janitor(std::time::Duration::from_secs(secs))
            .await
            .context("staging janitor stopped")?;
    }
    Ok(())
}

async fn cmd_status(config_path: &str, user: UserId) -> Result<()> {
    let cfg = config::Config::load_with_env(Some(config_path))?;
    let vault = Vault::open(&cfg).await?;
    let account = vault.account(user).await?;
    let files = vault.list_files(user).await?;

    println!("FileVault Status");
    println!();
    println!("Configuration:");
    println!("  Config file:   {}", config_path);
    println!("  Storage dir:   {}", cfg.storage_dir);
    println!("  Staging dir:   {}", cfg.staging_dir);
    println!("  Metadata:      {}", cfg.metadata_path);
    println!();
    println!("User {} ({}):", account.id, account.name);
    println!("  Algorithm:     {}", account.algorithm);
    println!("  Secret key:    {}", if account.has_key { "Present" } else { "Missing" });
    println!("  Staged files:  {}", vault.staged_files(user).await?);

    let encrypted = files.iter().filter(|f| f.encrypted).count();
    let stale = files
        .iter()
        .filter(|f| f.encrypted && f.algorithm != Some(account.algorithm))
        .count();
    println!("  Files:         {} ({} encrypted)", files.len(), encrypted);

    if stale > 0 {
        println!();
        println!(
            "WARNING: {} encrypted file(s) are not under {}",
            stale, account.algorithm
        );
    }
    Ok(())
}
