use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use securevault::{
    config,
    container,
    file_ops::VaultFileOps,
    kdf::Kdf,
    pepper::Pepper,
    registry::{UserIdentity, UserRegistry},
    VaultEngine, VaultError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use zeroize::Zeroizing;

/// SecureVault - per-user file encryption with Argon2id and XChaCha20-Poly1305
#[derive(Parser)]
#[command(name = "securevault")]
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
    /// Initialize SecureVault (write config and generate the pepper)
    Init {
        /// User registry path
        #[arg(short, long, default_value = "./users.json")]
        registry_path: String,

        /// Output directory for encrypted and decrypted files
        #[arg(short, long, default_value = "./user_data")]
        data_dir: String,

        /// Pepper file path
        #[arg(short, long, default_value = "./securevault.pepper")]
        pepper_path: String,
    },

    /// Create a user account
    Register {
        username: String,

        /// Password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Encrypt a file for a user
    Encrypt {
        /// File to encrypt
        input: PathBuf,

        #[arg(short, long)]
        user: String,

        /// Password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Compress before encryption
        #[arg(long)]
        compress: bool,
    },

    /// Decrypt a container for a user
    Decrypt {
        /// Container to decrypt
        input: PathBuf,

        #[arg(short, long)]
        user: String,

        /// Password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List a user's encrypted and decrypted files
    Files {
        #[arg(short, long)]
        user: String,

        /// Password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Show a container's header without decrypting it
    Inspect {
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG to control log level (e.g., RUST_LOG=info,securevault=debug)
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    info!(command = command_name(&cli.command), "SecureVault starting");

    match cli.command {
        Commands::Init {
            registry_path,
            data_dir,
            pepper_path,
        } => cmd_init(&cli.config, &registry_path, &data_dir, &pepper_path).await,

        Commands::Register { username, password } => {
            cmd_register(&cli.config, &username, password).await
        }

        Commands::Encrypt {
            input,
            user,
            password,
            compress,
        } => cmd_encrypt(&cli.config, &input, &user, password, compress).await,

        Commands::Decrypt {
            input,
            user,
            password,
        } => cmd_decrypt(&cli.config, &input, &user, password).await,

        Commands::Files { user, password } => cmd_files(&cli.config, &user, password).await,

        Commands::Inspect { input } => cmd_inspect(&input).await,
    }
}

/// Subcommand name for logging; arguments may hold a password.
fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Init { .. } => "init",
        Commands::Register { .. } => "register",
        Commands::Encrypt { .. } => "encrypt",
        Commands::Decrypt { .. } => "decrypt",
        Commands::Files { .. } => "files",
        Commands::Inspect { .. } => "inspect",
    }
}

/// Create a spinner for the slow key derivation steps
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_password(password: Option<String>) -> Result<Zeroizing<String>> {
    match password {
        Some(p) => Ok(Zeroizing::new(p)),
        None => Ok(Zeroizing::new(
            rpassword::prompt_password("Password: ").context("reading password")?,
        )),
    }
}

fn file_name_of(input: &Path) -> Result<String> {
    Ok(input
        .file_name()
        .context("input file has no filename")?
        .to_string_lossy()
        .to_string())
}

/// Rejections are shown with their user-facing message only.
fn present(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<VaultError>() {
        Some(e) if e.is_rejection() => anyhow::anyhow!("{}", e.user_message()),
        _ => err,
    }
}

async fn open_ops(config_path: &str, compress: bool) -> Result<VaultFileOps> {
    let cfg = config::Config::load_with_env(Some(config_path))?;

    let mut kdf = Kdf::new(cfg.kdf);
    if let Some(pepper_path) = &cfg.pepper_path {
        let pepper = Pepper::load_or_create(pepper_path).await?;
        kdf = kdf.with_pepper(pepper.as_bytes());
    }

    let engine = VaultEngine::new(kdf).with_compression(cfg.compress || compress);
    let registry = UserRegistry::open(&cfg.registry_path, cfg.kdf).await?;
    Ok(VaultFileOps::new(engine, Arc::new(registry), cfg.data_dir))
}

async fn login(ops: &VaultFileOps, user: &str, password: Option<String>) -> Result<UserIdentity> {
    let password = read_password(password)?;
    let spinner = create_spinner("Verifying credentials...");
    let result = ops.registry().authenticate(user, &password).await;
    spinner.finish_and_clear();
    result
}

/// Write a config file and generate the pepper
async fn cmd_init(
    config_path: &str,
    registry_path: &str,
    data_dir: &str,
    pepper_path: &str,
) -> Result<()> {
    println!("Initializing SecureVault...");

    if fs::try_exists(config_path).await.unwrap_or(false) {
        anyhow::bail!(
            "Configuration file '{}' already exists. Remove it first or use a different path.",
            config_path
        );
    }

    if fs::try_exists(pepper_path).await.unwrap_or(false) {
        anyhow::bail!(
            "Pepper file '{}' already exists. Remove it first or use a different path.",
            pepper_path
        );
    }

    let mut cfg = config::Config::new(registry_path, data_dir);
    cfg.pepper_path = Some(pepper_path.to_string());
    cfg.validate()?;

    fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("creating data directory '{}'", data_dir))?;

    let _pepper = Pepper::load_or_create(pepper_path).await?;

    let config_json = serde_json::to_string_pretty(&cfg)?;
    fs::write(config_path, config_json)
        .await
        .with_context(|| format!("writing config to '{}'", config_path))?;

    println!("Initialization complete!");
    println!("Config:   {}", config_path);
    println!("Registry: {}", registry_path);
    println!("Data:     {}", data_dir);
    println!("Pepper:   {}", pepper_path);
    println!();
    println!("IMPORTANT: Keep your pepper file secure and backed up!");
    println!("Without it, encrypted files cannot be recovered.");

    Ok(())
}

async fn cmd_register(config_path: &str, username: &str, password: Option<String>) -> Result<()> {
    let ops = open_ops(config_path, false).await?;
    let password = read_password(password)?;

    let spinner = create_spinner("Creating account...");
    let result = ops.registry().register(username, &password).await;
    spinner.finish_and_clear();
    result?;

    println!("Account '{}' created", username);
    Ok(())
}

async fn cmd_encrypt(
    config_path: &str,
    input: &Path,
    user: &str,
    password: Option<String>,
    compress: bool,
) -> Result<()> {
    let ops = open_ops(config_path, compress).await?;
    let identity = login(&ops, user, password).await?;

    let name = file_name_of(input)?;
    let data = fs::read(input)
        .await
        .with_context(|| format!("reading {:?}", input))?;
    let size = data.len();

    let spinner = create_spinner(&format!("Encrypting {}...", name));
    let result = ops.encrypt_upload(&identity, &name, Some(data)).await;
    match result {
        Ok(path) => {
            spinner.finish_with_message(format!("Encrypted {} bytes -> {}", size, path.display()));
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(present(e))
        }
    }
}

async fn cmd_decrypt(
    config_path: &str,
    input: &Path,
    user: &str,
    password: Option<String>,
) -> Result<()> {
    let ops = open_ops(config_path, false).await?;
    let identity = login(&ops, user, password).await?;

    let name = file_name_of(input)?;
    let data = fs::read(input)
        .await
        .with_context(|| format!("reading {:?}", input))?;

    let spinner = create_spinner(&format!("Decrypting {}...", name));
    let result = ops.decrypt_upload(&identity, &name, Some(data)).await;
    match result {
        Ok(path) => {
            spinner.finish_with_message(format!("Decrypted -> {}", path.display()));
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(present(e))
        }
    }
}

async fn cmd_files(config_path: &str, user: &str, password: Option<String>) -> Result<()> {
    let ops = open_ops(config_path, false).await?;
    let identity = login(&ops, user, password).await?;

    let files = ops.list_files(&identity).await;
    if files.is_empty() {
        println!("No files recorded for '{}'", identity);
        return Ok(());
    }

    println!("{:<40} {:>10}", "FILENAME", "TYPE");
    println!("{}", "-".repeat(51));
    for record in files {
        println!("{:<40} {:>10}", record.name, record.operation);
    }

    Ok(())
}

async fn cmd_inspect(input: &Path) -> Result<()> {
    let data = fs::read(input)
        .await
        .with_context(|| format!("reading {:?}", input))?;
    let parsed = container::decode(&data)?;
    let layout = parsed.version.layout();

    let hex = |bytes: &[u8]| bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>();

    println!("Container:   {}", input.display());
    println!("Version:     {}", parsed.version.to_byte());
    println!("Compressed:  {}", if parsed.version.is_compressed() { "yes" } else { "no" });
    println!("Salt:        {} ({} bytes)", hex(parsed.salt), layout.salt_len);
    println!("Nonce:       {} ({} bytes)", hex(parsed.nonce), layout.nonce_len);
    println!("Ciphertext:  {} bytes", parsed.ciphertext.len());
    println!("Tag:         {} ({} bytes)", hex(parsed.tag), layout.tag_len);

    Ok(())
}
