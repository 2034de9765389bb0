//! qdenc: QDENC container command-line interface
//!
//! Commands:
//!   encrypt <in> <out>                   - encrypt a file into a QDENC v2 container
//!   decrypt <in> <out>                   - decrypt a container back to plaintext
//!   detect <in>                          - report whether a file is a container (JSON)
//!   estimate <size>                      - predict container overhead (JSON)
//!   share create                         - issue a share token wrapping the file password
//!   share open <token> <record> <in> <out> - unwrap a share record and decrypt
//!   config show                          - display the active configuration
//!
//! Passwords are read from QDENC_PASSWORD or prompted for without echo.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use qdenc_core::QdencConfig;
use qdenc_crypto::share::{
    unwrap_secret_with_iterations, verify_secret_hash, wrap_secret_with_iterations,
};
use qdenc_crypto::{
    decrypt, detect_format, encrypt, estimate_overhead, DecryptOptions, EncryptOptions,
    FileSource, Segment, ShareRecord, ShareToken,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "qdenc",
    version,
    about = "QDENC streaming container tool",
    long_about = "qdenc: encrypt, decrypt, inspect, and share files in the QDENC v2 container format"
)]
struct Cli {
    /// Path to qdenc.toml configuration file
    #[arg(long, short = 'c', env = "QDENC_CONFIG", default_value = "qdenc.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "QDENC_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "QDENC_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file into a container
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// File identity bound into every chunk (must be repeated on decrypt)
        #[arg(long, default_value = "")]
        file_id: String,
        /// Plaintext bytes per chunk (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// PBKDF2 iterations (overrides config)
        #[arg(long)]
        iterations: Option<u32>,
    },

    /// Decrypt a container
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "")]
        file_id: String,
        /// Abort if the plaintext would exceed this many bytes (overrides config)
        #[arg(long)]
        max_bytes: Option<u64>,
    },

    /// Sniff the container magic and version
    Detect { input: PathBuf },

    /// Predict the bytes a container adds for a plaintext of <size> bytes
    Estimate {
        size: u64,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        salt_len: Option<usize>,
    },

    /// Share-link key wrapping
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ShareAction {
    /// Generate a share token and wrap the file password under it
    Create {
        /// Write the share record JSON here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Unwrap a share record with its token and decrypt the container
    Open {
        /// Full share token (public id + secret)
        token: String,
        /// Share record JSON produced by `share create`
        record: PathBuf,
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "")]
        file_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    init_logging(&cli, &config)?;

    match cli.command {
        Commands::Encrypt {
            input,
            output,
            file_id,
            chunk_size,
            iterations,
        } => cmd_encrypt(&config, input, output, file_id, chunk_size, iterations).await,
        Commands::Decrypt {
            input,
            output,
            file_id,
            max_bytes,
        } => {
            let password = read_password("Password: ")?;
            cmd_decrypt(&config, input, output, file_id, max_bytes, password).await
        }
        Commands::Detect { input } => cmd_detect(&input),
        Commands::Estimate {
            size,
            chunk_size,
            salt_len,
        } => cmd_estimate(&config, size, chunk_size, salt_len),
        Commands::Share {
            action: ShareAction::Create { out },
        } => cmd_share_create(&config, out.as_deref()),
        Commands::Share {
            action:
                ShareAction::Open {
                    token,
                    record,
                    input,
                    output,
                    file_id,
                },
        } => cmd_share_open(&config, &token, &record, input, output, file_id).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config + logging ──────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<QdencConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        QdencConfig::from_toml_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(QdencConfig::default())
    }
}

fn init_logging(cli: &Cli, config: &QdencConfig) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None => LogFormat::from_str(&config.log.format, true)
            .map_err(|e| anyhow::anyhow!("log format: {e}"))?,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so JSON command output on stdout stays machine-readable.
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(password) = std::env::var("QDENC_PASSWORD") {
        return Ok(SecretString::from(password));
    }
    let password = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(password))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

/// Chunk-count bar; the length is set once the header is known.
fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `qdenc encrypt` ───────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &QdencConfig,
    input: PathBuf,
    output: PathBuf,
    file_id: String,
    chunk_size: Option<usize>,
    iterations: Option<u32>,
) -> Result<()> {
    let mut options = EncryptOptions::from_config(&config.crypto)?.with_file_id(file_id);
    if let Some(chunk_size) = chunk_size {
        options.chunk_size = chunk_size;
    }
    if let Some(iterations) = iterations {
        options.iterations = iterations;
    }
    options.validate()?;

    let password = read_password("Password: ")?;
    let pb = make_progress_bar(0, "encrypt");
    let pb_task = pb.clone();
    let out_path = output.clone();

    let (chunks, written) = tokio::task::spawn_blocking(move || -> Result<(u32, u64)> {
        let source = FileSource::open(&input)
            .with_context(|| format!("opening {}", input.display()))?;
        let container = encrypt(source, &password, &options)?;
        pb_task.set_length(u64::from(container.total_chunks));

        let file = File::create(&out_path)
            .with_context(|| format!("creating {}", out_path.display()))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;
        for segment in container.stream {
            let segment = segment?;
            writer.write_all(segment.data())?;
            written += segment.data().len() as u64;
            if let Segment::Chunk { .. } = segment {
                pb_task.inc(1);
            }
        }
        writer.flush()?;
        Ok((container.total_chunks, written))
    })
    .await
    .context("encrypt task panicked")?
    .inspect_err(|_| remove_partial(&output))?;

    pb.finish_with_message("done".to_string());
    info!(chunks, bytes = written, output = %output.display(), "encrypted");
    println!("  chunks:  {chunks}");
    println!("  bytes:   {}", fmt_bytes(written));
    println!("  output:  {}", output.display());
    Ok(())
}

// ── `qdenc decrypt` ───────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &QdencConfig,
    input: PathBuf,
    output: PathBuf,
    file_id: String,
    max_bytes: Option<u64>,
    password: SecretString,
) -> Result<()> {
    let mut options = DecryptOptions::from_config(&config.crypto).with_file_id(file_id);
    if max_bytes.is_some() {
        options.max_plaintext_bytes = max_bytes;
    }

    let pb = make_progress_bar(0, "decrypt");
    let pb_task = pb.clone();
    let out_path = output.clone();

    let written = tokio::task::spawn_blocking(move || -> Result<u64> {
        let source = FileSource::open(&input)
            .with_context(|| format!("opening {}", input.display()))?;
        let container = decrypt(source, &password, &options)?;
        pb_task.set_length(u64::from(container.header.total_chunks));

        let file = File::create(&out_path)
            .with_context(|| format!("creating {}", out_path.display()))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;
        for chunk in container.stream {
            let chunk = chunk?;
            writer.write_all(&chunk.data)?;
            written += chunk.data.len() as u64;
            pb_task.inc(1);
        }
        writer.flush()?;
        Ok(written)
    })
    .await
    .context("decrypt task panicked")?
    .inspect_err(|_| remove_partial(&output))?;

    pb.finish_with_message("done".to_string());
    info!(bytes = written, output = %output.display(), "decrypted");
    println!("  bytes:   {}", fmt_bytes(written));
    println!("  output:  {}", output.display());
    Ok(())
}

/// Remove a half-written output so a failed run leaves nothing unauthenticated behind.
fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "could not remove partial output: {e}");
        }
    }
}

// ── `qdenc detect` / `qdenc estimate` ─────────────────────────────────────────

fn cmd_detect(input: &Path) -> Result<()> {
    let source =
        FileSource::open(input).with_context(|| format!("opening {}", input.display()))?;
    let info = detect_format(&source)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn cmd_estimate(
    config: &QdencConfig,
    size: u64,
    chunk_size: Option<usize>,
    salt_len: Option<usize>,
) -> Result<()> {
    let mut options = EncryptOptions::from_config(&config.crypto)?;
    if let Some(chunk_size) = chunk_size {
        options.chunk_size = chunk_size;
    }
    if let Some(salt_len) = salt_len {
        options.salt_len = salt_len;
    }
    let estimate = estimate_overhead(size, &options)?;
    println!("{}", serde_json::to_string_pretty(&estimate)?);
    Ok(())
}

// ── `qdenc share` ─────────────────────────────────────────────────────────────

fn cmd_share_create(config: &QdencConfig, out: Option<&Path>) -> Result<()> {
    let password = read_password("File password: ")?;
    let token = ShareToken::generate();
    let wrapped = wrap_secret_with_iterations(
        token.secret(),
        token.public_id(),
        &password,
        config.share.iterations,
    )?;
    let record = ShareRecord::new(&token, &wrapped);
    let json = record.to_json()?;

    info!(public_id = token.public_id(), "share token issued");
    println!("token: {}", token.to_token().expose_secret());
    match out {
        Some(path) => {
            std::fs::write(path, json.as_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("record: {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_share_open(
    config: &QdencConfig,
    token: &str,
    record_path: &Path,
    input: PathBuf,
    output: PathBuf,
    file_id: String,
) -> Result<()> {
    let token = ShareToken::parse(token)?;
    let content = tokio::fs::read_to_string(record_path)
        .await
        .with_context(|| format!("reading {}", record_path.display()))?;
    let record = ShareRecord::from_json(&content)?;

    if record.public_id != token.public_id() {
        anyhow::bail!(
            "share record is for public id {}, token carries {}",
            record.public_id,
            token.public_id()
        );
    }
    if !verify_secret_hash(token.secret(), &record.secret_hash) {
        anyhow::bail!("share token secret does not match the record");
    }

    let password = unwrap_secret_with_iterations(
        token.secret(),
        token.public_id(),
        &record.wrapped()?,
        config.share.iterations,
    )
    .context("unwrapping file password")?;

    cmd_decrypt(config, input, output, file_id, None, password).await
}

// ── `qdenc config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &QdencConfig, path: &Path) -> Result<()> {
    if path.exists() {
        println!("# config: {}", path.display());
    } else {
        println!("# config: {} (not found, showing defaults)", path.display());
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
