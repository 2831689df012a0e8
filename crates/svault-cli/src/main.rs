//! svault: SecureVault command-line interface
//!
//! Commands:
//!   config show                          - display the effective configuration
//!   keygen --out-dir <dir>               - generate a passphrase-protected RSA key pair
//!   seal <input> --out <blob>            - encrypt a file, writing <blob>.envelope.json
//!   open <blob> --out <file>             - decrypt a sealed file with the master key
//!   pdf sign <in> <out> --key <pem>      - embed a signature in a PDF
//!   pdf verify <in> --pub <pem>          - check an embedded PDF signature
//!
//! The master key is read from the environment variable or file named in the
//! `[master_key]` config section. Private key passphrases come from
//! `SVAULT_PASSPHRASE` or an interactive prompt.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use svault_core::VaultConfig;
use svault_crypto::{
    generate_key_pair, parse_public_key, unlock_private_key, EncryptionMethod, FileRecord,
    KeyPairParams, OwnerCredentials, PdfSigner, Vault, PDF_CONTENT_TYPE,
};

const PUBLIC_KEY_FILE: &str = "public.pem";
const PRIVATE_KEY_FILE: &str = "private.enc.pem";
const PASSPHRASE_ENV: &str = "SVAULT_PASSPHRASE";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "svault",
    version,
    about = "SecureVault file protection",
    long_about = "svault: seal files under envelope keys, manage key pairs, and sign PDFs"
)]
struct Cli {
    /// Path to svault.toml configuration file
    #[arg(long, short = 'c', env = "SVAULT_CONFIG", default_value = "svault.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "SVAULT_LOG_FORMAT")]
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
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate an RSA key pair whose private half is passphrase-encrypted
    Keygen {
        /// Directory receiving public.pem and private.enc.pem
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Encrypt a file under a fresh file key wrapped by the master key
    Seal {
        /// Plaintext input
        input: PathBuf,
        /// Ciphertext output; the envelope goes to <out>.envelope.json
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// cascade, aes-256-cbc, rc4 or des-cbc
        #[arg(long, default_value = "cascade")]
        method: EncryptionMethod,
        /// Content type (default: inferred from the file extension)
        #[arg(long)]
        content_type: Option<String>,
        /// Identifier recorded in the envelope
        #[arg(long, default_value_t = 1)]
        file_id: i64,
        /// Sign PDFs with this encrypted private key before sealing
        #[arg(long)]
        sign_with: Option<PathBuf>,
    },

    /// Decrypt a sealed file with the master key
    Open {
        /// Ciphertext input
        blob: PathBuf,
        /// Plaintext output
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// Envelope sidecar (default: <blob>.envelope.json)
        #[arg(long)]
        record: Option<PathBuf>,
    },

    /// PDF signatures
    Pdf {
        #[command(subcommand)]
        action: PdfAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum PdfAction {
    /// Embed an RSA-PSS signature
    Sign {
        input: PathBuf,
        output: PathBuf,
        /// Encrypted private key (PKCS#8 PEM)
        #[arg(long)]
        key: PathBuf,
    },
    /// Verify the most recent embedded signature
    Verify {
        input: PathBuf,
        /// Signer's public key (SPKI PEM)
        #[arg(long = "pub")]
        public_key: PathBuf,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = VaultConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None if config.logging.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    if !cli.config.exists() {
        warn!("config file not found: {}  (using defaults)", cli.config.display());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "svault starting"
    );

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Keygen { out_dir } => cmd_keygen(&config, &out_dir).await,
        Commands::Seal {
            input,
            out,
            method,
            content_type,
            file_id,
            sign_with,
        } => {
            cmd_seal(
                &config,
                &input,
                &out,
                method,
                content_type,
                file_id,
                sign_with.as_deref(),
            )
            .await
        }
        Commands::Open { blob, out, record } => {
            cmd_open(&config, &blob, &out, record.as_deref()).await
        }
        Commands::Pdf { action: PdfAction::Sign { input, output, key } } => {
            cmd_pdf_sign(&config, &input, &output, &key).await
        }
        Commands::Pdf { action: PdfAction::Verify { input, public_key } } => {
            cmd_pdf_verify(&input, &public_key).await
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn passphrase_from_env() -> Option<SecretString> {
    std::env::var(PASSPHRASE_ENV).ok().map(SecretString::from)
}

/// Take the passphrase from `SVAULT_PASSPHRASE`, or prompt on the terminal.
fn passphrase_or_prompt(prompt: &str) -> Result<SecretString> {
    if let Some(passphrase) = passphrase_from_env() {
        return Ok(passphrase);
    }
    let entered = rpassword::prompt_password(prompt).context("reading passphrase")?;
    Ok(SecretString::from(entered))
}

/// Like `passphrase_or_prompt`, but asks twice when prompting.
fn new_passphrase() -> Result<SecretString> {
    if let Some(passphrase) = passphrase_from_env() {
        return Ok(passphrase);
    }
    let first = rpassword::prompt_password("New passphrase: ").context("reading passphrase")?;
    let second = rpassword::prompt_password("Repeat passphrase: ").context("reading passphrase")?;
    if first != second {
        bail!("passphrases do not match");
    }
    Ok(SecretString::from(first))
}

fn sidecar_path(blob: &Path) -> PathBuf {
    let mut name = blob.as_os_str().to_owned();
    name.push(".envelope.json");
    PathBuf::from(name)
}

fn infer_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => PDF_CONTENT_TYPE,
        Some(ext) if ext.eq_ignore_ascii_case("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

async fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

// ── `svault config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `svault keygen` ───────────────────────────────────────────────────────────

async fn cmd_keygen(config: &VaultConfig, out_dir: &Path) -> Result<()> {
    let passphrase = new_passphrase()?;
    let params = KeyPairParams::from(&config.keys);

    println!("Generating {}-bit RSA key pair...", params.rsa_bits);
    let pair = tokio::task::spawn_blocking(move || generate_key_pair(&passphrase, &params))
        .await
        .context("key generation task panicked")?
        .context("generating key pair")?;

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let public_path = out_dir.join(PUBLIC_KEY_FILE);
    let private_path = out_dir.join(PRIVATE_KEY_FILE);
    write_file(&public_path, &pair.public_key).await?;
    write_file(&private_path, &pair.private_key).await?;

    println!("  public:  {}", public_path.display());
    println!("  private: {} (encrypted)", private_path.display());
    Ok(())
}

// ── `svault seal` / `svault open` ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn cmd_seal(
    config: &VaultConfig,
    input: &Path,
    out: &Path,
    method: EncryptionMethod,
    content_type: Option<String>,
    file_id: i64,
    sign_with: Option<&Path>,
) -> Result<()> {
    let vault = Vault::from_config(config).context("initializing vault")?;
    let data = read_file(input).await?;
    let content_type = content_type.unwrap_or_else(|| infer_content_type(input).to_string());

    let signing_key = match sign_with {
        Some(path) => Some(read_text(path).await?),
        None => None,
    };
    let passphrase = match &signing_key {
        Some(_) => Some(passphrase_or_prompt("Private key passphrase: ")?),
        None => None,
    };
    let owner = signing_key
        .as_deref()
        .zip(passphrase.as_ref())
        .map(|(private_key_pem, passphrase)| OwnerCredentials {
            private_key_pem,
            passphrase,
        });

    let sealed = vault
        .seal_upload(file_id, &data, &content_type, method, owner)
        .with_context(|| format!("sealing {}", input.display()))?;

    let record_path = sidecar_path(out);
    let record = serde_json::to_string_pretty(&sealed.record).context("serializing envelope")?;
    write_file(out, &sealed.ciphertext).await?;
    write_file(&record_path, record).await?;

    println!(
        "sealed: {} -> {} ({} bytes, {}{})",
        input.display(),
        out.display(),
        sealed.ciphertext.len(),
        sealed.record.method,
        if sealed.record.signed { ", signed" } else { "" }
    );
    println!("  envelope: {}", record_path.display());
    Ok(())
}

async fn cmd_open(
    config: &VaultConfig,
    blob: &Path,
    out: &Path,
    record: Option<&Path>,
) -> Result<()> {
    let vault = Vault::from_config(config).context("initializing vault")?;
    let record_path = record.map(Path::to_path_buf).unwrap_or_else(|| sidecar_path(blob));

    let record: FileRecord = serde_json::from_str(&read_text(&record_path).await?)
        .with_context(|| format!("parsing envelope: {}", record_path.display()))?;
    let ciphertext = read_file(blob).await?;

    let plaintext = vault
        .open_as_owner(&record, &ciphertext)
        .with_context(|| format!("opening {}", blob.display()))?;
    write_file(out, &plaintext).await?;

    println!(
        "opened: {} -> {} ({} bytes)",
        blob.display(),
        out.display(),
        plaintext.len()
    );
    Ok(())
}

// ── `svault pdf` ──────────────────────────────────────────────────────────────

async fn cmd_pdf_sign(
    config: &VaultConfig,
    input: &Path,
    output: &Path,
    key: &Path,
) -> Result<()> {
    let document = read_file(input).await?;
    let private_pem = read_text(key).await?;
    let passphrase = passphrase_or_prompt("Private key passphrase: ")?;

    let private = unlock_private_key(&private_pem, &passphrase).context("unlocking private key")?;
    let signed = PdfSigner::for_key_bits(config.keys.rsa_bits)
        .sign(&document, &private)
        .with_context(|| format!("signing {}", input.display()))?;
    write_file(output, &signed).await?;

    println!("signed: {} -> {}", input.display(), output.display());
    Ok(())
}

async fn cmd_pdf_verify(input: &Path, public_key: &Path) -> Result<()> {
    let document = read_file(input).await?;
    let public = parse_public_key(&read_text(public_key).await?)
        .with_context(|| format!("parsing {}", public_key.display()))?;

    let valid = PdfSigner::verify(&document, &public)
        .with_context(|| format!("verifying {}", input.display()))?;
    if !valid {
        bail!("signature INVALID: {}", input.display());
    }
    println!("signature valid: {}", input.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_seal() {
        let cli = Cli::try_parse_from([
            "svault", "seal", "report.pdf", "--out", "report.bin", "--method", "rc4",
        ])
        .unwrap();
        match cli.command {
            Commands::Seal { method, out, .. } => {
                assert_eq!(method.to_string(), "rc4");
                assert_eq!(out, PathBuf::from("report.bin"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_method() {
        let result = Cli::try_parse_from([
            "svault", "seal", "a", "--out", "b", "--method", "blowfish",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/report.bin")),
            PathBuf::from("/tmp/report.bin.envelope.json")
        );
    }

    #[test]
    fn test_infer_content_type() {
        assert_eq!(infer_content_type(Path::new("a.PDF")), PDF_CONTENT_TYPE);
        assert_eq!(infer_content_type(Path::new("notes.txt")), "text/plain");
        assert_eq!(infer_content_type(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_parse_rejects_passphrase_flag() {
        let result = Cli::try_parse_from([
            "svault", "--passphrase", "hunter2", "pdf", "sign", "a.pdf", "b.pdf", "--key", "k.pem",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from([
            "svault", "keygen", "--out-dir", "keys", "--passphrase", "hunter2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_cli_path() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.toml");
        let cli = Cli::try_parse_from([
            "svault", "--config", absent.to_str().unwrap(), "config", "show",
        ])
        .unwrap();
        let config = VaultConfig::load(&cli.config).unwrap();
        assert_eq!(config.keys.rsa_bits, 4096);

        let path = dir.path().join("svault.toml");
        std::fs::write(&path, "[keys]\nrsa_bits = 2048\n").unwrap();
        let cli = Cli::try_parse_from([
            "svault", "-c", path.to_str().unwrap(), "config", "show",
        ])
        .unwrap();
        assert_eq!(VaultConfig::load(&cli.config).unwrap().keys.rsa_bits, 2048);
    }

    #[test]
    fn test_config_rejects_small_modulus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svault.toml");
        std::fs::write(&path, "[keys]\nrsa_bits = 1024\n").unwrap();
        let err = VaultConfig::load(&path).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
