use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cfdi_core::cfdi::Cfdi;
use cfdi_core::comprobante::sign::CfdiSigner;
use cfdi_core::comprobante::validation::SchemaViolation;
use cfdi_core::config::{Config, ResourceSource};
use cfdi_core::diagnostics::dump;
use cfdi_core::keys::{read_certificate, read_private_key};
use cfdi_core::resources::Registry;
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cfdi")]
#[command(about = "Validate, sign and verify CFDI 3.0 invoices")]
struct Cli {
    /// Directory with <version>/schema.json and <version>/cadena.json.
    #[arg(long, global = true, env = "CFDI_RESOURCE_DIR")]
    resources: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report every schema violation.
    Validate {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print the original string.
    OriginalString {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print the digest of the original string.
    Digest {
        #[arg(long)]
        input: PathBuf,
    },
    /// Validate and sign a document.
    Sign {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        key: PathBuf,
        #[arg(long, env = "CFDI_KEY_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
        #[arg(long)]
        cert: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Verify the embedded signature.
    Verify {
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match cli.resources {
        Some(dir) => Config::new(ResourceSource::Directory(dir)),
        None => Config::default(),
    };
    let registry = config.registry().context("failed to load resources")?;

    match cli.command {
        Commands::Validate { input } => {
            let cfdi = load(&input, registry)?;
            let mut violations: Vec<SchemaViolation> = Vec::new();
            let count = cfdi.validate_with(&mut violations)?;
            for violation in &violations {
                println!("{violation}");
            }
            if count > 0 {
                bail!("{} has {count} schema violation(s)", input.display());
            }
            println!("{}: valid", input.display());
        }
        Commands::OriginalString { input } => {
            let cfdi = load(&input, registry)?;
            println!("{}", cfdi.original_string()?);
        }
        Commands::Digest { input } => {
            let cfdi = load(&input, registry)?;
            println!("{}", dump("Digestion", &cfdi.digest()?));
        }
        Commands::Sign {
            input,
            key,
            passphrase,
            cert,
            output,
        } => {
            let mut cfdi = load(&input, registry)?;
            cfdi.validate()
                .with_context(|| format!("{} is not schema-valid", input.display()))?;

            let private_key = read_private_key(&key, &passphrase)
                .with_context(|| format!("failed to load private key {}", key.display()))?;
            let certificate = read_certificate(&cert)
                .with_context(|| format!("failed to load certificate {}", cert.display()))?;
            let signer = CfdiSigner::new(certificate, private_key)?;
            cfdi.sign(&signer)?;

            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    cfdi.write_to(BufWriter::new(file))?;
                    info!(output = %path.display(), "wrote signed document");
                }
                None => cfdi.write_to(io::stdout().lock())?,
            }
        }
        Commands::Verify { input } => {
            let cfdi = load(&input, registry)?;
            cfdi.verify()
                .with_context(|| format!("{} failed verification", input.display()))?;
            println!("{}: signature valid", input.display());
        }
    }

    Ok(())
}

fn load(path: &Path, registry: Arc<Registry>) -> Result<Cfdi> {
    Cfdi::parse_file(path, registry).with_context(|| format!("failed to read {}", path.display()))
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
