mod commands;

use clap::{Args, Parser, Subcommand};
use sops_update::{EnvValue, FileValue, Result, StaticValue, Valuer};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sops-update")]
#[command(version)]
#[command(about = "Update keys inside sops-encrypted files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set a key in every encrypted file matching a glob
    Update {
        /// Glob of files to update, relative to the repository root
        #[arg(short, long)]
        file: String,

        /// Dotted path of the key to set, e.g. `app.image.tag`
        #[arg(short, long)]
        key: String,

        #[command(flatten)]
        value: ValueArgs,

        /// Repository root (defaults to the enclosing git working directory)
        #[arg(long)]
        repo: Option<PathBuf>,
    },

    /// Encrypt a plaintext document with a fresh data key
    Encrypt {
        /// Plaintext YAML or JSON document
        input: PathBuf,

        /// age or SSH recipient; may be repeated
        #[arg(long = "age", required = true)]
        recipients: Vec<String>,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a document to stdout
    Decrypt {
        /// Encrypted YAML or JSON document
        input: PathBuf,

        /// Directory to read `.sops-update.toml` from
        #[arg(long)]
        repo: Option<PathBuf>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ValueArgs {
    /// Literal value
    #[arg(long)]
    value: Option<String>,

    /// Read the value from a file relative to the repository root
    #[arg(long)]
    value_file: Option<PathBuf>,

    /// Read the value from an environment variable
    #[arg(long)]
    value_env: Option<String>,
}

impl ValueArgs {
    fn into_valuer(self) -> Box<dyn Valuer> {
        match (self.value, self.value_file, self.value_env) {
            (Some(value), _, _) => Box::new(StaticValue(value)),
            (_, Some(path), _) => Box::new(FileValue(path)),
            (_, _, Some(name)) => Box::new(EnvValue(name)),
            // clap's group guarantees one of them
            (None, None, None) => Box::new(StaticValue(String::new())),
        }
    }
}

fn main() {
    init_tracing();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Update {
            file,
            key,
            value,
            repo,
        } => commands::update(repo.as_deref(), &file, &key, value.into_valuer()),
        Commands::Encrypt {
            input,
            recipients,
            output,
        } => commands::encrypt(&input, &recipients, output.as_deref()),
        Commands::Decrypt { input, repo } => commands::decrypt(&input, repo.as_deref()),
    }
}
