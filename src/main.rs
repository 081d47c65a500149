use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use depot::upload::{FileDescriptor, IngestRequest, Ingestor, LocalContentStore, SqliteCatalog};
use depot::{Config, Database, DepotError, Result};

const USAGE: &str = "usage: depot [--config FILE] [--folder PATH] [--replace] FILE...";

struct Args {
    config: PathBuf,
    folder: Option<String>,
    replace: bool,
    files: Vec<PathBuf>,
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut args = Args {
        config: PathBuf::from("config.toml"),
        folder: None,
        replace: false,
        files: Vec::new(),
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = iter.next().ok_or("--config needs a value")?.into(),
            "--folder" => args.folder = Some(iter.next().ok_or("--folder needs a value")?),
            "--replace" => args.replace = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => args.files.push(PathBuf::from(arg)),
        }
    }

    if args.files.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(args)
}

fn load_config(path: &Path) -> Config {
    let mut config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", path.display());
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();
    config
}

async fn describe(path: &Path) -> Result<FileDescriptor> {
    let metadata = tokio::fs::metadata(path).await?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DepotError::Validation(format!("unusable file name: {}", path.display())))?;
    Ok(FileDescriptor::new(name, metadata.len(), path))
}

async fn run(args: Args) -> Result<bool> {
    let config = load_config(&args.config);
    config.validate()?;

    if let Err(e) = depot::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        depot::logging::init_console_only(&config.logging.level);
    }

    info!("Depot - file ingestion");

    let db = Database::open(&config.database.path).await?;
    let catalog = Arc::new(SqliteCatalog::from_database(&db));
    let store = Arc::new(LocalContentStore::new(&config.storage.path)?);

    let folder_path = args
        .folder
        .as_deref()
        .unwrap_or(&config.upload.default_folder);
    let folder = catalog.find_or_make_folder(folder_path).await?;

    // In replace mode the ingestor replaces the record already holding a name.
    let ingestor = Ingestor::from_config(&config, catalog.clone(), store, catalog)?
        .with_default_container(folder)
        .with_replace_file(config.upload.replace_file || args.replace);

    let mut all_committed = true;
    for path in &args.files {
        let result = match describe(path).await {
            Ok(descriptor) => ingestor.ingest(IngestRequest::new(descriptor)).await,
            Err(e) => Err(e),
        };

        let line = match result {
            Ok(outcome) => {
                all_committed &= outcome.is_committed();
                json!({ "source": path, "outcome": outcome })
            }
            Err(e) => {
                all_committed = false;
                error!(source = %path.display(), error = %e, "Ingest failed");
                json!({ "source": path, "error": e.to_string(), "retryable": e.is_retryable() })
            }
        };
        println!("{line}");
    }

    Ok(all_committed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("depot: {e}");
            ExitCode::FAILURE
        }
    }
}
