use clap::{Parser, Subcommand};
use media_library::library::MediaLibrary;
use media_library::types::{UploadOptions, UploadedFile};
use media_library::{config, output};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Principal recorded for operations started from the command line.
const CLI_ACTOR: &str = "cli";

#[derive(Parser)]
#[command(name = "media-library")]
#[command(about = "Upload media, generate thumbnails and modern formats")]
#[command(long_about = "\
Upload media, generate thumbnails and modern formats

Uploads are validated (size, MIME type, extension), stored under a
collision-resistant name on a configured disk, and recorded with their
dimensions and checksum. Raster images then get one derivative per
configured size plus a copy in a modern format (WebP by default):

  2026/10/beach-1760000000000-a1b2c3d4.jpg             original
  2026/10/beach-1760000000000-a1b2c3d4-thumbnail.jpg   150x150 crop
  2026/10/beach-1760000000000-a1b2c3d4-medium.jpg      fit in 300x300
  2026/10/beach-1760000000000-a1b2c3d4.webp            modern format

SVG, PDF, audio and video are stored as-is and never processed.

Logging goes to stderr and is controlled by RUST_LOG (default: info).

Run 'media-library gen-config' to generate a documented media.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (stock defaults when missing)
    #[arg(long, default_value = "media.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file and, unless told otherwise, process it
    Upload {
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        alt: Option<String>,
        #[arg(long)]
        caption: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        /// Tag id, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Storage disk (configured default otherwise)
        #[arg(long)]
        disk: Option<String>,
        /// Record the upload as made by this user
        #[arg(long = "as", value_name = "USER")]
        as_user: Option<String>,
        /// Store and record only; run `process` later
        #[arg(long)]
        no_process: bool,
    },
    /// Generate missing derivatives for a record
    Process { id: Uuid },
    /// Show one record
    Show { id: Uuid },
    /// List records
    List {
        /// Include soft-deleted records
        #[arg(long)]
        all: bool,
    },
    /// Soft delete a record, or remove it and its files with --force
    Delete {
        id: Uuid,
        #[arg(long)]
        force: bool,
    },
    /// Find stored files no record references, and delete them
    Sweep {
        #[arg(long)]
        disk: Option<String>,
        /// Only report orphans
        #[arg(long)]
        dry_run: bool,
        /// Override storage.orphan_grace_secs for this run
        #[arg(long)]
        grace_secs: Option<u64>,
    },
    /// Print a stock media.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    init_thread_pool(&config.processing);
    let library = MediaLibrary::open(&config)?;

    match cli.command {
        Command::Upload {
            file,
            title,
            alt,
            caption,
            description,
            folder,
            tags,
            disk,
            as_user,
            no_process,
        } => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let upload = UploadedFile::new(name, std::fs::read(&file)?);
            let options = UploadOptions {
                title,
                alt_text: alt,
                caption,
                description,
                folder_id: folder,
                tag_ids: tags.into_iter().collect(),
                disk,
                uploaded_by: as_user,
            };
            let uploaded = library.upload(&upload, &options, CLI_ACTOR, !no_process)?;
            output::print_record(&uploaded.record);
            if let Some(report) = &uploaded.processing {
                output::print_process_report(report);
            }
        }
        Command::Process { id } => {
            let report = library.process(id, CLI_ACTOR)?;
            output::print_process_report(&report);
        }
        Command::Show { id } => {
            output::print_record(&library.show(id, CLI_ACTOR)?);
        }
        Command::List { all } => {
            output::print_list(&library.list(CLI_ACTOR, all)?);
        }
        Command::Delete { id, force } => {
            output::print_deleted(&library.delete(id, force, CLI_ACTOR)?);
        }
        Command::Sweep {
            disk,
            dry_run,
            grace_secs,
        } => {
            let report = match grace_secs {
                Some(secs) => library.sweep_orphans_older_than(
                    disk.as_deref(),
                    dry_run,
                    Duration::from_secs(secs),
                ),
                None => library.sweep_orphans(disk.as_deref(), dry_run),
            }?;
            output::print_sweep(&report);
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
