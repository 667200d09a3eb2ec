//! redstore-ingest - load Reddit archives and build the subreddit catalog
//!
//! Usage:
//!   redstore-ingest <db-path> <submission-collection> <comment-collection> <batch-size>
//!       --submissions <RS_*.bz2...> --comments <RC_*.bz2...>
//!       [--catalog <name>] [--config <config.json>] [--key-by-fullname] [--parallel]
//!
//! Log level via RUST_LOG (default: info).

use std::path::PathBuf;
use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use redstore::{ingest_and_catalog, Config, IngestTargets, SledStore, DEFAULT_CATALOG};

struct Args {
    db_path: PathBuf,
    submissions: String,
    comments: String,
    batch_size: usize,
    submission_files: Vec<PathBuf>,
    comment_files: Vec<PathBuf>,
    catalog: String,
    config: Option<PathBuf>,
    key_by_fullname: bool,
    parallel: bool,
}

fn usage() -> ! {
    eprintln!("Usage: redstore-ingest <db-path> <submission-collection> <comment-collection> <batch-size>");
    eprintln!("           --submissions <files...> --comments <files...>");
    eprintln!("           [--catalog <name>] [--config <json>] [--key-by-fullname] [--parallel]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <db-path>            Store directory (created if missing)");
    eprintln!("  <batch-size>         Archive lines read and inserted at once");
    eprintln!("  --submissions        RS_* archives (.bz2 or .zst)");
    eprintln!("  --comments           RC_* archives (.bz2 or .zst)");
    eprintln!("  --catalog            Catalog collection name (default: {})", DEFAULT_CATALOG);
    eprintln!("  --config             JSON file with store/loader settings");
    eprintln!("  --key-by-fullname    Use record fullnames as store ids (dedupes reloads)");
    eprintln!("  --parallel           Load archive files concurrently");
    std::process::exit(1);
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 4 || args.iter().any(|a| a == "--help" || a == "-h") {
        usage();
    }

    let mut parsed = Args {
        db_path: PathBuf::from(&args[0]),
        submissions: args[1].clone(),
        comments: args[2].clone(),
        batch_size: args[3].parse().with_context(|| format!("invalid batch size '{}'", args[3]))?,
        submission_files: Vec::new(),
        comment_files: Vec::new(),
        catalog: DEFAULT_CATALOG.to_string(),
        config: None,
        key_by_fullname: false,
        parallel: false,
    };

    let mut rest = args[4..].iter().peekable();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--submissions" | "-sfp" | "--comments" | "-cfp" => {
                let mut files = Vec::new();
                while let Some(file) = rest.next_if(|a| !a.starts_with('-')) {
                    files.push(PathBuf::from(file));
                }
                if flag == "--submissions" || flag == "-sfp" {
                    parsed.submission_files = files;
                } else {
                    parsed.comment_files = files;
                }
            }
            "--catalog" => {
                parsed.catalog = rest.next().context("--catalog needs a name")?.clone();
            }
            "--config" => {
                parsed.config = Some(PathBuf::from(rest.next().context("--config needs a path")?));
            }
            "--key-by-fullname" => parsed.key_by_fullname = true,
            "--parallel" => parsed.parallel = true,
            other => bail!("unknown argument '{}'", other),
        }
    }

    if parsed.submission_files.is_empty() || parsed.comment_files.is_empty() {
        bail!("at least one submission file and one comment file are required");
    }
    Ok(parsed)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("reading config {:?}", path))?,
        None => Config::default(),
    };
    config.store.path = args.db_path.clone();
    config.loader.batch_size = args.batch_size;
    config.loader.key_by_fullname |= args.key_by_fullname;
    config.loader.parallel_files |= args.parallel;

    let store = SledStore::open(config.store.clone())
        .with_context(|| format!("opening store {:?}", args.db_path))?;

    let targets = IngestTargets {
        submissions: &args.submissions,
        comments: &args.comments,
        catalog: &args.catalog,
        submission_files: &args.submission_files,
        comment_files: &args.comment_files,
    };
    let report = ingest_and_catalog(&store, &config.loader, &targets)?;

    tracing::info!(
        "Done: {} submissions, {} comments, {} subreddits ({} with comments)",
        report.submissions.inserted(),
        report.comments.inserted(),
        report.catalog.entries,
        report.enrichment.matched
    );
    Ok(())
}
