//! Command-line surface and dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use crate::backend::fs::FsBackend;
use crate::backend::s3::S3Backend;
use crate::backend::Backend;
use crate::checksum::ChecksumAlgorithm;
use crate::config::S3Options;
use crate::error::{AppError, Result};
use crate::repo::Repository;

#[derive(Parser)]
#[command(
    name = "rpmkeeper",
    version,
    about = "Incremental YUM/DNF repository metadata updater",
    arg_required_else_help = true
)]
pub struct Args {
    /// Storage backend for the repository root
    #[arg(long, value_enum, default_value_t = BackendKind::Fs, global = true)]
    pub backend: BackendKind,

    /// Repository root path (fs) or URI (s3://bucket/prefix)
    #[arg(long, global = true)]
    pub repo_root: Option<String>,

    /// S3 endpoint URL for S3-compatible storage (e.g. MinIO)
    #[arg(long, global = true)]
    pub s3_endpoint: Option<String>,

    /// Disable conditional (If-Match) manifest publication
    #[arg(long, global = true)]
    pub s3_no_conditional: bool,

    /// Output format for commands that support it
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output: OutputFormat,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Sign repomd.xml with gpg after every publish
    #[arg(long, global = true)]
    pub sign_repodata: bool,

    /// Re-sign RPMs before adding them
    #[arg(long, global = true)]
    pub sign_rpms: bool,

    /// GPG key ID to sign with (default: gpg's default key)
    #[arg(long, global = true)]
    pub gpg_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Fs,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DuplicatePolicy {
    Error,
    Replace,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialise an empty repository
    Init {
        /// Checksum algorithm for repository metadata
        #[arg(long, default_value = "sha256")]
        checksum: String,

        /// Overwrite an existing repomd.xml
        #[arg(long)]
        force: bool,
    },

    /// Add RPMs to the repository
    #[command(arg_required_else_help = true)]
    Add {
        /// Local RPM files to add
        #[arg(required = true)]
        rpms: Vec<PathBuf>,

        /// Replace packages with the same NEVRA
        #[arg(long)]
        replace_existing: bool,

        /// Behavior when a NEVRA already exists
        #[arg(long, value_enum, default_value_t = DuplicatePolicy::Error)]
        on_duplicate: DuplicatePolicy,

        /// Show planned changes without writing
        #[arg(long)]
        dry_run: bool,

        /// Destination prefix for RPMs inside the repo (default: basename at root)
        #[arg(long, default_value = "")]
        dest_prefix: String,

        /// Preserve unknown metadata types instead of dropping them
        #[arg(
            long,
            default_value_t = true,
            default_missing_value = "true",
            num_args = 0..=1,
            action = ArgAction::Set
        )]
        allow_unknown: bool,
    },

    /// Remove packages from the repository
    #[command(arg_required_else_help = true)]
    Remove {
        /// Package identifiers (filenames, or NEVRAs with --by-nevra)
        #[arg(required = true)]
        ids: Vec<String>,

        /// Treat identifiers as NEVRAs instead of filenames
        #[arg(long)]
        by_nevra: bool,

        /// Also delete the matching RPM files
        #[arg(long)]
        delete_files: bool,

        /// Show planned changes without writing
        #[arg(long)]
        dry_run: bool,

        /// Preserve unknown metadata types instead of dropping them
        #[arg(
            long,
            default_value_t = true,
            default_missing_value = "true",
            num_args = 0..=1,
            action = ArgAction::Set
        )]
        allow_unknown: bool,
    },

    /// Validate repository consistency
    Check {},
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            ctrl_c_cancel.cancel();
        }
    });

    let repo_root = args
        .repo_root
        .clone()
        .ok_or_else(|| AppError::InvalidInput("--repo-root is required".to_string()))?;
    let backend = build_backend(&args, &repo_root).await?;
    let mut repo = Repository::new(backend, cancel);
    repo.sign_repodata = args.sign_repodata;
    repo.sign_rpms = args.sign_rpms;
    repo.gpg_key = args.gpg_key.clone();

    match &args.command {
        Commands::Init { checksum, force } => {
            let alg = ChecksumAlgorithm::parse(checksum)?;
            repo.init(alg, *force).await?;
            println!("initialized repo at {} (checksum: {})", repo_root, alg);
        }

        Commands::Add {
            rpms,
            replace_existing,
            on_duplicate,
            dry_run,
            dest_prefix,
            allow_unknown,
        } => {
            repo.allow_unknown = *allow_unknown;
            repo.dest_prefix = dest_prefix.clone();
            let replace = *replace_existing || *on_duplicate == DuplicatePolicy::Replace;
            let warnings = repo.add(rpms, replace, *dry_run).await?;
            emit_warnings(&warnings);
            for path in rpms {
                if *dry_run {
                    println!("would add {}", path.display());
                } else {
                    println!("added {}", path.display());
                }
            }
        }

        Commands::Remove {
            ids,
            by_nevra,
            delete_files,
            dry_run,
            allow_unknown,
        } => {
            repo.allow_unknown = *allow_unknown;
            let warnings = repo.remove(ids, *by_nevra, *delete_files, *dry_run).await?;
            emit_warnings(&warnings);
            for id in ids {
                if *dry_run {
                    println!("would remove {}", id);
                } else {
                    println!("removed {}", id);
                }
            }
        }

        Commands::Check {} => {
            let report = repo.check().await?;
            if !report.is_ok() {
                return Err(AppError::Integrity(format!(
                    "repository check failed: {}",
                    report.joined_errors()
                )));
            }
            emit_warnings(&report.warnings);
            match args.output {
                OutputFormat::Text => println!("repo ok at {}", repo_root),
                OutputFormat::Json => {
                    let encoded = serde_json::to_string(&report)
                        .map_err(|e| AppError::Internal(format!("encode json: {}", e)))?;
                    println!("{}", encoded);
                }
            }
        }
    }
    Ok(())
}

fn emit_warnings(warnings: &[String]) {
    for w in warnings {
        eprintln!("warn: {}", w);
    }
}

async fn build_backend(args: &Args, repo_root: &str) -> Result<Arc<dyn Backend>> {
    match args.backend {
        BackendKind::Fs => Ok(Arc::new(FsBackend::new(repo_root))),
        BackendKind::S3 => {
            let opts = S3Options::resolve(args.s3_endpoint.clone(), args.s3_no_conditional);
            let backend =
                S3Backend::new(repo_root, opts.endpoint.as_deref(), opts.conditional).await?;
            Ok(Arc::new(backend))
        }
    }
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        "error"
    } else if args.verbose >= 2 {
        "trace"
    } else if args.verbose == 1 {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("rpmkeeper={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_add_defaults() {
        let args = Args::try_parse_from([
            "rpmkeeper",
            "--repo-root",
            "/srv/repo",
            "add",
            "foo.rpm",
        ])
        .unwrap();
        match args.command {
            Commands::Add {
                rpms,
                replace_existing,
                on_duplicate,
                dry_run,
                dest_prefix,
                allow_unknown,
            } => {
                assert_eq!(rpms, vec![PathBuf::from("foo.rpm")]);
                assert!(!replace_existing);
                assert_eq!(on_duplicate, DuplicatePolicy::Error);
                assert!(!dry_run);
                assert_eq!(dest_prefix, "");
                assert!(allow_unknown);
            }
            _ => panic!("expected add"),
        }
        assert_eq!(args.backend, BackendKind::Fs);
        assert_eq!(args.output, OutputFormat::Text);
    }

    #[test]
    fn test_parse_allow_unknown_explicit_false() {
        let args = Args::try_parse_from([
            "rpmkeeper",
            "--repo-root",
            "/srv/repo",
            "add",
            "foo.rpm",
            "--allow-unknown",
            "false",
        ])
        .unwrap();
        match args.command {
            Commands::Add { allow_unknown, .. } => assert!(!allow_unknown),
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_parse_s3_globals() {
        let args = Args::try_parse_from([
            "rpmkeeper",
            "--backend",
            "s3",
            "--repo-root",
            "s3://bucket/repo",
            "--s3-endpoint",
            "http://localhost:9000",
            "--s3-no-conditional",
            "check",
        ])
        .unwrap();
        assert_eq!(args.backend, BackendKind::S3);
        assert!(args.s3_no_conditional);
        assert!(matches!(args.command, Commands::Check {}));
    }

    #[test]
    fn test_parse_remove_by_nevra() {
        let args = Args::try_parse_from([
            "rpmkeeper",
            "--repo-root",
            "/srv/repo",
            "remove",
            "foo-1.0-1.x86_64",
            "--by-nevra",
            "--delete-files",
        ])
        .unwrap();
        match args.command {
            Commands::Remove {
                ids,
                by_nevra,
                delete_files,
                ..
            } => {
                assert_eq!(ids, vec!["foo-1.0-1.x86_64".to_string()]);
                assert!(by_nevra);
                assert!(delete_files);
            }
            _ => panic!("expected remove"),
        }
    }

    #[test]
    fn test_add_requires_rpm_operand() {
        assert!(
            Args::try_parse_from(["rpmkeeper", "--repo-root", "/srv/repo", "add"]).is_err()
        );
    }

    #[test]
    fn test_init_checksum_flag() {
        let args = Args::try_parse_from([
            "rpmkeeper",
            "--repo-root",
            "/srv/repo",
            "init",
            "--checksum",
            "sha512",
            "--force",
        ])
        .unwrap();
        match args.command {
            Commands::Init { checksum, force } => {
                assert_eq!(checksum, "sha512");
                assert!(force);
            }
            _ => panic!("expected init"),
        }
    }
}
