use anyhow::{Context, Result};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use envpack::{MissingCachePolicy, PackOptions, Packer};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "envpack")]
#[command(author, version, about = "Pack installed environments into relocatable archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack an environment into an archive
    Pack(PackArgs),
}

#[derive(clap::Args)]
struct PackArgs {
    /// Name of the environment, searched in --envs-dir
    #[arg(short, long)]
    name: Option<String>,

    /// Full path to the environment
    #[arg(short, long)]
    prefix: Option<PathBuf>,

    /// Directory containing named environments (repeatable)
    #[arg(long = "envs-dir")]
    envs_dirs: Vec<PathBuf>,

    /// Output archive path (default: <name>.<format>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Archive format: tar.gz, tgz, tar.bz2, tbz2, tar, zip
    #[arg(long)]
    format: Option<String>,

    /// TOML file with pack options; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path the archive will be extracted to, when known
    #[arg(short, long = "dest-prefix")]
    dest_prefix: Option<String>,

    /// Exclude files matching this glob (repeatable, applied in order with --include)
    #[arg(long)]
    exclude: Vec<String>,

    /// Re-add excluded files matching this glob (repeatable)
    #[arg(long)]
    include: Vec<String>,

    /// Additional placeholder prefix to rewrite (repeatable)
    #[arg(long = "extra-placeholder")]
    extra_placeholders: Vec<String>,

    /// Fail instead of writing ZIP64 records
    #[arg(long)]
    no_zip64: bool,

    /// Overwrite an existing output file
    #[arg(short, long)]
    force: bool,

    /// Number of worker threads (default: all cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Fail when package cache entries are missing
    #[arg(long)]
    strict_cache: bool,

    /// Executable used for the finalize stub (default: this executable)
    #[arg(long, hide = true)]
    stub_runner: Option<PathBuf>,

    /// Do not show a progress bar
    #[arg(short, long)]
    quiet: bool,
}

/// Command line of the finalize stub
#[derive(Parser)]
#[command(name = "envpack-unpack")]
#[command(version, about = "Rewrite this environment's prefixes for its current location", long_about = None)]
struct FinalizeCli {}

impl PackArgs {
    fn into_options(self, matches: &ArgMatches) -> Result<PackOptions> {
        let mut options = match &self.config {
            Some(path) => PackOptions::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => PackOptions::default(),
        };

        if self.name.is_some() {
            options.name = self.name;
        }
        if self.prefix.is_some() {
            options.prefix = self.prefix;
        }
        options.envs_dirs.extend(self.envs_dirs);
        if self.output.is_some() {
            options.output = self.output;
        }
        if self.format.is_some() {
            options.format = self.format;
        }
        if self.dest_prefix.is_some() {
            options.dest_prefix = self.dest_prefix;
        }
        options.extra_placeholders.extend(self.extra_placeholders);
        if self.no_zip64 {
            options.zip64 = false;
        }
        options.force |= self.force;
        if self.jobs.is_some() {
            options.jobs = self.jobs;
        }
        if self.strict_cache {
            options.missing_cache = MissingCachePolicy::Raise;
        }
        if self.stub_runner.is_some() {
            options.stub_runner = self.stub_runner;
        }
        options.show_progress = !self.quiet;

        // Filters keep their command line order across --include and --exclude
        let mut filters: Vec<(usize, &str, &String)> = Vec::new();
        for kind in ["include", "exclude"] {
            if let (Some(indices), Some(values)) =
                (matches.indices_of(kind), matches.get_many::<String>(kind))
            {
                filters.extend(indices.zip(values).map(|(i, v)| (i, kind, v)));
            }
        }
        filters.sort_by_key(|(i, _, _)| *i);
        for (_, kind, pattern) in filters {
            options = options.with_filter(kind, pattern.as_str());
        }

        Ok(options)
    }
}

fn init_tracing(default: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn finalize() -> Result<()> {
    FinalizeCli::parse();
    init_tracing("warn");

    let report = envpack::run_from_current_exe()?;
    if let Some(report) = report {
        info!(
            "Finalized {} files at {}",
            report.rewritten,
            report.root.display()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    if envpack::is_finalize_stub() {
        return finalize();
    }

    init_tracing("info");

    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    match cli.command {
        Commands::Pack(args) => {
            let sub = matches
                .subcommand_matches("pack")
                .context("missing pack arguments")?;
            let options = args.into_options(sub)?;
            let output = Packer::new(options).pack()?;

            println!(
                "Packed {} files into {} ({} deferred rewrites)",
                output.file_count,
                output.archive.display(),
                output.deferred
            );
            Ok(())
        }
    }
}
