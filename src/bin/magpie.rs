use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Parser as _;
use owo_colors::OwoColorize as _;
use tracing::trace;

use magpie::dump::{self, KeyType, MfClassicDump};
use magpie::detect;
use magpie::problems::{self, WriteProblem};

#[derive(clap::Parser, Debug)]
struct Args {
    /// Increase log level.
    #[arg(short, long, action=clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log level.
    #[arg(short, long, action=clap::ArgAction::Count)]
    quiet: u8,

    /// Command.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Check a dump for anything that would block wiping or rewriting the
    /// card it describes.
    Check {
        /// Raw binary dump of the target card (1024 or 4096 bytes).
        file: PathBuf,

        /// Also check this source dump against the target.
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Summarize a dump: layout, UID, per-sector keys and access bytes.
    Info {
        /// Raw binary dump (1024 or 4096 bytes).
        file: PathBuf,
    },

    /// Match a hex-encoded ATS against the known clone fingerprints.
    Ats {
        /// The ATS as hex, eg. 0978009102DABC1910F005.
        ats: String,
    },
}

impl Command {
    pub fn run(&self, _args: &Args) -> Result<()> {
        match self {
            Self::Check { file, source } => self.check(file, source.as_deref()),
            Self::Info { file } => self.info(file),
            Self::Ats { ats } => self.ats(ats),
        }
    }

    fn check(&self, file: &Path, source: Option<&Path>) -> Result<()> {
        let target = load_dump(file)?;
        let target_problems = problems::classify_target_problems(Some(&target));
        print_problems("target", file, target_problems);

        if let Some(path) = source {
            let source = load_dump(path)?;
            let mut source_problems = problems::classify_source_problems(Some(&source));
            source_problems |= problems::check_source_layout(source.kind(), target.kind());
            print_problems("source", path, source_problems);
        }
        Ok(())
    }

    fn info(&self, file: &Path) -> Result<()> {
        let dump = load_dump(file)?;
        println!(
            "{:?}, UID {}, ATQA {}, SAK {:02X}",
            dump.kind(),
            hex::encode_upper(dump.uid()),
            hex::encode_upper(dump.atqa()),
            dump.sak(),
        );
        for sector in 0..dump.kind().total_sectors() {
            let key = |kt| match dump.key(sector, kt) {
                Some(key) => key.to_string(),
                None => "------------".into(),
            };
            let access = match dump.access_bytes(sector) {
                Some(ac) => hex::encode_upper(ac),
                None => "??????".into(),
            };
            println!(
                "{:3}  A {}  B {}  AC {}",
                sector,
                key(KeyType::A),
                key(KeyType::B),
                access,
            );
        }
        Ok(())
    }

    fn ats(&self, ats: &str) -> Result<()> {
        let bytes = hex::decode(ats).context("the ATS must be valid hex")?;
        if detect::match_ats_bytes(&bytes) {
            println!("{}", "known clone fingerprint".green());
        } else {
            println!("{}", "no fingerprint match".red());
        }
        Ok(())
    }
}

fn load_dump(path: &Path) -> Result<MfClassicDump> {
    let data = std::fs::read(path).with_context(|| format!("couldn't read {}", path.display()))?;
    Ok(dump::parse(&data)?)
}

fn print_problems(label: &str, path: &Path, problems: WriteProblem) {
    if problems.is_empty() {
        println!("{} {}: {}", label, path.display(), "ok".green());
        return;
    }
    println!("{} {}:", label, path.display());
    for (flag, text) in [
        (WriteProblem::NO_DATA, "no dump data"),
        (
            WriteProblem::LOCKED_ACCESS_BITS,
            "some access bits are locked and can't be reset",
        ),
        (
            WriteProblem::MISSING_TARGET_KEYS,
            "some sectors have no known key",
        ),
        (
            WriteProblem::MISSING_SOURCE_DATA,
            "some source blocks were never captured and will be skipped",
        ),
        (
            WriteProblem::INCOMPLETE_SOURCE,
            "the source layout covers fewer blocks than the target",
        ),
    ] {
        if problems.contains(flag) {
            println!("  {} {}", "!".red().bold(), text);
        }
    }
}

fn init_logging(args: &Args) {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_max_level(match 2 + args.verbose - args.quiet {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            4.. => tracing::Level::TRACE,
        })
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);
    trace!(?args, "Starting up");
    args.command.run(&args)
}
