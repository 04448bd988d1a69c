//! `elib` command line: thin subcommands over the library.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use elib::base_system::config::LayeredConfig;
use elib::base_system::context::{PACKAGE_NAME, Settings};
use elib::base_system::logging::{LogOptions, LogSystem};
use elib::download::{self, DownloadRequest};
use elib::hash::{self, HashMethod};
use elib::paste::{PasteClient, PasteContent};
use elib::run::ExecutableFinder;
use elib::tts::TtsClient;
use elib::updater::{UpdateOutcome, Updater};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "elib", version = VERSION)]
#[command(about = "Download, hash, paste and self-update helpers")]
struct Cli {
    /// Debug output on the console
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Console log level (TRACE, DEBUG, INFO, WARNING, ERROR, CRITICAL)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write a DEBUG log under ./logs
    #[arg(long, default_value_t = false)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a file, optionally checking its digest
    Download {
        url: String,
        outfile: PathBuf,
        #[arg(long)]
        digest: Option<String>,
        #[arg(long)]
        hash_method: Option<String>,
    },
    /// Print the digest of a file
    Hash {
        file: PathBuf,
        #[arg(long)]
        method: Option<String>,
    },
    /// Share files as a glot.io snippet
    Paste {
        title: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = false)]
        public: bool,
        #[arg(long)]
        language: Option<String>,
    },
    /// Save spoken text as MP3
    Tts {
        text: String,
        outfile: PathBuf,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Locate an executable
    Which { name: String },
    /// Replace an executable with the latest GitHub release
    Update {
        /// owner/name
        #[arg(long)]
        repo: String,
        #[arg(long)]
        current_version: String,
        /// Defaults to this executable
        #[arg(long)]
        executable: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LayeredConfig::new(PACKAGE_NAME, Settings::default_pairs())
        .context("load configuration")?;
    let settings = Settings::from_config(&config).context("resolve settings")?;

    let log = init_logging(cli.debug || settings.log_debug, cli.log_to_file || settings.log_to_file)?;
    if let Some(level) = cli.log_level.as_deref() {
        log.set_console_level(level)?;
    }
    debug!(?settings, "settings resolved");

    let result = run_command(cli.command, &settings);
    log.safe_exit();
    result
}

fn run_command(command: Command, settings: &Settings) -> Result<()> {
    match command {
        Command::Download {
            url,
            outfile,
            digest,
            hash_method,
        } => {
            let method = match hash_method {
                Some(name) => name.parse::<HashMethod>()?,
                None => settings.hash_method,
            };
            let request = DownloadRequest::new(url, &outfile)
                .with_digest(digest.as_deref())
                .with_hash_method(method)
                .with_retries(settings.download_retries)
                .with_block_size(settings.block_size);
            if !download::download_with(request) {
                bail!("download failed");
            }
            println!("{}", outfile.display());
        }
        Command::Hash { file, method } => {
            let method = match method {
                Some(name) => name.parse::<HashMethod>()?,
                None => settings.hash_method,
            };
            println!("{}  {}", hash::hash_file(&file, method)?, file.display());
        }
        Command::Paste {
            title,
            files,
            public,
            language,
        } => {
            let contents = files
                .iter()
                .map(|path| {
                    let content = fs::read_to_string(path)
                        .with_context(|| format!("read {}", path.display()))?;
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .ok_or_else(|| anyhow!("not a file: {}", path.display()))?;
                    Ok(PasteContent::new(name, content))
                })
                .collect::<Result<Vec<_>>>()?;
            let url = PasteClient::new()?.create_new_paste(
                &title,
                &contents,
                public,
                language.as_deref(),
            )?;
            println!("{url}");
        }
        Command::Tts {
            text,
            outfile,
            overwrite,
            lang,
        } => {
            let mut client = TtsClient::new()?;
            if let Some(lang) = lang {
                client = client.lang(lang);
            }
            let saved = client.text_to_speech(&text, &outfile, overwrite)?;
            println!("{}", saved.display());
        }
        Command::Which { name } => match ExecutableFinder::new().find(&name) {
            Some(path) => println!("{}", path.display()),
            None => bail!("{name} not found"),
        },
        Command::Update {
            repo,
            current_version,
            executable,
        } => {
            let executable = match executable {
                Some(path) => path,
                None => std::env::current_exe().context("current_exe")?,
            };
            let outcome = Updater::new(repo, current_version, &executable)?.update()?;
            info!(?outcome, "update finished");
            match outcome {
                UpdateOutcome::UpToDate => println!("already up-to-date"),
                UpdateOutcome::Installed(path) => println!("updated {}", path.display()),
                UpdateOutcome::NoRelease => bail!("unable to obtain a release"),
                UpdateOutcome::NoAsset => bail!("no executable asset in the latest release"),
                UpdateOutcome::DownloadFailed => bail!("downloading the update failed"),
            }
        }
    }
    Ok(())
}

fn init_logging(debug: bool, log_to_file: bool) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        console: true,
        log_to_file,
        archive_on_exit: log_to_file,
        ..LogOptions::default()
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}
