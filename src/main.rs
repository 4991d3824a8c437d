use anyhow::Result;
use clap::Parser;
use gmail_cleaner::cli::{self, Cli, Commands, ProgressReporter, RulesCommand};
use gmail_cleaner::config::Config;
use gmail_cleaner::error::CleanerError;
use gmail_cleaner::orchestrator::RunReport;
use gmail_cleaner::rules::RuleStore;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Buffers one log event and prints it through MultiProgress so it lands
/// above any active progress bar
struct LogLineWriter {
    multi: MultiProgress,
    buffer: Vec<u8>,
}

impl Write for LogLineWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&self.buffer);
        let line = line.trim_end_matches('\n');
        if !line.is_empty() {
            self.multi.println(line)?;
        }
        self.buffer.clear();
        Ok(())
    }
}

impl Drop for LogLineWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct LogMakeWriter {
    multi: MultiProgress,
}

impl<'a> MakeWriter<'a> for LogMakeWriter {
    type Writer = LogLineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogLineWriter {
            multi: self.multi.clone(),
            buffer: Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-cleaner --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // aws-lc-rs needs NASM/CMake on Windows, so ring is used there
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let default_directive = if cli.verbose {
        "gmail_cleaner=debug,warn"
    } else {
        "gmail_cleaner=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let multi = MultiProgress::new();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(LogMakeWriter {
            multi: multi.clone(),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let reporter = ProgressReporter::with_multi_progress(multi);

    match cli.command.as_ref().unwrap_or(&Commands::Menu) {
        Commands::Auth { force } => {
            if *force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub =
                gmail_cleaner::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache)
                    .await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(gmail_cleaner::auth::MODIFY_SCOPE)
                .doit()
                .await?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );
            Ok(())
        }

        Commands::Analyze { move_now } => {
            let config = Config::load(&cli.config).await?;
            let store = RuleStore::new(&config.rules);
            let orchestrator = cli::connect(&cli, config, &reporter).await?;
            let move_now = *move_now;
            let report = cli::run_interruptible(|cancel| async move {
                cli::analyze(&orchestrator, &store, &reporter, &cancel, move_now).await
            })
            .await?;
            finish_run(&cli, &report).await?;
            Ok(())
        }

        Commands::Clean { yes } => {
            let config = Config::load(&cli.config).await?;
            let store = RuleStore::new(&config.rules);
            let orchestrator = cli::connect(&cli, config, &reporter).await?;
            let yes = *yes;
            let report = cli::run_interruptible(|cancel| async move {
                cli::clean(&orchestrator, &store, &reporter, &cancel, yes).await
            })
            .await?;
            finish_run(&cli, &report).await?;
            Ok(())
        }

        Commands::Rules { action } => {
            let config = Config::load(&cli.config).await?;
            let store = RuleStore::new(&config.rules);
            match action {
                RulesCommand::List { kind } => cli::list_rules(&store, *kind).await?,
                RulesCommand::Add { kind, entry } => cli::add_rule(&store, *kind, entry).await?,
            }
            Ok(())
        }

        Commands::Check => {
            let config = Config::load(&cli.config).await?;
            let orchestrator = cli::connect(&cli, config, &reporter).await?;
            cli::run_interruptible(|cancel| async move {
                cli::check(&orchestrator, &reporter, &cancel).await
            })
            .await?;
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                return Err(CleanerError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - cleaner.target_folder: label promotional mail is moved to");
            println!("  - cleaner.batch_size: messages per Gmail API call (max 1000)");
            println!("  - rules.*_file: where the sender, subject and domain lists live");
            Ok(())
        }

        Commands::Menu => {
            let config = Config::load(&cli.config).await?;
            let store = RuleStore::new(&config.rules);
            let orchestrator = cli::connect(&cli, config, &reporter).await?;
            cli::run_menu(&orchestrator, &store, &reporter).await?;
            Ok(())
        }
    }
}

/// Save the report if asked to; exit code 2 marks a run with failed batches
async fn finish_run(cli: &Cli, report: &RunReport) -> Result<()> {
    if let Some(path) = &cli.report {
        report.save(path).await?;
        println!("Report saved to {:?}", path);
    }
    if report.has_failures() {
        eprintln!("Some batches failed; see the log above.");
        process::exit(2);
    }
    Ok(())
}

fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {}", cause);
    }

    if let Some(cleaner_err) = error.downcast_ref::<CleanerError>() {
        match cleaner_err {
            CleanerError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      Try running: gmail-cleaner auth --force");
            }
            CleanerError::RateLimitExceeded { .. } | CleanerError::Timeout(_) => {
                eprintln!("\nHint: Gmail is throttling requests.");
                eprintln!("      Wait a few minutes, or lower cleaner.batch_size in config.");
            }
            CleanerError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-cleaner init-config --force");
            }
            CleanerError::Cancelled(_) => {
                eprintln!("\nStopped. Messages labeled before the interrupt stay labeled.");
            }
            _ => {}
        }
    }
}
