use anyhow::Result;
use clap::Parser;
use gmail_sweep::auth::CredentialProvider;
use gmail_sweep::cli::{self, Cli, Commands, ProgressReporter};
use gmail_sweep::config::Config;
use gmail_sweep::error::GmailError;
use gmail_sweep::transport::{MAIL_SCOPE, USER_ID};
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: gmail-sweep --help");
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

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_sweep=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_sweep=info,warn"))
    };

    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    if let Commands::InitConfig { output, force } = &cli.command {
        if output.exists() && !force {
            return Err(GmailError::ConfigError(format!(
                "Configuration file already exists at {:?}. Use --force to overwrite.",
                output
            ))
            .into());
        }

        Config::create_example(output).await?;

        println!("Created example configuration file at: {:?}", output);
        println!("\nKey settings to review:");
        println!("  - fetch.page_size: items requested per list call (max 500)");
        println!("  - quota.units_per_second: sustained Gmail quota budget");
        println!("  - mutation.max_rounds: upper bound on drain rounds");
        return Ok(());
    }

    let mut config = Config::load(&cli.config).await?;
    cli.apply_overrides(&mut config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current call");
            ctrl_c.cancel();
        }
    });

    if let Commands::Auth { force } = &cli.command {
        tracing::info!("Authenticating with Gmail API...");
        let provider = CredentialProvider::authorize(&config.auth, &config.quota, *force).await?;

        let (_, profile) = provider
            .hub()
            .users()
            .get_profile(USER_ID)
            .add_scope(MAIL_SCOPE)
            .doit()
            .await
            .map_err(GmailError::from)?;
        println!("Successfully authenticated with Gmail API");
        println!(
            "Connected to account: {}",
            profile.email_address.unwrap_or_default()
        );
        println!(
            "Refresh token stored at: {:?}",
            config.auth.refresh_token_path
        );
        return Ok(());
    }

    let reporter = ProgressReporter::with_multi_progress((*multi_progress).clone());
    let auth_spinner = reporter.add_spinner("Connecting to Gmail API...");
    let provider = CredentialProvider::from_config(&config.auth, &config.quota).await?;
    let transport = provider.authorized_transport();
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

    match &cli.command {
        Commands::Search {
            filter,
            max,
            threads,
        } => cli::run_search(&transport, &config, filter, *max, *threads, &cancel).await?,

        Commands::Show { id, thread, full } => {
            cli::run_show(&transport, &config, id, *thread, *full, &cancel).await?
        }

        Commands::Drain {
            filter,
            action,
            max_rounds,
            dry_run,
        } => {
            cli::run_drain(
                &transport,
                &config,
                filter,
                action,
                *max_rounds,
                *dry_run,
                &cancel,
                &reporter,
            )
            .await?
        }

        Commands::Modify {
            id,
            action,
            untrash,
            thread,
        } => cli::run_modify(&transport, &config, id, action, *untrash, *thread).await?,

        Commands::Labels {
            create,
            text_color,
            background_color,
        } => cli::run_labels(&transport, create.as_deref(), text_color, background_color).await?,

        Commands::Auth { .. } | Commands::InitConfig { .. } => {}
    }

    Ok(())
}
