mod app;
mod error;
mod host;
mod logging;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use updraft_core::{ConnectionReport, InstallResult, UpdateDecision, UpdaterStatus};
use updraft_platform::AppPaths;

use crate::error::CliError;
use crate::settings::UpdaterSettings;

#[derive(Parser)]
#[command(name = "updraft")]
#[command(about = "Keeps a hosted package up to date with its latest published release")]
#[command(version)]
struct Cli {
    /// Keep settings, cache and packages under this directory instead of
    /// the per-user application directories
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the registry for a newer release
    Check {
        /// Ignore the cached release and ask the registry
        #[arg(long)]
        force: bool,
    },

    /// Download and install the latest release if it is newer
    Install,

    /// Forget the cached release and the last check time
    ClearCache,

    /// Probe a repository with the given credentials
    TestConnection {
        #[arg(long)]
        owner: String,

        #[arg(long)]
        repo: String,

        #[arg(long)]
        token: Option<String>,
    },

    /// Show installed version, cache state and identity
    Status,

    /// Check periodically until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let paths = match &cli.root {
        Some(root) => AppPaths::rooted_at(root),
        None => match AppPaths::new() {
            Ok(paths) => paths,
            Err(e) => {
                eprintln!("error: {}", CliError::from(e));
                return ExitCode::FAILURE;
            }
        },
    };
    let settings = UpdaterSettings::load(&paths);
    logging::init_logging(
        &paths,
        cli.verbose || settings.debug_logging,
        settings.max_log_size_bytes,
    );

    match run(cli, &paths, &settings).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, paths: &AppPaths, settings: &UpdaterSettings) -> Result<ExitCode, CliError> {
    let json = cli.json;
    match cli.command {
        Commands::Check { force } => {
            let updater = app::build_updater(paths, settings)?;
            let decision = updater.check_now(force).await;
            emit(json, &decision, render_decision)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Install => {
            let updater = app::build_updater(paths, settings)?;
            let (tx, mut rx) = mpsc::channel::<updraft_host::InstallPhase>(16);
            let printer = tokio::spawn(async move {
                while let Some(phase) = rx.recv().await {
                    // The outcome is rendered from the result.
                    if !json && !phase.is_terminal() {
                        println!("  {phase}");
                    }
                }
            });

            let result = updater.install_update_with_progress(Some(&tx)).await;
            drop(tx);
            let _ = printer.await;

            match result {
                Some(result) => {
                    if result.swapped {
                        app::forget_install_dir(paths, settings)?;
                    }
                    emit(json, &result, render_install)?;
                    Ok(if result.success {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    })
                }
                None => {
                    let decision = updater.check_now(false).await;
                    emit(json, &decision, render_decision)?;
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
        Commands::ClearCache => {
            let updater = app::build_updater(paths, settings)?;
            updater.clear_cache()?;
            if !json {
                println!("Release cache cleared");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::TestConnection { owner, repo, token } => {
            let http = app::http_client(settings)?;
            let updater = app::build_updater_unchecked(paths, settings, http);
            let report = updater.test_connection(&owner, &repo, token).await;
            emit(json, &report, render_connection)?;
            Ok(if report.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Status => {
            let updater = app::build_updater(paths, settings)?;
            emit(json, &updater.status(), render_status)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Watch => {
            let updater = app::build_updater(paths, settings)?;
            let every = check_interval(settings.check_interval_hours);
            let cancel = CancellationToken::new();
            info!("Checking every {}h until interrupted", every.as_secs() / 3600);

            let handle = updraft_core::spawn_periodic(updater.scheduler(), every, cancel.clone());
            let signal = tokio::signal::ctrl_c().await;
            cancel.cancel();
            let _ = handle.await;
            signal.map_err(|e| CliError::io("failed to wait for shutdown signal", e))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// A year between checks is as sparse as `watch` gets.
const MAX_CHECK_INTERVAL_HOURS: u64 = 24 * 365;

fn check_interval(hours: u64) -> Duration {
    Duration::from_secs(
        hours
            .clamp(1, MAX_CHECK_INTERVAL_HOURS)
            .saturating_mul(60 * 60),
    )
}

fn emit<T: Serialize>(json: bool, value: &T, render: fn(&T) -> String) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", render(value));
    }
    Ok(())
}

fn render_decision(decision: &UpdateDecision) -> String {
    let latest = decision.latest_version.as_deref().unwrap_or("unknown");
    let mut out = format!(
        "Installed: {}\nLatest:    {latest}\n",
        decision.current_version
    );
    if decision.update_available {
        out.push_str("Update available");
        if let Some(url) = &decision.package_url {
            out.push_str(&format!(" ({url})"));
        }
    } else if decision.latest_version.is_some() {
        out.push_str("Up to date");
    } else {
        out.push_str("Update status unknown");
    }
    if let Some(diagnostic) = &decision.diagnostic {
        out.push_str(&format!(
            "\nRegistry problem ({}): {}",
            diagnostic.reason, diagnostic.message
        ));
    }
    out
}

fn render_install(result: &InstallResult) -> String {
    let mut out = if result.success {
        format!(
            "Installed {}",
            result.installed_version.as_deref().unwrap_or("unknown version")
        )
    } else {
        format!(
            "Install failed at {}: {}",
            result.phase,
            result.error.as_deref().unwrap_or("unknown error")
        )
    };
    if let Some(backup) = &result.backup_path {
        out.push_str(&format!("\nPrevious version kept at {}", backup.display()));
    }
    if let Some(staged) = &result.staged_path {
        out.push_str(&format!("\nDownloaded package left at {}", staged.display()));
    }
    out
}

fn render_connection(report: &ConnectionReport) -> String {
    let mut out = if report.ok {
        format!("OK: {}", report.message)
    } else {
        format!(
            "FAILED ({}): {}",
            report.reason.as_deref().unwrap_or("unknown"),
            report.message
        )
    };
    if let Some(limit) = &report.rate_limit
        && let Some(remaining) = limit.remaining
    {
        out.push_str(&format!("\nRate limit remaining: {remaining}"));
        if let Some(limit) = limit.limit {
            out.push_str(&format!("/{limit}"));
        }
    }
    out
}

fn render_status(status: &UpdaterStatus) -> String {
    let mut out = format!("Installed version: {}\n", status.current_version);
    out.push_str(&format!(
        "Last checked:      {}\n",
        status
            .last_checked_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
    ));
    match &status.cached_release {
        Some(release) => out.push_str(&format!(
            "Cached release:    {} ({})\n",
            release.version,
            if status.cache_fresh { "fresh" } else { "stale" }
        )),
        None => out.push_str("Cached release:    none\n"),
    }
    out.push_str(&format!(
        "Identifiers:       {} / {}",
        status.identity.actual_identifier, status.identity.canonical_identifier
    ));
    if !status.identity.is_consistent() {
        out.push_str(" (drifted)");
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use clap::Parser;
    use updraft_core::{
        CheckDiagnostic, DecisionSource, InstalledIdentity, UpdateDecision, UpdaterStatus,
    };

    use super::{Cli, Commands, check_interval, render_decision, render_status};

    fn decision(latest: Option<&str>, available: bool) -> UpdateDecision {
        UpdateDecision {
            current_version: "2.5.9".to_string(),
            latest_version: latest.map(str::to_string),
            update_available: available,
            package_url: available.then(|| "https://example.com/pkg.zip".to_string()),
            checked_at: Utc
                .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
            source: DecisionSource::Network,
            diagnostic: None,
        }
    }

    #[test]
    fn cli_parses_subcommands_and_global_flags() {
        let cli = Cli::try_parse_from(["updraft", "check", "--force", "--json"])
            .expect("check should parse");
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Check { force: true }));

        let cli = Cli::try_parse_from([
            "updraft",
            "test-connection",
            "--owner",
            "acme",
            "--repo",
            "clothing-form",
        ])
        .expect("test-connection should parse");
        assert!(matches!(
            cli.command,
            Commands::TestConnection { ref owner, token: None, .. } if owner == "acme"
        ));

        assert!(Cli::try_parse_from(["updraft", "test-connection", "--owner", "acme"]).is_err());
    }

    #[test]
    fn check_interval_is_bounded() {
        assert_eq!(check_interval(0).as_secs(), 3600);
        assert_eq!(check_interval(24).as_secs(), 86_400);
        assert_eq!(check_interval(u64::MAX).as_secs(), 24 * 365 * 3600);
    }

    #[test]
    fn decision_rendering_distinguishes_unknown_from_up_to_date() {
        assert!(render_decision(&decision(Some("2.5.10"), true)).contains("Update available"));
        assert!(render_decision(&decision(Some("2.5.9"), false)).contains("Up to date"));

        let mut unknown = decision(None, false);
        unknown.diagnostic = Some(CheckDiagnostic {
            reason: "not_found".to_string(),
            status: Some(404),
            rate_limit: None,
            message: "registry returned HTTP 404".to_string(),
        });
        let rendered = render_decision(&unknown);
        assert!(rendered.contains("Update status unknown"));
        assert!(rendered.contains("not_found"));
    }

    #[test]
    fn status_rendering_flags_identity_drift() {
        let status = UpdaterStatus {
            current_version: "2.5.9".to_string(),
            last_checked_at: None,
            cached_release: None,
            cache_fresh: false,
            identity: InstalledIdentity {
                actual_identifier: "pkg-2.5.9".to_string(),
                canonical_identifier: "Clothing_Form".to_string(),
            },
            last_decision: None,
        };

        let rendered = render_status(&status);

        assert!(rendered.contains("never"));
        assert!(rendered.contains("pkg-2.5.9 / Clothing_Form (drifted)"));
    }
}
