//! Wiring settings and platform paths into a ready-to-use [`Updater`].

use std::sync::Arc;
use std::time::Duration;

use log::info;
use updraft_core::{
    BackupSwapper, HostServices, JsonFileStore, RegistryClient, RepoTarget, SystemClock, Updater,
    UpdaterConfig, ZipballFetcher,
};
use updraft_platform::AppPaths;

use crate::error::CliError;
use crate::host::FsHost;
use crate::settings::UpdaterSettings;

pub fn http_client(settings: &UpdaterSettings) -> Result<reqwest::Client, CliError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.http_timeout_secs))
        .user_agent(user_agent())
        .build()?)
}

pub fn user_agent() -> String {
    format!("updraft/{}", env!("CARGO_PKG_VERSION"))
}

pub fn registry_client(settings: &UpdaterSettings, http: reqwest::Client) -> RegistryClient {
    RegistryClient::new(http, user_agent())
        .with_base_url(&settings.registry_base_url)
        .with_accept(&settings.accept_header)
        .with_timeout(Duration::from_secs(settings.http_timeout_secs))
}

/// Build an updater, requiring the repository and package name to be set.
pub fn build_updater(paths: &AppPaths, settings: &UpdaterSettings) -> Result<Updater, CliError> {
    if let Some(field) = settings.missing_field() {
        return Err(CliError::NotConfigured {
            field,
            settings: paths.settings_file(),
        });
    }
    Ok(build_updater_unchecked(paths, settings, http_client(settings)?))
}

/// Once an install has swapped the package into the live directory, the old
/// `install_dir` no longer describes where it lives. Returns whether the
/// settings changed.
pub fn forget_install_dir(paths: &AppPaths, settings: &UpdaterSettings) -> Result<bool, CliError> {
    if settings.install_dir.is_none() {
        return Ok(false);
    }
    let updated = UpdaterSettings {
        install_dir: None,
        ..settings.clone()
    };
    updated
        .save(paths)
        .map_err(|e| CliError::io("failed to save settings", e))?;
    info!("Package now lives in {}", settings.live_dir(paths).display());
    Ok(true)
}

/// Build an updater without validating the configured repository. Used for
/// operations that name their own target, like connection tests.
pub fn build_updater_unchecked(
    paths: &AppPaths,
    settings: &UpdaterSettings,
    http: reqwest::Client,
) -> Updater {
    let live_dir = settings.live_dir(paths);
    let target = RepoTarget::new(&settings.owner, &settings.repo)
        .with_token(settings.auth_token.clone());

    let host = Arc::new(
        FsHost::new(
            live_dir.clone(),
            &settings.manifest_file,
            &settings.canonical_name,
            paths.active_packages_file(),
        )
        .with_fallback_dir(settings.install_dir.clone())
        .with_activation_command(settings.activation_command.clone()),
    );
    let clock = Arc::new(SystemClock);

    let config = UpdaterConfig {
        target,
        live_dir,
        install_path: settings.install_dir.clone(),
        canonical_name: settings.canonical_name.clone(),
        entry_file: settings.entry_file.clone(),
        work_root: paths.work_dir(),
        cache_ttl: Duration::from_secs(settings.cache_ttl_secs),
        debounce: Duration::from_secs(settings.debounce_secs),
    };
    let services = HostServices {
        host,
        record: Arc::new(JsonFileStore::new(paths.version_record_file())),
        store: Arc::new(JsonFileStore::new(paths.release_cache_file())),
        fetcher: Arc::new(
            ZipballFetcher::new(http.clone(), user_agent())
                .with_token(settings.auth_token.clone()),
        ),
        swapper: Arc::new(BackupSwapper::new(clock.clone())),
        source: Arc::new(registry_client(settings, http)),
        clock,
    };

    Updater::new(config, services)
}
