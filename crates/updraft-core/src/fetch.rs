//! Default download-and-unpack primitive for package archives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use tokio::io::AsyncWriteExt;
use updraft_host::{FetchStage, HostError, PackageFetcher};

const ARCHIVE_NAME: &str = "package.zip";
const EXTRACT_DIR: &str = "extracted";

/// Streams a zip archive to disk and extracts it.
#[derive(Debug, Clone)]
pub struct ZipballFetcher {
    http: reqwest::Client,
    user_agent: String,
    auth_token: Option<String>,
}

impl ZipballFetcher {
    pub fn new(http: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            user_agent: user_agent.into(),
            auth_token: None,
        }
    }

    /// Private repositories need the registry token for zipball downloads.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, HostError> {
        let mut request = self.http.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(token) = &self.auth_token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|error| HostError::fetch_from(FetchStage::Request, error))?;

        if !response.status().is_success() {
            return Err(HostError::fetch(
                FetchStage::Request,
                format!("download failed with status {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| HostError::fetch_from(FetchStage::Download, error))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(downloaded)
    }
}

#[async_trait]
impl PackageFetcher for ZipballFetcher {
    async fn fetch_and_unpack(
        &self,
        package_url: &str,
        work_dir: &Path,
    ) -> Result<PathBuf, HostError> {
        tokio::fs::create_dir_all(work_dir).await?;
        let archive = work_dir.join(ARCHIVE_NAME);

        info!("Downloading package from {package_url}");
        let bytes = self.download(package_url, &archive).await?;
        info!("Download complete: {bytes} bytes");

        let extract_dir = work_dir.join(EXTRACT_DIR);
        let archive_for_task = archive.clone();
        let extract_for_task = extract_dir.clone();
        tokio::task::spawn_blocking(move || extract_zip(&archive_for_task, &extract_for_task))
            .await
            .map_err(|error| {
                HostError::fetch(FetchStage::Extract, format!("extract task failed: {error}"))
            })??;

        let _ = tokio::fs::remove_file(&archive).await;
        package_root(&extract_dir)
    }
}

/// Extract every safe entry of `zip_path` below `dest`.
pub(crate) fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), HostError> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| HostError::fetch_from(FetchStage::Extract, error))?;
    std::fs::create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| HostError::fetch_from(FetchStage::Extract, error))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path");
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut outfile)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    let _ =
                        std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
                }
            }
        }
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}

/// Registry zipballs wrap everything in one `<owner>-<repo>-<sha>/`
/// directory. Return that directory when it is the only entry, otherwise
/// the extraction root itself.
pub(crate) fn package_root(extract_dir: &Path) -> Result<PathBuf, HostError> {
    let entries: Vec<PathBuf> = std::fs::read_dir(extract_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();

    match entries.as_slice() {
        [] => Err(HostError::fetch(FetchStage::Extract, "package archive is empty")),
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(extract_dir.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::path::Path;

    use updraft_host::HostError;

    use super::{extract_zip, package_root};

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let zip_file = std::fs::File::create(path).expect("zip file should be created");
        let mut writer = zip::ZipWriter::new(zip_file);
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);
        for (name, contents) in files {
            writer
                .start_file(*name, options)
                .expect("file entry should be started");
            writer
                .write_all(contents)
                .expect("file entry should be written");
        }
        writer.finish().expect("zip archive should be finalized");
    }

    #[test]
    fn zipball_root_directory_is_returned() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("package.zip");
        let extract_dir = temp.path().join("extracted");
        write_zip(
            &zip_path,
            &[
                ("acme-clothing-form-1a2b3c/VERSION", b"2.5.10"),
                ("acme-clothing-form-1a2b3c/includes/form.php", b"<?php"),
            ],
        );

        extract_zip(&zip_path, &extract_dir).expect("zip should extract");
        let root = package_root(&extract_dir).expect("root should resolve");

        assert_eq!(root, extract_dir.join("acme-clothing-form-1a2b3c"));
        assert_eq!(
            std::fs::read(root.join("VERSION")).expect("extracted file readable"),
            b"2.5.10"
        );
    }

    #[test]
    fn flat_archive_returns_extraction_root() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("package.zip");
        let extract_dir = temp.path().join("extracted");
        write_zip(&zip_path, &[("VERSION", b"1.0.0"), ("main.php", b"<?php")]);

        extract_zip(&zip_path, &extract_dir).expect("zip should extract");

        assert_eq!(
            package_root(&extract_dir).expect("root should resolve"),
            extract_dir
        );
    }

    #[test]
    fn unsafe_entries_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("unsafe.zip");
        let extract_dir = temp.path().join("extract");
        write_zip(
            &zip_path,
            &[("../outside.txt", b"nope"), ("pkg/VERSION", b"1.0.0")],
        );

        extract_zip(&zip_path, &extract_dir).expect("zip extraction should not fail");

        assert!(!temp.path().join("outside.txt").exists());
        assert!(extract_dir.join("pkg/VERSION").exists());
    }

    #[test]
    fn empty_archive_is_an_extract_error() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("empty.zip");
        let extract_dir = temp.path().join("extract");
        write_zip(&zip_path, &[]);

        extract_zip(&zip_path, &extract_dir).expect("empty zip extracts");
        let result = package_root(&extract_dir);

        assert!(matches!(result, Err(HostError::FetchFailed { .. })));
    }

    #[test]
    fn corrupt_archive_is_an_extract_error() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("corrupt.zip");
        std::fs::write(&zip_path, b"not a zip").expect("corrupt archive written");

        let result = extract_zip(&zip_path, &temp.path().join("extract"));

        assert!(matches!(result, Err(HostError::FetchFailed { .. })));
    }
}
