// src/fetch.rs

use anyhow::{Context, Result};
use glob::{glob, Pattern};
use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io::{self, Read, Seek},
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// The two files ingestion reads, resolved to paths that exist.
#[derive(Debug, Clone)]
pub struct SourceFiles {
    pub country: PathBuf,
    pub data: PathBuf,
    /// Whether the archive had to be downloaded to produce them.
    pub downloaded: bool,
}

/// True if `dir` already holds at least one `.csv` file.
pub fn has_csv_files<P: AsRef<Path>>(dir: P) -> Result<bool> {
    let pattern = format!("{}/*.csv", Pattern::escape(&dir.as_ref().to_string_lossy()));
    let found = glob(&pattern)
        .with_context(|| format!("invalid glob pattern {}", pattern))?
        .filter_map(|entry| entry.ok())
        .any(|p| p.is_file());
    Ok(found)
}

/// Download the archive unless CSVs are already present, then check that
/// both input files exist.
#[instrument(level = "info", skip(cfg), fields(dir = %cfg.work_dir.display()))]
pub fn ensure_source_files(cfg: &PipelineConfig) -> Result<SourceFiles> {
    fs::create_dir_all(&cfg.work_dir)
        .with_context(|| format!("creating work directory {}", cfg.work_dir.display()))?;

    let mut downloaded = false;
    if !has_csv_files(&cfg.work_dir)? {
        info!(url = %cfg.archive_url, "no CSV files found; downloading dataset");
        let client = Client::builder()
            .timeout(None)
            .build()
            .context("building HTTP client")?;
        let archive = download_archive(&client, &cfg.archive_url, &cfg.work_dir)?;
        extract_and_remove(&archive, &cfg.work_dir)?;
        downloaded = true;
    }

    let country = cfg.country_path();
    let data = cfg.data_path();
    for path in [&country, &data] {
        if !path.is_file() {
            return Err(PipelineError::MissingInput { path: path.clone() }.into());
        }
    }
    info!(country = %country.display(), data = %data.display(), "using source files");

    Ok(SourceFiles {
        country,
        data,
        downloaded,
    })
}

/// Download `url_str` into `dest_dir` under the URL's file name and return the saved path.
pub fn download_archive(client: &Client, url_str: &str, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let url = Url::parse(url_str).with_context(|| format!("parsing archive URL {}", url_str))?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.zip")
        .to_string();
    let dest_path = dest_dir.as_ref().join(filename);

    let mut resp = client
        .get(url.as_str())
        .send()
        .with_context(|| format!("GET {}", url))?
        .error_for_status()?;
    let mut out = File::create(&dest_path)
        .with_context(|| format!("creating {}", dest_path.display()))?;
    let bytes = resp
        .copy_to(&mut out)
        .with_context(|| format!("reading body from {}", url))?;
    info!(path = %dest_path.display(), bytes, "downloaded archive");

    Ok(dest_path)
}

/// Extract the archive at `archive` into `dest_dir`, then delete the archive.
/// A failed delete is logged, not returned.
pub fn extract_and_remove(archive: &Path, dest_dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let names = extract_archive(file, dest_dir)
        .with_context(|| format!("extracting {}", archive.display()))?;
    info!(files = ?names, "files extracted");

    if let Err(e) = fs::remove_file(archive) {
        error!(path = %archive.display(), "failed to delete archive: {}", e);
    } else {
        info!(path = %archive.display(), "deleted archive");
    }
    Ok(names)
}

/// Extract every file entry of a ZIP archive into `dest_dir`, returning the entry names.
pub fn extract_archive<R: Read + Seek>(reader: R, dest_dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let dest_dir = dest_dir.as_ref();
    let mut archive = zip::ZipArchive::new(reader).context("reading ZIP archive")?;
    let mut names = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("accessing ZIP entry #{}", i))?;
        let name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = %name, "skipping entry with unsafe path");
            continue;
        };
        let target = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("creating {}", target.display()))?;
        io::copy(&mut entry, &mut out).with_context(|| format!("writing {}", target.display()))?;
        names.push(name);
    }

    Ok(names)
}
