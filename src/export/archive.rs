//! Zip packaging and download streaming

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::error::{ExportError, ExportResult};
use super::workspace::CleanupGuard;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Zip the contents of `source_dir` into `archive_path`.
///
/// Entry names are relative to `source_dir` and use `/` separators.
/// Returns the number of files added.
pub fn create_archive(source_dir: &Path, archive_path: &Path) -> Result<usize> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create archive: {:?}", archive_path))?;

    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut files = 0;
    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", source_dir))?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .context("Failed to calculate relative path")?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)
                .with_context(|| format!("Failed to add directory {}", name))?;
        } else if entry.file_type().is_file() {
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("Failed to add {}", name))?;
            let mut source = File::open(entry.path())
                .with_context(|| format!("Failed to open {:?}", entry.path()))?;
            io::copy(&mut source, &mut zip).with_context(|| format!("Failed to compress {}", name))?;
            files += 1;
        }
    }

    zip.finish().context("Failed to finalize archive")?;
    Ok(files)
}

/// Build the archive on the blocking pool
pub async fn build_archive(source_dir: &Path, archive_path: &Path) -> ExportResult<usize> {
    let source_dir = source_dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();

    let files = tokio::task::spawn_blocking(move || create_archive(&source_dir, &archive_path))
        .await
        .map_err(|e| ExportError::Archive(format!("archive task failed: {}", e)))?
        .map_err(ExportError::archive)?;

    tracing::debug!(files, "Archive created");
    Ok(files)
}

/// Stream the archive as a response body.
///
/// The guard is released once the last chunk has been handed over, or as soon as
/// the client goes away; the body ends only after the workspace is gone.
pub fn stream_archive(archive_path: PathBuf, guard: CleanupGuard) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);

    tokio::spawn(async move {
        match tokio::fs::File::open(&archive_path).await {
            Ok(mut file) => {
                let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
                loop {
                    match file.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                                tracing::info!("Client disconnected during download");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to read archive");
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, archive = %archive_path.display(), "Failed to open archive");
                let _ = tx.send(Err(e)).await;
            }
        }

        guard.finish().await;
        drop(tx);
    });

    Body::from_stream(ReceiverStream::new(rx))
}
