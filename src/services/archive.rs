//! Streaming zip download of a folder.
//!
//! The archive is produced on a spawned task that writes into one end of
//! an in-process pipe while the caller reads the other end, so bytes flow
//! before the last object has been fetched. Only one object body is open
//! at any time.

use super::enumeration::enumerate_all;
use crate::{
    models::{
        entry::{EntryKind, Prefix},
        object::StoreObject,
    },
    store::{ObjectStore, StorageError, StorageResult},
};
use async_zip::{Compression, ZipEntryBuilder, error::ZipError, tokio::write::ZipFileWriter};
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_util::{
    compat::TokioAsyncReadCompatExt,
    sync::{CancellationToken, DropGuard},
};
use tracing::{debug, info, warn};

/// Bytes buffered between the archive task and the reader.
pub const ARCHIVE_PIPE_CAPACITY: usize = 64 * 1024;

const ROOT_ARCHIVE_NAME: &str = "download";

/// A zip archive being produced in the background.
///
/// Dropping it cancels the producer task, even while that task is
/// waiting on the object store.
pub struct ZipDownload {
    pub filename: String,
    reader: DuplexStream,
    _cancel_on_drop: DropGuard,
}

impl AsyncRead for ZipDownload {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

/// Counts reported when an archive task finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub written: usize,
    pub skipped: usize,
}

/// `<folder>.zip`, or `download.zip` for the bucket root.
pub fn archive_filename(prefix: &Prefix) -> String {
    format!("{}.zip", prefix.folder_name().unwrap_or(ROOT_ARCHIVE_NAME))
}

/// Lexically clean a `/` separated path: drop empty and `.` segments and
/// resolve `..` against the preceding segment.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if !rooted => parts.push(".."),
                _ => {}
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Archive path for `key` relative to `prefix`, or an error when the
/// cleaned path is empty or would land outside the archive root.
pub fn sanitize_entry_path(prefix: &str, key: &str) -> StorageResult<String> {
    let relative = key.strip_prefix(prefix).unwrap_or(key);
    let cleaned = clean_path(relative);
    let cleaned = cleaned.trim_start_matches('/');
    if cleaned.is_empty() || cleaned == "." || cleaned.starts_with("..") {
        return Err(StorageError::UnsafeArchivePath(key.to_string()));
    }
    Ok(cleaned.to_string())
}

/// Enumerate `prefix` and start streaming it as a zip archive.
///
/// Listing errors are returned before any byte is produced; later
/// per-object failures are logged and the object skipped.
pub async fn stream_zip(
    store: Arc<dyn ObjectStore>,
    bucket: &str,
    prefix: &Prefix,
) -> StorageResult<ZipDownload> {
    let objects = enumerate_all(store.as_ref(), bucket, prefix.as_str()).await?;
    let (writer, reader) = tokio::io::duplex(ARCHIVE_PIPE_CAPACITY);
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();

    let bucket = bucket.to_string();
    let task_prefix = prefix.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(bucket = %bucket, prefix = task_prefix.as_str(), "archive reader dropped, stopping");
            }
            result = write_archive(store.as_ref(), &bucket, &task_prefix, objects, writer) => {
                match result {
                    Ok(summary) => info!(
                        bucket = %bucket,
                        prefix = task_prefix.as_str(),
                        written = summary.written,
                        skipped = summary.skipped,
                        "archive complete"
                    ),
                    Err(err) => warn!(bucket = %bucket, prefix = task_prefix.as_str(), error = %err, "archive aborted"),
                }
            }
        }
    });

    Ok(ZipDownload {
        filename: archive_filename(prefix),
        reader,
        _cancel_on_drop: guard,
    })
}

fn archive_error(err: ZipError) -> StorageError {
    StorageError::Archive(err.to_string())
}

/// Write every object in `objects` into a zip on `sink`.
pub(crate) async fn write_archive<W>(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &Prefix,
    objects: Vec<StoreObject>,
    sink: W,
) -> StorageResult<ArchiveSummary>
where
    W: AsyncWrite + Unpin,
{
    let mut zip = ZipFileWriter::with_tokio(sink);
    let mut summary = ArchiveSummary::default();

    for object in objects {
        if object.key == prefix.as_str() {
            continue;
        }
        let path = match sanitize_entry_path(prefix.as_str(), &object.key) {
            Ok(path) => path,
            Err(err) => {
                warn!(bucket, key = %object.key, error = %err, "skipping archive entry");
                summary.skipped += 1;
                continue;
            }
        };

        if EntryKind::of_key(&object.key).is_folder() {
            let entry = ZipEntryBuilder::new(format!("{path}/").into(), Compression::Stored);
            zip.write_entry_whole(entry, &[]).await.map_err(archive_error)?;
            summary.written += 1;
            continue;
        }

        let body = match store.get(bucket, &object.key).await {
            Ok(body) => body,
            Err(err) => {
                warn!(bucket, key = %object.key, error = %err, "failed to fetch object for archive");
                summary.skipped += 1;
                continue;
            }
        };

        let entry = ZipEntryBuilder::new(path.into(), Compression::Deflate);
        let mut entry_writer = zip.write_entry_stream(entry).await.map_err(archive_error)?;
        let mut source = body.reader.compat();
        let copied = futures::io::copy(&mut source, &mut entry_writer).await;
        drop(source);
        copied?;
        entry_writer.close().await.map_err(archive_error)?;
        summary.written += 1;
    }

    zip.close().await.map_err(archive_error)?;
    Ok(summary)
}
