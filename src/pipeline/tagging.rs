//! Tagging pipeline
//!
//! Resolves catalog metadata for a converted artifact, writes it into the
//! container's tag dictionary, relocates the artifact into the canonical
//! library tree, writes companion descriptor files, and reclaims the
//! conversion-time backups. Only the mandatory path (record lookup, tag save,
//! primary move, record write) is fatal; cover download, sidecars and backup
//! reclamation degrade gracefully.

use crate::config::Config;
use crate::db::{JobStatus, JobStore, JobUpdate, TaggedFileStore};
use crate::error::{Error, Result};
use crate::pipeline::convert::move_file;
use crate::pipeline::sidecars;
use crate::services::backup::BackupManager;
use crate::services::catalog::{BookMetadata, CatalogClient};
use chrono::Utc;
use lofty::config::WriteOptions;
use lofty::mp4::{Atom, AtomData, AtomIdent, Ilst};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::tag::TagExt;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Orchestrates tagging jobs against the external catalog
pub struct TaggingPipeline {
    config: Arc<Config>,
    jobs: JobStore,
    files: TaggedFileStore,
    backups: BackupManager,
    catalog: Arc<CatalogClient>,
}

impl TaggingPipeline {
    pub fn new(config: Arc<Config>, pool: SqlitePool, catalog: Arc<CatalogClient>) -> Self {
        let backups = BackupManager::new(config.backup_dir());
        Self {
            config,
            jobs: JobStore::new(pool.clone()),
            files: TaggedFileStore::new(pool),
            backups,
            catalog,
        }
    }

    /// Run one tagging job to a terminal state. Synchronous entry point;
    /// dispatch wraps it in a spawned task.
    pub async fn run(&self, job_id: Uuid, file_id: Uuid, asin: &str, locale: Option<&str>) {
        if let Err(e) = self
            .jobs
            .update(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    start_time: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "Failed to mark tagging job running");
            return;
        }

        let outcome = self.execute(file_id, asin, locale).await;

        let update = match outcome {
            Ok(Some(new_path)) => {
                tracing::info!(job_id = %job_id, path = %new_path.display(), "Tagging completed");
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    output_path: Some(new_path.to_string_lossy().to_string()),
                    end_time: Some(Utc::now()),
                    ..Default::default()
                }
            }
            Ok(None) => {
                tracing::info!(job_id = %job_id, asin, "No catalog match; nothing applied");
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    log: Some(format!("No catalog record found for {}", asin)),
                    end_time: Some(Utc::now()),
                    ..Default::default()
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Tagging failed");
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    log: Some(e.to_string()),
                    end_time: Some(Utc::now()),
                    ..Default::default()
                }
            }
        };

        if let Err(e) = self.jobs.update(job_id, update).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record tagging outcome");
        }
    }

    async fn execute(
        &self,
        file_id: Uuid,
        asin: &str,
        locale: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        let Some(metadata) = self.catalog.fetch_details(asin, locale).await? else {
            return Ok(None);
        };

        let new_path = self.apply_metadata(file_id, &metadata).await?;
        Ok(Some(new_path))
    }

    /// Apply resolved metadata to a converted artifact: embed tags, file it
    /// into the library, write sidecars, update the record, reclaim backups.
    pub async fn apply_metadata(&self, file_id: Uuid, metadata: &BookMetadata) -> Result<PathBuf> {
        let record = self
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No tagged file with id {}", file_id)))?;

        let source_path = PathBuf::from(&record.file_path);
        if !source_path.exists() {
            return Err(Error::NotFound(format!(
                "Artifact no longer exists: {}",
                record.file_path
            )));
        }

        // Cover download degrades gracefully; tagging continues without it
        let cover_path = self.download_cover(metadata).await;

        // Tag rewrite, library move and sidecars are all filesystem-bound and
        // can churn for a while on big artifacts, so they run as one blocking
        // task off the async runtime.
        let library_root = self.config.library_dir();
        let meta = metadata.clone();
        let src = source_path.clone();
        let cover = cover_path.clone();
        let destination = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            write_tags(&src, &meta, cover.as_deref())?;

            let target = library_destination(&library_root, &meta);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let filed = move_with_encoding_fallback(&src, &target)?;

            if let Some(book_dir) = filed.parent() {
                sidecars::write_all(book_dir, &meta, cover.as_deref());
            }
            Ok(filed)
        })
        .await
        .map_err(|e| Error::Internal(format!("Tagging task failed: {}", e)))??;

        self.files
            .mark_tagged(
                file_id,
                &destination.to_string_lossy(),
                metadata,
                cover_path.as_deref().and_then(Path::to_str),
            )
            .await?
            .ok_or_else(|| Error::Internal(format!("Tagged file {} vanished mid-update", file_id)))?;

        // The only point where conversion-time backups are deleted: after the
        // artifact they produced has been successfully tagged and filed.
        self.reclaim_conversion_backups(&record.file_path).await;

        Ok(destination)
    }

    async fn download_cover(&self, metadata: &BookMetadata) -> Option<PathBuf> {
        if metadata.cover_url.is_empty() {
            return None;
        }

        let covers_dir = self.config.covers_dir();
        if let Err(e) = std::fs::create_dir_all(&covers_dir) {
            tracing::warn!(error = %e, "Could not create covers directory");
            return None;
        }

        let path = covers_dir.join(format!("{}.jpg", metadata.asin));
        match self.catalog.download(&metadata.cover_url).await {
            Ok(bytes) => match std::fs::write(&path, bytes) {
                Ok(()) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not save cover image");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(url = %metadata.cover_url, error = %e, "Cover download failed");
                None
            }
        }
    }

    /// Locate the completed conversion job whose output was this artifact's
    /// pre-move path and reclaim its snapshots. Best-effort: failures are
    /// logged, never escalated.
    async fn reclaim_conversion_backups(&self, original_path: &str) {
        match self
            .jobs
            .find_completed_conversion_by_output(original_path)
            .await
        {
            Ok(Some(job)) => {
                if let Some(paths) = &job.backup_paths {
                    if !paths.is_empty() {
                        self.backups.reclaim(paths);
                        if let Err(e) = self
                            .jobs
                            .update(
                                job.id,
                                JobUpdate {
                                    backup_paths: Some(Vec::new()),
                                    ..Default::default()
                                },
                            )
                            .await
                        {
                            tracing::warn!(job_id = %job.id, error = %e, "Failed to clear backup paths");
                        }
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(path = original_path, "No originating conversion job found");
            }
            Err(e) => {
                tracing::warn!(path = original_path, error = %e, "Backup lookup failed");
            }
        }
    }
}

/// Sanitize one library path segment. Strips filesystem-hostile and control
/// characters, trims trailing dots and spaces, falls back to "Unknown".
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Compute the canonical library destination for a book.
///
/// With a series: `library/<Author>/<Series>/<Title (Series #part)>/<Title (Series #part)>.m4b`;
/// without: `library/<Author>/<Title>/<Title>.m4b`.
pub fn library_destination(library_root: &Path, metadata: &BookMetadata) -> PathBuf {
    let author = sanitize_segment(if metadata.author.is_empty() {
        "Unknown Author"
    } else {
        &metadata.author
    });
    let title = sanitize_segment(if metadata.title.is_empty() {
        "Unknown Title"
    } else {
        &metadata.title
    });

    if metadata.series.is_empty() {
        let dir = library_root.join(author).join(&title);
        return dir.join(format!("{}.m4b", title));
    }

    let series = sanitize_segment(&metadata.series);
    let book_name = if metadata.series_part.is_empty() {
        format!("{} ({})", title, series)
    } else {
        format!("{} ({} #{})", title, series, metadata.series_part)
    };
    let book_name = sanitize_segment(&book_name);

    library_root
        .join(author)
        .join(series)
        .join(&book_name)
        .join(format!("{}.m4b", book_name))
}

/// Move an artifact, retrying once with an ASCII-safe fallback name when the
/// destination path's text encoding is the problem. Returns the path the
/// artifact actually landed at.
fn move_with_encoding_fallback(src: &Path, dst: &Path) -> Result<PathBuf> {
    match move_file(src, dst) {
        Ok(()) => Ok(dst.to_path_buf()),
        Err(first_err) => {
            let fallback = ascii_fallback_path(dst);
            if fallback == dst {
                return Err(first_err.into());
            }
            tracing::warn!(
                destination = %dst.display(),
                fallback = %fallback.display(),
                error = %first_err,
                "Move failed, retrying with re-encoded path"
            );
            if let Some(parent) = fallback.parent() {
                std::fs::create_dir_all(parent)?;
            }
            move_file(src, &fallback)?;
            Ok(fallback)
        }
    }
}

/// Rewrite non-ASCII characters in the final path segments to underscores
fn ascii_fallback_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        let segment = component.as_os_str().to_string_lossy();
        let rewritten: String = segment
            .chars()
            .map(|c| if c.is_ascii() { c } else { '_' })
            .collect();
        out.push(rewritten);
    }
    out
}

const ITUNES_MEAN: &str = "com.apple.iTunes";

/// Write the full tag set into the artifact's MP4 tag dictionary.
///
/// Fields the catalog didn't populate are skipped; a cover embed failure is
/// logged and skipped; only the final container save is fatal.
fn write_tags(path: &Path, metadata: &BookMetadata, cover_path: Option<&Path>) -> Result<()> {
    let mut ilst = Ilst::default();

    let set_fourcc = |ilst: &mut Ilst, code: [u8; 4], value: &str| {
        if !value.is_empty() {
            ilst.insert(Atom::new(
                AtomIdent::Fourcc(code),
                AtomData::UTF8(value.to_string()),
            ));
        }
    };
    let set_freeform = |ilst: &mut Ilst, name: &str, value: &str| {
        if !value.is_empty() {
            ilst.insert(Atom::new(
                AtomIdent::Freeform {
                    mean: ITUNES_MEAN.into(),
                    name: name.to_string().into(),
                },
                AtomData::UTF8(value.to_string()),
            ));
        }
    };

    // Title doubles as album for single-file audiobooks
    set_fourcc(&mut ilst, [0xA9, b'n', b'a', b'm'], &metadata.title);
    set_fourcc(&mut ilst, [0xA9, b'a', b'l', b'b'], &metadata.title);

    if metadata.release_date.len() >= 4 {
        set_fourcc(&mut ilst, [0xA9, b'd', b'a', b'y'], &metadata.release_date[..4]);
    }

    set_fourcc(&mut ilst, [0xA9, b'A', b'R', b'T'], &metadata.author);
    set_fourcc(&mut ilst, *b"aART", &metadata.author);

    // Narrator goes in the composer slot
    set_fourcc(&mut ilst, [0xA9, b'w', b'r', b't'], &metadata.narrator);

    set_freeform(&mut ilst, "SERIES", &metadata.series);
    if !metadata.series.is_empty() {
        set_freeform(&mut ilst, "SERIES-PART", &metadata.series_part);
    }

    set_fourcc(&mut ilst, [0xA9, b'c', b'm', b't'], &metadata.description);

    if !metadata.genres.is_empty() {
        set_fourcc(&mut ilst, [0xA9, b'g', b'e', b'n'], &metadata.genres.join("; "));
    }

    set_freeform(&mut ilst, "ASIN", &metadata.asin);
    set_freeform(&mut ilst, "AUDIBLE_ASIN", &metadata.asin);
    set_freeform(&mut ilst, "LANGUAGE", &metadata.language);
    set_freeform(&mut ilst, "FORMAT", &metadata.format_type);
    set_freeform(&mut ilst, "SUBTITLE", &metadata.subtitle);
    set_freeform(&mut ilst, "RELEASETIME", &metadata.release_time);
    set_freeform(&mut ilst, "RATING", &metadata.rating);
    set_freeform(&mut ilst, "EXPLICIT", if metadata.explicit { "1" } else { "0" });

    if !metadata.asin.is_empty() {
        set_freeform(
            &mut ilst,
            "WWWAUDIOFILE",
            &format!("https://www.audible.com/pd/{}", metadata.asin),
        );
    }

    // Gapless playback + audiobook media kind
    ilst.insert(Atom::new(AtomIdent::Fourcc(*b"pgap"), AtomData::Bool(true)));
    ilst.insert(Atom::new(
        AtomIdent::Fourcc(*b"stik"),
        AtomData::UnsignedInteger(2),
    ));

    if let Some(cover) = cover_path {
        match std::fs::read(cover) {
            Ok(data) => {
                ilst.insert_picture(Picture::new_unchecked(
                    PictureType::CoverFront,
                    Some(MimeType::Jpeg),
                    None,
                    data,
                ));
            }
            Err(e) => {
                tracing::warn!(path = %cover.display(), error = %e, "Could not embed cover art");
            }
        }
    }

    ilst.save_to_path(path, WriteOptions::default())
        .map_err(|e| Error::Tagging(format!("Failed to save tags to {}: {}", path.display(), e)))
}
