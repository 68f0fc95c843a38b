//! Conversion pipeline
//!
//! Drives one conversion job from RUNNING to a terminal state: snapshot the
//! source folders, flatten their eligible files into chapter order, supervise
//! the external encoder with an advisory progress tracker alongside, then
//! relocate the finished artifact and register it for tagging. Every failure
//! is caught at the job boundary and recorded in the job's log; nothing
//! propagates past the pipeline.

use crate::config::Config;
use crate::db::{JobStatus, JobStore, JobUpdate, TaggedFileStore};
use crate::error::{Error, Result};
use crate::pipeline::progress::{self, ElapsedTimeModel};
use crate::services::backup::BackupManager;
use crate::services::naming;
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

/// Orchestrates conversion jobs over the external encoder
pub struct ConversionPipeline {
    config: Arc<Config>,
    jobs: JobStore,
    files: TaggedFileStore,
    backups: BackupManager,
}

impl ConversionPipeline {
    pub fn new(config: Arc<Config>, pool: SqlitePool) -> Self {
        let backups = BackupManager::new(config.backup_dir());
        Self {
            config,
            jobs: JobStore::new(pool.clone()),
            files: TaggedFileStore::new(pool),
            backups,
        }
    }

    /// Run one conversion job to a terminal state. This is the synchronous
    /// entry point; dispatch wraps it in a spawned task.
    pub async fn run(
        &self,
        job_id: Uuid,
        source_folders: &[String],
        output_filename: Option<String>,
    ) {
        let output_name = resolve_output_name(source_folders, output_filename);

        match self.execute(job_id, source_folders, &output_name).await {
            Ok(ready_path) => {
                tracing::info!(
                    job_id = %job_id,
                    output = %ready_path.display(),
                    "Conversion completed"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Conversion failed");

                // Never leave partial artifacts in the processing area
                let partial = self.config.processing_dir().join(&output_name);
                if partial.exists() {
                    if let Err(cleanup_err) = std::fs::remove_file(&partial) {
                        tracing::warn!(
                            path = %partial.display(),
                            error = %cleanup_err,
                            "Failed to remove partial output"
                        );
                    }
                }

                if let Err(store_err) = self
                    .jobs
                    .update(
                        job_id,
                        JobUpdate {
                            status: Some(JobStatus::Failed),
                            log: Some(e.to_string()),
                            end_time: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %store_err, "Failed to record job failure");
                }
            }
        }
    }

    async fn execute(
        &self,
        job_id: Uuid,
        source_folders: &[String],
        output_name: &str,
    ) -> Result<PathBuf> {
        self.jobs
            .update(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    start_time: Some(Utc::now()),
                    progress: Some(0.0),
                    ..Default::default()
                },
            )
            .await?;

        // Snapshot before anything else touches the inputs; a snapshot
        // failure fails the job before the encoder is ever invoked. The
        // recursive copy can run for minutes on large folders, so it goes to
        // the blocking pool.
        if self.config.backup_enabled {
            let mut backup_paths = Vec::with_capacity(source_folders.len());
            for folder in source_folders {
                let backups = self.backups.clone();
                let folder = folder.clone();
                let snapshot =
                    tokio::task::spawn_blocking(move || backups.snapshot(Path::new(&folder)))
                        .await
                        .map_err(|e| Error::Internal(format!("Snapshot task failed: {}", e)))??;
                backup_paths.push(snapshot.to_string_lossy().to_string());
            }
            self.jobs
                .update(
                    job_id,
                    JobUpdate {
                        backup_paths: Some(backup_paths),
                        ..Default::default()
                    },
                )
                .await?;
        }

        // Flatten eligible files across folders into one chapter-ordered list
        let mut input_files = Vec::new();
        for folder in source_folders {
            input_files.extend(naming::find_eligible_files(
                Path::new(folder),
                &self.config.input_extensions,
            ));
        }
        if input_files.is_empty() {
            return Err(Error::InvalidInput(
                "No eligible audio files found in the source folders".to_string(),
            ));
        }

        let processing_path = self.config.processing_dir().join(output_name);
        if let Some(parent) = processing_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.encode(job_id, &input_files, &processing_path).await?;

        // Relocate the finished artifact into the ready area; the move can
        // degrade to a full copy across filesystems
        let ready_path = self.config.ready_dir().join(output_name);
        if let Some(parent) = ready_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let src = processing_path.clone();
        let dst = ready_path.clone();
        tokio::task::spawn_blocking(move || move_file(&src, &dst))
            .await
            .map_err(|e| Error::Internal(format!("Move task failed: {}", e)))??;

        let ready_str = ready_path.to_string_lossy().to_string();
        self.files.create(&ready_str).await?;

        self.jobs
            .update(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    progress: Some(100.0),
                    output_path: Some(ready_str),
                    end_time: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        Ok(ready_path)
    }

    /// Supervise the encoder child process with the progress tracker racing
    /// alongside it. The tracker is aborted as soon as the process exits,
    /// before any terminal progress write.
    async fn encode(&self, job_id: Uuid, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let args = encoder_args(
            inputs,
            output,
            self.config.encoder_threads(),
            &self.config.audio_bitrate,
            self.config.audio_channels,
            self.config.sample_rate,
        );

        tracing::debug!(
            job_id = %job_id,
            program = %self.config.encoder_program,
            inputs = inputs.len(),
            "Launching encoder"
        );

        let child = Command::new(&self.config.encoder_program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Encoder(format!(
                    "Failed to launch {}: {}",
                    self.config.encoder_program, e
                ))
            })?;

        let model = Arc::new(ElapsedTimeModel {
            per_file_seconds: self.config.per_file_seconds,
            file_count: inputs.len(),
        });
        let tracker = tokio::spawn(progress::track(self.jobs.clone(), job_id, model));

        let output_result = child.wait_with_output().await;

        // Cancellation is a normal, silent termination
        tracker.abort();
        let _ = tracker.await;

        let process_output = output_result?;
        if !process_output.status.success() {
            return Err(Error::Encoder(format!(
                "Encoder exited with {}\nSTDERR: {}\nSTDOUT: {}",
                process_output.status,
                String::from_utf8_lossy(&process_output.stderr),
                String::from_utf8_lossy(&process_output.stdout),
            )));
        }

        Ok(())
    }
}

/// Resolve the final output filename: caller-supplied or derived from the
/// folder names plus a timestamp; always sanitized, `.m4b` enforced.
pub fn resolve_output_name(source_folders: &[String], output_filename: Option<String>) -> String {
    let mut name = match output_filename {
        Some(name) if !name.trim().is_empty() => naming::sanitize_file_name(&name),
        _ => {
            let base = naming::output_name_from_folders(source_folders);
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("{}_{}", base, timestamp)
        }
    };

    if !name.ends_with(".m4b") {
        name.push_str(".m4b");
    }
    name
}

/// Build the encoder argv: audio-only stream per input, concatenated into one
/// continuous stream with a fixed codec/bitrate/channels/sample-rate profile.
pub fn encoder_args(
    inputs: &[PathBuf],
    output: &Path,
    threads: usize,
    bitrate: &str,
    channels: u8,
    sample_rate: u32,
) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];

    for input in inputs {
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
    }

    // Select only the first audio stream of each input; embedded images and
    // video are ignored.
    let mut filter = String::new();
    for i in 0..inputs.len() {
        filter.push_str(&format!("[{}:a:0]", i));
    }
    filter.push_str(&format!("concat=n={}:v=0:a=1[out]", inputs.len()));

    args.extend([
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[out]".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        bitrate.to_string(),
        "-ac".to_string(),
        channels.to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-threads".to_string(),
        threads.to_string(),
        "-f".to_string(),
        "ipod".to_string(),
        output.to_string_lossy().to_string(),
    ]);

    args
}

/// Move a file, falling back to copy+remove across filesystems
pub(crate) fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)
        }
    }
}
