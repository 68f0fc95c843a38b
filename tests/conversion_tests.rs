//! Integration tests for the conversion pipeline
//!
//! The external encoder is replaced with small shell scripts so the full
//! job lifecycle (snapshot, encode, relocate, register, terminal status)
//! runs without ffmpeg installed.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use m4bforge::config::Config;
use m4bforge::db::{init_memory_pool, JobKind, JobStatus, JobStore, TaggedFileStore};
use m4bforge::pipeline::convert::ConversionPipeline;

/// Write an executable shell script into the data root
fn write_script(root: &Path, name: &str, body: &str) -> String {
    let path = root.join(name);
    std::fs::write(&path, body).expect("Failed to write script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().to_string()
}

/// Stub encoder: writes fake output to its last argument and exits cleanly
fn stub_encoder(root: &Path) -> String {
    write_script(
        root,
        "fake-encoder.sh",
        "#!/bin/sh\nfor a in \"$@\"; do out=\"$a\"; done\nprintf 'fake m4b payload' > \"$out\"\n",
    )
}

/// Failing encoder: writes a partial output, complains on stderr, exits 3
fn failing_encoder(root: &Path) -> String {
    write_script(
        root,
        "broken-encoder.sh",
        "#!/bin/sh\nfor a in \"$@\"; do out=\"$a\"; done\nprintf 'partial' > \"$out\"\necho 'codec exploded' >&2\nexit 3\n",
    )
}

fn make_source_folder(config: &Config, name: &str, files: &[&str]) -> String {
    let folder = config.source_dir().join(name);
    std::fs::create_dir_all(&folder).expect("Failed to create source folder");
    for file in files {
        std::fs::write(folder.join(file), b"fake mp3 data").expect("Failed to write audio file");
    }
    folder.to_string_lossy().to_string()
}

async fn test_fixture(encoder: impl Fn(&Path) -> String) -> (tempfile::TempDir, Arc<Config>) {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = Config::with_root(temp.path().to_path_buf());
    config.encoder_program = encoder(temp.path());
    config.per_file_seconds = 0.1;
    config.ensure_directories().expect("Failed to create directories");
    (temp, Arc::new(config))
}

#[tokio::test]
async fn test_conversion_success_end_to_end() {
    let (_temp, config) = test_fixture(stub_encoder).await;
    let folder = make_source_folder(&config, "My Great Book", &["01.mp3", "02.mp3"]);

    let pool = init_memory_pool().await.unwrap();
    let jobs = JobStore::new(pool.clone());
    let job = jobs
        .create(JobKind::Conversion, &[folder.clone()])
        .await
        .unwrap();

    let pipeline = ConversionPipeline::new(config.clone(), pool.clone());
    pipeline.run(job.id, &[folder], None).await;

    let job = jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100.0);
    assert!(job.start_time.is_some());
    assert!(job.end_time.is_some());

    // Artifact landed in the ready area, named after the folder
    let output_path = job.output_path.expect("Completed job must record output");
    assert!(output_path.starts_with(config.ready_dir().to_str().unwrap()));
    assert!(output_path.ends_with(".m4b"));
    assert!(Path::new(&output_path).exists());
    let name = Path::new(&output_path).file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("My_Great_Book_"));

    // Processing area left clean
    let leftovers: Vec<_> = std::fs::read_dir(config.processing_dir())
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());

    // Source folder snapshot recorded and present on disk
    let backups = job.backup_paths.expect("Backups enabled by default");
    assert_eq!(backups.len(), 1);
    assert!(Path::new(&backups[0]).join("01.mp3").exists());

    // Artifact registered for tagging
    let files = TaggedFileStore::new(pool);
    let record = files.get_by_path(&output_path).await.unwrap().unwrap();
    assert!(!record.is_tagged);
}

#[tokio::test]
async fn test_conversion_with_explicit_output_name() {
    let (_temp, config) = test_fixture(stub_encoder).await;
    let folder = make_source_folder(&config, "book", &["a.mp3"]);

    let pool = init_memory_pool().await.unwrap();
    let jobs = JobStore::new(pool.clone());
    let job = jobs
        .create(JobKind::Conversion, &[folder.clone()])
        .await
        .unwrap();

    let pipeline = ConversionPipeline::new(config.clone(), pool);
    pipeline
        .run(job.id, &[folder], Some("Chosen Name".to_string()))
        .await;

    let job = jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.output_path.unwrap(),
        config.ready_dir().join("Chosen_Name.m4b").to_string_lossy()
    );
}

#[tokio::test]
async fn test_conversion_failure_records_log_and_cleans_up() {
    let (_temp, config) = test_fixture(failing_encoder).await;
    let folder = make_source_folder(&config, "doomed", &["a.mp3"]);

    let pool = init_memory_pool().await.unwrap();
    let jobs = JobStore::new(pool.clone());
    let job = jobs
        .create(JobKind::Conversion, &[folder.clone()])
        .await
        .unwrap();

    let pipeline = ConversionPipeline::new(config.clone(), pool.clone());
    pipeline.run(job.id, &[folder], None).await;

    let job = jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.output_path.is_none());
    let log = job.log.expect("Failed job must record a log");
    assert!(log.contains("codec exploded"), "log was: {}", log);

    // Partial output removed, nothing promoted to ready
    let processing: Vec<_> = std::fs::read_dir(config.processing_dir())
        .unwrap()
        .collect();
    assert!(processing.is_empty());
    let ready: Vec<_> = std::fs::read_dir(config.ready_dir()).unwrap().collect();
    assert!(ready.is_empty());

    // No tagging record for a failed conversion
    let files = TaggedFileStore::new(pool);
    assert!(files.list_untagged(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_conversion_empty_folder_fails_without_encoder() {
    // Encoder path points at nothing runnable; the empty-folder check must
    // fail the job before launch is ever attempted
    let (_temp, config) = test_fixture(|root| {
        root.join("no-such-encoder").to_string_lossy().to_string()
    })
    .await;
    let folder = config.source_dir().join("empty");
    std::fs::create_dir_all(&folder).unwrap();
    let folder = folder.to_string_lossy().to_string();

    let pool = init_memory_pool().await.unwrap();
    let jobs = JobStore::new(pool.clone());
    let job = jobs
        .create(JobKind::Conversion, &[folder.clone()])
        .await
        .unwrap();

    let pipeline = ConversionPipeline::new(config, pool);
    pipeline.run(job.id, &[folder], None).await;

    let job = jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.log.unwrap().contains("No eligible audio files"));
}

#[tokio::test]
async fn test_conversion_backups_disabled() {
    let (_temp, mut_config) = test_fixture(stub_encoder).await;
    let mut config = (*mut_config).clone();
    config.backup_enabled = false;
    let config = Arc::new(config);
    let folder = make_source_folder(&config, "nobackup", &["a.mp3"]);

    let pool = init_memory_pool().await.unwrap();
    let jobs = JobStore::new(pool.clone());
    let job = jobs
        .create(JobKind::Conversion, &[folder.clone()])
        .await
        .unwrap();

    let pipeline = ConversionPipeline::new(config.clone(), pool);
    pipeline.run(job.id, &[folder], None).await;

    let job = jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.backup_paths.is_none());
    let backups: Vec<_> = std::fs::read_dir(config.backup_dir()).unwrap().collect();
    assert!(backups.is_empty());
}
