//! Background job dispatch
//!
//! Jobs run as detached tokio tasks. The task handle is dropped; state lives
//! entirely in the jobs table, which is how callers observe progress and
//! terminal outcomes.

use crate::pipeline::convert::ConversionPipeline;
use crate::pipeline::tagging::TaggingPipeline;
use crate::AppState;
use uuid::Uuid;

/// Launch a conversion job in the background
pub fn spawn_conversion(
    state: &AppState,
    job_id: Uuid,
    source_folders: Vec<String>,
    output_filename: Option<String>,
) {
    let pipeline = ConversionPipeline::new(state.config.clone(), state.db.clone());
    tokio::spawn(async move {
        pipeline.run(job_id, &source_folders, output_filename).await;
    });
}

/// Launch a tagging job in the background
pub fn spawn_tagging(
    state: &AppState,
    job_id: Uuid,
    file_id: Uuid,
    asin: String,
    locale: Option<String>,
) {
    let pipeline = TaggingPipeline::new(
        state.config.clone(),
        state.db.clone(),
        state.catalog.clone(),
    );
    tokio::spawn(async move {
        pipeline.run(job_id, file_id, &asin, locale.as_deref()).await;
    });
}
