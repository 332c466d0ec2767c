//! Fetch, claim, transcribe, upload
//!
//! A claimed item is always either completed or handed back with
//! `cancel_work`, including when the worker is asked to stop mid-job.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use scribe_common::api::WorkAssignment;

use crate::backoff::Backoff;
use crate::client::{ClientError, ScribeClient};
use crate::config::WorkerConfig;
use crate::transcriber::{initial_prompt, Transcriber, TranscriptionJob};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Transcription failed: {0}")]
    Transcribe(#[from] crate::transcriber::TranscribeError),

    #[error("Work item {0} has no local cache URL")]
    MissingLocalUrl(i64),
}

/// Result of one pass through the loop
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { wid: i64, transcript_file: String },
    /// Nothing to allocate, or another worker claimed it first
    NoWork,
    /// Stopped mid-job; the claim was released
    Interrupted { wid: i64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
}

pub struct Worker {
    client: ScribeClient,
    transcriber: Arc<dyn Transcriber>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        transcriber: Arc<dyn Transcriber>,
    ) -> Result<Self, WorkerError> {
        let client = ScribeClient::new(&config.server_url, &config.api_key)?;
        Ok(Self {
            client,
            transcriber,
            config,
        })
    }

    /// Loop until `shutdown` flips to true or `max_jobs` jobs are done
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut backoff = Backoff::new(self.config.backoff);

        info!(
            language = %self.config.language,
            model = %self.transcriber.model_name(),
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Some(max) = self.config.max_jobs {
                if stats.completed >= max {
                    info!("Reached {} completed jobs", max);
                    break;
                }
            }

            match self.run_once(&mut shutdown).await {
                Ok(JobOutcome::Completed { wid, transcript_file }) => {
                    info!(wid, %transcript_file, "Job completed");
                    stats.completed += 1;
                    backoff.reset();
                    continue;
                }
                Ok(JobOutcome::Interrupted { wid }) => {
                    info!(wid, "Job interrupted by shutdown");
                    break;
                }
                Ok(JobOutcome::NoWork) => {}
                Err(e) => {
                    error!("Job failed: {}", e);
                    stats.failed += 1;
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(completed = stats.completed, failed = stats.failed, "Worker stopped");
        stats
    }

    /// One allocation attempt and, if it yields work, one job
    pub async fn run_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<JobOutcome, WorkerError> {
        let work = match self.client.get_work(&self.config.language).await {
            Ok(work) => work,
            Err(e) if e.is_no_work() => return Ok(JobOutcome::NoWork),
            Err(e) => return Err(e.into()),
        };
        let wid = work.podcast_episode_id;

        match self.client.register_wip(wid).await {
            Ok(()) => {}
            Err(e) if e.is_no_work() => {
                info!(wid, "Lost the claim race");
                return Ok(JobOutcome::NoWork);
            }
            Err(e) => return Err(e.into()),
        }
        info!(wid, title = %work.episode_title, "Claimed work item");

        let result = tokio::select! {
            r = self.process(&work) => r.map(Some),
            _ = shutdown.changed() => Ok(None),
        };

        match result {
            Ok(Some(transcript_file)) => Ok(JobOutcome::Completed {
                wid,
                transcript_file,
            }),
            Ok(None) => {
                self.release(wid).await;
                Ok(JobOutcome::Interrupted { wid })
            }
            Err(e) => {
                self.release(wid).await;
                Err(e)
            }
        }
    }

    async fn process(&self, work: &WorkAssignment) -> Result<String, WorkerError> {
        let audio_url = if self.config.use_local_url {
            work.local_cache_audio_url
                .clone()
                .ok_or(WorkerError::MissingLocalUrl(work.podcast_episode_id))?
        } else {
            work.cache_audio_url.clone()
        };

        let job = TranscriptionJob {
            audio_url,
            language: self.config.language.clone(),
            prompt: initial_prompt(&self.config.language, &work.authors, &work.episode_title),
        };
        let transcript = self.transcriber.transcribe(&job).await?;

        let path = self
            .client
            .upload_result(
                work.podcast_episode_id,
                transcript,
                self.transcriber.model_name(),
            )
            .await?;
        Ok(path)
    }

    async fn release(&self, wid: i64) {
        match self.client.cancel_work(wid).await {
            Ok(()) => info!(wid, "Released claim"),
            Err(e) => warn!(wid, "Failed to release claim: {}", e),
        }
    }
}
