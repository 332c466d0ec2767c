//! Work item store
//!
//! Durable catalog of transcribable episodes. Single-item transitions are one
//! conditional `UPDATE` each (check and write in the same statement), so
//! concurrent claims on one item produce exactly one winner. Batch transitions
//! run in a scoped transaction and are all-or-nothing.

use rand::Rng;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::models::{
    BatchErrors, CompletedTranscript, Disqualification, GroupSummary, NewWorkItem,
    TranscriptState, WorkItem, IN_PROGRESS_SENTINEL,
};
use super::proxy::DbProxy;
use crate::session::{SessionParams, SortOrder};
use crate::{Error, Result};

/// Columns mapped into [`WorkItem`]
const ITEM_COLUMNS: &str = "podcast_episode_id, podcast_title, episode_title, published_date, \
     authors, language, description, episode_url, episode_audio_url, cache_audio_url, \
     cache_audio_file, transcript_file, duration, episode_json, model";

/// Persistent catalog of work items
#[derive(Clone, Debug)]
pub struct WorkItemStore {
    db: DbProxy,
}

impl WorkItemStore {
    pub fn new(db: DbProxy) -> Self {
        Self { db }
    }

    fn pool(&self) -> &SqlitePool {
        self.db.autocommit()
    }

    /// Register a newly discovered episode as unclaimed work
    pub async fn insert(&self, item: &NewWorkItem) -> Result<i64> {
        let episode_json = item
            .episode_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO podcasts (
                podcast_title, episode_title, published_date, retrieval_time, authors,
                language, description, episode_url, episode_audio_url, cache_audio_url,
                cache_audio_file, transcript_file, duration, episode_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?)
            "#,
        )
        .bind(&item.podcast_title)
        .bind(&item.episode_title)
        .bind(&item.published_date)
        .bind(chrono::Utc::now().timestamp() as f64)
        .bind(&item.authors)
        .bind(&item.language)
        .bind(&item.description)
        .bind(&item.episode_url)
        .bind(&item.episode_audio_url)
        .bind(&item.cache_audio_url)
        .bind(&item.cache_audio_file)
        .bind(item.duration.unwrap_or(-1.0))
        .bind(episode_json)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<WorkItem>> {
        let item = sqlx::query_as::<_, WorkItem>(&format!(
            "SELECT {} FROM podcasts WHERE podcast_episode_id = ?",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(item)
    }

    /// Pick one author group having unclaimed items in `language`
    ///
    /// Uniform over groups, not over items. Uses count + random offset rather
    /// than `ORDER BY RANDOM()` so the cost does not grow with a full sort.
    pub async fn find_candidate_group_key(&self, language: &str) -> Result<String> {
        let groups: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT COALESCE(authors, '')) FROM podcasts \
             WHERE transcript_file = '' AND language = ?",
        )
        .bind(language)
        .fetch_one(self.pool())
        .await?;

        if groups == 0 {
            return Err(Error::NoWorkAvailable(format!(
                "no episodes left without transcription for language '{}'",
                language
            )));
        }

        let offset = rand::thread_rng().gen_range(0..groups);
        let group: Option<String> = sqlx::query_scalar(
            "SELECT COALESCE(authors, '') AS group_key FROM podcasts \
             WHERE transcript_file = '' AND language = ? \
             GROUP BY group_key ORDER BY group_key LIMIT 1 OFFSET ?",
        )
        .bind(language)
        .bind(offset)
        .fetch_optional(self.pool())
        .await?;

        // Groups can drain between the count and the fetch
        group.ok_or_else(|| {
            Error::NoWorkAvailable(format!(
                "groups for language '{}' drained during sampling",
                language
            ))
        })
    }

    /// Pick one unclaimed item of `group_key` uniformly at random
    pub async fn find_candidate_item(&self, language: &str, group_key: &str) -> Result<WorkItem> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM podcasts \
             WHERE transcript_file = '' AND language = ? AND COALESCE(authors, '') = ?",
        )
        .bind(language)
        .bind(group_key)
        .fetch_one(self.pool())
        .await?;

        let no_work = || {
            Error::NoWorkAvailable(format!(
                "no episodes without transcription for author '{}'",
                group_key
            ))
        };

        if count == 0 {
            return Err(no_work());
        }

        let offset = rand::thread_rng().gen_range(0..count);
        let item = sqlx::query_as::<_, WorkItem>(&format!(
            "SELECT {} FROM podcasts \
             WHERE transcript_file = '' AND language = ? AND COALESCE(authors, '') = ? \
             ORDER BY podcast_episode_id LIMIT 1 OFFSET ?",
            ITEM_COLUMNS
        ))
        .bind(language)
        .bind(group_key)
        .bind(offset)
        .fetch_optional(self.pool())
        .await?;

        item.ok_or_else(no_work)
    }

    /// Up to `limit` unclaimed items of at least `min_duration` seconds,
    /// shortest first with random order among equal durations
    pub async fn sample_batch(
        &self,
        language: &str,
        limit: usize,
        min_duration: f64,
    ) -> Result<Vec<WorkItem>> {
        let items = sqlx::query_as::<_, WorkItem>(&format!(
            "SELECT {} FROM podcasts \
             WHERE transcript_file = '' AND language = ? AND duration >= ? \
             ORDER BY duration ASC, RANDOM() LIMIT ?",
            ITEM_COLUMNS
        ))
        .bind(language)
        .bind(min_duration)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(items)
    }

    /// Transition `Unclaimed -> InProgress`
    pub async fn claim(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE podcasts SET transcript_file = ? \
             WHERE podcast_episode_id = ? AND transcript_file = ''",
        )
        .bind(IN_PROGRESS_SENTINEL)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 1 {
            debug!(id, "Claimed work item");
            return Ok(());
        }

        match self.state_of(id).await? {
            None => Err(Error::NotFound(format!("work item {}", id))),
            Some(state) => Err(Error::Conflict {
                id,
                reason: claim_rejection(&state),
            }),
        }
    }

    /// Transition `InProgress -> Completed(path)` and record the model
    pub async fn complete(&self, id: i64, transcript_path: &str, model: Option<&str>) -> Result<()> {
        validate_transcript_path(transcript_path)?;

        let result = sqlx::query(
            "UPDATE podcasts SET transcript_file = ?, model = ? \
             WHERE podcast_episode_id = ? AND transcript_file = ?",
        )
        .bind(transcript_path)
        .bind(model)
        .bind(id)
        .bind(IN_PROGRESS_SENTINEL)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 1 {
            info!(id, transcript_path, "Recorded transcript");
            return Ok(());
        }
        Err(self.not_in_progress(id).await?)
    }

    /// Transition `InProgress -> Unclaimed`
    pub async fn cancel(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE podcasts SET transcript_file = '' \
             WHERE podcast_episode_id = ? AND transcript_file = ?",
        )
        .bind(id)
        .bind(IN_PROGRESS_SENTINEL)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 1 {
            debug!(id, "Cancelled work item");
            return Ok(());
        }
        Err(self.not_in_progress(id).await?)
    }

    /// Claim every id or none of them
    pub async fn claim_batch(&self, ids: Vec<i64>) -> Result<Vec<i64>> {
        let ids = dedup_ids(ids)?;
        self.db
            .write_transaction("claim_batch", move |conn| {
                Box::pin(async move {

                    let mut errors = BatchErrors::default();
                    for &id in &ids {
                        match fetch_state(conn, id).await? {
                            None => errors.push(Disqualification::NotFound, id),
                            Some((TranscriptState::Unclaimed, _)) => {}
                            Some((state, _)) => errors.push(claim_rejection(&state), id),
                        }
                    }
                    if !errors.is_empty() {
                        return Err(Error::BatchRejected(errors));
                    }

                    for &id in &ids {
                        conditional_update(conn, id, "", IN_PROGRESS_SENTINEL, None).await?;
                    }
                    info!(count = ids.len(), "Claimed work batch");
                    Ok(ids)
                })
            })
            .await
    }

    /// Cancel every id or none of them
    pub async fn cancel_batch(&self, ids: Vec<i64>) -> Result<Vec<i64>> {
        let ids = dedup_ids(ids)?;
        self.db
            .write_transaction("cancel_batch", move |conn| {
                Box::pin(async move {

                    let mut errors = BatchErrors::default();
                    for &id in &ids {
                        match fetch_state(conn, id).await? {
                            None => errors.push(Disqualification::NotFound, id),
                            Some((TranscriptState::InProgress, _)) => {}
                            Some(_) => errors.push(Disqualification::NotInProgress, id),
                        }
                    }
                    if !errors.is_empty() {
                        return Err(Error::BatchRejected(errors));
                    }

                    for &id in &ids {
                        conditional_update(conn, id, IN_PROGRESS_SENTINEL, "", None).await?;
                    }
                    info!(count = ids.len(), "Cancelled work batch");
                    Ok(ids)
                })
            })
            .await
    }

    /// Record transcripts for every item or for none of them
    ///
    /// Every item must be in progress and have a cached audio file.
    pub async fn complete_batch(&self, items: Vec<CompletedTranscript>) -> Result<Vec<i64>> {
        if items.is_empty() {
            return Err(Error::InvalidInput("empty batch".to_string()));
        }
        for item in &items {
            validate_transcript_path(&item.transcript_path)?;
        }
        dedup_ids(items.iter().map(|i| i.id).collect())?;

        self.db
            .write_transaction("complete_batch", move |conn| {
                Box::pin(async move {

                    let mut errors = BatchErrors::default();
                    for item in &items {
                        match fetch_state(conn, item.id).await? {
                            None => errors.push(Disqualification::NotFound, item.id),
                            Some((TranscriptState::InProgress, Some(_))) => {}
                            Some((TranscriptState::InProgress, None)) => {
                                errors.push(Disqualification::MissingCachePath, item.id)
                            }
                            Some(_) => errors.push(Disqualification::NotInProgress, item.id),
                        }
                    }
                    if !errors.is_empty() {
                        return Err(Error::BatchRejected(errors));
                    }

                    for item in &items {
                        conditional_update(
                            conn,
                            item.id,
                            IN_PROGRESS_SENTINEL,
                            &item.transcript_path,
                            Some(item.model.as_deref()),
                        )
                        .await?;
                    }
                    info!(count = items.len(), "Recorded transcript batch");
                    Ok(items.iter().map(|i| i.id).collect())
                })
            })
            .await
    }

    /// Podcast titles in `language` with their number of transcribed episodes
    pub async fn list_groups(&self, language: &str) -> Result<Vec<GroupSummary>> {
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT podcast_title, COUNT(podcast_episode_id) FROM podcasts \
             WHERE language = ? AND transcript_file NOT IN ('', ?) \
             GROUP BY podcast_title ORDER BY podcast_title",
        )
        .bind(language)
        .bind(IN_PROGRESS_SENTINEL)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(title, episode_count)| GroupSummary {
                title: title.unwrap_or_default(),
                episode_count,
            })
            .collect())
    }

    /// Transcribed episodes of one podcast title
    pub async fn list_transcribed_episodes(&self, podcast_title: &str) -> Result<Vec<WorkItem>> {
        let items = sqlx::query_as::<_, WorkItem>(&format!(
            "SELECT {} FROM podcasts \
             WHERE podcast_title = ? AND transcript_file NOT IN ('', ?) \
             ORDER BY published_date, podcast_episode_id",
            ITEM_COLUMNS
        ))
        .bind(podcast_title)
        .bind(IN_PROGRESS_SENTINEL)
        .fetch_all(self.pool())
        .await?;
        Ok(items)
    }

    /// Completed items matching a training session filter, in curriculum order
    pub async fn training_candidates(&self, params: &SessionParams) -> Result<Vec<WorkItem>> {
        let direction = match params.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let max_clause = if params.max_duration.is_some() {
            " AND duration <= ?"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM podcasts \
             WHERE transcript_file NOT IN ('', ?) AND language = ? AND duration >= ?{} \
             ORDER BY duration {}, podcast_episode_id",
            ITEM_COLUMNS, max_clause, direction
        );

        let mut query = sqlx::query_as::<_, WorkItem>(&sql)
            .bind(IN_PROGRESS_SENTINEL)
            .bind(&params.language)
            .bind(params.min_duration);
        if let Some(max) = params.max_duration {
            query = query.bind(max);
        }

        Ok(query.fetch_all(self.pool()).await?)
    }

    async fn state_of(&self, id: i64) -> Result<Option<TranscriptState>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT transcript_file FROM podcasts WHERE podcast_episode_id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(value.map(|v| TranscriptState::from_column(v.as_deref().unwrap_or(""))))
    }

    async fn not_in_progress(&self, id: i64) -> Result<Error> {
        Ok(match self.state_of(id).await? {
            None => Error::NotFound(format!("work item {}", id)),
            Some(state) => Error::InvalidState {
                id,
                found: state.label(),
            },
        })
    }
}

fn claim_rejection(state: &TranscriptState) -> Disqualification {
    match state {
        TranscriptState::Completed(_) => Disqualification::AlreadyTranscribed,
        _ => Disqualification::AlreadyInProgress,
    }
}

fn validate_transcript_path(path: &str) -> Result<()> {
    if path.is_empty() || path == IN_PROGRESS_SENTINEL {
        return Err(Error::InvalidInput(format!(
            "'{}' is not a valid transcript path",
            path
        )));
    }
    Ok(())
}

/// Reject empty batches and drop repeated ids, keeping first occurrence order
fn dedup_ids(ids: Vec<i64>) -> Result<Vec<i64>> {
    if ids.is_empty() {
        return Err(Error::InvalidInput("empty batch".to_string()));
    }
    let mut seen = std::collections::HashSet::new();
    Ok(ids.into_iter().filter(|id| seen.insert(*id)).collect())
}

/// Current state and cache path of one item inside a transaction
async fn fetch_state(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<(TranscriptState, Option<String>)>> {
    let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT transcript_file, cache_audio_file FROM podcasts WHERE podcast_episode_id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(transcript, cache)| {
        (
            TranscriptState::from_column(transcript.as_deref().unwrap_or("")),
            cache.filter(|c| !c.is_empty()),
        )
    }))
}

/// Move one item from `from` to `to`; anything but exactly one row aborts the batch
async fn conditional_update(
    conn: &mut SqliteConnection,
    id: i64,
    from: &str,
    to: &str,
    model: Option<Option<&str>>,
) -> Result<()> {
    let result = match model {
        Some(model) => {
            sqlx::query(
                "UPDATE podcasts SET transcript_file = ?, model = ? \
                 WHERE podcast_episode_id = ? AND transcript_file = ?",
            )
            .bind(to)
            .bind(model)
            .bind(id)
            .bind(from)
            .execute(&mut *conn)
            .await?
        }
        None => {
            sqlx::query(
                "UPDATE podcasts SET transcript_file = ? \
                 WHERE podcast_episode_id = ? AND transcript_file = ?",
            )
            .bind(to)
            .bind(id)
            .bind(from)
            .execute(&mut *conn)
            .await?
        }
    };

    if result.rows_affected() != 1 {
        return Err(Error::Internal(format!(
            "work item {} changed state during batch transition",
            id
        )));
    }
    Ok(())
}
