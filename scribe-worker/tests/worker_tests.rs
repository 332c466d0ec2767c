//! Worker loop against a live scribe-ds router on a loopback port

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

use scribe_common::config::ServerConfig;
use scribe_common::db::{init_database, DbProxy, NewWorkItem, TranscriptState, WorkItemStore};
use scribe_ds::{build_router, AppState};
use scribe_worker::backoff::BackoffPolicy;
use scribe_worker::transcriber::{TranscribeError, Transcriber, TranscriptionJob};
use scribe_worker::{JobOutcome, Worker, WorkerConfig, WorkerError};

const KEY: &str = "worker-key";

enum Behavior {
    Succeed,
    Fail,
    Hang,
}

struct FakeTranscriber {
    behavior: Behavior,
    jobs: Mutex<Vec<TranscriptionJob>>,
}

impl FakeTranscriber {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            jobs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn model_name(&self) -> &str {
        "fake-model"
    }

    async fn transcribe(&self, job: &TranscriptionJob) -> Result<Vec<u8>, TranscribeError> {
        self.jobs.lock().unwrap().push(job.clone());
        match self.behavior {
            Behavior::Succeed => Ok(b"WEBVTT\n\n00:00.000 --> 00:01.000\nhello\n".to_vec()),
            Behavior::Fail => Err(TranscribeError::EmptyOutput),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

struct Server {
    dir: TempDir,
    url: String,
    items: WorkItemStore,
}

async fn start_server() -> Server {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("audio")).unwrap();

    let config = ServerConfig {
        api_secret_key: KEY.to_string(),
        database_path: dir.path().join("podcasts.db"),
        transcript_file_replace_prefix: format!("{}/", dir.path().display()),
        ..Default::default()
    };
    let pool = init_database(&config.database_path, 5).await.unwrap();
    let db = DbProxy::new(pool);
    let state = AppState::from_config(&config, db.clone()).await.unwrap();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        url: format!("http://{}", addr),
        items: WorkItemStore::new(db),
        dir,
    }
}

impl Server {
    async fn insert(&self, authors: &str) -> i64 {
        let slug = authors.to_lowercase();
        self.items
            .insert(&NewWorkItem {
                podcast_title: format!("{} Show", authors),
                episode_title: format!("{} episode", authors),
                authors: authors.to_string(),
                language: "en".to_string(),
                episode_audio_url: format!("https://origin.example/{}.mp3", slug),
                cache_audio_url: format!("https://cache.example/audio/{}.mp3", slug),
                cache_audio_file: Some(
                    self.dir
                        .path()
                        .join("audio")
                        .join(format!("{}.mp3", slug))
                        .to_string_lossy()
                        .into_owned(),
                ),
                duration: Some(60.0),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn state(&self, id: i64) -> TranscriptState {
        self.items.get(id).await.unwrap().unwrap().transcript
    }

    fn worker(&self, transcriber: Arc<FakeTranscriber>) -> Worker {
        self.worker_with(transcriber, |_| {})
    }

    fn worker_with(
        &self,
        transcriber: Arc<FakeTranscriber>,
        tweak: impl FnOnce(&mut WorkerConfig),
    ) -> Worker {
        let mut config = WorkerConfig {
            server_url: self.url.clone(),
            api_key: KEY.to_string(),
            language: "en".to_string(),
            command: vec!["unused".to_string()],
            backoff: BackoffPolicy::Fixed { delay_ms: 10 },
            ..Default::default()
        };
        tweak(&mut config);
        Worker::new(config, transcriber).unwrap()
    }
}

#[tokio::test]
async fn test_job_completes_and_transcript_lands_next_to_audio() {
    let server = start_server().await;
    let id = server.insert("Alice").await;
    let transcriber = FakeTranscriber::new(Behavior::Succeed);
    let worker = server.worker(transcriber.clone());

    let (_tx, mut rx) = watch::channel(false);
    let outcome = worker.run_once(&mut rx).await.unwrap();

    let expected = server.dir.path().join("audio").join("alice.vtt");
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            wid: id,
            transcript_file: expected.to_string_lossy().into_owned(),
        }
    );
    assert!(std::fs::read_to_string(&expected).unwrap().starts_with("WEBVTT"));

    let item = server.items.get(id).await.unwrap().unwrap();
    assert!(matches!(item.transcript, TranscriptState::Completed(_)));
    assert_eq!(item.model.as_deref(), Some("fake-model"));

    let jobs = transcriber.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].audio_url, "https://cache.example/audio/alice.mp3");
    assert_eq!(
        jobs[0].prompt,
        "Podcast author: Alice, podcast title: Alice episode.\n"
    );
}

#[tokio::test]
async fn test_failed_transcription_releases_claim() {
    let server = start_server().await;
    let id = server.insert("Bob").await;
    let worker = server.worker(FakeTranscriber::new(Behavior::Fail));

    let (_tx, mut rx) = watch::channel(false);
    let result = worker.run_once(&mut rx).await;

    assert!(matches!(result, Err(WorkerError::Transcribe(_))));
    assert_eq!(server.state(id).await, TranscriptState::Unclaimed);
}

#[tokio::test]
async fn test_missing_local_url_releases_claim() {
    let server = start_server().await;
    let id = server.insert("Carol").await;
    let worker = server.worker_with(FakeTranscriber::new(Behavior::Succeed), |c| {
        c.use_local_url = true;
    });

    let (_tx, mut rx) = watch::channel(false);
    let result = worker.run_once(&mut rx).await;

    assert!(matches!(result, Err(WorkerError::MissingLocalUrl(wid)) if wid == id));
    assert_eq!(server.state(id).await, TranscriptState::Unclaimed);
}

#[tokio::test]
async fn test_no_work_is_not_an_error() {
    let server = start_server().await;
    let worker = server.worker(FakeTranscriber::new(Behavior::Succeed));

    let (_tx, mut rx) = watch::channel(false);
    assert_eq!(worker.run_once(&mut rx).await.unwrap(), JobOutcome::NoWork);
}

#[tokio::test]
async fn test_shutdown_mid_job_releases_claim() {
    let server = start_server().await;
    let id = server.insert("Dave").await;
    let worker = server.worker(FakeTranscriber::new(Behavior::Hang));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });

    for _ in 0..200 {
        if server.state(id).await == TranscriptState::InProgress {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.state(id).await, TranscriptState::InProgress);

    tx.send(true).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stats.completed, 0);
    assert_eq!(server.state(id).await, TranscriptState::Unclaimed);
}

#[tokio::test]
async fn test_run_stops_after_max_jobs() {
    let server = start_server().await;
    let first = server.insert("Erin").await;
    let second = server.insert("Frank").await;
    let worker = server.worker_with(FakeTranscriber::new(Behavior::Succeed), |c| {
        c.max_jobs = Some(2);
    });

    let (_tx, rx) = watch::channel(false);
    let stats = tokio::time::timeout(Duration::from_secs(10), worker.run(rx))
        .await
        .unwrap();

    assert_eq!(stats.completed, 2);
    assert!(matches!(server.state(first).await, TranscriptState::Completed(_)));
    assert!(matches!(server.state(second).await, TranscriptState::Completed(_)));
}
