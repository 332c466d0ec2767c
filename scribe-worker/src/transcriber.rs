//! Transcription seam
//!
//! The speech model runs outside this crate. [`CommandTranscriber`] runs an
//! external program and takes its standard output as the transcript.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("Failed to start transcriber: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Transcriber exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Transcriber produced no output")]
    EmptyOutput,
}

/// What the transcriber needs to know about one job
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionJob {
    pub audio_url: String,
    pub language: String,
    /// Context prompt naming the author and episode
    pub prompt: String,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Model identifier recorded with every upload
    fn model_name(&self) -> &str;

    /// Transcript bytes (WebVTT) for one job
    async fn transcribe(&self, job: &TranscriptionJob) -> Result<Vec<u8>, TranscribeError>;
}

/// Runs `program args...` with `{audio}`, `{language}` and `{prompt}`
/// substituted in every argument
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
    model: String,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, args: Vec<String>, model: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            model: model.into(),
        }
    }

    fn render_args(&self, job: &TranscriptionJob) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{audio}", &job.audio_url)
                    .replace("{language}", &job.language)
                    .replace("{prompt}", &job.prompt)
            })
            .collect()
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, job: &TranscriptionJob) -> Result<Vec<u8>, TranscribeError> {
        let args = self.render_args(job);
        debug!(program = %self.program, ?args, "Running transcriber");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(TranscribeError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(TranscribeError::EmptyOutput);
        }
        Ok(output.stdout)
    }
}

/// Localized "author, title" prompt; English when the language is unknown
pub fn initial_prompt(language: &str, author: &str, title: &str) -> String {
    if author.is_empty() && title.is_empty() {
        return String::new();
    }

    let (author_label, title_label) = match language {
        "de" => ("Podcast-Autor:", "Podcast-Titel:"),
        "fr" => ("Auteur du podcast :", "Titre du podcast :"),
        "pl" => ("Autor podcastu:", "Tytuł podcastu:"),
        "es" => ("Autor del podcast:", "Título del podcast:"),
        "it" => ("Autore del podcast:", "Titolo del podcast:"),
        "nl" => ("Podcast auteur:", "Podcast titel:"),
        "sv" => ("Podcastens författare:", "Podcastens titel:"),
        "da" => ("Podcast forfatter:", "Podcast titel:"),
        "fi" => ("Podcastin tekijä:", "Podcastin otsikko:"),
        "no" => ("Podkast forfatter:", "Podkast tittel:"),
        "pt" => ("Autor do podcast:", "Título do podcast:"),
        "ru" => ("Автор подкаста:", "Название подкаста:"),
        "cs" => ("Autor podcastu:", "Název podcastu:"),
        "hu" => ("Podcast szerző:", "Podcast címe:"),
        "ro" => ("Autor podcast:", "Titlu podcast:"),
        "bg" => ("Автор на подкаст:", "Заглавие на подкаст:"),
        "el" => ("Συγγραφέας podcast:", "Τίτλος podcast:"),
        "tr" => ("Podcast yazarı:", "Podcast başlığı:"),
        _ => ("Podcast author:", "podcast title:"),
    };

    let mut prompt = format!("{} {}, {} {}", author_label, author, title_label, title)
        .trim_end()
        .to_string();
    if !prompt.ends_with(['.', '!', '?']) {
        prompt.push('.');
    }
    prompt.push('\n');
    prompt
}
