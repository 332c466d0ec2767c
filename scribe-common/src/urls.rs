//! Public URL derivation for stored files

use crate::config::{LocalUrlRewrite, ServerConfig};

/// Maps storage paths and remote URLs to the URLs handed to clients
#[derive(Debug, Clone)]
pub struct PublicUrls {
    transcript_prefix: String,
    local_url: Option<LocalUrlRewrite>,
}

impl PublicUrls {
    pub fn new(transcript_prefix: impl Into<String>, local_url: Option<LocalUrlRewrite>) -> Self {
        Self {
            transcript_prefix: transcript_prefix.into(),
            local_url,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.transcript_file_replace_prefix.clone(),
            config.local_url.clone(),
        )
    }

    /// `/var/www/host/show/ep.vtt` -> `https://host/show/ep.vtt`
    pub fn transcript_url(&self, transcript_path: &str) -> String {
        if self.transcript_prefix.is_empty() {
            return transcript_path.to_string();
        }
        transcript_path.replacen(&self.transcript_prefix, "https://", 1)
    }

    /// LAN-local mirror of a cache URL, when a rewrite is configured and applies
    pub fn local_cache_url(&self, cache_audio_url: &str) -> Option<String> {
        let rewrite = self.local_url.as_ref()?;
        cache_audio_url
            .strip_prefix(&rewrite.remote_prefix)
            .map(|rest| format!("{}{}", rewrite.local_prefix, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_url_replaces_prefix() {
        let urls = PublicUrls::new("/var/www/", None);
        assert_eq!(
            urls.transcript_url("/var/www/example.org/show/ep1.vtt"),
            "https://example.org/show/ep1.vtt"
        );
    }

    #[test]
    fn test_local_cache_url() {
        let urls = PublicUrls::new(
            "/var/www/",
            Some(LocalUrlRewrite {
                remote_prefix: "https://example.org/".to_string(),
                local_prefix: "http://10.0.0.2/".to_string(),
            }),
        );
        assert_eq!(
            urls.local_cache_url("https://example.org/show/ep1.mp3").as_deref(),
            Some("http://10.0.0.2/show/ep1.mp3")
        );
        assert_eq!(urls.local_cache_url("https://other.org/ep.mp3"), None);
        assert_eq!(PublicUrls::new("", None).local_cache_url("x"), None);
    }
}
