//! Media handling — storage for synthesized audio replies and download of
//! inbound voice notes.
//!
//! Synthesized audio is written under the configured media directory and
//! served back at `GET /media/{filename}` so the messaging provider can
//! fetch it. Filenames are generated server-side and strictly validated on
//! the way back in.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nursetalk_core::speech::SynthesizedAudio;

/// Storage for synthesized audio files.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
    public_base_url: String,
}

impl MediaStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Write synthesized audio to disk and return its filename.
    pub async fn store(
        &self,
        phone_number: &str,
        audio: &SynthesizedAudio,
    ) -> std::io::Result<String> {
        let digits: String = phone_number.chars().filter(|c| c.is_ascii_digit()).collect();
        let token = uuid::Uuid::new_v4().simple().to_string();
        let ext = extension_for(&audio.content_type);
        let filename = format!("response_{}_{}.{}", digits, &token[..8], ext);

        tokio::fs::write(self.dir.join(&filename), &audio.bytes).await?;
        tracing::info!(filename = %filename, bytes = audio.bytes.len(), "Stored synthesized audio");
        Ok(filename)
    }

    /// Public URL the messaging provider fetches the attachment from.
    pub fn public_url(&self, filename: &str) -> String {
        format!(
            "{}/media/{}",
            self.public_base_url.trim_end_matches('/'),
            filename
        )
    }

    /// Resolve a requested filename to a path inside the media directory.
    /// Returns `None` for names that fail validation.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        if !is_valid_media_filename(filename) {
            return None;
        }
        Some(self.dir.join(filename))
    }

    /// Remove audio files older than `max_age`. Best effort; IO errors on
    /// individual files are logged and skipped.
    pub async fn sweep_stale(&self, max_age: Duration) -> std::io::Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable media file");
                    continue;
                }
            };
            if modified < cutoff {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale audio");
                } else {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed = removed, "Swept stale audio files");
        }
        Ok(removed)
    }
}

/// Filenames we generate are alphanumeric with `_`, `-` and a single
/// extension dot; anything else (path separators in particular) is rejected.
pub fn is_valid_media_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.contains("..")
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "mp3",
    }
}

/// Media content type guessed from the stored file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        _ => "audio/mpeg",
    }
}

/// Fetch an inbound voice note from the provider's media URL.
pub async fn download_audio(
    client: &reqwest::Client,
    url: &str,
) -> anyhow::Result<(Vec<u8>, String)> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("media download failed with status {}", status);
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/ogg")
        .to_string();
    let bytes = response.bytes().await?.to_vec();

    Ok((bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_audio() -> SynthesizedAudio {
        SynthesizedAudio {
            bytes: vec![0u8, 1, 2, 3],
            content_type: "audio/mpeg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_writes_file_with_phone_digits() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), "https://bot.example.com");
        let filename = store.store("+15558675309", &sample_audio()).await.unwrap();

        assert!(filename.starts_with("response_15558675309_"));
        assert!(filename.ends_with(".mp3"));
        let written = tokio::fs::read(dir.path().join(&filename)).await.unwrap();
        assert_eq!(written, vec![0u8, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_public_url_joins_base_and_filename() {
        let store = MediaStore::new("/tmp/audio", "https://bot.example.com/");
        assert_eq!(
            store.public_url("response_1_abc.mp3"),
            "https://bot.example.com/media/response_1_abc.mp3"
        );
    }

    #[test]
    fn test_filename_validation_rejects_traversal() {
        assert!(is_valid_media_filename("response_1555_abcd1234.mp3"));
        assert!(!is_valid_media_filename("../etc/passwd"));
        assert!(!is_valid_media_filename("a/b.mp3"));
        assert!(!is_valid_media_filename(".hidden"));
        assert!(!is_valid_media_filename(""));
    }

    #[tokio::test]
    async fn test_resolve_refuses_invalid_names() {
        let store = MediaStore::new("/tmp/audio", "https://bot.example.com");
        assert!(store.resolve("../secrets.txt").is_none());
        assert!(store.resolve("ok_file.mp3").is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_files_past_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), "https://bot.example.com");
        store.store("+1555", &sample_audio()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // max_age of zero makes everything stale
        let removed = store.sweep_stale(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);

        let removed_again = store.sweep_stale(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed_again, 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path(), "https://bot.example.com");
        store.store("+1555", &sample_audio()).await.unwrap();

        let removed = store.sweep_stale(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed, 0);
    }
}
