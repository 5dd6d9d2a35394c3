use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use serenity::model::id::{ChannelId, UserId};
use tracing::{debug, info};

use crate::voice::{PlaybackError, TrackRequest};

pub(crate) const UNKNOWN_UPLOADER: &str = "an unknown uploader";

// One line of `yt-dlp -j --flat-playlist` output. Unknown fields are ignored.
#[derive(Deserialize)]
struct PlaylistEntry {
    url: String,
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
}

impl PlaylistEntry {
    fn into_request(self, requester: UserId, requester_name: &str, channel: ChannelId) -> TrackRequest {
        TrackRequest {
            requester,
            requester_name: requester_name.to_string(),
            channel,
            source_url: self.url,
            title: self.title,
            uploader: self
                .uploader
                .or(self.channel)
                .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
            duration: self.duration.map(Duration::from_secs_f64),
        }
    }
}

pub fn looks_like_playlist(input: &str) -> bool {
    input.starts_with("http") && (input.contains("&list=") || input.contains("?list="))
}

/// Expands a playlist URL into one track request per entry, preserving the
/// playlist's order. Entries that fail to parse are skipped.
pub fn tracks_from_playlist_url(
    url: &str,
    requester: UserId,
    requester_name: &str,
    channel: ChannelId,
) -> Result<Vec<TrackRequest>, PlaybackError> {
    info!("expanding playlist {url}");

    let output = Command::new("yt-dlp")
        .arg("-j")
        .arg("--flat-playlist")
        .arg(url)
        .output()
        .map_err(|why| PlaybackError::Playlist {
            url: url.to_string(),
            reason: format!("yt-dlp failed to start: {why}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlaybackError::Playlist {
            url: url.to_string(),
            reason: stderr.trim().to_string(),
        });
    }

    let lines: Vec<&str> = stdout.lines().filter(|line| !line.trim().is_empty()).collect();
    let tracks: Vec<TrackRequest> = lines
        .iter()
        .filter_map(|line| {
            let entry: PlaylistEntry = serde_json::from_str(line).ok()?;
            Some(entry.into_request(requester, requester_name, channel))
        })
        .collect();

    if tracks.len() < lines.len() {
        debug!("{} playlist entries skipped due to parse errors", lines.len() - tracks.len());
    }

    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_playlist_urls() {
        assert!(looks_like_playlist("https://youtube.com/watch?v=x&list=PL123"));
        assert!(looks_like_playlist("https://youtube.com/playlist?list=PL123"));
        assert!(!looks_like_playlist("https://youtube.com/watch?v=x"));
        assert!(!looks_like_playlist("some search terms"));
    }

    #[test]
    fn parses_flat_playlist_entry() {
        let line = r#"{"_type":"url","url":"https://youtube.com/watch?v=abc","title":"A Song","duration":205.0,"uploader":"Some Channel","playlist_index":1}"#;
        let entry: PlaylistEntry = serde_json::from_str(line).expect("entry parses");
        let request = entry.into_request(UserId(7), "requester", ChannelId(42));

        assert_eq!(request.source_url, "https://youtube.com/watch?v=abc");
        assert_eq!(request.title, "A Song");
        assert_eq!(request.uploader, "Some Channel");
        assert_eq!(request.duration, Some(Duration::from_secs(205)));
        assert_eq!(request.requester, UserId(7));
        assert_eq!(request.channel, ChannelId(42));
    }

    #[test]
    fn missing_optional_fields_fall_back() {
        let line = r#"{"url":"https://youtube.com/watch?v=abc","title":"A Song","duration":null}"#;
        let entry: PlaylistEntry = serde_json::from_str(line).expect("entry parses");
        let request = entry.into_request(UserId(7), "requester", ChannelId(42));

        assert_eq!(request.uploader, UNKNOWN_UPLOADER);
        assert_eq!(request.duration, None);
    }
}
