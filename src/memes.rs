use std::io::ErrorKind;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum MemeError {
    #[error("the meme library is empty")]
    Empty,
    #[error("could not access the meme library: {0}")]
    Io(#[from] std::io::Error),
}

/// Newline-delimited library of meme links, kept on disk so additions
/// survive restarts.
pub struct MemeLibrary {
    path: PathBuf,
}

impl MemeLibrary {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn random(&self) -> Result<String, MemeError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(why) if why.kind() == ErrorKind::NotFound => return Err(MemeError::Empty),
            Err(why) => return Err(why.into()),
        };

        let lines: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        lines
            .choose(&mut rand::thread_rng())
            .map(|line| line.to_string())
            .ok_or(MemeError::Empty)
    }

    pub async fn add(&self, entry: &str) -> Result<(), MemeError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{entry}\n").as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn random_returns_an_added_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = MemeLibrary::new(dir.path().join("memes.txt"));

        library.add("https://example.com/a.png").await.expect("add");
        let meme = library.random().await.expect("random");
        assert_eq!(meme, "https://example.com/a.png");
    }

    #[tokio::test]
    async fn missing_library_file_reports_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = MemeLibrary::new(dir.path().join("memes.txt"));

        assert!(matches!(library.random().await, Err(MemeError::Empty)));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memes.txt");
        tokio::fs::write(&path, "\n\nhttps://example.com/b.png\n\n")
            .await
            .expect("write");

        let library = MemeLibrary::new(path);
        let meme = library.random().await.expect("random");
        assert_eq!(meme, "https://example.com/b.png");
    }

    #[tokio::test]
    async fn entries_accumulate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let library = MemeLibrary::new(dir.path().join("memes.txt"));

        library.add("one").await.expect("add");
        library.add("two").await.expect("add");

        let meme = library.random().await.expect("random");
        assert!(meme == "one" || meme == "two");
    }
}
