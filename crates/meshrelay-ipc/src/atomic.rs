use std::path::Path;

use tokio::fs;

use crate::error::Result;

/// Writes `bytes` to `dir/filename`, atomically: write a sibling `.tmp` file
/// then rename over the destination (§4.3 "every write is atomic by rename").
/// A reader polling `dir` never observes a partially-written file.
pub async fn atomic_write(dir: &Path, filename: &str, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir).await?;
    let tmp_path = dir.join(format!(".{filename}.tmp"));
    fs::write(&tmp_path, bytes).await?;
    fs::rename(&tmp_path, dir.join(filename)).await?;
    Ok(())
}

pub async fn atomic_write_json<T: serde::Serialize>(
    dir: &Path,
    filename: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    atomic_write(dir, filename, &bytes).await
}

/// A timestamp-ordered filename so a directory listing sorts in delivery
/// order (§4.3).
pub fn timestamped_filename(prefix: &str) -> String {
    format!("{prefix}-{}.json", chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        atomic_write(dir.path(), "a.json", b"{\"x\":1}")
            .await
            .unwrap();
        let content = fs::read_to_string(dir.path().join("a.json")).await.unwrap();
        assert_eq!(content, "{\"x\":1}");
        assert!(!dir.path().join(".a.json.tmp").exists());
    }

    #[tokio::test]
    async fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("ipc/main/input");
        atomic_write(&nested, "b.json", b"{}").await.unwrap();
        assert!(nested.join("b.json").exists());
    }

    #[test]
    fn timestamped_filenames_share_prefix() {
        let name = timestamped_filename("input");
        assert!(name.starts_with("input-"));
        assert!(name.ends_with(".json"));
    }
}
