use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::TorrentError;

/// Writes the fully verified download to its destination path.
pub fn write_output(path: &Path, buf: &[u8]) -> Result<(), TorrentError> {
    fs::write(path, buf)
        .with_context(|| format!("error writing output file {}", path.display()))?;
    Ok(())
}

/// Best-effort snapshot of an interrupted download. Written when the engine
/// is cancelled mid-run; nothing resumes from it yet, but it records which
/// pieces had been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeData {
    pub info_hash: String,
    pub completed_pieces: Vec<bool>,
    pub downloaded_bytes: u64,
}

impl ResumeData {
    pub fn save(&self, path: &Path) -> Result<(), TorrentError> {
        let encoded = serde_json::to_string(self)?;
        fs::write(path, encoded)
            .with_context(|| format!("error writing resume file {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TorrentError> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("error reading resume file {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn delete(path: &Path) -> Result<(), TorrentError> {
        fs::remove_file(path)
            .with_context(|| format!("error removing resume file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        write_output(&path, &[0xaa; 128]).unwrap();

        assert_eq!(fs::read(&path).unwrap(), vec![0xaa; 128]);
    }

    #[test]
    fn test_resume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.json");
        let snapshot = ResumeData {
            info_hash: "00ff".repeat(10),
            completed_pieces: vec![true, false, true],
            downloaded_bytes: 4096,
        };

        snapshot.save(&path).unwrap();

        assert!(ResumeData::exists(&path));
        assert_eq!(ResumeData::load(&path).unwrap(), snapshot);

        ResumeData::delete(&path).unwrap();
        assert!(!ResumeData::exists(&path));
    }

    #[test]
    fn test_load_missing_resume_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");

        assert!(matches!(
            ResumeData::load(&path),
            Err(TorrentError::Setup(_))
        ));
    }
}
