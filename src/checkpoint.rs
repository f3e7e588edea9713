use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::persist::{atomic_write_json, load_json};
use crate::{Result, CHECKPOINT_FILE};

/// Where the crawl resumes and whether it already ran into the end of the leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "page", default = "first_page")]
    pub next_page: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub complete: bool,
}

fn first_page() -> u64 {
    1
}

impl Default for Checkpoint {
    fn default() -> Self {
        Checkpoint {
            next_page: first_page(),
            complete: false,
        }
    }
}

/// `{root}/last.json`
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files start a fresh crawl. Pages below 1 are clamped to 1.
    pub async fn load(&self) -> Checkpoint {
        let loaded = match load_json(&self.path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "could not read checkpoint, starting over"
                );
                None
            }
        };
        let mut checkpoint: Checkpoint = loaded.unwrap_or_default();
        checkpoint.next_page = checkpoint.next_page.max(1);
        checkpoint
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        atomic_write_json(&self.path, checkpoint).await
    }
}
