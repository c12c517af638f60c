//! Ephemeral working trees owned by a single attempt.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

use crate::io::config::SolverConfig;
use crate::io::git::Git;
use crate::io::issue::Issue;

/// Checkout of an issue's repository at its base commit.
///
/// The backing directory is removed when the value drops, whatever the
/// attempt's verdict.
#[derive(Debug)]
pub struct WorkingTree {
    _storage: TempDir,
    root: PathBuf,
    base_commit: String,
}

impl WorkingTree {
    /// Clone `issue.repo` and check out `issue.base_commit`.
    #[instrument(skip_all, fields(repo = %issue.repo, base = %issue.short_commit()))]
    pub fn materialize(issue: &Issue, cfg: &SolverConfig) -> Result<Self> {
        let storage = match &cfg.workspace_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("create workspace dir {}", dir.display()))?;
                tempfile::Builder::new()
                    .prefix("solver-")
                    .tempdir_in(dir)
                    .with_context(|| format!("create tree under {}", dir.display()))?
            }
            None => tempfile::Builder::new()
                .prefix("solver-")
                .tempdir()
                .context("create tree tempdir")?,
        };
        let root = storage.path().join("repo");
        let url = cfg.clone_url(&issue.repo);
        debug!(url, root = %root.display(), "cloning");
        let git = Git::clone_repo(&url, &root, cfg.clone_timeout())?;
        git.checkout(&issue.base_commit, cfg.checkout_timeout())
            .with_context(|| format!("checkout {}", issue.base_commit))?;
        info!("working tree ready");
        Ok(Self {
            _storage: storage,
            root,
            base_commit: issue.base_commit.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_commit(&self) -> &str {
        &self.base_commit
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }
}
