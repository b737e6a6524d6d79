//! Snapshot persistence under `<base>/jobs/`.
//!
//! Every write goes to `<id>.json.tmp`, is synced, and is then renamed over
//! `<id>.json`, so readers only ever observe a complete document. The
//! coordinator is the only writer; any clone of the store may read.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::JobError;
use crate::job::snapshot::{JobListing, JobSnapshot};
use crate::sanitize::is_valid_job_id;

#[derive(Debug, Clone)]
pub struct JobStore {
    jobs_dir: PathBuf,
}

impl JobStore {
    pub fn new<P: AsRef<Path>>(jobs_dir: P) -> Self {
        Self {
            jobs_dir: jobs_dir.as_ref().to_path_buf(),
        }
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn snapshot_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", job_id))
    }

    fn temp_path(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{}.json.tmp", job_id))
    }

    /// Creates the jobs directory if needed.
    pub async fn ensure_dir(&self) -> Result<(), JobError> {
        tokio::fs::create_dir_all(&self.jobs_dir)
            .await
            .map_err(|source| JobError::Persistence {
                path: self.jobs_dir.clone(),
                source,
            })
    }

    /// Atomically replaces the stored snapshot of a job.
    pub async fn save(&self, snapshot: &JobSnapshot) -> Result<(), JobError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        self.ensure_dir().await?;

        let tmp = self.temp_path(&snapshot.job_id);
        let target = self.snapshot_path(&snapshot.job_id);

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &target).await
        };

        if let Err(source) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(JobError::Persistence {
                path: target,
                source,
            });
        }

        log::trace!(
            "Saved snapshot for job {} ({})",
            snapshot.job_id,
            snapshot.status
        );
        Ok(())
    }

    /// Loads a stored snapshot. Unknown or malformed ids are `NotFound`.
    pub async fn load(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        if !is_valid_job_id(job_id) {
            return Err(JobError::NotFound(job_id.to_string()));
        }

        let path = self.snapshot_path(job_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JobError::NotFound(job_id.to_string()));
            }
            Err(source) => return Err(JobError::ReadSnapshot { path, source }),
        };

        serde_json::from_slice(&bytes).map_err(|source| JobError::MalformedSnapshot { path, source })
    }

    pub async fn exists(&self, job_id: &str) -> bool {
        if !is_valid_job_id(job_id) {
            return false;
        }
        tokio::fs::try_exists(self.snapshot_path(job_id))
            .await
            .unwrap_or(false)
    }

    /// Reads every stored snapshot. Unreadable files are skipped with a
    /// warning; leftover temp files are ignored.
    pub async fn load_all(&self) -> Result<Vec<JobSnapshot>, JobError> {
        let mut snapshots = Vec::new();
        for (job_id, _) in self.snapshot_ids().await? {
            match self.load(&job_id).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => log::warn!("Skipping snapshot for job {}: {}", job_id, e),
            }
        }
        Ok(snapshots)
    }

    /// Summaries of all stored jobs, most recently written first.
    pub async fn list(&self) -> Result<Vec<JobListing>, JobError> {
        let mut ids = self.snapshot_ids().await?;
        ids.sort_by(|a, b| b.1.cmp(&a.1));

        let mut listings = Vec::with_capacity(ids.len());
        for (job_id, _) in ids {
            match self.load(&job_id).await {
                Ok(snapshot) => listings.push(JobListing::from(&snapshot)),
                Err(e) => log::warn!("Skipping snapshot for job {}: {}", job_id, e),
            }
        }
        Ok(listings)
    }

    async fn snapshot_ids(&self) -> Result<Vec<(String, std::time::SystemTime)>, JobError> {
        let mut entries = match tokio::fs::read_dir(&self.jobs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JobError::ReadSnapshot {
                    path: self.jobs_dir.clone(),
                    source,
                })
            }
        };

        let mut ids = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(JobError::ReadSnapshot {
                        path: self.jobs_dir.clone(),
                        source,
                    })
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let Some(job_id) = name.strip_suffix(".json") else {
                continue;
            };
            if !is_valid_job_id(job_id) {
                continue;
            }

            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            ids.push((job_id.to_string(), modified));
        }
        Ok(ids)
    }
}
