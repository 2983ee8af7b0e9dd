//! Per-request workspace: the only place on disk a request may touch.
//!
//! ## Layout
//!
//! ```text
//! <workspace_root>/docrelay-<uuid>-<random>/
//!   input.<ext>        request body
//!   assets/            downloaded assets; working directory of every tool
//!   out/               converter output, compiler output and its aux files
//! ```
//!
//! The directory is created through [`tempfile::Builder`], which creates it
//! with an exclusive `mkdir` and a random suffix, on top of the per-request
//! UUID. Two requests arriving in the same instant therefore never share a
//! path.
//!
//! ## Cleanup
//!
//! [`Workspace::teardown`] consumes the workspace, so it can run at most
//! once. If a request future is dropped before reaching it (client
//! disconnect, panic), dropping the inner `TempDir` still removes the tree.

use crate::error::DocRelayError;
use crate::pipeline::plan::{ConversionPlan, INTERMEDIATE_FILE_NAME};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

const ASSET_DIR: &str = "assets";
const OUTPUT_DIR: &str = "out";

/// The filesystem footprint of one request.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: TempDir,
    input_path: PathBuf,
    output_path: PathBuf,
    asset_dir: PathBuf,
    output_dir: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `root` for the request `id`.
    pub async fn allocate(
        root: &Path,
        id: Uuid,
        plan: &ConversionPlan,
    ) -> Result<Self, DocRelayError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| DocRelayError::io("create workspace root", root, e))?;

        let dir = {
            let parent = root.to_path_buf();
            let prefix = format!("docrelay-{id}-");
            tokio::task::spawn_blocking(move || {
                tempfile::Builder::new().prefix(&prefix).tempdir_in(&parent)
            })
            .await
            .map_err(|e| DocRelayError::Internal(format!("workspace task failed: {e}")))?
            .map_err(|e| DocRelayError::io("create workspace in", root, e))?
        };

        let asset_dir = dir.path().join(ASSET_DIR);
        let output_dir = dir.path().join(OUTPUT_DIR);
        for sub in [&asset_dir, &output_dir] {
            tokio::fs::create_dir(sub)
                .await
                .map_err(|e| DocRelayError::io("create directory", sub.as_path(), e))?;
        }

        let workspace = Self {
            id,
            input_path: dir.path().join(plan.input_file_name()),
            output_path: output_dir.join(plan.output_file_name()),
            asset_dir,
            output_dir,
            dir,
        };
        debug!("Allocated workspace {}", workspace.path().display());
        Ok(workspace)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Root directory of this workspace.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// Where the final document is expected once conversion succeeds.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn asset_dir(&self) -> &Path {
        &self.asset_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where the converter writes LaTeX on the two-stage PDF route.
    pub fn intermediate_path(&self) -> PathBuf {
        self.output_dir.join(INTERMEDIATE_FILE_NAME)
    }

    /// Persist the request body as the input document.
    pub async fn write_input(&self, bytes: &[u8]) -> Result<(), DocRelayError> {
        tokio::fs::write(&self.input_path, bytes)
            .await
            .map_err(|e| DocRelayError::io("write input", &self.input_path, e))?;
        debug!(
            "Wrote {} input bytes to {}",
            bytes.len(),
            self.input_path.display()
        );
        Ok(())
    }

    /// Read the produced document fully into memory.
    ///
    /// Fails with [`DocRelayError::OutputTooLarge`] before reading anything
    /// when the file exceeds `limit` bytes.
    pub async fn read_output(&self, limit: u64) -> Result<Vec<u8>, DocRelayError> {
        let path = &self.output_path;
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| DocRelayError::io("stat output", path, e))?;
        if meta.len() > limit {
            return Err(DocRelayError::OutputTooLarge {
                path: path.clone(),
                size: meta.len(),
                limit,
            });
        }
        tokio::fs::read(path)
            .await
            .map_err(|e| DocRelayError::io("read output", path, e))
    }

    /// Remove every file and directory created for this request.
    ///
    /// Failures are logged and swallowed so they never replace the outcome
    /// of the request itself.
    pub async fn teardown(self) {
        let path = self.dir.path().to_path_buf();
        let id = self.id;
        match tokio::task::spawn_blocking(move || self.dir.close()).await {
            Ok(Ok(())) => debug!("Removed workspace {}", path.display()),
            Ok(Err(e)) => warn!(
                "Request {}: failed to remove workspace {}: {}",
                id,
                path.display(),
                e
            ),
            Err(e) => warn!(
                "Request {}: workspace cleanup task for {} panicked: {}",
                id,
                path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    fn plan(content_type: &str, accept: &str) -> ConversionPlan {
        let config = ServiceConfig::default();
        ConversionPlan::resolve(content_type, accept, &[], &config).unwrap()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn same_id_never_shares_paths() {
        let root = tempfile::tempdir().unwrap();
        let plan = plan("text/markdown", "text/html");
        let id = Uuid::new_v4();

        let a = Workspace::allocate(root.path(), id, &plan).await.unwrap();
        let b = Workspace::allocate(root.path(), id, &plan).await.unwrap();

        assert_ne!(a.path(), b.path());
        assert_ne!(a.input_path(), b.input_path());
        assert_ne!(a.asset_dir(), b.asset_dir());
        assert_ne!(a.output_dir(), b.output_dir());
        assert!(a.asset_dir().is_dir());
        assert!(a.output_dir().is_dir());

        a.teardown().await;
        b.teardown().await;
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_allocations_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let plan = plan("text/markdown", "text/html");
        let id = Uuid::new_v4();

        let all = futures::future::join_all(
            (0..16).map(|_| Workspace::allocate(root.path(), id, &plan)),
        )
        .await;
        let mut paths: Vec<_> = all
            .iter()
            .map(|ws| ws.as_ref().unwrap().path().to_path_buf())
            .collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 16);

        for ws in all {
            ws.unwrap().teardown().await;
        }
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn paths_follow_plan() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(
            root.path(),
            Uuid::new_v4(),
            &plan("application/x-latex", "application/pdf"),
        )
        .await
        .unwrap();
        assert!(ws.input_path().ends_with("input.tex"));
        assert!(ws.output_path().ends_with("out/output.pdf"));
        assert!(ws.intermediate_path().ends_with("out/intermediate.tex"));
        assert!(ws
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&format!("docrelay-{}-", ws.id())));
        ws.teardown().await;
    }

    #[tokio::test]
    async fn write_then_read_output() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(root.path(), Uuid::new_v4(), &plan("text/markdown", "text/html"))
            .await
            .unwrap();
        ws.write_input(b"# Title").await.unwrap();
        assert_eq!(std::fs::read(ws.input_path()).unwrap(), b"# Title");

        std::fs::write(ws.output_path(), b"<h1>Title</h1>").unwrap();
        assert_eq!(ws.read_output(1024).await.unwrap(), b"<h1>Title</h1>");
        ws.teardown().await;
    }

    #[tokio::test]
    async fn read_output_enforces_limit() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(root.path(), Uuid::new_v4(), &plan("text/markdown", "text/html"))
            .await
            .unwrap();
        std::fs::write(ws.output_path(), vec![b'x'; 64]).unwrap();
        let err = ws.read_output(10).await.unwrap_err();
        assert!(matches!(err, DocRelayError::OutputTooLarge { size: 64, limit: 10, .. }));
        ws.teardown().await;
    }

    #[tokio::test]
    async fn missing_output_is_io_error() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(root.path(), Uuid::new_v4(), &plan("text/markdown", "text/html"))
            .await
            .unwrap();
        let err = ws.read_output(1024).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        ws.teardown().await;
    }

    #[tokio::test]
    async fn teardown_removes_nested_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(root.path(), Uuid::new_v4(), &plan("text/markdown", "text/html"))
            .await
            .unwrap();
        ws.write_input(b"body").await.unwrap();
        std::fs::write(ws.asset_dir().join("logo.png"), b"png").unwrap();
        std::fs::create_dir(ws.output_dir().join("nested")).unwrap();
        std::fs::write(ws.output_dir().join("nested/output.aux"), b"aux").unwrap();

        let path = ws.path().to_path_buf();
        ws.teardown().await;
        assert!(!path.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn drop_also_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(root.path(), Uuid::new_v4(), &plan("text/markdown", "text/html"))
            .await
            .unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }
}
