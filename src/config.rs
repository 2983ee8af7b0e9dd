//! Service configuration.
//!
//! Every knob lives in [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The binary maps command-line flags and the
//! `PANDOC`, `PDFLATEX` and `PORT` environment variables onto the builder;
//! library users and tests call the builder directly.

use crate::error::DocRelayError;
use crate::pipeline::plan::is_valid_filter_name;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the conversion service.
///
/// # Example
/// ```rust
/// use docrelay::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .port(8080)
///     .pandoc_path("/usr/local/bin/pandoc")
///     .allowed_filters(["table"])
///     .build()
///     .unwrap();
/// assert_eq!(config.port, 8080);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the listener binds to. Default: `0.0.0.0`.
    pub host: String,

    /// Listening port. Default: 80.
    pub port: u16,

    /// Path to the general document-conversion executable. Default: `pandoc`.
    pub pandoc_path: PathBuf,

    /// Path to the LaTeX compiler executable. Default: `pdflatex`.
    pub pdflatex_path: PathBuf,

    /// Directory under which one workspace per request is created.
    /// Default: the system temp directory.
    pub workspace_root: PathBuf,

    /// Directory holding filter scripts. Made absolute by `build()`, because
    /// the tools run with the workspace asset directory as their working
    /// directory. Default: `filters`.
    pub filter_dir: PathBuf,

    /// File extension of filter scripts. Default: `py`.
    pub filter_extension: String,

    /// Filter identifiers clients may request. Default: `heading_to_toc`, `table`.
    pub allowed_filters: Vec<String>,

    /// Maximum number of external tool processes running at once.
    /// Default: available parallelism.
    ///
    /// Requests beyond this wait for a permit instead of spawning, so a burst
    /// of LaTeX jobs cannot exhaust processes or memory on the host.
    pub max_concurrent_tools: usize,

    /// Deadline for a single external tool invocation. Default: 120 s.
    ///
    /// The two compiler passes each get the full deadline.
    pub tool_timeout: Duration,

    /// Per-asset download timeout in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Maximum size of a single downloaded asset. Default: 25 MiB.
    ///
    /// Checked against `Content-Length` up front and again while streaming,
    /// so a server that lies about the length is still cut off.
    pub max_asset_bytes: u64,

    /// Maximum accepted request body. Default: 50 MiB.
    pub max_body_bytes: usize,

    /// Maximum converted document the service will buffer. Default: 100 MiB.
    ///
    /// Outputs are read fully into memory before the response is written;
    /// anything larger fails the request with an I/O error.
    pub max_output_bytes: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            pandoc_path: PathBuf::from("pandoc"),
            pdflatex_path: PathBuf::from("pdflatex"),
            workspace_root: std::env::temp_dir(),
            filter_dir: PathBuf::from("filters"),
            filter_extension: "py".to_string(),
            allowed_filters: vec!["heading_to_toc".to_string(), "table".to_string()],
            max_concurrent_tools: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            tool_timeout: Duration::from_secs(120),
            download_timeout_secs: 60,
            max_asset_bytes: 25 * 1024 * 1024,
            max_body_bytes: 50 * 1024 * 1024,
            max_output_bytes: 100 * 1024 * 1024,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// `host:port` string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether `name` may be passed to the converter as a filter.
    pub fn is_filter_allowed(&self, name: &str) -> bool {
        self.allowed_filters.iter().any(|f| f == name)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn pandoc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pandoc_path = path.into();
        self
    }

    pub fn pdflatex_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdflatex_path = path.into();
        self
    }

    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = path.into();
        self
    }

    pub fn filter_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.filter_dir = path.into();
        self
    }

    pub fn filter_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.filter_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn allowed_filters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_filters = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_concurrent_tools(mut self, n: usize) -> Self {
        self.config.max_concurrent_tools = n.max(1);
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn tool_timeout_secs(self, secs: u64) -> Self {
        self.tool_timeout(Duration::from_secs(secs))
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn max_asset_bytes(mut self, n: u64) -> Self {
        self.config.max_asset_bytes = n;
        self
    }

    pub fn max_body_bytes(mut self, n: usize) -> Self {
        self.config.max_body_bytes = n;
        self
    }

    pub fn max_output_bytes(mut self, n: u64) -> Self {
        self.config.max_output_bytes = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<ServiceConfig, DocRelayError> {
        let c = &mut self.config;
        if c.tool_timeout.is_zero() {
            return Err(DocRelayError::InvalidConfig(
                "tool timeout must be greater than zero".into(),
            ));
        }
        if c.max_body_bytes == 0 || c.max_output_bytes == 0 || c.max_asset_bytes == 0 {
            return Err(DocRelayError::InvalidConfig(
                "size limits must be greater than zero".into(),
            ));
        }
        if let Some(bad) = c.allowed_filters.iter().find(|f| !is_valid_filter_name(f)) {
            return Err(DocRelayError::InvalidConfig(format!(
                "filter name '{bad}' may only contain ASCII letters, digits, '_' and '-'"
            )));
        }
        if c.filter_extension.contains(['/', '\\']) {
            return Err(DocRelayError::InvalidConfig(format!(
                "filter extension '{}' must not contain path separators",
                c.filter_extension
            )));
        }
        c.filter_dir = std::path::absolute(&c.filter_dir).map_err(|e| {
            DocRelayError::InvalidConfig(format!(
                "cannot resolve filter directory '{}': {e}",
                c.filter_dir.display()
            ))
        })?;
        c.workspace_root = std::path::absolute(&c.workspace_root).map_err(|e| {
            DocRelayError::InvalidConfig(format!(
                "cannot resolve workspace root '{}': {e}",
                c.workspace_root.display()
            ))
        })?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ServiceConfig::default();
        assert_eq!(c.port, 80);
        assert_eq!(c.pandoc_path, PathBuf::from("pandoc"));
        assert_eq!(c.pdflatex_path, PathBuf::from("pdflatex"));
        assert!(c.is_filter_allowed("table"));
        assert!(c.is_filter_allowed("heading_to_toc"));
        assert!(!c.is_filter_allowed("evil"));
        assert!(c.max_concurrent_tools >= 1);
    }

    #[test]
    fn build_makes_paths_absolute() {
        let c = ServiceConfig::builder()
            .filter_dir("filters")
            .workspace_root("scratch")
            .build()
            .unwrap();
        assert!(c.filter_dir.is_absolute());
        assert!(c.workspace_root.is_absolute());
        assert!(c.filter_dir.ends_with("filters"));
    }

    #[test]
    fn build_rejects_bad_filter_names() {
        let err = ServiceConfig::builder()
            .allowed_filters(["../../bin/sh"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("../../bin/sh"), "got: {err}");
    }

    #[test]
    fn build_rejects_zero_size_limits() {
        let err = ServiceConfig::builder()
            .max_asset_bytes(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("size limits"), "got: {err}");
    }

    #[test]
    fn build_rejects_zero_timeout() {
        assert!(ServiceConfig::builder()
            .tool_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn setters_clamp() {
        let c = ServiceConfig::builder()
            .max_concurrent_tools(0)
            .download_timeout_secs(0)
            .filter_extension(".lua")
            .build()
            .unwrap();
        assert_eq!(c.max_concurrent_tools, 1);
        assert_eq!(c.download_timeout_secs, 1);
        assert_eq!(c.filter_extension, "lua");
        assert_eq!(
            ServiceConfig::builder().host("127.0.0.1").port(9000).build().unwrap().bind_addr(),
            "127.0.0.1:9000"
        );
    }
}
