//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::io::StreamCopier;
use crate::staging::{StagingError, StagingStore};
use crate::upload::UploadSessionController;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub uploads: UploadSessionController,
}

impl AppState {
    /// Create the staging store described by `config` and the controller
    /// on top of it
    pub fn new(config: Config) -> Result<Self, StagingError> {
        let store = match &config.upload.staging_root {
            Some(root) => StagingStore::open(root)?,
            None => StagingStore::create(config.upload.staging_parent.as_deref())?,
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: StagingStore) -> Self {
        let uploads = UploadSessionController::new(
            store,
            StreamCopier::new(config.upload.copy_buffer_size),
            config.upload.max_chunk_size,
        );

        Self {
            inner: Arc::new(AppStateInner { config, uploads }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload session controller
    pub fn uploads(&self) -> &UploadSessionController {
        &self.inner.uploads
    }

    /// Tear down the staging store
    ///
    /// A generated staging root is removed together with everything in it,
    /// committed files included. An explicit `STAGING_ROOT_DIR` is kept.
    pub fn shutdown(&self) -> Result<(), StagingError> {
        tracing::info!("Shutting down application state...");
        self.inner.uploads.store().teardown()
    }
}
