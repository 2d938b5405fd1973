//! Server test utilities.

use super::fixtures::{DOMAIN, FixtureBuilder, sample_key, sample_site};
use sitehist_cache::Builder;
use sitehist_core::config::{AppConfig, ServerConfig, StorageConfig};
use sitehist_core::{DEFAULT_COMPRESS_MIN_SIZE, Tag};
use sitehist_server::{AppState, create_router};
use sitehist_storage::{ArtifactStore, FilesystemBackend, ObjectStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub artifacts: Arc<ArtifactStore>,
    /// Set when the server runs on a [`FixtureBuilder`].
    pub fixture: Option<Arc<FixtureBuilder>>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Test server whose builder stores the sample site.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Sample-site server with custom config modifications.
    pub async fn with_config<M>(modifier: M) -> Self
    where
        M: FnOnce(&mut AppConfig),
    {
        Self::assemble(modifier, |artifacts, _| {
            let fixture = Arc::new(FixtureBuilder::new(artifacts, sample_site()));
            let builder: Arc<dyn Builder> = fixture.clone();
            (builder, Some(fixture))
        })
        .await
    }

    /// Test server running a custom fixture.
    pub async fn with_fixture<F>(make: F) -> Self
    where
        F: FnOnce(Arc<ArtifactStore>) -> FixtureBuilder,
    {
        Self::assemble(
            |_| {},
            |artifacts, _| {
                let fixture = Arc::new(make(artifacts));
                let builder: Arc<dyn Builder> = fixture.clone();
                (builder, Some(fixture))
            },
        )
        .await
    }

    /// Test server running any builder. `make` receives the artifact store
    /// and a scratch working directory.
    pub async fn with_builder<F>(make: F) -> Self
    where
        F: FnOnce(Arc<ArtifactStore>, &Path) -> Arc<dyn Builder>,
    {
        Self::assemble(|_| {}, |artifacts, work_dir| (make(artifacts, work_dir), None)).await
    }

    async fn assemble<M, F>(modifier: M, make: F) -> Self
    where
        M: FnOnce(&mut AppConfig),
        F: FnOnce(Arc<ArtifactStore>, &Path) -> (Arc<dyn Builder>, Option<Arc<FixtureBuilder>>),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        // Create storage
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let artifacts = Arc::new(ArtifactStore::new(storage, DEFAULT_COMPRESS_MIN_SIZE));

        let work_dir = temp_dir.path().join("work");
        std::fs::create_dir_all(&work_dir).expect("Failed to create work directory");

        let mut config = AppConfig {
            server: ServerConfig {
                domain: DOMAIN.to_string(),
                ..Default::default()
            },
            storage: StorageConfig::Filesystem {
                path: storage_path.clone(),
            },
            ..AppConfig::for_testing()
        };
        config.build.work_dir = work_dir.clone();

        // Apply user modifications
        modifier(&mut config);

        let (builder, fixture) = make(artifacts.clone(), &work_dir);

        // Create state
        let state = AppState::new(config, artifacts.clone(), builder, None);

        // Create router
        let router = create_router(state.clone());

        Self {
            router,
            state,
            artifacts,
            fixture,
            _temp_dir: temp_dir,
        }
    }

    /// The fixture builder. Panics for servers built with `with_builder`.
    pub fn fixture(&self) -> &FixtureBuilder {
        self.fixture
            .as_deref()
            .expect("server was not built with a fixture builder")
    }

    /// Build the sample site through the cache and return its tag.
    pub async fn build_sample(&self) -> Tag {
        let set = self
            .state
            .cache
            .get(&sample_key())
            .await
            .expect("sample build failed");
        set.tag.clone()
    }
}
