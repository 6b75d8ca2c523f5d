use crate::application::block_state::BlockStateStore;
use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::lifecycle::LifecycleManager;
use crate::application::scheduler::{DelayPolicy, MonitorScheduler};
use crate::application::token_mapper::{SchemeCatalog, TokenMapper};
use crate::domain::models::{AuthorizationStatus, TimingMode};
use crate::infrastructure::config::{save_timing_mode, save_verification_code_length, Settings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::{KeyValueStore, SqliteKeyValueStore};
use crate::infrastructure::shield::{JsonFileShield, StaticAuthorization};
use crate::infrastructure::state_repository::StateRepository;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub type Lifecycle = LifecycleManager<JsonFileShield, StaticAuthorization>;

/// Everything one process needs, wired once from the workspace root.
pub struct AppContext {
    pub paths: BootstrapResult,
    pub lifecycle: Lifecycle,
}

impl AppContext {
    pub fn open(workspace_root: &Path, authorization: AuthorizationStatus) -> Result<Self, InfraError> {
        let paths = bootstrap_workspace(workspace_root)?;
        let settings = paths.settings.clone();

        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::new(&paths.database_path));
        let repository = StateRepository::new(store);
        repository.ensure_schema()?;

        let mapper = TokenMapper::new(
            repository.clone(),
            SchemeCatalog::with_extra(&settings.extra_schemes),
        );
        let blocks = BlockStateStore::new(
            Arc::new(JsonFileShield::new(&paths.shield_path)),
            Arc::new(StaticAuthorization::new(authorization)),
            repository.clone(),
        );
        let scheduler = MonitorScheduler::new(
            repository.clone(),
            DelayPolicy::from_settings(&settings).cooldown(),
        );
        let lifecycle = LifecycleManager::new(repository, settings, mapper, blocks, scheduler);

        debug!(root = %paths.workspace_root.display(), "application context ready");
        Ok(Self { paths, lifecycle })
    }

    pub fn set_timing_mode(&mut self, mode: TimingMode) -> Result<&Settings, InfraError> {
        let settings = save_timing_mode(&self.paths.config_dir, mode)?;
        self.apply(settings)
    }

    pub fn set_verification_code_length(&mut self, length: usize) -> Result<&Settings, InfraError> {
        let settings = save_verification_code_length(&self.paths.config_dir, length)?;
        self.apply(settings)
    }

    fn apply(&mut self, settings: Settings) -> Result<&Settings, InfraError> {
        self.paths.settings = settings.clone();
        self.lifecycle.apply_settings(settings);
        Ok(self.lifecycle.settings())
    }
}
