use crate::capability::{
    Capability, CapabilityError, CapabilityRequest, CapabilityResponse, CapabilitySet,
    CommandCapability,
};
use crate::config::{load_global_settings, ConfigError, Settings, StoreKind};
use crate::coordination::{
    CapabilityKind, Coordinator, FileTaskStore, FocusLimits, SqliteTaskStore, TaskStore,
};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub type CliCoordinator = Coordinator<Box<dyn TaskStore>>;

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

pub fn load_settings() -> Result<Settings, String> {
    load_global_settings().map_err(map_config_err)
}

pub fn ensure_state_root(settings: &Settings) -> Result<PathBuf, String> {
    let root = settings.resolve_state_root().map_err(map_config_err)?;
    fs::create_dir_all(&root).map_err(|e| format!("failed to create {}: {e}", root.display()))?;
    Ok(root)
}

pub fn open_task_store(settings: &Settings) -> Result<Box<dyn TaskStore>, String> {
    let root = ensure_state_root(settings)?;
    match settings.store {
        StoreKind::File => Ok(Box::new(FileTaskStore::new(root))),
        StoreKind::Sqlite => SqliteTaskStore::open_in_state_root(&root)
            .map(|store| Box::new(store) as Box<dyn TaskStore>)
            .map_err(|e| e.to_string()),
    }
}

pub fn build_capabilities(settings: &Settings) -> CapabilitySet {
    let threshold = settings.engine.low_confidence_threshold;
    let build = |kind: CapabilityKind| -> Box<dyn Capability> {
        match settings.capabilities.require(kind) {
            Ok(config) => Box::new(CommandCapability::from_config(kind, config, threshold)),
            Err(err) => Box::new(UnconfiguredCapability {
                kind,
                message: err.to_string(),
            }),
        }
    };
    CapabilitySet::from_boxed(
        build(CapabilityKind::Diagnosis),
        build(CapabilityKind::Automation),
        build(CapabilityKind::Writing),
    )
}

pub fn build_coordinator(settings: &Settings) -> Result<CliCoordinator, String> {
    let root = ensure_state_root(settings)?;
    let store = open_task_store(settings)?;
    Ok(Coordinator::new(store, build_capabilities(settings))
        .with_focus_limits(FocusLimits::new(
            settings.engine.request_context_max_chars,
        ))
        .with_run_lease_seconds(settings.engine.run_lease_seconds)
        .with_log_root(root))
}

/// Stands in for a capability missing from settings so that tasks which never
/// reach it still run.
struct UnconfiguredCapability {
    kind: CapabilityKind,
    message: String,
}

impl Capability for UnconfiguredCapability {
    fn invoke(
        &self,
        _request: &CapabilityRequest<'_>,
    ) -> Result<CapabilityResponse, CapabilityError> {
        Err(CapabilityError::Failed {
            kind: self.kind,
            message: self.message.clone(),
        })
    }
}
