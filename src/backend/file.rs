//! File-persisted backend: memory backend state saved as YAML after each mutation.
//!
//! Stands in for a remote provider so repeated runs observe earlier runs'
//! stacks, resources, and identity markers.

use super::memory::{BackendState, MemoryBackend};
use super::{ImageCatalog, ProvisioningBackend};
use crate::core::error::BackendError;
use crate::core::types::{
    DesiredState, ExistingResource, MachineImage, ResourceDescriptor, StackOutputs,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Backend whose state lives in a YAML file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: MemoryBackend,
}

impl FileBackend {
    /// Open the state file, starting empty if it does not exist.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let state = load_state(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryBackend::with_state(state),
        })
    }

    /// Apply stacks under a named credential profile.
    pub fn with_credentials(mut self, profile: impl Into<String>) -> Self {
        self.inner = self.inner.with_credentials(profile);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &BackendState {
        self.inner.state()
    }

    fn save(&self) -> Result<(), BackendError> {
        save_state(&self.path, self.inner.state())
    }
}

/// Load backend state. Returns None if the file doesn't exist.
pub fn load_state(path: &Path) -> Result<Option<BackendState>, BackendError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| BackendError::State(format!("cannot read {}: {}", path.display(), e)))?;
    let state = serde_yaml_ng::from_str(&content)
        .map_err(|e| BackendError::State(format!("invalid state file {}: {}", path.display(), e)))?;
    Ok(Some(state))
}

/// Stage the YAML beside `path`, then rename it into place.
pub fn save_state(path: &Path, state: &BackendState) -> Result<(), BackendError> {
    let yaml = serde_yaml_ng::to_string(state)
        .map_err(|e| BackendError::State(format!("cannot encode backend state: {}", e)))?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| io_error("create", dir, e))?;
    }
    let staged = path.with_extension("yaml.tmp");
    fs::write(&staged, yaml).map_err(|e| io_error("stage", &staged, e))?;
    fs::rename(&staged, path).map_err(|e| io_error("replace", path, e))
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> BackendError {
    BackendError::State(format!("cannot {} {}: {}", action, path.display(), err))
}

impl ImageCatalog for FileBackend {
    fn list_images(&self) -> Result<Vec<MachineImage>, BackendError> {
        self.inner.list_images()
    }
}

impl ProvisioningBackend for FileBackend {
    fn apply(&mut self, descriptor: &ResourceDescriptor) -> Result<StackOutputs, BackendError> {
        let outputs = self.inner.apply(descriptor)?;
        self.save()?;
        Ok(outputs)
    }

    fn destroy(&mut self, stack_name: &str) -> Result<(), BackendError> {
        self.inner.destroy(stack_name)?;
        self.save()
    }

    fn list_existing(&self, kind: &str) -> Result<Vec<ExistingResource>, BackendError> {
        self.inner.list_existing(kind)
    }

    fn create(
        &mut self,
        kind: &str,
        marker: &str,
        desired: &DesiredState,
    ) -> Result<ExistingResource, BackendError> {
        let resource = self.inner.create(kind, marker, desired)?;
        self.save()?;
        Ok(resource)
    }

    fn availability_zones(&self, region: &str) -> Result<Vec<String>, BackendError> {
        self.inner.availability_zones(region)
    }
}
