//! Find-or-create for directly-managed resources.
//!
//! A resource is identified by a stable marker attached at creation. If a
//! resource of the kind already carries the marker it is reused untouched,
//! so repeated runs converge on a single resource.

use super::error::BackendError;
use super::types::{DesiredState, ExistingResource};
use crate::backend::ProvisioningBackend;
use tracing::{info, warn};

/// Outcome of [`ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensured {
    pub resource: ExistingResource,

    /// False when an existing resource was reused
    pub created: bool,
}

/// Reuse the resource carrying `marker`, or create it.
pub fn ensure<B: ProvisioningBackend + ?Sized>(
    backend: &mut B,
    kind: &str,
    marker: &str,
    desired: &DesiredState,
) -> Result<Ensured, BackendError> {
    let existing = backend.list_existing(kind)?;
    let mut matching = existing
        .into_iter()
        .filter(|r| r.marker.as_deref() == Some(marker));

    if let Some(resource) = matching.next() {
        if matching.next().is_some() {
            warn!(kind, id = %resource.id, "several resources carry the same marker; reusing the first");
        }
        info!(kind, id = %resource.id, name = %resource.name, "reusing existing resource");
        return Ok(Ensured {
            resource,
            created: false,
        });
    }

    let resource = backend.create(kind, marker, desired)?;
    info!(kind, id = %resource.id, name = %resource.name, "created resource");
    Ok(Ensured {
        resource,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, BackendState, MemoryBackend};
    use indexmap::IndexMap;

    fn zone(name: &str) -> DesiredState {
        DesiredState {
            name: name.to_string(),
            properties: IndexMap::new(),
        }
    }

    #[test]
    fn test_ensure_twice_converges() {
        let mut backend = MemoryBackend::new();
        let first = ensure(&mut backend, "hostedzone", "zoneA", &zone("a.internal")).unwrap();
        let second = ensure(&mut backend, "hostedzone", "zoneA", &zone("a.internal")).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.resource.id, second.resource.id);
        assert_eq!(backend.list_existing("hostedzone").unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_reuse_does_not_mutate() {
        let mut backend = MemoryBackend::new();
        ensure(&mut backend, "hostedzone", "zoneA", &zone("a.internal")).unwrap();
        let before = backend.calls().len();
        ensure(&mut backend, "hostedzone", "zoneA", &zone("renamed.internal")).unwrap();
        let calls = backend.calls();
        assert_eq!(calls[before..], [BackendCall::ListExisting("hostedzone".into())]);
        assert_eq!(backend.state().resources[0].name, "a.internal");
    }

    #[test]
    fn test_ensure_distinct_markers() {
        let mut backend = MemoryBackend::new();
        let a = ensure(&mut backend, "hostedzone", "zoneA", &zone("a.internal")).unwrap();
        let b = ensure(&mut backend, "hostedzone", "zoneB", &zone("b.internal")).unwrap();
        assert_ne!(a.resource.id, b.resource.id);
    }

    #[test]
    fn test_ensure_ignores_unmarked_and_other_kinds() {
        let mut state = BackendState::default();
        state.resources.push(ExistingResource {
            id: "/hostedzone/MANUAL".into(),
            kind: "hostedzone".into(),
            name: "a.internal".into(),
            marker: None,
            properties: IndexMap::new(),
        });
        state.resources.push(ExistingResource {
            id: "bucket-1".into(),
            kind: "bucket".into(),
            name: "a.internal".into(),
            marker: Some("zoneA".into()),
            properties: IndexMap::new(),
        });
        let mut backend = MemoryBackend::with_state(state);
        let out = ensure(&mut backend, "hostedzone", "zoneA", &zone("a.internal")).unwrap();
        assert!(out.created);
        assert_ne!(out.resource.id, "/hostedzone/MANUAL");
    }

    #[test]
    fn test_ensure_create_error_propagates() {
        let mut backend = MemoryBackend::new();
        let err = ensure(&mut backend, "hostedzone", "zoneA", &zone("")).unwrap_err();
        assert!(matches!(err, BackendError::Rejected { .. }));
    }
}
