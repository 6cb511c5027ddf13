//! Graph node contract: a spec plus one of two execute variants.
//!
//! Template nodes build a descriptor and hand it to the backend's `apply`;
//! custom actions run an arbitrary idempotent procedure against the backend.

use super::error::ExecutionFailure;
use super::types::{outputs_from_stack, NodeSpec, Outputs, ResolvedInputs, ResourceDescriptor};
use crate::backend::ProvisioningBackend;

/// Builds the resource descriptor of a template-apply node.
pub trait Template {
    /// Backend-side stack name derived from resolved inputs.
    fn stack_name(&self, inputs: &ResolvedInputs) -> String;

    /// Build the descriptor. May query the backend read-only (zones, images).
    fn descriptor(
        &self,
        inputs: &ResolvedInputs,
        backend: &dyn ProvisioningBackend,
    ) -> Result<ResourceDescriptor, ExecutionFailure>;
}

/// An arbitrary procedure. Must be safe to re-run.
pub trait CustomAction {
    fn run(
        &self,
        inputs: &ResolvedInputs,
        backend: &mut dyn ProvisioningBackend,
    ) -> Result<Outputs, ExecutionFailure>;

    /// Undo the action during rollback. Leaves the resource by default.
    fn teardown(
        &self,
        _inputs: &ResolvedInputs,
        _outputs: &Outputs,
        _backend: &mut dyn ProvisioningBackend,
    ) -> Result<(), ExecutionFailure> {
        Ok(())
    }
}

type ActionBody = dyn Fn(&ResolvedInputs, &mut dyn ProvisioningBackend) -> Result<Outputs, ExecutionFailure>;

/// Closure-backed custom action.
struct ActionFn(Box<ActionBody>);

impl CustomAction for ActionFn {
    fn run(
        &self,
        inputs: &ResolvedInputs,
        backend: &mut dyn ProvisioningBackend,
    ) -> Result<Outputs, ExecutionFailure> {
        (self.0)(inputs, backend)
    }
}

/// The execute variant of a node.
pub enum Step {
    Template(Box<dyn Template>),
    Action(Box<dyn CustomAction>),
}

/// A named unit of provisioning work.
pub struct Node {
    spec: NodeSpec,
    step: Step,
}

impl Node {
    pub fn template(spec: NodeSpec, template: impl Template + 'static) -> Self {
        Self {
            spec,
            step: Step::Template(Box::new(template)),
        }
    }

    pub fn action(spec: NodeSpec, action: impl CustomAction + 'static) -> Self {
        Self {
            spec,
            step: Step::Action(Box::new(action)),
        }
    }

    /// Custom action from a closure.
    pub fn from_fn<F>(spec: NodeSpec, f: F) -> Self
    where
        F: Fn(&ResolvedInputs, &mut dyn ProvisioningBackend) -> Result<Outputs, ExecutionFailure>
            + 'static,
    {
        Self::action(spec, ActionFn(Box::new(f)))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn is_template(&self) -> bool {
        matches!(self.step, Step::Template(_))
    }

    /// Build the descriptor without applying it. `None` for custom actions.
    pub fn describe(
        &self,
        inputs: &ResolvedInputs,
        backend: &dyn ProvisioningBackend,
    ) -> Option<Result<ResourceDescriptor, ExecutionFailure>> {
        match &self.step {
            Step::Template(t) => Some(t.descriptor(inputs, backend)),
            Step::Action(_) => None,
        }
    }

    /// Run the node's step and return its outputs.
    pub fn execute(
        &self,
        inputs: &ResolvedInputs,
        backend: &mut dyn ProvisioningBackend,
    ) -> Result<Outputs, ExecutionFailure> {
        match &self.step {
            Step::Template(t) => {
                let descriptor = t.descriptor(inputs, &*backend)?;
                let stack = backend.apply(&descriptor)?;
                Ok(outputs_from_stack(stack))
            }
            Step::Action(a) => a.run(inputs, backend),
        }
    }

    /// Undo a completed node. Template nodes destroy their stack.
    pub fn teardown(
        &self,
        inputs: &ResolvedInputs,
        outputs: &Outputs,
        backend: &mut dyn ProvisioningBackend,
    ) -> Result<(), ExecutionFailure> {
        match &self.step {
            Step::Template(t) => Ok(backend.destroy(&t.stack_name(inputs))?),
            Step::Action(a) => a.teardown(inputs, outputs, backend),
        }
    }
}
