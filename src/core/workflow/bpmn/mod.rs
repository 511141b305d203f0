//! BPMN 2.0 interchange with the procflow extension namespace.
//!
//! Standard elements (`process`, `task`, `sequenceFlow`, ...) live in the
//! BPMN model namespace. Everything the standard cannot express (bindings,
//! input/output parameters, multi-instance configuration, variables, timers,
//! properties) lives in `extensionElements` under the vendor namespace.

pub mod reader;
pub mod writer;
pub mod xml;

pub use reader::{read_workflow, BpmnReader};
pub use writer::{write_workflow, BpmnWriter};

/// BPMN 2.0 model namespace.
pub const BPMN_NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";
/// Vendor extension namespace.
pub const PROCFLOW_NS: &str = "urn:procflow:bpmn:extensions";
/// Prefix the writer binds to [`PROCFLOW_NS`].
pub const PROCFLOW_PREFIX: &str = "pf";

/// Scope nesting accepted by [`read_workflow`] when no limit is configured.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// XML element levels allowed on top of the scope nesting: definitions,
/// process and the deepest extension chain
/// (extensionElements/multiInstance/collection/binding).
pub(crate) const ELEMENT_DEPTH_SLACK: usize = 8;
