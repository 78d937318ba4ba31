//! Boundaries to the systems the pipeline does not own.
//!
//! The asset layer instantiates templates, a toolchain produces behavior code,
//! physics consumes joint data, and a user-facing console shows errors. Each
//! is reached through one narrow trait so hosts and tests can substitute
//! their own implementations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use loom_wasm_host::{WasmConfig, WasmError, WasmHost};

use crate::components::{JointData, LiveRepresentation, TemplateRecord, Transform};
use crate::logic::TypeHandle;
use crate::spawn::SpawnError;

// ---------------------------------------------------------------------------
// TemplateInstantiator
// ---------------------------------------------------------------------------

/// Produces the live representation of a template.
///
/// Implementations may fail or even panic; the orchestrator isolates both to
/// the single request being processed.
pub trait TemplateInstantiator {
    fn instantiate(
        &mut self,
        template: &TemplateRecord,
        world_transform: &Transform,
    ) -> Result<LiveRepresentation, SpawnError>;
}

impl<F> TemplateInstantiator for F
where
    F: FnMut(&TemplateRecord, &Transform) -> Result<LiveRepresentation, SpawnError>,
{
    fn instantiate(
        &mut self,
        template: &TemplateRecord,
        world_transform: &Transform,
    ) -> Result<LiveRepresentation, SpawnError> {
        self(template, world_transform)
    }
}

// ---------------------------------------------------------------------------
// CodeCompiler
// ---------------------------------------------------------------------------

/// Outcome of resolving a code payload into a loadable type.
#[derive(Debug, Clone)]
pub enum CompileOutcome {
    Loaded(TypeHandle),
    /// The payload is not valid code. Shown to the user.
    CompileFailed(String),
    /// The payload is valid code but does not yield a usable type.
    ResolutionFailed(String),
}

pub trait CodeCompiler {
    fn compile(&self, bytes: &[u8]) -> CompileOutcome;
}

/// The default compiler: payloads are WASM modules run by [`WasmHost`].
#[derive(Debug, Clone)]
pub struct WasmCompiler {
    host: WasmHost,
}

impl WasmCompiler {
    /// # Errors
    ///
    /// Any error from [`WasmHost::new`].
    pub fn new(config: WasmConfig) -> Result<Self, WasmError> {
        Ok(Self {
            host: WasmHost::new(config)?,
        })
    }
}

impl CodeCompiler for WasmCompiler {
    fn compile(&self, bytes: &[u8]) -> CompileOutcome {
        match self.host.compile(bytes) {
            Ok(script) => CompileOutcome::Loaded(Arc::new(script)),
            Err(e @ WasmError::CompileError(_)) => CompileOutcome::CompileFailed(e.to_string()),
            Err(e) => CompileOutcome::ResolutionFailed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// JointPublisher
// ---------------------------------------------------------------------------

/// Receives the joint data of one tick's successful spawns, keyed by
/// instance id. Called at most once per tick and never with an empty map.
pub trait JointPublisher {
    fn publish_joints(&mut self, joints: BTreeMap<i64, JointData>);
}

impl<F> JointPublisher for F
where
    F: FnMut(BTreeMap<i64, JointData>),
{
    fn publish_joints(&mut self, joints: BTreeMap<i64, JointData>) {
        self(joints)
    }
}

/// Default publisher for hosts without a physics layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardJoints;

impl JointPublisher for DiscardJoints {
    fn publish_joints(&mut self, joints: BTreeMap<i64, JointData>) {
        tracing::debug!(count = joints.len(), "no joint publisher installed, dropping joints");
    }
}

// ---------------------------------------------------------------------------
// DiagnosticSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// User-visible error reporting (an editor console, a toast, ...).
pub trait DiagnosticSink {
    fn report(&mut self, severity: Severity, message: &str);
}

/// Default sink: forwards to `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn report(&mut self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: "loom::diagnostics", "{message}"),
            Severity::Warning => tracing::warn!(target: "loom::diagnostics", "{message}"),
            Severity::Error => tracing::error!(target: "loom::diagnostics", "{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::BehaviorType;
    use loom_wasm_host::ScriptCategory;

    fn compiler() -> WasmCompiler {
        WasmCompiler::new(WasmConfig::default()).unwrap()
    }

    #[test]
    fn valid_module_is_loaded() {
        let outcome = compiler().compile(br#"(module (func (export "update") nop))"#);
        let CompileOutcome::Loaded(handle) = outcome else {
            panic!("expected Loaded, got {outcome:?}");
        };
        assert_eq!(handle.category(), ScriptCategory::ObjectLogic);
    }

    #[test]
    fn scene_logic_export_sets_category() {
        let wat = r#"
            (module
              (func (export "update") nop)
              (func (export "scene_logic") nop))
        "#;
        let CompileOutcome::Loaded(handle) = compiler().compile(wat.as_bytes()) else {
            panic!("expected Loaded");
        };
        assert!(handle.is_scene_logic());
    }

    #[test]
    fn garbage_is_a_compile_failure() {
        assert!(matches!(
            compiler().compile(b"(module (func"),
            CompileOutcome::CompileFailed(_)
        ));
    }

    #[test]
    fn missing_update_is_a_resolution_failure() {
        assert!(matches!(
            compiler().compile(br#"(module (func (export "tick") nop))"#),
            CompileOutcome::ResolutionFailed(_)
        ));
    }

    #[test]
    fn closures_act_as_publishers() {
        let mut seen = 0;
        {
            let mut publisher = |joints: BTreeMap<i64, JointData>| seen += joints.len();
            let mut joints = BTreeMap::new();
            joints.insert(1, JointData(serde_json::Value::Null));
            publisher.publish_joints(joints);
        }
        assert_eq!(seen, 1);
    }
}
