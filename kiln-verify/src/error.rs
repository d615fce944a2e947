#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("graph error: {0}")]
    Graph(#[from] kiln_graph::GraphError),
    #[error("target {0} has no declared action spec; determinism proof requires a spec for every target")]
    MissingActionSpec(kiln_graph::TargetId),
}
