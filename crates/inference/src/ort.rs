use ort::{GraphOptimizationLevel, Session};
use std::path::Path;

/// Load an ONNX session with the settings shared by every model in
/// this crate.
pub(crate) fn load_session(model_path: impl AsRef<Path>) -> anyhow::Result<Session> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?;

    Ok(session)
}
