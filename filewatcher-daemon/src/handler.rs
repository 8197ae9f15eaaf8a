//! Desired-state handler: apply a pushed document and report what changed.

use serde_json::Value;

use filewatcher_core::{ConfigState, DesiredUpdate, ReportedPatch};

use crate::error::DaemonError;
use crate::transport::Transport;

/// Apply `document` to `state` and report the resulting patch.
///
/// A `null` or non-object document is ignored. A malformed document is
/// rejected before any key is applied. If reporting fails, the applied
/// changes stay in effect.
pub async fn apply_desired(
    state: &ConfigState,
    document: &Value,
    transport: &dyn Transport,
) -> Result<ReportedPatch, DaemonError> {
    let Some(update) = DesiredUpdate::from_json(document)? else {
        tracing::info!("empty desired properties ignored");
        return Ok(ReportedPatch::default());
    };

    let patch = state.apply(update);
    if !patch.is_empty() {
        transport.update_reported(&patch).await?;
        tracing::info!(keys = patch.len(), "reported configuration acknowledged");
    }
    Ok(patch)
}

/// [`apply_desired`] with every error logged and swallowed.
pub async fn on_desired_properties(
    state: &ConfigState,
    document: &Value,
    transport: &dyn Transport,
) -> Option<ReportedPatch> {
    match apply_desired(state, document, transport).await {
        Ok(patch) => Some(patch),
        Err(err) => {
            tracing::error!(error = %err, "desired properties update failed");
            None
        }
    }
}
