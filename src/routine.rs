//! Routine matching and input validation.
//!
//! Branch names and clone URLs are handed to `git` as process arguments, so
//! they are screened for a small set of disallowed characters before any
//! routine runs.

use tracing::{debug, error};

use crate::RoutineConfig;
use crate::error::{PipelineError, Result};
use crate::webhook::PushPayload;

/// Characters that must not appear in a branch name or clone URL.
pub const ILLEGAL_CHARS: [char; 4] = [' ', '|', '&', '$'];

/// Returns the last `/`-separated segment of a ref; a ref without `/` is
/// returned whole.
pub fn branch_from_ref(git_ref: &str) -> &str {
    git_ref.rsplit('/').next().unwrap_or(git_ref)
}

/// Fails if `value` contains any of [`ILLEGAL_CHARS`].
pub fn ensure_safe(field: &'static str, value: &str) -> Result<()> {
    if value.contains(ILLEGAL_CHARS) {
        error!(
            "Discovered illegal characters that could be used to manipulate the OS command in {} <{}>",
            field, value
        );
        return Err(PipelineError::IllegalCharacters {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// The delivery id becomes part of a filesystem path.
fn ensure_safe_delivery_id(delivery_id: &str) -> Result<()> {
    ensure_safe("delivery id", delivery_id)?;
    if delivery_id.contains(['/', '\\']) || delivery_id.contains("..") {
        error!("Delivery id <{}> is not usable as a path component", delivery_id);
        return Err(PipelineError::IllegalCharacters {
            field: "delivery id",
            value: delivery_id.to_string(),
        });
    }
    Ok(())
}

/// Routines whose branch list contains `branch`, in configuration order.
pub fn match_routines<'a>(branch: &str, routines: &'a [RoutineConfig]) -> Vec<&'a RoutineConfig> {
    routines
        .iter()
        .filter(|routine| routine.branches.iter().any(|b| b == branch))
        .collect()
}

/// Validates the payload and delivery id, then matches routines against the
/// pushed branch. Any validation failure rejects the whole event.
pub fn route<'a>(
    payload: &PushPayload,
    delivery_id: &str,
    routines: &'a [RoutineConfig],
) -> Result<Vec<&'a RoutineConfig>> {
    let branch = payload.branch();
    ensure_safe("branch name", branch)?;
    ensure_safe("repository url", payload.clone_url())?;
    ensure_safe_delivery_id(delivery_id)?;

    let matched = match_routines(branch, routines);
    debug!(
        "Branch '{}' matched {} of {} routines",
        branch,
        matched.len(),
        routines.len()
    );
    Ok(matched)
}
