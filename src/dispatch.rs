//! Step-list execution.

use anyhow::{Context, Result};
use tracing::info;

use crate::paths::BuildContext;
use crate::sdk::{SdkBackend, Step};

/// Run, in order, every step tagged with `context`. The first failure
/// aborts the remaining steps. Returns the number of steps run.
pub fn dispatch(steps: &[Step], context: BuildContext, backend: &mut dyn SdkBackend) -> Result<usize> {
    let mut ran = 0;
    for step in steps.iter().filter(|s| s.context == context) {
        info!(" > Step: {step}");
        backend
            .execute_task(step.task)
            .with_context(|| format!("Step '{}' failed", step.task))?;
        ran += 1;
    }
    Ok(ran)
}
