//! Host tool availability checks.

use crate::process;

use super::types::CheckResult;

/// Check host tools are installed.
pub fn check_host_tools(container_tech: &str) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let required_tools = [
        ("git", "git", "Required to check out SDK sources"),
        (container_tech, container_tech, "Required to build images and run build containers"),
    ];
    for (tool, package, purpose) in required_tools {
        results.push(check_tool_exists(tool, package, purpose, true));
    }

    results.push(check_tool_exists(
        "tar",
        "tar",
        "Useful for inspecting artifact archives",
        false,
    ));

    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;

    #[test]
    fn test_missing_required_tool_fails() {
        let r = check_tool_exists("nonexistent_tool_12345", "pkg", "", true);
        assert_eq!(r.status, CheckStatus::Fail);
    }

    #[test]
    fn test_missing_optional_tool_warns() {
        let r = check_tool_exists("nonexistent_tool_12345", "pkg", "", false);
        assert_eq!(r.status, CheckStatus::Warn);
    }
}
