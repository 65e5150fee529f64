//! SDK source checkout.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::process::Cmd;

/// Version-control operations needed to obtain an SDK checkout.
pub trait SourceFetcher {
    /// True iff `dir` is the top level of a repository.
    fn is_repository(&self, dir: &Path) -> bool;

    /// Switch an existing checkout to `tag`.
    fn checkout_tag(&self, dir: &Path, tag: &str) -> Result<()>;

    /// Shallow-clone `tag` of `url` into `dest`.
    fn clone_tag(&self, url: &str, tag: &str, dest: &Path) -> Result<()>;
}

/// [`SourceFetcher`] backed by the git CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl SourceFetcher for GitCli {
    fn is_repository(&self, dir: &Path) -> bool {
        let Ok(result) = Cmd::new("git")
            .arg("-C")
            .arg_path(dir)
            .args(["rev-parse", "--show-toplevel"])
            .allow_fail()
            .run()
        else {
            return false;
        };
        if !result.success() {
            return false;
        }
        // A directory nested inside some other work tree is not a checkout.
        match (fs::canonicalize(dir), fs::canonicalize(result.stdout_trimmed())) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn checkout_tag(&self, dir: &Path, tag: &str) -> Result<()> {
        Cmd::new("git")
            .arg("-C")
            .arg_path(dir)
            .args(["checkout", tag])
            .error_msg(format!("Failed to check out {tag} in {}", dir.display()))
            .run()?;
        Ok(())
    }

    fn clone_tag(&self, url: &str, tag: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        Cmd::new("git")
            .args(["clone", url, "--branch", tag, "--depth", "1"])
            .arg_path(dest)
            .error_msg(format!("Failed to clone {url}"))
            .run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plain_directory_is_not_repository() {
        let tmp = TempDir::new().unwrap();
        assert!(!GitCli.is_repository(tmp.path()));
    }

    #[test]
    fn test_missing_directory_is_not_repository() {
        assert!(!GitCli.is_repository(Path::new("/nonexistent/checkout")));
    }

    #[test]
    fn test_clone_from_bad_url_fails() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("sdk");
        let url = tmp.path().join("no-such-remote");
        assert!(GitCli
            .clone_tag(&url.to_string_lossy(), "v1", &dest)
            .is_err());
    }
}
