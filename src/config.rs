//! Configuration management for sdkbuilder.
//!
//! Reads settings from a `.env` file in the project root and from the
//! process environment. Environment variables take precedence over `.env`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// User the build runs as inside the container.
pub const DEFAULT_BUILD_USER: &str = "dev";
/// Container technology used when none is configured.
pub const DEFAULT_CONTAINER_TECH: &str = "docker";
/// Home directory of the build user inside the container.
pub const DEFAULT_CONTAINER_HOME: &str = "/home/dev";
/// Name of the orchestrator executable inside the container's `src/`.
pub const DEFAULT_ENTRYPOINT: &str = "sdkbuilder";

/// Process-wide settings that do not depend on the selected target.
#[derive(Debug, Clone)]
pub struct Settings {
    pub build_user: String,
    pub container_tech: String,
    pub container_home: PathBuf,
    pub entrypoint: String,
    /// True when this process runs inside the build container.
    pub inside_container: bool,
}

impl Settings {
    /// Load settings from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut vars = HashMap::new();

        if let Ok(iter) = dotenvy::from_path_iter(base_dir.join(".env")) {
            for (key, value) in iter.flatten() {
                vars.insert(key, value);
            }
        }

        for (key, value) in std::env::vars() {
            vars.insert(key, value);
        }

        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str, default: &str| {
            vars.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            build_user: get("SDKBUILDER_BUILD_USER", DEFAULT_BUILD_USER),
            container_tech: get("SDKBUILDER_CONTAINER_TECH", DEFAULT_CONTAINER_TECH),
            container_home: PathBuf::from(get("SDKBUILDER_CONTAINER_HOME", DEFAULT_CONTAINER_HOME)),
            entrypoint: get("SDKBUILDER_ENTRYPOINT", DEFAULT_ENTRYPOINT),
            inside_container: vars
                .get("INSIDE_CONTAINER")
                .is_some_and(|v| !v.is_empty()),
        }
    }

    /// Print settings for debugging.
    pub fn print(&self) {
        println!("Settings:");
        println!("  BUILD_USER:      {}", self.build_user);
        println!("  CONTAINER_TECH:  {}", self.container_tech);
        println!("  CONTAINER_HOME:  {}", self.container_home.display());
        println!("  ENTRYPOINT:      {}", self.entrypoint);
        println!("  INSIDE_CONTAINER: {}", self.inside_container);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::from_vars(&HashMap::new());
        assert_eq!(s.build_user, "dev");
        assert_eq!(s.container_tech, "docker");
        assert_eq!(s.container_home, PathBuf::from("/home/dev"));
        assert!(!s.inside_container);
    }

    #[test]
    fn test_overrides_and_container_marker() {
        let vars = HashMap::from([
            ("SDKBUILDER_BUILD_USER".to_string(), "builder".to_string()),
            ("INSIDE_CONTAINER".to_string(), "1".to_string()),
        ]);
        let s = Settings::from_vars(&vars);
        assert_eq!(s.build_user, "builder");
        assert!(s.inside_container);
    }

    #[test]
    fn test_empty_container_marker_means_host() {
        let vars = HashMap::from([("INSIDE_CONTAINER".to_string(), String::new())]);
        assert!(!Settings::from_vars(&vars).inside_container);
    }
}
