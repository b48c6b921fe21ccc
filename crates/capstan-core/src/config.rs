//! Static configuration types for the control plane.
//!
//! The daemon reads a TOML file once at startup and hands the project
//! list to the engine; any validation failure here is fatal before the
//! engine starts. Repos are not configured directly; they are inferred
//! by de-duplicating clone URLs across projects.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while validating the startup configuration. Fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The project list is empty.
    #[error("no projects configured")]
    NoProjects,

    /// A project has an empty name.
    #[error("project {index} has an empty name")]
    EmptyName {
        /// Index of the offending project.
        index: usize,
    },

    /// Two projects share a name (and therefore an image tag).
    #[error("project name `{name}` is used by both project {first} and project {second}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
        /// First project using it.
        first: usize,
        /// Second project using it.
        second: usize,
    },

    /// A project's clone URL is empty.
    #[error("project `{name}` has an empty clone URL")]
    EmptyCloneUrl {
        /// Offending project.
        name: String,
    },

    /// A container range violates `1 <= min <= max`.
    #[error("project `{name}`: container range [{min}, {max}] must satisfy 1 <= min <= max")]
    InvalidRange {
        /// Offending project.
        name: String,
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A build recipe path is absolute; it must be relative to the repo
    /// working directory.
    #[error("project `{name}`: dockerfile `{path}` must be a path relative to the repo root")]
    AbsoluteDockerfile {
        /// Offending project.
        name: String,
        /// Configured path.
        path: PathBuf,
    },

    /// A hook directory is relative; it must be an absolute path inside
    /// the image.
    #[error("project `{name}`: hook dir `{path}` must be an absolute path inside the image")]
    RelativeHookDir {
        /// Offending project.
        name: String,
        /// Configured path.
        path: PathBuf,
    },
}

/// Desired container-count range for a project, `[min, max]` in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[usize; 2]")]
pub struct ContainerRange {
    /// Fewest containers that may serve the project.
    pub min: usize,
    /// Most containers that may serve the project.
    pub max: usize,
}

impl From<[usize; 2]> for ContainerRange {
    fn from([min, max]: [usize; 2]) -> Self {
        Self { min, max }
    }
}

/// One deployable unit: a build recipe plus a container fleet.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project name; doubles as the image tag base. Unique.
    pub name: String,
    /// Clone URL of the backing repository.
    pub clone_url: String,
    /// Desired container-count range.
    pub container_range: ContainerRange,
    /// Build recipe path, relative to the repo working directory.
    pub dockerfile: PathBuf,
    /// Hooks directory, absolute path inside built images.
    pub hook_dir: PathBuf,
}

/// Engine tunables and their defaults.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Readiness failures tolerated per rotation before the cycle
    /// aborts (additional attempts beyond the first).
    pub ready_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { ready_retries: 1 }
    }
}

/// Validates the static project list.
///
/// # Errors
///
/// Returns the first [`ConfigError`] encountered; startup must treat
/// any error as fatal.
pub fn validate_projects(projects: &[ProjectConfig]) -> Result<(), ConfigError> {
    if projects.is_empty() {
        return Err(ConfigError::NoProjects);
    }
    for (index, project) in projects.iter().enumerate() {
        if project.name.is_empty() {
            return Err(ConfigError::EmptyName { index });
        }
        if let Some(first) = projects[..index].iter().position(|p| p.name == project.name) {
            return Err(ConfigError::DuplicateName {
                name: project.name.clone(),
                first,
                second: index,
            });
        }
        if project.clone_url.is_empty() {
            return Err(ConfigError::EmptyCloneUrl {
                name: project.name.clone(),
            });
        }
        let ContainerRange { min, max } = project.container_range;
        if min < 1 || min > max {
            return Err(ConfigError::InvalidRange {
                name: project.name.clone(),
                min,
                max,
            });
        }
        if project.dockerfile.is_absolute() {
            return Err(ConfigError::AbsoluteDockerfile {
                name: project.name.clone(),
                path: project.dockerfile.clone(),
            });
        }
        if project.hook_dir.is_relative() {
            return Err(ConfigError::RelativeHookDir {
                name: project.name.clone(),
                path: project.hook_dir.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str, url: &str, range: [usize; 2]) -> ProjectConfig {
        ProjectConfig {
            name: name.to_string(),
            clone_url: url.to_string(),
            container_range: range.into(),
            dockerfile: PathBuf::from("Dockerfile"),
            hook_dir: PathBuf::from("/srv/hooks"),
        }
    }

    #[test]
    fn accepts_a_minimal_valid_config() {
        let projects = vec![
            project("web", "https://example/r", [2, 5]),
            project("worker", "https://example/r", [1, 1]),
        ];
        assert_eq!(validate_projects(&projects), Ok(()));
    }

    #[test]
    fn rejects_empty_project_list() {
        assert_eq!(validate_projects(&[]), Err(ConfigError::NoProjects));
    }

    #[test]
    fn rejects_duplicate_names() {
        let projects = vec![
            project("web", "https://example/a", [1, 1]),
            project("web", "https://example/b", [1, 1]),
        ];
        assert_eq!(
            validate_projects(&projects),
            Err(ConfigError::DuplicateName {
                name: "web".to_string(),
                first: 0,
                second: 1,
            })
        );
    }

    #[test]
    fn rejects_zero_minimum() {
        let projects = vec![project("web", "https://example/r", [0, 3])];
        assert!(matches!(
            validate_projects(&projects),
            Err(ConfigError::InvalidRange { min: 0, max: 3, .. })
        ));
    }

    #[test]
    fn rejects_inverted_range() {
        let projects = vec![project("web", "https://example/r", [4, 2])];
        assert!(matches!(
            validate_projects(&projects),
            Err(ConfigError::InvalidRange { min: 4, max: 2, .. })
        ));
    }

    #[test]
    fn rejects_absolute_dockerfile_and_relative_hook_dir() {
        let mut bad_recipe = project("web", "https://example/r", [1, 2]);
        bad_recipe.dockerfile = PathBuf::from("/etc/Dockerfile");
        assert!(matches!(
            validate_projects(&[bad_recipe]),
            Err(ConfigError::AbsoluteDockerfile { .. })
        ));

        let mut bad_hooks = project("web", "https://example/r", [1, 2]);
        bad_hooks.hook_dir = PathBuf::from("hooks");
        assert!(matches!(
            validate_projects(&[bad_hooks]),
            Err(ConfigError::RelativeHookDir { .. })
        ));
    }
}
