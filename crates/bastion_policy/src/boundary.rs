//! Artifact boundary.
//!
//! Workers declare outputs as paths relative to the job's artifact
//! directory. A path is accepted only if it stays inside that directory.
//! The lexical check is always applied; the on-disk check additionally
//! follows symlinks.

use bastion_core::PolicyCode;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Why a declared output was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoundaryViolation {
    /// Empty path
    #[error("empty output path")]
    Empty,

    /// Path contains a NUL byte
    #[error("output path contains a NUL byte")]
    NulByte,

    /// Path is absolute or carries a root or drive prefix
    #[error("output path {0:?} is absolute")]
    Absolute(String),

    /// Path climbs above the artifact directory
    #[error("output path {0:?} escapes the artifact directory")]
    Escapes(String),

    /// Path resolves outside the artifact directory once symlinks are followed
    #[error("output path {0:?} resolves outside the artifact directory")]
    SymlinkEscape(String),

    /// Declared output does not exist
    #[error("output {0:?} does not exist")]
    Missing(String),

    /// The artifact directory itself could not be resolved
    #[error("artifact directory unavailable: {0}")]
    Unavailable(String),
}

impl BoundaryViolation {
    /// Policy code reported for this violation
    #[must_use]
    pub fn code(&self) -> PolicyCode {
        match self {
            Self::Missing(_) => PolicyCode::MissingOutput,
            _ => PolicyCode::PathEscape,
        }
    }
}

/// One job's artifact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBoundary {
    root: PathBuf,
}

impl ArtifactBoundary {
    /// Boundary rooted at a job's artifact directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The artifact directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalise a declared path without touching the filesystem.
    ///
    /// `.` components are dropped and `..` pops a preceding component.
    /// Returns the normalised relative path.
    ///
    /// # Errors
    ///
    /// Returns a violation if the path is empty, contains NUL, is absolute,
    /// or climbs above the root at any point.
    pub fn normalize(&self, declared: &str) -> Result<PathBuf, BoundaryViolation> {
        if declared.is_empty() {
            return Err(BoundaryViolation::Empty);
        }
        if declared.contains('\0') {
            return Err(BoundaryViolation::NulByte);
        }
        // Backslashes are separators on some hosts; treat them as such everywhere.
        if declared.starts_with('\\') {
            return Err(BoundaryViolation::Absolute(declared.to_string()));
        }
        let unified = declared.replace('\\', "/");

        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in Path::new(&unified).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(BoundaryViolation::Escapes(declared.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(BoundaryViolation::Absolute(declared.to_string()));
                }
            }
        }
        if parts.is_empty() {
            // "." or "a/.." names the directory itself, not an output.
            return Err(BoundaryViolation::Empty);
        }
        Ok(parts.iter().collect())
    }

    /// Resolve a declared output on disk, following symlinks.
    ///
    /// # Errors
    ///
    /// Returns a violation if the lexical check fails, the output is
    /// missing, or its canonical path leaves the canonical root.
    pub fn resolve(&self, declared: &str) -> Result<PathBuf, BoundaryViolation> {
        let relative = self.normalize(declared)?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| BoundaryViolation::Unavailable(e.to_string()))?;
        let resolved = match root.join(&relative).canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BoundaryViolation::Missing(declared.to_string()));
            }
            Err(e) => return Err(BoundaryViolation::Unavailable(e.to_string())),
        };
        if !resolved.starts_with(&root) {
            return Err(BoundaryViolation::SymlinkEscape(declared.to_string()));
        }
        Ok(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn boundary() -> ArtifactBoundary {
        ArtifactBoundary::new("/var/bastion/artifacts/job_1")
    }

    #[test]
    fn test_normalize_accepts_nested() {
        let b = boundary();
        assert_eq!(b.normalize("metrics.json").unwrap(), PathBuf::from("metrics.json"));
        assert_eq!(
            b.normalize("./plots/../plots/equity.png").unwrap(),
            PathBuf::from("plots/equity.png")
        );
    }

    #[test]
    fn test_parent_escape_rejected() {
        let b = boundary();
        let err = b.normalize("../../etc/passwd").unwrap_err();
        assert_eq!(err, BoundaryViolation::Escapes("../../etc/passwd".to_string()));
        assert_eq!(err.code(), PolicyCode::PathEscape);
        assert!(matches!(b.normalize("a/../../b"), Err(BoundaryViolation::Escapes(_))));
        assert!(matches!(b.normalize("a\\..\\..\\b"), Err(BoundaryViolation::Escapes(_))));
    }

    #[test]
    fn test_absolute_and_degenerate_rejected() {
        let b = boundary();
        assert!(matches!(b.normalize("/etc/passwd"), Err(BoundaryViolation::Absolute(_))));
        assert!(matches!(b.normalize("\\\\server\\share"), Err(BoundaryViolation::Absolute(_))));
        assert_eq!(b.normalize(""), Err(BoundaryViolation::Empty));
        assert_eq!(b.normalize("."), Err(BoundaryViolation::Empty));
        assert_eq!(b.normalize("a\0b"), Err(BoundaryViolation::NulByte));
    }

    #[test]
    fn test_resolve_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metrics.json"), b"{}").unwrap();
        let b = ArtifactBoundary::new(dir.path());

        assert_eq!(b.resolve("metrics.json").unwrap(), PathBuf::from("metrics.json"));
        let missing = b.resolve("absent.json").unwrap_err();
        assert_eq!(missing.code(), PolicyCode::MissingOutput);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link"))
            .unwrap();

        let b = ArtifactBoundary::new(dir.path());
        assert_eq!(
            b.resolve("link"),
            Err(BoundaryViolation::SymlinkEscape("link".to_string()))
        );
    }

    proptest! {
        #[test]
        fn prop_normalized_paths_stay_relative(
            parts in proptest::collection::vec(
                prop_oneof!["[a-z]{1,4}", Just("..".to_string()), Just(".".to_string())],
                1..8,
            )
        ) {
            let declared = parts.join("/");
            if let Ok(path) = boundary().normalize(&declared) {
                prop_assert!(path.is_relative());
                prop_assert!(path.components().all(|c| matches!(c, Component::Normal(_))));
            }
        }
    }
}
