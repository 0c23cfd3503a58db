//! Installation Target Locator.
//!
//! A host started from an archive viewer, an installer, or a portable-app
//! launcher often runs from a temporary extraction directory. Replacing that
//! copy would leave the real installation untouched, so the locator maps a
//! transient executable path back to a durable one.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::UpdateConfig;
use crate::core::UpdateError;

/// Path segments that mark a temporary directory anywhere in the path.
static TRANSIENT_SEGMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)[\\/](temp|tmp)[\\/]").ok());

/// Finds the durable location of the installed executable.
#[derive(Debug, Clone)]
pub struct InstallLocator {
    temp_roots: Vec<PathBuf>,
    candidate_dirs: Vec<PathBuf>,
}

impl InstallLocator {
    /// Locator with the default temp roots and fallback directories for
    /// `app_name`.
    pub fn new(app_name: &str) -> Self {
        Self {
            temp_roots: default_temp_roots(),
            candidate_dirs: default_candidate_dirs(app_name, None),
        }
    }

    /// Locator honoring `install_fallbacks` and `project_dir` from `config`.
    pub fn from_config(config: &UpdateConfig) -> Self {
        let fallbacks = config.install_fallbacks();
        let candidate_dirs = if fallbacks.is_empty() {
            default_candidate_dirs(&config.app_name, config.project_dir())
        } else {
            fallbacks
        };
        Self {
            temp_roots: default_temp_roots(),
            candidate_dirs,
        }
    }

    /// Replace the directories treated as temp roots.
    #[must_use]
    pub fn with_temp_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.temp_roots = roots;
        self
    }

    /// Replace the ordered fallback directories.
    #[must_use]
    pub fn with_candidates(mut self, dirs: Vec<PathBuf>) -> Self {
        self.candidate_dirs = dirs;
        self
    }

    pub fn candidate_dirs(&self) -> &[PathBuf] {
        &self.candidate_dirs
    }

    /// Whether `path` lives under a temporary directory.
    pub fn is_transient(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        if TRANSIENT_SEGMENT.as_ref().is_some_and(|re| re.is_match(&text)) {
            return true;
        }
        self.temp_roots.iter().any(|root| path_starts_with(path, root))
    }

    /// Durable path of `current_exe`.
    ///
    /// Non-transient paths are returned unchanged. For a transient path the
    /// first fallback directory that contains an executable with the same
    /// file name wins; if none does, the result is a non-retryable
    /// [`UpdateError::LocatorFailure`].
    pub fn locate_real_install_path(&self, current_exe: &Path) -> Result<PathBuf, UpdateError> {
        if !self.is_transient(current_exe) {
            debug!("{} is a durable install path", current_exe.display());
            return Ok(current_exe.to_path_buf());
        }

        warn!("Host is running from a temporary directory: {}", current_exe.display());

        let failure = || UpdateError::LocatorFailure {
            current_exe: current_exe.display().to_string(),
        };
        let file_name = current_exe.file_name().ok_or_else(failure)?;

        for dir in &self.candidate_dirs {
            let candidate = dir.join(file_name);
            if candidate.is_file() {
                info!("Using install location {}", candidate.display());
                return Ok(candidate);
            }
            debug!("No installed copy at {}", candidate.display());
        }

        Err(failure())
    }
}

/// Component-wise prefix check that also tolerates case differences on
/// Windows.
fn path_starts_with(path: &Path, root: &Path) -> bool {
    if root.as_os_str().is_empty() {
        return false;
    }
    if path.starts_with(root) {
        return true;
    }
    if cfg!(windows) {
        let path = path.to_string_lossy().to_lowercase();
        let root = root.to_string_lossy().to_lowercase();
        return path.starts_with(root.trim_end_matches(['\\', '/']));
    }
    false
}

fn default_temp_roots() -> Vec<PathBuf> {
    let mut roots = vec![std::env::temp_dir()];
    // temp_dir() may be a symlink (macOS /var/folders -> /private/var/folders).
    if let Ok(canonical) = std::env::temp_dir().canonicalize()
        && !roots.contains(&canonical)
    {
        roots.push(canonical);
    }
    if cfg!(target_os = "macos") {
        roots.push(PathBuf::from("/var/folders"));
        roots.push(PathBuf::from("/private/var/folders"));
    }
    roots
}

/// Desktop, downloads, the fixed program directory, then the project
/// checkout, in that order.
fn default_candidate_dirs(app_name: &str, project_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [dirs::desktop_dir(), dirs::download_dir()]
        .into_iter()
        .flatten()
        .collect();

    dirs.push(program_dir(app_name));
    if let Some(project) = project_dir {
        dirs.push(project);
    }
    dirs
}

#[cfg(windows)]
fn program_dir(app_name: &str) -> PathBuf {
    let base = std::env::var_os("ProgramFiles")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"));
    base.join(app_name)
}

#[cfg(target_os = "macos")]
fn program_dir(app_name: &str) -> PathBuf {
    PathBuf::from("/Applications").join(format!("{app_name}.app")).join("Contents").join("MacOS")
}

#[cfg(all(unix, not(target_os = "macos")))]
fn program_dir(app_name: &str) -> PathBuf {
    PathBuf::from("/opt").join(app_name)
}

#[cfg(not(any(unix, windows)))]
fn program_dir(app_name: &str) -> PathBuf {
    PathBuf::from(app_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn locator(temp_root: &Path, candidates: Vec<PathBuf>) -> InstallLocator {
        InstallLocator::new("app")
            .with_temp_roots(vec![temp_root.to_path_buf()])
            .with_candidates(candidates)
    }

    #[test]
    fn test_durable_path_returned_unchanged() {
        let locator = locator(Path::new("/scratch"), vec![]);
        let exe = Path::new("/opt/app/app");
        assert_eq!(locator.locate_real_install_path(exe).unwrap(), exe);
    }

    #[test]
    fn test_temp_segments_detected() {
        let locator = locator(Path::new("/scratch"), vec![]);
        assert!(locator.is_transient(Path::new(r"C:\Users\me\AppData\Local\Temp\2x9\app.exe")));
        assert!(locator.is_transient(Path::new("/tmp/.mount_app/app")));
        assert!(locator.is_transient(Path::new("/scratch/extract/app")));
        assert!(!locator.is_transient(Path::new("/home/me/templates/app")));
    }

    #[test]
    fn test_first_existing_candidate_wins() {
        let temp = TempDir::new().unwrap();
        let desktop = temp.path().join("desktop");
        let downloads = temp.path().join("downloads");
        let program = temp.path().join("program");
        std::fs::create_dir_all(&desktop).unwrap();
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::create_dir_all(&program).unwrap();
        std::fs::write(downloads.join("app.exe"), b"bin").unwrap();
        std::fs::write(program.join("app.exe"), b"bin").unwrap();

        let locator = locator(Path::new("/scratch"), vec![desktop, downloads.clone(), program]);
        let located = locator
            .locate_real_install_path(Path::new("/scratch/extract/app.exe"))
            .unwrap();
        assert_eq!(located, downloads.join("app.exe"));
    }

    #[test]
    fn test_no_candidate_is_locator_failure() {
        let temp = TempDir::new().unwrap();
        let locator = locator(Path::new("/scratch"), vec![temp.path().to_path_buf()]);

        let err = locator
            .locate_real_install_path(Path::new("/scratch/extract/app.exe"))
            .unwrap_err();
        assert!(matches!(err, UpdateError::LocatorFailure { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_fallbacks_replace_defaults() {
        let config = UpdateConfig {
            install_fallbacks: vec![PathBuf::from("/srv/app")],
            ..UpdateConfig::default()
        };
        let locator = InstallLocator::from_config(&config);
        assert_eq!(locator.candidate_dirs(), &[PathBuf::from("/srv/app")]);
    }

    #[test]
    fn test_project_dir_is_last_default_candidate() {
        let config = UpdateConfig {
            project_dir: Some(PathBuf::from("/work/app")),
            ..UpdateConfig::default()
        };
        let locator = InstallLocator::from_config(&config);
        assert_eq!(locator.candidate_dirs().last(), Some(&PathBuf::from("/work/app")));
    }
}
