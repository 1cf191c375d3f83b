//! Module repository scanner
//!
//! Finds `<root>/<descriptor>` and `<root>/*/<descriptor>`, skipping the
//! state directory and anything git ignores, and loads each descriptor.

use crate::{Error, Result};
use command_executor::{Command, Launcher, LocalLauncher};
use devstack_config::{ModuleDescriptor, RunnableSpec, Settings, load_descriptor, load_hooks};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A descriptor found on disk, not yet resolved
#[derive(Debug, Clone)]
pub struct ScannedModule {
    /// The parsed descriptor
    pub descriptor: ModuleDescriptor,
    /// Absolute module directory
    pub root: PathBuf,
    /// Module directory relative to the project root
    pub relative_path: PathBuf,
    /// The descriptor file
    pub descriptor_path: PathBuf,
    /// Descriptor hooks overlaid by the companion hook file
    pub hooks: IndexMap<String, RunnableSpec>,
}

/// Scans a project tree for module descriptors
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    descriptor_file: String,
    hooks_file: String,
    state_dir: PathBuf,
    launcher: LocalLauncher,
}

impl Scanner {
    /// Create a scanner for the project at `root`
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Self {
        let root = root.into();
        Self {
            state_dir: root.join(&settings.state_dir),
            descriptor_file: settings.descriptor_file.clone(),
            hooks_file: settings.hooks_file.clone(),
            launcher: LocalLauncher,
            root,
        }
    }

    /// Descriptor files under the root: the root's own first, then children in path order
    pub async fn descriptor_paths(&self) -> Result<Vec<PathBuf>> {
        let base = glob::Pattern::escape(&self.root.to_string_lossy());
        let patterns = [
            format!("{}/{}", base, self.descriptor_file),
            format!("{}/*/{}", base, self.descriptor_file),
        ];

        let mut paths = Vec::new();
        for pattern in &patterns {
            let entries = glob::glob(pattern)
                .map_err(|e| Error::resolution(format!("invalid scan pattern {pattern}: {e}")))?;
            for entry in entries {
                match entry {
                    Ok(path) if path.starts_with(&self.state_dir) => {
                        debug!("Skipping {} inside the state directory", path.display());
                    }
                    Ok(path) => paths.push(path),
                    Err(e) => warn!("Skipping unreadable path: {}", e),
                }
            }
        }

        let ignored = self.git_ignored(&paths).await;
        paths.retain(|path| {
            let keep = !ignored.contains(path);
            if !keep {
                debug!("Skipping git-ignored {}", path.display());
            }
            keep
        });

        Ok(paths)
    }

    /// Find and load every module descriptor
    ///
    /// A descriptor that fails to load aborts the scan with an error naming
    /// the file.
    pub async fn scan(&self) -> Result<Vec<ScannedModule>> {
        let mut modules = Vec::new();

        for descriptor_path in self.descriptor_paths().await? {
            let descriptor = load_descriptor(&descriptor_path).map_err(|source| Error::Descriptor {
                path: descriptor_path.clone(),
                source,
            })?;

            let root = descriptor_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone());
            let relative_path = root
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or_default();

            let hooks_path = root.join(&self.hooks_file);
            let mut hooks = descriptor.hooks.clone();
            let overlay = load_hooks(&hooks_path).map_err(|source| Error::Descriptor {
                path: hooks_path.clone(),
                source,
            })?;
            hooks.extend(overlay);

            debug!("Found module {} at {}", descriptor.name, root.display());
            modules.push(ScannedModule {
                descriptor,
                root,
                relative_path,
                descriptor_path,
                hooks,
            });
        }

        Ok(modules)
    }

    /// Paths git reports as ignored
    ///
    /// Any failure to ask git (not a repository, git missing) counts as
    /// nothing being ignored.
    async fn git_ignored(&self, paths: &[PathBuf]) -> HashSet<PathBuf> {
        if paths.is_empty() {
            return HashSet::new();
        }

        let mut command = Command::new("git");
        command
            .current_dir(&self.root)
            .arg("check-ignore")
            .arg("--")
            .args(paths);

        match self.launcher.execute(command).await {
            // Exit code 1 means none of the paths is ignored.
            Ok(result) if result.success() => result
                .stdout
                .lines()
                .filter(|line| !line.is_empty())
                .map(|line| {
                    let path = PathBuf::from(line);
                    if path.is_absolute() {
                        path
                    } else {
                        self.root.join(path)
                    }
                })
                .collect(),
            Ok(_) => HashSet::new(),
            Err(e) => {
                debug!("git check-ignore unavailable: {}", e);
                HashSet::new()
            }
        }
    }
}
