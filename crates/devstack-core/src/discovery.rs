//! Project discovery: scan, resolve, load state

use crate::Result;
use crate::graph::ModuleGraph;
use crate::runner::FunctionRegistry;
use crate::scanner::Scanner;
use crate::state::StateStore;
use devstack_config::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A discovered project
#[derive(Debug, Clone)]
pub struct Project {
    /// Project root
    pub root: PathBuf,
    /// Settings the project was discovered with
    pub settings: Settings,
    /// Resolved modules
    pub graph: Arc<ModuleGraph>,
    /// Loaded module state
    pub store: StateStore,
}

impl Project {
    /// Discover every module under `root`
    ///
    /// Creates each module's state file when it does not exist yet.
    pub async fn discover(
        root: &Path,
        settings: Settings,
        registry: &FunctionRegistry,
    ) -> Result<Self> {
        let scanned = Scanner::new(root, &settings).scan().await?;
        let graph = ModuleGraph::resolve(scanned, registry)?;

        let mut store = StateStore::new(root.join(&settings.state_dir));
        for module in graph.modules() {
            store.ensure(&module.name)?;
            store.load(&module.name)?;
        }

        info!("Discovered {} modules in {}", graph.len(), root.display());
        Ok(Self {
            root: root.to_path_buf(),
            settings,
            graph: Arc::new(graph),
            store,
        })
    }
}
