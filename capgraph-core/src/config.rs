use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::context::StoreContext;

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "CAPGRAPH_CONFIG";
/// Config file looked up in the current directory
pub const LOCAL_CONFIG_FILE: &str = "capgraph.yaml";

/// On-disk store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Content roots, relative to the config file unless absolute
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    /// Plan document containing the templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_path: Option<PathBuf>,
    /// Where new documents go; defaults to the first root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_root: Option<PathBuf>,
}

impl StoreConfig {
    /// Loads the config from the provided path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Save the config to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Builds a context, resolving relative paths against `base_dir`
    pub fn into_context(self, base_dir: &Path) -> Result<StoreContext> {
        let resolve = |p: PathBuf| {
            if p.is_absolute() {
                p
            } else {
                base_dir.join(p)
            }
        };

        let roots: Vec<PathBuf> = if self.roots.is_empty() {
            vec![base_dir.to_path_buf()]
        } else {
            self.roots.into_iter().map(resolve).collect()
        };

        let mut ctx = StoreContext::new(roots);
        ctx.templates_path = self.templates_path.map(resolve);
        ctx.default_root = self.default_root.map(resolve);

        if let Some(default_root) = &ctx.default_root {
            if !ctx.roots.iter().any(|r| r == default_root) {
                anyhow::bail!(
                    "default_root {:?} is not one of the configured roots",
                    default_root
                );
            }
        }

        Ok(ctx)
    }
}

/// Gets the path to the config file, if one can be found.
///
/// Priority: `CAPGRAPH_CONFIG`, then `./capgraph.yaml`, then
/// `<config dir>/capgraph/config.yaml`.
pub fn find_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    let global = dirs::config_dir()?.join("capgraph").join("config.yaml");
    if global.exists() {
        Some(global)
    } else {
        None
    }
}

/// Loads the store context from an explicit path, the discovered config
/// file, or falls back to the current directory as the only root
pub fn load_context(explicit: Option<&Path>) -> Result<StoreContext> {
    let cwd = env::current_dir().context("Failed to determine current directory")?;
    load_context_in(explicit, &cwd)
}

/// [`load_context`] with relative config paths taken from `cwd`. Roots,
/// and so every change event path, come out absolute.
fn load_context_in(explicit: Option<&Path>, cwd: &Path) -> Result<StoreContext> {
    let path = explicit.map(Path::to_path_buf).or_else(find_config_path);

    match path {
        Some(path) => {
            let path = cwd.join(path);
            let config = StoreConfig::load(&path)?;
            let base_dir = path.parent().unwrap_or(cwd);
            config.into_context(base_dir)
        }
        None => Ok(StoreContext::new([cwd])),
    }
}
