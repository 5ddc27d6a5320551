//! Typed build configuration
//!
//! The generator job file is TOML. Every recognized option is a named,
//! validated field; unknown keys are rejected at load time rather than
//! silently defaulted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde::Deserialize;

/// One library root to scan for classes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryEntry {
    /// Directory containing the library (its `class/` subtree holds sources).
    pub path: PathBuf,
    /// Namespace hint; derived from the first class-id segment when absent.
    pub namespace: Option<String>,
    /// URI prefix for generated script references; defaults to `path`.
    pub uri: Option<String>,
}

/// Part and package construction options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackagesConfig {
    /// Part name -> include expressions.
    #[serde(default)]
    pub parts: IndexMap<String, Vec<String>>,
    /// Part names force-merged into package 0.
    #[serde(default)]
    pub collapse: Vec<String>,
    /// Byte-size split threshold; 0 disables splitting.
    #[serde(default)]
    pub size: u64,
    /// Name of the boot part, always collapsed.
    #[serde(default = "default_boot_part")]
    pub init: String,
}

fn default_boot_part() -> String {
    "boot".into()
}

/// Options for the compiled build artifact.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompileConfig {
    /// Output file name; supports `{variant}` / `{setting}` placeholders.
    pub file: String,
    /// Relative URI the loader uses to reference package files; defaults to
    /// `file`.
    pub uri: Option<String>,
    /// Keep the output readable instead of squeezing whitespace.
    #[serde(default)]
    pub format: bool,
    /// Also write a gzipped sibling of every artifact.
    #[serde(default)]
    pub gzip: bool,
}

/// Options for the source (development) build artifact.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub file: String,
    #[serde(default)]
    pub format: bool,
    #[serde(default)]
    pub gzip: bool,
}

/// Debugging toggles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugConfig {
    /// Dump per-package used-by relations after packaging.
    #[serde(default)]
    pub dependencies: bool,
}

/// A complete generator job description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Library roots, scanned in order. Later roots win on id collisions.
    #[serde(default)]
    pub library: Vec<LibraryEntry>,

    /// Statically declared extra load edges: class id -> required class ids.
    #[serde(default)]
    pub require: IndexMap<String, Vec<String>>,

    /// Statically declared extra run edges: class id -> used class ids.
    #[serde(default, rename = "use")]
    pub use_: IndexMap<String, Vec<String>>,

    /// Include patterns; a `=` prefix marks an entry explicit.
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude patterns; a `=` prefix marks an entry explicit.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Variant domains: name -> candidate values.
    #[serde(default)]
    pub variants: IndexMap<String, Vec<String>>,

    /// Part/package construction; absent means a single boot package.
    pub packages: Option<PackagesConfig>,

    /// Key/value pairs injected into rendered output as build settings.
    #[serde(default)]
    pub settings: IndexMap<String, String>,

    /// Compiled build job; absent skips the stage.
    pub compile: Option<CompileConfig>,

    /// Source build job; absent skips the stage.
    pub source: Option<SourceConfig>,

    /// Locales to look up per package; absent skips the stage.
    #[serde(default)]
    pub localize: Vec<String>,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl Config {
    /// Load and validate a job file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a consistent build.
    pub fn validate(&self) -> Result<()> {
        if self.library.is_empty() {
            bail!("config declares no library roots");
        }

        for domain in self.variants.keys() {
            if self.variants[domain].is_empty() {
                bail!("variant domain '{domain}' has no candidate values");
            }
        }

        if let Some(packages) = &self.packages {
            if !packages.parts.contains_key(&packages.init) {
                bail!(
                    "boot part '{}' is not declared in packages.parts",
                    packages.init
                );
            }
            for name in &packages.collapse {
                if !packages.parts.contains_key(name) {
                    bail!("collapse names unknown part '{name}'");
                }
            }
        }

        Ok(())
    }
}
