//! Library index
//!
//! Scans library roots into an immutable mapping from fully-qualified class
//! id to class metadata, plus a per-namespace translation catalog. Pure data
//! loading; resolution logic lives elsewhere and only reads this index.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::config::LibraryEntry;

/// Metadata for one source-code unit. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRecord {
    /// Fully-qualified id, unique across the library set.
    pub id: String,
    /// Absolute-ish path to the source file.
    pub path: PathBuf,
    /// URI the loader uses to reference the file.
    pub uri: String,
    /// Owning namespace.
    pub namespace: String,
}

/// Immutable library scan result, passed to every downstream component.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    classes: IndexMap<String, ClassRecord>,
    namespaces: Vec<String>,
    /// Namespace -> locale names with a translation catalog.
    translations: FxHashMap<String, Vec<String>>,
}

impl LibraryIndex {
    /// Scan the configured library roots in order.
    ///
    /// A class id appearing under multiple roots is overwritten by the later
    /// root, with a warning.
    pub fn scan(entries: &[LibraryEntry]) -> Result<Self> {
        let mut index = Self::default();

        for entry in entries {
            debug!("Scanning library path: {}", entry.path.display());
            index.scan_entry(entry)?;
        }

        info!(
            "Loaded {} classes from {} libraries",
            index.classes.len(),
            index.namespaces.len()
        );
        Ok(index)
    }

    fn scan_entry(&mut self, entry: &LibraryEntry) -> Result<()> {
        if !entry.path.is_dir() {
            bail!("library path {} is not a directory", entry.path.display());
        }

        // Classes live under `class/` when present, otherwise directly
        // under the root.
        let class_root = if entry.path.join("class").is_dir() {
            entry.path.join("class")
        } else {
            entry.path.clone()
        };

        let uri_prefix = entry
            .uri
            .clone()
            .unwrap_or_else(|| entry.path.to_string_lossy().into_owned());

        let mut relative = Vec::new();
        let mut records = Vec::new();
        scan_dir(&class_root, &uri_prefix, entry, &mut relative, &mut records)?;
        debug!("Found {} classes in {}", records.len(), entry.path.display());

        // The fallback namespace comes from this entry's own classes, never
        // from a previously scanned root.
        let namespace = entry.namespace.clone().unwrap_or_else(|| {
            records
                .first()
                .map(|record| record.namespace.clone())
                .unwrap_or_default()
        });

        for record in records {
            let id = record.id.clone();
            if self.classes.insert(id.clone(), record).is_some() {
                warn!("Class {id} is defined by multiple libraries; later root wins");
            }
        }

        if !namespace.is_empty() {
            if !self.namespaces.contains(&namespace) {
                self.namespaces.push(namespace.clone());
            }
            // Roots sharing a namespace contribute to one merged catalog.
            let catalog = self.translations.entry(namespace).or_default();
            for locale in scan_translations(&entry.path) {
                if !catalog.contains(&locale) {
                    catalog.push(locale);
                }
            }
            catalog.sort();
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ClassRecord> {
        self.classes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }

    /// Class ids in stable scan order.
    pub fn class_ids(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Locales with a translation catalog for the given namespace.
    pub fn translations(&self, namespace: &str) -> &[String] {
        self.translations
            .get(namespace)
            .map_or(&[], Vec::as_slice)
    }

    /// Build an index directly from records; used by tests and embedders.
    pub fn from_records(records: Vec<ClassRecord>) -> Self {
        let mut namespaces = Vec::new();
        let mut classes = IndexMap::new();
        for record in records {
            if !namespaces.contains(&record.namespace) {
                namespaces.push(record.namespace.clone());
            }
            classes.insert(record.id.clone(), record);
        }
        Self {
            classes,
            namespaces,
            translations: FxHashMap::default(),
        }
    }
}

fn scan_dir(
    dir: &Path,
    uri_prefix: &str,
    entry: &LibraryEntry,
    relative: &mut Vec<String>,
    records: &mut Vec<ClassRecord>,
) -> Result<()> {
    let mut children: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read library directory {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    // Directory iteration order is platform-defined; sort for a stable
    // index order.
    children.sort_by_key(std::fs::DirEntry::file_name);

    for child in children {
        let path = child.path();
        let name = child.file_name().to_string_lossy().into_owned();

        if path.is_dir() {
            relative.push(name);
            scan_dir(&path, uri_prefix, entry, relative, records)?;
            relative.pop();
        } else if let Some(stem) = name.strip_suffix(".js") {
            let mut segments = relative.clone();
            segments.push(stem.to_owned());
            let id = segments.join(".");

            let namespace = entry
                .namespace
                .clone()
                .unwrap_or_else(|| segments[0].clone());
            let uri = if relative.is_empty() {
                format!("{uri_prefix}/{name}")
            } else {
                format!("{uri_prefix}/{}/{name}", relative.join("/"))
            };

            records.push(ClassRecord {
                id,
                path,
                uri,
                namespace,
            });
        }
    }

    Ok(())
}

/// Locale names found under the library's `translation/` directory.
fn scan_translations(root: &Path) -> Vec<String> {
    let dir = root.join("translation");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut locales: Vec<String> = entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension().is_some_and(|ext| ext == "po") {
                Some(path.file_stem()?.to_string_lossy().into_owned())
            } else {
                None
            }
        })
        .collect();
    locales.sort();
    locales
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_class(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "// class body\n").unwrap();
    }

    #[test]
    fn scans_classes_into_dotted_ids() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("framework");
        write_class(&root, "class/app/Main.js");
        write_class(&root, "class/app/ui/Button.js");

        let index = LibraryIndex::scan(&[LibraryEntry {
            path: root,
            namespace: Some("app".into()),
            uri: Some("../framework".into()),
        }])
        .unwrap();

        assert_eq!(index.len(), 2);
        let button = index.get("app.ui.Button").unwrap();
        assert_eq!(button.namespace, "app");
        assert_eq!(button.uri, "../framework/app/ui/Button.js");
        assert!(index.contains("app.Main"));
    }

    #[test]
    fn later_roots_win_on_collision() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a");
        let second = dir.path().join("b");
        write_class(&first, "class/app/Main.js");
        write_class(&second, "class/app/Main.js");

        let entry = |path: PathBuf| LibraryEntry {
            path,
            namespace: Some("app".into()),
            uri: None,
        };
        let index = LibraryIndex::scan(&[entry(first), entry(second.clone())]).unwrap();

        assert_eq!(index.len(), 1);
        let record = index.get("app.Main").unwrap();
        assert!(record.path.starts_with(&second));
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let result = LibraryIndex::scan(&[LibraryEntry {
            path: dir.path().join("nope"),
            namespace: None,
            uri: None,
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn translation_catalogs_merge_across_roots() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("framework");
        let second = dir.path().join("contrib");
        write_class(&first, "class/app/Main.js");
        write_class(&second, "class/app/Extra.js");
        for (root, locale) in [(&first, "de"), (&second, "fr")] {
            fs::create_dir_all(root.join("translation")).unwrap();
            fs::write(root.join(format!("translation/{locale}.po")), "").unwrap();
        }

        let entry = |path: &PathBuf| LibraryEntry {
            path: path.clone(),
            namespace: Some("app".into()),
            uri: None,
        };
        let index = LibraryIndex::scan(&[entry(&first), entry(&second)]).unwrap();

        assert_eq!(index.translations("app"), ["de", "fr"]);
    }

    #[test]
    fn empty_root_does_not_clobber_earlier_namespace_data() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("framework");
        write_class(&first, "class/app/Main.js");
        fs::create_dir_all(first.join("translation")).unwrap();
        fs::write(first.join("translation/de.po"), "").unwrap();
        // A classless root with no namespace hint contributes nothing.
        let second = dir.path().join("empty");
        fs::create_dir_all(&second).unwrap();

        let index = LibraryIndex::scan(&[
            LibraryEntry {
                path: first,
                namespace: None,
                uri: None,
            },
            LibraryEntry {
                path: second,
                namespace: None,
                uri: None,
            },
        ])
        .unwrap();

        assert_eq!(index.namespaces(), ["app"]);
        assert_eq!(index.translations("app"), ["de"]);
    }

    #[test]
    fn collects_translation_locales() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("framework");
        write_class(&root, "class/app/Main.js");
        fs::create_dir_all(root.join("translation")).unwrap();
        fs::write(root.join("translation/de.po"), "").unwrap();
        fs::write(root.join("translation/fr.po"), "").unwrap();

        let index = LibraryIndex::scan(&[LibraryEntry {
            path: root,
            namespace: Some("app".into()),
            uri: None,
        }])
        .unwrap();

        assert_eq!(index.translations("app"), ["de", "fr"]);
    }
}
