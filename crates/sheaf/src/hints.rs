//! Compiler-hint dependency provider
//!
//! Reads direct dependency facts from `#require(...)` / `#use(...)`
//! directives embedded in class sources, merges statically declared config
//! edges, and filters variant-conditioned edges per variant set. Parsed
//! facts are memoized through the cache coordinator keyed by the source
//! fingerprint, so repeated resolution across variant sets and runs only
//! parses a class once per content version.

use std::cell::RefCell;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::{
    cache::{Cache, CacheKey, fingerprint},
    depgraph::{ClassDeps, DependencyProvider},
    library::LibraryIndex,
    variants::VariantSet,
};

static DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#(require|use|ignore)\(([^)]+)\)").expect("directive regex is valid")
});

/// One hinted dependency edge, optionally conditioned on a variant value.
///
/// `#require(app.gfx.Canvas?engine.client:webkit)` produces a load edge that
/// is only active when the `engine.client` variant resolves to `webkit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepHint {
    pub target: String,
    pub condition: Option<(String, String)>,
}

impl DepHint {
    fn active(&self, variants: &VariantSet) -> bool {
        match &self.condition {
            Some((name, value)) => variants.get(name) == Some(value),
            None => true,
        }
    }
}

/// Parsed dependency facts of one class, independent of any variant set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassHints {
    pub load: Vec<DepHint>,
    pub run: Vec<DepHint>,
    pub ignore: Vec<String>,
    /// Variant names the class's conditional edges branch on; the only
    /// variant names that belong in this class's cache keys.
    pub relevant_variants: Vec<String>,
}

/// Parse directives out of a class source.
pub fn parse_hints(source: &str) -> Result<ClassHints> {
    let mut hints = ClassHints::default();

    for capture in DIRECTIVE.captures_iter(source) {
        let kind = &capture[1];
        let body = capture[2].trim();

        if kind == "ignore" {
            hints.ignore.push(body.to_owned());
            continue;
        }

        let (target, condition) = match body.split_once('?') {
            Some((target, qualifier)) => {
                let Some((name, value)) = qualifier.split_once(':') else {
                    bail!("malformed variant qualifier in directive: {body}");
                };
                (target.trim(), Some((name.trim().to_owned(), value.trim().to_owned())))
            }
            None => (body, None),
        };

        if let Some((name, _)) = &condition {
            if !hints.relevant_variants.contains(name) {
                hints.relevant_variants.push(name.clone());
            }
        }

        let hint = DepHint {
            target: target.to_owned(),
            condition,
        };
        match kind {
            "require" => hints.load.push(hint),
            "use" => hints.run.push(hint),
            _ => unreachable!("regex admits only known directives"),
        }
    }

    hints.relevant_variants.sort();
    Ok(hints)
}

/// Dependency provider backed by compiler hints and static config edges.
pub struct HintProvider<'a> {
    index: &'a LibraryIndex,
    /// Statically declared load edges: class id -> required ids.
    require: &'a IndexMap<String, Vec<String>>,
    /// Statically declared run edges: class id -> used ids.
    use_: &'a IndexMap<String, Vec<String>>,
    cache: &'a Cache<ClassHints>,
    /// Per-run memo so a class's source is read and fingerprinted once.
    resolved: RefCell<FxHashMap<String, Arc<ClassHints>>>,
}

impl std::fmt::Debug for HintProvider<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HintProvider")
            .field("classes", &self.index.len())
            .finish()
    }
}

impl<'a> HintProvider<'a> {
    pub fn new(
        index: &'a LibraryIndex,
        require: &'a IndexMap<String, Vec<String>>,
        use_: &'a IndexMap<String, Vec<String>>,
        cache: &'a Cache<ClassHints>,
    ) -> Self {
        Self {
            index,
            require,
            use_,
            cache,
            resolved: RefCell::new(FxHashMap::default()),
        }
    }

    /// Parsed hints for a class, from the per-run memo or the cache.
    pub fn hints(&self, class_id: &str) -> Result<Arc<ClassHints>> {
        if let Some(hints) = self.resolved.borrow().get(class_id) {
            return Ok(hints.clone());
        }

        let record = self
            .index
            .get(class_id)
            .with_context(|| format!("unknown class: {class_id}"))?;
        let source = std::fs::read_to_string(&record.path)
            .with_context(|| format!("failed to read source of {class_id}"))?;

        // Dependency facts are variant-independent at parse time; the
        // variant subset only matters when filtering edges.
        let key = CacheKey::new(class_id, fingerprint(source.as_bytes()), vec![]);
        let hints = self.cache.get_or_insert_with(&key, || parse_hints(&source))?;

        self.resolved
            .borrow_mut()
            .insert(class_id.to_owned(), hints.clone());
        Ok(hints)
    }

    /// Variant names relevant to a class's conditional edges.
    pub fn relevant_variants(&self, class_id: &str) -> Result<Vec<String>> {
        Ok(self.hints(class_id)?.relevant_variants.clone())
    }
}

impl DependencyProvider for HintProvider<'_> {
    fn deps_of(&self, class_id: &str, variants: &VariantSet) -> Result<ClassDeps> {
        let hints = self.hints(class_id)?;
        let ignored = |target: &str| hints.ignore.iter().any(|i| i == target);

        let mut deps = ClassDeps::default();
        for hint in &hints.load {
            if hint.active(variants) && !ignored(&hint.target) {
                deps.load.push(hint.target.clone());
            }
        }
        for hint in &hints.run {
            if hint.active(variants) && !ignored(&hint.target) {
                deps.run.push(hint.target.clone());
            }
        }

        // Statically declared config edges, subject to the same ignores.
        if let Some(extra) = self.require.get(class_id) {
            for target in extra {
                if !ignored(target) && !deps.load.contains(target) {
                    deps.load.push(target.clone());
                }
            }
        }
        if let Some(extra) = self.use_.get(class_id) {
            for target in extra {
                if !ignored(target) && !deps.run.contains(target) {
                    deps.run.push(target.clone());
                }
            }
        }

        Ok(deps)
    }
}
