//! Pipeline orchestrator
//!
//! Drives one generator job: scan libraries, prepare include/exclude lists
//! once per run, then for every variant combination resolve the class list,
//! partition it into parts and packages, and render the requested
//! artifacts. Fatal errors abort the whole run; missing optional sections
//! skip their stage.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::{
    assemble,
    cache::{Cache, CacheKey, fingerprint},
    compiler::{ClassCompiler, PassthroughCompiler},
    config::Config,
    depgraph::{DependencyProvider, ResolveRequest, Resolver},
    expand::{PatternExpander, split_entries},
    hints::{ClassHints, HintProvider},
    library::LibraryIndex,
    parts::{self, PackagePlan, PartsInput},
    variants::{VariantDomains, VariantSet},
};

/// Expanded include/exclude lists, stable for the whole run.
#[derive(Debug, Default)]
struct Selection {
    smart_include: Vec<String>,
    explicit_include: Vec<String>,
    smart_exclude: Vec<String>,
    explicit_exclude: Vec<String>,
}

/// One generator job over an immutable library index.
pub struct Generator {
    config: Config,
    index: LibraryIndex,
    runtime_variants: IndexMap<String, String>,
    runtime_settings: IndexMap<String, String>,
    /// Static load edges: config edges merged with runtime-supplied ones.
    require: IndexMap<String, Vec<String>>,
    /// Static run edges: config edges merged with runtime-supplied ones.
    use_: IndexMap<String, Vec<String>>,
    hint_cache: Cache<ClassHints>,
    compile_cache: Cache<String>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("classes", &self.index.len())
            .finish()
    }
}

impl Generator {
    /// Scan the configured libraries and set up the tool chain.
    ///
    /// Runtime require/use maps extend the config's statically declared
    /// dependency edges.
    pub fn new(
        config: Config,
        runtime_variants: IndexMap<String, String>,
        runtime_settings: IndexMap<String, String>,
        runtime_require: IndexMap<String, Vec<String>>,
        runtime_use: IndexMap<String, Vec<String>>,
    ) -> Result<Self> {
        info!("Scanning libraries...");
        let index = LibraryIndex::scan(&config.library)?;
        let require = merge_edges(&config.require, runtime_require);
        let use_ = merge_edges(&config.use_, runtime_use);
        Ok(Self {
            config,
            index,
            runtime_variants,
            runtime_settings,
            require,
            use_,
            hint_cache: Cache::new(),
            compile_cache: Cache::new(),
        })
    }

    pub fn index(&self) -> &LibraryIndex {
        &self.index
    }

    /// Run the whole job.
    pub fn run(&self) -> Result<()> {
        let expander = PatternExpander::new(&self.index);
        let selection = self.prepare_selection(&expander)?;

        // Part pattern expansion is variant-independent and happens once
        // per run; only a part's dependency closure varies per variant set.
        let mut part_includes: IndexMap<String, Vec<String>> = IndexMap::new();
        if let Some(packages) = &self.config.packages {
            debug!("Expanding part include expressions...");
            for (name, expressions) in &packages.parts {
                let expanded = expander
                    .expand(expressions)
                    .with_context(|| format!("failed to expand part '{name}'"))?;
                part_includes.insert(name.clone(), expanded);
            }
        }

        let domains = VariantDomains::merge(&self.config.variants, &self.runtime_variants);
        let variant_sets = domains.combinations();
        let total = variant_sets.len();

        for (number, variants) in variant_sets.iter().enumerate() {
            if total > 1 {
                info!("Processing variant set {}/{total}", number + 1);
                for name in domains.multi_valued() {
                    debug!("  {name} = {}", variants[name]);
                }
            }
            self.run_variant_set(&selection, &part_includes, variants)?;
        }

        Ok(())
    }

    fn run_variant_set(
        &self,
        selection: &Selection,
        part_includes: &IndexMap<String, Vec<String>>,
        variants: &VariantSet,
    ) -> Result<()> {
        let provider = HintProvider::new(
            &self.index,
            &self.require,
            &self.use_,
            &self.hint_cache,
        );
        let resolver = Resolver::new(&self.index, &provider);

        info!("Resolving dependencies...");
        let class_list = resolver.class_list(
            ResolveRequest {
                smart_include: &selection.smart_include,
                explicit_include: &selection.explicit_include,
                smart_exclude: &selection.smart_exclude,
                explicit_exclude: &selection.explicit_exclude,
            },
            variants,
        )?;
        info!("Class list contains {} classes", class_list.len());

        let (plan, boot) = if let Some(packages) = &self.config.packages {
            let size_of = |id: &str| {
                self.index
                    .get(id)
                    .and_then(|record| std::fs::metadata(&record.path).ok())
                    .map_or(0, |meta| meta.len())
            };
            let plan = parts::build(
                &resolver,
                &PartsInput {
                    part_includes,
                    smart_exclude: &selection.smart_exclude,
                    class_list: &class_list,
                    collapse: &packages.collapse,
                    boot: &packages.init,
                    size_budget: packages.size,
                },
                variants,
                &size_of,
            )?;
            (plan, packages.init.clone())
        } else {
            // No package configuration: a single package holding the full
            // class list under the boot part.
            (PackagePlan::single("boot", &class_list), "boot".to_owned())
        };

        self.run_localize(&plan);
        self.run_source(&plan, &boot, variants)?;
        self.run_compiled(&plan, &boot, variants, &provider)?;
        self.run_dependency_debug(&plan, variants, &provider)?;

        Ok(())
    }

    /// Prepare and expand include/exclude configuration, once per run.
    fn prepare_selection(&self, expander: &PatternExpander<'_>) -> Result<Selection> {
        let mut selection = Selection::default();

        debug!("Preparing include configuration...");
        let (smart, explicit) = split_entries(&self.config.include);
        if !smart.is_empty() || !explicit.is_empty() {
            if !explicit.is_empty() {
                warn!("Explicitly included classes may not work: their dependencies are not guaranteed");
            }
            selection.smart_include = expander.expand(&smart)?;
            selection.explicit_include = expander.expand(&explicit)?;
        } else if let Some(packages) = &self.config.packages {
            // No global includes: seed resolution from all part expressions.
            info!("Including part classes...");
            let merged: Vec<String> = packages
                .parts
                .values()
                .flat_map(|expressions| expressions.iter().cloned())
                .collect();
            selection.smart_include = expander.expand(&merged)?;
        }

        debug!("Preparing exclude configuration...");
        let (smart, explicit) = split_entries(&self.config.exclude);
        if !self.config.exclude.is_empty() {
            warn!("Excludes may break code!");
        }
        selection.smart_exclude = expander.expand(&smart)?;
        selection.explicit_exclude = expander.expand(&explicit)?;

        debug!(
            "Including {} classes smart, {} classes explicit",
            selection.smart_include.len(),
            selection.explicit_include.len()
        );
        Ok(selection)
    }

    /// Merged build settings; runtime values win over config values.
    fn settings(&self) -> IndexMap<String, String> {
        let mut settings = self.config.settings.clone();
        for (key, value) in &self.runtime_settings {
            settings.insert(key.clone(), value.clone());
        }
        settings
    }

    fn run_localize(&self, plan: &PackagePlan) {
        if self.config.localize.is_empty() {
            return;
        }

        info!("Looking up locales...");
        for (package_id, content) in plan.packages.iter().enumerate() {
            for locale in &self.config.localize {
                let classes_covered = content
                    .iter()
                    .filter_map(|id| self.index.get(id))
                    .filter(|record| {
                        self.index
                            .translations(&record.namespace)
                            .contains(locale)
                    })
                    .count();
                debug!(
                    "Package #{package_id}: locale {locale} covers {classes_covered}/{} classes",
                    content.len()
                );
            }
        }
    }

    fn run_source(&self, plan: &PackagePlan, boot: &str, variants: &VariantSet) -> Result<()> {
        let Some(source) = &self.config.source else {
            return Ok(());
        };

        info!("Generating source version...");
        let settings = self.settings();

        // Source builds reference every class file directly.
        let package_uris: Vec<Vec<String>> = plan
            .packages
            .iter()
            .map(|content| {
                content
                    .iter()
                    .filter_map(|id| self.index.get(id))
                    .map(|record| record.uri.clone())
                    .collect()
            })
            .collect();

        let blocks = vec![
            assemble::settings_code(&settings, source.format),
            assemble::variants_code(variants, source.format),
            assemble::loader_code(plan, &package_uris, boot),
        ];
        let content = assemble::join_blocks(&blocks, source.format);

        let path = assemble::resolve_file_name(&source.file, variants, &settings, None);
        assemble::save(std::path::Path::new(&path), &content, source.gzip)?;
        Ok(())
    }

    fn run_compiled(
        &self,
        plan: &PackagePlan,
        boot: &str,
        variants: &VariantSet,
        provider: &HintProvider<'_>,
    ) -> Result<()> {
        let Some(compile) = &self.config.compile else {
            return Ok(());
        };

        let settings = self.settings();
        let file_uri = compile.uri.as_deref().unwrap_or(&compile.file);

        info!("Generating boot script...");
        // The boot script owns the unsuffixed path; package files always
        // carry the index suffix, so the loader never references itself.
        let package_uris: Vec<Vec<String>> = (0..plan.packages.len())
            .map(|id| {
                vec![assemble::resolve_file_name(file_uri, variants, &settings, Some(id))]
            })
            .collect();

        let blocks = vec![
            assemble::settings_code(&settings, compile.format),
            assemble::variants_code(variants, compile.format),
            assemble::loader_code(plan, &package_uris, boot),
        ];
        let boot_content = assemble::join_blocks(&blocks, compile.format);
        let boot_path = assemble::resolve_file_name(&compile.file, variants, &settings, None);
        assemble::save(std::path::Path::new(&boot_path), &boot_content, compile.gzip)?;

        info!("Generating packages...");
        let compiler = PassthroughCompiler;
        for (package_id, content) in plan.packages.iter().enumerate() {
            debug!("Compiling package #{package_id}");
            let mut compiled = String::new();
            for id in content {
                compiled.push_str(&self.compile_class(id, variants, provider, &compiler)?);
            }

            let path = assemble::resolve_file_name(
                &compile.file,
                variants,
                &settings,
                Some(package_id),
            );
            assemble::save(std::path::Path::new(&path), &compiled, compile.gzip)?;
        }
        Ok(())
    }

    /// Compile one class through the cache coordinator.
    ///
    /// The cache key carries only the variant names this class actually
    /// branches on, so unrelated variant changes reuse the entry.
    fn compile_class(
        &self,
        class_id: &str,
        variants: &VariantSet,
        provider: &HintProvider<'_>,
        compiler: &dyn ClassCompiler,
    ) -> Result<String> {
        let record = self
            .index
            .get(class_id)
            .with_context(|| format!("unknown class: {class_id}"))?;
        let source = std::fs::read(&record.path)
            .with_context(|| format!("failed to read source of {class_id}"))?;

        let relevant = provider.relevant_variants(class_id)?;
        let subset: Vec<(String, String)> = relevant
            .into_iter()
            .filter_map(|name| {
                variants
                    .get(&name)
                    .map(|value| (name, value.clone()))
            })
            .collect();

        let key = CacheKey::new(class_id, fingerprint(&source), subset);
        let compiled = self
            .compile_cache
            .get_or_insert_with(&key, || compiler.compile(record, variants))?;
        Ok((*compiled).clone())
    }

    fn run_dependency_debug(
        &self,
        plan: &PackagePlan,
        variants: &VariantSet,
        provider: &HintProvider<'_>,
    ) -> Result<()> {
        if !self.config.debug.dependencies {
            return Ok(());
        }

        info!("Dependency debugging...");
        for (package_id, content) in plan.packages.iter().enumerate() {
            info!("Package #{package_id}");
            for (part, indices) in &plan.parts {
                if indices.contains(&package_id) {
                    info!("  Part {part}");
                }
            }

            for class_id in content {
                debug!("  Class: {class_id}");
                for other in content {
                    if other == class_id {
                        continue;
                    }
                    let deps = provider.deps_of(other, variants)?;
                    if deps.load.contains(class_id) {
                        debug!("    Used by: {other} (load)");
                    }
                    if deps.run.contains(class_id) {
                        debug!("    Used by: {other} (run)");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Merge dependency-edge maps; extra targets append after the base ones,
/// without duplicates.
fn merge_edges(
    base: &IndexMap<String, Vec<String>>,
    extra: IndexMap<String, Vec<String>>,
) -> IndexMap<String, Vec<String>> {
    let mut merged = base.clone();
    for (class, targets) in extra {
        let slot = merged.entry(class).or_default();
        for target in targets {
            if !slot.contains(&target) {
                slot.push(target);
            }
        }
    }
    merged
}
