//! Part and package builder
//!
//! Maps the resolved class list into named logical parts and packs them
//! into a minimal set of physical packages. Parts named in the collapse
//! list (plus the boot part, always) merge into package 0; a class shared
//! by several non-collapsed parts lands in the lowest-numbered package
//! reachable by all of them, so nothing is duplicated; a size budget splits
//! oversized packages at boundaries that respect load ordering.

use anyhow::{Context, Result, bail};
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    depgraph::{ResolveRequest, Resolver},
    variants::VariantSet,
};

/// Inputs for one packaging computation.
#[derive(Debug)]
pub struct PartsInput<'a> {
    /// Part name -> include expressions already expanded to class ids.
    /// Pattern expansion is variant-independent; the per-part closure
    /// computed here is not.
    pub part_includes: &'a IndexMap<String, Vec<String>>,
    /// Global smart excludes, honored inside part closures too.
    pub smart_exclude: &'a [String],
    /// The globally resolved, load-ordered class list.
    pub class_list: &'a [String],
    /// Part names force-merged into package 0.
    pub collapse: &'a [String],
    /// The boot part, implicitly collapsed.
    pub boot: &'a str,
    /// Byte-size split threshold; 0 disables splitting.
    pub size_budget: u64,
}

/// The packaging result: part -> package indices, and ordered packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePlan {
    pub parts: IndexMap<String, Vec<usize>>,
    pub packages: Vec<Vec<String>>,
}

impl PackagePlan {
    /// Single-package plan used when no package configuration exists.
    pub fn single(boot: &str, class_list: &[String]) -> Self {
        let mut parts = IndexMap::new();
        parts.insert(boot.to_owned(), vec![0]);
        Self {
            parts,
            packages: vec![class_list.to_vec()],
        }
    }
}

/// Compute the package plan for one variant set.
///
/// `size_of` estimates the byte size of one class for budget splitting.
pub fn build(
    resolver: &Resolver<'_>,
    input: &PartsInput<'_>,
    variants: &VariantSet,
    size_of: &dyn Fn(&str) -> u64,
) -> Result<PackagePlan> {
    if !input.part_includes.contains_key(input.boot) {
        bail!("boot part '{}' is not declared", input.boot);
    }

    let position: FxHashMap<&str, usize> = input
        .class_list
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    // Per-part dependency closure, restricted to the global class list.
    let empty: Vec<String> = Vec::new();
    let mut part_classes: IndexMap<&str, FxHashSet<String>> = IndexMap::new();
    for (name, includes) in input.part_includes {
        let closure = resolver
            .closure(
                ResolveRequest {
                    smart_include: includes,
                    explicit_include: &empty,
                    smart_exclude: input.smart_exclude,
                    explicit_exclude: &empty,
                },
                variants,
            )
            .with_context(|| format!("failed to resolve part '{name}'"))?;
        let restricted: FxHashSet<String> = closure
            .into_iter()
            .filter(|id| position.contains_key(id.as_str()))
            .collect();
        trace!("Part {name}: {} classes", restricted.len());
        part_classes.insert(name.as_str(), restricted);
    }

    let collapsed: FxHashSet<&str> = input
        .collapse
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(input.boot))
        .collect();

    // Non-collapsed parts get a membership-mask bit each, in declaration
    // order.
    let masked_parts: Vec<&str> = part_classes
        .keys()
        .copied()
        .filter(|name| !collapsed.contains(name))
        .collect();

    // Group classes: package 0 takes everything owned by a collapsed part
    // (or claimed by no part at all); the rest group by the exact set of
    // non-collapsed parts needing them.
    let mut base: Vec<String> = Vec::new();
    let mut grouped: IndexMap<Vec<usize>, Vec<String>> = IndexMap::new();
    for id in input.class_list {
        let in_collapsed = part_classes
            .iter()
            .any(|(name, classes)| collapsed.contains(name) && classes.contains(id));

        if in_collapsed {
            base.push(id.clone());
            continue;
        }

        let mask: Vec<usize> = masked_parts
            .iter()
            .enumerate()
            .filter(|(_, name)| part_classes[**name].contains(id))
            .map(|(bit, _)| bit)
            .collect();

        if mask.is_empty() {
            debug!("Class {id} is not claimed by any part; assigning to package 0");
            base.push(id.clone());
        } else {
            grouped.entry(mask).or_default().push(id.clone());
        }
    }

    // More widely shared groups get lower package numbers, so a class
    // needed by several parts sits in the lowest-numbered package all of
    // them reach.
    let mut order: Vec<&Vec<usize>> = grouped.keys().collect();
    order.sort_by_key(|mask| {
        let first = grouped[*mask]
            .first()
            .and_then(|id| position.get(id.as_str()))
            .copied()
            .unwrap_or(usize::MAX);
        (std::cmp::Reverse(mask.len()), first)
    });

    let mut packages: Vec<Vec<String>> = vec![base];
    for mask in order {
        packages.push(grouped[mask].clone());
    }

    // Part -> package indices: every package holding at least one of the
    // part's classes, which keeps each part's classes a subset of its
    // packages.
    let mut parts: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (name, classes) in &part_classes {
        let mut indices: Vec<usize> = packages
            .iter()
            .enumerate()
            .filter(|(_, content)| content.iter().any(|id| classes.contains(id)))
            .map(|(index, _)| index)
            .collect();
        if collapsed.contains(name) && !indices.contains(&0) {
            indices.insert(0, 0);
        }
        parts.insert((*name).to_owned(), indices);
    }

    let plan = if input.size_budget > 0 {
        split_by_size(packages, parts, input.size_budget, size_of)
    } else {
        PackagePlan { parts, packages }
    };

    verify_partition(&plan, input.class_list)?;
    debug!(
        "Packaged {} classes into {} packages",
        input.class_list.len(),
        plan.packages.len()
    );
    Ok(plan)
}

/// Split oversized packages into consecutive sub-packages.
///
/// Sub-packages keep the class order of their parent, which is a suffix of
/// the globally load-ordered list, so no class ends up in an earlier
/// sub-package than a class it load-depends on.
fn split_by_size(
    packages: Vec<Vec<String>>,
    parts: IndexMap<String, Vec<usize>>,
    budget: u64,
    size_of: &dyn Fn(&str) -> u64,
) -> PackagePlan {
    let mut split: Vec<Vec<String>> = Vec::new();
    // Old package index -> the physical indices it became.
    let mut renumbered: Vec<Vec<usize>> = Vec::with_capacity(packages.len());

    for content in packages {
        let mut indices = Vec::new();
        let mut chunk: Vec<String> = Vec::new();
        let mut chunk_size = 0u64;

        for id in content {
            let class_size = size_of(&id);
            if !chunk.is_empty() && chunk_size + class_size > budget {
                indices.push(split.len());
                split.push(std::mem::take(&mut chunk));
                chunk_size = 0;
            }
            chunk_size += class_size;
            chunk.push(id);
        }
        if !chunk.is_empty() || indices.is_empty() {
            indices.push(split.len());
            split.push(chunk);
        }
        renumbered.push(indices);
    }

    let parts = parts
        .into_iter()
        .map(|(name, indices)| {
            let physical: Vec<usize> = indices
                .into_iter()
                .flat_map(|old| renumbered[old].iter().copied())
                .collect();
            (name, physical)
        })
        .collect();

    PackagePlan {
        parts,
        packages: split,
    }
}

/// The union of all package contents must equal the class list exactly.
fn verify_partition(plan: &PackagePlan, class_list: &[String]) -> Result<()> {
    let mut seen: IndexSet<&str> = IndexSet::new();
    for content in &plan.packages {
        for id in content {
            if !seen.insert(id.as_str()) {
                bail!("class {id} is duplicated across packages");
            }
        }
    }
    if seen.len() != class_list.len() {
        for id in class_list {
            if !seen.contains(id.as_str()) {
                bail!("class {id} is missing from every package");
            }
        }
    }
    Ok(())
}
