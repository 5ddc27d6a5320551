//! Variant engine
//!
//! Variant domains map a name to a set of candidate values. Runtime
//! overrides pin a domain to a single value, removing it from combinatorial
//! expansion. The engine enumerates every distinct combination the build
//! must run for, in a deterministic order.

use indexmap::IndexMap;
use log::debug;

/// One complete resolution context: every domain mapped to exactly one value.
pub type VariantSet = IndexMap<String, String>;

/// Declared variant domains, after runtime overrides have been applied.
#[derive(Debug, Clone, Default)]
pub struct VariantDomains {
    domains: IndexMap<String, Vec<String>>,
}

impl VariantDomains {
    /// Merge declared domains with runtime overrides. An override pins the
    /// domain to that single value; overrides may also introduce domains the
    /// config does not declare.
    pub fn merge(
        declared: &IndexMap<String, Vec<String>>,
        overrides: &IndexMap<String, String>,
    ) -> Self {
        let mut domains = declared.clone();
        for (name, value) in overrides {
            domains.insert(name.clone(), vec![value.clone()]);
        }
        Self { domains }
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Names of domains still subject to combinatorial expansion.
    pub fn multi_valued(&self) -> impl Iterator<Item = &str> {
        self.domains
            .iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(name, _)| name.as_str())
    }

    /// Every combination the build must run for.
    ///
    /// The count equals the product of the cardinalities of multi-valued
    /// domains; single-valued domains are held constant but still appear in
    /// every returned set. Zero multi-valued domains yields exactly one set.
    pub fn combinations(&self) -> Vec<VariantSet> {
        let mut result = vec![VariantSet::new()];

        for (name, values) in &self.domains {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for combination in &result {
                for value in values {
                    let mut extended = combination.clone();
                    extended.insert(name.clone(), value.clone());
                    next.push(extended);
                }
            }
            result = next;
        }

        debug!("Computed {} variant combinations", result.len());
        result
    }
}
