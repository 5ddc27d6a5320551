//! Source-unit compiler seam
//!
//! Compiling a class into executable output is an external concern; the
//! pipeline only needs the [`ClassCompiler`] trait. The bundled
//! [`PassthroughCompiler`] emits the source with compiler-hint lines
//! stripped, which is enough for source builds and for tests.

use anyhow::{Context, Result};

use crate::{library::ClassRecord, variants::VariantSet};

/// Compiles one class under one variant set.
pub trait ClassCompiler {
    fn compile(&self, record: &ClassRecord, variants: &VariantSet) -> Result<String>;
}

/// Emits class sources nearly verbatim, dropping lines that only carry
/// compiler hints.
#[derive(Debug, Default)]
pub struct PassthroughCompiler;

impl ClassCompiler for PassthroughCompiler {
    fn compile(&self, record: &ClassRecord, _variants: &VariantSet) -> Result<String> {
        let source = std::fs::read_to_string(&record.path)
            .with_context(|| format!("failed to read source of {}", record.id))?;

        let mut out = String::with_capacity(source.len());
        for line in source.lines() {
            let trimmed = line.trim_start();
            let is_hint_only = (trimmed.starts_with("//") || trimmed.starts_with('*'))
                && (trimmed.contains("#require(")
                    || trimmed.contains("#use(")
                    || trimmed.contains("#ignore("));
            if !is_hint_only {
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(out)
    }
}
