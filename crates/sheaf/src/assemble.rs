//! Code assembler
//!
//! Renders the boot/loader script and writes per-package output. The loader
//! template carries three substitution markers (part map, package URI
//! lists, boot part name) and is preceded by two initialization blocks that
//! populate the global settings and variants namespaces.

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::{Compression, write::GzEncoder};
use indexmap::IndexMap;
use log::debug;

use crate::{parts::PackagePlan, variants::VariantSet};

/// Global namespace populated with build settings.
pub const SETTINGS_GLOBAL: &str = "bldsettings";
/// Global namespace populated with the active variant values.
pub const VARIANTS_GLOBAL: &str = "bldvariants";

/// Minimal loader: records the part/package tables and script-loads the
/// boot part's packages in order.
const LOADER_TEMPLATE: &str = r#"(function(){
var parts=%PARTS%;
var uris=%URIS%;
var boot=%BOOT%;
var loaded={};
function loadPackage(id){
  if(loaded[id])return;
  loaded[id]=true;
  for(var i=0;i<uris[id].length;i++){
    document.write('<script type="text/javascript" src="'+uris[id][i]+'"></'+'script>');
  }
}
function loadPart(name){
  var ids=parts[name];
  for(var i=0;i<ids.length;i++)loadPackage(ids[i]);
}
window.bldloader={parts:parts,uris:uris,boot:boot,loadPart:loadPart};
loadPart(boot);
})();"#;

/// Serialize a configuration value as a script literal: numbers, booleans
/// and null pass through, everything else is quoted and escaped.
pub fn to_literal(value: &str) -> String {
    let is_number = !value.is_empty()
        && value.chars().enumerate().all(|(i, c)| {
            c.is_ascii_digit() || (i == 0 && c == '-')
        });
    if is_number || matches!(value, "true" | "false" | "null") {
        value.to_owned()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn assignments_block(global: &str, pairs: &IndexMap<String, String>, format: bool) -> String {
    let mut out = format!("if(!window.{global}){global}={{}};");
    for (key, value) in pairs {
        if format {
            out.push('\n');
        }
        out.push_str(&format!("{global}[\"{key}\"]={};", to_literal(value)));
    }
    out
}

/// The settings initialization block.
pub fn settings_code(settings: &IndexMap<String, String>, format: bool) -> String {
    assignments_block(SETTINGS_GLOBAL, settings, format)
}

/// The active-variants initialization block.
pub fn variants_code(variants: &VariantSet, format: bool) -> String {
    assignments_block(VARIANTS_GLOBAL, variants, format)
}

/// Render the loader with the part map, per-package URI lists, and boot
/// part substituted in.
pub fn loader_code(plan: &PackagePlan, package_uris: &[Vec<String>], boot: &str) -> String {
    let mut part_data = String::from("{");
    for (i, (name, indices)) in plan.parts.iter().enumerate() {
        if i > 0 {
            part_data.push(',');
        }
        let list: Vec<String> = indices.iter().map(ToString::to_string).collect();
        part_data.push_str(&format!("\"{name}\":[{}]", list.join(",")));
    }
    part_data.push('}');

    let mut uri_data = String::from("[");
    for (i, uris) in package_uris.iter().enumerate() {
        if i > 0 {
            uri_data.push(',');
        }
        let quoted: Vec<String> = uris.iter().map(|u| format!("\"{u}\"")).collect();
        uri_data.push_str(&format!("[{}]", quoted.join(",")));
    }
    uri_data.push(']');

    LOADER_TEMPLATE
        .replace("%PARTS%", &part_data)
        .replace("%URIS%", &uri_data)
        .replace("%BOOT%", &format!("\"{boot}\""))
}

/// Join rendered blocks, either readably or squeezed. Blocks stay on
/// separate lines in both modes.
pub fn join_blocks(blocks: &[String], format: bool) -> String {
    if format {
        blocks.join("\n\n")
    } else {
        squeeze(&blocks.join("\n"))
    }
}

/// Cheap whitespace squeeze: drops blank lines and line indentation.
fn squeeze(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            out.push_str(trimmed);
            out.push('\n');
        }
    }
    out
}

/// Substitute `{name}` placeholders from variants, then settings, and
/// insert the package index before the file extension for multi-package
/// output.
pub fn resolve_file_name(
    file_name: &str,
    variants: &VariantSet,
    settings: &IndexMap<String, String>,
    package_id: Option<usize>,
) -> String {
    let mut resolved = file_name.to_owned();
    for (key, value) in variants {
        resolved = resolved.replace(&format!("{{{key}}}"), value);
    }
    for (key, value) in settings {
        resolved = resolved.replace(&format!("{{{key}}}"), value);
    }

    if let Some(id) = package_id {
        resolved = match resolved.rfind('.') {
            Some(dot) => format!("{}-{id}{}", &resolved[..dot], &resolved[dot..]),
            None => format!("{resolved}-{id}"),
        };
    }
    resolved
}

/// Write an artifact, plus a gzipped sibling when requested.
pub fn save(path: &Path, content: &str, gzip: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if gzip {
        let gz_path = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.gz", ext.to_string_lossy()),
            None => "gz".to_owned(),
        });
        let file = std::fs::File::create(&gz_path)
            .with_context(|| format!("failed to create {}", gz_path.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::best());
        encoder.write_all(content.as_bytes())?;
        encoder.finish()?;
    }

    debug!("Saved {}: {}", path.display(), size_report(content));
    Ok(())
}

/// Raw and compressed size, in KB, for log output.
pub fn size_report(content: &str) -> String {
    let raw = content.len();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    let compressed = encoder
        .write_all(content.as_bytes())
        .and_then(|()| encoder.finish())
        .map_or(raw, |buffer| buffer.len());
    format!("{}KB / {}KB", raw / 1024, compressed / 1024)
}
