//! Output Normalizer
//!
//! Restructures the exporter's output directory into one file per resource kind:
//!
//! 1. Discover every `*.tf` file (the `.terraform` plugin cache is skipped and removed).
//! 2. Per file: strip top-level `provider` and `terraform` blocks, apply the known
//!    content repairs, and drop the file if nothing is left.
//! 3. Group by the kind of the first resource declaration and delete the source.
//! 4. Write `<kind>.tf` per group, then the standard scaffold (`provider.tf`,
//!    `variables.tf`, `outputs.tf`, `main.tf`).
//!
//! Block removal uses a small HCL-aware scanner: braces inside strings, comments,
//! template interpolations and heredocs are not counted.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::scaffold::{Scaffold, ScaffoldContext};
use crate::traits::FileSystem;

/// Kind used for content without a resource declaration
pub const MAIN_KIND: &str = "main";

const PLUGIN_CACHE_DIR: &str = ".terraform";

/// Provider prefixes removed from resource types to form kind names
const VENDOR_PREFIXES: &[&str] = &["azurerm_", "azapi_", "aws_", "google_"];

/// A textual fix for a value the exporter is known to emit wrongly.
///
/// Applied only when `marker` (a quoted resource type) appears in the file.
/// `replacement` of `None` deletes every matching line.
struct ContentRepair {
    marker: &'static str,
    pattern: &'static str,
    replacement: Option<&'static str>,
}

const CONTENT_REPAIRS: &[ContentRepair] = &[
    ContentRepair {
        marker: r#""azurerm_key_vault""#,
        pattern: r#"(?m)^([ \t]*soft_delete_retention_days[ \t]*=[ \t]*)"?0"?[ \t]*$"#,
        replacement: Some("${1}7"),
    },
    ContentRepair {
        marker: r#""azurerm_managed_disk""#,
        pattern: r#"(?m)^([ \t]*disk_size_gb[ \t]*=[ \t]*)"?0"?[ \t]*$"#,
        replacement: Some("${1}30"),
    },
    ContentRepair {
        marker: r#""azurerm_linux_virtual_machine""#,
        pattern: r#"(?m)^[ \t]*platform_fault_domain[ \t]*=[ \t]*"?-1"?[ \t]*\r?\n?"#,
        replacement: None,
    },
    ContentRepair {
        marker: r#""azurerm_windows_virtual_machine""#,
        pattern: r#"(?m)^[ \t]*platform_fault_domain[ \t]*=[ \t]*"?-1"?[ \t]*\r?\n?"#,
        replacement: None,
    },
    ContentRepair {
        marker: r#""azurerm_storage_account""#,
        pattern: r"(?m)^[ \t]*allow_blob_public_access[ \t]*=.*\r?\n?",
        replacement: None,
    },
    ContentRepair {
        marker: r#""azurerm_storage_account""#,
        pattern: r"(?m)^[ \t]*enable_https_traffic_only[ \t]*=.*\r?\n?",
        replacement: None,
    },
];

lazy_static! {
    static ref RESOURCE_DECLARATION: Regex =
        Regex::new(r#"(?m)^\s*resource\s+"([A-Za-z0-9_-]+)"\s+""#)
            .expect("Invalid resource declaration regex");
    static ref STRIPPED_BLOCK_HEADER: Regex =
        Regex::new(r#"\A[ \t]*(?:provider[ \t]+"[^"\n]*"|terraform)[ \t]*\{"#)
            .expect("Invalid block header regex");
    static ref EXCESS_BLANK_LINES: Regex =
        Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("Invalid blank line regex");
    static ref COMPILED_REPAIRS: Vec<(&'static str, Regex, Option<&'static str>)> =
        CONTENT_REPAIRS
            .iter()
            .map(|r| {
                (
                    r.marker,
                    Regex::new(r.pattern).expect("Invalid content repair regex"),
                    r.replacement,
                )
            })
            .collect();
}

/// What normalization did, for logging and CLI output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationSummary {
    pub files_processed: usize,
    pub files_dropped: usize,
    /// `(kind, number of merged files)` in kind order
    pub kinds: Vec<(String, usize)>,
}

/// Identity of the exported container, written into the scaffold
#[derive(Debug, Clone)]
pub struct ExportTarget<'a> {
    pub subscription_id: &'a str,
    pub resource_group: &'a str,
    pub provider_version: &'a str,
}

pub struct OutputNormalizer {
    fs: Arc<dyn FileSystem>,
    scaffold: Scaffold,
}

impl OutputNormalizer {
    pub fn new(fs: Arc<dyn FileSystem>) -> Result<Self> {
        Ok(Self {
            fs,
            scaffold: Scaffold::new()?,
        })
    }

    /// Remove directories the process pass left empty, deepest first
    fn remove_emptied_dirs(&self, output_dir: &Path, sources: &[PathBuf]) -> Result<()> {
        let mut dirs = BTreeSet::new();
        for source in sources {
            let mut current = source.parent();
            while let Some(dir) = current {
                if dir == output_dir || !dir.starts_with(output_dir) {
                    break;
                }
                dirs.insert(dir.to_path_buf());
                current = dir.parent();
            }
        }

        let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

        for dir in dirs {
            if self.fs.remove_dir_if_empty(&dir)? {
                tracing::debug!(dir = %dir.display(), "Removed emptied directory");
            }
        }

        Ok(())
    }

    pub fn normalize(&self, output_dir: &Path, target: &ExportTarget) -> Result<NormalizationSummary> {
        // Discover everything before touching anything
        let sources: Vec<_> = self
            .fs
            .walk_files(output_dir, &[PLUGIN_CACHE_DIR])?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "tf"))
            .collect();

        let plugin_cache = output_dir.join(PLUGIN_CACHE_DIR);
        if self.fs.is_dir(&plugin_cache) {
            self.fs.remove_dir_all(&plugin_cache)?;
        }

        let mut summary = NormalizationSummary::default();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for path in &sources {
            let raw = self.fs.read_to_string(path)?;
            self.fs.remove_file(path)?;
            summary.files_processed += 1;

            let cleaned = clean_content(&raw);
            if cleaned.is_empty() {
                tracing::debug!(file = %path.display(), "Dropping empty exported file");
                summary.files_dropped += 1;
                continue;
            }

            groups.entry(derive_kind(&cleaned)).or_default().push(cleaned);
        }
        self.remove_emptied_dirs(output_dir, &sources)?;

        let main_blocks = groups.remove(MAIN_KIND).unwrap_or_default();
        let main_content = (!main_blocks.is_empty()).then(|| main_blocks.join("\n\n"));

        for (kind, blocks) in &groups {
            let path = output_dir.join(format!("{}.tf", kind));
            self.fs
                .write(&path, &format!("{}\n", blocks.join("\n\n")))
                .with_context(|| format!("Failed to write {}.tf", kind))?;
            summary.kinds.push((kind.clone(), blocks.len()));
        }

        let scaffold = self.scaffold.render(&ScaffoldContext {
            subscription_id: target.subscription_id,
            resource_group: target.resource_group,
            provider_version: target.provider_version,
            main_content: main_content.as_deref(),
        })?;
        for (name, content) in scaffold {
            self.fs
                .write(&output_dir.join(name), &content)
                .with_context(|| format!("Failed to write {}", name))?;
        }

        if !main_blocks.is_empty() {
            summary.kinds.push((MAIN_KIND.to_string(), main_blocks.len()));
            summary.kinds.sort();
        }

        tracing::info!(
            processed = summary.files_processed,
            dropped = summary.files_dropped,
            kinds = summary.kinds.len(),
            "Normalized exporter output"
        );

        Ok(summary)
    }
}

/// Strip, repair, and trim one exported file
pub fn clean_content(raw: &str) -> String {
    let stripped = strip_blocks(raw);
    let repaired = apply_repairs(&stripped);
    EXCESS_BLANK_LINES
        .replace_all(&repaired, "\n\n")
        .trim()
        .to_string()
}

/// Kind of the first resource declaration, vendor prefix removed; `main` if none
pub fn derive_kind(content: &str) -> String {
    let Some(captures) = RESOURCE_DECLARATION.captures(content) else {
        return MAIN_KIND.to_string();
    };

    let resource_type = &captures[1];
    let kind = VENDOR_PREFIXES
        .iter()
        .find_map(|prefix| resource_type.strip_prefix(prefix))
        .filter(|kind| !kind.is_empty())
        .unwrap_or(resource_type);

    kind.to_string()
}

pub fn apply_repairs(content: &str) -> String {
    let mut repaired = content.to_string();

    for (marker, pattern, replacement) in COMPILED_REPAIRS.iter() {
        if !repaired.contains(marker) {
            continue;
        }
        repaired = pattern
            .replace_all(&repaired, replacement.unwrap_or(""))
            .into_owned();
    }

    repaired
}

/// Remove top-level `provider "<name>" { ... }` and `terraform { ... }` blocks
pub fn strip_blocks(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut out = String::with_capacity(content.len());
    let mut pos = 0;

    while pos < bytes.len() {
        if let Some(header) = STRIPPED_BLOCK_HEADER.find(&content[pos..]) {
            if let Some(end) = scan(bytes, pos + header.end(), Stop::BlockClose) {
                pos = skip_line_rest(bytes, end);
                continue;
            }
        }

        let end = scan(bytes, pos, Stop::LineEnd).unwrap_or(bytes.len());
        out.push_str(&content[pos..end]);
        pos = end;
    }

    out
}

/// After a removed block, also drop trailing blanks and the newline
fn skip_line_rest(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b'\t' || bytes[pos] == b'\r') {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'\n' {
        pos += 1;
    }
    pos
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// Starting just inside a `{`, stop after its matching `}`
    BlockClose,
    /// Starting at top level, stop after the first newline outside any construct
    LineEnd,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Frame {
    Brace,
    Str,
}

/// Scan HCL from `start` and return the index just past the stop point
fn scan(bytes: &[u8], start: usize, stop: Stop) -> Option<usize> {
    let mut stack: Vec<Frame> = match stop {
        Stop::BlockClose => vec![Frame::Brace],
        Stop::LineEnd => Vec::new(),
    };
    let at = |i: usize| bytes.get(i).copied();
    let mut i = start;

    while i < bytes.len() {
        let c = bytes[i];

        if stack.last() == Some(&Frame::Str) {
            match c {
                b'\\' => i += 1,
                b'"' => {
                    stack.pop();
                }
                // `$${` and `%%{` are literal
                b'$' | b'%' if at(i + 1) == Some(c) && at(i + 2) == Some(b'{') => i += 2,
                b'$' | b'%' if at(i + 1) == Some(b'{') => {
                    stack.push(Frame::Brace);
                    i += 1;
                }
                _ => {}
            }
            i += 1;
            continue;
        }

        match c {
            b'"' => stack.push(Frame::Str),
            b'#' => i = line_end(bytes, i) - 1,
            b'/' if at(i + 1) == Some(b'/') => i = line_end(bytes, i) - 1,
            b'/' if at(i + 1) == Some(b'*') => {
                i = find(bytes, i + 2, b"*/").map(|p| p + 1).unwrap_or(bytes.len());
            }
            b'<' if at(i + 1) == Some(b'<') => {
                if let Some(end) = heredoc_end(bytes, i + 2) {
                    // Resume on the terminator line's newline
                    i = end - 1;
                }
            }
            b'{' => stack.push(Frame::Brace),
            b'}' => {
                stack.pop();
                if stop == Stop::BlockClose && stack.is_empty() {
                    return Some(i + 1);
                }
            }
            b'\n' if stop == Stop::LineEnd && stack.is_empty() => return Some(i + 1),
            _ => {}
        }
        i += 1;
    }

    match stop {
        Stop::LineEnd => Some(bytes.len()),
        Stop::BlockClose => None,
    }
}

/// Index of the `\n` ending the line containing `i`, or the end of input
fn line_end(bytes: &[u8], i: usize) -> usize {
    find(bytes, i, b"\n").unwrap_or(bytes.len())
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// For `<<EOF` / `<<-EOF` starting at `start` (just after `<<`), return the index
/// of the newline ending the terminator line
fn heredoc_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    if bytes.get(i) == Some(&b'-') {
        i += 1;
    }
    let name_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    let marker = &bytes[name_start..i];
    if marker.is_empty() {
        return None;
    }

    let mut line_start = line_end(bytes, i) + 1;
    while line_start < bytes.len() {
        let end = line_end(bytes, line_start);
        if bytes[line_start..end].trim_ascii() == marker {
            return Some(end.min(bytes.len()));
        }
        line_start = end + 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockFileSystem;
    use std::path::PathBuf;

    fn target() -> ExportTarget<'static> {
        ExportTarget {
            subscription_id: "sub-1",
            resource_group: "rg-1",
            provider_version: "~> 3.0",
        }
    }

    #[test]
    fn test_strip_provider_and_terraform_blocks() {
        let input = r#"terraform {
  required_providers {
    azurerm = {
      source = "hashicorp/azurerm"
    }
  }
}

provider "azurerm" {
  features {}
}

resource "azurerm_resource_group" "rg" {
  name = "rg-1"
}
"#;
        let out = strip_blocks(input);
        assert!(!out.contains("required_providers"));
        assert!(!out.contains("features"));
        assert!(out.contains(r#"resource "azurerm_resource_group" "rg" {"#));
        assert!(out.trim_end().ends_with('}'));
    }

    #[test]
    fn test_strip_respects_strings_comments_and_heredocs() {
        let input = r#"provider "azurerm" {
  # a stray } in a comment
  tag = "not a } brace ${var.x}"
  /* } */
  script = <<-EOT
    }}}
  EOT
}
resource "azurerm_key_vault" "kv" {
  name = "kv"
}
"#;
        let out = strip_blocks(input);
        assert_eq!(
            out,
            "resource \"azurerm_key_vault\" \"kv\" {\n  name = \"kv\"\n}\n"
        );
    }

    #[test]
    fn test_nested_provider_reference_is_kept() {
        let input = r#"resource "azurerm_subnet" "a" {
  provider = azurerm.secondary
  terraform_value = "x"
}
"#;
        assert_eq!(strip_blocks(input), input);
    }

    #[test]
    fn test_unbalanced_block_is_left_alone() {
        let input = "terraform {\n  backend \"local\" {}\n";
        assert_eq!(strip_blocks(input), input);
    }

    #[test]
    fn test_repairs_only_apply_with_marker() {
        let vault = "resource \"azurerm_key_vault\" \"kv\" {\n  soft_delete_retention_days = \"0\"\n}";
        assert!(apply_repairs(vault).contains("soft_delete_retention_days = 7"));

        let unrelated = "resource \"azurerm_thing\" \"x\" {\n  soft_delete_retention_days = 0\n}";
        assert_eq!(apply_repairs(unrelated), unrelated);
    }

    #[test]
    fn test_repairs_delete_deprecated_lines() {
        let storage = "resource \"azurerm_storage_account\" \"sa\" {\n  name = \"sa\"\n  allow_blob_public_access = false\n  enable_https_traffic_only = true\n}";
        assert_eq!(
            apply_repairs(storage),
            "resource \"azurerm_storage_account\" \"sa\" {\n  name = \"sa\"\n}"
        );

        let vm = "resource \"azurerm_linux_virtual_machine\" \"vm\" {\n  platform_fault_domain = -1\n  size = \"B1s\"\n}";
        assert!(!apply_repairs(vm).contains("platform_fault_domain"));

        let disk = "resource \"azurerm_managed_disk\" \"d\" {\n  disk_size_gb = 0\n}";
        assert!(apply_repairs(disk).contains("disk_size_gb = 30"));
    }

    #[test]
    fn test_derive_kind() {
        assert_eq!(
            derive_kind("resource \"azurerm_key_vault\" \"kv\" {}\nresource \"azurerm_subnet\" \"s\" {}"),
            "key_vault"
        );
        assert_eq!(derive_kind("  resource \"google_bucket\" \"b\" {}"), "bucket");
        assert_eq!(derive_kind("resource \"random_id\" \"r\" {}"), "random_id");
        assert_eq!(derive_kind("locals {}"), "main");
        // Mentions inside values are not declarations
        assert_eq!(derive_kind("x = \"resource\""), "main");
    }

    #[test]
    fn test_normalize_groups_and_drops_empty_files() {
        let fs = Arc::new(MockFileSystem::new());
        let out = PathBuf::from("/ws/terraform");
        fs.write(&out.join("a.tf"), "resource \"azurerm_key_vault\" \"a\" {\n  name = \"a\"\n}\n")
            .unwrap();
        fs.write(&out.join("b.tf"), "resource \"azurerm_key_vault\" \"b\" {\n  name = \"b\"\n}\n")
            .unwrap();
        fs.write(&out.join("c.tf"), "provider \"azurerm\" {\n  features {}\n}\n").unwrap();
        fs.write(&out.join("d.tf"), "   \n\n").unwrap();
        fs.write(&out.join("e.tf"), "locals {\n  x = 1\n}\n").unwrap();
        fs.write(&out.join("terraform.tfstate"), "{}").unwrap();
        fs.write(&out.join(".terraform/providers/p.tf"), "resource \"azurerm_x\" \"y\" {}")
            .unwrap();

        let normalizer = OutputNormalizer::new(fs.clone()).unwrap();
        let summary = normalizer.normalize(&out, &target()).unwrap();

        assert_eq!(summary.files_processed, 5);
        assert_eq!(summary.files_dropped, 2);
        assert_eq!(
            summary.kinds,
            vec![("key_vault".to_string(), 2), ("main".to_string(), 1)]
        );

        let merged = fs.get_file_contents(&out.join("key_vault.tf")).unwrap();
        assert_eq!(
            merged,
            "resource \"azurerm_key_vault\" \"a\" {\n  name = \"a\"\n}\n\nresource \"azurerm_key_vault\" \"b\" {\n  name = \"b\"\n}\n"
        );
        let main = fs.get_file_contents(&out.join("main.tf")).unwrap();
        assert!(main.contains("data \"azurerm_resource_group\" \"main\""));
        assert!(main.contains("locals {"));

        for gone in ["a.tf", "b.tf", "c.tf", "d.tf", "e.tf"] {
            assert!(!fs.has_file(&out.join(gone)), "{} should be removed", gone);
        }
        assert!(!fs.has_file(&out.join(".terraform/providers/p.tf")));
        assert!(fs.has_file(&out.join("terraform.tfstate")));
    }

    #[test]
    fn test_normalize_always_writes_scaffold() {
        let fs = Arc::new(MockFileSystem::new());
        let out = PathBuf::from("/ws/terraform");
        fs.create_dir_all(&out).unwrap();

        let normalizer = OutputNormalizer::new(fs.clone()).unwrap();
        let summary = normalizer.normalize(&out, &target()).unwrap();

        assert_eq!(summary, NormalizationSummary::default());
        assert_eq!(
            fs.list_files(),
            vec![
                out.join("main.tf"),
                out.join("outputs.tf"),
                out.join("provider.tf"),
                out.join("variables.tf"),
            ]
        );
        let variables = fs.get_file_contents(&out.join("variables.tf")).unwrap();
        assert!(variables.contains("\"rg-1\""));
    }

    #[test]
    fn test_normalize_real_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("terraform");
        std::fs::create_dir_all(out.join("nested/deeper")).unwrap();
        std::fs::create_dir_all(out.join("reports")).unwrap();
        std::fs::write(out.join("nested/deeper/kv.tf"), "   \n").unwrap();
        std::fs::write(out.join("reports/x.tf"), "locals {}\n").unwrap();
        std::fs::write(out.join("reports/import.json"), "{}").unwrap();
        std::fs::create_dir_all(out.join(".terraform")).unwrap();
        std::fs::write(out.join("nested/sa.tf"), "resource \"azurerm_storage_account\" \"sa\" {}\n")
            .unwrap();

        let normalizer = OutputNormalizer::new(Arc::new(crate::traits::RealFileSystem)).unwrap();
        normalizer.normalize(&out, &target()).unwrap();

        assert!(out.join("storage_account.tf").is_file());
        assert!(out.join("provider.tf").is_file());
        assert!(!out.join("nested").exists());
        // Directories still holding exporter artifacts stay
        assert!(out.join("reports/import.json").is_file());
        assert!(!out.join("reports/x.tf").exists());
        assert!(!out.join(".terraform").exists());
    }
}
