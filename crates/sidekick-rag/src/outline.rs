//! Directory Outline Ranker (SPEC_FULL.md §4.G).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const MIN_CHUNK_PATHS: usize = 1;
const MAX_CHUNK_PATHS: usize = 40;
const MERGE_PREFIX_OVERLAP: f64 = 0.8;
const DIRECTORY_BUDGET_SHARE: f64 = 0.10;
const TRUNCATION_MIN_REMAINING: usize = 10;

/// One file's tree-sitter outline text, keyed by its path.
#[derive(Debug, Clone)]
pub struct FileSignature {
    pub path: PathBuf,
    pub outline: String,
}

/// Produces per-file outline text. Swapped out in tests for a stub; in
/// production this wraps the external tree-sitter outline service.
pub trait OutlineService {
    fn outline(&self, path: &Path, source: &str) -> Option<String>;
}

/// A breadth-first chunk of adjacent repo paths, used to give the model a
/// sense of directory shape even for files with no outline entry.
#[derive(Debug, Clone)]
pub struct DirectoryChunk {
    pub paths: Vec<PathBuf>,
}

/// Walks `entries` (assumed already sorted in a breadth-first, path order)
/// into chunks of `1..=40` paths, splitting on parent-directory changes or
/// depth jumps greater than one, then merges adjacent small chunks sharing
/// an 80%-or-greater common path-component prefix.
pub fn chunk_directory(entries: &[PathBuf]) -> Vec<DirectoryChunk> {
    let mut chunks: Vec<Vec<PathBuf>> = Vec::new();
    let mut current: Vec<PathBuf> = Vec::new();
    let mut prev_depth: Option<usize> = None;
    let mut prev_parent: Option<PathBuf> = None;

    for path in entries {
        let depth = path.components().count();
        let parent = path.parent().map(|p| p.to_path_buf());
        let starts_new = match (&prev_parent, prev_depth) {
            (Some(p), Some(d)) => parent.as_ref() != Some(p) || depth.abs_diff(d) > 1,
            _ => false,
        };
        if (starts_new || current.len() >= MAX_CHUNK_PATHS) && current.len() >= MIN_CHUNK_PATHS {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(path.clone());
        prev_depth = Some(depth);
        prev_parent = parent;
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    merge_small_adjacent(chunks).into_iter().map(|paths| DirectoryChunk { paths }).collect()
}

fn common_prefix_ratio(a: &Path, b: &Path) -> f64 {
    let a_parts: Vec<_> = a.components().collect();
    let b_parts: Vec<_> = b.components().collect();
    let max_len = a_parts.len().max(b_parts.len()).max(1);
    let common = a_parts.iter().zip(b_parts.iter()).take_while(|(x, y)| x == y).count();
    common as f64 / max_len as f64
}

fn merge_small_adjacent(chunks: Vec<Vec<PathBuf>>) -> Vec<Vec<PathBuf>> {
    let mut merged: Vec<Vec<PathBuf>> = Vec::new();
    for chunk in chunks {
        if let Some(last) = merged.last_mut() {
            if last.len() + chunk.len() <= MAX_CHUNK_PATHS {
                if let (Some(a), Some(b)) = (last.last(), chunk.first()) {
                    if common_prefix_ratio(a, b) >= MERGE_PREFIX_OVERLAP {
                        last.extend(chunk);
                        continue;
                    }
                }
            }
        }
        merged.push(chunk);
    }
    merged
}

/// Compresses a set of paths that share long common prefixes into a
/// human-readable summary line, e.g. `src/{a.rs, b.rs, c/d.rs}`.
pub(crate) fn compress_common_prefix(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

/// Assembles the final outline text within `budget_chars`.
///
/// `ranked_signatures` must already be in descending relevance order; see
/// [`crate::orchestrate::rank_outline_signatures`] for the embedding + ANN
/// search + RRF fusion pass that produces this ordering.
pub fn assemble(
    ranked_signatures: &[FileSignature],
    directory_chunks: &[DirectoryChunk],
    budget_chars: usize,
) -> String {
    let dir_budget = ((budget_chars as f64) * DIRECTORY_BUDGET_SHARE) as usize;
    let mut out = String::new();
    let mut show_paths: BTreeSet<PathBuf> = BTreeSet::new();

    let mut dir_section = String::new();
    for chunk in directory_chunks {
        let line = compress_common_prefix(&chunk.paths);
        if dir_section.chars().count() + line.chars().count() > dir_budget {
            break;
        }
        dir_section.push_str(&line);
        dir_section.push('\n');
    }
    out.push_str(&dir_section);

    let mut remaining = budget_chars.saturating_sub(out.chars().count());
    for sig in ranked_signatures {
        if remaining == 0 {
            break;
        }
        let mut entry = format!("## {}\n{}\n", sig.path.display(), sig.outline);
        if entry.chars().count() > remaining {
            let keep = remaining.saturating_sub(0);
            if keep < TRUNCATION_MIN_REMAINING {
                break;
            }
            let marker = format!("\n[... truncated {} characters]", entry.chars().count() - keep);
            let head: String = entry.chars().take(keep.saturating_sub(marker.chars().count())).collect();
            entry = format!("{head}{marker}");
        }
        remaining = remaining.saturating_sub(entry.chars().count());
        if let Some(parent) = sig.path.parent() {
            show_paths.insert(parent.to_path_buf());
        }
        show_paths.insert(sig.path.clone());
        out.push_str(&entry);
    }

    if out.chars().count() > budget_chars {
        let keep = budget_chars.saturating_sub(3);
        let head: String = out.chars().take(keep).collect();
        out = format!("{head}...");
    }
    out
}
