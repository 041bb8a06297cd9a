//! Diff Summarizer (SPEC_FULL.md §4.H).

use std::collections::BTreeMap;

use regex::Regex;

const SYMBOL_HEADER: &str = "=== Symbol Changes ===";

/// One file's worth of a unified diff, split at `diff --git` boundaries.
#[derive(Debug, Clone)]
struct FileDiff {
    path: String,
    header: String,
    hunks: Vec<String>,
    lines_added: usize,
    lines_removed: usize,
    is_binary: bool,
}

/// A chunk of diff text ready for embedding/ranking, carrying enough of the
/// original diff header to stay self-describing in isolation.
#[derive(Debug, Clone)]
pub struct DiffChunk {
    pub file_path: String,
    pub content: String,
    pub chunk_index: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Extracts a symbol-level summary for one file's hunks. Supported
/// languages get `+added`/`-removed`/`~changed` symbol lines; everything
/// else falls back to hunk headers with per-hunk +/- counts.
pub fn symbol_summary(file: &FileDiff) -> String {
    if file.is_binary {
        return "(binary file)".to_string();
    }
    let fallback: String = file
        .hunks
        .iter()
        .map(|hunk| {
            let header = hunk.lines().next().unwrap_or_default();
            let (added, removed) = count_hunk_lines(hunk);
            format!("{header}\n(+{added}/-{removed})")
        })
        .collect::<Vec<_>>()
        .join("\n");
    if fallback.is_empty() {
        format!("(+{}/-{} lines)", file.lines_added, file.lines_removed)
    } else {
        fallback
    }
}

fn count_hunk_lines(hunk: &str) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    for line in hunk.lines().skip(1) {
        if line.starts_with('+') && !line.starts_with("+++") {
            added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            removed += 1;
        }
    }
    (added, removed)
}

/// Splits a unified diff into per-file records.
fn parse_diff(diff: &str) -> Vec<FileDiff> {
    let file_re = Regex::new(r"(?m)^diff --git a/(.+?) b/(.+)$").expect("valid regex");
    let mut files = Vec::new();

    let starts: Vec<usize> = file_re.find_iter(diff).map(|m| m.start()).collect();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(diff.len());
        let block = &diff[start..end];
        let caps = file_re.captures(block).unwrap();
        let path = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();

        let header_end = block.find("\n@@").unwrap_or(block.len());
        let header = block[..header_end].to_string();
        let is_binary = block.contains("Binary files");

        let hunks = split_hunks(&block[header_end.min(block.len())..]);
        let (added, removed) = hunks.iter().fold((0, 0), |(a, r), h| {
            let (ha, hr) = count_hunk_lines(h);
            (a + ha, r + hr)
        });

        files.push(FileDiff { path, header, hunks, lines_added: added, lines_removed: removed, is_binary });
    }
    files
}

fn split_hunks(text: &str) -> Vec<String> {
    let hunk_re = Regex::new(r"(?m)^@@").expect("valid regex");
    let starts: Vec<usize> = hunk_re.find_iter(text).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let e = starts.get(i + 1).copied().unwrap_or(text.len());
            text[s..e].to_string()
        })
        .collect()
}

/// Splits one file's diff into embeddable chunks. Files small enough to fit
/// `target_chunk_chars` emit a single chunk; larger files split hunk by
/// hunk, each chunk carrying the file header.
fn chunk_file(file: &FileDiff, budget_chars: usize) -> Vec<DiffChunk> {
    let target = (budget_chars / 4).min(4000).max(500);
    let raw: String = format!("{}\n{}", file.header, file.hunks.join("\n"));

    if raw.chars().count() <= target {
        return vec![DiffChunk {
            file_path: file.path.clone(),
            content: raw,
            chunk_index: 0,
            lines_added: file.lines_added,
            lines_removed: file.lines_removed,
        }];
    }

    file.hunks
        .iter()
        .enumerate()
        .map(|(i, hunk)| {
            let (added, removed) = count_hunk_lines(hunk);
            DiffChunk {
                file_path: file.path.clone(),
                content: format!("{}\n{}", file.header, hunk),
                chunk_index: i,
                lines_added: added,
                lines_removed: removed,
            }
        })
        .collect()
}

/// Splits review feedback text to fit `max_chars` per chunk, preferring
/// sentence boundaries and falling back to word boundaries.
pub fn chunk_feedback(feedback: &str, max_chars: usize) -> Vec<String> {
    if feedback.chars().count() <= max_chars {
        return vec![feedback.to_string()];
    }
    let sentences: Vec<&str> = feedback.split_inclusive(['.', '!', '?']).collect();
    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in sentences {
        if current.chars().count() + sentence.chars().count() > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if sentence.chars().count() > max_chars {
            for word in sentence.split_whitespace() {
                if current.chars().count() + word.chars().count() + 1 > max_chars && !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
        } else {
            current.push_str(sentence);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Assembles the final summary text from already-ranked chunk ids; see
/// [`crate::orchestrate::rank_diff_chunks`] for the embed + ANN + RRF pass
/// that produces `ranked_chunk_ids`.
pub fn summarize(diff: &str, budget_chars: usize, ranked_chunk_ids: &[String], all_chunks: &[DiffChunk]) -> String {
    if diff.chars().count() <= budget_chars {
        return diff.to_string();
    }

    let files = parse_diff(diff);
    let mut out = String::new();
    out.push_str(SYMBOL_HEADER);
    out.push('\n');
    for file in &files {
        out.push_str(&format!("{}:\n{}\n", file.path, symbol_summary(file)));
    }

    let chunk_by_composite: BTreeMap<String, &DiffChunk> = all_chunks
        .iter()
        .map(|c| (format!("{}#{}", c.file_path, c.chunk_index), c))
        .collect();

    let mut omitted: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut remaining = budget_chars.saturating_sub(out.chars().count());

    for id in ranked_chunk_ids {
        let Some(chunk) = chunk_by_composite.get(id) else { continue };
        if chunk.content.chars().count() <= remaining {
            out.push_str(&chunk.content);
            out.push('\n');
            remaining -= chunk.content.chars().count();
        } else {
            let entry = omitted.entry(chunk.file_path.clone()).or_insert((0, 0));
            entry.0 += chunk.lines_added;
            entry.1 += chunk.lines_removed;
        }
    }
    for chunk in all_chunks {
        let id = format!("{}#{}", chunk.file_path, chunk.chunk_index);
        if !ranked_chunk_ids.contains(&id) {
            let entry = omitted.entry(chunk.file_path.clone()).or_insert((0, 0));
            entry.0 += chunk.lines_added;
            entry.1 += chunk.lines_removed;
        }
    }

    if !omitted.is_empty() {
        let parts: Vec<String> =
            omitted.iter().map(|(path, (a, r))| format!("{path} (+{a}/-{r})")).collect();
        let note = format!("[Truncated: {} not shown from: {}]", "lines", parts.join(", "));
        if out.chars().count() + note.chars().count() <= budget_chars {
            out.push_str(&note);
        }
    }

    if out.chars().count() > budget_chars {
        let keep = budget_chars.saturating_sub(3);
        let head: String = out.chars().take(keep).collect();
        out = format!("{head}...");
    }
    out
}

/// Chunks every file in a diff, for the caller to embed and rank before
/// calling [`summarize`].
pub fn chunk_diff(diff: &str, budget_chars: usize) -> Vec<DiffChunk> {
    parse_diff(diff).iter().flat_map(|f| chunk_file(f, budget_chars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DIFF: &str = "diff --git a/src/lib.rs b/src/lib.rs\n--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,2 +1,3 @@\n fn a() {}\n+fn b() {}\n-fn old() {}\n";

    #[test]
    fn short_diff_passes_through_unchanged() {
        let out = summarize(SAMPLE_DIFF, 10_000, &[], &[]);
        assert_eq!(out, SAMPLE_DIFF);
    }

    #[test]
    fn long_diff_always_carries_symbol_header() {
        let long_diff = SAMPLE_DIFF.repeat(200);
        let chunks = chunk_diff(&long_diff, 100);
        let ids: Vec<String> = chunks.iter().map(|c| format!("{}#{}", c.file_path, c.chunk_index)).collect();
        let out = summarize(&long_diff, 100, &ids, &chunks);
        assert!(out.contains(SYMBOL_HEADER));
        assert!(out.chars().count() <= 100);
    }

    #[test]
    fn chunk_diff_preserves_file_header_per_hunk() {
        let chunks = chunk_diff(SAMPLE_DIFF, 10);
        assert!(chunks[0].content.contains("diff --git"));
    }

    #[test]
    fn feedback_chunking_respects_sentence_boundaries() {
        let feedback = "First sentence. Second sentence. Third one here.";
        let chunks = chunk_feedback(feedback, 20);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20 || !c.contains(' ')));
    }
}
