//! Documentation chunking: raw HTML or markdown into bounded units.
//!
//! Source pages are reduced to text, segmented into units (headings,
//! paragraphs, code blocks, table rows) and packed into chunks under a
//! character budget. A unit is never split mid-item; a single oversized
//! unit becomes its own chunk.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Heading,
    Paragraph,
    Code,
    Table,
    Mixed,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Paragraph => "paragraph",
            Self::Code => "code",
            Self::Table => "table",
            Self::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone)]
struct DocUnit {
    text: String,
    unit_type: ChunkType,
}

/// A packed chunk ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub content: String,
    pub chunk_type: ChunkType,
}

static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("regex"));
static RE_HEADING_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<h[1-6][^>]*>").expect("regex"));
static RE_HEADING_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</h[1-6]>").expect("regex"));
static RE_PRE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<pre[^>]*>").expect("regex"));
static RE_PRE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</pre>").expect("regex"));
static RE_ROW_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<tr[^>]*>").expect("regex"));
static RE_CELL_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</t[dh]>").expect("regex"));
static RE_LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li[^>]*>").expect("regex"));
static RE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(p|div|br|table|ul|ol|section|article)[^>]*/?>").expect("regex"));
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("regex"));
static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("regex"));

fn looks_like_html(content: &str) -> bool {
    let head: String = content.chars().take(512).collect();
    head.contains("<html") || head.contains("<!DOCTYPE") || head.contains("<body")
        || RE_TAG.is_match(&head)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Flatten HTML into markdown-ish text the segmenter understands
fn html_to_text(content: &str) -> String {
    let text = RE_SCRIPT.replace_all(content, "");
    let text = RE_HEADING_OPEN.replace_all(&text, "\n\n# ");
    let text = RE_HEADING_CLOSE.replace_all(&text, "\n\n");
    let text = RE_PRE_OPEN.replace_all(&text, "\n\n```\n");
    let text = RE_PRE_CLOSE.replace_all(&text, "\n```\n\n");
    let text = RE_ROW_OPEN.replace_all(&text, "\n| ");
    let text = RE_CELL_CLOSE.replace_all(&text, " | ");
    let text = RE_LIST_ITEM.replace_all(&text, "\n- ");
    let text = RE_BLOCK.replace_all(&text, "\n\n");
    let text = RE_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    RE_BLANK_RUNS.replace_all(&text, "\n\n").trim().to_string()
}

fn segment_units(text: &str) -> Vec<DocUnit> {
    let mut units = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut table: Vec<&str> = Vec::new();
    let mut code: Vec<&str> = Vec::new();
    let mut in_code = false;

    let flush_paragraph = |buf: &mut Vec<&str>, units: &mut Vec<DocUnit>| {
        if !buf.is_empty() {
            let text = buf.join(" ").trim().to_string();
            if !text.is_empty() {
                units.push(DocUnit { text, unit_type: ChunkType::Paragraph });
            }
            buf.clear();
        }
    };
    let flush_table = |buf: &mut Vec<&str>, units: &mut Vec<DocUnit>| {
        if !buf.is_empty() {
            units.push(DocUnit { text: buf.join("\n"), unit_type: ChunkType::Table });
            buf.clear();
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();

        if in_code {
            if trimmed.starts_with("```") {
                in_code = false;
                let body = code.join("\n").trim().to_string();
                if !body.is_empty() {
                    units.push(DocUnit {
                        text: format!("```\n{}\n```", body),
                        unit_type: ChunkType::Code,
                    });
                }
                code.clear();
            } else {
                code.push(line);
            }
            continue;
        }

        if trimmed.starts_with("```") {
            flush_paragraph(&mut paragraph, &mut units);
            flush_table(&mut table, &mut units);
            in_code = true;
        } else if trimmed.starts_with('#') {
            flush_paragraph(&mut paragraph, &mut units);
            flush_table(&mut table, &mut units);
            units.push(DocUnit {
                text: trimmed.trim_start_matches('#').trim().to_string(),
                unit_type: ChunkType::Heading,
            });
        } else if trimmed.starts_with('|') {
            flush_paragraph(&mut paragraph, &mut units);
            table.push(trimmed);
        } else if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut units);
            flush_table(&mut table, &mut units);
        } else {
            flush_table(&mut table, &mut units);
            paragraph.push(trimmed);
        }
    }

    // Unterminated code fences degrade to a paragraph
    if in_code {
        paragraph.extend(code.iter());
    }
    flush_paragraph(&mut paragraph, &mut units);
    flush_table(&mut table, &mut units);

    units.retain(|u| !u.text.is_empty());
    units
}

/// Pack units greedily under the budget. Headings prefer to start a new
/// chunk so a section travels with its title.
fn pack_units(units: Vec<DocUnit>, budget: usize) -> Vec<ChunkDraft> {
    let mut chunks = Vec::new();
    let mut current: Vec<DocUnit> = Vec::new();
    let mut current_len = 0usize;

    let flush = |current: &mut Vec<DocUnit>, chunks: &mut Vec<ChunkDraft>| {
        if current.is_empty() {
            return;
        }
        let chunk_type = if current.iter().all(|u| u.unit_type == current[0].unit_type) {
            current[0].unit_type
        } else {
            ChunkType::Mixed
        };
        let content = current
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        chunks.push(ChunkDraft { content, chunk_type });
        current.clear();
    };

    for unit in units {
        let unit_len = unit.text.len();
        let starts_section = unit.unit_type == ChunkType::Heading && current_len > budget / 2;
        if !current.is_empty() && (current_len + unit_len + 2 > budget || starts_section) {
            flush(&mut current, &mut chunks);
            current_len = 0;
        }
        current_len += unit_len + 2;
        current.push(unit);
    }
    flush(&mut current, &mut chunks);

    chunks
}

/// Chunk one source document under the given character budget
pub fn chunk_document(content: &str, budget: usize) -> Vec<ChunkDraft> {
    let text = if looks_like_html(content) {
        html_to_text(content)
    } else {
        content.trim().to_string()
    };
    pack_units(segment_units(&text), budget)
}
