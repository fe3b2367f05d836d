//! Markdown chunking.
//!
//! Files split on level-2 headings; content before the first heading
//! becomes a preamble chunk labeled with the level-1 title (or a
//! synthetic label). Oversized chunks are subdivided on blank-line
//! boundaries so a paragraph is never cut mid-way.

/// Chunks longer than this are subdivided.
pub const MAX_CHUNK_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub heading: String,
    pub content: String,
}

/// Split a markdown document into chunks.
pub fn chunk_markdown(content: &str) -> Vec<Chunk> {
    let mut title: Option<String> = None;
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("## ") {
            sections.push((rest.trim().to_string(), Vec::new()));
        } else if let Some(section) = sections.last_mut() {
            section.1.push(line);
        } else if let Some(rest) = line.strip_prefix("# ") {
            if title.is_none() {
                title = Some(rest.trim().to_string());
            }
            // The title line itself is not chunk content.
        } else {
            preamble.push(line);
        }
    }

    let mut chunks = Vec::new();

    let preamble_text = preamble.join("\n").trim().to_string();
    if !preamble_text.is_empty() {
        let heading = title.unwrap_or_else(|| "Introduction".to_string());
        push_subdivided(&mut chunks, heading, preamble_text);
    }

    for (heading, lines) in sections {
        let text = lines.join("\n").trim().to_string();
        if text.is_empty() {
            continue;
        }
        push_subdivided(&mut chunks, heading, text);
    }

    chunks
}

fn push_subdivided(chunks: &mut Vec<Chunk>, heading: String, text: String) {
    if text.len() <= MAX_CHUNK_CHARS {
        chunks.push(Chunk {
            heading,
            content: text,
        });
        return;
    }

    let mut current = String::new();
    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim_end();
        if paragraph.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + 2 + paragraph.len() > MAX_CHUNK_CHARS {
            chunks.push(Chunk {
                heading: heading.clone(),
                content: std::mem::take(&mut current),
            });
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(Chunk {
            heading,
            content: current,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_level_two_headings() {
        let md = "# Notes\n\nintro text\n\n## Projects\n\nbuilding a runtime\n\n## People\n\nwt likes rust\n";
        let chunks = chunk_markdown(md);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading, "Notes");
        assert_eq!(chunks[0].content, "intro text");
        assert_eq!(chunks[1].heading, "Projects");
        assert_eq!(chunks[2].heading, "People");
        assert_eq!(chunks[2].content, "wt likes rust");
    }

    #[test]
    fn preamble_without_title_gets_synthetic_label() {
        let chunks = chunk_markdown("just some text\n\n## Later\n\nmore\n");
        assert_eq!(chunks[0].heading, "Introduction");
        assert_eq!(chunks[0].content, "just some text");
    }

    #[test]
    fn no_headings_yields_single_chunk() {
        let chunks = chunk_markdown("only a paragraph");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "only a paragraph");
    }

    #[test]
    fn empty_sections_are_dropped() {
        let chunks = chunk_markdown("## A\n\n## B\n\ncontent\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, "B");
    }

    #[test]
    fn long_sections_subdivide_on_blank_lines() {
        let paragraph = "x".repeat(900);
        let md = format!("## Big\n\n{paragraph}\n\n{paragraph}\n\n{paragraph}\n");
        let chunks = chunk_markdown(&md);
        assert!(chunks.len() >= 2, "expected subdivision, got {}", chunks.len());
        assert!(chunks.iter().all(|c| c.heading == "Big"));
        assert!(chunks.iter().all(|c| c.content.len() <= MAX_CHUNK_CHARS));
    }

    #[test]
    fn single_oversized_paragraph_stays_whole() {
        let paragraph = "y".repeat(MAX_CHUNK_CHARS + 500);
        let chunks = chunk_markdown(&format!("## Wall\n\n{paragraph}\n"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.len(), MAX_CHUNK_CHARS + 500);
    }
}
