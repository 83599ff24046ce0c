//! Markdown → block compiler.
//!
//! Supports the dialect pages are written in: `#`–`###` headings, fenced
//! code, GFM pipe tables, `---` dividers, `> [!NOTE]` callouts, `*`/`-` and
//! `N.` list items, standalone images and paragraphs. Inline markup is
//! `**bold**`, `*italic*`, `` `code` `` and `[text](url)`. Anything malformed
//! stays literal text; compilation never fails.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Block, Span};

static ORDERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\s+(.*)$").expect("valid ordered item regex"));
static IMAGE_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!\[([^\]]*)\]\(([^)\s]+)\)$").expect("valid image regex")
});

const CALLOUT_MARKER: &str = "[!NOTE]";

pub fn compile(markdown: &str) -> Vec<Block> {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            i += 1;
            continue;
        }

        if let Some(info) = trimmed.strip_prefix("```") {
            flush_paragraph(&mut paragraph, &mut blocks);
            let language = info.trim().to_string();
            let mut body = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("```") {
                body.push(lines[i]);
                i += 1;
            }
            // skip the closing fence; an unterminated fence ends the document
            i += 1;
            blocks.push(Block::Code {
                language,
                text: body.join("\n"),
            });
            continue;
        }

        if let Some((level, text)) = parse_heading(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::Heading {
                level,
                spans: inline(text),
            });
            i += 1;
            continue;
        }

        if trimmed == "---" {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::Divider);
            i += 1;
            continue;
        }

        if is_table_header(line, lines.get(i + 1).copied()) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let (table, next) = collect_table(&lines, i);
            blocks.push(table);
            i = next;
            continue;
        }

        if trimmed.starts_with('>') {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut quoted = Vec::new();
            while i < lines.len() && lines[i].trim_start().starts_with('>') {
                let rest = lines[i].trim_start()[1..].trim();
                quoted.push(rest);
                i += 1;
            }
            blocks.push(quote_block(&quoted));
            continue;
        }

        if let Some(item) = parse_bullet(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::BulletedItem {
                spans: inline(item),
            });
            i += 1;
            continue;
        }

        if let Some(caps) = ORDERED_ITEM.captures(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let item = caps.get(1).map_or("", |m| m.as_str());
            blocks.push(Block::NumberedItem {
                spans: inline(item),
            });
            i += 1;
            continue;
        }

        paragraph.push(trimmed);
        i += 1;
    }

    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if paragraph.is_empty() {
        return;
    }
    let text = paragraph.join(" ");
    paragraph.clear();
    if let Some(caps) = IMAGE_ONLY.captures(&text) {
        let alt = caps.get(1).map_or("", |m| m.as_str());
        let url = caps.get(2).map_or("", |m| m.as_str());
        blocks.push(Block::Image {
            url: url.to_string(),
            caption: (!alt.is_empty()).then(|| alt.to_string()),
        });
        return;
    }
    blocks.push(Block::Paragraph {
        spans: inline(&text),
    });
}

fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((hashes.min(3) as u8, rest.trim()))
}

fn parse_bullet(line: &str) -> Option<&str> {
    line.strip_prefix("* ")
        .or_else(|| line.strip_prefix("- "))
        .map(str::trim)
}

fn quote_block(quoted: &[&str]) -> Block {
    if quoted.first() == Some(&CALLOUT_MARKER) {
        let body: Vec<&str> = quoted[1..]
            .iter()
            .copied()
            .filter(|l| !l.is_empty())
            .collect();
        return Block::Callout {
            spans: inline(&body.join("\n")),
        };
    }
    let body: Vec<&str> = quoted.iter().copied().filter(|l| !l.is_empty()).collect();
    Block::Paragraph {
        spans: inline(&body.join(" ")),
    }
}

fn parse_table_cells(line: &str) -> Option<Vec<&str>> {
    let trimmed = line.trim();
    if trimmed.len() < 2 || !trimmed.starts_with('|') || !trimmed.ends_with('|') {
        return None;
    }
    let cells: Vec<&str> = trimmed[1..trimmed.len() - 1]
        .split('|')
        .map(str::trim)
        .collect();
    Some(cells)
}

fn is_table_separator(line: &str) -> bool {
    let Some(cells) = parse_table_cells(line) else {
        return false;
    };
    cells
        .iter()
        .all(|cell| !cell.is_empty() && cell.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
}

fn is_table_header(line: &str, next: Option<&str>) -> bool {
    parse_table_cells(line).is_some() && next.is_some_and(is_table_separator)
}

fn collect_table(lines: &[&str], start: usize) -> (Block, usize) {
    let mut rows: Vec<Vec<Vec<Span>>> = Vec::new();
    if let Some(header) = parse_table_cells(lines[start]) {
        rows.push(header.into_iter().map(inline).collect());
    }
    // the separator row carries no content
    let mut i = start + 2;
    while i < lines.len() {
        let Some(cells) = parse_table_cells(lines[i]) else {
            break;
        };
        rows.push(cells.into_iter().map(inline).collect());
        i += 1;
    }
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(width, Vec::new());
    }
    (Block::Table { rows }, i)
}

#[derive(Debug, Clone, Copy, Default)]
struct Style {
    bold: bool,
    italic: bool,
}

/// Inline pass: raw text → spans.
pub fn inline(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    tokenize(text, Style::default(), true, &mut spans);
    merge_text(spans)
}

fn tokenize(input: &str, style: Style, links: bool, out: &mut Vec<Span>) {
    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut literal_start = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'`' => {
                if let Some(len) = input[pos + 1..].find('`').filter(|&len| len > 0) {
                    push_literal(&input[literal_start..pos], style, out);
                    out.push(Span::Text {
                        content: input[pos + 1..pos + 1 + len].to_string(),
                        bold: style.bold,
                        italic: style.italic,
                        code: true,
                    });
                    pos += len + 2;
                    literal_start = pos;
                    continue;
                }
            }
            b'*' if bytes.get(pos + 1) == Some(&b'*') => {
                if let Some(end) = opens_emphasis(bytes, pos + 2)
                    .then(|| find_closing_double_star(input, pos + 2))
                    .flatten()
                    .filter(|&e| e > pos + 2)
                {
                    push_literal(&input[literal_start..pos], style, out);
                    let inner = Style {
                        bold: true,
                        ..style
                    };
                    tokenize(&input[pos + 2..end], inner, false, out);
                    pos = end + 2;
                    literal_start = pos;
                    continue;
                }
                pos += 2;
                continue;
            }
            b'*' => {
                if let Some(end) = opens_emphasis(bytes, pos + 1)
                    .then(|| find_closing_star(input, pos + 1))
                    .flatten()
                    .filter(|&e| e > pos + 1)
                {
                    push_literal(&input[literal_start..pos], style, out);
                    let inner = Style {
                        italic: true,
                        ..style
                    };
                    tokenize(&input[pos + 1..end], inner, false, out);
                    pos = end + 1;
                    literal_start = pos;
                    continue;
                }
            }
            b'!' if links && bytes.get(pos + 1) == Some(&b'[') => {
                // inline images have no span form; they become a link to the image
                if let Some((alt, url, consumed)) = parse_link(input, pos + 1) {
                    push_literal(&input[literal_start..pos], style, out);
                    let content = if alt.is_empty() { url } else { alt };
                    out.push(Span::Link {
                        content: content.to_string(),
                        url: url.to_string(),
                    });
                    pos += 1 + consumed;
                    literal_start = pos;
                    continue;
                }
            }
            b'[' if links => {
                if let Some((text, url, consumed)) = parse_link(input, pos) {
                    push_literal(&input[literal_start..pos], style, out);
                    let content = if text.is_empty() { url } else { text };
                    out.push(Span::Link {
                        content: content.to_string(),
                        url: url.to_string(),
                    });
                    pos += consumed;
                    literal_start = pos;
                    continue;
                }
            }
            _ => {}
        }
        pos += 1;
    }
    push_literal(&input[literal_start..], style, out);
}

fn push_literal(text: &str, style: Style, out: &mut Vec<Span>) {
    if text.is_empty() {
        return;
    }
    out.push(Span::Text {
        content: text.to_string(),
        bold: style.bold,
        italic: style.italic,
        code: false,
    });
}

fn skip_code(input: &str, i: usize) -> Option<usize> {
    input[i + 1..].find('`').map(|end| i + 1 + end + 1)
}

fn find_closing_double_star(input: &str, start: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut i = start;
    while i + 1 < bytes.len() {
        if bytes[i] == b'`' {
            if let Some(next) = skip_code(input, i) {
                i = next;
                continue;
            }
        }
        if bytes[i] == b'*' && bytes[i + 1] == b'*' && closes_emphasis(bytes, i) {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_closing_star(input: &str, start: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'`' => {
                if let Some(next) = skip_code(input, i) {
                    i = next;
                    continue;
                }
            }
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                continue;
            }
            b'*' if closes_emphasis(bytes, i) => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// A marker opens emphasis only when text follows it directly.
fn opens_emphasis(bytes: &[u8], after: usize) -> bool {
    bytes.get(after).is_some_and(|b| !b.is_ascii_whitespace())
}

/// A marker closes emphasis only when text precedes it directly.
fn closes_emphasis(bytes: &[u8], at: usize) -> bool {
    at > 0 && !bytes[at - 1].is_ascii_whitespace()
}

fn parse_link(input: &str, pos: usize) -> Option<(&str, &str, usize)> {
    let rest = &input[pos..];
    let bracket_end = rest.find(']')?;
    let text = &rest[1..bracket_end];
    let after = &rest[bracket_end + 1..];
    if !after.starts_with('(') {
        return None;
    }
    let paren_end = after.find(')')?;
    let url = after[1..paren_end].trim();
    if url.is_empty() || url.contains(char::is_whitespace) {
        return None;
    }
    Some((text, url, bracket_end + 1 + paren_end + 1))
}

/// Adjacent text runs with identical styling collapse into one, as do
/// adjacent links to the same URL. Notion stores both the same way.
pub(crate) fn merge_text(spans: Vec<Span>) -> Vec<Span> {
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        if let (
            Some(Span::Link {
                content: prev,
                url: prev_url,
            }),
            Span::Link { content, url },
        ) = (out.last_mut(), &span)
        {
            if *prev_url == *url {
                prev.push_str(content);
                continue;
            }
        }
        if let (
            Some(Span::Text {
                content: prev,
                bold: pb,
                italic: pi,
                code: pc,
            }),
            Span::Text {
                content,
                bold,
                italic,
                code,
            },
        ) = (out.last_mut(), &span)
        {
            if *pb == *bold && *pi == *italic && *pc == *code {
                prev.push_str(content);
                continue;
            }
        }
        out.push(span);
    }
    out
}
