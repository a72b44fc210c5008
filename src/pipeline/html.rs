//! HTML fragments → markdown.
//!
//! Some converters fall back to emitting raw HTML for tables and inline
//! formatting. The text is parsed into a DOM with `scraper` and walked once:
//! known elements are rewritten as markdown, unknown ones contribute only
//! their text. Text outside any tag passes through untouched, so markdown
//! around the fragments keeps its line structure.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node};

static RE_KNOWN_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:h[1-6]|p|br|b|strong|i|em|ul|ol|li|a|img|table|thead|tbody|tr|td|th|hr|div|span)\b[^>]*>")
        .unwrap()
});

/// `true` when the text contains at least one tag this module knows how to
/// rewrite.
pub fn contains_html(input: &str) -> bool {
    RE_KNOWN_TAG.is_match(input)
}

/// Rewrite HTML constructs as markdown and drop the remaining tags.
/// Entities are decoded by the parser.
pub fn html_to_markdown(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let mut out = String::new();
    render_children(fragment.root_element(), &mut out);
    out
}

// ── Walk ─────────────────────────────────────────────────────────────────────

fn render_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&text.replace('\u{a0}', " ")),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    render_element(child, out);
                }
            }
            _ => {}
        }
    }
}

fn render_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    match name {
        "script" | "style" | "head" | "title" => {}
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level: usize = name[1..].parse().unwrap_or(1);
            block(out, &format!("{} {}", "#".repeat(level), flatten(&inner(el))));
        }
        "p" | "div" => {
            out.push_str("\n\n");
            render_children(el, out);
            out.push_str("\n\n");
        }
        "br" => out.push('\n'),
        "hr" => block(out, "---"),
        "b" | "strong" => out.push_str(&wrap("**", &inner(el))),
        "i" | "em" => out.push_str(&wrap("*", &inner(el))),
        "a" => match el.value().attr("href") {
            Some(href) if !href.is_empty() => {
                let text = inner(el);
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(&format!("[{text}]({href})"));
                }
            }
            _ => render_children(el, out),
        },
        "img" => {
            let src = el.value().attr("src").unwrap_or_default();
            if !src.is_empty() {
                let alt = el.value().attr("alt").unwrap_or_default();
                out.push_str(&format!("![{alt}]({src})"));
            }
        }
        "ul" | "ol" => {
            let mut lines = Vec::new();
            render_list(el, "", &mut lines);
            block(out, &lines.join("\n"));
        }
        // Stray <li> outside a list
        "li" => {
            out.push_str("\n- ");
            out.push_str(&flatten(&inner(el)));
        }
        "table" => block(out, &render_table(el)),
        _ => render_children(el, out),
    }
}

fn inner(el: ElementRef<'_>) -> String {
    let mut s = String::new();
    render_children(el, &mut s);
    s
}

fn block(out: &mut String, text: &str) {
    out.push_str("\n\n");
    out.push_str(text);
    out.push_str("\n\n");
}

fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn wrap(marker: &str, inner: &str) -> String {
    let inner = inner.trim();
    if inner.is_empty() {
        String::new()
    } else {
        format!("{marker}{inner}{marker}")
    }
}

// ── Lists ────────────────────────────────────────────────────────────────────

/// One line per `<li>`; nested lists are indented past the parent's marker.
fn render_list(list: ElementRef<'_>, indent: &str, lines: &mut Vec<String>) {
    let ordered = list.value().name() == "ol";
    let items = list
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|c| c.value().name() == "li");
    for (i, item) in items.enumerate() {
        let marker = if ordered {
            format!("{}.", i + 1)
        } else {
            "-".to_string()
        };
        let mut text = String::new();
        let mut nested = Vec::new();
        for child in item.children() {
            match ElementRef::wrap(child) {
                Some(c) if matches!(c.value().name(), "ul" | "ol") => nested.push(c),
                Some(c) => render_element(c, &mut text),
                None => {
                    if let Node::Text(t) = child.value() {
                        text.push_str(t);
                    }
                }
            }
        }
        lines.push(format!("{indent}{marker} {}", flatten(&text)));
        let child_indent = format!("{indent}{}", " ".repeat(marker.len() + 1));
        for list in nested {
            render_list(list, &child_indent, lines);
        }
    }
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// Pipe table with a separator after the first row. Rows are padded to the
/// widest row. A table nested in a cell is flattened into that cell's text.
fn render_table(table: ElementRef<'_>) -> String {
    let rows: Vec<Vec<String>> = table_rows(table)
        .into_iter()
        .map(|tr| {
            tr.children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th"))
                .map(cell_text)
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut lines = Vec::new();
    for (i, mut cells) in rows.into_iter().enumerate() {
        cells.resize(width, String::new());
        lines.push(format!("| {} |", cells.join(" | ")));
        if i == 0 {
            lines.push(format!("|{}", " --- |".repeat(width)));
        }
    }
    lines.join("\n")
}

/// Rows that belong to this table, not to a table nested inside it.
fn table_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|r| r.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn cell_text(cell: ElementRef<'_>) -> String {
    flatten(&cell.text().collect::<Vec<_>>().join(" ")).replace('|', "\\|")
}
