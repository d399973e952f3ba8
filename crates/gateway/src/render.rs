//! Part rendering: raw upstream parts become `(content, html)` pairs for
//! the parts store, and assistant text goes through markdown.

use atelier::event::{EventPart, PartKind, ToolState};
use atelier::parts::MessagePart;
use pulldown_cmark::{Options, Parser, html};

/// Substrings in rendered tool output that hint at workspace file changes.
const FILE_CHANGE_HINTS: &[&str] = &["created", "wrote", "saved"];

/// Render markdown source to an HTML fragment.
pub fn markdown_to_html(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(source, options);
    let mut out = String::with_capacity(source.len() * 2);
    html::push_html(&mut out, parser);
    out
}

/// Derive the stored representation of one upstream part.
///
/// The content string is what the file-change heuristic scans; the html
/// blob is what the message template injects verbatim. Step markers and
/// unknown kinds keep their slot in the message but render to nothing.
pub fn render_part(part: &EventPart) -> MessagePart {
    let (content, html) = match part.kind {
        PartKind::Text => {
            let text = part.text.clone().unwrap_or_default();
            let html = format!(
                "<div class=\"part part-text\">{}</div>",
                markdown_to_html(&text)
            );
            (text, html)
        }
        PartKind::Reasoning => {
            let text = part.text.clone().unwrap_or_default();
            let html = format!(
                "<details class=\"part part-reasoning\"><summary>Reasoning</summary>{}</details>",
                markdown_to_html(&text)
            );
            (text, html)
        }
        PartKind::Tool => render_tool(part),
        PartKind::File => {
            let name = part.filename.clone().unwrap_or_default();
            let html = match &part.url {
                Some(url) => format!(
                    "<div class=\"part part-file\"><a href=\"{}\">{}</a></div>",
                    escape_html(url),
                    escape_html(&name)
                ),
                None => format!(
                    "<div class=\"part part-file\">{}</div>",
                    escape_html(&name)
                ),
            };
            (name, html)
        }
        PartKind::Patch => (
            "patch".to_string(),
            "<div class=\"part part-patch\">Applied workspace patch</div>".to_string(),
        ),
        PartKind::Snapshot | PartKind::Agent => (String::new(), String::new()),
        PartKind::StepStart | PartKind::StepFinish | PartKind::Unknown => {
            (String::new(), String::new())
        }
    };

    MessagePart {
        part_id: part.id.clone(),
        kind: part.kind,
        content,
        html,
    }
}

fn render_tool(part: &EventPart) -> (String, String) {
    let tool = part.tool.clone().unwrap_or_else(|| "tool".to_string());
    let state = part.state.clone().unwrap_or_default();
    let status = state.status.clone().unwrap_or_else(|| "pending".to_string());
    let content = tool_content(&tool, &state);

    let mut html = format!(
        "<div class=\"part part-tool\" data-status=\"{}\"><span class=\"tool-name\">{}</span><span class=\"tool-status\">{}</span>",
        escape_html(&status),
        escape_html(&tool),
        escape_html(&status),
    );
    if let Some(output) = state.output.as_deref().filter(|o| !o.is_empty()) {
        html.push_str(&format!(
            "<pre class=\"tool-output\">{}</pre>",
            escape_html(output)
        ));
    }
    html.push_str("</div>");
    (content, html)
}

fn tool_content(tool: &str, state: &ToolState) -> String {
    let mut content = tool.to_string();
    if let Some(title) = state.title.as_deref().filter(|t| !t.is_empty()) {
        content.push(' ');
        content.push_str(title);
    }
    if let Some(output) = state.output.as_deref().filter(|o| !o.is_empty()) {
        content.push('\n');
        content.push_str(output);
    }
    content
}

/// True when a part's content suggests the workspace tree changed.
pub fn mentions_file_change(content: &str) -> bool {
    let lower = content.to_lowercase();
    FILE_CHANGE_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Minimal HTML escaping for text interpolated into hand-built fragments.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
