//! HTML-to-text conversion for scraped pages.

/// Render width handed to `html2text`; wide enough that prose is not re-wrapped.
const RENDER_WIDTH: usize = 400;

/// Extract readable text from an HTML document.
///
/// Uses `html2text` and falls back to plain tag stripping when it cannot
/// parse the input. Blank lines are dropped either way.
pub fn html_to_text(html: &str) -> String {
    let rendered = html2text::from_read(html.as_bytes(), RENDER_WIDTH)
        .unwrap_or_else(|_| strip_tags(html));
    collapse_whitespace(&rendered)
}

/// Whether a response body looks like an HTML document.
pub fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start();
    let lower = head
        .get(..head.len().min(512))
        .unwrap_or(head)
        .to_ascii_lowercase();
    lower.starts_with("<!doctype")
        || lower.starts_with("<html")
        || lower.contains("<head")
        || lower.contains("<body")
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Collapse spaces within lines and drop empty lines.
fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
