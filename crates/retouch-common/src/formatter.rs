use crate::protocol::{ElementDescriptor, SelectionMessage};

/// Only this many element descriptors are emitted; the rest collapse into a count.
pub const MAX_ELEMENTS: usize = 20;
/// Inner text is cut to this many characters.
pub const MAX_TEXT_CHARS: usize = 50;
/// Serialized markup is cut to this many characters.
pub const MAX_HTML_CHARS: usize = 100;

const ELLIPSIS: &str = "...";

/// Turns a browser selection into the single-line instruction handed to the agent.
///
/// The output never contains line breaks. Empty optional fields only drop their
/// clause, so this cannot fail.
///
/// ```text
/// make the button purple (Selected 2 elements in 300x120 area: [div#card-1.card text:"Card"] [button.buy html:<button class="buy">Buy</button>] )
/// ```
pub fn format_instruction(msg: &SelectionMessage) -> String {
    let mut parts = Vec::with_capacity(msg.elements.len().min(MAX_ELEMENTS) + 3);

    parts.push(single_line(&msg.instruction));
    parts.push(format!(
        "(Selected {} elements in {:.0}x{:.0} area:",
        msg.area.element_count, msg.area.width, msg.area.height
    ));

    for el in msg.elements.iter().take(MAX_ELEMENTS) {
        parts.push(describe_element(el));
    }

    if msg.elements.len() > MAX_ELEMENTS {
        parts.push(format!(
            "[+{} more elements]",
            msg.elements.len() - MAX_ELEMENTS
        ));
    }

    parts.push(")".to_string());
    parts.join(" ")
}

fn describe_element(el: &ElementDescriptor) -> String {
    let mut desc = String::from("[");

    let selector = if el.selector.trim().is_empty() {
        el.tag_name.trim()
    } else {
        el.selector.trim()
    };
    desc.push_str(&single_line(selector));

    let text = single_line(&el.inner_text);
    let text = text.trim();
    if !text.is_empty() {
        desc.push_str(&format!(" text:\"{}\"", truncate(text, MAX_TEXT_CHARS)));
    }

    let html = single_line(&el.outer_html);
    let html = html.trim();
    if !html.is_empty() {
        desc.push_str(&format!(" html:{}", truncate(html, MAX_HTML_CHARS)));
    }

    desc.push(']');
    desc
}

/// Collapses CR/LF into spaces.
fn single_line(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Character-aware truncation with an ellipsis marker.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &s[..cut], ELLIPSIS),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars_not_bytes() {
        let s = "é".repeat(51);
        let out = truncate(&s, 50);
        assert_eq!(out.chars().count(), 53);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn single_line_strips_all_breaks() {
        assert_eq!(single_line("a\r\nb\nc\rd"), "a b c d");
    }
}
