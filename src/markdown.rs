//! Lightweight formatting of streamed answers for the chat view.
//!
//! Pure text-to-lines transform, re-applied to the full accumulated buffer
//! on every partial render: newlines split lines, `**text**` is bold, and a
//! line opening with `* ` or `- ` becomes a bullet.

use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};

/// Format an accumulated message buffer. Deterministic: the same buffer
/// always yields the same lines.
pub fn format_message(text: &str) -> Vec<Line<'static>> {
    text.split('\n').map(format_line).collect()
}

fn format_line(line: &str) -> Line<'static> {
    // Bullet detection runs on newline-delimited segments, after the split.
    if let Some(rest) = line
        .strip_prefix("* ")
        .or_else(|| line.strip_prefix("- "))
    {
        let mut spans = vec![Span::raw("• ")];
        spans.extend(bold_spans(rest));
        return Line::from(spans);
    }

    let spans = bold_spans(line);
    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Convert `**bold**` runs in a line to styled spans.
fn bold_spans(text: &str) -> Vec<Span<'static>> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut current_text = String::new();

    while let Some((_, c)) = chars.next() {
        if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
            // Consume the second *
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some((_, c)) = chars.next() {
                if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    spans
}
