use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::app::{App, InputMode, UploadStatus};
use crate::chatlog::{ChatRole, EvalResult, MessageState};
use crate::markdown;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat history, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_upload_prompt {
        render_upload_prompt(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![
        Span::styled(" docchat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.server_url().to_string(), Style::default().fg(Color::DarkGray)),
    ];

    if let Some(status) = upload_status_span(&app.upload_status) {
        spans.push(Span::raw("  "));
        spans.push(status);
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Status fragment for the most recent upload action, colored by outcome.
fn upload_status_span(status: &UploadStatus) -> Option<Span<'static>> {
    match status {
        UploadStatus::Idle => None,
        UploadStatus::SelectFile => Some(Span::styled(
            "Please select a file first.",
            Style::default().fg(Color::Yellow),
        )),
        UploadStatus::Uploading => Some(Span::styled(
            "Uploading & indexing...",
            Style::default().fg(Color::Yellow),
        )),
        UploadStatus::Indexed(chunks) => Some(Span::styled(
            format!("Indexed {} chunks.", chunks),
            Style::default().fg(Color::Green),
        )),
        UploadStatus::Error(detail) => Some(Span::styled(
            format!("Error: {}", detail),
            Style::default().fg(Color::Red),
        )),
    }
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    let chat_text = if app.log.is_empty() {
        Text::from(Span::styled(
            "Upload a PDF with 'u', then ask a question about it...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(build_chat_lines(app))
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn build_chat_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();

    for msg in app.log.messages() {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                for line in msg.content.split('\n') {
                    lines.push(Line::from(line.to_string()));
                }
            }
            ChatRole::Bot => {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                match msg.state {
                    MessageState::Pending => {
                        // Animated ellipsis: cycles through ".", "..", "..."
                        let dots = ".".repeat((app.animation_frame as usize) + 1);
                        lines.push(Line::from(Span::styled(
                            format!("Thinking{}", dots),
                            Style::default()
                                .fg(Color::DarkGray)
                                .add_modifier(Modifier::ITALIC),
                        )));
                    }
                    MessageState::Failed => {
                        lines.push(Line::from(Span::styled(
                            msg.content.clone(),
                            Style::default().fg(Color::Red),
                        )));
                    }
                    MessageState::Streaming | MessageState::Done => {
                        lines.extend(markdown::format_message(&msg.content));
                    }
                }
                if let Some(eval) = &msg.eval {
                    lines.push(eval_line(eval));
                }
            }
        }
        lines.push(Line::default());
    }

    lines
}

/// The evaluation widget: rendered once after the message text, from an
/// immutable payload.
fn eval_line(eval: &EvalResult) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            "Score: ",
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("{}/10", eval.score)),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            "Feedback: ",
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ),
        Span::raw(eval.feedback.clone()),
    ])
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let input_border_color = if app.input_mode == InputMode::Editing {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(" Ask ");

    // Calculate visible portion of input with horizontal scrolling
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.query_cursor;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .query_input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    if app.input_mode == InputMode::Editing && !app.show_upload_prompt {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().fg(Color::Yellow);
    let label_style = Style::default().fg(Color::DarkGray);

    let spans = if app.show_upload_prompt {
        vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" upload ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" cancel ", label_style),
        ]
    } else if app.input_mode == InputMode::Editing {
        vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" scroll mode ", label_style),
        ]
    } else {
        vec![
            Span::styled(" i ", key_style),
            Span::styled(" ask ", label_style),
            Span::styled(" u ", key_style),
            Span::styled(" upload ", label_style),
            Span::styled(" j/k ", key_style),
            Span::styled(" scroll ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ]
    };

    let mut line = Line::from(spans);
    if app.is_streaming() {
        line.spans.push(Span::styled(
            " streaming... ",
            Style::default().fg(Color::Green),
        ));
    }

    frame.render_widget(Paragraph::new(line), area);
}

fn render_upload_prompt(app: &App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 7;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Upload PDF ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Path to the PDF to index. Enter to upload, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    let instructions_area = Rect::new(inner.x, inner.y, inner.width, 1);
    frame.render_widget(instructions, instructions_area);

    // Input field
    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let input = Paragraph::new(app.upload_input.as_str())
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(input, input_area);

    let cursor_x = app.upload_cursor.min(input_area.width as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    // Advisory / status line inside the popup mirrors the header status
    if let Some(status) = upload_status_span(&app.upload_status) {
        let status_area = Rect::new(inner.x, inner.y + 4, inner.width, 1);
        frame.render_widget(Paragraph::new(Line::from(status)), status_area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_errors_surface_the_server_detail() {
        let span = upload_status_span(&UploadStatus::Error("too large".to_string()))
            .expect("error status renders");
        assert!(span.content.contains("too large"));
        assert!(span.content.contains("Error"));
    }

    #[test]
    fn upload_success_shows_chunk_count() {
        let span =
            upload_status_span(&UploadStatus::Indexed(12)).expect("success status renders");
        assert_eq!(span.content, "Indexed 12 chunks.");
    }

    #[test]
    fn missing_file_is_an_advisory() {
        let span = upload_status_span(&UploadStatus::SelectFile).expect("advisory renders");
        assert!(span.content.contains("select a file"));
    }

    #[test]
    fn idle_status_renders_nothing() {
        assert!(upload_status_span(&UploadStatus::Idle).is_none());
    }

    #[test]
    fn eval_widget_shows_score_and_feedback() {
        let line = eval_line(&EvalResult {
            score: 8.0,
            feedback: "good".to_string(),
        });
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "Score: 8/10 | Feedback: good");
    }
}
