use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ChatEvent, UploadEvent};
use crate::chatlog::{ChatLog, ChatRole, MessageState};
use crate::stream::StreamItem;
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// What the upload status line currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Idle,
    /// Advisory: submit pressed with no path entered.
    SelectFile,
    Uploading,
    Indexed(u64),
    Error(String),
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Chat state
    pub log: ChatLog,
    pub query_input: String,
    pub query_cursor: usize, // cursor position in query_input (chars)
    pub chat_scroll: u16,
    pub chat_height: u16, // inner height of the chat area, set during render
    pub chat_width: u16,  // inner width, for wrap calculations

    // Upload state
    pub show_upload_prompt: bool,
    pub upload_input: String,
    pub upload_cursor: usize,
    pub upload_status: UploadStatus,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Plumbing
    api: ApiClient,
    events: mpsc::UnboundedSender<AppEvent>,
    cancel_root: CancellationToken,
    in_flight: usize,
}

impl App {
    pub fn new(api: ApiClient, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            log: ChatLog::new(),
            query_input: String::new(),
            query_cursor: 0,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            show_upload_prompt: false,
            upload_input: String::new(),
            upload_cursor: 0,
            upload_status: UploadStatus::Idle,

            animation_frame: 0,

            api,
            events,
            cancel_root: CancellationToken::new(),
            in_flight: 0,
        }
    }

    pub fn server_url(&self) -> &str {
        self.api.base_url()
    }

    pub fn is_streaming(&self) -> bool {
        self.in_flight > 0
    }

    /// Submit the current query. Empty or whitespace-only input is a silent
    /// no-op. Otherwise the user message and a pending bot placeholder are
    /// both in the log before the request task even starts; concurrent
    /// submissions are fine because each stream owns its own message id.
    pub fn send_query(&mut self) {
        let query = self.query_input.trim().to_string();
        if query.is_empty() {
            return;
        }

        self.query_input.clear();
        self.query_cursor = 0;

        self.log.append(ChatRole::User, query.clone());
        let bot_id = self.log.append(ChatRole::Bot, "");
        self.in_flight += 1;

        self.api.spawn_chat(
            query,
            bot_id,
            self.events.clone(),
            self.cancel_root.child_token(),
        );
        self.scroll_chat_to_bottom();
    }

    /// Submit the upload prompt. An empty path is an advisory, not a request.
    pub fn submit_upload(&mut self) {
        let path = self.upload_input.trim().to_string();
        if path.is_empty() {
            self.upload_status = UploadStatus::SelectFile;
            return;
        }

        self.show_upload_prompt = false;
        self.upload_status = UploadStatus::Uploading;
        self.api.spawn_upload(PathBuf::from(path), self.events.clone());
    }

    pub fn on_chat_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Item { id, item } => match item {
                StreamItem::Text(text) => self.log.push_fragment(id, &text),
                StreamItem::Eval(eval) => self.log.attach_eval(id, eval),
            },
            ChatEvent::Done { id } => {
                self.log.mark_done(id);
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            ChatEvent::Failed { id } => {
                self.log.mark_failed(id);
                self.in_flight = self.in_flight.saturating_sub(1);
            }
        }
        self.scroll_chat_to_bottom();
    }

    pub fn on_upload_event(&mut self, event: UploadEvent) {
        self.upload_status = match event {
            UploadEvent::Indexed { chunks } => UploadStatus::Indexed(chunks),
            UploadEvent::Rejected { detail } => UploadStatus::Error(detail),
            UploadEvent::Unreadable { error } => UploadStatus::Error(error),
            UploadEvent::Failed => UploadStatus::Error("Network error".to_string()),
        };
    }

    /// Cancel every in-flight stream. Read loops notice at their next
    /// suspension point.
    pub fn shutdown(&self) {
        self.cancel_root.cancel();
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.in_flight > 0 {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Chat scrolling

    pub fn scroll_down(&mut self) {
        let max_scroll = self.chat_line_count().saturating_sub(self.chat_height);
        if self.chat_scroll < max_scroll {
            self.chat_scroll = self.chat_scroll.saturating_add(1);
        }
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_half_page_down(&mut self) {
        let half_page = self.chat_height / 2;
        let max_scroll = self.chat_line_count().saturating_sub(self.chat_height);
        self.chat_scroll = (self.chat_scroll + half_page).min(max_scroll);
    }

    pub fn scroll_half_page_up(&mut self) {
        let half_page = self.chat_height / 2;
        self.chat_scroll = self.chat_scroll.saturating_sub(half_page);
    }

    /// Scroll so the newest content is visible. Called after every applied
    /// stream event so the view follows the stream.
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.chat_line_count();
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.chat_scroll = total_lines.saturating_sub(visible_height);
        } else {
            self.chat_scroll = 0;
        }
    }

    /// Estimate of rendered chat lines, accounting for wrapping.
    fn chat_line_count(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in self.log.messages() {
            total_lines += 1; // Role line ("You:" or "AI:")

            if msg.role == ChatRole::Bot && msg.state == MessageState::Pending {
                total_lines += 1; // "Thinking..." line
            } else {
                for line in msg.content.split('\n') {
                    // Character count, not byte length, for UTF-8 content
                    let char_count = line.chars().count();
                    if char_count == 0 {
                        total_lines += 1;
                    } else {
                        total_lines += ((char_count / wrap_width) + 1) as u16;
                    }
                }
            }

            if msg.eval.is_some() {
                total_lines += 1; // Evaluation widget line
            }
            total_lines += 1; // Blank line after message
        }

        total_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatlog::{EvalResult, CONNECTION_ERROR};

    fn test_app() -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Nothing listens on this port; streams spawned here fail later,
        // which is fine for tests that only check synchronous state.
        (App::new(ApiClient::new("http://127.0.0.1:9"), tx), rx)
    }

    #[tokio::test]
    async fn send_appends_user_and_placeholder_before_any_network_result() {
        let (mut app, _rx) = test_app();
        app.query_input = "what is chapter 2 about?".to_string();
        app.send_query();

        assert_eq!(app.log.len(), 2);
        let messages = app.log.messages();
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "what is chapter 2 about?");
        assert_eq!(messages[1].role, ChatRole::Bot);
        assert_eq!(messages[1].state, MessageState::Pending);
        assert!(app.query_input.is_empty());
    }

    #[tokio::test]
    async fn empty_and_whitespace_queries_are_ignored() {
        let (mut app, _rx) = test_app();

        app.send_query();
        app.query_input = "   \n\t ".to_string();
        app.send_query();

        assert!(app.log.is_empty());
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn upload_with_no_path_is_an_advisory_without_network() {
        let (mut app, mut rx) = test_app();
        app.show_upload_prompt = true;
        app.submit_upload();

        assert_eq!(app.upload_status, UploadStatus::SelectFile);
        // Prompt stays open for the user to type a path
        assert!(app.show_upload_prompt);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn server_rejection_detail_is_surfaced() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(ApiClient::new("http://127.0.0.1:9"), tx);
        app.upload_status = UploadStatus::Uploading;
        app.on_upload_event(UploadEvent::Rejected {
            detail: "too large".to_string(),
        });
        assert_eq!(app.upload_status, UploadStatus::Error("too large".to_string()));
    }

    #[tokio::test]
    async fn chat_events_flow_into_the_addressed_message() {
        let (mut app, _rx) = test_app();
        app.query_input = "q".to_string();
        app.send_query();
        let id = app.log.messages()[1].id;

        app.on_chat_event(ChatEvent::Item {
            id,
            item: StreamItem::Text("Hello ".to_string()),
        });
        app.on_chat_event(ChatEvent::Item {
            id,
            item: StreamItem::Text("world".to_string()),
        });
        app.on_chat_event(ChatEvent::Item {
            id,
            item: StreamItem::Eval(EvalResult {
                score: 8.0,
                feedback: "good".to_string(),
            }),
        });
        app.on_chat_event(ChatEvent::Done { id });

        let msg = app.log.get(id).unwrap();
        assert_eq!(msg.content, "Hello world");
        assert_eq!(msg.state, MessageState::Done);
        assert_eq!(msg.eval.as_ref().unwrap().score, 8.0);
        assert!(!app.is_streaming());
    }

    #[tokio::test]
    async fn stream_failure_replaces_the_placeholder() {
        let (mut app, _rx) = test_app();
        app.query_input = "q".to_string();
        app.send_query();
        let id = app.log.messages()[1].id;

        app.on_chat_event(ChatEvent::Failed { id });
        let msg = app.log.get(id).unwrap();
        assert_eq!(msg.content, CONNECTION_ERROR);
        assert_eq!(msg.state, MessageState::Failed);
    }
}
