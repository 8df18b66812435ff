use crate::client::HttpTransport;
use crate::conversation::{ChatView, Reconciler};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;

const INPUT_HEIGHT: u16 = 6;
const REPLY_HEIGHT: u16 = 8;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
pub enum ChatMessage {
    User(String),
    Assistant(String),
    Error(String),
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

impl ChatMessage {
    fn line_specs(&self) -> Vec<LineSpec> {
        match self {
            ChatMessage::User(msg) => Self::labelled("user:", msg, Color::Blue),
            ChatMessage::Assistant(msg) => Self::labelled("assistant:", msg, Color::Yellow),
            ChatMessage::Error(msg) => {
                let body_style = Style::default().fg(Color::Red);
                let mut lines = vec![LineSpec::new(
                    "assistant:",
                    body_style.add_modifier(Modifier::BOLD),
                )];
                lines.push(LineSpec::new(format!("  ⚠️ {}", msg), body_style));
                lines
            }
        }
    }

    fn labelled(label: &str, body: &str, color: Color) -> Vec<LineSpec> {
        let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
        let body_style = Style::default().fg(color);
        let mut lines = vec![LineSpec::new(label, header_style)];
        for line in body.lines() {
            lines.push(LineSpec::new(format!("  {}", line), body_style));
        }
        lines
    }

    fn to_text(&self) -> Text<'static> {
        let lines = self
            .line_specs()
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>();
        Text::from(lines)
    }

    fn plain_lines(&self) -> Vec<String> {
        self.line_specs()
            .into_iter()
            .map(|spec| spec.text)
            .collect()
    }

    fn rendered_height(&self, width: u16) -> u16 {
        let width = width.max(1) as usize;
        let mut total = 0usize;
        for line in self.plain_lines() {
            let len = line.chars().count().max(1);
            total += len.div_ceil(width);
        }
        total as u16
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    UserMessage(String),
    AssistantStarted,
    AssistantText(String),
    AssistantCommitted(String),
    AssistantFailed(String),
    Busy(bool),
}

/// Forwards cycle updates from the background task to the UI loop.
pub struct ChannelView {
    sender: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelView {
    fn send(&self, event: UiEvent) {
        // The receiver only goes away when the UI is shutting down.
        let _ = self.sender.send(event);
    }
}

impl ChatView for ChannelView {
    fn user_message(&mut self, content: &str) {
        self.send(UiEvent::UserMessage(content.to_string()));
    }

    fn assistant_started(&mut self) {
        self.send(UiEvent::AssistantStarted);
    }

    fn assistant_text(&mut self, text: &str) {
        self.send(UiEvent::AssistantText(text.to_string()));
    }

    fn assistant_committed(&mut self, content: &str) {
        self.send(UiEvent::AssistantCommitted(content.to_string()));
    }

    fn assistant_failed(&mut self, message: &str) {
        self.send(UiEvent::AssistantFailed(message.to_string()));
    }

    fn set_busy(&mut self, busy: bool) {
        self.send(UiEvent::Busy(busy));
    }
}

struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn byte_index(line: &str, cursor: usize) -> usize {
        line.char_indices()
            .nth(cursor)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len())
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let idx = Self::byte_index(line, self.cursor_x);
        line.insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let idx = Self::byte_index(line, self.cursor_x - 1);
            line.remove(idx);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let line = &self.lines[self.cursor_y];
        let remaining: String = line.chars().skip(self.cursor_x).collect();
        self.lines[self.cursor_y] = line.chars().take(self.cursor_x).collect();
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Type your message here...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    input: InputBuffer,
    should_quit: bool,
    sender: mpsc::UnboundedSender<UiEvent>,
    receiver: mpsc::UnboundedReceiver<UiEvent>,
    is_busy: bool,
    /// Reply text of the cycle in flight; shown above the input.
    pending_reply: Option<String>,
    reconciler: Arc<Reconciler<HttpTransport>>,
}

impl App {
    pub fn new(reconciler: Reconciler<HttpTransport>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            input: InputBuffer::new(),
            should_quit: false,
            sender,
            receiver,
            is_busy: false,
            pending_reply: None,
            reconciler: Arc::new(reconciler),
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [reply_area, input_area] =
            Layout::vertical([Constraint::Min(0), Constraint::Length(INPUT_HEIGHT)]).areas(f.area());

        if let Some(reply) = &self.pending_reply {
            let message = ChatMessage::Assistant(reply.clone());
            let overflow = message
                .rendered_height(reply_area.width)
                .saturating_sub(reply_area.height);
            let paragraph = Paragraph::new(message.to_text())
                .wrap(Wrap { trim: false })
                .scroll((overflow, 0));
            f.render_widget(paragraph, reply_area);
        }

        let title = if self.is_busy {
            " Sending... (Esc to quit) "
        } else {
            " Send: Enter | Newline: Shift+Enter | Quit: Esc "
        };

        let border_color = if self.is_busy {
            Color::DarkGray
        } else {
            Color::Gray
        };

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .title_bottom(format!(" {} ", self.reconciler.transport().endpoint()))
                    .border_style(Style::default().fg(border_color)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, input_area);

        if !self.is_busy {
            let cursor_x = (self.input.cursor_x + 1) as u16;
            let cursor_y = self.input.cursor_y as u16;
            let x = (input_area.x + cursor_x).min(input_area.x + input_area.width - 2);
            let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height - 2);
            f.set_cursor_position((x, y));
        }
    }

    fn append_message(
        &mut self,
        terminal: &mut TuiTerminal,
        message: ChatMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let width = terminal.size()?.width;
        let height = message.rendered_height(width).saturating_add(1);
        let mut text = message.to_text();
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })?;
        Ok(())
    }

    fn apply_event(
        &mut self,
        terminal: &mut TuiTerminal,
        event: UiEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match event {
            UiEvent::UserMessage(content) => {
                self.append_message(terminal, ChatMessage::User(content))?;
            }
            UiEvent::AssistantStarted => {
                self.pending_reply = Some(String::new());
            }
            UiEvent::AssistantText(text) => {
                self.pending_reply = Some(text);
            }
            UiEvent::AssistantCommitted(content) => {
                self.pending_reply = None;
                self.append_message(terminal, ChatMessage::Assistant(content))?;
            }
            UiEvent::AssistantFailed(message) => {
                self.pending_reply = None;
                self.append_message(terminal, ChatMessage::Error(message))?;
            }
            UiEvent::Busy(busy) => {
                self.is_busy = busy;
            }
        }
        Ok(())
    }

    fn submit(&mut self) {
        if self.is_busy || self.reconciler.is_busy() {
            return;
        }

        let message = self.input.to_string();
        if message.trim().is_empty() {
            return;
        }

        self.input.clear();
        // Lock the input now; the cycle confirms with its own Busy event.
        self.is_busy = true;

        let reconciler = Arc::clone(&self.reconciler);
        let mut view = ChannelView {
            sender: self.sender.clone(),
        };
        tokio::spawn(async move {
            if let Err(err) = reconciler.submit(&message, &mut view).await {
                tracing::debug!(error = %err, "submission finished with error");
            }
            view.set_busy(false);
        });
    }

    fn handle_events(
        &mut self,
        terminal: &mut TuiTerminal,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        while let Ok(event) = self.receiver.try_recv() {
            self.apply_event(terminal, event)?;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
                {
                    self.should_quit = true;
                    return Ok(false);
                }

                if key.code == KeyCode::Esc {
                    self.should_quit = true;
                    return Ok(false);
                }

                // Input stays disabled until the cycle in flight settles.
                if self.is_busy {
                    return Ok(true);
                }

                match key.code {
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else {
                            self.submit();
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.cursor_x = self.input.line_len(self.input.cursor_y);
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

pub fn run_tui(
    reconciler: Reconciler<HttpTransport>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(REPLY_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(reconciler);

    let _guard = TerminalGuard::new();

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}
