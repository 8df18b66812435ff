use crate::client::ChatTransport;
use crate::conversation::{ChatError, ChatView, Reconciler};
use std::io::{self, Write};

/// Streams a single reply to a writer as plain text.
pub struct PlainView<W> {
    out: W,
    shown: String,
}

impl<W: Write> PlainView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
        }
    }

    fn write(&mut self, text: &str) {
        if let Err(err) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::warn!(error = %err, "failed to write reply");
        }
    }
}

impl<W: Write> ChatView for PlainView<W> {
    fn user_message(&mut self, _content: &str) {}

    fn assistant_started(&mut self) {
        self.shown.clear();
    }

    fn assistant_text(&mut self, text: &str) {
        match text.strip_prefix(self.shown.as_str()) {
            Some(rest) => self.write(rest),
            None => {
                // A full reply replaced what was already printed.
                self.write("\n");
                self.write(text);
            }
        }
        self.shown = text.to_string();
    }

    fn assistant_committed(&mut self, _content: &str) {
        if !self.shown.ends_with('\n') {
            self.write("\n");
        }
    }

    fn assistant_failed(&mut self, message: &str) {
        if !self.shown.is_empty() && !self.shown.ends_with('\n') {
            self.write("\n");
        }
        eprintln!("⚠️ {}", message);
    }

    fn set_busy(&mut self, _busy: bool) {}
}

pub async fn run<T: ChatTransport>(
    reconciler: &Reconciler<T>,
    message: &str,
) -> Result<String, ChatError> {
    let mut view = PlainView::new(io::stdout());
    reconciler.submit(message, &mut view).await
}

#[cfg(test)]
mod tests {
    use super::PlainView;
    use crate::conversation::ChatView;

    #[test]
    fn prints_only_new_text_for_deltas() {
        let mut view = PlainView::new(Vec::new());
        view.assistant_started();
        view.assistant_text("Hel");
        view.assistant_text("Hello");
        view.assistant_committed("Hello");

        assert_eq!(String::from_utf8(view.out).unwrap(), "Hello\n");
    }

    #[test]
    fn replacement_reply_starts_a_new_line() {
        let mut view = PlainView::new(Vec::new());
        view.assistant_started();
        view.assistant_text("draft");
        view.assistant_text("Final");
        view.assistant_committed("Final");

        assert_eq!(String::from_utf8(view.out).unwrap(), "draft\nFinal\n");
    }
}
