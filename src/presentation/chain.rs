//! Text buffer behind a streamed reply.
//!
//! Lengths are counted in characters, not bytes, so a split never lands
//! inside a multi-byte character.

/// Ordered committed chunks plus one open buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChain {
    max_length: usize,
    chunks: Vec<String>,
    current: String,
    footer: Option<String>,
}

impl MessageChain {
    /// Empty chain whose messages hold at most `max_length` characters.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            chunks: Vec::new(),
            current: String::new(),
            footer: None,
        }
    }

    /// Character budget of one message.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// The open buffer.
    #[must_use]
    pub fn current_text(&self) -> &str {
        &self.current
    }

    /// Chunks already handed off to earlier messages, oldest first.
    #[must_use]
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Whether the open buffer outgrew one message.
    #[must_use]
    pub fn needs_split(&self) -> bool {
        self.current.chars().count() > self.max_length
    }

    /// Append text verbatim.
    pub fn append_text(&mut self, text: &str) {
        self.current.push_str(text);
    }

    /// Append a one-line tool call on its own line.
    pub fn append_tool_call(&mut self, line: &str) {
        if !self.current.is_empty() && !self.current.ends_with('\n') {
            self.current.push('\n');
        }
        self.current.push_str(line);
        self.current.push('\n');
    }

    /// Put `marker` and a blank line in front of the open buffer.
    pub fn prepend_marker(&mut self, marker: &str) {
        self.current = format!("{marker}\n\n{}", self.current);
    }

    /// Footer shown under the open buffer.
    pub fn set_footer(&mut self, footer: &str) {
        self.footer = Some(footer.to_owned());
    }

    /// Close the head of the open buffer as a chunk and return it.
    ///
    /// Cuts at the last newline within the limit unless that newline sits
    /// in the first half, in which case the cut is hard at the limit.
    /// Newlines at the cut are dropped so the next message does not open
    /// with a blank line.
    pub fn split(&mut self) -> String {
        let limit = byte_offset(&self.current, self.max_length);
        if limit == self.current.len() {
            let completed = std::mem::take(&mut self.current);
            self.chunks.push(completed.clone());
            return completed;
        }

        let half = byte_offset(&self.current, self.max_length / 2);
        let cut = match self.current[..limit].rfind('\n') {
            Some(at) if at >= half && at > 0 => at,
            _ => limit,
        };

        let completed = self.current[..cut].to_owned();
        self.current = self.current[cut..].trim_start_matches('\n').to_owned();
        self.chunks.push(completed.clone());
        completed
    }

    /// Open buffer with the footer, as shown remotely.
    #[must_use]
    pub fn render(&self) -> String {
        match self.footer {
            Some(ref footer) if self.current.trim().is_empty() => footer.clone(),
            Some(ref footer) => format!("{}\n\n{footer}", self.current.trim_end()),
            None => self.current.clone(),
        }
    }
}

/// Byte offset of the `chars`-th character, or the string length.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| offset)
}
