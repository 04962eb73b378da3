//! Markdown to Slack `mrkdwn` conversion.
//!
//! Code spans and fenced blocks are lifted out first so nothing inside them
//! is reformatted, then the remaining text is escaped and the inline
//! markup rewritten: `**bold**` becomes `*bold*`, `*italic*` becomes
//! `_italic_`, `~~strike~~` becomes `~strike~`, headings become bold
//! lines, and `[text](url)` becomes `<url|text>`.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Marks converted bold text until single-star italics have been handled.
const BOLD_MARK: char = '\u{1}';

struct Patterns {
    fence: Regex,
    inline_code: Regex,
    link: Regex,
    heading: Regex,
    bold: Regex,
    italic: Regex,
    strike: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            fence: Regex::new(r"(?s)```[A-Za-z0-9_+\-]*\n?(.*?)```")?,
            inline_code: Regex::new(r"`([^`\n]+)`")?,
            link: Regex::new(r"\[([^\]\n]+)\]\((https?://[^)\s]+)\)")?,
            heading: Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t]*$")?,
            bold: Regex::new(r"\*\*([^*\n]+?)\*\*|__([^_\n]+?)__")?,
            italic: Regex::new(r"\*([^*\n]+)\*")?,
            strike: Regex::new(r"~~([^~\n]+)~~")?,
        })
    }
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns::compile().ok()).as_ref()
}

/// Escape the three characters Slack treats as control sequences.
#[must_use]
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Lifted-out fragments restored after formatting.
#[derive(Default)]
struct Stash(Vec<String>);

impl Stash {
    fn keep(&mut self, fragment: String) -> String {
        self.0.push(fragment);
        format!("\u{0}{}\u{0}", self.0.len() - 1)
    }

    fn restore(&self, mut text: String) -> String {
        // Later fragments may contain earlier placeholders, never the reverse.
        for (index, fragment) in self.0.iter().enumerate().rev() {
            text = text.replace(&format!("\u{0}{index}\u{0}"), fragment);
        }
        text
    }
}

/// Convert agent markdown into Slack `mrkdwn`.
#[must_use]
pub fn to_mrkdwn(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let Some(p) = patterns() else {
        return escape(text);
    };

    let mut stash = Stash::default();

    let text = p
        .fence
        .replace_all(text, |caps: &Captures| {
            stash.keep(format!("```\n{}```", escape(&caps[1])))
        })
        .into_owned();
    let text = p
        .inline_code
        .replace_all(&text, |caps: &Captures| {
            stash.keep(format!("`{}`", escape(&caps[1])))
        })
        .into_owned();
    let text = p
        .link
        .replace_all(&text, |caps: &Captures| {
            stash.keep(format!("<{}|{}>", &caps[2], escape(&caps[1])))
        })
        .into_owned();

    let text = escape(&text);
    let text = p
        .heading
        .replace_all(&text, |caps: &Captures| {
            format!("{BOLD_MARK}{}{BOLD_MARK}", &caps[1])
        })
        .into_owned();
    let text = p
        .bold
        .replace_all(&text, |caps: &Captures| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!("{BOLD_MARK}{inner}{BOLD_MARK}")
        })
        .into_owned();
    let text = p.italic.replace_all(&text, "_${1}_").into_owned();
    let text = p.strike.replace_all(&text, "~${1}~").into_owned();
    let text = text.replace(BOLD_MARK, "*");

    stash.restore(text)
}
