use relaybot_core::DisplayError;
use serde::Serialize;

/// Slack rejects section blocks whose text exceeds this many characters.
pub const SECTION_TEXT_LIMIT: usize = 3_000;

const REPLY_FOOTER: &str = "Say `reset` to start a fresh conversation.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    /// Adds one mrkdwn section per chunk of `text`, keeping each under
    /// [`SECTION_TEXT_LIMIT`]. Block ids are suffixed with the chunk index.
    pub fn mrkdwn_sections(mut self, block_id_prefix: &str, text: &str) -> Self {
        for (index, chunk) in split_section_text(text, SECTION_TEXT_LIMIT).into_iter().enumerate() {
            self.blocks.push(Block::Section {
                block_id: format!("{block_id_prefix}.{index}"),
                text: TextObject::mrkdwn(chunk),
            });
        }
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub fn reply_message(reply: &str) -> MessageTemplate {
    let formatted = markdown_to_mrkdwn(reply);
    MessageBuilder::new(reply.to_owned())
        .mrkdwn_sections("relay.reply.body.v1", &formatted)
        .context("relay.reply.footer.v1", |context| {
            context.mrkdwn(REPLY_FOOTER);
        })
        .build()
}

pub fn error_message(error: &DisplayError, correlation_id: &str) -> MessageTemplate {
    let fallback = error.fallback_text();
    MessageBuilder::new(fallback.clone())
        .section("relay.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {fallback}"));
        })
        .context("relay.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

pub fn help_message() -> MessageTemplate {
    MessageBuilder::new("Relay bot help")
        .section("relay.help.summary.v1", |section| {
            section.mrkdwn(
                "*How to talk to me*\n• Send me a direct message\n• Mention me in a channel\n\n*Commands*\n• `reset` or `clear` forgets this conversation\n• `help` shows this message\n• `/relaybot reset` forgets every conversation with you",
            );
        })
        .build()
}

pub fn cleared_message() -> MessageTemplate {
    MessageBuilder::new("Conversation cleared")
        .section("relay.cleared.summary.v1", |section| {
            section.mrkdwn(":broom: Conversation cleared. Your next message starts fresh.");
        })
        .build()
}

/// Converts the common Markdown that chat models emit into Slack mrkdwn.
///
/// Handles headings, bullet markers, `**bold**`/`__bold__`, `*italic*`,
/// `~~strike~~` and `[label](url)` links. Inline code spans and fenced code
/// blocks pass through untouched.
pub fn markdown_to_mrkdwn(markdown: &str) -> String {
    let mut in_fence = false;
    let mut lines = Vec::new();

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            lines.push(line.to_owned());
            continue;
        }
        if in_fence {
            lines.push(line.to_owned());
            continue;
        }
        lines.push(convert_line(line));
    }

    lines.join("\n")
}

fn convert_line(line: &str) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, body) = line.split_at(indent_len);

    let heading = body.trim_start_matches('#');
    if heading.len() < body.len() && heading.starts_with(' ') {
        let title = convert_inline(heading.trim());
        let title = title.trim_matches('*');
        return format!("{indent}*{title}*");
    }

    for marker in ["- ", "* ", "+ "] {
        if let Some(item) = body.strip_prefix(marker) {
            return format!("{indent}• {}", convert_inline(item));
        }
    }

    format!("{indent}{}", convert_inline(body))
}

fn convert_inline(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut output = String::with_capacity(text.len());
    let mut index = 0;

    while index < chars.len() {
        let rest = &chars[index..];

        if rest[0] == '`' {
            if let Some(end) = find_from(&chars, index + 1, &['`']) {
                output.extend(&chars[index..=end]);
                index = end + 1;
                continue;
            }
        }

        if let Some((marker, replacement)) = paired_marker(rest) {
            let start = index + marker.len();
            if let Some(end) = find_closing(&chars, start, marker) {
                let inner = chars[start..end].iter().collect::<String>();
                output.push(replacement);
                output.push_str(&convert_inline(&inner));
                output.push(replacement);
                index = end + marker.len();
                continue;
            }
        }

        if rest[0] == '[' {
            if let Some((label, url, consumed)) = parse_link(rest) {
                output.push_str(&format!("<{url}|{label}>"));
                index += consumed;
                continue;
            }
        }

        output.push(rest[0]);
        index += 1;
    }

    output
}

fn paired_marker(rest: &[char]) -> Option<(&'static [char], char)> {
    const BOLD_STARS: &[char] = &['*', '*'];
    const BOLD_UNDERSCORES: &[char] = &['_', '_'];
    const STRIKE: &[char] = &['~', '~'];
    const ITALIC: &[char] = &['*'];

    if rest.starts_with(BOLD_STARS) {
        Some((BOLD_STARS, '*'))
    } else if rest.starts_with(BOLD_UNDERSCORES) {
        Some((BOLD_UNDERSCORES, '*'))
    } else if rest.starts_with(STRIKE) {
        Some((STRIKE, '~'))
    } else if rest.starts_with(ITALIC) && rest.get(1).is_some_and(|ch| !ch.is_whitespace()) {
        Some((ITALIC, '_'))
    } else {
        None
    }
}

/// Finds a closing `marker` at or after `start` that directly follows
/// non-whitespace, so `a * b * c` is left alone.
fn find_closing(chars: &[char], start: usize, marker: &[char]) -> Option<usize> {
    let mut index = start + 1;
    while index + marker.len() <= chars.len() {
        if chars[index..].starts_with(marker) && !chars[index - 1].is_whitespace() {
            return Some(index);
        }
        index += 1;
    }
    None
}

fn find_from(chars: &[char], start: usize, targets: &[char]) -> Option<usize> {
    chars.iter().skip(start).position(|ch| targets.contains(ch)).map(|offset| start + offset)
}

fn parse_link(rest: &[char]) -> Option<(String, String, usize)> {
    let label_end = find_from(rest, 1, &[']'])?;
    if rest.get(label_end + 1) != Some(&'(') {
        return None;
    }
    let url_end = find_from(rest, label_end + 2, &[')'])?;
    let label = rest[1..label_end].iter().collect::<String>();
    let url = rest[label_end + 2..url_end].iter().collect::<String>();
    if url.is_empty() || url.contains(char::is_whitespace) {
        return None;
    }
    Some((label, url, url_end + 1))
}

/// Splits `text` into chunks of at most `limit` characters, preferring line
/// boundaries and hard-splitting lines that are longer than `limit`.
pub fn split_section_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let separator = usize::from(!current.is_empty());

        if current_len + separator + line_len <= limit {
            if separator == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += separator + line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        let mut remaining = line.chars().peekable();
        while remaining.peek().is_some() {
            let piece = remaining.by_ref().take(limit).collect::<String>();
            let piece_len = piece.chars().count();
            if piece_len == limit {
                chunks.push(piece);
            } else {
                current = piece;
                current_len = piece_len;
            }
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }

    chunks
}
