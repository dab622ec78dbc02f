//! Turn assistant text into displayable structure
//!
//! Reasoning models wrap their chain of thought in `<think>...</think>`.
//! Those spans are split out first; everything else is parsed as markdown
//! and reduced to a flat list of blocks. Works on partial text, so a
//! streaming reply can be re-rendered after every fragment.

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Rendered reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Model reasoning; `closed` is false while the block is still streaming
    Think { text: String, closed: bool },
    Markdown(Vec<Block>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    Code { language: Option<String>, code: String },
    /// `number` is set for ordered lists
    ListItem { depth: usize, number: Option<u64>, text: String },
    Quote(String),
    Rule,
}

impl Document {
    /// True while the reply is inside an unterminated think block
    pub fn is_thinking(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Think { closed: false, .. }))
    }
}

/// Render assistant text
pub fn render(text: &str) -> Document {
    let segments = split_think(text)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Think(text, closed) => {
                let text = text.trim();
                if closed && text.is_empty() {
                    None
                } else {
                    Some(Segment::Think {
                        text: text.to_string(),
                        closed,
                    })
                }
            }
            Piece::Text(text) => {
                let blocks = markdown_blocks(text);
                (!blocks.is_empty()).then_some(Segment::Markdown(blocks))
            }
        })
        .collect();

    Document { segments }
}

enum Piece<'a> {
    Think(&'a str, bool),
    Text(&'a str),
}

fn split_think(text: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = text;

    // Some models omit the opening tag and start mid-thought
    if let Some(close) = rest.find(THINK_CLOSE) {
        if !rest[..close].contains(THINK_OPEN) {
            pieces.push(Piece::Think(&rest[..close], true));
            rest = &rest[close + THINK_CLOSE.len()..];
        }
    }

    loop {
        let Some(start) = rest.find(THINK_OPEN) else {
            if !rest.trim().is_empty() {
                pieces.push(Piece::Text(rest));
            }
            break;
        };

        let before = &rest[..start];
        if !before.trim().is_empty() {
            pieces.push(Piece::Text(before));
        }

        let after = &rest[start + THINK_OPEN.len()..];
        match after.find(THINK_CLOSE) {
            Some(end) => {
                pieces.push(Piece::Think(&after[..end], true));
                rest = &after[end + THINK_CLOSE.len()..];
            }
            None => {
                pieces.push(Piece::Think(after, false));
                break;
            }
        }
    }

    pieces
}

/// Where pending inline text goes when it is flushed
struct Flow {
    blocks: Vec<Block>,
    text: String,
    list_numbers: Vec<Option<u64>>,
    item_number: Option<u64>,
    quote_depth: usize,
}

impl Flow {
    fn flush(&mut self) {
        let text = std::mem::take(&mut self.text);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let block = if !self.list_numbers.is_empty() {
            Block::ListItem {
                depth: self.list_numbers.len(),
                number: self.item_number.take(),
                text: text.to_string(),
            }
        } else if self.quote_depth > 0 {
            Block::Quote(text.to_string())
        } else {
            Block::Paragraph(text.to_string())
        };
        self.blocks.push(block);
    }
}

fn markdown_blocks(text: &str) -> Vec<Block> {
    let mut flow = Flow {
        blocks: Vec::new(),
        text: String::new(),
        list_numbers: Vec::new(),
        item_number: None,
        quote_depth: 0,
    };
    let mut code: Option<(Option<String>, String)> = None;
    let mut heading: Option<u8> = None;

    for event in Parser::new(text) {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { level, .. } => {
                    flow.flush();
                    heading = Some(level as u8);
                }
                Tag::CodeBlock(kind) => {
                    flow.flush();
                    let language = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().map(str::to_string)
                        }
                        CodeBlockKind::Indented => None,
                    };
                    code = Some((language, String::new()));
                }
                Tag::List(first) => {
                    // A nested list ends the parent item's own text
                    flow.flush();
                    flow.list_numbers.push(first);
                }
                Tag::Item => {
                    flow.flush();
                    if let Some(Some(n)) = flow.list_numbers.last_mut() {
                        flow.item_number = Some(*n);
                        *n += 1;
                    }
                }
                Tag::BlockQuote(_) => {
                    flow.flush();
                    flow.quote_depth += 1;
                }
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Heading(_) => {
                    let text = std::mem::take(&mut flow.text);
                    flow.blocks.push(Block::Heading {
                        level: heading.take().unwrap_or(1),
                        text: text.trim().to_string(),
                    });
                }
                TagEnd::CodeBlock => {
                    if let Some((language, code)) = code.take() {
                        flow.blocks.push(Block::Code { language, code });
                    }
                }
                TagEnd::Paragraph => {
                    if flow.list_numbers.is_empty() && flow.quote_depth == 0 {
                        flow.flush();
                    } else {
                        flow.text.push('\n');
                    }
                }
                TagEnd::Item => flow.flush(),
                TagEnd::List(_) => {
                    flow.flush();
                    flow.list_numbers.pop();
                }
                TagEnd::BlockQuote(_) => {
                    flow.flush();
                    flow.quote_depth = flow.quote_depth.saturating_sub(1);
                }
                _ => {}
            },
            Event::Text(text) => match code {
                Some((_, ref mut body)) => body.push_str(&text),
                None => flow.text.push_str(&text),
            },
            Event::Code(inline) => {
                flow.text.push('`');
                flow.text.push_str(&inline);
                flow.text.push('`');
            }
            Event::Html(html) | Event::InlineHtml(html) => flow.text.push_str(&html),
            Event::SoftBreak => flow.text.push(' '),
            Event::HardBreak => flow.text.push('\n'),
            Event::Rule => {
                flow.flush();
                flow.blocks.push(Block::Rule);
            }
            _ => {}
        }
    }

    // Unterminated fence while streaming
    if let Some((language, code)) = code.take() {
        flow.blocks.push(Block::Code { language, code });
    }
    flow.flush();
    flow.blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_blocks(text: &str) -> Vec<Block> {
        match render(text).segments.as_slice() {
            [Segment::Markdown(blocks)] => blocks.clone(),
            other => panic!("expected a single markdown segment, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_paragraphs() {
        assert_eq!(
            only_blocks("Hello,\nworld!\n\nSecond `para`."),
            vec![
                Block::Paragraph("Hello, world!".into()),
                Block::Paragraph("Second `para`.".into()),
            ]
        );
    }

    #[test]
    fn test_heading_code_and_rule() {
        let blocks = only_blocks("# Title\n\n```rust\nfn main() {}\n```\n\n---\n");
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 1,
                    text: "Title".into()
                },
                Block::Code {
                    language: Some("rust".into()),
                    code: "fn main() {}\n".into()
                },
                Block::Rule,
            ]
        );
    }

    #[test]
    fn test_lists() {
        let blocks = only_blocks("1. one\n2. two\n   - nested\n");
        assert_eq!(
            blocks,
            vec![
                Block::ListItem {
                    depth: 1,
                    number: Some(1),
                    text: "one".into()
                },
                Block::ListItem {
                    depth: 1,
                    number: Some(2),
                    text: "two".into()
                },
                Block::ListItem {
                    depth: 2,
                    number: None,
                    text: "nested".into()
                },
            ]
        );
    }

    #[test]
    fn test_quote() {
        assert_eq!(only_blocks("> quoted\n> text"), vec![Block::Quote("quoted text".into())]);
    }

    #[test]
    fn test_think_block_split_out() {
        let doc = render("<think>\nThe user wants 2+2.\n</think>\n\nIt's **4**.");
        assert_eq!(
            doc.segments,
            vec![
                Segment::Think {
                    text: "The user wants 2+2.".into(),
                    closed: true
                },
                Segment::Markdown(vec![Block::Paragraph("It's 4.".into())]),
            ]
        );
        assert!(!doc.is_thinking());
    }

    #[test]
    fn test_unterminated_think_while_streaming() {
        let doc = render("<think>Let me consider");
        assert_eq!(
            doc.segments,
            vec![Segment::Think {
                text: "Let me consider".into(),
                closed: false
            }]
        );
        assert!(doc.is_thinking());
    }

    #[test]
    fn test_missing_open_tag() {
        let doc = render("reasoning first</think>Answer");
        assert_eq!(doc.segments.len(), 2);
        assert!(matches!(&doc.segments[0], Segment::Think { text, closed: true } if text == "reasoning first"));
    }

    #[test]
    fn test_empty_think_dropped() {
        assert_eq!(only_blocks("<think></think>Hi"), vec![Block::Paragraph("Hi".into())]);
    }

    #[test]
    fn test_unterminated_fence() {
        let blocks = only_blocks("Here:\n\n```python\nprint(1)");
        assert_eq!(blocks[0], Block::Paragraph("Here:".into()));
        assert!(matches!(
            &blocks[1],
            Block::Code { language: Some(l), code } if l == "python" && code.starts_with("print(1)")
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(render("").segments.is_empty());
        assert!(render("   \n").segments.is_empty());
    }
}
