//! /list and /history output

use colloquy_chat::{Block, Conversation, ConversationSummary, Document, ResponseStatus, Role, Segment, Turn, render};

use crate::utils::{one_line, truncate_chars};

const TITLE_WIDTH: usize = 40;
const THINK_PREVIEW: usize = 80;

/// Numbered conversation list; numbers are what /switch and /delete take
pub fn format_conversations(summaries: &[ConversationSummary]) -> String {
    if summaries.is_empty() {
        return "No conversations".to_string();
    }

    let mut output = String::new();
    for (i, summary) in summaries.iter().enumerate() {
        let marker = if summary.is_active { '*' } else { ' ' };
        let updated = summary
            .updated_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M");
        output.push_str(&format!(
            "{:>3}. {} {:<width$}  {} messages, {}",
            i + 1,
            marker,
            truncate_chars(&summary.title, TITLE_WIDTH),
            summary.message_count,
            updated,
            width = TITLE_WIDTH
        ));
        if summary.is_generating {
            output.push_str("  [generating]");
        }
        output.push('\n');
    }
    output.truncate(output.trim_end().len());
    output
}

/// The whole conversation; turn numbers are what /regen, /edit, /page and /keep take
pub fn format_history(conversation: &Conversation) -> String {
    let model = conversation
        .model()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "no model".to_string());
    let mut output = format!("{}  ({})\n", conversation.title, model);

    if conversation.is_empty() {
        output.push_str("(empty)");
        return output;
    }

    for (i, turn) in conversation.turns().iter().enumerate() {
        output.push('\n');
        match turn.role() {
            Role::User => {
                output.push_str(&format!("[{}] you: {}\n", i + 1, turn.text()));
            }
            Role::Assistant => {
                output.push_str(&format!("[{}] assistant{}:\n", i + 1, version_label(turn)));
                output.push_str(&format_document(&render(turn.text())));
            }
        }
    }
    output.truncate(output.trim_end().len());
    output
}

/// ` [2/3, cancelled]`, or nothing for a single completed version
fn version_label(turn: &Turn) -> String {
    let count = turn.responses().len();
    let status = match turn.status() {
        Some(ResponseStatus::Streaming) => Some("generating"),
        Some(ResponseStatus::Cancelled) => Some("cancelled"),
        Some(ResponseStatus::Failed) => Some("failed"),
        Some(ResponseStatus::Completed) | None => None,
    };
    match (count > 1, status) {
        (true, Some(status)) => format!(" [{}/{}, {}]", turn.current_index() + 1, count, status),
        (true, None) => format!(" [{}/{}]", turn.current_index() + 1, count),
        (false, Some(status)) => format!(" [{}]", status),
        (false, None) => String::new(),
    }
}

/// Plain-text layout of a rendered reply
pub fn format_document(document: &Document) -> String {
    let mut output = String::new();
    for segment in &document.segments {
        match segment {
            Segment::Think { text, closed } => {
                let label = if *closed { "thought" } else { "thinking..." };
                output.push_str(&format!(
                    "  ({}) {}\n",
                    label,
                    truncate_chars(&one_line(text), THINK_PREVIEW)
                ));
            }
            Segment::Markdown(blocks) => {
                for block in blocks {
                    format_block(block, &mut output);
                }
            }
        }
    }
    output
}

fn format_block(block: &Block, output: &mut String) {
    match block {
        Block::Heading { level, text } => {
            output.push_str(&format!("  {} {}\n", "#".repeat(usize::from(*level)), text));
        }
        Block::Paragraph(text) => {
            for line in text.lines() {
                output.push_str(&format!("  {}\n", line));
            }
        }
        Block::Code { language, code } => {
            output.push_str(&format!("  ```{}\n", language.as_deref().unwrap_or("")));
            for line in code.lines() {
                output.push_str(&format!("  {}\n", line));
            }
            output.push_str("  ```\n");
        }
        Block::ListItem { depth, number, text } => {
            let indent = "  ".repeat(*depth);
            let bullet = match number {
                Some(n) => format!("{}.", n),
                None => "-".to_string(),
            };
            output.push_str(&format!("{}{} {}\n", indent, bullet, one_line(text)));
        }
        Block::Quote(text) => {
            for line in text.lines() {
                output.push_str(&format!("  > {}\n", line));
            }
        }
        Block::Rule => output.push_str("  ---\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn summary(title: &str, is_active: bool, is_generating: bool) -> ConversationSummary {
        ConversationSummary {
            id: Uuid::new_v4(),
            title: title.into(),
            message_count: 2,
            updated_at: Utc::now(),
            is_active,
            is_generating,
        }
    }

    #[test]
    fn test_conversation_list() {
        let text = format_conversations(&[summary("Rust lifetimes", true, true), summary("Dinner", false, false)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  1. * Rust lifetimes"));
        assert!(lines[0].ends_with("[generating]"));
        assert!(lines[1].starts_with("  2.   Dinner"));
        assert!(lines[1].contains("2 messages"));
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(format_conversations(&[]), "No conversations");
    }

    #[test]
    fn test_document_layout() {
        let doc = render("<think>hmm</think>\n# Plan\n\n1. first\n2. second\n\n```sh\nls\n```\n\n> note");
        assert_eq!(
            format_document(&doc),
            "  (thought) hmm\n  # Plan\n  1. first\n  2. second\n  ```sh\n  ls\n  ```\n  > note\n"
        );
    }

    #[test]
    fn test_streaming_think_label() {
        let doc = render("<think>working on\nit");
        assert_eq!(format_document(&doc), "  (thinking...) working on it\n");
    }

    #[test]
    fn test_empty_history() {
        let conversation = Conversation::new(None);
        assert_eq!(format_history(&conversation), "New Chat  (no model)\n(empty)");
    }
}
