use time::OffsetDateTime;
use time::macros::format_description;

use crate::conversation::{Conversation, Turn};

use super::EXPORT_TITLE;

pub(super) fn render(conversation: &Conversation, exported_at: OffsetDateTime) -> String {
    let mut out = Vec::new();
    out.push(EXPORT_TITLE.to_string());
    out.push("=".repeat(50));
    out.push(format!("Chat ID: {}", conversation.id()));
    out.push(format!("Exported on: {}", format_date_time(exported_at)));
    out.push(format!("Total Messages: {}", conversation.len()));
    out.push(String::new());

    for turn in conversation.history() {
        out.push(turn_header(turn));
        if !turn.text.is_empty() {
            out.push(turn.text.clone());
        }
        if turn.has_image() {
            out.push("[Image attached]".to_string());
        }
        out.push(String::new());
    }

    out.join("\n")
}

/// `[HH:MM:SS] Role:`
pub(super) fn turn_header(turn: &Turn) -> String {
    format!("[{}] {}:", format_time(turn.timestamp), turn.role.label())
}

pub(super) fn format_time(at: OffsetDateTime) -> String {
    at.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

pub(super) fn format_date_time(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ImageRef;
    use time::macros::datetime;

    #[test]
    fn layout() {
        let at = datetime!(2024-02-03 04:05:06 UTC);
        let mut conversation = Conversation::with_id("chat-7", 8);
        conversation
            .append(Turn::user("What is this?", at).with_image(ImageRef {
                id: "i".to_string(),
                mime_type: "image/png".to_string(),
                byte_len: 3,
            }))
            .unwrap();
        conversation
            .append(Turn::assistant("A lighthouse.", datetime!(2024-02-03 04:05:09 UTC)))
            .unwrap();

        let text = render(&conversation, datetime!(2024-02-04 10:00 UTC));
        let expected = [
            EXPORT_TITLE,
            "==================================================",
            "Chat ID: chat-7",
            "Exported on: 2024-02-04 10:00:00",
            "Total Messages: 2",
            "",
            "[04:05:06] User:",
            "What is this?",
            "[Image attached]",
            "",
            "[04:05:09] Assistant:",
            "A lighthouse.",
            "",
        ]
        .join("\n");
        assert_eq!(text, expected);
    }
}
