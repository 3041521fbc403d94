//! A small PDF 1.4 writer for conversation transcripts.
//!
//! Text is set in the standard Helvetica faces with WinAnsiEncoding, so no fonts are embedded.
//! Characters outside Latin-1 are replaced with `?`.

use std::fmt::Write as _;

use time::OffsetDateTime;
use time::macros::format_description;

use crate::conversation::{Conversation, Role, Turn};

use super::EXPORT_TITLE;
use super::text::{format_date_time, format_time};

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN_LEFT: f32 = 72.0;
const MARGIN_TOP: f32 = 72.0;
const MARGIN_BOTTOM: f32 = 54.0;
const ASSISTANT_INDENT: f32 = 20.0;
// Approximate Helvetica advance at 11pt over the 468pt text width.
const WRAP_COLUMNS: usize = 85;

const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const INFO_ID: usize = 3;
const FIRST_FONT_ID: usize = 4;
const FIRST_PAGE_ID: usize = FIRST_FONT_ID + Face::ALL.len();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
    Oblique,
}

impl Face {
    const ALL: [Face; 3] = [Face::Regular, Face::Bold, Face::Oblique];

    fn resource(self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
            Face::Oblique => "F3",
        }
    }

    fn base_font(self) -> &'static str {
        match self {
            Face::Regular => "Helvetica",
            Face::Bold => "Helvetica-Bold",
            Face::Oblique => "Helvetica-Oblique",
        }
    }
}

#[derive(Clone, Debug)]
struct Line {
    face: Face,
    size: f32,
    leading: f32,
    indent: f32,
    text: String,
}

impl Line {
    fn body(text: impl Into<String>, indent: f32) -> Self {
        Self {
            face: Face::Regular,
            size: 11.0,
            leading: 14.0,
            indent,
            text: text.into(),
        }
    }

    fn title(text: impl Into<String>) -> Self {
        Self {
            face: Face::Bold,
            size: 16.0,
            leading: 22.0,
            indent: 0.0,
            text: text.into(),
        }
    }

    fn bold(text: impl Into<String>, indent: f32) -> Self {
        Self {
            face: Face::Bold,
            ..Self::body(text, indent)
        }
    }

    fn small(text: impl Into<String>, indent: f32) -> Self {
        Self {
            size: 8.0,
            leading: 11.0,
            ..Self::body(text, indent)
        }
    }

    fn oblique(text: impl Into<String>, indent: f32) -> Self {
        Self {
            face: Face::Oblique,
            ..Self::body(text, indent)
        }
    }

    fn spacer(height: f32) -> Self {
        Self {
            leading: height,
            ..Self::body("", 0.0)
        }
    }
}

pub(super) fn render(conversation: &Conversation, exported_at: OffsetDateTime) -> Vec<u8> {
    let pages = paginate(layout(conversation, exported_at));
    write_document(&pages, exported_at)
}

fn layout(conversation: &Conversation, exported_at: OffsetDateTime) -> Vec<Line> {
    let mut lines = vec![
        Line::title(EXPORT_TITLE),
        Line::spacer(12.0),
        Line::body(format!("Chat ID: {}", conversation.id()), 0.0),
        Line::body(format!("Exported on: {}", format_date_time(exported_at)), 0.0),
        Line::body(format!("Total Messages: {}", conversation.len()), 0.0),
        Line::spacer(20.0),
    ];
    for turn in conversation.history() {
        layout_turn(turn, &mut lines);
    }
    lines
}

fn layout_turn(turn: &Turn, lines: &mut Vec<Line>) {
    let indent = match turn.role {
        Role::User => 0.0,
        Role::Assistant => ASSISTANT_INDENT,
    };
    lines.push(Line::small(format!("[{}]", format_time(turn.timestamp)), indent));
    lines.push(Line::bold(format!("{}:", turn.role.label()), indent));
    for paragraph in turn.text.lines() {
        for wrapped in wrap(paragraph, WRAP_COLUMNS) {
            lines.push(Line::body(wrapped, indent));
        }
    }
    if turn.has_image() {
        lines.push(Line::oblique("[Image attached]", indent));
    }
    lines.push(Line::spacer(12.0));
}

/// Greedy word wrap by character count; words longer than `columns` are split.
fn wrap(paragraph: &str, columns: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in paragraph.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(columns) {
            let needed = if current_len == 0 {
                piece.len()
            } else {
                current_len + 1 + piece.len()
            };
            if needed > columns && current_len > 0 {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(piece);
            current_len += piece.len();
        }
    }
    if current_len > 0 || out.is_empty() {
        out.push(current);
    }
    out
}

/// Positions lines top to bottom, starting a new page when the bottom margin is reached.
fn paginate(lines: Vec<Line>) -> Vec<Vec<(f32, Line)>> {
    let top = PAGE_HEIGHT - MARGIN_TOP;
    let mut pages = vec![Vec::new()];
    let mut y = top;
    for line in lines {
        if y - line.leading < MARGIN_BOTTOM {
            pages.push(Vec::new());
            y = top;
        }
        y -= line.leading;
        if !line.text.is_empty()
            && let Some(page) = pages.last_mut()
        {
            page.push((y, line));
        }
    }
    pages
}

fn content_stream(page: &[(f32, Line)]) -> Vec<u8> {
    let mut stream = Vec::new();
    for (y, line) in page {
        stream.extend_from_slice(
            format!(
                "BT /{} {} Tf {} {} Td (",
                line.face.resource(),
                line.size,
                MARGIN_LEFT + line.indent,
                y
            )
            .as_bytes(),
        );
        escape_into(&line.text, &mut stream);
        stream.extend_from_slice(b") Tj ET\n");
    }
    stream
}

/// Writes a PDF string body in WinAnsiEncoding.
fn escape_into(text: &str, out: &mut Vec<u8>) {
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            '\t' => out.push(b' '),
            ' '..='~' => out.push(c as u8),
            '\u{a0}'..='\u{ff}' => {
                out.extend_from_slice(format!("\\{:03o}", c as u32).as_bytes());
            }
            _ => out.push(b'?'),
        }
    }
}

struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<(usize, usize)>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n");
        Self {
            buf,
            offsets: Vec::new(),
        }
    }

    fn object(&mut self, id: usize, body: &[u8]) {
        self.offsets.push((id, self.buf.len()));
        self.buf
            .extend_from_slice(format!("{id} 0 obj\n").as_bytes());
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, id: usize, data: &[u8]) {
        let mut body = format!("<< /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object(id, &body);
    }

    fn finish(mut self) -> Vec<u8> {
        self.offsets.sort_by_key(|(id, _)| *id);
        let xref_at = self.buf.len();
        let size = self.offsets.len() + 1;
        let mut xref = format!("xref\n0 {size}\n0000000000 65535 f \n");
        for (_, offset) in &self.offsets {
            let _ = write!(xref, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {size} /Root {CATALOG_ID} 0 R /Info {INFO_ID} 0 R >>\nstartxref\n{xref_at}\n%%EOF\n"
        );
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }
}

fn write_document(pages: &[Vec<(f32, Line)>], exported_at: OffsetDateTime) -> Vec<u8> {
    let mut pdf = PdfWriter::new();
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| FIRST_PAGE_ID + 2 * i).collect();

    pdf.object(
        CATALOG_ID,
        format!("<< /Type /Catalog /Pages {PAGES_ID} 0 R >>").as_bytes(),
    );
    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    pdf.object(
        PAGES_ID,
        format!(
            "<< /Type /Pages /Kids [{kids}] /Count {} >>",
            page_ids.len()
        )
        .as_bytes(),
    );

    let mut info = b"<< /Title (".to_vec();
    escape_into(EXPORT_TITLE, &mut info);
    info.extend_from_slice(
        format!(
            ") /Producer (palaver) /CreationDate (D:{}) >>",
            pdf_date(exported_at)
        )
        .as_bytes(),
    );
    pdf.object(INFO_ID, &info);

    let mut fonts = String::new();
    for (i, face) in Face::ALL.iter().enumerate() {
        let id = FIRST_FONT_ID + i;
        pdf.object(
            id,
            format!(
                "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                face.base_font()
            )
            .as_bytes(),
        );
        let _ = write!(fonts, "/{} {id} 0 R ", face.resource());
    }

    for (page, page_id) in pages.iter().zip(&page_ids) {
        let content_id = page_id + 1;
        pdf.object(
            *page_id,
            format!(
                "<< /Type /Page /Parent {PAGES_ID} 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << {}>> >> /Contents {content_id} 0 R >>",
                fonts
            )
            .as_bytes(),
        );
        pdf.stream(content_id, &content_stream(page));
    }

    pdf.finish()
}

fn pdf_date(at: OffsetDateTime) -> String {
    let utc = at.to_offset(time::UtcOffset::UTC);
    utc.format(format_description!(
        "[year][month][day][hour][minute][second]"
    ))
    .map(|s| format!("{s}Z"))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const AT: OffsetDateTime = datetime!(2024-07-08 09:10:11 UTC);

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn page_count(pdf: &str) -> usize {
        let start = pdf.find("/Count ").unwrap() + "/Count ".len();
        pdf[start..]
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn empty_conversation_has_one_page() {
        let bytes = render(&Conversation::with_id("empty", 4), AT);
        let pdf = as_text(&bytes);
        assert!(pdf.starts_with("%PDF-1.4"));
        assert!(pdf.ends_with("%%EOF\n"));
        assert_eq!(page_count(&pdf), 1);
        assert!(pdf.contains("(Chat ID: empty)"));
        assert!(pdf.contains("/CreationDate (D:20240708091011Z)"));
    }

    #[test]
    fn long_conversation_paginates() {
        let mut conversation = Conversation::with_id("long", 200);
        for i in 0..80 {
            conversation
                .append(Turn::user(format!("question number {i}"), AT))
                .unwrap();
        }
        let pdf = as_text(&render(&conversation, AT));
        assert!(page_count(&pdf) > 1);
        assert!(pdf.contains("(question number 79)"));
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let mut conversation = Conversation::with_id("xref", 8);
        conversation.append(Turn::user("hello (world)", AT)).unwrap();
        conversation.append(Turn::assistant("café ☕", AT)).unwrap();
        let bytes = render(&conversation, AT);
        let pdf = as_text(&bytes);

        let startxref = pdf.rfind("startxref\n").unwrap() + "startxref\n".len();
        let xref_at: usize = pdf[startxref..].lines().next().unwrap().parse().unwrap();
        assert!(bytes[xref_at..].starts_with(b"xref"));

        let tail = as_text(&bytes[xref_at..]);
        let entries: Vec<usize> = tail
            .lines()
            .skip(3)
            .take_while(|line| line.ends_with(" n "))
            .map(|line| line[..10].parse().unwrap())
            .collect();
        assert!(!entries.is_empty());
        for (i, offset) in entries.iter().enumerate() {
            let header = format!("{} 0 obj", i + 1);
            assert!(bytes[*offset..].starts_with(header.as_bytes()));
        }
    }

    #[test]
    fn escaping() {
        let mut out = Vec::new();
        escape_into(r"a(b)c\d é ☕", &mut out);
        assert_eq!(out, b"a\\(b\\)c\\\\d \\351 ?".to_vec());
    }

    #[test]
    fn wrapping() {
        assert_eq!(wrap("", 10), vec![String::new()]);
        assert_eq!(wrap("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        for line in wrap(&"word ".repeat(100), WRAP_COLUMNS) {
            assert!(line.chars().count() <= WRAP_COLUMNS);
        }
    }
}
