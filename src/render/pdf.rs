//! Low-level PDF helpers on top of `lopdf`: a page canvas, document
//! assembly, WinAnsi text encoding and page text extraction.
//!
//! Assembly writes no timestamps and no random document IDs, so identical
//! canvases always serialize to identical bytes.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};

use super::RenderError;

/// A4 in points.
pub const PAGE_WIDTH: i64 = 595;
pub const PAGE_HEIGHT: i64 = 842;
pub const MARGIN_LEFT: i64 = 56;
pub const MARGIN_RIGHT: i64 = 56;

pub const FONT_REGULAR: &str = "F1";
pub const FONT_BOLD: &str = "F2";

/// Encode text for a Type1 font with WinAnsiEncoding.
///
/// Latin-1 characters map to their byte value; typographic dashes and
/// quotes are folded to ASCII; anything else becomes `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2013}' | '\u{2014}' => b'-',
            '\u{2018}' | '\u{2019}' => b'\'',
            '\u{201C}' | '\u{201D}' => b'"',
            '\u{2022}' => b'*',
            c if c.is_control() => b' ',
            c if (c as u32) < 0x80 => c as u8,
            c if (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

pub fn pdf_string(text: &str) -> Object {
    Object::String(encode_win_ansi(text), StringFormat::Literal)
}

/// Decode WinAnsi/Latin-1 bytes back to text.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Greedy word wrap on character count.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + 1;
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Drawing operations for one page.
#[derive(Debug, Default)]
pub struct PageCanvas {
    ops: Vec<Operation>,
}

impl PageCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, font: &str, size: i64, x: i64, y: i64, text: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![Object::Name(font.as_bytes().to_vec()), Object::Integer(size)],
        ));
        self.ops.push(Operation::new(
            "Td",
            vec![Object::Integer(x), Object::Integer(y)],
        ));
        self.ops.push(Operation::new("Tj", vec![pdf_string(text)]));
        self.ops.push(Operation::new("ET", vec![]));
    }

    pub fn line(&mut self, x1: i64, y1: i64, x2: i64, y2: i64) {
        self.ops.push(Operation::new("w", vec![Object::Integer(1)]));
        self.ops.push(Operation::new(
            "m",
            vec![Object::Integer(x1), Object::Integer(y1)],
        ));
        self.ops.push(Operation::new(
            "l",
            vec![Object::Integer(x2), Object::Integer(y2)],
        ));
        self.ops.push(Operation::new("S", vec![]));
    }

    /// Stroked rectangle; dashed borders mark low-assurance stamps.
    pub fn rect(&mut self, x: i64, y: i64, width: i64, height: i64, dashed: bool) {
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new("w", vec![Object::Integer(1)]));
        if dashed {
            self.ops.push(Operation::new(
                "d",
                vec![
                    Object::Array(vec![Object::Integer(4), Object::Integer(3)]),
                    Object::Integer(0),
                ],
            ));
        }
        self.ops.push(Operation::new(
            "re",
            vec![
                Object::Integer(x),
                Object::Integer(y),
                Object::Integer(width),
                Object::Integer(height),
            ],
        ));
        self.ops.push(Operation::new("S", vec![]));
        self.ops.push(Operation::new("Q", vec![]));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Encode into a content stream body.
    pub fn into_content(self) -> Result<Vec<u8>, RenderError> {
        Ok(Content {
            operations: self.ops,
        }
        .encode()?)
    }
}

fn builtin_font(doc: &mut Document, base_font: &str) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base_font.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Assemble canvases into a complete PDF.
pub fn assemble(pages: Vec<PageCanvas>, title: &str) -> Result<Vec<u8>, RenderError> {
    if pages.is_empty() {
        return Err(RenderError::NoPages);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = builtin_font(&mut doc, "Helvetica");
    let bold = builtin_font(&mut doc, "Helvetica-Bold");

    let mut kids = Vec::with_capacity(pages.len());
    for canvas in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, canvas.into_content()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! {
                    FONT_REGULAR => regular,
                    FONT_BOLD => bold,
                },
            },
            "MediaBox" => Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ]),
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => Object::Array(kids),
            "Count" => Object::Integer(count),
        }),
    );

    let info_id = doc.add_object(dictionary! {
        "Title" => pdf_string(title),
        "Producer" => Object::string_literal("MedSign"),
    });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RenderError::Pdf(format!("save failed: {e}")))?;
    Ok(out)
}

/// Literal strings drawn on each page, in page order.
pub fn page_strings(bytes: &[u8]) -> Result<Vec<Vec<String>>, RenderError> {
    let doc = Document::load_mem(bytes)?;
    let mut pages = Vec::new();

    for (_, page_id) in doc.get_pages() {
        let data = doc.get_page_content(page_id)?;
        let content = Content::decode(&data)?;
        let mut strings = Vec::new();
        for op in &content.operations {
            match op.operator.as_str() {
                "Tj" | "'" | "\"" => collect_strings(&op.operands, &mut strings),
                "TJ" => {
                    for operand in &op.operands {
                        if let Object::Array(items) = operand {
                            collect_strings(items, &mut strings);
                        }
                    }
                }
                _ => {}
            }
        }
        pages.push(strings);
    }

    Ok(pages)
}

fn collect_strings(objects: &[Object], out: &mut Vec<String>) {
    for obj in objects {
        if let Object::String(bytes, _) = obj {
            out.push(decode_latin1(bytes));
        }
    }
}
