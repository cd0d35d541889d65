//! Minimal PDF 1.4 writer: one full-page JPEG image per page.
//!
//! Output carries no timestamps or random IDs, so equal input gives
//! byte-identical documents.

use std::fmt::Write as _;

/// One page: an already-encoded JPEG and its pixel size
pub struct PdfPage {
    pub jpeg: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

/// Page size in points plus the pages to place on it
pub struct PdfDocument<'a> {
    pub title: &'a str,
    pub page_width_pt: f64,
    pub page_height_pt: f64,
    pub pages: &'a [PdfPage],
}

struct Writer {
    out: Vec<u8>,
    offsets: Vec<usize>,
}

impl Writer {
    fn begin_object(&mut self, id: usize) {
        // Objects are written in id order, so ids double as indexes
        debug_assert_eq!(self.offsets.len() + 1, id);
        self.offsets.push(self.out.len());
        self.out.extend_from_slice(format!("{id} 0 obj\n").as_bytes());
    }

    fn object(&mut self, id: usize, body: &str) {
        self.begin_object(id);
        self.out.extend_from_slice(body.as_bytes());
        self.out.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) {
        self.begin_object(id);
        self.out
            .extend_from_slice(format!("<< {dict} /Length {} >>\nstream\n", data.len()).as_bytes());
        self.out.extend_from_slice(data);
        self.out.extend_from_slice(b"\nendstream\nendobj\n");
    }
}

fn number(value: f64) -> String {
    let text = format!("{value:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// PDF text string: literal for printable ASCII, UTF-16BE hex otherwise
fn text_string(text: &str) -> String {
    if text.chars().all(|c| (' '..='~').contains(&c)) {
        let mut out = String::from("(");
        for c in text.chars() {
            if matches!(c, '(' | ')' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out.push(')');
        out
    } else {
        let mut out = String::from("<FEFF");
        for unit in text.encode_utf16() {
            let _ = write!(out, "{unit:04X}");
        }
        out.push('>');
        out
    }
}

/// Serialize the document
pub fn write_pdf(doc: &PdfDocument<'_>) -> Vec<u8> {
    let mut w = Writer {
        out: Vec::new(),
        offsets: Vec::new(),
    };
    w.out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");

    let width = number(doc.page_width_pt);
    let height = number(doc.page_height_pt);
    let page_ids: Vec<usize> = (0..doc.pages.len()).map(|i| 3 + i * 3).collect();
    let info_id = 3 + doc.pages.len() * 3;

    w.object(1, "<< /Type /Catalog /Pages 2 0 R >>");

    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    w.object(
        2,
        &format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", doc.pages.len()),
    );

    for (page, &page_id) in doc.pages.iter().zip(&page_ids) {
        let content_id = page_id + 1;
        let image_id = page_id + 2;

        w.object(
            page_id,
            &format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {width} {height}] \
                 /Resources << /XObject << /Im0 {image_id} 0 R >> /ProcSet [/PDF /ImageC] >> \
                 /Contents {content_id} 0 R >>"
            ),
        );

        let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im0 Do\nQ\n");
        w.stream(content_id, "", content.as_bytes());

        w.stream(
            image_id,
            &format!(
                "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
                 /BitsPerComponent 8 /Filter /DCTDecode",
                page.width_px, page.height_px
            ),
            &page.jpeg,
        );
    }

    w.object(
        info_id,
        &format!(
            "<< /Title {} /Producer (Strongbox) >>",
            text_string(doc.title)
        ),
    );

    let xref_offset = w.out.len();
    let size = w.offsets.len() + 1;
    let mut xref = format!("xref\n0 {size}\n0000000000 65535 f \n");
    for offset in &w.offsets {
        let _ = write!(xref, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {size} /Root 1 0 R /Info {info_id} 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n"
    );
    w.out.extend_from_slice(xref.as_bytes());
    w.out
}
