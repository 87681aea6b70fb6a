//! Single page PDF-1.4 writer for sketch maps and quality reports: an
//! optional full-page JPEG, filled rectangles and Helvetica text.

use std::fmt::Write as _;

/// Text placed on the page. Coordinates are PDF points from the bottom
/// left corner of the page to the text baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub text: String,
}

/// Filled rectangle in points, color components in `0..=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilledRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rgb: [f64; 3],
}

/// JPEG stretched over the whole page.
#[derive(Debug, Clone, Copy)]
pub struct PdfImage<'a> {
    pub jpeg: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Page content, painted in field order.
#[derive(Debug, Clone)]
pub struct PdfPage<'a> {
    pub width_pt: f64,
    pub height_pt: f64,
    pub image: Option<PdfImage<'a>>,
    pub rects: Vec<FilledRect>,
    pub texts: Vec<TextItem>,
}

/// Encode text as a PDF literal string in WinAnsi encoding.
///
/// Characters outside Latin-1 become `?`.
fn literal(text: &str) -> Vec<u8> {
    let mut out = vec![b'('];
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            c if (c as u32) < 0x20 => out.push(b' '),
            c if (c as u32) <= 0xFF => out.push(c as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out.push(b')');
    out
}

fn content_stream(page: &PdfPage<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    if page.image.is_some() {
        out.extend_from_slice(
            format!("q {:.2} 0 0 {:.2} 0 0 cm /Im0 Do Q\n", page.width_pt, page.height_pt).as_bytes(),
        );
    }
    for r in &page.rects {
        out.extend_from_slice(
            format!(
                "{:.3} {:.3} {:.3} rg {:.2} {:.2} {:.2} {:.2} re f\n",
                r.rgb[0], r.rgb[1], r.rgb[2], r.x, r.y, r.width, r.height
            )
            .as_bytes(),
        );
    }
    if !page.texts.is_empty() {
        out.extend_from_slice(b"0 0 0 rg\n");
    }
    for item in &page.texts {
        // multi-line text is written line by line, 1.2 em apart
        for (i, line) in item.text.lines().enumerate() {
            let y = item.y - i as f64 * item.size * 1.2;
            out.extend_from_slice(
                format!("BT /F1 {:.1} Tf {:.2} {:.2} Td ", item.size, item.x, y).as_bytes(),
            );
            out.extend_from_slice(&literal(line));
            out.extend_from_slice(b" Tj ET\n");
        }
    }
    out
}

/// Serialise the page as a complete PDF document.
pub fn write_pdf(page: &PdfPage<'_>) -> Vec<u8> {
    let content = content_stream(page);
    // objects 1-5 are fixed, the image is object 6 when present
    let xobject = if page.image.is_some() {
        "/XObject << /Im0 6 0 R >> "
    } else {
        ""
    };
    let mut objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
             /Resources << {xobject}/Font << /F1 5 0 R >> >> /Contents 4 0 R >>",
            page.width_pt, page.height_pt
        )
        .into_bytes(),
        stream(format!("<< /Length {} >>", content.len()), &content),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_vec(),
    ];
    if let Some(image) = page.image {
        objects.push(stream(
            format!(
                "<< /Type /XObject /Subtype /Image /Width {} /Height {} \
                 /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>",
                image.width,
                image.height,
                image.jpeg.len()
            ),
            image.jpeg,
        ));
    }

    let mut out = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = write!(xref, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        objects.len() + 1
    );
    out.extend_from_slice(xref.as_bytes());
    out
}

fn stream(dict: String, data: &[u8]) -> Vec<u8> {
    let mut out = dict.into_bytes();
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream");
    out
}
