// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # PDF Signer
//!
//! Stamps signature images onto existing pages and appends an identity
//! evidence page.
//!
//! ## Per entry
//!
//! 1. Resolve the 1-based page; out of range skips the entry.
//! 2. Convert the fractional box to user space ([`place`]).
//! 3. Decode the image. An undecodable image skips the entry only.
//! 4. Append a content stream drawing the image and three 8pt Helvetica
//!    lines below it: signer, IP address, UTC timestamp.
//!
//! Existing page content is wrapped in `q`/`Q` so its graphics state cannot
//! leak into the stamp. A document that does not load is fatal; every other
//! failure degrades to skipping that piece.

use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::geometry::{evidence_placement, place, PageBox, Placement, LETTER};
use super::raster::EmbeddableImage;

/// Title drawn on the appended evidence page.
pub const EVIDENCE_TITLE: &str = "Identity Verification Document";

/// Attestation text size in points.
const TEXT_SIZE: f64 = 8.0;
const LINE_HEIGHT: f64 = 9.5;
const TITLE_SIZE: f64 = 16.0;

const FONT_RESOURCE: &str = "IdsHelv";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF could not be loaded: {0}")]
    DocumentUnreadable(String),

    #[error("PDF structure error: {0}")]
    Structure(String),

    #[error("PDF could not be written: {0}")]
    Write(String),
}

impl From<lopdf::Error> for PdfError {
    fn from(e: lopdf::Error) -> Self {
        Self::Structure(e.to_string())
    }
}

/// One signature to place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureEntry {
    /// 1-based page number.
    #[serde(alias = "pageNumber")]
    pub page: u32,
    /// Fraction of page width from the left edge.
    pub x: f64,
    /// Fraction of page height from the top edge.
    pub y: f64,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    /// Signature image as a data URL.
    #[serde(alias = "signatureData", alias = "image")]
    pub image_data_url: String,
    /// Signer name for the attestation line.
    pub name: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub placeholder_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SignedPdf {
    pub bytes: Vec<u8>,
    pub applied: usize,
    pub skipped: Vec<SkippedEntry>,
    pub evidence_page_appended: bool,
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// PDF literal string for a WinAnsi font.
///
/// Printable ASCII passes through; U+00A0..=U+00FF is written as an octal
/// escape, where WinAnsi and Latin-1 agree. Anything else becomes `?`.
fn pdf_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\u{a0}'..='\u{ff}' => out.push_str(&format!("\\{:03o}", u32::from(c))),
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

fn name_obj(name: &str) -> Object {
    Object::Name(name.as_bytes().to_vec())
}

fn int(value: i64) -> Object {
    Object::Integer(value)
}

/// Signature entries decoded one element at a time from a JSON array.
///
/// An element that does not decode becomes a [`SkippedEntry`] at its
/// position instead of failing the batch.
#[derive(Debug, Clone, Default)]
pub struct SignatureBatch {
    entries: Vec<SignatureEntry>,
    /// Position of each decoded entry in the submitted array.
    positions: Vec<usize>,
    rejected: Vec<SkippedEntry>,
}

impl SignatureBatch {
    /// Fails only when `raw` is not a JSON array.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let values: Vec<serde_json::Value> = serde_json::from_str(raw)?;
        let mut batch = Self::default();
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<SignatureEntry>(value) {
                Ok(entry) => {
                    batch.entries.push(entry);
                    batch.positions.push(index);
                }
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed signature entry");
                    batch.rejected.push(SkippedEntry {
                        index,
                        reason: format!("malformed entry: {e}"),
                    });
                }
            }
        }
        Ok(batch)
    }

    /// Number of submitted elements, decoded or not.
    pub fn len(&self) -> usize {
        self.entries.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded entries paired with their submitted position.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &SignatureEntry)> {
        self.positions.iter().copied().zip(self.entries.iter())
    }
}

impl From<Vec<SignatureEntry>> for SignatureBatch {
    fn from(entries: Vec<SignatureEntry>) -> Self {
        Self {
            positions: (0..entries.len()).collect(),
            entries,
            rejected: Vec::new(),
        }
    }
}

/// Stateless signer; all state lives in the document being signed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfSigner;

impl PdfSigner {
    /// [`Self::sign`] over a decoded batch. Skipped indices refer to the
    /// submitted array and include elements that failed to decode.
    pub fn sign_batch(
        &self,
        pdf: &[u8],
        batch: &SignatureBatch,
        evidence_image: Option<&[u8]>,
    ) -> Result<SignedPdf, PdfError> {
        let mut signed = self.sign(pdf, &batch.entries, evidence_image)?;
        for skipped in &mut signed.skipped {
            skipped.index = batch.positions[skipped.index];
        }
        signed.skipped.extend(batch.rejected.iter().cloned());
        signed.skipped.sort_by_key(|s| s.index);
        Ok(signed)
    }

    pub fn sign(
        &self,
        pdf: &[u8],
        entries: &[SignatureEntry],
        evidence_image: Option<&[u8]>,
    ) -> Result<SignedPdf, PdfError> {
        let mut doc =
            Document::load_mem(pdf).map_err(|e| PdfError::DocumentUnreadable(e.to_string()))?;

        let pages = doc.get_pages();
        let font_id = doc.add_object(helvetica());

        let mut applied = 0;
        let mut skipped = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let skip = |reason: String| {
                warn!(index, page = entry.page, %reason, "Skipping signature entry");
                SkippedEntry { index, reason }
            };

            if let Err(reason) = validate_entry(entry) {
                skipped.push(skip(reason));
                continue;
            }
            let Some(&page_id) = pages.get(&entry.page) else {
                skipped.push(skip(format!(
                    "page {} out of range (document has {})",
                    entry.page,
                    pages.len()
                )));
                continue;
            };
            let image = match EmbeddableImage::from_data_url(&entry.image_data_url) {
                Ok(image) => image,
                Err(e) => {
                    skipped.push(skip(e.to_string()));
                    continue;
                }
            };

            let page_box = media_box(&doc, page_id).unwrap_or(LETTER);
            let placement = place(&page_box, entry.x, entry.y, entry.width, entry.height);
            let image_name = format!("IdsSig{index}");
            let image_id = add_image(&mut doc, &image);

            let content = stamp_content(&image_name, &placement, entry);
            if let Err(e) = attach(&mut doc, page_id, &image_name, image_id, font_id, content) {
                skipped.push(skip(e.to_string()));
                continue;
            }
            applied += 1;
        }

        let evidence_page_appended = match evidence_image {
            Some(bytes) => match append_evidence_page(&mut doc, bytes, font_id) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Evidence page not appended");
                    false
                }
            },
            None => false,
        };

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|e| PdfError::Write(e.to_string()))?;

        debug!(
            applied,
            skipped = skipped.len(),
            evidence_page_appended,
            size = bytes.len(),
            "PDF signed"
        );

        Ok(SignedPdf {
            bytes,
            applied,
            skipped,
            evidence_page_appended,
        })
    }
}

fn validate_entry(entry: &SignatureEntry) -> Result<(), String> {
    if entry.page == 0 {
        return Err("page is 1-based".to_string());
    }
    for (name, value) in [("x", entry.x), ("y", entry.y)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(format!("{name} must be a fraction in [0, 1]"));
        }
    }
    for (name, value) in [("width", entry.width), ("height", entry.height)] {
        if let Some(v) = value {
            if !(v > 0.0 && v <= 1.0) {
                return Err(format!("{name} must be a fraction in (0, 1]"));
            }
        }
    }
    Ok(())
}

fn helvetica() -> Dictionary {
    let mut font = Dictionary::new();
    font.set("Type", name_obj("Font"));
    font.set("Subtype", name_obj("Type1"));
    font.set("BaseFont", name_obj("Helvetica"));
    font.set("Encoding", name_obj("WinAnsiEncoding"));
    font
}

fn add_image(doc: &mut Document, image: &EmbeddableImage) -> ObjectId {
    let base = |color_space: &str| {
        let mut dict = Dictionary::new();
        dict.set("Type", name_obj("XObject"));
        dict.set("Subtype", name_obj("Image"));
        dict.set("Width", int(i64::from(image.width)));
        dict.set("Height", int(i64::from(image.height)));
        dict.set("ColorSpace", name_obj(color_space));
        dict.set("BitsPerComponent", int(8));
        dict.set("Filter", name_obj("FlateDecode"));
        dict
    };

    let mut dict = base("DeviceRGB");
    if let Some(alpha) = &image.alpha {
        let mask_id = doc.add_object(Stream::new(base("DeviceGray"), alpha.clone()));
        dict.set("SMask", Object::Reference(mask_id));
    }
    doc.add_object(Stream::new(dict, image.rgb.clone()))
}

fn stamp_content(image_name: &str, at: &Placement, entry: &SignatureEntry) -> Vec<u8> {
    let signed_at = entry.timestamp.unwrap_or_else(Utc::now);
    let lines = [
        format!("Signed by: {}", entry.name),
        format!(
            "IP Address: {}",
            entry.ip_address.as_deref().unwrap_or("unknown")
        ),
        format!("Date: {}", signed_at.format(TIMESTAMP_FORMAT)),
    ];

    let mut ops = format!(
        "q\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/{image_name} Do\nQ\n",
        at.width, at.height, at.x, at.y
    );
    ops.push_str(&format!("BT\n/{FONT_RESOURCE} {TEXT_SIZE} Tf\n0 g\n"));
    for (i, line) in lines.iter().enumerate() {
        let baseline = at.y - LINE_HEIGHT * (i as f64 + 1.0);
        ops.push_str(&format!(
            "1 0 0 1 {:.2} {:.2} Tm\n{} Tj\n",
            at.x,
            baseline,
            pdf_text(line)
        ));
    }
    ops.push_str("ET\n");
    ops.into_bytes()
}

/// MediaBox of a page, following `/Parent` inheritance.
fn media_box(doc: &Document, page_id: ObjectId) -> Option<PageBox> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(obj) = current.get(b"MediaBox") {
            let obj = match obj {
                Object::Reference(id) => doc.get_object(*id).ok()?,
                other => other,
            };
            let values: Vec<f64> = obj.as_array().ok()?.iter().filter_map(number).collect();
            if let [x0, y0, x1, y1] = values[..] {
                return PageBox::from_corners(x0, y0, x1, y1);
            }
            return None;
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Resources dictionary in effect for a page, resolved and owned.
fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = doc.get_dictionary(page_id).ok();
    for _ in 0..32 {
        let Some(dict) = current else { break };
        match dict.get(b"Resources") {
            Ok(Object::Dictionary(res)) => return res.clone(),
            Ok(Object::Reference(id)) => {
                return doc.get_dictionary(*id).cloned().unwrap_or_else(|_| Dictionary::new());
            }
            _ => {}
        }
        current = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id))
            .ok();
    }
    Dictionary::new()
}

/// Sub-dictionary of resources (`XObject`, `Font`), resolved and owned.
fn resource_entry(doc: &Document, resources: &Dictionary, key: &[u8]) -> Dictionary {
    match resources.get(key) {
        Ok(Object::Dictionary(d)) => d.clone(),
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_else(|_| Dictionary::new()),
        _ => Dictionary::new(),
    }
}

/// Register the image and font on the page and append `content`.
fn attach(
    doc: &mut Document,
    page_id: ObjectId,
    image_name: &str,
    image_id: ObjectId,
    font_id: ObjectId,
    content: Vec<u8>,
) -> Result<(), PdfError> {
    let mut resources = page_resources(doc, page_id);
    let mut xobjects = resource_entry(doc, &resources, b"XObject");
    xobjects.set(image_name, Object::Reference(image_id));
    let mut fonts = resource_entry(doc, &resources, b"Font");
    fonts.set(FONT_RESOURCE, Object::Reference(font_id));
    resources.set("XObject", Object::Dictionary(xobjects));
    resources.set("Font", Object::Dictionary(fonts));

    let existing: Vec<Object> = match doc.get_dictionary(page_id)?.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            // Some writers store the array indirectly
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        _ => Vec::new(),
    };

    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut stamp = b"Q\n".to_vec();
    stamp.extend_from_slice(&content);
    let stamp_id = doc.add_object(Stream::new(Dictionary::new(), stamp));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(stamp_id));

    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Array(contents));
    Ok(())
}

fn append_evidence_page(doc: &mut Document, image: &[u8], font_id: ObjectId) -> Result<(), PdfError> {
    let img = EmbeddableImage::from_bytes(image)
        .map_err(|e| PdfError::Structure(format!("evidence image: {e}")))?;

    let pages = doc.get_pages();
    let page_box = pages
        .values()
        .next_back()
        .and_then(|&id| media_box(doc, id))
        .unwrap_or(LETTER);

    let root_id = doc.trailer.get(b"Root")?.as_reference()?;
    let pages_id = doc.get_dictionary(root_id)?.get(b"Pages")?.as_reference()?;

    let image_id = add_image(doc, &img);
    let at = evidence_placement(&page_box, img.width, img.height);

    let title_x = page_box.left + 50.0;
    let title_y = page_box.bottom + page_box.height - 50.0;
    let content = format!(
        "BT\n/{FONT_RESOURCE} {TITLE_SIZE} Tf\n0 g\n1 0 0 1 {title_x:.2} {title_y:.2} Tm\n{} Tj\nET\nq\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/IdsEvidence Do\nQ\n",
        pdf_text(EVIDENCE_TITLE),
        at.width,
        at.height,
        at.x,
        at.y,
    );
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

    let mut xobjects = Dictionary::new();
    xobjects.set("IdsEvidence", Object::Reference(image_id));
    let mut fonts = Dictionary::new();
    fonts.set(FONT_RESOURCE, Object::Reference(font_id));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));
    resources.set("Font", Object::Dictionary(fonts));

    let mut page = Dictionary::new();
    page.set("Type", name_obj("Page"));
    page.set("Parent", Object::Reference(pages_id));
    page.set(
        "MediaBox",
        Object::Array(vec![
            int(page_box.left.round() as i64),
            int(page_box.bottom.round() as i64),
            int((page_box.left + page_box.width).round() as i64),
            int((page_box.bottom + page_box.height).round() as i64),
        ]),
    );
    page.set("Resources", Object::Dictionary(resources));
    page.set("Contents", Object::Reference(content_id));
    let page_id = doc.add_object(page);

    let tree = doc.get_object_mut(pages_id)?.as_dict_mut()?;
    tree.get_mut(b"Kids")?.as_array_mut()?.push(Object::Reference(page_id));
    let count = tree.get(b"Count").ok().and_then(number).unwrap_or(0.0) as i64;
    tree.set("Count", int(count + 1));
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{Dictionary, Document, Object, Stream};

    /// Minimal PDF with `pages` Letter pages.
    pub fn blank_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for _ in 0..pages {
            let content_id = doc.add_object(Stream::new(Dictionary::new(), b"0 0 m\n".to_vec()));
            let mut page = Dictionary::new();
            page.set("Type", Object::Name(b"Page".to_vec()));
            page.set("Parent", Object::Reference(pages_id));
            page.set("Contents", Object::Reference(content_id));
            kids.push(Object::Reference(doc.add_object(page)));
        }

        let mut tree = Dictionary::new();
        tree.set("Type", Object::Name(b"Pages".to_vec()));
        tree.set("Count", Object::Integer(kids.len() as i64));
        tree.set("Kids", Object::Array(kids));
        tree.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ]),
        );
        doc.objects.insert(pages_id, Object::Dictionary(tree));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }
}
