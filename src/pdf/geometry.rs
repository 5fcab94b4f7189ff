// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Page geometry.
//!
//! Capture coordinates are fractions of the page measured from the top-left
//! corner. PDF user space starts at the bottom-left, so the vertical axis is
//! flipped and the box height subtracted.

/// Default signature width as a fraction of page width.
pub const DEFAULT_WIDTH_FRACTION: f64 = 0.2;

/// Default signature height as a fraction of page height.
pub const DEFAULT_HEIGHT_FRACTION: f64 = 0.076;

/// Share of the page an evidence image may cover.
pub const EVIDENCE_FILL: f64 = 0.8;

/// US Letter, used when no MediaBox can be read.
pub const LETTER: PageBox = PageBox {
    left: 0.0,
    bottom: 0.0,
    width: 612.0,
    height: 792.0,
};

/// A page's MediaBox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl PageBox {
    /// Build from MediaBox corners, tolerating swapped corners.
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Option<Self> {
        let width = (x1 - x0).abs();
        let height = (y1 - y0).abs();
        if width <= 0.0 || height <= 0.0 || !width.is_finite() || !height.is_finite() {
            return None;
        }
        Some(Self {
            left: x0.min(x1),
            bottom: y0.min(y1),
            width,
            height,
        })
    }
}

/// Absolute rectangle in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Convert a top-left fractional box to PDF user space.
pub fn place(
    page: &PageBox,
    x: f64,
    y: f64,
    width: Option<f64>,
    height: Option<f64>,
) -> Placement {
    let w = width.unwrap_or(DEFAULT_WIDTH_FRACTION) * page.width;
    let h = height.unwrap_or(DEFAULT_HEIGHT_FRACTION) * page.height;
    Placement {
        x: page.left + x * page.width,
        y: page.bottom + page.height - y * page.height - h,
        width: w,
        height: h,
    }
}

/// Largest size with the image's aspect ratio inside `max_w` x `max_h`.
pub fn fit_within(image_w: f64, image_h: f64, max_w: f64, max_h: f64) -> (f64, f64) {
    if image_w <= 0.0 || image_h <= 0.0 {
        return (0.0, 0.0);
    }
    let scale = (max_w / image_w).min(max_h / image_h);
    (image_w * scale, image_h * scale)
}

/// Evidence image box: scaled into [`EVIDENCE_FILL`] of the page, centered.
pub fn evidence_placement(page: &PageBox, image_w: u32, image_h: u32) -> Placement {
    let (width, height) = fit_within(
        f64::from(image_w),
        f64::from(image_h),
        page.width * EVIDENCE_FILL,
        page.height * EVIDENCE_FILL,
    );
    Placement {
        x: page.left + (page.width - width) / 2.0,
        y: page.bottom + (page.height - height) / 2.0,
        width,
        height,
    }
}
