// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Raster images prepared for embedding as PDF image XObjects.

use std::io::Write;

use base64ct::{Base64, Encoding};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{DynamicImage, ImageFormat};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid data URL: {0}")]
    DataUrl(String),

    #[error("undecodable image: {0}")]
    Decode(String),

    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),
}

/// Flate-compressed 8-bit RGB samples plus an optional alpha mask.
#[derive(Debug, Clone)]
pub struct EmbeddableImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
    /// Becomes the image's `/SMask`.
    pub alpha: Option<Vec<u8>>,
}

/// Bytes of a `data:` URL. A bare base64 string is accepted too.
pub fn decode_data_url(input: &str) -> Result<Vec<u8>, ImageError> {
    let input = input.trim();
    let payload = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| ImageError::DataUrl("missing ',' separator".to_string()))?;
            if !header.ends_with(";base64") {
                return Err(ImageError::DataUrl("only base64 data URLs are supported".to_string()));
            }
            data
        }
        None => input,
    };

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Base64::decode_vec(&compact).map_err(|e| ImageError::DataUrl(e.to_string()))
}

/// Decode as PNG, then retry with format sniffing.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    match image::load_from_memory_with_format(bytes, ImageFormat::Png) {
        Ok(img) => Ok(img),
        Err(png_err) => image::load_from_memory(bytes).map_err(|sniff_err| {
            ImageError::Decode(format!("as PNG: {png_err}; sniffed: {sniff_err}"))
        }),
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, ImageError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

impl EmbeddableImage {
    pub fn from_image(img: &DynamicImage) -> Result<Self, ImageError> {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageError::Decode("image has no pixels".to_string()));
        }

        let pixels = rgba.as_raw();
        let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
        let mut alpha = Vec::with_capacity(pixels.len() / 4);
        for px in pixels.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
            alpha.push(px[3]);
        }

        // Fully opaque images need no mask
        let alpha = if img.color().has_alpha() && alpha.iter().any(|&a| a != u8::MAX) {
            Some(deflate(&alpha)?)
        } else {
            None
        };

        Ok(Self {
            width,
            height,
            rgb: deflate(&rgb)?,
            alpha,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        Self::from_image(&decode_image(bytes)?)
    }

    pub fn from_data_url(url: &str) -> Result<Self, ImageError> {
        Self::from_bytes(&decode_data_url(url)?)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    pub fn png(width: u32, height: u32, alpha: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([20, 40, 200, alpha]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    pub fn png_data_url(width: u32, height: u32) -> String {
        use base64::Engine;
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png(width, height, 255))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ZlibDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn data_url_and_bare_base64_decode() {
        assert_eq!(decode_data_url("data:image/png;base64,aGk=").unwrap(), b"hi");
        assert_eq!(decode_data_url("aG\nk=").unwrap(), b"hi");
        assert!(decode_data_url("data:image/png,hi").is_err());
        assert!(decode_data_url("data:image/png;base64").is_err());
    }

    #[test]
    fn opaque_png_has_no_mask() {
        let img = EmbeddableImage::from_data_url(&png_data_url(3, 2)).unwrap();
        assert_eq!((img.width, img.height), (3, 2));
        assert!(img.alpha.is_none());
        assert_eq!(inflate(&img.rgb).len(), 3 * 2 * 3);
    }

    #[test]
    fn transparency_becomes_a_mask() {
        let img = EmbeddableImage::from_bytes(&png(2, 2, 128)).unwrap();
        let mask = inflate(img.alpha.as_ref().unwrap());
        assert_eq!(mask, vec![128; 4]);
    }

    #[test]
    fn non_png_is_sniffed() {
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3])))
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();
        let img = EmbeddableImage::from_bytes(&jpeg).unwrap();
        assert_eq!((img.width, img.height), (4, 4));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            EmbeddableImage::from_bytes(b"not an image"),
            Err(ImageError::Decode(_))
        ));
    }
}
