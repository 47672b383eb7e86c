use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use crate::hand::Hand;
use crate::NUM_LANDMARKS;

/// A hand whose wrist is at `(x, y, z)` and whose other landmarks fan out to the lower right.
pub fn hand_at(x: f32, y: f32, z: f32) -> Hand {
    let mut landmarks = [[0.0; 3]; NUM_LANDMARKS];
    for (i, lm) in landmarks.iter_mut().enumerate() {
        let i = i as f32;
        *lm = [x + i * 0.01, y + i * 0.005, z - i * 0.001];
    }
    Hand::new(landmarks)
}

/// Encodes a single-color PNG.
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}
