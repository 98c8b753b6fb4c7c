use crate::dataset::common_structs::{NormBbox, PixelBbox};

/// Digits kept after the decimal point for normalized coordinates
pub const NORM_PRECISION_DIGITS: i32 = 6;

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

fn round_to_precision(value: f64) -> f64 {
    let factor = 10f64.powi(NORM_PRECISION_DIGITS);
    (value * factor).round() / factor
}

/// Center/size fractions to pixel corners, clamped to the image. May return a degenerate box.
pub fn norm_to_pixel(bb: &NormBbox, img_width: u32, img_height: u32) -> PixelBbox {
    let (w, h) = (img_width as f64, img_height as f64);
    PixelBbox {
        class: bb.class,
        x_min: clamp((bb.center_x - bb.width / 2.) * w, 0., w),
        y_min: clamp((bb.center_y - bb.height / 2.) * h, 0., h),
        x_max: clamp((bb.center_x + bb.width / 2.) * w, 0., w),
        y_max: clamp((bb.center_y + bb.height / 2.) * h, 0., h),
    }
}

/// Pixel corners back to center/size fractions, clamped to [0, 1] and rounded
pub fn pixel_to_norm(bb: &PixelBbox, img_width: u32, img_height: u32) -> NormBbox {
    let (w, h) = (img_width as f64, img_height as f64);
    let norm = |value: f64| round_to_precision(clamp(value, 0., 1.));
    NormBbox {
        class: bb.class,
        center_x: norm((bb.x_min + bb.x_max) / 2. / w),
        center_y: norm((bb.y_min + bb.y_max) / 2. / h),
        width: norm((bb.x_max - bb.x_min) / w),
        height: norm((bb.y_max - bb.y_min) / h),
    }
}

/// False for zero-area boxes and boxes lying entirely outside the image
pub fn is_usable(bb: &PixelBbox, img_width: u32, img_height: u32) -> bool {
    if bb.x_min >= bb.x_max || bb.y_min >= bb.y_max {
        return false;
    }
    let (w, h) = (img_width as f64, img_height as f64);
    let outside = bb.x_max <= 0. || bb.y_max <= 0. || bb.x_min >= w || bb.y_min >= h;
    !outside
}

pub fn flip_bb_horizontally(bbs: &[PixelBbox], img_width: u32) -> Vec<PixelBbox> {
    let w = img_width as f64;
    bbs.iter()
        .map(|bb| PixelBbox {
            x_min: w - bb.x_max,
            x_max: w - bb.x_min,
            ..*bb
        })
        .collect()
}

/// Rotates the corners of every box about the image center by `theta` radians, clockwise
/// in image coordinates (y pointing down), and returns the axis aligned hull of the rotated
/// corners. Not clipped to the image.
pub fn rotate_bb_about_center(
    bbs: &[PixelBbox],
    img_width: u32,
    img_height: u32,
    theta: f64,
) -> Vec<PixelBbox> {
    let (cx, cy) = (img_width as f64 / 2., img_height as f64 / 2.);
    let (sin, cos) = theta.sin_cos();
    let rotate_point = |x: f64, y: f64| {
        let (dx, dy) = (x - cx, y - cy);
        (cx + cos * dx - sin * dy, cy + sin * dx + cos * dy)
    };
    bbs.iter()
        .map(|bb| {
            let corners = [
                rotate_point(bb.x_min, bb.y_min),
                rotate_point(bb.x_max, bb.y_min),
                rotate_point(bb.x_min, bb.y_max),
                rotate_point(bb.x_max, bb.y_max),
            ];
            let xs = corners.iter().map(|c| c.0);
            let ys = corners.iter().map(|c| c.1);
            PixelBbox {
                class: bb.class,
                x_min: xs.clone().fold(f64::INFINITY, f64::min),
                x_max: xs.fold(f64::NEG_INFINITY, f64::max),
                y_min: ys.clone().fold(f64::INFINITY, f64::min),
                y_max: ys.fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect()
}
