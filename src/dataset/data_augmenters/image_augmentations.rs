use crate::dataset::bbox_conversion::{flip_bb_horizontally, rotate_bb_about_center};
use crate::dataset::common_structs::PixelBbox;
use crate::error::AugmentError;
use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::{Rng, RngCore};

/// One step of an augmentation pipeline.
///
/// Geometric transforms must return exactly one box per input box, in the same order, moved
/// through the same spatial mapping as the pixels. The pipeline then decides which boxes
/// survive. Photometric transforms return the boxes untouched.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;
    /// Chance in [0, 1] of the transform being applied on a given attempt
    fn probability(&self) -> f64;
    fn is_geometric(&self) -> bool;
    fn apply(
        &self,
        img: RgbImage,
        bboxes: Vec<PixelBbox>,
        rng: &mut dyn RngCore,
    ) -> Result<(RgbImage, Vec<PixelBbox>), AugmentError>;
}

fn check_not_empty(name: &'static str, img: &RgbImage) -> Result<(), AugmentError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(AugmentError::Transform {
            name,
            reason: "image has no pixels".to_string(),
        });
    }
    Ok(())
}

pub struct HorizontalFlip {
    pub prob: f64,
}

impl Transform for HorizontalFlip {
    fn name(&self) -> &'static str {
        "horizontal_flip"
    }
    fn probability(&self) -> f64 {
        self.prob
    }
    fn is_geometric(&self) -> bool {
        true
    }
    fn apply(
        &self,
        img: RgbImage,
        bboxes: Vec<PixelBbox>,
        _rng: &mut dyn RngCore,
    ) -> Result<(RgbImage, Vec<PixelBbox>), AugmentError> {
        let flipped_bb = flip_bb_horizontally(&bboxes, img.width());
        Ok((imageops::flip_horizontal(&img), flipped_bb))
    }
}

/// Limits are fractions: 0.2 means brightness shifts of up to 20% of full scale and
/// contrast changes of up to 20%.
pub struct RandomBrightnessContrast {
    pub prob: f64,
    pub brightness_limit: f32,
    pub contrast_limit: f32,
}

impl Transform for RandomBrightnessContrast {
    fn name(&self) -> &'static str {
        "brightness_contrast"
    }
    fn probability(&self) -> f64 {
        self.prob
    }
    fn is_geometric(&self) -> bool {
        false
    }
    fn apply(
        &self,
        img: RgbImage,
        bboxes: Vec<PixelBbox>,
        rng: &mut dyn RngCore,
    ) -> Result<(RgbImage, Vec<PixelBbox>), AugmentError> {
        let brightness = symmetric_sample(rng, self.brightness_limit);
        let contrast = symmetric_sample(rng, self.contrast_limit);
        let brightened = imageops::brighten(&img, (brightness * 255.).round() as i32);
        Ok((imageops::contrast(&brightened, contrast * 100.), bboxes))
    }
}

/// Rotation by a uniform angle in [-limit, limit] degrees, keeping the image size and
/// filling uncovered corners with black
pub struct RandomRotation {
    pub prob: f64,
    pub limit_degrees: f32,
}

impl Transform for RandomRotation {
    fn name(&self) -> &'static str {
        "rotation"
    }
    fn probability(&self) -> f64 {
        self.prob
    }
    fn is_geometric(&self) -> bool {
        true
    }
    fn apply(
        &self,
        img: RgbImage,
        bboxes: Vec<PixelBbox>,
        rng: &mut dyn RngCore,
    ) -> Result<(RgbImage, Vec<PixelBbox>), AugmentError> {
        check_not_empty(self.name(), &img)?;
        let theta = symmetric_sample(rng, self.limit_degrees).to_radians();
        // imageproc rotates clockwise about (w/2, h/2), same mapping as the boxes
        let rotated = rotate_about_center(&img, theta, Interpolation::Bilinear, Rgb([0, 0, 0]));
        let rotated_bb = rotate_bb_about_center(&bboxes, img.width(), img.height(), theta as f64);
        Ok((rotated, rotated_bb))
    }
}

pub struct GaussianBlur {
    pub prob: f64,
    pub sigma_min: f32,
    pub sigma_max: f32,
}

impl Transform for GaussianBlur {
    fn name(&self) -> &'static str {
        "gaussian_blur"
    }
    fn probability(&self) -> f64 {
        self.prob
    }
    fn is_geometric(&self) -> bool {
        false
    }
    fn apply(
        &self,
        img: RgbImage,
        bboxes: Vec<PixelBbox>,
        rng: &mut dyn RngCore,
    ) -> Result<(RgbImage, Vec<PixelBbox>), AugmentError> {
        check_not_empty(self.name(), &img)?;
        let sigma = if self.sigma_max > self.sigma_min {
            rng.gen_range(self.sigma_min..self.sigma_max)
        } else {
            self.sigma_min
        };
        Ok((imageops::blur(&img, sigma), bboxes))
    }
}

// Reasonable values are -30 and +30
pub struct RandomHueRotation {
    pub prob: f64,
    pub limit_degrees: i32,
}

impl Transform for RandomHueRotation {
    fn name(&self) -> &'static str {
        "hue_rotation"
    }
    fn probability(&self) -> f64 {
        self.prob
    }
    fn is_geometric(&self) -> bool {
        false
    }
    fn apply(
        &self,
        img: RgbImage,
        bboxes: Vec<PixelBbox>,
        rng: &mut dyn RngCore,
    ) -> Result<(RgbImage, Vec<PixelBbox>), AugmentError> {
        let limit = self.limit_degrees.abs();
        let value = rng.gen_range(-limit..=limit);
        Ok((imageops::huerotate(&img, value), bboxes))
    }
}

fn symmetric_sample(rng: &mut dyn RngCore, limit: f32) -> f32 {
    let limit = limit.abs();
    if limit == 0. {
        return 0.;
    }
    rng.gen_range(-limit..=limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn marked_image() -> RgbImage {
        // white square at x 10..20, y 4..8 on black
        RgbImage::from_fn(40, 30, |x, y| {
            if (10..20).contains(&x) && (4..8).contains(&y) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    fn square_box() -> PixelBbox {
        PixelBbox {
            class: 0,
            x_min: 10.,
            y_min: 4.,
            x_max: 20.,
            y_max: 8.,
        }
    }

    #[test]
    fn flip_keeps_box_on_content() {
        let mut rng = StdRng::seed_from_u64(0);
        let (img, bbs) = HorizontalFlip { prob: 1. }
            .apply(marked_image(), vec![square_box()], &mut rng)
            .unwrap();
        assert_eq!(bbs[0].x_min, 20.);
        assert_eq!(bbs[0].x_max, 30.);
        assert_eq!(img.get_pixel(20, 4), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(29, 7), &Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(19, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn zero_rotation_is_identity_for_boxes() {
        let mut rng = StdRng::seed_from_u64(3);
        let (img, bbs) = RandomRotation {
            prob: 1.,
            limit_degrees: 0.,
        }
        .apply(marked_image(), vec![square_box()], &mut rng)
        .unwrap();
        assert_eq!(img.dimensions(), (40, 30));
        assert!((bbs[0].x_min - 10.).abs() < 1e-9);
        assert!((bbs[0].y_max - 8.).abs() < 1e-9);
    }

    #[test]
    fn rotation_keeps_size_and_grows_box_hull() {
        let mut rng = StdRng::seed_from_u64(11);
        let original = square_box();
        let (img, bbs) = RandomRotation {
            prob: 1.,
            limit_degrees: 25.,
        }
        .apply(marked_image(), vec![original], &mut rng)
        .unwrap();
        assert_eq!(img.dimensions(), (40, 30));
        assert_eq!(bbs.len(), 1);
        assert!(bbs[0].area() >= original.area() - 1e-6);
    }

    #[test]
    fn photometric_transforms_leave_boxes_alone() {
        let mut rng = StdRng::seed_from_u64(5);
        let transforms: Vec<Box<dyn Transform>> = vec![
            Box::new(RandomBrightnessContrast {
                prob: 1.,
                brightness_limit: 0.2,
                contrast_limit: 0.2,
            }),
            Box::new(GaussianBlur {
                prob: 1.,
                sigma_min: 0.5,
                sigma_max: 1.5,
            }),
            Box::new(RandomHueRotation {
                prob: 1.,
                limit_degrees: 20,
            }),
        ];
        for transform in &transforms {
            let (img, bbs) = transform
                .apply(marked_image(), vec![square_box()], &mut rng)
                .unwrap();
            assert!(!transform.is_geometric());
            assert_eq!(img.dimensions(), (40, 30));
            assert_eq!(bbs, vec![square_box()]);
        }
    }

    #[test]
    fn empty_image_is_a_transform_failure() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = RandomRotation {
            prob: 1.,
            limit_degrees: 10.,
        }
        .apply(RgbImage::new(0, 0), vec![], &mut rng);
        assert!(matches!(result, Err(AugmentError::Transform { .. })));
    }
}
