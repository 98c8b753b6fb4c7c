use super::image_augmentations::{
    GaussianBlur, HorizontalFlip, RandomBrightnessContrast, RandomHueRotation, RandomRotation,
    Transform,
};
use crate::config::TransformSettings;
use crate::dataset::bbox_conversion::is_usable;
use crate::dataset::common_structs::PixelBbox;
use crate::error::AugmentError;
use image::RgbImage;
use rand::{Rng, RngCore};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Result of an attempt that did not fail
#[derive(Debug, Clone)]
pub enum AugmentOutcome {
    Augmented {
        img: RgbImage,
        bboxes: Vec<PixelBbox>,
        dropped: usize,
    },
    /// Every box was lost along the way; the image is of no use
    Empty { dropped: usize },
}

/// An ordered list of transforms, each applied with its own probability
pub struct AugmentationPipeline {
    transforms: Vec<Box<dyn Transform>>,
    min_visibility: f64,
}

impl AugmentationPipeline {
    pub fn new(transforms: Vec<Box<dyn Transform>>, min_visibility: f64) -> AugmentationPipeline {
        AugmentationPipeline {
            transforms,
            min_visibility,
        }
    }

    /// Flip, brightness/contrast, rotation, blur and hue rotation, in that order
    pub fn from_settings(
        settings: &TransformSettings,
        min_visibility: f64,
    ) -> AugmentationPipeline {
        let transforms: Vec<Box<dyn Transform>> = vec![
            Box::new(HorizontalFlip {
                prob: settings.mirror_prob,
            }),
            Box::new(RandomBrightnessContrast {
                prob: settings.brightness_contrast_prob,
                brightness_limit: settings.brightness_limit,
                contrast_limit: settings.contrast_limit,
            }),
            Box::new(RandomRotation {
                prob: settings.rotate_prob,
                limit_degrees: settings.rotate_limit_degrees,
            }),
            Box::new(GaussianBlur {
                prob: settings.blur_prob,
                sigma_min: settings.blur_sigma_min,
                sigma_max: settings.blur_sigma_max,
            }),
            Box::new(RandomHueRotation {
                prob: settings.hue_prob,
                limit_degrees: settings.hue_limit_degrees,
            }),
        ];
        AugmentationPipeline::new(transforms, min_visibility)
    }

    pub fn transform_names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Runs every transform whose coin flip succeeds. After each geometric step the boxes
    /// are clipped to the image, and boxes that became unusable or kept less than
    /// `min_visibility` of their previous area are dropped.
    pub fn apply(
        &self,
        img: RgbImage,
        bboxes: &[PixelBbox],
        rng: &mut dyn RngCore,
    ) -> Result<AugmentOutcome, AugmentError> {
        let mut img = img;
        let mut bboxes = bboxes.to_vec();
        let mut dropped = 0;
        if bboxes.is_empty() {
            return Ok(AugmentOutcome::Empty { dropped });
        }

        for transform in &self.transforms {
            let name = transform.name();
            let prob = transform.probability();
            if !(0. ..=1.).contains(&prob) {
                return Err(AugmentError::Transform {
                    name,
                    reason: format!("probability {} is outside [0, 1]", prob),
                });
            }
            if !rng.gen_bool(prob) {
                continue;
            }
            let before = bboxes.clone();
            let applied = catch_unwind(AssertUnwindSafe(|| {
                transform.apply(img.clone(), before.clone(), &mut *rng)
            }))
            .map_err(|_| AugmentError::Panicked { name })??;
            let (new_img, new_bboxes) = applied;

            if !transform.is_geometric() {
                img = new_img;
                continue;
            }
            if new_bboxes.len() != before.len() {
                return Err(AugmentError::Transform {
                    name,
                    reason: format!(
                        "returned {} boxes for {} inputs",
                        new_bboxes.len(),
                        before.len()
                    ),
                });
            }
            let (width, height) = new_img.dimensions();
            let mut kept = vec![];
            for (old, new) in before.iter().zip(new_bboxes.iter()) {
                let clipped = new.clipped(width, height);
                let visible = clipped.area() >= self.min_visibility * old.area();
                if is_usable(new, width, height) && is_usable(&clipped, width, height) && visible {
                    kept.push(clipped);
                } else {
                    log::debug!("{} dropped a class {} box", name, old.class);
                    dropped += 1;
                }
            }
            img = new_img;
            bboxes = kept;
            if bboxes.is_empty() {
                return Ok(AugmentOutcome::Empty { dropped });
            }
        }
        Ok(AugmentOutcome::Augmented {
            img,
            bboxes,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Moves every box by a fixed offset
    struct Shift {
        dx: f64,
    }

    impl Transform for Shift {
        fn name(&self) -> &'static str {
            "shift"
        }
        fn probability(&self) -> f64 {
            1.
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
            let moved = bboxes
                .into_iter()
                .map(|bb| PixelBbox {
                    x_min: bb.x_min + self.dx,
                    x_max: bb.x_max + self.dx,
                    ..bb
                })
                .collect();
            Ok((img, moved))
        }
    }

    struct Exploding;

    impl Transform for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }
        fn probability(&self) -> f64 {
            1.
        }
        fn is_geometric(&self) -> bool {
            false
        }
        fn apply(
            &self,
            _img: RgbImage,
            _bboxes: Vec<PixelBbox>,
            _rng: &mut dyn RngCore,
        ) -> Result<(RgbImage, Vec<PixelBbox>), AugmentError> {
            panic!("kernel blew up")
        }
    }

    fn bb(class: u32, x_min: f64, x_max: f64) -> PixelBbox {
        PixelBbox {
            class,
            x_min,
            y_min: 10.,
            x_max,
            y_max: 20.,
        }
    }

    #[test]
    fn boxes_pushed_out_of_frame_are_dropped() {
        let pipeline = AugmentationPipeline::new(vec![Box::new(Shift { dx: 85. })], 0.1);
        let mut rng = StdRng::seed_from_u64(1);
        // first box ends up 95..105 (half visible), second 110..120 (gone)
        let outcome = pipeline
            .apply(
                RgbImage::new(100, 50),
                &[bb(0, 10., 20.), bb(1, 25., 35.)],
                &mut rng,
            )
            .unwrap();
        match outcome {
            AugmentOutcome::Augmented {
                bboxes, dropped, ..
            } => {
                assert_eq!(dropped, 1);
                assert_eq!(bboxes.len(), 1);
                assert_eq!(bboxes[0].class, 0);
                assert_eq!(bboxes[0].x_max, 100.);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn low_visibility_boxes_are_dropped() {
        let pipeline = AugmentationPipeline::new(vec![Box::new(Shift { dx: 89.5 })], 0.1);
        let mut rng = StdRng::seed_from_u64(1);
        // 10 px wide box keeps 0.5 px, 5% of its area
        let outcome = pipeline
            .apply(RgbImage::new(100, 50), &[bb(0, 10., 20.)], &mut rng)
            .unwrap();
        assert!(matches!(outcome, AugmentOutcome::Empty { dropped: 1 }));
    }

    #[test]
    fn panicking_transform_is_reported_not_propagated() {
        let pipeline = AugmentationPipeline::new(vec![Box::new(Exploding)], 0.1);
        let mut rng = StdRng::seed_from_u64(1);
        let result = pipeline.apply(RgbImage::new(10, 10), &[bb(0, 1., 5.)], &mut rng);
        assert!(matches!(result, Err(AugmentError::Panicked { name: "exploding" })));
    }

    #[test]
    fn out_of_range_probability_is_an_error() {
        let settings = TransformSettings {
            rotate_prob: 1.5,
            ..TransformSettings::default()
        };
        let pipeline = AugmentationPipeline::from_settings(&settings, 0.1);
        let mut rng = StdRng::seed_from_u64(1);
        let result = pipeline.apply(RgbImage::new(10, 10), &[bb(0, 1., 5.)], &mut rng);
        assert!(matches!(
            result,
            Err(AugmentError::Transform {
                name: "rotation",
                ..
            })
        ));
    }

    #[test]
    fn default_pipeline_keeps_centered_box() {
        let settings = TransformSettings {
            mirror_prob: 1.,
            brightness_contrast_prob: 1.,
            rotate_prob: 1.,
            blur_prob: 1.,
            hue_prob: 1.,
            ..TransformSettings::default()
        };
        let pipeline = AugmentationPipeline::from_settings(&settings, 0.1);
        assert_eq!(pipeline.transform_names().len(), 5);
        let centered = PixelBbox {
            class: 2,
            x_min: 24.,
            y_min: 24.,
            x_max: 40.,
            y_max: 40.,
        };
        for seed in 0..5 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = pipeline
                .apply(RgbImage::new(64, 64), &[centered], &mut rng)
                .unwrap();
            match outcome {
                AugmentOutcome::Augmented { img, bboxes, .. } => {
                    assert_eq!(img.dimensions(), (64, 64));
                    assert_eq!(bboxes.len(), 1);
                    let b = bboxes[0];
                    assert!(b.x_min >= 0. && b.y_min >= 0. && b.x_max <= 64. && b.y_max <= 64.);
                    assert!(b.x_min < b.x_max && b.y_min < b.y_max);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn same_seed_same_result() {
        let pipeline = AugmentationPipeline::from_settings(&TransformSettings::default(), 0.1);
        let boxes = [PixelBbox {
            class: 0,
            x_min: 5.,
            y_min: 5.,
            x_max: 30.,
            y_max: 20.,
        }];
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            match pipeline.apply(RgbImage::new(48, 32), &boxes, &mut rng).unwrap() {
                AugmentOutcome::Augmented { bboxes, .. } => bboxes,
                AugmentOutcome::Empty { .. } => vec![],
            }
        };
        assert_eq!(run(7), run(7));
    }
}
