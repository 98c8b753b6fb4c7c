use serde::{Deserialize, Serialize};
/// Frequently used structs in the provided label loaders/augmenters/balancer

/// A Bounding Box in the YOLO text format: center and size as fractions of the image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormBbox {
    pub class: u32,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

/// A Bounding Box in pixel units, given by its corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBbox {
    pub class: u32,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl PixelBbox {
    pub fn area(&self) -> f64 {
        (self.x_max - self.x_min).max(0.) * (self.y_max - self.y_min).max(0.)
    }

    /// Same box with the corners clamped to [0, img_width] x [0, img_height]
    pub fn clipped(&self, img_width: u32, img_height: u32) -> PixelBbox {
        let (w, h) = (img_width as f64, img_height as f64);
        PixelBbox {
            class: self.class,
            x_min: self.x_min.max(0.).min(w),
            y_min: self.y_min.max(0.).min(h),
            x_max: self.x_max.max(0.).min(w),
            y_max: self.y_max.max(0.).min(h),
        }
    }
}

/// All the boxes of one image, in the order they appear in its label file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub bboxes: Vec<NormBbox>,
}

impl Annotation {
    pub fn new(bboxes: Vec<NormBbox>) -> Annotation {
        Annotation { bboxes }
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    pub fn count_class(&self, class: u32) -> usize {
        self.bboxes.iter().filter(|bb| bb.class == class).count()
    }

    pub fn contains_class(&self, class: u32) -> bool {
        self.bboxes.iter().any(|bb| bb.class == class)
    }
}

/// How many instances of a class exist and how many we want
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassQuota {
    pub class: u32,
    pub current: usize,
    pub target: usize,
}

impl ClassQuota {
    pub fn deficit(&self) -> usize {
        self.target.saturating_sub(self.current)
    }
}

/// Where an augmented sample came from. Used to name the persisted files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub source_stem: String,
    pub target_class: u32,
    pub attempt: usize,
}

/// A transformed image with its surviving boxes
#[derive(Debug, Clone)]
pub struct AugmentedSample {
    pub image: image::RgbImage,
    pub annotation: Annotation,
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deficit_is_floored_at_zero() {
        let quota = ClassQuota {
            class: 0,
            current: 10,
            target: 4,
        };
        assert_eq!(quota.deficit(), 0);
        let quota = ClassQuota {
            class: 0,
            current: 3,
            target: 5,
        };
        assert_eq!(quota.deficit(), 2);
    }

    #[test]
    fn clipped_keeps_box_inside_image() {
        let bb = PixelBbox {
            class: 1,
            x_min: -10.,
            y_min: 5.,
            x_max: 120.,
            y_max: 300.,
        };
        let clipped = bb.clipped(100, 200);
        assert_eq!(clipped.x_min, 0.);
        assert_eq!(clipped.x_max, 100.);
        assert_eq!(clipped.y_max, 200.);
        assert_eq!(clipped.area(), 100. * 195.);
    }
}
