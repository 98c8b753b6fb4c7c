pub mod augmentation_pipeline;
pub mod image_augmentations;
