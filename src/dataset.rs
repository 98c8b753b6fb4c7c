pub mod bbox_conversion;
pub mod common_structs;

pub mod data_augmenters;
pub mod data_loaders;
