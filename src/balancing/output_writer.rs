use crate::dataset::common_structs::{AugmentedSample, Provenance};
use crate::dataset::data_loaders::yolo_labels::write_annotation;
use crate::error::{BalanceError, BalanceResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    /// Nothing was persisted
    #[error("could not write augmented image: {0}")]
    Image(#[source] BalanceError),
    /// The image exists on disk but has no matching label file
    #[error("partial write, {image_path} has no label: {source}")]
    PartialWrite {
        image_path: PathBuf,
        #[source]
        source: BalanceError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSample {
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

/// `{source_stem}_cls{class}_aug{attempt}`, unique per source, class and attempt
pub fn sample_stem(provenance: &Provenance) -> String {
    format!(
        "{}_cls{}_aug{}",
        provenance.source_stem, provenance.target_class, provenance.attempt
    )
}

/// Persists augmented samples as an image plus a label file with the same stem
#[derive(Debug, Clone)]
pub struct OutputWriter {
    images_dir: PathBuf,
    labels_dir: PathBuf,
    extension: String,
}

impl OutputWriter {
    pub fn new(images_dir: &Path, labels_dir: &Path, extension: &str) -> OutputWriter {
        OutputWriter {
            images_dir: images_dir.to_path_buf(),
            labels_dir: labels_dir.to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn create_dirs(&self) -> BalanceResult<()> {
        for dir in &[&self.images_dir, &self.labels_dir] {
            std::fs::create_dir_all(dir).map_err(|e| BalanceError::io(dir.as_path(), e))?;
        }
        Ok(())
    }

    pub fn paths_for(&self, provenance: &Provenance) -> WrittenSample {
        let stem = sample_stem(provenance);
        WrittenSample {
            image_path: self
                .images_dir
                .join(format!("{}.{}", stem, self.extension)),
            label_path: self.labels_dir.join(format!("{}.txt", stem)),
        }
    }

    /// Image first, label second. Existing files with the same name are overwritten.
    pub fn write(&self, sample: &AugmentedSample) -> Result<WrittenSample, WriteError> {
        let paths = self.paths_for(&sample.provenance);
        sample
            .image
            .save(&paths.image_path)
            .map_err(|e| WriteError::Image(BalanceError::image(&paths.image_path, e)))?;
        write_annotation(&paths.label_path, &sample.annotation).map_err(|source| {
            WriteError::PartialWrite {
                image_path: paths.image_path.clone(),
                source,
            }
        })?;
        Ok(paths)
    }
}
