use crate::error::{BalanceError, BalanceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_ATTEMPTS_PER_IMAGE: usize = 3;
const DEFAULT_MIN_VISIBILITY: f64 = 0.1;
const DEFAULT_OUTPUT_EXTENSION: &str = "jpg";
const DEFAULT_IMAGES_OUTPUT: &str = "aug_images";
const DEFAULT_LABELS_OUTPUT: &str = "aug_labels";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BalanceConfigFile {
    pub source_dir: Option<PathBuf>,
    pub output_images_dir: Option<PathBuf>,
    pub output_labels_dir: Option<PathBuf>,
    /// class id (as a string key) to target instance count
    pub targets: Option<BTreeMap<String, usize>>,
    /// target applied to every class in `classes` that has no entry in `targets`
    pub default_target: Option<usize>,
    pub classes: Option<Vec<u32>>,
    pub max_attempts_per_image: Option<usize>,
    pub min_visibility: Option<f64>,
    pub seed: Option<u64>,
    pub output_extension: Option<String>,
    pub parallel_classes: Option<bool>,
    pub transforms: Option<TransformSettingsFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TransformSettingsFile {
    pub mirror_prob: Option<f64>,
    pub brightness_contrast_prob: Option<f64>,
    pub brightness_limit: Option<f32>,
    pub contrast_limit: Option<f32>,
    pub rotate_prob: Option<f64>,
    pub rotate_limit_degrees: Option<f32>,
    pub blur_prob: Option<f64>,
    pub blur_sigma_min: Option<f32>,
    pub blur_sigma_max: Option<f32>,
    pub hue_prob: Option<f64>,
    pub hue_limit_degrees: Option<i32>,
}

/// Per transform activation probabilities and strengths
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformSettings {
    pub mirror_prob: f64,
    pub brightness_contrast_prob: f64,
    pub brightness_limit: f32,
    pub contrast_limit: f32,
    pub rotate_prob: f64,
    pub rotate_limit_degrees: f32,
    pub blur_prob: f64,
    pub blur_sigma_min: f32,
    pub blur_sigma_max: f32,
    pub hue_prob: f64,
    pub hue_limit_degrees: i32,
}

impl Default for TransformSettings {
    fn default() -> Self {
        TransformSettings {
            mirror_prob: 0.5,
            brightness_contrast_prob: 0.5,
            brightness_limit: 0.2,
            contrast_limit: 0.2,
            rotate_prob: 0.5,
            rotate_limit_degrees: 25.,
            blur_prob: 0.3,
            blur_sigma_min: 0.5,
            blur_sigma_max: 1.5,
            hue_prob: 0.,
            hue_limit_degrees: 20,
        }
    }
}

impl TransformSettings {
    fn from_file(file: TransformSettingsFile) -> TransformSettings {
        let d = TransformSettings::default();
        TransformSettings {
            mirror_prob: file.mirror_prob.unwrap_or(d.mirror_prob),
            brightness_contrast_prob: file
                .brightness_contrast_prob
                .unwrap_or(d.brightness_contrast_prob),
            brightness_limit: file.brightness_limit.unwrap_or(d.brightness_limit),
            contrast_limit: file.contrast_limit.unwrap_or(d.contrast_limit),
            rotate_prob: file.rotate_prob.unwrap_or(d.rotate_prob),
            rotate_limit_degrees: file.rotate_limit_degrees.unwrap_or(d.rotate_limit_degrees),
            blur_prob: file.blur_prob.unwrap_or(d.blur_prob),
            blur_sigma_min: file.blur_sigma_min.unwrap_or(d.blur_sigma_min),
            blur_sigma_max: file.blur_sigma_max.unwrap_or(d.blur_sigma_max),
            hue_prob: file.hue_prob.unwrap_or(d.hue_prob),
            hue_limit_degrees: file.hue_limit_degrees.unwrap_or(d.hue_limit_degrees),
        }
    }

    fn probabilities(&self) -> [(&'static str, f64); 5] {
        [
            ("mirror_prob", self.mirror_prob),
            ("brightness_contrast_prob", self.brightness_contrast_prob),
            ("rotate_prob", self.rotate_prob),
            ("blur_prob", self.blur_prob),
            ("hue_prob", self.hue_prob),
        ]
    }
}

/// Everything one balancing run needs. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceConfig {
    pub source_dir: PathBuf,
    pub output_images_dir: PathBuf,
    pub output_labels_dir: PathBuf,
    pub targets: BTreeMap<u32, usize>,
    pub max_attempts_per_image: usize,
    pub min_visibility: f64,
    pub seed: Option<u64>,
    pub output_extension: String,
    pub parallel_classes: bool,
    pub transforms: TransformSettings,
}

impl BalanceConfig {
    /// Config with default settings for the given split and targets
    pub fn new(source_dir: impl Into<PathBuf>, targets: BTreeMap<u32, usize>) -> BalanceConfig {
        let source_dir = source_dir.into();
        BalanceConfig {
            output_images_dir: source_dir.join(DEFAULT_IMAGES_OUTPUT),
            output_labels_dir: source_dir.join(DEFAULT_LABELS_OUTPUT),
            source_dir,
            targets,
            max_attempts_per_image: DEFAULT_MAX_ATTEMPTS_PER_IMAGE,
            min_visibility: DEFAULT_MIN_VISIBILITY,
            seed: None,
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            parallel_classes: false,
            transforms: TransformSettings::default(),
        }
    }

    pub fn from_file(file: BalanceConfigFile) -> BalanceResult<BalanceConfig> {
        let source_dir = file
            .source_dir
            .ok_or_else(|| BalanceError::Config("source_dir is required".to_string()))?;
        let targets = resolve_targets(file.targets, file.default_target, file.classes)?;
        let mut cfg = BalanceConfig::new(source_dir, targets);
        if let Some(dir) = file.output_images_dir {
            cfg.output_images_dir = dir;
        }
        if let Some(dir) = file.output_labels_dir {
            cfg.output_labels_dir = dir;
        }
        if let Some(attempts) = file.max_attempts_per_image {
            cfg.max_attempts_per_image = attempts;
        }
        if let Some(min_visibility) = file.min_visibility {
            cfg.min_visibility = min_visibility;
        }
        if let Some(ext) = file.output_extension {
            cfg.output_extension = ext.trim_start_matches('.').to_string();
        }
        cfg.seed = file.seed;
        cfg.parallel_classes = file.parallel_classes.unwrap_or(false);
        cfg.transforms = TransformSettings::from_file(file.transforms.unwrap_or_default());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> BalanceResult<BalanceConfig> {
        BalanceConfig::from_file(read_config_file(path)?)
    }

    pub fn validate(&self) -> BalanceResult<()> {
        if self.targets.is_empty() {
            return Err(BalanceError::Config("no target classes given".to_string()));
        }
        if self.max_attempts_per_image == 0 {
            return Err(BalanceError::Config(
                "max_attempts_per_image must be at least 1".to_string(),
            ));
        }
        if !(0. ..=1.).contains(&self.min_visibility) {
            return Err(BalanceError::Config(format!(
                "min_visibility {} is outside [0, 1]",
                self.min_visibility
            )));
        }
        for (name, prob) in self.transforms.probabilities().iter() {
            if !(0. ..=1.).contains(prob) {
                return Err(BalanceError::Config(format!(
                    "{} {} is outside [0, 1]",
                    name, prob
                )));
            }
        }
        if self.transforms.blur_sigma_min <= 0. {
            return Err(BalanceError::Config(
                "blur_sigma_min must be positive".to_string(),
            ));
        }
        if self.output_extension.is_empty() {
            return Err(BalanceError::Config("output_extension is empty".to_string()));
        }
        Ok(())
    }
}

pub fn read_config_file(path: &Path) -> BalanceResult<BalanceConfigFile> {
    let text = std::fs::read_to_string(path).map_err(|e| BalanceError::io(path, e))?;
    toml::from_str(&text).map_err(|source| BalanceError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_targets(
    targets: Option<BTreeMap<String, usize>>,
    default_target: Option<usize>,
    classes: Option<Vec<u32>>,
) -> BalanceResult<BTreeMap<u32, usize>> {
    let mut resolved = BTreeMap::new();
    for (key, target) in targets.unwrap_or_default() {
        let class = parse_class_id(&key)?;
        resolved.insert(class, target);
    }
    if let Some(classes) = classes {
        let default_target = default_target.ok_or_else(|| {
            BalanceError::Config("classes given without a default_target".to_string())
        })?;
        for class in classes {
            resolved.entry(class).or_insert(default_target);
        }
    }
    Ok(resolved)
}

pub fn parse_class_id(text: &str) -> BalanceResult<u32> {
    text.trim()
        .parse::<u32>()
        .map_err(|_| BalanceError::Config(format!("{:?} is not a class id", text)))
}

/// Parses `class=count`, as given on the command line
pub fn parse_target(text: &str) -> BalanceResult<(u32, usize)> {
    let (class, count) = text
        .split_once('=')
        .ok_or_else(|| BalanceError::Config(format!("{:?} is not class=count", text)))?;
    let count = count
        .trim()
        .parse::<usize>()
        .map_err(|_| BalanceError::Config(format!("{:?} is not a count", count)))?;
    Ok((parse_class_id(class)?, count))
}
