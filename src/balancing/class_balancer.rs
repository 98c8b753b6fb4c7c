use super::output_writer::{OutputWriter, WriteError};
use crate::config::BalanceConfig;
use crate::dataset::bbox_conversion::{is_usable, norm_to_pixel, pixel_to_norm};
use crate::dataset::common_structs::{
    Annotation, AugmentedSample, ClassQuota, PixelBbox, Provenance,
};
use crate::dataset::data_augmenters::augmentation_pipeline::{
    AugmentOutcome, AugmentationPipeline,
};
use crate::dataset::data_loaders::split_scanner::{
    scan_split, ScanResult, SourceImage, SplitLayout,
};
use crate::dataset::data_loaders::yolo_labels::read_annotation;
use crate::error::BalanceResult;
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClassState {
    Pending,
    Generating,
    Satisfied,
    Exhausted,
    /// Stopped by the cancel flag with sources left to try
    Cancelled,
}

/// What happened to one target class during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub class: u32,
    pub state: ClassState,
    pub starting_count: usize,
    pub target: usize,
    pub deficit_at_start: usize,
    pub pool_size: usize,
    pub accepted: usize,
    pub remaining_deficit: usize,
    pub attempts: usize,
    pub empty_results: usize,
    pub missing_target_class: usize,
    pub transform_failures: usize,
    pub unreadable_sources: usize,
    pub unusable_sources: usize,
    pub dropped_boxes: usize,
    pub write_failures: usize,
    pub partial_writes: usize,
}

impl ClassReport {
    fn new(quota: &ClassQuota, pool_size: usize) -> ClassReport {
        ClassReport {
            class: quota.class,
            state: ClassState::Pending,
            starting_count: quota.current,
            target: quota.target,
            deficit_at_start: quota.deficit(),
            pool_size,
            accepted: 0,
            remaining_deficit: quota.deficit(),
            attempts: 0,
            empty_results: 0,
            missing_target_class: 0,
            transform_failures: 0,
            unreadable_sources: 0,
            unusable_sources: 0,
            dropped_boxes: 0,
            write_failures: 0,
            partial_writes: 0,
        }
    }

    /// Instance count the class reaches counting one instance per accepted sample
    pub fn final_count(&self) -> usize {
        self.starting_count + self.accepted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceReport {
    pub seed: u64,
    pub cancelled: bool,
    pub classes: Vec<ClassReport>,
}

impl BalanceReport {
    pub fn class(&self, class: u32) -> Option<&ClassReport> {
        self.classes.iter().find(|c| c.class == class)
    }

    pub fn total_accepted(&self) -> usize {
        self.classes.iter().map(|c| c.accepted).sum()
    }
}

/// Derives an independent seed for every (source, class, attempt) so results do not
/// depend on the order attempts run in.
pub fn attempt_seed(run_seed: u64, source_stem: &str, class: u32, attempt: usize) -> u64 {
    // FNV-1a over the stem, then splitmix64 finalisation of the mix
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in source_stem.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let mut z = run_seed
        ^ hash
        ^ (class as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (attempt as u64).rotate_left(32);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

enum SourceProblem {
    Unreadable,
    NoUsableBoxes,
}

fn load_source(source: &SourceImage) -> Result<(RgbImage, Vec<PixelBbox>), SourceProblem> {
    let img = match image::open(&source.image_path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            log::warn!("could not load image {}: {}", source.image_path.display(), e);
            return Err(SourceProblem::Unreadable);
        }
    };
    let annotation = match read_annotation(&source.label_path) {
        Ok(annotation) => annotation,
        Err(e) => {
            log::warn!("could not read labels of {}: {}", source.stem, e);
            return Err(SourceProblem::Unreadable);
        }
    };
    let (width, height) = img.dimensions();
    let bboxes: Vec<PixelBbox> = annotation
        .bboxes
        .iter()
        .map(|bb| norm_to_pixel(bb, width, height))
        .filter(|bb| is_usable(bb, width, height))
        .collect();
    if bboxes.is_empty() {
        return Err(SourceProblem::NoUsableBoxes);
    }
    Ok((img, bboxes))
}

fn to_annotation(bboxes: &[PixelBbox], width: u32, height: u32) -> Annotation {
    Annotation::new(
        bboxes
            .iter()
            .map(|bb| pixel_to_norm(bb, width, height))
            .filter(|bb| bb.width > 0. && bb.height > 0.)
            .collect(),
    )
}

/// Generates augmented copies of source images until every target class reaches its
/// target instance count or runs out of sources.
///
/// Each class is balanced on its own: an accepted sample only closes the deficit of the
/// class it was generated for, even when it also contains boxes of other target classes.
pub struct ClassBalancer {
    config: BalanceConfig,
    pipeline: AugmentationPipeline,
    writer: OutputWriter,
    cancel: Arc<AtomicBool>,
}

impl ClassBalancer {
    pub fn new(config: BalanceConfig, pipeline: AugmentationPipeline) -> ClassBalancer {
        let writer = OutputWriter::new(
            &config.output_images_dir,
            &config.output_labels_dir,
            &config.output_extension,
        );
        ClassBalancer {
            config,
            pipeline,
            writer,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Balancer using the transform pipeline described by the config
    pub fn from_config(config: BalanceConfig) -> ClassBalancer {
        let pipeline =
            AugmentationPipeline::from_settings(&config.transforms, config.min_visibility);
        ClassBalancer::new(config, pipeline)
    }

    /// Once the flag is set no new attempts are started
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> ClassBalancer {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &BalanceConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn scan(&self) -> BalanceResult<ScanResult> {
        let classes: Vec<u32> = self.config.targets.keys().copied().collect();
        scan_split(&SplitLayout::new(&self.config.source_dir), &classes)
    }

    /// Scans the source split and balances every target class
    pub fn run(&self) -> BalanceResult<BalanceReport> {
        let scan = self.scan()?;
        self.balance(&scan)
    }

    /// Fails on an invalid config before any attempt is made
    pub fn balance(&self, scan: &ScanResult) -> BalanceResult<BalanceReport> {
        self.config.validate()?;
        let run_seed = self.config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        log::info!("balancing with seed {}", run_seed);

        let quotas: Vec<ClassQuota> = self
            .config
            .targets
            .iter()
            .map(|(class, target)| ClassQuota {
                class: *class,
                current: scan.instance_count(*class),
                target: *target,
            })
            .collect();

        for quota in &quotas {
            log::info!(
                "class {}: {} instances in {} images, target {}, missing {}",
                quota.class,
                quota.current,
                scan.pool(quota.class).len(),
                quota.target,
                quota.deficit()
            );
        }

        let needs_output = quotas
            .iter()
            .any(|q| q.deficit() > 0 && !scan.pool(q.class).is_empty());
        if needs_output {
            self.writer.create_dirs()?;
        }

        let classes: Vec<ClassReport> = if self.config.parallel_classes {
            quotas
                .par_iter()
                .map(|quota| self.balance_class(quota, scan.pool(quota.class), run_seed))
                .collect()
        } else {
            quotas
                .iter()
                .map(|quota| self.balance_class(quota, scan.pool(quota.class), run_seed))
                .collect()
        };

        Ok(BalanceReport {
            seed: run_seed,
            cancelled: self.cancelled(),
            classes,
        })
    }

    /// Runs the PENDING -> GENERATING -> SATISFIED | EXHAUSTED cycle of one class. A class
    /// interrupted by the cancel flag ends CANCELLED instead.
    pub fn balance_class(
        &self,
        quota: &ClassQuota,
        pool: &[SourceImage],
        run_seed: u64,
    ) -> ClassReport {
        let mut report = ClassReport::new(quota, pool.len());
        if quota.deficit() == 0 {
            log::info!(
                "class {} already has {} of {} instances",
                quota.class,
                quota.current,
                quota.target
            );
            report.state = ClassState::Satisfied;
            return report;
        }
        if pool.is_empty() {
            log::warn!(
                "no source image contains class {}, {} instances cannot be generated",
                quota.class,
                quota.deficit()
            );
            report.state = ClassState::Exhausted;
            return report;
        }
        if self.cancelled() {
            return report;
        }

        report.state = ClassState::Generating;
        let mut deficit = quota.deficit();
        let mut interrupted = false;
        'sources: for source in pool {
            if deficit == 0 {
                break;
            }
            if self.cancelled() {
                interrupted = true;
                break;
            }
            let (img, bboxes) = match load_source(source) {
                Ok(loaded) => loaded,
                Err(SourceProblem::Unreadable) => {
                    report.unreadable_sources += 1;
                    continue;
                }
                Err(SourceProblem::NoUsableBoxes) => {
                    log::debug!("{} has no usable boxes, skipping", source.stem);
                    report.unusable_sources += 1;
                    continue;
                }
            };

            for attempt in 0..self.config.max_attempts_per_image {
                if deficit == 0 {
                    break 'sources;
                }
                if self.cancelled() {
                    interrupted = true;
                    break 'sources;
                }
                report.attempts += 1;
                let accepted = self.attempt(
                    quota.class,
                    source,
                    attempt,
                    &img,
                    &bboxes,
                    run_seed,
                    &mut report,
                );
                if accepted {
                    report.accepted += 1;
                    deficit -= 1;
                }
            }
        }

        report.remaining_deficit = deficit;
        report.state = if deficit == 0 {
            ClassState::Satisfied
        } else if interrupted {
            ClassState::Cancelled
        } else {
            ClassState::Exhausted
        };
        match report.state {
            ClassState::Exhausted => log::warn!(
                "class {} exhausted its sources: generated {}, still missing {}",
                quota.class,
                report.accepted,
                deficit
            ),
            ClassState::Cancelled => log::info!(
                "class {} stopped by cancellation: generated {}, still missing {}",
                quota.class,
                report.accepted,
                deficit
            ),
            _ => log::info!(
                "generated {} augmented images for class {}",
                report.accepted,
                quota.class
            ),
        }
        report
    }

    /// One augmentation draw. True when a sample was accepted and written.
    #[allow(clippy::too_many_arguments)]
    fn attempt(
        &self,
        class: u32,
        source: &SourceImage,
        attempt: usize,
        img: &RgbImage,
        bboxes: &[PixelBbox],
        run_seed: u64,
        report: &mut ClassReport,
    ) -> bool {
        let mut rng = StdRng::seed_from_u64(attempt_seed(run_seed, &source.stem, class, attempt));
        let (out_img, out_bboxes) = match self.pipeline.apply(img.clone(), bboxes, &mut rng) {
            Ok(AugmentOutcome::Augmented {
                img,
                bboxes,
                dropped,
            }) => {
                report.dropped_boxes += dropped;
                (img, bboxes)
            }
            Ok(AugmentOutcome::Empty { dropped }) => {
                log::debug!("{} attempt {}: every box was dropped", source.stem, attempt);
                report.dropped_boxes += dropped;
                report.empty_results += 1;
                return false;
            }
            Err(e) => {
                log::warn!("{} attempt {} discarded: {}", source.stem, attempt, e);
                report.transform_failures += 1;
                return false;
            }
        };

        let (width, height) = out_img.dimensions();
        let annotation = to_annotation(&out_bboxes, width, height);
        if !annotation.contains_class(class) {
            log::debug!("{} attempt {}: class {} box was lost", source.stem, attempt, class);
            report.missing_target_class += 1;
            return false;
        }

        let sample = AugmentedSample {
            image: out_img,
            annotation,
            provenance: Provenance {
                source_stem: source.stem.clone(),
                target_class: class,
                attempt,
            },
        };
        match self.writer.write(&sample) {
            Ok(_) => true,
            Err(e @ WriteError::PartialWrite { .. }) => {
                log::warn!("{}", e);
                report.partial_writes += 1;
                false
            }
            Err(e) => {
                log::warn!("{}", e);
                report.write_failures += 1;
                false
            }
        }
    }
}

/// Balances the split described by `config` with its configured transforms
pub fn run_balancing(
    config: BalanceConfig,
    cancel: Arc<AtomicBool>,
) -> BalanceResult<BalanceReport> {
    ClassBalancer::from_config(config).with_cancel_flag(cancel).run()
}
