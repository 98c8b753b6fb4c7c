use super::yolo_labels::read_annotation_counting_malformed;
use crate::dataset::common_structs::Annotation;
use crate::error::{BalanceError, BalanceResult};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Image extensions looked up for a label stem, in order of preference
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// The `images/` and `labels/` folders of a dataset split
#[derive(Debug, Clone, PartialEq)]
pub struct SplitLayout {
    pub images_dir: PathBuf,
    pub labels_dir: PathBuf,
}

impl SplitLayout {
    pub fn new(split_dir: &Path) -> SplitLayout {
        SplitLayout {
            images_dir: split_dir.join("images"),
            labels_dir: split_dir.join("labels"),
        }
    }
}

/// An image known to contain at least one box of some target class
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub stem: String,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Per target class, every image with at least one box of it, in file name order
    pub pools: BTreeMap<u32, Vec<SourceImage>>,
    /// Per target class, the number of boxes (not images) found
    pub instance_counts: BTreeMap<u32, usize>,
    pub label_files: usize,
    pub unreadable_label_files: usize,
    pub malformed_lines: usize,
}

impl ScanResult {
    pub fn pool(&self, class: u32) -> &[SourceImage] {
        self.pools.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn instance_count(&self, class: u32) -> usize {
        self.instance_counts.get(&class).copied().unwrap_or(0)
    }
}

fn list_files(dir: &Path) -> BalanceResult<Vec<PathBuf>> {
    let mut files = vec![];
    let entries = std::fs::read_dir(dir).map_err(|e| BalanceError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| BalanceError::io(dir, e))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

/// Maps every image stem in the folder to its file, preferring extensions earlier in
/// IMAGE_EXTENSIONS. A missing folder gives an empty map.
pub fn index_images(images_dir: &Path) -> BalanceResult<HashMap<String, PathBuf>> {
    let mut index: HashMap<String, (usize, PathBuf)> = HashMap::new();
    if !images_dir.is_dir() {
        log::warn!("images folder {} not found", images_dir.display());
        return Ok(HashMap::new());
    }
    for path in list_files(images_dir)? {
        let ext = match lowercase_extension(&path) {
            Some(ext) => ext,
            None => continue,
        };
        let rank = match IMAGE_EXTENSIONS.iter().position(|known| *known == ext) {
            Some(rank) => rank,
            None => continue,
        };
        let stem = match file_stem(&path) {
            Some(stem) => stem,
            None => continue,
        };
        let better = index.get(&stem).map_or(true, |(existing, _)| rank < *existing);
        if better {
            index.insert(stem, (rank, path));
        }
    }
    Ok(index
        .into_iter()
        .map(|(stem, (_, path))| (stem, path))
        .collect())
}

fn label_files(labels_dir: &Path) -> BalanceResult<Vec<PathBuf>> {
    if !labels_dir.is_dir() {
        log::warn!("labels folder {} not found", labels_dir.display());
        return Ok(vec![]);
    }
    Ok(list_files(labels_dir)?
        .into_iter()
        .filter(|p| lowercase_extension(p).as_deref() == Some("txt"))
        .collect())
}

/// Reads every label file of the split once and builds the source pools and the
/// instance counts of the target classes.
pub fn scan_split(layout: &SplitLayout, target_classes: &[u32]) -> BalanceResult<ScanResult> {
    let labels = label_files(&layout.labels_dir)?;
    let images = index_images(&layout.images_dir)?;

    let parsed: Vec<(PathBuf, BalanceResult<(Annotation, usize)>)> = labels
        .into_par_iter()
        .map(|label_path| {
            let parsed = read_annotation_counting_malformed(&label_path);
            (label_path, parsed)
        })
        .collect();

    let mut result = ScanResult::default();
    for class in target_classes {
        result.pools.insert(*class, vec![]);
        result.instance_counts.insert(*class, 0);
    }

    for (label_path, parsed) in parsed {
        result.label_files += 1;
        let (annotation, malformed) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("unreadable label file: {}", e);
                result.unreadable_label_files += 1;
                continue;
            }
        };
        result.malformed_lines += malformed;
        let stem = match file_stem(&label_path) {
            Some(stem) => stem,
            None => continue,
        };
        for class in target_classes {
            let count = annotation.count_class(*class);
            if count == 0 {
                continue;
            }
            *result.instance_counts.entry(*class).or_insert(0) += count;
            let image_path = images
                .get(&stem)
                .cloned()
                .unwrap_or_else(|| layout.images_dir.join(format!("{}.jpg", stem)));
            result.pools.entry(*class).or_default().push(SourceImage {
                stem: stem.clone(),
                image_path,
                label_path: label_path.clone(),
            });
        }
    }
    Ok(result)
}

/// Image and instance counts of one split, over every class present
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SplitStats {
    pub total_images: usize,
    pub images_without_label: usize,
    /// Each image counts once per class it contains
    pub images_per_class: BTreeMap<u32, usize>,
    /// Sum of boxes per class
    pub instances_per_class: BTreeMap<u32, usize>,
}

pub fn split_stats(layout: &SplitLayout) -> BalanceResult<SplitStats> {
    let images = index_images(&layout.images_dir)?;
    let mut stems: Vec<&String> = images.keys().collect();
    stems.sort();
    let mut stats = SplitStats {
        total_images: stems.len(),
        ..SplitStats::default()
    };
    for stem in stems {
        let label_path = layout.labels_dir.join(format!("{}.txt", stem));
        if !label_path.is_file() {
            stats.images_without_label += 1;
            continue;
        }
        let (annotation, _) = match read_annotation_counting_malformed(&label_path) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("unreadable label file: {}", e);
                continue;
            }
        };
        let mut classes_in_image = BTreeSet::new();
        for bb in &annotation.bboxes {
            classes_in_image.insert(bb.class);
            *stats.instances_per_class.entry(bb.class).or_insert(0) += 1;
        }
        for class in classes_in_image {
            *stats.images_per_class.entry(class).or_insert(0) += 1;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, text: &str) {
        fs::write(path, text).unwrap();
    }

    fn split_with(labels: &[(&str, &str)], images: &[&str]) -> (tempfile::TempDir, SplitLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = SplitLayout::new(dir.path());
        fs::create_dir_all(&layout.images_dir).unwrap();
        fs::create_dir_all(&layout.labels_dir).unwrap();
        for (name, text) in labels {
            write(&layout.labels_dir.join(name), text);
        }
        for name in images {
            write(&layout.images_dir.join(name), "");
        }
        (dir, layout)
    }

    #[test]
    fn pools_hold_images_and_counts_hold_instances() {
        let (_dir, layout) = split_with(
            &[
                ("a.txt", "0 0.5 0.5 0.1 0.1\n0 0.2 0.2 0.1 0.1\n3 0.7 0.7 0.1 0.1\n"),
                ("b.txt", "1 0.5 0.5 0.1 0.1\n"),
                ("c.txt", "3 0.5 0.5 0.1 0.1\n"),
            ],
            &["a.jpg", "b.jpg", "c.png"],
        );
        let scan = scan_split(&layout, &[0, 3, 5]).unwrap();
        assert_eq!(scan.label_files, 3);
        assert_eq!(scan.instance_count(0), 2);
        assert_eq!(scan.pool(0).len(), 1);
        assert_eq!(scan.instance_count(3), 2);
        let stems: Vec<&str> = scan.pool(3).iter().map(|s| s.stem.as_str()).collect();
        assert_eq!(stems, vec!["a", "c"]);
        assert_eq!(scan.pool(3)[1].image_path, layout.images_dir.join("c.png"));
        assert!(scan.pool(5).is_empty());
        assert_eq!(scan.instance_count(5), 0);
    }

    #[test]
    fn missing_labels_folder_scans_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SplitLayout::new(dir.path());
        fs::create_dir_all(&layout.images_dir).unwrap();
        write(&layout.images_dir.join("a.jpg"), "");
        let scan = scan_split(&layout, &[0]).unwrap();
        assert_eq!(scan.label_files, 0);
        assert!(scan.pool(0).is_empty());
        assert_eq!(scan.instance_count(0), 0);
    }

    #[test]
    fn image_lookup_prefers_jpg_and_ignores_case() {
        let (_dir, layout) = split_with(&[], &["x.PNG", "x.jpg", "y.JPEG", "z.gif"]);
        let index = index_images(&layout.images_dir).unwrap();
        assert_eq!(index["x"], layout.images_dir.join("x.jpg"));
        assert_eq!(index["y"], layout.images_dir.join("y.JPEG"));
        assert!(!index.contains_key("z"));
    }

    #[test]
    fn stats_count_images_once_per_class() {
        let (_dir, layout) = split_with(
            &[
                ("a.txt", "0 0.5 0.5 0.1 0.1\n0 0.2 0.2 0.1 0.1\n2 0.7 0.7 0.1 0.1\n"),
                ("b.txt", "0.0 0.5 0.5 0.1 0.1\n"),
            ],
            &["a.jpg", "b.jpg", "negative.jpg"],
        );
        let stats = split_stats(&layout).unwrap();
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.images_without_label, 1);
        assert_eq!(stats.images_per_class[&0], 2);
        assert_eq!(stats.instances_per_class[&0], 3);
        assert_eq!(stats.images_per_class[&2], 1);
    }
}
