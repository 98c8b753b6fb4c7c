use crate::dataset::common_structs::{Annotation, NormBbox};
use crate::error::{BalanceError, BalanceResult};
use itertools::Itertools;
use std::path::Path;

/// Parses one `class cx cy w h` line. None for anything that is not exactly five numbers.
pub fn parse_label_line(line: &str) -> Option<NormBbox> {
    let fields: Vec<f64> = line
        .split_whitespace()
        .map(|field| field.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() != 5 || fields.iter().any(|v| !v.is_finite()) {
        return None;
    }
    // labels sometimes come as "0.0" instead of "0"
    let class = fields[0].trunc();
    if class < 0. || class > u32::MAX as f64 {
        return None;
    }
    Some(NormBbox {
        class: class as u32,
        center_x: fields[1],
        center_y: fields[2],
        width: fields[3],
        height: fields[4],
    })
}

/// Returns the parsed boxes and how many non-empty lines had to be skipped
pub fn parse_annotation(text: &str) -> (Annotation, usize) {
    let mut skipped = 0;
    let mut bboxes = vec![];
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match parse_label_line(line) {
            Some(bb) => bboxes.push(bb),
            None => {
                log::debug!("skipping malformed label line {:?}", line);
                skipped += 1;
            }
        }
    }
    (Annotation::new(bboxes), skipped)
}

pub fn read_annotation(path: &Path) -> BalanceResult<Annotation> {
    read_annotation_counting_malformed(path).map(|(annotation, _)| annotation)
}

pub fn read_annotation_counting_malformed(path: &Path) -> BalanceResult<(Annotation, usize)> {
    let text = std::fs::read_to_string(path).map_err(|e| BalanceError::io(path, e))?;
    let (annotation, skipped) = parse_annotation(&text);
    if skipped > 0 {
        log::warn!(
            "{}: skipped {} malformed line(s)",
            path.display(),
            skipped
        );
    }
    Ok((annotation, skipped))
}

pub fn format_label_line(bb: &NormBbox) -> String {
    let coords = [bb.center_x, bb.center_y, bb.width, bb.height]
        .iter()
        .map(|v| format!("{:.6}", v))
        .join(" ");
    format!("{} {}", bb.class, coords)
}

/// Writes one line per box. An empty annotation gives an empty file.
pub fn write_annotation(path: &Path, annotation: &Annotation) -> BalanceResult<()> {
    let mut text = String::new();
    for bb in &annotation.bboxes {
        text.push_str(&format_label_line(bb));
        text.push('\n');
    }
    std::fs::write(path, text).map_err(|e| BalanceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_class_is_truncated() {
        let bb = parse_label_line("3.0 0.5 0.25 0.1 0.2").unwrap();
        assert_eq!(bb.class, 3);
        assert_eq!(bb.center_y, 0.25);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let text = "0 0.5 0.5 0.2 0.2\n1 0.5 0.5 0.2 abc\n\n2 0.1 0.1 0.05\n1 0.3 0.3 0.1 0.1 0.9\n2 0.4 0.6 0.1 0.1\n";
        let (annotation, skipped) = parse_annotation(text);
        assert_eq!(skipped, 3);
        let classes: Vec<u32> = annotation.bboxes.iter().map(|bb| bb.class).collect();
        assert_eq!(classes, vec![0, 2]);
    }

    #[test]
    fn negative_class_is_malformed() {
        assert!(parse_label_line("-1 0.5 0.5 0.2 0.2").is_none());
        assert!(parse_label_line("NaN 0.5 0.5 0.2 0.2").is_none());
    }

    #[test]
    fn lines_use_six_decimals() {
        let bb = NormBbox {
            class: 4,
            center_x: 0.5,
            center_y: 0.1234567,
            width: 1.,
            height: 0.,
        };
        assert_eq!(format_label_line(&bb), "4 0.500000 0.123457 1.000000 0.000000");
    }

    #[test]
    fn empty_annotation_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        write_annotation(&path, &Annotation::default()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        assert!(read_annotation(&path).unwrap().is_empty());
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.txt");
        let annotation = Annotation::new(vec![
            NormBbox {
                class: 0,
                center_x: 0.25,
                center_y: 0.75,
                width: 0.1,
                height: 0.2,
            },
            NormBbox {
                class: 2,
                center_x: 0.5,
                center_y: 0.5,
                width: 0.3,
                height: 0.3,
            },
        ]);
        write_annotation(&path, &annotation).unwrap();
        assert_eq!(read_annotation(&path).unwrap(), annotation);
    }
}
