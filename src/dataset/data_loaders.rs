pub mod split_scanner;
pub mod yolo_labels;
