use anyhow::{Context, Result};
use bbox_balance::balancing::class_balancer::run_balancing;
use bbox_balance::config::{parse_target, read_config_file, BalanceConfig, BalanceConfigFile};
use bbox_balance::dataset::data_loaders::split_scanner::{split_stats, SplitLayout, SplitStats};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Class balancing augmentation for YOLO style datasets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate augmented images for classes below their target instance count
    Augment(AugmentArgs),
    /// Print image and instance counts per class for the splits of a dataset
    Count(CountArgs),
}

#[derive(Args, Debug)]
struct AugmentArgs {
    /// TOML config file; command line flags override its values
    #[arg(long, env = "BBOX_BALANCE_CONFIG")]
    config: Option<PathBuf>,
    /// Split folder holding images/ and labels/
    #[arg(long)]
    source: Option<PathBuf>,
    /// Target instance count of a class, as class=count. Repeatable.
    #[arg(long = "target", value_name = "CLASS=COUNT")]
    targets: Vec<String>,
    /// Target used for every class passed with --classes
    #[arg(long)]
    default_target: Option<usize>,
    /// Comma separated class ids balanced to --default-target
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<u32>>,
    /// Augmentation draws per source image
    #[arg(long)]
    max_attempts: Option<usize>,
    /// Fraction of its area a box must keep after a geometric transform
    #[arg(long)]
    min_visibility: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Output folder for augmented images (default: <source>/aug_images)
    #[arg(long)]
    images_out: Option<PathBuf>,
    /// Output folder for augmented labels (default: <source>/aug_labels)
    #[arg(long)]
    labels_out: Option<PathBuf>,
    /// Image format of the generated files, by extension
    #[arg(long)]
    extension: Option<String>,
    /// Balance classes on a thread pool
    #[arg(long)]
    parallel: bool,
    /// Write the per class summary as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CountArgs {
    /// Dataset folder containing one folder per split
    #[arg(long)]
    root: PathBuf,
    #[arg(long, value_delimiter = ',', default_value = "train,valid,test")]
    splits: Vec<String>,
    /// Print the counts as JSON
    #[arg(long)]
    json: bool,
}

fn config_from_args(args: &AugmentArgs) -> Result<BalanceConfig> {
    let mut file = match &args.config {
        Some(path) => read_config_file(path)?,
        None => BalanceConfigFile::default(),
    };
    if let Some(source) = &args.source {
        file.source_dir = Some(source.clone());
    }
    if !args.targets.is_empty() {
        let targets = file.targets.get_or_insert_with(BTreeMap::new);
        for text in &args.targets {
            let (class, count) = parse_target(text)?;
            targets.insert(class.to_string(), count);
        }
    }
    if args.default_target.is_some() {
        file.default_target = args.default_target;
    }
    if args.classes.is_some() {
        file.classes = args.classes.clone();
    }
    if args.max_attempts.is_some() {
        file.max_attempts_per_image = args.max_attempts;
    }
    if args.min_visibility.is_some() {
        file.min_visibility = args.min_visibility;
    }
    if args.seed.is_some() {
        file.seed = args.seed;
    }
    if args.images_out.is_some() {
        file.output_images_dir = args.images_out.clone();
    }
    if args.labels_out.is_some() {
        file.output_labels_dir = args.labels_out.clone();
    }
    if args.extension.is_some() {
        file.output_extension = args.extension.clone();
    }
    if args.parallel {
        file.parallel_classes = Some(true);
    }
    Ok(BalanceConfig::from_file(file)?)
}

fn augment(args: AugmentArgs) -> Result<()> {
    let cfg = config_from_args(&args)?;
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupted, finishing current attempts");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("installing ctrl-c handler")?;

    let report = run_balancing(cfg, cancel)?;
    for class in &report.classes {
        log::info!(
            "class {}: {:?}, {} -> {} of {} ({} accepted in {} attempts)",
            class.class,
            class.state,
            class.starting_count,
            class.final_count(),
            class.target,
            class.accepted,
            class.attempts
        );
    }
    if report.cancelled {
        log::warn!("run was cancelled before every class finished");
    }
    if let Some(path) = &args.report {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating report {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report).context("writing report")?;
        log::info!("report written to {}", path.display());
    }
    Ok(())
}

fn count(args: CountArgs) -> Result<()> {
    let mut per_split: BTreeMap<String, SplitStats> = BTreeMap::new();
    for split in &args.splits {
        let split_dir = args.root.join(split);
        if !split_dir.is_dir() {
            log::warn!("split {} not found under {}", split, args.root.display());
            continue;
        }
        let stats = split_stats(&SplitLayout::new(&split_dir))
            .with_context(|| format!("counting split {}", split))?;
        per_split.insert(split.clone(), stats);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&per_split)?);
        return Ok(());
    }

    let mut images_per_class: BTreeMap<u32, usize> = BTreeMap::new();
    let mut instances_per_class: BTreeMap<u32, usize> = BTreeMap::new();
    println!("=== Images per split ===");
    for (split, stats) in &per_split {
        println!(
            "{}: {} (without label: {})",
            split, stats.total_images, stats.images_without_label
        );
        for (class, n) in &stats.images_per_class {
            *images_per_class.entry(*class).or_insert(0) += n;
        }
        for (class, n) in &stats.instances_per_class {
            *instances_per_class.entry(*class).or_insert(0) += n;
        }
    }
    println!("\n=== Images per class (each image counted once per class) ===");
    for (class, n) in &images_per_class {
        println!("{}: {}", class, n);
    }
    println!("\n=== Instances per class ===");
    for (class, n) in &instances_per_class {
        println!("{}: {}", class, n);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Command::Augment(args) => augment(args),
        Command::Count(args) => count(args),
    }
}
