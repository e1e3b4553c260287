// ==============================================================================
// main.rs - PRS Engine Entry Point
// ==============================================================================
// Description: Command line driver: loads a genotype file and lookup tables,
//              scores the requested traits and writes the result files
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-18
// Version: 2.1.0
// ==============================================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prs_engine::batch::{BatchRequest, BatchRunner, CompositeOutcome};
use prs_engine::config::JobFile;
use prs_engine::loader::ScoringFileLoader;
use prs_engine::matcher::GenomeIndex;
use prs_engine::output::OutputGenerator;
use prs_engine::parsers::catalog::SCORES_METADATA_URL;
use prs_engine::parsers::{AlleleFreqMap, AncestryIndex, EffectSizeTable, Genome23Parser, TraitCatalog, TraitLabels};
use prs_engine::processor::{ScoreProcessor, ScoringContext};
use prs_engine::progress::{self, LogSeverity};
use prs_engine::reference_stats::{ReferenceStore, ReferenceStoreBuilder};

#[derive(Parser, Debug)]
#[command(author, version, about = "Polygenic risk scores from a consumer genotype export", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON job file; flags override its values
    #[arg(short, long)]
    job: Option<PathBuf>,

    /// Raw genotype export (rsid, chromosome, position, genotype)
    #[arg(short, long, env = "PRS_GENOME")]
    genome: Option<PathBuf>,

    /// Keep only chromosomes 1-22 from the genotype file
    #[arg(long)]
    autosomal_only: bool,

    /// Trait id to score (repeatable)
    #[arg(short = 't', long = "trait")]
    traits: Vec<String>,

    /// Explicit models for a trait: TRAIT=PGS000001,PGS000002 (repeatable)
    #[arg(short, long = "models")]
    models: Vec<String>,

    /// Catalog score metadata CSV (fetched when absent and needed)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Only use catalog models developed on this genome build
    #[arg(long)]
    catalog_build: Option<String>,

    /// Allele-frequency table (rsid plus af_A/af_C/af_G/af_T)
    #[arg(long)]
    af_map: Option<PathBuf>,

    /// Precomputed reference moments per model
    #[arg(long)]
    reference_stats: Option<PathBuf>,

    /// Trait labels JSON ([{id, label}])
    #[arg(long)]
    trait_labels: Option<PathBuf>,

    /// Evaluation-ancestry CSV
    #[arg(long)]
    ancestry: Option<PathBuf>,

    /// Effect size per SD table (CSV or JSON)
    #[arg(long)]
    effect_sizes: Option<PathBuf>,

    /// Ancestry the composite is restricted to ("none" disables the filter)
    #[arg(long)]
    ancestry_filter: Option<String>,

    /// Scoring file cache directory
    #[arg(long, env = "PRS_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Harmonized genome build of the scoring files
    #[arg(long, env = "PRS_GENOME_BUILD")]
    genome_build: Option<String>,

    /// Ignore cached scoring files
    #[arg(long)]
    refresh: bool,

    /// Never contact the catalog server
    #[arg(long)]
    offline: bool,

    /// Models scored concurrently
    #[arg(long, env = "PRS_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Minimum weighted coverage for a percentile
    #[arg(long)]
    min_coverage: Option<f64>,

    /// Output directory
    #[arg(short, long, env = "PRS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Precompute reference moments for models and write them as JSON
    BuildReference {
        /// Model to include (repeatable or comma separated)
        #[arg(long = "model", value_delimiter = ',', required = true)]
        models: Vec<String>,

        /// Destination file, loadable with --reference-stats
        #[arg(long)]
        out: PathBuf,
    },
}

/// Parse `TRAIT=ID,ID` into the explicit model mapping
fn parse_model_mapping(entries: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut mapping: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let Some((trait_id, ids)) = entry.split_once('=') else {
            bail!("Invalid --models value '{}', expected TRAIT=PGS000001,...", entry);
        };
        mapping
            .entry(trait_id.trim().to_string())
            .or_default()
            .extend(ids.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string));
    }
    Ok(mapping)
}

/// Merge command line flags over the job file
fn merge_args(args: Args) -> Result<(JobFile, BTreeMap<String, Vec<String>>, Option<String>, bool)> {
    let mut job = match &args.job {
        Some(path) => JobFile::from_path(path)?,
        None => JobFile::default(),
    };

    let mut mapping = job.trait_models.clone();
    for (trait_id, ids) in parse_model_mapping(&args.models)? {
        mapping.insert(trait_id, ids);
    }

    if !args.traits.is_empty() {
        job.traits = args.traits;
    }
    for trait_id in mapping.keys() {
        if !job.traits.contains(trait_id) {
            job.traits.push(trait_id.clone());
        }
    }

    job.genome = args.genome.or(job.genome);
    job.autosomal_only |= args.autosomal_only;
    job.catalog = args.catalog.or(job.catalog);
    job.af_map = args.af_map.or(job.af_map);
    job.reference_stats = args.reference_stats.or(job.reference_stats);
    job.trait_labels = args.trait_labels.or(job.trait_labels);
    job.ancestry = args.ancestry.or(job.ancestry);
    job.effect_sizes = args.effect_sizes.or(job.effect_sizes);
    job.output_dir = args.output_dir.or(job.output_dir);

    let engine = &mut job.engine;
    if let Some(dir) = args.cache_dir {
        engine.loader.cache_dir = dir;
    }
    if let Some(build) = args.genome_build {
        engine.loader.genome_build = build;
    }
    if args.offline {
        engine.loader.use_remote = false;
    }
    if let Some(n) = args.concurrency {
        engine.concurrency = n;
    }
    if let Some(coverage) = args.min_coverage {
        engine.evaluator.min_weighted_coverage = coverage;
    }
    if let Some(filter) = args.ancestry_filter {
        engine.composite.ancestry_filter = (!filter.eq_ignore_ascii_case("none")).then_some(filter);
    }

    Ok((job, mapping, args.catalog_build, args.refresh))
}

fn load_af_map(job: &JobFile) -> Result<Option<AlleleFreqMap>> {
    let Some(path) = &job.af_map else {
        return Ok(None);
    };
    let map = AlleleFreqMap::from_path(path).with_context(|| format!("Failed to load AF table {:?}", path))?;
    info!("Loaded allele frequencies for {} variants", map.len());
    Ok(Some(map))
}

async fn load_context(job: &JobFile) -> Result<ScoringContext> {
    let Some(genome_path) = &job.genome else {
        bail!("A genotype file is required (--genome or \"genome\" in the job file)");
    };
    let parser = if job.autosomal_only {
        Genome23Parser::autosomal_only()
    } else {
        Genome23Parser::new()
    };
    let parsed = parser
        .parse_file(genome_path)
        .await
        .with_context(|| format!("Failed to read genotype file {:?}", genome_path))?;
    let skipped_lines = parsed.skipped_lines;
    let genome = GenomeIndex::new(parsed.variants);
    info!(
        "Loaded {} genotypes ({} called) from {:?} ({} malformed lines skipped)",
        genome.len(),
        genome.called_count(),
        genome_path,
        skipped_lines
    );
    if !genome.has_calls() {
        warn!("Genotype file holds no called variants");
    }

    let af_map = load_af_map(job)?;

    let reference_store = match &job.reference_stats {
        Some(path) => Some(
            ReferenceStore::from_path(path).with_context(|| format!("Failed to load reference stats {:?}", path))?,
        ),
        None => None,
    };

    let trait_labels = match &job.trait_labels {
        Some(path) => TraitLabels::from_path(path).with_context(|| format!("Failed to load trait labels {:?}", path))?,
        None => TraitLabels::default(),
    };

    let ancestry = match &job.ancestry {
        Some(path) => AncestryIndex::from_path(path).with_context(|| format!("Failed to load ancestry table {:?}", path))?,
        None => AncestryIndex::default(),
    };

    let effect_sizes = match &job.effect_sizes {
        Some(path) => {
            EffectSizeTable::from_path(path).with_context(|| format!("Failed to load effect sizes {:?}", path))?
        }
        None => EffectSizeTable::default(),
    };

    Ok(ScoringContext {
        genome,
        af_map,
        reference_store,
        trait_labels,
        ancestry,
        effect_sizes,
    })
}

async fn load_catalog(
    job: &JobFile,
    mapping: &BTreeMap<String, Vec<String>>,
    loader: &ScoringFileLoader,
) -> Result<Option<TraitCatalog>> {
    if let Some(path) = &job.catalog {
        let catalog = TraitCatalog::from_path(path).with_context(|| format!("Failed to load catalog {:?}", path))?;
        if catalog.is_empty() {
            warn!("Catalog {:?} lists no models", path);
        } else {
            info!("Loaded catalog with {} models", catalog.len());
        }
        return Ok(Some(catalog));
    }

    let needs_catalog = job
        .traits
        .iter()
        .any(|t| mapping.get(t).map_or(true, |ids| ids.is_empty()));
    if !needs_catalog {
        return Ok(None);
    }
    if !job.engine.loader.use_remote {
        warn!("Offline and no catalog given; traits without explicit models will not be scored");
        return Ok(None);
    }

    match TraitCatalog::fetch(loader.client(), SCORES_METADATA_URL).await {
        Ok(catalog) => {
            info!("Fetched catalog with {} models", catalog.len());
            Ok(Some(catalog))
        }
        Err(e) => {
            warn!("Catalog metadata unavailable: {}", e);
            Ok(None)
        }
    }
}

async fn build_reference(job: &JobFile, models: &[String], out: &Path, refresh: bool) -> Result<()> {
    let af_map = load_af_map(job)?;
    let loader = ScoringFileLoader::new(job.engine.loader.clone()).context("Failed to create scoring file loader")?;
    let store = ReferenceStoreBuilder::new(&loader, af_map.as_ref()).build(models, refresh).await;
    if store.scores.is_empty() {
        warn!("No model produced usable reference moments");
    }
    store
        .save(out)
        .with_context(|| format!("Failed to write reference stats {:?}", out))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prs_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("PRS engine starting...");

    let mut args = Args::parse();
    let command = args.command.take();
    let (job, mapping, catalog_build, refresh) = merge_args(args)?;
    if let Some(Command::BuildReference { models, out }) = command {
        return build_reference(&job, &models, &out, refresh).await;
    }
    if job.traits.is_empty() {
        bail!("No traits requested (--trait, --models or \"traits\" in the job file)");
    }

    let context = load_context(&job).await?;
    let loader = ScoringFileLoader::new(job.engine.loader.clone()).context("Failed to create scoring file loader")?;
    let catalog = load_catalog(&job, &mapping, &loader).await?;

    let mut request = BatchRequest::resolve(&job.traits, &mapping, catalog.as_ref(), catalog_build.as_deref());
    request.refresh = refresh;
    info!("Resolved {} models for {} traits", request.model_count(), request.traits.len());

    let (sender, mut events) = progress::channel();
    let progress_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let model = event.model_id.as_deref().unwrap_or("-");
            match event.severity {
                LogSeverity::Info => debug!("[{:>5.1}%] {:?} {}: {}", event.percent, event.phase, model, event.message),
                LogSeverity::Warning | LogSeverity::Error => {
                    warn!("[{:>5.1}%] {:?} {}: {}", event.percent, event.phase, model, event.message)
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing models in flight");
            ctrl_c.cancel();
        }
    });

    let processor = ScoreProcessor::new(Arc::new(job.engine.clone()), loader, Arc::new(context));
    let runner = BatchRunner::new(processor, sender, cancel);
    let report = runner.run(request).await?;
    drop(runner);
    if let Err(e) = progress_task.await {
        warn!("Progress logging task failed: {}", e);
    }

    for summary in &report.summaries {
        info!(
            "{} ({}): {} models, avg score {:.4}, avg percentile {}",
            summary.trait_id,
            summary.trait_label.as_deref().unwrap_or("unlabelled"),
            summary.model_count,
            summary.avg_score,
            summary
                .avg_percentile
                .map(|p| format!("{:.1}", p))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    match &report.composite {
        CompositeOutcome::Aggregated(composite) => info!(
            "Genetic composite: log hazard {:.3}, relative risk {:.3}, index {:.3} ({} traits)",
            composite.log_hazard_total,
            composite.relative_risk,
            composite.index,
            composite.per_trait_contributions.len()
        ),
        CompositeOutcome::NotAggregated { excluded } => {
            info!("Genetic composite not aggregated ({} traits excluded)", excluded.len())
        }
    }

    let output_dir = job.output_dir.clone().unwrap_or_else(|| PathBuf::from("prs_results"));
    let files = OutputGenerator::new(output_dir).generate(&report)?;
    info!("Results written: {:?}, {:?}", files.summary, files.details);

    if report.cancelled {
        warn!("Run was cancelled before every model was scored");
    }

    Ok(())
}
