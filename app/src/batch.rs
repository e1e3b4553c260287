// ==============================================================================
// batch.rs - Batch Scoring
// ==============================================================================
// Description: Scores every requested model on a bounded pool of tasks,
//              isolates per-model failures and aggregates the results
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-18
// Version: 1.1.0
// ==============================================================================

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::{hazard_composite, summarize_traits, CompositeError};
use crate::models::{ExcludedTrait, GeneticComposite, ScoreResult, TraitSummary};
use crate::parsers::TraitCatalog;
use crate::processor::{ErrorCategory, ModelError, ScoreProcessor};
use crate::progress::{ProgressPhase, ProgressSender};

/// Models to score for one trait
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraitRequest {
    pub trait_id: String,
    pub model_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRequest {
    pub traits: Vec<TraitRequest>,
    /// Bypass the scoring file cache
    pub refresh: bool,
}

impl BatchRequest {
    /// Resolve model ids per trait
    ///
    /// # Arguments
    /// * `trait_ids` - Traits to score, in output order
    /// * `explicit` - Trait → model ids; a non-empty entry wins over the catalog
    /// * `catalog` - Catalog metadata consulted for traits without an entry
    /// * `build` - Restrict catalog models to this source genome build
    pub fn resolve(
        trait_ids: &[String],
        explicit: &BTreeMap<String, Vec<String>>,
        catalog: Option<&TraitCatalog>,
        build: Option<&str>,
    ) -> Self {
        let traits = trait_ids
            .iter()
            .map(|trait_id| {
                let candidates = match explicit.get(trait_id).filter(|ids| !ids.is_empty()) {
                    Some(ids) => ids.clone(),
                    None => catalog
                        .map(|c| c.models_for(trait_id, build))
                        .unwrap_or_default(),
                };
                let mut model_ids: Vec<String> = Vec::with_capacity(candidates.len());
                for id in candidates {
                    let id = id.trim().to_string();
                    if !id.is_empty() && !model_ids.contains(&id) {
                        model_ids.push(id);
                    }
                }
                TraitRequest {
                    trait_id: trait_id.clone(),
                    model_ids,
                }
            })
            .collect();

        Self { traits, refresh: false }
    }

    pub fn model_count(&self) -> usize {
        self.traits.iter().map(|t| t.model_ids.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Scored,
    Skipped { category: ErrorCategory, message: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelOutcome {
    pub model_id: String,
    pub trait_id: String,
    #[serde(flatten)]
    pub status: ModelStatus,
}

/// Terminal failure for one trait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitFailureReason {
    /// No scoring model resolved for the trait
    NoModels,
    /// The genotype input holds no called variants
    NoUsableGenotypes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraitFailure {
    pub trait_id: String,
    pub reason: TraitFailureReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompositeOutcome {
    Aggregated(GeneticComposite),
    NotAggregated { excluded: Vec<ExcludedTrait> },
}

impl CompositeOutcome {
    pub fn composite(&self) -> Option<&GeneticComposite> {
        match self {
            CompositeOutcome::Aggregated(composite) => Some(composite),
            CompositeOutcome::NotAggregated { .. } => None,
        }
    }
}

/// Everything one batch produced
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ScoreResult>,
    pub outcomes: Vec<ModelOutcome>,
    pub trait_failures: Vec<TraitFailure>,
    pub summaries: Vec<TraitSummary>,
    pub composite: CompositeOutcome,
    pub cancelled: bool,
}

enum TaskOutput {
    Finished(Result<ScoreResult, ModelError>),
    Cancelled,
}

/// Runs a batch of independent model evaluations
#[derive(Debug, Clone)]
pub struct BatchRunner {
    processor: ScoreProcessor,
    progress: ProgressSender,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(processor: ScoreProcessor, progress: ProgressSender, cancel: CancellationToken) -> Self {
        Self {
            processor,
            progress,
            cancel,
        }
    }

    /// Score every requested model
    ///
    /// Per-model failures are recorded in the report and never abort the
    /// batch. Cancellation is checked before each model starts.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchReport> {
        let started_at = Utc::now();
        let run_id = self.progress.run_id();
        let genome_empty = !self.processor.context().genome.has_calls();

        let mut trait_failures = Vec::new();
        let mut jobs = Vec::new();
        for trait_request in &request.traits {
            let reason = if trait_request.model_ids.is_empty() {
                Some(TraitFailureReason::NoModels)
            } else if genome_empty {
                Some(TraitFailureReason::NoUsableGenotypes)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    warn!("Trait {} cannot be scored: {:?}", trait_request.trait_id, reason);
                    self.progress.emit(
                        self.progress
                            .event(ProgressPhase::TraitFailed, 0.0, format!("{:?}", reason))
                            .with_trait(&trait_request.trait_id),
                    );
                    trait_failures.push(TraitFailure {
                        trait_id: trait_request.trait_id.clone(),
                        reason,
                    });
                }
                None => jobs.extend(
                    trait_request
                        .model_ids
                        .iter()
                        .map(|model_id| (trait_request.trait_id.clone(), model_id.clone())),
                ),
            }
        }

        let total = jobs.len();
        info!(
            "Scoring {} models across {} traits (concurrency {})",
            total,
            request.traits.len(),
            self.processor.config().concurrency
        );
        self.progress.emit(
            self.progress
                .event(ProgressPhase::RunStarted, 0.0, format!("{} models queued", total)),
        );

        let semaphore = Arc::new(Semaphore::new(self.processor.config().concurrency.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for (idx, (trait_id, model_id)) in jobs.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let processor = self.processor.clone();
            let progress = self.progress.clone();
            let cancel = self.cancel.clone();
            let refresh = request.refresh;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, trait_id, model_id, TaskOutput::Cancelled);
                };
                if cancel.is_cancelled() {
                    return (idx, trait_id, model_id, TaskOutput::Cancelled);
                }

                let done = completed.load(Ordering::SeqCst);
                progress.emit(
                    progress
                        .event(ProgressPhase::Loading, percent(done, total), format!("Scoring {}", model_id))
                        .with_model(&model_id, &trait_id),
                );

                let scoring = {
                    let (model_id, trait_id) = (model_id.clone(), trait_id.clone());
                    async move { processor.score_model(&model_id, &trait_id, refresh).await }
                };
                let result = isolated(scoring).await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let event = match &result {
                    Ok(score) => progress.event(
                        ProgressPhase::ModelCompleted,
                        percent(done, total),
                        format!("{} matches, raw score {:.4}", score.matches, score.raw_score),
                    ),
                    Err(e) => progress.event(ProgressPhase::ModelSkipped, percent(done, total), e.to_string()),
                };
                progress.emit(event.with_model(&model_id, &trait_id));

                (idx, trait_id, model_id, TaskOutput::Finished(result))
            });
        }

        let mut finished = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(output) => finished.push(output),
                Err(e) => warn!("Scoring task lost: {}", e),
            }
        }
        let reported: HashSet<usize> = finished.iter().map(|(idx, ..)| *idx).collect();
        for (idx, (trait_id, model_id)) in jobs.into_iter().enumerate() {
            if !reported.contains(&idx) {
                let error = ModelError::TaskFailed("task ended without a result".to_string());
                finished.push((idx, trait_id, model_id, TaskOutput::Finished(Err(error))));
            }
        }
        finished.sort_by_key(|(idx, ..)| *idx);

        let mut results = Vec::new();
        let mut outcomes = Vec::with_capacity(finished.len());
        let mut cancelled = false;
        for (_, trait_id, model_id, output) in finished {
            let status = match output {
                TaskOutput::Finished(Ok(result)) => {
                    results.push(result);
                    ModelStatus::Scored
                }
                TaskOutput::Finished(Err(e)) => {
                    warn!("Skipping {} for {}: {}", model_id, trait_id, e);
                    ModelStatus::Skipped {
                        category: e.category(),
                        message: e.to_string(),
                    }
                }
                TaskOutput::Cancelled => {
                    cancelled = true;
                    ModelStatus::Cancelled
                }
            };
            outcomes.push(ModelOutcome {
                model_id,
                trait_id,
                status,
            });
        }

        self.progress
            .emit(self.progress.event(ProgressPhase::Aggregating, 100.0, "Aggregating results"));
        let summaries = summarize_traits(&results);
        let context = self.processor.context();
        let composite = match hazard_composite(
            &results,
            &context.ancestry,
            &context.effect_sizes,
            &self.processor.config().composite,
        ) {
            Ok(composite) => CompositeOutcome::Aggregated(composite),
            Err(CompositeError::NotAggregated { excluded }) => {
                info!("Genetic composite not aggregated");
                CompositeOutcome::NotAggregated { excluded }
            }
        };

        let (phase, message) = if cancelled {
            (ProgressPhase::Cancelled, "Run cancelled")
        } else {
            (ProgressPhase::RunFinished, "Run finished")
        };
        self.progress.emit(self.progress.event(phase, 100.0, message));
        info!(
            "Batch {} done: {} scored, {} skipped, {} trait failures",
            run_id,
            results.len(),
            outcomes.len() - results.len(),
            trait_failures.len()
        );

        Ok(BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results,
            outcomes,
            trait_failures,
            summaries,
            composite,
            cancelled,
        })
    }
}

/// Run one model evaluation on its own task so a panic stays with that model
async fn isolated<F>(evaluation: F) -> Result<ScoreResult, ModelError>
where
    F: Future<Output = Result<ScoreResult, ModelError>> + Send + 'static,
{
    match tokio::spawn(evaluation).await {
        Ok(result) => result,
        Err(e) => Err(ModelError::TaskFailed(e.to_string())),
    }
}

fn percent(done: usize, total: usize) -> f32 {
    if total == 0 {
        100.0
    } else {
        done as f32 / total as f32 * 100.0
    }
}
