//! Greedy structure search over the kernel grammar.
//!
//! # Loop
//!
//! ```text
//! frontier ──simplify──► canonical key ──unseen?──► score (worker pool)
//!     ▲                                                   │
//!     └──────── neighbours of best so far ◄── rank ◄──────┘
//! ```
//!
//! The scorer is an injected black box. It may write fitted parameters back
//! into the candidate's leaves; clones taken for the next frontier carry
//! them over. Candidates it fails on are dropped and logged; the run
//! carries on. The `seen` set of canonical strings is
//! owned by the driver, so independent drivers never interfere.

mod pool;


use std::cmp::Ordering;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::canon::{canonical_string, simplify};
use crate::config::SearchConfig;
use crate::error::ScoringError;
use crate::kernel::Leaf;
use crate::tree::{KernelTree, NodeId};

// ============================================================================
// Scorer
// ============================================================================

/// External fitness oracle. Higher fitness is better.
///
/// Implementations own whatever data they evaluate against. Calls for
/// different trees may run concurrently.
pub trait Scorer: Sync {
    fn score(&self, tree: &KernelTree) -> Result<f64, ScoringError>;

    /// Score a candidate, optionally storing fitted leaf parameters in it.
    ///
    /// The driver calls this one. The default only reads the structure.
    fn fit(&self, candidate: &mut Candidate<'_>) -> Result<f64, ScoringError> {
        self.score(candidate)
    }
}

impl<F> Scorer for F
where
    F: Fn(&KernelTree) -> Result<f64, ScoringError> + Sync,
{
    fn score(&self, tree: &KernelTree) -> Result<f64, ScoringError> {
        self(tree)
    }
}

/// A tree being scored. The structure is read-only; leaf parameters are not.
pub struct Candidate<'a> {
    tree: &'a mut KernelTree,
}

impl<'a> Candidate<'a> {
    pub fn new(tree: &'a mut KernelTree) -> Self {
        Self { tree }
    }

    pub fn leaf_at_mut(&mut self, id: NodeId) -> Option<&mut Leaf> {
        self.tree.leaf_at_mut(id)
    }

    /// Leaves in post-order, mutably.
    pub fn leaves_mut(&mut self) -> Vec<&mut Leaf> {
        self.tree.leaves_mut()
    }
}

impl Deref for Candidate<'_> {
    type Target = KernelTree;

    fn deref(&self) -> &KernelTree {
        &*self.tree
    }
}

// ============================================================================
// Results
// ============================================================================

/// A scored candidate.
#[derive(Debug, Clone)]
pub struct Scored {
    /// Simplified tree, with whatever parameters the scorer fitted.
    pub tree: KernelTree,
    /// Canonical string of `tree`.
    pub canonical: String,
    pub fitness: f64,
    /// Step in which the candidate was scored (0-based).
    pub step: usize,
}

/// Descending fitness, ties broken by the smaller canonical string.
fn rank_order(a: &Scored, b: &Scored) -> Ordering {
    b.fitness
        .total_cmp(&a.fitness)
        .then_with(|| a.canonical.cmp(&b.canonical))
}

/// Why the search terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Ran `n_steps` steps.
    BudgetExhausted,
    /// A step had no unseen candidate left to score.
    FrontierExhausted,
    /// Cancelled through a [`CancelToken`].
    Cancelled,
}

/// Counters for one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    pub step: usize,
    /// Trees in the frontier before deduplication.
    pub frontier: usize,
    /// Trees dropped because their canonical form was already seen.
    pub duplicates: usize,
    /// Trees successfully scored.
    pub scored: usize,
    /// Trees the scorer failed on.
    pub failed: usize,
}

impl StepReport {
    /// Unseen candidates handed to the scorer.
    pub fn submitted(&self) -> usize {
        self.scored + self.failed
    }
}

/// Cooperative cancellation flag shared with the driver.
///
/// Cancelling lets the current scoring batch drain; no further step starts.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(atomic::Ordering::SeqCst)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Iterative greedy search.
pub struct SearchDriver<'s, S: Scorer + ?Sized> {
    config: SearchConfig,
    scorer: &'s S,
    frontier: Vec<KernelTree>,
    seen: HashSet<String>,
    results: Vec<Scored>,
    steps_run: usize,
    failures: usize,
    cancel: CancelToken,
}

impl<'s, S: Scorer + ?Sized> SearchDriver<'s, S> {
    /// Driver seeded with one single-leaf tree per base kernel of the grammar.
    pub fn new(config: SearchConfig, scorer: &'s S) -> Self {
        let frontier = config.grammar.seeds();
        Self {
            config,
            scorer,
            frontier,
            seen: HashSet::new(),
            results: Vec::new(),
            steps_run: 0,
            failures: 0,
            cancel: CancelToken::new(),
        }
    }

    /// Replace the initial frontier.
    pub fn with_seeds(mut self, seeds: Vec<KernelTree>) -> Self {
        self.frontier = seeds;
        self
    }

    /// Share an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn frontier(&self) -> &[KernelTree] {
        &self.frontier
    }

    /// Canonical strings of every tree submitted to the scorer so far.
    pub fn seen(&self) -> &HashSet<String> {
        &self.seen
    }

    /// All scored candidates, best first.
    pub fn results(&self) -> &[Scored] {
        &self.results
    }

    pub fn best(&self) -> Option<&Scored> {
        self.results.first()
    }

    pub fn steps_run(&self) -> usize {
        self.steps_run
    }

    /// Run one step: dedup, score, rank, and build the next frontier.
    pub fn step(&mut self) -> StepReport {
        let step = self.steps_run;
        let frontier = std::mem::take(&mut self.frontier);
        let mut report = StepReport {
            step,
            frontier: frontier.len(),
            ..StepReport::default()
        };
        info!("Step {}: {} candidates in frontier", step, frontier.len());

        let mut fresh = Vec::new();
        let mut keys = Vec::new();
        for mut tree in frontier {
            simplify(&mut tree);
            let key = canonical_string(&tree);
            if self.seen.insert(key.clone()) {
                fresh.push(tree);
                keys.push(key);
            } else {
                trace!("Already seen {}", key);
                report.duplicates += 1;
            }
        }
        debug!(
            "Step {}: {} unseen, {} duplicates",
            step,
            fresh.len(),
            report.duplicates
        );

        let scores = pool::score_batch(self.scorer, &mut fresh, self.config.max_workers);
        for ((tree, canonical), score) in fresh.into_iter().zip(keys).zip(scores) {
            match score {
                Ok(fitness) if fitness.is_finite() => {
                    trace!("{} -> {}", canonical, fitness);
                    report.scored += 1;
                    self.results.push(Scored {
                        tree,
                        canonical,
                        fitness,
                        step,
                    });
                }
                Ok(fitness) => {
                    warn!("Dropping {}: non-finite fitness {}", canonical, fitness);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("Dropping {}: {}", canonical, e);
                    report.failed += 1;
                }
            }
        }
        self.failures += report.failed;
        self.results.sort_by(rank_order);

        if let Some(best) = self.results.first() {
            info!(
                "Step {}: best {} (fitness {:.4})",
                step, best.canonical, best.fitness
            );
            self.frontier = self
                .config
                .grammar
                .neighbors(&best.tree)
                .map(|n| n.tree)
                .collect();
        }
        self.steps_run += 1;
        report
    }

    /// Run until the step budget is spent, the frontier runs dry, or the
    /// token is cancelled.
    pub fn run(mut self) -> SearchOutcome {
        let mut stop_reason = StopReason::BudgetExhausted;
        while self.steps_run < self.config.n_steps {
            if self.cancel.is_cancelled() {
                info!("Search cancelled after {} steps", self.steps_run);
                stop_reason = StopReason::Cancelled;
                break;
            }
            let report = self.step();
            if report.submitted() == 0 {
                info!("No unseen candidates left after step {}", report.step);
                stop_reason = StopReason::FrontierExhausted;
                break;
            }
        }
        SearchOutcome {
            evaluated: self.seen.len(),
            failures: self.failures,
            steps_run: self.steps_run,
            stop_reason,
            ranked: self.results,
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Final state of a search run.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Every scored candidate, best first.
    pub ranked: Vec<Scored>,
    pub steps_run: usize,
    /// Distinct candidates submitted to the scorer.
    pub evaluated: usize,
    pub failures: usize,
    pub stop_reason: StopReason,
}

impl SearchOutcome {
    pub fn best(&self) -> Option<&Scored> {
        self.ranked.first()
    }

    pub fn to_report(&self) -> SearchReport {
        SearchReport {
            ranked: self
                .ranked
                .iter()
                .map(|s| RankedEntry {
                    kernel: s.canonical.clone(),
                    fitness: s.fitness,
                    step: s.step,
                })
                .collect(),
            steps_run: self.steps_run,
            evaluated: self.evaluated,
            failures: self.failures,
            stop_reason: self.stop_reason,
        }
    }
}

/// Serializable summary of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub ranked: Vec<RankedEntry>,
    pub steps_run: usize,
    pub evaluated: usize,
    pub failures: usize,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// Canonical string, parseable back into a tree.
    pub kernel: String,
    pub fitness: f64,
    pub step: usize,
}

impl SearchReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
