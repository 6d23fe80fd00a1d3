//! Bounded worker pool for scoring a batch of candidates.
//!
//! Workers pull indices from a shared counter, take exclusive access to that
//! slot and report `(index, result)` pairs over a channel; results are
//! returned in input order once the whole batch has drained.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread;

use log::{debug, trace};

use super::{Candidate, Scorer};
use crate::error::ScoringError;
use crate::tree::KernelTree;

/// Score every tree with at most `max_workers` concurrent scorer calls.
///
/// Parameters the scorer fits are left in `trees`. A panicking scorer is
/// reported as a `ScoringError` for that tree only.
pub(crate) fn score_batch<S: Scorer + ?Sized>(
    scorer: &S,
    trees: &mut [KernelTree],
    max_workers: usize,
) -> Vec<Result<f64, ScoringError>> {
    let count = trees.len();
    if count == 0 {
        return Vec::new();
    }
    let workers = max_workers.clamp(1, count);
    debug!("Scoring {} candidates on {} workers", count, workers);

    // Each slot is claimed by exactly one worker, so the locks never contend.
    let slots: Vec<Mutex<&mut KernelTree>> = trees.iter_mut().map(Mutex::new).collect();
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for worker in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let slots = &slots;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(slot) = slots.get(index) else {
                        break;
                    };
                    let mut tree = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    let mut candidate = Candidate::new(&mut **tree);
                    let result =
                        panic::catch_unwind(AssertUnwindSafe(|| scorer.fit(&mut candidate)))
                            .unwrap_or_else(|_| Err(ScoringError::new("scorer panicked")));
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
                trace!("Scoring worker {} finished", worker);
            });
        }
    });
    drop(tx);

    let mut results: Vec<Option<Result<f64, ScoringError>>> = vec![None; count];
    for (index, result) in rx {
        results[index] = Some(result);
    }
    results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| Err(ScoringError::new("no result from scoring worker"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::BaseKind;

    fn trees() -> Vec<KernelTree> {
        ["SE", "LIN", "PER", "(+ SE LIN)", "(* PER SE)"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect()
    }

    #[test_log::test]
    fn test_results_in_input_order() {
        let scorer = |t: &KernelTree| -> Result<f64, ScoringError> { Ok(t.len() as f64) };
        for workers in [1, 2, 8] {
            let scores = score_batch(&scorer, &mut trees(), workers);
            let scores: Vec<f64> = scores.into_iter().map(Result::unwrap).collect();
            assert_eq!(scores, vec![1.0, 1.0, 1.0, 3.0, 3.0]);
        }
    }

    #[test_log::test]
    fn test_failures_stay_per_candidate() {
        let scorer = |t: &KernelTree| {
            if t.leaves().any(|l| l.kind() == BaseKind::Periodic) {
                Err(ScoringError::new("diverged"))
            } else {
                Ok(1.0)
            }
        };
        let scores = score_batch(&scorer, &mut trees(), 3);
        let failed: Vec<bool> = scores.iter().map(Result::is_err).collect();
        assert_eq!(failed, vec![false, false, true, false, true]);
    }

    #[test_log::test]
    fn test_panicking_scorer_is_contained() {
        let scorer = |t: &KernelTree| -> Result<f64, ScoringError> {
            if t.len() > 1 {
                panic!("numerical blow-up");
            }
            Ok(0.0)
        };
        let scores = score_batch(&scorer, &mut trees(), 2);
        assert_eq!(scores[3], Err(ScoringError::new("scorer panicked")));
        assert_eq!(scores[0], Ok(0.0));
    }

    /// Pretends to fit every leaf to 0.5.
    struct HalfFit;

    impl Scorer for HalfFit {
        fn score(&self, tree: &KernelTree) -> Result<f64, ScoringError> {
            Ok(tree.n_params() as f64)
        }

        fn fit(&self, candidate: &mut Candidate<'_>) -> Result<f64, ScoringError> {
            for leaf in candidate.leaves_mut() {
                leaf.set_params(vec![0.5; leaf.arity()])
                    .map_err(|e| ScoringError::new(e.to_string()))?;
            }
            self.score(candidate)
        }
    }

    #[test_log::test]
    fn test_fitted_params_written_back() {
        let mut batch = trees();
        batch[2].fix_parameters();
        let scores = score_batch(&HalfFit, &mut batch, 3);
        assert_eq!(scores[0], Ok(2.0));
        assert!(scores[2].is_err());
        for (i, tree) in batch.iter().enumerate() {
            let fitted = tree.leaves().all(|l| l.params().iter().all(|&v| v == 0.5));
            assert_eq!(fitted, i != 2, "tree {}", tree);
        }
    }

    #[test_log::test]
    fn test_zero_workers_still_scores() {
        let scorer = |_: &KernelTree| -> Result<f64, ScoringError> { Ok(2.0) };
        assert_eq!(score_batch(&scorer, &mut trees(), 0).len(), 5);
    }

    #[test_log::test]
    fn test_concurrency_bounded() {
        use std::time::Duration;

        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let scorer = |_: &KernelTree| -> Result<f64, ScoringError> {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(0.0)
        };
        score_batch(&scorer, &mut trees(), 2);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
