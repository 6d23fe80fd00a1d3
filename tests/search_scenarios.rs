// tests/search_scenarios.rs

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use kernel_search::fitness::bic_fitness;
use kernel_search::{
    canonical_form, simplify, summands, BaseKind, Grammar, KernelTree, Mutation, ScoringError,
    SearchConfig, SearchDriver, StopReason, DEFAULT_GRAMMAR,
};

fn kinds(tree: &KernelTree) -> BTreeSet<BaseKind> {
    tree.leaves().map(|l| l.kind()).collect()
}

/// Pretend log-likelihood: every distinct summand that matches a summand of
/// `target` explains a large share of the data; a summand built from a
/// strict subset of a target summand's bases explains a little.
fn synthetic_scorer(
    target: &str,
) -> impl Fn(&KernelTree) -> Result<f64, ScoringError> + Sync {
    let target: KernelTree = target.parse().unwrap();
    let wanted: Vec<(String, BTreeSet<BaseKind>)> = summands(&target)
        .iter()
        .map(|t| (t.to_string(), kinds(t)))
        .collect();
    move |tree: &KernelTree| {
        let mut parts: Vec<KernelTree> = summands(tree);
        parts.sort_by_key(|t| t.to_string());
        parts.dedup_by_key(|t| t.to_string());
        let explained: f64 = parts
            .iter()
            .map(|part| {
                let text = part.to_string();
                let own = kinds(part);
                if wanted.iter().any(|(w, _)| *w == text) {
                    40.0
                } else if wanted
                    .iter()
                    .any(|(_, k)| own.is_subset(k) && own.len() < k.len())
                {
                    15.0
                } else {
                    0.0
                }
            })
            .sum();
        Ok(bic_fitness(-100.0 + explained, tree.n_params(), 200))
    }
}

#[test_log::test]
fn test_seed_neighbourhood_scenario() {
    let mut seeds = DEFAULT_GRAMMAR.seeds();
    let before: Vec<String> = seeds.iter().map(|t| t.to_string()).collect();
    for seed in &mut seeds {
        simplify(seed);
    }
    let after: Vec<String> = seeds.iter().map(|t| t.to_string()).collect();
    assert_eq!(before, after);
    assert_eq!(after, vec!["SE", "LIN", "PER"]);

    let se = KernelTree::leaf(BaseKind::SquaredExp);
    let moves: Vec<Mutation> = DEFAULT_GRAMMAR.neighbors(&se).map(|n| n.mutation).collect();
    let replace = moves.iter().filter(|m| matches!(m, Mutation::Replace { .. })).count();
    let expand = moves.iter().filter(|m| matches!(m, Mutation::Expand { .. })).count();
    let remove = moves.iter().filter(|m| matches!(m, Mutation::Remove { .. })).count();
    assert_eq!((replace, expand, remove), (2, 6, 0));
}

#[test_log::test]
fn test_search_finds_target_summands() {
    let scorer = synthetic_scorer("(+ (* PER SE) LIN)");
    let config = SearchConfig::default().with_steps(6).with_workers(4);
    let outcome = SearchDriver::new(config, &scorer).run();

    assert_eq!(outcome.stop_reason, StopReason::BudgetExhausted);
    let best = outcome.best().unwrap();
    let hits: HashSet<String> = summands(&best.tree).iter().map(|t| t.to_string()).collect();
    assert!(hits.contains("LIN"));
    assert!(hits.contains("(* PER SE)"));

    // Ranking is descending and every entry is distinct and canonical.
    let mut seen = HashSet::new();
    for pair in outcome.ranked.windows(2) {
        assert!(pair[0].fitness >= pair[1].fitness);
    }
    for scored in &outcome.ranked {
        assert!(seen.insert(scored.canonical.clone()));
        assert_eq!(canonical_form(&scored.tree), scored.canonical);
    }
}

#[test_log::test]
fn test_scorer_never_sees_a_duplicate() {
    let calls = Mutex::new(Vec::new());
    let inner = synthetic_scorer("(* SE PER)");
    let scorer = |tree: &KernelTree| {
        calls.lock().unwrap().push(tree.to_string());
        inner(tree)
    };
    let outcome = SearchDriver::new(SearchConfig::default().with_steps(4), &scorer).run();
    let calls = calls.into_inner().unwrap();
    let unique: HashSet<&String> = calls.iter().collect();
    assert_eq!(unique.len(), calls.len());
    assert_eq!(outcome.evaluated, calls.len());
}

#[test_log::test]
fn test_flaky_scorer_does_not_abort() {
    let inner = synthetic_scorer("(+ SE PER)");
    let scorer = |tree: &KernelTree| {
        if tree.leaf_count() == 2 && tree.leaves().all(|l| l.kind() == BaseKind::Linear) {
            panic!("singular covariance");
        }
        if tree.n_params() > 6 {
            return Err(ScoringError::new("optimizer did not converge"));
        }
        inner(tree)
    };
    let outcome = SearchDriver::new(SearchConfig::default().with_steps(4), &scorer).run();
    assert!(outcome.failures > 0);
    assert_eq!(outcome.best().unwrap().canonical, "(+ PER SE)");
    assert!(outcome.ranked.iter().all(|s| s.tree.n_params() <= 6));
}

#[test_log::test]
fn test_config_file_and_report() {
    let path = std::env::temp_dir().join(format!("kernel-search-{}.json", std::process::id()));
    std::fs::write(
        &path,
        r#"{ "n_steps": 3, "max_workers": 2, "grammar": { "bases": ["SE", "LIN"] } }"#,
    )
    .unwrap();
    let config = SearchConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(
        config.grammar,
        Grammar::new(
            vec![BaseKind::SquaredExp, BaseKind::Linear],
            DEFAULT_GRAMMAR.operators.clone()
        )
    );

    let scorer = synthetic_scorer("(+ SE LIN)");
    let report = SearchDriver::new(config, &scorer).run().to_report();
    assert_eq!(report.steps_run, 3);
    assert_eq!(report.ranked[0].kernel, "(+ LIN SE)");

    let json = report.to_json().unwrap();
    assert!(json.contains("BudgetExhausted"));
    for entry in &report.ranked {
        let tree: KernelTree = entry.kernel.parse().unwrap();
        assert_eq!(tree.to_string(), entry.kernel);
    }
}
