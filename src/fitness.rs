//! Model-selection helpers for scorer implementations.

/// Bayesian information criterion. Lower is better.
///
/// `BIC = ln(n_data) * n_params - 2 * log_likelihood`
pub fn bic(log_likelihood: f64, n_params: usize, n_data: usize) -> f64 {
    (n_data as f64).ln() * n_params as f64 - 2.0 * log_likelihood
}

/// Negated BIC, so that higher fitness means a better model.
pub fn bic_fitness(log_likelihood: f64, n_params: usize, n_data: usize) -> f64 {
    -bic(log_likelihood, n_params, n_data)
}
