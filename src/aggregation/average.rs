//! Averaging primitives shared by the aggregation engine and the round
//! coordinator.
//!
//! Both federated averaging paths must agree exactly on numeric semantics,
//! so this module is the single implementation: unweighted means are
//! sum-then-divide, weighted means normalize the weights to sum to 1 and
//! accumulate in input order for reproducible floating-point results.

use std::collections::BTreeMap;

use super::{AggregationError, ParamValue, Parameters};

/// Normalize weights to sum to 1.
///
/// The weight count must match the contributor count and the sum must be
/// nonzero; both are caller errors.
pub fn normalize_weights(weights: &[f64], expected: usize) -> Result<Vec<f64>, AggregationError> {
    if weights.len() != expected {
        return Err(AggregationError::WeightCountMismatch {
            expected,
            actual: weights.len(),
        });
    }
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return Err(AggregationError::ZeroWeightSum);
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

/// Mean of equal-length parameter vectors, optionally weighted.
///
/// With `weights` absent this is the plain arithmetic mean; otherwise the
/// weights are normalized and applied per contributor.
pub fn weighted_vector_mean(
    vectors: &[Vec<f64>],
    weights: Option<&[f64]>,
) -> Result<Vec<f64>, AggregationError> {
    if vectors.is_empty() {
        return Err(AggregationError::EmptyInput);
    }

    let normalized = weights.map(|w| normalize_weights(w, vectors.len())).transpose()?;
    let dim = vectors[0].len();
    let mut sums = vec![0.0f64; dim];
    let mut mass = 0.0f64;

    for (i, vector) in vectors.iter().enumerate() {
        if vector.len() != dim {
            return Err(AggregationError::VectorLengthMismatch {
                index: i,
                expected: dim,
                actual: vector.len(),
            });
        }
        let weight = normalized.as_ref().map_or(1.0, |w| w[i]);
        for (sum, value) in sums.iter_mut().zip(vector) {
            *sum += weight * value;
        }
        mass += weight;
    }

    for sum in &mut sums {
        *sum /= mass;
    }
    Ok(sums)
}

enum Accumulator {
    Scalar { sum: f64, mass: f64 },
    Vector { sums: Vec<f64>, mass: f64 },
}

/// Per-name mean across parameter mappings, optionally weighted.
///
/// A name absent from a contributor is skipped for that contributor (not
/// treated as zero): the mean for that name runs over whichever contributors
/// supplied it, renormalizing their weight mass. Vector-valued entries are
/// averaged element-wise and must share length wherever they appear.
pub fn weighted_parameter_mean(
    sets: &[Parameters],
    weights: Option<&[f64]>,
) -> Result<Parameters, AggregationError> {
    if sets.is_empty() {
        return Err(AggregationError::EmptyInput);
    }

    let normalized = weights.map(|w| normalize_weights(w, sets.len())).transpose()?;
    let mut accumulators: BTreeMap<String, Accumulator> = BTreeMap::new();

    for (i, set) in sets.iter().enumerate() {
        let weight = normalized.as_ref().map_or(1.0, |w| w[i]);

        for (name, value) in set {
            match (accumulators.get_mut(name.as_str()), value) {
                (None, ParamValue::Scalar(x)) => {
                    accumulators.insert(
                        name.clone(),
                        Accumulator::Scalar {
                            sum: weight * x,
                            mass: weight,
                        },
                    );
                }
                (None, ParamValue::Vector(xs)) => {
                    accumulators.insert(
                        name.clone(),
                        Accumulator::Vector {
                            sums: xs.iter().map(|x| weight * x).collect(),
                            mass: weight,
                        },
                    );
                }
                (Some(Accumulator::Scalar { sum, mass }), ParamValue::Scalar(x)) => {
                    *sum += weight * x;
                    *mass += weight;
                }
                (Some(Accumulator::Vector { sums, mass }), ParamValue::Vector(xs)) => {
                    if xs.len() != sums.len() {
                        return Err(AggregationError::LengthMismatch {
                            name: name.clone(),
                            expected: sums.len(),
                            actual: xs.len(),
                        });
                    }
                    for (sum, x) in sums.iter_mut().zip(xs) {
                        *sum += weight * x;
                    }
                    *mass += weight;
                }
                (Some(_), _) => {
                    return Err(AggregationError::TypeMismatch { name: name.clone() });
                }
            }
        }
    }

    let mut result = Parameters::new();
    for (name, acc) in accumulators {
        match acc {
            Accumulator::Scalar { sum, mass } => {
                result.insert(name, ParamValue::Scalar(sum / mass));
            }
            Accumulator::Vector { sums, mass } => {
                result.insert(
                    name,
                    ParamValue::Vector(sums.into_iter().map(|s| s / mass).collect()),
                );
            }
        }
    }
    Ok(result)
}
