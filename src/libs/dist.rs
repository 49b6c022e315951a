//! Discrete probability tables sampled by inverse-CDF search.
//!
//! The same type serves two purposes: indel length distributions, whose
//! outcomes are lengths starting at 1, and rate-category draws, whose
//! outcomes are category indices starting at 0.

use crate::libs::error::{Result, SimError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{Discrete, Poisson};
use std::str::FromStr;

/// Allowed deviation of a probability table's sum from 1.
pub const PROB_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteDistribution {
    outcomes: Vec<usize>,
    probs: Vec<f64>,
    cumulative: Vec<f64>,
}

impl DiscreteDistribution {
    /// A table over the outcomes `0..probs.len()`.
    pub fn new(probs: &[f64]) -> Result<Self> {
        let outcomes = (0..probs.len()).collect();
        Self::with_outcomes(outcomes, probs)
    }

    /// A table mapping `outcomes[i]` to `probs[i]`.
    ///
    /// ```
    /// use msagen::libs::dist::DiscreteDistribution;
    ///
    /// let d = DiscreteDistribution::with_outcomes(vec![2, 5], &[0.25, 0.75]).unwrap();
    /// assert_eq!(d.outcomes(), &[2, 5]);
    /// assert!(DiscreteDistribution::new(&[0.5, 0.6]).is_err());
    /// ```
    pub fn with_outcomes(outcomes: Vec<usize>, probs: &[f64]) -> Result<Self> {
        if probs.is_empty() {
            return Err(SimError::InvalidDistribution(
                "empty probability table".to_string(),
            ));
        }
        if outcomes.len() != probs.len() {
            return Err(SimError::InvalidDistribution(format!(
                "{} outcomes but {} probabilities",
                outcomes.len(),
                probs.len()
            )));
        }
        if let Some(bad) = probs
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 1.0)
        {
            return Err(SimError::InvalidDistribution(format!(
                "probability {} outside [0, 1]",
                bad
            )));
        }
        let total: f64 = probs.iter().sum();
        if (total - 1.0).abs() > PROB_TOLERANCE {
            return Err(SimError::InvalidDistribution(format!(
                "probabilities sum to {}, expected 1",
                total
            )));
        }

        let mut cumulative = Vec::with_capacity(probs.len());
        let mut acc = 0.0;
        for p in probs {
            acc += p / total;
            cumulative.push(acc);
        }
        // Pin the tail to 1 so rounding never selects a trailing zero entry
        let last_positive = probs.iter().rposition(|&p| p > 0.0).unwrap_or(0);
        for c in cumulative.iter_mut().skip(last_positive) {
            *c = 1.0;
        }

        Ok(Self {
            outcomes,
            probs: probs.to_vec(),
            cumulative,
        })
    }

    /// Builds a table from unnormalised, non-negative weights.
    fn from_weights(outcomes: Vec<usize>, weights: &[f64]) -> Result<Self> {
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(SimError::InvalidParameter(
                "length distribution has no mass".to_string(),
            ));
        }
        let probs: Vec<f64> = weights.iter().map(|w| w / total).collect();
        Self::with_outcomes(outcomes, &probs)
    }

    /// Draw an outcome with the caller's generator.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let u: f64 = rng.gen();
        let idx = self
            .cumulative
            .partition_point(|&c| c <= u)
            .min(self.outcomes.len() - 1);
        self.outcomes[idx]
    }

    pub fn outcomes(&self) -> &[usize] {
        &self.outcomes
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probs
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn mean(&self) -> f64 {
        self.outcomes
            .iter()
            .zip(&self.probs)
            .map(|(&o, &p)| o as f64 * p)
            .sum()
    }

    pub fn max_outcome(&self) -> usize {
        self.outcomes.iter().copied().max().unwrap_or(0)
    }
}

/// Point mass at length 1.
impl Default for DiscreteDistribution {
    fn default() -> Self {
        Self {
            outcomes: vec![1],
            probs: vec![1.0],
            cumulative: vec![1.0],
        }
    }
}

//----------------------------
// Length distributions
//----------------------------

/// Every event has exactly `len` sites.
pub fn point_mass(len: usize) -> Result<DiscreteDistribution> {
    if len == 0 {
        return Err(SimError::InvalidParameter(
            "point mass length must be at least 1".to_string(),
        ));
    }
    DiscreteDistribution::with_outcomes(vec![len], &[1.0])
}

/// `probs[i]` is the probability of length `i + 1`.
pub fn custom_lengths(probs: &[f64]) -> Result<DiscreteDistribution> {
    let outcomes = (1..=probs.len()).collect();
    DiscreteDistribution::with_outcomes(outcomes, probs)
}

/// Zipf (power law) lengths, P(k) ∝ k^-a for k in 1..=max.
pub fn zipf(a: f64, max: usize) -> Result<DiscreteDistribution> {
    if !(a > 0.0) || !a.is_finite() {
        return Err(SimError::InvalidParameter(format!(
            "zipf exponent must be positive, got {}",
            a
        )));
    }
    check_max(max)?;
    let weights: Vec<f64> = (1..=max).map(|k| (k as f64).powf(-a)).collect();
    DiscreteDistribution::from_weights((1..=max).collect(), &weights)
}

/// Geometric lengths, P(k) ∝ (1-p)^(k-1) p for k in 1..=max.
pub fn geometric(p: f64, max: usize) -> Result<DiscreteDistribution> {
    if !(p > 0.0 && p <= 1.0) {
        return Err(SimError::InvalidParameter(format!(
            "geometric p must be in (0, 1], got {}",
            p
        )));
    }
    check_max(max)?;
    let weights: Vec<f64> = (1..=max)
        .map(|k| (1.0 - p).powi(k as i32 - 1) * p)
        .collect();
    DiscreteDistribution::from_weights((1..=max).collect(), &weights)
}

/// Poisson lengths shifted by one, P(k) ∝ Pois(k-1; lambda) for k in 1..=max.
pub fn poisson(lambda: f64, max: usize) -> Result<DiscreteDistribution> {
    let pois = Poisson::new(lambda).map_err(|_| {
        SimError::InvalidParameter(format!("poisson lambda must be positive, got {}", lambda))
    })?;
    check_max(max)?;
    let weights: Vec<f64> = (1..=max).map(|k| pois.pmf(k as u64 - 1)).collect();
    DiscreteDistribution::from_weights((1..=max).collect(), &weights)
}

fn check_max(max: usize) -> Result<()> {
    if max == 0 {
        return Err(SimError::InvalidParameter(
            "maximum length must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Parses the compact command-line form of a length distribution:
/// `fixed:N`, `zipf:A:MAX`, `geom:P:MAX`, `poisson:L:MAX`, `custom:p1,p2,...`.
impl FromStr for DiscreteDistribution {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().splitn(3, ':').collect();
        let bad = || SimError::InvalidParameter(format!("cannot parse length distribution {:?}", s));

        let num = |i: usize| -> Result<f64> {
            parts
                .get(i)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .ok_or_else(bad)
        };
        let max = |i: usize| -> Result<usize> {
            parts
                .get(i)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(bad)
        };

        match parts[0].to_ascii_lowercase().as_str() {
            "fixed" if parts.len() == 2 => point_mass(max(1)?),
            "zipf" if parts.len() == 3 => zipf(num(1)?, max(2)?),
            "geom" | "geometric" if parts.len() == 3 => geometric(num(1)?, max(2)?),
            "poisson" if parts.len() == 3 => poisson(num(1)?, max(2)?),
            "custom" if parts.len() == 2 => {
                let probs = parts[1]
                    .split(',')
                    .map(|v| v.trim().parse::<f64>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| bad())?;
                custom_lengths(&probs)
            }
            _ => Err(bad()),
        }
    }
}

/// A probability table bundled with its own generator.
///
/// Two samplers built from the same table and seed produce identical draws.
#[derive(Debug, Clone)]
pub struct SeededSampler {
    dist: DiscreteDistribution,
    rng: StdRng,
}

impl SeededSampler {
    pub fn new(dist: DiscreteDistribution, seed: u64) -> Self {
        Self {
            dist,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn draw(&mut self) -> usize {
        self.dist.sample(&mut self.rng)
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn distribution(&self) -> &DiscreteDistribution {
        &self.dist
    }
}
