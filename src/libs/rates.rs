//! Site-rate heterogeneity: discrete gamma categories, an invariant-sites
//! category, and the auto-discrete-gamma transition matrix that correlates
//! the categories of adjacent sites (Yang 1995).

use crate::libs::dist::DiscreteDistribution;
use crate::libs::error::{Result, SimError};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use statrs::function::erf::{erfc, erfc_inv};
use statrs::function::gamma::gamma_lr;
use std::f64::consts::{PI, SQRT_2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCategory {
    pub rate: f64,
    pub probability: f64,
}

/// K rate categories, plus the K×K transition matrix when adjacent sites
/// are correlated.
///
/// Probabilities sum to 1 and the probability-weighted mean rate is 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RateCategoryModel {
    categories: Vec<RateCategory>,
    transition: Option<DMatrix<f64>>,
}

impl RateCategoryModel {
    /// A single category of rate 1.
    pub fn uniform() -> Self {
        Self {
            categories: vec![RateCategory {
                rate: 1.0,
                probability: 1.0,
            }],
            transition: None,
        }
    }

    /// Gamma categories, optionally with an invariant class or a correlation
    /// matrix. `pinv > 0` and `rho > 0` together are rejected.
    ///
    /// ```
    /// use msagen::libs::rates::RateCategoryModel;
    ///
    /// let m = RateCategoryModel::build(0.5, 4, 0.2, 0.0).unwrap();
    /// assert_eq!(m.len(), 5);
    /// assert_eq!(m.rates()[0], 0.0);
    /// assert!(RateCategoryModel::build(0.5, 4, 0.2, 0.3).is_err());
    /// ```
    pub fn build(alpha: f64, k: usize, pinv: f64, rho: f64) -> Result<Self> {
        let mut categories = build_gamma_categories(alpha, k)?;
        check_pinv(pinv)?;
        check_rho(rho)?;
        if pinv > 0.0 && rho > 0.0 {
            return Err(SimError::IncompatibleOptions(
                "invariant sites cannot be combined with rate correlation".to_string(),
            ));
        }

        if pinv > 0.0 {
            categories = add_invariant_category(&categories, pinv)?;
        }
        let transition = if rho > 0.0 && k > 1 {
            Some(build_correlation_matrix(alpha, k, rho)?)
        } else {
            if rho > 0.0 {
                log::warn!("Rate correlation needs more than one category; ignoring rho = {}", rho);
            }
            None
        };

        Ok(Self {
            categories,
            transition,
        })
    }

    pub fn categories(&self) -> &[RateCategory] {
        &self.categories
    }

    pub fn rates(&self) -> Vec<f64> {
        self.categories.iter().map(|c| c.rate).collect()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.categories.iter().map(|c| c.probability).collect()
    }

    pub fn transition(&self) -> Option<&DMatrix<f64>> {
        self.transition.as_ref()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn mean_rate(&self) -> f64 {
        self.categories
            .iter()
            .map(|c| c.rate * c.probability)
            .sum()
    }
}

fn check_alpha_k(alpha: f64, k: usize) -> Result<()> {
    if !alpha.is_finite() || alpha <= 0.0 {
        return Err(SimError::InvalidParameter(format!(
            "gamma shape alpha must be positive, got {}",
            alpha
        )));
    }
    if k < 1 {
        return Err(SimError::InvalidParameter(
            "number of rate categories must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn check_pinv(pinv: f64) -> Result<()> {
    if !(0.0..1.0).contains(&pinv) {
        return Err(SimError::InvalidParameter(format!(
            "proportion of invariant sites must be in [0, 1), got {}",
            pinv
        )));
    }
    Ok(())
}

fn check_rho(rho: f64) -> Result<()> {
    if !(0.0..1.0).contains(&rho) {
        return Err(SimError::InvalidParameter(format!(
            "rate correlation rho must be in [0, 1), got {}",
            rho
        )));
    }
    Ok(())
}

//----------------------------
// Discrete gamma
//----------------------------

/// Quantile of Gamma(shape = alpha, rate = alpha), found by bisection on the
/// regularized lower incomplete gamma function.
pub fn gamma_quantile(alpha: f64, p: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let cdf = |x: f64| gamma_lr(alpha, alpha * x);
    let mut lo = 0.0;
    let mut hi = 1.0;
    while cdf(hi) < p {
        lo = hi;
        hi *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if cdf(mid) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= f64::EPSILON * hi {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// K equal-probability categories of Gamma(alpha, 1/alpha), each carrying the
/// conditional mean of its bin.
///
/// The bin mean uses x·f(x; α, α) = f(x; α+1, α), so the mass of the
/// shifted distribution between the bin edges gives the mean in closed form.
pub fn build_gamma_categories(alpha: f64, k: usize) -> Result<Vec<RateCategory>> {
    check_alpha_k(alpha, k)?;
    if k == 1 {
        return Ok(vec![RateCategory {
            rate: 1.0,
            probability: 1.0,
        }]);
    }

    let mut edges = Vec::with_capacity(k + 1);
    edges.push(0.0);
    for i in 1..k {
        edges.push(gamma_quantile(alpha, i as f64 / k as f64));
    }
    edges.push(f64::INFINITY);

    let shifted_cdf = |x: f64| {
        if x.is_infinite() {
            1.0
        } else if x <= 0.0 {
            0.0
        } else {
            gamma_lr(alpha + 1.0, alpha * x)
        }
    };

    let mut rates: Vec<f64> = edges
        .windows(2)
        .map(|w| k as f64 * (shifted_cdf(w[1]) - shifted_cdf(w[0])))
        .collect();

    let mean = rates.iter().sum::<f64>() / k as f64;
    if mean > 0.0 {
        for r in rates.iter_mut() {
            *r /= mean;
        }
    }

    Ok(rates
        .into_iter()
        .map(|rate| RateCategory {
            rate,
            probability: 1.0 / k as f64,
        })
        .collect())
}

/// Prepends a rate-0 category of probability `pinv` and scales the others by
/// `1 - pinv`. Rates of the variable categories are rescaled so the overall
/// mean rate stays 1.
pub fn add_invariant_category(
    categories: &[RateCategory],
    pinv: f64,
) -> Result<Vec<RateCategory>> {
    check_pinv(pinv)?;

    let mut out = Vec::with_capacity(categories.len() + 1);
    out.push(RateCategory {
        rate: 0.0,
        probability: pinv,
    });
    out.extend(categories.iter().map(|c| RateCategory {
        rate: c.rate / (1.0 - pinv),
        probability: c.probability * (1.0 - pinv),
    }));
    Ok(out)
}

//----------------------------
// Auto-discrete-gamma correlation
//----------------------------

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal quantile; ±inf at the ends.
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else if p >= 1.0 {
        f64::INFINITY
    } else {
        -SQRT_2 * erfc_inv(2.0 * p)
    }
}

/// Row-stochastic K×K matrix, M[(i, j)] = P(next site in j | this site in i).
///
/// The gamma bins all have probability 1/K, so their edges map to the
/// normal quantiles of i/K. Joint masses of the latent bivariate normal
/// over each pair of bins are normalised per row.
pub fn build_correlation_matrix(alpha: f64, k: usize, rho: f64) -> Result<DMatrix<f64>> {
    check_alpha_k(alpha, k)?;
    check_rho(rho)?;
    if k == 1 {
        return Ok(DMatrix::from_element(1, 1, 1.0));
    }

    let z: Vec<f64> = (0..=k).map(|i| normal_quantile(i as f64 / k as f64)).collect();

    let mut matrix = DMatrix::from_fn(k, k, |i, j| {
        let mass = bivariate_normal_cdf(z[i + 1], z[j + 1], rho)
            - bivariate_normal_cdf(z[i], z[j + 1], rho)
            - bivariate_normal_cdf(z[i + 1], z[j], rho)
            + bivariate_normal_cdf(z[i], z[j], rho);
        mass.clamp(0.0, 1.0)
    });

    for (i, mut row) in matrix.row_iter_mut().enumerate() {
        let mut sum = row.sum();
        if sum < 1e-10 {
            log::warn!("Row {} of the rate transition matrix has almost no mass", i);
            sum = 1e-10;
        }
        row /= sum;
    }

    Ok(matrix)
}

/// Lag-1 autocorrelation of site rates induced by `matrix` when the
/// categories are the K gamma means of `alpha`.
pub fn realized_correlation(matrix: &DMatrix<f64>, alpha: f64, k: usize) -> Result<f64> {
    let rates = DVector::from_iterator(
        k,
        build_gamma_categories(alpha, k)?.iter().map(|c| c.rate),
    );
    if matrix.shape() != (k, k) {
        return Err(SimError::InvalidParameter(format!(
            "transition matrix is not {}x{}",
            k, k
        )));
    }

    // E[r_i r_{i+1}] and E[r^2] under the uniform stationary distribution
    let w = 1.0 / k as f64;
    let cross = w * rates.dot(&(matrix * &rates));
    let second = w * rates.dot(&rates);

    let denom = second - 1.0;
    if denom < 1e-10 {
        return Ok(0.0);
    }
    Ok((cross - 1.0) / denom)
}

//----------------------------
// Bivariate normal CDF
//----------------------------

// Gauss-Legendre half rules for 6, 12 and 20 points
const GL_W6: [f64; 3] = [0.1713244923791705, 0.3607615730481384, 0.4679139345726904];
const GL_X6: [f64; 3] = [0.9324695142031522, 0.6612093864662647, 0.2386191860831970];
const GL_W12: [f64; 6] = [
    0.04717533638651177,
    0.1069393259953183,
    0.1600783285433464,
    0.2031674267230659,
    0.2334925365383547,
    0.2491470458134029,
];
const GL_X12: [f64; 6] = [
    0.9815606342467191,
    0.9041172563704750,
    0.7699026741943050,
    0.5873179542866171,
    0.3678314989981802,
    0.1252334085114692,
];
const GL_W20: [f64; 10] = [
    0.01761400713915212,
    0.04060142980038694,
    0.06267204833410906,
    0.08327674157670475,
    0.1019301198172404,
    0.1181945319615184,
    0.1316886384491766,
    0.1420961093183821,
    0.1491729864726037,
    0.1527533871307259,
];
const GL_X20: [f64; 10] = [
    0.9931285991850949,
    0.9639719272779138,
    0.9122344282513259,
    0.8391169718222188,
    0.7463319064601508,
    0.6360536807265150,
    0.5108670019508271,
    0.3737060887154196,
    0.2277858511416451,
    0.07652652113349733,
];

/// P(X < h, Y < k) for a standard bivariate normal with correlation `rho`.
///
/// Infinite bounds are resolved exactly; the result is clamped to [0, 1].
pub fn bivariate_normal_cdf(h: f64, k: f64, rho: f64) -> f64 {
    if h == f64::NEG_INFINITY || k == f64::NEG_INFINITY {
        return 0.0;
    }
    if h == f64::INFINITY {
        return normal_cdf(k);
    }
    if k == f64::INFINITY {
        return normal_cdf(h);
    }
    if rho == 0.0 {
        return normal_cdf(h) * normal_cdf(k);
    }

    bvnu(-h, -k, rho).clamp(0.0, 1.0)
}

// Upper orthant P(X > dh, Y > dk), after Genz's BVND.
fn bvnu(dh: f64, dk: f64, r: f64) -> f64 {
    let (w, x): (&[f64], &[f64]) = if r.abs() < 0.3 {
        (&GL_W6, &GL_X6)
    } else if r.abs() < 0.75 {
        (&GL_W12, &GL_X12)
    } else {
        (&GL_W20, &GL_X20)
    };

    let h = dh;
    let mut k = dk;
    let mut hk = h * k;
    let mut bvn = 0.0;

    if r.abs() < 0.925 {
        let hs = (h * h + k * k) / 2.0;
        let asr = r.asin();
        for (wi, xi) in w.iter().zip(x) {
            for t in [1.0 + xi, 1.0 - xi] {
                let sn = (asr * t / 2.0).sin();
                bvn += wi * ((sn * hk - hs) / (1.0 - sn * sn)).exp();
            }
        }
        return bvn * asr / (4.0 * PI) + normal_cdf(-h) * normal_cdf(-k);
    }

    if r < 0.0 {
        k = -k;
        hk = -hk;
    }
    if r.abs() < 1.0 {
        let a_s = (1.0 - r) * (1.0 + r);
        let mut a = a_s.sqrt();
        let bs = (h - k).powi(2);
        let c = (4.0 - hk) / 8.0;
        let d = (12.0 - hk) / 16.0;
        bvn = a
            * (-(bs / a_s + hk) / 2.0).exp()
            * (1.0 - c * (bs - a_s) * (1.0 - d * bs / 5.0) / 3.0 + c * d * a_s * a_s / 5.0);
        if hk > -160.0 {
            let b = bs.sqrt();
            bvn -= (-hk / 2.0).exp()
                * (2.0 * PI).sqrt()
                * normal_cdf(-b / a)
                * b
                * (1.0 - c * bs * (1.0 - d * bs / 5.0) / 3.0);
        }
        a /= 2.0;
        for (wi, xi) in w.iter().zip(x) {
            for t in [1.0 + xi, 1.0 - xi] {
                let xs = (a * t).powi(2);
                let rs = (1.0 - xs).sqrt();
                bvn += a
                    * wi
                    * ((-bs / (2.0 * xs) - hk / (1.0 + rs)).exp() / rs
                        - (-(bs / xs + hk) / 2.0).exp() * (1.0 + c * xs * (1.0 + d * xs)));
            }
        }
        bvn = -bvn / (2.0 * PI);
    }

    if r > 0.0 {
        bvn + normal_cdf(-h.max(k))
    } else {
        let mut out = -bvn;
        if k > h {
            if h < 0.0 {
                out += normal_cdf(k) - normal_cdf(h);
            } else {
                out += normal_cdf(-h) - normal_cdf(-k);
            }
        }
        out
    }
}

//----------------------------
// Per-site category assignment
//----------------------------

/// Draws a category index for every alignment column.
///
/// Without a transition matrix each column is independent. With one, column
/// 0 comes from the uniform stationary distribution and every later column
/// is conditioned on its left neighbour.
#[derive(Debug, Clone)]
pub struct CategorySampler {
    marginal: DiscreteDistribution,
    rows: Option<Vec<DiscreteDistribution>>,
}

impl CategorySampler {
    pub fn new(model: &RateCategoryModel) -> Result<Self> {
        match model.transition() {
            None => Ok(Self {
                marginal: DiscreteDistribution::new(&model.probabilities())?,
                rows: None,
            }),
            Some(matrix) => {
                let k = matrix.nrows();
                let stationary = vec![1.0 / k as f64; k];
                let rows = matrix
                    .row_iter()
                    .map(|row| DiscreteDistribution::new(&row.iter().copied().collect::<Vec<_>>()))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self {
                    marginal: DiscreteDistribution::new(&stationary)?,
                    rows: Some(rows),
                })
            }
        }
    }

    pub fn sample_sites<R: Rng + ?Sized>(&self, width: usize, rng: &mut R) -> Vec<usize> {
        let mut sites = Vec::with_capacity(width);
        match &self.rows {
            None => {
                for _ in 0..width {
                    sites.push(self.marginal.sample(rng));
                }
            }
            Some(rows) => {
                if width == 0 {
                    return sites;
                }
                let mut current = self.marginal.sample(rng);
                sites.push(current);
                for _ in 1..width {
                    current = rows[current].sample(rng);
                    sites.push(current);
                }
            }
        }
        sites
    }
}
