use crate::libs::error::{Result, SimError};
use crate::libs::subst::aa_data;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::str::FromStr;

const NUCLEOTIDES: &[u8] = b"ACGT";
const AMINO_ACIDS: &[u8] = b"ARNDCQEGHILKMFPSTWYV";

// Frequencies read from PAML files are rounded; accept and renormalise.
const PAML_FREQ_TOLERANCE: f64 = 1e-3;
const FREQ_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    Nucleotide,
    AminoAcid,
}

impl Alphabet {
    pub fn symbols(&self) -> &'static [u8] {
        match self {
            Alphabet::Nucleotide => NUCLEOTIDES,
            Alphabet::AminoAcid => AMINO_ACIDS,
        }
    }
}

/// Replacement model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCode {
    Jc,
    Hky,
    Tn92,
    Gtr,
    AaJc,
    Wag,
    Lg,
    Jtt,
    Dayhoff,
    Custom,
}

impl ModelCode {
    pub fn alphabet(&self) -> Alphabet {
        match self {
            ModelCode::Jc | ModelCode::Hky | ModelCode::Tn92 | ModelCode::Gtr => {
                Alphabet::Nucleotide
            }
            _ => Alphabet::AminoAcid,
        }
    }

    /// Number of numeric parameters the model takes.
    pub fn num_params(&self) -> usize {
        match self {
            ModelCode::Hky => 5,
            ModelCode::Tn92 => 2,
            ModelCode::Gtr => 10,
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelCode::Jc => "JC",
            ModelCode::Hky => "HKY",
            ModelCode::Tn92 => "TN92",
            ModelCode::Gtr => "GTR",
            ModelCode::AaJc => "AAJC",
            ModelCode::Wag => "WAG",
            ModelCode::Lg => "LG",
            ModelCode::Jtt => "JTT",
            ModelCode::Dayhoff => "DAYHOFF",
            ModelCode::Custom => "CUSTOM",
        }
    }
}

impl FromStr for ModelCode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        let code = match s.trim().to_ascii_uppercase().as_str() {
            "JC" | "JC69" => ModelCode::Jc,
            "HKY" | "HKY85" => ModelCode::Hky,
            "TN92" | "TAMURA92" => ModelCode::Tn92,
            "GTR" => ModelCode::Gtr,
            "AAJC" => ModelCode::AaJc,
            "WAG" => ModelCode::Wag,
            "LG" => ModelCode::Lg,
            "JTT" => ModelCode::Jtt,
            "DAYHOFF" => ModelCode::Dayhoff,
            "CUSTOM" => ModelCode::Custom,
            _ => return Err(SimError::UnknownModel(s.to_string())),
        };
        Ok(code)
    }
}

/// A reversible rate matrix Q, normalised to one expected substitution per
/// unit time at equilibrium, with the eigendecomposition behind P(t).
///
/// With D = diag(π), B = D^½ Q D^-½ is symmetric, so
/// P(t) = D^-½ U e^{Λt} Uᵀ D^½ where B = U Λ Uᵀ.
#[derive(Debug, Clone)]
pub struct ReplacementModel {
    code: ModelCode,
    alphabet: Alphabet,
    frequencies: Vec<f64>,
    rate_matrix: DMatrix<f64>,
    eigenvalues: DVector<f64>,
    // D^-½ U
    left: DMatrix<f64>,
    // Uᵀ D^½
    right: DMatrix<f64>,
}

impl ReplacementModel {
    /// Builds a built-in model. `CUSTOM` needs [`ReplacementModel::from_paml`].
    ///
    /// ```
    /// use msagen::libs::subst::{ModelCode, ReplacementModel};
    ///
    /// let hky = ReplacementModel::new(ModelCode::Hky, &[0.3, 0.2, 0.2, 0.3, 2.0]).unwrap();
    /// assert_eq!(hky.frequencies().len(), 4);
    /// assert!(ReplacementModel::new(ModelCode::Jc, &[1.0]).is_err());
    /// ```
    pub fn new(code: ModelCode, params: &[f64]) -> Result<Self> {
        if params.len() != code.num_params() {
            return Err(SimError::InvalidParameter(format!(
                "model {} takes {} parameters, got {}",
                code.name(),
                code.num_params(),
                params.len()
            )));
        }

        match code {
            ModelCode::Jc => {
                let s = exchangeabilities_nt(&[1.0; 6]);
                Self::from_parts(code, s, vec![0.25; 4])
            }
            ModelCode::Hky => {
                let freqs = check_frequencies(&params[..4], FREQ_TOLERANCE)?;
                let kappa = positive("kappa", params[4])?;
                let s = exchangeabilities_nt(&[1.0, kappa, 1.0, 1.0, kappa, 1.0]);
                Self::from_parts(code, s, freqs)
            }
            ModelCode::Tn92 => {
                let theta = params[0];
                if !(theta > 0.0 && theta < 1.0) {
                    return Err(SimError::InvalidParameter(format!(
                        "GC content theta must be in (0, 1), got {}",
                        theta
                    )));
                }
                let kappa = positive("kappa", params[1])?;
                let at = (1.0 - theta) / 2.0;
                let gc = theta / 2.0;
                let s = exchangeabilities_nt(&[1.0, kappa, 1.0, 1.0, kappa, 1.0]);
                Self::from_parts(code, s, vec![at, gc, gc, at])
            }
            ModelCode::Gtr => {
                let freqs = check_frequencies(&params[..4], FREQ_TOLERANCE)?;
                let mut rates = [0.0; 6];
                for (slot, (&r, name)) in rates
                    .iter_mut()
                    .zip(params[4..].iter().zip(["AC", "AG", "AT", "CG", "CT", "GT"]))
                {
                    *slot = positive(name, r)?;
                }
                Self::from_parts(code, exchangeabilities_nt(&rates), freqs)
            }
            ModelCode::AaJc => {
                let n = AMINO_ACIDS.len();
                let mut s = DMatrix::from_element(n, n, 1.0);
                s.fill_diagonal(0.0);
                Self::from_parts(code, s, vec![1.0 / n as f64; n])
            }
            ModelCode::Wag => Self::parse_paml(code, aa_data::WAG),
            ModelCode::Lg => Self::parse_paml(code, aa_data::LG),
            ModelCode::Jtt => Self::parse_paml(code, aa_data::JTT),
            ModelCode::Dayhoff => Self::parse_paml(code, aa_data::DAYHOFF),
            ModelCode::Custom => Err(SimError::ModelNotInitialized(
                "CUSTOM needs a PAML model file".to_string(),
            )),
        }
    }

    /// A `CUSTOM` amino-acid model from PAML `.dat` text.
    pub fn from_paml(text: &str) -> Result<Self> {
        Self::parse_paml(ModelCode::Custom, text)
    }

    pub fn from_paml_file(infile: &str) -> Result<Self> {
        let text = std::fs::read_to_string(infile)?;
        Self::from_paml(&text)
    }

    fn parse_paml(code: ModelCode, text: &str) -> Result<Self> {
        let n = AMINO_ACIDS.len();
        let wanted = n * (n - 1) / 2 + n;

        // trailing notes after the frequencies are ignored
        let mut values = Vec::with_capacity(wanted);
        for token in text.split_whitespace().take(wanted) {
            let v: f64 = token.parse().map_err(|_| {
                SimError::InvalidParameter(format!("PAML model: bad number '{}'", token))
            })?;
            values.push(v);
        }
        if values.len() < wanted {
            return Err(SimError::InvalidParameter(format!(
                "PAML model: expected {} numbers, found {}",
                wanted,
                values.len()
            )));
        }

        let mut s = DMatrix::zeros(n, n);
        let mut k = 0;
        for i in 1..n {
            for j in 0..i {
                let v = values[k];
                if v < 0.0 || !v.is_finite() {
                    return Err(SimError::InvalidParameter(format!(
                        "PAML model: negative exchangeability {} at ({}, {})",
                        v, i, j
                    )));
                }
                s[(i, j)] = v;
                s[(j, i)] = v;
                k += 1;
            }
        }

        let freqs = check_frequencies(&values[k..], PAML_FREQ_TOLERANCE)?;
        Self::from_parts(code, s, freqs)
    }

    fn from_parts(code: ModelCode, s: DMatrix<f64>, freqs: Vec<f64>) -> Result<Self> {
        let n = freqs.len();
        let mut q = DMatrix::zeros(n, n);
        for i in 0..n {
            let mut row = 0.0;
            for j in 0..n {
                if i != j {
                    q[(i, j)] = s[(i, j)] * freqs[j];
                    row += q[(i, j)];
                }
            }
            q[(i, i)] = -row;
        }

        let mu: f64 = (0..n).map(|i| -freqs[i] * q[(i, i)]).sum();
        if mu <= 0.0 {
            return Err(SimError::InvalidParameter(format!(
                "model {} has no substitutions",
                code.name()
            )));
        }
        q /= mu;

        let sqrt_pi: Vec<f64> = freqs.iter().map(|f| f.sqrt()).collect();
        let b = DMatrix::from_fn(n, n, |i, j| q[(i, j)] * sqrt_pi[i] / sqrt_pi[j]);
        // symmetrise against rounding
        let b = (&b + b.transpose()) * 0.5;
        let eigen = SymmetricEigen::new(b);

        let u = eigen.eigenvectors;
        let left = DMatrix::from_fn(n, n, |i, j| u[(i, j)] / sqrt_pi[i]);
        let right = DMatrix::from_fn(n, n, |i, j| u[(j, i)] * sqrt_pi[j]);

        Ok(Self {
            code,
            alphabet: code.alphabet(),
            frequencies: freqs,
            rate_matrix: q,
            eigenvalues: eigen.eigenvalues,
            left,
            right,
        })
    }

    pub fn code(&self) -> ModelCode {
        self.code
    }

    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn rate_matrix(&self) -> &DMatrix<f64> {
        &self.rate_matrix
    }

    /// P(t) = exp(Qt). Rounding negatives are clamped to 0 and every row is
    /// renormalised to sum to 1.
    pub fn transition_matrix(&self, t: f64) -> DMatrix<f64> {
        let n = self.frequencies.len();
        if t <= 0.0 {
            return DMatrix::identity(n, n);
        }

        let exp_diag = DMatrix::from_diagonal(&self.eigenvalues.map(|l| (l * t).exp()));
        let mut p = &self.left * exp_diag * &self.right;

        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..n {
                if p[(i, j)] < 0.0 {
                    p[(i, j)] = 0.0;
                }
                sum += p[(i, j)];
            }
            if sum > 0.0 {
                for j in 0..n {
                    p[(i, j)] /= sum;
                }
            } else {
                p[(i, i)] = 1.0;
            }
        }
        p
    }
}

// Symmetric 4×4 from the six rates in AC AG AT CG CT GT order
fn exchangeabilities_nt(r: &[f64; 6]) -> DMatrix<f64> {
    let mut s = DMatrix::zeros(4, 4);
    let pairs = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
    for (&(i, j), &v) in pairs.iter().zip(r) {
        s[(i, j)] = v;
        s[(j, i)] = v;
    }
    s
}

fn positive(name: &str, v: f64) -> Result<f64> {
    if v > 0.0 && v.is_finite() {
        Ok(v)
    } else {
        Err(SimError::InvalidParameter(format!(
            "{} must be positive, got {}",
            name, v
        )))
    }
}

fn check_frequencies(freqs: &[f64], tolerance: f64) -> Result<Vec<f64>> {
    if freqs.iter().any(|&f| !(f > 0.0 && f <= 1.0)) {
        return Err(SimError::InvalidDistribution(format!(
            "frequencies must lie in (0, 1]: {:?}",
            freqs
        )));
    }
    let sum: f64 = freqs.iter().sum();
    if (sum - 1.0).abs() > tolerance {
        return Err(SimError::InvalidDistribution(format!(
            "frequencies sum to {}, not 1",
            sum
        )));
    }
    Ok(freqs.iter().map(|f| f / sum).collect())
}
