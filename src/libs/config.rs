//! Simulation settings, validated against a tree before any work starts.

use crate::libs::dist::DiscreteDistribution;
use crate::libs::error::{Result, SimError};
use crate::libs::indel::{BranchIndelParams, IndelProtocol, IndelRateMode};
use crate::libs::phylo::{NodeId, Tree};
use crate::libs::rates::RateCategoryModel;
use crate::libs::subst::{ModelCode, ReplacementModel};

/// A value shared by every branch, or one value per branch in branch order
/// (pre-order of the non-root nodes).
#[derive(Debug, Clone, PartialEq)]
pub enum BranchValues<T> {
    Uniform(T),
    PerBranch(Vec<T>),
}

impl<T: Clone> BranchValues<T> {
    /// One value per branch; a per-branch list must match the branch count.
    pub fn expand(&self, num_branches: usize, what: &str) -> Result<Vec<T>> {
        match self {
            BranchValues::Uniform(v) => Ok(vec![v.clone(); num_branches]),
            BranchValues::PerBranch(vs) if vs.len() == num_branches => Ok(vs.clone()),
            BranchValues::PerBranch(vs) => Err(SimError::InvalidParameter(format!(
                "{} {} given for a tree with {} branches",
                vs.len(),
                what,
                num_branches
            ))),
        }
    }

    pub fn values(&self) -> Vec<&T> {
        match self {
            BranchValues::Uniform(v) => vec![v],
            BranchValues::PerBranch(vs) => vs.iter().collect(),
        }
    }
}

impl<T> From<T> for BranchValues<T> {
    fn from(v: T) -> Self {
        BranchValues::Uniform(v)
    }
}

/// Which nodes become alignment rows. Rows keep pre-order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeSelection {
    #[default]
    Leaves,
    All,
    LeavesAndRoot,
}

impl NodeSelection {
    pub fn select(&self, tree: &Tree) -> Vec<NodeId> {
        let root = tree.get_root();
        tree.nodes_preorder()
            .into_iter()
            .filter(|&id| {
                let is_leaf = tree.get_node(id).is_some_and(|n| n.is_leaf());
                match self {
                    NodeSelection::Leaves => is_leaf,
                    NodeSelection::All => true,
                    NodeSelection::LeavesAndRoot => is_leaf || Some(id) == root,
                }
            })
            .collect()
    }
}

impl std::str::FromStr for NodeSelection {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "leaves" => Ok(NodeSelection::Leaves),
            "all" => Ok(NodeSelection::All),
            "root" | "leaves_and_root" => Ok(NodeSelection::LeavesAndRoot),
            _ => Err(SimError::InvalidParameter(format!(
                "unknown node selection {:?}",
                s
            ))),
        }
    }
}

/// Replacement model and site-rate settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionConfig {
    pub model: ModelCode,
    pub params: Vec<f64>,
    /// PAML `.dat` file, required by `CUSTOM`
    pub custom_model: Option<String>,
    pub alpha: f64,
    pub categories: usize,
    pub pinv: f64,
    pub rho: f64,
}

impl SubstitutionConfig {
    pub fn new(model: ModelCode) -> Self {
        Self {
            model,
            params: Vec::new(),
            custom_model: None,
            alpha: 1.0,
            categories: 1,
            pinv: 0.0,
            rho: 0.0,
        }
    }

    pub fn build_model(&self) -> Result<ReplacementModel> {
        match (self.model, &self.custom_model) {
            (ModelCode::Custom, Some(path)) => {
                if !self.params.is_empty() {
                    return Err(SimError::InvalidParameter(
                        "CUSTOM takes no numeric parameters".to_string(),
                    ));
                }
                ReplacementModel::from_paml_file(path)
            }
            (ModelCode::Custom, None) => Err(SimError::ModelNotInitialized(
                "CUSTOM needs a PAML model file".to_string(),
            )),
            (code, Some(_)) => Err(SimError::IncompatibleOptions(format!(
                "a custom model file was given with model {}",
                code.name()
            ))),
            (code, None) => ReplacementModel::new(code, &self.params),
        }
    }

    pub fn build_rates(&self) -> Result<RateCategoryModel> {
        RateCategoryModel::build(self.alpha, self.categories, self.pinv, self.rho)
    }
}

/// All inputs of a simulation.
///
/// ```
/// use msagen::libs::config::Configuration;
///
/// let cfg = Configuration::default();
/// assert_eq!(cfg.root_length, 100);
/// assert!(cfg.substitution.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Configuration {
    pub root_length: usize,
    pub insertion_rate: BranchValues<f64>,
    pub deletion_rate: BranchValues<f64>,
    pub insertion_lengths: BranchValues<DiscreteDistribution>,
    pub deletion_lengths: BranchValues<DiscreteDistribution>,
    pub min_length: usize,
    pub indel_mode: IndelRateMode,
    /// `None` runs indels only
    pub substitution: Option<SubstitutionConfig>,
    pub selection: NodeSelection,
    pub seed: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        let one = DiscreteDistribution::default();
        Self {
            root_length: 100,
            insertion_rate: BranchValues::Uniform(0.0),
            deletion_rate: BranchValues::Uniform(0.0),
            insertion_lengths: BranchValues::Uniform(one.clone()),
            deletion_lengths: BranchValues::Uniform(one),
            min_length: 0,
            indel_mode: IndelRateMode::PerBranch,
            substitution: None,
            selection: NodeSelection::Leaves,
            seed: 0,
        }
    }
}

impl Configuration {
    /// Checks everything that can be checked without simulating.
    pub fn validate(&self, tree: &Tree) -> Result<()> {
        if tree.is_empty() {
            return Err(SimError::MalformedTree("empty tree".to_string()));
        }
        if self.root_length == 0 {
            return Err(SimError::InvalidParameter(
                "root length must be positive".to_string(),
            ));
        }
        if self.min_length > self.root_length {
            return Err(SimError::InvalidParameter(format!(
                "minimum length {} exceeds root length {}",
                self.min_length, self.root_length
            )));
        }

        let n = tree.num_branches();
        for (rates, what) in [
            (&self.insertion_rate, "insertion rates"),
            (&self.deletion_rate, "deletion rates"),
        ] {
            rates.expand(n, what)?;
            if let Some(bad) = rates.values().into_iter().find(|r| !(**r >= 0.0 && r.is_finite())) {
                return Err(SimError::InvalidParameter(format!(
                    "{} must be non-negative, got {}",
                    what, bad
                )));
            }
        }
        self.insertion_lengths.expand(n, "insertion length distributions")?;
        self.deletion_lengths.expand(n, "deletion length distributions")?;

        if let Some(subst) = &self.substitution {
            subst.build_rates()?;
            subst.build_model()?;
        }
        Ok(())
    }

    /// Indel settings resolved per branch.
    pub fn indel_protocol(&self, tree: &Tree) -> Result<IndelProtocol> {
        let n = tree.num_branches();
        let ins = self.insertion_rate.expand(n, "insertion rates")?;
        let del = self.deletion_rate.expand(n, "deletion rates")?;
        let ins_len = self.insertion_lengths.expand(n, "insertion length distributions")?;
        let del_len = self.deletion_lengths.expand(n, "deletion length distributions")?;

        let branches = ins
            .into_iter()
            .zip(del)
            .zip(ins_len.into_iter().zip(del_len))
            .map(
                |((insertion_rate, deletion_rate), (insertion_lengths, deletion_lengths))| {
                    BranchIndelParams {
                        insertion_rate,
                        deletion_rate,
                        insertion_lengths,
                        deletion_lengths,
                    }
                },
            )
            .collect();

        Ok(IndelProtocol {
            root_length: self.root_length,
            min_length: self.min_length,
            mode: self.indel_mode,
            branches,
        })
    }
}
