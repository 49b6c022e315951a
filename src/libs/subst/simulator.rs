use crate::libs::dist::DiscreteDistribution;
use crate::libs::error::{Result, SimError};
use crate::libs::phylo::{NodeId, Tree};
use crate::libs::rates::{CategorySampler, RateCategoryModel};
use crate::libs::subst::ReplacementModel;
use rand::Rng;

/// Per-column rate assignment of one replicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteRates {
    pub categories: Vec<usize>,
    pub rates: Vec<f64>,
}

// Rows of P(ℓ·r) for one branch and one category; `None` when ℓ·r is 0 and
// characters are copied unchanged.
type BranchTable = Option<Vec<DiscreteDistribution>>;

/// Character evolution along the tree for a fixed model and rate
/// categories. Transition tables are built once per branch and category.
pub struct SubstitutionSimulator<'a> {
    tree: &'a Tree,
    model: &'a ReplacementModel,
    rates: Vec<f64>,
    sampler: CategorySampler,
    root: DiscreteDistribution,
    // tables[node][category]
    tables: Vec<Vec<BranchTable>>,
}

impl<'a> SubstitutionSimulator<'a> {
    pub fn new(
        tree: &'a Tree,
        model: &'a ReplacementModel,
        categories: &RateCategoryModel,
    ) -> Result<Self> {
        let rates = categories.rates();
        let mut tables = vec![Vec::new(); tree.len()];

        for id in tree.branches() {
            let Some(node) = tree.get_node(id) else {
                continue;
            };
            let length = node.branch_length();
            tables[id] = rates
                .iter()
                .map(|&r| transition_table(model, length * r))
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(Self {
            tree,
            model,
            rates,
            sampler: CategorySampler::new(categories)?,
            root: DiscreteDistribution::new(model.frequencies())?,
            tables,
        })
    }

    /// Rate category of each of `width` columns.
    pub fn assign_sites<R: Rng + ?Sized>(&self, width: usize, rng: &mut R) -> SiteRates {
        let categories = self.sampler.sample_sites(width, rng);
        let rates = categories.iter().map(|&c| self.rates[c]).collect();
        SiteRates { categories, rates }
    }

    /// Full-width character sequences of every node, indexed by node id.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        width: usize,
        rng: &mut R,
    ) -> Result<(Vec<Option<Vec<u8>>>, SiteRates)> {
        let mut sequences = vec![None; self.tree.len()];
        let sites = self.walk(width, rng, false, |id, seq| {
            sequences[id] = Some(seq.to_vec());
            Ok(())
        })?;
        Ok((sequences, sites))
    }

    /// Same draws as [`SubstitutionSimulator::simulate`], but every node is
    /// handed to `visit` as soon as it is finished, and a parent's sequence
    /// is dropped once all of its children are done.
    pub fn simulate_streaming<R, F>(&self, width: usize, rng: &mut R, visit: F) -> Result<SiteRates>
    where
        R: Rng + ?Sized,
        F: FnMut(NodeId, &[u8]) -> Result<()>,
    {
        self.walk(width, rng, true, visit)
    }

    fn walk<R, F>(&self, width: usize, rng: &mut R, release: bool, mut visit: F) -> Result<SiteRates>
    where
        R: Rng + ?Sized,
        F: FnMut(NodeId, &[u8]) -> Result<()>,
    {
        let Some(root) = self.tree.get_root() else {
            return Err(SimError::MalformedTree("tree has no root".to_string()));
        };
        let symbols = self.model.alphabet().symbols();

        let sites = self.assign_sites(width, rng);

        // Alphabet indices, not symbols
        let mut states: Vec<Option<Vec<usize>>> = vec![None; self.tree.len()];
        let mut pending: Vec<usize> = (0..self.tree.len())
            .map(|id| self.tree.get_node(id).map(|n| n.children.len()).unwrap_or(0))
            .collect();

        let root_states: Vec<usize> = (0..width).map(|_| self.root.sample(rng)).collect();
        visit(root, &to_symbols(&root_states, symbols))?;
        states[root] = Some(root_states);

        for id in self.tree.branches() {
            let Some(parent) = self.tree.get_node(id).and_then(|n| n.parent) else {
                continue;
            };
            let parent_states = states[parent].as_ref().ok_or_else(|| {
                SimError::MalformedTree(format!("node {} visited before its parent", id))
            })?;

            let tables = &self.tables[id];
            let child: Vec<usize> = parent_states
                .iter()
                .zip(&sites.categories)
                .map(|(&from, &cat)| match &tables[cat] {
                    Some(rows) => rows[from].sample(rng),
                    None => from,
                })
                .collect();

            visit(id, &to_symbols(&child, symbols))?;

            if release {
                pending[parent] = pending[parent].saturating_sub(1);
                if pending[parent] == 0 {
                    states[parent] = None;
                }
                if pending[id] == 0 {
                    continue;
                }
            }
            states[id] = Some(child);
        }

        Ok(sites)
    }
}

fn transition_table(model: &ReplacementModel, t: f64) -> Result<BranchTable> {
    if t <= 0.0 {
        return Ok(None);
    }
    let p = model.transition_matrix(t);
    let rows = (0..p.nrows())
        .map(|i| {
            let row: Vec<f64> = p.row(i).iter().copied().collect();
            DiscreteDistribution::new(&row)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(rows))
}

fn to_symbols(states: &[usize], symbols: &[u8]) -> Vec<u8> {
    states.iter().map(|&s| symbols[s]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::subst::ModelCode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zero_length_branches_copy_parent() {
        let tree = Tree::from_newick("(A:0,B:0);").unwrap();
        let model = ReplacementModel::new(ModelCode::Jc, &[]).unwrap();
        let cats = RateCategoryModel::uniform();
        let sim = SubstitutionSimulator::new(&tree, &model, &cats).unwrap();
        let (seqs, sites) = sim.simulate(200, &mut StdRng::seed_from_u64(4)).unwrap();

        assert_eq!(sites.categories.len(), 200);
        let root = seqs[0].as_ref().unwrap();
        assert_eq!(seqs[1].as_ref().unwrap(), root);
        assert_eq!(seqs[2].as_ref().unwrap(), root);
        assert!(root.iter().all(|c| b"ACGT".contains(c)));
    }

    #[test]
    fn invariant_columns_never_change() {
        let tree = Tree::from_newick("((A:2,B:2):2,C:3);").unwrap();
        let model = ReplacementModel::new(ModelCode::Wag, &[]).unwrap();
        let cats = RateCategoryModel::build(0.5, 4, 0.3, 0.0).unwrap();
        let sim = SubstitutionSimulator::new(&tree, &model, &cats).unwrap();
        let (seqs, sites) = sim.simulate(500, &mut StdRng::seed_from_u64(9)).unwrap();

        let root = seqs[0].as_ref().unwrap();
        let mut changed = 0;
        for leaf in tree.get_leaves() {
            let s = seqs[leaf].as_ref().unwrap();
            for (c, &cat) in sites.categories.iter().enumerate() {
                if sites.rates[c] == 0.0 {
                    assert_eq!(cat, 0);
                    assert_eq!(s[c], root[c]);
                } else if s[c] != root[c] {
                    changed += 1;
                }
            }
        }
        assert!(changed > 0);
    }

    #[test]
    fn streaming_matches_full() {
        let tree = Tree::from_newick("((A:0.1,B:0.2)X:0.3,(C:0.1,D:0.4)Y:0.2)R;").unwrap();
        let model = ReplacementModel::new(ModelCode::Hky, &[0.3, 0.2, 0.2, 0.3, 4.0]).unwrap();
        let cats = RateCategoryModel::build(1.0, 4, 0.0, 0.5).unwrap();
        let sim = SubstitutionSimulator::new(&tree, &model, &cats).unwrap();

        let (full, sites) = sim.simulate(120, &mut StdRng::seed_from_u64(21)).unwrap();
        let mut streamed = Vec::new();
        let sites2 = sim
            .simulate_streaming(120, &mut StdRng::seed_from_u64(21), |id, seq| {
                streamed.push((id, seq.to_vec()));
                Ok(())
            })
            .unwrap();

        assert_eq!(sites, sites2);
        assert_eq!(streamed.len(), tree.len());
        for (id, seq) in streamed {
            assert_eq!(full[id].as_ref().unwrap(), &seq);
        }
    }
}
