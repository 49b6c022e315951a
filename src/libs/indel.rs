//! Indel pass: walks the tree from the root and evolves a block sequence
//! along every branch.

use crate::libs::block::{Applied, BlockEngine, BlockSequence, Event, InsertionRecord};
use crate::libs::dist::DiscreteDistribution;
use crate::libs::error::{Result, SimError};
use crate::libs::phylo::Tree;
use rand::Rng;
use rand_distr::{Distribution, Exp, Poisson};

/// How indel events are placed in time along a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndelRateMode {
    /// Event count ~ Poisson(length × (λi + λd)), independent of sequence length
    #[default]
    PerBranch,
    /// Rates scale with the current sequence length; waiting times are
    /// exponential (Gillespie)
    PerSite,
}

#[derive(Debug, Clone)]
pub struct BranchIndelParams {
    pub insertion_rate: f64,
    pub deletion_rate: f64,
    pub insertion_lengths: DiscreteDistribution,
    pub deletion_lengths: DiscreteDistribution,
}

impl BranchIndelParams {
    fn is_silent(&self) -> bool {
        self.insertion_rate <= 0.0 && self.deletion_rate <= 0.0
    }
}

/// Everything the indel pass needs. `branches[i]` belongs to branch `i`,
/// the i-th non-root node in pre-order.
#[derive(Debug, Clone)]
pub struct IndelProtocol {
    pub root_length: usize,
    pub min_length: usize,
    pub mode: IndelRateMode,
    pub branches: Vec<BranchIndelParams>,
}

impl IndelProtocol {
    pub fn is_silent(&self) -> bool {
        self.branches.iter().all(|b| b.is_silent())
    }
}

/// Result of the indel pass.
#[derive(Debug, Clone)]
pub struct IndelHistory {
    /// Blocks of every node, indexed by node id
    pub sequences: Vec<BlockSequence>,
    /// Events applied on the branch above each node (empty for the root)
    pub events: Vec<Vec<Event>>,
    /// Insertions in creation order
    pub insertions: Vec<InsertionRecord>,
    pub root_length: usize,
    /// Total number of column ids handed out
    pub num_columns: usize,
}

pub struct IndelSimulator<'a> {
    tree: &'a Tree,
    protocol: &'a IndelProtocol,
}

impl<'a> IndelSimulator<'a> {
    pub fn new(tree: &'a Tree, protocol: &'a IndelProtocol) -> Result<Self> {
        if protocol.branches.len() != tree.num_branches() {
            return Err(SimError::InvalidParameter(format!(
                "{} branch parameter sets for a tree with {} branches",
                protocol.branches.len(),
                tree.num_branches()
            )));
        }
        Ok(Self { tree, protocol })
    }

    /// Runs the whole pass. Nodes are visited in pre-order, so a parent's
    /// blocks are final before any child is derived from them.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<IndelHistory> {
        let n = self.tree.len();
        let mut engine = BlockEngine::new(self.protocol.root_length, self.protocol.min_length);
        let mut sequences: Vec<Option<BlockSequence>> = vec![None; n];
        let mut events: Vec<Vec<Event>> = vec![Vec::new(); n];

        let Some(root) = self.tree.get_root() else {
            return Err(SimError::MalformedTree("tree has no root".to_string()));
        };
        sequences[root] = Some(engine.root_sequence());

        for (branch, id) in self.tree.branches().into_iter().enumerate() {
            let Some(node) = self.tree.get_node(id) else {
                continue;
            };
            let Some(parent) = node.parent else {
                continue;
            };
            let mut seq = sequences[parent].clone().ok_or_else(|| {
                SimError::MalformedTree(format!("node {} visited before its parent", id))
            })?;

            let params = &self.protocol.branches[branch];
            let applied = match self.protocol.mode {
                IndelRateMode::PerBranch => {
                    self.per_branch(&mut engine, &mut seq, node.branch_length(), params, rng)?
                }
                IndelRateMode::PerSite => {
                    self.per_site(&mut engine, &mut seq, node.branch_length(), params, rng)?
                }
            };

            let rejected = applied.iter().filter(|(_, a)| *a == Applied::Rejected).count();
            if rejected > 0 {
                log::warn!(
                    "{} deletion(s) on the branch above {} refused by the minimum length {}",
                    rejected,
                    self.tree.label(id),
                    self.protocol.min_length
                );
            }
            log::debug!(
                "Branch above {}: {} events, length {}",
                self.tree.label(id),
                applied.len(),
                seq.live_len()
            );

            events[id] = applied
                .into_iter()
                .filter(|(_, a)| matches!(a, Applied::Inserted(_) | Applied::Deleted(_)))
                .map(|(e, _)| e)
                .collect();
            sequences[id] = Some(seq);
        }

        let num_columns = engine.num_columns();
        Ok(IndelHistory {
            sequences: sequences.into_iter().map(|s| s.unwrap_or_default()).collect(),
            events,
            insertions: engine.into_insertions(),
            root_length: self.protocol.root_length,
            num_columns,
        })
    }

    /// Indel events per node, as applied. The root's list is empty.
    pub fn generate_events<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<Vec<Event>>> {
        Ok(self.simulate(rng)?.events)
    }

    fn per_branch<R: Rng + ?Sized>(
        &self,
        engine: &mut BlockEngine,
        seq: &mut BlockSequence,
        length: f64,
        params: &BranchIndelParams,
        rng: &mut R,
    ) -> Result<Vec<(Event, Applied)>> {
        let total = params.insertion_rate + params.deletion_rate;
        if length <= 0.0 || total <= 0.0 {
            return Ok(Vec::new());
        }

        let poisson = Poisson::new(length * total).map_err(|e| {
            SimError::InvalidParameter(format!("indel event rate {}: {}", length * total, e))
        })?;
        let count = poisson.sample(rng) as usize;
        let p_insertion = params.insertion_rate / total;

        let mut applied = Vec::with_capacity(count);
        for _ in 0..count {
            let event = if rng.gen::<f64>() < p_insertion {
                draw_insertion(seq.live_len(), &params.insertion_lengths, rng)
            } else {
                let d = params.deletion_lengths.sample(rng);
                match draw_deletion(seq.live_len(), d, rng) {
                    Some(e) => e,
                    None => continue,
                }
            };
            let result = engine.apply(seq, &event);
            applied.push((event, result));
        }
        Ok(applied)
    }

    fn per_site<R: Rng + ?Sized>(
        &self,
        engine: &mut BlockEngine,
        seq: &mut BlockSequence,
        length: f64,
        params: &BranchIndelParams,
        rng: &mut R,
    ) -> Result<Vec<(Event, Applied)>> {
        let mut applied = Vec::new();
        if length <= 0.0 || params.is_silent() {
            return Ok(applied);
        }

        let mut elapsed = 0.0;
        loop {
            let live = seq.live_len();
            let d = params.deletion_lengths.sample(rng);
            let ins_total = params.insertion_rate * (live + 1) as f64;
            let del_total = if live > 0 {
                params.deletion_rate * (live + d - 1) as f64
            } else {
                0.0
            };
            let total = ins_total + del_total;
            if total <= 0.0 {
                break;
            }

            let wait = Exp::new(total).map_err(|e| {
                SimError::InvalidParameter(format!("indel event rate {}: {}", total, e))
            })?;
            elapsed += wait.sample(rng);
            if elapsed > length {
                break;
            }

            let event = if rng.gen::<f64>() * total < ins_total {
                draw_insertion(live, &params.insertion_lengths, rng)
            } else {
                match draw_deletion(live, d, rng) {
                    Some(e) => e,
                    None => continue,
                }
            };
            let result = engine.apply(seq, &event);
            applied.push((event, result));
        }
        Ok(applied)
    }
}

fn draw_insertion<R: Rng + ?Sized>(
    live: usize,
    lengths: &DiscreteDistribution,
    rng: &mut R,
) -> Event {
    let position = rng.gen_range(0..=live);
    Event::insertion(position, lengths.sample(rng))
}

// Start drawn from [-(d-1), live-1] so deletions overhanging either end are
// as likely as interior ones; the overhang on the left is cut here, the one
// on the right by the block engine.
fn draw_deletion<R: Rng + ?Sized>(live: usize, d: usize, rng: &mut R) -> Option<Event> {
    if live == 0 || d == 0 {
        return None;
    }
    let start = rng.gen_range(-(d as i64 - 1)..=live as i64 - 1);
    if start < 0 {
        Some(Event::deletion(0, (d as i64 + start) as usize))
    } else {
        Some(Event::deletion(start as usize, d))
    }
}
