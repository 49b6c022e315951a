//! One simulation replicate: indel pass, alignment assembly, substitutions.

use crate::libs::block::Event;
use crate::libs::config::Configuration;
use crate::libs::error::{Result, SimError};
use crate::libs::indel::{IndelHistory, IndelProtocol, IndelSimulator};
use crate::libs::msa::{self, Alignment, SequenceSink};
use crate::libs::phylo::{NodeId, Tree};
use crate::libs::rates::RateCategoryModel;
use crate::libs::subst::{ReplacementModel, SiteRates, SubstitutionSimulator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// A validated configuration bound to a tree.
///
/// Replicate seeds come from a master generator seeded with
/// `Configuration::seed`, so a batch gives the same alignments whether it
/// runs sequentially or in parallel.
pub struct Simulator {
    tree: Tree,
    config: Configuration,
    protocol: IndelProtocol,
    rows: Vec<NodeId>,
    model: Option<(ReplacementModel, RateCategoryModel)>,
}

impl Simulator {
    pub fn new(tree: Tree, config: Configuration) -> Result<Self> {
        config.validate(&tree)?;
        let protocol = config.indel_protocol(&tree)?;
        let rows = config.selection.select(&tree);
        let model = match &config.substitution {
            Some(subst) => Some((subst.build_model()?, subst.build_rates()?)),
            None => None,
        };

        Ok(Self {
            tree,
            config,
            protocol,
            rows,
            model,
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Node ids of the alignment rows, in output order.
    pub fn rows(&self) -> &[NodeId] {
        &self.rows
    }

    fn replicate_seeds(&self, n: usize) -> Vec<u64> {
        let mut master = StdRng::seed_from_u64(self.config.seed);
        (0..n).map(|_| master.gen::<u64>()).collect()
    }

    fn substitution_simulator(&self) -> Result<Option<SubstitutionSimulator<'_>>> {
        self.model
            .as_ref()
            .map(|(model, rates)| SubstitutionSimulator::new(&self.tree, model, rates))
            .transpose()
    }

    /// The first replicate of the batch.
    pub fn simulate(&self) -> Result<Alignment> {
        let seed = self.replicate_seeds(1)[0];
        let subst = self.substitution_simulator()?;
        self.replicate(subst.as_ref(), seed)
    }

    pub fn simulate_batch(&self, n: usize, parallel: bool) -> Result<Vec<Alignment>> {
        let seeds = self.replicate_seeds(n);
        let subst = self.substitution_simulator()?;
        let subst = subst.as_ref();

        if parallel {
            seeds
                .par_iter()
                .map(|&seed| self.replicate(subst, seed))
                .collect()
        } else {
            seeds
                .iter()
                .map(|&seed| self.replicate(subst, seed))
                .collect()
        }
    }

    /// Indel events per node id for the first replicate.
    pub fn generate_events(&self) -> Result<Vec<Vec<Event>>> {
        let mut rng = StdRng::seed_from_u64(self.replicate_seeds(1)[0]);
        IndelSimulator::new(&self.tree, &self.protocol)?.generate_events(&mut rng)
    }

    /// Indel history of the first replicate.
    pub fn simulate_indels(&self) -> Result<IndelHistory> {
        let mut rng = StdRng::seed_from_u64(self.replicate_seeds(1)[0]);
        IndelSimulator::new(&self.tree, &self.protocol)?.simulate(&mut rng)
    }

    /// Fills `alignment` with characters drawn from `seed`.
    pub fn simulate_substitutions(&self, alignment: &mut Alignment, seed: u64) -> Result<()> {
        let subst = self.substitution_simulator()?.ok_or_else(|| {
            SimError::ModelNotInitialized("no replacement model configured".to_string())
        })?;
        let mut rng = StdRng::seed_from_u64(seed);
        fill(&subst, alignment, &mut rng)
    }

    /// The first replicate, written row by row to `sink` as nodes finish.
    /// Only the rows' gap maps and the sequences of unfinished parents are
    /// held in memory.
    pub fn simulate_low_memory(&self, sink: &mut dyn SequenceSink) -> Result<SiteRates> {
        let seed = self.replicate_seeds(1)[0];
        let mut rng = StdRng::seed_from_u64(seed);
        let alignment = self.assemble(&mut rng)?;

        let mut row_of: Vec<Option<usize>> = vec![None; self.tree.len()];
        for (i, &id) in self.rows.iter().enumerate() {
            row_of[id] = Some(i);
        }

        let Some(subst) = self.substitution_simulator()? else {
            for row in alignment.rows() {
                sink.write_sequence(&row.name, &msa::mask_row(row, None))?;
            }
            return Ok(SiteRates::default());
        };

        let rows = alignment.rows();
        let sites = subst.simulate_streaming(alignment.width(), &mut rng, |id, seq| {
            if let Some(i) = row_of[id] {
                sink.write_sequence(&rows[i].name, &msa::mask_row(&rows[i], Some(seq)))?;
            }
            Ok(())
        })?;
        log::info!(
            "Streamed {} rows of width {}",
            self.rows.len(),
            alignment.width()
        );
        Ok(sites)
    }

    fn assemble<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Alignment> {
        if self.protocol.is_silent() {
            return Ok(msa::ungapped(
                &self.tree,
                &self.rows,
                self.protocol.root_length,
            ));
        }
        let history = IndelSimulator::new(&self.tree, &self.protocol)?.simulate(rng)?;
        log::debug!(
            "{} insertions, {} columns created",
            history.insertions.len(),
            history.num_columns
        );
        Ok(msa::assemble(&history, &self.tree, &self.rows))
    }

    fn replicate(&self, subst: Option<&SubstitutionSimulator>, seed: u64) -> Result<Alignment> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut alignment = self.assemble(&mut rng)?;
        if let Some(subst) = subst {
            fill(subst, &mut alignment, &mut rng)?;
        }
        log::info!(
            "Replicate {:#018x}: {} rows, width {}",
            seed,
            alignment.num_sequences(),
            alignment.width()
        );
        Ok(alignment)
    }
}

fn fill<R: Rng + ?Sized>(
    subst: &SubstitutionSimulator,
    alignment: &mut Alignment,
    rng: &mut R,
) -> Result<()> {
    let (sequences, sites) = subst.simulate(alignment.width(), rng)?;
    alignment.fill_substitutions(&sequences, sites.categories, sites.rates);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::config::{BranchValues, NodeSelection, SubstitutionConfig};
    use crate::libs::subst::ModelCode;

    fn tree() -> Tree {
        Tree::from_newick("((A:0.2,B:0.3):0.1,(C:0.2,D:0.4):0.3);").unwrap()
    }

    fn config() -> Configuration {
        Configuration {
            root_length: 60,
            insertion_rate: BranchValues::Uniform(0.8),
            deletion_rate: BranchValues::Uniform(0.8),
            insertion_lengths: BranchValues::Uniform("geom:0.5:10".parse().unwrap()),
            deletion_lengths: BranchValues::Uniform("zipf:1.7:20".parse().unwrap()),
            substitution: Some(SubstitutionConfig::new(ModelCode::Jc)),
            seed: 11,
            ..Default::default()
        }
    }

    #[test]
    fn batch_is_reproducible_and_parallel_safe() {
        let sim = Simulator::new(tree(), config()).unwrap();
        let seq = sim.simulate_batch(4, false).unwrap();
        let par = sim.simulate_batch(4, true).unwrap();
        assert_eq!(seq, par);
        assert_eq!(seq[0], sim.simulate().unwrap());
    }

    #[test]
    fn rows_match_widths() {
        let sim = Simulator::new(tree(), config()).unwrap();
        let aln = sim.simulate().unwrap();
        assert_eq!(aln.num_sequences(), 4);
        for (row, text) in aln.rows().iter().zip(aln.render()) {
            assert_eq!(text.len(), aln.width());
            let residues = text.bytes().filter(|&c| c != b'-').count();
            assert_eq!(residues, row.residues());
            assert!(text.bytes().all(|c| b"ACGT-".contains(&c)));
        }
        assert_eq!(aln.rate_categories().len(), aln.width());
    }

    #[test]
    fn low_memory_matches_in_memory() {
        let mut cfg = config();
        cfg.selection = NodeSelection::All;
        let sim = Simulator::new(tree(), cfg).unwrap();

        let aln = sim.simulate().unwrap();
        let mut sink: Vec<(String, Vec<u8>)> = Vec::new();
        sim.simulate_low_memory(&mut sink).unwrap();

        let names: Vec<String> = sink.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, aln.names());
        for ((_, row), text) in sink.iter().zip(aln.render()) {
            assert_eq!(String::from_utf8_lossy(row), text);
        }
    }

    #[test]
    fn substitutions_need_a_model() {
        let mut cfg = config();
        cfg.substitution = None;
        let sim = Simulator::new(tree(), cfg).unwrap();
        let mut aln = sim.simulate().unwrap();
        assert!(aln.render().iter().all(|r| r.bytes().all(|c| c == b'X' || c == b'-')));
        assert!(matches!(
            sim.simulate_substitutions(&mut aln, 1),
            Err(SimError::ModelNotInitialized(_))
        ));
    }

    #[test]
    fn events_only_on_branches() {
        let sim = Simulator::new(tree(), config()).unwrap();
        let events = sim.generate_events().unwrap();
        assert_eq!(events.len(), sim.tree().len());
        assert!(events[0].is_empty());
    }
}
