use approx::assert_abs_diff_eq;
use msagen::libs::block::{Applied, BlockEngine, Event};
use msagen::libs::config::{BranchValues, Configuration, NodeSelection, SubstitutionConfig};
use msagen::libs::dist::{point_mass, zipf, DiscreteDistribution, SeededSampler};
use msagen::libs::indel::IndelRateMode;
use msagen::libs::phylo::Tree;
use msagen::libs::rates::{build_correlation_matrix, realized_correlation};
use msagen::libs::simulator::Simulator;
use msagen::libs::subst::ModelCode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn sampler_frequencies_converge() -> anyhow::Result<()> {
    let probs = [0.1, 0.2, 0.3, 0.4];
    let mut sampler = SeededSampler::new(DiscreteDistribution::new(&probs)?, 5);
    let n = 100_000;
    let mut counts = [0usize; 4];
    for _ in 0..n {
        counts[sampler.draw()] += 1;
    }
    for (c, p) in counts.iter().zip(probs) {
        assert_abs_diff_eq!(*c as f64 / n as f64, p, epsilon = 0.01);
    }

    let mut a = SeededSampler::new(zipf(1.5, 50)?, 99);
    let mut b = SeededSampler::new(zipf(1.5, 50)?, 99);
    let xs: Vec<usize> = (0..100).map(|_| a.draw()).collect();
    let ys: Vec<usize> = (0..100).map(|_| b.draw()).collect();
    assert_eq!(xs, ys);
    assert!(xs.iter().all(|&x| (1..=50).contains(&x)));

    Ok(())
}

#[test]
fn correlation_matrix_properties() -> anyhow::Result<()> {
    for &alpha in &[0.3, 1.0, 4.0] {
        for &k in &[2usize, 4, 6] {
            for &rho in &[0.0, 0.2, 0.5, 0.9] {
                let m = build_correlation_matrix(alpha, k, rho)?;
                assert!(m.iter().all(|&v| v >= 0.0));
                for row in m.row_iter() {
                    assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
                }
                // column sums of a doubly stochastic matrix
                for col in m.column_iter() {
                    assert_abs_diff_eq!(col.sum(), 1.0, epsilon = 1e-6);
                }
            }
        }
    }

    let m = build_correlation_matrix(1.0, 4, 0.0)?;
    assert!(m.iter().all(|&v| (v - 0.25).abs() < 1e-2));
    assert_abs_diff_eq!(realized_correlation(&m, 1.0, 4)?, 0.0, epsilon = 1e-2);

    let m = build_correlation_matrix(1.0, 4, 0.5)?;
    assert!((&m - m.transpose()).amax() < 1e-6);

    Ok(())
}

#[test]
fn realized_correlation_is_monotone() -> anyhow::Result<()> {
    let mut last = f64::NEG_INFINITY;
    for i in 0..12 {
        let rho = i as f64 * 0.08;
        let m = build_correlation_matrix(0.5, 4, rho)?;
        let r = realized_correlation(&m, 0.5, 4)?;
        assert!(r >= last - 1e-9, "rho {}: {} < {}", rho, r, last);
        last = r;
    }

    Ok(())
}

#[test]
fn block_lengths_follow_events() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut engine = BlockEngine::new(40, 5);
    let mut seq = engine.root_sequence();

    for _ in 0..500 {
        let live = seq.live_len();
        let event = if rng.gen_bool(0.5) {
            Event::insertion(rng.gen_range(0..=live), rng.gen_range(1..6))
        } else {
            Event::deletion(rng.gen_range(0..live.max(1)), rng.gen_range(1..8))
        };
        let applied = engine.apply(&mut seq, &event);
        match applied {
            Applied::Inserted(_) => assert_eq!(seq.live_len(), live + event.length),
            _ => assert!(seq.live_len() <= live),
        }
        assert!(seq.live_len() >= 5);
    }
}

#[test]
fn deletion_limit_terminates() -> anyhow::Result<()> {
    let tree = Tree::from_newick("(A:0.5,B:0.5);")?;
    for mode in [IndelRateMode::PerBranch, IndelRateMode::PerSite] {
        for min_length in [0, 10, 60] {
            let config = Configuration {
                root_length: 100,
                insertion_rate: BranchValues::Uniform(0.0),
                deletion_rate: BranchValues::Uniform(11.0),
                deletion_lengths: BranchValues::Uniform(point_mass(1)?),
                min_length,
                indel_mode: mode,
                selection: NodeSelection::All,
                seed: 50,
                ..Default::default()
            };
            let sim = Simulator::new(tree.clone(), config)?;
            let history = sim.simulate_indels()?;
            for seq in &history.sequences {
                assert!(seq.live_len() >= min_length);
                assert!(seq.live_len() <= 100);
            }

            let aln = sim.simulate()?;
            for i in 0..aln.num_sequences() {
                let total: i64 = aln.runs(i).unwrap().iter().map(|r| r.abs()).sum();
                assert_eq!(total as usize, aln.width());
            }
        }
    }

    Ok(())
}

#[test]
fn zero_rates_copy_the_root() -> anyhow::Result<()> {
    let tree = Tree::from_newick("((A:0.3,B:0.1):0.2,(C:0.2,D:0.2):0.1);")?;
    let config = Configuration {
        root_length: 75,
        selection: NodeSelection::All,
        ..Default::default()
    };
    let sim = Simulator::new(tree, config)?;
    let aln = sim.simulate()?;

    assert_eq!(aln.width(), 75);
    assert_eq!(aln.num_sequences(), 7);
    for i in 0..aln.num_sequences() {
        assert_eq!(aln.runs(i).unwrap(), &[75]);
    }
    for row in aln.render() {
        assert_eq!(row, "X".repeat(75));
    }

    Ok(())
}

#[test]
fn rendered_rows_have_full_width() -> anyhow::Result<()> {
    let tree = Tree::from_newick("(((A:0.2,B:0.2):0.2,C:0.4):0.1,(D:0.3,E:0.5):0.2);")?;
    let mut subst = SubstitutionConfig::new(ModelCode::Lg);
    subst.alpha = 0.7;
    subst.categories = 4;
    subst.rho = 0.6;
    let config = Configuration {
        root_length: 150,
        insertion_rate: BranchValues::PerBranch(vec![0.5, 0.5, 1.0, 1.0, 0.0, 2.0, 0.5, 0.5]),
        deletion_rate: BranchValues::Uniform(1.0),
        insertion_lengths: BranchValues::Uniform("poisson:2:15".parse()?),
        deletion_lengths: BranchValues::Uniform("custom:0.5,0.3,0.2".parse()?),
        substitution: Some(subst),
        seed: 2024,
        ..Default::default()
    };
    let sim = Simulator::new(tree, config)?;

    for aln in sim.simulate_batch(5, true)? {
        let rendered = aln.render();
        for (row, text) in aln.rows().iter().zip(&rendered) {
            assert_eq!(text.len(), aln.width());
            let total: i64 = row.runs.iter().map(|r| r.abs()).sum();
            assert_eq!(total as usize, aln.width());
            assert_eq!(text.bytes().filter(|&c| c != b'-').count(), row.residues());
        }
        assert_eq!(aln.rate_categories().len(), aln.width());
        assert!(aln.rate_categories().iter().all(|&c| c < 4));
    }

    Ok(())
}
