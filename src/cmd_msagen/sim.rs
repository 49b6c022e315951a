use clap::*;
use msagen::libs::config::SubstitutionConfig;
use msagen::libs::error::SimError;
use msagen::libs::msa::FastaSink;
use msagen::libs::phylo::Tree;
use msagen::libs::simulator::Simulator;
use msagen::libs::subst::{Alphabet, ModelCode};
use std::io::Write;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    let cmd = Command::new("sim")
        .about("Simulates an alignment along a tree")
        .after_help(
            r###"
Evolves a root sequence down the tree. Indels are applied first and define
the alignment columns; substitutions then fill the columns with characters.

Input format:
* A Newick tree filename or 'stdin'. Branch lengths are expected
  substitutions per site; a missing length counts as 0.
* Per-branch values (--ins-rates, --del-rates) follow the pre-order of the
  non-root nodes.

Models:
* --type dna:     JC (default), HKY, TN92, GTR
    HKY  params: fA,fC,fG,fT,kappa
    TN92 params: theta,kappa
    GTR  params: fA,fC,fG,fT,AC,AG,AT,CG,CT,GT
* --type protein: WAG (default), LG, JTT, DAYHOFF, AAJC, CUSTOM
    CUSTOM reads a PAML .dat file given with --custom-model
* --type none: indels only, residues are written as X

Rate heterogeneity:
* --alpha and --categories give discrete gamma rates
* --pinv adds an invariant category; --rho correlates adjacent sites.
  The two cannot be combined.

Output format:
* FASTA, one line per sequence. Unnamed nodes are written as N<id>.
  Replicates are separated by a blank line.

Examples:
1. Indels only:
   msagen sim tests/newick/abc.nwk --ins-rate 0.1 --del-rate 0.1

2. Protein with correlated gamma rates:
   msagen sim tree.nwk --type protein --model LG --alpha 0.5 --categories 4 --rho 0.4

3. Streaming output for large trees:
   msagen sim big.nwk --type dna --low-memory -o out.fa
"###,
        );

    super::indel_args(cmd)
        .arg(
            Arg::new("type")
                .long("type")
                .short('t')
                .num_args(1)
                .value_parser(["none", "dna", "protein"])
                .default_value("none")
                .help("Character type. [none] simulates indels only"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .short('m')
                .num_args(1)
                .help("Replacement model; implies --type when that is none"),
        )
        .arg(
            Arg::new("params")
                .long("params")
                .num_args(1)
                .help("Comma-separated model parameters"),
        )
        .arg(
            Arg::new("custom_model")
                .long("custom-model")
                .num_args(1)
                .help("PAML .dat file for the CUSTOM model"),
        )
        .arg(
            Arg::new("alpha")
                .long("alpha")
                .short('a')
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(f64))
                .help("Gamma shape"),
        )
        .arg(
            Arg::new("categories")
                .long("categories")
                .short('k')
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of gamma categories"),
        )
        .arg(
            Arg::new("pinv")
                .long("pinv")
                .num_args(1)
                .default_value("0")
                .value_parser(value_parser!(f64))
                .help("Proportion of invariant sites"),
        )
        .arg(
            Arg::new("rho")
                .long("rho")
                .num_args(1)
                .default_value("0")
                .value_parser(value_parser!(f64))
                .help("Correlation of rates at adjacent sites"),
        )
        .arg(
            Arg::new("replicates")
                .long("replicates")
                .short('n')
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of alignments"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .short('p')
                .num_args(1)
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Number of threads for replicates"),
        )
        .arg(
            Arg::new("low_memory")
                .long("low-memory")
                .action(ArgAction::SetTrue)
                .help("Write rows as nodes finish instead of holding the alignment"),
        )
        .arg(
            Arg::new("rates")
                .long("rates")
                .num_args(1)
                .help("Also write the rate category and rate of every column to this file"),
        )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    super::init_logger(args.get_flag("verbose"));

    //----------------------------
    // Args
    //----------------------------
    let infile = args.get_one::<String>("infile").unwrap();
    let replicates = *args.get_one::<usize>("replicates").unwrap();
    let parallel = *args.get_one::<usize>("parallel").unwrap();
    let low_memory = args.get_flag("low_memory");
    let opt_rates = args.get_one::<String>("rates");

    let mut config = super::indel_config(args)?;
    config.substitution = substitution_config(args)?;

    if low_memory && replicates > 1 {
        return Err(SimError::IncompatibleOptions(
            "--low-memory writes a single replicate".to_string(),
        )
        .into());
    }

    let tree = Tree::from_file(infile)?;
    log::info!(
        "Tree {}: {} nodes, {} leaves",
        infile,
        tree.len(),
        tree.num_leaves()
    );
    let simulator = Simulator::new(tree, config)?;

    //----------------------------
    // Output
    //----------------------------
    let mut writer = intspan::writer(args.get_one::<String>("outfile").unwrap());

    if low_memory {
        let mut sink = FastaSink::new(&mut writer);
        let sites = simulator.simulate_low_memory(&mut sink)?;
        if let Some(path) = opt_rates {
            let mut rate_writer = intspan::writer(path);
            rate_writer.write_fmt(format_args!("site\tcategory\trate\n"))?;
            for (i, (c, r)) in sites.categories.iter().zip(&sites.rates).enumerate() {
                rate_writer.write_fmt(format_args!("{}\t{}\t{}\n", i + 1, c, r))?;
            }
        }
        return Ok(());
    }

    let alignments = if parallel > 1 && replicates > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel)
            .build()?;
        pool.install(|| simulator.simulate_batch(replicates, true))?
    } else {
        simulator.simulate_batch(replicates, false)?
    };

    let mut rate_writer = opt_rates.map(|path| intspan::writer(path));
    for (i, alignment) in alignments.iter().enumerate() {
        if i > 0 {
            writer.write_all(b"\n")?;
            if let Some(w) = rate_writer.as_mut() {
                w.write_all(b"\n")?;
            }
        }
        alignment.write_fasta(&mut writer)?;
        if let Some(w) = rate_writer.as_mut() {
            alignment.write_site_rates(w)?;
        }
    }

    Ok(())
}

fn substitution_config(args: &ArgMatches) -> anyhow::Result<Option<SubstitutionConfig>> {
    let kind = args.get_one::<String>("type").unwrap().as_str();
    let model = match args.get_one::<String>("model") {
        Some(text) => Some(text.parse::<ModelCode>()?),
        None => None,
    };

    // none, or the alphabet --type asks for
    let alphabet = match kind {
        "dna" => Some(Alphabet::Nucleotide),
        "protein" => Some(Alphabet::AminoAcid),
        _ => None,
    };

    let code = match (alphabet, model) {
        (None, None) => return Ok(None),
        (None, Some(code)) => code,
        (Some(Alphabet::Nucleotide), None) => ModelCode::Jc,
        (Some(Alphabet::AminoAcid), None) => ModelCode::Wag,
        (Some(expected), Some(code)) => {
            if code.alphabet() != expected {
                return Err(SimError::IncompatibleOptions(format!(
                    "model {} does not simulate {} sequences",
                    code.name(),
                    kind
                ))
                .into());
            }
            code
        }
    };

    let params = match args.get_one::<String>("params") {
        Some(text) => text
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("--params: {}", e))?,
        None => Vec::new(),
    };

    Ok(Some(SubstitutionConfig {
        model: code,
        params,
        custom_model: args.get_one::<String>("custom_model").cloned(),
        alpha: *args.get_one::<f64>("alpha").unwrap(),
        categories: *args.get_one::<usize>("categories").unwrap(),
        pinv: *args.get_one::<f64>("pinv").unwrap(),
        rho: *args.get_one::<f64>("rho").unwrap(),
    }))
}
