use clap::*;
use msagen::libs::config::{BranchValues, Configuration, NodeSelection};
use msagen::libs::dist::DiscreteDistribution;
use msagen::libs::indel::IndelRateMode;

pub mod blocks;
pub mod rates;
pub mod sim;

/// `--verbose` lowers the default filter to `info`; `RUST_LOG` wins.
pub fn init_logger(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}

// Arguments shared by `sim` and `blocks`
pub fn indel_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("infile")
            .required(true)
            .num_args(1)
            .index(1)
            .help("Newick tree filename. [stdin] for standard input"),
    )
    .arg(
        Arg::new("length")
            .long("length")
            .short('l')
            .num_args(1)
            .default_value("100")
            .value_parser(value_parser!(usize))
            .help("Root sequence length"),
    )
    .arg(
        Arg::new("ins_rate")
            .long("ins-rate")
            .num_args(1)
            .default_value("0")
            .value_parser(value_parser!(f64))
            .help("Insertion rate on every branch"),
    )
    .arg(
        Arg::new("del_rate")
            .long("del-rate")
            .num_args(1)
            .default_value("0")
            .value_parser(value_parser!(f64))
            .help("Deletion rate on every branch"),
    )
    .arg(
        Arg::new("ins_rates")
            .long("ins-rates")
            .num_args(1)
            .conflicts_with("ins_rate")
            .help("Comma-separated insertion rates, one per branch in pre-order"),
    )
    .arg(
        Arg::new("del_rates")
            .long("del-rates")
            .num_args(1)
            .conflicts_with("del_rate")
            .help("Comma-separated deletion rates, one per branch in pre-order"),
    )
    .arg(
        Arg::new("ins_dist")
            .long("ins-dist")
            .num_args(1)
            .default_value("fixed:1")
            .value_parser(value_parser!(DiscreteDistribution))
            .help("Insertion lengths: fixed:N, zipf:A:MAX, geom:P:MAX, poisson:L:MAX or custom:p1,p2,..."),
    )
    .arg(
        Arg::new("del_dist")
            .long("del-dist")
            .num_args(1)
            .default_value("fixed:1")
            .value_parser(value_parser!(DiscreteDistribution))
            .help("Deletion lengths, same forms as --ins-dist"),
    )
    .arg(
        Arg::new("min_length")
            .long("min-length")
            .num_args(1)
            .default_value("0")
            .value_parser(value_parser!(usize))
            .help("Deletions that would leave fewer sites are refused"),
    )
    .arg(
        Arg::new("per_site")
            .long("per-site")
            .action(ArgAction::SetTrue)
            .help("Indel rates are per site; event times follow the sequence length"),
    )
    .arg(
        Arg::new("save")
            .long("save")
            .num_args(1)
            .value_parser(["leaves", "all", "root"])
            .default_value("leaves")
            .help("Rows to output. [root] adds the root to the leaves"),
    )
    .arg(
        Arg::new("seed")
            .long("seed")
            .short('s')
            .num_args(1)
            .default_value("0")
            .value_parser(value_parser!(u64))
            .help("Random seed"),
    )
    .arg(
        Arg::new("outfile")
            .long("outfile")
            .short('o')
            .num_args(1)
            .default_value("stdout")
            .help("Output filename. [stdout] for screen"),
    )
    .arg(
        Arg::new("verbose")
            .long("verbose")
            .short('v')
            .action(ArgAction::SetTrue)
            .help("Log progress to stderr"),
    )
}

fn rate_list(args: &ArgMatches, list: &str, single: &str) -> anyhow::Result<BranchValues<f64>> {
    match args.get_one::<String>(list) {
        Some(text) => {
            let rates = text
                .split(',')
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow::anyhow!("--{}: {}", list.replace('_', "-"), e))?;
            Ok(BranchValues::PerBranch(rates))
        }
        None => Ok(BranchValues::Uniform(*args.get_one::<f64>(single).unwrap())),
    }
}

/// Indel part of the configuration from `indel_args`.
pub fn indel_config(args: &ArgMatches) -> anyhow::Result<Configuration> {
    Ok(Configuration {
        root_length: *args.get_one::<usize>("length").unwrap(),
        insertion_rate: rate_list(args, "ins_rates", "ins_rate")?,
        deletion_rate: rate_list(args, "del_rates", "del_rate")?,
        insertion_lengths: BranchValues::Uniform(
            args.get_one::<DiscreteDistribution>("ins_dist").unwrap().clone(),
        ),
        deletion_lengths: BranchValues::Uniform(
            args.get_one::<DiscreteDistribution>("del_dist").unwrap().clone(),
        ),
        min_length: *args.get_one::<usize>("min_length").unwrap(),
        indel_mode: if args.get_flag("per_site") {
            IndelRateMode::PerSite
        } else {
            IndelRateMode::PerBranch
        },
        substitution: None,
        selection: args
            .get_one::<String>("save")
            .unwrap()
            .parse::<NodeSelection>()?,
        seed: *args.get_one::<u64>("seed").unwrap(),
    })
}
