use clap::*;
use itertools::Itertools;
use msagen::libs::block::{EventKind, Origin};
use msagen::libs::msa;
use msagen::libs::phylo::Tree;
use msagen::libs::simulator::Simulator;
use std::io::Write;

// Create clap subcommand arguments
pub fn make_subcommand() -> Command {
    let cmd = Command::new("blocks")
        .about("Runs the indel pass and prints block provenance")
        .after_help(
            r###"
Simulates indels only and reports, for every selected node, where its sites
came from and how its row maps onto the alignment.

Output format (TSV), per node:
* >name  live_length  events
* block lines: origin (root or ins<id>), first column id, length.
  A length of 0 marks a block whose sites were all deleted.
* runs: signed run-lengths of the alignment row, gaps negative

Examples:
1. Blocks of the leaves:
   msagen blocks tests/newick/abc.nwk --ins-rate 0.5 --del-rate 0.5 --seed 7

2. Include internal nodes and print each event:
   msagen blocks tree.nwk --ins-rate 1 --save all --events
"###,
        );

    super::indel_args(cmd).arg(
        Arg::new("events")
            .long("events")
            .action(ArgAction::SetTrue)
            .help("Also print the events applied on the branch above each node"),
    )
}

// command implementation
pub fn execute(args: &ArgMatches) -> anyhow::Result<()> {
    super::init_logger(args.get_flag("verbose"));

    let infile = args.get_one::<String>("infile").unwrap();
    let show_events = args.get_flag("events");
    let config = super::indel_config(args)?;

    let tree = Tree::from_file(infile)?;
    let simulator = Simulator::new(tree, config)?;
    let history = simulator.simulate_indels()?;
    let alignment = msa::assemble(&history, simulator.tree(), simulator.rows());

    let mut writer = intspan::writer(args.get_one::<String>("outfile").unwrap());
    writer.write_fmt(format_args!("#width\t{}\n", alignment.width()))?;

    for row in alignment.rows() {
        let seq = &history.sequences[row.node];
        let events = &history.events[row.node];
        writer.write_fmt(format_args!(
            ">{}\t{}\t{}\n",
            row.name,
            seq.live_len(),
            events.len()
        ))?;

        for block in seq.blocks() {
            let origin = match block.origin {
                Origin::Root => "root".to_string(),
                Origin::Insertion(id) => format!("ins{}", id),
            };
            writer.write_fmt(format_args!(
                "{}\t{}\t{}\n",
                origin, block.column, block.len
            ))?;
        }

        if show_events {
            for e in events {
                let kind = match e.kind {
                    EventKind::Insertion => "I",
                    EventKind::Deletion => "D",
                };
                writer.write_fmt(format_args!("event\t{}\t{}\t{}\n", kind, e.position, e.length))?;
            }
        }

        let runs = row.runs.iter().join(",");
        writer.write_fmt(format_args!("runs\t{}\n", runs))?;
    }

    Ok(())
}
