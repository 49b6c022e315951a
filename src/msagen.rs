extern crate clap;
use clap::*;

mod cmd_msagen;

fn main() -> anyhow::Result<()> {
    let app = Command::new("msagen")
        .version(crate_version!())
        .author(crate_authors!())
        .about("`msagen` - Simulate multiple sequence alignments along a tree")
        .propagate_version(true)
        .arg_required_else_help(true)
        .color(ColorChoice::Auto)
        .subcommand(cmd_msagen::sim::make_subcommand())
        .subcommand(cmd_msagen::rates::make_subcommand())
        .subcommand(cmd_msagen::blocks::make_subcommand())
        .after_help(
            r###"Subcommands:

* sim    - Indels and substitutions along a tree, written as FASTA
* rates  - Discrete gamma categories and the rate correlation matrix
* blocks - Indel pass only: block provenance and alignment run-lengths

Logging goes to stderr. Use --verbose for progress, or RUST_LOG=debug for
per-branch details.

"###,
        );

    match app.get_matches().subcommand() {
        Some(("sim", sub_matches)) => cmd_msagen::sim::execute(sub_matches),
        Some(("rates", sub_matches)) => cmd_msagen::rates::execute(sub_matches),
        Some(("blocks", sub_matches)) => cmd_msagen::blocks::execute(sub_matches),
        _ => unreachable!(),
    }?;

    Ok(())
}
