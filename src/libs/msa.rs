//! Alignment assembly and output.
//!
//! Column ids from the indel pass are threaded into one global order (the
//! super-sequence) by replaying the insertion log: root columns come first
//! in their natural order, and every insertion is spliced in directly after
//! its anchor column. Any node's live columns appear in that order, so each
//! row is just its columns mapped to global positions.

use crate::libs::block::ColumnId;
use crate::libs::indel::IndelHistory;
use crate::libs::phylo::{NodeId, Tree};
use std::io::Write;

/// One alignment row: residue runs are positive, gap runs negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedRow {
    pub node: NodeId,
    pub name: String,
    pub runs: Vec<i64>,
}

impl AlignedRow {
    /// Number of residues (non-gap columns).
    pub fn residues(&self) -> usize {
        self.runs.iter().filter(|&&r| r > 0).map(|&r| r as usize).sum()
    }

    /// `true` for each column holding a residue.
    pub fn mask(&self) -> Vec<bool> {
        let mut mask = Vec::new();
        for &r in &self.runs {
            mask.extend(std::iter::repeat(r > 0).take(r.unsigned_abs() as usize));
        }
        mask
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alignment {
    width: usize,
    rows: Vec<AlignedRow>,
    /// Filled characters per row, full width with `-` in gaps
    sequences: Option<Vec<Vec<u8>>>,
    rate_categories: Vec<usize>,
    site_rates: Vec<f64>,
}

/// Builds the alignment of `nodes` (in the given order) from an indel
/// history. Columns present in none of the requested nodes are dropped.
pub fn assemble(history: &IndelHistory, tree: &Tree, nodes: &[NodeId]) -> Alignment {
    let order = super_sequence(history);

    let mut used = vec![false; history.num_columns];
    for &id in nodes {
        for c in history.sequences[id].columns() {
            used[c] = true;
        }
    }

    let mut position = vec![usize::MAX; history.num_columns];
    let mut width = 0;
    for c in order {
        if used[c] {
            position[c] = width;
            width += 1;
        }
    }

    let rows = nodes
        .iter()
        .map(|&id| AlignedRow {
            node: id,
            name: tree.label(id),
            runs: encode_runs(history.sequences[id].columns().map(|c| position[c]), width),
        })
        .collect();

    Alignment {
        width,
        rows,
        ..Default::default()
    }
}

/// Alignment of `nodes` when no indel happened: one ungapped run each.
pub fn ungapped(tree: &Tree, nodes: &[NodeId], width: usize) -> Alignment {
    let rows = nodes
        .iter()
        .map(|&id| AlignedRow {
            node: id,
            name: tree.label(id),
            runs: if width > 0 {
                vec![width as i64]
            } else {
                Vec::new()
            },
        })
        .collect();
    Alignment {
        width,
        rows,
        ..Default::default()
    }
}

// Global order of every column id ever created
fn super_sequence(history: &IndelHistory) -> Vec<ColumnId> {
    const END: usize = usize::MAX;
    let n = history.num_columns;
    let head = n;
    // next[c] for columns, next[head] for the list start
    let mut next = vec![END; n + 1];

    let mut prev = head;
    for c in 0..history.root_length {
        next[prev] = c;
        prev = c;
    }

    for rec in &history.insertions {
        if rec.len == 0 {
            continue;
        }
        let anchor = rec.anchor.unwrap_or(head);
        let last = rec.first_column + rec.len - 1;
        for c in rec.first_column..last {
            next[c] = c + 1;
        }
        next[last] = next[anchor];
        next[anchor] = rec.first_column;
    }

    let mut order = Vec::with_capacity(n);
    let mut cur = next[head];
    while cur != END {
        order.push(cur);
        cur = next[cur];
    }
    order
}

// Run-length encoding of strictly increasing aligned positions
fn encode_runs(positions: impl Iterator<Item = usize>, width: usize) -> Vec<i64> {
    let mut runs: Vec<i64> = Vec::new();
    let mut expected = 0;
    for p in positions {
        if p > expected {
            runs.push(-((p - expected) as i64));
        }
        match runs.last_mut() {
            Some(last) if *last > 0 => *last += 1,
            _ => runs.push(1),
        }
        expected = p + 1;
    }
    if width > expected {
        runs.push(-((width - expected) as i64));
    }
    runs
}

impl Alignment {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn num_sequences(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[AlignedRow] {
        &self.rows
    }

    pub fn runs(&self, idx: usize) -> Option<&[i64]> {
        self.rows.get(idx).map(|r| r.runs.as_slice())
    }

    pub fn names(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn rate_categories(&self) -> &[usize] {
        &self.rate_categories
    }

    pub fn site_rates(&self) -> &[f64] {
        &self.site_rates
    }

    /// Attach simulated characters. `by_node` holds full-width sequences
    /// indexed by node id; gap columns of each row are masked with `-`.
    pub fn fill_substitutions(
        &mut self,
        by_node: &[Option<Vec<u8>>],
        rate_categories: Vec<usize>,
        site_rates: Vec<f64>,
    ) {
        let filled = self
            .rows
            .iter()
            .map(|row| {
                let full = by_node.get(row.node).and_then(|s| s.as_deref());
                mask_row(row, full)
            })
            .collect();
        self.sequences = Some(filled);
        self.rate_categories = rate_categories;
        self.site_rates = site_rates;
    }

    /// One text row per sequence, `-` for gaps. Residues are `X` until
    /// substitutions are filled in.
    pub fn render(&self) -> Vec<String> {
        match &self.sequences {
            Some(seqs) => seqs
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
            None => self
                .rows
                .iter()
                .map(|row| String::from_utf8_lossy(&mask_row(row, None)).into_owned())
                .collect(),
        }
    }

    pub fn write_fasta(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        for (row, seq) in self.rows.iter().zip(self.render()) {
            writeln!(writer, ">{}", row.name)?;
            writeln!(writer, "{}", seq)?;
        }
        Ok(())
    }

    /// Per-column category index and rate, one line per column.
    pub fn write_site_rates(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writeln!(writer, "site\tcategory\trate")?;
        for (i, (c, r)) in self
            .rate_categories
            .iter()
            .zip(&self.site_rates)
            .enumerate()
        {
            writeln!(writer, "{}\t{}\t{}", i + 1, c, r)?;
        }
        Ok(())
    }
}

/// Masks a full-width character row with the gaps of `row`.
/// Without characters, residues are written as `X`.
pub fn mask_row(row: &AlignedRow, full: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut col = 0;
    for &r in &row.runs {
        let n = r.unsigned_abs() as usize;
        if r > 0 {
            match full {
                Some(chars) => out.extend_from_slice(&chars[col..col + n]),
                None => out.extend(std::iter::repeat(b'X').take(n)),
            }
        } else {
            out.extend(std::iter::repeat(b'-').take(n));
        }
        col += n;
    }
    out
}

/// Destination of the streaming output path.
pub trait SequenceSink {
    fn write_sequence(&mut self, id: &str, row: &[u8]) -> std::io::Result<()>;
}

/// Writes `>id` and the row on the next line.
pub struct FastaSink<W: Write> {
    writer: W,
}

impl<W: Write> FastaSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SequenceSink for FastaSink<W> {
    fn write_sequence(&mut self, id: &str, row: &[u8]) -> std::io::Result<()> {
        writeln!(self.writer, ">{}", id)?;
        self.writer.write_all(row)?;
        writeln!(self.writer)?;
        Ok(())
    }
}

impl SequenceSink for Vec<(String, Vec<u8>)> {
    fn write_sequence(&mut self, id: &str, row: &[u8]) -> std::io::Result<()> {
        self.push((id.to_string(), row.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::block::{BlockEngine, BlockSequence, Event};

    fn history_of(tree: &Tree, root_len: usize, events: &[(NodeId, Vec<Event>)]) -> IndelHistory {
        let mut engine = BlockEngine::new(root_len, 0);
        let mut sequences: Vec<BlockSequence> = vec![Default::default(); tree.len()];
        let mut per_node = vec![Vec::new(); tree.len()];
        for (id, evs) in events {
            per_node[*id] = evs.clone();
        }
        for id in tree.nodes_preorder() {
            let node = tree.get_node(id).unwrap();
            sequences[id] = match node.parent {
                None => engine.root_sequence(),
                Some(p) => {
                    let parent = sequences[p].clone();
                    engine.derive(&parent, &per_node[id])
                }
            };
        }
        IndelHistory {
            sequences,
            events: per_node,
            insertions: engine.insertions().to_vec(),
            root_length: root_len,
            num_columns: engine.num_columns(),
        }
    }

    #[test]
    fn runs_encode_gaps() {
        assert_eq!(encode_runs([0usize, 1, 2].into_iter(), 3), vec![3]);
        assert_eq!(encode_runs([2usize, 3, 6].into_iter(), 8), vec![-2, 2, -2, 1, -1]);
        assert_eq!(encode_runs(std::iter::empty(), 4), vec![-4]);
    }

    #[test]
    fn insertion_becomes_gap_elsewhere() {
        //   0
        //  / \
        // A1  B2
        let tree = Tree::from_newick("(A:1,B:1);").unwrap();
        let history = history_of(&tree, 4, &[(1, vec![Event::insertion(2, 3)])]);
        let aln = assemble(&history, &tree, &[1, 2]);

        assert_eq!(aln.width(), 7);
        assert_eq!(aln.runs(0).unwrap(), &[7]);
        assert_eq!(aln.runs(1).unwrap(), &[2, -3, 2]);
        assert_eq!(aln.render(), vec!["XXXXXXX", "XX---XX"]);
    }

    #[test]
    fn sibling_insertions_at_same_anchor() {
        let tree = Tree::from_newick("(A:1,B:1);").unwrap();
        let history = history_of(
            &tree,
            3,
            &[
                (1, vec![Event::insertion(1, 2)]),
                (2, vec![Event::insertion(1, 1)]),
            ],
        );
        let aln = assemble(&history, &tree, &[1, 2]);

        assert_eq!(aln.width(), 6);
        // later insertion sits closer to the anchor
        assert_eq!(aln.runs(0).unwrap(), &[1, -1, 4]);
        assert_eq!(aln.runs(1).unwrap(), &[2, -2, 2]);
    }

    #[test]
    fn nested_insertions_keep_order() {
        // ((A,B)X,C): X inserts, then A inserts inside X's insertion
        let tree = Tree::from_newick("((A:1,B:1)X:1,C:1);").unwrap();
        let history = history_of(
            &tree,
            4,
            &[
                (1, vec![Event::insertion(4, 4)]),
                (2, vec![Event::insertion(6, 2), Event::deletion(0, 1)]),
                (4, vec![Event::deletion(1, 2)]),
            ],
        );
        let nodes = tree.get_leaves();
        let aln = assemble(&history, &tree, &nodes);

        for (i, &id) in nodes.iter().enumerate() {
            let runs = aln.runs(i).unwrap();
            let total: i64 = runs.iter().map(|r| r.abs()).sum();
            assert_eq!(total as usize, aln.width());
            assert_eq!(aln.rows()[i].residues(), history.sequences[id].live_len());
        }
        // root 4 + X's 4 + A's 2
        assert_eq!(aln.width(), 10);
        assert_eq!(aln.runs(0).unwrap(), &[-1, 9]);
        assert_eq!(aln.runs(1).unwrap(), &[6, -2, 2]);
        assert_eq!(aln.runs(2).unwrap(), &[1, -2, 1, -6]);
    }

    #[test]
    fn columns_absent_from_all_rows_are_dropped() {
        let tree = Tree::from_newick("(A:1,B:1);").unwrap();
        let history = history_of(
            &tree,
            5,
            &[(1, vec![Event::deletion(0, 2)]), (2, vec![Event::deletion(0, 1)])],
        );
        let aln = assemble(&history, &tree, &[1, 2]);
        assert_eq!(aln.width(), 4);
        assert_eq!(aln.runs(0).unwrap(), &[-1, 3]);
        assert_eq!(aln.runs(1).unwrap(), &[4]);
    }

    #[test]
    fn fill_masks_gaps() {
        let tree = Tree::from_newick("(A:1,B:1);").unwrap();
        let history = history_of(&tree, 3, &[(2, vec![Event::deletion(1, 1)])]);
        let mut aln = assemble(&history, &tree, &[1, 2]);

        let by_node = vec![None, Some(b"ACG".to_vec()), Some(b"ATG".to_vec())];
        aln.fill_substitutions(&by_node, vec![0, 0, 0], vec![1.0, 1.0, 1.0]);
        assert_eq!(aln.render(), vec!["ACG", "A-G"]);

        let mut out = Vec::new();
        aln.write_fasta(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">A\nACG\n>B\nA-G\n");
    }

    #[test]
    fn fasta_sink_format() {
        let mut sink = FastaSink::new(Vec::new());
        sink.write_sequence("N0", b"AC-T").unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), ">N0\nAC-T\n");
    }
}
