use super::Tree;
use crate::libs::error::{Result, SimError};
use std::io::Read;

/// Read a single Newick tree from a file.
///
/// `infile` may be "stdin". Only the first tree is used; anything after its
/// terminating `;` is ignored.
///
/// # Example
/// ```
/// // usage in CLI:
/// // let tree = msagen::libs::phylo::Tree::from_file("path/to/tree.nwk")?;
/// ```
pub fn from_file(infile: &str) -> Result<Tree> {
    let mut reader = intspan::reader(infile);
    let mut newick = String::new();
    reader.read_to_string(&mut newick)?;

    let tree = Tree::from_newick(newick.as_str())?;
    if tree.is_empty() {
        return Err(SimError::MalformedTree(format!("{}: no nodes", infile)));
    }
    Ok(tree)
}
