use super::error::TreeError;
use super::node::NodeId;
use super::tree::Tree;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while},
    character::complete::{char, digit0, digit1, multispace0},
    combinator::{cut, map, map_res, opt, recognize, value},
    error::{context, ContextError, ErrorKind, FromExternalError, ParseError},
    multi::many0,
    sequence::{delimited, preceded},
    IResult, Offset, Parser,
};

// ================================================================================================
// Error Handling Structures
// ================================================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum DetailedErrorKind {
    Context(&'static str),
    Nom(ErrorKind),
}

/// A nom error that keeps every context frame, so failures can be reported
/// with the chain of constructs being parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailedError<'a> {
    pub errors: Vec<(&'a str, DetailedErrorKind)>,
}

impl<'a> ParseError<&'a str> for DetailedError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        DetailedError {
            errors: vec![(input, DetailedErrorKind::Nom(kind))],
        }
    }

    fn append(input: &'a str, kind: ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, DetailedErrorKind::Nom(kind)));
        other
    }
}

impl<'a> ContextError<&'a str> for DetailedError<'a> {
    fn add_context(input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, DetailedErrorKind::Context(ctx)));
        other
    }
}

impl<'a, E> FromExternalError<&'a str, E> for DetailedError<'a> {
    fn from_external_error(input: &'a str, kind: ErrorKind, _e: E) -> Self {
        DetailedError {
            errors: vec![(input, DetailedErrorKind::Nom(kind))],
        }
    }
}

// ================================================================================================
// Parsers
// ================================================================================================

// Wraps a parser and eats surrounding whitespace (spaces, tabs, newlines).
fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

// Node label: bare, 'single quoted' or "double quoted".
// Doubled quote characters inside a quoted label stand for one quote.
fn parse_label(input: &str) -> IResult<&str, String, DetailedError<'_>> {
    let unquoted = map(take_while(|c: char| !"():;,[]".contains(c)), |s: &str| {
        s.trim().to_string()
    });

    let single_quoted = delimited(
        char('\''),
        map(
            many0(alt((is_not("'"), value("'", tag("''"))))),
            |parts: Vec<&str>| parts.concat(),
        ),
        char('\''),
    );

    let double_quoted = delimited(
        char('"'),
        map(
            many0(alt((is_not("\""), value("\"", tag("\"\""))))),
            |parts: Vec<&str>| parts.concat(),
        ),
        char('"'),
    );

    context("label", alt((single_quoted, double_quoted, unquoted))).parse(input)
}

// Branch length after a colon. Accepts `1`, `.5`, `0.5`, `1e-3`, `-0.1`.
fn parse_length(input: &str) -> IResult<&str, f64, DetailedError<'_>> {
    let number = alt((
        recognize((digit1, opt((char('.'), digit0)))),
        recognize((char('.'), digit1)),
    ));

    context(
        "length",
        preceded(
            ws(char(':')),
            // Once ':' is seen a number is mandatory
            cut(map_res(
                recognize((
                    opt(alt((char('+'), char('-')))),
                    number,
                    opt((
                        alt((char('e'), char('E'))),
                        opt(alt((char('+'), char('-')))),
                        digit1,
                    )),
                )),
                |s: &str| s.parse::<f64>(),
            )),
        ),
    )
    .parse(input)
}

// Bracketed comments carry nothing the simulator needs; they are skipped.
fn skip_comments(input: &str) -> IResult<&str, (), DetailedError<'_>> {
    let comment = delimited(ws(char('[')), take_while(|c| c != ']'), ws(char(']')));
    context("comment", map(many0(comment), |_| ())).parse(input)
}

// A single structural character, with surrounding whitespace
fn symbol<'a>(c: char) -> impl Parser<&'a str, Output = char, Error = DetailedError<'a>> {
    ws(char(c))
}

// Label:Length after a leaf or a closing parenthesis, comments allowed around the length
fn parse_tail(input: &str) -> IResult<&str, (Option<String>, Option<f64>), DetailedError<'_>> {
    let (input, label) = opt(parse_label).parse(input)?;
    let (input, _) = skip_comments(input)?;
    let (input, length) = opt(parse_length).parse(input)?;
    let (input, _) = skip_comments(input)?;

    Ok((input, (label.filter(|l| !l.is_empty()), length)))
}

fn set_tail(tree: &mut Tree, id: NodeId, (name, length): (Option<String>, Option<f64>)) {
    tree.nodes[id].name = name;
    tree.nodes[id].length = length;
}

// Scans the whole tree without recursion. Unclosed parentheses are kept on
// `open`; an internal node is created at its '(' so ids come out in pre-order.
fn parse_tree(input: &str) -> IResult<&str, Tree, DetailedError<'_>> {
    let mut tree = Tree::new();
    let mut open: Vec<NodeId> = Vec::new();
    let mut input = input;

    'subtree: loop {
        while let Ok((rest, _)) = symbol('(').parse(input) {
            let id = tree.add_node(open.last().copied());
            open.push(id);
            input = rest;
        }

        let leaf = tree.add_node(open.last().copied());
        let (rest, tail) = parse_tail(input)?;
        set_tail(&mut tree, leaf, tail);
        input = rest;

        while let Some(&parent) = open.last() {
            if let Ok((rest, _)) = symbol(',').parse(input) {
                input = rest;
                continue 'subtree;
            }
            let (rest, _) = context("children", cut(symbol(')'))).parse(input)?;
            open.pop();
            let (rest, tail) = parse_tail(rest)?;
            set_tail(&mut tree, parent, tail);
            input = rest;
        }
        break;
    }

    let (input, _) = context("terminator", symbol(';')).parse(input)?;
    tree.set_root(0);
    tree.count_leaves();

    Ok((input, tree))
}

// ================================================================================================
// Entry Points
// ================================================================================================

/// Parses a single Newick tree. The terminating `;` is mandatory.
pub fn parse_newick(input: &str) -> Result<Tree, TreeError> {
    if input.trim().is_empty() {
        return Err(TreeError::Structure("empty tree description".to_string()));
    }

    match parse_tree(input) {
        Ok((_, tree)) => Ok(tree),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(make_tree_error(input, e)),
        Err(nom::Err::Incomplete(_)) => Err(TreeError::Syntax {
            message: "Incomplete input".to_string(),
            line: 0,
            column: 0,
            snippet: "".to_string(),
        }),
    }
}

// Convert nom errors into a TreeError with line, column and a snippet
fn make_tree_error(input: &str, e: DetailedError) -> TreeError {
    let remaining = match e.errors.first() {
        Some((remaining, _)) => *remaining,
        None => "",
    };
    let offset = input.offset(remaining).min(input.len());

    let prefix = &input[..offset];
    let line = prefix.chars().filter(|&c| c == '\n').count() + 1;
    let last_newline = prefix.rfind('\n').map(|p| p + 1).unwrap_or(0);
    let column = offset - last_newline + 1;

    let mut msg = String::new();
    for (_, kind) in e.errors.iter().rev() {
        match kind {
            DetailedErrorKind::Context(ctx) => {
                msg.push_str(&format!("while parsing {}:\n", ctx));
            }
            DetailedErrorKind::Nom(k) => {
                msg.push_str(&format!("  error: {:?}\n", k));
            }
        }
    }

    TreeError::Syntax {
        message: msg,
        line,
        column,
        snippet: remaining.chars().take(50).collect(),
    }
}

impl Tree {
    /// Parse a Newick string into a Tree.
    ///
    /// # Example
    /// ```
    /// use msagen::libs::phylo::Tree;
    ///
    /// let tree = Tree::from_newick("(A:0.1,B:0.2)Root;").unwrap();
    /// assert_eq!(tree.len(), 3);
    ///
    /// // the terminator is mandatory
    /// assert!(Tree::from_newick("(A:0.1,B:0.2)Root").is_err());
    /// ```
    pub fn from_newick(input: &str) -> Result<Self, TreeError> {
        parse_newick(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_simple() {
        let tree = Tree::from_newick("(A,B)C;").unwrap();
        assert_eq!(tree.len(), 3);

        let root = tree.get_node(tree.get_root().unwrap()).unwrap();
        assert_eq!(root.name.as_deref(), Some("C"));
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn test_parser_lengths() {
        let tree = Tree::from_newick("(A:0.1, B:0.2e-1, C:.5, D:3)Root:100;").unwrap();

        let root = tree.get_node(tree.get_root().unwrap()).unwrap();
        assert_eq!(root.length, Some(100.0));

        let lengths: Vec<f64> = root
            .children
            .iter()
            .map(|&c| tree.get_node(c).unwrap().branch_length())
            .collect();
        assert_eq!(lengths, vec![0.1, 0.02, 0.5, 3.0]);
    }

    #[test]
    fn test_parser_preorder_ids() {
        //       0
        //      / \
        //     1   4
        //    / \
        //   2   3
        let tree = Tree::from_newick("((A:1,B:1)AB:1,C:2)R;").unwrap();
        let names: Vec<String> = (0..tree.len())
            .map(|id| tree.get_node(id).unwrap().label())
            .collect();
        assert_eq!(names, vec!["R", "AB", "A", "B", "C"]);
        assert_eq!(tree.get_node(2).unwrap().parent, Some(1));
        assert_eq!(tree.get_node(4).unwrap().parent, Some(0));
    }

    #[test]
    fn test_parser_comments_skipped() {
        let input = "(A:0.1[&&NHX:S=human],B[note]:0.2)n1[root comment];";
        let tree = Tree::from_newick(input).unwrap();
        assert_eq!(tree.len(), 3);

        let root = tree.get_node(tree.get_root().unwrap()).unwrap();
        assert_eq!(root.name.as_deref(), Some("n1"));
        let b = tree.get_node(root.children[1]).unwrap();
        assert_eq!(b.name.as_deref(), Some("B"));
        assert_eq!(b.length, Some(0.2));
    }

    #[test]
    fn test_parser_multiline_whitespace() {
        let input = "
        (
            A : 0.1,
            B : 0.2
        ) Root ;
        ";
        let tree = Tree::from_newick(input).unwrap();
        assert_eq!(tree.len(), 3);

        let root = tree.get_node(tree.get_root().unwrap()).unwrap();
        assert_eq!(root.name.as_deref(), Some("Root"));

        let c1 = tree.get_node(root.children[1]).unwrap();
        assert_eq!(c1.name.as_deref(), Some("B"));
        assert_eq!(c1.length, Some(0.2));
    }

    #[test]
    fn test_parser_quoted() {
        let input =
            "('Homo sapiens':0.1, \"Mus musculus\":0.2, 'O''Brien':0.3, \"say \"\"hi\"\"\", '');";
        let tree = Tree::from_newick(input).unwrap();
        let root = tree.get_node(tree.get_root().unwrap()).unwrap();

        let names: Vec<_> = root
            .children
            .iter()
            .map(|&c| tree.get_node(c).unwrap().name.clone().unwrap_or_default())
            .collect();
        assert_eq!(
            &names[..4],
            &["Homo sapiens", "Mus musculus", "O'Brien", "say \"hi\""]
        );
        // an empty quoted label is no label
        assert!(tree.get_node(root.children[4]).unwrap().name.is_none());
    }

    #[test]
    fn test_parser_deep_caterpillar() {
        // ((((L0,L1),L2),L3)...)
        let depth = 6000;
        let mut newick = "(".repeat(depth);
        newick.push_str("L0");
        for i in 1..=depth {
            newick.push_str(&format!(",L{}:0.1)", i));
        }
        newick.push(';');

        let tree = Tree::from_newick(&newick).unwrap();
        assert_eq!(tree.len(), 2 * depth + 1);
        assert_eq!(tree.num_leaves(), depth + 1);
        // the innermost cherry holds L0
        assert_eq!(tree.get_node(depth).unwrap().name.as_deref(), Some("L0"));
        assert_eq!(tree.get_node(depth - 1).unwrap().children.len(), 2);
    }

    #[test]
    fn test_parser_unbalanced() {
        for input in ["((A,B),C;", "(A,B));", "(A,(B,C);"] {
            assert!(
                matches!(Tree::from_newick(input), Err(TreeError::Syntax { .. })),
                "{}",
                input
            );
        }
    }

    #[test]
    fn test_parser_leaf_counts() {
        let tree = Tree::from_newick("((A,B),(C,(D,E)));").unwrap();
        let root = tree.get_root().unwrap();
        assert_eq!(tree.get_node(root).unwrap().leaf_count, 5);
        assert_eq!(tree.get_node(1).unwrap().leaf_count, 2);
        assert_eq!(tree.get_node(2).unwrap().leaf_count, 1);
    }

    #[test]
    fn test_parser_error() {
        // Missing semicolon
        let res = Tree::from_newick("(A,B)C");
        match res {
            Err(TreeError::Syntax { line, column, .. }) => {
                assert_eq!(line, 1);
                assert_eq!(column, 7);
            }
            _ => panic!("Expected a syntax error, got {:?}", res),
        }

        // Invalid length
        let res = Tree::from_newick("(A,B:invalid)C;");
        match res {
            Err(TreeError::Syntax { message, .. }) => {
                assert!(message.contains("length"));
            }
            _ => panic!("Expected a syntax error, got {:?}", res),
        }

        // Empty input
        assert!(matches!(
            Tree::from_newick("   "),
            Err(TreeError::Structure(_))
        ));
    }
}
