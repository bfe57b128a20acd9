//! # SMC Serialization
//!
//! The text format for a sampled ARG: header lines (`NAMES`, `REGION`), then
//! per-block `TREE <start> <end> <newick>` and `SPR <pos> <rnode> <rtime>
//! <cnode> <ctime>` records. Leaf labels in the newick are sequence names;
//! internal nodes carry their numeric id; branch lengths are in generations.
//! SPR node ids refer to the tree immediately preceding the record.
//!
//! Node ids are stable across blocks (the recoal node reuses the broken
//! node's id), so the mapping of a parsed edge is the identity minus the
//! broken node.

use std::io::{BufRead, Write};

use crate::arg::spr::Spr;
use crate::arg::tree::{LocalNode, LocalTree};
use crate::arg::trees::{Block, LocalTrees, NodeMapping};
use crate::error::{ArgError, Result};
use crate::model::time::TimeGrid;

/// A parsed SMC file
pub struct SmcArg {
    pub chrom: String,
    pub names: Vec<String>,
    pub trees: LocalTrees,
}

/// Serializes `trees` with the given sequence names.
pub fn write_smc(
    mut out: impl Write,
    trees: &LocalTrees,
    grid: &TimeGrid,
    chrom: &str,
    names: &[String],
) -> Result<()> {
    // NAMES follow the exported leaf-slot order (slot = external id)
    write!(out, "NAMES")?;
    for name in names.iter().take(trees.nleaves()) {
        write!(out, "\t{name}")?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "REGION\t{}\t{}\t{}",
        chrom,
        trees.start_coord() + 1,
        trees.end_coord()
    )?;

    let exported = trees.export_blocks();
    let seq_names: Vec<&str> = {
        // leaf slot s holds the sequence with external id s
        let mut v = vec![""; trees.nleaves()];
        for id in trees.seqids() {
            v[*id] = names[*id].as_str();
        }
        v
    };

    let mut bstart = trees.start_coord();
    for block in &exported {
        let bend = bstart + block.blocklen;
        if let Some(spr) = &block.spr {
            writeln!(
                out,
                "SPR\t{}\t{}\t{}\t{}\t{}",
                bstart, spr.recomb_node, spr.recomb_time, spr.coal_node, spr.coal_time
            )?;
        }
        let tree = LocalTree::from_parents(&block.parents, &block.ages)
            .map_err(|_| ArgError::invariant("unexportable block tree"))?;
        let newick = write_newick(&tree, grid, &seq_names);
        writeln!(out, "TREE\t{}\t{}\t{}", bstart + 1, bend, newick)?;
        bstart = bend;
    }
    Ok(())
}

fn write_newick(tree: &LocalTree, grid: &TimeGrid, names: &[&str]) -> String {
    fn recurse(tree: &LocalTree, grid: &TimeGrid, names: &[&str], node: usize) -> String {
        let branch = match tree.node(node).parent {
            Some(p) => format!(
                ":{}",
                grid.time(tree.node(p).age) - grid.time(tree.node(node).age)
            ),
            None => String::new(),
        };
        if tree.is_leaf(node) {
            format!("{}{}", names[node], branch)
        } else {
            let c = tree.node(node).children;
            format!(
                "({},{}){}{}",
                recurse(tree, grid, names, c[0].unwrap()),
                recurse(tree, grid, names, c[1].unwrap()),
                node,
                branch
            )
        }
    }
    format!("{};", recurse(tree, grid, names, tree.root()))
}

/// Parses an SMC file back into a `LocalTrees`.
pub fn read_smc(reader: impl BufRead, grid: &TimeGrid) -> Result<SmcArg> {
    let mut names: Option<Vec<String>> = None;
    let mut region: Option<(String, usize, usize)> = None;
    let mut blocks: Vec<Block> = Vec::new();
    let mut pending_spr: Option<Spr> = None;

    for (lineno, line) in reader.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match fields[0] {
            "NAMES" => names = Some(fields[1..].iter().map(|s| s.to_string()).collect()),
            "REGION" => {
                if fields.len() < 4 {
                    return Err(ArgError::format(lineno, "short REGION line"));
                }
                let start: usize = fields[2]
                    .parse()
                    .map_err(|_| ArgError::format(lineno, "bad REGION start"))?;
                let end: usize = fields[3]
                    .parse()
                    .map_err(|_| ArgError::format(lineno, "bad REGION end"))?;
                if start < 1 || end < start {
                    return Err(ArgError::format(lineno, "bad REGION bounds"));
                }
                region = Some((fields[1].to_string(), start - 1, end));
            }
            "SPR" => {
                if fields.len() < 6 {
                    return Err(ArgError::format(lineno, "short SPR line"));
                }
                let nums: Vec<usize> = fields[2..6]
                    .iter()
                    .map(|f| f.parse().map_err(|_| ArgError::format(lineno, "bad SPR field")))
                    .collect::<Result<_>>()?;
                pending_spr = Some(Spr::new(nums[0], nums[1], nums[2], nums[3]));
            }
            "TREE" => {
                if fields.len() < 4 {
                    return Err(ArgError::format(lineno, "short TREE line"));
                }
                let names = names
                    .as_ref()
                    .ok_or_else(|| ArgError::format(lineno, "TREE before NAMES"))?;
                let s: usize = fields[1]
                    .parse()
                    .map_err(|_| ArgError::format(lineno, "bad TREE start"))?;
                let e: usize = fields[2]
                    .parse()
                    .map_err(|_| ArgError::format(lineno, "bad TREE end"))?;
                if s < 1 || e < s {
                    return Err(ArgError::format(lineno, "bad TREE bounds"));
                }
                let tree = parse_newick(fields[3], names, grid)
                    .map_err(|m| ArgError::format(lineno, m))?;

                let spr = pending_spr.take();
                let mapping: Option<NodeMapping> = match (&spr, blocks.last()) {
                    (Some(spr), Some(prev)) => {
                        let broken = prev.tree.node(spr.recomb_node).parent.ok_or_else(|| {
                            ArgError::format(lineno, "SPR recombination on the root branch")
                        })?;
                        Some(
                            (0..prev.tree.nnodes())
                                .map(|i| if i == broken { None } else { Some(i) })
                                .collect(),
                        )
                    }
                    (None, Some(prev)) => Some((0..prev.tree.nnodes()).map(Some).collect()),
                    _ => None,
                };
                blocks.push(Block {
                    tree,
                    spr,
                    mapping,
                    blocklen: e - (s - 1),
                });
            }
            other => {
                return Err(ArgError::format(lineno, format!("unknown record '{other}'")));
            }
        }
    }

    let names = names.ok_or_else(|| ArgError::format(0, "missing NAMES"))?;
    let (chrom, start, end) = region.ok_or_else(|| ArgError::format(0, "missing REGION"))?;

    let mut trees = LocalTrees::new(start, end);
    *trees.seqids_mut() = (0..names.len()).collect();
    *trees.blocks_mut() = blocks;
    trees.assert_valid()?;
    Ok(SmcArg {
        chrom,
        names,
        trees,
    })
}

/// Recursive-descent newick parser producing a tree in export-id layout:
/// leaves by NAMES order, internal ids from their labels.
fn parse_newick(
    text: &str,
    names: &[String],
    grid: &TimeGrid,
) -> std::result::Result<LocalTree, String> {
    let text = text.trim().trim_end_matches(';');
    let nleaves = names.len();
    let nnodes = 2 * nleaves - 1;
    let mut nodes = vec![LocalNode::leaf(0); nnodes];
    let mut heights = vec![0.0f64; nnodes];

    // returns (node id, subtree height)
    fn parse_clade(
        chars: &mut std::iter::Peekable<std::str::Chars>,
        names: &[String],
        nodes: &mut [LocalNode],
        heights: &mut [f64],
    ) -> std::result::Result<usize, String> {
        if chars.peek() == Some(&'(') {
            chars.next();
            let left = parse_clade(chars, names, nodes, heights)?;
            let (lb, _) = parse_branch(chars)?;
            if chars.next() != Some(',') {
                return Err("expected ','".into());
            }
            let right = parse_clade(chars, names, nodes, heights)?;
            let (rb, _) = parse_branch(chars)?;
            if chars.next() != Some(')') {
                return Err("expected ')'".into());
            }
            // internal label
            let mut label = String::new();
            while let Some(&c) = chars.peek() {
                if c == ':' || c == ',' || c == ')' {
                    break;
                }
                label.push(c);
                chars.next();
            }
            let id: usize = label.parse().map_err(|_| "bad internal node label")?;
            if id >= nodes.len() {
                return Err("internal node label out of range".into());
            }
            nodes[id].children = [Some(left), Some(right)];
            nodes[left].parent = Some(id);
            nodes[right].parent = Some(id);
            let h = heights[left] + lb.ok_or("missing branch length")?;
            let h2 = heights[right] + rb.ok_or("missing branch length")?;
            heights[id] = 0.5 * (h + h2);
            Ok(id)
        } else {
            let mut label = String::new();
            while let Some(&c) = chars.peek() {
                if c == ':' || c == ',' || c == ')' {
                    break;
                }
                label.push(c);
                chars.next();
            }
            let id = names
                .iter()
                .position(|n| *n == label)
                .ok_or_else(|| format!("unknown leaf '{label}'"))?;
            heights[id] = 0.0;
            Ok(id)
        }
    }

    // reads an optional ":<len>" suffix
    fn parse_branch(
        chars: &mut std::iter::Peekable<std::str::Chars>,
    ) -> std::result::Result<(Option<f64>, ()), String> {
        if chars.peek() != Some(&':') {
            return Ok((None, ()));
        }
        chars.next();
        let mut num = String::new();
        while let Some(&c) = chars.peek() {
            if c == ',' || c == ')' || c == ';' {
                break;
            }
            num.push(c);
            chars.next();
        }
        let len: f64 = num.trim().parse().map_err(|_| "bad branch length")?;
        Ok((Some(len), ()))
    }

    let mut chars = text.chars().peekable();
    let root = parse_clade(&mut chars, names, &mut nodes, &mut heights)?;
    let _ = parse_branch(&mut chars);
    nodes[root].parent = None;

    for i in 0..nnodes {
        nodes[i].age = grid.nearest_index(heights[i]);
    }
    LocalTree::new(nodes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TimeGrid {
        TimeGrid::from_points(&[0.0, 200.0, 1000.0, 5000.0]).unwrap()
    }

    fn two_block_trees() -> LocalTrees {
        let t1 = LocalTree::from_parents(
            &[Some(3), Some(3), Some(4), Some(4), None],
            &[0, 0, 0, 1, 2],
        )
        .unwrap();
        let spr = Spr::new(0, 0, 2, 1);
        let mut t2 = t1.clone();
        t2.apply_spr(&spr).unwrap();
        let broken = t1.node(0).parent.unwrap();
        let mapping: NodeMapping = (0..t1.nnodes())
            .map(|i| if i == broken { None } else { Some(i) })
            .collect();
        let mut trees = LocalTrees::from_tree(0, 100, t1);
        trees.blocks_mut()[0].blocklen = 40;
        trees.blocks_mut().push(Block {
            tree: t2,
            spr: Some(spr),
            mapping: Some(mapping),
            blocklen: 60,
        });
        trees
    }

    #[test]
    fn test_newick_roundtrip() {
        let grid = grid();
        let tree = LocalTree::from_parents(
            &[Some(3), Some(3), Some(4), Some(4), None],
            &[0, 0, 0, 1, 2],
        )
        .unwrap();
        let names = ["a", "b", "c"];
        let text = write_newick(&tree, &grid, &names);
        assert_eq!(text, "(c:1000,(a:200,b:200)3:800)4;");

        let owned: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let parsed = parse_newick(&text, &owned, &grid).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn test_smc_roundtrip() {
        let grid = grid();
        let trees = two_block_trees();
        let names: Vec<String> = vec!["a".into(), "b".into(), "c".into()];

        let mut buf = Vec::new();
        write_smc(&mut buf, &trees, &grid, "chr1", &names).unwrap();

        let parsed = read_smc(buf.as_slice(), &grid).unwrap();
        assert_eq!(parsed.chrom, "chr1");
        assert_eq!(parsed.names, names);
        parsed.trees.assert_valid().unwrap();
        assert_eq!(parsed.trees.nblocks(), trees.nblocks());
        assert_eq!(parsed.trees.start_coord(), 0);
        assert_eq!(parsed.trees.end_coord(), 100);
        for (a, b) in parsed.trees.blocks().iter().zip(trees.blocks()) {
            assert_eq!(a.tree, b.tree);
            assert_eq!(a.spr, b.spr);
            assert_eq!(a.blocklen, b.blocklen);
        }
    }

    #[test]
    fn test_bad_record_rejected() {
        let grid = grid();
        let text = "NAMES\ta\tb\nREGION\tchr1\t1\t10\nBOGUS\t1\n";
        assert!(matches!(
            read_smc(text.as_bytes(), &grid),
            Err(ArgError::Format { line: 3, .. })
        ));
    }
}
