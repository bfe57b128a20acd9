//! Serialization and splicing round-trips on sampled ARGs.

use rand::rngs::StdRng;
use rand::SeedableRng;

use argweaver::io::{read_smc, write_smc};
use argweaver::model::TimeGrid;
use argweaver::sample::sample_initial_arg;
use argweaver::{ArgModel, Sites};

fn setup() -> (ArgModel, Sites) {
    let grid = TimeGrid::from_points(&[0.0, 200.0, 1000.0, 5000.0, 20_000.0]).unwrap();
    let model = ArgModel::new(grid, 1e4, 2e-8, 2e-8).unwrap();
    let sites = Sites::parse(
        "NAMES\ta\tb\tc\td\nREGION\tchr1\t1\t80\n6\tACAA\n29\tGTGG\n61\tTTCT\n".as_bytes(),
    )
    .unwrap();
    (model, sites)
}

/// Serialize a sampled ARG to SMC text and parse it back: the block
/// structure, trees, and SPRs survive unchanged.
#[test]
fn test_smc_roundtrip_of_sampled_arg() {
    let (model, sites) = setup();
    let mut rng = StdRng::seed_from_u64(21);
    let trees = sample_initial_arg(&model, &sites, &mut rng).unwrap();
    trees.assert_valid().unwrap();

    let names = sites.names.clone();
    let mut buf = Vec::new();
    write_smc(&mut buf, &trees, &model.grid, &sites.chrom, &names).unwrap();

    let parsed = read_smc(buf.as_slice(), &model.grid).unwrap();
    parsed.trees.assert_valid().unwrap();
    assert_eq!(parsed.names, names);
    assert_eq!(parsed.trees.start_coord(), trees.start_coord());
    assert_eq!(parsed.trees.end_coord(), trees.end_coord());
    assert_eq!(parsed.trees.nblocks(), trees.nblocks());
    for (a, b) in parsed.trees.blocks().iter().zip(trees.blocks()) {
        assert_eq!(a.blocklen, b.blocklen);
        assert_eq!(a.spr, b.spr);
        assert_eq!(a.tree, b.tree);
    }

    // writing the parsed structure again reproduces the text exactly
    let mut buf2 = Vec::new();
    write_smc(&mut buf2, &parsed.trees, &model.grid, &parsed.chrom, &names).unwrap();
    assert_eq!(buf, buf2);
}

/// Split a sampled ARG inside a block, re-concatenate with nothing removed,
/// and merge null edges: the original sequence comes back.
#[test]
fn test_partition_append_identity() {
    let (model, sites) = setup();
    let mut rng = StdRng::seed_from_u64(22);
    let original = sample_initial_arg(&model, &sites, &mut rng).unwrap();

    for cut in [1, 13, 40, 79] {
        let mut trees = original.clone();
        let (mut right, severed) = trees.partition(cut).unwrap();
        trees.assert_valid().unwrap();
        right.assert_valid().unwrap();
        assert_eq!(trees.end_coord(), cut);
        assert_eq!(right.start_coord(), cut);

        // a cut landing on a recombination boundary hands its edge back
        match severed {
            Some((spr, mapping)) => {
                right.blocks_mut()[0].spr = Some(spr);
                right.blocks_mut()[0].mapping = Some(mapping);
                trees.splice_end(right).unwrap();
            }
            None => trees.append(right).unwrap(),
        }
        trees.remove_null_sprs();
        trees.assert_valid().unwrap();

        assert_eq!(trees.nblocks(), original.nblocks());
        for (a, b) in trees.blocks().iter().zip(original.blocks()) {
            assert_eq!(a.blocklen, b.blocklen);
            assert_eq!(a.spr, b.spr);
            assert_eq!(a.tree, b.tree);
        }
    }
}

/// Two stacked partitions (a window) splice back to the original as well.
#[test]
fn test_window_partition_append_identity() {
    let (model, sites) = setup();
    let mut rng = StdRng::seed_from_u64(23);
    let original = sample_initial_arg(&model, &sites, &mut rng).unwrap();

    let mut trees = original.clone();
    let (mut middle, edge_a) = trees.partition(20).unwrap();
    let (mut tail, edge_b) = middle.partition(55).unwrap();
    assert_eq!(middle.length(), 35);

    match edge_a {
        Some((spr, mapping)) => {
            middle.blocks_mut()[0].spr = Some(spr);
            middle.blocks_mut()[0].mapping = Some(mapping);
            trees.splice_end(middle).unwrap();
        }
        None => trees.append(middle).unwrap(),
    }
    match edge_b {
        Some((spr, mapping)) => {
            tail.blocks_mut()[0].spr = Some(spr);
            tail.blocks_mut()[0].mapping = Some(mapping);
            trees.splice_end(tail).unwrap();
        }
        None => trees.append(tail).unwrap(),
    }
    trees.remove_null_sprs();
    trees.assert_valid().unwrap();

    assert_eq!(trees.length(), original.length());
    assert_eq!(trees.nblocks(), original.nblocks());
    for (a, b) in trees.blocks().iter().zip(original.blocks()) {
        assert_eq!(a.tree, b.tree);
        assert_eq!(a.spr, b.spr);
    }
}
