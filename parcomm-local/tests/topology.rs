//! Derived communicators: duplicates, splits and Cartesian grids.

mod common;

use common::{on_each, run_in};
use parcomm::prelude::*;
use parcomm_local::{LocalUniverse, UniverseConfig};

#[test]
fn split_by_parity_forms_two_groups() {
    let shapes = on_each(4, |env| {
        let world = env.world();
        let rank = world.rank()?;
        let half = world.split(rank % 2, rank)?;
        Ok((half.size()?, half.rank()?))
    });

    assert_eq!(shapes, [(2, 0), (2, 0), (2, 1), (2, 1)]);
}

#[test]
fn split_key_reorders_members() {
    let ranks = on_each(3, |env| {
        let world = env.world();
        let reversed = world.split(0, -world.rank()?)?;
        reversed.rank()
    });

    assert_eq!(ranks, [2, 1, 0]);
}

#[test]
fn undefined_color_yields_the_null_communicator() {
    let outcomes = on_each(3, |env| {
        let world = env.world();
        let rank = world.rank()?;
        let color = if rank == 1 { UNDEFINED } else { 0 };
        let part = world.split(color, 0)?;
        Ok((part.is_null(), part.is_owned()))
    });

    assert_eq!(outcomes, [(false, true), (true, false), (false, true)]);
}

#[test]
fn locality_split_follows_node_placement() {
    let config = UniverseConfig::new(6).unwrap().with_ranks_per_node(2).unwrap();
    let universe = LocalUniverse::new(config);

    let shapes = run_in(&universe, |env| {
        let node = env.world().split_by_locality(SplitType::Shared, 0)?;
        Ok((node.size()?, node.rank()?))
    });

    assert_eq!(shapes, [(2, 0), (2, 1), (2, 0), (2, 1), (2, 0), (2, 1)]);
    assert_eq!(universe.live_handles(), 0);
}

#[test]
fn cartesian_coordinates_round_trip() {
    let checks = on_each(6, |env| {
        let world = env.world();
        let grid = world.cartesian_create(&[2, 3], &[true, false], false)?;
        let topology = grid.topology()?;
        let me = grid.rank()?;
        Ok((
            topology.dims == [2, 3] && topology.periods == [true, false],
            grid.rank_from_coordinates(&topology.coords)? == me,
            grid.coordinates_from_rank(me)? == topology.coords,
        ))
    });

    assert!(checks.iter().all(|&check| check == (true, true, true)));
}

#[test]
fn periodic_dimensions_wrap_and_others_reject() {
    let outcomes = on_each(4, |env| {
        let grid = env.world().cartesian_create(&[2, 2], &[true, false], false)?;
        let wrapped = grid.rank_from_coordinates(&[-1, 1])?;
        let rejected = grid.rank_from_coordinates(&[0, 2]).unwrap_err().code();
        Ok((wrapped, rejected))
    });

    assert!(outcomes.iter().all(|&outcome| outcome == (3, Some(codes::ERR_ARG))));
}

#[test]
fn ranks_outside_the_grid_get_the_null_communicator() {
    let inside = on_each(5, |env| {
        let grid = env.world().cartesian_create(&[2, 2], &[false, false], false)?;
        Ok(!grid.is_null())
    });

    assert_eq!(inside, [true, true, true, true, false]);
}

#[test]
fn oversized_grid_is_rejected() {
    let failures = on_each(2, |env| {
        let error = env.world().cartesian_create(&[3], &[false], false).unwrap_err();
        Ok(error.code())
    });

    assert_eq!(failures, [Some(codes::ERR_TOPOLOGY); 2]);
}

#[test]
fn grids_too_large_to_count_are_rejected() {
    let failures = on_each(2, |env| {
        let error = env.world().cartesian_create(&[65536; 4], &[false; 4], false).unwrap_err();
        Ok(error.code())
    });

    assert_eq!(failures, [Some(codes::ERR_DIMS); 2]);
}

#[test]
fn plain_communicators_have_no_topology() {
    let failures = on_each(2, |env| {
        let copy = env.world().duplicate()?;
        Ok(copy.dimension_count().unwrap_err().code())
    });

    assert_eq!(failures, [Some(codes::ERR_TOPOLOGY); 2]);
}

#[test]
fn duplicates_keep_the_grid() {
    let dims = on_each(2, |env| {
        let grid = env.world().cartesian_create(&[2], &[true], false)?;
        grid.duplicate()?.topology().map(|topology| topology.dims)
    });

    assert_eq!(dims, [vec![2], vec![2]]);
}
