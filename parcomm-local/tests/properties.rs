//! Property tests running whole jobs on the in-process substrate.

mod common;

use std::sync::Arc;

use common::on_each;
use parcomm::testing::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn split_partitions_the_world(plan in arb_split_plan()) {
        let views = on_each(plan.len(), |env| {
            let world = env.world();
            let (color, key) = plan[world.rank()? as usize];
            let part = world.split(color, key)?;
            let mut mine = vec![0; part.size()? as usize];
            mine[part.rank()? as usize] = world.rank()?;
            part.iallreduce_in_place(&mut mine, &Op::sum(Arc::clone(env.native())))?.wait()?;
            Ok((color, mine))
        });

        for (rank, (color, members)) in views.iter().enumerate() {
            let mut expected: Vec<i32> = (0..plan.len())
                .filter(|&other| plan[other].0 == *color)
                .map(|other| other as i32)
                .collect();
            expected.sort_by_key(|&other| (plan[other as usize].1, other));
            prop_assert_eq!(members, &expected, "rank {} sees the wrong group", rank);
        }
    }

    #[test]
    fn cartesian_coordinates_invert_ranks((dims, periods) in arb_cartesian(8)) {
        let cells: i32 = dims.iter().product();
        let checks = on_each(cells as usize, |env| {
            let grid = env.world().cartesian_create(&dims, &periods, false)?;
            let me = grid.rank()?;
            let coords = grid.coordinates_from_rank(me)?;
            Ok(grid.rank_from_coordinates(&coords)? == me && grid.topology()?.coords == coords)
        });

        prop_assert!(checks.into_iter().all(|check| check));
    }

    #[test]
    fn allreduce_sums_every_contribution(contributions in arb_exact_contributions()) {
        let expected: f64 = contributions.iter().sum();
        let totals = on_each(contributions.len(), |env| {
            let world = env.world();
            let mut total = [0.0];
            let mine = [contributions[world.rank()? as usize]];
            world.iallreduce(&mine, &mut total, &Op::sum(Arc::clone(env.native())))?.wait()?;
            Ok(total[0])
        });

        prop_assert!(totals.iter().all(|&total| total == expected));
    }

    #[test]
    fn broadcast_text_arrives_intact(text in arb_text(), size in arb_world_size()) {
        let received = on_each(size, |env| {
            let world = env.world();
            let mut mine = if world.rank()? == 0 { text.clone() } else { String::new() };
            world.ibcast_string(&mut mine, 0)?.wait()?;
            Ok(mine)
        });

        prop_assert!(received.iter().all(|mine| mine == &text));
    }
}
