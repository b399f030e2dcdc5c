//! The example jobs on the in-process substrate.

use parcomm::prelude::*;
use parcomm_examples::census::{collect_labels, count_participants, labels_of, survey_nodes, NodeView};
use parcomm_examples::greeting::broadcast_greeting;
use parcomm_examples::stencil::Rod;
use parcomm_local::{LocalUniverse, UniverseConfig};
use proptest::prelude::*;

fn on_each<R: Send>(universe: &LocalUniverse, body: impl Fn(&Environment) -> Result<R> + Sync) -> Vec<R> {
    let results = universe
        .run(|native| {
            let env = Environment::new(native)?;
            body(&env)
        })
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(universe.live_handles(), 0);
    results
}

fn universe(size: usize) -> LocalUniverse {
    LocalUniverse::with_size(size).unwrap()
}

#[test]
fn everyone_is_counted() {
    assert_eq!(on_each(&universe(4), count_participants), [4.0; 4]);
}

#[test]
fn greeting_reaches_every_participant() {
    let greetings = on_each(&universe(3), |env| broadcast_greeting(&env.world(), 1, "Hello world"));
    assert_eq!(greetings, ["Hello world"; 3]);
}

#[test]
fn nodes_are_surveyed_by_their_leaders() {
    let config = UniverseConfig::new(5).unwrap().with_ranks_per_node(2).unwrap();
    let views = on_each(&LocalUniverse::new(config), survey_nodes);

    let view = |node_size, node_rank, nodes| NodeView {
        node_size,
        node_rank,
        nodes,
    };
    assert_eq!(
        views,
        [
            view(2, 0, Some(3)),
            view(2, 1, None),
            view(2, 0, Some(3)),
            view(2, 1, None),
            view(1, 0, Some(3)),
        ]
    );
}

#[test]
fn labels_arrive_at_root_in_rank_order() {
    let collected = on_each(&universe(4), |env| collect_labels(env, 2));

    let expected: Vec<u32> = (0..4).flat_map(labels_of).collect();
    assert_eq!(collected[2].as_deref(), Some(expected.as_slice()));
    assert!(collected.iter().enumerate().all(|(rank, labels)| rank == 2 || labels.is_none()));
}

#[test]
fn empty_rod_segments_are_refused() {
    let refused = on_each(&universe(2), |env| Ok(Rod::new(&env.world(), Vec::new()).unwrap_err().is_misuse()));
    assert_eq!(refused, [true, true]);
}

#[test]
fn uniform_rod_stays_uniform() {
    let cells = on_each(&universe(3), |env| {
        let mut rod = Rod::new(&env.world(), vec![2.0; 3])?;
        rod.step()?;
        Ok(rod.cells().to_vec())
    });
    assert!(cells.iter().flatten().all(|&cell| (cell - 2.0).abs() < 1e-12));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn diffusion_conserves_heat(size in 1usize..=5, steps in 0usize..8, seed in 0u32..100) {
        let totals = on_each(&universe(size), |env| {
            let rank = env.world().rank()?;
            let cells = (0..3).map(|i| f64::from((seed + rank as u32 * 3 + i) % 7)).collect();
            let mut rod = Rod::new(&env.world(), cells)?;
            let before = rod.total_heat()?;
            for _ in 0..steps {
                rod.step()?;
            }
            Ok((before, rod.total_heat()?))
        });

        for (before, after) in totals {
            prop_assert!((before - after).abs() < 1e-9);
        }
    }
}
