//! Property test generators.

use proptest::prelude::*;

/// Number of participants small enough to run as threads in a test.
pub fn arb_world_size() -> impl Strategy<Value = usize> {
    1usize..=8
}

/// A world size together with one `(color, key)` pair per participant.
pub fn arb_split_plan() -> impl Strategy<Value = Vec<(i32, i32)>> {
    arb_world_size().prop_flat_map(|size| prop::collection::vec((0i32..3, -4i32..4), size))
}

/// Cartesian dimensions whose product is at most `max_ranks`, with periodicity.
pub fn arb_cartesian(max_ranks: i32) -> impl Strategy<Value = (Vec<i32>, Vec<bool>)> {
    prop::collection::vec(1i32..=4, 1..=3)
        .prop_filter("grid must fit the job", move |dims| dims.iter().product::<i32>() <= max_ranks)
        .prop_flat_map(|dims| {
            let n = dims.len();
            (Just(dims), prop::collection::vec(any::<bool>(), n))
        })
}

/// Contributions for an all-reduce over `f64` that sum without rounding.
pub fn arb_exact_contributions() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((-1000i32..1000).prop_map(f64::from), 1..=8)
}

/// Arbitrary text payloads, including empty ones.
pub fn arb_text() -> impl Strategy<Value = String> {
    ".{0,64}"
}
