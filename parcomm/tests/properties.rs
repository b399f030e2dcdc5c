//! Property tests for the handle and request laws.

use std::sync::Arc;

use parcomm::testing::prelude::*;
use proptest::prelude::*;

proptest! {
    #[test]
    fn releases_match_creations(dups in 0usize..6, splits in 0usize..6, undefined in 0usize..4) {
        let counting = CountingNative::new(StubNative::new());
        let world = Communicator::world(counting.shared());

        let mut held = Vec::new();
        for _ in 0..dups {
            held.push(world.duplicate().unwrap());
        }
        for color in 0..splits {
            held.push(world.split(color as i32, 0).unwrap());
        }
        for _ in 0..undefined {
            held.push(world.split(UNDEFINED, 0).unwrap());
        }
        drop(held);

        prop_assert_eq!(counting.calls(Entry::CommFree), dups + splits);
    }

    #[test]
    fn null_tokens_are_inert(copies in 1usize..8, polls in 1usize..8) {
        let counting = CountingNative::new(StubNative::new());
        let mut request = Request::null(counting.shared());

        for _ in 0..copies {
            prop_assert!(request.try_clone().unwrap().is_null());
        }
        for _ in 0..polls {
            prop_assert!(request.test().unwrap());
        }
        prop_assert_eq!(counting.total(), 0);
    }

    #[test]
    fn text_broadcast_preserves_the_payload(text in arb_text()) {
        let world = Communicator::world(StubNative::new().shared());
        let mut received = text.clone();

        world.ibcast_string(&mut received, 0).unwrap().wait().unwrap();
        prop_assert_eq!(received, text);
    }

    #[test]
    fn self_messages_round_trip(values in prop::collection::vec(any::<i32>(), 0..32), tag in 0i32..100) {
        let world = Communicator::world(StubNative::new().shared());
        let mut received = vec![0i32; values.len()];

        {
            let mut requests = vec![
                world.isend(&values, 0, tag).unwrap(),
                world.irecv(&mut received, ANY_SOURCE, tag).unwrap(),
            ];
            wait_all(&mut requests).unwrap();
        }
        prop_assert_eq!(received, values);
    }

    #[test]
    fn injected_failures_always_surface(code in 1i32..=19) {
        let chaos = ChaosNative::new(StubNative::new())
            .with_policy(FailurePolicy::always(Entry::Ibarrier, code));
        let world = Communicator::world(chaos.shared());

        let error = world.ibarrier().unwrap_err();
        prop_assert_eq!(error.code(), Some(code));
    }

    #[test]
    fn user_operators_are_freed_once_however_often_they_move(moves in 0usize..5) {
        let counting = CountingNative::new(StubNative::new());
        let native = counting.shared();

        let mut op = Op::from_fn(Arc::clone(&native), |a: f64, b: f64| a + b, true).unwrap();
        for _ in 0..moves {
            let mut moved = op.take();
            std::mem::swap(&mut op, &mut moved);
        }
        drop(op);

        prop_assert_eq!(counting.calls(Entry::OpFree), 1);
    }
}
