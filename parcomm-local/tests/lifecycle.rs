//! Bring-up, tear-down and failure paths of the in-process substrate.

mod common;

use std::sync::Arc;

use common::on_each;
use parcomm::native::RawComm;
use parcomm::prelude::*;
use parcomm::testing::{ChaosNative, CountingNative, Entry, FailurePolicy};
use parcomm_local::LocalUniverse;

#[test]
fn nested_environments_initialize_and_finalize_once() {
    let universe = LocalUniverse::with_size(2).unwrap();
    let counts = universe.run(|native| {
        let counting = CountingNative::wrap(native);
        {
            let outer = Environment::new(counting.shared()).unwrap();
            let inner = Environment::new(counting.shared()).unwrap();
            assert_eq!(inner.world().size().unwrap(), 2);
            drop(outer);
        }
        (counting.calls(Entry::Init), counting.calls(Entry::Finalize))
    });

    assert_eq!(counts, [(1, 1); 2]);
}

#[test]
fn calls_before_init_and_after_finalize_are_rejected() {
    let universe = LocalUniverse::with_size(1).unwrap();
    let native = universe.process(0).unwrap();
    let world = Communicator::world(Arc::clone(&native));

    assert_eq!(world.size().unwrap_err().code(), Some(codes::ERR_OTHER));
    drop(Environment::new(Arc::clone(&native)).unwrap());
    let error = world.rank().unwrap_err();
    assert_eq!(error.code(), Some(codes::ERR_OTHER));
    assert_eq!(error.to_string(), "known error not in this list");
}

#[test]
fn recognized_arguments_are_consumed() {
    let universe = LocalUniverse::with_size(1).unwrap();
    let remaining = universe.run(|native| {
        let mut args = vec!["job".to_owned(), "--parcomm-verbose".to_owned(), "--fast".to_owned()];
        let _env = Environment::with_args(native, &mut args).unwrap();
        args
    });

    assert_eq!(remaining[0], ["job", "--fast"]);
}

#[test]
fn null_handles_fail_with_the_library_description() {
    let messages = on_each(1, |env| {
        let null = Communicator::null(Arc::clone(env.native()));
        let error = null.size().unwrap_err();
        Ok((error.code(), error.to_string()))
    });

    assert_eq!(messages[0], (Some(codes::ERR_COMM), "invalid communicator".to_owned()));
}

#[test]
fn predefined_communicators_cannot_be_freed() {
    let universe = LocalUniverse::with_size(1).unwrap();
    let results = universe.run(|native| {
        let _env = Environment::new(Arc::clone(&native)).unwrap();
        let mut world = RawComm::WORLD;
        native.comm_free(&mut world)
    });

    assert_eq!(results, [codes::ERR_COMM]);
}

#[test]
fn injected_commit_failure_releases_the_half_built_type() {
    let universe = LocalUniverse::with_size(2).unwrap();
    let outcomes = universe.run(|native| {
        let chaos = ChaosNative::wrap(native).with_policy(FailurePolicy::once(Entry::TypeCommit, codes::ERR_INTERN));
        let env = Environment::new(chaos.shared()).unwrap();
        let error = Datatype::contiguous(4, &Datatype::int(Arc::clone(env.native()))).unwrap_err();
        let retried = Datatype::contiguous(4, &Datatype::int(Arc::clone(env.native())));
        (error.code(), retried.map(|pair| pair.size()))
    });

    assert!(outcomes
        .iter()
        .all(|outcome| outcome == &(Some(codes::ERR_INTERN), Ok(Ok(16)))));
    assert_eq!(universe.live_handles(), 0);
}

#[test]
fn copying_a_pending_request_is_refused() {
    let refused = on_each(2, |env| {
        let world = env.world();
        let mut request = world.ibarrier()?;
        let copy = request.try_clone();
        request.wait()?;
        let copied_after = request.try_clone()?;
        Ok(copy.unwrap_err().is_misuse() && copied_after.is_null())
    });

    assert_eq!(refused, [true, true]);
}

#[test]
#[should_panic(expected = "rank zero gave up")]
fn a_panicking_participant_unblocks_its_peers() {
    let universe = LocalUniverse::with_size(3).unwrap();
    universe.run(|native| {
        let env = Environment::new(native).unwrap();
        let world = env.world();
        if world.rank().unwrap() == 0 {
            panic!("rank zero gave up");
        }
        let error = world.ibarrier().unwrap().wait().unwrap_err();
        assert_eq!(error.code(), Some(codes::ERR_INTERN));
    });
}
