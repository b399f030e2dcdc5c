use parcomm::prelude::*;
use tracing::debug;

const TOKEN_TAG: i32 = 1;
const LEFTWARD: i32 = 2;
const RIGHTWARD: i32 = 3;

fn neighbors(world: &Communicator) -> Result<(i32, i32)> {
    let (rank, size) = (world.rank()?, world.size()?);
    Ok(((rank + size - 1) % size, (rank + 1) % size))
}

/// Send a token once around the ring, each participant adding its rank.
///
/// Rank 0 starts with `start` and gets the final value back; everyone else
/// returns `None`.
pub fn ring_sum(world: &Communicator, start: i64) -> Result<Option<i64>> {
    if world.size()? == 1 {
        return Ok(Some(start));
    }
    let (previous, next) = neighbors(world)?;
    let mut token = [0i64];
    if world.rank()? == 0 {
        world.isend(&[start], next, TOKEN_TAG)?.wait()?;
        world.irecv(&mut token, previous, TOKEN_TAG)?.wait()?;
        return Ok(Some(token[0]));
    }
    world.irecv(&mut token, previous, TOKEN_TAG)?.wait()?;
    let forwarded = [token[0] + i64::from(world.rank()?)];
    debug!(token = forwarded[0], next, "forwarding token");
    world.isend(&forwarded, next, TOKEN_TAG)?.wait()?;
    Ok(None)
}

/// Swap `value` with both ring neighbors at once; returns what arrived
/// from the left and from the right.
pub fn exchange_with_neighbors(world: &Communicator, value: i32) -> Result<(i32, i32)> {
    let (left, right) = neighbors(world)?;
    let outgoing = [value];
    let (mut from_left, mut from_right) = ([0], [0]);
    let mut requests = [
        world.isend(&outgoing, left, LEFTWARD)?,
        world.isend(&outgoing, right, RIGHTWARD)?,
        world.irecv(&mut from_left, left, RIGHTWARD)?,
        world.irecv(&mut from_right, right, LEFTWARD)?,
    ];
    wait_all(&mut requests)?;
    drop(requests);
    Ok((from_left[0], from_right[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcomm_local::LocalUniverse;

    fn on_each<R: Send>(size: usize, body: impl Fn(&Communicator) -> Result<R> + Sync) -> Vec<R> {
        LocalUniverse::with_size(size)
            .unwrap()
            .run(|native| {
                let env = Environment::new(native)?;
                body(&env.world())
            })
            .into_iter()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn token_collects_every_rank() {
        let results = on_each(5, |world| ring_sum(world, 100));
        assert_eq!(results, [Some(110), None, None, None, None]);
    }

    #[test]
    fn lone_participant_keeps_its_token() {
        assert_eq!(on_each(1, |world| ring_sum(world, 7)), [Some(7)]);
    }

    #[test]
    fn neighbors_swap_values() {
        let swapped = on_each(3, |world| exchange_with_neighbors(world, world.rank()? * 10));
        assert_eq!(swapped, [(20, 10), (0, 20), (10, 0)]);
    }
}
