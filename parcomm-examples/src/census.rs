use std::sync::Arc;

use parcomm::prelude::*;
use tracing::info;

/// How a participant sees its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeView {
    /// Participants sharing this node.
    pub node_size: i32,
    /// Rank within the node.
    pub node_rank: i32,
    /// Number of nodes, known to each node's first participant only.
    pub nodes: Option<i32>,
}

/// Count the participants by summing a one from each of them.
pub fn count_participants(env: &Environment) -> Result<f64> {
    let mut total = [0.0];
    env.world()
        .iallreduce(&[1.0], &mut total, &Op::sum(Arc::clone(env.native())))?
        .wait()?;
    Ok(total[0])
}

/// Group participants by node, then count nodes among the node leaders.
pub fn survey_nodes(env: &Environment) -> Result<NodeView> {
    let world = env.world();
    let node = world.split_by_locality(SplitType::Shared, world.rank()?)?;
    let node_rank = node.rank()?;

    let color = if node_rank == 0 { 0 } else { UNDEFINED };
    let leaders = world.split(color, world.rank()?)?;
    let nodes = if leaders.is_null() {
        None
    } else {
        let mut count = [0];
        leaders
            .iallreduce(&[1], &mut count, &Op::sum(Arc::clone(env.native())))?
            .wait()?;
        Some(count[0])
    };

    Ok(NodeView {
        node_size: node.size()?,
        node_rank,
        nodes,
    })
}

/// Labels contributed by `rank`: one more than the rank, numbered
/// `rank * 100 + i`.
pub fn labels_of(rank: i32) -> Vec<u32> {
    (0..=rank as u32).map(|i| rank as u32 * 100 + i).collect()
}

/// Assemble every participant's labels at `root`, in rank order.
///
/// Each participant finds its offset with an exclusive prefix sum, the root
/// gathers counts and offsets, and the labels arrive with one variable-count
/// gather. Non-roots return `None`.
pub fn collect_labels(env: &Environment, root: i32) -> Result<Option<Vec<u32>>> {
    let world = env.world();
    let (rank, size) = (world.rank()?, world.size()?);
    let mine = labels_of(rank);
    let count = mine.len() as i32;

    let mut offset = 0;
    world.exscan(&count, &mut offset, &Op::sum(Arc::clone(env.native())))?;

    let at_root = rank == root;
    let slots = if at_root { size as usize } else { 0 };
    let (mut counts, mut offsets) = (vec![0; slots], vec![0; slots]);
    let mut requests = [world.igather(&count, &mut counts, root)?, world.igather(&offset, &mut offsets, root)?];
    wait_all(&mut requests)?;
    drop(requests);

    let total: i32 = counts.iter().sum();
    let mut labels = vec![0; total as usize];
    world.igatherv(&mine, &mut labels, &counts, &offsets, root)?.wait()?;
    if at_root {
        info!(participants = size, labels = total, "collected labels");
    }
    Ok(at_root.then_some(labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_grow_with_rank() {
        assert_eq!(labels_of(0), [0]);
        assert_eq!(labels_of(2), [200, 201, 202]);
    }
}
