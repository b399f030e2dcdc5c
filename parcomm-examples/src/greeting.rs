use parcomm::prelude::*;

/// Broadcast `text`, which only `root` needs to know, and return what this
/// participant ended up with.
///
/// The length travels first, so non-roots need no buffer of the right size.
pub fn broadcast_greeting(world: &Communicator, root: i32, text: &str) -> Result<String> {
    let mut received = if world.rank()? == root {
        text.to_owned()
    } else {
        String::new()
    };
    world.ibcast_string(&mut received, root)?.wait()?;
    Ok(received)
}
