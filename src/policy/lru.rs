use crate::error::PolicyError;

use super::{
    queue::{EvictionQueue, SlotId},
    Discipline,
};

/// Recency order: a hit moves the entry back to the head.
#[derive(Debug, Default)]
pub struct Lru;

impl Discipline for Lru {
    const NAME: &'static str = "lru";

    fn on_hit<M>(queue: &mut EvictionQueue<M>, id: SlotId) -> Result<(), PolicyError> {
        queue.move_to_front(id)
    }
}
