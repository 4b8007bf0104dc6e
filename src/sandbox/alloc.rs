//! Box id allocation.
//!
//! Box ids must be unique across every sandbox concurrently alive in this
//! process (the external helper keys its own state directory by box id), so
//! allocation is the one piece of genuinely shared mutable state in the
//! whole crate.

use parking_lot::Mutex;

static NEXT_ID: Mutex<u32> = Mutex::new(0);

/// Allocate the next box id for a worker running as shard `shard`.
///
/// Ids are scoped to the shard's decade (`(shard + 1) * 10 .. (shard + 1) *
/// 10 + 10`) and cycle within it, so two shards on the same machine never
/// collide even if both reset their counters.
pub fn next_box_id(shard: u32) -> u32 {
    let mut next = NEXT_ID.lock();
    let id = (shard + 1) * 10 + (*next % 10);
    *next = next.wrapping_add(1);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_stay_within_shard_decade() {
        for _ in 0..25 {
            let id = next_box_id(2);
            assert!((30..40).contains(&id), "id {id} escaped shard 2's decade");
        }
    }

    #[test]
    fn different_shards_never_collide() {
        let a = next_box_id(0);
        let b = next_box_id(1);
        assert_ne!(a / 10, b / 10);
    }
}
