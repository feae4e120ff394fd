//! Identifier generation strategies.

use uuid::Uuid;

use crate::IdGenerator;

/// Random (version 4) UUIDs. Collisions are not checked for.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidV4Generator;

impl IdGenerator for UuidV4Generator {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
