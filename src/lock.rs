use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

// Process-wide lock serializing every structural mutation of every tree and
// every handle rebuild. Reentrant: `replace_children` nests `remove_child`
// and `add_child`, and an expired listener removes itself from its node while
// a dispatch is still on the stack.
static STRUCTURE: ReentrantMutex<()> = ReentrantMutex::new(());

pub(crate) type StructureGuard = ReentrantMutexGuard<'static, ()>;

#[inline]
pub(crate) fn structure() -> StructureGuard {
    STRUCTURE.lock()
}
