mod bind_group;
mod bindable;
mod storage_buffer;

pub use self::bind_group::*;
pub use self::bindable::*;
pub use self::storage_buffer::*;

/// Rounds buffer's size up, so that it satisfies binding alignment and
/// empty buffers remain bindable.
pub fn pad_size(size: usize) -> usize {
    size.max(16).next_multiple_of(16)
}
