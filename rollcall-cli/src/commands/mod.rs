pub mod plan;
pub mod slug;
pub mod sync;
