pub mod conversation;
pub mod segment;
pub mod view_pool;

pub use conversation::{flatten_file_tree, ConversationLog};
pub use segment::{segment, Segment, SegmentKind};
pub use view_pool::{CodeView, ViewFactory, ViewPool};
