//! Concrete shared container kinds.
//!
//! Each kind wraps the same core (segment attachment plus a typed
//! per-process view) and differs only in its element layout and read
//! accessors. All kinds implement
//! [`SharedContainer`](crate::SharedContainer), so any of them can be
//! registered and retrieved through the registry.

mod core;
mod map;
mod set;
mod vec;

pub use self::core::Payload;
pub use self::map::{SharedHashMap, SharedMap, SharedNestedHashMap};
pub use self::set::{SharedHashSet, SharedSet};
pub use self::vec::{SharedNestedVec, SharedVec};
