//! Tanuki core types: access level tables, composite ids, error taxonomy and state maps.

#![forbid(unsafe_code)]

pub mod access;
pub mod error;
pub mod id;
pub mod state;

pub use access::{from_wire, to_wire, AccessDomain, AccessLevel};
pub use error::{ErrorKind, TanukiError, TanukiResult};
pub use id::{CompositeId, ID_SEPARATOR};
pub use state::{AttrMap, ResourceState};

pub mod prelude {
    pub use super::{AccessDomain, AccessLevel, AttrMap, CompositeId, ErrorKind, ResourceState, TanukiError, TanukiResult};
}
