#![deny(missing_docs)]
//! Culvert API contains the resource trait and the basic types required
//! to define the api of the culvert modules.
//!
//! If you want to run the culvert backend itself, please see the
//! culvert_backend crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

mod error;
pub use error::*;

mod hashkey;
pub use hashkey::*;

mod timestamp;
pub use timestamp::*;

pub mod resource;
pub use resource::*;

pub mod diff;
pub use diff::*;

mod request;
pub use request::*;
