//! Record and collection controllers.
//!
//! # Responsibility
//! - Compose change tracking, planning, hooks and the store into the
//!   record/collection API callers use.
//! - Keep storage details behind the `DocumentStore` contract.

pub mod collection;
pub mod record;
pub mod report;

pub use collection::{Collection, CollectionContext};
pub use record::Record;
pub use report::{RecordOutcome, SaveReport};
