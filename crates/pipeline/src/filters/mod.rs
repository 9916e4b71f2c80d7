//! Filter implementations for the candidate pipeline.

pub mod already_interacted;
pub mod exclude_item;

pub use already_interacted::AlreadyInteractedFilter;
pub use exclude_item::ExcludeItemFilter;
