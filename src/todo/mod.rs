//! Local record store for todos.
//!
//! Records live in a single SQLite table keyed by id. Every operation runs in
//! its own short transaction on a blocking worker thread; the connection is
//! opened lazily and cached by the store's `StoreContext`.

mod store;
mod types;

pub use store::TodoStore;
pub use types::{Todo, TodoInput, TodoPatch};
