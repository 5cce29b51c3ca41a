pub mod memory;
pub mod rest;
pub mod store;

pub use memory::MemoryStore;
pub use rest::RestDocumentStore;
pub use store::{Change, ChangeEvent, Document, DocumentStore, Precondition, WriteBatch, WriteOp};
