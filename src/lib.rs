//! File-backed virtual memory manager for the BinOM variant storage engine.
//!
//! This crate implements only the storage core described in the project
//! specification: a paged allocator over a growable file, the node/heap/byte
//! virtual index spaces built on top of it, and the controller that
//! recovers and mutates that state. The variant value model, the
//! visitor/query language, and the per-node lock table are external
//! collaborators and are not implemented here.

pub mod common;
pub mod controller;
pub mod heap;
pub mod io;
pub mod layout;
pub mod node;

pub use common::error::FvmError;
pub use controller::FileVirtualMemoryController;
pub use layout::{NodeDescriptor, TypeClass, VarType};
