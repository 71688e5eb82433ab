//! Virtual memory translation
//!
//! Only the address translator lives here; frame allocation and fault
//! handling belong to external collaborators.

pub mod pmap;

pub use pmap::{
    extract, lookup, PageDirectory, PageTable, PhysAddr, Pte, PteFlags, VirtAddr,
};
