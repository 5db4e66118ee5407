//! The statistical core: emission guessing (C3), the free zero-inflated
//! HMM (C4, single-condition) and its constrained multi-replicate
//! sibling (C4, `compare`).

pub mod constrained;
pub mod emission;
pub mod hmm;
pub mod logspace;
