//! Collective operations over a work group: the hierarchical sum engine,
//! barrier, and master broadcast.

mod barrier;
mod broadcast;
mod sum;

pub use sum::sum_group;

pub(crate) use barrier::try_barrier;
pub(crate) use broadcast::try_broadcast;
pub(crate) use sum::try_sum;
