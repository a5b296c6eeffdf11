pub mod comparator;

pub use comparator::*;
