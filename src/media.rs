pub(crate) mod aria2;
pub(crate) mod probe;

pub(crate) use aria2::Aria2;
pub(crate) use probe::{MediaDuration, MediaProbe};
