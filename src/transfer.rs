pub(crate) mod io;
pub(crate) mod reporter;
pub(crate) mod tracker;

pub(crate) use io::{progress_channel, CountingReader, CountingWriter};
pub(crate) use reporter::{spawn_reporter, StatusSink};
pub(crate) use tracker::TransferTracker;
