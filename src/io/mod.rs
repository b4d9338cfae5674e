//! File-system side of the job: input discovery, codecs, and output partitions.

pub mod compression;
pub mod output;
pub mod select;
