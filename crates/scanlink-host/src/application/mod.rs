//! Application layer: the output-sink seam and its delivery worker.

pub mod sink;
