//! External encoder process management

mod output;
mod supervisor;

pub use output::{
    classify_line, ClassifiedOutput, LineClass, OutputClassifier, OutputLevel, MAX_BATCH_LINES,
    MIN_BATCH_LINES,
};
pub use supervisor::{EncoderProcess, ProcessSupervisor, StopOutcome, StopTimeouts};
