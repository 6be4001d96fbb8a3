//! 可断点续传的分段导入引擎。
//!
//! 调用方反复执行 [`SessionExecutor::advance`]，每次传入上一次返回的游标，
//! 直到 `finished` 为 true。游标在两次调用之间由调用方持久化（见 [`store`]）。

pub mod analysis;
pub mod batch;
pub mod config;
pub mod csv_line;
pub mod cursor;
pub mod error;
pub mod parser;
pub mod session;
pub mod store;
pub mod stream;
pub mod tuner;

pub use analysis::{FileAnalysis, SizeCategory};
pub use batch::{BatchAccumulator, Classified, InsertBatcher, classify};
pub use config::{ConfigError, CsvOptions, ImportConfig, PerformanceProfile};
pub use cursor::{FileIdentity, ImportCursor, ImportPhase};
pub use error::{
    BatchInvariantError, ExecutionError, FailureKind, FailureRecord, ImportError, ParseError, StreamError,
};
pub use parser::{ParserState, SqlParser, Statement};
pub use session::{AdvanceResult, Budget, RecordedParseError, SessionExecutor, Statistics};
pub use stream::{ByteStream, Encoding};
pub use tuner::{AutoTuner, FixedProbe, MemoryProbe, ProcProbe, TuningSample};
