pub mod builtins;
pub mod codegen;
pub mod emitter;
pub mod object;
pub mod region;

pub use builtins::{Builtin, BuiltinEntry, BuiltinTable, STATUS_ERROR, STATUS_OK, default_table};
pub use codegen::{CompileError, CompileResult, MAX_CODE_BYTES, compile, compile_with_table};
pub use emitter::{DisplacementOverflow, Emitter};
pub use object::{List, Object, ReadError, read_all, read_str};
pub use region::{EvalError, EvalResult, Region, RegionError};
