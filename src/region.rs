use std::fmt;
use std::io;

use crate::builtins::{self, STATUS_OK};
use crate::object::Object;

/// Region creation failures: `PageSize` and `Map` are OS resource errors,
/// `Protect` is a permission error.
#[derive(Debug)]
pub enum RegionError {
    EmptyCode,
    PageSize,
    Map(io::Error),
    Protect(io::Error),
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::EmptyCode => write!(f, "cannot map an empty instruction stream"),
            RegionError::PageSize => write!(f, "cannot determine page size"),
            RegionError::Map(err) => write!(f, "mmap failed: {err}"),
            RegionError::Protect(err) => write!(f, "mprotect failed: {err}"),
        }
    }
}

impl std::error::Error for RegionError {}

/// Runtime failures reported out of an invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalError {
    TypeMismatch(&'static str),
    BadNumber(String),
    StackUnderflow,
    StackInvariant(usize),
    Native(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::TypeMismatch(expected) => write!(f, "type mismatch: expected {expected}"),
            EvalError::BadNumber(text) => write!(f, "atom '{text}' is not a signed integer"),
            EvalError::StackUnderflow => write!(f, "evaluation stack underflow"),
            EvalError::StackInvariant(len) => write!(
                f,
                "evaluation stack holds {len} objects on return, expected exactly 1"
            ),
            EvalError::Native(message) => write!(f, "native code error: {message}"),
        }
    }
}

impl std::error::Error for EvalError {}

pub type EvalResult<T> = Result<T, EvalError>;

type Entry = unsafe extern "C" fn(*mut Vec<Object>, *const Region) -> i32;

/// A page-aligned read+execute mapping holding a finished instruction stream,
/// together with the immediates the stream references by index.
pub struct Region {
    ptr: *mut u8,
    map_len: usize,
    code_len: usize,
    immediates: Vec<Object>,
}

// Safety: the mapping is immutable once created (read+execute, never widened
// back to writable) and the immediates are never mutated after construction.
// Each invocation builds its own evaluation stack.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Map `code` into a fresh executable region that takes ownership of
    /// `immediates`. Permissions are flipped to read+execute once and never
    /// widened again.
    pub(crate) fn create(code: &[u8], immediates: Vec<Object>) -> Result<Self, RegionError> {
        if code.is_empty() {
            return Err(RegionError::EmptyCode);
        }
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return Err(RegionError::PageSize);
        }
        let map_len = code.len().div_ceil(page_size as usize) * page_size as usize;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RegionError::Map(io::Error::last_os_error()));
        }
        let ptr = ptr as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }
        if unsafe { libc::mprotect(ptr as *mut libc::c_void, map_len, libc::PROT_READ | libc::PROT_EXEC) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr as *mut libc::c_void, map_len);
            }
            return Err(RegionError::Protect(err));
        }

        tracing::debug!(
            "mapped {map_len} byte executable region for {} code bytes",
            code.len()
        );
        Ok(Self {
            ptr,
            map_len,
            code_len: code.len(),
            immediates,
        })
    }

    /// Run the region against a fresh evaluation stack and return the single
    /// surviving object. A nonzero status from the generated code yields the
    /// error the failing builtin parked in the bridge slot; any other stack
    /// population on return is a protocol violation. The region itself is
    /// untouched by failures and may be invoked again.
    pub fn invoke(&self) -> EvalResult<Object> {
        let mut stack: Vec<Object> = Vec::new();
        let entry = unsafe { std::mem::transmute::<*mut u8, Entry>(self.ptr) };
        builtins::clear_bridge_error();
        let status = unsafe { entry(&mut stack, self) };
        if status != STATUS_OK {
            return Err(builtins::take_bridge_error().unwrap_or_else(|| {
                EvalError::Native(format!("status {status} reported without details"))
            }));
        }
        let len = stack.len();
        match stack.pop() {
            Some(result) if stack.is_empty() => Ok(result),
            _ => Err(EvalError::StackInvariant(len)),
        }
    }

    /// The `index`-th immediate. Indexes come from the generated code, so an
    /// out-of-range value is a generator bug and panics.
    pub fn immediate(&self, index: u32) -> &Object {
        &self.immediates[index as usize]
    }

    pub(crate) fn immediate_checked(&self, index: u32) -> Option<&Object> {
        self.immediates.get(index as usize)
    }

    pub fn immediate_count(&self) -> usize {
        self.immediates.len()
    }

    /// The emitted instruction stream (without the zero padding up to the
    /// page boundary).
    pub fn code(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.code_len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.map_len);
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("code_len", &self.code_len)
            .field("map_len", &self.map_len)
            .field("immediates", &self.immediates.len())
            .finish()
    }
}
