//! Array type catalog
//!
//! Fixed mapping from the array-type identifiers accepted in binding files
//! (`dense_f64`, `sparse_i32`, ...) to the C++ scalar types, NumPy type
//! character codes and human-readable dtype names used by the generated code.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Whether an array argument is a dense NumPy array or a SciPy sparse matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Storage {
    Dense,
    Sparse,
}

impl Storage {
    pub fn prefix(self) -> &'static str {
        match self {
            Storage::Dense => "dense",
            Storage::Sparse => "sparse",
        }
    }
}

/// Element type of an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementKind {
    F32,
    F64,
    F128,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    C64,
    C128,
    C256,
}

impl ElementKind {
    pub const ALL: [ElementKind; 14] = [
        ElementKind::F32,
        ElementKind::F64,
        ElementKind::F128,
        ElementKind::I8,
        ElementKind::I16,
        ElementKind::I32,
        ElementKind::I64,
        ElementKind::U8,
        ElementKind::U16,
        ElementKind::U32,
        ElementKind::U64,
        ElementKind::C64,
        ElementKind::C128,
        ElementKind::C256,
    ];

    /// C++ scalar type stored in the array
    pub fn cpp_type(self) -> &'static str {
        match self {
            ElementKind::F32 => "float",
            ElementKind::F64 => "double",
            ElementKind::F128 => "__float128",
            ElementKind::I8 => "std::int8_t",
            ElementKind::I16 => "std::int16_t",
            ElementKind::I32 => "std::int32_t",
            ElementKind::I64 => "std::int64_t",
            ElementKind::U8 => "std::uint8_t",
            ElementKind::U16 => "std::uint16_t",
            ElementKind::U32 => "std::uint32_t",
            ElementKind::U64 => "std::uint64_t",
            ElementKind::C64 => "std::complex<float>",
            ElementKind::C128 => "std::complex<double>",
            ElementKind::C256 => "std::complex<__float128>",
        }
    }

    /// Short code, also the suffix of the type identifier
    pub fn code(self) -> &'static str {
        match self {
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
            ElementKind::F128 => "f128",
            ElementKind::I8 => "i8",
            ElementKind::I16 => "i16",
            ElementKind::I32 => "i32",
            ElementKind::I64 => "i64",
            ElementKind::U8 => "u8",
            ElementKind::U16 => "u16",
            ElementKind::U32 => "u32",
            ElementKind::U64 => "u64",
            ElementKind::C64 => "c64",
            ElementKind::C128 => "c128",
            ElementKind::C256 => "c256",
        }
    }

    /// NumPy dtype name shown in runtime error messages
    pub fn pretty_name(self) -> &'static str {
        match self {
            ElementKind::F32 => "float32",
            ElementKind::F64 => "float64",
            ElementKind::F128 => "float128",
            ElementKind::I8 => "int8",
            ElementKind::I16 => "int16",
            ElementKind::I32 => "int32",
            ElementKind::I64 => "int64",
            ElementKind::U8 => "uint8",
            ElementKind::U16 => "uint16",
            ElementKind::U32 => "uint32",
            ElementKind::U64 => "uint64",
            ElementKind::C64 => "complex64",
            ElementKind::C128 => "complex128",
            ElementKind::C256 => "complex256",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

/// An array-type identifier such as `dense_f64` or `sparse_i32`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ArrayType {
    pub storage: Storage,
    pub element: ElementKind,
}

impl ArrayType {
    pub fn new(storage: Storage, element: ElementKind) -> Self {
        Self { storage, element }
    }

    pub fn dense(element: ElementKind) -> Self {
        Self::new(Storage::Dense, element)
    }

    pub fn sparse(element: ElementKind) -> Self {
        Self::new(Storage::Sparse, element)
    }

    pub fn is_sparse(&self) -> bool {
        self.storage == Storage::Sparse
    }

    /// Returns true if `token` names a catalog type (case-insensitive)
    pub fn is_array_type(token: &str) -> bool {
        token.parse::<ArrayType>().is_ok()
    }

    /// Layouts this type may be dispatched on. Sparse matrices are only ever
    /// compressed by column or by row, so they have no unordered variant.
    pub fn layouts(&self) -> &'static [Layout] {
        match self.storage {
            Storage::Dense => &Layout::ALL,
            Storage::Sparse => &[Layout::ColMajor, Layout::RowMajor],
        }
    }
}

impl fmt::Display for ArrayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.storage.prefix(), self.element.code())
    }
}

impl FromStr for ArrayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (storage, code) = if let Some(code) = lower.strip_prefix("dense_") {
            (Storage::Dense, code)
        } else if let Some(code) = lower.strip_prefix("sparse_") {
            (Storage::Sparse, code)
        } else {
            return Err(format!("`{}` is not an array type", s));
        };

        ElementKind::from_code(code)
            .map(|element| ArrayType::new(storage, element))
            .ok_or_else(|| format!("`{}` is not an array type", s))
    }
}

/// Memory layout of an array at call time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Layout {
    ColMajor,
    RowMajor,
    NoOrder,
}

impl Layout {
    /// Dispatch order: column-major, row-major, unordered
    pub const ALL: [Layout; 3] = [Layout::ColMajor, Layout::RowMajor, Layout::NoOrder];

    /// Suffix appended to a type identifier to form a runtime type id
    pub fn suffix(self) -> &'static str {
        match self {
            Layout::ColMajor => "_cm",
            Layout::RowMajor => "_rm",
            Layout::NoOrder => "_x",
        }
    }

    /// Enumerator name of the storage order in the runtime support header
    pub fn storage_order(self) -> &'static str {
        match self {
            Layout::ColMajor => "ColMajor",
            Layout::RowMajor => "RowMajor",
            Layout::NoOrder => "NoOrder",
        }
    }

    pub fn alignment(self) -> &'static str {
        match self {
            Layout::ColMajor | Layout::RowMajor => "Aligned",
            Layout::NoOrder => "Unaligned",
        }
    }
}
