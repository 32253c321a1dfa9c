//! Reference-counted typed memory blocks.
//!
//! A [`TypedArea`] owns a byte buffer tagged with an element type, element
//! size and element count. Handles are cheap to copy; the buffer is freed
//! when the last handle is dropped, and the optional release function runs
//! exactly once at that point.
//!
//! Metadata arrays ([`ArrayDouble`], [`ArrayInt`]), strings ([`RefString`]),
//! opaque [`Blob`]s and the pixels of memory images all share this type.

use crate::core::error::{PipelineError, PipelineResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Called with the buffer when the last handle goes away.
pub type ReleaseFn = Box<dyn FnOnce(&mut Vec<u8>) + Send>;

/// Element type tag of an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AreaType {
    /// Untyped bytes.
    Bytes,
    /// Band-interleaved pixels of a memory image.
    Pixels,
    /// Array of f64.
    Double,
    /// Array of i32.
    Int,
    /// UTF-8 string.
    String,
    /// Opaque binary object.
    Blob,
}

struct AreaInner {
    id: u64,
    data: Vec<u8>,
    kind: AreaType,
    n: usize,
    sizeof_type: usize,
    release: Mutex<Option<ReleaseFn>>,
    tracked: bool,
}

impl Drop for AreaInner {
    fn drop(&mut self) {
        if let Some(release) = self.release.get_mut().take() {
            release(&mut self.data);
        }
        if self.tracked {
            registry().lock().remove(&self.id);
        }
    }
}

/// A shared, typed, reference-counted buffer.
///
/// Cloning a handle increments the count; dropping one decrements it. Both
/// are safe from any thread.
#[derive(Clone)]
pub struct TypedArea {
    inner: Arc<AreaInner>,
}

impl TypedArea {
    /// Wrap `data` as `n` elements of `sizeof_type` bytes each.
    ///
    /// The handle starts with a count of 1.
    pub fn new(
        data: Vec<u8>,
        kind: AreaType,
        sizeof_type: usize,
        release: Option<ReleaseFn>,
    ) -> Self {
        let n = if sizeof_type == 0 {
            0
        } else {
            data.len() / sizeof_type
        };
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let tracked = LEAK_CHECK.load(Ordering::Relaxed);
        if tracked {
            registry().lock().insert(id, (kind, data.len()));
        }

        Self {
            inner: Arc::new(AreaInner {
                id,
                data,
                kind,
                n,
                sizeof_type,
                release: Mutex::new(release),
                tracked,
            }),
        }
    }

    /// Wrap plain bytes with no release function.
    pub fn from_vec(data: Vec<u8>, kind: AreaType) -> Self {
        Self::new(data, kind, 1, None)
    }

    /// Allocate a zeroed array of `n` elements.
    ///
    /// This is the only constructor that can fail: allocation failure is
    /// reported rather than aborting.
    pub fn new_array(kind: AreaType, sizeof_type: usize, n: usize) -> PipelineResult<Self> {
        let bytes = sizeof_type.checked_mul(n).ok_or(PipelineError::OutOfMemory {
            required: usize::MAX,
            available: 0,
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| PipelineError::OutOfMemory {
                required: bytes,
                available: 0,
            })?;
        data.resize(bytes, 0);
        Ok(Self::new(data, kind, sizeof_type, None))
    }

    /// Take another handle on the same buffer.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Number of live handles.
    pub fn count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// The buffer contents.
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// True for a zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Number of elements.
    pub fn n(&self) -> usize {
        self.inner.n
    }

    /// Element type tag.
    pub fn kind(&self) -> AreaType {
        self.inner.kind
    }

    /// Size of one element in bytes.
    pub fn sizeof_type(&self) -> usize {
        self.inner.sizeof_type
    }

    /// Buffer, element count, type tag and element size in one call.
    pub fn get_data(&self) -> (&[u8], usize, AreaType, usize) {
        (self.data(), self.n(), self.kind(), self.sizeof_type())
    }

    /// Read element `index` as `T`, if it exists and the sizes agree.
    pub fn get<T: bytemuck::Pod>(&self, index: usize) -> Option<T> {
        let size = std::mem::size_of::<T>();
        if size != self.inner.sizeof_type || index >= self.inner.n {
            return None;
        }
        let start = index * size;
        Some(bytemuck::pod_read_unaligned(&self.inner.data[start..start + size]))
    }

    /// True when both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &TypedArea) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Recover the buffer if this is the only handle.
    ///
    /// The release function is dropped without being called, since the
    /// buffer lives on.
    pub fn try_unwrap(self) -> Result<Vec<u8>, TypedArea> {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.release.get_mut().take();
                Ok(std::mem::take(&mut inner.data))
            }
            Err(inner) => Err(TypedArea { inner }),
        }
    }
}

impl std::fmt::Debug for TypedArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedArea")
            .field("kind", &self.inner.kind)
            .field("n", &self.inner.n)
            .field("sizeof_type", &self.inner.sizeof_type)
            .field("count", &self.count())
            .finish()
    }
}

// ============================================================================
// Leak tracking
// ============================================================================

static NEXT_ID: AtomicU64 = AtomicU64::new(0);
static LEAK_CHECK: AtomicBool = AtomicBool::new(false);

fn registry() -> &'static Mutex<HashMap<u64, (AreaType, usize)>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, (AreaType, usize)>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Start or stop recording live areas. Only areas created while enabled
/// are tracked.
pub fn set_leak_check(enabled: bool) {
    LEAK_CHECK.store(enabled, Ordering::Relaxed);
}

/// Whether new areas are being recorded.
pub fn leak_check_enabled() -> bool {
    LEAK_CHECK.load(Ordering::Relaxed)
}

/// Summary of tracked areas that are still alive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    /// Number of live areas.
    pub areas: usize,
    /// Total bytes held by live areas.
    pub bytes: usize,
}

impl LeakReport {
    /// True when nothing is outstanding.
    pub fn is_clean(&self) -> bool {
        self.areas == 0
    }
}

/// Snapshot the live tracked areas.
pub fn leak_report() -> LeakReport {
    let registry = registry().lock();
    LeakReport {
        areas: registry.len(),
        bytes: registry.values().map(|(_, bytes)| bytes).sum(),
    }
}

/// Log any outstanding areas and return the report.
pub fn report_leaks() -> LeakReport {
    let report = leak_report();
    if !report.is_clean() {
        log::warn!(
            "{} areas alive, {} bytes",
            report.areas,
            report.bytes
        );
    }
    report
}

// ============================================================================
// Typed wrappers
// ============================================================================

/// A shared array of doubles.
#[derive(Debug, Clone)]
pub struct ArrayDouble(TypedArea);

impl ArrayDouble {
    /// Copy `values` into a new area.
    pub fn new(values: &[f64]) -> Self {
        let data = bytemuck::cast_slice::<f64, u8>(values).to_vec();
        Self(TypedArea::new(
            data,
            AreaType::Double,
            std::mem::size_of::<f64>(),
            None,
        ))
    }

    /// The values as a vector.
    pub fn values(&self) -> Vec<f64> {
        (0..self.0.n()).filter_map(|i| self.0.get::<f64>(i)).collect()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.n()
    }

    /// True for an empty array.
    pub fn is_empty(&self) -> bool {
        self.0.n() == 0
    }

    /// The underlying area.
    pub fn area(&self) -> &TypedArea {
        &self.0
    }
}

/// A shared array of ints.
#[derive(Debug, Clone)]
pub struct ArrayInt(TypedArea);

impl ArrayInt {
    /// Copy `values` into a new area.
    pub fn new(values: &[i32]) -> Self {
        let data = bytemuck::cast_slice::<i32, u8>(values).to_vec();
        Self(TypedArea::new(
            data,
            AreaType::Int,
            std::mem::size_of::<i32>(),
            None,
        ))
    }

    /// The values as a vector.
    pub fn values(&self) -> Vec<i32> {
        (0..self.0.n()).filter_map(|i| self.0.get::<i32>(i)).collect()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.n()
    }

    /// True for an empty array.
    pub fn is_empty(&self) -> bool {
        self.0.n() == 0
    }

    /// The underlying area.
    pub fn area(&self) -> &TypedArea {
        &self.0
    }
}

/// A shared immutable string.
#[derive(Debug, Clone)]
pub struct RefString(TypedArea);

impl RefString {
    /// Copy `text` into a new area.
    pub fn new(text: &str) -> Self {
        Self(TypedArea::new(
            text.as_bytes().to_vec(),
            AreaType::String,
            1,
            None,
        ))
    }

    /// The string contents.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.0.data()).unwrap_or_default()
    }

    /// The underlying area.
    pub fn area(&self) -> &TypedArea {
        &self.0
    }
}

/// A shared binary object with an optional release function.
#[derive(Debug, Clone)]
pub struct Blob(TypedArea);

impl Blob {
    /// Wrap `data` as a blob.
    pub fn new(data: Vec<u8>, release: Option<ReleaseFn>) -> Self {
        Self(TypedArea::new(data, AreaType::Blob, 1, release))
    }

    /// The blob contents.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.data()
    }

    /// The underlying area.
    pub fn area(&self) -> &TypedArea {
        &self.0
    }
}
