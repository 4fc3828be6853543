//! Concrete heap object payloads
//!
//! Each type here is the `T` in some `GcBox<T>` (see `heap::mod`). None
//! of them are constructed directly — `Heap::alloc_*` methods box them
//! and thread the header, so every live instance is already on the
//! intrusive list by the time a `GcRef<T>` exists.

use std::cell::Cell;

use crate::chunk::Chunk;
use crate::error::RuntimeError;
use crate::heap::{GcRef, Heap, Trace};
use crate::table::Table;
use crate::value::Value;

/// An interned string. Equality between two `ObjString`s that matter to
/// the language is always pointer equality on `GcRef<ObjString>`
/// (spec.md §4.3) — `chars`/`hash` exist to support interning itself
/// and to hand text back to callers (`Display`, native functions).
pub struct ObjString {
    chars: Box<str>,
    hash: u64,
}

impl ObjString {
    pub(crate) fn new(chars: Box<str>, hash: u64) -> Self {
        Self { chars, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

impl Trace for ObjString {
    fn trace(&self, _heap: &Heap) {}
}

/// FNV-1a, matching clox's `hashString` (spec.md §4.3: "string hashing
/// must be stable and content-based").
pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// A compiled function body plus its metadata. The top-level script
/// itself is a `FunctionObj` with `name = None` and `arity = 0`
/// (spec.md §4.1).
pub struct FunctionObj {
    pub name: Option<GcRef<ObjString>>,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl FunctionObj {
    pub fn display_name(&self) -> &str {
        match &self.name {
            Some(name) => name.as_str(),
            None => "script",
        }
    }
}

impl Trace for FunctionObj {
    fn trace(&self, heap: &Heap) {
        if let Some(name) = &self.name {
            heap.mark_object(name.header());
        }
        for constant in &self.chunk.constants {
            heap.mark_value(*constant);
        }
    }
}

/// Signature of a built-in function (spec.md §4.6, "standard library").
/// Natives get the VM's current argument slice and return a `Value` or
/// a `RuntimeError` — they cannot themselves allocate onto the managed
/// heap without a `Heap` handle, so `clock()` is the only one needed.
pub type NativeFn = fn(&[Value]) -> Result<Value, RuntimeError>;

pub struct NativeObj {
    pub name: GcRef<ObjString>,
    pub function: NativeFn,
}

impl Trace for NativeObj {
    fn trace(&self, heap: &Heap) {
        heap.mark_object(self.name.header());
    }
}

/// Where an upvalue's storage currently lives. Starts `Stack` (pointing
/// at a still-live frame slot) and transitions to `Closed` exactly once,
/// when the frame that owns the slot returns (spec.md §4.1, "closing
/// upvalues").
#[derive(Clone, Copy)]
pub enum UpvalueLocation {
    Stack(usize),
    Closed(Value),
}

pub struct UpvalueObj {
    pub location: Cell<UpvalueLocation>,
}

impl UpvalueObj {
    pub fn is_open(&self) -> bool {
        matches!(self.location.get(), UpvalueLocation::Stack(_))
    }

    pub fn stack_slot(&self) -> Option<usize> {
        match self.location.get() {
            UpvalueLocation::Stack(slot) => Some(slot),
            UpvalueLocation::Closed(_) => None,
        }
    }

    pub fn close(&self, value: Value) {
        self.location.set(UpvalueLocation::Closed(value));
    }
}

impl Trace for UpvalueObj {
    fn trace(&self, heap: &Heap) {
        if let UpvalueLocation::Closed(value) = self.location.get() {
            heap.mark_value(value);
        }
    }
}

/// A function value paired with the upvalues it closed over
/// (spec.md §4.1). Every callable user-defined function the VM ever
/// invokes is a `ClosureObj`, even one with zero upvalues — the
/// top-level script included.
pub struct ClosureObj {
    pub function: GcRef<FunctionObj>,
    pub upvalues: Vec<GcRef<UpvalueObj>>,
}

impl Trace for ClosureObj {
    fn trace(&self, heap: &Heap) {
        heap.mark_object(self.function.header());
        for upvalue in &self.upvalues {
            heap.mark_object(upvalue.header());
        }
    }
}

pub struct ClassObj {
    pub name: GcRef<ObjString>,
    pub methods: std::cell::RefCell<Table<GcRef<ClosureObj>>>,
}

impl Trace for ClassObj {
    fn trace(&self, heap: &Heap) {
        heap.mark_object(self.name.header());
        for (key, method) in self.methods.borrow().iter() {
            heap.mark_object(key.header());
            heap.mark_object(method.header());
        }
    }
}

pub struct InstanceObj {
    pub class: GcRef<ClassObj>,
    pub fields: std::cell::RefCell<Table<Value>>,
}

impl Trace for InstanceObj {
    fn trace(&self, heap: &Heap) {
        heap.mark_object(self.class.header());
        for (key, value) in self.fields.borrow().iter() {
            heap.mark_object(key.header());
            heap.mark_value(*value);
        }
    }
}

/// A method looked up off an instance and bound to its receiver
/// (spec.md §4.1, `this` binding at call sites like `instance.method`
/// used as a first-class value).
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: GcRef<ClosureObj>,
}

impl Trace for BoundMethodObj {
    fn trace(&self, heap: &Heap) {
        heap.mark_value(self.receiver);
        heap.mark_object(self.method.header());
    }
}
