//! The managed heap: allocation, string interning, and mark-sweep collection
//!
//! Grounded on `original_source/clox/src/memory.c` (`collectGarbage`'s
//! four phases: mark roots, trace references, sweep the intern table,
//! sweep the object list) and the raw-pointer intrusive-list style of
//! `examples/other_examples/30528877_Muyunaaaa-Myula__src-backend-vm-mod.rs.rs`.
//! Collection only ever runs between VM instructions or compiler
//! allocation points, at calls the owner makes explicitly — never on a
//! background thread, never reentrantly.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

use crate::heap::objects::fnv1a_hash;
use crate::heap::{
    BoundMethodObj, ClassObj, ClosureObj, FunctionObj, GcBox, GcRef, InstanceObj, NativeFn,
    NativeObj, ObjHeader, ObjKind, ObjString, Trace, UpvalueLocation, UpvalueObj,
};
use crate::table::{find_interned, Table};
use crate::value::Value;

/// Something that can mark its own GC roots. Implemented by the VM
/// (value stack, call frames, open upvalues, globals) and by the
/// compiler (the chain of in-progress `FunctionObj`s and their locals),
/// since spec.md §4.5 requires both to be collectible independently —
/// there is no single global root set the way clox's C globals provide.
pub trait GcRoots {
    fn mark_roots(&self, heap: &Heap);
}

/// Starting collection threshold, doubled (times `growth_factor`) after
/// every full collection (spec.md §4.5).
const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

pub struct Heap {
    head: Cell<Option<NonNull<ObjHeader>>>,
    bytes_allocated: Cell<usize>,
    next_gc: Cell<usize>,
    growth_factor: f64,
    strings: RefCell<Table<()>>,
    gray_stack: RefCell<Vec<NonNull<ObjHeader>>>,
    /// When set, every allocation triggers a collection (spec.md §9's
    /// `stress_gc` knob, replacing clox's `DEBUG_STRESS_GC` macro).
    pub stress_gc: bool,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Heap {
    pub fn new(stress_gc: bool) -> Self {
        Self {
            head: Cell::new(None),
            bytes_allocated: Cell::new(0),
            next_gc: Cell::new(INITIAL_GC_THRESHOLD),
            growth_factor: 2.0,
            strings: RefCell::new(Table::new()),
            gray_stack: RefCell::new(Vec::new()),
            stress_gc,
        }
    }

    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.get()
    }

    pub fn should_collect(&self) -> bool {
        self.stress_gc || self.bytes_allocated.get() > self.next_gc.get()
    }

    // ---- allocation -----------------------------------------------------

    fn push_onto_list(&self, header: NonNull<ObjHeader>) {
        unsafe {
            header.as_ref().next.set(self.head.get());
        }
        self.head.set(Some(header));
    }

    fn alloc_raw<T>(&self, kind: ObjKind, data: T) -> GcRef<T> {
        let boxed = Box::new(GcBox {
            header: ObjHeader {
                kind,
                marked: Cell::new(false),
                next: Cell::new(None),
            },
            data,
        });
        self.bytes_allocated
            .set(self.bytes_allocated.get() + std::mem::size_of::<GcBox<T>>());
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) };
        self.push_onto_list(ptr.cast());
        unsafe { GcRef::from_raw(ptr) }
    }

    /// Intern a string, returning the existing allocation if this exact
    /// content has been seen before (spec.md §4.3). This is the only
    /// allocation path that can return a handle to an *older* object
    /// instead of a freshly made one.
    pub fn intern_string(&self, text: &str) -> GcRef<ObjString> {
        let hash = fnv1a_hash(text.as_bytes());
        let strings = self.strings.borrow();
        if let Some(existing) = find_interned(&strings, &|candidate| candidate.as_str() == text, hash) {
            return existing;
        }
        drop(strings);
        let handle = self.alloc_raw(ObjKind::String, ObjString::new(text.into(), hash));
        self.strings.borrow_mut().set(handle, ());
        handle
    }

    pub fn alloc_function(&self, function: FunctionObj) -> GcRef<FunctionObj> {
        self.alloc_raw(ObjKind::Function, function)
    }

    pub fn alloc_native(&self, name: GcRef<ObjString>, function: NativeFn) -> GcRef<NativeObj> {
        self.alloc_raw(ObjKind::Native, NativeObj { name, function })
    }

    pub fn alloc_upvalue(&self, location: UpvalueLocation) -> GcRef<UpvalueObj> {
        self.alloc_raw(
            ObjKind::Upvalue,
            UpvalueObj {
                location: Cell::new(location),
            },
        )
    }

    pub fn alloc_closure(
        &self,
        function: GcRef<FunctionObj>,
        upvalues: Vec<GcRef<UpvalueObj>>,
    ) -> GcRef<ClosureObj> {
        self.alloc_raw(ObjKind::Closure, ClosureObj { function, upvalues })
    }

    pub fn alloc_class(&self, name: GcRef<ObjString>) -> GcRef<ClassObj> {
        self.alloc_raw(
            ObjKind::Class,
            ClassObj {
                name,
                methods: RefCell::new(Table::new()),
            },
        )
    }

    pub fn alloc_instance(&self, class: GcRef<ClassObj>) -> GcRef<InstanceObj> {
        self.alloc_raw(
            ObjKind::Instance,
            InstanceObj {
                class,
                fields: RefCell::new(Table::new()),
            },
        )
    }

    pub fn alloc_bound_method(
        &self,
        receiver: Value,
        method: GcRef<ClosureObj>,
    ) -> GcRef<BoundMethodObj> {
        self.alloc_raw(ObjKind::BoundMethod, BoundMethodObj { receiver, method })
    }

    // ---- marking ----------------------------------------------------

    pub fn mark_value(&self, value: Value) {
        let header = match value {
            Value::Nil | Value::Bool(_) | Value::Number(_) => return,
            Value::String(r) => r.header(),
            Value::Function(r) => r.header(),
            Value::Native(r) => r.header(),
            Value::Closure(r) => r.header(),
            Value::Class(r) => r.header(),
            Value::Instance(r) => r.header(),
            Value::BoundMethod(r) => r.header(),
        };
        self.mark_object(header);
    }

    /// Mark one object grey (spec.md §4.5: "objects transition white ->
    /// grey -> black"). We collapse grey/black into a single `marked`
    /// bit plus the worklist itself standing in for "currently grey" —
    /// once popped and traced, an object is black.
    pub fn mark_object(&self, header: NonNull<ObjHeader>) {
        let marked = unsafe { &header.as_ref().marked };
        if marked.get() {
            return;
        }
        marked.set(true);
        self.gray_stack.borrow_mut().push(header);
    }

    fn trace_references(&self) {
        loop {
            let next = self.gray_stack.borrow_mut().pop();
            let Some(header) = next else { break };
            self.blacken(header);
        }
    }

    /// Dispatch to the concrete payload's `Trace::trace`, recovering
    /// the type from the header's `kind` tag — the one place outside
    /// `heap::mod` that relies on `#[repr(C)]` layout.
    fn blacken(&self, header: NonNull<ObjHeader>) {
        macro_rules! trace_as {
            ($ty:ty) => {{
                let gcbox: &GcBox<$ty> = unsafe { &*header.cast::<GcBox<$ty>>().as_ptr() };
                gcbox.data.trace(self);
            }};
        }
        match unsafe { header.as_ref().kind } {
            ObjKind::String => trace_as!(ObjString),
            ObjKind::Function => trace_as!(FunctionObj),
            ObjKind::Native => trace_as!(NativeObj),
            ObjKind::Upvalue => trace_as!(UpvalueObj),
            ObjKind::Closure => trace_as!(ClosureObj),
            ObjKind::Class => trace_as!(ClassObj),
            ObjKind::Instance => trace_as!(InstanceObj),
            ObjKind::BoundMethod => trace_as!(BoundMethodObj),
        }
    }

    // ---- collection ---------------------------------------------------

    /// Run one full collection: mark roots, trace the transitive
    /// closure, sweep the intern table (which must happen before the
    /// object sweep so a dead string's entry doesn't outlive the
    /// allocation it points at), then sweep the object list
    /// (spec.md §4.5).
    pub fn collect_garbage(&self, roots: &dyn GcRoots) {
        roots.mark_roots(self);
        self.trace_references();
        self.sweep_strings();
        unsafe { self.sweep_objects() };

        self.next_gc
            .set((self.bytes_allocated.get() as f64 * self.growth_factor) as usize);
    }

    fn sweep_strings(&self) {
        let mut strings = self.strings.borrow_mut();
        let marked_keys: Vec<GcRef<ObjString>> = strings
            .iter()
            .filter(|(key, _)| unsafe { key.header().as_ref().marked.get() })
            .map(|(key, _)| key)
            .collect();
        let mut fresh = Table::new();
        for key in marked_keys {
            fresh.set(key, ());
        }
        *strings = fresh;
    }

    /// # Safety
    /// Must run only after `trace_references` has finished, and only
    /// objects unreachable from the current root set may be unmarked.
    unsafe fn sweep_objects(&self) {
        let mut previous: Option<NonNull<ObjHeader>> = None;
        let mut current = self.head.get();

        while let Some(node) = current {
            let header = node.as_ref();
            let next = header.next.get();

            if header.marked.get() {
                header.marked.set(false);
                previous = Some(node);
            } else {
                match previous {
                    Some(prev) => prev.as_ref().next.set(next),
                    None => self.head.set(next),
                }
                self.free_object(node);
            }
            current = next;
        }
    }

    unsafe fn free_object(&self, header: NonNull<ObjHeader>) {
        let kind = header.as_ref().kind;
        macro_rules! drop_as {
            ($ty:ty) => {{
                let ptr = header.cast::<GcBox<$ty>>();
                self.bytes_allocated
                    .set(self.bytes_allocated.get().saturating_sub(std::mem::size_of::<GcBox<$ty>>()));
                drop(Box::from_raw(ptr.as_ptr()));
            }};
        }
        match kind {
            ObjKind::String => drop_as!(ObjString),
            ObjKind::Function => drop_as!(FunctionObj),
            ObjKind::Native => drop_as!(NativeObj),
            ObjKind::Upvalue => drop_as!(UpvalueObj),
            ObjKind::Closure => drop_as!(ClosureObj),
            ObjKind::Class => drop_as!(ClassObj),
            ObjKind::Instance => drop_as!(InstanceObj),
            ObjKind::BoundMethod => drop_as!(BoundMethodObj),
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.head.get();
        while let Some(node) = current {
            let next = unsafe { node.as_ref().next.get() };
            unsafe { self.free_object(node) };
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoRoots;
    impl GcRoots for NoRoots {
        fn mark_roots(&self, _heap: &Heap) {}
    }

    struct OneRoot(Value);
    impl GcRoots for OneRoot {
        fn mark_roots(&self, heap: &Heap) {
            heap.mark_value(self.0);
        }
    }

    #[test]
    fn interning_the_same_content_returns_the_same_allocation() {
        let heap = Heap::new(false);
        let a = heap.intern_string("hello");
        let b = heap.intern_string("hello");
        assert_eq!(a, b);
        let c = heap.intern_string("world");
        assert_ne!(a, c);
    }

    #[test]
    fn collection_with_no_roots_frees_every_unreferenced_string() {
        let heap = Heap::new(false);
        heap.intern_string("unreferenced");
        assert!(heap.bytes_allocated() > 0);
        heap.collect_garbage(&NoRoots);
        assert_eq!(heap.bytes_allocated(), 0);
        assert!(find_interned(&heap.strings.borrow(), &|_| true, fnv1a_hash(b"unreferenced")).is_none());
    }

    #[test]
    fn a_rooted_object_survives_collection() {
        let heap = Heap::new(false);
        let kept = heap.intern_string("kept");
        heap.intern_string("discarded");
        heap.collect_garbage(&OneRoot(Value::String(kept)));
        assert_eq!(heap.intern_string("kept"), kept);
        assert!(find_interned(&heap.strings.borrow(), &|_| true, fnv1a_hash(b"discarded")).is_none());
    }

    #[test]
    fn should_collect_honors_stress_gc_regardless_of_threshold() {
        let heap = Heap::new(true);
        assert!(heap.should_collect());
    }

    #[test]
    fn growth_factor_scales_the_next_threshold_off_survivors() {
        let heap = Heap::new(false).with_growth_factor(4.0);
        let kept = heap.intern_string("x");
        heap.collect_garbage(&OneRoot(Value::String(kept)));
        let survivors_bytes = heap.bytes_allocated();
        assert!(survivors_bytes > 0);
        assert_eq!(heap.next_gc.get(), (survivors_bytes as f64 * 4.0) as usize);
    }
}
