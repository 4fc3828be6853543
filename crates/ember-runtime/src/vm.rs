//! Stack-based bytecode virtual machine
//!
//! Grounded on `original_source/clox/src/vm.c`'s dispatch loop and
//! `atlas-runtime/src/vm/mod.rs`'s shape for an owned, reusable `Vm`
//! aggregate (spec.md §9: explicit VM instead of file-scope globals).

use crate::chunk::Opcode;
use crate::error::{RuntimeError, RuntimeFailure, TraceFrame};
use crate::heap::{
    ClassObj, ClosureObj, FunctionObj, GcRef, GcRoots, Heap, NativeObj, ObjString,
    UpvalueLocation, UpvalueObj,
};
use crate::native;
use crate::options::Options;
use crate::table::Table;
use crate::value::Value;

/// Call depth ceiling (spec.md §4.2). Real clox also bounds its flat
/// value-stack array at `FRAMES_MAX * UINT8_COUNT`, but that figure
/// only sizes a fixed C array — with a growable `Vec<Value>` here, the
/// frame-count check alone is what actually stops unbounded recursion.
const MAX_FRAMES: usize = 64;

struct CallFrame {
    closure: GcRef<ClosureObj>,
    ip: usize,
    /// Index into the value stack of this frame's slot 0 (the
    /// receiver / first parameter), per spec.md §4.2.
    slots_base: usize,
}

/// One interpreter instance: value stack, call frames, open upvalues,
/// globals, and the heap it allocates into. Two `Vm`s never share a
/// `Heap` (spec.md §9's "multiple independent interpreters" clause) —
/// each owns one.
pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Head of the open-upvalue list, ordered by descending stack
    /// address (spec.md §3.2).
    open_upvalues: Vec<GcRef<UpvalueObj>>,
    globals: Table<Value>,
    init_string: GcRef<ObjString>,
    options: Options,
}

impl Vm {
    pub fn new(options: Options) -> Self {
        let mut heap = Heap::new(options.stress_gc);
        if let Some(factor) = options.gc_growth_factor {
            heap = heap.with_growth_factor(factor);
        }
        let init_string = heap.intern_string("init");
        let mut vm = Self {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            open_upvalues: Vec::new(),
            globals: Table::new(),
            init_string,
            options,
        };
        vm.define_native("clock", native::clock);
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    fn define_native(&mut self, name: &str, function: crate::heap::NativeFn) {
        let interned = self.heap.intern_string(name);
        let native = self.heap.alloc_native(interned, function);
        self.globals.set(interned, Value::Native(native));
    }

    /// Run a freshly compiled top-level function to completion
    /// (spec.md §4.2's `RETURN` contract: the program halts
    /// successfully when the frame stack empties).
    pub fn interpret(&mut self, function: GcRef<FunctionObj>) -> Result<(), RuntimeFailure> {
        let closure = self.heap.alloc_closure(function, Vec::new());
        self.stack.push(Value::Closure(closure));
        if let Err(e) = self.call_value(Value::Closure(closure), 0) {
            return Err(self.reset_after_error(e));
        }
        self.run().map_err(|e| self.reset_after_error(e))
    }

    /// Bridge around the one spot where the borrow checker can't see
    /// that `mark_roots` never touches `self.heap`: `Heap` lives inline
    /// as a plain field, so `self.heap.collect_garbage(self)` would
    /// need both a borrow of that field and of all of `self` at once.
    /// `Vm` is never moved during this call, so the reborrow is sound.
    fn collect_garbage(&mut self) {
        let heap: &Heap = unsafe { &*(&self.heap as *const Heap) };
        heap.collect_garbage(self);
    }

    fn reset_after_error(&mut self, error: RuntimeError) -> RuntimeFailure {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                function_name: frame.closure.function.display_name().to_string(),
                line: frame
                    .closure
                    .function
                    .chunk
                    .line_for_offset(frame.ip.saturating_sub(1)),
            })
            .collect();
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        RuntimeFailure { error, trace }
    }

    // ---- stack helpers --------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn current_line(&self) -> u32 {
        let frame = self.frames.last().expect("no active frame");
        frame.closure.function.chunk.line_for_offset(frame.ip.saturating_sub(1))
    }

    // ---- the dispatch loop ------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.frames.is_empty() {
                return Ok(());
            }

            if self.options.trace_execution {
                self.trace_instruction();
            }

            let op = self.read_opcode();
            match op {
                Opcode::Constant => {
                    let value = self.read_constant_short();
                    self.push(value);
                }
                Opcode::ConstantLong => {
                    let value = self.read_constant_long();
                    self.push(value);
                }
                Opcode::Nil => self.push(Value::Nil),
                Opcode::True => self.push(Value::Bool(true)),
                Opcode::False => self.push(Value::Bool(false)),
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots_base;
                    self.push(self.stack[base + slot]);
                }
                Opcode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots_base;
                    self.stack[base + slot] = self.peek(0);
                }
                Opcode::GetGlobal => {
                    let name = self.read_string_short();
                    match self.globals.get(name) {
                        Some(value) => {
                            let value = *value;
                            self.push(value);
                        }
                        None => {
                            return Err(RuntimeError::UndefinedGlobal {
                                name: name.as_str().to_string(),
                                line: self.current_line(),
                            })
                        }
                    }
                }
                Opcode::DefineGlobal => {
                    let name = self.read_string_short();
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                Opcode::SetGlobal => {
                    let name = self.read_string_short();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        return Err(RuntimeError::UndefinedGlobal {
                            name: name.as_str().to_string(),
                            line: self.current_line(),
                        });
                    }
                }
                Opcode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.frames.last().unwrap().closure.upvalues[slot];
                    let value = self.read_upvalue(upvalue);
                    self.push(value);
                }
                Opcode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.frames.last().unwrap().closure.upvalues[slot];
                    let value = self.peek(0);
                    self.write_upvalue(upvalue, value);
                }
                Opcode::GetProperty => self.get_property()?,
                Opcode::SetProperty => self.set_property()?,
                Opcode::GetSuper => self.get_super()?,
                Opcode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(values_equal(a, b)));
                }
                Opcode::Greater => self.numeric_compare(|a, b| a > b)?,
                Opcode::Less => self.numeric_compare(|a, b| a < b)?,
                Opcode::Add => self.add()?,
                Opcode::Subtract => self.numeric_binary(|a, b| a - b)?,
                Opcode::Multiply => self.numeric_binary(|a, b| a * b)?,
                Opcode::Divide => self.numeric_binary(|a, b| a / b)?,
                Opcode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(!value.is_truthy()));
                }
                Opcode::Negate => {
                    let value = self.peek(0);
                    match value.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => {
                            return Err(RuntimeError::NotANumber {
                                line: self.current_line(),
                            })
                        }
                    }
                }
                Opcode::Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                Opcode::Jump => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                Opcode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if !self.peek(0).is_truthy() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                Opcode::Loop => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                Opcode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count);
                    self.call_value(callee, arg_count)?;
                }
                Opcode::Invoke => {
                    let method = self.read_string_short();
                    let arg_count = self.read_byte() as usize;
                    self.invoke(method, arg_count)?;
                }
                Opcode::SuperInvoke => {
                    let method = self.read_string_short();
                    let arg_count = self.read_byte() as usize;
                    let superclass = self.pop();
                    let Value::Class(superclass) = superclass else {
                        unreachable!("compiler always pushes a class before SUPER_INVOKE");
                    };
                    self.invoke_from_class(superclass, method, arg_count)?;
                }
                Opcode::Closure => self.make_closure(),
                Opcode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                Opcode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return with no frame");
                    self.close_upvalues(frame.slots_base);
                    self.stack.truncate(frame.slots_base);
                    if self.frames.is_empty() {
                        self.stack.clear();
                        return Ok(());
                    }
                    self.push(result);
                }
                Opcode::Class => {
                    let name = self.read_string_short();
                    let class = self.heap.alloc_class(name);
                    self.push(Value::Class(class));
                }
                Opcode::Inherit => self.inherit()?,
                Opcode::Method => {
                    let name = self.read_string_short();
                    self.define_method(name);
                }
            }

            if self.heap.should_collect() {
                self.collect_garbage();
            }
        }
    }

    // ---- instruction decoding --------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active frame");
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_opcode(&mut self) -> Opcode {
        Opcode::from_byte(self.read_byte())
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_u24(&mut self) -> u32 {
        let a = self.read_byte();
        let b = self.read_byte();
        let c = self.read_byte();
        u32::from_be_bytes([0, a, b, c])
    }

    fn read_constant_short(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frames.last().unwrap().closure.function.chunk.constants[index]
    }

    fn read_constant_long(&mut self) -> Value {
        let index = self.read_u24() as usize;
        self.frames.last().unwrap().closure.function.chunk.constants[index]
    }

    fn read_string_short(&mut self) -> GcRef<ObjString> {
        match self.read_constant_short() {
            Value::String(s) => s,
            _ => unreachable!("compiler only ever emits string constants here"),
        }
    }

    // ---- arithmetic & comparisons -----------------------------------------

    fn numeric_binary(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_numeric_pair()?;
        self.push(Value::Number(op(a, b)));
        Ok(())
    }

    fn numeric_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_numeric_pair()?;
        self.push(Value::Bool(op(a, b)));
        Ok(())
    }

    fn pop_numeric_pair(&mut self) -> Result<(f64, f64), RuntimeError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                Ok((a, b))
            }
            _ => Err(RuntimeError::NotANumber {
                line: self.current_line(),
            }),
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
            }
            (Value::String(a), Value::String(b)) => {
                self.pop();
                self.pop();
                let mut concatenated = String::with_capacity(a.len() + b.len());
                concatenated.push_str(a.as_str());
                concatenated.push_str(b.as_str());
                let interned = self.heap.intern_string(&concatenated);
                self.push(Value::String(interned));
            }
            _ => {
                return Err(RuntimeError::BadAddOperands {
                    line: self.current_line(),
                })
            }
        }
        Ok(())
    }

    // ---- calls --------------------------------------------------------------

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, arg_count),
            Value::Native(native) => self.call_native(native, arg_count),
            Value::Class(class) => self.call_class(class, arg_count),
            Value::BoundMethod(bound) => {
                let base = self.stack.len() - arg_count - 1;
                self.stack[base] = bound.receiver;
                self.call_closure(bound.method, arg_count)
            }
            _ => Err(RuntimeError::NotCallable {
                line: self.current_line(),
            }),
        }
    }

    fn call_closure(&mut self, closure: GcRef<ClosureObj>, arg_count: usize) -> Result<(), RuntimeError> {
        let arity = closure.function.arity as usize;
        if arg_count != arity {
            return Err(RuntimeError::ArityMismatch {
                expected: arity,
                got: arg_count,
                line: self.current_line(),
            });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::StackOverflow {
                line: self.current_line(),
            });
        }
        let slots_base = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_base,
        });
        Ok(())
    }

    fn call_native(&mut self, native: GcRef<NativeObj>, arg_count: usize) -> Result<(), RuntimeError> {
        let base = self.stack.len() - arg_count;
        let result = (native.function)(&self.stack[base..])?;
        self.stack.truncate(base - 1);
        self.push(result);
        Ok(())
    }

    fn call_class(&mut self, class: GcRef<ClassObj>, arg_count: usize) -> Result<(), RuntimeError> {
        let instance = self.heap.alloc_instance(class);
        let base = self.stack.len() - arg_count - 1;
        self.stack[base] = Value::Instance(instance);

        if let Some(initializer) = class.methods.borrow().get(self.init_string).copied() {
            self.call_closure(initializer, arg_count)
        } else if arg_count != 0 {
            Err(RuntimeError::ArityMismatch {
                expected: 0,
                got: arg_count,
                line: self.current_line(),
            })
        } else {
            Ok(())
        }
    }

    fn invoke(&mut self, name: GcRef<ObjString>, arg_count: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count);
        let Value::Instance(instance) = receiver else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
            });
        };
        if let Some(field) = instance.fields.borrow().get(name).copied() {
            let base = self.stack.len() - arg_count - 1;
            self.stack[base] = field;
            return self.call_value(field, arg_count);
        }
        self.invoke_from_class(instance.class, name, arg_count)
    }

    fn invoke_from_class(
        &mut self,
        class: GcRef<ClassObj>,
        name: GcRef<ObjString>,
        arg_count: usize,
    ) -> Result<(), RuntimeError> {
        let method = class.methods.borrow().get(name).copied();
        match method {
            Some(method) => self.call_closure(method, arg_count),
            None => Err(RuntimeError::UndefinedMethod {
                name: name.as_str().to_string(),
                line: self.current_line(),
            }),
        }
    }

    // ---- properties -----------------------------------------------------

    fn get_property(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_short();
        let receiver = self.peek(0);
        let Value::Instance(instance) = receiver else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
            });
        };
        if let Some(value) = instance.fields.borrow().get(name).copied() {
            self.pop();
            self.push(value);
            return Ok(());
        }
        let method = instance.class.methods.borrow().get(name).copied();
        match method {
            Some(method) => {
                let bound = self.heap.alloc_bound_method(receiver, method);
                self.pop();
                self.push(Value::BoundMethod(bound));
                Ok(())
            }
            None => Err(RuntimeError::UndefinedProperty {
                name: name.as_str().to_string(),
                line: self.current_line(),
            }),
        }
    }

    fn set_property(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_short();
        let value = self.peek(0);
        let receiver = self.peek(1);
        let Value::Instance(instance) = receiver else {
            return Err(RuntimeError::NotAnInstance {
                line: self.current_line(),
            });
        };
        instance.fields.borrow_mut().set(name, value);
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn get_super(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_short();
        let superclass = self.pop();
        let Value::Class(superclass) = superclass else {
            unreachable!("compiler always pushes a class before GET_SUPER");
        };
        let receiver = self.pop();
        let method = superclass.methods.borrow().get(name).copied();
        match method {
            Some(method) => {
                let bound = self.heap.alloc_bound_method(receiver, method);
                self.push(Value::BoundMethod(bound));
                Ok(())
            }
            None => Err(RuntimeError::UndefinedMethod {
                name: name.as_str().to_string(),
                line: self.current_line(),
            }),
        }
    }

    fn inherit(&mut self) -> Result<(), RuntimeError> {
        let superclass = self.peek(1);
        let Value::Class(superclass) = superclass else {
            return Err(RuntimeError::SuperclassNotAClass {
                line: self.current_line(),
            });
        };
        let subclass = self.peek(0);
        let Value::Class(subclass) = subclass else {
            unreachable!("compiler always pushes a class before INHERIT");
        };
        let superclass_methods = superclass.methods.borrow();
        subclass.methods.borrow_mut().add_all(&superclass_methods);
        drop(superclass_methods);
        self.pop();
        Ok(())
    }

    fn define_method(&mut self, name: GcRef<ObjString>) {
        let method = self.peek(0);
        let Value::Closure(closure) = method else {
            unreachable!("compiler always pushes a closure before METHOD");
        };
        let class = self.peek(1);
        let Value::Class(class) = class else {
            unreachable!("compiler always pushes a class before compiling methods");
        };
        class.methods.borrow_mut().set(name, closure);
        self.pop();
    }

    // ---- closures & upvalues ----------------------------------------------

    fn make_closure(&mut self) {
        let function = match self.read_constant_short() {
            Value::Function(f) => f,
            _ => unreachable!("compiler only ever emits function constants here"),
        };
        let mut upvalues = Vec::with_capacity(function.upvalue_count);
        for _ in 0..function.upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;
            if is_local {
                let base = self.frames.last().unwrap().slots_base;
                upvalues.push(self.capture_upvalue(base + index));
            } else {
                let enclosing = self.frames.last().unwrap().closure.upvalues[index];
                upvalues.push(enclosing);
            }
        }
        let closure = self.heap.alloc_closure(function, upvalues);
        self.push(Value::Closure(closure));
    }

    /// Find or create the open upvalue for stack slot `slot`, keeping
    /// `open_upvalues` ordered by descending address so `close_upvalues`
    /// can stop at the first slot below its threshold (spec.md §3.2,
    /// §9).
    fn capture_upvalue(&mut self, slot: usize) -> GcRef<UpvalueObj> {
        if let Some(existing) = self
            .open_upvalues
            .iter()
            .find(|u| u.stack_slot() == Some(slot))
        {
            return *existing;
        }
        let upvalue = self.heap.alloc_upvalue(UpvalueLocation::Stack(slot));
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|u| u.stack_slot().is_some_and(|s| s < slot))
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, upvalue);
        upvalue
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|upvalue| {
            match upvalue.stack_slot() {
                Some(slot) if slot >= from_slot => {
                    upvalue.close(stack[slot]);
                    false
                }
                _ => true,
            }
        });
    }

    fn read_upvalue(&self, upvalue: GcRef<UpvalueObj>) -> Value {
        match upvalue.location.get() {
            UpvalueLocation::Stack(slot) => self.stack[slot],
            UpvalueLocation::Closed(value) => value,
        }
    }

    fn write_upvalue(&mut self, upvalue: GcRef<UpvalueObj>, value: Value) {
        match upvalue.location.get() {
            UpvalueLocation::Stack(slot) => self.stack[slot] = value,
            UpvalueLocation::Closed(_) => upvalue.location.set(UpvalueLocation::Closed(value)),
        }
    }

    // ---- diagnostics ------------------------------------------------------

    fn trace_instruction(&self) {
        let frame = self.frames.last().expect("no active frame");
        let stack_repr: Vec<String> = self.stack.iter().map(|v| format!("[ {v} ]")).collect();
        eprint!("{}", stack_repr.concat());
        let (line, _) = crate::disasm::disassemble_instruction(&frame.closure.function.chunk, frame.ip);
        eprintln!("\n{line}");
    }
}

impl GcRoots for Vm {
    fn mark_roots(&self, heap: &Heap) {
        heap.mark_value(Value::String(self.init_string));
        for value in &self.stack {
            heap.mark_value(*value);
        }
        for frame in &self.frames {
            heap.mark_object(frame.closure.header());
        }
        for upvalue in &self.open_upvalues {
            heap.mark_object(upvalue.header());
        }
        for (key, value) in self.globals.iter() {
            heap.mark_object(key.header());
            heap.mark_value(*value);
        }
    }
}

fn values_equal(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => a == b,
        (Value::Native(a), Value::Native(b)) => a == b,
        (Value::Closure(a), Value::Closure(b)) => a == b,
        (Value::Class(a), Value::Class(b)) => a == b,
        (Value::Instance(a), Value::Instance(b)) => a == b,
        (Value::BoundMethod(a), Value::BoundMethod(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use rstest::rstest;

    /// Compile and run `source` against a fresh `Vm`, returning the
    /// `Vm` itself so tests can inspect `globals` directly instead of
    /// scraping `print`'s stdout (end-to-end `print` behavior is
    /// covered by the CLI's black-box tests).
    fn run(source: &str) -> Vm {
        let mut vm = Vm::new(Options::new());
        let function = Compiler::compile(source, &vm.heap).expect("source must compile");
        vm.interpret(function).expect("source must not raise a runtime error");
        vm
    }

    fn global(vm: &Vm, name: &str) -> Value {
        let interned = vm.heap.intern_string(name);
        *vm.globals.get(interned).expect("global must be defined")
    }

    #[test]
    fn arithmetic_precedence_matches_scenario_one() {
        let vm = run("var result = 1 + 2 * 3;");
        assert_eq!(global(&vm, "result"), Value::Number(7.0));
    }

    #[rstest]
    #[case("var result = 1 + 2;", 3.0)]
    #[case("var result = 5 - 2;", 3.0)]
    #[case("var result = 4 * 2.5;", 10.0)]
    #[case("var result = 9 / 2;", 4.5)]
    #[case("var result = 2 * (3 + 4);", 14.0)]
    #[case("var result = -3 + 5;", 2.0)]
    fn arithmetic_operators_match_expected_results(#[case] source: &str, #[case] expected: f64) {
        let vm = run(source);
        assert_eq!(global(&vm, "result"), Value::Number(expected));
    }

    #[test]
    fn interned_strings_compare_equal_by_identity() {
        let vm = run(r#"var a = "hi"; var b = "hi"; var result = a == b;"#);
        assert_eq!(global(&vm, "result"), Value::Bool(true));
    }

    #[test]
    fn a_closure_keeps_its_own_copy_of_a_closed_over_local() {
        let vm = run(
            "fun make() { var x = 0; fun inc() { x = x + 1; return x; } return inc; }\
             var f = make(); var first = f(); var second = f();",
        );
        assert_eq!(global(&vm, "first"), Value::Number(1.0));
        assert_eq!(global(&vm, "second"), Value::Number(2.0));
    }

    #[test]
    fn subclasses_inherit_methods_from_their_superclass() {
        let vm = run(
            r#"class A { greet() { return "hi"; } } class B < A {} var result = B().greet();"#,
        );
        let Value::String(result) = global(&vm, "result") else {
            panic!("expected a string result");
        };
        assert_eq!(result.as_str(), "hi");
    }

    #[test]
    fn a_for_loop_accumulates_the_expected_sum() {
        let vm = run("var x = 0; for (var i = 0; i < 1000; i = i + 1) { x = x + i; } var result = x;");
        assert_eq!(global(&vm, "result"), Value::Number(499500.0));
    }

    #[test]
    fn stress_gc_does_not_change_the_for_loop_result() {
        let mut vm = Vm::new(Options::new().with_stress_gc(true));
        let source = "var x = 0; for (var i = 0; i < 1000; i = i + 1) { x = x + i; } var result = x;";
        let function = Compiler::compile(source, &vm.heap).expect("source must compile");
        vm.interpret(function).expect("source must not raise a runtime error");
        assert_eq!(global(&vm, "result"), Value::Number(499500.0));
    }

    #[test]
    fn init_runs_on_construction_and_binds_this() {
        let vm = run("class C { init(x) { this.x = x; } } var result = C(42).x;");
        assert_eq!(global(&vm, "result"), Value::Number(42.0));
    }

    #[test]
    fn the_value_stack_is_empty_after_every_top_level_statement() {
        let vm = run("1 + 2; var a = 3; \"str\"; nil;");
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn double_negation_is_the_identity_for_finite_numbers() {
        let vm = run("var result = -(-5.5);");
        assert_eq!(global(&vm, "result"), Value::Number(5.5));
    }

    #[test]
    fn double_negation_of_truthiness_round_trips_through_not() {
        let vm = run("var result = !!0;");
        assert_eq!(global(&vm, "result"), Value::Bool(true));
    }

    #[rstest]
    #[case("undefined_fn();", "UndefinedGlobal")]
    #[case(r#"1 + "two";"#, "BadAddOperands")]
    #[case("var x = 1; x.field;", "NotAnInstance")]
    #[case("var x = 1; x();", "NotCallable")]
    #[case("fun f() {} f(1);", "ArityMismatch")]
    fn runtime_errors_match_expected_variant(#[case] source: &str, #[case] variant: &str) {
        let mut vm = Vm::new(Options::new());
        let function = Compiler::compile(source, &vm.heap).expect("source must compile");
        let err = vm.interpret(function).expect_err("source must raise a runtime error");
        assert!(
            format!("{:?}", err.error).starts_with(variant),
            "{:?} did not start with {variant}",
            err.error
        );
    }

    #[test]
    fn the_trace_names_every_frame_active_when_the_error_was_raised() {
        let mut vm = Vm::new(Options::new());
        let function = Compiler::compile(
            "fun inner() { return 1 / nil; } fun outer() { inner(); } outer();",
            &vm.heap,
        )
        .expect("source must compile");
        let err = vm.interpret(function).expect_err("dividing by nil must fail");
        assert_eq!(err.trace.len(), 3);
        assert_eq!(err.trace[0].function_name, "inner");
        assert_eq!(err.trace[1].function_name, "outer");
        assert_eq!(err.trace[2].function_name, "script");
    }
}

