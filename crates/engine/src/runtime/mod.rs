//! The runtime: global engine state, the call stack, and the native
//! entrypoints emitted code calls into (§9 "Global singletons").

pub mod callstack;
pub mod entrypoints;

use crate::abi::{AbiKind, CallingConvention};
use crate::class::ClassMetadata;
use crate::config::VmConfig;
use crate::jit;
use crate::error::{EngineError, LoadError};
use crate::gc::{Collector, FrameDescriptor, Generation, Relocation, RootWalker};
use crate::memory::MemoryManager;
use crate::signature::{FunctionDefinition, ManagedFunction};
use rustc_hash::FxHashMap;
use std::rc::Rc;
use tracing::instrument;

pub use callstack::CallStack;

/// The engine's single instance of mutable global state, threaded
/// explicitly through the compiler and every runtime callback rather than
/// reached for as a process-wide global (§9).
pub struct VMState {
    pub config: VmConfig,
    pub memory: MemoryManager,
    pub gc: Collector,
    pub call_stack: CallStack,
    pub convention: Box<dyn CallingConvention>,
    pub functions: FxHashMap<String, Rc<ManagedFunction>>,
    pub externs: FxHashMap<String, Rc<FunctionDefinition>>,
    pub classes: FxHashMap<String, Rc<ClassMetadata>>,
    /// Interned string-literal objects, keyed by the owning function's
    /// address and the literal's index into its `string_table`, so a
    /// `LoadString` only allocates once per call site (§4.6).
    pub string_cache: FxHashMap<(usize, u32), usize>,
}

impl VMState {
    pub fn new(config: VmConfig) -> Self {
        VMState {
            gc: Collector::new(config.young_bytes, config.old_bytes, config.card_size, config.promotion_threshold),
            convention: config.abi().convention(),
            memory: MemoryManager::new(),
            call_stack: CallStack::default(),
            functions: FxHashMap::default(),
            externs: FxHashMap::default(),
            classes: FxHashMap::default(),
            string_cache: FxHashMap::default(),
            config,
        }
    }

    pub fn abi_kind(&self) -> AbiKind {
        self.config.abi()
    }

    pub fn define_function(&mut self, function: ManagedFunction) -> Result<(), EngineError> {
        let signature = function.signature();
        if self.functions.contains_key(&signature) || self.externs.contains_key(&signature) {
            return Err(LoadError::DuplicateFunction(signature).into());
        }
        self.functions.insert(signature, Rc::new(function));
        Ok(())
    }

    pub fn define_class(&mut self, metadata: ClassMetadata) -> Result<(), EngineError> {
        if self.classes.contains_key(&metadata.name) {
            return Err(LoadError::DuplicateClass(metadata.name).into());
        }
        self.classes.insert(metadata.name.clone(), Rc::new(metadata));
        Ok(())
    }

    pub fn lookup(&self, signature: &str) -> Option<&Rc<ManagedFunction>> {
        self.functions.get(signature)
    }

    pub fn allocate(&mut self, generation: Generation, size: usize) -> Option<usize> {
        self.gc.allocate(generation, size)
    }

    /// Walks the live call stack into `FrameDescriptor`s (one per pushed
    /// frame, §4.9 Roots), runs a young collection rooted against them, and
    /// rewrites every live frame slot that pointed at a relocated object.
    /// Root precision covers parameters and locals only, not values
    /// currently sitting only on the operand stack at the allocation call
    /// site that triggered this collection (see the design ledger).
    #[instrument(skip(self), fields(generation = "young"))]
    pub fn collect(&mut self) {
        let frames: Vec<FrameDescriptor> = self
            .call_stack
            .frames()
            .iter()
            .map(|entry| {
                let definition = unsafe { &*entry.function };
                let locals = self
                    .functions
                    .get(&definition.signature())
                    .map(|f| f.locals.clone())
                    .unwrap_or_default();
                FrameDescriptor {
                    frame_base: entry.frame_base,
                    param_types: definition.parameters.clone(),
                    local_types: locals,
                    operand_stack_depth: 0,
                    operand_stack_types: Vec::new(),
                }
            })
            .collect();

        let roots = RootWalker::new(&frames);
        let relocations = self.gc.collect_young(&roots);
        apply_relocations(&relocations, &frames);
    }

    /// Compiles and installs a real entry point into every loaded class's
    /// vtable slots. Classes install before functions (§3), so a class's
    /// own virtual methods cannot be compiled at `define_class` time; the
    /// image loader calls this once every function is in `self.functions`
    /// instead. A slot whose signature has no function body (a virtual
    /// declared but never defined) is left at `0` (§4.6 CallVirtual).
    #[instrument(skip(self))]
    pub fn link_vtables(&mut self) -> Result<(), EngineError> {
        let classes: Vec<Rc<ClassMetadata>> = self.classes.values().cloned().collect();
        for class in classes {
            for slot in &class.vtable {
                if !self.functions.contains_key(&slot.signature) {
                    continue;
                }
                let entry = self.compile_by_signature(&slot.signature)?;
                class.vtable_entries[slot.slot].set(entry as i64);
            }
        }
        Ok(())
    }

    /// Compiles the function named by `signature` if it has not already
    /// been compiled, returning its (now stable) entry point (§4.7 lazy
    /// policy).
    #[instrument(skip(self))]
    pub fn compile_by_signature(&mut self, signature: &str) -> Result<usize, EngineError> {
        let function = self
            .functions
            .get(signature)
            .cloned()
            .ok_or_else(|| LoadError::MalformedImage(format!("unresolved call to '{signature}'")))?;
        if let Some(entry) = function.definition.entry_point() {
            return Ok(entry);
        }
        let entry = jit::compile_function(self, &function)?;
        function.definition.set_entry_point(entry);
        self.memory.make_all_executable().map_err(|e| LoadError::MalformedImage(e.to_string()))?;
        Ok(entry)
    }
}

/// Rewrites every live frame slot that held a pointer to a relocated
/// object. `frame.reference_slot_addresses()` gives the address of each
/// such slot on the native call stack; the pointer value stored there is
/// read, checked against the relocation table, and written back if it
/// moved (§4.9 Roots).
fn apply_relocations(relocations: &[Relocation], frames: &[FrameDescriptor]) {
    if relocations.is_empty() {
        return;
    }
    for frame in frames {
        for addr in frame.reference_slot_addresses() {
            let slot = addr as *mut i64;
            let value = unsafe { *slot } as usize;
            if let Some(reloc) = relocations.iter().find(|r| r.from == value) {
                unsafe {
                    *slot = reloc.to as i64;
                }
            }
        }
    }
}
