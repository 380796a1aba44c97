//! The C code generator.
//!
//! Produces a single translation unit: a self-contained runtime prelude,
//! embedded pragma includes, struct typedefs, forward declarations for every
//! generated function, module globals, closure/spawn support definitions,
//! and finally the function definitions themselves. All mutable state lives
//! on the [`CodeGen`] context threaded through every routine; nothing is
//! global.

pub mod cnames;
pub mod expr;
pub mod stmt;

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use log::debug;

use crate::arena::CompileArena;
use crate::ast::{FunctionModifier, Module, Stmt, StmtKind};
use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::symbol::{SymbolKind, SymbolTable};
use crate::types::{Primitives, Type};

/// Everything the driver needs from a code-generation run.
#[derive(Debug)]
pub struct COutput {
    pub source: String,
    /// Libraries requested through `pragma link`.
    pub links: Vec<String>,
}

pub struct CodeGen<'c, 'arena> {
    pub arena: &'c CompileArena<'arena>,
    pub prims: &'c Primitives<'arena>,
    pub table: SymbolTable<'arena>,

    // Output sections, assembled in order at the end.
    pub includes: String,
    pub typedefs: String,
    pub fwd_decls: String,
    pub globals: String,
    pub lambda_defs: String,
    pub spawn_defs: String,
    pub out: String,
    pub links: Vec<String>,

    // Function context.
    pub current_function: Option<String>,
    pub current_return_type: Option<&'arena Type<'arena>>,
    pub current_func_modifier: FunctionModifier,
    pub current_arena_var: Option<String>,
    pub in_private_context: bool,
    pub in_shared_context: bool,
    pub allocate_closure_in_caller_arena: bool,
    pub in_tail_call_function: bool,
    pub tail_call_fn: Option<&'arena crate::ast::FunctionStmt<'arena>>,

    // Declaration context.
    pub current_decl_var_name: Option<&'arena str>,
    pub recursive_lambda_id: i32,
    pub captured_primitives: Vec<&'arena str>,

    // Arena stacks a `return` must unwind.
    pub loop_arena_stack: Vec<String>,
    pub private_arena_stack: Vec<String>,

    // Module-level bookkeeping.
    pub deferred_global_names: Vec<String>,
    pub deferred_global_values: Vec<String>,
    pub deferred_replayed: bool,
    pub emitted_globals: HashSet<String>,
    pub emitted_static_globals: HashSet<String>,
    pub emitted_modules: HashSet<usize>,
    pub current_namespace_prefix: Option<String>,
    pub current_canonical_module: Option<String>,

    /// Function statements by name, for parameter qualifiers at call sites.
    pub functions: HashMap<&'arena str, &'arena crate::ast::FunctionStmt<'arena>>,

    pub next_lambda_id: i32,
    pub next_spawn_id: i32,
    pub next_temp_id: i32,
    pub next_struct_id: i32,
}

impl<'c, 'arena> CodeGen<'c, 'arena> {
    pub fn new(arena: &'c CompileArena<'arena>, prims: &'c Primitives<'arena>) -> Self {
        CodeGen {
            arena,
            prims,
            table: SymbolTable::new(),
            includes: String::new(),
            typedefs: String::new(),
            fwd_decls: String::new(),
            globals: String::new(),
            lambda_defs: String::new(),
            spawn_defs: String::new(),
            out: String::new(),
            links: Vec::new(),
            current_function: None,
            current_return_type: None,
            current_func_modifier: FunctionModifier::Default,
            current_arena_var: None,
            in_private_context: false,
            in_shared_context: false,
            allocate_closure_in_caller_arena: false,
            in_tail_call_function: false,
            tail_call_fn: None,
            current_decl_var_name: None,
            recursive_lambda_id: -1,
            captured_primitives: Vec::new(),
            loop_arena_stack: Vec::new(),
            private_arena_stack: Vec::new(),
            deferred_global_names: Vec::new(),
            deferred_global_values: Vec::new(),
            deferred_replayed: false,
            emitted_globals: HashSet::new(),
            emitted_static_globals: HashSet::new(),
            emitted_modules: HashSet::new(),
            current_namespace_prefix: None,
            current_canonical_module: None,
            functions: HashMap::new(),
            next_lambda_id: 0,
            next_spawn_id: 0,
            next_temp_id: 0,
            next_struct_id: 1,
        }
    }

    /// The arena expression allocations should target right now.
    pub fn arena_var(&self) -> String {
        self.current_arena_var
            .clone()
            .unwrap_or_else(|| "__main_arena__".to_owned())
    }

    pub fn at_global_scope(&self) -> bool {
        self.current_arena_var.is_none()
    }

    /// Appends one indented line to the current function body.
    pub fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn fresh_temp(&mut self) -> String {
        let id = self.next_temp_id;
        self.next_temp_id += 1;
        format!("__tmp_{id}__")
    }

    pub fn internal_error<T>(&self, msg: &str, loc: Location) -> Result<T> {
        Err(Error::new(ErrorKind::Internal(msg.to_owned()), loc))
    }

    // ---- captured-primitive set (populated by stmt::capture) ----------

    pub fn is_captured_primitive(&self, name: &str) -> bool {
        self.captured_primitives.iter().any(|&n| n == name)
    }

    pub fn add_captured_primitive(&mut self, name: &'arena str) {
        if !self.is_captured_primitive(name) {
            self.captured_primitives.push(name);
        }
    }

    pub fn clear_captured_primitives(&mut self) {
        self.captured_primitives.clear();
    }

    /// The emitted C name of a module-scope binding, honoring static and
    /// namespace mangling.
    pub fn global_c_name(&self, raw: &str, is_static: bool) -> String {
        let prefix = if is_static {
            self.current_canonical_module.as_deref()
        } else {
            self.current_namespace_prefix.as_deref()
        };
        match prefix {
            Some(p) => cnames::mangle(&format!("{p}__{raw}")),
            None => cnames::mangle(raw),
        }
    }

    /// The emitted C name of a function, honoring namespace mangling and
    /// pragma aliases.
    pub fn function_c_name(&self, name: &str) -> String {
        if let Some(sym) = self.table.lookup(name) {
            if sym.is_native {
                return sym.c_alias.map_or_else(|| name.to_owned(), str::to_owned);
            }
        }
        match &self.current_namespace_prefix {
            Some(p) if name != "main" => cnames::mangle(&format!("{p}__{name}")),
            _ => cnames::mangle(name),
        }
    }
}

/// Generates the full translation unit for a checked module.
pub fn generate<'arena>(
    arena: &CompileArena<'arena>,
    prims: &Primitives<'arena>,
    module: &Module<'arena>,
) -> Result<COutput> {
    let mut gen = CodeGen::new(arena, prims);
    gen.hoist_module(module.stmts)?;

    let mut has_main = false;
    for stmt in module.stmts {
        if let StmtKind::Function(func) = &stmt.kind {
            if func.name == "main" {
                has_main = true;
            }
        }
        gen.gen_module_stmt(stmt)?;
    }

    if !has_main {
        gen.emit_default_main();
    }

    let mut source = String::new();
    source.push_str(&prelude());
    source.push_str(&gen.includes);
    source.push_str("\n/* struct typedefs */\n");
    source.push_str(&gen.typedefs);
    source.push_str("\n/* forward declarations */\n");
    source.push_str(&gen.fwd_decls);
    source.push_str("\nstatic SnArena *__main_arena__ = NULL;\n");
    source.push_str("\n/* module globals */\n");
    source.push_str(&gen.globals);
    source.push_str("\n/* closures */\n");
    source.push_str(&gen.lambda_defs);
    source.push_str("\n/* spawn thunks */\n");
    source.push_str(&gen.spawn_defs);
    source.push('\n');
    source.push_str(&gen.out);

    Ok(COutput { source, links: gen.links })
}

impl<'c, 'arena> CodeGen<'c, 'arena> {
    /// Declares module-level symbols (functions, structs, type aliases) so
    /// call sites can be generated before their definitions, and emits the
    /// forward declarations.
    pub fn hoist_module(&mut self, stmts: &'arena [&'arena Stmt<'arena>]) -> Result<()> {
        let mut pending_alias: Option<&'arena str> = None;
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Pragma(crate::ast::PragmaKind::Alias(alias)) => {
                    pending_alias = Some(*alias);
                }
                StmtKind::Function(func) => {
                    if let Some(alias) = pending_alias.take() {
                        if func.c_alias.get().is_none() {
                            func.c_alias.set(Some(alias));
                        }
                    }
                    self.declare_function_symbol(func);
                    if !func.is_native && func.name != "main" {
                        let proto = stmt::func::prototype(self, func);
                        let _ = writeln!(self.fwd_decls, "{proto};");
                    }
                }
                StmtKind::StructDecl(decl) => {
                    self.emit_struct_typedef(decl)?;
                }
                StmtKind::TypeDecl { name, ty } => {
                    let _ = writeln!(self.typedefs, "typedef {} {};", cnames::c_type(ty), name);
                    self.table.add_type(name, ty);
                }
                StmtKind::Import(import) => {
                    stmt::import::hoist_import(self, import)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn declare_function_symbol(&mut self, func: &'arena crate::ast::FunctionStmt<'arena>) {
        self.functions.insert(func.name, func);
        if self.table.lookup(func.name).is_some_and(|s| s.is_function) {
            return;
        }
        let params: Vec<_> = func.params.iter().map(|p| p.ty).collect();
        let fn_ty = self.arena.alloc(Type::Function {
            params: self.arena.alloc_slice(&params),
            ret: func.return_ty,
        });
        let sym = self.table.add_symbol_full(
            func.name,
            fn_ty,
            SymbolKind::Global,
            crate::ast::MemoryQualifier::Default,
        );
        sym.is_function = true;
        sym.is_native = func.is_native;
        sym.c_alias = func.c_alias.get();
        sym.declared_func_mod = func.modifier;
        sym.func_mod = func.modifier;
    }

    fn emit_struct_typedef(&mut self, decl: &'arena crate::ast::StructDecl<'arena>) -> Result<()> {
        if self.table.lookup_type(decl.name).is_some() {
            return Ok(());
        }
        let mut size = 0usize;
        let mut fields = Vec::with_capacity(decl.fields.len());
        let _ = writeln!(self.typedefs, "typedef struct {} {{", decl.name);
        for f in decl.fields {
            let _ = writeln!(self.typedefs, "    {} {};", cnames::c_type(f.ty), cnames::mangle(f.name));
            size = (size + 7) / 8 * 8 + crate::check::c_size_of(f.ty).max(1);
            fields.push(crate::types::Field { name: f.name, ty: f.ty });
        }
        size = (size + 7) / 8 * 8;
        let _ = writeln!(self.typedefs, "}} {};", decl.name);
        let id = self.next_struct_id;
        self.next_struct_id += 1;
        let ty = self.arena.alloc(Type::Struct {
            name: decl.name,
            fields: self.arena.alloc_slice(&fields),
            id,
            size,
        });
        self.table.add_type(decl.name, ty);
        Ok(())
    }

    /// One module-level statement.
    pub fn gen_module_stmt(&mut self, stmt: &'arena Stmt<'arena>) -> Result<()> {
        match &stmt.kind {
            StmtKind::Function(func) => stmt::func::gen_function(self, func),
            StmtKind::VarDecl(decl) => {
                // Globals are emitted into their own section.
                let saved = core::mem::take(&mut self.out);
                let result = stmt::var::gen_var_declaration(self, decl, 0);
                let emitted = core::mem::replace(&mut self.out, saved);
                self.globals.push_str(&emitted);
                result
            }
            StmtKind::Pragma(pragma) => {
                match pragma {
                    crate::ast::PragmaKind::Include(path) => {
                        let _ = writeln!(self.includes, "#include \"{path}\"");
                    }
                    crate::ast::PragmaKind::Link(lib) => {
                        self.links.push((*lib).to_owned());
                    }
                    crate::ast::PragmaKind::Alias(_) => {}
                }
                Ok(())
            }
            StmtKind::Import(import) => stmt::import::gen_import(self, import),
            // Already handled during hoisting.
            StmtKind::StructDecl(_) | StmtKind::TypeDecl { .. } => Ok(()),
            _ => {
                debug!("module-level statement outside a function; wrapping into main is not supported");
                self.internal_error("statement outside a function", stmt.loc)
            }
        }
    }

    /// A `main` for modules that do not declare one: create the root arena,
    /// replay deferred global initializers, exit 0.
    pub fn emit_default_main(&mut self) {
        self.line(0, "int main(void) {");
        self.line(1, "SnArena *__local_arena__ = sn_arena_create(NULL);");
        self.line(1, "__main_arena__ = __local_arena__;");
        self.replay_deferred_globals(1);
        self.line(1, "sn_arena_destroy(__local_arena__);");
        self.line(1, "return 0;");
        self.line(0, "}");
    }

    /// Runs the recorded global initializers under `__main_arena__`.
    pub fn replay_deferred_globals(&mut self, indent: usize) {
        if self.deferred_replayed {
            return;
        }
        self.deferred_replayed = true;
        let pairs: Vec<_> = self
            .deferred_global_names
            .iter()
            .cloned()
            .zip(self.deferred_global_values.iter().cloned())
            .collect();
        for (name, value) in pairs {
            self.line(indent, &format!("{name} = {value};"));
        }
    }
}

/// The self-contained runtime prelude: ABI types plus one declaration per
/// entry point the generator can emit.
pub fn prelude() -> String {
    let mut p = String::new();
    p.push_str(
        r#"/* Generated by sennac. */
#include <stdint.h>
#include <stddef.h>
#include <stdbool.h>

typedef struct SnArena SnArena;
typedef struct SnHandle {
    void *ptr;
    SnArena *arena;
    size_t size;
    void (*copy_callback)(SnArena *, struct SnHandle *);
    void (*free_callback)(struct SnHandle *);
    uint32_t tx_count;
    bool dead;
} SnHandle;

typedef struct {
    SnArena *arena;
    size_t size;
    size_t capacity;
    size_t elem_size;
} SnArrayMeta;

typedef struct {
    int32_t tag;
    union {
        long long i64_;
        int32_t i32_;
        unsigned long long u64_;
        uint32_t u32_;
        double d;
        float f;
        char c;
        bool b;
        unsigned char byte_;
        SnHandle *h;
    } value;
    int32_t element_tag;
} SnAny;

typedef struct {
    long long bits;
    double dbits;
    SnHandle *handle;
    SnAny any;
    SnArena *arena;
} SnThreadResult;

typedef struct { void *fn; } SnClosureHdr;

#define SN_SLICE_DEFAULT (-9223372036854775807LL - 1)

extern SnArena *sn_arena_create(SnArena *parent);
extern void sn_arena_destroy(SnArena *arena);
extern SnHandle *sn_arena_alloc(SnArena *arena, size_t size);
extern SnHandle *sn_arena_strdup(SnArena *arena, const char *s);
extern SnHandle *sn_arena_promote(SnArena *dest, SnHandle *h);
extern SnHandle *sn_arena_promote_string(SnArena *dest, SnHandle *h);
extern void *sn_arena_promote_sized(SnArena *dest, const void *p, size_t size);
extern SnHandle *sn_handle_from_bytes(SnArena *dest, const void *p, size_t size);
extern void sn_arena_free(SnHandle *h);
extern void sn_handle_begin(SnHandle *h);
extern void sn_handle_renew(SnHandle *h);
extern void sn_handle_end(SnHandle *h);

extern SnHandle *sn_string_from(SnArena *arena, const char *s);
extern SnHandle *sn_string_concat(SnArena *arena, SnHandle *a, SnHandle *b);
extern bool sn_string_eq(SnHandle *a, SnHandle *b);
extern long long sn_string_len(SnHandle *h);
extern SnHandle *sn_to_string_long(SnArena *arena, long long v);
extern SnHandle *sn_to_string_double(SnArena *arena, double v);
extern SnHandle *sn_to_string_bool(SnArena *arena, bool v);
extern SnHandle *sn_to_string_char(SnArena *arena, char v);
extern SnHandle *sn_to_string_byte(SnArena *arena, unsigned char v);
extern void sn_print_string(SnHandle *h);
extern void sn_print_long(long long v);
extern void sn_print_double(double v);
extern void sn_print_bool(bool v);
extern void sn_print_char(char v);
extern void sn_print_byte(unsigned char v);
extern void sn_println_string(SnHandle *h);
extern void sn_println_long(long long v);
extern void sn_println_double(double v);
extern void sn_println_bool(bool v);
extern void sn_println_char(char v);
extern void sn_println_byte(unsigned char v);

extern long long sn_array_len(SnHandle *h);
extern void *sn_array_data(SnHandle *h);
extern void sn_array_clear(SnHandle *h);
extern SnHandle *sn_array_range(SnArena *arena, long long start, long long end);
extern SnHandle *sn_array_create_generic(SnArena *arena, size_t count, size_t elem_size, const void *data);
extern SnHandle *sn_array_clone_generic(SnArena *arena, SnHandle *h, size_t elem_size);
extern SnHandle *sn_array_push_struct(SnArena *arena, SnHandle *h, const void *elem, size_t elem_size);
extern SnHandle *sn_args_create(SnArena *arena, int argc, char **argv);

"#,
    );

    // Typed array families.
    let families: &[(&str, &str)] = &[
        ("long", "long long"),
        ("double", "double"),
        ("char", "char"),
        ("bool", "int"),
        ("byte", "unsigned char"),
        ("int32", "int32_t"),
        ("uint32", "uint32_t"),
        ("uint", "uint64_t"),
        ("float", "float"),
    ];
    for (suffix, ctype) in families {
        let _ = writeln!(p, "extern SnHandle *sn_array_create_{suffix}(SnArena *arena, size_t count, const {ctype} *data);");
        let _ = writeln!(p, "extern SnHandle *sn_array_alloc_{suffix}(SnArena *arena, size_t count, {ctype} default_value);");
        let _ = writeln!(p, "extern SnHandle *sn_array_clone_{suffix}(SnArena *arena, SnHandle *h);");
        let _ = writeln!(p, "extern SnHandle *sn_array_concat_{suffix}(SnHandle *a, SnHandle *b);");
        let _ = writeln!(p, "extern SnHandle *sn_array_slice_{suffix}(SnHandle *h, long long start, long long end, long long step);");
        let _ = writeln!(p, "extern SnHandle *sn_array_rev_{suffix}(SnHandle *h);");
        let _ = writeln!(p, "extern SnHandle *sn_array_rem_{suffix}(SnHandle *h, long long index);");
        let _ = writeln!(p, "extern SnHandle *sn_array_ins_{suffix}(SnHandle *h, {ctype} elem, long long index);");
        let _ = writeln!(p, "extern SnHandle *sn_array_push_{suffix}(SnArena *arena, SnHandle *h, {ctype} elem);");
        let _ = writeln!(p, "extern SnHandle *sn_array_push_copy_{suffix}(SnHandle *h, {ctype} elem);");
        let _ = writeln!(p, "extern {ctype} sn_array_pop_{suffix}(SnHandle *h);");
        let _ = writeln!(p, "extern long long sn_array_index_of_{suffix}(SnHandle *h, {ctype} elem);");
        let _ = writeln!(p, "extern bool sn_array_contains_{suffix}(SnHandle *h, {ctype} elem);");
        let _ = writeln!(p, "extern bool sn_array_eq_{suffix}(SnHandle *a, SnHandle *b);");
        let _ = writeln!(p, "extern SnHandle *sn_array_to_string_{suffix}(SnArena *arena, SnHandle *h);");
        let _ = writeln!(p, "extern SnHandle *sn_array_to_string2_{suffix}(SnArena *arena, SnHandle *h);");
        let _ = writeln!(p, "extern SnHandle *sn_array_to_string3_{suffix}(SnArena *arena, SnHandle *h);");
        let _ = writeln!(p, "extern SnHandle *sn_array_join_{suffix}(SnArena *arena, SnHandle *h, const char *sep);");
        let _ = writeln!(p, "extern SnHandle *sn_array_to_any_{suffix}(SnArena *arena, SnHandle *h);");
        let _ = writeln!(p, "extern SnHandle *sn_array2_to_any_{suffix}(SnArena *arena, SnHandle *h);");
        let _ = writeln!(p, "extern SnHandle *sn_array3_to_any_{suffix}(SnArena *arena, SnHandle *h);");
    }

    p.push_str(
        r#"
extern SnHandle *sn_array_create_string(SnArena *arena, size_t count, const char **data);
extern SnHandle *sn_array_alloc_string(SnArena *arena, size_t count, const char *default_value);
extern SnHandle *sn_array_clone_string(SnArena *arena, SnHandle *h);
extern SnHandle *sn_array_concat_string(SnHandle *a, SnHandle *b);
extern SnHandle *sn_array_slice_string(SnHandle *h, long long start, long long end, long long step);
extern SnHandle *sn_array_rev_string(SnHandle *h);
extern SnHandle *sn_array_rem_string(SnHandle *h, long long index);
extern SnHandle *sn_array_ins_string(SnHandle *h, const char *elem, long long index);
extern SnHandle *sn_array_push_string(SnArena *arena, SnHandle *h, const char *elem);
extern SnHandle *sn_array_push_string_handle(SnArena *arena, SnHandle *h, SnHandle *elem);
extern SnHandle *sn_array_push_copy_string(SnHandle *h, const char *elem);
extern SnHandle *sn_array_pop_string(SnHandle *h);
extern long long sn_array_index_of_string(SnHandle *h, const char *elem);
extern bool sn_array_contains_string(SnHandle *h, const char *elem);
extern bool sn_array_eq_string(SnHandle *a, SnHandle *b);
extern SnHandle *sn_array_to_string_string(SnArena *arena, SnHandle *h);
extern SnHandle *sn_array_to_string2_string(SnArena *arena, SnHandle *h);
extern SnHandle *sn_array_to_string3_string(SnArena *arena, SnHandle *h);
extern SnHandle *sn_array_join_string(SnArena *arena, SnHandle *h, const char *sep);
extern SnHandle *sn_array_to_any_string(SnArena *arena, SnHandle *h);
extern SnHandle *sn_array2_to_any_string(SnArena *arena, SnHandle *h);
extern SnHandle *sn_array3_to_any_string(SnArena *arena, SnHandle *h);

extern SnHandle *sn_array_create_handle(SnArena *arena, size_t count, SnHandle *const *data);
extern SnHandle *sn_array_push_handle(SnArena *arena, SnHandle *h, SnHandle *elem);
extern SnHandle *sn_array_pop_handle(SnHandle *h);
extern SnHandle *sn_promote_array_string(SnArena *dest, SnHandle *h);
extern SnHandle *sn_promote_array_handle(SnArena *dest, SnHandle *h);
extern SnHandle *sn_promote_array_handle_3d(SnArena *dest, SnHandle *h);
extern SnHandle *sn_promote_array2_string(SnArena *dest, SnHandle *h);
extern SnHandle *sn_promote_array3_string(SnArena *dest, SnHandle *h);

extern SnHandle *sn_array_create_any(SnArena *arena, size_t count, const SnAny *data);
extern SnHandle *sn_array_push_any(SnArena *arena, SnHandle *h, SnAny elem);
extern SnHandle *sn_array_push_copy_any(SnHandle *h, SnAny elem);
extern SnAny sn_array_pop_any(SnHandle *h);
extern SnHandle *sn_array_to_string_any(SnArena *arena, SnHandle *h);

extern SnAny sn_box_nil(void);
extern SnAny sn_box_int(long long v);
extern SnAny sn_box_long(long long v);
extern SnAny sn_box_int32(int32_t v);
extern SnAny sn_box_uint(uint64_t v);
extern SnAny sn_box_uint32(uint32_t v);
extern SnAny sn_box_double(double v);
extern SnAny sn_box_float(float v);
extern SnAny sn_box_string(SnHandle *h);
extern SnAny sn_box_char(char v);
extern SnAny sn_box_bool(bool v);
extern SnAny sn_box_byte(unsigned char v);
extern SnAny sn_box_array(SnHandle *h, int32_t element_tag);
extern SnAny sn_box_function(SnHandle *h);
extern SnAny sn_box_struct(SnHandle *h, int32_t struct_type_id);
extern long long sn_unbox_int(SnAny v);
extern long long sn_unbox_long(SnAny v);
extern int32_t sn_unbox_int32(SnAny v);
extern uint64_t sn_unbox_uint(SnAny v);
extern uint32_t sn_unbox_uint32(SnAny v);
extern double sn_unbox_double(SnAny v);
extern float sn_unbox_float(SnAny v);
extern SnHandle *sn_unbox_string(SnAny v);
extern char sn_unbox_char(SnAny v);
extern bool sn_unbox_bool(SnAny v);
extern unsigned char sn_unbox_byte(SnAny v);
extern SnHandle *sn_unbox_array(SnAny v);
extern SnHandle *sn_unbox_function(SnAny v);
extern SnHandle *sn_unbox_struct(SnAny v, int32_t expected_type_id);
extern bool sn_any_equals(SnAny a, SnAny b);
extern bool sn_any_same_type(SnAny a, SnAny b);
extern int32_t sn_any_tag(SnAny v);
extern bool sn_any_has_tag(SnAny v, int32_t tag);
extern const char *sn_any_tag_name(int32_t tag);
extern SnHandle *sn_any_to_string(SnArena *arena, SnAny v);
extern SnAny sn_any_promote(SnArena *dest, SnAny v);

extern SnHandle *sn_thread_spawn(SnArena *arena, SnThreadResult (*entry)(unsigned char *), const void *args, size_t args_size);
extern void sn_thread_sync(SnHandle *pending);
extern long long sn_thread_sync_long(SnHandle *pending);
extern double sn_thread_sync_double(SnHandle *pending);
extern SnHandle *sn_thread_sync_handle(SnArena *dest, SnHandle *pending);
extern SnAny sn_thread_sync_any(SnArena *dest, SnHandle *pending);
extern void sn_sync_lock(void *addr);
extern void sn_sync_unlock(void *addr);

"#,
    );
    p
}
