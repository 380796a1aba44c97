//! Import resolution.
//!
//! Walks the import graph from the entry module, loading each file once,
//! rejecting cycles, and attaching the parsed statements to the import
//! nodes. Paths are absolutized so the same module reached through
//! different relative spellings is deduplicated. Parsing itself is
//! injected: the parser crate sits above this one.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::info;
use path_absolutize::Absolutize;

use crate::arena::CompileArena;
use crate::ast::{Module, Stmt, StmtKind};
use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;

/// Parses one source text into a module.
pub type ParseFn<'p, 'arena> =
    &'p dyn Fn(&CompileArena<'arena>, &str) -> Result<Module<'arena>>;

pub struct Resolver<'c, 'arena> {
    arena: &'c CompileArena<'arena>,
    loaded: HashMap<PathBuf, &'arena [&'arena Stmt<'arena>]>,
    in_progress: HashSet<PathBuf>,
}

impl<'c, 'arena> Resolver<'c, 'arena> {
    pub fn new(arena: &'c CompileArena<'arena>) -> Self {
        Resolver {
            arena,
            loaded: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Resolves every import reachable from `module`, relative to
    /// `base_dir`.
    pub fn resolve(
        &mut self,
        module: &Module<'arena>,
        base_dir: &Path,
        parse: ParseFn<'_, 'arena>,
    ) -> Result<()> {
        self.resolve_stmts(module.stmts, base_dir, parse)
    }

    fn resolve_stmts(
        &mut self,
        stmts: &'arena [&'arena Stmt<'arena>],
        base_dir: &Path,
        parse: ParseFn<'_, 'arena>,
    ) -> Result<()> {
        for stmt in stmts {
            let StmtKind::Import(import) = &stmt.kind else {
                continue;
            };
            let raw = Path::new(import.path);
            let abs: PathBuf = if raw.is_absolute() {
                raw.to_path_buf()
            } else {
                base_dir
                    .join(raw)
                    .absolutize()
                    .map_err(|e| import_error(import.path, &e.to_string(), stmt.loc))?
                    .into_owned()
            };

            if let Some(&loaded) = self.loaded.get(&abs) {
                import.module.set(Some(loaded));
                self.attach_canonical(import, &abs);
                continue;
            }
            if self.in_progress.contains(&abs) {
                return Err(import_error(import.path, "import cycle", stmt.loc));
            }

            info!("loading module {}", abs.display());
            let source = std::fs::read_to_string(&abs)
                .map_err(|e| import_error(import.path, &e.to_string(), stmt.loc))?;
            let parsed = parse(self.arena, &source)?;

            self.in_progress.insert(abs.clone());
            let next_base = abs.parent().map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf);
            self.resolve_stmts(parsed.stmts, &next_base, parse)?;
            self.in_progress.remove(&abs);

            self.loaded.insert(abs.clone(), parsed.stmts);
            import.module.set(Some(parsed.stmts));
            self.attach_canonical(import, &abs);
        }
        Ok(())
    }

    fn attach_canonical(&self, import: &crate::ast::ImportStmt<'arena>, abs: &Path) {
        if import.canonical.get().is_some() {
            return;
        }
        if let Some(stem) = abs.file_stem().and_then(|s| s.to_str()) {
            import.canonical.set(Some(self.arena.store_name(stem)));
        }
    }
}

fn import_error(path: &str, why: &str, loc: Location) -> Error {
    Error::new(ErrorKind::Import(path.to_owned(), why.to_owned()), loc)
}
