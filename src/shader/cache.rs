//! Memoised shader programs.

use std::{collections::HashMap, sync::Arc};

use crate::{error::ShaderCompileError, shader::ShaderSignature};

/// Turns a signature into a program object.
///
/// The GPU implementation lives in [`pipelines`](crate::pipelines); tests plug
/// in counting or failing compilers.
pub trait ProgramCompiler {
    type Program;

    fn compile(&mut self, signature: &ShaderSignature) -> Result<Self::Program, ShaderCompileError>;
}

/// Caches one program per distinct [`ShaderSignature`].
///
/// A failed compilation leaves the cache untouched, so the same signature is
/// retried on its next request.
pub struct ShaderCache<C: ProgramCompiler> {
    compiler: C,
    programs: HashMap<ShaderSignature, Arc<C::Program>>,
    compiles: usize,
}

impl<C: ProgramCompiler> ShaderCache<C> {
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            programs: HashMap::new(),
            compiles: 0,
        }
    }

    /// Returns the program for `signature`, compiling it on first use.
    pub fn get_or_compile(
        &mut self,
        signature: &ShaderSignature,
    ) -> Result<Arc<C::Program>, ShaderCompileError> {
        if let Some(program) = self.programs.get(signature) {
            return Ok(program.clone());
        }
        self.compiles += 1;
        let program = Arc::new(self.compiler.compile(signature)?);
        log::debug!("compiled shader variant {} ({signature:?})", self.programs.len());
        self.programs.insert(*signature, program.clone());
        Ok(program)
    }

    pub fn get(&self, signature: &ShaderSignature) -> Option<Arc<C::Program>> {
        self.programs.get(signature).cloned()
    }

    pub fn contains(&self, signature: &ShaderSignature) -> bool {
        self.programs.contains_key(signature)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Number of compilations attempted, successful or not.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }

    /// Drops every cached program.
    pub fn clear(&mut self) {
        self.programs.clear();
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn compiler_mut(&mut self) -> &mut C {
        &mut self.compiler
    }
}
