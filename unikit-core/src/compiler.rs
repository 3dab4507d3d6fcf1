use crate::error::{EntityKind, Result, UnikitError};
use crate::types::RawImage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CompileParams {
    pub sources_dir: PathBuf,
    /// Extra arguments forwarded to the build job.
    pub args: Vec<String>,
    pub no_cleanup: bool,
}

/// Turns a source tree with a manifest into a `RawImage`.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, params: &CompileParams) -> Result<RawImage>;
}

/// Identifies a compiler by unikernel base, language runtime and target backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompilerKey {
    pub base: String,
    pub language: String,
    pub target: String,
}

impl CompilerKey {
    pub fn new(
        base: impl Into<String>,
        language: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            language: language.into(),
            target: target.into(),
        }
    }
}

impl std::fmt::Display for CompilerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.base, self.language, self.target)
    }
}

#[derive(Clone, Default)]
pub struct Compilers {
    compilers: HashMap<CompilerKey, Arc<dyn Compiler>>,
}

impl Compilers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: CompilerKey, compiler: Arc<dyn Compiler>) {
        self.compilers.insert(key, compiler);
    }

    pub fn get(&self, key: &CompilerKey) -> Result<Arc<dyn Compiler>> {
        self.compilers.get(key).cloned().ok_or_else(|| {
            UnikitError::InvalidInput(format!(
                "no {} registered for {key}",
                EntityKind::Compiler
            ))
        })
    }

    pub fn keys(&self) -> Vec<CompilerKey> {
        let mut keys: Vec<CompilerKey> = self.compilers.keys().cloned().collect();
        keys.sort();
        keys
    }
}
