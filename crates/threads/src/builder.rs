//! # Thread Builder
//!
//! Provides a fluent API for configuring a thread before it starts
//! listening.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::abort::AbortSignal;
use crate::function::Function;
use crate::functions::FunctionStrategy;
use crate::functions::ManualFunctions;
use crate::serialization::Serialization;
use crate::serialization::StructuredCloneSerialization;
use crate::thread::Thread;
use crate::thread::ThreadInner;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// `build` was called outside a Tokio runtime.
    NoRuntime,
    /// An export or import was given an empty name.
    EmptyName,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRuntime => write!(f, "A thread must be built inside a Tokio runtime"),
            Self::EmptyName => write!(f, "Export and import names must not be empty"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Fluent builder for a [`Thread`].
///
/// Defaults: structured-clone serialization, manual function memory, no
/// import list, no exports.
pub struct ThreadBuilder {
    transport: Arc<dyn Transport>,
    name: Option<String>,
    exports: HashMap<String, Function>,
    imports: Option<HashSet<String>>,
    serialization: Option<Arc<dyn Serialization>>,
    functions: Option<Arc<dyn FunctionStrategy>>,
    signal: Option<AbortSignal>,
}

impl ThreadBuilder {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            name: None,
            exports: HashMap::new(),
            imports: None,
            serialization: None,
            functions: None,
            signal: None,
        }
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn export(mut self, name: impl Into<String>, function: Function) -> Self {
        self.exports.insert(name.into(), function);
        self
    }

    pub fn exports<I, K>(mut self, exports: I) -> Self
    where
        I: IntoIterator<Item = (K, Function)>,
        K: Into<String>,
    {
        self.exports
            .extend(exports.into_iter().map(|(name, function)| (name.into(), function)));
        self
    }

    /// Restricts the callable imports to `names`.
    pub fn imports<I, K>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.imports = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn serialization(mut self, serialization: Arc<dyn Serialization>) -> Self {
        self.serialization = Some(serialization);
        self
    }

    pub fn functions(mut self, functions: Arc<dyn FunctionStrategy>) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Closes the thread when `signal` aborts.
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Starts the thread.
    pub fn build(self) -> Result<Thread> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::NoRuntime);
        }
        let empty_import = self
            .imports
            .as_ref()
            .is_some_and(|names| names.iter().any(String::is_empty));
        if empty_import || self.exports.keys().any(String::is_empty) {
            return Err(Error::EmptyName);
        }

        let inner = ThreadInner::new(
            self.name.unwrap_or_else(|| "thread".to_string()),
            self.exports,
            self.imports,
            self.serialization
                .unwrap_or_else(|| Arc::new(StructuredCloneSerialization::new())),
            self.functions.unwrap_or_else(|| Arc::new(ManualFunctions::new())),
        );
        Ok(Thread::spawn(inner, self.transport, self.signal))
    }
}
