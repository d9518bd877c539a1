//! Trap classification, attribution and diagnostic rendering.
//!
//! Every abnormal condition, whether detected by the dispatch loop or by native runtime code,
//! becomes a [`Trap`] built through a [`RuntimeContext`]. The context renders the diagnostic line
//! synchronously when the trap is raised; the trap value then propagates to the embedder, which
//! terminates the program with [`Trap::exit_status`].

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::debug;
use viper_il::SourceLoc;

/// Fault categories.
///
/// The set is open: native libraries refine a kind with [`Trap::code`] rather than adding
/// variants, and matching code must keep a wildcard arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TrapKind {
    DivideByZero,
    /// Checked arithmetic, narrowing casts and stack-budget violations.
    Overflow,
    InvalidCast,
    /// Invalid call targets, numeric domain errors and unknown runtime helpers.
    DomainError,
    Bounds,
    FileNotFound,
    Eof,
    IoError,
    InvalidOperation,
    RuntimeError,
    NullPointer,
    NetworkError,
    DiskFull,
    ResourceExhausted,
}

impl TrapKind {
    /// The stable name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            TrapKind::DivideByZero => "DivideByZero",
            TrapKind::Overflow => "Overflow",
            TrapKind::InvalidCast => "InvalidCast",
            TrapKind::DomainError => "DomainError",
            TrapKind::Bounds => "Bounds",
            TrapKind::FileNotFound => "FileNotFound",
            TrapKind::Eof => "EOF",
            TrapKind::IoError => "IOError",
            TrapKind::InvalidOperation => "InvalidOperation",
            TrapKind::RuntimeError => "RuntimeError",
            TrapKind::NullPointer => "NullPointer",
            TrapKind::NetworkError => "NetworkError",
            TrapKind::DiskFull => "DiskFull",
            TrapKind::ResourceExhausted => "ResourceExhausted",
        }
    }

    /// Process exit status for a program terminated by this kind. Always non-zero.
    pub const fn exit_status(self) -> i32 {
        self as i32 + 1
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a trap happened. Missing fields render as sentinels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrapSite {
    pub function: Option<String>,
    pub block: Option<String>,
    pub ip: Option<usize>,
    pub loc: Option<SourceLoc>,
}

impl TrapSite {
    /// A site with no attribution at all.
    pub const UNKNOWN: TrapSite = TrapSite {
        function: None,
        block: None,
        ip: None,
        loc: None,
    };

    pub fn new(
        function: impl Into<String>,
        block: impl Into<String>,
        ip: usize,
        loc: SourceLoc,
    ) -> Self {
        Self {
            function: Some(function.into()),
            block: Some(block.into()),
            ip: Some(ip),
            loc: loc.is_known().then_some(loc),
        }
    }

    pub fn line(&self) -> i64 {
        self.loc.map_or(-1, |loc| i64::from(loc.line))
    }
}

/// A fatal, attributed fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trap {
    pub kind: TrapKind,
    /// Machine-readable code; `0` unless the raising library assigns one.
    pub code: i32,
    pub message: String,
    pub site: TrapSite,
}

impl Trap {
    pub fn exit_status(&self) -> i32 {
        self.kind.exit_status()
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNKNOWN: &str = "<unknown>";
        write!(
            f,
            "Trap @{}:{}#",
            self.site.function.as_deref().unwrap_or(UNKNOWN),
            self.site.block.as_deref().unwrap_or(UNKNOWN),
        )?;
        match self.site.ip {
            Some(ip) => write!(f, "{ip}")?,
            None => f.write_str("?")?,
        }
        write!(
            f,
            " line {}: {} (code={})",
            self.site.line(),
            self.kind,
            self.code
        )?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Trap {}

/// Destination for rendered trap lines.
///
/// Implementations must have written (and flushed) the line by the time `emit` returns.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes diagnostics to the process's stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&self, line: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{line}");
        let _ = err.flush();
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.lines.lock().last().cloned()
    }
}

impl DiagnosticSink for BufferSink {
    fn emit(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Trap-raising entry point shared by the dispatch loop and native code.
///
/// Holds the attribution of the native call currently in progress, if any. A trap raised
/// without metadata uses that call site once and clears it; with no call in progress it is
/// attributed to the unknown sentinel. A trap raised with full metadata also clears it, so a
/// site never outlives the trap that consumed it. Call sites are tracked per thread, so VMs
/// on different threads can share one context.
pub struct RuntimeContext {
    call_sites: Mutex<HashMap<ThreadId, TrapSite>>,
    sink: Arc<dyn DiagnosticSink>,
    raised: AtomicU64,
}

impl RuntimeContext {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            call_sites: Mutex::new(HashMap::new()),
            sink,
            raised: AtomicU64::new(0),
        }
    }

    /// A context rendering to stderr.
    pub fn stderr() -> Self {
        Self::new(Arc::new(StderrSink))
    }

    /// Raises a trap attributed to `site`.
    pub fn trap_at(&self, kind: TrapKind, message: impl Into<String>, site: TrapSite) -> Trap {
        self.raise(kind, 0, message.into(), Some(site))
    }

    /// Raises a trap with no IL metadata.
    pub fn trap(&self, kind: TrapKind, message: impl Into<String>) -> Trap {
        self.raise(kind, 0, message.into(), None)
    }

    /// Raises a trap carrying a library-defined error code.
    pub fn trap_with_code(&self, kind: TrapKind, code: i32, message: impl Into<String>) -> Trap {
        self.raise(kind, code, message.into(), None)
    }

    /// Builds, renders and returns a trap record.
    pub fn raise(
        &self,
        kind: TrapKind,
        code: i32,
        message: String,
        site: Option<TrapSite>,
    ) -> Trap {
        let pending = self.call_sites.lock().remove(&thread::current().id());
        let site = site.or(pending).unwrap_or(TrapSite::UNKNOWN);
        let trap = Trap {
            kind,
            code,
            message,
            site,
        };
        self.raised.fetch_add(1, Ordering::Relaxed);
        debug!(kind = kind.name(), code, message = %trap.message, "trap raised");
        self.sink.emit(&trap.to_string());
        trap
    }

    /// Writes a non-trap notice, such as a breakpoint hit, to the diagnostic sink.
    pub fn notify(&self, line: &str) {
        self.sink.emit(line);
    }

    /// Number of traps raised through this context.
    pub fn traps_raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }

    pub(crate) fn enter_call(&self, site: TrapSite) {
        self.call_sites.lock().insert(thread::current().id(), site);
    }

    pub(crate) fn leave_call(&self) {
        self.call_sites.lock().remove(&thread::current().id());
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("pending_call_sites", &self.call_sites.lock().len())
            .field("raised", &self.traps_raised())
            .finish_non_exhaustive()
    }
}
