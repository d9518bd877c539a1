use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::debug::DebugCtrl;
use crate::frame::DEFAULT_STACK_BYTES;

/// Environment variable selecting the dispatch strategy.
pub const DISPATCH_ENV: &str = "VIPER_DISPATCH";

/// Default limit on nested IL calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 4096;

/// Instruction dispatch strategy. Both are observably identical.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    /// Branch on the opcode tag for every instruction.
    #[default]
    Switch,
    /// Dispatch through per-block handler tables built on first entry.
    Threaded,
}

impl DispatchKind {
    /// Whether this build can run threaded dispatch.
    pub const fn threaded_supported() -> bool {
        cfg!(feature = "threaded-dispatch")
    }

    /// Reads [`DISPATCH_ENV`]. Absent or unrecognized values select [`DispatchKind::Switch`].
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(DISPATCH_ENV).ok().as_deref())
    }

    /// Interprets a raw [`DISPATCH_ENV`] value the way [`DispatchKind::from_env`] does.
    pub fn from_env_value(raw: Option<&str>) -> Self {
        match raw {
            Some(raw) => raw.parse().unwrap_or_else(|err: ConfigError| {
                warn!(%err, var = DISPATCH_ENV, "ignoring invalid dispatch setting");
                DispatchKind::Switch
            }),
            None => DispatchKind::Switch,
        }
    }

    /// The strategy that will actually run in this build.
    pub fn effective(self) -> Self {
        match self {
            DispatchKind::Threaded if !Self::threaded_supported() => DispatchKind::Switch,
            other => other,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DispatchKind::Switch => "switch",
            DispatchKind::Threaded => "threaded",
        }
    }
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DispatchKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "switch" => Ok(DispatchKind::Switch),
            "threaded" => Ok(DispatchKind::Threaded),
            _ => Err(ConfigError::UnknownDispatch {
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown dispatch strategy `{value}` (expected `switch` or `threaded`)")]
    UnknownDispatch { value: String },
    #[error("call depth limit must be at least 1")]
    ZeroCallDepth,
}

/// Per-run VM configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub dispatch: DispatchKind,
    /// Per-frame `alloca` budget in bytes; `0` selects [`DEFAULT_STACK_BYTES`].
    pub stack_bytes: usize,
    /// Traps with `RuntimeError` once this many instructions have executed.
    pub max_steps: Option<u64>,
    pub max_call_depth: usize,
    pub debug: DebugCtrl,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchKind::Switch,
            stack_bytes: 0,
            max_steps: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            debug: DebugCtrl::default(),
        }
    }
}

impl RunConfig {
    /// Defaults, with the dispatch strategy taken from the environment.
    pub fn from_env() -> Self {
        Self {
            dispatch: DispatchKind::from_env(),
            ..Self::default()
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchKind) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_stack_bytes(mut self, bytes: usize) -> Self {
        self.stack_bytes = bytes;
        self
    }

    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Result<Self, ConfigError> {
        if depth == 0 {
            return Err(ConfigError::ZeroCallDepth);
        }
        self.max_call_depth = depth;
        Ok(self)
    }

    pub fn with_debug(mut self, debug: DebugCtrl) -> Self {
        self.debug = debug;
        self
    }

    /// The byte budget applied to every frame of the run.
    pub fn frame_stack_bytes(&self) -> usize {
        match self.stack_bytes {
            0 => DEFAULT_STACK_BYTES,
            n => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dispatch_names() {
        assert_eq!("switch".parse(), Ok(DispatchKind::Switch));
        assert_eq!(" Threaded ".parse(), Ok(DispatchKind::Threaded));
        assert!(matches!(
            "computed-goto".parse::<DispatchKind>(),
            Err(ConfigError::UnknownDispatch { .. })
        ));
    }

    #[test]
    fn zero_stack_bytes_means_default() {
        assert_eq!(RunConfig::default().frame_stack_bytes(), 64 * 1024);
        assert_eq!(
            RunConfig::default()
                .with_stack_bytes(2 * 1024 * 1024)
                .frame_stack_bytes(),
            2 * 1024 * 1024
        );
    }

    #[test]
    fn effective_dispatch_follows_build_capability() {
        let expected = if DispatchKind::threaded_supported() {
            DispatchKind::Threaded
        } else {
            DispatchKind::Switch
        };
        assert_eq!(DispatchKind::Threaded.effective(), expected);
        assert_eq!(DispatchKind::Switch.effective(), DispatchKind::Switch);
    }

    #[test]
    fn env_value_selects_dispatch() {
        assert_eq!(DispatchKind::from_env_value(None), DispatchKind::Switch);
        assert_eq!(DispatchKind::from_env_value(Some("bogus")), DispatchKind::Switch);
        assert_eq!(DispatchKind::from_env_value(Some("THREADED")), DispatchKind::Threaded);
    }

    #[test]
    fn call_depth_must_be_positive() {
        assert_eq!(
            RunConfig::default().with_max_call_depth(0),
            Err(ConfigError::ZeroCallDepth)
        );
    }
}
