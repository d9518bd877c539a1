use std::collections::BTreeSet;
use std::fmt;

use viper_il::SourceLoc;

/// Exit status of a run that stopped at a breakpoint.
pub const PAUSE_STATUS: i64 = 10;

/// Breakpoints checked by the run loop before each instruction.
///
/// A hit stops the run: the VM writes a `[BREAK]` line to the diagnostic sink, records a
/// [`BreakEvent`] and returns [`PAUSE_STATUS`] from the entry function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugCtrl {
    labels: BTreeSet<String>,
    lines: BTreeSet<u32>,
    step_budget: Option<u64>,
}

impl DebugCtrl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaks on entry to any block named `label`.
    pub fn break_at_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Breaks before any instruction attributed to source `line`.
    pub fn break_at_line(mut self, line: u32) -> Self {
        self.lines.insert(line);
        self
    }

    /// Breaks once `steps` instructions have executed.
    pub fn with_step_budget(mut self, steps: u64) -> Self {
        self.step_budget = Some(steps);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.lines.is_empty() && self.step_budget.is_none()
    }

    pub fn breaks_at_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Line 0 marks an instruction without a location and never matches.
    pub fn breaks_at_line(&self, loc: SourceLoc) -> bool {
        loc.line != 0 && self.lines.contains(&loc.line)
    }

    pub fn step_budget(&self) -> Option<u64> {
        self.step_budget
    }
}

/// Why a run paused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakReason {
    Label,
    Line(u32),
    Step,
}

/// Where a run paused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakEvent {
    pub function: String,
    pub block: String,
    pub ip: usize,
    pub reason: BreakReason,
}

impl fmt::Display for BreakEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[BREAK] fn=@{} blk={}", self.function, self.block)?;
        match self.reason {
            BreakReason::Label => f.write_str(" reason=label"),
            BreakReason::Step => f.write_str(" reason=step"),
            BreakReason::Line(line) => write!(f, " reason=line line={line} ip=#{}", self.ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocated_instructions_never_hit_line_breaks() {
        let ctrl = DebugCtrl::new().break_at_line(0).break_at_line(7);
        assert!(!ctrl.breaks_at_line(SourceLoc::UNKNOWN));
        assert!(ctrl.breaks_at_line(SourceLoc::line(7)));
        assert!(!ctrl.breaks_at_line(SourceLoc::line(8)));
    }

    #[test]
    fn break_lines_render_like_the_debugger() {
        let event = BreakEvent {
            function: "main".into(),
            block: "loop".into(),
            ip: 2,
            reason: BreakReason::Line(7),
        };
        assert_eq!(event.to_string(), "[BREAK] fn=@main blk=loop reason=line line=7 ip=#2");
        let step = BreakEvent {
            reason: BreakReason::Step,
            ..event
        };
        assert_eq!(step.to_string(), "[BREAK] fn=@main blk=loop reason=step");
    }

    #[test]
    fn empty_by_default() {
        assert!(DebugCtrl::default().is_empty());
        assert!(!DebugCtrl::new().with_step_budget(3).is_empty());
    }
}
