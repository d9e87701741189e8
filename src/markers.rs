//! Marker state machine
//!
//! Consumes decoded DUT lines one at a time, numbers them, recognises the
//! sentinel markers and tracks the lines at which an instrument poll is due.
//! It performs no I/O itself: [`MarkerMachine::advance`] returns a [`Step`]
//! telling the session what the line means, and the session does the rest.
//!
//! Numbering starts before the first line, so the first line is index 0.
//! Markers match the whole trimmed line, case-sensitively.

use crate::config::{MarkerSettings, TriggerPolicy};
use std::collections::BTreeSet;
use std::fmt;

/// Sentinel lines the DUT prints at phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// DUT finished its setup; measure a few lines later
    SetupComplete,
    /// VI-curve test about to start; cycle the load and measure next line
    Countdown,
    /// End of the test; the session terminates
    TestComplete,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::SetupComplete => f.write_str("setup-complete"),
            Marker::Countdown => f.write_str("countdown"),
            Marker::TestComplete => f.write_str("test-complete"),
        }
    }
}

/// Why a poll was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKind {
    /// Measurement window after setup
    PostSetup,
    /// Measurement window after the VI-curve countdown
    ViCurve,
}

/// A poll due at a given line index. Ordered by line, then kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingTrigger {
    /// Line index at which the poll becomes due
    pub line: u64,
    /// What armed it
    pub kind: TriggerKind,
}

/// What one line means to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Index of the line
    pub index: u64,
    /// Marker the line matched, if any
    pub marker: Option<Marker>,
    /// Triggers satisfied on this line
    pub due: Vec<TriggerKind>,
}

impl Step {
    /// Whether the line needs a poll. One poll serves every due trigger.
    pub fn poll_due(&self) -> bool {
        !self.due.is_empty()
    }
}

/// Line counter plus the pending trigger table.
#[derive(Debug, Clone)]
pub struct MarkerMachine {
    counter: Option<u64>,
    // A repeated marker adds an entry; earlier entries stay until serviced.
    pending: BTreeSet<PendingTrigger>,
    settings: MarkerSettings,
    terminated: bool,
}

impl MarkerMachine {
    /// Create a machine with no lines seen.
    ///
    /// Configured marker texts are trimmed, as every line is.
    pub fn new(settings: &MarkerSettings) -> Self {
        let mut settings = settings.clone();
        for text in [
            &mut settings.setup_complete,
            &mut settings.countdown,
            &mut settings.test_complete,
        ] {
            *text = text.trim().to_string();
        }
        Self {
            counter: None,
            pending: BTreeSet::new(),
            settings,
            terminated: false,
        }
    }

    /// Which marker, if any, a trimmed line is.
    pub fn classify(&self, line: &str) -> Option<Marker> {
        let line = line.trim();
        if line == self.settings.setup_complete {
            Some(Marker::SetupComplete)
        } else if line == self.settings.countdown {
            Some(Marker::Countdown)
        } else if line == self.settings.test_complete {
            Some(Marker::TestComplete)
        } else {
            None
        }
    }

    /// Consume one non-empty line.
    pub fn advance(&mut self, line: &str) -> Step {
        let index = self.counter.map_or(0, |c| c + 1);
        self.counter = Some(index);

        let marker = self.classify(line);
        match marker {
            Some(Marker::SetupComplete) => {
                self.arm(TriggerKind::PostSetup, index + self.settings.setup_offset)
            }
            Some(Marker::Countdown) => {
                self.arm(TriggerKind::ViCurve, index + self.settings.vi_curve_offset)
            }
            Some(Marker::TestComplete) => {
                self.terminated = true;
                return Step {
                    index,
                    marker,
                    due: Vec::new(),
                };
            }
            None => {}
        }

        let mut due: Vec<TriggerKind> = self
            .pending
            .iter()
            .filter(|trigger| trigger.line <= index)
            .map(|trigger| trigger.kind)
            .collect();
        due.sort_unstable();
        due.dedup();
        if self.settings.policy == TriggerPolicy::OneShot {
            self.pending.retain(|trigger| trigger.line > index);
        }

        Step { index, marker, due }
    }

    fn arm(&mut self, kind: TriggerKind, line: u64) {
        if self.pending.insert(PendingTrigger { line, kind }) {
            tracing::debug!(?kind, line, "Trigger armed");
        }
    }

    /// Index of the last line consumed, `None` before the first.
    pub fn counter(&self) -> Option<u64> {
        self.counter
    }

    /// Triggers still waiting, ordered by line.
    pub fn pending(&self) -> Vec<PendingTrigger> {
        self.pending.iter().copied().collect()
    }

    /// Whether the terminal marker has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> MarkerMachine {
        MarkerMachine::new(&MarkerSettings::default())
    }

    fn run(machine: &mut MarkerMachine, lines: &[&str]) -> Vec<Step> {
        lines.iter().map(|l| machine.advance(l)).collect()
    }

    #[test]
    fn first_line_is_index_zero() {
        let mut m = machine();
        assert_eq!(m.counter(), None);
        assert_eq!(m.advance("boot").index, 0);
        assert_eq!(m.advance("boot").index, 1);
    }

    #[test]
    fn setup_marker_polls_k_lines_later() {
        let mut m = machine();
        let steps = run(&mut m, &["SETUP COMPLETE !!", "x", "y", "z"]);

        assert_eq!(steps[0].marker, Some(Marker::SetupComplete));
        assert!(!steps[0].poll_due());
        assert!(!steps[1].poll_due());
        assert_eq!(steps[2].due, vec![TriggerKind::PostSetup]);
        assert!(!steps[3].poll_due());
        assert!(m.pending().is_empty());
    }

    #[test]
    fn countdown_polls_next_line() {
        let mut m = machine();
        let steps = run(&mut m, &["The test will initiate in 5 seconds", "0.10,0.5"]);

        assert_eq!(steps[0].marker, Some(Marker::Countdown));
        assert_eq!(steps[1].due, vec![TriggerKind::ViCurve]);
        assert!(m.pending().is_empty());
    }

    #[test]
    fn coinciding_triggers_share_one_step() {
        let mut m = machine();
        // Setup at 0 is due at 2; countdown at 1 is due at 2 as well.
        let steps = run(
            &mut m,
            &["SETUP COMPLETE !!", "The test will initiate in 5 seconds", "v"],
        );
        assert_eq!(
            steps[2].due,
            vec![TriggerKind::PostSetup, TriggerKind::ViCurve]
        );
        assert!(steps[2].poll_due());
    }

    #[test]
    fn continuous_policy_keeps_firing() {
        let settings = MarkerSettings {
            policy: TriggerPolicy::Continuous,
            ..MarkerSettings::default()
        };
        let mut m = MarkerMachine::new(&settings);
        let steps = run(&mut m, &["SETUP COMPLETE !!", "a", "b", "c", "d"]);

        let polled: Vec<bool> = steps.iter().map(Step::poll_due).collect();
        assert_eq!(polled, vec![false, false, true, true, true]);
    }

    #[test]
    fn repeated_marker_keeps_earlier_window() {
        let mut m = machine();
        let steps = run(&mut m, &["SETUP COMPLETE !!", "a", "SETUP COMPLETE !!", "b", "c"]);

        // The first window is still due on the second marker's own line.
        assert_eq!(steps[2].marker, Some(Marker::SetupComplete));
        assert_eq!(steps[2].due, vec![TriggerKind::PostSetup]);
        assert!(!steps[3].poll_due());
        assert_eq!(steps[4].due, vec![TriggerKind::PostSetup]);
        assert!(m.pending().is_empty());
    }

    #[test]
    fn back_to_back_markers_poll_both_windows() {
        let mut m = machine();
        let steps = run(&mut m, &["SETUP COMPLETE !!", "SETUP COMPLETE !!", "a", "b"]);

        assert!(steps[2].poll_due());
        assert!(steps[3].poll_due());
        assert!(m.pending().is_empty());
    }

    #[test]
    fn padded_marker_settings_still_match() {
        let settings = MarkerSettings {
            test_complete: " Test Complete ".to_string(),
            ..MarkerSettings::default()
        };
        let m = MarkerMachine::new(&settings);
        assert_eq!(m.classify("Test Complete"), Some(Marker::TestComplete));
    }

    #[test]
    fn terminal_marker_evaluates_no_trigger() {
        let mut m = machine();
        let steps = run(&mut m, &["SETUP COMPLETE !!", "a", "Test Complete"]);

        assert_eq!(steps[2].marker, Some(Marker::TestComplete));
        assert!(steps[2].due.is_empty());
        assert!(m.is_terminated());
        assert_eq!(m.pending().len(), 1);
    }

    #[test]
    fn markers_are_exact_and_case_sensitive() {
        let m = machine();
        assert_eq!(m.classify("  Test Complete \r"), Some(Marker::TestComplete));
        assert_eq!(m.classify("test complete"), None);
        assert_eq!(m.classify("Test Complete!"), None);
        assert_eq!(m.classify(">> SETUP COMPLETE !!"), None);
    }
}
