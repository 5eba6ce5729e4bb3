//! # Drive events
//!
//! The drive manager never writes to a global sink. Everything it wants to report is passed as a
//! [`DriveEvent`] to an injected [`EventSink`], which may log it, archive it, keep it in memory or
//! any combination of those.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Display;

use log::Level;
use serde::Serialize;
use util::{
    archive::{ArchiveError, Archiver},
    session::Session,
};

use crate::{diverge::DivergenceFlags, score::RunScore, triage::DiagnosticHypothesis, veh::InstanceId};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Receiver of drive events.
pub trait EventSink {
    /// Handle an event raised at the given episode time.
    fn emit(&mut self, time_s: f64, event: DriveEvent);
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DriveEvent {
    /// One calibration grid point has been measured.
    CalibrationPoint {
        throttle: f64,
        steer: f64,
        offset_x: f64,
        offset_y: f64,
        heading_change_rad: f64,
    },

    CalibrationComplete {
        entries: usize,
    },

    TargetRunStarted {
        instance: InstanceId,
    },

    TargetRunCaptured {
        runtime_s: f64,
        samples: usize,
    },

    /// The target shadow never reached the goal, so no record was captured.
    TargetRunMissed {
        samples: usize,
    },

    PredictionStarted {
        instance: InstanceId,
        horizon_ticks: usize,
    },

    PredictionResolved {
        samples: usize,
    },

    /// Where the live vehicle ended up relative to the end of the previous prediction.
    ProgressChecked {
        distance: f64,
        normalised: f64,
        on_track: bool,
    },

    DivergenceDetected {
        tick: usize,
        flags: DivergenceFlags,
    },

    SearchStarted {
        hypothesis: DiagnosticHypothesis,
        num_trials: usize,
    },

    TrialStarted {
        index: usize,
        throttle_delta: f64,
        steer_delta: f64,
        seeded: bool,
    },

    TrialScored {
        index: usize,
        cost: f64,
        reached_goal: bool,
    },

    CorrectionApplied {
        throttle_adjust: f64,
        steer_adjust: f64,
        cost: f64,
    },

    GoalReached {
        runtime_s: f64,
    },

    RunScored(RunScore),

    ScoreSkipped {
        reason: String,
    },

    EpisodeTimedOut {
        elapsed_s: f64,
    },

    /// A lifecycle step could not be completed and was skipped.
    SoftFailure {
        context: String,
        reason: String,
    },

    /// A request was ignored because it would have overlapped work already in progress.
    RequestIgnored {
        request: String,
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Forwards events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

/// Appends events to the `events.csv` session archive.
pub struct ArchiveSink {
    arch: Archiver,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Vec<(f64, DriveEvent)>,
}

/// Forwards every event to each of a set of sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

#[derive(Serialize)]
struct EventRecord {
    time_s: f64,
    kind: &'static str,
    detail: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveEvent {
    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DriveEvent::CalibrationPoint { .. } => "CalibrationPoint",
            DriveEvent::CalibrationComplete { .. } => "CalibrationComplete",
            DriveEvent::TargetRunStarted { .. } => "TargetRunStarted",
            DriveEvent::TargetRunCaptured { .. } => "TargetRunCaptured",
            DriveEvent::TargetRunMissed { .. } => "TargetRunMissed",
            DriveEvent::PredictionStarted { .. } => "PredictionStarted",
            DriveEvent::PredictionResolved { .. } => "PredictionResolved",
            DriveEvent::ProgressChecked { .. } => "ProgressChecked",
            DriveEvent::DivergenceDetected { .. } => "DivergenceDetected",
            DriveEvent::SearchStarted { .. } => "SearchStarted",
            DriveEvent::TrialStarted { .. } => "TrialStarted",
            DriveEvent::TrialScored { .. } => "TrialScored",
            DriveEvent::CorrectionApplied { .. } => "CorrectionApplied",
            DriveEvent::GoalReached { .. } => "GoalReached",
            DriveEvent::RunScored(_) => "RunScored",
            DriveEvent::ScoreSkipped { .. } => "ScoreSkipped",
            DriveEvent::EpisodeTimedOut { .. } => "EpisodeTimedOut",
            DriveEvent::SoftFailure { .. } => "SoftFailure",
            DriveEvent::RequestIgnored { .. } => "RequestIgnored",
        }
    }

    /// Log level the event is reported at.
    pub fn level(&self) -> Level {
        match self {
            DriveEvent::SoftFailure { .. }
            | DriveEvent::TargetRunMissed { .. }
            | DriveEvent::ScoreSkipped { .. }
            | DriveEvent::EpisodeTimedOut { .. } => Level::Warn,
            DriveEvent::CalibrationPoint { .. }
            | DriveEvent::PredictionStarted { .. }
            | DriveEvent::PredictionResolved { .. }
            | DriveEvent::ProgressChecked { .. }
            | DriveEvent::TrialStarted { .. }
            | DriveEvent::TrialScored { .. }
            | DriveEvent::RequestIgnored { .. } => Level::Debug,
            _ => Level::Info,
        }
    }
}

impl Display for DriveEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveEvent::CalibrationPoint {
                throttle,
                steer,
                offset_x,
                offset_y,
                heading_change_rad,
            } => write!(
                f,
                "Calibrated ({:.2}, {:.2}): offset ({:.1}, {:.1}), heading change {:.3} rad",
                throttle, steer, offset_x, offset_y, heading_change_rad
            ),
            DriveEvent::CalibrationComplete { entries } => {
                write!(f, "Control map built with {} entries", entries)
            }
            DriveEvent::TargetRunStarted { instance } => {
                write!(f, "Target run started on {}", instance)
            }
            DriveEvent::TargetRunCaptured { runtime_s, samples } => write!(
                f,
                "Target run reached the goal in {:.2} s ({} samples)",
                runtime_s, samples
            ),
            DriveEvent::TargetRunMissed { samples } => write!(
                f,
                "Target run did not reach the goal after {} samples, no record captured",
                samples
            ),
            DriveEvent::PredictionStarted {
                instance,
                horizon_ticks,
            } => write!(
                f,
                "Prediction started on {} for {} ticks",
                instance, horizon_ticks
            ),
            DriveEvent::PredictionResolved { samples } => {
                write!(f, "Prediction resolved with {} samples", samples)
            }
            DriveEvent::ProgressChecked {
                distance,
                normalised,
                on_track,
            } => write!(
                f,
                "Progress check: {:.1} from expected end ({:.3} normalised), {}",
                distance,
                normalised,
                if *on_track { "on track" } else { "off track" }
            ),
            DriveEvent::DivergenceDetected { tick, flags } => {
                write!(f, "Divergence at tick {}: {}", tick, flags)
            }
            DriveEvent::SearchStarted {
                hypothesis,
                num_trials,
            } => write!(
                f,
                "Diagnostic search started ({} trials): {}",
                num_trials, hypothesis
            ),
            DriveEvent::TrialStarted {
                index,
                throttle_delta,
                steer_delta,
                seeded,
            } => write!(
                f,
                "Trial {} started with deltas ({:.3}, {:.3}){}",
                index,
                throttle_delta,
                steer_delta,
                if *seeded { " from the control map" } else { "" }
            ),
            DriveEvent::TrialScored {
                index,
                cost,
                reached_goal,
            } => write!(
                f,
                "Trial {} cost {:.3}{}",
                index,
                cost,
                if *reached_goal { " (reached goal)" } else { "" }
            ),
            DriveEvent::CorrectionApplied {
                throttle_adjust,
                steer_adjust,
                cost,
            } => write!(
                f,
                "Correction applied: throttle {:+.3}, steer {:+.3} (cost {:.3})",
                throttle_adjust, steer_adjust, cost
            ),
            DriveEvent::GoalReached { runtime_s } => {
                write!(f, "Goal reached after {:.2} s of driving", runtime_s)
            }
            DriveEvent::RunScored(score) => write!(f, "Run scored: {}", score),
            DriveEvent::ScoreSkipped { reason } => write!(f, "Run not scored: {}", reason),
            DriveEvent::EpisodeTimedOut { elapsed_s } => {
                write!(f, "Episode timed out after {:.2} s", elapsed_s)
            }
            DriveEvent::SoftFailure { context, reason } => {
                write!(f, "{} skipped: {}", context, reason)
            }
            DriveEvent::RequestIgnored { request, reason } => {
                write!(f, "{} ignored: {}", request, reason)
            }
        }
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, time_s: f64, event: DriveEvent) {
        log::log!(event.level(), "[{:.3}] {}", time_s, event);
    }
}

impl ArchiveSink {
    pub fn new(session: &Session) -> Result<Self, ArchiveError> {
        Ok(Self {
            arch: Archiver::from_path(session, "events.csv")?,
        })
    }
}

impl EventSink for ArchiveSink {
    fn emit(&mut self, time_s: f64, event: DriveEvent) {
        let record = EventRecord {
            time_s,
            kind: event.kind(),
            detail: event.to_string(),
        };

        if let Err(e) = self.arch.serialise(record) {
            log::warn!("Could not archive drive event: {}", e);
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[(f64, DriveEvent)] {
        &self.events
    }

    /// Number of recorded events of the given kind.
    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|(_, e)| e.kind() == kind).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, time_s: f64, event: DriveEvent) {
        self.events.push((time_s, event));
    }
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&mut self, time_s: f64, event: DriveEvent) {
        for sink in self.sinks.iter_mut() {
            sink.emit(time_s, event.clone());
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn emit(&mut self, time_s: f64, event: DriveEvent) {
        (**self).emit(time_s, event)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    struct SharedSink(Rc<RefCell<MemorySink>>);

    impl EventSink for SharedSink {
        fn emit(&mut self, time_s: f64, event: DriveEvent) {
            self.0.borrow_mut().emit(time_s, event)
        }
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Rc::new(RefCell::new(MemorySink::new()));
        let b = Rc::new(RefCell::new(MemorySink::new()));

        let mut fanout = FanoutSink::new()
            .with(Box::new(SharedSink(a.clone())))
            .with(Box::new(SharedSink(b.clone())))
            .with(Box::new(LogSink));

        fanout.emit(1.5, DriveEvent::GoalReached { runtime_s: 12.0 });
        fanout.emit(
            2.0,
            DriveEvent::SoftFailure {
                context: "Control transfer".into(),
                reason: "no controller".into(),
            },
        );

        assert_eq!(a.borrow().events().len(), 2);
        assert_eq!(b.borrow().count("SoftFailure"), 1);
        assert_eq!(b.borrow().events()[0].0, 1.5);
    }

    #[test]
    fn test_event_levels() {
        let soft = DriveEvent::SoftFailure {
            context: "Spawn".into(),
            reason: "x".into(),
        };
        assert_eq!(soft.level(), Level::Warn);
        assert_eq!(soft.to_string(), "Spawn skipped: x");
        assert_eq!(
            DriveEvent::TrialScored {
                index: 0,
                cost: 1.0,
                reached_goal: false
            }
            .level(),
            Level::Debug
        );
    }
}
