//! The reconciliation loop behind `conductor run`.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cleanup::revert_all;
use crate::controller::Controller;
use crate::core::ledger::Ledger;
use crate::io::picker::Picker;
use crate::reconcile::{ReconcileReport, reconcile_all};
use crate::schedule::{ScheduleReport, schedule};
use crate::ticker::{Tick, Ticker};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The stop marker was present and no task remained active.
    StopRequested,
    /// No candidates, nothing active, and waiting was not requested.
    Exhausted,
    /// The operator interrupted; active tasks were reverted.
    Interrupted { reverted: Vec<String> },
    /// A single tick was requested.
    Once,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub ticks: u32,
    pub launched: u32,
    pub stop: LoopStop,
}

/// What happened during one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u32,
    pub reconcile: ReconcileReport,
    pub schedule: Option<ScheduleReport>,
    pub ledger: Ledger,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopOptions {
    /// Stop after a single tick.
    pub once: bool,
}

/// Tick until a stop condition holds.
///
/// Each tick reconciles every active task, then fills free slots unless a
/// stop was requested. Errors while scheduling are logged and retried next
/// tick; they never end the loop.
pub fn run_loop<F: FnMut(&TickReport)>(
    ctl: &mut Controller<'_>,
    ticker: &mut dyn Ticker,
    picker: Option<&dyn Picker>,
    options: LoopOptions,
    mut on_tick: F,
) -> Result<LoopOutcome> {
    let mut ticks = 0u32;
    let mut launched = 0u32;
    loop {
        if ticker.wait() == Tick::Interrupted {
            let reverted = revert_all(ctl);
            info!(reverted = reverted.len(), "interrupted");
            return Ok(LoopOutcome {
                ticks,
                launched,
                stop: LoopStop::Interrupted { reverted },
            });
        }
        ticks += 1;
        debug!(tick = ticks, "tick");

        let reconcile = reconcile_all(ctl);
        let stop_requested = ctl.paths.stop_requested();
        let scheduled = if stop_requested {
            debug!("stop requested, not scheduling");
            None
        } else {
            match schedule(ctl, picker) {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "scheduling skipped this tick");
                    None
                }
            }
        };
        if let Some(report) = &scheduled {
            launched += u32::try_from(report.launched.len()).unwrap_or(u32::MAX);
        }

        let report = TickReport {
            tick: ticks,
            reconcile,
            schedule: scheduled,
            ledger: ctl.snapshot(),
        };
        let active = report.ledger.active_count();
        on_tick(&report);

        if stop_requested && active == 0 {
            ctl.paths.clear_stop()?;
            info!(ticks, "stop marker observed, no active tasks");
            return Ok(LoopOutcome {
                ticks,
                launched,
                stop: LoopStop::StopRequested,
            });
        }
        let source_empty = report
            .schedule
            .as_ref()
            .is_some_and(|s| s.candidates == Some(0));
        if source_empty && active == 0 && !ctl.config.keep_waiting {
            info!(ticks, "no candidates and no active tasks");
            return Ok(LoopOutcome {
                ticks,
                launched,
                stop: LoopStop::Exhausted,
            });
        }
        if options.once {
            return Ok(LoopOutcome {
                ticks,
                launched,
                stop: LoopStop::Once,
            });
        }
    }
}
