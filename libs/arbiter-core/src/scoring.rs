/// Scoring Aggregator - Pure Reduction of Case Results
///
/// **Core Responsibility:**
/// Fold per-case results into per-subtask state, then per-subtask state
/// into the final verdict.
///
/// **Critical Properties:**
/// - Knows nothing about sandboxes, compilers or progress reporting
/// - Pure: (case results in any order) → same subtask state
/// - Status always folds by severity max, independent of the score policy
///
/// **Scoring Rules:**
/// - `sum`: subtask score = sum of case scores
/// - `max`: subtask score = best case score
/// - `min`: subtask score starts at the full subtask score, degrades to the worst case
/// - The aggregate is kept within `[0, subtask.score]`

use arbiter_common::types::{ExecutionResult, ScorePolicy, SubtaskSpec, Verdict};
use arbiter_common::Status;

/// Running state of one subtask
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskState {
    pub id: u32,
    pub policy: ScorePolicy,
    pub full_score: f64,
    pub status: Status,
    pub score: f64,
    pub time_ms: u64,
    pub memory_kb: u64,
    pub judged: usize,
    /// A prerequisite failed, no case ran
    pub skipped: bool,
}

impl SubtaskState {
    pub fn new(subtask: &SubtaskSpec) -> Self {
        Self {
            id: subtask.id,
            policy: subtask.policy,
            full_score: subtask.score,
            status: Status::Accepted,
            score: subtask.policy.initial(subtask.score),
            time_ms: 0,
            memory_kb: 0,
            judged: 0,
            skipped: false,
        }
    }

    /// State for a subtask whose prerequisite was not accepted
    pub fn skipped(subtask: &SubtaskSpec) -> Self {
        Self {
            score: 0.0,
            skipped: true,
            ..Self::new(subtask)
        }
    }

    pub fn apply(&mut self, result: &ExecutionResult) {
        let folded = self.policy.fold(self.score, result.score);
        self.score = folded.clamp(0.0, self.full_score.max(0.0));
        self.status = self.status.worst(result.status);
        self.time_ms += result.time_ms;
        self.memory_kb = self.memory_kb.max(result.memory_kb);
        self.judged += 1;
    }

    /// Whether subtasks depending on this one may run
    pub fn passed(&self) -> bool {
        !self.skipped && self.status.is_accepted()
    }
}

/// Whole-submission accumulator
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Totals {
    pub status: Status,
    pub score: f64,
    pub time_ms: u64,
    pub memory_kb: u64,
}

impl Totals {
    pub fn apply_subtask(&mut self, state: &SubtaskState) {
        self.status = self.status.worst(state.status);
        self.score += state.score;
        self.time_ms += state.time_ms;
        self.memory_kb = self.memory_kb.max(state.memory_kb);
    }

    pub fn verdict(&self) -> Verdict {
        Verdict {
            status: self.status,
            score: self.score,
            time_ms: self.time_ms,
            memory_kb: self.memory_kb,
        }
    }
}

/// Fold a finished set of subtask states into the verdict
pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a SubtaskState>) -> Verdict {
    let mut totals = Totals::default();
    for state in states {
        totals.apply_subtask(state);
    }
    totals.verdict()
}
