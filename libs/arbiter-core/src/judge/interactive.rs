/// Interactive Pipeline - Submission ↔ Interactor
///
/// **Flow:**
/// 1. Compile submission and interactor concurrently
/// 2. Start every subtask at once; a subtask with `if` prerequisites first
///    awaits their outcomes and is skipped unless all of them passed
/// 3. Each subtask pushes its cases through the shared `WorkerPool` and
///    folds results as they complete
/// 4. Join all subtasks, fold them into the verdict
///
/// **Limits per case:**
/// - submission: case time × its multiplier, case memory
/// - interactor: case time × 2 × its multiplier, case memory × 2
///
/// **Classification (first match wins):**
/// 1. sandbox reported TLE, or submission time over limit → TLE
/// 2. sandbox reported MLE, or submission memory over limit → MLE
/// 3. nonzero exit other than broken pipe, or broken pipe while the
///    interactor also failed → RE
/// 4. otherwise the interactor's stderr verdict line decides

use super::{CleanupGuard, JudgeContext};
use crate::error::{FormatError, JudgeError, Result};
use crate::sandbox::{CompileFailure, CopyIn, Executable, FileSource, RunResult};
use crate::scoring::{self, SubtaskState};
use crate::{signals, testlib};
use arbiter_common::types::{CaseSpec, ExecutionResult, Progress, SubtaskSpec, Verdict};
use arbiter_common::Status;
use futures_util::future::{try_join_all, BoxFuture, Shared};
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::path::Path;

type SubtaskFuture<'a> = Shared<BoxFuture<'a, Result<SubtaskState>>>;

/// Classified outcome of one piped run
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub status: Status,
    pub score: f64,
    pub message: String,
}

pub fn classify(user: &RunResult, interactor: &RunResult, time_ms: u64, memory_mb: u64, full_score: f64) -> CaseOutcome {
    let mut outcome = if user.status == Status::TimeLimitExceeded || user.time_ms > time_ms {
        CaseOutcome {
            status: Status::TimeLimitExceeded,
            score: 0.0,
            message: String::new(),
        }
    } else if user.status == Status::MemoryLimitExceeded || user.memory_kb > memory_mb.saturating_mul(1024) {
        CaseOutcome {
            status: Status::MemoryLimitExceeded,
            score: 0.0,
            message: String::new(),
        }
    } else if (user.code != 0 && user.code != signals::BROKEN_PIPE)
        || (user.code == signals::BROKEN_PIPE && interactor.code != 0)
    {
        let message = match signals::name(user.code) {
            Some(signal) => signal.to_string(),
            None => format!("Your program returned {}.", user.code),
        };
        CaseOutcome {
            status: Status::RuntimeError,
            score: 0.0,
            message,
        }
    } else {
        let parsed = testlib::parse(&interactor.stderr, full_score);
        CaseOutcome {
            status: parsed.status,
            score: parsed.score,
            message: parsed.message,
        }
    };

    if interactor.code != 0 && interactor.stderr.trim().is_empty() {
        let note = format!("(Interactor exited with code {})", interactor.code);
        outcome.message = if outcome.message.is_empty() {
            note
        } else {
            format!("{} {}", outcome.message, note)
        };
    }
    outcome
}

/// Language key of the interactor from its file extension, `@` standing in for `.`
fn interactor_lang(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').nth(1))
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.replace('@', "."))
        .ok_or_else(|| {
            JudgeError::system(
                "Cannot infer the interactor language.",
                vec![path.display().to_string()],
            )
        })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn progress(case_id: u32, count: usize) -> u8 {
    if count == 0 {
        return 100;
    }
    ((case_id as usize * 100) / count).min(100) as u8
}

fn adopt(compiled: std::result::Result<Executable, CompileFailure>, guard: &mut CleanupGuard) -> std::result::Result<Executable, CompileFailure> {
    compiled.map(|mut exe| {
        guard.adopt(&mut exe);
        exe
    })
}

#[tracing::instrument(skip_all, fields(request_id = %ctx.request.id))]
pub async fn judge(ctx: &JudgeContext<'_>, guard: &mut CleanupGuard) -> Result<Verdict> {
    ctx.reporter.next(Progress::status(Status::Compiling));
    let interactor_path = ctx.config.interactor.as_ref().ok_or(FormatError::MissingInteractor)?;
    let interactor_lang = ctx.lookup_lang(&interactor_lang(interactor_path)?)?;

    let user_files: CopyIn = ctx
        .config
        .user_extra_files
        .iter()
        .map(|p| (file_name(p), FileSource::Path(p.clone())))
        .collect();
    let mut judge_files = CopyIn::new();
    if let Some(testlib) = &ctx.settings.testlib_path {
        judge_files.insert("testlib.h".into(), FileSource::Path(testlib.clone()));
    }
    judge_files.insert("user_code".into(), FileSource::Content(ctx.request.code.clone()));
    for path in &ctx.config.judge_extra_files {
        judge_files.insert(file_name(path), FileSource::Path(path.clone()));
    }

    let compiler = &ctx.services.compiler;
    let (user, interactor) = tokio::join!(
        compiler.compile(&ctx.lang, FileSource::Content(ctx.request.code.clone()), user_files),
        compiler.compile(&interactor_lang, FileSource::Path(interactor_path.clone()), judge_files),
    );
    let user = adopt(user, guard);
    let interactor = adopt(interactor, guard);
    let (user, interactor) = (user?, interactor?);

    ctx.reporter.next(Progress::status(Status::Judging).with_progress(0));

    let subtasks = start_subtasks(ctx, &user, &interactor)?;
    let states = try_join_all(ctx.config.subtasks.iter().map(|s| subtasks[&s.id].clone())).await?;
    Ok(scoring::aggregate(&states))
}

/// Shared futures for every subtask, built so prerequisites exist before dependents
fn start_subtasks<'a>(
    ctx: &'a JudgeContext<'_>,
    user: &'a Executable,
    interactor: &'a Executable,
) -> Result<HashMap<u32, SubtaskFuture<'a>>> {
    let mut started: HashMap<u32, SubtaskFuture<'a>> = HashMap::new();
    let mut remaining: Vec<&SubtaskSpec> = ctx.config.subtasks.iter().collect();

    while !remaining.is_empty() {
        let before = remaining.len();
        let mut blocked = Vec::new();
        for subtask in remaining {
            if !subtask.depends_on.iter().all(|d| started.contains_key(d)) {
                blocked.push(subtask);
                continue;
            }
            let prerequisites: Vec<SubtaskFuture<'a>> =
                subtask.depends_on.iter().map(|d| started[d].clone()).collect();
            let fut = async move {
                for prerequisite in prerequisites {
                    if !prerequisite.await?.passed() {
                        tracing::info!(subtask_id = subtask.id, "Prerequisite not passed, subtask skipped");
                        return Ok(SubtaskState::skipped(subtask));
                    }
                }
                judge_subtask(ctx, subtask, user, interactor).await
            }
            .boxed()
            .shared();
            started.insert(subtask.id, fut);
        }
        if blocked.len() == before {
            let id = blocked.first().map_or(0, |s| s.id);
            return Err(FormatError::CyclicDependency(id).into());
        }
        remaining = blocked;
    }
    Ok(started)
}

async fn judge_subtask(
    ctx: &JudgeContext<'_>,
    subtask: &SubtaskSpec,
    user: &Executable,
    interactor: &Executable,
) -> Result<SubtaskState> {
    let mut state = SubtaskState::new(subtask);
    let mut pending: FuturesUnordered<_> = subtask
        .cases
        .iter()
        .map(|case| ctx.pool.run(judge_case(ctx, subtask, case, user, interactor)))
        .collect();

    while let Some(result) = pending.next().await {
        let result = result?;
        state.apply(&result);
        ctx.reporter.next(
            Progress::status(Status::Judging)
                .with_progress(progress(result.case_id, ctx.config.count))
                .with_case(result),
        );
    }
    tracing::debug!(
        subtask_id = subtask.id,
        status = %state.status,
        score = state.score,
        "Subtask finished"
    );
    Ok(state)
}

async fn judge_case(
    ctx: &JudgeContext<'_>,
    subtask: &SubtaskSpec,
    case: &CaseSpec,
    user: &Executable,
    interactor: &Executable,
) -> Result<ExecutionResult> {
    let time_ms = user.scaled_time(case.time_ms);
    let user_spec = user.run_spec(time_ms, case.memory_mb);

    let mut interactor_spec = interactor.run_spec(
        interactor.scaled_time(case.time_ms.saturating_mul(2)),
        case.memory_mb.saturating_mul(2),
    );
    interactor_spec.execute = format!("{} /w/in /w/tout /w/out", interactor.execute);
    let source = |path: &Option<std::path::PathBuf>| match path {
        Some(p) => FileSource::Path(p.clone()),
        None => FileSource::Content(String::new()),
    };
    interactor_spec.copy_in.insert("in".into(), source(&case.input));
    interactor_spec.copy_in.insert("out".into(), source(&case.output));
    interactor_spec.copy_out = vec!["/w/tout?".into()];
    interactor_spec.env = ctx.env.clone();
    interactor_spec.env.insert("HYDRO_TESTCASE".into(), case.id.to_string());

    let (user_res, interactor_res) = ctx.services.sandbox.run_piped(user_spec, interactor_spec).await?;
    let outcome = classify(&user_res, &interactor_res, time_ms, case.memory_mb, case.score);
    tracing::debug!(
        case_id = case.id,
        subtask_id = subtask.id,
        status = %outcome.status,
        time_ms = user_res.time_ms,
        memory_kb = user_res.memory_kb,
        "Case judged"
    );

    Ok(ExecutionResult {
        case_id: case.id,
        subtask_id: subtask.id,
        status: outcome.status,
        score: outcome.score,
        code: user_res.code,
        time_ms: user_res.time_ms,
        memory_kb: user_res.memory_kb,
        message: outcome.message,
    })
}
