/// Test-Data Discovery by Filename Convention
///
/// Used when a problem's config lists no cases. Files are matched by the
/// first rule whose pattern fits and whose expected output exists:
///
/// | Input                  | Output                        | Subtask  | Policy |
/// |------------------------|-------------------------------|----------|--------|
/// | `<p><s>-<c>.in`        | `.out` `.ans` `.OUT` `.ANS`   | `<s>`/1  | min    |
/// | `<p>.in<c>`            | `<p>.ans<c>` `<p>.out<c>`     | 1        | sum    |
/// | `input<c>.txt`         | `output<c>.txt`               | 1        | sum    |
///
/// Inputs under `input/` look for their outputs under `output/` as well.
/// Interactive problems accept an input with no output.

use arbiter_common::types::ScorePolicy;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};

/// A case found on disk; paths are relative to the test-data folder
#[derive(Debug, Clone, PartialEq)]
pub struct FoundCase {
    pub id: u32,
    pub input: String,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoundSubtask {
    pub id: u32,
    pub policy: ScorePolicy,
    pub cases: Vec<FoundCase>,
}

struct Rule {
    regex: Regex,
    policy: ScorePolicy,
    /// (subtask id, case id, output names) for a matching file name
    extract: fn(&Captures) -> Option<(u32, u32, Vec<String>)>,
}

fn numbered(c: &Captures) -> Option<(u32, u32, Vec<String>)> {
    let stem = &c[1];
    let subtask = match c.get(3).map(|m| m.as_str()) {
        None | Some("") => 1,
        Some(s) => s.parse().ok()?,
    };
    let case = c[4].parse().ok()?;
    let outputs = ["out", "ans", "OUT", "ANS"]
        .iter()
        .map(|ext| format!("{}.{}", stem, ext))
        .collect();
    Some((subtask, case, outputs))
}

fn suffixed(c: &Captures) -> Option<(u32, u32, Vec<String>)> {
    let case = c[3].parse().ok()?;
    let outputs = vec![format!("{}.ans{}", &c[1], &c[3]), format!("{}.out{}", &c[1], &c[3])];
    Some((1, case, outputs))
}

fn input_txt(c: &Captures) -> Option<(u32, u32, Vec<String>)> {
    let case = c[2].parse().ok()?;
    Some((1, case, vec![format!("output{}.txt", &c[2])]))
}

lazy_static! {
    static ref RULES: Vec<Rule> = vec![
        Rule {
            regex: Regex::new(r"^(([A-Za-z0-9._-]*?)(?:(\d*)[-_])?(\d+))\.(in|IN|txt|TXT)$").unwrap(),
            policy: ScorePolicy::Min,
            extract: numbered,
        },
        Rule {
            regex: Regex::new(r"^([^\d]*)\.(in|IN)(\d+)$").unwrap(),
            policy: ScorePolicy::Sum,
            extract: suffixed,
        },
        Rule {
            regex: Regex::new(r"^(input)([0-9]+)\.txt$").unwrap(),
            policy: ScorePolicy::Sum,
            extract: input_txt,
        },
    ];
}

fn split_dir(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Places an output named `name` may live for an input in `dir`
fn output_candidates(dir: &str, name: &str) -> Vec<String> {
    let mut candidates = vec![format!("{}{}", dir, name)];
    if dir != "output/" {
        candidates.push(format!("output/{}", name));
    }
    candidates
}

/// Group `files` (relative paths, `/`-separated) into subtasks
///
/// Subtasks come back sorted by id, cases within each sorted by case id.
pub fn discover(files: &[String], interactive: bool) -> Vec<FoundSubtask> {
    let present: HashSet<&str> = files.iter().map(|f| f.as_str()).collect();
    let mut subtasks: BTreeMap<u32, FoundSubtask> = BTreeMap::new();

    for file in files {
        let (dir, name) = split_dir(file);
        if dir == "output/" {
            continue;
        }
        for rule in RULES.iter() {
            let Some(caps) = rule.regex.captures(name) else {
                continue;
            };
            let Some((subtask_id, case_id, outputs)) = (rule.extract)(&caps) else {
                continue;
            };
            let output = outputs
                .iter()
                .flat_map(|o| output_candidates(dir, o))
                .find(|o| present.contains(o.as_str()));
            if output.is_none() && !interactive {
                continue;
            }
            tracing::debug!(input = %file, output = ?output, subtask_id, case_id, "Discovered case");
            subtasks
                .entry(subtask_id)
                .or_insert_with(|| FoundSubtask {
                    id: subtask_id,
                    policy: rule.policy,
                    cases: Vec::new(),
                })
                .cases
                .push(FoundCase {
                    id: case_id,
                    input: file.clone(),
                    output,
                });
            break;
        }
    }

    subtasks
        .into_values()
        .map(|mut s| {
            s.cases.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.input.cmp(&b.input)));
            s
        })
        .collect()
}
