// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Jobs like a server restore are long chains of rate-limited platform
//! writes. A [`Stepper`] breaks such a job into named, independently
//! resumable steps: after every step the merged progress is persisted, and a
//! resumed run replays the persisted step plus everything after it while
//! skipping steps that already committed.

use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::app::errors::{JobError, JobResult};
use crate::app::types::{Output, Progress};
use crate::jobs::{JobEnv, ProgressHandle};

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = JobResult<StepOutcome>> + Send + 'a>>;

pub type StepFn<T> =
    for<'a> fn(&'a T, &'a JobEnv, &'a ProgressHandle, &'a Progress) -> StepFuture<'a>;

/// What a step decided: finish the whole job with an output, advance with a
/// progress update to merge and persist, or fall through without persisting.
pub enum StepOutcome {
    Finish(Output),
    Advance(Progress),
    Continue,
}

pub struct Step<T> {
    pub state: &'static str,
    /// Defaults to the step's position in the list. Steps of a lower index
    /// than the resumed state are considered committed and skipped.
    pub index: Option<usize>,
    pub exec: StepFn<T>,
}

impl<T> Step<T> {
    pub fn new(state: &'static str, exec: StepFn<T>) -> Self {
        Step {
            state,
            index: None,
            exec,
        }
    }
}

struct StepEntry<T> {
    state: &'static str,
    index: usize,
    exec: StepFn<T>,
}

pub struct Stepper<T> {
    steps: Vec<StepEntry<T>>,
}

impl<T> Stepper<T> {
    /// Panics when a step state is empty or duplicated; both are programming
    /// errors in the step list, not runtime conditions.
    pub fn new(steps: Vec<Step<T>>) -> Self {
        let mut entries: Vec<StepEntry<T>> = Vec::with_capacity(steps.len());
        for (position, step) in steps.into_iter().enumerate() {
            if step.state.is_empty() {
                panic!("step state cannot be empty");
            }
            if entries.iter().any(|entry| entry.state == step.state) {
                panic!("duplicate step state '{}'", step.state);
            }
            entries.push(StepEntry {
                state: step.state,
                index: step.index.unwrap_or(position),
                exec: step.exec,
            });
        }
        Stepper { steps: entries }
    }

    fn index_of(&self, state: &str) -> Option<usize> {
        self.steps
            .iter()
            .find(|entry| entry.state == state)
            .map(|entry| entry.index)
    }

    /// Drives all steps in declaration order, honouring persisted progress.
    pub async fn run(
        &self,
        target: &T,
        env: &JobEnv,
        progress: &ProgressHandle,
    ) -> JobResult<Option<Output>> {
        let mut current = progress.get().await?.unwrap_or_else(Progress::start);

        for (position, entry) in self.steps.iter().enumerate() {
            env.ensure_active()?;

            // A step runs when starting fresh, when it is the resumed step,
            // or when its index is not strictly before the resumed step's.
            let resumed_index = self
                .index_of(&current.state)
                .map(|index| index as i64)
                .unwrap_or(-1);
            let runs = current.state.is_empty()
                || current.state == entry.state
                || entry.index as i64 >= resumed_index;
            if !runs {
                tracing::info!(
                    step = entry.state,
                    index = entry.index,
                    "skipping step (resuming job)"
                );
                continue;
            }

            tracing::info!(step = entry.state, index = entry.index, "executing step");
            let outcome = (entry.exec)(target, env, progress, &current)
                .await
                .map_err(|err| JobError::step(entry.state, err))?;

            match outcome {
                StepOutcome::Finish(output) => return Ok(Some(output)),
                StepOutcome::Advance(update) => {
                    if update.state.is_empty() {
                        current.state = match self.steps.get(position + 1) {
                            Some(next) => next.state.to_string(),
                            None => "completed".to_string(),
                        };
                    } else {
                        if self.index_of(&update.state).is_none() {
                            return Err(JobError::internal(format!(
                                "invalid step state '{}'",
                                update.state
                            )));
                        }
                        current.state = update.state;
                    }

                    merge_progress_data(&mut current, update.data);
                    progress.set(&current).await?;
                }
                StepOutcome::Continue => {}
            }
        }

        Ok(None)
    }
}

/// Additive merge: null values delete their key, everything else overwrites.
fn merge_progress_data(current: &mut Progress, update: serde_json::Map<String, Value>) {
    for (key, value) in update {
        if value.is_null() {
            current.data.remove(&key);
        } else {
            current.data.insert(key, value);
        }
    }
}

/// Persist an intra-step snapshot without advancing the state, so a crash
/// mid-step resumes from the last platform write instead of the step start.
pub async fn save_intermediate(
    progress: &ProgressHandle,
    current: &Progress,
    update: serde_json::Map<String, Value>,
) -> JobResult<()> {
    let mut snapshot = current.clone();
    merge_progress_data(&mut snapshot, update);
    progress.set(&snapshot).await
}

/// Decode the step-relevant slice of `progress.data` into a typed record.
pub fn decode_progress<T: DeserializeOwned>(progress: &Progress) -> JobResult<T> {
    serde_json::from_value(Value::Object(progress.data.clone()))
        .map_err(|err| JobError::internal(format!("failed to decode progress data: {err}")))
}
