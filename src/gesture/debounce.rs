use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashSet;

use crate::classify::ClassificationResult;
use crate::gesture::phrases::{ApplianceCommand, PhraseTable};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.9;
pub const DEFAULT_TRUST_VALUE: u32 = 3;
pub const DEFAULT_NEUTRAL_THRESHOLD: u32 = 2;
pub const DEFAULT_NEUTRAL_LABEL: &str = "other";

/// Tuning for the gesture debouncer.
#[derive(Clone, Debug, PartialEq)]
pub struct DebounceConfig {
    /// A label counts for a frame only when its score is strictly above this.
    pub confidence_threshold: f32,
    /// A target fires once its run-length is strictly above this.
    pub trust_value: u32,
    /// The neutral label re-arms once its run-length is strictly above this.
    pub neutral_threshold: u32,
    /// Controllable labels, highest priority first.
    pub targets: Vec<String>,
    /// Reserved label that re-arms the debouncer. Never commandable.
    pub neutral_label: String,
    pub start_armed: bool,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            trust_value: DEFAULT_TRUST_VALUE,
            neutral_threshold: DEFAULT_NEUTRAL_THRESHOLD,
            targets: vec!["light".to_string(), "ac".to_string(), "tv".to_string()],
            neutral_label: DEFAULT_NEUTRAL_LABEL.to_string(),
            start_armed: false,
        }
    }
}

impl DebounceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within 0..=1, got {}",
                self.confidence_threshold
            ));
        }
        if self.targets.is_empty() {
            return Err(anyhow!("at least one gesture target is required"));
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.trim().is_empty() {
                return Err(anyhow!("gesture targets must not be empty"));
            }
            if !seen.insert(target.as_str()) {
                return Err(anyhow!("gesture target '{}' listed twice", target));
            }
        }
        if self.neutral_label.trim().is_empty() {
            return Err(anyhow!("neutral label must not be empty"));
        }
        if seen.contains(self.neutral_label.as_str()) {
            return Err(anyhow!(
                "neutral label '{}' cannot also be a target",
                self.neutral_label
            ));
        }
        Ok(())
    }
}

/// Observable state of one target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TargetState {
    pub label: String,
    pub run_length: u32,
    /// Last commanded state. Not confirmed by the hub.
    pub toggled_on: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DebounceSnapshot {
    pub armed: bool,
    pub neutral_label: String,
    pub neutral_run_length: u32,
    pub targets: Vec<TargetState>,
    pub commands_emitted: u64,
    pub rearm_count: u64,
}

/// Turns per-frame label scores into at most one appliance toggle per frame.
///
/// A target fires after its run-length exceeds the trust value while armed. Firing
/// disarms; only a sustained neutral gesture re-arms and clears every run-length.
/// Run-lengths count qualifying frames and are never reset by sub-threshold frames.
pub struct GestureDebouncer {
    config: DebounceConfig,
    phrases: PhraseTable,
    armed: bool,
    neutral_run_length: u32,
    targets: Vec<TargetState>,
    commands_emitted: u64,
    rearm_count: u64,
}

impl GestureDebouncer {
    /// Fails when the config is invalid or a target has no phrase in `phrases`.
    pub fn new(config: DebounceConfig, phrases: PhraseTable) -> Result<Self> {
        config.validate()?;
        let missing = phrases.missing_targets(&config.targets);
        if !missing.is_empty() {
            return Err(anyhow!(
                "no '{}' phrases for target(s): {}",
                phrases.locale(),
                missing.join(", ")
            ));
        }
        let targets = config
            .targets
            .iter()
            .map(|label| TargetState {
                label: label.clone(),
                run_length: 0,
                toggled_on: false,
            })
            .collect();
        Ok(Self {
            armed: config.start_armed,
            config,
            phrases,
            neutral_run_length: 0,
            targets,
            commands_emitted: 0,
            rearm_count: 0,
        })
    }

    /// Feed one frame's scores. Returns the command to dispatch, if one fires.
    pub fn observe(&mut self, scores: &ClassificationResult) -> Option<ApplianceCommand> {
        let threshold = self.config.confidence_threshold;

        let mut qualified = vec![false; self.targets.len()];
        for (target, hit) in self.targets.iter_mut().zip(qualified.iter_mut()) {
            if qualifies(scores.score(&target.label), threshold) {
                target.run_length = target.run_length.saturating_add(1);
                *hit = true;
            }
        }

        let mut command = None;
        if self.armed {
            let trust = self.config.trust_value;
            let firing = self
                .targets
                .iter()
                .zip(&qualified)
                .position(|(target, hit)| *hit && target.run_length > trust);
            if let Some(index) = firing {
                let target = &mut self.targets[index];
                // Every target has a phrase; `new` checks the table.
                if let Some(fired) = self.phrases.command(&target.label, !target.toggled_on) {
                    target.toggled_on = fired.turn_on;
                    target.run_length = 0;
                    self.armed = false;
                    self.commands_emitted += 1;
                    log::info!(
                        "pointing at {} -> turn {}",
                        target.label,
                        if target.toggled_on { "on" } else { "off" }
                    );
                    command = Some(fired);
                }
            }
        }

        if qualifies(scores.score(&self.config.neutral_label), threshold) {
            self.neutral_run_length = self.neutral_run_length.saturating_add(1);
            if self.neutral_run_length > self.config.neutral_threshold {
                if !self.armed {
                    log::debug!("neutral gesture held; re-armed");
                }
                self.armed = true;
                self.neutral_run_length = 0;
                for target in &mut self.targets {
                    target.run_length = 0;
                }
                self.rearm_count += 1;
            }
        }

        command
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn run_length(&self, label: &str) -> Option<u32> {
        if label == self.config.neutral_label {
            return Some(self.neutral_run_length);
        }
        self.target(label).map(|target| target.run_length)
    }

    pub fn toggle_state(&self, label: &str) -> Option<bool> {
        self.target(label).map(|target| target.toggled_on)
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    pub fn snapshot(&self) -> DebounceSnapshot {
        DebounceSnapshot {
            armed: self.armed,
            neutral_label: self.config.neutral_label.clone(),
            neutral_run_length: self.neutral_run_length,
            targets: self.targets.clone(),
            commands_emitted: self.commands_emitted,
            rearm_count: self.rearm_count,
        }
    }

    fn target(&self, label: &str) -> Option<&TargetState> {
        self.targets.iter().find(|target| target.label == label)
    }
}

fn qualifies(score: f32, threshold: f32) -> bool {
    score.is_finite() && score > threshold
}
