use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A decided toggle: which appliance, the new state, and the phrase sent to the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApplianceCommand {
    pub target: String,
    pub turn_on: bool,
    pub instruction: String,
}

/// On/off phrases for one target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhrasePair {
    pub on: String,
    pub off: String,
}

impl PhrasePair {
    pub fn new(on: impl Into<String>, off: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            off: off.into(),
        }
    }
}

/// Locale-specific command phrases keyed by (target, state).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhraseTable {
    locale: String,
    phrases: BTreeMap<String, PhrasePair>,
}

impl PhraseTable {
    pub fn empty(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            phrases: BTreeMap::new(),
        }
    }

    /// Built-in tables for the default `light`, `ac` and `tv` targets.
    pub fn builtin(locale: &str) -> Result<Self> {
        let entries: &[(&str, &str, &str)] = match locale {
            "en" => &[
                ("light", "turn on the light", "turn off the light"),
                (
                    "ac",
                    "turn on the air conditioner",
                    "turn off the air conditioner",
                ),
                ("tv", "turn on the TV", "turn off the TV"),
            ],
            "es" => &[
                ("light", "enciende la luz", "apaga la luz"),
                (
                    "ac",
                    "enciende el aire acondicionado",
                    "apaga el aire acondicionado",
                ),
                ("tv", "enciende la televisión", "apaga la televisión"),
            ],
            other => return Err(anyhow!("no built-in phrase table for locale '{}'", other)),
        };
        let mut table = Self::empty(locale);
        for (target, on, off) in entries {
            table.insert(*target, PhrasePair::new(*on, *off));
        }
        Ok(table)
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn insert(&mut self, target: impl Into<String>, pair: PhrasePair) {
        self.phrases.insert(target.into(), pair);
    }

    pub fn phrase(&self, target: &str, turn_on: bool) -> Option<&str> {
        self.phrases.get(target).map(|pair| {
            if turn_on {
                pair.on.as_str()
            } else {
                pair.off.as_str()
            }
        })
    }

    /// The command for `target` in this locale, if the table has a phrase for it.
    pub fn command(&self, target: &str, turn_on: bool) -> Option<ApplianceCommand> {
        let instruction = self.phrase(target, turn_on)?;
        Some(ApplianceCommand {
            target: target.to_string(),
            turn_on,
            instruction: instruction.to_string(),
        })
    }

    pub fn missing_targets<'a>(&self, targets: &'a [String]) -> Vec<&'a str> {
        targets
            .iter()
            .filter(|target| !self.phrases.contains_key(target.as_str()))
            .map(String::as_str)
            .collect()
    }
}
