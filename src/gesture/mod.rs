//! Gesture debouncing and command phrasing.

mod debounce;
mod phrases;

pub use debounce::{
    DebounceConfig, DebounceSnapshot, GestureDebouncer, TargetState, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_NEUTRAL_LABEL, DEFAULT_NEUTRAL_THRESHOLD, DEFAULT_TRUST_VALUE,
};
pub use phrases::{ApplianceCommand, PhrasePair, PhraseTable};
