//! Deterministic text transforms applied before a message is broadcast.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A pure function from an inbound message to the text that gets broadcast.
pub trait MessageTransform: Send + Sync {
    /// Transform `msg`. Must be deterministic.
    fn apply(&self, msg: &str) -> String;
}

/// Reverses a message by Unicode scalar value. Applying it twice is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct Reverse;

impl MessageTransform for Reverse {
    fn apply(&self, msg: &str) -> String {
        msg.chars().rev().collect()
    }
}

/// Leaves the message unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl MessageTransform for Identity {
    fn apply(&self, msg: &str) -> String {
        msg.to_owned()
    }
}

/// Upper-cases the message.
#[derive(Clone, Copy, Debug, Default)]
pub struct Uppercase;

impl MessageTransform for Uppercase {
    fn apply(&self, msg: &str) -> String {
        msg.to_uppercase()
    }
}

/// Built-in transforms selectable from settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    /// [`Reverse`].
    #[default]
    Reverse,
    /// [`Identity`].
    Identity,
    /// [`Uppercase`].
    Uppercase,
}

impl TransformKind {
    /// Build the transform for this kind.
    pub fn build(self) -> Arc<dyn MessageTransform> {
        match self {
            Self::Reverse => Arc::new(Reverse),
            Self::Identity => Arc::new(Identity),
            Self::Uppercase => Arc::new(Uppercase),
        }
    }
}
