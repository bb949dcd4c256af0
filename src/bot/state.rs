use serde::{Deserialize, Serialize};

/// Represents the current state of the user dialogue
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum State {
    /// Regular interaction
    #[default]
    Start,
    /// Admin is about to send a new broadcast template
    EditingTemplate,
}
