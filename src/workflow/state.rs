//! State names. Each workflow declares a closed enum of its states; the
//! session stores the serializable name.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Serializable name of a workflow state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateName(Cow<'static, str>);

impl StateName {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for StateName {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

/// Declare a workflow's state enum with string conversions.
///
/// ```ignore
/// workflow_states! {
///     pub enum State {
///         ChooseMachine => "choose_machine",
///         Confirm => "confirm",
///     }
/// }
/// ```
macro_rules! workflow_states {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $name {
            #[allow(dead_code)]
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            pub fn parse(name: &str) -> Option<Self> {
                match name {
                    $($label => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Resolve a session state name, failing for names this
            /// workflow does not declare.
            pub fn of(
                workflow: $crate::scenes::WorkflowId,
                state: &$crate::workflow::state::StateName,
            ) -> Result<Self, $crate::error::WorkflowError> {
                Self::parse(state.as_str()).ok_or_else(|| {
                    $crate::error::WorkflowError::UnknownState {
                        workflow: workflow.to_string(),
                        state: state.to_string(),
                    }
                })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for $crate::workflow::state::StateName {
            fn from(state: $name) -> Self {
                $crate::workflow::state::StateName::new(state.as_str())
            }
        }
    };
}

pub(crate) use workflow_states;
