//! The value a step hands to its successor.

use super::Machine;
use crate::errors::{ProvisionError, Result};

/// Result of a step's forward operation.
///
/// Most steps thread the [`Machine`]; terminal steps may yield text such
/// as the deployed image id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// An updated working copy of the machine.
    Machine(Machine),
    /// A raw text payload.
    Text(String),
}

impl StepResult {
    /// Returns a short name of the variant for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Machine(_) => "machine",
            Self::Text(_) => "text",
        }
    }

    /// Borrows the machine, or fails naming the requesting step.
    pub fn machine(&self, step: &str) -> Result<&Machine> {
        match self {
            Self::Machine(machine) => Ok(machine),
            other => Err(ProvisionError::UnexpectedResult {
                step: step.to_string(),
                expected: "machine",
                found: other.kind(),
            }),
        }
    }

    /// Returns the machine if this result holds one.
    #[must_use]
    pub fn as_machine(&self) -> Option<&Machine> {
        match self {
            Self::Machine(machine) => Some(machine),
            Self::Text(_) => None,
        }
    }

    /// Returns the text if this result holds one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Machine(_) => None,
        }
    }
}

impl From<Machine> for StepResult {
    fn from(machine: Machine) -> Self {
        Self::Machine(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MachineSpec, MachineState, MachineStatus};

    fn machine() -> Machine {
        Machine::from_spec(
            &MachineSpec::new("m1", "acc", "web", "example.com"),
            MachineStatus::Running,
            MachineState::Running,
            "img",
            "",
        )
    }

    #[test]
    fn test_machine_accessor() {
        let result = StepResult::from(machine());
        assert_eq!(result.machine("any").unwrap().id, "m1");
        assert!(result.as_text().is_none());
    }

    #[test]
    fn test_text_rejected_as_machine() {
        let result = StepResult::Text("img-1".into());
        let err = result.machine("update-status").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Step 'update-status' expected a machine result, got text"
        );
        assert_eq!(result.as_text(), Some("img-1"));
    }
}
