use std::error::Error;
use std::fmt::{Display, Formatter};

pub type PmResult<T> = Result<T, PmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PmErrorCategory {
    Success,
    InputValidationError,
    IoSystemError,
    ComputationError,
    ConfigurationSizingError,
    InternalError,
}

impl PmErrorCategory {
    pub const fn exit_status(self) -> ExitStatus {
        match self {
            Self::Success => ExitStatus {
                exit_code: 0,
                rust_category: "Success",
                class: "SUCCESS",
            },
            Self::InputValidationError => ExitStatus {
                exit_code: 2,
                rust_category: "InputValidationError",
                class: "INPUT_FATAL",
            },
            Self::IoSystemError => ExitStatus {
                exit_code: 3,
                rust_category: "IoSystemError",
                class: "IO_FATAL",
            },
            Self::ComputationError => ExitStatus {
                exit_code: 4,
                rust_category: "ComputationError",
                class: "RUN_FATAL",
            },
            Self::ConfigurationSizingError => ExitStatus {
                exit_code: 5,
                rust_category: "ConfigurationSizingError",
                class: "SIZING_FATAL",
            },
            Self::InternalError => ExitStatus {
                exit_code: 6,
                rust_category: "InternalError",
                class: "SYS_FATAL",
            },
        }
    }

    pub const fn exit_code(self) -> i32 {
        self.exit_status().exit_code
    }

    pub const fn rust_category(self) -> &'static str {
        self.exit_status().rust_category
    }

    pub const fn class(self) -> &'static str {
        self.exit_status().class
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: i32,
    pub rust_category: &'static str,
    pub class: &'static str,
}

/// Run-ending failure raised anywhere in the PM core.
///
/// There is no local recovery: a timestep is only meaningful when every task
/// completes it, so every `PmError` terminates the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmError {
    category: PmErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl PmError {
    pub fn new(
        category: PmErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn input_validation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(PmErrorCategory::InputValidationError, placeholder, message)
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(PmErrorCategory::IoSystemError, placeholder, message)
    }

    pub fn computation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(PmErrorCategory::ComputationError, placeholder, message)
    }

    pub fn sizing(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(
            PmErrorCategory::ConfigurationSizingError,
            placeholder,
            message,
        )
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(PmErrorCategory::InternalError, placeholder, message)
    }

    pub const fn category(&self) -> PmErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.placeholder, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for PmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.rust_category(),
            self.placeholder,
            self.message
        )
    }
}

impl Error for PmError {}

#[cfg(test)]
mod tests {
    use super::{PmError, PmErrorCategory};

    #[test]
    fn exit_mapping_is_stable() {
        let cases = [
            (PmErrorCategory::Success, 0, "Success", "SUCCESS"),
            (
                PmErrorCategory::InputValidationError,
                2,
                "InputValidationError",
                "INPUT_FATAL",
            ),
            (
                PmErrorCategory::IoSystemError,
                3,
                "IoSystemError",
                "IO_FATAL",
            ),
            (
                PmErrorCategory::ComputationError,
                4,
                "ComputationError",
                "RUN_FATAL",
            ),
            (
                PmErrorCategory::ConfigurationSizingError,
                5,
                "ConfigurationSizingError",
                "SIZING_FATAL",
            ),
            (
                PmErrorCategory::InternalError,
                6,
                "InternalError",
                "SYS_FATAL",
            ),
        ];

        for (category, exit_code, rust_category, class) in cases {
            let status = category.exit_status();
            assert_eq!(status.exit_code, exit_code);
            assert_eq!(status.rust_category, rust_category);
            assert_eq!(status.class, class);
        }
    }

    #[test]
    fn sizing_errors_render_placeholder_and_exit_line() {
        let error = PmError::sizing(
            "RUN.MIGRATE_SEND_OVERFLOW",
            "task 3 overflowed its left send buffer",
        );
        assert_eq!(error.category(), PmErrorCategory::ConfigurationSizingError);
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [RUN.MIGRATE_SEND_OVERFLOW] task 3 overflowed its left send buffer"
        );
        assert_eq!(
            error.fatal_exit_line().as_deref(),
            Some("FATAL EXIT CODE: 5")
        );
        assert!(error.to_string().starts_with("ConfigurationSizingError"));
    }
}
