pub mod checker;
pub mod redaction;
pub mod validation;

pub use checker::{SecurityChecker, SecurityVerdict};
pub use redaction::{RedactingWriter, redact_secrets};
pub use validation::{InputValidator, ValidationIssue};
