//! Outcome of one configuration attempt.

use super::ConfigAttribute;

/// What happened to a single attribute write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Succeeded,
    Failed {
        /// General status returned by the device, absent for timeouts and
        /// transport errors.
        cip_status_code: Option<u8>,
        message: String,
    },
    /// Skipped because an earlier write failed.
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeWriteResult {
    pub attribute: ConfigAttribute,
    pub status: WriteStatus,
}

impl AttributeWriteResult {
    pub fn succeeded(attribute: ConfigAttribute) -> Self {
        Self {
            attribute,
            status: WriteStatus::Succeeded,
        }
    }

    pub fn failed(
        attribute: ConfigAttribute,
        cip_status_code: Option<u8>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            attribute,
            status: WriteStatus::Failed {
                cip_status_code,
                message: message.into(),
            },
        }
    }

    pub fn not_attempted(attribute: ConfigAttribute) -> Self {
        Self {
            attribute,
            status: WriteStatus::NotAttempted,
        }
    }

    pub fn attribute_id(&self) -> u16 {
        self.attribute.attribute_id()
    }

    pub fn attribute_name(&self) -> &'static str {
        self.attribute.name()
    }

    pub fn success(&self) -> bool {
        self.status == WriteStatus::Succeeded
    }

    pub fn was_attempted(&self) -> bool {
        self.status != WriteStatus::NotAttempted
    }

    pub fn cip_status_code(&self) -> Option<u8> {
        match &self.status {
            WriteStatus::Failed {
                cip_status_code, ..
            } => *cip_status_code,
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            WriteStatus::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Ordered per-attribute results of one configuration attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationWriteResult {
    pub results: Vec<AttributeWriteResult>,
    /// True when a failure caused later attributes to be skipped.
    pub stopped_early: bool,
}

impl ConfigurationWriteResult {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, WriteStatus::Failed { .. }))
            .count()
    }

    pub fn not_attempted_count(&self) -> usize {
        self.results.iter().filter(|r| !r.was_attempted()).count()
    }

    /// Every attribute was written.
    pub fn is_success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.success())
    }

    /// The first failed write, which is what stopped the sequence.
    pub fn first_failure(&self) -> Option<&AttributeWriteResult> {
        self.results
            .iter()
            .find(|r| matches!(r.status, WriteStatus::Failed { .. }))
    }

    pub fn first_error_message(&self) -> Option<&str> {
        self.first_failure().and_then(|r| r.error_message())
    }
}
