//! NIP-90 event kinds the scanner understands.

/// Service announcement published by a DVM (NIP-89 handler information).
pub const DVM_ANNOUNCEMENT: u16 = 31990;

pub const JOB_REQUEST_MIN: u16 = 5000;
pub const JOB_REQUEST_MAX: u16 = 5999;

pub const JOB_RESULT_MIN: u16 = 6000;
pub const JOB_RESULT_MAX: u16 = 6999;

pub const JOB_FEEDBACK: u16 = 7000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    Announcement,
    JobRequest,
    JobResult,
    JobFeedback,
    Other,
}

impl KindClass {
    pub fn of(kind: u16) -> Self {
        match kind {
            DVM_ANNOUNCEMENT => KindClass::Announcement,
            JOB_REQUEST_MIN..=JOB_REQUEST_MAX => KindClass::JobRequest,
            JOB_RESULT_MIN..=JOB_RESULT_MAX => KindClass::JobResult,
            JOB_FEEDBACK => KindClass::JobFeedback,
            _ => KindClass::Other,
        }
    }
}
