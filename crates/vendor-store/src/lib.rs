//! Vendor profiles, their merge rules, and the files they live in.

mod log;
mod persist;
mod profile;
mod store;

pub use log::{LogEntry, ScanLog};
pub use persist::{PersistenceError, VendorFile};
pub use profile::{Announcement, Feedback, JobResult, VendorProfile, RESULT_CONTENT_LIMIT};
pub use store::{MergeError, MergeOutcome, VendorStore, DEFAULT_RESULT_CAP};
