use chrono::{DateTime, Utc};

/// A fact published by the workflow, such as a part changing stage.
///
/// The `version` lets subscribers tell payload shapes apart.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted type name, e.g. `"part.stage.advanced"`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    fn occurred_at(&self) -> DateTime<Utc>;
}
