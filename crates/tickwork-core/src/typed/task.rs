//! Task trait - typed task state bound to a stable type name.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// The persisted state of one kind of task.
///
/// The value itself is what the checkpoint carries between steps, so it must
/// hold everything a resumed step needs.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Countdown {
///     left: u32,
/// }
///
/// impl Task for Countdown {
///     const TYPE: &'static str = "demo.countdown.v1";
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name, `{namespace}.{name}.v{major}` by convention.
    ///
    /// Stored with every task record, so renaming it orphans existing tasks.
    const TYPE: &'static str;
}
