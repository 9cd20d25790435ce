//! Helpers shared by the workspace's test suites.
//!
//! Unique names keep tests that touch a real engine from colliding with each
//! other or with earlier runs.

pub mod logging;

use ulid::Ulid;

/// Generate a unique string with the given prefix, formatted `{prefix}-{ulid}`.
///
/// # Examples
/// ```
/// use test_support::unique_str;
///
/// let id1 = unique_str("user");
/// let id2 = unique_str("user");
/// assert_ne!(id1, id2);
/// assert!(id1.starts_with("user-"));
/// ```
pub fn unique_str(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new())
}

/// A unique database name usable on document engines: `{prefix}_{ulid}` in
/// lowercase, with no characters engines reject in database names.
///
/// # Examples
/// ```
/// use test_support::unique_db_name;
///
/// let name = unique_db_name("prov");
/// assert!(name.starts_with("prov_"));
/// assert!(!name.contains('-'));
/// ```
pub fn unique_db_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string().to_lowercase())
}
