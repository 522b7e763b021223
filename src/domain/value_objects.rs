//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Verdict of a single health probe, or of the whole service.
///
/// Ordering follows severity: `Healthy < Degraded < Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component works but is close to a limit
    Degraded,
    /// Component cannot serve its purpose
    Unhealthy,
}

impl HealthStatus {
    /// Combine individual verdicts into one composite status.
    ///
    /// Any unhealthy verdict wins, then any degraded one. An empty set is
    /// healthy since nothing dissents.
    ///
    /// # Examples
    /// ```
    /// use boiler_api::domain::value_objects::HealthStatus;
    ///
    /// let all = [HealthStatus::Healthy, HealthStatus::Degraded];
    /// assert_eq!(HealthStatus::composite(all), HealthStatus::Degraded);
    /// assert_eq!(HealthStatus::composite([]), HealthStatus::Healthy);
    /// ```
    pub fn composite<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        statuses
            .into_iter()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
