use crate::backend::Filter;

/// Runtime configuration for a memberof engine instance.
///
/// The forward and reverse attribute names are fixed constants
/// ([`crate::MEMBER_ATTR`], [`crate::MEMBER_OF_ATTR`]) rather than
/// configuration, so the surface here is the fixup-task defaults only.
#[derive(Debug, Clone)]
pub struct MemberOfConfig {
    /// Filter applied by a fixup task when the request carries none.
    /// Matches a broad user-like object class by default.
    pub fixup_default_filter: Filter,
    /// Upper bound on retained fixup-task log lines; older lines are
    /// dropped first.
    pub task_log_capacity: usize,
}

impl Default for MemberOfConfig {
    fn default() -> Self {
        Self {
            fixup_default_filter: Filter::equals("objectclass", "inetuser"),
            task_log_capacity: 256,
        }
    }
}

impl MemberOfConfig {
    pub fn with_fixup_default_filter(mut self, filter: Filter) -> Self {
        self.fixup_default_filter = filter;
        self
    }
}
