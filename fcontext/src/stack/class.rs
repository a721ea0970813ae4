use super::config::config;

/// Kinds of stacks a fiber can ask for.
///
/// `Pthread` means "run on the calling OS thread's own stack" and is never allocated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackClass {
    Pthread,
    Small,
    Normal,
    Large,
}

impl StackClass {
    /// Configured size of stacks of this class.
    pub fn default_size(self) -> Option<usize> {
        let config = config();
        match self {
            StackClass::Pthread => None,
            StackClass::Small => Some(config.stack_size_small),
            StackClass::Normal => Some(config.stack_size_normal),
            StackClass::Large => Some(config.stack_size_large),
        }
    }

    /// How many stacks of this class a thread local cache may keep around for reuse. Classes without
    /// a depth are not cached.
    pub fn cache_depth(self) -> Option<usize> {
        let config = config();
        match self {
            StackClass::Small => Some(config.tc_stack_small),
            StackClass::Normal => Some(config.tc_stack_normal),
            StackClass::Pthread | StackClass::Large => None,
        }
    }
}
