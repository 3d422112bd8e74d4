use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOfErrorCode {
    Backend,
    NoSuchEntry,
    NoSuchAttribute,
    NoSuchValue,
    ValueExists,
    Search,
    InvalidTaskArguments,
    TaskSpawn,
}

impl MemberOfErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberOfErrorCode::Backend => "backend",
            MemberOfErrorCode::NoSuchEntry => "no_such_entry",
            MemberOfErrorCode::NoSuchAttribute => "no_such_attribute",
            MemberOfErrorCode::NoSuchValue => "no_such_value",
            MemberOfErrorCode::ValueExists => "value_exists",
            MemberOfErrorCode::Search => "search",
            MemberOfErrorCode::InvalidTaskArguments => "invalid_task_arguments",
            MemberOfErrorCode::TaskSpawn => "task_spawn",
        }
    }
}

#[derive(Debug, Error)]
pub enum MemberOfError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("no such entry: {dn}")]
    NoSuchEntry { dn: String },
    #[error("no such attribute '{attribute}' on {dn}")]
    NoSuchAttribute { dn: String, attribute: String },
    #[error("value '{value}' not present in attribute '{attribute}' on {dn}")]
    NoSuchValue {
        dn: String,
        attribute: String,
        value: String,
    },
    #[error("value '{value}' already present in attribute '{attribute}' on {dn}")]
    ValueExists {
        dn: String,
        attribute: String,
        value: String,
    },
    #[error("search under {base} failed: {message}")]
    Search { base: String, message: String },
    #[error("invalid task arguments: {message}")]
    InvalidTaskArguments { message: String },
    #[error("unable to create task thread: {0}")]
    TaskSpawn(#[from] std::io::Error),
}

impl MemberOfError {
    pub fn code(&self) -> MemberOfErrorCode {
        match self {
            MemberOfError::Backend(_) => MemberOfErrorCode::Backend,
            MemberOfError::NoSuchEntry { .. } => MemberOfErrorCode::NoSuchEntry,
            MemberOfError::NoSuchAttribute { .. } => MemberOfErrorCode::NoSuchAttribute,
            MemberOfError::NoSuchValue { .. } => MemberOfErrorCode::NoSuchValue,
            MemberOfError::ValueExists { .. } => MemberOfErrorCode::ValueExists,
            MemberOfError::Search { .. } => MemberOfErrorCode::Search,
            MemberOfError::InvalidTaskArguments { .. } => MemberOfErrorCode::InvalidTaskArguments,
            MemberOfError::TaskSpawn(_) => MemberOfErrorCode::TaskSpawn,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
