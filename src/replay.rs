use std::fmt;

/// Directory holding replays on both the FTP server and the bucket.
pub const REPLAY_DIR: &str = "replays";
pub const REPLAY_EXTENSION: &str = ".osr";

/// A replay to migrate, either by score id or by a raw file name found in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplayId {
    Score(i64),
    File(String),
}

impl ReplayId {
    /// Maps a listed file name back to an id. `replay_123.osr` becomes `Score(123)`.
    pub fn from_file_name(name: &str) -> ReplayId {
        name.strip_prefix("replay_")
            .and_then(|rest| rest.strip_suffix(REPLAY_EXTENSION))
            .and_then(|digits| {
                digits
                    .parse::<i64>()
                    .ok()
                    .filter(|id| id.to_string() == digits)
            })
            .map(ReplayId::Score)
            .unwrap_or_else(|| ReplayId::File(name.to_string()))
    }

    /// path of the replay on the FTP server
    pub fn source_path(&self) -> String {
        match self {
            ReplayId::Score(id) => format!("{}/replay_{}{}", REPLAY_DIR, id, REPLAY_EXTENSION),
            ReplayId::File(name) => format!("{}/{}", REPLAY_DIR, name),
        }
    }

    /// key of the replay in the bucket
    pub fn destination_key(&self) -> String {
        match self {
            ReplayId::Score(id) => format!("{}/{}{}", REPLAY_DIR, id, REPLAY_EXTENSION),
            ReplayId::File(name) => format!("{}/{}", REPLAY_DIR, name),
        }
    }
}

impl fmt::Display for ReplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayId::Score(id) => write!(f, "{}", id),
            ReplayId::File(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    AlreadyPresent,
    Transferred,
    SourceMissing,
    DestinationWriteFailed,
}
