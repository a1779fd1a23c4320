/// The caller of a switch request. Handles are bound to the session that
/// opened them; `uid`/`gid` decide access to restricted networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    pub id: u64,
    pub uid: u32,
    pub gid: u32,
}

impl Session {
    pub const fn new(id: u64, uid: u32, gid: u32) -> Self {
        Self { id, uid, gid }
    }

    /// Whether this session may open a restricted network created by `creator`.
    pub fn shares_identity(&self, creator: &Session) -> bool {
        self.id == creator.id || self.uid == creator.uid || self.gid == creator.gid
    }
}

/// Opaque interface handle returned by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfHandle(pub(crate) u32);

impl IfHandle {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for IfHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
