//! Endpoint state shared by connections, sessions and links.
//!
//! Every endpoint has two independent halves: the local one, driven by
//! `open()`/`close()`, and the remote one, driven by the peer's frames. An
//! endpoint is gone only when *both* halves are closed.

/// One half of an endpoint's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Half {
    /// Neither opened nor closed yet.
    #[default]
    Uninit,
    /// Open.
    Active,
    /// Closed.
    Closed,
}

/// The two halves of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State {
    pub local: Half,
    pub remote: Half,
}

impl State {
    #[inline]
    #[must_use]
    pub const fn is_local_uninit(&self) -> bool {
        matches!(self.local, Half::Uninit)
    }

    #[inline]
    #[must_use]
    pub const fn is_local_active(&self) -> bool {
        matches!(self.local, Half::Active)
    }

    #[inline]
    #[must_use]
    pub const fn is_local_closed(&self) -> bool {
        matches!(self.local, Half::Closed)
    }

    #[inline]
    #[must_use]
    pub const fn is_remote_uninit(&self) -> bool {
        matches!(self.remote, Half::Uninit)
    }

    #[inline]
    #[must_use]
    pub const fn is_remote_active(&self) -> bool {
        matches!(self.remote, Half::Active)
    }

    #[inline]
    #[must_use]
    pub const fn is_remote_closed(&self) -> bool {
        matches!(self.remote, Half::Closed)
    }

    /// Both halves closed.
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.is_local_closed() && self.is_remote_closed()
    }
}

/// Source or target of a link: an address plus a dynamic-node flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Terminus {
    address: Option<String>,
    dynamic: bool,
}

impl Terminus {
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn set_address(&mut self, address: Option<&str>) {
        self.address = address.map(str::to_owned);
    }

    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn set_dynamic(&mut self, dynamic: bool) {
        self.dynamic = dynamic;
    }
}

/// A peer-reported error condition carried on close/detach frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    name: String,
    description: String,
}

impl Condition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.description)
        }
    }
}
