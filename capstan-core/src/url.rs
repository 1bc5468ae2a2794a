//! Address parsing.
//!
//! Grammar: `[scheme://][user[/password]@](host4|[host6])[:port]`. The
//! default scheme is `amqp` and the default port 5672; both stay unset on
//! the parsed value so that formatting a [`Url`] reproduces its input
//! exactly.

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Default port used when an address does not name one.
pub const DEFAULT_PORT: u16 = 5672;

/// A parsed messaging address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    scheme: Option<String>,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
}

impl Url {
    pub const AMQP: &'static str = "amqp";
    pub const AMQPS: &'static str = "amqps";

    /// Parse an address.
    ///
    /// # Examples
    ///
    /// ```
    /// use capstan_core::url::Url;
    ///
    /// let url = Url::parse("amqp://guest/secret@broker:5672").unwrap();
    /// assert_eq!(url.host(), "broker");
    /// assert_eq!(url.user(), Some("guest"));
    /// ```
    pub fn parse(s: &str) -> Result<Self, Error> {
        s.parse()
    }

    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The scheme, defaulting to `amqp`.
    #[must_use]
    pub fn scheme_or_default(&self) -> &str {
        self.scheme.as_deref().unwrap_or(Self::AMQP)
    }

    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The port, defaulting to 5672.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Host and effective port, ready for a connect call.
    #[must_use]
    pub fn host_port(&self) -> (&str, u16) {
        (&self.host, self.port_or_default())
    }
}

fn valid_part(s: &str) -> bool {
    !s.is_empty() && !s.contains([':', '/', '@'])
}

fn valid_host6(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidUrl(s.to_owned());
        let mut rest = s;

        let scheme = match rest.find("://") {
            Some(idx) => {
                let scheme = &rest[..idx];
                if !valid_part(scheme) {
                    return Err(invalid());
                }
                rest = &rest[idx + 3..];
                Some(scheme.to_owned())
            }
            None => None,
        };

        let (user, password) = match rest.find('@') {
            Some(idx) => {
                let creds = &rest[..idx];
                rest = &rest[idx + 1..];
                match creds.split_once('/') {
                    Some((user, password)) => {
                        if !valid_part(user) || !valid_part(password) {
                            return Err(invalid());
                        }
                        (Some(user.to_owned()), Some(password.to_owned()))
                    }
                    None => {
                        if !valid_part(creds) {
                            return Err(invalid());
                        }
                        (Some(creds.to_owned()), None)
                    }
                }
            }
            None => (None, None),
        };

        let (host, port_str) = if let Some(inner) = rest.strip_prefix('[') {
            let (host, tail) = inner.split_once(']').ok_or_else(invalid)?;
            if !valid_host6(host) {
                return Err(invalid());
            }
            let port = match tail {
                "" => None,
                tail => Some(tail.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host.to_owned(), port)
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host.to_owned(), Some(port)),
                None => (rest.to_owned(), None),
            }
        };
        if host.is_empty() || host.contains(['@', ':', '/', '[']) {
            return Err(invalid());
        }

        let port = match port_str {
            Some(p) => Some(p.parse::<u16>().map_err(|_| invalid())?),
            None => None,
        };

        Ok(Self {
            scheme,
            user,
            password,
            host,
            port,
        })
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        if let Some(user) = &self.user {
            write!(f, "{user}")?;
            if let Some(password) = &self.password {
                write!(f, "/{password}")?;
            }
            write!(f, "@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// A restartable round-robin rotation over a list of addresses.
#[derive(Debug, Clone)]
pub struct Urls {
    values: Vec<Url>,
    index: usize,
}

impl Urls {
    /// Parse every address; fails on the first invalid one.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, Error> {
        let values = values
            .iter()
            .map(|v| Url::parse(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_urls(values))
    }

    /// Wrap pre-parsed addresses. Empty lists are a programming error.
    #[must_use]
    pub fn from_urls(values: Vec<Url>) -> Self {
        assert!(!values.is_empty(), "Urls requires at least one address");
        Self { values, index: 0 }
    }

    /// The next address in rotation; wraps around at the end.
    pub fn next(&mut self) -> Url {
        let url = self.values[self.index].clone();
        self.index = (self.index + 1) % self.values.len();
        url
    }
}

impl From<Url> for Urls {
    fn from(url: Url) -> Self {
        Self::from_urls(vec![url])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components() {
        let url = Url::parse("amqps://alice/wonder@example.net:5671").unwrap();
        assert_eq!(url.scheme(), Some("amqps"));
        assert_eq!(url.user(), Some("alice"));
        assert_eq!(url.password(), Some("wonder"));
        assert_eq!(url.host(), "example.net");
        assert_eq!(url.port(), Some(5671));
    }

    #[test]
    fn test_defaults() {
        let url = Url::parse("localhost").unwrap();
        assert_eq!(url.scheme_or_default(), "amqp");
        assert_eq!(url.port_or_default(), 5672);
        assert_eq!(url.host_port(), ("localhost", 5672));
    }

    #[test]
    fn test_ipv6() {
        let url = Url::parse("amqp://[::1]:5672").unwrap();
        assert_eq!(url.host(), "::1");
        assert_eq!(url.port(), Some(5672));
    }

    #[test]
    fn test_display_round_trips() {
        let cases = [
            "localhost",
            "localhost:5672",
            "amqp://localhost",
            "amqp://host.example:1234",
            "user@host",
            "user/password@host:99",
            "amqps://user/password@host.example:5671",
            "[::1]",
            "amqp://[fe80::1]:5672",
            "amqp://bob@[::1]:5672",
        ];
        for case in cases {
            let url = Url::parse(case).unwrap();
            assert_eq!(url.to_string(), case, "round-trip failed for {case}");
        }
    }

    #[test]
    fn test_rejects_garbage() {
        for case in ["", "://host", "user@", "host:port", "[::1", "a@b@c"] {
            assert!(Url::parse(case).is_err(), "accepted {case:?}");
        }
    }

    #[test]
    fn test_urls_rotation() {
        let mut urls = Urls::parse(&["a", "b"]).unwrap();
        assert_eq!(urls.next().host(), "a");
        assert_eq!(urls.next().host(), "b");
        assert_eq!(urls.next().host(), "a");
    }
}
