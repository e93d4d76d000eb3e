use std::fmt;

/// Externally visible identity of one worker: `http://<address>:<port>`.
///
/// Built once at provisioning time and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: String,
    port: u16,
}

impl Endpoint {
    pub fn new(address: &str, port: u16) -> Self {
        Self {
            url: format!("http://{}:{}", address, port),
            port,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        &self.url
    }
}
