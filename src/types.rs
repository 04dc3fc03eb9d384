use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Plain HTTP port probed on every host.
pub const HTTP_PORT: u16 = 80;
/// Alternate HTTP port many camera firmwares listen on.
pub const ALT_HTTP_PORT: u16 = 8080;

/// One (address, port) pair waiting in the work queue.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl WorkItem {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Browser URL for the service; the default port is left implicit.
    pub fn url(&self) -> String {
        if self.port == ALT_HTTP_PORT {
            format!("http://{}:{}", self.ip, self.port)
        } else {
            format!("http://{}", self.ip)
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Camera firmware families recognised by their HTTP landing page.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    Dahua,
    Hikvision,
}

impl CameraKind {
    pub fn label(self) -> &'static str {
        match self {
            CameraKind::Dahua => "Anjhua-Dahua Technology Camera",
            CameraKind::Hikvision => "HIK Vision Camera",
        }
    }
}

impl fmt::Display for CameraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of classifying one HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Camera(CameraKind),
    NoMatch,
}

/// One confirmed camera, as written to the result log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CameraRecord {
    pub kind: CameraKind,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub url: String,
    pub detected_at: String,
}

const SEPARATOR_WIDTH: usize = 60;

impl CameraRecord {
    pub fn new(item: WorkItem, kind: CameraKind, detected_at: String) -> Self {
        Self {
            kind,
            ip: item.ip,
            port: item.port,
            url: item.url(),
            detected_at,
        }
    }

    /// Render the record as one contiguous result-log block.
    pub fn to_block(&self) -> String {
        let sep = "=".repeat(SEPARATOR_WIDTH);
        format!(
            "{sep}\nCamera Type: {}\nIP Address: {}\nPort: {}\nURL: {}\nDetection Time: {}\n{sep}\n\n",
            self.kind.label(),
            self.ip,
            self.port,
            self.url,
            self.detected_at,
        )
    }
}

/// End-of-run report.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanSummary {
    pub queued: u64,
    pub scanned: u64,
    pub probe_errors: u64,
    pub cameras_found: u64,
    pub elapsed_ms: u64,
    pub stopped_early: bool,
}
