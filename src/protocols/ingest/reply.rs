//! Single-line replies sent back to ingestion clients.

use bytes::Bytes;

/// Reply to an ingestion connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Paste stored; carries the retrieval URL without the trailing newline
    Stored(String),
    /// Payload exceeded the size limit
    TooLarge { max_size: usize },
    /// No identifier could be allocated
    BinFull,
    /// The paste could not be written
    ServerError,
}

impl Reply {
    /// Encode the reply as sent on the wire
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Reply::Stored(url) => Bytes::from(format!("{url}\n")),
            Reply::TooLarge { max_size } => Bytes::from(format!(
                "Error: Paste too large (max {})\n",
                human_size(*max_size)
            )),
            Reply::BinFull => Bytes::from_static(b"Error: Bin is full\n"),
            Reply::ServerError => Bytes::from_static(b"Error: Server error\n"),
        }
    }
}

/// Render a byte count the way the oversize error presents it
fn human_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;

    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{bytes} bytes")
    }
}
