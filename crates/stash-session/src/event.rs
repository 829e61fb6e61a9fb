//! Recording output grammar
//!
//! The backend reports a session's progress as text lines:
//! `ACCEPT <url>`, `REDIRECT <url>`, `DOWNLOAD_FINISHED <status> <size> <url>`,
//! or free-form progress text. The end of the stream is the terminal event.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The backend serves the session at this address
    Accept(String),
    /// The live site redirected to this address
    Redirect(String),
    DownloadFinished {
        status: String,
        size: u64,
        url: String,
    },
    Progress(String),
    /// End of the event stream
    Finished,
}

impl SessionEvent {
    pub fn parse(raw: &str) -> Self {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return SessionEvent::Finished;
        }

        if let Some(url) = argument(line, "ACCEPT") {
            return SessionEvent::Accept(url.to_string());
        }
        if let Some(url) = argument(line, "REDIRECT") {
            return SessionEvent::Redirect(url.to_string());
        }
        if let Some(rest) = argument(line, "DOWNLOAD_FINISHED") {
            let mut parts = rest.splitn(3, ' ');
            if let (Some(status), Some(size), Some(url)) = (parts.next(), parts.next(), parts.next())
            {
                if let Ok(size) = size.parse() {
                    return SessionEvent::DownloadFinished {
                        status: status.to_string(),
                        size,
                        url: url.to_string(),
                    };
                }
            }
        }

        SessionEvent::Progress(line.to_string())
    }

    /// Events kept in the log and fanned out to subscribers.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            SessionEvent::DownloadFinished { .. } | SessionEvent::Progress(_)
        )
    }
}

fn argument<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    line.strip_prefix(keyword)?
        .strip_prefix(' ')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
}
