pub mod references;

pub use references::{extract_references, issue_references, mentions, parse_issue_url};
