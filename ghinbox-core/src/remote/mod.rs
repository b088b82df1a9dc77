pub mod github;
pub mod traits;

pub use github::GitHubClient;
pub use traits::RemoteSource;
