//! Collaborator seams consumed by the auto-search core.
//!
//! The core never talks to the hub, the share index, or the download
//! queue directly; everything goes through these traits so the
//! surrounding client wires in its managers and tests wire in fakes.

use crate::error::Result;
use crate::search::item::TargetKind;

/// A search-type tag resolved to its numeric mode and extension filter.
#[derive(Debug, Clone, Default)]
pub struct SearchType {
    pub mode: i32,
    pub extensions: Vec<String>,
}

/// Lookup of symbolic file-type tags.
pub trait SearchTypeResolver: Send + Sync {
    /// Resolve a tag, or fail with [`crate::Error::SearchTypeUnknown`].
    fn resolve(&self, tag: &str) -> Result<SearchType>;

    /// Human-readable name for a tag. Defaults to the tag itself.
    fn display_name(&self, tag: &str) -> String {
        tag.to_string()
    }
}

/// Who initiated a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCategory {
    /// Issued by the round-robin scheduler.
    Auto,
    /// Issued directly by the user.
    Manual,
}

/// Size filter accompanying a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizePolicy {
    #[default]
    DontCare,
    AtLeast,
    AtMost,
    Exact,
}

/// Parameters of one outgoing search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub size: i64,
    pub mode: i32,
    pub size_policy: SizePolicy,
    /// Token echoed back in results; the scheduler uses
    /// [`crate::constants::AUTO_SEARCH_TOKEN`].
    pub token: String,
    pub extensions: Vec<String>,
    pub category: SearchCategory,
}

/// The search infrastructure.
pub trait SearchDispatcher: Send + Sync {
    /// Issue a search on the given hubs. Returns the delay in
    /// milliseconds until the search actually goes out (0 = sent now).
    fn search(&self, hubs: &[String], request: SearchRequest) -> u64;
}

/// An online user as seen by the client directory.
#[derive(Debug, Clone)]
pub struct OnlineUser {
    pub nick: String,
    pub connected: bool,
}

/// The hub connection and user directory.
pub trait ClientRegistry: Send + Sync {
    /// URLs of all currently connected hubs.
    fn online_hubs(&self) -> Vec<String>;

    /// Known nicks for a user on a hub.
    fn nicks(&self, cid: &str, hub_url: &str) -> Vec<String>;

    /// Look up an online user on a specific hub.
    fn find_online_user(&self, cid: &str, hub_url: &str) -> Option<OnlineUser>;

    /// Deliver an informational message to a hub chat.
    fn hub_message(&self, hub_url: &str, message: &str);
}

/// The local share index.
pub trait ShareIndex: Send + Sync {
    /// Whether a directory of this name exists anywhere in the share.
    fn is_dir_shared(&self, name: &str) -> bool;
}

/// A user pinned to the hub they were seen on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintedUser {
    pub cid: String,
    pub hub_url: String,
}

/// Queue priority applied to spawned downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePriority {
    #[default]
    Default,
    Paused,
}

/// The download queue.
pub trait DownloadQueue: Send + Sync {
    /// Whether a directory of this name is already queued.
    fn is_dir_queued(&self, name: &str) -> bool;

    /// Queue a single file download.
    fn add_file(
        &self,
        target: &str,
        size: i64,
        tth: &str,
        user: &HintedUser,
        remote_path: &str,
        priority: QueuePriority,
        item_token: u32,
    ) -> Result<()>;

    /// Display name of a bundle.
    fn bundle_name(&self, bundle_token: &str) -> String;
}

/// Directory listing downloads.
pub trait ListingDownloader: Send + Sync {
    /// Queue a full directory download through a filelist fetch.
    fn add_directory_download(
        &self,
        remote_dir: &str,
        user: &HintedUser,
        target: &str,
        target_kind: TargetKind,
        priority: QueuePriority,
        item_token: u32,
    ) -> Result<()>;
}

/// A resolved download destination.
#[derive(Debug, Clone, Default)]
pub struct TargetInfo {
    /// Directory downloads land in, with a trailing separator.
    pub target_dir: String,
}

/// Resolution of virtual download targets.
pub trait TargetResolver: Send + Sync {
    /// Resolve a target descriptor to a concrete directory. The flag
    /// reports whether the volume has room for `size` bytes.
    fn virtual_target(&self, target: &str, kind: TargetKind, size: i64) -> (TargetInfo, bool);

    /// Tell the user a download does not fit the resolved volume.
    fn report_insufficient_size(&self, info: &TargetInfo, size: i64);
}

/// Kind of an incoming search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    File,
    Directory,
}

/// A decoded search result handed to the matcher.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// CID of the user the result came from.
    pub cid: String,
    pub hub_url: String,
    /// Full remote path; directory results end with a separator.
    pub path: String,
    pub size: i64,
    /// Base32 content hash of file results.
    pub tth: String,
    pub kind: ResultKind,
    /// The search token this result answers.
    pub token: String,
}

impl SearchResult {
    /// The file name portion of the path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// The last directory segment of the path.
    pub fn last_directory(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }

    /// The sender as a hinted user.
    pub fn user(&self) -> HintedUser {
        HintedUser {
            cid: self.cid.clone(),
            hub_url: self.hub_url.clone(),
        }
    }
}
